//! Turning files into posted articles
//!
//! Jobs are planned from the input paths, split into chunks, yEnc encoded
//! into articles and posted by a pool of workers. Confirmed segments are
//! collected per job so the NZB can be written once a job is complete.

mod article;
mod job;
mod ledger;
mod observer;
mod queue;
mod retry;
mod uploader;

pub use article::{format_date, Article, ArticleTemplate};
pub use job::{directory_name, discover_files, plan_jobs, DirectoryContext, UploadJob, UploadMode};
pub use ledger::{Recorded, SegmentEntry, SegmentLedger};
pub use observer::{NoopObserver, UploadObserver};
pub use queue::{bounded, QueueReceiver, QueueSender};
pub use retry::{retry_forever, RetryDecision, RetryPolicy, HEADER_CHECK_STEP};
pub use uploader::{UploadSummary, Uploader};
