use super::job::UploadJob;
use super::uploader::UploadSummary;
use crate::error::UlNzbError;

/// Receives progress events from the pipeline; the pipeline itself never prints
///
/// Every method has an empty default, implement only what you display.
pub trait UploadObserver: Send + Sync {
    /// Called once, after every file has been checksummed
    fn run_started(&self, _jobs: &[UploadJob], _total_bytes: u64) {}

    /// The producer started reading a file
    fn job_started(&self, _job: &UploadJob) {}

    /// An article was accepted by the server
    fn article_posted(&self, _job: &UploadJob, _index: u32, _raw_bytes: u64) {}

    /// A post failed and will be retried
    fn article_retry(&self, _job: &UploadJob, _index: u32, _error: &UlNzbError, _failures: u32) {}

    /// Every chunk of a file has been posted
    fn job_finished(&self, _job: &UploadJob) {}

    fn run_finished(&self, _summary: &UploadSummary) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl UploadObserver for NoopObserver {}
