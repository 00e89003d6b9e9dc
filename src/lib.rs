//! ul-nzb - Usenet binary poster library
//!
//! This library posts files to Usenet as yEnc encoded articles and writes
//! an NZB describing what was posted.
//!
//! # Features
//!
//! - Async/await support via Tokio
//! - Connection pooling with automatic health checks
//! - Bounded producer/worker pipeline with per-article retries
//! - yEnc encoding with per-part and whole-file CRC32
//! - NZB generation, per file or per directory
//!
//! # Example
//!
//! ```no_run
//! use ul_nzb::{config::Config, upload::{UploadMode, Uploader}};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(None)?;
//!     let uploader = Uploader::new(config)?;
//!     let summary = uploader
//!         .upload(UploadMode::Files(vec!["backup.tar".into()]))
//!         .await?;
//!     println!("posted {} articles", summary.articles_posted);
//!     Ok(())
//! }
//! ```

// Core modules
pub mod cli;
pub mod config;
pub mod error;
pub mod progress;

// Feature modules organized by functionality
pub mod nntp;
pub mod nzb;
pub mod upload;
pub mod yenc;

// Re-export commonly used types
pub use config::Config;
pub use error::{Result, UlNzbError};
pub use nntp::{NntpConnection, NntpPool, NntpPoolBuilder, NntpPoolExt};
pub use nzb::{NzbListing, NzbWriter};
pub use upload::{UploadMode, UploadSummary, Uploader};
