//! Terminal progress for uploads
//!
//! [`ProgressObserver`] turns pipeline events into an indicatif bar measured
//! in raw bytes; the pipeline itself never prints.

use human_bytes::human_bytes;
use indicatif::{ProgressBar, ProgressState, ProgressStyle};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::UlNzbError;
use crate::upload::{UploadJob, UploadObserver, UploadSummary};

fn upload_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "[{bar:40.cyan/blue}] {percent:>3}% {bytes:>10}/{total_bytes:<10} {rate:>12} ETA {eta:>5} {msg}",
    )
    .expect("static template")
    .progress_chars("━━╸ ")
    .with_key("eta", |state: &ProgressState, w: &mut dyn std::fmt::Write| {
        let _ = write!(w, "{:>5.0}s", state.eta().as_secs_f64());
    })
    .with_key("rate", |state: &ProgressState, w: &mut dyn std::fmt::Write| {
        let _ = w.write_str(&format_rate(state.per_sec()));
    })
}

/// `12.34 MiB/s` style throughput, padded for the bar
pub fn format_rate(bytes_per_sec: f64) -> String {
    if bytes_per_sec > 1_048_576.0 {
        format!("{:>7.2} MiB/s", bytes_per_sec / 1_048_576.0)
    } else if bytes_per_sec > 1024.0 {
        format!("{:>7.2} KiB/s", bytes_per_sec / 1024.0)
    } else {
        format!("{:>7.0}  B/s", bytes_per_sec)
    }
}

/// Progress bar fed by the uploader
pub struct ProgressObserver {
    bar: ProgressBar,
    files_done: AtomicUsize,
    files_total: AtomicUsize,
}

impl ProgressObserver {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(upload_style());
        Self::with_bar(bar)
    }

    /// Track progress without drawing anything
    pub fn hidden() -> Self {
        Self::with_bar(ProgressBar::hidden())
    }

    fn with_bar(bar: ProgressBar) -> Self {
        Self {
            bar,
            files_done: AtomicUsize::new(0),
            files_total: AtomicUsize::new(0),
        }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    fn counter(&self) -> String {
        format!(
            "({}/{})",
            self.files_done.load(Ordering::Relaxed),
            self.files_total.load(Ordering::Relaxed)
        )
    }
}

impl Default for ProgressObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadObserver for ProgressObserver {
    fn run_started(&self, jobs: &[UploadJob], total_bytes: u64) {
        self.files_total.store(jobs.len(), Ordering::Relaxed);
        self.bar.set_length(total_bytes);
        self.bar.enable_steady_tick(Duration::from_millis(100));
    }

    fn job_started(&self, job: &UploadJob) {
        self.bar
            .set_message(format!("{} {}", self.counter(), job.basename));
    }

    fn article_posted(&self, _job: &UploadJob, _index: u32, raw_bytes: u64) {
        self.bar.inc(raw_bytes);
    }

    fn article_retry(&self, job: &UploadJob, index: u32, error: &UlNzbError, failures: u32) {
        self.bar.set_message(format!(
            "{} {} part {} retry #{}: {}",
            self.counter(),
            job.basename,
            index,
            failures,
            error
        ));
    }

    fn job_finished(&self, job: &UploadJob) {
        self.files_done.fetch_add(1, Ordering::Relaxed);
        self.bar
            .set_message(format!("{} {} done", self.counter(), job.basename));
    }

    fn run_finished(&self, summary: &UploadSummary) {
        self.bar.finish_with_message(format_upload_summary(summary));
    }
}

/// One-line human summary of a run
pub fn format_upload_summary(summary: &UploadSummary) -> String {
    let mut line = format!(
        "({}/{}) Posted {} in {:.0}s ({}/s)",
        summary.articles_posted,
        summary.articles_posted + summary.articles_failed,
        human_bytes(summary.bytes as f64),
        summary.elapsed.as_secs_f64(),
        human_bytes(summary.rate())
    );
    if summary.articles_failed > 0 {
        let _ = write!(line, ", {} article(s) failed", summary.articles_failed);
    }
    if summary.retries > 0 {
        let _ = write!(line, ", {} retries", summary.retries);
    }
    line
}
