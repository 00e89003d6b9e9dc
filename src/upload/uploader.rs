//! The posting pipeline
//!
//! One producer task reads every job in order, encodes each chunk and pushes
//! the finished article onto a bounded queue of `connections × 3` entries.
//! `connections` workers each hold one pooled session and pop articles until
//! the queue is closed and drained. A failed post is retried by the worker
//! that owns it, on a fresh session when the old one is unusable.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use super::article::{Article, ArticleTemplate};
use super::job::{directory_name, plan_jobs, UploadJob, UploadMode};
use super::ledger::{Recorded, SegmentEntry, SegmentLedger};
use super::observer::{NoopObserver, UploadObserver};
use super::queue::{self, QueueReceiver, QueueSender};
use super::retry::{retry_forever, sleep_or_cancel, RetryDecision, RetryPolicy};
use crate::config::Config;
use crate::error::{UlNzbError, UploadError};
use crate::nntp::{NntpPool, NntpPoolBuilder, NntpPoolExt, PooledConnection};
use crate::nzb::{FileRecord, NzbOutput};

type Result<T> = std::result::Result<T, UlNzbError>;

/// Queue slots per connection
const QUEUE_DEPTH_PER_CONNECTION: usize = 3;

/// Outcome of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct UploadSummary {
    pub files: usize,
    /// Raw bytes confirmed posted
    pub bytes: u64,
    pub articles_posted: u64,
    pub articles_failed: u64,
    pub retries: u64,
    #[serde(rename = "elapsed_secs", serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    pub nzb: Vec<PathBuf>,
}

impl UploadSummary {
    /// Average throughput in bytes per second
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / secs
        } else {
            0.0
        }
    }
}

fn serialize_secs<S: serde::Serializer>(
    elapsed: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64(elapsed.as_secs_f64())
}

/// One queue entry
struct ArticleRequest {
    job: usize,
    index: u32,
    raw_len: u32,
    article: Article,
}

#[derive(Default)]
struct Counters {
    /// Articles not yet confirmed, decremented on success only
    remaining: AtomicU64,
    posted: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
    bytes: AtomicU64,
}

/// Everything the producer and workers share for one run
struct RunContext {
    jobs: Arc<Vec<UploadJob>>,
    template: Arc<ArticleTemplate>,
    groups: Vec<String>,
    header_check: bool,
    pool: NntpPool,
    policy: RetryPolicy,
    ledger: SegmentLedger,
    nzb: Mutex<Option<NzbOutput>>,
    counters: Counters,
    observer: Arc<dyn UploadObserver>,
    cancel: CancellationToken,
}

pub struct Uploader {
    config: Config,
    pool: NntpPool,
    observer: Arc<dyn UploadObserver>,
    cancel: CancellationToken,
}

impl Uploader {
    /// Validate the configuration and create the connection pool
    pub fn new(config: Config) -> Result<Self> {
        config.validate_for_upload()?;

        let pool = NntpPoolBuilder::new(config.usenet.clone())
            .max_size(config.usenet.connections as usize)
            .build()?;

        Ok(Self {
            config,
            pool,
            observer: Arc::new(NoopObserver),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn UploadObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Token that stops the run when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Post every file of `mode`, then write the NZB output
    pub async fn upload(&self, mode: UploadMode) -> Result<UploadSummary> {
        let started = Instant::now();
        let jobs = plan_jobs(&mode, self.config.posting.article_size).await?;
        let total_bytes: u64 = jobs.iter().map(|job| job.size).sum();
        let total_articles: u64 = jobs.iter().map(|job| job.chunk_count as u64).sum();

        tracing::info!(
            "Posting {} file(s), {} article(s) over {} connection(s)",
            jobs.len(),
            total_articles,
            self.config.usenet.connections
        );
        self.observer.run_started(&jobs, total_bytes);

        let nzb = if self.config.nzb.enabled {
            self.config.ensure_dirs()?;
            Some(match &mode {
                UploadMode::Directory(dir) => {
                    NzbOutput::aggregate(self.config.nzb_dir(), directory_name(dir))
                }
                UploadMode::Files(_) => NzbOutput::per_file(self.config.nzb_dir()),
            })
        } else {
            None
        };

        let ctx = Arc::new(RunContext {
            ledger: SegmentLedger::new(jobs.iter().map(|job| job.chunk_count)),
            jobs: Arc::new(jobs),
            template: Arc::new(ArticleTemplate::from_config(&self.config.posting)),
            groups: self.config.posting.groups.clone(),
            header_check: self.config.posting.header_check,
            pool: self.pool.clone(),
            policy: RetryPolicy::from_config(&self.config),
            nzb: Mutex::new(nzb),
            counters: Counters {
                remaining: AtomicU64::new(total_articles),
                ..Counters::default()
            },
            observer: Arc::clone(&self.observer),
            cancel: self.cancel.clone(),
        });

        let connections = self.config.usenet.connections as usize;
        let (tx, rx) = queue::bounded(connections * QUEUE_DEPTH_PER_CONNECTION);

        let producer = tokio::spawn(produce(Arc::clone(&ctx), tx));
        let workers: Vec<_> = (0..connections)
            .map(|id| tokio::spawn(work(id, Arc::clone(&ctx), rx.clone())))
            .collect();
        drop(rx);

        let mut first_error: Option<UlNzbError> = None;
        let mut note = |result: std::result::Result<Result<()>, tokio::task::JoinError>| {
            let error = match result {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e,
                Err(e) => UploadError::WorkerPanicked(e.to_string()).into(),
            };
            // Keep the root cause, not the cancellations it triggered
            let replace = match &first_error {
                None => true,
                Some(existing) => existing.is_cancelled() && !error.is_cancelled(),
            };
            if replace {
                first_error = Some(error);
            }
        };

        note(producer.await);
        for result in futures::future::join_all(workers).await {
            note(result);
        }

        let output = ctx.nzb.lock().unwrap_or_else(PoisonError::into_inner).take();
        let nzb_paths = match output {
            Some(output) => output.finish()?,
            None => Vec::new(),
        };

        let counters = &ctx.counters;
        let summary = UploadSummary {
            files: ctx.jobs.len(),
            bytes: counters.bytes.load(Ordering::Relaxed),
            articles_posted: counters.posted.load(Ordering::Relaxed),
            articles_failed: counters.failed.load(Ordering::Relaxed),
            retries: counters.retries.load(Ordering::Relaxed),
            elapsed: started.elapsed(),
            nzb: nzb_paths,
        };
        self.observer.run_finished(&summary);

        if let Some(error) = first_error {
            return Err(error);
        }
        if self.cancel.is_cancelled() {
            return Err(UploadError::Cancelled.into());
        }
        let remaining = counters.remaining.load(Ordering::Relaxed);
        if remaining > 0 {
            return Err(UploadError::Incomplete { remaining }.into());
        }

        tracing::info!(
            "Posted {} article(s) in {:.1}s",
            summary.articles_posted,
            summary.elapsed.as_secs_f64()
        );
        Ok(summary)
    }
}

/// Read, encode and enqueue every chunk of every job, in order
async fn produce(ctx: Arc<RunContext>, tx: QueueSender<ArticleRequest>) -> Result<()> {
    let result = produce_inner(&ctx, &tx).await;
    if let Err(e) = &result {
        if !e.is_cancelled() {
            tracing::error!("Producer failed: {}", e);
            ctx.cancel.cancel();
        }
    }
    result
}

async fn produce_inner(ctx: &RunContext, tx: &QueueSender<ArticleRequest>) -> Result<()> {
    for (job_index, job) in ctx.jobs.iter().enumerate() {
        tracing::info!("Uploading {}", job.basename);
        tracing::debug!(subject = %job.subject(&ctx.template.prefix, 1), chunks = job.chunk_count);
        ctx.observer.job_started(job);

        let read_error = |source| UploadError::ReadError {
            path: job.path.clone(),
            source,
        };
        let mut file = tokio::fs::File::open(&job.path).await.map_err(read_error)?;

        for index in 1..=job.chunk_count {
            let raw_len = job.chunk_len(index);
            let mut raw = vec![0u8; raw_len as usize];
            file.read_exact(&mut raw).await.map_err(read_error)?;

            let jobs = Arc::clone(&ctx.jobs);
            let template = Arc::clone(&ctx.template);
            let article = tokio::task::spawn_blocking(move || {
                Article::build(&template, &jobs[job_index], index, &raw)
            })
            .await
            .map_err(|e| UploadError::WorkerPanicked(e.to_string()))?;

            tx.push(
                ArticleRequest {
                    job: job_index,
                    index,
                    raw_len,
                    article,
                },
                &ctx.cancel,
            )
            .await?;
            tracing::trace!(queued = tx.len(), file = %job.basename, chunk = index, "Enqueued");
        }
    }
    Ok(())
}

/// One worker: own a session, post until the queue is drained
async fn work(id: usize, ctx: Arc<RunContext>, rx: QueueReceiver<ArticleRequest>) -> Result<()> {
    let result = work_inner(id, &ctx, &rx).await;
    if let Err(e) = &result {
        if !e.is_cancelled() {
            tracing::error!(worker = id, "Aborting upload: {}", e);
            ctx.cancel.cancel();
        }
    }
    result
}

async fn work_inner(id: usize, ctx: &RunContext, rx: &QueueReceiver<ArticleRequest>) -> Result<()> {
    let mut conn = Some(connect(ctx).await?);
    tracing::debug!(worker = id, "Connection ready");

    let result = drain(ctx, rx, &mut conn).await;

    // QUIT on every way out, including errors and cancellation
    if let Some(conn) = conn.take() {
        if conn.is_broken() {
            conn.discard();
        } else {
            conn.finish().await;
        }
    }
    tracing::debug!(worker = id, "Worker finished");
    result
}

async fn drain(
    ctx: &RunContext,
    rx: &QueueReceiver<ArticleRequest>,
    conn: &mut Option<PooledConnection>,
) -> Result<()> {
    while let Some(request) = rx.pop(&ctx.cancel).await {
        post_with_retry(ctx, conn, request).await?;
    }
    Ok(())
}

async fn connect(ctx: &RunContext) -> Result<PooledConnection> {
    retry_forever(&ctx.policy, &ctx.cancel, "Connection", || ctx.pool.get_connection()).await
}

async fn post_with_retry(
    ctx: &RunContext,
    conn: &mut Option<PooledConnection>,
    request: ArticleRequest,
) -> Result<()> {
    let job = &ctx.jobs[request.job];
    let payload = request.article.to_bytes();
    let mut failures = 0u32;

    loop {
        if ctx.cancel.is_cancelled() {
            return Err(UploadError::Cancelled.into());
        }

        if conn.is_none() {
            *conn = Some(connect(ctx).await?);
        }
        let Some(session) = conn.as_mut() else {
            continue;
        };

        let error = match session.post(&payload).await {
            Ok(receipt) => {
                let message_id = receipt
                    .message_id
                    .or_else(|| request.article.message_id().map(str::to_string));
                let message_id = match message_id {
                    Some(id) => id,
                    None => {
                        tracing::warn!(
                            file = %job.basename,
                            chunk = request.index,
                            "Server reply carried no message-id: {}",
                            receipt.response
                        );
                        String::new()
                    }
                };

                // The article is on the server, record it before anything can be cancelled
                record(ctx, &request, message_id.clone())?;
                if ctx.header_check && !message_id.is_empty() {
                    header_check(ctx, conn, &message_id, failures).await?;
                }
                return Ok(());
            }
            Err(e) => e,
        };

        failures += 1;
        match ctx.policy.decide(error.class(), failures) {
            RetryDecision::Retry { delay, reconnect } => {
                tracing::debug!(
                    file = %job.basename,
                    chunk = request.index,
                    failures,
                    delay_s = delay.as_secs(),
                    "Upload of chunk unsuccessful, retrying: {}",
                    describe(&error)
                );
                ctx.counters.retries.fetch_add(1, Ordering::Relaxed);
                ctx.observer.article_retry(job, request.index, &error, failures);

                let broken = conn.as_ref().map_or(true, PooledConnection::is_broken);
                if reconnect || broken {
                    if let Some(old) = conn.take() {
                        old.discard();
                    }
                }
                sleep_or_cancel(delay, &ctx.cancel).await?;
            }
            RetryDecision::GiveUp => {
                tracing::error!(
                    file = %job.basename,
                    chunk = request.index,
                    failures,
                    "Giving up on chunk: {}",
                    describe(&error)
                );
                ctx.counters.failed.fetch_add(1, Ordering::Relaxed);
                if conn.as_ref().is_some_and(PooledConnection::is_broken) {
                    if let Some(old) = conn.take() {
                        old.discard();
                    }
                }
                return Ok(());
            }
            RetryDecision::Abort => {
                tracing::error!(
                    file = %job.basename,
                    chunk = request.index,
                    "{}",
                    describe(&error)
                );
                return Err(error);
            }
        }
    }
}

/// STAT a freshly posted article; problems are logged, never fatal
async fn header_check(
    ctx: &RunContext,
    conn: &mut Option<PooledConnection>,
    message_id: &str,
    failures: u32,
) -> Result<()> {
    sleep_or_cancel(ctx.policy.stat_delay(failures), &ctx.cancel).await?;

    let Some(session) = conn.as_mut() else {
        return Ok(());
    };
    match session.stat(message_id).await {
        Ok(true) => tracing::debug!(message_id, "Header check passed"),
        Ok(false) => tracing::warn!(message_id, "Article not found yet, the server may be lagging"),
        Err(e) => {
            tracing::warn!(message_id, "Header check failed: {}", e);
            if session.is_broken() {
                if let Some(old) = conn.take() {
                    old.discard();
                }
            }
        }
    }
    Ok(())
}

fn record(ctx: &RunContext, request: &ArticleRequest, message_id: String) -> Result<()> {
    let job = &ctx.jobs[request.job];
    let entry = SegmentEntry {
        number: request.index,
        bytes: request.raw_len as u64,
        message_id,
    };

    match ctx.ledger.record(request.job, entry) {
        Recorded::Duplicate => {
            tracing::debug!(file = %job.basename, chunk = request.index, "Chunk already recorded");
            Ok(())
        }
        Recorded::New { job_complete } => {
            let counters = &ctx.counters;
            counters.remaining.fetch_sub(1, Ordering::Relaxed);
            counters.posted.fetch_add(1, Ordering::Relaxed);
            counters.bytes.fetch_add(request.raw_len as u64, Ordering::Relaxed);
            tracing::debug!(file = %job.basename, chunk = request.index, "Uploaded chunk");
            ctx.observer
                .article_posted(job, request.index, request.raw_len as u64);

            if job_complete {
                tracing::info!("Finished {}", job.basename);
                write_nzb(ctx, request.job)?;
                ctx.observer.job_finished(job);
            }
            Ok(())
        }
    }
}

fn write_nzb(ctx: &RunContext, job_index: usize) -> Result<()> {
    let mut output = ctx.nzb.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(output) = output.as_mut() else {
        return Ok(());
    };

    let job = &ctx.jobs[job_index];
    let segments = ctx.ledger.segments(job_index);
    let subject = job.subject(&ctx.template.prefix, 1);
    let record = FileRecord {
        from: &ctx.template.from,
        subject: &subject,
        groups: &ctx.groups,
        segments: &segments,
    };

    output.write_job(job_index, &job.basename, &record)
}

/// Error text plus the explanation of the reply code, when there is one
fn describe(error: &UlNzbError) -> String {
    use crate::error::NntpError;
    match error {
        UlNzbError::Nntp(NntpError::ServerError { category, .. }) => {
            format!("{} ({})", error, category.describe())
        }
        other => other.to_string(),
    }
}
