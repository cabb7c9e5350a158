//! Conversion worker pool.
//!
//! N workers drain the queue concurrently; within a worker a job runs
//! strictly download → classify → convert → store. A failed job is logged
//! and abandoned: the message is already gone from the queue, and the
//! in-flight marker's TTL re-opens the conversion for the next request.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use media_probe::{MediaKind, SNIFF_LEN, classify};

use crate::cache::{ConversionCache, NewArtifact};
use crate::downloader::Downloader;
use crate::metrics::MetricsCollector;
use crate::queue::{ConversionQueue, ConvertJob};
use crate::transcode::MediaTools;
use crate::{Error, Result};

/// Backoff after a transient dequeue failure.
const DEQUEUE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Everything a worker needs, shared across the pool.
pub struct WorkerContext {
    pub queue: Arc<ConversionQueue>,
    pub cache: Arc<dyn ConversionCache>,
    pub downloader: Arc<Downloader>,
    pub tools: MediaTools,
    pub metrics: Arc<MetricsCollector>,
    pub work_root: PathBuf,
}

struct JobOutcome {
    kind: MediaKind,
    format_name: &'static str,
    input_bytes: u64,
}

/// Fixed-size pool of conversion workers.
pub struct WorkerPool {
    context: Arc<WorkerContext>,
    worker_count: usize,
    cancel: CancellationToken,
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
}

impl WorkerPool {
    pub fn new(context: Arc<WorkerContext>, worker_count: usize, cancel: CancellationToken) -> Self {
        Self {
            context,
            worker_count,
            cancel,
            tasks: parking_lot::Mutex::new(Some(JoinSet::new())),
        }
    }

    /// Spawn the workers.
    pub fn start(&self) {
        info!(workers = self.worker_count, "starting conversion worker pool");
        let mut tasks = self.tasks.lock();
        if let Some(join_set) = tasks.as_mut() {
            for index in 0..self.worker_count {
                let context = self.context.clone();
                let cancel = self.cancel.clone();
                join_set.spawn(worker_loop(index, context, cancel));
            }
        }
    }

    /// Cancel and wait for every worker to finish its current job.
    pub async fn stop(&self) {
        info!("stopping conversion worker pool");
        self.cancel.cancel();

        let join_set = self.tasks.lock().take();
        if let Some(mut join_set) = join_set {
            while join_set.join_next().await.is_some() {}
        }
        info!("conversion worker pool stopped");
    }
}

async fn worker_loop(index: usize, context: Arc<WorkerContext>, cancel: CancellationToken) {
    debug!(worker = index, "worker started");
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let job = match context.queue.dequeue(&cancel).await {
            Ok(Some(job)) => job,
            Ok(None) => break,
            Err(e @ Error::MalformedJob(_)) => {
                // Already deleted from the queue; nothing to do but move on.
                error!(worker = index, error = %e, "discarding malformed queue message");
                continue;
            }
            Err(e) => {
                warn!(worker = index, error = %e, "dequeue failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(DEQUEUE_RETRY_DELAY) => continue,
                }
            }
        };

        context.metrics.conversion_started();
        let started = tokio::time::Instant::now();
        match process_job(&context, &job).await {
            Ok(outcome) => {
                let elapsed = started.elapsed();
                context.metrics.record_conversion_duration(
                    outcome.kind,
                    outcome.format_name,
                    outcome.input_bytes,
                    elapsed,
                );
                context.metrics.conversion_finished("completed");
                info!(
                    worker = index,
                    hash = %job.hash,
                    format = outcome.format_name,
                    elapsed_secs = elapsed.as_secs_f64(),
                    "conversion completed"
                );
            }
            Err(e) => {
                context.metrics.conversion_finished("failed");
                warn!(worker = index, hash = %job.hash, url = %job.url, error = %e, "conversion failed");
            }
        }
    }
    debug!(worker = index, "worker stopped");
}

/// Run one job inside its own scratch directory, which is removed on every
/// exit path.
async fn process_job(context: &WorkerContext, job: &ConvertJob) -> Result<JobOutcome> {
    let work_dir = context.work_root.join(&job.hash);
    tokio::fs::create_dir_all(&work_dir).await?;

    let result = convert_and_store(context, job, &work_dir).await;

    if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
        warn!(hash = %job.hash, error = %e, "failed to remove scratch directory");
    }
    result
}

async fn convert_and_store(
    context: &WorkerContext,
    job: &ConvertJob,
    work_dir: &std::path::Path,
) -> Result<JobOutcome> {
    let download = context.downloader.fetch(&job.url, &job.hash, work_dir).await?;
    let input_bytes = tokio::fs::metadata(&download.path).await?.len();

    let header = read_header(&download.path).await?;
    let kind = classify(&header);
    if kind == MediaKind::Other {
        return Err(Error::UnknownFileType);
    }
    debug!(hash = %job.hash, %kind, bytes = input_bytes, "source classified");

    let output = context
        .tools
        .convert(kind, &download.path, work_dir, job.image_format, job.video_format)
        .await?;

    context
        .cache
        .store(NewArtifact {
            hash: &job.hash,
            format_name: output.format_name,
            kind,
            etag: download.etag,
            max_age: download.max_age,
            path: &output.path,
        })
        .await?;

    Ok(JobOutcome {
        kind,
        format_name: output.format_name,
        input_bytes,
    })
}

/// Read up to the classifier's sniff window from the start of a file.
async fn read_header(path: &std::path::Path) -> Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut header = vec![0u8; SNIFF_LEN];
    let mut filled = 0;
    while filled < header.len() {
        let n = file.read(&mut header[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    header.truncate(filled);
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LocalDiskCache;
    use crate::cache::keys::KeySpace;
    use crate::queue::{ChannelQueue, QueueBackend};

    fn test_context(work_root: PathBuf, cache_dir: PathBuf) -> (Arc<WorkerContext>, Arc<ConversionQueue>) {
        let queue = Arc::new(ConversionQueue::new(
            Arc::new(ChannelQueue::new()),
            None,
            KeySpace::new(1),
        ));
        let cache = Arc::new(LocalDiskCache::new(cache_dir, "http://localhost/").unwrap());
        let context = Arc::new(WorkerContext {
            queue: queue.clone(),
            cache,
            downloader: Arc::new(Downloader::new(1024 * 1024).unwrap()),
            tools: MediaTools::new("ffmpeg", "toktx"),
            metrics: Arc::new(MetricsCollector::new()),
            work_root,
        });
        (context, queue)
    }

    #[tokio::test]
    async fn pool_stops_promptly_when_idle() {
        let work = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let (context, _queue) = test_context(work.path().to_path_buf(), cache.path().to_path_buf());

        let pool = WorkerPool::new(context, 3, CancellationToken::new());
        pool.start();
        tokio::time::timeout(Duration::from_secs(1), pool.stop())
            .await
            .expect("stop should not hang");
    }

    #[tokio::test]
    async fn malformed_messages_do_not_kill_the_worker() {
        let work = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();

        let backend = Arc::new(ChannelQueue::new());
        backend.push("{ not json".to_string()).await.unwrap();
        let queue = Arc::new(ConversionQueue::new(backend, None, KeySpace::new(1)));
        let context = Arc::new(WorkerContext {
            queue: queue.clone(),
            cache: Arc::new(LocalDiskCache::new(cache.path().to_path_buf(), "http://localhost/").unwrap()),
            downloader: Arc::new(Downloader::new(1024).unwrap()),
            tools: MediaTools::new("ffmpeg", "toktx"),
            metrics: Arc::new(MetricsCollector::new()),
            work_root: work.path().to_path_buf(),
        });

        let pool = WorkerPool::new(context, 1, CancellationToken::new());
        pool.start();
        // The worker swallows the poison message and keeps looping until
        // cancelled.
        tokio::time::sleep(Duration::from_millis(100)).await;
        tokio::time::timeout(Duration::from_secs(1), pool.stop())
            .await
            .expect("worker should survive a malformed message");
    }

    #[tokio::test]
    async fn read_header_caps_at_the_sniff_window() {
        let dir = tempfile::tempdir().unwrap();
        let small = dir.path().join("small");
        tokio::fs::write(&small, b"GIF89a").await.unwrap();
        assert_eq!(read_header(&small).await.unwrap(), b"GIF89a");

        let large = dir.path().join("large");
        tokio::fs::write(&large, vec![7u8; SNIFF_LEN * 3]).await.unwrap();
        assert_eq!(read_header(&large).await.unwrap().len(), SNIFF_LEN);
    }
}
