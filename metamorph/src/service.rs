//! Composition root: wires every subsystem and owns the shutdown order.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::{ApiServer, ApiServerConfig, AppState};
use crate::cache::keys::KeySpace;
use crate::cache::kv::{KvStore, MemoryKv, RedisKv};
use crate::cache::{CacheEngine, ConversionCache, LocalDiskCache};
use crate::config::Settings;
use crate::downloader::Downloader;
use crate::metrics::{MetricsCollector, PrometheusExporter};
use crate::queue::{ChannelQueue, ConversionQueue, QueueBackend, RedisQueue};
use crate::refresh::{self, RefreshConsumer};
use crate::storage::ArtifactStore;
use crate::transcode::MediaTools;
use crate::waiter::WaiterService;
use crate::worker::{WorkerContext, WorkerPool};
use crate::{Error, Result};

/// Run the whole service until SIGINT/SIGTERM.
pub async fn run(settings: Settings) -> Result<()> {
    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    // The work root is ours alone; a previous crash may have left partial
    // downloads behind.
    let _ = tokio::fs::remove_dir_all(&settings.work_dir).await;
    tokio::fs::create_dir_all(&settings.work_dir).await?;

    let keys = KeySpace::new(settings.cache_version);
    let downloader = Arc::new(Downloader::new(settings.max_download_bytes)?);
    let metrics = Arc::new(MetricsCollector::new());
    let exporter = Arc::new(PrometheusExporter::new(metrics.clone()));
    let (refresh_tx, refresh_rx) = refresh::channel();

    let kv: Option<Arc<dyn KvStore>> = match &settings.redis_url {
        Some(url) => Some(Arc::new(RedisKv::connect(url)?)),
        None => None,
    };

    // Local-cache mode trades the whole KV + object-store stack for a
    // directory scan; everything else keeps its production shape.
    let (cache, queue): (Arc<dyn ConversionCache>, Arc<ConversionQueue>) =
        if let Some(dir) = &settings.local_cache_dir {
            info!(dir = %dir.display(), "running with the local filesystem cache");
            let endpoint = settings
                .storage
                .as_ref()
                .map(|s| s.endpoint.clone())
                .unwrap_or_else(|| format!("http://localhost:{}/cache/", settings.port));
            let cache: Arc<dyn ConversionCache> = Arc::new(LocalDiskCache::new(dir.clone(), endpoint)?);
            let queue = Arc::new(ConversionQueue::new(Arc::new(ChannelQueue::new()), None, keys));
            (cache, queue)
        } else {
            let storage = match &settings.storage {
                Some(storage_settings) => Some(Arc::new(ArtifactStore::s3(storage_settings)?)),
                None => None,
            };
            // Without Redis a process-local KV still gives us freshness
            // bookkeeping and enqueue dedupe within this node.
            let kv: Arc<dyn KvStore> = match &kv {
                Some(kv) => kv.clone(),
                None => {
                    warn!("no REDIS_URL configured, falling back to an in-process KV");
                    Arc::new(MemoryKv::new())
                }
            };
            let backend: Arc<dyn QueueBackend> = match &settings.redis_url {
                Some(url) => Arc::new(RedisQueue::connect(url, settings.queue_name.clone())?),
                None => Arc::new(ChannelQueue::new()),
            };
            let cache: Arc<dyn ConversionCache> = Arc::new(CacheEngine::new(
                kv.clone(),
                storage,
                downloader.clone(),
                refresh_tx,
                keys,
                settings.min_max_age,
            ));
            let queue = Arc::new(ConversionQueue::new(backend, Some(kv), keys));
            (cache, queue)
        };

    let waiter = WaiterService::new(
        cache.clone(),
        settings.wait_timeout,
        settings.poll_interval,
        cancel.child_token(),
    );

    let refresh_consumer = RefreshConsumer::new(refresh_rx, cache.clone(), queue.clone());
    let refresh_handle = tokio::spawn(refresh_consumer.run(cancel.child_token()));

    let worker_context = Arc::new(WorkerContext {
        queue: queue.clone(),
        cache: cache.clone(),
        downloader,
        tools: MediaTools::new(settings.ffmpeg_path.as_str(), settings.toktx_path.as_str()),
        metrics,
        work_root: settings.work_dir.clone(),
    });
    let pool = WorkerPool::new(worker_context, settings.worker_count, cancel.child_token());
    pool.start();

    let mut state = AppState::new(cache, queue, waiter, exporter);
    if let Some(kv) = kv {
        state = state.with_kv(kv);
    }
    if let Some(token) = &settings.metrics_token {
        state = state.with_metrics_token(token.clone());
    }

    let server = ApiServer::new(
        ApiServerConfig {
            bind_address: settings.bind_address.clone(),
            port: settings.port,
            enable_cors: true,
        },
        state,
        cancel.clone(),
    );

    let outcome = server.run().await;

    // HTTP is down; let the background halves finish their current work.
    cancel.cancel();
    pool.stop().await;
    if let Err(e) = refresh_handle.await {
        warn!(error = %e, "refresh consumer ended abnormally");
    }

    info!("service stopped");
    outcome
}

fn spawn_signal_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(signal) => signal,
                    Err(e) => {
                        warn!(error = %e, "failed to install SIGTERM handler");
                        if ctrl_c.await.is_ok() {
                            cancel.cancel();
                        }
                        return;
                    }
                };
            tokio::select! {
                _ = ctrl_c => info!("received SIGINT"),
                _ = sigterm.recv() => info!("received SIGTERM"),
            }
        }

        #[cfg(not(unix))]
        if ctrl_c.await.is_err() {
            return;
        }

        cancel.cancel();
    });
}

/// Fail fast on wirings that cannot work at all.
pub fn validate(settings: &Settings) -> Result<()> {
    if settings.local_cache_dir.is_none()
        && settings.storage.is_none()
        && settings.redis_url.is_none()
    {
        return Err(Error::config(
            "no backend configured: set STORAGE_BUCKET + REDIS_URL, or LOCAL_CACHE=true for dev",
        ));
    }
    Ok(())
}
