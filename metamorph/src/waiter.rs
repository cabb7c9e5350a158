//! Blocking waits on in-flight conversions.
//!
//! A caller may block until "something real exists" for a conversion key. All
//! concurrent waiters for the same key share one polling task: the first
//! caller spawns it and later callers await the same shared future, so KV
//! sees one poll cadence per key no matter how many requests pile up.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{CachedArtifact, ConversionCache};
use crate::formats::{ImageFormat, VideoFormat};

/// Identity of a wait: the conversion identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WaitKey {
    pub hash: String,
    pub image_format: ImageFormat,
    pub video_format: VideoFormat,
}

type SharedWait = Shared<BoxFuture<'static, Option<CachedArtifact>>>;

/// Coalescing wait service.
#[derive(Clone)]
pub struct WaiterService {
    inner: Arc<WaiterInner>,
}

struct WaiterInner {
    cache: Arc<dyn ConversionCache>,
    entries: DashMap<WaitKey, SharedWait>,
    wait_timeout: Duration,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl WaiterService {
    pub fn new(
        cache: Arc<dyn ConversionCache>,
        wait_timeout: Duration,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(WaiterInner {
                cache,
                entries: DashMap::new(),
                wait_timeout,
                poll_interval,
                cancel,
            }),
        }
    }

    /// Block until the cache has a record for `key`, the wait budget runs
    /// out, or the service shuts down. Timeout and shutdown resolve to
    /// `None`.
    pub async fn wait(&self, key: WaitKey) -> Option<CachedArtifact> {
        let shared = match self.inner.entries.entry(key.clone()) {
            Entry::Occupied(occupied) => occupied.get().clone(),
            Entry::Vacant(vacant) => {
                let inner = self.inner.clone();
                let task_key = key.clone();
                // The poller runs as its own task so eviction happens on
                // every outcome, even if all callers drop their futures.
                let handle = tokio::spawn(async move {
                    let result = inner.poll(&task_key).await;
                    inner.entries.remove(&task_key);
                    result
                });
                let shared: SharedWait = handle.map(|joined| joined.ok().flatten()).boxed().shared();
                vacant.insert(shared.clone());
                shared
            }
        };
        shared.await
    }

    /// Number of live polling tasks, for observability.
    pub fn active_waits(&self) -> usize {
        self.inner.entries.len()
    }
}

impl WaiterInner {
    async fn poll(&self, key: &WaitKey) -> Option<CachedArtifact> {
        let polling = async {
            let mut tick = tokio::time::interval(self.poll_interval);
            loop {
                tick.tick().await;
                match self
                    .cache
                    .lookup(&key.hash, key.image_format, key.video_format, None, false)
                    .await
                {
                    Ok(Some(record)) => return record,
                    Ok(None) => {}
                    Err(e) => warn!(hash = %key.hash, error = %e, "waiter lookup failed"),
                }
            }
        };

        tokio::select! {
            _ = self.cancel.cancelled() => None,
            resolved = tokio::time::timeout(self.wait_timeout, polling) => match resolved {
                Ok(record) => Some(record),
                Err(_) => {
                    debug!(hash = %key.hash, "wait timed out");
                    None
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NewArtifact;
    use crate::{Error, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const POLL: Duration = Duration::from_millis(100);
    const BUDGET: Duration = Duration::from_secs(1);

    fn key() -> WaitKey {
        WaitKey {
            hash: "feedface".to_string(),
            image_format: ImageFormat::Uastc,
            video_format: VideoFormat::Mp4,
        }
    }

    fn record() -> CachedArtifact {
        CachedArtifact {
            url: "https://cdn.example.com/k.ktx2".to_string(),
            etag: None,
            expired: false,
            converting: false,
            format: "UASTC".to_string(),
        }
    }

    /// Cache stub that answers `None` for the first `misses` lookups.
    struct CountingCache {
        lookups: AtomicUsize,
        misses: usize,
    }

    impl CountingCache {
        fn new(misses: usize) -> Arc<Self> {
            Arc::new(Self {
                lookups: AtomicUsize::new(0),
                misses,
            })
        }
    }

    #[async_trait]
    impl ConversionCache for CountingCache {
        async fn store(&self, _artifact: NewArtifact<'_>) -> Result<()> {
            Err(Error::NotConfigured("store"))
        }

        async fn lookup(
            &self,
            _hash: &str,
            _image: ImageFormat,
            _video: VideoFormat,
            _source_url: Option<&str>,
            _force_refresh: bool,
        ) -> Result<Option<CachedArtifact>> {
            let n = self.lookups.fetch_add(1, Ordering::SeqCst);
            if n < self.misses {
                Ok(None)
            } else {
                Ok(Some(record()))
            }
        }

        async fn revalidate(
            &self,
            _hash: &str,
            _url: &str,
            _image: ImageFormat,
            _video: VideoFormat,
            _force: bool,
        ) -> Result<bool> {
            Ok(false)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_waiters_share_one_polling_loop() {
        let cache = CountingCache::new(usize::MAX);
        let waiter = WaiterService::new(cache.clone(), BUDGET, POLL, CancellationToken::new());

        let mut handles = Vec::new();
        for _ in 0..10 {
            let waiter = waiter.clone();
            handles.push(tokio::spawn(async move { waiter.wait(key()).await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_none());
        }

        // One cadence for ten callers: at most budget/interval + 1 lookups.
        let lookups = cache.lookups.load(Ordering::SeqCst);
        assert!(lookups <= 11, "saw {lookups} lookups for 10 waiters");
        assert!(lookups >= 10);
        assert_eq!(waiter.active_waits(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_when_the_record_appears() {
        let cache = CountingCache::new(3);
        let waiter = WaiterService::new(cache.clone(), BUDGET, POLL, CancellationToken::new());

        let mut handles = Vec::new();
        for _ in 0..4 {
            let waiter = waiter.clone();
            handles.push(tokio::spawn(async move { waiter.wait(key()).await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Some(record()));
        }

        assert_eq!(cache.lookups.load(Ordering::SeqCst), 4);
        assert_eq!(waiter.active_waits(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_keys_poll_independently() {
        let cache = CountingCache::new(0);
        let waiter = WaiterService::new(cache, BUDGET, POLL, CancellationToken::new());

        let other = WaitKey {
            hash: "other".to_string(),
            image_format: ImageFormat::Uastc,
            video_format: VideoFormat::Mp4,
        };
        assert!(waiter.wait(key()).await.is_some());
        assert!(waiter.wait(other).await.is_some());
        assert_eq!(waiter.active_waits(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_resolves_to_none_and_evicts() {
        let cache = CountingCache::new(usize::MAX);
        let cancel = CancellationToken::new();
        let waiter = WaiterService::new(cache, BUDGET, POLL, cancel.clone());

        let pending = {
            let waiter = waiter.clone();
            tokio::spawn(async move { waiter.wait(key()).await })
        };
        tokio::time::sleep(Duration::from_millis(250)).await;
        cancel.cancel();

        assert!(pending.await.unwrap().is_none());
        assert_eq!(waiter.active_waits(), 0);
    }
}
