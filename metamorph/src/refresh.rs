//! Asynchronous cache-refresh pipeline.
//!
//! User-facing lookups drop "this key looks stale" hints here instead of
//! blocking on revalidation. Hints dedupe through a pending-set: at any
//! moment at most one instance of a given request tuple is in the channel or
//! being processed. The single consumer turns each hint into a cheap
//! conditional revalidation, and only re-enqueues real conversion work when
//! the origin says the entity actually changed.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::ConversionCache;
use crate::formats::{ImageFormat, VideoFormat};
use crate::queue::{ConversionQueue, ConvertJob};

/// Budget for draining buffered hints on shutdown. Undrained hints are
/// dropped; future user requests regenerate them.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// A hint that a cached conversion may be stale.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefreshRequest {
    pub hash: String,
    pub url: String,
    pub image_format: ImageFormat,
    pub video_format: VideoFormat,
    pub force: bool,
}

impl From<&RefreshRequest> for ConvertJob {
    fn from(req: &RefreshRequest) -> Self {
        ConvertJob {
            hash: req.hash.clone(),
            url: req.url.clone(),
            image_format: req.image_format,
            video_format: req.video_format,
        }
    }
}

/// Create the deduplicating hint channel.
pub fn channel() -> (RefreshSender, RefreshReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(DashSet::new());
    (
        RefreshSender {
            tx,
            pending: pending.clone(),
        },
        RefreshReceiver { rx, pending },
    )
}

/// Multi-writer handle; cheap to clone, non-blocking to use.
#[derive(Clone)]
pub struct RefreshSender {
    tx: mpsc::UnboundedSender<RefreshRequest>,
    pending: Arc<DashSet<RefreshRequest>>,
}

impl RefreshSender {
    /// Submit a hint. Duplicates of a pending hint are dropped silently.
    /// Returns whether the hint was actually queued.
    pub fn request(&self, req: RefreshRequest) -> bool {
        if !self.pending.insert(req.clone()) {
            debug!(hash = %req.hash, "refresh already pending, dropping hint");
            return false;
        }
        if self.tx.send(req.clone()).is_err() {
            self.pending.remove(&req);
            return false;
        }
        true
    }
}

/// Consumer half of the hint channel.
pub struct RefreshReceiver {
    pub(crate) rx: mpsc::UnboundedReceiver<RefreshRequest>,
    pub(crate) pending: Arc<DashSet<RefreshRequest>>,
}

/// The long-running refresh consumer.
pub struct RefreshConsumer {
    receiver: RefreshReceiver,
    cache: Arc<dyn ConversionCache>,
    queue: Arc<ConversionQueue>,
}

impl RefreshConsumer {
    pub fn new(
        receiver: RefreshReceiver,
        cache: Arc<dyn ConversionCache>,
        queue: Arc<ConversionQueue>,
    ) -> Self {
        Self {
            receiver,
            cache,
            queue,
        }
    }

    /// Consume hints until cancellation, then drain under a soft deadline.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("refresh consumer started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                hint = self.receiver.rx.recv() => match hint {
                    Some(req) => self.handle(req).await,
                    None => return,
                },
            }
        }
        self.drain().await;
        info!("refresh consumer stopped");
    }

    async fn handle(&self, req: RefreshRequest) {
        self.receiver.pending.remove(&req);

        let fresh = match self
            .cache
            .revalidate(&req.hash, &req.url, req.image_format, req.video_format, req.force)
            .await
        {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(hash = %req.hash, error = %e, "revalidation failed");
                return;
            }
        };
        if fresh {
            debug!(hash = %req.hash, "origin unchanged, freshness extended");
            return;
        }

        if let Err(e) = self.queue.enqueue(&ConvertJob::from(&req)).await {
            warn!(hash = %req.hash, error = %e, "failed to re-enqueue conversion");
        }
    }

    async fn drain(&mut self) {
        let deadline = tokio::time::Instant::now() + DRAIN_GRACE;
        let mut dropped = 0usize;
        while let Ok(req) = self.receiver.rx.try_recv() {
            if tokio::time::Instant::now() >= deadline {
                dropped += 1;
                self.receiver.pending.remove(&req);
                continue;
            }
            self.handle(req).await;
        }
        if dropped > 0 {
            warn!(dropped, "dropped refresh hints at shutdown");
        }
    }
}
