//! Conversion work queue.
//!
//! The façade layers single-flight semantics over an at-least-once backend:
//! an enqueue first claims the conversion identity's in-flight marker in KV
//! (`SET NX EX`), and only the claim winner pushes a message. The marker's
//! TTL, not any cleanup code, is the recovery path for lost work.

mod channel;
mod redis_queue;

pub use channel::ChannelQueue;
pub use redis_queue::RedisQueue;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::keys::KeySpace;
use crate::cache::kv::KvStore;
use crate::formats::{ImageFormat, VideoFormat};
use crate::{Error, Result};

/// How long an in-flight marker claims a conversion identity.
pub const CONVERTING_TTL: Duration = Duration::from_secs(10 * 60);

/// A conversion job as it travels over the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertJob {
    #[serde(rename = "Hash")]
    pub hash: String,
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "ImageFormat")]
    pub image_format: ImageFormat,
    #[serde(rename = "VideoFormat")]
    pub video_format: VideoFormat,
}

/// Transport under the façade. Delivery is at-least-once; `pop` removes the
/// message before returning it.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    async fn push(&self, payload: String) -> Result<()>;

    /// Block until a message is available or the token fires (`None`).
    async fn pop(&self, cancel: &CancellationToken) -> Result<Option<String>>;
}

/// Single-flight conversion queue.
pub struct ConversionQueue {
    backend: Arc<dyn QueueBackend>,
    kv: Option<Arc<dyn KvStore>>,
    keys: KeySpace,
}

impl ConversionQueue {
    /// `kv: None` skips the dedupe guard entirely; acceptable only when a
    /// single process owns the whole pipeline.
    pub fn new(backend: Arc<dyn QueueBackend>, kv: Option<Arc<dyn KvStore>>, keys: KeySpace) -> Self {
        Self { backend, kv, keys }
    }

    /// Enqueue unless the conversion identity is already claimed.
    pub async fn enqueue(&self, job: &ConvertJob) -> Result<()> {
        if let Some(kv) = &self.kv {
            let marker = self
                .keys
                .converting(&job.hash, job.image_format, job.video_format);
            if !kv.set_if_absent(&marker, "1", CONVERTING_TTL).await? {
                debug!(hash = %job.hash, "conversion already in flight, skipping enqueue");
                return Ok(());
            }
        }
        self.backend.push(serde_json::to_string(job)?).await
    }

    /// Block for the next job. The message is already removed from the
    /// backend when this returns; a crash before processing is recovered by
    /// the in-flight marker's TTL. Returns `None` on cancellation.
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Result<Option<ConvertJob>> {
        let Some(payload) = self.backend.pop(cancel).await? else {
            return Ok(None);
        };
        serde_json::from_str(&payload)
            .map(Some)
            .map_err(|e| Error::MalformedJob(format!("{payload:?}: {e}")))
    }
}
