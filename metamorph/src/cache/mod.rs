//! Conversion cache.
//!
//! The system of record for "does a fresh artifact exist for this conversion,
//! where is it, and is it due for revalidation?". Two shapes exist behind the
//! [`ConversionCache`] trait: the production engine over KV + object storage,
//! and a directory-scan cache for single-node dev.

pub mod engine;
pub mod keys;
pub mod kv;
pub mod local;

pub use engine::CacheEngine;
pub use local::LocalDiskCache;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use media_probe::MediaKind;

use crate::Result;
use crate::formats::{ImageFormat, VideoFormat};

/// A cache record as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedArtifact {
    /// Public URL of the converted artifact.
    pub url: String,
    /// Origin entity tag, when known.
    pub etag: Option<String>,
    /// Freshness marker absent; the artifact is still served but due for
    /// revalidation.
    pub expired: bool,
    /// A worker currently holds this conversion identity.
    pub converting: bool,
    /// Textual name of the target the artifact was encoded with.
    pub format: String,
}

/// Input to [`ConversionCache::store`].
#[derive(Debug)]
pub struct NewArtifact<'a> {
    pub hash: &'a str,
    pub format_name: &'a str,
    pub kind: MediaKind,
    pub etag: Option<String>,
    pub max_age: Option<Duration>,
    pub path: &'a Path,
}

/// Keyed conversion cache with freshness and revalidation metadata.
#[async_trait]
pub trait ConversionCache: Send + Sync {
    /// Upload the artifact and (over)write the conversion's cache record.
    async fn store(&self, artifact: NewArtifact<'_>) -> Result<()>;

    /// Read the cache record for a conversion identity.
    ///
    /// When the record is expired and idle (or `force_refresh` is set) and
    /// the caller supplied the source URL, a refresh hint is emitted without
    /// delaying the return. Internal readers pass `source_url: None` and
    /// never generate hints.
    async fn lookup(
        &self,
        hash: &str,
        image: ImageFormat,
        video: VideoFormat,
        source_url: Option<&str>,
        force_refresh: bool,
    ) -> Result<Option<CachedArtifact>>;

    /// Returns whether the cached artifact may be considered fresh after this
    /// call, conditionally revalidating against the origin when needed.
    async fn revalidate(
        &self,
        hash: &str,
        url: &str,
        image: ImageFormat,
        video: VideoFormat,
        force: bool,
    ) -> Result<bool>;
}

/// Value of the per-hash media-class tag. `MotionImage` encodes to a video
/// container, so it tags as `Video` alongside real videos.
pub fn media_class_tag(kind: MediaKind) -> Option<&'static str> {
    match kind {
        MediaKind::StaticImage => Some("Image"),
        MediaKind::MotionImage | MediaKind::MotionVideo => Some("Video"),
        MediaKind::Other => None,
    }
}

/// Format name that applies to a conversion, given the stored class tag.
pub(crate) fn format_name_for_tag(
    tag: &str,
    image: ImageFormat,
    video: VideoFormat,
) -> Option<&'static str> {
    match tag {
        "Image" => Some(image.name()),
        "Video" => Some(video.name()),
        _ => None,
    }
}
