//! The production cache engine over KV + object storage.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::downloader::{Downloader, RevalidateOutcome};
use crate::formats::{ImageFormat, VideoFormat};
use crate::refresh::{RefreshRequest, RefreshSender};
use crate::storage::{ArtifactStore, content_type_for};
use crate::{Error, Result};

use super::keys::KeySpace;
use super::kv::KvStore;
use super::{CachedArtifact, ConversionCache, NewArtifact, format_name_for_tag, media_class_tag};

/// Conditional origin check, seam for the engine's revalidation path.
#[async_trait]
pub trait OriginProbe: Send + Sync {
    async fn revalidate(&self, url: &str, etag: Option<&str>) -> Result<RevalidateOutcome>;
}

#[async_trait]
impl OriginProbe for Downloader {
    async fn revalidate(&self, url: &str, etag: Option<&str>) -> Result<RevalidateOutcome> {
        Downloader::revalidate(self, url, etag).await
    }
}

/// Versioned keyed cache with TTL'd freshness and revalidation metadata.
pub struct CacheEngine {
    kv: Arc<dyn KvStore>,
    storage: Option<Arc<ArtifactStore>>,
    origin: Arc<dyn OriginProbe>,
    refresh: RefreshSender,
    keys: KeySpace,
    min_max_age: Duration,
}

impl CacheEngine {
    pub fn new(
        kv: Arc<dyn KvStore>,
        storage: Option<Arc<ArtifactStore>>,
        origin: Arc<dyn OriginProbe>,
        refresh: RefreshSender,
        keys: KeySpace,
        min_max_age: Duration,
    ) -> Self {
        Self {
            kv,
            storage,
            origin,
            refresh,
            keys,
            min_max_age,
        }
    }

    async fn stamp_freshness(&self, hash: &str, format_name: &str, ttl: Option<Duration>) -> Result<()> {
        let key = self.keys.valid(hash, format_name);
        match ttl {
            Some(ttl) => self.kv.set_with_ttl(&key, "1", ttl).await,
            None => self.kv.set(&key, "1").await,
        }
    }
}

#[async_trait]
impl ConversionCache for CacheEngine {
    async fn store(&self, artifact: NewArtifact<'_>) -> Result<()> {
        let storage = self
            .storage
            .as_ref()
            .ok_or(Error::NotConfigured("object storage"))?;
        let content_type = content_type_for(artifact.path)?;
        let Some(tag) = media_class_tag(artifact.kind) else {
            return Err(Error::other("refusing to store an unclassified artifact"));
        };

        let extension = artifact
            .path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        // The timestamp is informational; retrieval always goes through KV.
        let object_key = format!(
            "{stamp}-{hash}-{format}.{extension}",
            stamp = Utc::now().format("%Y%m%d-%H%M%S"),
            hash = artifact.hash,
            format = artifact.format_name,
        );
        storage.put_file(&object_key, content_type, artifact.path).await?;

        let max_age = sanitize_max_age(artifact.max_age, artifact.etag.is_some(), self.min_max_age);

        let mut batch = vec![
            (self.keys.object(artifact.hash, artifact.format_name), object_key.clone()),
            (self.keys.filetype(artifact.hash), tag.to_string()),
        ];
        if let Some(etag) = &artifact.etag {
            batch.push((self.keys.etag(artifact.hash, artifact.format_name), etag.clone()));
        }

        // Object key lands before (or together with) the freshness marker;
        // readers tolerate the marker trailing behind.
        match max_age {
            None => {
                batch.push((self.keys.valid(artifact.hash, artifact.format_name), "1".to_string()));
                self.kv.set_many(&batch).await?;
            }
            Some(ttl) => {
                self.kv.set_many(&batch).await?;
                self.stamp_freshness(artifact.hash, artifact.format_name, Some(ttl)).await?;
            }
        }

        info!(
            hash = artifact.hash,
            format = artifact.format_name,
            key = object_key,
            max_age_secs = max_age.map(|d| d.as_secs()),
            "stored converted artifact"
        );
        Ok(())
    }

    async fn lookup(
        &self,
        hash: &str,
        image: ImageFormat,
        video: VideoFormat,
        source_url: Option<&str>,
        force_refresh: bool,
    ) -> Result<Option<CachedArtifact>> {
        let Some(storage) = self.storage.as_ref() else {
            return Ok(None);
        };
        let Some(tag) = self.kv.get(&self.keys.filetype(hash)).await? else {
            return Ok(None);
        };
        let Some(format_name) = format_name_for_tag(&tag, image, video) else {
            warn!(hash, tag, "unrecognized media-class tag in cache");
            return Ok(None);
        };

        let keys = [
            self.keys.object(hash, format_name),
            self.keys.etag(hash, format_name),
            self.keys.valid(hash, format_name),
            self.keys.converting(hash, image, video),
        ];
        let mut values = self.kv.get_many(&keys).await?.into_iter();
        let object_key = values.next().flatten();
        let etag = values.next().flatten();
        let valid = values.next().flatten();
        let converting = values.next().flatten();

        let Some(object_key) = object_key else {
            return Ok(None);
        };

        let record = CachedArtifact {
            url: storage.public_url(&object_key),
            etag,
            expired: valid.is_none(),
            converting: converting.is_some(),
            format: format_name.to_string(),
        };

        // Fire-and-forget: the hint must never delay this return.
        if let Some(url) = source_url
            && (force_refresh || (record.expired && !record.converting))
        {
            self.refresh.request(RefreshRequest {
                hash: hash.to_string(),
                url: url.to_string(),
                image_format: image,
                video_format: video,
                force: force_refresh,
            });
        }

        Ok(Some(record))
    }

    async fn revalidate(
        &self,
        hash: &str,
        url: &str,
        image: ImageFormat,
        video: VideoFormat,
        force: bool,
    ) -> Result<bool> {
        let Some(record) = self.lookup(hash, image, video, None, false).await? else {
            return Ok(false);
        };
        if !force && !record.expired {
            return Ok(true);
        }

        let outcome = match self.origin.revalidate(url, record.etag.as_deref()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(hash, error = %e, "revalidation request failed");
                return Ok(false);
            }
        };

        match outcome {
            RevalidateOutcome::NotModified { max_age } => {
                let ttl = sanitize_max_age(max_age, record.etag.is_some(), self.min_max_age);
                self.stamp_freshness(hash, &record.format, ttl).await?;
                debug!(hash, ttl_secs = ttl.map(|d| d.as_secs()), "origin unchanged, freshness re-stamped");
                Ok(true)
            }
            RevalidateOutcome::Changed => Ok(false),
        }
    }
}

/// Apply the freshness-window rules to an origin-supplied max-age.
///
/// A window below the minimum is raised to it. A missing window with a known
/// etag also becomes the minimum (revalidation is cheap, so never cache such
/// entries indefinitely). Missing window and no etag stays absent, meaning
/// "cache indefinitely".
pub fn sanitize_max_age(
    max_age: Option<Duration>,
    has_etag: bool,
    min_max_age: Duration,
) -> Option<Duration> {
    match max_age {
        Some(age) if age < min_max_age => Some(min_max_age),
        Some(age) => Some(age),
        None if has_etag => Some(min_max_age),
        None => None,
    }
}
