//! Directory-backed cache for single-node dev runs.
//!
//! No KV, no freshness metadata: `store` drops the artifact into a directory
//! as `{hash}{ext}` and `lookup` scans the known extensions. Entries never
//! expire and never revalidate; blow the directory away to reset.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::Result;
use crate::formats::{ImageFormat, VideoFormat};

use super::{CachedArtifact, ConversionCache, NewArtifact};

const KNOWN_EXTENSIONS: [&str; 3] = [".ktx2", ".mp4", ".ogv"];

pub struct LocalDiskCache {
    dir: PathBuf,
    endpoint: String,
}

impl LocalDiskCache {
    pub fn new(dir: PathBuf, endpoint: impl Into<String>) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        let mut endpoint = endpoint.into();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        Ok(Self { dir, endpoint })
    }
}

#[async_trait]
impl ConversionCache for LocalDiskCache {
    async fn store(&self, artifact: NewArtifact<'_>) -> Result<()> {
        let extension = artifact
            .path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let file_name = format!("{hash}.{extension}", hash = artifact.hash);
        tokio::fs::copy(artifact.path, self.dir.join(&file_name)).await?;
        debug!(file = file_name, "stored artifact in local cache");
        Ok(())
    }

    async fn lookup(
        &self,
        hash: &str,
        image: ImageFormat,
        video: VideoFormat,
        _source_url: Option<&str>,
        _force_refresh: bool,
    ) -> Result<Option<CachedArtifact>> {
        for extension in KNOWN_EXTENSIONS {
            let file_name = format!("{hash}{extension}");
            if self.dir.join(&file_name).exists() {
                let format = if extension == ".ktx2" {
                    image.name()
                } else {
                    video.name()
                };
                return Ok(Some(CachedArtifact {
                    url: format!("{}{}", self.endpoint, file_name),
                    etag: None,
                    expired: false,
                    converting: false,
                    format: format.to_string(),
                }));
            }
        }
        Ok(None)
    }

    async fn revalidate(
        &self,
        _hash: &str,
        _url: &str,
        _image: ImageFormat,
        _video: VideoFormat,
        _force: bool,
    ) -> Result<bool> {
        // Local entries live until the directory is wiped.
        Ok(true)
    }
}
