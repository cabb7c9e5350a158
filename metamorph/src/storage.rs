//! Object storage for converted artifacts.
//!
//! Thin wrapper around an `object_store` backend that owns the key → public
//! URL mapping. Production runs against S3 (credentials and region come from
//! the usual AWS environment); dev mode runs against a local directory.

use std::path::Path;
use std::sync::Arc;

use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload};
use tracing::debug;

use crate::config::StorageSettings;
use crate::{Error, Result};

/// Artifact store: uploads under caller-chosen keys, public URLs on read.
pub struct ArtifactStore {
    store: Arc<dyn ObjectStore>,
    endpoint: String,
    cdn_host: Option<String>,
}

impl ArtifactStore {
    /// S3-backed store per the given settings.
    pub fn s3(settings: &StorageSettings) -> Result<Self> {
        let store = AmazonS3Builder::from_env()
            .with_bucket_name(settings.bucket.clone())
            .build()?;
        Ok(Self {
            store: Arc::new(store),
            endpoint: settings.endpoint.clone(),
            cdn_host: settings.cdn_host.clone(),
        })
    }

    /// Directory-backed store for dev and tests. `endpoint` is still used to
    /// shape public URLs.
    pub fn local_fs(root: &Path, endpoint: impl Into<String>) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        let store = LocalFileSystem::new_with_prefix(root)?;
        let mut endpoint = endpoint.into();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        Ok(Self {
            store: Arc::new(store),
            endpoint,
            cdn_host: None,
        })
    }

    /// Upload a local file under `key` with the given content type.
    pub async fn put_file(&self, key: &str, content_type: &str, path: &Path) -> Result<()> {
        let body = tokio::fs::read(path).await?;
        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        let options = PutOptions {
            attributes,
            ..Default::default()
        };
        let location = object_store::path::Path::from(key);
        self.store
            .put_opts(&location, PutPayload::from(body), options)
            .await?;
        debug!(key, content_type, "uploaded artifact");
        Ok(())
    }

    /// Public URL of a stored key: configured endpoint + key, with the
    /// authority swapped for the CDN host when one is configured.
    pub fn public_url(&self, key: &str) -> String {
        let raw = format!("{}{}", self.endpoint, key);
        let Some(cdn) = &self.cdn_host else {
            return raw;
        };
        match url::Url::parse(&raw) {
            Ok(mut parsed) => {
                if parsed.set_host(Some(cdn)).is_ok() {
                    parsed.to_string()
                } else {
                    raw
                }
            }
            Err(_) => raw,
        }
    }
}

/// Content type of an artifact file, from its extension.
pub fn content_type_for(path: &Path) -> Result<&'static str> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match extension.as_str() {
        "ktx2" => Ok("image/ktx2"),
        "mp4" => Ok("video/mp4"),
        "ogv" => Ok("video/ogg"),
        _ => Err(Error::UnsupportedExtension(extension)),
    }
}
