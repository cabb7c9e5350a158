//! Cache key shapes.
//!
//! Every key embeds the process-wide cache version so a version bump abandons
//! the entire keyspace at once. Key layout is part of the wire contract with
//! already-deployed instances; change it only together with a version bump.

use crate::formats::{ImageFormat, VideoFormat};

/// Builds the KV key names for one cache version.
#[derive(Debug, Clone, Copy)]
pub struct KeySpace {
    version: u32,
}

impl KeySpace {
    pub fn new(version: u32) -> Self {
        Self { version }
    }

    /// Key holding the object-storage key of the converted artifact.
    pub fn object(&self, hash: &str, format_name: &str) -> String {
        format!("{hash}_{format_name}_{v}", v = self.version)
    }

    /// Key holding the origin entity tag, when one is known.
    pub fn etag(&self, hash: &str, format_name: &str) -> String {
        format!("etag:{hash}_{format_name}_{v}", v = self.version)
    }

    /// Freshness marker; present means the artifact is within its max-age.
    pub fn valid(&self, hash: &str, format_name: &str) -> String {
        format!("valid:{hash}_{format_name}_{v}", v = self.version)
    }

    /// In-flight marker claiming a whole conversion identity.
    pub fn converting(&self, hash: &str, image: ImageFormat, video: VideoFormat) -> String {
        format!(
            "converting:{hash}-{image}-{video}_{v}",
            image = image.name(),
            video = video.name(),
            v = self.version
        )
    }

    /// Media-class tag, written once per hash.
    pub fn filetype(&self, hash: &str) -> String {
        format!("filetype:{hash}_{v}", v = self.version)
    }
}
