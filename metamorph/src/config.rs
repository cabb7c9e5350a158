//! Service configuration.
//!
//! Everything is driven by environment variables (a `.env` file is honored in
//! `main`). Construction goes through a lookup closure so tests can feed a
//! plain map instead of mutating the process environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

/// Object-storage wiring.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Public URL prefix under which uploaded keys are reachable. Always ends
    /// with `/`.
    pub endpoint: String,
    /// Bucket name for the S3 backend.
    pub bucket: String,
    /// Optional CDN hostname substituted into artifact URLs on read.
    pub cdn_host: Option<String>,
}

/// Process-wide settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// HTTP bind address.
    pub bind_address: String,
    /// HTTP port.
    pub port: u16,
    /// Object storage; absent means `Store` is not available.
    pub storage: Option<StorageSettings>,
    /// Key-value store connection string; absent in pure single-node mode.
    pub redis_url: Option<String>,
    /// Name of the conversion queue (Redis list key).
    pub queue_name: String,
    /// Version integer embedded in every cache key. Bumping it abandons all
    /// prior cache records at once.
    pub cache_version: u32,
    /// Hard cap on source downloads.
    pub max_download_bytes: u64,
    /// Number of conversion workers.
    pub worker_count: usize,
    /// Minimum freshness window applied by the max-age sanitizer.
    pub min_max_age: Duration,
    /// Total budget for a blocking `wait=true` request.
    pub wait_timeout: Duration,
    /// Cadence of the waiter's cache polling.
    pub poll_interval: Duration,
    /// Dev-only filesystem cache directory; set when `LOCAL_CACHE=true`.
    pub local_cache_dir: Option<PathBuf>,
    /// Root of per-job scratch directories. Cleared on startup.
    pub work_dir: PathBuf,
    /// Bearer token guarding `/metrics`; absent leaves the route open.
    pub metrics_token: Option<String>,
    /// Path to the ffmpeg binary.
    pub ffmpeg_path: String,
    /// Path to the toktx binary.
    pub toktx_path: String,
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary lookup function.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let storage = match get("STORAGE_BUCKET") {
            Some(bucket) => {
                let mut endpoint = get("STORAGE_ENDPOINT").ok_or_else(|| {
                    Error::config("STORAGE_ENDPOINT is required when STORAGE_BUCKET is set")
                })?;
                if !endpoint.ends_with('/') {
                    endpoint.push('/');
                }
                Some(StorageSettings {
                    endpoint,
                    bucket,
                    cdn_host: get("CDN_HOST").filter(|h| !h.is_empty()),
                })
            }
            None => None,
        };

        let local_cache = get("LOCAL_CACHE")
            .map(|v| parse_bool("LOCAL_CACHE", &v))
            .transpose()?
            .unwrap_or(false);
        let local_cache_dir = if local_cache {
            Some(PathBuf::from(
                get("LOCAL_CACHE_DIR").unwrap_or_else(|| "metamorph-cache".to_string()),
            ))
        } else {
            None
        };

        let max_download_mb: u64 = parse_or("MAX_DOWNLOAD_MB", get("MAX_DOWNLOAD_MB"), 100)?;
        let worker_count: usize = parse_or("WORKER_COUNT", get("WORKER_COUNT"), 5)?;
        if worker_count == 0 {
            return Err(Error::config("WORKER_COUNT must be at least 1"));
        }

        Ok(Self {
            bind_address: get("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or("PORT", get("PORT"), 5002)?,
            storage,
            redis_url: get("REDIS_URL").filter(|v| !v.is_empty()),
            queue_name: get("QUEUE_NAME").unwrap_or_else(|| "metamorph-conversions".to_string()),
            cache_version: parse_or("CACHE_VERSION", get("CACHE_VERSION"), 1)?,
            max_download_bytes: max_download_mb * 1024 * 1024,
            worker_count,
            min_max_age: Duration::from_secs(
                parse_or("MIN_MAX_AGE_MINUTES", get("MIN_MAX_AGE_MINUTES"), 5u64)? * 60,
            ),
            wait_timeout: Duration::from_secs(parse_or(
                "WAIT_TIMEOUT_SECS",
                get("WAIT_TIMEOUT_SECS"),
                20u64,
            )?),
            poll_interval: Duration::from_millis(parse_or(
                "POLL_INTERVAL_MS",
                get("POLL_INTERVAL_MS"),
                100u64,
            )?),
            local_cache_dir,
            work_dir: PathBuf::from(get("WORK_DIR").unwrap_or_else(|| "metamorph-work".to_string())),
            metrics_token: get("METRICS_TOKEN").filter(|v| !v.is_empty()),
            ffmpeg_path: get("FFMPEG_PATH").unwrap_or_else(|| "ffmpeg".to_string()),
            toktx_path: get("TOKTX_PATH").unwrap_or_else(|| "toktx".to_string()),
        })
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, value: Option<String>, default: T) -> Result<T> {
    match value {
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::config(format!("{key} has invalid value {raw:?}"))),
        None => Ok(default),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::config(format!("{key} has invalid value {raw:?}"))),
    }
}
