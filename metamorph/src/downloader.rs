//! Source media downloads and conditional revalidation.
//!
//! Downloads stream straight to disk behind a hard byte cap; nothing is
//! buffered in memory beyond the current chunk. Revalidation issues a bounded
//! conditional `HEAD` and reports whether the origin still serves the same
//! entity.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use reqwest::header;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HEAD_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = concat!("metamorph/", env!("CARGO_PKG_VERSION"));

/// A completed source download.
#[derive(Debug)]
pub struct Download {
    /// Where the body was written.
    pub path: PathBuf,
    /// Origin entity tag, verbatim.
    pub etag: Option<String>,
    /// Origin freshness window. `Cache-Control: no-cache` maps to zero; the
    /// cache engine's sanitizer raises that to its minimum.
    pub max_age: Option<Duration>,
}

/// Result of a conditional `HEAD` against the origin.
#[derive(Debug, PartialEq, Eq)]
pub enum RevalidateOutcome {
    /// Origin answered `304`; the cached artifact may be considered fresh.
    NotModified { max_age: Option<Duration> },
    /// Anything else: the entity changed or the origin misbehaved.
    Changed,
}

/// Streaming HTTP downloader with a byte cap.
pub struct Downloader {
    client: reqwest::Client,
    max_bytes: u64,
}

impl Downloader {
    pub fn new(max_bytes: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client, max_bytes })
    }

    /// Download `url` into `dest_dir/{hash}.src`.
    ///
    /// Exceeding the byte cap aborts the stream and removes the partial file.
    pub async fn fetch(&self, url: &str, hash: &str, dest_dir: &Path) -> Result<Download> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Error::download(format!(
                "{url} answered {status}",
                status = response.status()
            )));
        }

        let etag = header_string(response.headers(), header::ETAG);
        let max_age = response
            .headers()
            .get(header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_max_age);

        // Reject early when the origin already announces an oversized body.
        if let Some(length) = response.content_length()
            && length > self.max_bytes
        {
            return Err(Error::DownloadTooLarge {
                limit_bytes: self.max_bytes,
            });
        }

        let path = dest_dir.join(format!("{hash}.src"));
        let mut file = tokio::fs::File::create(&path).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&path).await;
                    return Err(Error::download(format!("{url} stream failed: {e}")));
                }
            };
            written += chunk.len() as u64;
            if written > self.max_bytes {
                drop(file);
                let _ = tokio::fs::remove_file(&path).await;
                return Err(Error::DownloadTooLarge {
                    limit_bytes: self.max_bytes,
                });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        debug!(url, bytes = written, "downloaded source");
        Ok(Download { path, etag, max_age })
    }

    /// Conditional `HEAD` with `If-None-Match` when an entity tag is known.
    pub async fn revalidate(&self, url: &str, etag: Option<&str>) -> Result<RevalidateOutcome> {
        let mut request = self.client.head(url).timeout(HEAD_TIMEOUT);
        if let Some(etag) = etag {
            request = request.header(header::IF_NONE_MATCH, etag);
        }
        let response = request.send().await?;

        if response.status() == reqwest::StatusCode::NOT_MODIFIED {
            let max_age = response
                .headers()
                .get(header::CACHE_CONTROL)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_max_age);
            Ok(RevalidateOutcome::NotModified { max_age })
        } else {
            Ok(RevalidateOutcome::Changed)
        }
    }
}

fn header_string(headers: &header::HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

/// Extract an effective max-age from a `Cache-Control` header.
///
/// `no-cache` maps to zero so the downstream sanitizer can raise it to the
/// configured minimum instead of caching indefinitely.
pub fn parse_max_age(cache_control: &str) -> Option<Duration> {
    let mut max_age = None;
    for directive in cache_control.split(',') {
        let directive = directive.trim();
        if directive.eq_ignore_ascii_case("no-cache") || directive.eq_ignore_ascii_case("no-store")
        {
            return Some(Duration::ZERO);
        }
        if let Some(value) = directive
            .strip_prefix("max-age=")
            .or_else(|| directive.strip_prefix("MAX-AGE="))
            && let Ok(secs) = value.trim().parse::<u64>()
        {
            max_age = Some(Duration::from_secs(secs));
        }
    }
    max_age
}
