//! The conversion endpoint.
//!
//! `GET /convert?url=...` is the whole user-facing contract: answer with a
//! redirect to the best artifact we have right now, and make sure the real
//! conversion happens in the background exactly once. This path must never
//! surface a 5xx; any backend trouble degrades to redirecting the client to
//! the original URL.

use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::api::server::AppState;
use crate::formats::{ImageFormat, VideoFormat};
use crate::hashing::sha256_hex;
use crate::queue::ConvertJob;
use crate::waiter::WaitKey;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertParams {
    url: Option<String>,
    image_format: Option<String>,
    video_format: Option<String>,
    wait: Option<bool>,
    force_refresh: Option<bool>,
}

/// `GET`/`HEAD /convert`.
pub async fn convert(State(state): State<AppState>, Query(params): Query<ConvertParams>) -> Response {
    let Some(url) = params.url.filter(|u| !u.is_empty()) else {
        return bad_request("missing url parameter");
    };
    match url::Url::parse(&url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
        _ => return bad_request("url must be an absolute http(s) URL"),
    }

    let image_format: ImageFormat = match params.image_format.as_deref().map(str::parse).transpose() {
        Ok(parsed) => parsed.unwrap_or_default(),
        Err(e) => return bad_request(&e),
    };
    let video_format: VideoFormat = match params.video_format.as_deref().map(str::parse).transpose() {
        Ok(parsed) => parsed.unwrap_or_default(),
        Err(e) => return bad_request(&e),
    };
    let wait = params.wait.unwrap_or(false);
    let force_refresh = params.force_refresh.unwrap_or(false);

    let hash = sha256_hex(&url);

    let mut record = match state
        .cache
        .lookup(&hash, image_format, video_format, Some(&url), force_refresh)
        .await
    {
        Ok(record) => record,
        Err(e) => {
            warn!(hash, error = %e, "cache lookup failed, serving the original");
            None
        }
    };

    if record.is_none() {
        let job = ConvertJob {
            hash: hash.clone(),
            url: url.clone(),
            image_format,
            video_format,
        };
        if let Err(e) = state.queue.enqueue(&job).await {
            warn!(hash, error = %e, "failed to enqueue conversion");
        }

        if wait {
            record = state
                .waiter
                .wait(WaitKey {
                    hash: hash.clone(),
                    image_format,
                    video_format,
                })
                .await;
            if record.is_none() {
                debug!(hash, "wait budget exhausted");
                return StatusCode::ACCEPTED.into_response();
            }
        }
    }

    match record {
        Some(record) => redirect(&record.url),
        None => redirect(&url),
    }
}

fn redirect(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, message.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::routes::create_router;
    use crate::cache::engine::{CacheEngine, OriginProbe};
    use crate::cache::keys::KeySpace;
    use crate::cache::kv::{KvStore, MemoryKv};
    use crate::downloader::RevalidateOutcome;
    use crate::metrics::{MetricsCollector, PrometheusExporter};
    use crate::queue::{ChannelQueue, ConversionQueue};
    use crate::refresh::{self, RefreshReceiver};
    use crate::storage::ArtifactStore;
    use crate::waiter::WaiterService;
    use crate::{Result, hashing};

    use async_trait::async_trait;
    use axum::Router;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    const URL: &str = "https://e.com/a.jpg";
    const ENDPOINT: &str = "https://cdn.example.com/media/";

    struct NeverOrigin;

    #[async_trait]
    impl OriginProbe for NeverOrigin {
        async fn revalidate(&self, _url: &str, _etag: Option<&str>) -> Result<RevalidateOutcome> {
            Ok(RevalidateOutcome::Changed)
        }
    }

    struct Fixture {
        router: Router,
        kv: Arc<MemoryKv>,
        queue: Arc<ConversionQueue>,
        hints: RefreshReceiver,
        keys: KeySpace,
        _store_dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self::build(Duration::from_secs(20), None)
        }

        fn with_waiter_budget(budget: Duration) -> Self {
            Self::build(budget, None)
        }

        fn with_metrics_token(token: &str) -> Self {
            Self::build(Duration::from_secs(20), Some(token))
        }

        fn build(budget: Duration, metrics_token: Option<&str>) -> Self {
            let store_dir = tempfile::tempdir().unwrap();
            let kv = Arc::new(MemoryKv::new());
            let keys = KeySpace::new(1);
            let storage =
                Arc::new(ArtifactStore::local_fs(store_dir.path(), ENDPOINT).unwrap());
            let (refresh_tx, hints) = refresh::channel();
            let cache = Arc::new(CacheEngine::new(
                kv.clone(),
                Some(storage),
                Arc::new(NeverOrigin),
                refresh_tx,
                keys,
                Duration::from_secs(300),
            ));
            let queue = Arc::new(ConversionQueue::new(
                Arc::new(ChannelQueue::new()),
                Some(kv.clone()),
                keys,
            ));
            let waiter = WaiterService::new(
                cache.clone(),
                budget,
                Duration::from_millis(100),
                CancellationToken::new(),
            );
            let exporter = Arc::new(PrometheusExporter::new(Arc::new(MetricsCollector::new())));

            let mut state = crate::api::AppState::new(cache, queue.clone(), waiter, exporter)
                .with_kv(kv.clone());
            if let Some(token) = metrics_token {
                state = state.with_metrics_token(token);
            }
            Self {
                router: create_router(state),
                kv,
                queue,
                hints,
                keys,
                _store_dir: store_dir,
            }
        }

        async fn get(&self, uri: &str) -> axum::response::Response {
            self.router
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap()
        }

        /// Preload a warm image record directly into KV.
        async fn preload_image(&self, hash: &str, object_key: &str, fresh: bool) {
            self.kv
                .set(&self.keys.filetype(hash), "Image")
                .await
                .unwrap();
            self.kv
                .set(&self.keys.object(hash, "UASTC"), object_key)
                .await
                .unwrap();
            if fresh {
                self.kv.set(&self.keys.valid(hash, "UASTC"), "1").await.unwrap();
            }
        }

        async fn drain_queue(&self) -> Vec<crate::queue::ConvertJob> {
            let cancelled = CancellationToken::new();
            cancelled.cancel();
            let mut jobs = Vec::new();
            while let Some(job) = self.queue.dequeue(&cancelled).await.unwrap() {
                jobs.push(job);
            }
            jobs
        }
    }

    fn location(response: &axum::response::Response) -> &str {
        response
            .headers()
            .get(header::LOCATION)
            .expect("redirect should carry a Location header")
            .to_str()
            .unwrap()
    }

    #[tokio::test]
    async fn cold_miss_redirects_to_the_original_and_enqueues_once() {
        let fx = Fixture::new();
        let response = fx.get("/convert?url=https://e.com/a.jpg").await;

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), URL);

        let jobs = fx.drain_queue().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].hash, hashing::sha256_hex(URL));
        assert_eq!(jobs[0].image_format, ImageFormat::Uastc);
        assert_eq!(jobs[0].video_format, VideoFormat::Mp4);
    }

    #[tokio::test]
    async fn warm_hit_redirects_to_the_artifact_without_enqueueing() {
        let fx = Fixture::new();
        let hash = hashing::sha256_hex(URL);
        fx.preload_image(&hash, "k.ktx2", true).await;

        let response = fx.get("/convert?url=https://e.com/a.jpg").await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), format!("{ENDPOINT}k.ktx2"));
        assert!(fx.drain_queue().await.is_empty());
    }

    #[tokio::test]
    async fn expired_hit_still_redirects_and_hints_exactly_one_refresh() {
        let mut fx = Fixture::new();
        let hash = hashing::sha256_hex(URL);
        fx.preload_image(&hash, "k.ktx2", false).await;

        let response = fx.get("/convert?url=https://e.com/a.jpg").await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), format!("{ENDPOINT}k.ktx2"));

        let mut hints = 0;
        while let Ok(hint) = fx.hints.rx.try_recv() {
            assert_eq!(hint.hash, hash);
            assert_eq!(hint.url, URL);
            hints += 1;
        }
        assert_eq!(hints, 1);
        assert!(fx.drain_queue().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_resolves_when_a_background_actor_stores_the_record() {
        let fx = Fixture::with_waiter_budget(Duration::from_secs(20));
        let hash = hashing::sha256_hex(URL);

        {
            let kv = fx.kv.clone();
            let keys = fx.keys;
            let hash = hash.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                kv.set(&keys.filetype(&hash), "Image").await.unwrap();
                kv.set(&keys.object(&hash, "UASTC"), "k.ktx2").await.unwrap();
                kv.set(&keys.valid(&hash, "UASTC"), "1").await.unwrap();
            });
        }

        let response = fx.get("/convert?url=https://e.com/a.jpg&wait=true").await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), format!("{ENDPOINT}k.ktx2"));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_timeout_answers_accepted_with_one_job_queued() {
        let fx = Fixture::with_waiter_budget(Duration::from_secs(20));
        let response = fx.get("/convert?url=https://e.com/a.jpg&wait=true").await;

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(fx.drain_queue().await.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_simultaneous_requests_enqueue_once() {
        let fx = Fixture::new();
        let (a, b) = tokio::join!(
            fx.get("/convert?url=https://e.com/a.jpg"),
            fx.get("/convert?url=https://e.com/a.jpg"),
        );

        assert_eq!(a.status(), StatusCode::FOUND);
        assert_eq!(b.status(), StatusCode::FOUND);
        assert_eq!(location(&a), URL);
        assert_eq!(location(&b), URL);

        assert_eq!(fx.drain_queue().await.len(), 1);
        let marker = fx.keys.converting(
            &hashing::sha256_hex(URL),
            ImageFormat::Uastc,
            VideoFormat::Mp4,
        );
        assert!(fx.kv.get(&marker).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn format_parameters_select_the_conversion_identity() {
        let fx = Fixture::new();
        let response = fx
            .get("/convert?url=https://e.com/a.jpg&imageFormat=ASTC_HIGH&videoFormat=OGV")
            .await;
        assert_eq!(response.status(), StatusCode::FOUND);

        let jobs = fx.drain_queue().await;
        assert_eq!(jobs[0].image_format, ImageFormat::AstcHigh);
        assert_eq!(jobs[0].video_format, VideoFormat::Ogv);
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected() {
        let fx = Fixture::new();
        assert_eq!(fx.get("/convert").await.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            fx.get("/convert?url=not-a-url").await.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            fx.get("/convert?url=ftp://e.com/a.jpg").await.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            fx.get("/convert?url=https://e.com/a.jpg&imageFormat=JPEG").await.status(),
            StatusCode::BAD_REQUEST
        );
        assert!(fx.drain_queue().await.is_empty());
    }

    #[tokio::test]
    async fn health_live_answers_ok() {
        let fx = Fixture::new();
        let response = fx.get("/health/live").await;
        assert_eq!(response.status(), StatusCode::OK);
        let response = fx.get("/health/ready").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_route_exports_the_namespace() {
        let fx = Fixture::new();
        let response = fx.get("/metrics").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_route_honors_the_bearer_guard() {
        let fx = Fixture::with_metrics_token("sekrit");
        assert_eq!(fx.get("/metrics").await.status(), StatusCode::UNAUTHORIZED);

        let response = fx
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .header(header::AUTHORIZATION, "Bearer sekrit")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let wrong = fx
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .header(header::AUTHORIZATION, "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    }
}
