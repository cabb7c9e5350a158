//! Metrics collector implementation.
//!
//! Conversion durations are tracked per media class in histograms labelled by
//! input size bucket and applied format; everything is lock-free atomics so
//! the hot paths never contend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use media_probe::MediaKind;

/// Upper bounds (seconds) of the duration histogram buckets.
pub const DURATION_BUCKETS: [f64; 11] = [
    0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
];

/// Input size bucket label for a byte count.
pub fn size_bucket(bytes: u64) -> &'static str {
    const MB: u64 = 1024 * 1024;
    match bytes {
        b if b < MB => "<1MB",
        b if b < 5 * MB => "1-5MB",
        b if b <= 10 * MB => "5-10MB",
        _ => ">10MB",
    }
}

/// One labelled duration histogram.
#[derive(Default)]
pub(crate) struct Histogram {
    // Per-bucket counts; cumulated only at export time.
    buckets: [AtomicU64; DURATION_BUCKETS.len() + 1],
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    fn observe(&self, duration: Duration) {
        let secs = duration.as_secs_f64();
        let slot = DURATION_BUCKETS
            .iter()
            .position(|bound| secs <= *bound)
            .unwrap_or(DURATION_BUCKETS.len());
        self.buckets[slot].fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative bucket counts, ending with the `+Inf` bucket.
    pub(crate) fn cumulative(&self) -> Vec<u64> {
        let mut total = 0;
        self.buckets
            .iter()
            .map(|b| {
                total += b.load(Ordering::Relaxed);
                total
            })
            .collect()
    }

    pub(crate) fn sum_seconds(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1e6
    }

    pub(crate) fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

type HistogramKey = (&'static str, String);

/// Metrics for the conversion service.
#[derive(Default)]
pub struct MetricsCollector {
    pub(crate) static_image_duration: DashMap<HistogramKey, Histogram>,
    pub(crate) motion_image_duration: DashMap<HistogramKey, Histogram>,
    pub(crate) motion_video_duration: DashMap<HistogramKey, Histogram>,

    active_conversions: AtomicU64,
    pub(crate) conversions_total: DashMap<&'static str, AtomicU64>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished conversion's duration.
    pub fn record_conversion_duration(
        &self,
        kind: MediaKind,
        format: &str,
        input_bytes: u64,
        duration: Duration,
    ) {
        let map = match kind {
            MediaKind::StaticImage => &self.static_image_duration,
            MediaKind::MotionImage => &self.motion_image_duration,
            MediaKind::MotionVideo => &self.motion_video_duration,
            MediaKind::Other => return,
        };
        map.entry((size_bucket(input_bytes), format.to_string()))
            .or_default()
            .observe(duration);
    }

    pub fn conversion_started(&self) {
        self.active_conversions.fetch_add(1, Ordering::Relaxed);
    }

    /// `outcome` is a small fixed vocabulary: `completed`, `failed`.
    pub fn conversion_finished(&self, outcome: &'static str) {
        self.active_conversions.fetch_sub(1, Ordering::Relaxed);
        self.conversions_total
            .entry(outcome)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn active_conversions(&self) -> u64 {
        self.active_conversions.load(Ordering::Relaxed)
    }
}
