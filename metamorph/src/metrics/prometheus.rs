//! Prometheus metrics exporter.
//!
//! Exports metrics in Prometheus text format.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use dashmap::DashMap;

use super::collector::{DURATION_BUCKETS, Histogram, MetricsCollector};

/// Prometheus metrics exporter.
pub struct PrometheusExporter {
    collector: Arc<MetricsCollector>,
    namespace: String,
}

impl PrometheusExporter {
    /// Create a new Prometheus exporter.
    pub fn new(collector: Arc<MetricsCollector>) -> Self {
        Self {
            collector,
            namespace: "dcl_metamorph".to_string(),
        }
    }

    /// Export metrics in Prometheus text format.
    pub fn export(&self) -> String {
        let mut output = String::new();

        self.write_histogram_family(
            &mut output,
            "static_image_duration_seconds",
            "Still image conversion duration",
            &self.collector.static_image_duration,
        );
        self.write_histogram_family(
            &mut output,
            "motion_image_duration_seconds",
            "Animated image conversion duration",
            &self.collector.motion_image_duration,
        );
        self.write_histogram_family(
            &mut output,
            "motion_video_duration_seconds",
            "Video conversion duration",
            &self.collector.motion_video_duration,
        );

        self.write_gauge(
            &mut output,
            "active_conversions",
            "Conversions currently being processed",
            self.collector.active_conversions() as f64,
        );

        for entry in self.collector.conversions_total.iter() {
            self.write_counter_with_labels(
                &mut output,
                "conversions_total",
                "Total conversions by outcome",
                entry.value().load(Ordering::Relaxed) as f64,
                &[("outcome", *entry.key())],
            );
        }

        output
    }

    fn write_histogram_family(
        &self,
        output: &mut String,
        name: &str,
        help: &str,
        family: &DashMap<(&'static str, String), Histogram>,
    ) {
        let full_name = format!("{}_{}", self.namespace, name);
        output.push_str(&format!("# HELP {} {}\n", full_name, help));
        output.push_str(&format!("# TYPE {} histogram\n", full_name));

        for entry in family.iter() {
            let (size_bucket, format) = entry.key();
            let histogram = entry.value();
            let labels = format!("size_bucket=\"{}\",format=\"{}\"", size_bucket, format);

            let cumulative = histogram.cumulative();
            for (bound, count) in DURATION_BUCKETS.iter().zip(&cumulative) {
                output.push_str(&format!(
                    "{}_bucket{{{},le=\"{}\"}} {}\n",
                    full_name, labels, bound, count
                ));
            }
            output.push_str(&format!(
                "{}_bucket{{{},le=\"+Inf\"}} {}\n",
                full_name,
                labels,
                cumulative.last().copied().unwrap_or(0)
            ));
            output.push_str(&format!(
                "{}_sum{{{}}} {}\n",
                full_name,
                labels,
                histogram.sum_seconds()
            ));
            output.push_str(&format!(
                "{}_count{{{}}} {}\n",
                full_name,
                labels,
                histogram.count()
            ));
        }
    }

    fn write_gauge(&self, output: &mut String, name: &str, help: &str, value: f64) {
        let full_name = format!("{}_{}", self.namespace, name);
        output.push_str(&format!("# HELP {} {}\n", full_name, help));
        output.push_str(&format!("# TYPE {} gauge\n", full_name));
        output.push_str(&format!("{} {}\n", full_name, value));
    }

    fn write_counter_with_labels(
        &self,
        output: &mut String,
        name: &str,
        help: &str,
        value: f64,
        labels: &[(&str, &str)],
    ) {
        let full_name = format!("{}_{}", self.namespace, name);
        output.push_str(&format!("# HELP {} {}\n", full_name, help));
        output.push_str(&format!("# TYPE {} counter\n", full_name));

        let labels_str = labels
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, v))
            .collect::<Vec<_>>()
            .join(",");

        output.push_str(&format!("{}{{{}}} {}\n", full_name, labels_str, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use media_probe::MediaKind;
    use std::time::Duration;

    #[test]
    fn export_names_the_three_histogram_families() {
        let collector = Arc::new(MetricsCollector::new());
        let exporter = PrometheusExporter::new(collector);
        let output = exporter.export();

        assert!(output.contains("# TYPE dcl_metamorph_static_image_duration_seconds histogram"));
        assert!(output.contains("# TYPE dcl_metamorph_motion_image_duration_seconds histogram"));
        assert!(output.contains("# TYPE dcl_metamorph_motion_video_duration_seconds histogram"));
        assert!(output.contains("dcl_metamorph_active_conversions 0"));
    }

    #[test]
    fn histogram_series_carry_both_labels() {
        let collector = Arc::new(MetricsCollector::new());
        collector.record_conversion_duration(
            MediaKind::StaticImage,
            "UASTC",
            2 * 1024 * 1024,
            Duration::from_millis(80),
        );

        let output = PrometheusExporter::new(collector).export();
        assert!(output.contains(
            "dcl_metamorph_static_image_duration_seconds_bucket{size_bucket=\"1-5MB\",format=\"UASTC\",le=\"0.1\"} 1"
        ));
        assert!(output.contains(
            "dcl_metamorph_static_image_duration_seconds_bucket{size_bucket=\"1-5MB\",format=\"UASTC\",le=\"+Inf\"} 1"
        ));
        assert!(output.contains(
            "dcl_metamorph_static_image_duration_seconds_count{size_bucket=\"1-5MB\",format=\"UASTC\"} 1"
        ));
    }

    #[test]
    fn outcome_counters_export() {
        let collector = Arc::new(MetricsCollector::new());
        collector.conversion_started();
        collector.conversion_finished("failed");

        let output = PrometheusExporter::new(collector).export();
        assert!(output.contains("dcl_metamorph_conversions_total{outcome=\"failed\"} 1"));
    }
}
