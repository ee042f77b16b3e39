//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Metrics collection and export utilities."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use prometheus::{
    GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use tracing::error;

/// Shared registry type used across components.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Render every metric family in the Prometheus text exposition format.
pub fn encode_text(registry: &Registry) -> Result<String> {
    TextEncoder::new()
        .encode_to_string(&registry.gather())
        .context("failed to encode metrics")
}

/// Prometheus scrape response for `registry`.
pub fn metrics_response(registry: &Registry) -> Response {
    match encode_text(registry) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("metrics encoding error"),
            )
                .into_response()
        }
    }
}

/// Counters maintained by the monitor tasks.
#[derive(Clone, Debug)]
pub struct MonitorMetrics {
    frames_received: IntCounterVec,
    frames_ignored: IntCounter,
    keep_alive_sent: IntCounter,
    keep_alive_failed: IntCounter,
    records_written: IntCounter,
    broker_queries: IntCounterVec,
}

impl MonitorMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let frames_received = IntCounterVec::new(
            Opts::new(
                "r_bms_frames_received_total",
                "Frames decoded from the bus by message type",
            ),
            &["message"],
        )?;
        registry.register(Box::new(frames_received.clone()))?;

        let frames_ignored = IntCounter::with_opts(Opts::new(
            "r_bms_frames_ignored_total",
            "Frames carrying an identifier outside the message catalog",
        ))?;
        registry.register(Box::new(frames_ignored.clone()))?;

        let keep_alive_sent = IntCounter::with_opts(Opts::new(
            "r_bms_keep_alive_sent_total",
            "Keep-alive frames published to the bus",
        ))?;
        registry.register(Box::new(keep_alive_sent.clone()))?;

        let keep_alive_failed = IntCounter::with_opts(Opts::new(
            "r_bms_keep_alive_failed_total",
            "Keep-alive frames the bus refused",
        ))?;
        registry.register(Box::new(keep_alive_failed.clone()))?;

        let records_written = IntCounter::with_opts(Opts::new(
            "r_bms_records_written_total",
            "Status records appended to datafiles",
        ))?;
        registry.register(Box::new(records_written.clone()))?;

        let broker_queries = IntCounterVec::new(
            Opts::new(
                "r_bms_broker_queries_total",
                "Status queries served by the broker, by requesting component",
            ),
            &["source"],
        )?;
        registry.register(Box::new(broker_queries.clone()))?;

        Ok(Self {
            frames_received,
            frames_ignored,
            keep_alive_sent,
            keep_alive_failed,
            records_written,
            broker_queries,
        })
    }

    pub fn record_frame(&self, message: &str) {
        self.frames_received.with_label_values(&[message]).inc();
    }

    pub fn record_ignored_frame(&self) {
        self.frames_ignored.inc();
    }

    pub fn record_keep_alive(&self, delivered: bool) {
        if delivered {
            self.keep_alive_sent.inc();
        } else {
            self.keep_alive_failed.inc();
        }
    }

    pub fn record_written(&self) {
        self.records_written.inc();
    }

    pub fn record_query(&self, source: &str) {
        self.broker_queries.with_label_values(&[source]).inc();
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: SharedRegistry,
    starts_total: IntCounter,
    config_load_seconds: Histogram,
    build_info: GaugeVec,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "r_bmsd_starts_total",
            "Total number of times the R-BMS daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 12)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "r_bmsd_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new("r_bmsd_build_info", "Build metadata for the running daemon binary"),
            &["version", "profile"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            registry,
            starts_total,
            config_load_seconds,
            build_info,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn set_build_info(&self, version: &str, profile: &str) {
        self.build_info
            .with_label_values(&[version, profile])
            .set(1.0);
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitor_counters_render_with_labels() {
        let registry = new_registry();
        let metrics = MonitorMetrics::new(registry.clone()).unwrap();
        metrics.record_frame("SOC_SOH");
        metrics.record_frame("SOC_SOH");
        metrics.record_ignored_frame();
        metrics.record_keep_alive(true);
        metrics.record_keep_alive(false);
        metrics.record_query("http");

        let text = encode_text(&registry).unwrap();
        assert!(text.contains(r#"r_bms_frames_received_total{message="SOC_SOH"} 2"#));
        assert!(text.contains("r_bms_frames_ignored_total 1"));
        assert!(text.contains("r_bms_keep_alive_sent_total 1"));
        assert!(text.contains("r_bms_keep_alive_failed_total 1"));
        assert!(text.contains(r#"r_bms_broker_queries_total{source="http"} 1"#));
    }

    #[test]
    fn daemon_metrics_publish_build_info() {
        let registry = new_registry();
        let metrics = DaemonMetrics::new(registry).unwrap();
        metrics.inc_start();
        metrics.observe_config_load(0.002);
        metrics.set_build_info("0.1.0", "debug");
        let text = encode_text(&metrics.registry()).unwrap();
        assert!(text.contains("r_bmsd_starts_total 1"));
        let build_line = text
            .lines()
            .find(|line| line.starts_with("r_bmsd_build_info{"))
            .unwrap();
        assert!(build_line.contains(r#"version="0.1.0""#));
        assert!(build_line.ends_with(" 1"));
    }

    #[tokio::test]
    async fn scrape_response_is_prometheus_text() {
        let registry = new_registry();
        MonitorMetrics::new(registry.clone())
            .unwrap()
            .record_written();
        let response = metrics_response(&registry);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            prometheus::TEXT_FORMAT
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("r_bms_records_written_total 1"));
    }
}
