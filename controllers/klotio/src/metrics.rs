//! Prometheus metrics for the node controller
//!
//! ## Counters
//! - `klotio_ticks_total` - Ticks completed
//! - `klotio_tick_failures_total` - Ticks aborted by an error
//! - `klotio_app_errors_total{app}` - App passes that left an App in `Error`
//!
//! ## Gauges
//! - `klotio_published_hosts` - Hosts this node currently publishes

use chrono::{DateTime, Utc};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Mutex;

/// Controller metrics plus the time of the last completed tick.
pub struct Metrics {
    registry: Registry,
    ticks: IntCounter,
    tick_failures: IntCounter,
    app_errors: IntCounterVec,
    published_hosts: IntGauge,
    last_tick: Mutex<Option<DateTime<Utc>>>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").field("last_tick", &self.last_tick()).finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create metrics in a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let ticks = IntCounter::new("klotio_ticks_total", "Total number of completed ticks")?;
        let tick_failures = IntCounter::new("klotio_tick_failures_total", "Total number of ticks aborted by an error")?;
        let app_errors = IntCounterVec::new(
            Opts::new("klotio_app_errors_total", "Total number of App passes ending in Error"),
            &["app"],
        )?;
        let published_hosts = IntGauge::new("klotio_published_hosts", "Hosts currently published by this node")?;

        registry.register(Box::new(ticks.clone()))?;
        registry.register(Box::new(tick_failures.clone()))?;
        registry.register(Box::new(app_errors.clone()))?;
        registry.register(Box::new(published_hosts.clone()))?;

        Ok(Self { registry, ticks, tick_failures, app_errors, published_hosts, last_tick: Mutex::new(None) })
    }

    /// Record a completed tick.
    pub fn record_tick(&self) {
        self.ticks.inc();
        if let Ok(mut last_tick) = self.last_tick.lock() {
            *last_tick = Some(Utc::now());
        }
    }

    /// Record a tick aborted by an error.
    pub fn record_tick_failure(&self) {
        self.tick_failures.inc();
    }

    /// Record Apps left in `Error` by a pass.
    pub fn record_app_errors(&self, apps: &[String]) {
        for app in apps {
            self.app_errors.with_label_values(&[app.as_str()]).inc();
        }
    }

    /// Set the number of hosts published by this node.
    pub fn set_published_hosts(&self, hosts: usize) {
        self.published_hosts.set(i64::try_from(hosts).unwrap_or(i64::MAX));
    }

    /// When the last tick completed, if any did.
    pub fn last_tick(&self) -> Option<DateTime<Utc>> {
        self.last_tick.lock().ok().and_then(|last_tick| *last_tick)
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer).unwrap_or_default())
    }
}
