//! Monotonic counters per event type plus a Prometheus scrape surface
//! alongside them.
//!
//! `examples/original_source/postal/postal-metrics.c` keeps more than raw
//! totals: a breakdown by device type for notifications sent. We keep that
//! shape as an `IntCounterVec` labeled by protocol, folding it back down to
//! the flat `{aps, c2dm, gcm}` object `GET /status` returns.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use serde_json::json;

use crate::models::DeviceType;

/// Process-lifetime counters, registered against a private
/// `prometheus::Registry` so `/metrics` only ever exposes Postal's own
/// series.
#[derive(Debug)]
pub struct Metrics {
	registry: Registry,
	devices_added: IntCounter,
	devices_removed: IntCounter,
	devices_updated: IntCounter,
	devices_notified: IntCounterVec,
}

impl Metrics {
	/// Builds and registers every counter. Fails only if Prometheus rejects
	/// a metric name/label combination, which cannot happen with the fixed
	/// names below.
	pub fn new() -> Result<Self, prometheus::Error> {
		let registry = Registry::new();

		let devices_added =
			IntCounter::with_opts(Opts::new("postal_devices_added_total", "Devices added"))?;
		let devices_removed =
			IntCounter::with_opts(Opts::new("postal_devices_removed_total", "Devices removed"))?;
		let devices_updated =
			IntCounter::with_opts(Opts::new("postal_devices_updated_total", "Devices updated"))?;
		let devices_notified = IntCounterVec::new(
			Opts::new("postal_devices_notified_total", "Notifications enqueued at a gateway"),
			&["device_type"],
		)?;

		registry.register(Box::new(devices_added.clone()))?;
		registry.register(Box::new(devices_removed.clone()))?;
		registry.register(Box::new(devices_updated.clone()))?;
		registry.register(Box::new(devices_notified.clone()))?;

		Ok(Self { registry, devices_added, devices_removed, devices_updated, devices_notified })
	}

	/// `AddDevice` created a new document.
	pub fn record_device_added(&self) {
		self.devices_added.inc();
	}

	/// `RemoveDevice` soft-deleted a document.
	pub fn record_device_removed(&self) {
		self.devices_removed.inc();
	}

	/// `UpdateDevice` replaced an existing document.
	pub fn record_device_updated(&self) {
		self.devices_updated.inc();
	}

	/// A per-device send was successfully enqueued at its gateway.
	pub fn record_device_notified(&self, device_type: DeviceType) {
		self.devices_notified.with_label_values(&[device_type.as_str()]).inc();
	}

	/// The `{devices_added, devices_removed, devices_updated,
	/// devices_notified: {aps, c2dm, gcm}}` body `GET /status` returns.
	#[must_use]
	pub fn status_json(&self) -> serde_json::Value {
		json!({
			"devices_added": self.devices_added.get(),
			"devices_removed": self.devices_removed.get(),
			"devices_updated": self.devices_updated.get(),
			"devices_notified": {
				"aps": self.devices_notified.with_label_values(&["aps"]).get(),
				"c2dm": self.devices_notified.with_label_values(&["c2dm"]).get(),
				"gcm": self.devices_notified.with_label_values(&["gcm"]).get(),
			},
		})
	}

	/// Renders every registered series in the Prometheus text exposition
	/// format, for the `/metrics` scrape endpoint.
	#[must_use]
	pub fn render(&self) -> String {
		let encoder = TextEncoder::new();
		let metric_families = self.registry.gather();
		let mut buffer = Vec::new();
		encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
		String::from_utf8(buffer).unwrap_or_default()
	}
}

/// Axum handler for `GET /metrics`.
pub async fn metrics_handler(
	axum::extract::State(metrics): axum::extract::State<Arc<Metrics>>,
) -> String {
	metrics.render()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn status_json_starts_at_zero() {
		let metrics = Metrics::new().unwrap();
		let status = metrics.status_json();
		assert_eq!(status["devices_added"], 0);
		assert_eq!(status["devices_notified"]["aps"], 0);
	}

	#[test]
	fn record_device_notified_breaks_down_by_type() {
		let metrics = Metrics::new().unwrap();
		metrics.record_device_notified(DeviceType::Aps);
		metrics.record_device_notified(DeviceType::Aps);
		metrics.record_device_notified(DeviceType::Gcm);
		let status = metrics.status_json();
		assert_eq!(status["devices_notified"]["aps"], 2);
		assert_eq!(status["devices_notified"]["gcm"], 1);
		assert_eq!(status["devices_notified"]["c2dm"], 0);
	}

	#[test]
	fn render_contains_metric_names() {
		let metrics = Metrics::new().unwrap();
		metrics.record_device_added();
		let rendered = metrics.render();
		assert!(rendered.contains("postal_devices_added_total"));
	}
}
