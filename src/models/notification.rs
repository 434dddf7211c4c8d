//! `Notification` — the immutable per-dispatch payload bundle.
//!
//! Grounded on `examples/original_source/postal/postal-notification.c`: a
//! notification wraps up to three protocol-specific sub-payloads plus an
//! optional `collapse_key`, and is handed unchanged to every device's
//! message builder during a single `Notify` call.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An immutable notification ready for dispatch. Built once per `Notify`
/// call and shared (by reference) across every matching device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Notification {
	/// Free-form APNs sub-payload (merged into the `aps` message builder).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub aps: Option<Value>,
	/// Free-form C2DM sub-payload (becomes `data.*` form fields).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub c2dm: Option<Value>,
	/// Free-form GCM sub-payload (becomes the GCM `data` object).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub gcm: Option<Value>,
	/// Applied uniformly across every protocol message this notification
	/// produces.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub collapse_key: Option<String>,
}

impl Notification {
	/// A JSON object's fields as a map, or an empty map if `None`/not an
	/// object — protocol message builders treat both the same way.
	#[must_use]
	pub fn fields(payload: &Option<Value>) -> serde_json::Map<String, Value> {
		payload.as_ref().and_then(Value::as_object).cloned().unwrap_or_default()
	}
}
