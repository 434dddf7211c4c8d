//! Builds the JSON body GCM's legacy HTTP endpoint expects.
//!
//! Grounded on `examples/original_source/postal/postal-gcm-message.c`: one
//! request per recipient, a `data` object carrying arbitrary payload fields,
//! and a handful of delivery-control fields alongside it. `registration_id`
//! is deliberately not a field here, for the same reason as
//! [`crate::messages::C2dmMessage`]: the builder is shared across every
//! recipient of a single notification.

use std::sync::OnceLock;

use serde_json::{json, Map, Value};

/// A builder for a single GCM JSON request body, minus the per-recipient
/// `registration_ids`.
#[derive(Debug, Clone, Default)]
pub struct GcmMessage {
	collapse_key: Option<String>,
	data: Map<String, Value>,
	delay_while_idle: bool,
	dry_run: bool,
	time_to_live: Option<u32>,
	cache: OnceLock<Value>,
}

impl GcmMessage {
	/// A fresh, empty builder.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets `collapse_key`. Invalidates the cache.
	pub fn set_collapse_key(&mut self, collapse_key: impl Into<String>) -> &mut Self {
		self.collapse_key = Some(collapse_key.into());
		self.cache = OnceLock::new();
		self
	}

	/// Inserts a `data` entry. Invalidates the cache.
	pub fn insert_data(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
		self.data.insert(key.into(), value);
		self.cache = OnceLock::new();
		self
	}

	/// Sets `delay_while_idle`. Invalidates the cache.
	pub fn set_delay_while_idle(&mut self, delay_while_idle: bool) -> &mut Self {
		self.delay_while_idle = delay_while_idle;
		self.cache = OnceLock::new();
		self
	}

	/// Sets `dry_run`. Invalidates the cache.
	pub fn set_dry_run(&mut self, dry_run: bool) -> &mut Self {
		self.dry_run = dry_run;
		self.cache = OnceLock::new();
		self
	}

	/// Sets `time_to_live` (seconds). Invalidates the cache.
	pub fn set_time_to_live(&mut self, time_to_live: u32) -> &mut Self {
		self.time_to_live = Some(time_to_live);
		self.cache = OnceLock::new();
		self
	}

	/// Builds (and caches) the shared portion of the JSON request body.
	#[must_use]
	pub fn build(&self) -> &Value {
		self.cache.get_or_init(|| {
			let mut body = Map::new();
			if let Some(collapse_key) = &self.collapse_key {
				body.insert("collapse_key".to_owned(), json!(collapse_key));
			}
			if !self.data.is_empty() {
				body.insert("data".to_owned(), Value::Object(self.data.clone()));
			}
			if self.delay_while_idle {
				body.insert("delay_while_idle".to_owned(), json!(true));
			}
			if self.dry_run {
				body.insert("dry_run".to_owned(), json!(true));
			}
			if let Some(ttl) = self.time_to_live {
				body.insert("time_to_live".to_owned(), json!(ttl));
			}
			Value::Object(body)
		})
	}

	/// Builds the full request body for a specific recipient, with
	/// `registration_ids` set to the single-element array GCM expects for a
	/// per-device send.
	#[must_use]
	pub fn build_for(&self, registration_id: &str) -> Value {
		let mut body = self.build().clone();
		if let Value::Object(map) = &mut body {
			map.insert("registration_ids".to_owned(), json!([registration_id]));
		}
		body
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn registration_id_becomes_singleton_array() {
		let msg = GcmMessage::new();
		assert_eq!(msg.build_for("reg-1")["registration_ids"], json!(["reg-1"]));
	}

	#[test]
	fn data_field_omitted_when_empty() {
		let msg = GcmMessage::new();
		assert!(msg.build().get("data").is_none());
	}

	#[test]
	fn data_field_present_when_populated() {
		let mut msg = GcmMessage::new();
		msg.insert_data("room_id", json!("!abc:example.org"));
		assert_eq!(msg.build()["data"]["room_id"], "!abc:example.org");
	}

	#[test]
	fn delivery_control_fields_omitted_by_default() {
		let msg = GcmMessage::new();
		let body = msg.build();
		assert!(body.get("delay_while_idle").is_none());
		assert!(body.get("dry_run").is_none());
		assert!(body.get("time_to_live").is_none());
	}

	#[test]
	fn builder_is_reused_across_recipients() {
		let mut msg = GcmMessage::new();
		msg.set_collapse_key("ck");
		let first = msg.build_for("reg-1");
		let second = msg.build_for("reg-2");
		assert_eq!(first["collapse_key"], second["collapse_key"]);
		assert_ne!(first["registration_ids"], second["registration_ids"]);
	}
}
