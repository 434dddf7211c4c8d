//! Builds the JSON payload APNs expects for the enhanced binary protocol.
//!
//! Grounded on `examples/original_source/push-glib/push-aps-message.c`:
//! `alert`/`badge`/`sound` sit under a top-level `aps` object, arbitrary
//! `extras` sit at the top level, and `aps` itself is a reserved extras key.

use std::sync::OnceLock;

use serde_json::{json, Map, Value};
use time::OffsetDateTime;

/// Error returned when an extras key collides with the reserved `aps` key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("\"aps\" is a reserved extras key")]
pub struct ReservedKey;

/// A builder for a single APNs JSON payload. Setters invalidate the cached
/// serialized form: the builder caches the serialized JSON and invalidates
/// it on mutation.
#[derive(Debug, Clone, Default)]
pub struct ApnsMessage {
	alert: Option<String>,
	badge: Option<u32>,
	sound: Option<String>,
	expires_at: Option<OffsetDateTime>,
	extras: Map<String, Value>,
	cache: OnceLock<Value>,
}

impl ApnsMessage {
	/// A fresh, empty builder.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the `alert` text. Invalidates the cache.
	pub fn set_alert(&mut self, alert: impl Into<String>) -> &mut Self {
		self.alert = Some(alert.into());
		self.cache = OnceLock::new();
		self
	}

	/// Explicitly sets `badge`. Invalidates the cache.
	pub fn set_badge(&mut self, badge: u32) -> &mut Self {
		self.badge = Some(badge);
		self.cache = OnceLock::new();
		self
	}

	/// Sets the `sound` name. Invalidates the cache.
	pub fn set_sound(&mut self, sound: impl Into<String>) -> &mut Self {
		self.sound = Some(sound.into());
		self.cache = OnceLock::new();
		self
	}

	/// Sets the expiry timestamp encoded in the wire frame. Invalidates the
	/// cache.
	pub fn set_expires_at(&mut self, expires_at: OffsetDateTime) -> &mut Self {
		self.expires_at = Some(expires_at);
		self.cache = OnceLock::new();
		self
	}

	/// The expiry timestamp set via [`Self::set_expires_at`], if any.
	#[must_use]
	pub fn expires_at(&self) -> Option<OffsetDateTime> {
		self.expires_at
	}

	/// Adds a top-level extras entry. Rejects the reserved `aps` key.
	///
	/// # Errors
	///
	/// Returns [`ReservedKey`] if `key == "aps"`.
	pub fn add_extra(&mut self, key: impl Into<String>, value: Value) -> Result<&mut Self, ReservedKey> {
		let key = key.into();
		if key == "aps" {
			return Err(ReservedKey);
		}
		self.extras.insert(key, value);
		self.cache = OnceLock::new();
		Ok(self)
	}

	/// Whether `badge` would be emitted: explicitly set, or neither `alert`
	/// nor `sound` is set. This preserves the observed source behavior.
	#[must_use]
	pub fn emits_badge(&self) -> bool {
		self.badge.is_some() || (self.alert.is_none() && self.sound.is_none())
	}

	/// Builds (and caches) the JSON payload.
	#[must_use]
	pub fn build(&self) -> &Value {
		self.cache.get_or_init(|| {
			let mut aps = Map::new();
			if let Some(alert) = &self.alert {
				aps.insert("alert".to_owned(), json!(alert));
			}
			if let Some(sound) = &self.sound {
				aps.insert("sound".to_owned(), json!(sound));
			}
			if self.emits_badge() {
				aps.insert("badge".to_owned(), json!(self.badge.unwrap_or(0)));
			}

			let mut top = self.extras.clone();
			top.insert("aps".to_owned(), Value::Object(aps));
			Value::Object(top)
		})
	}

	/// Serializes [`Self::build`] to a compact JSON byte string, the form
	/// written into the wire frame's payload section.
	#[must_use]
	pub fn build_bytes(&self) -> Vec<u8> {
		serde_json::to_vec(self.build()).unwrap_or_default()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn badge_emitted_when_neither_alert_nor_sound_set() {
		let msg = ApnsMessage::new();
		assert!(msg.emits_badge());
		assert_eq!(msg.build()["aps"]["badge"], 0);
	}

	#[test]
	fn badge_suppressed_when_alert_set_and_badge_unset() {
		let mut msg = ApnsMessage::new();
		msg.set_alert("hi");
		assert!(!msg.emits_badge());
		assert!(msg.build()["aps"].get("badge").is_none());
	}

	#[test]
	fn badge_emitted_when_explicitly_set_alongside_alert() {
		let mut msg = ApnsMessage::new();
		msg.set_alert("hi");
		msg.set_badge(4);
		assert_eq!(msg.build()["aps"]["badge"], 4);
	}

	#[test]
	fn extras_rejects_aps_key() {
		let mut msg = ApnsMessage::new();
		assert!(msg.add_extra("aps", json!({})).is_err());
	}

	#[test]
	fn extras_land_at_top_level() {
		let mut msg = ApnsMessage::new();
		msg.add_extra("room_id", json!("!abc:example.org")).unwrap();
		assert_eq!(msg.build()["room_id"], "!abc:example.org");
	}
}
