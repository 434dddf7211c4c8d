//! Builds the form-encoded body C2DM's legacy HTTP endpoint expects.
//!
//! Grounded on `examples/original_source/postal/postal-c2dm-message.c`: a
//! fixed set of top-level fields plus an arbitrary `data` map, each entry of
//! which becomes a `data.<key>` form field (preserving insertion order, since
//! the original emits fields in the order they were added). `registration_id`
//! is deliberately not a field here — the builder is constructed once per
//! notification and reused across recipients; the gateway client supplies
//! `registration_id` per recipient at `Deliver` time.

use std::sync::OnceLock;

use indexmap::IndexMap;
use serde_json::Value;

/// A builder for a single C2DM form-encoded request body, minus the
/// per-recipient `registration_id`.
#[derive(Debug, Clone, Default)]
pub struct C2dmMessage {
	collapse_key: Option<String>,
	delay_while_idle: bool,
	data: IndexMap<String, Value>,
	cache: OnceLock<Vec<(String, String)>>,
}

impl C2dmMessage {
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

	/// Sets `delay_while_idle`. Invalidates the cache.
	pub fn set_delay_while_idle(&mut self, delay_while_idle: bool) -> &mut Self {
		self.delay_while_idle = delay_while_idle;
		self.cache = OnceLock::new();
		self
	}

	/// Inserts (or overwrites, preserving original position) a `data` entry.
	/// Invalidates the cache.
	pub fn insert_data(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
		self.data.insert(key.into(), value);
		self.cache = OnceLock::new();
		self
	}

	/// Builds (and caches) the ordered `(field, value)` pairs, excluding
	/// `registration_id`.
	#[must_use]
	pub fn build(&self) -> &[(String, String)] {
		self.cache.get_or_init(|| {
			let mut fields = Vec::new();
			if let Some(collapse_key) = &self.collapse_key {
				fields.push(("collapse_key".to_owned(), collapse_key.clone()));
			}
			if self.delay_while_idle {
				fields.push(("delay_while_idle".to_owned(), "1".to_owned()));
			}
			for (key, value) in &self.data {
				let rendered = match value {
					Value::String(s) => s.clone(),
					other => other.to_string(),
				};
				fields.push((format!("data.{key}"), rendered));
			}
			fields
		})
	}

	/// Builds the full form body for a specific recipient, with
	/// `registration_id` prepended.
	#[must_use]
	pub fn build_for(&self, registration_id: &str) -> Vec<(String, String)> {
		let mut fields = vec![("registration_id".to_owned(), registration_id.to_owned())];
		fields.extend(self.build().iter().cloned());
		fields
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn build_for_puts_registration_id_first() {
		let msg = C2dmMessage::new();
		let fields = msg.build_for("reg-1");
		assert_eq!(fields[0], ("registration_id".to_owned(), "reg-1".to_owned()));
	}

	#[test]
	fn data_fields_are_prefixed_and_ordered() {
		let mut msg = C2dmMessage::new();
		msg.insert_data("b", Value::String("2".to_owned()));
		msg.insert_data("a", Value::String("1".to_owned()));
		let fields = msg.build();
		assert_eq!(fields[0], ("data.b".to_owned(), "2".to_owned()));
		assert_eq!(fields[1], ("data.a".to_owned(), "1".to_owned()));
	}

	#[test]
	fn delay_while_idle_omitted_when_false() {
		let msg = C2dmMessage::new();
		assert!(msg.build().iter().all(|(k, _)| k != "delay_while_idle"));
	}

	#[test]
	fn builder_is_reused_across_recipients() {
		let mut msg = C2dmMessage::new();
		msg.set_collapse_key("ck");
		let first = msg.build_for("reg-1");
		let second = msg.build_for("reg-2");
		assert_eq!(first[0].1, "reg-1");
		assert_eq!(second[0].1, "reg-2");
		assert_eq!(first[1..], second[1..]);
	}
}
