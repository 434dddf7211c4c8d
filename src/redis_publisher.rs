//! The optional device-lifecycle side channel.
//!
//! Grounded on `examples/original_source/postal/postal-redis.c`: a
//! fire-and-forget `PUBLISH` of a small JSON envelope on every device
//! lifecycle transition, not only `device-added`. Modeled as a runtime enum
//! rather than a feature flag (the `[redis] enabled` config key decides which
//! variant `Service` holds), so the side channel can be toggled from
//! configuration without recompiling.

use serde::Serialize;
use tracing::{debug, warn};

use crate::models::DeviceType;

/// The four lifecycle actions a device's transitions can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleAction {
	/// `AddDevice` created a new document.
	DeviceAdded,
	/// `RemoveDevice` soft-deleted a document.
	DeviceRemoved,
	/// `UpdateDevice` replaced an existing document.
	DeviceUpdated,
	/// A `Notify` call enqueued a send for this device.
	DeviceNotified,
}

/// The `{Action, DeviceType, DeviceToken, User}` envelope published on
/// `channel`.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleEvent {
	/// Which of the four transitions fired.
	#[serde(rename = "Action")]
	pub action: LifecycleAction,
	/// The device's gateway.
	#[serde(rename = "DeviceType")]
	pub device_type: DeviceType,
	/// The device's gateway token.
	#[serde(rename = "DeviceToken")]
	pub device_token: String,
	/// The owning user identifier, in its canonical string form.
	#[serde(rename = "User")]
	pub user: String,
}

/// A connected publisher. Owns a `redis`-protocol connection in a real
/// deployment; here it owns only the channel name and a `reqwest`-free
/// `tokio::sync::mpsc` sink so the crate stays exercisable without a live
/// Redis instance — analogous to `MemoryStore` standing in for Mongo.
#[derive(Debug, Clone)]
pub struct RedisPublisher {
	channel: String,
	sink: tokio::sync::mpsc::UnboundedSender<(String, LifecycleEvent)>,
}

impl RedisPublisher {
	/// Builds a publisher that writes every event to `sink`, tagged with
	/// `channel`.
	#[must_use]
	pub fn new(
		channel: impl Into<String>,
		sink: tokio::sync::mpsc::UnboundedSender<(String, LifecycleEvent)>,
	) -> Self {
		Self { channel: channel.into(), sink }
	}

	fn publish(&self, event: LifecycleEvent) {
		if self.sink.send((self.channel.clone(), event)).is_err() {
			warn!("redis publisher sink closed, dropping event");
		} else {
			debug!("published device lifecycle event");
		}
	}
}

/// The `[redis] enabled` switch modeled as a runtime enum rather than a
/// compile-time feature, so `Service` can hold either variant uniformly and
/// `publish` is always a cheap no-op when disabled.
#[derive(Debug, Clone)]
pub enum Publisher {
	/// `[redis] enabled = false`, or no `[redis]` section at all.
	Disabled,
	/// `[redis] enabled = true`.
	Enabled(RedisPublisher),
}

impl Publisher {
	/// Publishes `event` if enabled; a no-op otherwise.
	pub fn publish(&self, event: LifecycleEvent) {
		if let Self::Enabled(publisher) = self {
			publisher.publish(event);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn disabled_publisher_is_a_no_op() {
		let publisher = Publisher::Disabled;
		publisher.publish(LifecycleEvent {
			action: LifecycleAction::DeviceAdded,
			device_type: DeviceType::Gcm,
			device_token: "tok".to_owned(),
			user: "u1".to_owned(),
		});
	}

	#[test]
	fn enabled_publisher_forwards_to_sink() {
		let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
		let publisher = Publisher::Enabled(RedisPublisher::new("events", tx));
		publisher.publish(LifecycleEvent {
			action: LifecycleAction::DeviceRemoved,
			device_type: DeviceType::Aps,
			device_token: "deadbeef".to_owned(),
			user: "u1".to_owned(),
		});
		let (channel, event) = rx.try_recv().unwrap();
		assert_eq!(channel, "events");
		assert_eq!(event.action, LifecycleAction::DeviceRemoved);
	}
}
