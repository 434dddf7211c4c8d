//! `Service` — device CRUD against the store plus the dispatch pipeline.
//!
//! Grounded on `examples/original_source/postal/postal-service.c`'s
//! `Notify`/`AddDevice`/`UpdateDevice`/`RemoveDevice`/`FindDevice`/
//! `FindDevices` operations, flattened from the `NeoService`/`NeoServiceBase`
//! inheritance hierarchy into one struct.

use std::sync::Arc;

use bson::{doc, Bson, Document};
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{DeviceError, PostalError};
use crate::gateway::apns::ApnsClientConfig;
use crate::gateway::{ApnsClient, C2dmClient, GatewayClient, GcmClient, IdentityRemoved};
use crate::messages::{ApnsMessage, C2dmMessage, GcmMessage};
use crate::metrics::Metrics;
use crate::models::{Device, DeviceType, Notification, UserRef};
use crate::redis_publisher::{LifecycleAction, LifecycleEvent, Publisher};
use crate::store::{DeviceStore, UpdateOptions};

/// An outer `$or` query across the resolved target set is capped at this
/// many documents per batch.
const NOTIFY_BATCH_CAP: u64 = 100;

/// Whether `AddDevice` created a new document or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
	/// No document matched `(device_type, device_token)`; one was inserted.
	Created,
	/// A document matched; it was replaced wholesale.
	Updated,
}

impl Upserted {
	/// `true` for [`Upserted::Updated`] — the `updated_existing` flag an
	/// upsert result carries.
	#[must_use]
	pub fn updated_existing(self) -> bool {
		matches!(self, Self::Updated)
	}
}

/// Device CRUD plus the notification dispatch pipeline, composed over a
/// storage collaborator and the three gateway clients.
#[derive(Clone)]
pub struct Service {
	store: Arc<dyn DeviceStore>,
	apns: ApnsClient,
	c2dm: C2dmClient,
	gcm: GcmClient,
	metrics: Arc<Metrics>,
	publisher: Publisher,
}

impl std::fmt::Debug for Service {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Service").finish_non_exhaustive()
	}
}

impl Service {
	/// Builds a `Service`, wiring a single shared `IdentityRemoved` channel
	/// from all three gateway clients into the feedback-soft-delete task.
	#[must_use]
	pub fn new(
		store: Arc<dyn DeviceStore>,
		apns_config: ApnsClientConfig,
		http: reqwest::Client,
		c2dm_auth_token: impl Into<String>,
		gcm_auth_token: impl Into<String>,
		metrics: Arc<Metrics>,
		publisher: Publisher,
	) -> Self {
		let (tx, rx) = mpsc::unbounded_channel();
		let apns = ApnsClient::new(apns_config, tx.clone());
		let c2dm = C2dmClient::new(http.clone(), c2dm_auth_token, tx.clone());
		let gcm = GcmClient::new(http, gcm_auth_token, tx);

		let service = Self { store, apns, c2dm, gcm, metrics, publisher };
		service.spawn_feedback_wiring(rx);
		service
	}

	/// Subscribes to `rx` for the lifetime of the process: every
	/// `IdentityRemoved` becomes a bulk soft-delete. Storage failures here
	/// are logged, never propagated.
	fn spawn_feedback_wiring(&self, mut rx: mpsc::UnboundedReceiver<IdentityRemoved>) {
		let store = self.store.clone();
		let publisher = self.publisher.clone();
		tokio::spawn(async move {
			while let Some(event) = rx.recv().await {
				let query = doc! {
					"device_type": event.device_type.as_str(),
					"device_token": &event.token,
					"removed_at": Bson::Null,
				};
				let mutation = doc! { "removed_at": Bson::DateTime(bson::DateTime::now()) };
				match store.update(&query, &mutation, UpdateOptions { multi: true }).await {
					Ok(count) if count > 0 => {
						publisher.publish(LifecycleEvent {
							action: LifecycleAction::DeviceRemoved,
							device_type: event.device_type,
							device_token: event.token,
							user: String::new(),
						});
					}
					Ok(_) => {}
					Err(err) => warn!(%err, "failed to mark device removed from feedback"),
				}
			}
		});
	}

	/// Registers a device: upserts by `(device_type, device_token)`.
	pub async fn add_device(&self, device: Device) -> Result<(Upserted, Device), PostalError> {
		let query = doc! {
			"device_type": device.device_type.as_str(),
			"device_token": device.device_token.clone(),
		};
		let existing = self.store.find_one(&query).await.map_err(PostalError::Store)?;

		let mut device = device;
		let upserted = match &existing {
			Some(existing_doc) => {
				let mut replacement = device.to_bson().map_err(PostalError::Device)?;
				if let Some(created_at) = existing_doc.get("created_at") {
					replacement.insert("created_at", created_at.clone());
				}
				if let Ok(id) = existing_doc.get_object_id("_id") {
					replacement.insert("_id", id);
				}
				self.store.replace_one(&query, replacement).await.map_err(PostalError::Store)?;
				Upserted::Updated
			}
			None => {
				device.created_at = Some(OffsetDateTime::now_utc());
				let doc = device.to_bson().map_err(PostalError::Device)?;
				self.store.insert(doc).await.map_err(PostalError::Store)?;
				Upserted::Created
			}
		};

		let persisted =
			self.store.find_one(&query).await.map_err(PostalError::Store)?.ok_or(
				PostalError::Store("device vanished immediately after upsert".to_owned()),
			)?;
		let device = Device::from_bson(&persisted).map_err(PostalError::Device)?;

		match upserted {
			Upserted::Created => self.metrics.record_device_added(),
			Upserted::Updated => self.metrics.record_device_updated(),
		}
		self.publisher.publish(LifecycleEvent {
			action: match upserted {
				Upserted::Created => LifecycleAction::DeviceAdded,
				Upserted::Updated => LifecycleAction::DeviceUpdated,
			},
			device_type: device.device_type,
			device_token: device.device_token.clone(),
			user: device.user.as_str_form(),
		});

		Ok((upserted, device))
	}

	/// Updates a device: requires `id` and `user`; matched by
	/// `_id AND user AND removed_at IS NULL`; wholesale replacement.
	pub async fn update_device(&self, device: Device) -> Result<Device, PostalError> {
		let id = device.id.as_deref().ok_or(DeviceError::MissingID)?;
		let object_id =
			bson::oid::ObjectId::parse_str(id).map_err(|_| DeviceError::InvalidID)?;
		if device.user.as_str_form().is_empty() {
			return Err(DeviceError::MissingUser.into());
		}

		let query = doc! {
			"_id": object_id,
			"user": device.user.to_bson_value(),
			"removed_at": Bson::Null,
		};
		let mut replacement = device.to_bson().map_err(PostalError::Device)?;
		replacement.insert("_id", object_id);

		let replaced = self.store.replace_one(&query, replacement).await.map_err(PostalError::Store)?;
		if !replaced {
			return Err(DeviceError::NotFound.into());
		}

		let persisted = self
			.store
			.find_one(&doc! {"_id": object_id})
			.await
			.map_err(PostalError::Store)?
			.ok_or(DeviceError::NotFound)?;
		let device = Device::from_bson(&persisted).map_err(PostalError::Device)?;

		self.metrics.record_device_updated();
		self.publisher.publish(LifecycleEvent {
			action: LifecycleAction::DeviceUpdated,
			device_type: device.device_type,
			device_token: device.device_token.clone(),
			user: device.user.as_str_form(),
		});
		Ok(device)
	}

	/// Removes a device: requires `id` and `user`; soft deletes via
	/// `$set removed_at`; scoped by `_id AND user` so one user can never
	/// remove another's device.
	pub async fn remove_device(&self, id: &str, user: &str) -> Result<(), PostalError> {
		let object_id = bson::oid::ObjectId::parse_str(id).map_err(|_| DeviceError::InvalidID)?;
		let query = doc! { "_id": object_id, "user": UserRef::parse(user).to_bson_value() };
		let mutation = doc! { "removed_at": Bson::DateTime(bson::DateTime::now()) };

		let existing = self.store.find_one(&query).await.map_err(PostalError::Store)?;
		let Some(existing) = existing else {
			return Err(DeviceError::NotFound.into());
		};
		self.store
			.update(&query, &mutation, UpdateOptions { multi: false })
			.await
			.map_err(PostalError::Store)?;

		let device = Device::from_bson(&existing).map_err(PostalError::Device)?;
		self.metrics.record_device_removed();
		self.publisher.publish(LifecycleEvent {
			action: LifecycleAction::DeviceRemoved,
			device_type: device.device_type,
			device_token: device.device_token,
			user: user.to_owned(),
		});
		Ok(())
	}

	/// Finds a single device: `device` must parse as an object id.
	pub async fn find_device(&self, user: &str, device: &str) -> Result<Device, PostalError> {
		let object_id = bson::oid::ObjectId::parse_str(device).map_err(|_| DeviceError::InvalidID)?;
		let query = doc! { "_id": object_id, "user": UserRef::parse(user).to_bson_value() };
		let doc = self.store.find_one(&query).await.map_err(PostalError::Store)?;
		let doc = doc.ok_or(DeviceError::NotFound)?;
		Device::from_bson(&doc).map_err(PostalError::Device)
	}

	/// Lists a user's devices: paginated, active devices only.
	pub async fn find_devices(
		&self,
		user: &str,
		offset: u64,
		limit: u64,
	) -> Result<Vec<Device>, PostalError> {
		let query = doc! { "user": UserRef::parse(user).to_bson_value(), "removed_at": Bson::Null };
		let docs = self.store.query(&query, offset, limit).await.map_err(PostalError::Store)?;
		docs.iter().map(|doc| Device::from_bson(doc).map_err(PostalError::Device)).collect()
	}

	/// Convenience lookup keyed by `(user, device_token)` rather than the
	/// storage object id — see `DESIGN.md` for why the HTTP surface's
	/// `:device` path segment resolves devices by token, not id.
	pub async fn find_device_by_token(
		&self,
		user: &str,
		device_token: &str,
	) -> Result<Device, PostalError> {
		let query = doc! {
			"user": UserRef::parse(user).to_bson_value(),
			"device_token": device_token,
			"removed_at": Bson::Null,
		};
		let doc = self.store.find_one(&query).await.map_err(PostalError::Store)?;
		let doc = doc.ok_or(DeviceError::NotFound)?;
		Device::from_bson(&doc).map_err(PostalError::Device)
	}

	/// Upserts a device identified by `(user, device_token)` from the
	/// path and a `device_type`/extra fields body — the operation
	/// `PUT /v1/users/:user/devices/:device` drives.
	pub async fn upsert_device_by_token(
		&self,
		user: &str,
		device_token: &str,
		device_type: DeviceType,
	) -> Result<(Upserted, Device), PostalError> {
		let device = Device::new(UserRef::parse(user), device_token, device_type);
		self.add_device(device).await
	}

	/// Soft-deletes the device identified by `(user, device_token)` — the
	/// operation `DELETE /v1/users/:user/devices/:device` drives.
	pub async fn remove_device_by_token(
		&self,
		user: &str,
		device_token: &str,
	) -> Result<(), PostalError> {
		let query = doc! {
			"user": UserRef::parse(user).to_bson_value(),
			"device_token": device_token,
			"removed_at": Bson::Null,
		};
		let existing = self.store.find_one(&query).await.map_err(PostalError::Store)?;
		let Some(existing) = existing else {
			return Err(DeviceError::NotFound.into());
		};
		let mutation = doc! { "removed_at": Bson::DateTime(bson::DateTime::now()) };
		self.store
			.update(&query, &mutation, UpdateOptions { multi: false })
			.await
			.map_err(PostalError::Store)?;

		let device = Device::from_bson(&existing).map_err(PostalError::Device)?;
		self.metrics.record_device_removed();
		self.publisher.publish(LifecycleEvent {
			action: LifecycleAction::DeviceRemoved,
			device_type: device.device_type,
			device_token: device.device_token,
			user: user.to_owned(),
		});
		Ok(())
	}

	/// Dispatches a notification: resolves the target set, builds each
	/// protocol message once, and fire-and-forgets a `deliver` per matching
	/// device.
	pub async fn notify(
		&self,
		notification: &Notification,
		users: &[String],
		devices: &[String],
	) -> Result<(), PostalError> {
		let mut clauses: Vec<Document> = Vec::new();
		for user in users {
			clauses.push(doc! { "user": UserRef::parse(user).to_bson_value() });
		}
		for token in devices {
			clauses.push(doc! { "device_token": token });
		}
		if clauses.is_empty() {
			return Ok(());
		}

		let query = doc! { "removed_at": Bson::Null, "$or": clauses };
		let docs =
			self.store.query(&query, 0, NOTIFY_BATCH_CAP).await.map_err(PostalError::Store)?;

		let apns_message = Arc::new(build_apns_message(&notification.aps));
		let c2dm_message =
			Arc::new(build_c2dm_message(&notification.c2dm, notification.collapse_key.as_deref()));
		let gcm_message =
			Arc::new(build_gcm_message(&notification.gcm, notification.collapse_key.as_deref()));

		for raw in docs {
			let device = match Device::from_bson(&raw) {
				Ok(device) => device,
				Err(err) => {
					warn!(%err, "skipping malformed device document during notify");
					continue;
				}
			};

			match device.device_type {
				DeviceType::Aps => {
					spawn_deliver(self.apns.clone(), device.device_token.clone(), apns_message.clone());
				}
				DeviceType::C2dm => {
					spawn_deliver(self.c2dm.clone(), device.device_token.clone(), c2dm_message.clone());
				}
				DeviceType::Gcm => {
					spawn_deliver(self.gcm.clone(), device.device_token.clone(), gcm_message.clone());
				}
			}

			self.metrics.record_device_notified(device.device_type);
			self.publisher.publish(LifecycleEvent {
				action: LifecycleAction::DeviceNotified,
				device_type: device.device_type,
				device_token: device.device_token.clone(),
				user: device.user.as_str_form(),
			});
		}

		Ok(())
	}

	/// The `GET /status` body.
	#[must_use]
	pub fn status(&self) -> Value {
		self.metrics.status_json()
	}
}

/// Spawns one fire-and-forget delivery: the notify call completes as soon
/// as each send is enqueued.
fn spawn_deliver<C>(client: C, token: String, message: Arc<C::Message>)
where
	C: GatewayClient + Send + 'static,
	C::Message: Send + Sync + 'static,
{
	tokio::spawn(async move {
		if let Err(err) = client.deliver(&token, &message, CancellationToken::new()).await {
			warn!(%token, %err, "gateway delivery failed");
		}
	});
}

/// Recognised `aps` sub-payload keys map onto [`ApnsMessage`] setters;
/// anything else becomes an extra.
fn build_apns_message(payload: &Option<Value>) -> ApnsMessage {
	let mut message = ApnsMessage::new();
	for (key, value) in Notification::fields(payload) {
		match key.as_str() {
			"alert" => {
				if let Some(alert) = value.as_str() {
					message.set_alert(alert);
				}
			}
			"badge" => {
				if let Some(badge) = value.as_u64() {
					message.set_badge(u32::try_from(badge).unwrap_or(u32::MAX));
				}
			}
			"sound" => {
				if let Some(sound) = value.as_str() {
					message.set_sound(sound);
				}
			}
			"expires_at" => {
				if let Some(secs) = value.as_i64() {
					if let Ok(ts) = OffsetDateTime::from_unix_timestamp(secs) {
						message.set_expires_at(ts);
					}
				}
			}
			_ => {
				let _ignored = message.add_extra(key, value);
			}
		}
	}
	message
}

/// Recognised `c2dm` sub-payload keys map onto [`C2dmMessage`] setters;
/// `collapse_key` falls back to the notification-wide value when absent
/// from the sub-payload, applied uniformly across protocols.
fn build_c2dm_message(payload: &Option<Value>, collapse_key: Option<&str>) -> C2dmMessage {
	let mut message = C2dmMessage::new();
	let mut collapse_key_set = false;
	for (key, value) in Notification::fields(payload) {
		match key.as_str() {
			"collapse_key" => {
				if let Some(collapse_key) = value.as_str() {
					message.set_collapse_key(collapse_key);
					collapse_key_set = true;
				}
			}
			"delay_while_idle" => {
				if let Some(flag) = value.as_bool() {
					message.set_delay_while_idle(flag);
				}
			}
			_ => {
				message.insert_data(key, value);
			}
		}
	}
	if !collapse_key_set {
		if let Some(collapse_key) = collapse_key {
			message.set_collapse_key(collapse_key);
		}
	}
	message
}

/// Recognised `gcm` sub-payload keys map onto [`GcmMessage`] setters; same
/// `collapse_key` fallback as C2DM.
fn build_gcm_message(payload: &Option<Value>, collapse_key: Option<&str>) -> GcmMessage {
	let mut message = GcmMessage::new();
	let mut collapse_key_set = false;
	for (key, value) in Notification::fields(payload) {
		match key.as_str() {
			"collapse_key" => {
				if let Some(collapse_key) = value.as_str() {
					message.set_collapse_key(collapse_key);
					collapse_key_set = true;
				}
			}
			"delay_while_idle" => {
				if let Some(flag) = value.as_bool() {
					message.set_delay_while_idle(flag);
				}
			}
			"dry_run" => {
				if let Some(flag) = value.as_bool() {
					message.set_dry_run(flag);
				}
			}
			"time_to_live" => {
				if let Some(ttl) = value.as_u64() {
					message.set_time_to_live(u32::try_from(ttl).unwrap_or(u32::MAX));
				}
			}
			_ => {
				message.insert_data(key, value);
			}
		}
	}
	if !collapse_key_set {
		if let Some(collapse_key) = collapse_key {
			message.set_collapse_key(collapse_key);
		}
	}
	message
}

#[cfg(test)]
mod tests {
	use crate::gateway::apns::ApnsClientConfig;
	use crate::store::MemoryStore;

	use super::*;

	fn test_apns_config() -> ApnsClientConfig {
		ApnsClientConfig::default()
	}

	fn test_service() -> Service {
		Service::new(
			Arc::new(MemoryStore::new()),
			test_apns_config(),
			reqwest::Client::new(),
			"c2dm-token",
			"gcm-token",
			Arc::new(Metrics::new().unwrap()),
			Publisher::Disabled,
		)
	}

	#[tokio::test]
	async fn add_device_reports_created_then_updated() {
		let service = test_service();
		let device = Device::new(UserRef::Name("u1".to_owned()), "tok1", DeviceType::Gcm);

		let (upserted, first) = service.add_device(device.clone()).await.unwrap();
		assert_eq!(upserted, Upserted::Created);
		assert!(first.id.is_some());

		let (upserted, second) = service.add_device(device).await.unwrap();
		assert_eq!(upserted, Upserted::Updated);
		assert_eq!(second.id, first.id);
	}

	#[tokio::test]
	async fn remove_device_is_scoped_to_user() {
		let service = test_service();
		let device = Device::new(UserRef::Name("u1".to_owned()), "tok1", DeviceType::Gcm);
		let (_, persisted) = service.add_device(device).await.unwrap();
		let id = persisted.id.unwrap();

		let result = service.remove_device(&id, "u2").await;
		assert!(result.is_err());

		let devices = service.find_devices("u1", 0, 10).await.unwrap();
		assert_eq!(devices.len(), 1);

		service.remove_device(&id, "u1").await.unwrap();
		let devices = service.find_devices("u1", 0, 10).await.unwrap();
		assert!(devices.is_empty());
	}

	#[tokio::test]
	async fn find_devices_excludes_removed() {
		let service = test_service();
		let device = Device::new(UserRef::Name("u1".to_owned()), "tok1", DeviceType::Aps);
		let (_, persisted) = service.add_device(device).await.unwrap();
		service.remove_device(&persisted.id.unwrap(), "u1").await.unwrap();
		assert!(service.find_devices("u1", 0, 10).await.unwrap().is_empty());
	}

	#[test]
	fn apns_message_builder_recognises_known_keys() {
		let payload = serde_json::json!({"alert": "hi", "badge": 3, "custom": "x"});
		let message = build_apns_message(&Some(payload));
		let built = message.build();
		assert_eq!(built["aps"]["alert"], "hi");
		assert_eq!(built["aps"]["badge"], 3);
		assert_eq!(built["custom"], "x");
	}

	#[test]
	fn c2dm_message_builder_falls_back_to_notification_collapse_key() {
		let message = build_c2dm_message(&None, Some("ck"));
		let fields = message.build();
		assert!(fields.iter().any(|(k, v)| k == "collapse_key" && v == "ck"));
	}

	#[tokio::test]
	async fn notify_matches_devices_by_user_or_token() {
		let service = test_service();
		let u1 = Device::new(UserRef::Name("u1".to_owned()), "tok1", DeviceType::Gcm);
		let u2 = Device::new(UserRef::Name("u2".to_owned()), "tok2", DeviceType::Gcm);
		let u3 = Device::new(UserRef::Name("u3".to_owned()), "tok3", DeviceType::C2dm);
		service.add_device(u1).await.unwrap();
		service.add_device(u2).await.unwrap();
		service.add_device(u3).await.unwrap();

		let notification = Notification { aps: None, c2dm: None, gcm: None, collapse_key: None };
		service
			.notify(&notification, &["u1".to_owned()], &["tok3".to_owned()])
			.await
			.unwrap();

		let status = service.status();
		assert_eq!(status["devices_notified"]["gcm"], 1);
		assert_eq!(status["devices_notified"]["c2dm"], 1);
	}

	#[tokio::test]
	async fn notify_excludes_removed_devices() {
		let service = test_service();
		let device = Device::new(UserRef::Name("u1".to_owned()), "tok1", DeviceType::Gcm);
		let (_, persisted) = service.add_device(device).await.unwrap();
		service.remove_device(&persisted.id.unwrap(), "u1").await.unwrap();

		let notification = Notification { aps: None, c2dm: None, gcm: None, collapse_key: None };
		service.notify(&notification, &["u1".to_owned()], &[]).await.unwrap();

		let status = service.status();
		assert_eq!(status["devices_notified"]["gcm"], 0);
	}
}
