//! `Device` — a registered push-notification endpoint.
//!
//! Grounded on `examples/original_source/postal/postal-device.c`
//! (`postal_device_save_to_bson`/`postal_device_load_from_json`), with the
//! public JSON form following the `a2`/`firebase-cm` device-shape
//! conventions.

use bson::oid::ObjectId;
use bson::{doc, Bson, Document};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::DeviceError;

/// The three upstream gateways a device can be registered against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
	/// Apple Push Notification service.
	Aps,
	/// Google's legacy Cloud-to-Device Messaging.
	C2dm,
	/// Google Cloud Messaging.
	Gcm,
}

impl DeviceType {
	/// The wire literal used in JSON/BSON documents.
	#[must_use]
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Aps => "aps",
			Self::C2dm => "c2dm",
			Self::Gcm => "gcm",
		}
	}

	/// Parses the wire literal, rejecting anything outside the closed set
	/// with `UnsupportedType`.
	pub fn parse(s: &str) -> Result<Self, DeviceError> {
		match s {
			"aps" => Ok(Self::Aps),
			"c2dm" => Ok(Self::C2dm),
			"gcm" => Ok(Self::Gcm),
			_ => Err(DeviceError::UnsupportedType),
		}
	}
}

/// The dual encoding a `user` identifier may take: an object id when the
/// string happens to parse as one, otherwise an opaque string. Every store
/// query has to match whichever encoding was used when the device was
/// stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserRef {
	/// `user` parsed as a 12-byte Mongo-style object id.
	Id(ObjectId),
	/// `user` did not parse as an object id; kept as an opaque string.
	Name(String),
}

impl UserRef {
	/// Parses `s`, preferring the object-id interpretation: when `user`
	/// parses as an object id it is matched as one; otherwise as a plain
	/// string.
	#[must_use]
	pub fn parse(s: &str) -> Self {
		match ObjectId::parse_str(s) {
			Ok(id) => Self::Id(id),
			Err(_) => Self::Name(s.to_owned()),
		}
	}

	/// The canonical string form, used for JSON output and equality checks
	/// against caller-supplied user identifiers.
	#[must_use]
	pub fn as_str_form(&self) -> String {
		match self {
			Self::Id(id) => id.to_hex(),
			Self::Name(name) => name.clone(),
		}
	}

	fn is_empty(&self) -> bool {
		matches!(self, Self::Name(name) if name.is_empty())
	}

	fn to_bson(&self) -> Bson {
		self.to_bson_value()
	}

	/// The BSON value used for `user` in store queries and documents: an
	/// object id or a string, matching whichever this was parsed as.
	#[must_use]
	pub fn to_bson_value(&self) -> Bson {
		match self {
			Self::Id(id) => Bson::ObjectId(*id),
			Self::Name(name) => Bson::String(name.clone()),
		}
	}
}

impl Serialize for UserRef {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_str(&self.as_str_form())
	}
}

impl<'de> Deserialize<'de> for UserRef {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		Ok(Self::parse(&s))
	}
}

/// A registered device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
	/// Storage-assigned identifier; `None` until first persisted.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	/// Owning user; required, dual-encoded (see [`UserRef`]).
	pub user: UserRef,
	/// Gateway-specific token: hex for APNs, opaque for GCM/C2DM.
	pub device_token: String,
	/// Which upstream gateway this device is registered against.
	pub device_type: DeviceType,
	/// Soft-delete marker; `None`/`null` means active.
	#[serde(with = "time::serde::rfc3339::option")]
	pub removed_at: Option<OffsetDateTime>,
	/// Set on first persist.
	#[serde(skip_serializing_if = "Option::is_none", with = "time_created_at")]
	pub created_at: Option<OffsetDateTime>,
}

/// Helper module so `#[serde(with = ...)]` can apply RFC3339 encoding to an
/// `Option<OffsetDateTime>` field that is also independently gated by
/// `skip_serializing_if`.
mod time_created_at {
	use serde::{Deserializer, Serializer};
	use time::OffsetDateTime;

	pub fn serialize<S: Serializer>(
		value: &Option<OffsetDateTime>,
		serializer: S,
	) -> Result<S::Ok, S::Error> {
		time::serde::rfc3339::option::serialize(value, serializer)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(
		deserializer: D,
	) -> Result<Option<OffsetDateTime>, D::Error> {
		time::serde::rfc3339::option::deserialize(deserializer)
	}
}

/// Converts to the millisecond-precision BSON `DateTime`, avoiding a
/// dependency on `bson`'s optional `time` interop feature.
fn offset_to_bson_datetime(ts: OffsetDateTime) -> bson::DateTime {
	let millis = ts.unix_timestamp() * 1000 + i64::from(ts.millisecond());
	bson::DateTime::from_millis(millis)
}

/// Inverse of [`offset_to_bson_datetime`].
fn bson_datetime_to_offset(dt: &bson::DateTime) -> OffsetDateTime {
	let nanos = i128::from(dt.timestamp_millis()) * 1_000_000;
	OffsetDateTime::from_unix_timestamp_nanos(nanos).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

impl Device {
	/// Builds a not-yet-persisted device. `device_token`/`device_type` are
	/// required non-empty at persist time; `user` is required non-empty.
	#[must_use]
	pub fn new(user: UserRef, device_token: impl Into<String>, device_type: DeviceType) -> Self {
		Self {
			id: None,
			user,
			device_token: device_token.into(),
			device_type,
			removed_at: None,
			created_at: None,
		}
	}

	/// A device is active exactly when `removed_at` is null.
	#[must_use]
	pub fn is_active(&self) -> bool {
		self.removed_at.is_none()
	}

	/// Serializes this device to BSON. Refuses with `MissingUser` if `user`
	/// is empty; always emits a `removed_at` field (null if unset); does
	/// not emit `_id` — the storage layer attaches that on first persist.
	pub fn to_bson(&self) -> Result<Document, DeviceError> {
		if self.user.is_empty() {
			return Err(DeviceError::MissingUser);
		}
		if self.device_token.is_empty() || self.device_type.as_str().is_empty() {
			return Err(DeviceError::MissingUser);
		}

		let removed_at = match self.removed_at {
			Some(ts) => Bson::DateTime(offset_to_bson_datetime(ts)),
			None => Bson::Null,
		};
		let created_at = match self.created_at {
			Some(ts) => Bson::DateTime(offset_to_bson_datetime(ts)),
			None => Bson::Null,
		};

		Ok(doc! {
			"device_token": &self.device_token,
			"device_type": self.device_type.as_str(),
			"user": self.user.to_bson(),
			"removed_at": removed_at,
			"created_at": created_at,
		})
	}

	/// Rehydrates a `Device` from a stored BSON document, preserving the
	/// `user` dual encoding exactly as stored.
	pub fn from_bson(doc: &Document) -> Result<Self, DeviceError> {
		let id = doc.get_object_id("_id").ok().map(|id| id.to_hex());

		let device_token =
			doc.get_str("device_token").map_err(|_| DeviceError::InvalidJSON)?.to_owned();
		let device_type = DeviceType::parse(
			doc.get_str("device_type").map_err(|_| DeviceError::InvalidJSON)?,
		)?;
		let user = match doc.get("user") {
			Some(Bson::ObjectId(id)) => UserRef::Id(*id),
			Some(Bson::String(s)) => UserRef::Name(s.clone()),
			_ => return Err(DeviceError::MissingUser),
		};
		let removed_at =
			doc.get("removed_at").and_then(|b| b.as_datetime()).map(bson_datetime_to_offset);
		let created_at =
			doc.get("created_at").and_then(|b| b.as_datetime()).map(bson_datetime_to_offset);

		Ok(Self { id, user, device_token, device_type, removed_at, created_at })
	}

	/// Parses a `Device` from a JSON body: requires string `device_token`
	/// and `device_type`; `device_type` must be one of the three literals.
	pub fn from_json(value: &serde_json::Value) -> Result<Self, DeviceError> {
		let obj = value.as_object().ok_or(DeviceError::InvalidJSON)?;

		let device_token =
			obj.get("device_token").and_then(|v| v.as_str()).ok_or(DeviceError::InvalidJSON)?;
		let device_type_str =
			obj.get("device_type").and_then(|v| v.as_str()).ok_or(DeviceError::InvalidJSON)?;
		let device_type = DeviceType::parse(device_type_str)?;

		let user = match obj.get("user").and_then(|v| v.as_str()) {
			Some(s) => UserRef::parse(s),
			None => UserRef::Name(String::new()),
		};

		Ok(Self::new(user, device_token, device_type))
	}

	/// Serializes the four externally visible fields (`user`,
	/// `device_token`, `device_type`, `removed_at`), with JSON `null` for an
	/// unset `removed_at`.
	#[must_use]
	pub fn to_json(&self) -> serde_json::Value {
		serde_json::json!({
			"user": self.user.as_str_form(),
			"device_token": self.device_token,
			"device_type": self.device_type.as_str(),
			"removed_at": self.removed_at.map(|ts| ts.format(&time::format_description::well_known::Rfc3339).unwrap_or_default()),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn save_to_bson_rejects_missing_user() {
		let device = Device::new(UserRef::Name(String::new()), "tok", DeviceType::Gcm);
		assert_eq!(device.to_bson().unwrap_err(), DeviceError::MissingUser);
	}

	#[test]
	fn bson_round_trip_preserves_object_id_user() {
		let oid = ObjectId::new();
		let device = Device::new(UserRef::Id(oid), "deadbeef", DeviceType::Aps);
		let doc = device.to_bson().unwrap();
		let loaded = Device::from_bson(&doc).unwrap();
		assert_eq!(loaded.user, UserRef::Id(oid));
	}

	#[test]
	fn bson_round_trip_preserves_string_user() {
		let device = Device::new(UserRef::Name("@alice:example.org".to_owned()), "tok", DeviceType::C2dm);
		let doc = device.to_bson().unwrap();
		let loaded = Device::from_bson(&doc).unwrap();
		assert_eq!(loaded.user, UserRef::Name("@alice:example.org".to_owned()));
	}

	#[test]
	fn load_from_json_rejects_bad_type() {
		let value = serde_json::json!({"device_token": "tok", "device_type": "windows"});
		assert_eq!(Device::from_json(&value).unwrap_err(), DeviceError::UnsupportedType);
	}

	#[test]
	fn load_from_json_rejects_malformed() {
		let value = serde_json::json!(["not", "an", "object"]);
		assert_eq!(Device::from_json(&value).unwrap_err(), DeviceError::InvalidJSON);
	}

	#[test]
	fn save_to_json_has_null_removed_at_when_active() {
		let device = Device::new(UserRef::Name("u1".to_owned()), "tok", DeviceType::Gcm);
		let json = device.to_json();
		assert!(json["removed_at"].is_null());
		assert_eq!(json["device_token"], "tok");
		assert_eq!(json["device_type"], "gcm");
		assert_eq!(json["user"], "u1");
	}
}
