//! Error taxonomy for the dispatch subsystem.
//!
//! Domain errors (this module) are typed and kept separate from the HTTP
//! boundary's `{message, domain, code}` response body — see
//! [`crate::http::error`] for that conversion.

use std::fmt;

use thiserror::Error;

/// Errors raised by [`crate::models::device`] CRUD and codec operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
	/// `user` was empty on a save, or did not match the stored owner.
	#[error("device is missing a user")]
	MissingUser,
	/// `UpdateDevice`/`RemoveDevice` require an `id` that was not supplied.
	#[error("device is missing an id")]
	MissingID,
	/// A device-token path segment did not parse as an object id where one
	/// was required.
	#[error("device id does not parse as an object id")]
	InvalidID,
	/// The JSON document did not have the shape `LoadFromJSON` expects.
	#[error("device json is malformed")]
	InvalidJSON,
	/// No matching, active device was found.
	#[error("device not found")]
	NotFound,
	/// `device_type` was not one of `aps`, `c2dm`, `gcm`.
	#[error("unsupported device type")]
	UnsupportedType,
}

/// Errors raised by the APNs gateway/feedback client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApnsError {
	/// Apple's gateway replied with status 1.
	#[error("apns processing error")]
	ProcessingError,
	/// Apple's gateway replied with status 2.
	#[error("apns missing device token")]
	MissingDeviceToken,
	/// Apple's gateway replied with status 3.
	#[error("apns missing topic")]
	MissingTopic,
	/// Apple's gateway replied with status 4.
	#[error("apns missing payload")]
	MissingPayload,
	/// Apple's gateway replied with status 5.
	#[error("apns invalid token size")]
	InvalidTokenSize,
	/// Apple's gateway replied with status 6.
	#[error("apns invalid topic size")]
	InvalidTopicSize,
	/// Apple's gateway replied with status 7.
	#[error("apns invalid payload size")]
	InvalidPayloadSize,
	/// Apple's gateway replied with status 8 — the token is no longer valid.
	#[error("apns invalid token")]
	InvalidToken,
	/// Apple's gateway replied with an unrecognised status byte.
	#[error("apns unknown error status {0}")]
	Unknown(u8),
	/// `Deliver` was called while the client has never connected and the
	/// send could not even be enqueued (used for local framing failures).
	#[error("apns client not connected")]
	NotConnected,
	/// Internal double-connect guard.
	#[error("apns client already connected")]
	AlreadyConnected,
	/// TLS identity failed to load at startup.
	#[error("apns tls credentials unavailable: {0}")]
	TlsNotAvailable(String),
	/// The send's cancellation token fired before a terminal result arrived.
	#[error("apns send cancelled")]
	Cancelled,
}

impl ApnsError {
	/// Maps an error-frame status byte to its kind.
	#[must_use]
	pub fn from_status(status: u8) -> Self {
		match status {
			1 => Self::ProcessingError,
			2 => Self::MissingDeviceToken,
			3 => Self::MissingTopic,
			4 => Self::MissingPayload,
			5 => Self::InvalidTokenSize,
			6 => Self::InvalidTopicSize,
			7 => Self::InvalidPayloadSize,
			8 => Self::InvalidToken,
			other => Self::Unknown(other),
		}
	}
}

/// Errors raised by the C2DM HTTPS client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum C2dmError {
	/// `Error=QuotaExceeded`
	#[error("c2dm quota exceeded")]
	QuotaExceeded,
	/// `Error=DeviceQuotaExceeded`
	#[error("c2dm device quota exceeded")]
	DeviceQuotaExceeded,
	/// `Error=MissingRegistration`
	#[error("c2dm missing registration")]
	MissingRegistration,
	/// `Error=InvalidRegistration`
	#[error("c2dm invalid registration")]
	InvalidRegistration,
	/// `Error=MismatchSenderId`
	#[error("c2dm sender id mismatch")]
	MismatchSenderId,
	/// `Error=NotRegistered`
	#[error("c2dm device not registered")]
	NotRegistered,
	/// `Error=MessageTooBig`
	#[error("c2dm message too big")]
	MessageTooBig,
	/// `Error=MissingCollapseKey`
	#[error("c2dm missing collapse key")]
	MissingCollapseKey,
	/// Any other body, or a non-UTF-8 body.
	#[error("c2dm unknown response")]
	Unknown,
}

impl C2dmError {
	/// Parses the literal `Error=...` body Google's legacy C2DM endpoint
	/// returns on failure.
	#[must_use]
	pub fn parse(body: &str) -> Self {
		match body.trim() {
			"Error=QuotaExceeded" => Self::QuotaExceeded,
			"Error=DeviceQuotaExceeded" => Self::DeviceQuotaExceeded,
			"Error=MissingRegistration" => Self::MissingRegistration,
			"Error=InvalidRegistration" => Self::InvalidRegistration,
			"Error=MismatchSenderId" => Self::MismatchSenderId,
			"Error=NotRegistered" => Self::NotRegistered,
			"Error=MessageTooBig" => Self::MessageTooBig,
			"Error=MissingCollapseKey" => Self::MissingCollapseKey,
			_ => Self::Unknown,
		}
	}

	/// Whether this kind should raise `IdentityRemoved`.
	#[must_use]
	pub fn removes_identity(&self) -> bool {
		matches!(self, Self::MissingRegistration | Self::InvalidRegistration | Self::NotRegistered)
	}

	/// Maps a GCM per-recipient `error` literal, which reuses C2DM's closed
	/// vocabulary but without the `Error=` prefix, to the same kind.
	#[must_use]
	pub fn parse_gcm(error: &str) -> Self {
		Self::parse(&format!("Error={error}"))
	}
}

/// Errors raised while parsing or building request/response JSON at the
/// boundary of the dispatch pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
	/// A notify body was missing one of the required top-level fields.
	#[error("invalid payload: {0}")]
	InvalidPayload(String),
}

/// Top-level error type for the dispatch subsystem.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PostalError {
	/// Device CRUD/codec failure.
	#[error(transparent)]
	Device(#[from] DeviceError),
	/// APNs gateway failure.
	#[error(transparent)]
	Apns(#[from] ApnsError),
	/// C2DM gateway failure.
	#[error(transparent)]
	C2dm(#[from] C2dmError),
	/// GCM gateway failure; GCM reuses the same closed error vocabulary as
	/// C2DM for the two removal-triggering codes.
	#[error("gcm error: {0}")]
	Gcm(String),
	/// Malformed request body.
	#[error(transparent)]
	Request(#[from] RequestError),
	/// Storage collaborator failure (opaque — the store is an external
	/// collaborator).
	#[error("storage error: {0}")]
	Store(String),
	/// A gateway's HTTP transport failed below the protocol layer — the
	/// request never got a response to parse (connect/TLS/timeout errors
	/// from the underlying HTTP client).
	#[error("gateway transport error: {0}")]
	GatewayTransport(String),
}

/// Stable machine-readable error code, independent of the `Display` text,
/// used to drive the HTTP status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDomain {
	/// Maps to HTTP 404.
	NotFound,
	/// Maps to HTTP 400.
	BadRequest,
	/// Maps to HTTP 500.
	Internal,
}

impl fmt::Display for ErrorDomain {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Self::NotFound => "NotFound",
			Self::BadRequest => "BadRequest",
			Self::Internal => "Internal",
		};
		write!(f, "{name}")
	}
}

impl PostalError {
	/// Classifies the error per the HTTP status mapping table.
	#[must_use]
	pub fn domain(&self) -> ErrorDomain {
		match self {
			Self::Device(
				DeviceError::MissingUser
				| DeviceError::MissingID
				| DeviceError::InvalidID
				| DeviceError::NotFound,
			) => ErrorDomain::NotFound,
			Self::Device(DeviceError::InvalidJSON | DeviceError::UnsupportedType) => {
				ErrorDomain::BadRequest
			}
			Self::Request(_) => ErrorDomain::BadRequest,
			_ => ErrorDomain::Internal,
		}
	}
}
