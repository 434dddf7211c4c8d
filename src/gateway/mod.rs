//! Gateway clients: the protocol-specific senders `Service` dispatches to.
//!
//! A small trait behind each sender so the connection/HTTP machinery can be
//! swapped for a mock in tests, plus a shared `IdentityRemoved` signal
//! standing in for the callback/slot Apple's own libraries use for the same
//! notification.

pub mod apns;
pub mod c2dm;
pub mod gcm;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::error::PostalError;
use crate::models::DeviceType;

/// A byte stream a gateway client can speak TLS/HTTP over. Implemented
/// directly by `tokio_rustls::client::TlsStream<TcpStream>`; tests
/// substitute an in-memory duplex pair.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Raised when a gateway authoritatively reports that a token is no longer
/// deliverable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRemoved {
	/// Which gateway raised the event.
	pub device_type: DeviceType,
	/// The no-longer-valid token (lowercase hex for APNs, opaque otherwise).
	pub token: String,
}

/// Shared interface the three gateway clients implement; polymorphism here
/// is scoped to just the three gateway clients, not the whole crate.
#[async_trait]
pub trait GatewayClient: Send + Sync {
	/// Protocol-specific message type this client's `deliver` accepts.
	type Message: Send + Sync;

	/// Sends `message` to `token`, completing once the send has been
	/// durably enqueued (APNs) or the HTTP response has been parsed
	/// (C2DM/GCM). Cancellation fails the completion with
	/// [`crate::error::ApnsError::Cancelled`] for APNs; HTTP clients treat
	/// cancellation as a plain future drop.
	async fn deliver(
		&self,
		token: &str,
		message: &Self::Message,
		cancel: CancellationToken,
	) -> Result<(), PostalError>;
}

pub use apns::ApnsClient;
pub use c2dm::C2dmClient;
pub use gcm::GcmClient;
