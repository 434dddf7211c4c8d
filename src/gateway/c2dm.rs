//! `C2DMClient` — the legacy Google Cloud-to-Device Messaging HTTPS sender.

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{GatewayClient, IdentityRemoved};
use crate::error::{C2dmError, PostalError};
use crate::messages::C2dmMessage;
use crate::models::DeviceType;

const C2DM_ENDPOINT: &str = "https://android.apis.google.com/c2dm/send";

/// Sends C2DM requests over a shared `reqwest::Client`, emitting
/// [`IdentityRemoved`] for the closed set of codes C2DM uses to signal a
/// dead registration.
#[derive(Debug, Clone)]
pub struct C2dmClient {
	http: reqwest::Client,
	endpoint: String,
	auth_token: String,
	identity_removed: UnboundedSender<IdentityRemoved>,
}

impl C2dmClient {
	/// Builds a client using `auth_token` as the `GoogleLogin` credential.
	#[must_use]
	pub fn new(
		http: reqwest::Client,
		auth_token: impl Into<String>,
		identity_removed: UnboundedSender<IdentityRemoved>,
	) -> Self {
		Self { http, endpoint: C2DM_ENDPOINT.to_owned(), auth_token: auth_token.into(), identity_removed }
	}

	/// Overrides the endpoint URL — used by tests against a `wiremock`
	/// server.
	#[must_use]
	pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
		self.endpoint = endpoint.into();
		self
	}
}

#[async_trait]
impl GatewayClient for C2dmClient {
	type Message = C2dmMessage;

	async fn deliver(
		&self,
		token: &str,
		message: &C2dmMessage,
		cancel: CancellationToken,
	) -> Result<(), PostalError> {
		let form = message.build_for(token);

		let request = self
			.http
			.post(&self.endpoint)
			.header("Authorization", format!("GoogleLogin auth={}", self.auth_token))
			.form(&form)
			.send();

		let response = tokio::select! {
			result = request => result.map_err(|e| PostalError::GatewayTransport(e.to_string()))?,
			() = cancel.cancelled() => return Err(crate::error::ApnsError::Cancelled.into()),
		};

		let body = response.text().await.unwrap_or_default();
		if body.starts_with("id=") {
			debug!(%token, "c2dm delivered");
			return Ok(());
		}

		let kind = C2dmError::parse(&body);
		if kind.removes_identity() {
			let _ignored = self
				.identity_removed
				.send(IdentityRemoved { device_type: DeviceType::C2dm, token: token.to_owned() });
		}
		warn!(%token, ?kind, "c2dm delivery failed");
		Err(kind.into())
	}
}

#[cfg(test)]
mod tests {
	use wiremock::matchers::{body_string_contains, method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	use super::*;

	#[tokio::test]
	async fn success_body_is_not_an_error() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/c2dm/send"))
			.respond_with(ResponseTemplate::new(200).set_body_string("id=1234567890"))
			.mount(&server)
			.await;

		let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
		let client = C2dmClient::new(reqwest::Client::new(), "token", tx)
			.with_endpoint(format!("{}/c2dm/send", server.uri()));

		let message = C2dmMessage::new();
		let result = client.deliver("reg-1", &message, CancellationToken::new()).await;
		assert!(result.is_ok());
	}

	#[tokio::test]
	async fn not_registered_emits_identity_removed() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/c2dm/send"))
			.and(body_string_contains("registration_id=reg-1"))
			.respond_with(ResponseTemplate::new(200).set_body_string("Error=NotRegistered"))
			.mount(&server)
			.await;

		let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
		let client = C2dmClient::new(reqwest::Client::new(), "token", tx)
			.with_endpoint(format!("{}/c2dm/send", server.uri()));

		let message = C2dmMessage::new();
		let result = client.deliver("reg-1", &message, CancellationToken::new()).await;
		assert!(result.is_err());
		let removed = rx.recv().await.unwrap();
		assert_eq!(removed.token, "reg-1");
	}

	#[tokio::test]
	async fn quota_exceeded_does_not_emit_identity_removed() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/c2dm/send"))
			.respond_with(ResponseTemplate::new(200).set_body_string("Error=QuotaExceeded"))
			.mount(&server)
			.await;

		let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
		let client = C2dmClient::new(reqwest::Client::new(), "token", tx)
			.with_endpoint(format!("{}/c2dm/send", server.uri()));

		let message = C2dmMessage::new();
		let _ignored = client.deliver("reg-1", &message, CancellationToken::new()).await;
		assert!(rx.try_recv().is_err());
	}
}
