//! `GCMClient` — the Google Cloud Messaging HTTPS JSON sender.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{GatewayClient, IdentityRemoved};
use crate::error::{C2dmError, PostalError};
use crate::messages::GcmMessage;
use crate::models::DeviceType;

const GCM_ENDPOINT: &str = "https://android.googleapis.com/gcm/send";

#[derive(Debug, Deserialize)]
struct GcmResponse {
	#[serde(default)]
	results: Vec<GcmResult>,
}

#[derive(Debug, Deserialize)]
struct GcmResult {
	#[serde(default)]
	error: Option<String>,
	/// A new registration id GCM wants the caller to migrate to. Parsed but
	/// not acted on.
	#[serde(default)]
	registration_id: Option<String>,
}

/// Sends GCM requests over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct GcmClient {
	http: reqwest::Client,
	endpoint: String,
	auth_token: String,
	identity_removed: UnboundedSender<IdentityRemoved>,
}

impl GcmClient {
	/// Builds a client using `auth_token` as the GCM server key.
	#[must_use]
	pub fn new(
		http: reqwest::Client,
		auth_token: impl Into<String>,
		identity_removed: UnboundedSender<IdentityRemoved>,
	) -> Self {
		Self { http, endpoint: GCM_ENDPOINT.to_owned(), auth_token: auth_token.into(), identity_removed }
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
impl GatewayClient for GcmClient {
	type Message = GcmMessage;

	async fn deliver(
		&self,
		token: &str,
		message: &GcmMessage,
		cancel: CancellationToken,
	) -> Result<(), PostalError> {
		let body = message.build_for(token);

		let request = self
			.http
			.post(&self.endpoint)
			.header("Authorization", format!("key={}", self.auth_token))
			.json(&body)
			.send();

		let response = tokio::select! {
			result = request => result.map_err(|e| PostalError::GatewayTransport(e.to_string()))?,
			() = cancel.cancelled() => return Err(crate::error::ApnsError::Cancelled.into()),
		};

		let parsed: GcmResponse = response
			.json()
			.await
			.map_err(|e| PostalError::Gcm(format!("malformed gcm response: {e}")))?;

		let Some(result) = parsed.results.into_iter().next() else {
			return Err(PostalError::Gcm("gcm response had no results".to_owned()));
		};

		if let Some(new_id) = result.registration_id {
			debug!(%token, %new_id, "gcm requested registration_id migration (deferred)");
		}

		match result.error {
			None => {
				debug!(%token, "gcm delivered");
				Ok(())
			}
			Some(error) => {
				let kind = C2dmError::parse_gcm(&error);
				if kind.removes_identity() {
					let _ignored = self.identity_removed.send(IdentityRemoved {
						device_type: DeviceType::Gcm,
						token: token.to_owned(),
					});
				}
				warn!(%token, %error, "gcm delivery failed");
				Err(PostalError::Gcm(error))
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use wiremock::matchers::{method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	use super::*;

	#[tokio::test]
	async fn success_result_is_ok() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/gcm/send"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"results": [{"message_id": "1"}]
			})))
			.mount(&server)
			.await;

		let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
		let client = GcmClient::new(reqwest::Client::new(), "key", tx)
			.with_endpoint(format!("{}/gcm/send", server.uri()));

		let message = GcmMessage::new();
		let result = client.deliver("reg-1", &message, CancellationToken::new()).await;
		assert!(result.is_ok());
	}

	#[tokio::test]
	async fn not_registered_emits_identity_removed() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/gcm/send"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"results": [{"error": "NotRegistered"}]
			})))
			.mount(&server)
			.await;

		let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
		let client = GcmClient::new(reqwest::Client::new(), "key", tx)
			.with_endpoint(format!("{}/gcm/send", server.uri()));

		let message = GcmMessage::new();
		let result = client.deliver("reg-1", &message, CancellationToken::new()).await;
		assert!(result.is_err());
		let removed = rx.recv().await.unwrap();
		assert_eq!(removed.token, "reg-1");
	}
}
