//! Process configuration: an `ini`-style key/value file, loaded with the
//! `config` crate and overridable from the environment under a `POSTAL_`
//! prefix.

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

/// `[mongo]` — the document-store collaborator's connection parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct MongoSettings {
	/// Connection URI.
	pub uri: String,
	/// Database name.
	pub db: String,
	/// Collection holding device documents.
	pub collection: String,
}

/// `[aps]` — APNs TLS identity and environment selection.
#[derive(Debug, Clone, Deserialize)]
pub struct ApsSettings {
	/// Apple's sandbox environment vs. production.
	#[serde(default)]
	pub sandbox: bool,
	/// Client certificate path.
	#[serde(rename = "ssl-cert-file")]
	pub ssl_cert_file: String,
	/// Client private key path.
	#[serde(rename = "ssl-key-file")]
	pub ssl_key_file: String,
}

impl ApsSettings {
	/// `gateway.push.apple.com:2195` / `gateway.sandbox.push.apple.com:2195`.
	#[must_use]
	pub fn gateway_host(&self) -> &'static str {
		if self.sandbox { "gateway.sandbox.push.apple.com:2195" } else { "gateway.push.apple.com:2195" }
	}

	/// `feedback.push.apple.com:2196` / `feedback.sandbox.push.apple.com:2196`.
	#[must_use]
	pub fn feedback_host(&self) -> &'static str {
		if self.sandbox {
			"feedback.sandbox.push.apple.com:2196"
		} else {
			"feedback.push.apple.com:2196"
		}
	}
}

/// `[c2dm]` — Google's legacy C2DM credential.
#[derive(Debug, Clone, Deserialize)]
pub struct C2dmSettings {
	/// `GoogleLogin auth=` credential.
	#[serde(rename = "auth-token")]
	pub auth_token: String,
}

/// `[gcm]` — GCM server key.
#[derive(Debug, Clone, Deserialize)]
pub struct GcmSettings {
	/// `key=` credential.
	#[serde(rename = "auth-token")]
	pub auth_token: String,
}

/// `[http]` — the HTTP surface's bind port and access-log behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpSettings {
	/// Bind port, default 5300.
	#[serde(default = "default_http_port")]
	pub port: u16,
	/// Access-log file path; `None` logs to stdout via `tracing`.
	#[serde(default)]
	pub logfile: Option<String>,
	/// Disables access logging entirely.
	#[serde(default)]
	pub nologging: bool,
}

fn default_http_port() -> u16 {
	5300
}

/// `[redis]` — the optional side-channel publisher.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
	/// Whether the side channel is wired in at all.
	#[serde(default)]
	pub enabled: bool,
	/// Redis host, required when `enabled`.
	#[serde(default)]
	pub host: Option<String>,
	/// Redis port, required when `enabled`.
	#[serde(default)]
	pub port: Option<u16>,
	/// Pub/sub channel name, default `events`.
	#[serde(default = "default_redis_channel")]
	pub channel: String,
}

fn default_redis_channel() -> String {
	"events".to_owned()
}

/// The full process configuration, one struct per `ini` section.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
	/// `[mongo]`.
	pub mongo: MongoSettings,
	/// `[aps]`.
	pub aps: ApsSettings,
	/// `[c2dm]`.
	pub c2dm: C2dmSettings,
	/// `[gcm]`.
	pub gcm: GcmSettings,
	/// `[http]`.
	pub http: HttpSettings,
	/// `[redis]`.
	#[serde(default = "default_redis_settings")]
	pub redis: RedisSettings,
}

fn default_redis_settings() -> RedisSettings {
	RedisSettings { enabled: false, host: None, port: None, channel: default_redis_channel() }
}

impl Settings {
	/// Loads `<path>` as an `ini` file, then overlays `POSTAL_SECTION_KEY`
	/// environment variables via `Environment::with_prefix`.
	pub fn load(path: &str) -> Result<Self, ConfigError> {
		Config::builder()
			.add_source(File::new(path, FileFormat::Ini))
			.add_source(Environment::with_prefix("POSTAL").separator("_"))
			.build()?
			.try_deserialize()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn aps_host_selection_follows_sandbox_flag() {
		let sandbox = ApsSettings {
			sandbox: true,
			ssl_cert_file: String::new(),
			ssl_key_file: String::new(),
		};
		assert_eq!(sandbox.gateway_host(), "gateway.sandbox.push.apple.com:2195");
		assert_eq!(sandbox.feedback_host(), "feedback.sandbox.push.apple.com:2196");

		let production = ApsSettings { sandbox: false, ..sandbox };
		assert_eq!(production.gateway_host(), "gateway.push.apple.com:2195");
	}
}
