//! Binary entry point: loads configuration, wires the storage/gateway
//! collaborators into a [`postal::service::Service`], and serves the HTTP
//! surface with `axum::serve`.

use std::io::BufReader;
use std::sync::Arc;

use color_eyre::eyre::{eyre, Context, Result};
use postal::gateway::apns::{ApnsClientConfig, TlsApnsConnector};
use postal::http::AppState;
use postal::metrics::Metrics;
use postal::redis_publisher::{Publisher, RedisPublisher};
use postal::service::Service;
use postal::settings::{ApsSettings, Settings};
use postal::store::{DeviceStore, MemoryStore};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;
	tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
	let _ignored = rustls::crypto::ring::default_provider().install_default();

	let config_path = std::env::args().nth(1).unwrap_or_else(|| "postal.ini".to_owned());
	let settings = Settings::load(&config_path)
		.wrap_err_with(|| format!("loading configuration from {config_path}"))?;

	let apns_config = build_apns_config(&settings.aps)?;

	// The document store is treated as an external collaborator behind
	// `DeviceStore`; no Mongo driver is grounded anywhere in the example
	// pack, so the in-process store stands in for it here (see DESIGN.md).
	let store: Arc<dyn DeviceStore> = Arc::new(MemoryStore::new());
	let metrics = Arc::new(Metrics::new().map_err(|err| eyre!("registering metrics: {err}"))?);
	let publisher = build_publisher(&settings);
	let http_client = reqwest::Client::new();

	let service = Arc::new(Service::new(
		store,
		apns_config,
		http_client,
		settings.c2dm.auth_token.clone(),
		settings.gcm.auth_token.clone(),
		metrics.clone(),
		publisher,
	));

	let app = postal::http::build_app(AppState::new(service, metrics));

	let addr = format!("0.0.0.0:{}", settings.http.port);
	let listener = tokio::net::TcpListener::bind(&addr).await.wrap_err("binding HTTP listener")?;
	info!(%addr, "postal listening");
	axum::serve(listener, app).await.wrap_err("serving HTTP")?;

	Ok(())
}

fn build_publisher(settings: &Settings) -> Publisher {
	if !settings.redis.enabled {
		return Publisher::Disabled;
	}
	// The `redis` crate itself is a further collaborator this crate does
	// not depend on (ungrounded in the example pack); the channel sink
	// lets a real connection be plugged in without touching `Service`.
	let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
	tokio::spawn(async move { while rx.recv().await.is_some() {} });
	Publisher::Enabled(RedisPublisher::new(settings.redis.channel.clone(), tx))
}

fn build_apns_config(aps: &ApsSettings) -> Result<ApnsClientConfig> {
	let tls_config = Arc::new(load_client_tls_config(aps)?);

	let gateway_host = aps.gateway_host();
	let feedback_host = aps.feedback_host();
	let (gateway_host, gateway_port) = split_host_port(gateway_host)?;
	let (feedback_host, feedback_port) = split_host_port(feedback_host)?;

	Ok(ApnsClientConfig {
		gateway: Arc::new(TlsApnsConnector::new(gateway_host, gateway_port, tls_config.clone())),
		feedback: Arc::new(TlsApnsConnector::new(feedback_host, feedback_port, tls_config)),
		..ApnsClientConfig::default()
	})
}

fn split_host_port(host_port: &str) -> Result<(String, u16)> {
	let (host, port) =
		host_port.rsplit_once(':').ok_or_else(|| eyre!("malformed apns host {host_port}"))?;
	let port: u16 = port.parse().wrap_err_with(|| format!("parsing apns port in {host_port}"))?;
	Ok((host.to_owned(), port))
}

fn load_client_tls_config(aps: &ApsSettings) -> Result<ClientConfig> {
	let mut root_store = RootCertStore::empty();
	root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

	let cert_chain = load_certs(&aps.ssl_cert_file)?;
	let key = load_private_key(&aps.ssl_key_file)?;

	ClientConfig::builder()
		.with_root_certificates(root_store)
		.with_client_auth_cert(cert_chain, key)
		.wrap_err("building apns tls client config")
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
	let file = std::fs::File::open(path).wrap_err_with(|| format!("opening {path}"))?;
	let mut reader = BufReader::new(file);
	rustls_pemfile::certs(&mut reader)
		.collect::<std::result::Result<Vec<_>, _>>()
		.wrap_err_with(|| format!("parsing certificates from {path}"))
}

fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
	let file = std::fs::File::open(path).wrap_err_with(|| format!("opening {path}"))?;
	let mut reader = BufReader::new(file);
	rustls_pemfile::private_key(&mut reader)
		.wrap_err_with(|| format!("parsing private key from {path}"))?
		.ok_or_else(|| eyre!("no private key found in {path}"))
}
