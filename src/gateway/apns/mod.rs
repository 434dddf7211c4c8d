//! `APNsClient` — the persistent-TLS enhanced-format sender and feedback
//! consumer. The hard part of the crate: a small actor task owns the
//! connection, the pending-send map, and the reconnect/feedback timers,
//! communicating with callers over channels so single-writer discipline
//! falls out of "only the actor touches the socket" rather than needing an
//! explicit lock.

mod backoff;
pub mod feedback;
pub mod frame;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{split, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::ClientConfig;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use self::frame::{encode_notification_frame, parse_error_frame};
use crate::error::ApnsError;
use crate::gateway::{GatewayClient, IdentityRemoved, Transport};
use crate::messages::ApnsMessage;
use crate::models::DeviceType;

/// Socket connect timeout for both the gateway and feedback connections.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
/// Default positive-acknowledgement-by-timeout window.
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Opens fresh TLS connections to a fixed host/port. Production uses
/// `tokio_rustls`; tests substitute an in-memory duplex pair behind a local
/// `rustls` server.
#[async_trait]
pub trait ApnsConnector: std::fmt::Debug + Send + Sync {
	/// Establishes one new connection.
	async fn connect(&self) -> std::io::Result<Box<dyn Transport>>;
}

/// TLS connector speaking to Apple's real (or sandbox) endpoints.
#[derive(Debug, Clone)]
pub struct TlsApnsConnector {
	host: String,
	port: u16,
	tls_config: Arc<ClientConfig>,
}

impl TlsApnsConnector {
	/// Builds a connector for `host:port` using the given client TLS config
	/// (certificate/key loaded once at startup).
	#[must_use]
	pub fn new(host: impl Into<String>, port: u16, tls_config: Arc<ClientConfig>) -> Self {
		Self { host: host.into(), port, tls_config }
	}
}

#[async_trait]
impl ApnsConnector for TlsApnsConnector {
	async fn connect(&self) -> std::io::Result<Box<dyn Transport>> {
		let tcp = TcpStream::connect((self.host.as_str(), self.port)).await?;
		let connector = TlsConnector::from(self.tls_config.clone());
		let server_name = ServerName::try_from(self.host.clone())
			.map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
		let tls = connector.connect(server_name, tcp).await?;
		Ok(Box::new(tls))
	}
}

/// Configuration for one `ApnsClient`: gateway/feedback connectors and the
/// reconnect/send/feedback timers it runs on.
#[derive(Debug, Clone)]
pub struct ApnsClientConfig {
	/// Connector for the persistent notification-sending connection.
	pub gateway: Arc<dyn ApnsConnector>,
	/// Connector for the periodic feedback connection.
	pub feedback: Arc<dyn ApnsConnector>,
	/// Positive-acknowledgement-by-timeout window.
	pub send_timeout: Duration,
	/// Interval between feedback channel polls.
	pub feedback_interval: Duration,
}

struct Pending {
	token: String,
	responder: oneshot::Sender<Result<(), ApnsError>>,
}

enum ActorEvent {
	Deliver { token: String, expires_at: u32, payload: Vec<u8>, responder: oneshot::Sender<Result<(), ApnsError>> },
	Connected { generation: u64, writer: WriteHalf<Box<dyn Transport>>, read_task: tokio::task::JoinHandle<()> },
	ConnectFailed { generation: u64 },
	ErrorFrame(frame::ErrorFrame),
	Eof,
	TimerFired(u32),
	Retry { generation: u64 },
	Dispose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
	Idle,
	Connecting,
	Connected,
	Disposed,
}

struct Actor {
	config: ApnsClientConfig,
	identity_removed: mpsc::UnboundedSender<IdentityRemoved>,
	self_tx: mpsc::UnboundedSender<ActorEvent>,
	state: State,
	writer: Option<WriteHalf<Box<dyn Transport>>>,
	pending: HashMap<u32, Pending>,
	pending_buffer: VecDeque<(u32, Vec<u8>)>,
	request_id: u32,
	generation: u64,
	reconnect_attempt: u32,
	read_task: Option<tokio::task::JoinHandle<()>>,
}

impl Actor {
	fn next_request_id(&mut self) -> u32 {
		let id = self.request_id;
		self.request_id = self.request_id.wrapping_add(1);
		id
	}

	async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ActorEvent>) {
		while let Some(event) = rx.recv().await {
			match event {
				ActorEvent::Deliver { token, expires_at, payload, responder } => {
					self.on_deliver(token, expires_at, payload, responder).await;
				}
				ActorEvent::Connected { generation, writer, read_task }
					if generation == self.generation =>
				{
					self.on_connected(writer, read_task).await;
				}
				ActorEvent::ConnectFailed { generation } if generation == self.generation => {
					self.on_connect_failed();
				}
				ActorEvent::ErrorFrame(parsed) => self.on_error_frame(parsed),
				ActorEvent::Eof => self.on_eof(),
				ActorEvent::TimerFired(request_id) => self.on_timer_fired(request_id),
				ActorEvent::Retry { generation } if generation == self.generation => {
					self.try_connect();
				}
				ActorEvent::Connected { .. }
				| ActorEvent::ConnectFailed { .. }
				| ActorEvent::Retry { .. } => {
					debug!("ignoring stale apns connection event");
				}
				ActorEvent::Dispose => {
					self.on_dispose();
					break;
				}
			}
		}
	}

	async fn on_deliver(
		&mut self,
		token: String,
		expires_at: u32,
		payload: Vec<u8>,
		responder: oneshot::Sender<Result<(), ApnsError>>,
	) {
		if self.state == State::Disposed {
			let _ignored = responder.send(Err(ApnsError::Cancelled));
			return;
		}

		let request_id = self.next_request_id();
		let frame = match encode_notification_frame(request_id, expires_at, &token, &payload) {
			Ok(frame) => frame,
			Err(err) => {
				let _ignored = responder.send(Err(err));
				return;
			}
		};

		self.pending.insert(request_id, Pending { token, responder });

		match self.state {
			State::Connected => {
				if let Some(writer) = self.writer.as_mut() {
					if let Err(err) = writer.write_all(&frame).await {
						warn!(%err, "apns write failed, reconnecting");
						self.writer = None;
						self.state = State::Idle;
						self.try_connect();
					}
				}
			}
			State::Idle => {
				self.pending_buffer.push_back((request_id, frame));
				self.try_connect();
			}
			State::Connecting => {
				self.pending_buffer.push_back((request_id, frame));
			}
			State::Disposed => unreachable!("checked above"),
		}

		self.arm_timer(request_id);
	}

	fn arm_timer(&self, request_id: u32) {
		let tx = self.self_tx.clone();
		let timeout = self.config.send_timeout;
		tokio::spawn(async move {
			tokio::time::sleep(timeout).await;
			let _ignored = tx.send(ActorEvent::TimerFired(request_id));
		});
	}

	fn try_connect(&mut self) {
		if self.state == State::Disposed {
			return;
		}
		self.state = State::Connecting;
		let connector = self.config.gateway.clone();
		let generation = self.generation;
		let tx = self.self_tx.clone();
		tokio::spawn(async move {
			let attempt = tokio::time::timeout(CONNECT_TIMEOUT, connector.connect()).await;
			match attempt {
				Ok(Ok(transport)) => {
					let (read_half, write_half) = split(transport);
					let read_task = spawn_read_loop(read_half, tx.clone());
					let _ignored =
						tx.send(ActorEvent::Connected { generation, writer: write_half, read_task });
				}
				_ => {
					let _ignored = tx.send(ActorEvent::ConnectFailed { generation });
				}
			}
		});
	}

	async fn on_connected(
		&mut self,
		mut writer: WriteHalf<Box<dyn Transport>>,
		read_task: tokio::task::JoinHandle<()>,
	) {
		if let Some(old) = self.read_task.replace(read_task) {
			old.abort();
		}
		self.state = State::Connected;
		self.reconnect_attempt = 0;
		info!("apns gateway connected");

		while let Some((_id, frame)) = self.pending_buffer.pop_front() {
			if let Err(err) = writer.write_all(&frame).await {
				warn!(%err, "apns flush write failed");
				self.writer = None;
				self.state = State::Idle;
				self.try_connect();
				return;
			}
		}
		self.writer = Some(writer);
	}

	fn on_connect_failed(&mut self) {
		warn!(attempt = self.reconnect_attempt, "apns connect failed, backing off");
		let delay = backoff::delay(self.reconnect_attempt);
		self.reconnect_attempt = self.reconnect_attempt.saturating_add(1);
		let tx = self.self_tx.clone();
		let generation = self.generation;
		tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			let _ignored = tx.send(ActorEvent::Retry { generation });
		});
	}

	fn on_error_frame(&mut self, parsed: frame::ErrorFrame) {
		let Some(pending) = self.pending.remove(&parsed.request_id) else {
			return;
		};
		let kind = ApnsError::from_status(parsed.status);
		if matches!(kind, ApnsError::InvalidToken) {
			let _ignored = self.identity_removed.send(IdentityRemoved {
				device_type: DeviceType::Aps,
				token: pending.token.clone(),
			});
		}
		let _ignored = pending.responder.send(Err(kind));
	}

	fn on_eof(&mut self) {
		debug!(pending = self.pending.len(), "apns connection closed, optimistic success");
		for (_id, pending) in self.pending.drain() {
			let _ignored = pending.responder.send(Ok(()));
		}
		self.writer = None;
		if self.state != State::Disposed {
			self.state = State::Idle;
		}
	}

	fn on_timer_fired(&mut self, request_id: u32) {
		if let Some(pending) = self.pending.remove(&request_id) {
			let _ignored = pending.responder.send(Ok(()));
		}
	}

	fn on_dispose(&mut self) {
		self.state = State::Disposed;
		self.generation += 1;
		self.writer = None;
		if let Some(read_task) = self.read_task.take() {
			read_task.abort();
		}
		for (_id, pending) in self.pending.drain() {
			let _ignored = pending.responder.send(Err(ApnsError::Cancelled));
		}
		self.pending_buffer.clear();
	}
}

fn spawn_read_loop(
	mut reader: ReadHalf<Box<dyn Transport>>,
	tx: mpsc::UnboundedSender<ActorEvent>,
) -> tokio::task::JoinHandle<()> {
	tokio::spawn(async move {
		loop {
			let mut buf = [0u8; 6];
			match reader.read_exact(&mut buf).await {
				Ok(()) => {
					if let Some(parsed) = parse_error_frame(&buf) {
						if tx.send(ActorEvent::ErrorFrame(parsed)).is_err() {
							return;
						}
					} else {
						warn!("unexpected apns frame, treating as eof");
						let _ignored = tx.send(ActorEvent::Eof);
						return;
					}
				}
				Err(_) => {
					let _ignored = tx.send(ActorEvent::Eof);
					return;
				}
			}
		}
	})
}

/// Handle to the running APNs gateway client. Cloning shares the same
/// underlying actor and connection.
#[derive(Debug, Clone)]
pub struct ApnsClient {
	cmd_tx: mpsc::UnboundedSender<ActorEvent>,
	feedback_cancel: CancellationToken,
}

impl ApnsClient {
	/// Spawns the actor task and the recurring feedback poller.
	#[must_use]
	pub fn new(
		config: ApnsClientConfig,
		identity_removed: mpsc::UnboundedSender<IdentityRemoved>,
	) -> Self {
		let (tx, rx) = mpsc::unbounded_channel();
		let actor = Actor {
			config: config.clone(),
			identity_removed: identity_removed.clone(),
			self_tx: tx.clone(),
			state: State::Idle,
			writer: None,
			pending: HashMap::new(),
			pending_buffer: VecDeque::new(),
			request_id: rand::random(),
			generation: 0,
			reconnect_attempt: 0,
			read_task: None,
		};
		tokio::spawn(actor.run(rx));

		let feedback_cancel = CancellationToken::new();
		spawn_feedback_loop(config, identity_removed, feedback_cancel.clone());

		Self { cmd_tx: tx, feedback_cancel }
	}

	/// Requests shutdown: cancels all pending sends with
	/// [`ApnsError::Cancelled`], stops the actor task, and stops the
	/// feedback timer.
	pub fn dispose(&self) {
		let _ignored = self.cmd_tx.send(ActorEvent::Dispose);
		self.feedback_cancel.cancel();
	}
}

fn spawn_feedback_loop(
	config: ApnsClientConfig,
	identity_removed: mpsc::UnboundedSender<IdentityRemoved>,
	cancel: CancellationToken,
) {
	tokio::spawn(async move {
		let mut ticker = tokio::time::interval(config.feedback_interval);
		loop {
			tokio::select! {
				() = cancel.cancelled() => return,
				_ = ticker.tick() => {}
			}
			let attempt = tokio::time::timeout(CONNECT_TIMEOUT, config.feedback.connect()).await;
			match attempt {
				Ok(Ok(transport)) => {
					feedback::drain_feedback(transport, &identity_removed).await;
				}
				_ => warn!("apns feedback connect failed"),
			}
		}
	});
}

#[async_trait]
impl GatewayClient for ApnsClient {
	type Message = ApnsMessage;

	async fn deliver(
		&self,
		token: &str,
		message: &ApnsMessage,
		cancel: CancellationToken,
	) -> Result<(), crate::error::PostalError> {
		let (responder, receiver) = oneshot::channel();
		let expires_at =
			message.expires_at().map_or(0, |ts| u32::try_from(ts.unix_timestamp().max(0)).unwrap_or(0));
		let payload = message.build_bytes();

		if self
			.cmd_tx
			.send(ActorEvent::Deliver {
				token: token.to_owned(),
				expires_at,
				payload,
				responder,
			})
			.is_err()
		{
			return Err(ApnsError::NotConnected.into());
		}

		tokio::select! {
			result = receiver => result.unwrap_or(Err(ApnsError::Cancelled)).map_err(Into::into),
			() = cancel.cancelled() => Err(ApnsError::Cancelled.into()),
		}
	}
}

impl Default for ApnsClientConfig {
	fn default() -> Self {
		Self {
			gateway: Arc::new(NullConnector),
			feedback: Arc::new(NullConnector),
			send_timeout: DEFAULT_SEND_TIMEOUT,
			feedback_interval: Duration::from_secs(3600),
		}
	}
}

#[derive(Debug)]
struct NullConnector;

#[async_trait]
impl ApnsConnector for NullConnector {
	async fn connect(&self) -> std::io::Result<Box<dyn Transport>> {
		Err(std::io::Error::new(std::io::ErrorKind::NotConnected, "no connector configured"))
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicU32, Ordering};

	use tokio::io::duplex;
	use tokio::sync::mpsc::unbounded_channel;

	use super::*;

	#[derive(Debug)]
	struct DuplexConnector {
		calls: AtomicU32,
	}

	#[async_trait]
	impl ApnsConnector for DuplexConnector {
		async fn connect(&self) -> std::io::Result<Box<dyn Transport>> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			let (client, _server) = duplex(8192);
			Ok(Box::new(client))
		}
	}

	#[tokio::test]
	async fn deliver_times_out_into_success_when_gateway_silent() {
		let (identity_tx, _identity_rx) = unbounded_channel();
		let config = ApnsClientConfig {
			gateway: Arc::new(DuplexConnector { calls: AtomicU32::new(0) }),
			feedback: Arc::new(NullConnector),
			send_timeout: Duration::from_millis(50),
			feedback_interval: Duration::from_secs(3600),
		};
		let client = ApnsClient::new(config, identity_tx);
		let message = ApnsMessage::new();
		let result =
			client.deliver(&"a".repeat(64), &message, CancellationToken::new()).await;
		assert!(result.is_ok());
		client.dispose();
	}

	#[tokio::test]
	async fn deliver_rejects_malformed_token_without_enqueuing() {
		let (identity_tx, _identity_rx) = unbounded_channel();
		let client = ApnsClient::new(ApnsClientConfig::default(), identity_tx);
		let message = ApnsMessage::new();
		let result = client.deliver("too-short", &message, CancellationToken::new()).await;
		assert!(result.is_err());
	}

	/// Hands out one retained duplex half so a test can act as the far end
	/// of the connection: read what the actor wrote, or drop its side to
	/// force an EOF.
	#[derive(Debug)]
	struct OnceConnector {
		server: tokio::sync::Mutex<Option<tokio::io::DuplexStream>>,
	}

	impl OnceConnector {
		fn new() -> Self {
			Self { server: tokio::sync::Mutex::new(None) }
		}

		async fn take_server(&self) -> tokio::io::DuplexStream {
			loop {
				if let Some(server) = self.server.lock().await.take() {
					return server;
				}
				tokio::time::sleep(Duration::from_millis(5)).await;
			}
		}
	}

	#[async_trait]
	impl ApnsConnector for OnceConnector {
		async fn connect(&self) -> std::io::Result<Box<dyn Transport>> {
			let (client, server) = duplex(8192);
			*self.server.lock().await = Some(server);
			Ok(Box::new(client))
		}
	}

	/// Reads the fixed 9-byte frame prefix (command + request_id +
	/// expires_at) and returns the request id the actor assigned — it is
	/// `rand::random()`-seeded, so a test cannot hardcode it.
	async fn read_request_id(server: &mut tokio::io::DuplexStream) -> u32 {
		let mut head = [0u8; 9];
		server.read_exact(&mut head).await.unwrap();
		u32::from_be_bytes([head[1], head[2], head[3], head[4]])
	}

	#[tokio::test]
	async fn error_frame_resolves_matching_send_and_flags_invalid_token() {
		let (identity_tx, mut identity_rx) = unbounded_channel();
		let connector = Arc::new(OnceConnector::new());
		let config = ApnsClientConfig {
			gateway: connector.clone(),
			feedback: Arc::new(NullConnector),
			send_timeout: Duration::from_secs(5),
			feedback_interval: Duration::from_secs(3600),
		};
		let client = ApnsClient::new(config, identity_tx);

		let token = "b".repeat(64);
		let message = ApnsMessage::new();
		let deliver_client = client.clone();
		let deliver_token = token.clone();
		let handle = tokio::spawn(async move {
			deliver_client.deliver(&deliver_token, &message, CancellationToken::new()).await
		});

		let mut server = connector.take_server().await;
		let request_id = read_request_id(&mut server).await;

		let mut error_frame = [0u8; 6];
		error_frame[0] = 8;
		error_frame[1] = 8;
		error_frame[2..6].copy_from_slice(&request_id.to_be_bytes());
		server.write_all(&error_frame).await.unwrap();

		let result = handle.await.unwrap();
		assert!(matches!(result, Err(crate::error::PostalError::Apns(ApnsError::InvalidToken))));

		let removed = identity_rx.recv().await.unwrap();
		assert_eq!(removed.token, token);
		client.dispose();
	}

	#[tokio::test]
	async fn error_frame_with_unrelated_status_does_not_flag_identity_removed() {
		let (identity_tx, mut identity_rx) = unbounded_channel();
		let connector = Arc::new(OnceConnector::new());
		let config = ApnsClientConfig {
			gateway: connector.clone(),
			feedback: Arc::new(NullConnector),
			send_timeout: Duration::from_secs(5),
			feedback_interval: Duration::from_secs(3600),
		};
		let client = ApnsClient::new(config, identity_tx);

		let token = "e".repeat(64);
		let message = ApnsMessage::new();
		let deliver_client = client.clone();
		let deliver_token = token.clone();
		let handle = tokio::spawn(async move {
			deliver_client.deliver(&deliver_token, &message, CancellationToken::new()).await
		});

		let mut server = connector.take_server().await;
		let request_id = read_request_id(&mut server).await;

		let mut error_frame = [0u8; 6];
		error_frame[0] = 8;
		error_frame[1] = 1; // processing error, not invalid-token
		error_frame[2..6].copy_from_slice(&request_id.to_be_bytes());
		server.write_all(&error_frame).await.unwrap();

		let result = handle.await.unwrap();
		assert!(matches!(result, Err(crate::error::PostalError::Apns(ApnsError::ProcessingError))));
		assert!(identity_rx.try_recv().is_err());
		client.dispose();
	}

	#[tokio::test]
	async fn closing_connection_after_send_is_pending_resolves_it_optimistically() {
		let (identity_tx, _identity_rx) = unbounded_channel();
		let connector = Arc::new(OnceConnector::new());
		let config = ApnsClientConfig {
			gateway: connector.clone(),
			feedback: Arc::new(NullConnector),
			send_timeout: Duration::from_secs(5),
			feedback_interval: Duration::from_secs(3600),
		};
		let client = ApnsClient::new(config, identity_tx);

		let token = "c".repeat(64);
		let message = ApnsMessage::new();
		let deliver_client = client.clone();
		let handle = tokio::spawn(async move {
			deliver_client.deliver(&token, &message, CancellationToken::new()).await
		});

		let mut server = connector.take_server().await;
		let _request_id = read_request_id(&mut server).await;
		drop(server);

		let result = handle.await.unwrap();
		assert!(result.is_ok());
		client.dispose();
	}
}
