//! The APNs feedback channel: a stream of 38-byte records naming tokens
//! Apple has observed as undeliverable.

use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use super::frame::parse_feedback_record;
use crate::gateway::{IdentityRemoved, Transport};
use crate::models::DeviceType;

/// Reads 38-byte feedback records from `transport` until EOF, emitting an
/// [`IdentityRemoved`] event on `events` for each one. Returns the number of
/// records processed.
pub async fn drain_feedback(
	mut transport: Box<dyn Transport>,
	events: &UnboundedSender<IdentityRemoved>,
) -> usize {
	let mut count = 0;
	loop {
		let mut record = [0u8; 38];
		match transport.read_exact(&mut record).await {
			Ok(()) => {}
			Err(_) => break,
		}
		match parse_feedback_record(&record) {
			Ok(parsed) => {
				debug!(token = %parsed.token, "apns feedback record");
				let _ignored =
					events.send(IdentityRemoved { device_type: DeviceType::Aps, token: parsed.token });
				count += 1;
			}
			Err(err) => warn!(%err, "malformed apns feedback record"),
		}
	}
	count
}

#[cfg(test)]
mod tests {
	use tokio::io::duplex;
	use tokio::sync::mpsc::unbounded_channel;

	use super::*;

	#[tokio::test]
	async fn two_records_produce_two_events() {
		let (mut client, server) = duplex(4096);

		let mut record_a = [0u8; 38];
		record_a[4..6].copy_from_slice(&32u16.to_be_bytes());
		record_a[6] = 0xAA;
		let mut record_b = record_a;
		record_b[6] = 0xBB;

		tokio::spawn(async move {
			use tokio::io::AsyncWriteExt;
			client.write_all(&record_a).await.unwrap();
			client.write_all(&record_b).await.unwrap();
			client.shutdown().await.unwrap();
		});

		let (tx, mut rx) = unbounded_channel();
		let count = drain_feedback(Box::new(server), &tx).await;
		assert_eq!(count, 2);

		let first = rx.recv().await.unwrap();
		assert!(first.token.starts_with("aa"));
		let second = rx.recv().await.unwrap();
		assert!(second.token.starts_with("bb"));
	}
}
