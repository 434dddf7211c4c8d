//! Wire framing for Apple's legacy "enhanced notification format" plus the
//! 6-byte error frame and 38-byte feedback record.

use crate::error::ApnsError;

const COMMAND_NOTIFICATION: u8 = 1;
const COMMAND_ERROR: u8 = 8;
const TOKEN_LEN: usize = 32;
const TOKEN_HEX_LEN: usize = TOKEN_LEN * 2;

/// Decodes a 64-character lowercase hex device token into its 32 raw bytes.
///
/// # Errors
///
/// Returns [`ApnsError::InvalidTokenSize`] if `token` is not exactly 64
/// characters, or [`ApnsError::InvalidToken`] if it contains anything other
/// than lowercase hex digits — `hex::decode` alone would accept uppercase,
/// but a token is only ever stored and compared in lowercase form.
pub fn decode_token(token: &str) -> Result<[u8; TOKEN_LEN], ApnsError> {
	if token.len() != TOKEN_HEX_LEN {
		return Err(ApnsError::InvalidTokenSize);
	}
	if !token.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
		return Err(ApnsError::InvalidToken);
	}
	let bytes = hex::decode(token).map_err(|_| ApnsError::InvalidToken)?;
	bytes.try_into().map_err(|_| ApnsError::InvalidToken)
}

/// Encodes a single enhanced-format notification frame.
///
/// # Errors
///
/// Propagates [`decode_token`]'s errors.
pub fn encode_notification_frame(
	request_id: u32,
	expires_at: u32,
	token: &str,
	payload: &[u8],
) -> Result<Vec<u8>, ApnsError> {
	let token_bytes = decode_token(token)?;

	let payload_len: u16 =
		u16::try_from(payload.len()).map_err(|_| ApnsError::InvalidPayloadSize)?;

	let mut frame = Vec::with_capacity(45 + payload.len());
	frame.push(COMMAND_NOTIFICATION);
	frame.extend_from_slice(&request_id.to_be_bytes());
	frame.extend_from_slice(&expires_at.to_be_bytes());
	frame.extend_from_slice(&(TOKEN_LEN as u16).to_be_bytes());
	frame.extend_from_slice(&token_bytes);
	frame.extend_from_slice(&payload_len.to_be_bytes());
	frame.extend_from_slice(payload);
	Ok(frame)
}

/// A parsed 6-byte error frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorFrame {
	/// Apple's status byte, mapped via [`ApnsError::from_status`].
	pub status: u8,
	/// The `request_id` of the send this error refers to.
	pub request_id: u32,
}

/// Parses a 6-byte error frame. Returns `None` if `frame[0]` is not the
/// error command byte (`8`) — callers should treat that as a protocol
/// violation and close the connection.
#[must_use]
pub fn parse_error_frame(frame: &[u8; 6]) -> Option<ErrorFrame> {
	if frame[0] != COMMAND_ERROR {
		return None;
	}
	let status = frame[1];
	let request_id = u32::from_be_bytes([frame[2], frame[3], frame[4], frame[5]]);
	Some(ErrorFrame { status, request_id })
}

/// A parsed 38-byte feedback record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackRecord {
	/// Unix seconds at which Apple observed the token as undeliverable.
	pub timestamp: u32,
	/// Lowercase hex device token.
	pub token: String,
}

/// Parses a single 38-byte feedback record.
///
/// # Errors
///
/// Returns [`ApnsError::InvalidTokenSize`] if the declared token length is
/// not 32.
pub fn parse_feedback_record(record: &[u8; 38]) -> Result<FeedbackRecord, ApnsError> {
	let timestamp = u32::from_be_bytes([record[0], record[1], record[2], record[3]]);
	let token_len = u16::from_be_bytes([record[4], record[5]]) as usize;
	if token_len != TOKEN_LEN {
		return Err(ApnsError::InvalidTokenSize);
	}
	let token = hex::encode(&record[6..6 + TOKEN_LEN]);
	Ok(FeedbackRecord { timestamp, token })
}
