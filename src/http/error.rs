//! Converts [`PostalError`] into the `{message, domain, code}` JSON body
//! and the HTTP status mapping every handler shares, via axum's
//! `IntoResponse`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::error::{ErrorDomain, PostalError};

/// The HTTP-facing error body.
#[derive(Debug, Serialize)]
pub struct ApiError {
	message: String,
	domain: String,
	code: u16,
}

impl ApiError {
	/// A bespoke 400 for the `/v1/notify` body-shape check, which is not a
	/// [`PostalError`] variant: a body missing any of `aps, c2dm, gcm, users,
	/// devices` yields 400 with `{domain:"PostalJsonError"}`.
	#[must_use]
	pub fn malformed_notify_body(message: impl Into<String>) -> Response {
		let body = Self { message: message.into(), domain: "PostalJsonError".to_owned(), code: 400 };
		(StatusCode::BAD_REQUEST, axum::Json(body)).into_response()
	}
}

impl From<&PostalError> for StatusCode {
	fn from(error: &PostalError) -> Self {
		match error.domain() {
			ErrorDomain::NotFound => StatusCode::NOT_FOUND,
			ErrorDomain::BadRequest => StatusCode::BAD_REQUEST,
			ErrorDomain::Internal => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}

impl IntoResponse for PostalError {
	fn into_response(self) -> Response {
		let status: StatusCode = (&self).into();
		let body = ApiError { message: self.to_string(), domain: self.domain().to_string(), code: status.as_u16() };
		(status, axum::Json(body)).into_response()
	}
}
