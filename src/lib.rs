//! Postal push-notification dispatch service

#![deny(
	missing_docs,
	trivial_casts,
	trivial_numeric_casts,
	unused_extern_crates,
	unused_import_braces,
	unused_qualifications
)]
#![warn(missing_debug_implementations, dead_code, clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod gateway;
pub mod http;
pub mod messages;
pub mod metrics;
pub mod models;
pub mod redis_publisher;
pub mod router;
pub mod service;
pub mod settings;
pub mod store;
