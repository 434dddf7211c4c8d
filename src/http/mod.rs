//! The HTTP surface: six endpoints dispatched through one
//! [`UrlRouter`] rather than axum's own path-pattern routing — the router
//! has no notion of HTTP method, so one fallback handler matches
//! `(method, route)` by hand.

pub mod error;

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::http::error::ApiError;
use crate::metrics::Metrics;
use crate::models::{DeviceType, Notification};
use crate::router::UrlRouter;
use crate::service::Service;

/// Default page size for `GET /v1/users/:user/devices` when `limit` is
/// absent from the query string.
const DEFAULT_PAGE_LIMIT: u64 = 100;

/// The handful of distinct routes the fallback handler dispatches on.
/// Doubles as the [`UrlRouter`] payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
	Status,
	Metrics,
	UserDevices,
	UserDevice,
	Notify,
}

fn build_route_table() -> UrlRouter<Route> {
	let mut router = UrlRouter::new();
	router.add_handler("/status", Route::Status).expect("static routes never conflict");
	router.add_handler("/metrics", Route::Metrics).expect("static routes never conflict");
	router.add_handler("/v1/users/:user/devices", Route::UserDevices).expect("static routes never conflict");
	router
		.add_handler("/v1/users/:user/devices/:device", Route::UserDevice)
		.expect("static routes never conflict");
	router.add_handler("/v1/notify", Route::Notify).expect("static routes never conflict");
	router
}

/// Shared state handed to the single fallback handler.
#[derive(Clone)]
pub struct AppState {
	service: Arc<Service>,
	metrics: Arc<Metrics>,
	routes: Arc<UrlRouter<Route>>,
}

impl std::fmt::Debug for AppState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AppState").finish_non_exhaustive()
	}
}

impl AppState {
	/// Builds the route table once; cheap enough to not bother caching
	/// across instances, but `Service::new` (the expensive part) already
	/// ran by the time this is called.
	#[must_use]
	pub fn new(service: Arc<Service>, metrics: Arc<Metrics>) -> Self {
		Self { service, metrics, routes: Arc::new(build_route_table()) }
	}
}

/// The whole application: one fallback, since [`UrlRouter`] — not axum's own
/// matcher — owns path dispatch.
#[must_use]
pub fn build_app(state: AppState) -> Router {
	Router::new().fallback(dispatch).with_state(state)
}

async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
	let method = request.method().clone();
	let path = request.uri().path().to_owned();
	let query = request.uri().query().map(str::to_owned);

	let Some((route, params)) = state.routes.route(&path) else {
		return StatusCode::NOT_FOUND.into_response();
	};
	let route = *route;

	match (method, route) {
		(Method::GET, Route::Status) => Json(state.service.status()).into_response(),
		(Method::GET, Route::Metrics) => state.metrics.render().into_response(),
		(Method::GET, Route::UserDevices) => list_devices(&state, &params, query.as_deref()).await,
		(Method::POST, Route::UserDevices) => create_device(&state, &params, request.into_body()).await,
		(Method::GET, Route::UserDevice) => get_device(&state, &params).await,
		(Method::PUT, Route::UserDevice) => put_device(&state, &params, request.into_body()).await,
		(Method::DELETE, Route::UserDevice) => delete_device(&state, &params).await,
		(Method::POST, Route::Notify) => notify(&state, request.into_body()).await,
		_ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
	}
}

#[derive(Debug, Deserialize)]
struct Pagination {
	#[serde(default)]
	offset: Option<u64>,
	#[serde(default)]
	limit: Option<u64>,
}

fn parse_pagination(query: Option<&str>) -> (u64, u64) {
	let parsed: Pagination = query
		.and_then(|q| serde_urlencoded::from_str(q).ok())
		.unwrap_or(Pagination { offset: None, limit: None });
	(parsed.offset.unwrap_or(0), parsed.limit.unwrap_or(DEFAULT_PAGE_LIMIT))
}

async fn read_json_body(body: Body) -> Result<Value, Response> {
	let bytes = axum::body::to_bytes(body, usize::MAX)
		.await
		.map_err(|err| ApiError::malformed_notify_body(err.to_string()))?;
	serde_json::from_slice(&bytes)
		.map_err(|err| ApiError::malformed_notify_body(format!("invalid json body: {err}")))
}

async fn list_devices(state: &AppState, params: &HashMap<String, String>, query: Option<&str>) -> Response {
	let user = params.get("user").map_or("", String::as_str);
	let (offset, limit) = parse_pagination(query);
	match state.service.find_devices(user, offset, limit).await {
		Ok(devices) => {
			let body: Vec<Value> = devices.iter().map(crate::models::Device::to_json).collect();
			Json(body).into_response()
		}
		Err(err) => err.into_response(),
	}
}

#[derive(Debug, Deserialize)]
struct CreateDeviceBody {
	device_token: String,
	device_type: DeviceType,
}

async fn create_device(state: &AppState, params: &HashMap<String, String>, body: Body) -> Response {
	let user = params.get("user").map_or("", String::as_str);
	let parsed: CreateDeviceBody = match read_json_body(body).await {
		Ok(value) => match serde_json::from_value(value) {
			Ok(parsed) => parsed,
			Err(err) => return ApiError::malformed_notify_body(format!("invalid device body: {err}")),
		},
		Err(response) => return response,
	};

	upsert_response(state, user, &parsed.device_token, parsed.device_type).await
}

#[derive(Debug, Deserialize)]
struct PutDeviceBody {
	device_type: DeviceType,
}

async fn put_device(state: &AppState, params: &HashMap<String, String>, body: Body) -> Response {
	let user = params.get("user").map_or("", String::as_str);
	let device_token = params.get("device").map_or("", String::as_str);
	let parsed: PutDeviceBody = match read_json_body(body).await {
		Ok(value) => match serde_json::from_value(value) {
			Ok(parsed) => parsed,
			Err(err) => return ApiError::malformed_notify_body(format!("invalid device body: {err}")),
		},
		Err(response) => return response,
	};

	upsert_response(state, user, device_token, parsed.device_type).await
}

async fn upsert_response(state: &AppState, user: &str, device_token: &str, device_type: DeviceType) -> Response {
	match state.service.upsert_device_by_token(user, device_token, device_type).await {
		Ok((upserted, device)) => {
			let status =
				if upserted.updated_existing() { StatusCode::OK } else { StatusCode::CREATED };
			let location = format!("/v1/users/{user}/devices/{device_token}");
			(status, [("Location", location)], Json(device.to_json())).into_response()
		}
		Err(err) => err.into_response(),
	}
}

async fn get_device(state: &AppState, params: &HashMap<String, String>) -> Response {
	let user = params.get("user").map_or("", String::as_str);
	let device = params.get("device").map_or("", String::as_str);
	match state.service.find_device_by_token(user, device).await {
		Ok(device) => Json(device.to_json()).into_response(),
		Err(err) => err.into_response(),
	}
}

async fn delete_device(state: &AppState, params: &HashMap<String, String>) -> Response {
	let user = params.get("user").map_or("", String::as_str);
	let device = params.get("device").map_or("", String::as_str);
	match state.service.remove_device_by_token(user, device).await {
		Ok(()) => StatusCode::NO_CONTENT.into_response(),
		Err(err) => err.into_response(),
	}
}

/// `aps`/`c2dm`/`gcm`/`users`/`devices` are required even when empty: plain
/// fields rather than `#[serde(default)]` so a missing key surfaces as a
/// deserialize error, which becomes the `PostalJsonError` 400 body.
#[derive(Debug, Deserialize)]
struct NotifyBody {
	aps: Option<Value>,
	c2dm: Option<Value>,
	gcm: Option<Value>,
	users: Vec<String>,
	devices: Vec<String>,
	#[serde(default)]
	collapse_key: Option<String>,
}

async fn notify(state: &AppState, body: Body) -> Response {
	let bytes = match axum::body::to_bytes(body, usize::MAX).await {
		Ok(bytes) => bytes,
		Err(err) => return ApiError::malformed_notify_body(err.to_string()),
	};
	let parsed: NotifyBody = match serde_json::from_slice(&bytes) {
		Ok(parsed) => parsed,
		Err(err) => return ApiError::malformed_notify_body(format!("invalid notify body: {err}")),
	};

	let notification = Notification {
		aps: parsed.aps,
		c2dm: parsed.c2dm,
		gcm: parsed.gcm,
		collapse_key: parsed.collapse_key,
	};

	match state.service.notify(&notification, &parsed.users, &parsed.devices).await {
		Ok(()) => Json(json!({})).into_response(),
		Err(err) => err.into_response(),
	}
}
