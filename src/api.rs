//! HTTP surface: axum router, shared state, and error rendering.
//!
//! - `GET  /health`
//! - `GET  /login` and `POST /callback` (authorization-code flow)
//! - `GET  /metadata`, `GET /metadata/{sobject}`, `GET /accounts/{account_id}` (bearer, rate limited)
//! - `POST /api-keys` and `POST /api-keys/verify` (API key, rate limited)

pub mod routes;

// crates.io
use axum::{
	Json, Router,
	http::{HeaderName, HeaderValue, StatusCode, header},
	response::{IntoResponse, Response},
};
use tower_http::{
	cors::{AllowOrigin, Any, CorsLayer},
	trace::TraceLayer,
};
// self
use crate::{_prelude::*, flows::ReqwestBroker, ratelimit::RateLimiter};

/// Response header carrying the access token after a transparent rotation.
pub const ACCESS_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-access-token");

/// State shared by every handler.
#[derive(Debug)]
pub struct AppState {
	/// Broker driving every provider-facing operation.
	pub broker: Arc<ReqwestBroker>,
	/// Admission control for bearer-token callers.
	pub bearer_limiter: RateLimiter,
	/// Admission control for API-key callers.
	pub api_key_limiter: RateLimiter,
}

/// Handle to [`AppState`] injected into handlers.
pub type SharedState = Arc<AppState>;

/// Builds the router with CORS for `cors_origins` and request tracing.
pub fn router(state: SharedState, cors_origins: &[String]) -> Router {
	routes::router(state).layer(cors_layer(cors_origins)).layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
	let origins = origins
		.iter()
		.filter_map(|origin| match HeaderValue::from_str(origin) {
			Ok(value) => Some(value),
			Err(_) => {
				tracing::warn!(%origin, "ignoring unusable CORS origin");

				None
			},
		})
		.collect::<Vec<_>>();

	CorsLayer::new()
		.allow_origin(AllowOrigin::list(origins))
		.allow_methods(Any)
		.allow_headers(Any)
		.expose_headers([ACCESS_TOKEN_HEADER, header::RETRY_AFTER])
}

/// Error body returned for every rejected request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
	/// Human-readable reason.
	pub detail: String,
}

/// Gateway [`Error`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub Error);
impl<E> From<E> for ApiError
where
	E: Into<Error>,
{
	fn from(err: E) -> Self {
		Self(err.into())
	}
}
impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let status =
			StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
		let detail = if status.is_server_error() && !self.0.is_upstream_unavailable() {
			tracing::error!(error = %self.0, "request failed");

			"Internal server error.".to_owned()
		} else {
			if status.is_server_error() {
				tracing::warn!(error = %self.0, "provider unavailable");
			}

			self.0.to_string()
		};
		let mut response = (status, Json(ErrorBody { detail })).into_response();

		if let Error::RateLimitExceeded { retry_after } = &self.0 {
			response
				.headers_mut()
				.insert(header::RETRY_AFTER, HeaderValue::from(retry_after.whole_seconds().max(1)));
		}

		response
	}
}

/// Serves `app` on `listener` until Ctrl-C is received.
pub async fn serve(listener: tokio::net::TcpListener, app: Router) -> std::io::Result<()> {
	axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await
}

async fn shutdown_signal() {
	match tokio::signal::ctrl_c().await {
		Ok(()) => tracing::info!("shutdown signal received"),
		Err(e) => {
			tracing::error!(error = %e, "failed to listen for the shutdown signal");

			std::future::pending::<()>().await;
		},
	}
}
