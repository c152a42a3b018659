//! Gateway-level error types shared across flows, stores, the rate limiter, and the API layer.

// self
use crate::_prelude::*;

/// Gateway-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical gateway error exposed by public APIs.
///
/// Each variant maps onto one HTTP status through [`Error::status_code`]; the API layer
/// renders the [`Display`] text as the `detail` field of the error body.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Temporary upstream failure; the caller may retry later.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS, timeout).
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// Bearer credential or API key is unknown to the store.
	#[error("Invalid access token.")]
	InvalidCredential,
	/// The callback `state` was never issued, was already used, or has expired.
	#[error("Invalid state parameter: {reason}.")]
	InvalidState {
		/// Why the state was refused.
		reason: String,
	},
	/// Request parameters failed validation.
	#[error("Invalid request: {reason}.")]
	InvalidRequest {
		/// Which parameter was refused and why.
		reason: String,
	},
	/// Provider refused the authorization-code exchange.
	#[error("Failed to get access token: {reason}.")]
	TokenExchangeFailed {
		/// Provider- or gateway-supplied reason string.
		reason: String,
	},
	/// Provider refused the refresh token; the stored record has been deleted.
	#[error("Failed to refresh token: {reason}.")]
	RefreshFailed {
		/// Provider- or gateway-supplied reason string.
		reason: String,
	},
	/// Credential exceeded its admission budget.
	#[error("Rate limit exceeded. Please try again in {} seconds.", retry_after.whole_seconds())]
	RateLimitExceeded {
		/// Time until the oldest call leaves the window.
		retry_after: Duration,
	},
	/// Provider data API reported that the resource does not exist.
	#[error("{resource} not found.")]
	NotFound {
		/// Human-readable resource label.
		resource: String,
	},
	/// Provider data API answered with an unexpected status.
	#[error("Upstream request failed with status {status}: {reason}.")]
	Upstream {
		/// Status code returned by the provider.
		status: u16,
		/// Gateway-supplied context.
		reason: String,
	},
}
impl Error {
	/// HTTP status code that represents this error at the API boundary.
	pub fn status_code(&self) -> u16 {
		match self {
			Error::InvalidCredential | Error::RefreshFailed { .. } => 401,
			Error::InvalidState { .. }
			| Error::InvalidRequest { .. }
			| Error::TokenExchangeFailed { .. } => 400,
			Error::RateLimitExceeded { .. } => 429,
			Error::NotFound { .. } => 404,
			Error::Upstream { status, .. } if (400..500).contains(status) => *status,
			Error::Upstream { .. } | Error::Transport(_) => 502,
			Error::Transient(_) => 503,
			Error::Storage(_) | Error::Config(_) => 500,
		}
	}

	/// Returns `true` when the provider is unreachable or answered with a temporary failure.
	pub fn is_upstream_unavailable(&self) -> bool {
		matches!(self, Error::Transient(_) | Error::Transport(_))
	}
}

/// Configuration and validation failures raised by the gateway.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// Provider descriptor contains an invalid URL.
	#[error("Descriptor contains an invalid URL.")]
	InvalidDescriptor {
		/// Underlying parsing failure.
		#[source]
		source: oauth2::url::ParseError,
	},
	/// Provider descriptor failed validation.
	#[error(transparent)]
	Descriptor(#[from] crate::provider::ProviderDescriptorError),
	/// Redirect URI cannot be parsed.
	#[error("Redirect URI is invalid.")]
	InvalidRedirect {
		/// Underlying parsing failure.
		#[source]
		source: oauth2::url::ParseError,
	},
	/// Resource URL could not be assembled from the instance URL.
	#[error("Instance URL `{instance_url}` cannot address the data API.")]
	InvalidInstanceUrl {
		/// Instance URL stored alongside the token.
		instance_url: String,
	},
	/// Token record builder validation failed.
	#[error("Unable to build token record.")]
	TokenBuild(#[from] crate::auth::TokenRecordBuilderError),
	/// A required environment variable is absent.
	#[error("Environment variable `{name}` is required.")]
	MissingEnv {
		/// Variable name.
		name: &'static str,
	},
	/// An environment variable holds an unusable value.
	#[error("Environment variable `{name}` is invalid: {reason}.")]
	InvalidEnv {
		/// Variable name.
		name: &'static str,
		/// Parsing or validation failure.
		reason: String,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
impl From<reqwest::Error> for ConfigError {
	fn from(e: reqwest::Error) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Provider returned an unexpected but non-fatal response.
	#[error("Provider returned an unexpected response: {message}.")]
	TokenEndpoint {
		/// Provider- or gateway-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Provider responded with malformed JSON that could not be parsed.
	#[error("Provider returned malformed JSON.")]
	ResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// The rate-limit window kept changing underneath the admission check.
	#[error("Rate limit window for the credential is contended.")]
	WindowContention,
}
/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the provider.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the provider.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn taxonomy_maps_onto_http_statuses() {
		assert_eq!(Error::InvalidCredential.status_code(), 401);
		assert_eq!(Error::RefreshFailed { reason: "revoked".into() }.status_code(), 401);
		assert_eq!(Error::TokenExchangeFailed { reason: "bad code".into() }.status_code(), 400);
		assert_eq!(Error::InvalidState { reason: "unknown".into() }.status_code(), 400);
		assert_eq!(
			Error::RateLimitExceeded { retry_after: Duration::seconds(12) }.status_code(),
			429
		);
		assert_eq!(Error::NotFound { resource: "Account".into() }.status_code(), 404);
		assert_eq!(Error::Upstream { status: 403, reason: "denied".into() }.status_code(), 403);
		assert_eq!(Error::Upstream { status: 500, reason: "boom".into() }.status_code(), 502);
		assert_eq!(
			Error::from(TransientError::TokenEndpoint {
				message: "timeout".into(),
				status: None,
				retry_after: None,
			})
			.status_code(),
			503
		);
		assert_eq!(Error::from(ConfigError::MissingEnv { name: "PORT" }).status_code(), 500);
	}

	#[test]
	fn rate_limit_detail_mentions_retry_after() {
		let err = Error::RateLimitExceeded { retry_after: Duration::seconds(42) };

		assert_eq!(err.to_string(), "Rate limit exceeded. Please try again in 42 seconds.");
	}
}
