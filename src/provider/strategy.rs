//! Provider strategy hooks that classify token endpoint failures.
//!
//! Flows never inspect raw responses themselves: they build a [`ProviderErrorContext`] and let
//! the strategy decide whether the provider rejected the grant (terminal) or failed temporarily.

// self
use crate::{_prelude::*, provider::descriptor::GrantType};

/// Strategy hook that allows providers to classify token endpoint errors.
///
/// Implementors are required to be `Send + Sync`, and the hook uses crate-owned data types so
/// implementations never depend on reqwest-specific structures.
pub trait ProviderStrategy: Send + Sync {
	/// Maps low-level HTTP/JSON errors into the gateway taxonomy for a token request.
	fn classify_token_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind;
}

/// Canonical provider error categories used by strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderErrorKind {
	/// Provider rejected the authorization grant (bad code, revoked refresh token).
	InvalidGrant,
	/// Client authentication failed.
	InvalidClient,
	/// Failure is temporary; the stored credential stays usable.
	Transient,
}
impl ProviderErrorKind {
	/// Returns `true` for terminal rejections.
	pub fn is_rejection(self) -> bool {
		!matches!(self, ProviderErrorKind::Transient)
	}
}

/// Context passed to provider strategies when classifying token errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderErrorContext {
	/// Grant type associated with the failing request.
	pub grant_type: GrantType,
	/// HTTP status code returned by the provider, when available.
	pub http_status: Option<u16>,
	/// Provider-supplied OAuth `error` field.
	pub oauth_error: Option<String>,
	/// Provider-supplied OAuth `error_description` field.
	pub error_description: Option<String>,
}
impl ProviderErrorContext {
	/// Creates a new context scoped to the provided grant type.
	pub fn new(grant_type: GrantType) -> Self {
		Self {
			grant_type,
			http_status: None,
			oauth_error: None,
			error_description: None,
		}
	}

	/// Adds an HTTP status code (e.g., 400, 401, 500).
	pub fn with_http_status(mut self, status: u16) -> Self {
		self.http_status = Some(status);

		self
	}

	/// Adds the OAuth error code string returned by the provider.
	pub fn with_oauth_error(mut self, error: impl Into<String>) -> Self {
		self.oauth_error = Some(error.into());

		self
	}

	/// Adds the OAuth `error_description` field.
	pub fn with_error_description(mut self, description: impl Into<String>) -> Self {
		self.error_description = Some(description.into());

		self
	}
}

/// Default strategy that treats every 4xx other than 429 as a rejection.
///
/// The status code wins over the OAuth `error` field, since providers disagree on error
/// strings but not on status classes. Without a status the OAuth fields decide.
/// Transport failures never reach the strategy: the
/// [`TransportErrorMapper`](crate::oauth::TransportErrorMapper) handles them.
#[derive(Debug, Default)]
pub struct DefaultProviderStrategy;
impl Display for DefaultProviderStrategy {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("default-provider-strategy")
	}
}
impl ProviderStrategy for DefaultProviderStrategy {
	fn classify_token_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind {
		let oauth_kind = ctx.oauth_error.as_deref().and_then(match_exact_value);

		match ctx.http_status {
			Some(429) => ProviderErrorKind::Transient,
			Some(code) if code >= 500 => ProviderErrorKind::Transient,
			Some(401) => ProviderErrorKind::InvalidClient,
			Some(code) if (400..500).contains(&code) => match oauth_kind {
				Some(ProviderErrorKind::InvalidClient) => ProviderErrorKind::InvalidClient,
				_ => ProviderErrorKind::InvalidGrant,
			},
			_ => oauth_kind.unwrap_or(ProviderErrorKind::Transient),
		}
	}
}

fn match_exact_value(value: &str) -> Option<ProviderErrorKind> {
	if value.eq_ignore_ascii_case("invalid_grant")
		|| value.eq_ignore_ascii_case("access_denied")
		|| value.eq_ignore_ascii_case("invalid_request")
	{
		Some(ProviderErrorKind::InvalidGrant)
	} else if value.eq_ignore_ascii_case("invalid_client")
		|| value.eq_ignore_ascii_case("unauthorized_client")
	{
		Some(ProviderErrorKind::InvalidClient)
	} else if value.eq_ignore_ascii_case("temporarily_unavailable")
		|| value.eq_ignore_ascii_case("server_error")
	{
		Some(ProviderErrorKind::Transient)
	} else {
		None
	}
}
