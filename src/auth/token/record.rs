//! Stored provider token records, staleness helpers, and builders.

// self
use crate::{_prelude::*, auth::token::secret::TokenSecret};

/// Errors produced by [`TokenRecordBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum TokenRecordBuilderError {
	/// Issued when no access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// Issued when the provider did not report the instance URL.
	#[error("Instance URL is required.")]
	MissingInstanceUrl,
}

/// Provider tokens persisted after a successful code exchange.
///
/// The access token doubles as the lookup key for every authenticated caller, so a refresh
/// replaces the whole record rather than adding a second one.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TokenRecord {
	/// Access token secret; callers must avoid logging it.
	pub access_token: TokenSecret,
	/// Refresh token secret; empty when the provider did not issue one.
	pub refresh_token: TokenSecret,
	/// Base URL of the provider instance that serves the data API for this grant.
	pub instance_url: String,
	/// Instant the current access token was obtained.
	pub created_at: OffsetDateTime,
}
impl TokenRecord {
	/// Returns a builder for constructing records.
	pub fn builder() -> TokenRecordBuilder {
		TokenRecordBuilder::default()
	}

	/// Age of the access token at `instant`.
	pub fn age_at(&self, instant: OffsetDateTime) -> Duration {
		instant - self.created_at
	}

	/// Returns `true` once the access token is older than `threshold` at `instant`.
	pub fn is_stale_at(&self, instant: OffsetDateTime, threshold: Duration) -> bool {
		self.age_at(instant) > threshold
	}

	/// Returns `true` when a refresh token is available for rotation.
	pub fn can_refresh(&self) -> bool {
		!self.refresh_token.is_empty()
	}

	/// Produces the rotated record for a refresh that happened at `instant`.
	///
	/// The refresh token and instance URL are kept unless the provider sent replacements, and
	/// `created_at` always moves forward even when the clock did not.
	pub fn rotated(
		&self,
		access_token: impl Into<String>,
		refresh_token: Option<String>,
		instance_url: Option<String>,
		instant: OffsetDateTime,
	) -> TokenRecord {
		let created_at = if instant > self.created_at {
			instant
		} else {
			self.created_at + Duration::nanoseconds(1)
		};

		TokenRecord {
			access_token: TokenSecret::new(access_token),
			refresh_token: refresh_token
				.filter(|value| !value.is_empty())
				.map(TokenSecret::new)
				.unwrap_or_else(|| self.refresh_token.clone()),
			instance_url: instance_url
				.filter(|value| !value.is_empty())
				.unwrap_or_else(|| self.instance_url.clone()),
			created_at,
		}
	}
}
impl Debug for TokenRecord {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenRecord")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &(!self.refresh_token.is_empty()).then_some("<redacted>"))
			.field("instance_url", &self.instance_url)
			.field("created_at", &self.created_at)
			.finish()
	}
}

/// Builder for [`TokenRecord`].
#[derive(Clone, Debug, Default)]
pub struct TokenRecordBuilder {
	access_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	instance_url: Option<String>,
	created_at: Option<OffsetDateTime>,
}
impl TokenRecordBuilder {
	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the instance URL reported by the provider.
	pub fn instance_url(mut self, url: impl Into<String>) -> Self {
		self.instance_url = Some(url.into());

		self
	}

	/// Sets the creation instant.
	pub fn created_at(mut self, instant: OffsetDateTime) -> Self {
		self.created_at = Some(instant);

		self
	}

	/// Consumes the builder and produces a [`TokenRecord`].
	pub fn build(self) -> Result<TokenRecord, TokenRecordBuilderError> {
		let access_token = self
			.access_token
			.filter(|secret| !secret.is_empty())
			.ok_or(TokenRecordBuilderError::MissingAccessToken)?;
		let instance_url = self
			.instance_url
			.filter(|url| !url.is_empty())
			.ok_or(TokenRecordBuilderError::MissingInstanceUrl)?;

		Ok(TokenRecord {
			access_token,
			refresh_token: self.refresh_token.unwrap_or_else(|| TokenSecret::new("")),
			instance_url,
			created_at: self.created_at.unwrap_or_else(OffsetDateTime::now_utc),
		})
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn record() -> TokenRecord {
		TokenRecord::builder()
			.access_token("access")
			.refresh_token("refresh")
			.instance_url("https://acme.my.salesforce.com")
			.created_at(macros::datetime!(2025-01-01 00:00 UTC))
			.build()
			.expect("Token record builder should succeed for fixtures.")
	}

	#[test]
	fn staleness_uses_strict_threshold() {
		let record = record();
		let threshold = Duration::hours(2);

		assert!(!record.is_stale_at(macros::datetime!(2025-01-01 01:59 UTC), threshold));
		assert!(!record.is_stale_at(macros::datetime!(2025-01-01 02:00 UTC), threshold));
		assert!(record.is_stale_at(macros::datetime!(2025-01-01 02:01 UTC), threshold));
	}

	#[test]
	fn builder_requires_access_token_and_instance_url() {
		let err = TokenRecord::builder()
			.instance_url("https://acme.my.salesforce.com")
			.build()
			.expect_err("Missing access token should fail.");

		assert_eq!(err, TokenRecordBuilderError::MissingAccessToken);

		let err = TokenRecord::builder()
			.access_token("access")
			.build()
			.expect_err("Missing instance URL should fail.");

		assert_eq!(err, TokenRecordBuilderError::MissingInstanceUrl);

		let record = TokenRecord::builder()
			.access_token("access")
			.instance_url("https://acme.my.salesforce.com")
			.build()
			.expect("Refresh token should default to empty.");

		assert!(!record.can_refresh());
	}

	#[test]
	fn rotation_reuses_refresh_token_unless_replaced() {
		let record = record();
		let later = macros::datetime!(2025-01-01 03:00 UTC);
		let rotated = record.rotated("access-2", None, None, later);

		assert_eq!(rotated.access_token.expose(), "access-2");
		assert_eq!(rotated.refresh_token.expose(), "refresh");
		assert_eq!(rotated.instance_url, record.instance_url);
		assert_eq!(rotated.created_at, later);

		let replaced = record.rotated(
			"access-3",
			Some("refresh-3".into()),
			Some("https://acme2.my.salesforce.com".into()),
			later,
		);

		assert_eq!(replaced.refresh_token.expose(), "refresh-3");
		assert_eq!(replaced.instance_url, "https://acme2.my.salesforce.com");
	}

	#[test]
	fn rotation_moves_created_at_forward_even_without_clock_progress() {
		let record = record();
		let rotated = record.rotated("access-2", None, None, record.created_at);

		assert!(rotated.created_at > record.created_at);
	}

	#[test]
	fn debug_output_redacts_secrets() {
		let rendered = format!("{:?}", record());

		assert!(!rendered.contains("access\""));
		assert!(rendered.contains("<redacted>"));
		assert!(rendered.contains("acme.my.salesforce.com"));
	}
}
