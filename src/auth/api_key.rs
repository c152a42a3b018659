//! Gateway-issued API keys and the owner email they are bound to.

// self
use crate::{_prelude::*, auth::token::secret::TokenSecret};

/// Random bytes drawn for every issued key.
pub const API_KEY_ENTROPY_BYTES: usize = 32;

/// Owner email attached to an API key.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);
impl Email {
	/// Validates and wraps an email address.
	///
	/// Accepts a single `@` separating a non-empty local part from a dotted domain; no
	/// whitespace anywhere.
	pub fn parse(value: impl Into<String>) -> Result<Self> {
		let value = value.into();
		let invalid = |reason: &str| Error::InvalidRequest { reason: format!("email {reason}") };

		if value.chars().any(char::is_whitespace) {
			return Err(invalid("must not contain whitespace"));
		}

		let Some((local, domain)) = value.split_once('@') else {
			return Err(invalid("must contain `@`"));
		};

		if local.is_empty() || domain.is_empty() || domain.contains('@') {
			return Err(invalid("must have exactly one `@` between non-empty parts"));
		}
		if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
			return Err(invalid("domain must be a dotted host name"));
		}

		Ok(Self(value))
	}

	/// Borrowed view of the address.
	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Domain part, safe to log.
	pub fn domain(&self) -> &str {
		self.0.rsplit_once('@').map(|(_, domain)| domain).unwrap_or_default()
	}
}
impl TryFrom<String> for Email {
	type Error = Error;

	fn try_from(value: String) -> Result<Self> {
		Self::parse(value)
	}
}
impl From<Email> for String {
	fn from(value: Email) -> Self {
		value.0
	}
}
impl Debug for Email {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "Email({})", self.0)
	}
}
impl Display for Email {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.0)
	}
}

/// Persisted API key record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
	/// Key secret presented by callers.
	pub api_key: TokenSecret,
	/// Owner email.
	pub email: Email,
	/// Issue instant.
	pub created_at: OffsetDateTime,
}
impl ApiKey {
	/// Draws a fresh random key for `email`.
	pub fn generate(email: Email, created_at: OffsetDateTime) -> Self {
		Self { api_key: TokenSecret::generate(API_KEY_ENTROPY_BYTES), email, created_at }
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn email_validation_rejects_malformed_addresses() {
		assert!(Email::parse("a@b.com").is_ok());

		for bad in ["", "ab.com", "@b.com", "a@", "a@b", "a@@b.com", "a b@c.com", "a@.com"] {
			assert!(
				matches!(Email::parse(bad), Err(Error::InvalidRequest { .. })),
				"`{bad}` should be rejected."
			);
		}
	}

	#[test]
	fn generated_keys_are_unique_per_issue() {
		let email = Email::parse("a@b.com").expect("Email fixture should be valid.");
		let now = OffsetDateTime::now_utc();
		let first = ApiKey::generate(email.clone(), now);
		let second = ApiKey::generate(email, now);

		assert_ne!(first.api_key, second.api_key);
		assert_eq!(first.email, second.email);
	}
}
