//! OAuth `state` nonces and the redirect target they were issued for.

// self
use crate::{_prelude::*, auth::id::StateValue};

/// Which of the two configured redirect URIs an authorization request used.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectTarget {
	/// The caller completes the flow against the gateway's own callback.
	Direct,
	/// A third-party client initiated the flow and receives the callback itself.
	#[default]
	Delegated,
}
impl RedirectTarget {
	/// Stable lowercase label used in query strings and storage.
	pub fn as_str(self) -> &'static str {
		match self {
			RedirectTarget::Direct => "direct",
			RedirectTarget::Delegated => "delegated",
		}
	}
}
impl Display for RedirectTarget {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
impl FromStr for RedirectTarget {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		match s {
			"direct" => Ok(RedirectTarget::Direct),
			"delegated" => Ok(RedirectTarget::Delegated),
			other => Err(Error::InvalidRequest {
				reason: format!("unknown redirect target `{other}`"),
			}),
		}
	}
}

/// Single-use nonce persisted between login initiation and the callback.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthState {
	/// Opaque value echoed back by the provider.
	pub state: StateValue,
	/// Redirect URI the authorization URL was built with.
	pub redirect: RedirectTarget,
	/// Issue instant.
	pub created_at: OffsetDateTime,
}
impl OAuthState {
	/// Creates a state issued at `created_at`.
	pub fn new(state: StateValue, redirect: RedirectTarget, created_at: OffsetDateTime) -> Self {
		Self { state, redirect, created_at }
	}

	/// Returns `true` once the state is older than `ttl` at `instant`.
	pub fn is_expired_at(&self, instant: OffsetDateTime, ttl: Duration) -> bool {
		instant - self.created_at > ttl
	}
}
