//! Login initiation: state issuance and authorization URL construction.

// self
use crate::{
	_prelude::*,
	auth::{OAuthState, RedirectTarget, StateValue},
	flows::{Broker, common},
	http::TokenHttpClient,
	oauth::{OAuth2Facade, TransportErrorMapper},
	obs::{self, FlowKind},
	store::StoreError,
};

impl<C, M> Broker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Encodes `response_type=code`, the client id, the redirect URI registered for
	/// `redirect`, and `state` into the provider's authorize endpoint.
	///
	/// Pure: nothing is persisted and no request is sent.
	pub fn build_authorization_url(
		&self,
		state: &StateValue,
		redirect: RedirectTarget,
	) -> Result<Url> {
		common::facade(self)?.authorize_url(self.redirect_uris.get(redirect), state)
	}

	/// Persists `state` and returns the URL the caller should be redirected to.
	///
	/// Fails with [`Error::InvalidRequest`] for malformed states and [`Error::InvalidState`]
	/// when the state was issued before.
	pub async fn start_login(&self, state: &str, redirect: RedirectTarget) -> Result<Url> {
		obs::observe(FlowKind::AuthorizationCode, "start_login", async move {
			let state =
				StateValue::new(state).map_err(|e| Error::InvalidRequest { reason: e.to_string() })?;
			let url = self.build_authorization_url(&state, redirect)?;
			let record = OAuthState::new(state, redirect, OffsetDateTime::now_utc());

			self.store.save_state(record).await.map_err(|err| match err {
				StoreError::Conflict { .. } =>
					Error::InvalidState { reason: "state was already issued".into() },
				other => other.into(),
			})?;

			tracing::info!(redirect = %redirect, "issued OAuth state");

			Ok(url)
		})
		.await
	}

	/// Deletes states that outlived the configured TTL.
	pub async fn purge_expired_states(&self) -> Result<u64> {
		let cutoff = OffsetDateTime::now_utc() - self.settings.state_ttl;
		let purged = self.store.purge_expired_states(cutoff).await?;

		if purged > 0 {
			tracing::debug!(purged, "purged expired OAuth states");
		}

		Ok(purged)
	}
}
