//! Refresh token rotation with singleflight guards, CAS persistence, and metrics.
//!
//! [`Broker::refresh_token`] renews a stored record. Each call serializes on a guard keyed by
//! the record's refresh token, re-reads the record under the guard, and either adopts a rotation
//! a concurrent caller already performed or runs `grant_type=refresh_token` and persists the
//! result through [`BrokerStore::rotate_token`](crate::store::BrokerStore::rotate_token).
//! Provider rejections delete the record: the refresh token can never work again and callers
//! must run the full authorization flow.

mod metrics;

pub use metrics::RefreshMetrics;

// self
use crate::{
	_prelude::*,
	auth::TokenRecord,
	flows::{Broker, common},
	http::TokenHttpClient,
	oauth::{OAuth2Facade, TransportErrorMapper},
	obs::{self, FlowKind},
	store::CompareAndSwapOutcome,
};

impl<C, M> Broker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Refreshes `current`, returning the rotated record.
	///
	/// - Provider rejections, empty access tokens, and records without a refresh token delete
	///   the record and fail with [`Error::RefreshFailed`].
	/// - Transient provider or transport failures keep the record untouched.
	/// - The rotated record reuses the refresh token and instance URL unless the provider sent
	///   new ones, and its `created_at` is strictly later than `current.created_at`.
	pub async fn refresh_token(&self, current: &TokenRecord) -> Result<TokenRecord> {
		obs::observe(FlowKind::Refresh, "refresh_token", async move {
			self.refresh_metrics.record_attempt();

			let result = self.refresh_guarded(current).await;

			match &result {
				Ok(_) => self.refresh_metrics.record_success(),
				Err(_) => self.refresh_metrics.record_failure(),
			}

			result
		})
		.await
	}

	async fn refresh_guarded(&self, current: &TokenRecord) -> Result<TokenRecord> {
		let access = current.access_token.expose();

		if !current.can_refresh() {
			self.store.delete_token(access).await?;

			tracing::warn!("deleted token record without a refresh token");

			return Err(Error::RefreshFailed {
				reason: "no refresh token is stored for this session".into(),
			});
		}

		let key = common::guard_key(current.refresh_token.expose());
		let guard = common::flow_guard(self, &key);
		let result = {
			let mut last_rotation = guard.lock().await;

			self.refresh_locked(current, &mut last_rotation).await
		};

		common::release_flow_guard(self, &key, guard);

		result
	}

	async fn refresh_locked(
		&self,
		current: &TokenRecord,
		last_rotation: &mut Option<TokenRecord>,
	) -> Result<TokenRecord> {
		let access = current.access_token.expose();
		let stored = match self.store.fetch_token(access).await? {
			// Rotated in place while this caller waited for the guard.
			Some(record) if record.created_at > current.created_at => return Ok(record),
			Some(record) => record,
			None => {
				return last_rotation
					.as_ref()
					.filter(|rotated| rotated.created_at > current.created_at)
					.cloned()
					.ok_or(Error::InvalidCredential);
			},
		};
		let expected_refresh = stored.refresh_token.expose();
		let grant = match common::facade(self)?
			.refresh_token(self.strategy.as_ref(), expected_refresh)
			.await
		{
			Ok(grant) => grant,
			Err(err) => {
				if matches!(err, Error::RefreshFailed { .. }) {
					self.store.delete_token(access).await?;

					tracing::warn!(error = %err, "provider rejected refresh token; record deleted");
				}

				return Err(err);
			},
		};

		if grant.access_token.is_empty() {
			self.store.delete_token(access).await?;

			tracing::warn!("provider issued an empty access token; record deleted");

			return Err(Error::RefreshFailed {
				reason: "provider returned an empty access token".into(),
			});
		}

		let replacement = stored.rotated(
			grant.access_token,
			grant.refresh_token,
			grant.instance_url,
			OffsetDateTime::now_utc(),
		);
		let rotated = match self
			.store
			.rotate_token(access, expected_refresh, replacement.clone())
			.await?
		{
			CompareAndSwapOutcome::Updated => replacement,
			CompareAndSwapOutcome::Missing => {
				self.store.save_token(replacement.clone()).await?;

				replacement
			},
			CompareAndSwapOutcome::RefreshMismatch =>
				match self.store.fetch_token(access).await? {
					Some(existing) => existing,
					None => {
						self.store.save_token(replacement.clone()).await?;

						replacement
					},
				},
		};

		tracing::info!(
			reissued_same_token = rotated.access_token == current.access_token,
			"rotated access token"
		);

		*last_rotation = Some(rotated.clone());

		Ok(rotated)
	}
}
