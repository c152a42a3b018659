//! Shared helpers for flow implementations (facade construction, singleflight guards).

// crates.io
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	auth::TokenRecord,
	flows::Broker,
	http::TokenHttpClient,
	oauth::{BasicFacade, TransportErrorMapper},
};

pub(crate) type FlowGuard = Arc<AsyncMutex<Option<TokenRecord>>>;

/// Builds the `oauth2` facade for the broker's descriptor and credentials.
pub(crate) fn facade<C, M>(broker: &Broker<C, M>) -> Result<BasicFacade<C, M>>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	BasicFacade::from_descriptor(
		&broker.descriptor,
		&broker.client_id,
		broker.client_secret.as_deref(),
		broker.http_client.clone(),
		broker.transport_mapper.clone(),
	)
}

/// Key under which refreshes of one refresh token are serialized.
///
/// Hashed so the guard map never holds a usable secret.
pub(crate) fn guard_key(refresh_token: &str) -> String {
	let digest = Sha256::digest(refresh_token.as_bytes());

	digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Returns (and creates on demand) the singleflight guard for `key`.
///
/// The guard's slot carries the record produced by the last successful rotation so waiters
/// can adopt it instead of calling the provider again.
pub(crate) fn flow_guard<C, M>(broker: &Broker<C, M>, key: &str) -> FlowGuard
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	let mut guards = broker.flow_guards.lock();

	guards.entry(key.to_owned()).or_insert_with(|| Arc::new(AsyncMutex::new(None))).clone()
}

/// Drops the guard for `key` once no other caller holds or waits on it.
pub(crate) fn release_flow_guard<C, M>(broker: &Broker<C, M>, key: &str, guard: FlowGuard)
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	let mut guards = broker.flow_guards.lock();

	// One reference lives in the map, one is `guard`.
	if Arc::strong_count(&guard) <= 2 {
		guards.remove(key);
	}
}

#[cfg(test)]
pub(crate) fn guard_count<C, M>(broker: &Broker<C, M>) -> usize
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	broker.flow_guards.lock().len()
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::_preludet::{build_reqwest_test_broker, test_descriptor};

	#[test]
	fn guard_keys_are_stable_digests() {
		let key = guard_key("refresh-1");

		assert_eq!(key.len(), 64);
		assert_eq!(key, guard_key("refresh-1"));
		assert_ne!(key, guard_key("refresh-2"));
		assert!(!key.contains("refresh"));
	}

	#[test]
	fn guards_are_dropped_once_the_last_holder_releases() {
		let (broker, _) = build_reqwest_test_broker(test_descriptor("https://login.example.com"));
		let first = flow_guard(&broker, "key");
		let second = flow_guard(&broker, "key");

		assert!(Arc::ptr_eq(&first, &second));
		assert_eq!(guard_count(&broker), 1);

		release_flow_guard(&broker, "key", first);

		assert_eq!(guard_count(&broker), 1, "A waiter still holds the guard.");

		release_flow_guard(&broker, "key", second);

		assert_eq!(guard_count(&broker), 0);
	}
}
