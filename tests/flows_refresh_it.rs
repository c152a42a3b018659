// crates.io
use httpmock::prelude::*;
use serde_json::json;
// self
use crm_oauth_gateway::{_preludet::*, auth::TokenRecord, store::BrokerStore};

fn an_hour_ago() -> OffsetDateTime {
	OffsetDateTime::now_utc() - Duration::hours(1)
}

#[tokio::test]
async fn refresh_rotates_the_record_in_place() {
	let server = MockServer::start_async().await;
	let (broker, store) = build_reqwest_test_broker(test_descriptor(&server.base_url()));
	let seeded =
		seed_token(&store, "access-old", "refresh-old", &server.base_url(), an_hour_ago()).await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/services/oauth2/token")
				.form_urlencoded_tuple("grant_type", "refresh_token")
				.form_urlencoded_tuple("refresh_token", "refresh-old");
			then.status(200)
				.header("content-type", "application/json")
				.json_body(json!({"access_token": "access-new", "token_type": "Bearer"}));
		})
		.await;
	let rotated = broker.refresh_token(&seeded).await.expect("Refresh should succeed.");

	mock.assert_async().await;

	assert_eq!(rotated.access_token.expose(), "access-new");
	assert_eq!(rotated.refresh_token.expose(), "refresh-old", "Refresh token is reused.");
	assert_eq!(rotated.instance_url, seeded.instance_url);
	assert!(rotated.created_at > seeded.created_at);
	assert_eq!(store.token_count(), 1, "Rotation must not leave the old key behind.");
	assert!(
		store.fetch_token("access-old").await.expect("Fetch should succeed.").is_none(),
		"The old access token no longer resolves."
	);
	assert_eq!(
		store.fetch_token("access-new").await.expect("Fetch should succeed."),
		Some(rotated.clone())
	);
	assert_eq!(broker.refresh_metrics.attempts(), 1);
	assert_eq!(broker.refresh_metrics.successes(), 1);
}

#[tokio::test]
async fn refresh_adopts_replacement_refresh_token() {
	let server = MockServer::start_async().await;
	let (broker, store) = build_reqwest_test_broker(test_descriptor(&server.base_url()));
	let seeded =
		seed_token(&store, "access-old", "refresh-old", &server.base_url(), an_hour_ago()).await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/services/oauth2/token");
			then.status(200).header("content-type", "application/json").json_body(json!({
				"access_token": "access-new",
				"refresh_token": "refresh-new",
				"token_type": "Bearer"
			}));
		})
		.await;
	let rotated = broker.refresh_token(&seeded).await.expect("Refresh should succeed.");

	mock.assert_async().await;

	assert_eq!(rotated.refresh_token.expose(), "refresh-new");
}

#[tokio::test]
async fn reissued_identical_access_token_updates_in_place() {
	let server = MockServer::start_async().await;
	let (broker, store) = build_reqwest_test_broker(test_descriptor(&server.base_url()));
	let seeded =
		seed_token(&store, "access-same", "refresh-same", &server.base_url(), an_hour_ago()).await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/services/oauth2/token");
			then.status(200)
				.header("content-type", "application/json")
				.json_body(json!({"access_token": "access-same", "token_type": "Bearer"}));
		})
		.await;
	let rotated = broker.refresh_token(&seeded).await.expect("Refresh should succeed.");

	mock.assert_async().await;

	assert_eq!(rotated.access_token, seeded.access_token);
	assert!(rotated.created_at > seeded.created_at);
	assert_eq!(store.token_count(), 1);

	let stored = store
		.fetch_token("access-same")
		.await
		.expect("Fetch should succeed.")
		.expect("Record should remain present.");

	assert_eq!(stored.created_at, rotated.created_at);
}

#[tokio::test]
async fn provider_rejection_deletes_the_record() {
	let server = MockServer::start_async().await;
	let (broker, store) = build_reqwest_test_broker(test_descriptor(&server.base_url()));
	let seeded =
		seed_token(&store, "access-revoked", "refresh-revoked", &server.base_url(), an_hour_ago())
			.await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/services/oauth2/token");
			then.status(400)
				.header("content-type", "application/json")
				.json_body(json!({"error": "invalid_grant", "error_description": "expired access/refresh token"}));
		})
		.await;
	let err = broker.refresh_token(&seeded).await.expect_err("Revoked refresh tokens should fail.");

	mock.assert_async().await;

	assert!(matches!(err, Error::RefreshFailed { .. }));
	assert_eq!(err.status_code(), 401);
	assert_eq!(store.token_count(), 0);
	assert_eq!(broker.refresh_metrics.failures(), 1);
}

#[tokio::test]
async fn empty_access_token_deletes_the_record() {
	let server = MockServer::start_async().await;
	let (broker, store) = build_reqwest_test_broker(test_descriptor(&server.base_url()));
	let seeded =
		seed_token(&store, "access-blank", "refresh-blank", &server.base_url(), an_hour_ago())
			.await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/services/oauth2/token");
			then.status(200)
				.header("content-type", "application/json")
				.json_body(json!({"access_token": "", "token_type": "Bearer"}));
		})
		.await;
	let err = broker.refresh_token(&seeded).await.expect_err("Empty access tokens should fail.");

	mock.assert_async().await;

	assert!(matches!(err, Error::RefreshFailed { .. }));
	assert_eq!(err.status_code(), 401);
	assert_eq!(store.token_count(), 0, "A failed refresh must not leave the record behind.");
	assert_eq!(broker.refresh_metrics.failures(), 1);
}

#[tokio::test]
async fn provider_outage_keeps_the_record() {
	let server = MockServer::start_async().await;
	let (broker, store) = build_reqwest_test_broker(test_descriptor(&server.base_url()));
	let seeded =
		seed_token(&store, "access-kept", "refresh-kept", &server.base_url(), an_hour_ago()).await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/services/oauth2/token");
			then.status(502).body("bad gateway");
		})
		.await;
	let err = broker.refresh_token(&seeded).await.expect_err("Outages should fail.");

	mock.assert_async().await;

	assert!(err.is_upstream_unavailable(), "Unexpected error: {err:?}");
	assert_eq!(
		store.fetch_token("access-kept").await.expect("Fetch should succeed."),
		Some(seeded),
		"Transient failures must not touch the record."
	);
}

#[tokio::test]
async fn records_without_refresh_token_are_dropped_without_calling_the_provider() {
	let server = MockServer::start_async().await;
	let (broker, store) = build_reqwest_test_broker(test_descriptor(&server.base_url()));
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/services/oauth2/token");
			then.status(200);
		})
		.await;
	let record = TokenRecord::builder()
		.access_token("access-only")
		.instance_url(server.base_url())
		.created_at(an_hour_ago())
		.build()
		.expect("Record fixture should build.");

	store.save_token(record.clone()).await.expect("Seeding should succeed.");

	let err = broker.refresh_token(&record).await.expect_err("Refresh should be impossible.");

	assert!(matches!(err, Error::RefreshFailed { .. }));
	assert_eq!(store.token_count(), 0);

	mock.assert_calls_async(0).await;
}

#[tokio::test]
async fn concurrent_refreshes_hit_the_provider_once() {
	let server = MockServer::start_async().await;
	let (broker, store) = build_reqwest_test_broker(test_descriptor(&server.base_url()));
	let seeded =
		seed_token(&store, "access-shared", "refresh-shared", &server.base_url(), an_hour_ago())
			.await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/services/oauth2/token");
			then.status(200)
				.header("content-type", "application/json")
				.delay(std::time::Duration::from_millis(50))
				.json_body(json!({"access_token": "access-singleflight", "token_type": "Bearer"}));
		})
		.await;
	let (first, second, third) = tokio::join!(
		broker.refresh_token(&seeded),
		broker.refresh_token(&seeded),
		broker.refresh_token(&seeded),
	);

	for result in [first, second, third] {
		let record = result.expect("Every caller should observe the rotation.");

		assert_eq!(record.access_token.expose(), "access-singleflight");
	}

	mock.assert_calls_async(1).await;

	assert_eq!(store.token_count(), 1);
}

#[tokio::test]
async fn refreshing_an_outdated_copy_returns_the_stored_rotation() {
	let server = MockServer::start_async().await;
	let (broker, store) = build_reqwest_test_broker(test_descriptor(&server.base_url()));
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/services/oauth2/token");
			then.status(200);
		})
		.await;
	let outdated = seed_token(
		&store,
		"access-same",
		"refresh-same",
		&server.base_url(),
		OffsetDateTime::now_utc() - Duration::hours(3),
	)
	.await;
	// Another instance already rotated the record (same access token reissued).
	let current =
		seed_token(&store, "access-same", "refresh-same", &server.base_url(), an_hour_ago()).await;
	let refreshed = broker.refresh_token(&outdated).await.expect("Refresh should succeed.");

	assert_eq!(refreshed, current);

	mock.assert_calls_async(0).await;
}
