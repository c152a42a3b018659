// self
use crm_oauth_gateway::{
	_preludet::*,
	auth::{RedirectTarget, TokenRecord},
	error::{ConfigError, Error, Result, TransientError, TransportError},
	flows::{Broker, Session},
	http::{ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
	oauth::{
		TransportErrorMapper,
		oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse},
	},
	provider::{DefaultProviderStrategy, ProviderStrategy},
	store::{BrokerStore, MemoryStore},
};

type FakeBroker = Broker<FakeHttpClient, RecordingTransportErrorMapper>;

#[derive(Debug)]
enum FakeTransportError {
	Throttled,
}
impl Display for FakeTransportError {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Throttled => write!(f, "Transport throttled."),
		}
	}
}
impl StdError for FakeTransportError {}

#[derive(Clone, Copy)]
struct FakeHttpClient {
	retry_after: Duration,
}
impl FakeHttpClient {
	fn throttled(retry_after: Duration) -> Self {
		Self { retry_after }
	}
}
impl TokenHttpClient for FakeHttpClient {
	type Handle = FakeHttpHandle;
	type TransportError = FakeTransportError;

	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle {
		FakeHttpHandle { slot, retry_after: self.retry_after }
	}
}

struct FakeHttpHandle {
	slot: ResponseMetadataSlot,
	retry_after: Duration,
}
impl<'a> AsyncHttpClient<'a> for FakeHttpHandle {
	type Error = HttpClientError<FakeTransportError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'a + Send + Sync>>;

	fn call(&'a self, _request: HttpRequest) -> Self::Future {
		let slot = self.slot.clone();
		let retry_after = self.retry_after;

		Box::pin(async move {
			assert!(
				slot.take().is_none(),
				"ResponseMetadataSlot must be clear before dispatching a request."
			);
			slot.store(ResponseMetadata { status: Some(429), retry_after: Some(retry_after) });

			Err(HttpClientError::Reqwest(Box::new(FakeTransportError::Throttled)))
		})
	}
}

#[derive(Clone, Default)]
struct RecordingTransportErrorMapper {
	metadata: Arc<Mutex<Vec<Option<ResponseMetadata>>>>,
}
impl RecordingTransportErrorMapper {
	fn recorded_metadata(&self) -> Vec<Option<ResponseMetadata>> {
		self.metadata.lock().clone()
	}
}
impl TransportErrorMapper<FakeTransportError> for RecordingTransportErrorMapper {
	fn map_transport_error(
		&self,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<FakeTransportError>,
	) -> Error {
		let status = meta.and_then(|value| value.status);
		let retry_after = meta.and_then(|value| value.retry_after);

		self.metadata.lock().push(meta.cloned());

		match err {
			HttpClientError::Reqwest(inner) => TransientError::TokenEndpoint {
				message: format!("Fake transport error: {inner}"),
				status,
				retry_after,
			}
			.into(),
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => TransportError::Io(inner).into(),
			other => TransientError::TokenEndpoint {
				message: format!("Unhandled fake transport failure: {other:?}"),
				status,
				retry_after,
			}
			.into(),
		}
	}
}

fn build_fake_broker(
	retry_after: Duration,
	mapper: Arc<RecordingTransportErrorMapper>,
) -> (FakeBroker, Arc<MemoryStore>) {
	let store_backend = Arc::new(MemoryStore::default());
	let store: Arc<dyn BrokerStore> = store_backend.clone();
	let strategy: Arc<dyn ProviderStrategy> = Arc::new(DefaultProviderStrategy);
	let broker = Broker::with_http_client(
		store,
		test_descriptor("https://mock.example.com"),
		strategy,
		"throttled-client",
		test_redirect_uris(),
		Arc::new(FakeHttpClient::throttled(retry_after)),
		mapper,
	)
	.with_client_secret("throttled-secret");

	(broker, store_backend)
}

fn assert_throttled(err: Error, expected_retry_after: Duration) {
	match err {
		Error::Transient(TransientError::TokenEndpoint { status, retry_after, .. }) => {
			assert_eq!(status, Some(429));
			assert_eq!(retry_after, Some(expected_retry_after));
		},
		other => panic!("Unexpected error variant: {other:?}."),
	}
}

#[tokio::test]
async fn fake_token_http_client_surfaces_metadata() {
	let mapper = Arc::new(RecordingTransportErrorMapper::default());
	let (broker, store) = build_fake_broker(Duration::seconds(5), mapper);
	let err = broker
		.exchange_code("code-throttled", RedirectTarget::Direct)
		.await
		.expect_err("Exchange should be throttled with HTTP 429.");

	assert_throttled(err, Duration::seconds(5));
	assert_eq!(store.token_count(), 0, "A throttled exchange must not persist tokens.");
}

#[tokio::test]
async fn fake_mapper_captures_response_metadata() {
	let mapper = Arc::new(RecordingTransportErrorMapper::default());
	let (broker, _store) = build_fake_broker(Duration::seconds(30), mapper.clone());
	let _ = broker
		.exchange_code("code-metadata", RedirectTarget::Delegated)
		.await
		.expect_err("Exchange should be throttled with HTTP 429.");
	let observed = mapper.recorded_metadata();

	assert_eq!(observed.len(), 1, "Mapper must record a single request.");

	let meta = observed
		.first()
		.and_then(|value| value.clone())
		.expect("Response metadata should be recorded exactly once.");

	assert_eq!(meta.status, Some(429));
	assert_eq!(meta.retry_after, Some(Duration::seconds(30)));
}

#[tokio::test]
async fn data_api_calls_share_the_transport_mapper() {
	let mapper = Arc::new(RecordingTransportErrorMapper::default());
	let (broker, store) = build_fake_broker(Duration::seconds(7), mapper.clone());
	let record = seed_token(
		&store,
		"access-fake",
		"refresh-fake",
		"https://acme.example.com",
		OffsetDateTime::now_utc(),
	)
	.await;
	let mut session = Session::from_record(&record);
	let err = broker
		.fetch_resource(&mut session, "limits")
		.await
		.expect_err("Data API call should be throttled with HTTP 429.");

	assert_throttled(err, Duration::seconds(7));
	assert_eq!(mapper.recorded_metadata().len(), 1);
	assert!(!session.rotated, "A transport failure must not rotate the session.");

	let stored: Option<TokenRecord> = store
		.fetch_token("access-fake")
		.await
		.expect("Stored token lookup should succeed.");

	assert_eq!(stored, Some(record), "A transport failure must leave the record untouched.");
}
