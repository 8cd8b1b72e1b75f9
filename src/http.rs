//! HTTP transport seam shared by provider API calls and OAuth token exchanges.
//!
//! Providers never talk to an HTTP stack directly. They build an [`HttpRequest`], hand it to an
//! [`HttpTransport`], and receive an [`HttpResponse`] back. The `oauth2` crate is driven through
//! the same transport via [`TransportHandle`], which also records the response status and
//! `Retry-After` hint in a [`ResponseMetadataSlot`] so token-endpoint failures can be classified
//! after `oauth2` has consumed the response.

pub use oauth2::{HttpRequest, HttpResponse, http};

// crates.io
use http::{HeaderMap, header::RETRY_AFTER};
use oauth2::AsyncHttpClient;
use serde::de::DeserializeOwned;
use time::format_description::well_known::Rfc2822;
// self
use crate::{_prelude::*, error::BoxError};

/// Boxed future returned by [`HttpTransport::execute`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<HttpResponse, BoxError>> + 'a + Send>>;

/// Minimal asynchronous HTTP client contract.
///
/// Implementations return `Ok` for every response that reached the caller, whatever its status;
/// only transport-level failures (DNS, TLS, reset connections, malformed requests) are `Err`.
/// Those raw failures are normalized by [`crate::error::wrap_error`] at the call site.
pub trait HttpTransport
where
	Self: 'static + Send + Sync,
{
	/// Sends a fully-formed request.
	fn execute(&self, request: HttpRequest) -> TransportFuture<'_>;
}

/// Status and retry hint captured from the most recent response.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadata {
	/// HTTP status code, if a response arrived.
	pub status: Option<u16>,
	/// Retry-After hint expressed as a relative duration.
	pub retry_after: Option<StdDuration>,
}

/// Thread-safe slot for sharing [`ResponseMetadata`] between the transport and error mapping.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadataSlot(Arc<Mutex<Option<ResponseMetadata>>>);
impl ResponseMetadataSlot {
	/// Stores metadata for the current request.
	pub fn store(&self, meta: ResponseMetadata) {
		*self.0.lock() = Some(meta);
	}

	/// Returns the captured metadata, consuming it from the slot.
	pub fn take(&self) -> Option<ResponseMetadata> {
		self.0.lock().take()
	}
}

/// Transport failure surfaced to `oauth2` by [`TransportHandle`].
#[derive(Debug, ThisError)]
#[error(transparent)]
pub struct TransportFailure(pub BoxError);
impl TransportFailure {
	/// Returns the raw transport error.
	pub fn into_inner(self) -> BoxError {
		self.0
	}
}

/// [`AsyncHttpClient`] adapter that routes `oauth2` requests through an [`HttpTransport`].
#[derive(Clone)]
pub struct TransportHandle {
	transport: Arc<dyn HttpTransport>,
	slot: ResponseMetadataSlot,
}
impl TransportHandle {
	/// Binds `transport` to a metadata slot for a single token request.
	pub fn new(transport: Arc<dyn HttpTransport>, slot: ResponseMetadataSlot) -> Self {
		Self { transport, slot }
	}
}
impl<'c> AsyncHttpClient<'c> for TransportHandle {
	type Error = TransportFailure;
	type Future = Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		Box::pin(async move {
			self.slot.take();

			let response = self.transport.execute(request).await.map_err(TransportFailure)?;

			self.slot.store(ResponseMetadata {
				status: Some(response.status().as_u16()),
				retry_after: parse_retry_after(response.headers()),
			});

			Ok(response)
		})
	}
}
impl Debug for TransportHandle {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TransportHandle").field("slot", &self.slot).finish_non_exhaustive()
	}
}

/// [`HttpTransport`] backed by a shared reqwest client.
///
/// Token endpoints must answer directly, so custom clients handed to [`ReqwestTransport::new`]
/// should disable redirect following.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct ReqwestTransport(ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Wraps an existing reqwest client.
	pub fn new(client: ReqwestClient) -> Self {
		Self(client)
	}

	/// Builds a client that does not follow redirects.
	pub fn try_default() -> Result<Self> {
		let client = ReqwestClient::builder()
			.redirect(reqwest::redirect::Policy::none())
			.build()
			.map_err(|e| Error::configuration("Failed to build the HTTP client.").with_source(e))?;

		Ok(Self(client))
	}
}
#[cfg(feature = "reqwest")]
impl HttpTransport for ReqwestTransport {
	fn execute(&self, request: HttpRequest) -> TransportFuture<'_> {
		Box::pin(async move {
			let request = reqwest::Request::try_from(request)?;
			let response = self.0.execute(request).await?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let mut out = HttpResponse::new(response.bytes().await?.to_vec());

			*out.status_mut() = status;
			*out.headers_mut() = headers;

			Ok(out)
		})
	}
}

/// Response returned by a provider API call.
#[derive(Clone, Debug)]
pub struct ApiResponse {
	/// HTTP status code.
	pub status: u16,
	/// Response headers.
	pub headers: HeaderMap,
	/// Raw body bytes.
	pub body: Vec<u8>,
}
impl ApiResponse {
	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Parsed `Retry-After` header.
	pub fn retry_after(&self) -> Option<StdDuration> {
		parse_retry_after(&self.headers)
	}

	/// Body rendered as (lossy) UTF-8.
	pub fn text(&self) -> String {
		String::from_utf8_lossy(&self.body).into_owned()
	}

	/// Decodes the body as JSON, naming the offending field on failure.
	pub fn json<T>(&self) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let body = if self.body.is_empty() { b"null".as_slice() } else { self.body.as_slice() };
		let mut de = serde_json::Deserializer::from_slice(body);

		serde_path_to_error::deserialize(&mut de).map_err(|e| {
			Error::api(
				format!("Failed to decode provider response at `{}`.", e.path()),
				Some(self.status),
				Some(self.text()),
			)
			.with_source(e.into_inner())
		})
	}
}
impl From<HttpResponse> for ApiResponse {
	fn from(response: HttpResponse) -> Self {
		let status = response.status().as_u16();
		let (parts, body) = response.into_parts();

		Self { status, headers: parts.headers, body }
	}
}

/// Parses a `Retry-After` header given either as delta-seconds or as an HTTP date.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<StdDuration> {
	let value = headers.get(RETRY_AFTER)?;
	let raw = value.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u64>() {
		return Some(StdDuration::from_secs(secs));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return StdDuration::try_from(delta).ok();
		}
	}

	None
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn headers(value: &str) -> HeaderMap {
		let mut headers = HeaderMap::new();

		headers.insert(RETRY_AFTER, value.parse().expect("Header value should be valid."));

		headers
	}

	#[test]
	fn retry_after_accepts_seconds_and_dates() {
		assert_eq!(parse_retry_after(&headers("30")), Some(StdDuration::from_secs(30)));
		assert_eq!(parse_retry_after(&headers("Wed, 21 Oct 2015 07:28:00 GMT")), None);

		let future = OffsetDateTime::now_utc() + Duration::minutes(2);
		let rendered = future.format(&Rfc2822).expect("Date should format.");
		let parsed = parse_retry_after(&headers(&rendered)).expect("Future date should parse.");

		assert!(parsed > StdDuration::from_secs(100));
		assert!(parse_retry_after(&HeaderMap::new()).is_none());
	}

	#[test]
	fn json_errors_name_the_field() {
		#[derive(Debug, Deserialize)]
		struct Payload {
			#[allow(dead_code)]
			count: u32,
		}

		let response = ApiResponse {
			status: 200,
			headers: HeaderMap::new(),
			body: br#"{"count":"many"}"#.to_vec(),
		};
		let err = response.json::<Payload>().expect_err("Mistyped field should fail.");

		assert_eq!(err.name(), "ApiError");
		assert!(err.message().contains("count"));
		assert!(!err.is_retryable());
	}
}
