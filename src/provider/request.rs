//! Request descriptions consumed by [`crate::provider::Provider::send`].

// crates.io
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	http::{
		HttpRequest,
		http::{
			HeaderMap, HeaderName, HeaderValue, Method,
			header::{ACCEPT, CONTENT_TYPE},
		},
	},
};

/// Cost charged against the rate limiter when none is specified.
pub const DEFAULT_REQUEST_COST: f64 = 1.;

/// Where a request is sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestTarget {
	/// Path joined to the provider's API base URL.
	Path(String),
	/// Absolute URL.
	Url(Url),
}

/// Request payload.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum RequestBody {
	/// No body.
	#[default]
	Empty,
	/// JSON document.
	Json(Value),
	/// `application/x-www-form-urlencoded` pairs.
	Form(Vec<(String, String)>),
}

/// One provider API call.
#[derive(Clone, Debug)]
pub struct RequestOptions {
	/// HTTP method.
	pub method: Method,
	/// Destination.
	pub target: RequestTarget,
	/// Query pairs appended to the URL.
	pub query: Vec<(String, String)>,
	/// Extra headers; the authorization header is added by the provider.
	pub headers: HeaderMap,
	/// Payload.
	pub body: RequestBody,
	/// Per-attempt deadline; the context default applies when `None`.
	pub timeout: Option<StdDuration>,
	/// Tokens charged against the provider's bucket.
	pub cost: f64,
}
impl RequestOptions {
	/// Request to a path under the API base URL.
	pub fn new(method: Method, path: impl Into<String>) -> Self {
		Self::with_target(method, RequestTarget::Path(path.into()))
	}

	/// Request to an absolute URL.
	pub fn url(method: Method, url: Url) -> Self {
		Self::with_target(method, RequestTarget::Url(url))
	}

	/// `GET` request.
	pub fn get(path: impl Into<String>) -> Self {
		Self::new(Method::GET, path)
	}

	/// `POST` request.
	pub fn post(path: impl Into<String>) -> Self {
		Self::new(Method::POST, path)
	}

	/// `PUT` request.
	pub fn put(path: impl Into<String>) -> Self {
		Self::new(Method::PUT, path)
	}

	/// `PATCH` request.
	pub fn patch(path: impl Into<String>) -> Self {
		Self::new(Method::PATCH, path)
	}

	/// `DELETE` request.
	pub fn delete(path: impl Into<String>) -> Self {
		Self::new(Method::DELETE, path)
	}

	fn with_target(method: Method, target: RequestTarget) -> Self {
		Self {
			method,
			target,
			query: Vec::new(),
			headers: HeaderMap::new(),
			body: RequestBody::Empty,
			timeout: None,
			cost: DEFAULT_REQUEST_COST,
		}
	}

	/// Appends a query pair.
	pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.query.push((key.into(), value.into()));

		self
	}

	/// Sets a header.
	pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
		self.headers.insert(name, value);

		self
	}

	/// Serializes `body` as the JSON payload.
	pub fn json(mut self, body: &impl Serialize) -> Result<Self> {
		let value = serde_json::to_value(body)
			.map_err(|e| Error::configuration("Request body is not serializable.").with_source(e))?;

		self.body = RequestBody::Json(value);

		Ok(self)
	}

	/// Sets a form payload.
	pub fn form<I, K, V>(mut self, pairs: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		self.body =
			RequestBody::Form(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect());

		self
	}

	/// Sets the per-attempt deadline.
	pub fn timeout(mut self, timeout: StdDuration) -> Self {
		self.timeout = Some(timeout);

		self
	}

	/// Sets the rate-limit cost.
	pub fn cost(mut self, cost: f64) -> Self {
		self.cost = cost;

		self
	}

	/// Log-friendly `METHOD target` label.
	pub fn label(&self) -> String {
		match &self.target {
			RequestTarget::Path(path) => format!("{} {path}", self.method),
			RequestTarget::Url(url) => format!("{} {}", self.method, url.path()),
		}
	}

	/// Resolves the final URL against `base`.
	pub fn resolve_url(&self, base: Option<&Url>) -> Result<Url> {
		let mut url = match (&self.target, base) {
			(RequestTarget::Url(url), _) => url.clone(),
			(RequestTarget::Path(path), Some(base)) => {
				let joined = format!(
					"{}/{}",
					base.as_str().trim_end_matches('/'),
					path.trim_start_matches('/')
				);

				Url::parse(&joined).map_err(|e| {
					Error::configuration(format!("Request path `{path}` is invalid.")).with_source(e)
				})?
			},
			(RequestTarget::Path(path), None) =>
				return Err(Error::configuration(format!(
					"Request path `{path}` needs an API base URL."
				))),
		};

		if !self.query.is_empty() {
			url.query_pairs_mut().extend_pairs(&self.query);
		}

		Ok(url)
	}

	/// Builds the transport request with an optional authorization header.
	pub fn to_http(
		&self,
		url: &Url,
		authorization: Option<(HeaderName, HeaderValue)>,
	) -> Result<HttpRequest> {
		let (content_type, body) = match &self.body {
			RequestBody::Empty => (None, Vec::new()),
			RequestBody::Json(value) => (
				Some("application/json"),
				serde_json::to_vec(value).map_err(|e| {
					Error::configuration("Request body is not serializable.").with_source(e)
				})?,
			),
			RequestBody::Form(pairs) => (
				Some("application/x-www-form-urlencoded"),
				url::form_urlencoded::Serializer::new(String::new())
					.extend_pairs(pairs)
					.finish()
					.into_bytes(),
			),
		};
		let mut request = HttpRequest::new(body);

		*request.method_mut() = self.method.clone();
		*request.uri_mut() = url.as_str().parse().map_err(|e| {
			Error::configuration(format!("URL `{url}` is not a valid request URI.")).with_source(e)
		})?;

		let headers = request.headers_mut();

		headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

		if let Some(content_type) = content_type {
			headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
		}
		for (name, value) in &self.headers {
			headers.insert(name.clone(), value.clone());
		}
		if let Some((name, value)) = authorization {
			headers.insert(name, value);
		}

		Ok(request)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::http::http::header::AUTHORIZATION;

	fn base() -> Url {
		Url::parse("https://api.example.com/v2/").expect("Base URL fixture should parse.")
	}

	#[test]
	fn paths_join_the_base_url() {
		let url = RequestOptions::get("/calendars/primary/events")
			.query("maxResults", "10")
			.resolve_url(Some(&base()))
			.expect("URL should resolve.");

		assert_eq!(url.as_str(), "https://api.example.com/v2/calendars/primary/events?maxResults=10");
		assert!(RequestOptions::get("x").resolve_url(None).is_err());
	}

	#[test]
	fn http_request_carries_body_and_headers() {
		let options = RequestOptions::post("messages")
			.json(&serde_json::json!({ "text": "hello" }))
			.expect("JSON body should serialize.");
		let url = options.resolve_url(Some(&base())).expect("URL should resolve.");
		let request = options
			.to_http(&url, Some((AUTHORIZATION, HeaderValue::from_static("Bearer abc"))))
			.expect("Request should build.");

		assert_eq!(request.method(), Method::POST);
		assert_eq!(request.uri().to_string(), "https://api.example.com/v2/messages");
		assert_eq!(request.headers()[CONTENT_TYPE], "application/json");
		assert_eq!(request.headers()[AUTHORIZATION], "Bearer abc");
		assert_eq!(request.body().as_slice(), br#"{"text":"hello"}"#);
	}

	#[test]
	fn form_bodies_are_urlencoded() {
		let options = RequestOptions::post("token").form([("a", "1 2"), ("b", "x&y")]);
		let url = options.resolve_url(Some(&base())).expect("URL should resolve.");
		let request = options.to_http(&url, None).expect("Request should build.");

		assert_eq!(request.body().as_slice(), b"a=1+2&b=x%26y");
		assert_eq!(options.label(), "POST token");
	}
}
