//! Demonstrates plugging a non-reqwest HTTP stack into a provider.
//!
//! 1. Implement [`HttpTransport`] so every request, including token refreshes driven by the
//!    `oauth2` crate, goes through your own client.
//! 2. Return `Ok` for every response that arrived, whatever its status, and `Err` only for
//!    transport failures; the provider classifies both into the crate's error taxonomy.
//! 3. Build an [`IntegrationContext`] over the transport and hand it to each [`Provider`].

// std
use std::{
	error::Error as StdError,
	fmt::{Display, Formatter, Result as FmtResult},
	sync::Arc,
};
// crates.io
use color_eyre::Result;
use serde::Deserialize;
use time::Duration;
use url::Url;
// self
use integration_hub::{
	auth::{IntegrationId, OAuth2Tokens, ProviderId, TenantId},
	config::IntegrationSettings,
	context::IntegrationContext,
	http::{HttpRequest, HttpResponse, HttpTransport, TransportFuture, http},
	oauth::OAuthApp,
	provider::{
		AuthKind, IntegrationConfig, OAuthClient, Provider, ProviderMetadata, RequestOptions,
		StandardHooks,
	},
	retry::RetryOptions,
};

#[derive(Debug, Deserialize)]
struct Event {
	id: String,
	summary: String,
}

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let settings = IntegrationSettings {
		retry: RetryOptions { max_attempts: 2, initial_delay_ms: 200, ..Default::default() },
		..Default::default()
	};
	let context = Arc::new(IntegrationContext::new(settings.clone(), Arc::new(CannedTransport))?);
	let provider = calendar_provider(context)?;

	// The held token expires inside the refresh margin, so the first call refreshes it.
	let events: Vec<Event> = provider.make_request(RequestOptions::get("events")).await?;

	for event in &events {
		println!("Event {}: {}.", event.id, event.summary);
	}
	println!(
		"Refreshes recorded by the OAuth client: {}.",
		provider.oauth()?.refresh_metrics().successes()
	);

	let status = provider.check_connection().await;

	println!("Connection check: {}.", serde_json::to_string(&status)?);

	match provider.send(RequestOptions::get("throttled")).await {
		Ok(_) => println!("Canned transport unexpectedly succeeded."),
		Err(e) =>
			println!("Throttled call surfaced as {} (retry after {:?}).", e.name(), e.retry_after()),
	}

	let offline = Arc::new(IntegrationContext::new(settings, Arc::new(OfflineTransport))?);
	let offline_provider = calendar_provider(offline)?;

	match offline_provider.send(RequestOptions::get("events")).await {
		Ok(_) => println!("Offline transport unexpectedly succeeded."),
		Err(e) => println!("Transport failure classified as {}: {e}.", e.code()),
	}

	Ok(())
}

fn calendar_provider(context: Arc<IntegrationContext>) -> Result<Provider> {
	let metadata = Arc::new(
		ProviderMetadata::builder(ProviderId::new("calendar")?, AuthKind::OAuth2)
			.authorization_endpoint(Url::parse("https://calendar.example.com/oauth/authorize")?)
			.token_endpoint(Url::parse("https://calendar.example.com/oauth/token")?)
			.api_base_url(Url::parse("https://calendar.example.com/v1/")?)
			.build()?,
	);
	let app = OAuthApp::new(
		"demo-client",
		"demo-secret",
		Url::parse("https://hr.example.com/oauth/callback")?,
	);
	let client = OAuthClient::new(metadata.clone(), app, &context)?;

	client.set_tokens(
		OAuth2Tokens::builder("stale-access")
			.refresh_token("demo-refresh")
			.expires_in(Duration::minutes(2))
			.build()?,
	);

	let provider =
		Provider::new(metadata.clone(), client, Arc::new(StandardHooks::new("health")), context)?;

	provider.initialize(IntegrationConfig::new(
		IntegrationId::new("int-demo")?,
		metadata.id.clone(),
		TenantId::new("tenant-acme")?,
	))?;

	Ok(provider)
}

/// Answers from a fixed routing table instead of the network.
struct CannedTransport;
impl CannedTransport {
	fn respond(request: &HttpRequest) -> http::Result<HttpResponse> {
		let (status, body, retry_after) = match request.uri().path() {
			"/oauth/token" => (
				200,
				"{\"access_token\":\"fresh-access\",\"token_type\":\"bearer\",\"expires_in\":3600}",
				None,
			),
			"/v1/events" => (200, "[{\"id\":\"evt-1\",\"summary\":\"Quarterly review\"}]", None),
			"/v1/health" => (200, "{\"ok\":true}", None),
			"/v1/throttled" => (429, "{\"error\":\"slow down\"}", Some("1")),
			_ => (404, "{\"error\":\"not found\"}", None),
		};
		let mut builder = http::Response::builder()
			.status(status)
			.header(http::header::CONTENT_TYPE, "application/json");

		if let Some(seconds) = retry_after {
			builder = builder.header(http::header::RETRY_AFTER, seconds);
		}

		builder.body(body.as_bytes().to_vec())
	}
}
impl HttpTransport for CannedTransport {
	fn execute(&self, request: HttpRequest) -> TransportFuture<'_> {
		Box::pin(async move { Ok(Self::respond(&request)?) })
	}
}

/// Fails every request the way a resolver outage would.
struct OfflineTransport;
impl HttpTransport for OfflineTransport {
	fn execute(&self, request: HttpRequest) -> TransportFuture<'_> {
		let host = request.uri().host().unwrap_or("unknown").to_owned();

		Box::pin(async move { Err(OfflineError { host }.into()) })
	}
}

#[derive(Debug)]
struct OfflineError {
	host: String,
}
impl Display for OfflineError {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "getaddrinfo ENOTFOUND {}", self.host)
	}
}
impl StdError for OfflineError {}
