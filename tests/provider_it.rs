#![cfg(feature = "reqwest")]

// crates.io
use httpmock::prelude::*;
use serde_json::Value;
// self
use integration_hub::{
	_preludet::*,
	auth::{IntegrationId, OAuth2Tokens, ProviderId, TenantId},
	config::IntegrationSettings,
	context::IntegrationContext,
	oauth::OAuthApp,
	provider::{
		ApiKeyAuth, AuthKind, BasicAuth, IntegrationConfig, IntegrationState, OAuthClient,
		Provider, ProviderHooks, ProviderMetadata, RequestOptions, StandardHooks,
	},
	retry::RetryOptions,
};

const CLIENT_ID: &str = "client-provider";
const CLIENT_SECRET: &str = "secret-provider";

fn single_attempt_settings() -> IntegrationSettings {
	IntegrationSettings {
		retry: RetryOptions { max_attempts: 1, ..Default::default() },
		..Default::default()
	}
}

fn metadata(server: &MockServer, id: &str, auth: AuthKind) -> ProviderMetadata {
	let mut builder = ProviderMetadata::builder(
		ProviderId::new(id).expect("Provider identifier should be valid for provider test."),
		auth,
	)
	.name(id.to_uppercase())
	.api_base_url(
		Url::parse(&server.url("/api")).expect("Mock API base URL should parse successfully."),
	);

	if auth == AuthKind::OAuth2 {
		builder = builder
			.authorization_endpoint(
				Url::parse(&server.url("/authorize"))
					.expect("Mock authorize endpoint should parse successfully."),
			)
			.token_endpoint(
				Url::parse(&server.url("/token"))
					.expect("Mock token endpoint should parse successfully."),
			);
	}

	builder.build().expect("Provider metadata should build successfully.")
}

fn integration(provider: &ProviderMetadata) -> IntegrationConfig {
	IntegrationConfig::new(
		IntegrationId::new(format!("int-{}", provider.id))
			.expect("Integration identifier should be valid for provider test."),
		provider.id.clone(),
		TenantId::new("tenant-provider").expect("Tenant identifier should be valid."),
	)
}

fn hooks() -> Arc<dyn ProviderHooks> {
	Arc::new(StandardHooks::new("health"))
}

fn oauth_provider(
	server: &MockServer,
	context: Arc<IntegrationContext>,
	expires_in: Duration,
) -> Provider {
	let metadata = Arc::new(metadata(server, "calendar", AuthKind::OAuth2));
	let app = OAuthApp::new(
		CLIENT_ID,
		CLIENT_SECRET,
		Url::parse("https://hr.example.com/oauth/callback")
			.expect("Redirect URI fixture should parse successfully."),
	);
	let client = OAuthClient::new(metadata.clone(), app, &context)
		.expect("OAuth client should build successfully.");

	client.set_tokens(
		OAuth2Tokens::builder("access-old")
			.refresh_token("refresh-old")
			.expires_in(expires_in)
			.build()
			.expect("Token fixture should build successfully."),
	);

	let provider = Provider::new(metadata.clone(), client, hooks(), context)
		.expect("OAuth provider should build successfully.");

	provider.initialize(integration(&metadata)).expect("Provider should initialize.");

	provider
}

#[tokio::test]
async fn uninitialized_providers_reject_requests() {
	let server = MockServer::start_async().await;
	let (context, _) = build_test_context(IntegrationSettings::default());
	let provider = Provider::new(
		metadata(&server, "chat", AuthKind::ApiKey),
		ApiKeyAuth::new("key-123"),
		hooks(),
		context,
	)
	.expect("API-key provider should build successfully.");
	let err = provider
		.send(RequestOptions::get("me"))
		.await
		.expect_err("Requests before initialize should fail.");

	assert_eq!(err.kind(), &ErrorKind::Configuration);

	let status = provider.check_connection().await;

	assert!(!status.is_connected);
	assert_eq!(status.state, IntegrationState::Disconnected);
	assert!(provider.disconnect().await.is_err());
}

#[tokio::test]
async fn mismatched_strategies_are_rejected() {
	let server = MockServer::start_async().await;
	let (context, _) = build_test_context(IntegrationSettings::default());
	let err = Provider::new(
		metadata(&server, "chat", AuthKind::ApiKey),
		BasicAuth::new("user", "pass"),
		hooks(),
		context,
	)
	.expect_err("Basic credentials on an API-key provider should fail.");

	assert_eq!(err.kind(), &ErrorKind::Configuration);
}

#[tokio::test]
async fn api_key_is_sent_and_json_is_decoded() {
	let server = MockServer::start_async().await;
	let (context, sink) = build_test_context(IntegrationSettings::default());
	let metadata = metadata(&server, "chat", AuthKind::ApiKey);
	let provider = Provider::new(metadata.clone(), ApiKeyAuth::new("key-123"), hooks(), context)
		.expect("API-key provider should build successfully.");

	provider.initialize(integration(&metadata)).expect("Provider should initialize.");

	let mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/me").header("authorization", "Bearer key-123");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"id\":\"U123\",\"name\":\"Ada\"}");
		})
		.await;
	let body: Value = provider
		.make_request(RequestOptions::get("me"))
		.await
		.expect("Authenticated request should succeed.");

	mock.assert_async().await;

	assert_eq!(body["name"], "Ada");
	assert!(provider.initialize(integration(&metadata)).is_err());

	let entries = sink.entries();

	assert!(entries.iter().any(|entry| entry.context.get("tenant").is_some()));
	assert!(entries.iter().all(|entry| !entry.to_json().contains("key-123")));
}

#[tokio::test]
async fn throttled_responses_surface_rate_limit_errors() {
	let server = MockServer::start_async().await;
	let (context, _) = build_test_context(single_attempt_settings());
	let metadata = metadata(&server, "chat", AuthKind::Basic);
	let provider =
		Provider::new(metadata.clone(), BasicAuth::new("user", "pass"), hooks(), context.clone())
			.expect("Basic provider should build successfully.");

	provider.initialize(integration(&metadata)).expect("Provider should initialize.");

	let mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/messages");
			then.status(429).header("retry-after", "30").body("slow down");
		})
		.await;
	let err = provider
		.send(RequestOptions::get("messages"))
		.await
		.expect_err("Throttled request should fail.");

	mock.assert_async().await;

	assert!(err.is_rate_limit());
	assert_eq!(err.retry_after(), Some(StdDuration::from_secs(30)));
	assert_eq!(err.provider(), Some(&metadata.id));
	assert!(!context.rate_limiter().can_execute(&metadata.id, 1.));
}

#[tokio::test]
async fn unauthorized_static_credentials_are_not_retried() {
	let server = MockServer::start_async().await;
	let (context, _) = build_test_context(IntegrationSettings::default());
	let metadata = metadata(&server, "chat", AuthKind::ApiKey);
	let provider = Provider::new(metadata.clone(), ApiKeyAuth::new("revoked"), hooks(), context)
		.expect("API-key provider should build successfully.");

	provider.initialize(integration(&metadata)).expect("Provider should initialize.");

	let mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/me");
			then.status(401);
		})
		.await;
	let err = provider
		.send(RequestOptions::get("me"))
		.await
		.expect_err("Rejected credentials should fail.");

	mock.assert_calls_async(1).await;

	assert_eq!(err.kind(), &ErrorKind::Authentication);
}

#[tokio::test]
async fn tokens_inside_the_refresh_margin_are_refreshed_before_use() {
	let server = MockServer::start_async().await;
	let (context, _) = build_test_context(IntegrationSettings::default());
	let provider = oauth_provider(&server, context, Duration::minutes(4));
	let token = server
		.mock_async(|when, then| {
			when.method(POST).path("/token").body_includes("grant_type=refresh_token");
			then.status(200).header("content-type", "application/json").body(
				"{\"access_token\":\"access-new\",\"token_type\":\"bearer\",\"expires_in\":3600}",
			);
		})
		.await;
	let api = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/events").header("authorization", "Bearer access-new");
			then.status(200).header("content-type", "application/json").body("[]");
		})
		.await;

	provider.send(RequestOptions::get("events")).await.expect("Request should succeed.");
	provider.send(RequestOptions::get("events")).await.expect("Request should succeed.");

	token.assert_calls_async(1).await;
	api.assert_calls_async(2).await;

	let client = provider.oauth().expect("Provider should use OAuth.");
	let tokens = client.tokens().expect("Tokens should be held.");

	assert_eq!(tokens.refresh_token.as_ref().map(|secret| secret.expose()), Some("refresh-old"));
	assert_eq!(client.refresh_metrics().successes(), 1);
}

#[tokio::test]
async fn concurrent_requests_share_one_refresh() {
	let server = MockServer::start_async().await;
	let (context, _) = build_test_context(IntegrationSettings::default());
	let provider = oauth_provider(&server, context, Duration::minutes(1));
	let token = server
		.mock_async(|when, then| {
			when.method(POST).path("/token").body_includes("grant_type=refresh_token");
			then.status(200).header("content-type", "application/json").body(
				"{\"access_token\":\"access-shared\",\"token_type\":\"bearer\",\"expires_in\":3600}",
			);
		})
		.await;
	let api = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/events").header("authorization", "Bearer access-shared");
			then.status(200).header("content-type", "application/json").body("[]");
		})
		.await;
	let (a, b, c, d) = tokio::join!(
		provider.send(RequestOptions::get("events")),
		provider.send(RequestOptions::get("events")),
		provider.send(RequestOptions::get("events")),
		provider.send(RequestOptions::get("events")),
	);

	for result in [a, b, c, d] {
		result.expect("Every concurrent request should succeed.");
	}

	token.assert_calls_async(1).await;
	api.assert_calls_async(4).await;

	let client = provider.oauth().expect("Provider should use OAuth.");

	assert_eq!(client.refresh_metrics().successes(), 1);
}

#[tokio::test]
async fn tokens_outside_the_refresh_margin_are_used_as_is() {
	let server = MockServer::start_async().await;
	let (context, _) = build_test_context(IntegrationSettings::default());
	let provider = oauth_provider(&server, context, Duration::minutes(6));
	let token = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(500);
		})
		.await;
	let api = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/events").header("authorization", "Bearer access-old");
			then.status(200).header("content-type", "application/json").body("[]");
		})
		.await;

	provider.send(RequestOptions::get("events")).await.expect("Request should succeed.");

	token.assert_calls_async(0).await;
	api.assert_calls_async(1).await;
}

#[tokio::test]
async fn passing_health_checks_mark_the_integration_connected() {
	let server = MockServer::start_async().await;
	let (context, _) = build_test_context(single_attempt_settings());
	let metadata = metadata(&server, "chat", AuthKind::ApiKey);
	let provider = Provider::new(metadata.clone(), ApiKeyAuth::new("key-123"), hooks(), context)
		.expect("API-key provider should build successfully.");

	provider.initialize(integration(&metadata)).expect("Provider should initialize.");
	server
		.mock_async(|when, then| {
			when.method(GET).path("/api/health");
			then.status(200);
		})
		.await;

	let status = provider.check_connection().await;

	assert!(status.is_connected);
	assert_eq!(status.state, IntegrationState::Connected);
	assert!(status.last_error.is_none());
}

#[tokio::test]
async fn failing_health_checks_report_state_without_failing() {
	let server = MockServer::start_async().await;
	let (context, _) = build_test_context(single_attempt_settings());
	let metadata = metadata(&server, "chat", AuthKind::ApiKey);
	let provider = Provider::new(metadata.clone(), ApiKeyAuth::new("key-123"), hooks(), context)
		.expect("API-key provider should build successfully.");

	provider.initialize(integration(&metadata)).expect("Provider should initialize.");
	server
		.mock_async(|when, then| {
			when.method(GET).path("/api/health");
			then.status(503).body("maintenance");
		})
		.await;

	let status = provider.check_connection().await;

	assert!(!status.is_connected);
	assert_eq!(status.state, IntegrationState::Error);
	assert!(status.last_error.is_some());
	assert_eq!(provider.config().map(|config| config.state), Some(IntegrationState::Error));

	let wire = serde_json::to_value(&status).expect("Status should serialize.");

	assert_eq!(wire["estado"], "error");
	assert_eq!(wire["isConnected"], false);

	provider.disconnect().await.expect("Disconnect should succeed.");

	assert!(!provider.is_initialized());
}
