//! Provider lifecycle and request pipeline.

// crates.io
use serde::de::DeserializeOwned;
use serde_json::json;
// self
use crate::{
	_prelude::*,
	context::IntegrationContext,
	error::wrap_error,
	http::ApiResponse,
	obs::{self, IntegrationLogger, Operation, OperationSpan, Outcome},
	provider::{
		AuthStrategy, IntegrationConfig, IntegrationState, OAuthClient, ProviderHooks,
		ProviderMetadata, RequestOptions,
	},
	retry::{RetryManager, RetryOptions},
};

/// Health report returned by [`Provider::check_connection`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
	/// Whether the health check passed.
	pub is_connected: bool,
	/// Integration state after the check.
	#[serde(rename = "estado")]
	pub state: IntegrationState,
	/// Failure message when the check did not pass.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub last_error: Option<String>,
	/// When the check finished.
	#[serde(with = "time::serde::rfc3339")]
	pub checked_at: OffsetDateTime,
}

#[derive(Clone, Debug)]
struct Session {
	config: IntegrationConfig,
	logger: IntegrationLogger,
	retry: RetryManager,
}

/// One provider type bound to a credential strategy and, after [`Provider::initialize`], to a
/// tenant's integration.
///
/// Every outbound call runs through `rate_limiter.execute(retry.execute(execute_request))`: the
/// shared bucket is charged once per logical call, and retries stay inside that budget.
pub struct Provider {
	metadata: Arc<ProviderMetadata>,
	auth: AuthStrategy,
	hooks: Arc<dyn ProviderHooks>,
	context: Arc<IntegrationContext>,
	retry_options: RetryOptions,
	session: RwLock<Option<Session>>,
}
impl Provider {
	/// Creates an uninitialized provider.
	///
	/// The strategy must match the credential scheme declared in `metadata`. The provider's
	/// declared rate limit is registered with the shared limiter.
	pub fn new(
		metadata: impl Into<Arc<ProviderMetadata>>,
		auth: impl Into<AuthStrategy>,
		hooks: Arc<dyn ProviderHooks>,
		context: Arc<IntegrationContext>,
	) -> Result<Self> {
		let metadata = metadata.into();
		let auth = auth.into();

		if auth.kind() != metadata.auth {
			return Err(Error::configuration(format!(
				"Provider `{}` declares {} credentials but was given {}.",
				metadata.id,
				metadata.auth,
				auth.kind()
			))
			.with_provider(metadata.id.clone()));
		}

		context.register_provider(&metadata)?;

		let retry_options = context.retry_options_for(&metadata)?;

		Ok(Self { metadata, auth, hooks, context, retry_options, session: RwLock::new(None) })
	}

	/// Provider metadata.
	pub fn metadata(&self) -> &ProviderMetadata {
		&self.metadata
	}

	/// Credential strategy.
	pub fn auth(&self) -> &AuthStrategy {
		&self.auth
	}

	/// Shared runtime.
	pub fn context(&self) -> &Arc<IntegrationContext> {
		&self.context
	}

	/// Retry policy resolved for this provider.
	pub fn retry_options(&self) -> &RetryOptions {
		&self.retry_options
	}

	/// OAuth client, or a `ConfigurationError` for static-credential providers.
	pub fn oauth(&self) -> Result<&OAuthClient> {
		match &self.auth {
			AuthStrategy::OAuth2(client) => Ok(&**client),
			_ => Err(Error::configuration(format!(
				"Provider `{}` does not use OAuth 2.0.",
				self.metadata.id
			))
			.with_provider(self.metadata.id.clone())),
		}
	}

	/// Whether [`Provider::initialize`] has been called since the last disconnect.
	pub fn is_initialized(&self) -> bool {
		self.session.read().is_some()
	}

	/// Snapshot of the bound integration config.
	pub fn config(&self) -> Option<IntegrationConfig> {
		self.session.read().as_ref().map(|session| session.config.clone())
	}

	/// Binds `config`, scoping the logger and retry manager to it.
	///
	/// Calling this again without [`Provider::disconnect`] is rejected.
	pub fn initialize(&self, config: IntegrationConfig) -> Result<()> {
		const OP: Operation = Operation::Initialize;

		obs::record_operation(OP, Outcome::Attempt);

		let result = self.bind(config);

		obs::record_operation(OP, Outcome::of(&result));

		result
	}

	/// Runs the provider's health check and records the outcome on the config.
	///
	/// Never fails: problems, including a missing [`Provider::initialize`], are reported in the
	/// returned status.
	pub async fn check_connection(&self) -> ConnectionStatus {
		const OP: Operation = Operation::CheckConnection;

		obs::record_operation(OP, Outcome::Attempt);

		let result = match self.session() {
			Ok(session) =>
				OperationSpan::new(OP, &self.metadata.id)
					.instrument(session.logger.measure(OP.as_str(), self.hooks.health_check(self)))
					.await,
			Err(e) => Err(e),
		};

		obs::record_operation(OP, Outcome::of(&result));

		let (state, last_error) = match &result {
			Ok(()) => (IntegrationState::Connected, None),
			Err(e) if self.is_initialized() =>
				(IntegrationState::Error, Some(e.message().to_owned())),
			Err(e) => (IntegrationState::Disconnected, Some(e.message().to_owned())),
		};

		if let Some(session) = self.session.write().as_mut() {
			session.config.transition(state, last_error.clone());
		}

		ConnectionStatus {
			is_connected: result.is_ok(),
			state,
			last_error,
			checked_at: OffsetDateTime::now_utc(),
		}
	}

	/// Sends `options` through the rate limiter and retry manager, returning the raw response.
	///
	/// Non-2xx responses are classified into typed errors; only 2xx responses are returned.
	pub async fn send(&self, options: RequestOptions) -> Result<ApiResponse> {
		const OP: Operation = Operation::Request;

		let session = self.session()?;
		let operation = format!("request {}", options.label());

		obs::record_operation(OP, Outcome::Attempt);

		let result = OperationSpan::new(OP, &self.metadata.id)
			.instrument(session.logger.measure(
				&operation,
				self.context.rate_limiter().execute(&self.metadata.id, options.cost, || {
					session.retry.execute(|| self.execute_request(&options))
				}),
			))
			.await;

		obs::record_operation(OP, Outcome::of(&result));

		result
	}

	/// Sends `options` and decodes the JSON response body.
	pub async fn make_request<T>(&self, options: RequestOptions) -> Result<T>
	where
		T: DeserializeOwned,
	{
		self.send(options).await?.json().map_err(|e| e.with_provider(self.metadata.id.clone()))
	}

	/// Runs the disconnect hook, marks the config disconnected, and unbinds it.
	///
	/// OAuth tokens held in memory are dropped as well. The config is unbound even when the
	/// hook fails; the hook's error is returned afterwards.
	pub async fn disconnect(&self) -> Result<()> {
		const OP: Operation = Operation::Disconnect;

		let session = self.session()?;

		obs::record_operation(OP, Outcome::Attempt);

		let result = OperationSpan::new(OP, &self.metadata.id)
			.instrument(session.logger.measure(OP.as_str(), self.hooks.on_disconnect(self)))
			.await;

		obs::record_operation(OP, Outcome::of(&result));

		if let AuthStrategy::OAuth2(client) = &self.auth {
			client.clear_tokens();
		}

		let mut config = session.config;

		config.transition(IntegrationState::Disconnected, None);
		session.logger.info("Provider disconnected.", json!({ "state": config.state }));
		*self.session.write() = None;

		result
	}

	/// Revokes OAuth tokens server-side through the revoke hook, then drops them from memory.
	///
	/// The in-memory tokens are cleared even when the hook fails.
	pub async fn revoke_tokens(&self) -> Result<()> {
		let client = self.oauth()?;
		let Some(tokens) = client.tokens() else {
			return Ok(());
		};
		let result = self.hooks.revoke_remote(self, &tokens).await;

		client.clear_tokens();

		match &result {
			Ok(()) => self.logger().info("OAuth tokens revoked.", serde_json::Value::Null),
			Err(e) => self.logger().failure("OAuth token revocation failed.", e),
		}

		result
	}

	/// Logger scoped to the bound integration, or to the provider alone before initialization.
	pub fn logger(&self) -> IntegrationLogger {
		match self.session.read().as_ref() {
			Some(session) => session.logger.clone(),
			None => self.context.logger().with_context("provider", self.metadata.id.as_str()),
		}
	}

	async fn execute_request(&self, options: &RequestOptions) -> Result<ApiResponse> {
		let provider = &self.metadata.id;
		let url = options.resolve_url(self.metadata.api_base_url.as_ref())?;
		let authorization = self.auth.authorization().await?;
		let request = options.to_http(&url, Some(authorization))?;
		let timeout = options.timeout.unwrap_or_else(|| self.context.request_timeout());
		let response =
			match tokio::time::timeout(timeout, self.context.transport().execute(request)).await {
				Ok(Ok(response)) => ApiResponse::from(response),
				Ok(Err(e)) => return Err(wrap_error(e, Some(provider))),
				Err(_) =>
					return Err(Error::timeout(format!(
						"Request {} exceeded {} ms.",
						options.label(),
						timeout.as_millis()
					))
					.with_provider(provider.clone())),
			};

		if response.is_success() {
			return Ok(response);
		}

		let err = if response.status == 401 {
			self.auth.on_unauthorized()
		} else {
			Error::from_status(response.status, response.retry_after(), Some(response.text()))
		};

		if let Some(wait) = err.retry_after() {
			self.context.rate_limiter().pause(provider, wait);
		}

		Err(err.with_provider(provider.clone()))
	}

	fn bind(&self, config: IntegrationConfig) -> Result<()> {
		let provider = &self.metadata.id;

		if config.provider != *provider {
			return Err(Error::configuration(format!(
				"Integration `{}` belongs to provider `{}`, not `{provider}`.",
				config.id, config.provider
			))
			.with_provider(provider.clone()));
		}

		let mut slot = self.session.write();

		if slot.is_some() {
			return Err(Error::configuration(format!(
				"Provider `{provider}` is already initialized; disconnect it first."
			))
			.with_provider(provider.clone()));
		}

		let logger = self
			.context
			.logger()
			.with_context("provider", provider.as_str())
			.with_context("integration", config.id.as_str())
			.with_context("tenant", config.tenant.as_str());
		let retry = RetryManager::new(self.retry_options.clone())?
			.with_provider(provider.clone())
			.with_logger(logger.clone());

		logger.info("Provider initialized.", json!({ "state": config.state }));

		*slot = Some(Session { config, logger, retry });

		Ok(())
	}

	fn session(&self) -> Result<Session> {
		self.session.read().clone().ok_or_else(|| {
			Error::configuration(format!(
				"Provider `{}` is not initialized; call initialize first.",
				self.metadata.id
			))
			.with_provider(self.metadata.id.clone())
		})
	}
}
impl Debug for Provider {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Provider")
			.field("metadata", &self.metadata)
			.field("auth", &self.auth)
			.field("retry_options", &self.retry_options)
			.field("initialized", &self.is_initialized())
			.finish_non_exhaustive()
	}
}
