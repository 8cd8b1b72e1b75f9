//! Process-wide runtime shared by every provider instance.
//!
//! One [`IntegrationContext`] is built at startup and handed to each [`crate::provider::Provider`]
//! by `Arc`. It owns the rate limiter so throttling is accounted per provider across all tenants,
//! and it resolves the retry policy and timeouts each provider runs with.

// self
use crate::{
	_prelude::*,
	config::IntegrationSettings,
	http::HttpTransport,
	obs::{IntegrationLogger, LogSink, default_sink},
	provider::ProviderMetadata,
	rate_limit::RateLimiter,
	retry::RetryOptions,
};
#[cfg(feature = "reqwest")] use crate::http::ReqwestTransport;

/// Shared runtime for provider instances.
#[derive(Clone)]
pub struct IntegrationContext {
	settings: IntegrationSettings,
	rate_limiter: Arc<RateLimiter>,
	transport: Arc<dyn HttpTransport>,
	log_sink: Arc<dyn LogSink>,
}
impl IntegrationContext {
	/// Validates `settings` and builds a context over `transport`.
	pub fn new(settings: IntegrationSettings, transport: Arc<dyn HttpTransport>) -> Result<Self> {
		settings.validate()?;

		let rate_limiter = RateLimiter::new(settings.default_refill_rate)?;

		for (provider, rate) in &settings.provider_refill_rates {
			rate_limiter.register(provider, *rate)?;
		}

		Ok(Self { settings, rate_limiter: Arc::new(rate_limiter), transport, log_sink: default_sink() })
	}

	/// Builds a context over a default reqwest transport.
	#[cfg(feature = "reqwest")]
	pub fn with_reqwest(settings: IntegrationSettings) -> Result<Self> {
		Self::new(settings, Arc::new(ReqwestTransport::try_default()?))
	}

	/// Routes log entries to `sink`.
	pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
		self.log_sink = sink;

		self
	}

	/// Deployment settings.
	pub fn settings(&self) -> &IntegrationSettings {
		&self.settings
	}

	/// Shared rate limiter.
	pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
		&self.rate_limiter
	}

	/// Shared HTTP transport.
	pub fn transport(&self) -> &Arc<dyn HttpTransport> {
		&self.transport
	}

	/// Root logger without context.
	pub fn logger(&self) -> IntegrationLogger {
		IntegrationLogger::new(self.log_sink.clone())
	}

	/// Retry policy for `metadata`: global defaults, then provider-declared overrides, then
	/// deployment overrides.
	pub fn retry_options_for(&self, metadata: &ProviderMetadata) -> Result<RetryOptions> {
		let mut options = self.settings.retry.clone();

		if let Some(declared) = &metadata.retry {
			options = options.merged(declared);
		}
		if let Some(configured) = self.settings.provider_retry.get(&metadata.id) {
			options = options.merged(configured);
		}

		options.validate().map_err(|e| e.with_provider(metadata.id.clone()))?;

		Ok(options)
	}

	/// Applies the provider's declared rate limit unless the deployment configured one.
	///
	/// Registering the same rate again keeps the existing bucket, so instances created per
	/// request do not refill the shared budget.
	pub fn register_provider(&self, metadata: &ProviderMetadata) -> Result<()> {
		if self.settings.provider_refill_rates.contains_key(&metadata.id) {
			return Ok(());
		}

		let Some(rate) = metadata.rate_limit else {
			return Ok(());
		};

		if (self.rate_limiter.refill_rate(&metadata.id) - rate).abs() > f64::EPSILON {
			self.rate_limiter.register(&metadata.id, rate)?;
		}

		Ok(())
	}

	/// OAuth refresh margin.
	pub fn refresh_margin(&self) -> Duration {
		self.settings.refresh_margin()
	}

	/// Default per-request timeout.
	pub fn request_timeout(&self) -> StdDuration {
		self.settings.request_timeout()
	}
}
impl Debug for IntegrationContext {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("IntegrationContext")
			.field("settings", &self.settings)
			.field("rate_limiter", &self.rate_limiter)
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		auth::ProviderId,
		error::BoxError,
		http::{HttpRequest, TransportFuture},
		provider::AuthKind,
		retry::RetryOverrides,
	};

	struct Unreachable;
	impl HttpTransport for Unreachable {
		fn execute(&self, _: HttpRequest) -> TransportFuture<'_> {
			Box::pin(async { Err(BoxError::from("connection refused")) })
		}
	}

	fn metadata(id: &str, rate: Option<f64>) -> ProviderMetadata {
		let id = ProviderId::new(id).expect("Provider fixture should be valid.");
		let mut builder = ProviderMetadata::builder(id, AuthKind::ApiKey)
			.retry(RetryOverrides { max_attempts: Some(5), ..Default::default() });

		if let Some(rate) = rate {
			builder = builder.rate_limit(rate);
		}

		builder.build().expect("Metadata fixture should be valid.")
	}

	#[test]
	fn retry_layers_merge_in_order() {
		let mut settings = IntegrationSettings::default();
		let payroll = ProviderId::new("payroll").expect("Provider fixture should be valid.");

		settings
			.provider_retry
			.insert(payroll, RetryOverrides { initial_delay_ms: Some(250), ..Default::default() });

		let context =
			IntegrationContext::new(settings, Arc::new(Unreachable)).expect("Context should build.");
		let options = context
			.retry_options_for(&metadata("payroll", None))
			.expect("Merged options should be valid.");

		assert_eq!(options.max_attempts, 5);
		assert_eq!(options.initial_delay_ms, 250);
		assert_eq!(options.max_delay_ms, 30_000);
	}

	#[test]
	fn configured_rates_beat_declared_ones() {
		let mut settings = IntegrationSettings::default();
		let chat = ProviderId::new("chat").expect("Provider fixture should be valid.");

		settings.provider_refill_rates.insert(chat.clone(), 5.);

		let context =
			IntegrationContext::new(settings, Arc::new(Unreachable)).expect("Context should build.");

		context.register_provider(&metadata("chat", Some(2.))).expect("Registration should succeed.");
		context
			.register_provider(&metadata("calendar", Some(3.)))
			.expect("Registration should succeed.");

		let calendar = ProviderId::new("calendar").expect("Provider fixture should be valid.");

		assert_eq!(context.rate_limiter().refill_rate(&chat), 5.);
		assert_eq!(context.rate_limiter().refill_rate(&calendar), 3.);
	}
}
