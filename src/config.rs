//! Deployment settings for the integration runtime.

// std
use std::path::Path;
// self
use crate::{
	_prelude::*,
	auth::ProviderId,
	rate_limit::DEFAULT_REFILL_RATE,
	retry::{RetryOptions, RetryOverrides},
};

/// Deserializable settings document.
///
/// Every field has a default, so an empty JSON object is a valid configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IntegrationSettings {
	/// Retry policy applied to every provider.
	pub retry: RetryOptions,
	/// Per-provider retry overrides, applied over provider-declared ones.
	pub provider_retry: HashMap<ProviderId, RetryOverrides>,
	/// Refill rate for providers without a declared rate limit.
	pub default_refill_rate: f64,
	/// Per-provider refill rates, taking precedence over provider metadata.
	pub provider_refill_rates: HashMap<ProviderId, f64>,
	/// Seconds before expiry at which OAuth access tokens are refreshed.
	pub refresh_margin_secs: u64,
	/// Maximum age of an OAuth `state` value, in seconds.
	pub state_max_age_secs: u64,
	/// Default per-request timeout, in milliseconds.
	pub request_timeout_ms: u64,
}
impl IntegrationSettings {
	/// Parses settings from JSON, naming the offending field on failure.
	pub fn from_json_str(raw: &str) -> Result<Self> {
		let mut de = serde_json::Deserializer::from_str(raw);
		let settings: Self = serde_path_to_error::deserialize(&mut de).map_err(|e| {
			Error::configuration(format!("Invalid integration settings at `{}`.", e.path()))
				.with_source(e.into_inner())
		})?;

		settings.validate()?;

		Ok(settings)
	}

	/// Reads and parses a JSON settings file.
	pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let raw = std::fs::read_to_string(path).map_err(|e| {
			Error::configuration(format!("Failed to read settings from {}.", path.display()))
				.with_source(e)
		})?;

		Self::from_json_str(&raw)
	}

	/// Checks cross-field invariants.
	pub fn validate(&self) -> Result<()> {
		self.retry.validate()?;

		for (provider, overrides) in &self.provider_retry {
			self.retry.merged(overrides).validate().map_err(|e| e.with_provider(provider.clone()))?;
		}

		let rates = std::iter::once(&self.default_refill_rate).chain(self.provider_refill_rates.values());

		for rate in rates {
			if !rate.is_finite() || *rate <= 0. {
				return Err(Error::configuration(format!(
					"Refill rates must be positive numbers, got {rate}."
				)));
			}
		}

		if self.state_max_age_secs == 0 {
			return Err(Error::configuration("OAuth state max age must be positive."));
		}
		if self.request_timeout_ms == 0 {
			return Err(Error::configuration("Request timeout must be positive."));
		}

		Ok(())
	}

	/// OAuth refresh margin.
	pub fn refresh_margin(&self) -> Duration {
		Duration::seconds(i64::try_from(self.refresh_margin_secs).unwrap_or(i64::MAX))
	}

	/// OAuth state replay window.
	pub fn state_max_age(&self) -> Duration {
		Duration::seconds(i64::try_from(self.state_max_age_secs).unwrap_or(i64::MAX))
	}

	/// Default request timeout.
	pub fn request_timeout(&self) -> StdDuration {
		StdDuration::from_millis(self.request_timeout_ms)
	}
}
impl Default for IntegrationSettings {
	fn default() -> Self {
		Self {
			retry: RetryOptions::default(),
			provider_retry: HashMap::new(),
			default_refill_rate: DEFAULT_REFILL_RATE,
			provider_refill_rates: HashMap::new(),
			refresh_margin_secs: 300,
			state_max_age_secs: 600,
			request_timeout_ms: 30_000,
		}
	}
}
