//! Bounded exponential backoff with jitter.
//!
//! [`RetryManager::execute`] re-runs a fallible async operation while its errors are transient.
//! Delays grow geometrically from `initial_delay_ms` up to `max_delay_ms` and are perturbed by
//! ±20% so tenants hitting the same provider do not retry in lockstep. A server-provided
//! `Retry-After` on a rate-limit error replaces the computed delay.

// crates.io
use rand::Rng;
use serde_json::json;
// self
use crate::{
	_prelude::*,
	auth::ProviderId,
	error::is_network_error,
	obs::{self, IntegrationLogger},
};

/// Symmetric jitter ratio applied to computed delays.
pub const JITTER_RATIO: f64 = 0.2;

/// Resolved retry policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryOptions {
	/// Total attempts including the first one.
	pub max_attempts: u32,
	/// Delay after the first failure, in milliseconds.
	pub initial_delay_ms: u64,
	/// Upper bound for computed delays, in milliseconds.
	pub max_delay_ms: u64,
	/// Growth factor between consecutive delays.
	pub backoff_multiplier: f64,
	/// Extra error names, codes, or message fragments treated as retryable.
	pub retryable_errors: Option<Vec<String>>,
}
impl RetryOptions {
	/// Applies `overrides` on top of these options.
	pub fn merged(&self, overrides: &RetryOverrides) -> Self {
		Self {
			max_attempts: overrides.max_attempts.unwrap_or(self.max_attempts),
			initial_delay_ms: overrides.initial_delay_ms.unwrap_or(self.initial_delay_ms),
			max_delay_ms: overrides.max_delay_ms.unwrap_or(self.max_delay_ms),
			backoff_multiplier: overrides.backoff_multiplier.unwrap_or(self.backoff_multiplier),
			retryable_errors: overrides
				.retryable_errors
				.clone()
				.or_else(|| self.retryable_errors.clone()),
		}
	}

	/// Rejects policies that could never run or never stop growing sensibly.
	pub fn validate(&self) -> Result<()> {
		if self.max_attempts == 0 {
			return Err(Error::configuration("Retry max_attempts must be at least 1."));
		}
		if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1. {
			return Err(Error::configuration("Retry backoff_multiplier must be at least 1."));
		}
		if self.initial_delay_ms > self.max_delay_ms {
			return Err(Error::configuration(
				"Retry initial_delay_ms must not exceed max_delay_ms.",
			));
		}

		Ok(())
	}
}
impl Default for RetryOptions {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			initial_delay_ms: 1_000,
			max_delay_ms: 30_000,
			backoff_multiplier: 2.,
			retryable_errors: None,
		}
	}
}

/// Partial [`RetryOptions`] declared by a provider or a deployment.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryOverrides {
	/// See [`RetryOptions::max_attempts`].
	pub max_attempts: Option<u32>,
	/// See [`RetryOptions::initial_delay_ms`].
	pub initial_delay_ms: Option<u64>,
	/// See [`RetryOptions::max_delay_ms`].
	pub max_delay_ms: Option<u64>,
	/// See [`RetryOptions::backoff_multiplier`].
	pub backoff_multiplier: Option<f64>,
	/// See [`RetryOptions::retryable_errors`].
	pub retryable_errors: Option<Vec<String>>,
}

/// Runs operations under a [`RetryOptions`] policy.
#[derive(Clone, Debug)]
pub struct RetryManager {
	options: RetryOptions,
	provider: Option<ProviderId>,
	logger: Option<IntegrationLogger>,
}
impl RetryManager {
	/// Creates a manager after validating `options`.
	pub fn new(options: RetryOptions) -> Result<Self> {
		options.validate()?;

		Ok(Self { options, provider: None, logger: None })
	}

	/// Tags retries with `provider` for metrics.
	pub fn with_provider(mut self, provider: ProviderId) -> Self {
		self.provider = Some(provider);

		self
	}

	/// Logs scheduled retries through `logger`.
	pub fn with_logger(mut self, logger: IntegrationLogger) -> Self {
		self.logger = Some(logger);

		self
	}

	/// Active policy.
	pub fn options(&self) -> &RetryOptions {
		&self.options
	}

	/// Runs `f` until it succeeds, fails permanently, or attempts run out.
	///
	/// The final error is returned exactly as `f` produced it.
	pub async fn execute<T, F, Fut>(&self, mut f: F) -> Result<T>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let mut attempt = 1;

		loop {
			let e = match f().await {
				Ok(value) => return Ok(value),
				Err(e) => e,
			};

			if !self.should_retry(&e, attempt) {
				return Err(e);
			}

			let delay = self.calculate_delay(attempt, &e);

			if let Some(logger) = &self.logger {
				logger.warn(
					"Retrying after transient failure.",
					json!({
						"attempt": attempt,
						"max_attempts": self.options.max_attempts,
						"delay_ms": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
						"error": e.code(),
					}),
				);
			}
			if let Some(provider) = &self.provider {
				obs::record_retry(provider);
			}

			tokio::time::sleep(delay).await;

			attempt += 1;
		}
	}

	/// Whether a failure on `attempt` (1-based) should be retried.
	pub fn should_retry(&self, error: &Error, attempt: u32) -> bool {
		if attempt >= self.options.max_attempts {
			return false;
		}

		error.is_rate_limit()
			|| error.is_retryable()
			|| self.listed(error)
			|| is_network_error(error.message())
	}

	/// Delay before the attempt following `attempt`.
	pub fn calculate_delay(&self, attempt: u32, error: &Error) -> StdDuration {
		if let Some(wait) = error.retry_after() {
			return wait;
		}

		let base = self.base_delay(attempt).as_secs_f64() * 1_000.;
		let offset = base * JITTER_RATIO * rand::rng().random_range(-1.0..=1.0);

		StdDuration::from_millis((base + offset).max(0.).round() as u64)
	}

	/// Delay before the attempt following `attempt`, without jitter.
	pub fn base_delay(&self, attempt: u32) -> StdDuration {
		let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
		let grown = self.options.initial_delay_ms as f64 * self.options.backoff_multiplier.powi(exponent);
		let capped = grown.min(self.options.max_delay_ms as f64);

		StdDuration::from_millis(capped as u64)
	}

	fn listed(&self, error: &Error) -> bool {
		let Some(list) = &self.options.retryable_errors else {
			return false;
		};

		list.iter().any(|entry| {
			entry == error.name() || entry == error.code() || error.message().contains(entry.as_str())
		})
	}
}
impl Default for RetryManager {
	fn default() -> Self {
		Self { options: RetryOptions::default(), provider: None, logger: None }
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn base_delay_grows_and_caps() {
		let manager = RetryManager::new(RetryOptions { max_attempts: 12, ..Default::default() })
			.expect("Options should be valid.");
		let delays = (1..=12).map(|attempt| manager.base_delay(attempt)).collect::<Vec<_>>();

		assert_eq!(delays[0], StdDuration::from_secs(1));
		assert_eq!(delays[1], StdDuration::from_secs(2));
		assert_eq!(delays[2], StdDuration::from_secs(4));
		assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
		assert!(delays.iter().all(|delay| *delay <= StdDuration::from_secs(30)));
		assert_eq!(manager.base_delay(u32::MAX), StdDuration::from_secs(30));
	}

	#[test]
	fn jitter_stays_within_twenty_percent() {
		let manager = RetryManager::default();
		let err = Error::network("reset");

		for _ in 0..500 {
			let delay = manager.calculate_delay(2, &err).as_millis();

			assert!((1_600..=2_400).contains(&delay), "delay {delay} outside jitter band");
		}
	}

	#[test]
	fn retry_after_is_used_verbatim() {
		let manager = RetryManager::default();
		let err = Error::rate_limit("slow down", Some(StdDuration::from_secs(7)));

		assert_eq!(manager.calculate_delay(1, &err), StdDuration::from_secs(7));
	}

	#[test]
	fn classification_follows_kind_list_and_heuristic() {
		let manager = RetryManager::new(RetryOptions {
			retryable_errors: Some(vec!["PermissionDeniedError".into(), "try later".into()]),
			..Default::default()
		})
		.expect("Options should be valid.");

		assert!(manager.should_retry(&Error::timeout("slow"), 1));
		assert!(manager.should_retry(&Error::rate_limit("429", None), 2));
		assert!(!manager.should_retry(&Error::timeout("slow"), 3));
		assert!(!manager.should_retry(&Error::authentication("nope"), 1));
		assert!(manager.should_retry(&Error::permission_denied("nope"), 1));
		assert!(manager.should_retry(&Error::api("please try later", Some(400), None), 1));
		assert!(manager.should_retry(&Error::api("socket hang up", None, None), 1));
	}

	#[test]
	fn overrides_merge_over_defaults() {
		let merged = RetryOptions::default()
			.merged(&RetryOverrides { max_attempts: Some(5), ..Default::default() });

		assert_eq!(merged.max_attempts, 5);
		assert_eq!(merged.initial_delay_ms, 1_000);
		assert!(RetryManager::new(RetryOptions { max_attempts: 0, ..Default::default() }).is_err());
		assert!(
			RetryOptions { initial_delay_ms: 5, max_delay_ms: 1, ..Default::default() }
				.validate()
				.is_err()
		);
	}
}
