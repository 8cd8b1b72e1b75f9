// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::obs::{Operation, Outcome};

/// Thread-safe counters for token refreshes issued by one component.
#[derive(Debug, Default)]
pub struct RefreshMetrics {
	attempts: AtomicU64,
	success: AtomicU64,
	failure: AtomicU64,
}
impl RefreshMetrics {
	/// Refresh calls sent to a token endpoint.
	pub fn attempts(&self) -> u64 {
		self.attempts.load(Ordering::Relaxed)
	}

	/// Refresh calls that produced a usable token set.
	pub fn successes(&self) -> u64 {
		self.success.load(Ordering::Relaxed)
	}

	/// Refresh calls that failed.
	pub fn failures(&self) -> u64 {
		self.failure.load(Ordering::Relaxed)
	}

	pub(crate) fn record_attempt(&self) {
		self.attempts.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record<T>(&self, result: &crate::error::Result<T>) {
		match result {
			Ok(_) => self.success.fetch_add(1, Ordering::Relaxed),
			Err(_) => self.failure.fetch_add(1, Ordering::Relaxed),
		};
	}
}

/// Records an operation outcome via the global metrics recorder (when enabled).
pub fn record_operation(operation: Operation, outcome: Outcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"integration_hub_operation_total",
			"operation" => operation.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (operation, outcome);
	}
}

/// Counts a retry scheduled for `provider`.
pub fn record_retry(provider: &str) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!("integration_hub_retry_total", "provider" => provider.to_owned())
			.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = provider;
	}
}

/// Counts a caller suspended by the rate limiter for `provider`.
pub fn record_throttle_wait(provider: &str) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!("integration_hub_throttle_wait_total", "provider" => provider.to_owned())
			.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = provider;
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn recorders_are_callable_without_a_global_recorder() {
		record_operation(Operation::Request, Outcome::Failure);
		record_retry("calendar");
		record_throttle_wait("calendar");
	}

	#[test]
	fn refresh_metrics_count_outcomes() {
		let metrics = RefreshMetrics::default();

		metrics.record_attempt();
		metrics.record::<()>(&Ok(()));
		metrics.record_attempt();
		metrics.record::<()>(&Err(crate::error::Error::token_refresh("rejected")));

		assert_eq!(metrics.attempts(), 2);
		assert_eq!(metrics.successes(), 1);
		assert_eq!(metrics.failures(), 1);
	}
}
