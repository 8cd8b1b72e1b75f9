//! Per-provider token-bucket throttle.
//!
//! Each provider identifier owns one bucket holding up to ten seconds of burst
//! (`capacity = refill_rate * 10`). Callers that find the bucket short are suspended on a timer
//! until enough tokens accumulate, so the limiter shapes throughput instead of rejecting work.
//! Buckets live only in process memory and are created lazily on first use.

// crates.io
use tokio::time::{self, Instant};
// self
use crate::{_prelude::*, auth::ProviderId, obs};

/// Refill rate (tokens per second) used when a provider declares none.
pub const DEFAULT_REFILL_RATE: f64 = 1.0;

/// Seconds of refill a full bucket holds.
pub const BURST_SECONDS: f64 = 10.0;

/// Snapshot of one provider's bucket.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketStatus {
	/// Tokens currently available.
	pub tokens: f64,
	/// Maximum tokens.
	pub capacity: f64,
	/// Tokens added per second.
	pub refill_rate: f64,
}

#[derive(Clone, Debug)]
struct TokenBucket {
	tokens: f64,
	capacity: f64,
	refill_rate: f64,
	last_refill: Instant,
}
impl TokenBucket {
	fn new(refill_rate: f64, now: Instant) -> Self {
		let capacity = refill_rate * BURST_SECONDS;

		Self { tokens: capacity, capacity, refill_rate, last_refill: now }
	}

	// `last_refill` may sit in the future after a server-imposed pause; nothing accrues until then.
	fn refill(&mut self, now: Instant) {
		if now <= self.last_refill {
			return;
		}

		let elapsed = now.duration_since(self.last_refill).as_secs_f64();

		self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
		self.last_refill = now;
	}

	/// Consumes `cost` tokens or returns how long to wait before trying again.
	fn try_consume(&mut self, cost: f64, now: Instant) -> Result<(), StdDuration> {
		self.refill(now);

		if self.tokens >= cost {
			self.tokens -= cost;

			return Ok(());
		}

		let paused = self.last_refill.saturating_duration_since(now);
		let deficit_ms = ((cost - self.tokens) / self.refill_rate * 1_000.).ceil().max(1.);

		Err(paused + StdDuration::from_millis(deficit_ms as u64))
	}

	fn drain_until(&mut self, resume_at: Instant) {
		self.tokens = 0.;
		self.last_refill = self.last_refill.max(resume_at);
	}

	fn status(&self) -> BucketStatus {
		BucketStatus { tokens: self.tokens, capacity: self.capacity, refill_rate: self.refill_rate }
	}
}

/// Token-bucket rate limiter keyed by provider.
#[derive(Debug)]
pub struct RateLimiter {
	default_rate: f64,
	rates: RwLock<HashMap<ProviderId, f64>>,
	buckets: Mutex<HashMap<ProviderId, TokenBucket>>,
}
impl RateLimiter {
	/// Creates a limiter whose unregistered providers refill at `default_rate` tokens per second.
	pub fn new(default_rate: f64) -> Result<Self> {
		validate_rate(default_rate)?;

		Ok(Self {
			default_rate,
			rates: RwLock::new(HashMap::new()),
			buckets: Mutex::new(HashMap::new()),
		})
	}

	/// Sets the refill rate for `provider`, replacing any existing bucket with a full one.
	pub fn register(&self, provider: &ProviderId, refill_rate: f64) -> Result<()> {
		validate_rate(refill_rate)?;

		self.rates.write().insert(provider.clone(), refill_rate);
		self.buckets.lock().remove(provider);

		Ok(())
	}

	/// Refill rate applied to `provider`.
	pub fn refill_rate(&self, provider: &ProviderId) -> f64 {
		self.rates.read().get(provider).copied().unwrap_or(self.default_rate)
	}

	/// Waits for `cost` tokens, then runs `f`.
	///
	/// A `RateLimitError` carrying `retry_after` drains the bucket and pauses refill for that
	/// long, so later callers honor the server's signal. The error itself is returned unchanged.
	pub async fn execute<T, F, Fut>(&self, provider: &ProviderId, cost: f64, f: F) -> Result<T>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		self.acquire(provider, cost).await?;

		let result = f().await;

		if let Some(wait) = result.as_ref().err().and_then(Error::retry_after) {
			self.pause(provider, wait);
		}

		result
	}

	/// Suspends until `cost` tokens are available and consumes them.
	pub async fn acquire(&self, provider: &ProviderId, cost: f64) -> Result<()> {
		if !cost.is_finite() || cost <= 0. {
			return Err(Error::configuration("Rate limit cost must be a positive number."));
		}

		loop {
			let wait = {
				let mut buckets = self.buckets.lock();
				let now = Instant::now();
				let bucket = buckets
					.entry(provider.clone())
					.or_insert_with(|| TokenBucket::new(self.refill_rate(provider), now));

				if cost > bucket.capacity {
					return Err(Error::configuration(format!(
						"Rate limit cost {cost} exceeds bucket capacity {}.",
						bucket.capacity
					))
					.with_provider(provider.clone()));
				}

				match bucket.try_consume(cost, now) {
					Ok(()) => return Ok(()),
					Err(wait) => wait,
				}
			};

			obs::record_throttle_wait(provider);
			time::sleep(wait).await;
		}
	}

	/// Drains `provider`'s bucket and holds refill for `wait`.
	pub fn pause(&self, provider: &ProviderId, wait: StdDuration) {
		let mut buckets = self.buckets.lock();
		let now = Instant::now();
		let bucket = buckets
			.entry(provider.clone())
			.or_insert_with(|| TokenBucket::new(self.refill_rate(provider), now));

		bucket.refill(now);
		bucket.drain_until(now + wait);
	}

	/// Returns `true` if `cost` tokens are available right now. Consumes nothing.
	pub fn can_execute(&self, provider: &ProviderId, cost: f64) -> bool {
		match self.status(provider) {
			Some(status) => status.tokens >= cost,
			None => cost <= self.refill_rate(provider) * BURST_SECONDS,
		}
	}

	/// Current bucket state, or `None` if `provider` has not been throttled yet.
	pub fn status(&self, provider: &ProviderId) -> Option<BucketStatus> {
		let mut buckets = self.buckets.lock();
		let bucket = buckets.get_mut(provider)?;

		bucket.refill(Instant::now());

		Some(bucket.status())
	}

	/// Forgets `provider`'s bucket; the next call starts from a full one.
	pub fn reset(&self, provider: &ProviderId) {
		self.buckets.lock().remove(provider);
	}

	/// Forgets every bucket.
	pub fn reset_all(&self) {
		self.buckets.lock().clear();
	}
}
impl Default for RateLimiter {
	fn default() -> Self {
		Self {
			default_rate: DEFAULT_REFILL_RATE,
			rates: RwLock::new(HashMap::new()),
			buckets: Mutex::new(HashMap::new()),
		}
	}
}

fn validate_rate(rate: f64) -> Result<()> {
	if rate.is_finite() && rate > 0. {
		Ok(())
	} else {
		Err(Error::configuration(format!("Refill rate must be a positive number, got {rate}.")))
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use rand::Rng;
	// self
	use super::*;

	fn provider() -> ProviderId {
		ProviderId::new("calendar").expect("Provider fixture should be valid.")
	}

	#[test]
	fn tokens_stay_within_bounds() {
		let start = Instant::now();
		let mut bucket = TokenBucket::new(2., start);
		let mut now = start;
		let mut rng = rand::rng();

		for _ in 0..2_000 {
			if rng.random_bool(0.5) {
				now += StdDuration::from_millis(rng.random_range(0..3_000));

				bucket.refill(now);
			} else {
				let _ = bucket.try_consume(rng.random_range(0.1..5.), now);
			}

			assert!(bucket.tokens >= 0., "tokens dipped below zero: {}", bucket.tokens);
			assert!(bucket.tokens <= bucket.capacity, "tokens overflowed: {}", bucket.tokens);
		}
	}

	#[test]
	fn wait_covers_deficit_and_pause() {
		let now = Instant::now();
		let mut bucket = TokenBucket::new(1., now);

		bucket.tokens = 0.5;

		assert_eq!(bucket.try_consume(1., now), Err(StdDuration::from_millis(500)));

		bucket.drain_until(now + StdDuration::from_secs(30));

		assert_eq!(bucket.try_consume(1., now), Err(StdDuration::from_secs(31)));
	}

	#[tokio::test(start_paused = true)]
	async fn oversized_costs_are_rejected() {
		let limiter = RateLimiter::default();
		let err = limiter.acquire(&provider(), 11.).await.expect_err("Cost above capacity fails.");

		assert_eq!(err.kind(), &ErrorKind::Configuration);
		assert!(limiter.acquire(&provider(), 0.).await.is_err());
	}

	#[test]
	fn introspection_does_not_consume() {
		let limiter = RateLimiter::default();
		let provider = provider();

		assert!(limiter.can_execute(&provider, 10.));
		assert!(limiter.status(&provider).is_none());

		limiter.register(&provider, 5.).expect("Positive rate should register.");

		assert!(limiter.can_execute(&provider, 50.));
		assert!(!limiter.can_execute(&provider, 51.));
		assert!(limiter.register(&provider, 0.).is_err());
		assert!(RateLimiter::new(f64::NAN).is_err());
	}
}
