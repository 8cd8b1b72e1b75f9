// std
use std::sync::Arc;
// crates.io
use tokio::{
	task::JoinSet,
	time::{self, Instant},
};
// self
use integration_hub::{auth::ProviderId, error::Error, rate_limit::RateLimiter};

fn provider(id: &str) -> ProviderId {
	ProviderId::new(id).expect("Provider fixture should be valid.")
}

#[tokio::test(start_paused = true)]
async fn burst_drains_then_refills_at_the_configured_rate() {
	let limiter = RateLimiter::new(1.).expect("Rate fixture should be valid.");
	let calendar = provider("calendar");
	let start = Instant::now();
	let mut finished = Vec::new();

	for _ in 0..15 {
		limiter
			.execute(&calendar, 1., || async { Ok::<_, Error>(()) })
			.await
			.expect("Throttled call should eventually run.");

		finished.push(start.elapsed());
	}

	assert!(finished[..10].iter().all(|elapsed| elapsed.as_millis() == 0));

	let gap = finished[10] - finished[9];

	assert!(
		(990..=1_010).contains(&gap.as_millis()),
		"eleventh call should wait about one second, waited {gap:?}"
	);
	assert!(finished[14].as_millis() >= 4_990);
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_queue_on_one_bucket() {
	let limiter = Arc::new(RateLimiter::new(1.).expect("Rate fixture should be valid."));
	let calendar = provider("calendar");
	let start = Instant::now();
	let mut callers = JoinSet::new();

	for _ in 0..15 {
		let limiter = limiter.clone();
		let calendar = calendar.clone();

		callers.spawn(async move {
			limiter
				.execute(&calendar, 1., || async { Ok::<_, Error>(()) })
				.await
				.expect("Queued call should eventually run.");

			start.elapsed()
		});
	}

	let mut finished = callers.join_all().await;

	finished.sort();

	assert_eq!(finished.len(), 15);
	assert!(finished[..10].iter().all(|elapsed| elapsed.as_millis() == 0));
	assert!(
		(990..=1_010).contains(&finished[10].as_millis()),
		"eleventh call should finish about one second in, finished at {:?}",
		finished[10]
	);
	assert!(finished[14].as_millis() >= 4_990);
}

#[tokio::test(start_paused = true)]
async fn retry_after_pauses_the_bucket() {
	let limiter = RateLimiter::default();
	let chat = provider("chat");
	let err = limiter
		.execute(&chat, 1., || async {
			Err::<(), _>(Error::rate_limit("Slow down.", Some(time::Duration::from_secs(30))))
		})
		.await
		.expect_err("Rate-limited call should fail.");

	assert!(err.is_rate_limit());
	assert_eq!(err.retry_after(), Some(time::Duration::from_secs(30)));
	assert!(!limiter.can_execute(&chat, 1.));

	time::advance(time::Duration::from_secs(29)).await;

	assert!(!limiter.can_execute(&chat, 1.));

	time::advance(time::Duration::from_secs(3)).await;

	assert!(limiter.can_execute(&chat, 1.));
}

#[tokio::test(start_paused = true)]
async fn providers_are_throttled_independently() {
	let limiter = RateLimiter::default();
	let calendar = provider("calendar");
	let chat = provider("chat");

	for _ in 0..10 {
		limiter.acquire(&calendar, 1.).await.expect("Burst should be admitted.");
	}

	assert!(!limiter.can_execute(&calendar, 1.));
	assert!(limiter.can_execute(&chat, 1.));

	let status = limiter.status(&calendar).expect("Bucket should exist after use.");

	assert_eq!(status.capacity, 10.);
	assert!(status.tokens < 1.);

	limiter.reset(&calendar);

	assert!(limiter.can_execute(&calendar, 10.));
}
