use super::*;
use std::sync::atomic::{AtomicU32, Ordering};

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(1),
        multiplier: 2.0,
        max_delay: Duration::from_millis(4),
        max_attempts,
    }
}

#[test]
fn default_policy_matches_config_defaults() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.base_delay, Duration::from_secs(2));
    assert_eq!(policy.max_delay, Duration::from_secs(60));
    assert_eq!(policy.max_attempts, 8);
}

#[test]
fn delays_grow_and_are_capped() {
    let policy = RetryPolicy::default();
    let delays: Vec<u64> = (1..=7).map(|a| policy.delay_for(a).as_secs()).collect();
    assert_eq!(delays, vec![2, 4, 8, 16, 32, 60, 60]);
    assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(60));
}

#[tokio::test]
async fn retries_rate_limits_until_success() {
    let calls = AtomicU32::new(0);
    let mut retries = 0;

    let result = retry_with_backoff(
        &fast_policy(8),
        || async {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call < 8 {
                Err(EmbeddingError::RateLimited("HTTP 429".to_string()))
            } else {
                Ok(vec![1.0_f32])
            }
        },
        |error| {
            assert!(error.is_rate_limit());
            retries += 1;
        },
    )
    .await;

    assert_eq!(result.expect("eighth attempt succeeds"), vec![1.0]);
    assert_eq!(calls.load(Ordering::SeqCst), 8);
    assert_eq!(retries, 7);
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    let calls = AtomicU32::new(0);

    let result: Result<(), _> = retry_with_backoff(
        &fast_policy(3),
        || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(EmbeddingError::Transient("HTTP 503".to_string()))
        },
        |_| {},
    )
    .await;

    assert!(matches!(result, Err(EmbeddingError::Transient(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn non_retryable_errors_fail_immediately() {
    let calls = AtomicU32::new(0);

    let result: Result<(), _> = retry_with_backoff(
        &fast_policy(8),
        || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(EmbeddingError::InvalidApiKey("HTTP 401".to_string()))
        },
        |_| panic!("config errors are not retried"),
    )
    .await;

    assert!(matches!(result, Err(EmbeddingError::InvalidApiKey(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
