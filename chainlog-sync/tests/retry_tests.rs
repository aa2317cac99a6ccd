use chainlog_sync::{RetryPolicy, SyncError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

fn policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(500),
    }
}

#[test]
fn delays_double_until_capped() {
    let p = policy(10);
    assert_eq!(p.delay_for(1), Duration::from_millis(100));
    assert_eq!(p.delay_for(2), Duration::from_millis(200));
    assert_eq!(p.delay_for(3), Duration::from_millis(400));
    assert_eq!(p.delay_for(4), Duration::from_millis(500));
    assert_eq!(p.delay_for(60), Duration::from_millis(500));
}

#[test]
fn none_never_retries() {
    assert_eq!(RetryPolicy::none().max_retries, 0);
    assert_eq!(RetryPolicy::default().max_retries, 3);
}

#[tokio::test(start_paused = true)]
async fn retryable_failures_are_retried() {
    let counter = AtomicU32::new(0);
    let calls = &counter;
    let result = policy(3)
        .run("flaky", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(SyncError::Timeout)
            } else {
                Ok("done")
            }
        })
        .await;

    assert_eq!(result.unwrap(), "done");
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn retries_run_out() {
    let counter = AtomicU32::new(0);
    let calls = &counter;
    let result: Result<(), _> = policy(2)
        .run("down", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SyncError::Network("unreachable".into()))
        })
        .await;

    assert!(matches!(result, Err(SyncError::Network(_))));
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn corruption_is_never_retried() {
    let counter = AtomicU32::new(0);
    let calls = &counter;
    let result: Result<(), _> = policy(5)
        .run("verify", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SyncError::Corruption {
                index: 3,
                reason: "bad link".into(),
            })
        })
        .await;

    assert!(matches!(result, Err(SyncError::Corruption { index: 3, .. })));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn retryable_classification() {
    assert!(SyncError::Timeout.is_retryable());
    assert!(SyncError::ChannelClosed.is_retryable());
    assert!(SyncError::DiscoveryUnavailable("x".into()).is_retryable());
    assert!(!SyncError::Protocol("x".into()).is_retryable());
    assert!(
        !SyncError::Rejected {
            code: 2,
            reason: "x".into()
        }
        .is_retryable()
    );
}
