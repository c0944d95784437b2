//! Integration tests for cancellable operations and the mutex.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use baton_concurrency::cancel::{fetch, run, CancellationScope, FetchTransport, ResumeHandle};
use baton_concurrency::sync::{Locked, Mutex};
use baton_core::error::OperationError;

#[derive(Debug, PartialEq)]
enum NetError {
    Refused,
}

/// Transport that answers from a worker thread after a delay and records
/// whether the caller stopped waiting before it answered.
struct SlowTransport {
    delay: Duration,
    abandoned: Arc<AtomicBool>,
}

impl FetchTransport for SlowTransport {
    type Error = NetError;

    fn fetch(&self, endpoint: &str, completion: ResumeHandle<Result<Vec<u8>, NetError>>) {
        let delay = self.delay;
        let abandoned = Arc::clone(&self.abandoned);
        let response = if endpoint.starts_with("/refuse") {
            Err(NetError::Refused)
        } else {
            Ok(endpoint.as_bytes().to_vec())
        };
        thread::spawn(move || {
            thread::sleep(delay);
            if !completion.resume_with_value(response) {
                abandoned.store(true, Ordering::SeqCst);
            }
        });
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fetch_success_and_failure() {
    let scope = CancellationScope::new();
    let transport = SlowTransport {
        delay: Duration::from_millis(5),
        abandoned: Arc::new(AtomicBool::new(false)),
    };

    assert_eq!(fetch(&scope, &transport, "/a").await, Ok(b"/a".to_vec()));
    assert_eq!(
        fetch(&scope, &transport, "/refuse").await,
        Err(OperationError::Underlying(NetError::Refused))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_fetch_discards_late_result() {
    let scope = CancellationScope::new();
    let abandoned = Arc::new(AtomicBool::new(false));
    let transport = SlowTransport {
        delay: Duration::from_millis(50),
        abandoned: Arc::clone(&abandoned),
    };

    let canceller = scope.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        canceller.cancel();
    });

    let result = fetch(&scope, &transport, "/slow").await;
    assert_eq!(result, Err(OperationError::Cancelled));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(abandoned.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_operations_share_a_scope() {
    let scope = CancellationScope::new();
    let calls = Arc::new(AtomicUsize::new(0));

    for n in 0..3u32 {
        let calls = Arc::clone(&calls);
        let result = run(&scope, move |done| {
            calls.fetch_add(1, Ordering::SeqCst);
            done.resume_with_value(Ok::<_, NetError>(n));
        })
        .await;
        assert_eq!(result, Ok(n));
    }

    scope.cancel();
    let result = run(&scope, |done| {
        done.resume_with_value(Ok::<u32, NetError>(99));
    })
    .await;
    assert!(result.unwrap_err().is_cancelled());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_mutex_excludes_across_threads() {
    let counter = Arc::new(Locked::with_name(0u64, "counter"));
    let workers: Vec<_> = (0..8)
        .map(|_| {
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                for _ in 0..1000 {
                    *counter.lock() += 1;
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(*counter.lock(), 8000);
    assert_eq!(counter.stats().acquisition_count, 8001);
}

#[test]
fn test_try_acquire_sees_other_holder() {
    let mutex = Arc::new(Mutex::with_name("shared"));
    mutex.acquire();

    let other = Arc::clone(&mutex);
    let attempt = thread::spawn(move || {
        let acquired = other.try_acquire();
        other.assert_not_held();
        acquired
    })
    .join()
    .unwrap();

    assert!(!attempt);
    mutex.assert_held();
    mutex.release();
    assert!(mutex.try_acquire());
    mutex.release();
}
