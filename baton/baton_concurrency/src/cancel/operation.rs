//! Cancellable operations.
//!
//! Runs an external long-running call (typically a network fetch) inside a
//! [`CancellationScope`]. The caller gets either the call's value, the
//! call's own failure as [`OperationError::Underlying`], or
//! [`OperationError::Cancelled`].
//!
//! Cancellation takes priority once observed. A scope cancelled before the
//! call starts skips the call entirely; a scope cancelled while the call is
//! outstanding, or after it completed but before its result was observed,
//! reports `Cancelled` and discards the result.

use std::future::Future;

use baton_core::error::{CancellationError, OperationError};
use log::debug;

use crate::cancel::gate::{ResumeHandle, SingleResumeGate};
use crate::cancel::scope::CancellationScope;

/// Run a callback-driven external call under `scope`.
///
/// `call` receives a completion handle and must eventually resume it with
/// the call's `Result`, from any thread. If `scope` is already cancelled,
/// `call` is never invoked.
///
/// # Example
///
/// ```
/// use baton_concurrency::cancel::{run, CancellationScope};
///
/// # futures::executor::block_on(async {
/// let scope = CancellationScope::new();
/// let result = run(&scope, |done| {
///     done.resume_with_value(Ok::<_, std::io::Error>(vec![1, 2, 3]));
/// })
/// .await;
/// assert_eq!(result.unwrap(), vec![1, 2, 3]);
/// # });
/// ```
pub async fn run<V, E, F>(scope: &CancellationScope, call: F) -> Result<V, OperationError<E>>
where
    V: Send + 'static,
    E: Send + 'static,
    F: FnOnce(ResumeHandle<Result<V, E>>),
{
    if scope.is_cancelled() {
        debug!("Scope {} cancelled before the call started", scope.id());
        return Err(OperationError::Cancelled);
    }

    let gate = SingleResumeGate::start_in(scope, call);
    let outcome = gate.await;
    settle(scope, outcome)
}

/// Run a future-based external call under `scope`.
///
/// When `scope` is cancelled while the future is outstanding, the future is
/// dropped, aborting whatever it was doing.
pub async fn run_future<Fut, V, E>(
    scope: &CancellationScope,
    future: Fut,
) -> Result<V, OperationError<E>>
where
    Fut: Future<Output = Result<V, E>>,
{
    if scope.is_cancelled() {
        debug!("Scope {} cancelled before the call started", scope.id());
        return Err(OperationError::Cancelled);
    }

    // Resolves only through the scope's cancellation handler.
    let mut cancelled = SingleResumeGate::<()>::start_in(scope, |_| {});

    tokio::select! {
        biased;
        _ = &mut cancelled => {
            debug!("Scope {} cancelled, aborting outstanding call", scope.id());
            Err(OperationError::Cancelled)
        }
        outcome = future => settle(scope, Ok(outcome)),
    }
}

/// Network capability consumed by [`fetch`].
///
/// Implementations start the request and resume `completion` with the
/// response bytes or the transport's failure. A transport that supports
/// native cancellation may poll [`ResumeHandle::is_resumed`] to stop early.
pub trait FetchTransport: Send + Sync {
    /// Transport failure type
    type Error: Send + 'static;

    /// Start fetching `endpoint`
    fn fetch(&self, endpoint: &str, completion: ResumeHandle<Result<Vec<u8>, Self::Error>>);
}

/// Fetch `endpoint` through `transport`, cancellable by `scope`.
pub async fn fetch<T>(
    scope: &CancellationScope,
    transport: &T,
    endpoint: &str,
) -> Result<Vec<u8>, OperationError<T::Error>>
where
    T: FetchTransport + ?Sized,
{
    run(scope, |completion| transport.fetch(endpoint, completion)).await
}

fn settle<V, E>(
    scope: &CancellationScope,
    outcome: Result<Result<V, E>, CancellationError>,
) -> Result<V, OperationError<E>> {
    if scope.is_cancelled() {
        if outcome.is_ok() {
            debug!(
                "Scope {} cancelled before the result was observed, discarding it",
                scope.id()
            );
        }
        return Err(OperationError::Cancelled);
    }

    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(OperationError::Underlying(error)),
        Err(CancellationError) => Err(OperationError::Cancelled),
    }
}
