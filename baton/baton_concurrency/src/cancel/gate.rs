//! Single-resume gates.
//!
//! A [`SingleResumeGate`] turns a one-shot, callback-driven operation into a
//! suspension point. The work receives a [`ResumeHandle`]; the first call to
//! [`ResumeHandle::resume_with_value`] or
//! [`ResumeHandle::resume_with_cancellation`] decides the outcome and every
//! later call is dropped. The transition is made under the gate's
//! [`Mutex`](crate::sync::Mutex), so a completing worker racing a
//! cancelling scope still resumes the awaiting task exactly once.
//!
//! Cancellation never kills the work. It only guarantees that the work's
//! result, if it arrives later, is discarded.
//!
//! # Example
//!
//! ```
//! use baton_concurrency::cancel::SingleResumeGate;
//!
//! # futures::executor::block_on(async {
//! let gate = SingleResumeGate::start(|handle| {
//!     std::thread::spawn(move || {
//!         handle.resume_with_value(42);
//!     });
//! });
//! assert_eq!(gate.await_result().await, Ok(42));
//! # });
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use baton_core::error::CancellationError;
use baton_core::id::GateId;
use log::{debug, trace};

use crate::cancel::scope::{CancelRegistration, CancellationScope};
use crate::sync::Locked;

/// Observable state of a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStatus {
    /// Neither resume call has happened yet
    Pending,
    /// The gate was resumed with a value
    ResumedWithValue,
    /// The gate was resumed with cancellation
    ResumedWithCancellation,
}

enum ResumeState<T> {
    Pending { waker: Option<Waker> },
    Value(T),
    Cancelled,
    /// The awaiting task took the outcome
    Observed { cancelled: bool },
}

impl<T> ResumeState<T> {
    fn status(&self) -> GateStatus {
        match self {
            Self::Pending { .. } => GateStatus::Pending,
            Self::Value(_) | Self::Observed { cancelled: false } => GateStatus::ResumedWithValue,
            Self::Cancelled | Self::Observed { cancelled: true } => {
                GateStatus::ResumedWithCancellation
            }
        }
    }
}

struct GateShared<T> {
    id: GateId,
    state: Locked<ResumeState<T>>,
}

/// A one-shot suspension point resumed at most once.
///
/// Awaiting the gate (directly or through [`SingleResumeGate::await_result`])
/// yields the resumed value or [`CancellationError`]. A gate has a single
/// consumer: awaiting consumes it.
#[must_use = "a gate does nothing unless awaited"]
pub struct SingleResumeGate<T> {
    shared: Arc<GateShared<T>>,
    /// Held while the gate is alive when created with `start_in`
    _registration: Option<CancelRegistration>,
}

impl<T> SingleResumeGate<T> {
    /// Create a pending gate with no work attached; resume it via [`handle`](Self::handle)
    pub fn new() -> Self {
        let id = GateId::new();
        Self {
            shared: Arc::new(GateShared {
                id,
                state: Locked::with_name(
                    ResumeState::Pending { waker: None },
                    format!("gate-{}", id),
                ),
            }),
            _registration: None,
        }
    }

    /// Open a gate and invoke `work` with its resume handle.
    ///
    /// `work` runs synchronously on the calling thread and is expected to
    /// hand the handle to whatever eventually produces the result.
    pub fn start<F>(work: F) -> Self
    where
        F: FnOnce(ResumeHandle<T>),
    {
        let gate = Self::new();
        trace!("Gate {} started", gate.id());
        work(gate.handle());
        gate
    }

    /// Get a new handle that can resume this gate
    pub fn handle(&self) -> ResumeHandle<T> {
        ResumeHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Get the identifier of this gate
    pub fn id(&self) -> GateId {
        self.shared.id
    }

    /// Current state of the gate
    pub fn status(&self) -> GateStatus {
        self.shared.state.lock().status()
    }

    /// Suspend until the gate is resumed, then return its outcome.
    pub async fn await_result(self) -> Result<T, CancellationError> {
        self.await
    }
}

impl<T: Send + 'static> SingleResumeGate<T> {
    /// Like [`start`](Self::start), but resumes the gate with cancellation
    /// when `scope` is cancelled while the gate is pending.
    ///
    /// The cancellation handler is registered before `work` runs, so an
    /// already-cancelled scope resumes the gate before the work sees its
    /// handle. The work is still invoked; its result will be dropped.
    pub fn start_in<F>(scope: &CancellationScope, work: F) -> Self
    where
        F: FnOnce(ResumeHandle<T>),
    {
        let mut gate = Self::new();
        let canceller = gate.handle();
        gate._registration = Some(scope.on_cancel(move || {
            canceller.resume_with_cancellation();
        }));

        trace!("Gate {} started in scope {}", gate.id(), scope.id());
        work(gate.handle());
        gate
    }
}

impl<T> Default for SingleResumeGate<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SingleResumeGate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleResumeGate")
            .field("id", &self.shared.id)
            .field("status", &self.status())
            .finish()
    }
}

impl<T> Future for SingleResumeGate<T> {
    type Output = Result<T, CancellationError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.state.lock();

        match std::mem::replace(&mut *state, ResumeState::Observed { cancelled: false }) {
            ResumeState::Pending { waker } => {
                let waker = match waker {
                    Some(waker) if waker.will_wake(cx.waker()) => waker,
                    _ => cx.waker().clone(),
                };
                *state = ResumeState::Pending {
                    waker: Some(waker),
                };
                Poll::Pending
            }
            ResumeState::Value(value) => Poll::Ready(Ok(value)),
            ResumeState::Cancelled => {
                *state = ResumeState::Observed { cancelled: true };
                Poll::Ready(Err(CancellationError))
            }
            ResumeState::Observed { .. } => {
                panic!("gate {} polled after its outcome was observed", self.shared.id)
            }
        }
    }
}

/// Resumes a [`SingleResumeGate`]; the first resume wins.
pub struct ResumeHandle<T> {
    shared: Arc<GateShared<T>>,
}

impl<T> ResumeHandle<T> {
    /// Resume the gate with `value`.
    ///
    /// Returns `false` and drops `value` if the gate was already resumed.
    pub fn resume_with_value(&self, value: T) -> bool {
        self.resume(Some(value))
    }

    /// Resume the gate with cancellation.
    ///
    /// Returns `false` if the gate was already resumed.
    pub fn resume_with_cancellation(&self) -> bool {
        self.resume(None)
    }

    /// Whether the gate has left the pending state; a worker may use this to
    /// skip work whose result would be discarded
    pub fn is_resumed(&self) -> bool {
        self.shared.state.lock().status() != GateStatus::Pending
    }

    /// Identifier of the gate this handle resumes
    pub fn gate_id(&self) -> GateId {
        self.shared.id
    }

    fn resume(&self, outcome: Option<T>) -> bool {
        let kind = if outcome.is_some() {
            "value"
        } else {
            "cancellation"
        };

        let resumed = {
            let mut state = self.shared.state.lock();
            if let ResumeState::Pending { waker } = &mut *state {
                let waker = waker.take();
                *state = match outcome {
                    Some(value) => ResumeState::Value(value),
                    None => ResumeState::Cancelled,
                };
                Some(waker)
            } else {
                None
            }
        };

        // A late outcome is dropped here, outside the lock.
        let Some(waker) = resumed else {
            debug!("Gate {} already resumed, dropping late {}", self.shared.id, kind);
            return false;
        };

        trace!("Gate {} resumed with {}", self.shared.id, kind);
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }
}

impl<T> Clone for ResumeHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for ResumeHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResumeHandle")
            .field("gate", &self.shared.id)
            .finish()
    }
}
