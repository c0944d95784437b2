//! Cancellation: scopes, single-resume gates and cancellable operations.
//!
//! - [`CancellationScope`]: a tree of cancellation tokens
//! - [`SingleResumeGate`]: a one-shot suspension point resumed at most once
//! - [`run`] / [`run_future`] / [`fetch`]: external calls that surface
//!   cancellation instead of a stale result

pub mod gate;
pub mod operation;
pub mod scope;

pub use gate::{GateStatus, ResumeHandle, SingleResumeGate};
pub use operation::{fetch, run, run_future, FetchTransport};
pub use scope::{CancelRegistration, CancellationScope};
