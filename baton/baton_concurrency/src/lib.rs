#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

//! # Baton Concurrency
//!
//! Cancellation-aware synchronization primitives and async bridges.
//!
//! This crate provides:
//!
//! - A non-reentrant mutex that knows its holder and can assert ownership
//! - Single-resume gates that turn a callback completion into a future
//! - An event bridge that turns named notifications into async sequences
//! - Cancellable operations that report `Cancelled` instead of a stale result
//!
//! All cancellation flows through a [`CancellationScope`]. Cancelling a scope
//! reaches every gate and subscription registered under it.
//!
//! ## Integration with Other Baton Crates
//!
//! - **baton_core**: error types, identifiers and configuration

/// Cancellation scopes, gates and cancellable operations
pub mod cancel;

/// Named event routing with pull-style subscriptions
pub mod event;

/// Synchronization primitives with ownership tracking
pub mod sync;

// Re-export key types for easier access
pub use cancel::{run, run_future, CancellationScope, ResumeHandle, SingleResumeGate};
pub use event::{EventHub, Identity, Subscription};
pub use sync::{Locked, Mutex};
