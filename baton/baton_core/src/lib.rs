//! # Baton Core
//!
//! `baton_core` provides the shared vocabulary of the baton toolkit: the
//! error taxonomy, strongly-typed identifiers and the configuration model
//! used by `baton_concurrency`.
//!
//! ## Error model
//!
//! Baton separates two kinds of failure:
//!
//! 1. **Misuse faults**: lock-discipline violations such as releasing a
//!    lock the caller does not hold. These are programming errors and panic.
//!
//! 2. **Recoverable errors**: cancellation of an operation's owning scope
//!    ([`CancellationError`]) and failures forwarded from external
//!    collaborators ([`OperationError::Underlying`]). These are ordinary
//!    `Result` values.
//!
//! ## Crate Structure
//!
//! - **error**: Error types for all baton components
//! - **id**: Strongly-typed identifier types
//! - **utils**: Configuration and logging helpers

pub mod error;
pub mod id;
pub mod utils;

pub use error::{CancellationError, ConfigError, Error, OperationError, Result};
pub use id::{GateId, LockId, ScopeId, SubscriptionId};
pub use utils::{BatonConfig, EventConfig, LogLevel, LoggingConfig, OverflowPolicy, SyncConfig};
