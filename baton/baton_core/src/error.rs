//! Error types for the baton toolkit.
//!
//! Only recoverable failures are modelled here. Lock-discipline violations
//! and other misuse faults panic at the call site instead of producing a
//! value of any of these types.
//!
//! The root error type, `Error`, can wrap any of the component errors,
//! allowing uniform handling at the top level.

use thiserror::Error;

/// Root error type for the baton toolkit.
#[derive(Debug, Error)]
pub enum Error {
    /// The owning cancellation scope was cancelled
    #[error(transparent)]
    Cancelled(#[from] CancellationError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// General runtime errors
    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Returned when an operation's owning scope is cancelled before the
/// operation produced an observable result.
#[derive(Debug, Error, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[error("operation was cancelled")]
pub struct CancellationError;

/// Failure of a cancellable operation wrapping an external call.
///
/// The two variants are always distinguishable: an operation whose scope
/// was cancelled reports `Cancelled` even when the external call also
/// failed in the same window.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OperationError<E> {
    /// The owning scope was cancelled before or during execution
    #[error("operation was cancelled")]
    Cancelled,

    /// The external call itself failed
    #[error("underlying operation failed: {0}")]
    Underlying(E),
}

impl<E> OperationError<E> {
    /// Whether this failure is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The collaborator's failure, if this is not a cancellation.
    pub fn underlying(&self) -> Option<&E> {
        match self {
            Self::Underlying(e) => Some(e),
            Self::Cancelled => None,
        }
    }

    /// Consume the error, returning the collaborator's failure if any.
    pub fn into_underlying(self) -> Option<E> {
        match self {
            Self::Underlying(e) => Some(e),
            Self::Cancelled => None,
        }
    }

    /// Map the underlying failure, leaving cancellation untouched.
    pub fn map_underlying<F, U>(self, f: F) -> OperationError<U>
    where
        F: FnOnce(E) -> U,
    {
        match self {
            Self::Underlying(e) => OperationError::Underlying(f(e)),
            Self::Cancelled => OperationError::Cancelled,
        }
    }
}

impl<E> From<CancellationError> for OperationError<E> {
    fn from(_: CancellationError) -> Self {
        Self::Cancelled
    }
}

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration text is not valid TOML for the expected schema
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration parsed but violates a constraint
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type used throughout the baton toolkit.
pub type Result<T> = std::result::Result<T, Error>;
