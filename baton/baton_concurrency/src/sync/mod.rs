//! Synchronization primitives.
//!
//! - [`Mutex`]: raw non-reentrant lock with ownership assertions
//! - [`Locked`]: a value protected by a [`Mutex`]
//! - [`AtomicFlag`]: set-once flag for monotonic state

pub mod atomic;
pub mod mutex;

pub use atomic::AtomicFlag;
pub use mutex::{LockError, LockStats, Locked, LockedGuard, Mutex, MutexGuard};
