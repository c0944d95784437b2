//! Cancellation scopes.
//!
//! A [`CancellationScope`] is a token passed by reference through the call
//! graph. Cancelling it marks the scope, every child scope derived from it,
//! and notifies each operation that registered a handler with
//! [`CancellationScope::on_cancel`].
//!
//! Cancellation is monotonic and idempotent: a cancelled scope never becomes
//! un-cancelled, and concurrent or repeated `cancel()` calls run each
//! handler exactly once.
//!
//! # Example
//!
//! ```
//! use baton_concurrency::cancel::CancellationScope;
//!
//! let parent = CancellationScope::new();
//! let child = parent.child();
//!
//! parent.cancel();
//! assert!(child.is_cancelled());
//! assert!(child.check_cancelled().is_err());
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use baton_core::error::CancellationError;
use baton_core::id::ScopeId;
use log::{debug, trace};

use crate::sync::{AtomicFlag, Locked};

type CancelHandler = Box<dyn FnOnce() + Send + 'static>;

/// A node in the cancellation tree.
#[derive(Clone)]
pub struct CancellationScope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    id: ScopeId,

    /// Set under the `handlers` lock so registration cannot race cancel;
    /// read without it.
    cancelled: AtomicFlag,

    handlers: Locked<HandlerTable>,

    /// Parent scope, for immediate visibility of ancestor cancellation
    parent: Option<CancellationScope>,

    /// Keeps this scope registered with its parent while it is alive
    parent_link: Locked<Option<CancelRegistration>>,
}

#[derive(Default)]
struct HandlerTable {
    next_key: u64,
    handlers: BTreeMap<u64, CancelHandler>,
}

impl CancellationScope {
    /// Create a new root scope
    pub fn new() -> Self {
        Self::with_parent(None)
    }

    /// Create a child scope that is cancelled whenever this scope is.
    ///
    /// Cancelling the child does not affect the parent.
    pub fn child(&self) -> Self {
        let child = Self::with_parent(Some(self.clone()));

        let weak = Arc::downgrade(&child.inner);
        let link = self.on_cancel(move || {
            if let Some(inner) = weak.upgrade() {
                CancellationScope { inner }.cancel();
            }
        });
        *child.inner.parent_link.lock() = Some(link);

        trace!("Scope {} created under {}", child.id(), self.id());
        child
    }

    fn with_parent(parent: Option<CancellationScope>) -> Self {
        let id = ScopeId::new();
        Self {
            inner: Arc::new(ScopeInner {
                id,
                cancelled: AtomicFlag::new(),
                handlers: Locked::with_name(HandlerTable::default(), format!("scope-{}", id)),
                parent,
                parent_link: Locked::new(None),
            }),
        }
    }

    /// Get the identifier of this scope
    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    /// Check if this scope or any ancestor has been cancelled
    pub fn is_cancelled(&self) -> bool {
        if self.inner.cancelled.is_set() {
            return true;
        }
        match &self.inner.parent {
            Some(parent) => parent.is_cancelled(),
            None => false,
        }
    }

    /// Return `Err(CancellationError)` if the scope has been cancelled
    pub fn check_cancelled(&self) -> Result<(), CancellationError> {
        if self.is_cancelled() {
            Err(CancellationError)
        } else {
            Ok(())
        }
    }

    /// Cancel this scope and everything registered under it.
    ///
    /// Returns `true` if this call performed the cancellation, `false` if the
    /// scope was already cancelled. Handlers run on the calling thread after
    /// the scope's lock is released, in registration order.
    pub fn cancel(&self) -> bool {
        let handlers = {
            let mut table = self.inner.handlers.lock();
            if !self.inner.cancelled.try_set() {
                return false;
            }
            std::mem::take(&mut table.handlers)
        };

        debug!(
            "Scope {} cancelled, notifying {} registration(s)",
            self.id(),
            handlers.len()
        );

        for (_, handler) in handlers {
            handler();
        }
        true
    }

    /// Register `handler` to run when this scope is cancelled.
    ///
    /// If the scope is already cancelled the handler runs immediately on the
    /// calling thread. Dropping the returned registration unregisters the
    /// handler; an operation holds it for the duration of its work.
    pub fn on_cancel<F>(&self, handler: F) -> CancelRegistration
    where
        F: FnOnce() + Send + 'static,
    {
        let registered = {
            let mut table = self.inner.handlers.lock();
            if self.inner.cancelled.is_set() {
                Err(handler)
            } else {
                let key = table.next_key;
                table.next_key += 1;
                table.handlers.insert(key, Box::new(handler));
                Ok(key)
            }
        };

        match registered {
            Ok(key) => CancelRegistration {
                scope: Arc::downgrade(&self.inner),
                key: Some(key),
            },
            Err(handler) => {
                trace!("Scope {} already cancelled, running handler now", self.id());
                handler();
                CancelRegistration::inert()
            }
        }
    }

    /// Number of live registrations, child scopes included
    pub fn registered_count(&self) -> usize {
        self.inner.handlers.lock().handlers.len()
    }
}

impl Default for CancellationScope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationScope")
            .field("id", &self.inner.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A handler registered with a [`CancellationScope`].
///
/// Dropping the registration removes the handler if it has not run yet.
#[must_use = "the handler is unregistered as soon as the registration is dropped"]
pub struct CancelRegistration {
    scope: Weak<ScopeInner>,
    key: Option<u64>,
}

impl CancelRegistration {
    fn inert() -> Self {
        Self {
            scope: Weak::new(),
            key: None,
        }
    }

    /// Whether the handler is still waiting for cancellation
    pub fn is_armed(&self) -> bool {
        let (Some(key), Some(scope)) = (self.key, self.scope.upgrade()) else {
            return false;
        };
        let armed = scope.handlers.lock().handlers.contains_key(&key);
        armed
    }
}

impl fmt::Debug for CancelRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelRegistration")
            .field("key", &self.key)
            .finish()
    }
}

impl Drop for CancelRegistration {
    fn drop(&mut self) {
        let (Some(key), Some(scope)) = (self.key.take(), self.scope.upgrade()) else {
            return;
        };
        // Drop the handler after the lock is released; it may own scopes.
        let removed = scope.handlers.lock().handlers.remove(&key);
        drop(removed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> usize) {
        let count = Arc::new(AtomicUsize::new(0));
        let reader = {
            let count = Arc::clone(&count);
            move || count.load(Ordering::SeqCst)
        };
        (count, reader)
    }

    #[test]
    fn test_cancel_is_monotonic_and_idempotent() {
        let scope = CancellationScope::new();
        assert!(!scope.is_cancelled());
        assert!(scope.check_cancelled().is_ok());

        assert!(scope.cancel());
        assert!(!scope.cancel());
        assert!(scope.is_cancelled());
        assert_eq!(scope.check_cancelled(), Err(CancellationError));
    }

    #[test]
    fn test_handler_runs_once() {
        let scope = CancellationScope::new();
        let (count, read) = counter();

        let _registration = scope.on_cancel(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(scope.registered_count(), 1);

        scope.cancel();
        scope.cancel();
        assert_eq!(read(), 1);
        assert_eq!(scope.registered_count(), 0);
    }

    #[test]
    fn test_register_after_cancel_runs_immediately() {
        let scope = CancellationScope::new();
        scope.cancel();

        let (count, read) = counter();
        let registration = scope.on_cancel(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(read(), 1);
        assert!(!registration.is_armed());
    }

    #[test]
    fn test_dropped_registration_never_runs() {
        let scope = CancellationScope::new();
        let (count, read) = counter();

        let registration = scope.on_cancel(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });
        assert!(registration.is_armed());
        drop(registration);
        assert_eq!(scope.registered_count(), 0);

        scope.cancel();
        assert_eq!(read(), 0);
    }

    #[test]
    fn test_parent_cancels_children_recursively() {
        let root = CancellationScope::new();
        let child = root.child();
        let grandchild = child.child();

        let (count, read) = counter();
        let _registration = grandchild.on_cancel(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });

        root.cancel();
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
        assert_eq!(read(), 1);
    }

    #[test]
    fn test_child_cancel_does_not_affect_parent() {
        let root = CancellationScope::new();
        let child = root.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!root.is_cancelled());
    }

    #[test]
    fn test_dropped_child_unregisters_from_parent() {
        let root = CancellationScope::new();
        let child = root.child();
        assert_eq!(root.registered_count(), 1);

        drop(child);
        assert_eq!(root.registered_count(), 0);
    }

    #[test]
    fn test_child_of_cancelled_parent_starts_cancelled() {
        let root = CancellationScope::new();
        root.cancel();
        assert!(root.child().is_cancelled());
    }

    #[test]
    fn test_concurrent_cancel_runs_handlers_once() {
        let scope = CancellationScope::new();
        let (count, read) = counter();
        let registrations: Vec<_> = (0..16)
            .map(|_| {
                let count = Arc::clone(&count);
                scope.on_cancel(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let scope = scope.clone();
                thread::spawn(move || scope.cancel())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(read(), 16);
        drop(registrations);
    }
}
