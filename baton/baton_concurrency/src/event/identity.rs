//! Identity tokens for event filtering.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A reference-equality token naming the logical source of an event.
///
/// Two identities are equal only if they refer to the same allocation;
/// the contents are never compared.
#[derive(Clone)]
pub struct Identity(Arc<dyn Any + Send + Sync>);

impl Identity {
    /// Create a fresh token, distinct from every other identity
    pub fn new() -> Self {
        Self(Arc::new(()))
    }

    /// Use an existing shared object as the identity
    pub fn of<T: Any + Send + Sync>(object: Arc<T>) -> Self {
        Self(object)
    }

    /// Whether both identities refer to the same object
    pub fn ptr_eq(&self, other: &Identity) -> bool {
        self.addr() == other.addr()
    }

    /// Whether this identity refers to `object`
    pub fn refers_to<T: Any + Send + Sync>(&self, object: &Arc<T>) -> bool {
        self.addr() == Arc::as_ptr(object).cast::<()>()
    }

    /// Borrow the underlying object if it has type `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0).cast::<()>()
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Identity {}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({:p})", self.addr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_identities_differ() {
        let a = Identity::new();
        let b = Identity::new();
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_identity_is_by_reference_not_value() {
        let first = Arc::new(String::from("source"));
        let second = Arc::new(String::from("source"));

        let identity = Identity::of(Arc::clone(&first));
        assert!(identity.refers_to(&first));
        assert!(!identity.refers_to(&second));
        assert_ne!(identity, Identity::of(second));
        assert_eq!(identity, Identity::of(first));
    }

    #[test]
    fn test_downcast() {
        let identity = Identity::of(Arc::new(42u32));
        assert_eq!(identity.downcast_ref::<u32>(), Some(&42));
        assert_eq!(identity.downcast_ref::<i64>(), None);
    }
}
