//! Raw mutual-exclusion lock with ownership assertions.
//!
//! [`Mutex`] is a non-reentrant lock that protects no data of its own:
//! callers pair [`Mutex::acquire`] with [`Mutex::release`], or use the
//! scoped helpers [`Mutex::with_lock`] and [`Mutex::guard`]. [`Locked`]
//! layers a data-carrying API on top for internal state machines.
//!
//! Lock-discipline violations are faults, not errors. Re-acquiring a lock
//! on the thread that holds it, releasing a lock the calling thread does
//! not hold, failed [`Mutex::assert_held`] / [`Mutex::assert_not_held`]
//! checks and dropping a held lock all panic.
//!
//! Blocking in [`Mutex::acquire`] parks the OS thread; it is not a yield
//! point for async schedulers. Never hold a `Mutex` across an `.await`.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use baton_core::id::LockId;
use baton_core::utils::SyncConfig;
use log::{error, trace, warn};
use parking_lot::lock_api::{self, GuardNoSend, RawMutex as RawMutexApi, RawMutexTimed};
use parking_lot::RawMutex;
use thiserror::Error;

/// Error when acquiring a lock with a deadline
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    /// The lock could not be acquired within the specified timeout
    #[error("lock acquisition timed out after {0:?}")]
    Timeout(Duration),
}

/// Statistics about lock usage
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LockStats {
    /// Number of successful acquisitions
    pub acquisition_count: usize,

    /// Number of acquisitions that found the lock held and had to wait
    pub contended_count: usize,

    /// Number of `try_acquire` / `try_acquire_for` calls that failed
    pub failed_count: usize,

    /// Total time spent waiting for the lock (microseconds)
    pub total_wait_time_us: u64,

    /// Maximum time spent waiting for the lock (microseconds)
    pub max_wait_time_us: u64,
}

#[derive(Debug)]
struct MutexStats {
    acquisition_count: AtomicUsize,
    contended_count: AtomicUsize,
    failed_count: AtomicUsize,
    total_wait_time_us: AtomicU64,
    max_wait_time_us: AtomicU64,
}

impl MutexStats {
    const fn new() -> Self {
        Self {
            acquisition_count: AtomicUsize::new(0),
            contended_count: AtomicUsize::new(0),
            failed_count: AtomicUsize::new(0),
            total_wait_time_us: AtomicU64::new(0),
            max_wait_time_us: AtomicU64::new(0),
        }
    }

    fn record_wait(&self, wait: Duration) {
        let wait_us = wait.as_micros() as u64;
        self.contended_count.fetch_add(1, Ordering::Relaxed);
        self.total_wait_time_us.fetch_add(wait_us, Ordering::Relaxed);
        self.max_wait_time_us.fetch_max(wait_us, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LockStats {
        LockStats {
            acquisition_count: self.acquisition_count.load(Ordering::Relaxed),
            contended_count: self.contended_count.load(Ordering::Relaxed),
            failed_count: self.failed_count.load(Ordering::Relaxed),
            total_wait_time_us: self.total_wait_time_us.load(Ordering::Relaxed),
            max_wait_time_us: self.max_wait_time_us.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.acquisition_count.store(0, Ordering::Relaxed);
        self.contended_count.store(0, Ordering::Relaxed);
        self.failed_count.store(0, Ordering::Relaxed);
        self.total_wait_time_us.store(0, Ordering::Relaxed);
        self.max_wait_time_us.store(0, Ordering::Relaxed);
    }
}

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TOKEN: u64 = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
}

/// A per-thread token, never zero and never reused by a later thread.
fn current_thread_token() -> u64 {
    THREAD_TOKEN.with(|token| *token)
}

const NO_OWNER: u64 = 0;

/// A raw, non-reentrant mutual-exclusion lock.
pub struct Mutex {
    raw: RawMutex,

    /// Token of the holding thread, `NO_OWNER` when free. Only ever
    /// compared against the caller's own token.
    owner: AtomicU64,

    id: LockId,
    name: Option<String>,
    stats: Option<MutexStats>,
}

impl Mutex {
    /// Create a new unlocked mutex with statistics enabled
    pub fn new() -> Self {
        Self {
            raw: <RawMutex as RawMutexApi>::INIT,
            owner: AtomicU64::new(NO_OWNER),
            id: LockId::new(),
            name: None,
            stats: Some(MutexStats::new()),
        }
    }

    /// Create a new mutex with a name for diagnostics
    pub fn with_name(name: impl Into<String>) -> Self {
        let mut mutex = Self::new();
        mutex.name = Some(name.into());
        mutex
    }

    /// Create a mutex honouring the lock configuration
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new().track_stats(config.track_stats)
    }

    /// Enable or disable statistics collection
    pub fn track_stats(mut self, enabled: bool) -> Self {
        self.stats = enabled.then(MutexStats::new);
        self
    }

    /// Block the calling thread until the lock is free, then hold it.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds this lock.
    pub fn acquire(&self) {
        let me = current_thread_token();
        self.check_not_reentrant(me);

        if !self.raw.try_lock() {
            let start = Instant::now();
            self.raw.lock();
            if let Some(stats) = &self.stats {
                stats.record_wait(start.elapsed());
            }
        }

        self.mark_acquired(me);
    }

    /// Acquire the lock if it is free, without blocking.
    ///
    /// Returns `true` if the lock is now held by the caller.
    pub fn try_acquire(&self) -> bool {
        if self.raw.try_lock() {
            self.mark_acquired(current_thread_token());
            true
        } else {
            if let Some(stats) = &self.stats {
                stats.failed_count.fetch_add(1, Ordering::Relaxed);
            }
            false
        }
    }

    /// Acquire the lock, waiting at most `timeout`.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds this lock.
    pub fn try_acquire_for(&self, timeout: Duration) -> Result<(), LockError> {
        let me = current_thread_token();
        self.check_not_reentrant(me);

        let start = Instant::now();
        if !self.raw.try_lock_for(timeout) {
            if let Some(stats) = &self.stats {
                stats.failed_count.fetch_add(1, Ordering::Relaxed);
            }
            warn!(
                "Lock timeout: {} (timeout: {:.2}ms)",
                self.label(),
                timeout.as_secs_f64() * 1000.0
            );
            return Err(LockError::Timeout(timeout));
        }

        if let Some(stats) = &self.stats {
            let waited = start.elapsed();
            if !waited.is_zero() {
                stats.record_wait(waited);
            }
        }
        self.mark_acquired(me);
        Ok(())
    }

    /// Release the lock.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold the lock.
    pub fn release(&self) {
        if self.owner.load(Ordering::Relaxed) != current_thread_token() {
            error!("Release of lock {} by a non-holder", self.label());
            panic!(
                "lock {} released by a thread that does not hold it",
                self.label()
            );
        }

        self.owner.store(NO_OWNER, Ordering::Relaxed);
        // SAFETY: the ownership check above proves this thread locked `raw`.
        unsafe { self.raw.unlock() };

        trace!("Lock released: {}", self.label());
    }

    /// Panic unless the calling thread holds the lock.
    pub fn assert_held(&self) {
        if self.owner.load(Ordering::Relaxed) != current_thread_token() {
            panic!("lock {} is not held by the current thread", self.label());
        }
    }

    /// Panic if the calling thread holds the lock.
    pub fn assert_not_held(&self) {
        if self.owner.load(Ordering::Relaxed) == current_thread_token() {
            panic!("lock {} is unexpectedly held by the current thread", self.label());
        }
    }

    /// Whether any thread currently holds the lock
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    /// Run `f` with the lock held, releasing it afterwards even if `f` panics
    pub fn with_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.guard();
        f()
    }

    /// Acquire the lock and return a guard that releases it on drop
    pub fn guard(&self) -> MutexGuard<'_> {
        self.acquire();
        MutexGuard {
            mutex: self,
            _not_send: PhantomData,
        }
    }

    /// Acquire the lock if free, returning a releasing guard
    pub fn try_guard(&self) -> Option<MutexGuard<'_>> {
        self.try_acquire().then(|| MutexGuard {
            mutex: self,
            _not_send: PhantomData,
        })
    }

    /// Get the identifier of this lock
    pub fn id(&self) -> LockId {
        self.id
    }

    /// Get the name of this lock
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Get the statistics for this lock; all zero when tracking is disabled
    pub fn stats(&self) -> LockStats {
        self.stats
            .as_ref()
            .map(MutexStats::snapshot)
            .unwrap_or_default()
    }

    /// Reset the statistics
    pub fn reset_stats(&self) {
        if let Some(stats) = &self.stats {
            stats.reset();
        }
    }

    fn check_not_reentrant(&self, me: u64) {
        if self.owner.load(Ordering::Relaxed) == me {
            error!("Re-entrant acquire of lock {}", self.label());
            panic!("lock {} acquired re-entrantly by its holder", self.label());
        }
    }

    fn mark_acquired(&self, me: u64) {
        self.owner.store(me, Ordering::Relaxed);
        if let Some(stats) = &self.stats {
            stats.acquisition_count.fetch_add(1, Ordering::Relaxed);
        }
        trace!("Lock acquired: {}", self.label());
    }

    fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.id.to_string(),
        }
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Mutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("locked", &self.is_locked())
            .finish()
    }
}

impl Drop for Mutex {
    fn drop(&mut self) {
        if self.raw.is_locked() && !std::thread::panicking() {
            panic!("lock {} destroyed while held", self.label());
        }
    }
}

/// Releases a [`Mutex`] when dropped.
///
/// Not `Send`: the lock must be released by the thread that acquired it.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct MutexGuard<'a> {
    mutex: &'a Mutex,
    _not_send: PhantomData<*const ()>,
}

impl MutexGuard<'_> {
    /// The lock this guard holds
    pub fn mutex(&self) -> &Mutex {
        self.mutex
    }
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.release();
    }
}

// SAFETY: `acquire` and `try_acquire` give mutual exclusion through the
// inner parking_lot lock, and `release` only unlocks for the holding thread.
// Guards are not `Send`, so they unlock on the thread that locked.
unsafe impl RawMutexApi for Mutex {
    const INIT: Mutex = Mutex {
        raw: <RawMutex as RawMutexApi>::INIT,
        owner: AtomicU64::new(NO_OWNER),
        id: LockId::nil(),
        name: None,
        stats: Some(MutexStats::new()),
    };

    type GuardMarker = GuardNoSend;

    fn lock(&self) {
        self.acquire();
    }

    fn try_lock(&self) -> bool {
        self.try_acquire()
    }

    unsafe fn unlock(&self) {
        self.release();
    }

    fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }
}

/// A value protected by a [`Mutex`].
///
/// The protecting lock is never handed out: its holder can be asserted and
/// its statistics read, but it can only be released by dropping the guard.
///
/// ```compile_fail
/// use baton_concurrency::sync::Locked;
///
/// let locked = Locked::new(0);
/// let _guard = locked.lock();
/// locked.mutex().release();
/// ```
pub struct Locked<T> {
    inner: lock_api::Mutex<Mutex, T>,
}

/// Access to a [`Locked`] value; releases the lock on drop.
pub type LockedGuard<'a, T> = lock_api::MutexGuard<'a, Mutex, T>;

impl<T> Locked<T> {
    /// Protect `value` with a new mutex
    pub fn new(value: T) -> Self {
        Self::with_mutex(value, Mutex::new())
    }

    /// Protect `value` with a named mutex
    pub fn with_name(value: T, name: impl Into<String>) -> Self {
        Self::with_mutex(value, Mutex::with_name(name))
    }

    /// Protect `value` with the given mutex
    pub fn with_mutex(value: T, mutex: Mutex) -> Self {
        Self {
            inner: lock_api::Mutex::from_raw(mutex, value),
        }
    }

    /// Lock and return a guard giving access to the value
    pub fn lock(&self) -> LockedGuard<'_, T> {
        self.inner.lock()
    }

    /// Lock if free, without blocking
    pub fn try_lock(&self) -> Option<LockedGuard<'_, T>> {
        self.inner.try_lock()
    }

    /// Whether any thread currently holds the lock
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    /// Panic unless the calling thread holds the lock.
    pub fn assert_held(&self) {
        self.raw().assert_held();
    }

    /// Panic if the calling thread holds the lock.
    pub fn assert_not_held(&self) {
        self.raw().assert_not_held();
    }

    /// Get the statistics for the protecting lock
    pub fn stats(&self) -> LockStats {
        self.raw().stats()
    }

    /// Get the identifier of the protecting lock
    pub fn id(&self) -> LockId {
        self.raw().id()
    }

    /// Mutable access without locking; the borrow checker proves exclusivity
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    /// Consume the lock, returning the value
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }

    fn raw(&self) -> &Mutex {
        // SAFETY: the raw lock is only observed through this reference,
        // never unlocked.
        unsafe { self.inner.raw() }
    }
}

impl<T: Default> Default for Locked<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for Locked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Locked").field("mutex", self.raw()).finish()
    }
}
