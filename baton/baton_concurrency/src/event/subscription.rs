//! Pull-side of the event bridge.
//!
//! A [`Subscription`] owns a queue that the hub pushes matching events into.
//! The consumer pulls them one at a time with [`Subscription::next`] (or as a
//! [`Stream`]). Cancelling the subscription discards anything still queued,
//! resolves a pending `next()` to `None`, and removes the subscription from
//! its hub so no later publish reaches it.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};

use baton_core::id::SubscriptionId;
use baton_core::utils::{EventConfig, OverflowPolicy};
use futures::stream::{FusedStream, Stream};
use log::{debug, trace, warn};

use crate::cancel::CancelRegistration;
use crate::event::hub::HubInner;
use crate::sync::Locked;

struct QueueState<T> {
    queue: VecDeque<T>,
    cancelled: bool,
    waker: Option<Waker>,
    dropped: u64,
}

/// State shared between a subscription and the hub's routing table.
pub(crate) struct SubscriptionShared<T> {
    id: SubscriptionId,
    name: String,
    config: EventConfig,
    state: Locked<QueueState<T>>,
}

impl<T> SubscriptionShared<T> {
    pub(crate) fn new(name: String, config: EventConfig) -> Self {
        let id = SubscriptionId::new();
        Self {
            id,
            state: Locked::with_name(
                QueueState {
                    queue: VecDeque::new(),
                    cancelled: false,
                    waker: None,
                    dropped: 0,
                },
                format!("subscription-{}", id),
            ),
            name,
            config,
        }
    }

    pub(crate) fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Queue `payload` unless cancelled. Never blocks the publisher.
    pub(crate) fn deliver(&self, payload: T) -> bool {
        let waker = {
            let mut state = self.state.lock();
            if state.cancelled {
                return false;
            }

            if let Some(capacity) = self.config.queue_capacity {
                if state.queue.len() >= capacity {
                    state.dropped += 1;
                    match self.config.overflow {
                        OverflowPolicy::DropOldest => {
                            warn!(
                                "Subscription {} to '{}' full ({}), dropping oldest event",
                                self.id, self.name, capacity
                            );
                            state.queue.pop_front();
                        }
                        OverflowPolicy::DropNewest => {
                            warn!(
                                "Subscription {} to '{}' full ({}), dropping new event",
                                self.id, self.name, capacity
                            );
                            return false;
                        }
                    }
                }
            }

            state.queue.push_back(payload);
            state.waker.take()
        };

        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    /// Set the cancellation flag and discard queued events.
    fn cancel(&self) -> bool {
        let (discarded, waker) = {
            let mut state = self.state.lock();
            if state.cancelled {
                return false;
            }
            state.cancelled = true;
            (std::mem::take(&mut state.queue), state.waker.take())
        };

        debug!(
            "Subscription {} to '{}' cancelled, discarding {} queued event(s)",
            self.id,
            self.name,
            discarded.len()
        );
        drop(discarded);

        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    fn poll_recv(&self, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let mut state = self.state.lock();
        if state.cancelled {
            return Poll::Ready(None);
        }
        if let Some(payload) = state.queue.pop_front() {
            return Poll::Ready(Some(payload));
        }

        match &state.waker {
            Some(waker) if waker.will_wake(cx.waker()) => {}
            _ => state.waker = Some(cx.waker().clone()),
        }
        Poll::Pending
    }

    fn try_recv(&self) -> Option<T> {
        let mut state = self.state.lock();
        if state.cancelled {
            None
        } else {
            state.queue.pop_front()
        }
    }

    fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }
}

fn detach<T>(shared: &SubscriptionShared<T>, hub: &Weak<HubInner<T>>) {
    if shared.cancel() {
        if let Some(hub) = hub.upgrade() {
            hub.unregister(&shared.name, shared.id);
        }
    }
}

/// A live registration of interest in one event name.
///
/// Produces a lazy, unbounded, single-pass sequence of payloads. Dropping
/// the subscription cancels it.
#[must_use = "a subscription is cancelled as soon as it is dropped"]
pub struct Subscription<T> {
    shared: Arc<SubscriptionShared<T>>,
    hub: Weak<HubInner<T>>,
    /// Scope registration for subscriptions tied to a cancellation scope
    pub(crate) _registration: Option<CancelRegistration>,
}

impl<T> Subscription<T> {
    pub(crate) fn new(shared: Arc<SubscriptionShared<T>>, hub: Weak<HubInner<T>>) -> Self {
        Self {
            shared,
            hub,
            _registration: None,
        }
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once the subscription is cancelled; events still
    /// queued at that point are never returned.
    pub async fn next(&mut self) -> Option<T> {
        std::future::poll_fn(|cx| self.shared.poll_recv(cx)).await
    }

    /// Take the next queued event without waiting
    pub fn try_next(&mut self) -> Option<T> {
        self.shared.try_recv()
    }

    /// Cancel the subscription. Idempotent.
    pub fn cancel(&self) {
        detach(&self.shared, &self.hub);
    }

    /// A handle that can cancel this subscription from another task
    pub fn canceller(&self) -> SubscriptionCanceller<T> {
        SubscriptionCanceller {
            shared: Arc::clone(&self.shared),
            hub: self.hub.clone(),
        }
    }

    /// Whether the subscription has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// Number of events queued and not yet pulled
    pub fn pending(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Number of events discarded by the overflow policy
    pub fn dropped(&self) -> u64 {
        self.shared.state.lock().dropped
    }

    /// Get the identifier of this subscription
    pub fn id(&self) -> SubscriptionId {
        self.shared.id
    }

    /// The event name this subscription matches
    pub fn name(&self) -> &str {
        &self.shared.name
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.shared.poll_recv(cx)
    }
}

impl<T> FusedStream for Subscription<T> {
    fn is_terminated(&self) -> bool {
        self.shared.is_cancelled()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        trace!("Subscription {} dropped", self.shared.id);
        detach(&self.shared, &self.hub);
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Cancels a [`Subscription`] from outside its consuming task.
pub struct SubscriptionCanceller<T> {
    shared: Arc<SubscriptionShared<T>>,
    hub: Weak<HubInner<T>>,
}

impl<T> SubscriptionCanceller<T> {
    /// Cancel the subscription. Idempotent.
    pub fn cancel(&self) {
        detach(&self.shared, &self.hub);
    }

    /// Whether the subscription has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }
}

impl<T> Clone for SubscriptionCanceller<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            hub: self.hub.clone(),
        }
    }
}

impl<T> fmt::Debug for SubscriptionCanceller<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionCanceller")
            .field("subscription", &self.shared.id)
            .finish()
    }
}
