//! Push-side of the event bridge.
//!
//! An [`EventHub`] routes payloads published under a name to every live
//! [`Subscription`] for that name, optionally filtered by the identity of
//! the publishing object. Publishing never blocks: payloads are queued per
//! subscription and pulled by the consumer at its own pace.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use baton_core::error::ConfigError;
use baton_core::id::SubscriptionId;
use baton_core::utils::EventConfig;
use log::{debug, trace};
use once_cell::sync::Lazy;

use crate::cancel::CancellationScope;
use crate::event::identity::Identity;
use crate::event::subscription::{Subscription, SubscriptionShared};
use crate::sync::Locked;

struct Route<T> {
    filter: Option<Identity>,
    target: Arc<SubscriptionShared<T>>,
}

impl<T> Route<T> {
    fn accepts(&self, source: Option<&Identity>) -> bool {
        match (&self.filter, source) {
            (None, _) => true,
            (Some(filter), Some(source)) => filter.ptr_eq(source),
            (Some(_), None) => false,
        }
    }
}

pub(crate) struct HubInner<T> {
    config: EventConfig,
    routes: Locked<HashMap<String, Vec<Route<T>>>>,
}

impl<T> HubInner<T> {
    pub(crate) fn unregister(&self, name: &str, id: SubscriptionId) {
        let removed = {
            let mut routes = self.routes.lock();
            let Some(list) = routes.get_mut(name) else {
                return;
            };
            let removed = list
                .iter()
                .position(|route| route.target.id() == id)
                .map(|index| list.remove(index));
            if list.is_empty() {
                routes.remove(name);
            }
            removed
        };

        if removed.is_some() {
            trace!("Subscription {} removed from '{}'", id, name);
        }
    }
}

/// Named event router.
///
/// Cloning the hub yields another handle to the same routing table.
pub struct EventHub<T> {
    inner: Arc<HubInner<T>>,
}

impl<T> EventHub<T> {
    /// Create a hub with unbounded subscription queues
    pub fn new() -> Self {
        Self::from_valid_config(EventConfig::default())
    }

    /// Create a hub whose subscription queues follow `config`.
    ///
    /// Fails with [`ConfigError::Invalid`] for a zero queue capacity.
    pub fn with_config(config: EventConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: EventConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                config,
                routes: Locked::with_name(HashMap::new(), "event-hub"),
            }),
        }
    }

    /// Subscribe to events published under `name`.
    ///
    /// With `identity` set, only events published with that same identity
    /// are delivered; otherwise every event for `name` is.
    pub fn subscribe(&self, name: impl Into<String>, identity: Option<Identity>) -> Subscription<T> {
        let name = name.into();
        let shared = Arc::new(SubscriptionShared::new(
            name.clone(),
            self.inner.config.clone(),
        ));

        {
            let mut routes = self.inner.routes.lock();
            routes.entry(name.clone()).or_default().push(Route {
                filter: identity,
                target: Arc::clone(&shared),
            });
        }

        debug!("Subscription {} registered for '{}'", shared.id(), name);
        Subscription::new(shared, Arc::downgrade(&self.inner))
    }

    /// Number of live subscriptions for `name`
    pub fn subscription_count(&self, name: &str) -> usize {
        self.inner
            .routes
            .lock()
            .get(name)
            .map_or(0, |list| list.len())
    }

    /// Event names with at least one live subscription, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.routes.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Get the queue configuration applied to new subscriptions
    pub fn config(&self) -> &EventConfig {
        &self.inner.config
    }
}

impl<T: Send + 'static> EventHub<T> {
    /// Subscribe under `scope`: cancelling the scope cancels the subscription.
    ///
    /// A subscription made under an already-cancelled scope starts cancelled.
    pub fn subscribe_in(
        &self,
        scope: &CancellationScope,
        name: impl Into<String>,
        identity: Option<Identity>,
    ) -> Subscription<T> {
        let mut subscription = self.subscribe(name, identity);
        let canceller = subscription.canceller();
        subscription._registration = Some(scope.on_cancel(move || canceller.cancel()));
        subscription
    }
}

impl<T: Clone> EventHub<T> {
    /// Publish `payload` under `name` from `source`.
    ///
    /// Delivers to every live subscription whose name matches and whose
    /// identity filter, if any, matches `source`. Returns the number of
    /// subscriptions that queued the payload.
    pub fn publish(&self, name: &str, source: Option<&Identity>, payload: T) -> usize {
        // Snapshot targets so delivery happens without the routing lock.
        let targets: Vec<Arc<SubscriptionShared<T>>> = {
            let routes = self.inner.routes.lock();
            match routes.get(name) {
                Some(list) => list
                    .iter()
                    .filter(|route| route.accepts(source))
                    .map(|route| Arc::clone(&route.target))
                    .collect(),
                None => Vec::new(),
            }
        };

        let mut delivered = 0;
        if let Some((last, rest)) = targets.split_last() {
            for target in rest {
                if target.deliver(payload.clone()) {
                    delivered += 1;
                }
            }
            if last.deliver(payload) {
                delivered += 1;
            }
        }

        trace!("Published '{}' to {} subscription(s)", name, delivered);
        delivered
    }
}

impl<T> Clone for EventHub<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for EventHub<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for EventHub<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("names", &self.names())
            .field("config", &self.inner.config)
            .finish()
    }
}

static SHARED: Lazy<EventHub<serde_json::Value>> = Lazy::new(EventHub::new);

/// Process-wide hub carrying JSON payloads
pub fn shared() -> &'static EventHub<serde_json::Value> {
    &SHARED
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_core::utils::OverflowPolicy;
    use std::time::Duration;

    #[test]
    fn test_publish_only_reaches_matching_name() {
        let hub = EventHub::new();
        let mut sub = hub.subscribe("E", None);

        assert_eq!(hub.publish("E", None, "x"), 1);
        assert_eq!(hub.publish("F", None, "y"), 0);
        assert_eq!(hub.publish("E", None, "z"), 1);

        assert_eq!(sub.try_next(), Some("x"));
        assert_eq!(sub.try_next(), Some("z"));
        assert_eq!(sub.try_next(), None);
    }

    #[test]
    fn test_identity_filter() {
        let hub = EventHub::new();
        let a = Identity::new();
        let b = Identity::new();
        let mut sub = hub.subscribe("E", Some(a.clone()));

        hub.publish("E", Some(&a), 1);
        hub.publish("E", Some(&b), 2);
        hub.publish("E", Some(&a), 3);
        hub.publish("E", None, 4);

        assert_eq!(sub.try_next(), Some(1));
        assert_eq!(sub.try_next(), Some(3));
        assert_eq!(sub.try_next(), None);
    }

    #[test]
    fn test_unfiltered_subscription_sees_every_source() {
        let hub = EventHub::new();
        let mut sub = hub.subscribe("E", None);

        hub.publish("E", Some(&Identity::new()), 1);
        hub.publish("E", None, 2);

        assert_eq!(sub.try_next(), Some(1));
        assert_eq!(sub.try_next(), Some(2));
    }

    #[test]
    fn test_fan_out_to_all_subscriptions() {
        let hub = EventHub::new();
        let mut first = hub.subscribe("E", None);
        let mut second = hub.subscribe("E", None);
        assert_eq!(hub.subscription_count("E"), 2);

        assert_eq!(hub.publish("E", None, String::from("payload")), 2);
        assert_eq!(first.try_next().as_deref(), Some("payload"));
        assert_eq!(second.try_next().as_deref(), Some("payload"));
    }

    #[test]
    fn test_cancel_unregisters() {
        let hub = EventHub::new();
        let mut sub = hub.subscribe("E", None);
        hub.publish("E", None, 1);

        sub.cancel();
        assert_eq!(hub.subscription_count("E"), 0);
        assert!(hub.names().is_empty());
        assert_eq!(hub.publish("E", None, 2), 0);
        assert_eq!(sub.try_next(), None);
    }

    #[test]
    fn test_drop_unregisters() {
        let hub: EventHub<u8> = EventHub::new();
        let sub = hub.subscribe("E", None);
        let _other = hub.subscribe("F", None);
        assert_eq!(hub.names(), vec!["E".to_string(), "F".to_string()]);

        drop(sub);
        assert_eq!(hub.names(), vec!["F".to_string()]);
    }

    #[test]
    fn test_subscription_outlives_hub() {
        let hub = EventHub::new();
        let mut sub = hub.subscribe("E", None);
        hub.publish("E", None, 1);
        drop(hub);

        assert_eq!(sub.try_next(), Some(1));
        sub.cancel();
        assert!(sub.is_cancelled());
    }

    #[test]
    fn test_bounded_hub_config() {
        let hub =
            EventHub::with_config(EventConfig::bounded(1, OverflowPolicy::DropNewest)).unwrap();
        let mut sub = hub.subscribe("E", None);

        assert_eq!(hub.publish("E", None, 1), 1);
        assert_eq!(hub.publish("E", None, 2), 0);
        assert_eq!(sub.dropped(), 1);
        assert_eq!(sub.try_next(), Some(1));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result =
            EventHub::<u8>::with_config(EventConfig::bounded(0, OverflowPolicy::DropOldest));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_scope_cancels_subscription() {
        let hub: EventHub<u8> = EventHub::new();
        let scope = CancellationScope::new();
        let sub = hub.subscribe_in(&scope, "E", None);
        assert_eq!(scope.registered_count(), 1);

        scope.cancel();
        assert!(sub.is_cancelled());
        assert_eq!(hub.subscription_count("E"), 0);
    }

    #[test]
    fn test_subscribe_in_cancelled_scope() {
        let hub: EventHub<u8> = EventHub::new();
        let scope = CancellationScope::new();
        scope.cancel();

        let sub = hub.subscribe_in(&scope, "E", None);
        assert!(sub.is_cancelled());
        assert_eq!(hub.publish("E", None, 1), 0);
    }

    #[tokio::test]
    async fn test_next_waits_for_publish() {
        let hub = EventHub::new();
        let mut sub = hub.subscribe("E", None);

        let publisher = hub.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher.publish("E", None, 5u32);
        });

        assert_eq!(sub.next().await, Some(5));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_ends_sequence() {
        let hub: EventHub<u32> = EventHub::new();
        let mut sub = hub.subscribe("E", None);
        let canceller = sub.canceller();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        assert_eq!(sub.next().await, None);
        assert_eq!(sub.next().await, None);
        assert_eq!(hub.subscription_count("E"), 0);
    }

    #[test]
    fn test_shared_hub() {
        let mut sub = shared().subscribe("hub.test.shared", None);
        shared().publish("hub.test.shared", None, serde_json::json!({ "n": 1 }));
        assert_eq!(sub.try_next(), Some(serde_json::json!({ "n": 1 })));
    }
}
