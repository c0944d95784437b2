//! Event bridge: adapts named, push-style notifications into pull-style
//! sequences.
//!
//! - [`EventHub`]: routes published payloads by name and source identity
//! - [`Subscription`]: a consumer's queue of matching payloads
//! - [`Identity`]: reference-equality token for filtering by source

pub mod hub;
pub mod identity;
pub mod subscription;

pub use hub::{shared, EventHub};
pub use identity::Identity;
pub use subscription::{Subscription, SubscriptionCanceller};
