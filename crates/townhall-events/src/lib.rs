//! Domain events and the in-process bus that fans them out to connected
//! dashboards.

mod bus;
mod event;

pub use bus::{Bus, BusStats, Delivery, SubscriberId, Subscription, DEFAULT_SUBSCRIBER_CAPACITY};
pub use event::{now_rfc3339, Action, DomainEvent};
