use serde_json::Value;
use townhall_events::{Action, Bus, Delivery, DomainEvent};

/// The publish half of the mutation contract.
///
/// CRUD handlers call [`MutationSite::record`] after their write commits. The
/// call never fails: a dashboard that misses the push still converges through
/// its fallback poll, so delivery problems are only counted and logged.
#[derive(Clone)]
pub(crate) struct MutationSite {
    bus: Bus,
}

impl MutationSite {
    pub(crate) fn new(bus: Bus) -> Self {
        Self { bus }
    }

    pub(crate) fn record(
        &self,
        topic: &str,
        action: Action,
        id: impl ToString,
        payload: Value,
    ) -> Delivery {
        self.publish(DomainEvent::new(topic, action, id, payload))
    }

    fn publish(&self, event: DomainEvent) -> Delivery {
        if !event.has_known_topic() {
            tracing::warn!(topic = %event.topic, "publishing under a topic outside the fixed list");
        }
        let topic = event.topic.clone();
        let action = event.action;
        let report = self.bus.publish(event);
        metrics::counter!("townhall_bus_delivered_total").increment(report.delivered as u64);
        if report.dropped > 0 {
            metrics::counter!("townhall_bus_dropped_total").increment(report.dropped as u64);
        }
        tracing::debug!(
            topic = %topic,
            action = %action,
            delivered = report.delivered,
            dropped = report.dropped,
            "mutation published"
        );
        report
    }
}
