use std::collections::HashMap;

use townhall_topics as topics;

use crate::section::Section;

/// What a received event asks the dashboard to refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReloadAction {
    /// Refetch one section's collection.
    Section(Section),
    /// Refetch the summary counters and activity feed.
    Summary,
}

/// Declarative topic → reload mapping.
///
/// A topic may fan out to several actions. A topic with no entry resolves to a
/// summary reload; it is never dropped.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    routes: HashMap<String, Vec<ReloadAction>>,
}

impl RoutingTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The mapping used by all three dashboards.
    pub fn standard() -> Self {
        use ReloadAction::{Section as S, Summary};
        Self::empty()
            .route(topics::TOPIC_RESIDENTS, [S(Section::Residents)])
            .route(topics::TOPIC_OFFICIALS, [S(Section::Officials)])
            .route(topics::TOPIC_EVENTS, [S(Section::Events)])
            .route(topics::TOPIC_ANNOUNCEMENTS, [S(Section::Announcements)])
            // Pending approvals and complaints are counted on the summary cards.
            .route(topics::TOPIC_COMPLAINTS, [S(Section::Complaints), Summary])
            .route(topics::TOPIC_USERS, [S(Section::Users), Summary])
            .route(topics::TOPIC_IMPORTS, [S(Section::Imports)])
            .route(topics::TOPIC_EXPORTS, [S(Section::Exports)])
            .route(topics::TOPIC_ACTIVITY, [Summary])
            .route(topics::TOPIC_RECENT_ACTIVITY, [Summary])
    }

    pub fn route(mut self, topic: &str, actions: impl IntoIterator<Item = ReloadAction>) -> Self {
        let entry = self.routes.entry(topic.to_string()).or_default();
        for action in actions {
            if !entry.contains(&action) {
                entry.push(action);
            }
        }
        self
    }

    pub fn is_mapped(&self, topic: &str) -> bool {
        self.routes.contains_key(topic)
    }

    /// Actions for `topic`, in table order. Unknown topics yield `[Summary]`.
    pub fn resolve(&self, topic: &str) -> &[ReloadAction] {
        const FALLBACK: &[ReloadAction] = &[ReloadAction::Summary];
        match self.routes.get(topic) {
            Some(actions) if !actions.is_empty() => actions,
            _ => FALLBACK,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_topics_map_to_their_section() {
        let table = RoutingTable::standard();
        assert_eq!(
            table.resolve("residents"),
            &[ReloadAction::Section(Section::Residents)]
        );
        assert_eq!(
            table.resolve("users"),
            &[ReloadAction::Section(Section::Users), ReloadAction::Summary]
        );
        assert_eq!(table.resolve("recentActivity"), &[ReloadAction::Summary]);
    }

    #[test]
    fn unknown_topic_falls_back_to_summary() {
        let table = RoutingTable::standard();
        assert!(!table.is_mapped("unmapped-thing"));
        assert_eq!(table.resolve("unmapped-thing"), &[ReloadAction::Summary]);
        assert_eq!(RoutingTable::empty().resolve(""), &[ReloadAction::Summary]);
    }

    #[test]
    fn every_fixed_topic_is_mapped() {
        let table = RoutingTable::standard();
        for topic in topics::ALL {
            assert!(table.is_mapped(topic), "{topic} has no route");
        }
    }

    #[test]
    fn route_merges_without_duplicates() {
        let table = RoutingTable::empty()
            .route("events", [ReloadAction::Section(Section::Events)])
            .route("events", [ReloadAction::Section(Section::Events), ReloadAction::Summary]);
        assert_eq!(
            table.resolve("events"),
            &[ReloadAction::Section(Section::Events), ReloadAction::Summary]
        );
    }
}
