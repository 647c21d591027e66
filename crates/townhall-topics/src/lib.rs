//! Canonical topic constants shared by mutation sites, the push transport and
//! the dashboards.
//!
//! Topics are flat, coarse-grained data domains. There is no hierarchy and no
//! wildcard matching: a dashboard receives every topic and decides locally what
//! to reload. Keep this list alphabetized.

pub const TOPIC_ACTIVITY: &str = "activity";
pub const TOPIC_ANNOUNCEMENTS: &str = "announcements";
pub const TOPIC_COMPLAINTS: &str = "complaints";
pub const TOPIC_EVENTS: &str = "events";
pub const TOPIC_EXPORTS: &str = "exports";
pub const TOPIC_IMPORTS: &str = "imports";
pub const TOPIC_OFFICIALS: &str = "officials";
pub const TOPIC_RESIDENTS: &str = "residents";
pub const TOPIC_USERS: &str = "users";

// Legacy camelCase alias still emitted by the activity feed writer.
pub const TOPIC_RECENT_ACTIVITY: &str = "recentActivity";

/// Every topic a mutation site may publish under.
pub const ALL: &[&str] = &[
    TOPIC_ACTIVITY,
    TOPIC_ANNOUNCEMENTS,
    TOPIC_COMPLAINTS,
    TOPIC_EVENTS,
    TOPIC_EXPORTS,
    TOPIC_IMPORTS,
    TOPIC_OFFICIALS,
    TOPIC_RESIDENTS,
    TOPIC_USERS,
];

/// Returns true when `topic` is one of the fixed identifiers (aliases included).
pub fn is_known(topic: &str) -> bool {
    topic == TOPIC_RECENT_ACTIVITY || ALL.contains(&topic)
}
