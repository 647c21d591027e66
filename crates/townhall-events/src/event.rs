use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// What a mutation did to the entity it names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Create,
    Update,
    Delete,
    RoleChange,
    Approve,
    Reject,
    Rsvp,
    Comment,
    Register,
    Publish,
    #[default]
    #[serde(other)]
    Other,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::RoleChange => "role-change",
            Action::Approve => "approve",
            Action::Reject => "reject",
            Action::Rsvp => "rsvp",
            Action::Comment => "comment",
            Action::Register => "register",
            Action::Publish => "publish",
            Action::Other => "other",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One completed mutation. Immutable once published.
///
/// `payload` carries the post-mutation entity where the mutation site had it
/// at hand. It may be partial; consumers refetch authoritative state instead
/// of patching from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    pub topic: String,
    #[serde(default)]
    pub action: Action,
    #[serde(default, deserialize_with = "id_from_scalar")]
    pub id: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default = "now_rfc3339")]
    pub emitted_at: String,
}

impl DomainEvent {
    pub fn new(
        topic: impl Into<String>,
        action: Action,
        id: impl ToString,
        payload: Value,
    ) -> Self {
        Self {
            topic: topic.into(),
            action,
            id: id.to_string(),
            payload,
            emitted_at: now_rfc3339(),
        }
    }

    /// True when the topic is one of the fixed identifiers in `townhall_topics`.
    pub fn has_known_topic(&self) -> bool {
        townhall_topics::is_known(&self.topic)
    }
}

/// RFC3339 UTC timestamp with millisecond precision.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// Store rows use integer keys while imports and sessions use strings.
fn id_from_scalar<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "event id must be a string or number, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_camel_case_with_kebab_actions() {
        let ev = DomainEvent::new("users", Action::RoleChange, 42, json!({"role": "official"}));
        let v = serde_json::to_value(&ev).expect("serialize");
        assert_eq!(v["topic"], "users");
        assert_eq!(v["action"], "role-change");
        assert_eq!(v["id"], "42");
        assert!(v["emittedAt"].as_str().is_some_and(|s| s.ends_with('Z')));
        assert!(v.get("emitted_at").is_none());
    }

    #[test]
    fn numeric_ids_and_unknown_actions_are_accepted() {
        let ev: DomainEvent = serde_json::from_value(json!({
            "topic": "complaints",
            "action": "escalate",
            "id": 7,
            "emittedAt": "2024-01-01T00:00:00.000Z"
        }))
        .expect("decode");
        assert_eq!(ev.action, Action::Other);
        assert_eq!(ev.id, "7");
        assert_eq!(ev.payload, Value::Null);
    }

    #[test]
    fn known_topic_check_uses_topic_list() {
        let ev = DomainEvent::new("unmapped-thing", Action::Update, "x", Value::Null);
        assert!(!ev.has_known_topic());
        let ev = DomainEvent::new(townhall_topics::TOPIC_EVENTS, Action::Rsvp, "x", Value::Null);
        assert!(ev.has_known_topic());
    }
}
