//! Append-only audit trail.
//!
//! Every state transition in the engine lands here: counter resets,
//! alert openings and closings, escalations, admin decisions and
//! notification outcomes. Entries are never mutated after insert.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who caused a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum Actor {
    /// The background scanner or dispatcher.
    System,
    /// The monitored user themself.
    User(String),
    /// An administrator.
    Admin(String),
}

impl Actor {
    /// Storage encoding: `system`, `user:<id>`, `admin:<id>`.
    pub fn as_db_string(&self) -> String {
        match self {
            Actor::System => "system".to_string(),
            Actor::User(id) => format!("user:{id}"),
            Actor::Admin(id) => format!("admin:{id}"),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        if s == "system" {
            return Some(Actor::System);
        }
        if let Some(id) = s.strip_prefix("user:") {
            return Some(Actor::User(id.to_string()));
        }
        if let Some(id) = s.strip_prefix("admin:") {
            return Some(Actor::Admin(id.to_string()));
        }
        None
    }
}

/// One immutable audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    /// Entity kind: "profile", "alert", "review" or "attempt".
    pub entity_type: String,
    pub entity_id: String,
    pub from_state: String,
    pub to_state: String,
    pub actor: Actor,
    pub timestamp: DateTime<Utc>,
}

/// Filter for audit queries; entries come back newest first.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn for_entity(entity_type: &str, entity_id: &str) -> Self {
        Self {
            entity_type: Some(entity_type.to_string()),
            entity_id: Some(entity_id.to_string()),
            limit: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_encoding_roundtrip() {
        for actor in [
            Actor::System,
            Actor::User("u-1".into()),
            Actor::Admin("a-9".into()),
        ] {
            assert_eq!(Actor::parse(&actor.as_db_string()), Some(actor));
        }
    }

    #[test]
    fn unknown_actor_encoding_rejected() {
        assert_eq!(Actor::parse("robot:r2"), None);
        assert_eq!(Actor::parse(""), None);
    }
}
