//! Well-being alert state machine.
//!
//! At most one alert is open per user at any time. The lifecycle is:
//!
//! ```text
//! (none) -> pending -> responded   (user confirmed)
//!                   -> escalated -> responded
//! ```
//!
//! `responded` is terminal; the next missed period opens a fresh
//! `pending` alert with no memory of earlier cycles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Pending,
    Responded,
    Escalated,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Pending => "pending",
            AlertStatus::Responded => "responded",
            AlertStatus::Escalated => "escalated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AlertStatus::Pending),
            "responded" => Some(AlertStatus::Responded),
            "escalated" => Some(AlertStatus::Escalated),
            _ => None,
        }
    }

    /// Whether the alert still demands action.
    pub fn is_open(&self) -> bool {
        !matches!(self, AlertStatus::Responded)
    }

    /// Legal transitions of the alert state machine.
    pub fn can_transition(self, to: AlertStatus) -> bool {
        matches!(
            (self, to),
            (AlertStatus::Pending, AlertStatus::Responded)
                | (AlertStatus::Pending, AlertStatus::Escalated)
                | (AlertStatus::Escalated, AlertStatus::Responded)
        )
    }
}

/// A single "are you okay" alert for one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub user_id: String,
    pub status: AlertStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Alert {
    /// Open a fresh pending alert for `user_id`.
    pub fn open(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            status: AlertStatus::Pending,
            opened_at: now,
            closed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_can_respond_or_escalate() {
        assert!(AlertStatus::Pending.can_transition(AlertStatus::Responded));
        assert!(AlertStatus::Pending.can_transition(AlertStatus::Escalated));
    }

    #[test]
    fn escalated_only_exits_to_responded() {
        assert!(AlertStatus::Escalated.can_transition(AlertStatus::Responded));
        assert!(!AlertStatus::Escalated.can_transition(AlertStatus::Pending));
        assert!(!AlertStatus::Escalated.can_transition(AlertStatus::Escalated));
    }

    #[test]
    fn responded_is_terminal() {
        assert!(!AlertStatus::Responded.can_transition(AlertStatus::Pending));
        assert!(!AlertStatus::Responded.can_transition(AlertStatus::Escalated));
        assert!(!AlertStatus::Responded.is_open());
    }

    #[test]
    fn status_string_roundtrip() {
        for status in [
            AlertStatus::Pending,
            AlertStatus::Responded,
            AlertStatus::Escalated,
        ] {
            assert_eq!(AlertStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AlertStatus::parse("bogus"), None);
    }
}
