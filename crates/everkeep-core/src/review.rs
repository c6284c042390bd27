//! Escalation gate and admin review workflow.
//!
//! Crossing the missed-check-in threshold never notifies anyone by
//! itself: it escalates the alert and parks a review request for a
//! human administrator. Only an approved review reaches the
//! notification dispatcher.
//!
//! Deciding a review requires the admin role. There is deliberately no
//! development-mode bypass here.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::alert::AlertStatus;
use crate::audit::Actor;
use crate::clock::Clock;
use crate::error::{CoreError, Result};
use crate::ledger::LivenessProfile;
use crate::storage::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ReviewStatus::Pending),
            "approved" => Some(ReviewStatus::Approved),
            "rejected" => Some(ReviewStatus::Rejected),
            _ => None,
        }
    }
}

/// The administrator's verdict on a pending review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

/// A request for human judgment on a prolonged silence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminReview {
    pub id: String,
    pub user_id: String,
    pub status: ReviewStatus,
    pub reviewer_id: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl AdminReview {
    fn open(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            status: ReviewStatus::Pending,
            reviewer_id: None,
            notes: None,
            created_at: now,
            decided_at: None,
        }
    }
}

/// Admin-role lookup, supplied by the external auth layer.
pub trait AdminRoster: Send + Sync {
    fn is_admin(&self, actor_id: &str) -> bool;
}

/// Decides whether a counter advance crosses into admin review.
#[derive(Clone)]
pub struct EscalationGate {
    store: Arc<Database>,
    clock: Arc<dyn Clock>,
}

impl EscalationGate {
    pub fn new(store: Arc<Database>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Escalate if the threshold is crossed.
    ///
    /// Idempotent under repeated sweeps: an already-escalated alert or an
    /// existing pending review makes this a no-op. Returns whether an
    /// escalation happened on this call.
    pub fn maybe_escalate(&self, profile: &LivenessProfile) -> Result<bool> {
        if !profile.escalation_enabled || profile.missed_count < profile.threshold {
            return Ok(false);
        }
        // The advance that brought us here opened the alert; if a
        // concurrent confirmation closed it meanwhile, there is nothing
        // left to escalate.
        let Some(alert) = self.store.get_open_alert(&profile.user_id)? else {
            return Ok(false);
        };
        if alert.status == AlertStatus::Escalated {
            return Ok(false);
        }

        let now = self.clock.now();
        self.store
            .transition_alert(&alert.id, AlertStatus::Escalated, None)?;
        self.store.append_audit(
            "alert",
            &alert.id,
            alert.status.as_str(),
            AlertStatus::Escalated.as_str(),
            &Actor::System,
            now,
        )?;

        if self.store.get_pending_review(&profile.user_id)?.is_none() {
            let review = AdminReview::open(&profile.user_id, now);
            self.store.insert_review(&review)?;
            self.store.append_audit(
                "review",
                &review.id,
                "none",
                ReviewStatus::Pending.as_str(),
                &Actor::System,
                now,
            )?;
            info!(
                user_id = %profile.user_id,
                review_id = %review.id,
                missed = profile.missed_count,
                threshold = profile.threshold,
                "escalated to admin review"
            );
        }
        Ok(true)
    }
}

/// Pending reviews and the admin decision path.
#[derive(Clone)]
pub struct ReviewQueue {
    store: Arc<Database>,
    clock: Arc<dyn Clock>,
    roster: Arc<dyn AdminRoster>,
}

impl ReviewQueue {
    pub fn new(store: Arc<Database>, clock: Arc<dyn Clock>, roster: Arc<dyn AdminRoster>) -> Self {
        Self {
            store,
            clock,
            roster,
        }
    }

    pub fn list_pending(&self) -> Result<Vec<AdminReview>> {
        self.store.list_pending_reviews()
    }

    pub fn get(&self, review_id: &str) -> Result<AdminReview> {
        self.store.get_review(review_id)?.ok_or(CoreError::NotFound {
            entity: "review",
            id: review_id.to_string(),
        })
    }

    /// Record the administrator's decision.
    ///
    /// Only a pending review can be decided. Rejection closes the review
    /// and nothing else: the alert stays escalated and the counter is
    /// untouched until the user confirms or another decision is made.
    pub fn decide(
        &self,
        review_id: &str,
        decision: Decision,
        reviewer_id: &str,
        notes: Option<String>,
    ) -> Result<AdminReview> {
        if !self.roster.is_admin(reviewer_id) {
            return Err(CoreError::Forbidden {
                actor: reviewer_id.to_string(),
            });
        }
        let review = self.get(review_id)?;
        if review.status != ReviewStatus::Pending {
            return Err(CoreError::InvalidTransition {
                entity: "review",
                from: review.status.as_str().to_string(),
                to: match decision {
                    Decision::Approve => ReviewStatus::Approved.as_str().to_string(),
                    Decision::Reject => ReviewStatus::Rejected.as_str().to_string(),
                },
            });
        }

        let status = match decision {
            Decision::Approve => ReviewStatus::Approved,
            Decision::Reject => ReviewStatus::Rejected,
        };
        let now = self.clock.now();
        let decided = self
            .store
            .decide_review(review_id, status, reviewer_id, notes, now)?;
        self.store.append_audit(
            "review",
            review_id,
            ReviewStatus::Pending.as_str(),
            status.as_str(),
            &Actor::Admin(reviewer_id.to_string()),
            now,
        )?;
        Ok(decided)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ledger::{CheckinLedger, ProfileSettings};
    use chrono::{Duration, TimeZone};

    struct FixedRoster(Vec<String>);

    impl AdminRoster for FixedRoster {
        fn is_admin(&self, actor_id: &str) -> bool {
            self.0.iter().any(|a| a == actor_id)
        }
    }

    struct Fixture {
        ledger: CheckinLedger,
        gate: EscalationGate,
        queue: ReviewQueue,
        clock: Arc<ManualClock>,
        store: Arc<Database>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(Database::open_memory().unwrap());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        ));
        let roster = Arc::new(FixedRoster(vec!["admin-1".to_string()]));
        Fixture {
            ledger: CheckinLedger::new(store.clone(), clock.clone(), 5),
            gate: EscalationGate::new(store.clone(), clock.clone()),
            queue: ReviewQueue::new(store.clone(), clock.clone(), roster),
            clock,
            store,
        }
    }

    fn settings(threshold: u32) -> ProfileSettings {
        ProfileSettings {
            threshold,
            ..ProfileSettings::default()
        }
    }

    /// Drive the user to exactly `n` missed periods.
    fn miss_periods(f: &Fixture, user: &str, n: u32) -> LivenessProfile {
        // Skew past the period boundary so each day is fully elapsed.
        f.clock.advance(Duration::hours(1));
        let mut last = None;
        for _ in 0..n {
            f.clock.advance(Duration::days(1));
            if let Some(p) = f.ledger.advance(user).unwrap() {
                last = Some(p);
            }
        }
        last.expect("at least one advance")
    }

    #[test]
    fn below_threshold_does_not_escalate() {
        let f = fixture();
        f.ledger.register("u1", settings(3)).unwrap();
        let profile = miss_periods(&f, "u1", 2);
        assert!(!f.gate.maybe_escalate(&profile).unwrap());
        assert!(f.queue.list_pending().unwrap().is_empty());
    }

    #[test]
    fn threshold_crossing_escalates_once() {
        let f = fixture();
        f.ledger.register("u1", settings(3)).unwrap();
        let profile = miss_periods(&f, "u1", 3);

        assert!(f.gate.maybe_escalate(&profile).unwrap());
        let alert = f.store.get_open_alert("u1").unwrap().unwrap();
        assert_eq!(alert.status, AlertStatus::Escalated);

        // Repeated sweeps are idempotent: no duplicate review.
        assert!(!f.gate.maybe_escalate(&profile).unwrap());
        assert_eq!(f.queue.list_pending().unwrap().len(), 1);
    }

    #[test]
    fn escalation_disabled_is_a_noop() {
        let f = fixture();
        f.ledger
            .register(
                "u1",
                ProfileSettings {
                    threshold: 1,
                    escalation_enabled: false,
                    ..ProfileSettings::default()
                },
            )
            .unwrap();
        let profile = miss_periods(&f, "u1", 2);
        assert!(!f.gate.maybe_escalate(&profile).unwrap());
    }

    #[test]
    fn non_admin_is_forbidden() {
        let f = fixture();
        f.ledger.register("u1", settings(1)).unwrap();
        let profile = miss_periods(&f, "u1", 1);
        f.gate.maybe_escalate(&profile).unwrap();
        let review = &f.queue.list_pending().unwrap()[0];

        let err = f
            .queue
            .decide(&review.id, Decision::Approve, "intruder", None)
            .unwrap_err();
        assert!(matches!(err, CoreError::Forbidden { .. }));
        // Still pending.
        assert_eq!(f.queue.get(&review.id).unwrap().status, ReviewStatus::Pending);
    }

    #[test]
    fn rejection_leaves_alert_escalated_and_counter_untouched() {
        let f = fixture();
        f.ledger.register("u1", settings(2)).unwrap();
        let profile = miss_periods(&f, "u1", 2);
        f.gate.maybe_escalate(&profile).unwrap();
        let review = f.queue.list_pending().unwrap().remove(0);

        let decided = f
            .queue
            .decide(&review.id, Decision::Reject, "admin-1", Some("checking in person".into()))
            .unwrap();
        assert_eq!(decided.status, ReviewStatus::Rejected);
        assert_eq!(decided.reviewer_id.as_deref(), Some("admin-1"));

        let alert = f.store.get_open_alert("u1").unwrap().unwrap();
        assert_eq!(alert.status, AlertStatus::Escalated);
        let profile = f.ledger.get("u1").unwrap().unwrap();
        assert_eq!(profile.missed_count, 2);
    }

    #[test]
    fn deciding_twice_is_an_invalid_transition() {
        let f = fixture();
        f.ledger.register("u1", settings(1)).unwrap();
        let profile = miss_periods(&f, "u1", 1);
        f.gate.maybe_escalate(&profile).unwrap();
        let review = f.queue.list_pending().unwrap().remove(0);

        f.queue
            .decide(&review.id, Decision::Reject, "admin-1", None)
            .unwrap();
        let err = f
            .queue
            .decide(&review.id, Decision::Approve, "admin-1", None)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { entity: "review", .. }));
    }

    #[test]
    fn unknown_review_is_not_found() {
        let f = fixture();
        assert!(matches!(
            f.queue.decide("nope", Decision::Approve, "admin-1", None),
            Err(CoreError::NotFound { entity: "review", .. })
        ));
    }
}
