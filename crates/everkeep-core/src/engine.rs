//! Engine facade.
//!
//! Wires the ledger, escalation gate, review queue and dispatcher over
//! one store and clock, and exposes the operations the API/CLI layer
//! consumes. Authentication happens outside; the engine trusts the
//! user/admin identities it is handed but still enforces the admin
//! role on review decisions.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::alert::Alert;
use crate::audit::{AuditEntry, AuditFilter};
use crate::clock::Clock;
use crate::dispatch::{DispatchReport, NotificationAttempt, NotificationDispatcher};
use crate::error::{CoreError, Result};
use crate::ledger::{CheckinLedger, LivenessProfile, ProfileSettings};
use crate::nominee::NomineeDirectory;
use crate::notify::NotificationChannel;
use crate::review::{AdminReview, AdminRoster, Decision, EscalationGate, ReviewQueue, ReviewStatus};
use crate::scanner::LivenessScanner;
use crate::storage::{Database, EngineConfig};

/// Dashboard view of one user's liveness state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    pub profile: LivenessProfile,
    pub open_alert: Option<Alert>,
    pub pending_review: Option<AdminReview>,
}

/// Result of an admin decision; `dispatch` is set on approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub review: AdminReview,
    pub dispatch: Option<DispatchReport>,
}

/// The well-being monitoring and escalation engine.
pub struct WellbeingEngine {
    store: Arc<Database>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    ledger: CheckinLedger,
    gate: EscalationGate,
    reviews: ReviewQueue,
    dispatcher: NotificationDispatcher,
}

impl WellbeingEngine {
    pub fn new(
        store: Arc<Database>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
        directory: Arc<dyn NomineeDirectory>,
        channel: Arc<dyn NotificationChannel>,
        roster: Arc<dyn AdminRoster>,
    ) -> Self {
        let ledger = CheckinLedger::new(store.clone(), clock.clone(), config.write_retry_limit);
        let gate = EscalationGate::new(store.clone(), clock.clone());
        let reviews = ReviewQueue::new(store.clone(), clock.clone(), roster);
        let dispatcher = NotificationDispatcher::new(
            store.clone(),
            clock.clone(),
            directory,
            channel,
            config.delivery.clone(),
        );
        Self {
            store,
            clock,
            config,
            ledger,
            gate,
            reviews,
            dispatcher,
        }
    }

    // ── User-facing operations ───────────────────────────────────────

    /// Create the liveness profile at registration time.
    pub fn register_user(&self, user_id: &str, settings: ProfileSettings) -> Result<LivenessProfile> {
        self.ledger.register(user_id, settings)
    }

    /// Record a well-being confirmation.
    pub fn confirm_checkin(&self, user_id: &str) -> Result<LivenessProfile> {
        self.ledger.confirm(user_id)
    }

    pub fn update_settings(
        &self,
        user_id: &str,
        settings: ProfileSettings,
    ) -> Result<LivenessProfile> {
        self.ledger.update_settings(user_id, settings)
    }

    /// Current counter and alert status, for dashboards.
    pub fn get_profile(&self, user_id: &str) -> Result<Option<ProfileSnapshot>> {
        let Some(profile) = self.ledger.get(user_id)? else {
            return Ok(None);
        };
        Ok(Some(ProfileSnapshot {
            open_alert: self.store.get_open_alert(user_id)?,
            pending_review: self.store.get_pending_review(user_id)?,
            profile,
        }))
    }

    // ── Admin operations ─────────────────────────────────────────────

    pub fn list_pending_reviews(&self) -> Result<Vec<AdminReview>> {
        self.reviews.list_pending()
    }

    /// Decide a pending review. Approval triggers the notification
    /// fan-out before this call returns.
    pub async fn decide_review(
        &self,
        review_id: &str,
        decision: Decision,
        reviewer_id: &str,
        notes: Option<String>,
    ) -> Result<DecisionOutcome> {
        let review = self.reviews.decide(review_id, decision, reviewer_id, notes)?;
        let dispatch = match decision {
            Decision::Approve => Some(self.dispatcher.dispatch(&review).await?),
            Decision::Reject => None,
        };
        Ok(DecisionOutcome { review, dispatch })
    }

    /// Re-run the fan-out for an approved review, recovering a dispatch
    /// that aborted before every nominee reached a terminal state.
    /// Nominees already `sent` or `exhausted` are not contacted again.
    pub async fn redispatch_review(&self, review_id: &str) -> Result<DispatchReport> {
        let review = self.reviews.get(review_id)?;
        if review.status != ReviewStatus::Approved {
            return Err(CoreError::InvalidTransition {
                entity: "review",
                from: review.status.as_str().to_string(),
                to: "dispatched".to_string(),
            });
        }
        self.dispatcher.dispatch(&review).await
    }

    /// Deliveries that ran out of retries and need manual follow-up.
    pub fn follow_up_attempts(&self) -> Result<Vec<NotificationAttempt>> {
        self.store.list_exhausted_attempts()
    }

    pub fn attempts_for_review(&self, review_id: &str) -> Result<Vec<NotificationAttempt>> {
        self.store.list_attempts(review_id)
    }

    pub fn audit_trail(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        self.store.list_audit(filter)
    }

    // ── Wiring ───────────────────────────────────────────────────────

    /// Build the background scanner sharing this engine's state.
    pub fn scanner(&self) -> LivenessScanner {
        LivenessScanner::new(
            self.store.clone(),
            self.clock.clone(),
            self.ledger.clone(),
            self.gate.clone(),
            self.config.sweep.clone(),
        )
    }
}
