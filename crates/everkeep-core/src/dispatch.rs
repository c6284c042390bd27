//! Notification fan-out.
//!
//! An approved admin review fans out to every verified nominee of the
//! affected user. Attempts are independent: each nominee gets its own
//! retry loop with exponential backoff, and one failing contact never
//! blocks or rolls back the others. A nominee whose delivery keeps
//! failing past the attempt cap ends up `exhausted` -- audited and
//! surfaced for manual follow-up, never silently dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::audit::Actor;
use crate::clock::Clock;
use crate::error::Result;
use crate::nominee::{Nominee, NomineeDirectory};
use crate::notify::{NotificationChannel, NotificationMessage};
use crate::review::AdminReview;
use crate::storage::{Database, DeliveryConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Queued,
    Sent,
    Failed,
    Exhausted,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Queued => "queued",
            AttemptStatus::Sent => "sent",
            AttemptStatus::Failed => "failed",
            AttemptStatus::Exhausted => "exhausted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(AttemptStatus::Queued),
            "sent" => Some(AttemptStatus::Sent),
            "failed" => Some(AttemptStatus::Failed),
            "exhausted" => Some(AttemptStatus::Exhausted),
            _ => None,
        }
    }

    /// Terminal states end the retry loop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptStatus::Sent | AttemptStatus::Exhausted)
    }
}

/// Delivery record for one nominee of one approved review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationAttempt {
    pub id: String,
    pub review_id: String,
    pub nominee_id: String,
    pub attempt_count: u32,
    pub status: AttemptStatus,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationAttempt {
    fn queued(review_id: &str, nominee_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            review_id: review_id.to_string(),
            nominee_id: nominee_id.to_string(),
            attempt_count: 0,
            status: AttemptStatus::Queued,
            last_error: None,
            updated_at: now,
        }
    }
}

/// Outcome summary of one dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchReport {
    pub review_id: String,
    pub nominees: usize,
    pub sent: usize,
    pub exhausted: usize,
}

/// Fans out an approved review to verified nominees.
#[derive(Clone)]
pub struct NotificationDispatcher {
    store: Arc<Database>,
    clock: Arc<dyn Clock>,
    directory: Arc<dyn NomineeDirectory>,
    channel: Arc<dyn NotificationChannel>,
    config: DeliveryConfig,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<Database>,
        clock: Arc<dyn Clock>,
        directory: Arc<dyn NomineeDirectory>,
        channel: Arc<dyn NotificationChannel>,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            store,
            clock,
            directory,
            channel,
            config,
        }
    }

    /// Fan a review out to every verified nominee and drive all attempts
    /// to a terminal state.
    ///
    /// Zero verified nominees is a data-completeness problem elsewhere,
    /// not an engine fault: the dispatch is a logged no-op.
    ///
    /// Safe to call again on the same review: attempt rows for every
    /// nominee exist before any delivery starts, and nominees already
    /// `sent` or `exhausted` from an earlier call are not contacted
    /// again. An aborted fan-out is resumed, not duplicated.
    pub async fn dispatch(&self, review: &AdminReview) -> Result<DispatchReport> {
        let nominees = self.list_nominees_with_retry(&review.user_id).await?;
        if nominees.is_empty() {
            warn!(
                review_id = %review.id,
                user_id = %review.user_id,
                "approved review has no verified nominees; nothing to dispatch"
            );
            self.store.append_audit(
                "review",
                &review.id,
                "approved",
                "dispatched_empty",
                &Actor::System,
                self.clock.now(),
            )?;
            return Ok(DispatchReport {
                review_id: review.id.clone(),
                nominees: 0,
                sent: 0,
                exhausted: 0,
            });
        }

        let message = Arc::new(NotificationMessage::legacy_notice(&review.user_id));
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel.max(1)));

        // Every attempt row is persisted before any task is spawned, so
        // an insert failure aborts with nothing in flight.
        let mut existing: HashMap<String, NotificationAttempt> = self
            .store
            .list_attempts(&review.id)?
            .into_iter()
            .map(|a| (a.nominee_id.clone(), a))
            .collect();

        let mut sent = 0;
        let mut exhausted = 0;
        let mut pending = Vec::with_capacity(nominees.len());
        for nominee in nominees.iter().cloned() {
            match existing.remove(&nominee.id) {
                Some(a) if a.status == AttemptStatus::Sent => sent += 1,
                Some(a) if a.status == AttemptStatus::Exhausted => exhausted += 1,
                Some(a) => pending.push((a, nominee)),
                None => {
                    let attempt =
                        NotificationAttempt::queued(&review.id, &nominee.id, self.clock.now());
                    self.store.insert_attempt(&attempt)?;
                    pending.push((attempt, nominee));
                }
            }
        }

        let mut handles = Vec::with_capacity(pending.len());
        for (attempt, nominee) in pending {
            let dispatcher = self.clone();
            let message = Arc::clone(&message);
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                // Closed only if the dispatcher is dropped mid-flight.
                let _permit = semaphore.acquire().await.ok()?;
                Some(dispatcher.deliver(attempt, nominee, &message).await)
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(Some(AttemptStatus::Sent)) => sent += 1,
                Ok(Some(AttemptStatus::Exhausted)) => exhausted += 1,
                Ok(_) => {}
                Err(e) => error!(review_id = %review.id, "delivery task panicked: {e}"),
            }
        }

        self.store.append_audit(
            "review",
            &review.id,
            "approved",
            "dispatched",
            &Actor::System,
            self.clock.now(),
        )?;
        info!(
            review_id = %review.id,
            nominees = nominees.len(),
            sent,
            exhausted,
            "dispatch complete"
        );
        Ok(DispatchReport {
            review_id: review.id.clone(),
            nominees: nominees.len(),
            sent,
            exhausted,
        })
    }

    /// Directory lookups are transient-retryable, like deliveries. The
    /// decision that triggered the dispatch is already committed, so a
    /// flaky contact store should not sink the fan-out.
    async fn list_nominees_with_retry(&self, user_id: &str) -> Result<Vec<Nominee>> {
        let mut attempt_count = 0;
        loop {
            attempt_count += 1;
            match self.directory.list_verified(user_id) {
                Ok(nominees) => return Ok(nominees),
                Err(e) if attempt_count >= self.config.max_attempts => {
                    warn!(
                        user_id = %user_id,
                        attempts = attempt_count,
                        "nominee lookup failed, giving up: {e}"
                    );
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        user_id = %user_id,
                        attempt = attempt_count,
                        "nominee lookup failed, will retry: {e}"
                    );
                    tokio::time::sleep(self.backoff_delay(attempt_count)).await;
                }
            }
        }
    }

    /// Retry loop for a single nominee. Always ends terminal.
    async fn deliver(
        &self,
        mut attempt: NotificationAttempt,
        nominee: Nominee,
        message: &NotificationMessage,
    ) -> AttemptStatus {
        loop {
            attempt.attempt_count += 1;
            match self.channel.send(&nominee, message) {
                Ok(()) => {
                    let from = attempt.status;
                    attempt.status = AttemptStatus::Sent;
                    attempt.last_error = None;
                    self.record(&attempt);
                    self.audit_terminal(&attempt, from);
                    return AttemptStatus::Sent;
                }
                Err(e) => {
                    attempt.last_error = Some(e.to_string());
                    if attempt.attempt_count >= self.config.max_attempts {
                        let from = attempt.status;
                        attempt.status = AttemptStatus::Exhausted;
                        self.record(&attempt);
                        self.audit_terminal(&attempt, from);
                        warn!(
                            attempt_id = %attempt.id,
                            nominee_id = %nominee.id,
                            attempts = attempt.attempt_count,
                            "delivery exhausted; flagged for manual follow-up"
                        );
                        return AttemptStatus::Exhausted;
                    }
                    attempt.status = AttemptStatus::Failed;
                    self.record(&attempt);
                    warn!(
                        attempt_id = %attempt.id,
                        nominee_id = %nominee.id,
                        attempt = attempt.attempt_count,
                        "delivery failed, will retry: {e}"
                    );
                    tokio::time::sleep(self.backoff_delay(attempt.attempt_count)).await;
                }
            }
        }
    }

    fn record(&self, attempt: &NotificationAttempt) {
        let mut attempt = attempt.clone();
        attempt.updated_at = self.clock.now();
        if let Err(e) = self.store.update_attempt(&attempt) {
            error!(attempt_id = %attempt.id, "failed to persist attempt state: {e}");
        }
    }

    fn audit_terminal(&self, attempt: &NotificationAttempt, from: AttemptStatus) {
        if let Err(e) = self.store.append_audit(
            "attempt",
            &attempt.id,
            from.as_str(),
            attempt.status.as_str(),
            &Actor::System,
            self.clock.now(),
        ) {
            error!(attempt_id = %attempt.id, "failed to audit attempt: {e}");
        }
    }

    /// Exponential backoff with jitter, capped.
    fn backoff_delay(&self, attempt_count: u32) -> StdDuration {
        let exp = attempt_count.saturating_sub(1).min(16);
        let base = self
            .config
            .backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.config.backoff_cap_ms);
        let jitter = if self.config.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.config.jitter_ms)
        } else {
            0
        };
        StdDuration::from_millis(base + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher_config(base_ms: u64) -> DeliveryConfig {
        DeliveryConfig {
            max_attempts: 3,
            backoff_base_ms: base_ms,
            backoff_cap_ms: 8 * base_ms,
            jitter_ms: 0,
            max_parallel: 4,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let store = Arc::new(Database::open_memory().unwrap());
        let clock: Arc<dyn Clock> = Arc::new(crate::clock::SystemClock);
        struct NoNominees;
        impl NomineeDirectory for NoNominees {
            fn list_verified(&self, _: &str) -> Result<Vec<Nominee>> {
                Ok(Vec::new())
            }
        }
        struct NoChannel;
        impl NotificationChannel for NoChannel {
            fn send(
                &self,
                _: &Nominee,
                _: &NotificationMessage,
            ) -> std::result::Result<(), crate::notify::DeliveryError> {
                Ok(())
            }
        }
        let d = NotificationDispatcher::new(
            store,
            clock,
            Arc::new(NoNominees),
            Arc::new(NoChannel),
            dispatcher_config(100),
        );
        assert_eq!(d.backoff_delay(1), StdDuration::from_millis(100));
        assert_eq!(d.backoff_delay(2), StdDuration::from_millis(200));
        assert_eq!(d.backoff_delay(4), StdDuration::from_millis(800));
        // Capped at 8x base.
        assert_eq!(d.backoff_delay(10), StdDuration::from_millis(800));
    }

    #[test]
    fn attempt_status_terminality() {
        assert!(AttemptStatus::Sent.is_terminal());
        assert!(AttemptStatus::Exhausted.is_terminal());
        assert!(!AttemptStatus::Queued.is_terminal());
        assert!(!AttemptStatus::Failed.is_terminal());
    }

    #[test]
    fn attempt_status_roundtrip() {
        for s in [
            AttemptStatus::Queued,
            AttemptStatus::Sent,
            AttemptStatus::Failed,
            AttemptStatus::Exhausted,
        ] {
            assert_eq!(AttemptStatus::parse(s.as_str()), Some(s));
        }
    }
}
