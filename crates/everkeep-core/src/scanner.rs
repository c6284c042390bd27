//! Liveness scanner.
//!
//! A recurring sweep over all profiles: overdue users get their missed
//! counter advanced through the ledger's optimistic write path, and each
//! successful advance is offered to the escalation gate. One user's
//! failure never aborts the sweep for the rest; failed or timed-out
//! advances are logged and picked up again next cycle.
//!
//! `run_sweep` is the testable core -- it reads time from the injected
//! clock and never sleeps. `run` is the production driver: a single
//! recurring tokio task. Deployments with multiple replicas must put an
//! external leader lock around it; concurrent sweeps would
//! double-count missed periods.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{timeout, Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::ledger::CheckinLedger;
use crate::review::EscalationGate;
use crate::storage::{Database, SweepConfig};

/// Counters from one sweep cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepReport {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Profiles examined.
    pub scanned: usize,
    /// Profiles whose missed counter advanced.
    pub advanced: usize,
    /// Advances that crossed the escalation threshold.
    pub escalated: usize,
    /// Malformed profiles excluded from the sweep.
    pub skipped: usize,
    /// Advances that errored or timed out; retried next cycle.
    pub failed: usize,
}

/// The recurring liveness sweep.
#[derive(Clone)]
pub struct LivenessScanner {
    store: Arc<Database>,
    clock: Arc<dyn Clock>,
    ledger: CheckinLedger,
    gate: EscalationGate,
    config: SweepConfig,
}

impl LivenessScanner {
    pub fn new(
        store: Arc<Database>,
        clock: Arc<dyn Clock>,
        ledger: CheckinLedger,
        gate: EscalationGate,
        config: SweepConfig,
    ) -> Self {
        Self {
            store,
            clock,
            ledger,
            gate,
            config,
        }
    }

    /// One full sweep over all profiles.
    pub async fn run_sweep(&self) -> SweepReport {
        let mut report = SweepReport {
            started_at: Some(self.clock.now()),
            ..SweepReport::default()
        };
        let profiles = match self.store.list_profiles() {
            Ok(profiles) => profiles,
            Err(e) => {
                warn!("sweep aborted: cannot list profiles: {e}");
                report.finished_at = Some(self.clock.now());
                return report;
            }
        };

        let deadline = Instant::now() + StdDuration::from_secs(self.config.deadline_secs.max(1));
        let per_user = StdDuration::from_millis(self.config.per_user_timeout_ms.max(1));

        for profile in profiles {
            if Instant::now() >= deadline {
                warn!(
                    scanned = report.scanned,
                    "sweep deadline reached; remaining profiles wait for the next cycle"
                );
                break;
            }
            report.scanned += 1;

            // A threshold of zero cannot pass settings validation; a stored
            // zero means the row is corrupt. Exclude it rather than
            // escalating everyone instantly.
            if profile.threshold == 0 {
                warn!(user_id = %profile.user_id, "malformed profile excluded from sweep");
                report.skipped += 1;
                continue;
            }
            if !profile.is_overdue(self.clock.now()) {
                continue;
            }

            let ledger = self.ledger.clone();
            let user_id = profile.user_id.clone();
            let advance = timeout(
                per_user,
                tokio::task::spawn_blocking(move || ledger.advance(&user_id)),
            )
            .await;
            match advance {
                Err(_) => {
                    warn!(user_id = %profile.user_id, "advance timed out; retrying next sweep");
                    report.failed += 1;
                }
                Ok(Err(join_err)) => {
                    warn!(user_id = %profile.user_id, "advance task failed: {join_err}");
                    report.failed += 1;
                }
                Ok(Ok(Err(e))) => {
                    warn!(user_id = %profile.user_id, "advance failed: {e}");
                    report.failed += 1;
                }
                Ok(Ok(Ok(None))) => {}
                Ok(Ok(Ok(Some(advanced)))) => {
                    report.advanced += 1;
                    match self.gate.maybe_escalate(&advanced) {
                        Ok(true) => report.escalated += 1,
                        Ok(false) => {}
                        Err(e) => {
                            warn!(user_id = %advanced.user_id, "escalation check failed: {e}");
                            report.failed += 1;
                        }
                    }
                }
            }
        }
        report.finished_at = Some(self.clock.now());
        report
    }

    /// Recurring sweep driver. Exits when `shutdown` flips to true or the
    /// sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(StdDuration::from_secs(
            self.config.interval_secs.max(1),
        ));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = self.config.interval_secs, "liveness scanner started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run_sweep().await;
                    info!(
                        scanned = report.scanned,
                        advanced = report.advanced,
                        escalated = report.escalated,
                        skipped = report.skipped,
                        failed = report.failed,
                        "sweep finished"
                    );
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("liveness scanner stopping");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ledger::{Cadence, ProfileSettings};
    use crate::review::{AdminRoster, ReviewQueue};
    use chrono::{Duration, TimeZone};

    struct NoAdmins;
    impl AdminRoster for NoAdmins {
        fn is_admin(&self, _: &str) -> bool {
            false
        }
    }

    struct Fixture {
        scanner: LivenessScanner,
        ledger: CheckinLedger,
        queue: ReviewQueue,
        clock: Arc<ManualClock>,
        store: Arc<Database>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(Database::open_memory().unwrap());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        ));
        let ledger = CheckinLedger::new(store.clone(), clock.clone(), 5);
        let gate = EscalationGate::new(store.clone(), clock.clone());
        let scanner = LivenessScanner::new(
            store.clone(),
            clock.clone(),
            ledger.clone(),
            gate,
            SweepConfig::default(),
        );
        let queue = ReviewQueue::new(store.clone(), clock.clone(), Arc::new(NoAdmins));
        Fixture {
            scanner,
            ledger,
            queue,
            clock,
            store,
        }
    }

    #[tokio::test]
    async fn sweep_skips_fresh_profiles() {
        let f = fixture();
        f.ledger.register("u1", ProfileSettings::default()).unwrap();
        let report = f.scanner.run_sweep().await;
        assert_eq!(report.scanned, 1);
        assert_eq!(report.advanced, 0);
    }

    #[tokio::test]
    async fn sweep_advances_only_one_unit_per_cycle() {
        let f = fixture();
        f.ledger.register("u1", ProfileSettings::default()).unwrap();
        f.clock.advance(Duration::days(3) + Duration::hours(1));

        // Many sweeps in quick succession still count three missed days.
        for _ in 0..6 {
            f.scanner.run_sweep().await;
        }
        let profile = f.ledger.get("u1").unwrap().unwrap();
        assert_eq!(profile.missed_count, 3);
    }

    #[tokio::test]
    async fn sweep_isolates_users() {
        let f = fixture();
        f.ledger.register("ok", ProfileSettings::default()).unwrap();
        f.ledger
            .register(
                "slow-cadence",
                ProfileSettings {
                    cadence: Cadence::Weekly,
                    ..ProfileSettings::default()
                },
            )
            .unwrap();
        f.clock.advance(Duration::days(2));

        let report = f.scanner.run_sweep().await;
        assert_eq!(report.scanned, 2);
        assert_eq!(report.advanced, 1);
        assert_eq!(f.ledger.get("ok").unwrap().unwrap().missed_count, 1);
        assert_eq!(
            f.ledger.get("slow-cadence").unwrap().unwrap().missed_count,
            0
        );
    }

    #[tokio::test]
    async fn sweep_excludes_malformed_profiles() {
        let f = fixture();
        f.ledger.register("good", ProfileSettings::default()).unwrap();
        // Corrupt a stored threshold behind the validation boundary.
        f.ledger.register("bad", ProfileSettings::default()).unwrap();
        f.store.force_threshold_for_tests("bad", 0).unwrap();
        f.clock.advance(Duration::days(2));

        let report = f.scanner.run_sweep().await;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.advanced, 1);
        assert_eq!(f.ledger.get("good").unwrap().unwrap().missed_count, 1);
    }

    #[tokio::test]
    async fn sweep_escalates_at_threshold() {
        let f = fixture();
        f.ledger
            .register(
                "u1",
                ProfileSettings {
                    threshold: 2,
                    ..ProfileSettings::default()
                },
            )
            .unwrap();

        f.clock.advance(Duration::days(1) + Duration::hours(1));
        let report = f.scanner.run_sweep().await;
        assert_eq!(report.escalated, 0);

        f.clock.advance(Duration::days(1));
        let report = f.scanner.run_sweep().await;
        assert_eq!(report.escalated, 1);
        assert_eq!(f.queue.list_pending().unwrap().len(), 1);

        // Further sweeps stay idempotent.
        f.clock.advance(Duration::days(1));
        f.scanner.run_sweep().await;
        assert_eq!(f.queue.list_pending().unwrap().len(), 1);
    }
}
