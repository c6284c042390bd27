//! Check-in ledger.
//!
//! Per-user record of the configured cadence, last confirmed check-in,
//! missed-period counter and escalation threshold. Every other engine
//! component reads and writes liveness state through this module.
//!
//! Profile writes race between the user's `confirm` and the background
//! sweep, so all mutations go through a version-stamped read-modify-write
//! loop: whichever writer loses the compare-and-swap re-reads and
//! retries, bounded by `write_retry_limit`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::{Alert, AlertStatus};
use crate::audit::Actor;
use crate::clock::Clock;
use crate::error::{CoreError, Result, ValidationError};
use crate::storage::Database;

/// Check-in interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    Daily,
    Weekly,
    Custom { days: u32 },
}

impl Cadence {
    /// Length of one cadence period.
    pub fn period(&self) -> Duration {
        match self {
            Cadence::Daily => Duration::days(1),
            Cadence::Weekly => Duration::days(7),
            Cadence::Custom { days } => Duration::days(i64::from(*days)),
        }
    }

    /// Storage encoding: `daily`, `weekly`, `custom:<days>`.
    pub fn as_db_string(&self) -> String {
        match self {
            Cadence::Daily => "daily".to_string(),
            Cadence::Weekly => "weekly".to_string(),
            Cadence::Custom { days } => format!("custom:{days}"),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(Cadence::Daily),
            "weekly" => Some(Cadence::Weekly),
            _ => {
                let days = s.strip_prefix("custom:")?.parse::<u32>().ok()?;
                Some(Cadence::Custom { days })
            }
        }
    }
}

/// Per-user liveness profile, one row per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessProfile {
    pub user_id: String,
    pub cadence: Cadence,
    /// Set on every confirmation, only together with a counter reset.
    pub last_checkin: DateTime<Utc>,
    /// Number of fully missed cadence periods since the last reset.
    pub missed_count: u32,
    /// Missed-period count at which escalation fires. Always > 0.
    pub threshold: u32,
    pub escalation_enabled: bool,
    /// Preferred reminder time ("HH:MM"); stored for the UI layer,
    /// never acted on by the engine.
    pub alert_time: Option<String>,
    /// Optimistic-concurrency stamp; every write increments it.
    pub version: i64,
}

impl LivenessProfile {
    /// True once a full cadence period has elapsed without confirmation.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        now - self.last_checkin > self.cadence.period()
    }

    /// Number of cadence periods fully elapsed since the last check-in.
    pub fn periods_elapsed(&self, now: DateTime<Utc>) -> u32 {
        let period_secs = self.cadence.period().num_seconds();
        if period_secs <= 0 {
            return 0;
        }
        let elapsed = (now - self.last_checkin).num_seconds();
        if elapsed <= 0 {
            0
        } else {
            u32::try_from(elapsed / period_secs).unwrap_or(u32::MAX)
        }
    }
}

/// User-facing monitoring settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSettings {
    pub cadence: Cadence,
    pub threshold: u32,
    pub escalation_enabled: bool,
    pub alert_time: Option<String>,
}

impl Default for ProfileSettings {
    fn default() -> Self {
        Self {
            cadence: Cadence::Daily,
            threshold: 15,
            escalation_enabled: true,
            alert_time: None,
        }
    }
}

impl ProfileSettings {
    /// Boundary validation; rejected settings are never partially applied.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.threshold == 0 {
            return Err(ValidationError::InvalidThreshold(0));
        }
        if let Cadence::Custom { days } = self.cadence {
            if days == 0 {
                return Err(ValidationError::InvalidCadence(
                    "custom cadence must be at least one day".to_string(),
                ));
            }
        }
        if let Some(t) = &self.alert_time {
            if !is_valid_alert_time(t) {
                return Err(ValidationError::InvalidValue {
                    field: "alert_time".to_string(),
                    message: format!("'{t}' is not a valid HH:MM time"),
                });
            }
        }
        Ok(())
    }
}

fn is_valid_alert_time(s: &str) -> bool {
    let Some((h, m)) = s.split_once(':') else {
        return false;
    };
    matches!(h.parse::<u32>(), Ok(h) if h < 24) && matches!(m.parse::<u32>(), Ok(m) if m < 60)
}

/// The check-in ledger.
///
/// Cheap to clone; shares the store and clock.
#[derive(Clone)]
pub struct CheckinLedger {
    store: Arc<Database>,
    clock: Arc<dyn Clock>,
    write_retry_limit: u32,
}

impl CheckinLedger {
    pub fn new(store: Arc<Database>, clock: Arc<dyn Clock>, write_retry_limit: u32) -> Self {
        Self {
            store,
            clock,
            write_retry_limit: write_retry_limit.max(1),
        }
    }

    /// Create the liveness profile for a newly registered user.
    ///
    /// Registration counts as the first check-in. Idempotent: an existing
    /// profile is returned unchanged.
    pub fn register(&self, user_id: &str, settings: ProfileSettings) -> Result<LivenessProfile> {
        settings.validate()?;
        if let Some(existing) = self.store.get_profile(user_id)? {
            return Ok(existing);
        }
        let profile = LivenessProfile {
            user_id: user_id.to_string(),
            cadence: settings.cadence,
            last_checkin: self.clock.now(),
            missed_count: 0,
            threshold: settings.threshold,
            escalation_enabled: settings.escalation_enabled,
            alert_time: settings.alert_time,
            version: 0,
        };
        self.store.insert_profile(&profile)?;
        self.store.append_audit(
            "profile",
            user_id,
            "none",
            "registered",
            &Actor::User(user_id.to_string()),
            profile.last_checkin,
        )?;
        Ok(profile)
    }

    pub fn get(&self, user_id: &str) -> Result<Option<LivenessProfile>> {
        self.store.get_profile(user_id)
    }

    /// Record a well-being confirmation.
    ///
    /// Resets the missed counter and the last check-in together, bumps the
    /// version, and closes any open alert as `responded`. Idempotent.
    pub fn confirm(&self, user_id: &str) -> Result<LivenessProfile> {
        let mut attempts = 0;
        let profile = loop {
            attempts += 1;
            let mut profile = self.require(user_id)?;
            let had_missed = profile.missed_count;
            let now = self.clock.now();
            profile.missed_count = 0;
            profile.last_checkin = now;
            if self.store.update_profile_cas(&profile)? {
                profile.version += 1;
                if had_missed > 0 {
                    self.store.append_audit(
                        "profile",
                        user_id,
                        &format!("missed={had_missed}"),
                        "missed=0",
                        &Actor::User(user_id.to_string()),
                        now,
                    )?;
                }
                break profile;
            }
            if attempts >= self.write_retry_limit {
                return Err(CoreError::Conflict {
                    user_id: user_id.to_string(),
                    attempts,
                });
            }
        };

        // The confirmation answers whatever alert was outstanding.
        if let Some(alert) = self.store.get_open_alert(user_id)? {
            let from = alert.status;
            self.store
                .transition_alert(&alert.id, AlertStatus::Responded, Some(self.clock.now()))?;
            self.store.append_audit(
                "alert",
                &alert.id,
                from.as_str(),
                AlertStatus::Responded.as_str(),
                &Actor::User(user_id.to_string()),
                self.clock.now(),
            )?;
        }
        Ok(profile)
    }

    /// Replace the user's monitoring settings.
    pub fn update_settings(
        &self,
        user_id: &str,
        settings: ProfileSettings,
    ) -> Result<LivenessProfile> {
        settings.validate()?;
        let mut attempts = 0;
        loop {
            attempts += 1;
            let mut profile = self.require(user_id)?;
            profile.cadence = settings.cadence;
            profile.threshold = settings.threshold;
            profile.escalation_enabled = settings.escalation_enabled;
            profile.alert_time = settings.alert_time.clone();
            if self.store.update_profile_cas(&profile)? {
                profile.version += 1;
                return Ok(profile);
            }
            if attempts >= self.write_retry_limit {
                return Err(CoreError::Conflict {
                    user_id: user_id.to_string(),
                    attempts,
                });
            }
        }
    }

    /// One sweep-driven advance for an overdue profile.
    ///
    /// Increments the missed counter by at most one, and only while the
    /// counter is behind the number of fully elapsed periods -- so the
    /// counter stays exact no matter how often sweeps run. Ensures a
    /// `pending` alert is open. Returns the advanced profile, or `None`
    /// when there was nothing to count (not overdue, or a concurrent
    /// confirmation won the race).
    pub fn advance(&self, user_id: &str) -> Result<Option<LivenessProfile>> {
        let mut attempts = 0;
        let profile = loop {
            attempts += 1;
            let mut profile = self.require(user_id)?;
            let now = self.clock.now();
            if !profile.is_overdue(now) || profile.missed_count >= profile.periods_elapsed(now) {
                return Ok(None);
            }
            let from = profile.missed_count;
            profile.missed_count += 1;
            if self.store.update_profile_cas(&profile)? {
                profile.version += 1;
                self.store.append_audit(
                    "profile",
                    user_id,
                    &format!("missed={from}"),
                    &format!("missed={}", profile.missed_count),
                    &Actor::System,
                    now,
                )?;
                break profile;
            }
            if attempts >= self.write_retry_limit {
                return Err(CoreError::Conflict {
                    user_id: user_id.to_string(),
                    attempts,
                });
            }
        };

        if self.store.get_open_alert(user_id)?.is_none() {
            let alert = Alert::open(user_id, self.clock.now());
            self.store.insert_alert(&alert)?;
            self.store.append_audit(
                "alert",
                &alert.id,
                "none",
                AlertStatus::Pending.as_str(),
                &Actor::System,
                alert.opened_at,
            )?;
        }
        Ok(Some(profile))
    }

    fn require(&self, user_id: &str) -> Result<LivenessProfile> {
        self.store.get_profile(user_id)?.ok_or(CoreError::NotFound {
            entity: "profile",
            id: user_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn fixed_start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn ledger_with_clock() -> (CheckinLedger, Arc<ManualClock>, Arc<Database>) {
        let store = Arc::new(Database::open_memory().unwrap());
        let clock = Arc::new(ManualClock::new(fixed_start()));
        let ledger = CheckinLedger::new(store.clone(), clock.clone(), 5);
        (ledger, clock, store)
    }

    #[test]
    fn cadence_periods() {
        assert_eq!(Cadence::Daily.period(), Duration::days(1));
        assert_eq!(Cadence::Weekly.period(), Duration::days(7));
        assert_eq!(Cadence::Custom { days: 3 }.period(), Duration::days(3));
    }

    #[test]
    fn cadence_db_roundtrip() {
        for c in [Cadence::Daily, Cadence::Weekly, Cadence::Custom { days: 10 }] {
            assert_eq!(Cadence::parse(&c.as_db_string()), Some(c));
        }
        assert_eq!(Cadence::parse("custom:zero"), None);
        assert_eq!(Cadence::parse("hourly"), None);
    }

    #[test]
    fn overdue_requires_a_full_period() {
        let (ledger, clock, _) = ledger_with_clock();
        let profile = ledger.register("u1", ProfileSettings::default()).unwrap();

        assert!(!profile.is_overdue(clock.now()));
        // Exactly one period is not yet overdue; a second past it is.
        assert!(!profile.is_overdue(fixed_start() + Duration::days(1)));
        assert!(profile.is_overdue(fixed_start() + Duration::days(1) + Duration::seconds(1)));
    }

    #[test]
    fn periods_elapsed_floors() {
        let (ledger, _, _) = ledger_with_clock();
        let profile = ledger.register("u1", ProfileSettings::default()).unwrap();
        assert_eq!(profile.periods_elapsed(fixed_start() + Duration::hours(30)), 1);
        assert_eq!(profile.periods_elapsed(fixed_start() + Duration::days(4)), 4);
        assert_eq!(profile.periods_elapsed(fixed_start() - Duration::hours(1)), 0);
    }

    #[test]
    fn register_is_idempotent() {
        let (ledger, _, _) = ledger_with_clock();
        let first = ledger.register("u1", ProfileSettings::default()).unwrap();
        let second = ledger
            .register(
                "u1",
                ProfileSettings {
                    threshold: 3,
                    ..ProfileSettings::default()
                },
            )
            .unwrap();
        assert_eq!(second.threshold, first.threshold);
        assert_eq!(second.version, first.version);
    }

    #[test]
    fn settings_validation_rejected_at_boundary() {
        let (ledger, _, _) = ledger_with_clock();
        ledger.register("u1", ProfileSettings::default()).unwrap();

        let bad_threshold = ProfileSettings {
            threshold: 0,
            ..ProfileSettings::default()
        };
        assert!(matches!(
            ledger.update_settings("u1", bad_threshold),
            Err(CoreError::Validation(ValidationError::InvalidThreshold(0)))
        ));

        let bad_cadence = ProfileSettings {
            cadence: Cadence::Custom { days: 0 },
            ..ProfileSettings::default()
        };
        assert!(ledger.update_settings("u1", bad_cadence).is_err());

        let bad_time = ProfileSettings {
            alert_time: Some("25:00".to_string()),
            ..ProfileSettings::default()
        };
        assert!(ledger.update_settings("u1", bad_time).is_err());

        // Nothing was applied.
        let profile = ledger.get("u1").unwrap().unwrap();
        assert_eq!(profile.threshold, 15);
    }

    #[test]
    fn confirm_resets_counter_and_closes_alert() {
        let (ledger, clock, store) = ledger_with_clock();
        ledger.register("u1", ProfileSettings::default()).unwrap();

        clock.advance(Duration::days(2));
        ledger.advance("u1").unwrap().unwrap();
        assert!(store.get_open_alert("u1").unwrap().is_some());

        let profile = ledger.confirm("u1").unwrap();
        assert_eq!(profile.missed_count, 0);
        assert_eq!(profile.last_checkin, clock.now());
        assert!(store.get_open_alert("u1").unwrap().is_none());
    }

    #[test]
    fn confirm_is_idempotent() {
        let (ledger, clock, store) = ledger_with_clock();
        ledger.register("u1", ProfileSettings::default()).unwrap();
        clock.advance(Duration::days(2));
        ledger.advance("u1").unwrap();

        let first = ledger.confirm("u1").unwrap();
        let second = ledger.confirm("u1").unwrap();
        assert_eq!(first.missed_count, 0);
        assert_eq!(second.missed_count, 0);
        // Only one alert row exists and it is responded.
        let alerts = store.list_alerts("u1").unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].status, AlertStatus::Responded);
    }

    #[test]
    fn advance_increments_once_per_sweep() {
        let (ledger, clock, _) = ledger_with_clock();
        ledger.register("u1", ProfileSettings::default()).unwrap();

        // Three days without confirmation, but five sweeps.
        clock.advance(Duration::days(3) + Duration::hours(1));
        for _ in 0..5 {
            ledger.advance("u1").unwrap();
        }
        let profile = ledger.get("u1").unwrap().unwrap();
        assert_eq!(profile.missed_count, 3);
    }

    #[test]
    fn advance_noop_when_not_overdue() {
        let (ledger, clock, store) = ledger_with_clock();
        ledger.register("u1", ProfileSettings::default()).unwrap();
        clock.advance(Duration::hours(6));
        assert!(ledger.advance("u1").unwrap().is_none());
        assert!(store.get_open_alert("u1").unwrap().is_none());
    }

    #[test]
    fn version_increases_on_every_write() {
        let (ledger, clock, _) = ledger_with_clock();
        let p0 = ledger.register("u1", ProfileSettings::default()).unwrap();
        clock.advance(Duration::days(2));
        let p1 = ledger.advance("u1").unwrap().unwrap();
        let p2 = ledger.confirm("u1").unwrap();
        assert!(p1.version > p0.version);
        assert!(p2.version > p1.version);
    }

    #[test]
    fn missing_profile_is_not_found() {
        let (ledger, _, _) = ledger_with_clock();
        assert!(matches!(
            ledger.confirm("ghost"),
            Err(CoreError::NotFound { entity: "profile", .. })
        ));
    }
}
