//! SQLite-backed engine state.
//!
//! One database owns all five tables of the engine: liveness profiles,
//! alerts, admin reviews, notification attempts and the append-only
//! audit log. Profile updates go through a version-stamped
//! compare-and-swap so a user's confirmation and a concurrent sweep
//! can never silently overwrite each other.
//!
//! The connection sits behind a mutex so one handle can be shared
//! between the background sweep task and request-path calls.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::alert::{Alert, AlertStatus};
use crate::audit::{Actor, AuditEntry, AuditFilter};
use crate::dispatch::{AttemptStatus, NotificationAttempt};
use crate::error::{CoreError, DatabaseError, Result};
use crate::ledger::{Cadence, LivenessProfile};
use crate::review::{AdminReview, ReviewStatus};

use super::data_dir;

/// SQLite database for engine state.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the database at `~/.config/everkeep/everkeep.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self> {
        let path = data_dir()
            .map_err(|e| CoreError::Custom(e.to_string()))?
            .join("everkeep.db");
        Self::open_at(&path)
    }

    /// Open the database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: PathBuf::from(path),
            source,
        })?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (for tests and dry runs).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(DatabaseError::from)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn migrate(&self) -> Result<()> {
        self.lock()
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS profiles (
                    user_id            TEXT PRIMARY KEY,
                    cadence            TEXT NOT NULL,
                    last_checkin       TEXT NOT NULL,
                    missed_count       INTEGER NOT NULL DEFAULT 0,
                    threshold          INTEGER NOT NULL,
                    escalation_enabled INTEGER NOT NULL DEFAULT 1,
                    alert_time         TEXT,
                    version            INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS alerts (
                    id        TEXT PRIMARY KEY,
                    user_id   TEXT NOT NULL,
                    status    TEXT NOT NULL,
                    opened_at TEXT NOT NULL,
                    closed_at TEXT
                );

                -- Singleton invariant: at most one open alert per user.
                CREATE UNIQUE INDEX IF NOT EXISTS idx_alerts_open
                    ON alerts(user_id) WHERE closed_at IS NULL;

                CREATE TABLE IF NOT EXISTS admin_reviews (
                    id          TEXT PRIMARY KEY,
                    user_id     TEXT NOT NULL,
                    status      TEXT NOT NULL,
                    reviewer_id TEXT,
                    notes       TEXT,
                    created_at  TEXT NOT NULL,
                    decided_at  TEXT
                );

                -- Singleton invariant: at most one pending review per user.
                CREATE UNIQUE INDEX IF NOT EXISTS idx_reviews_pending
                    ON admin_reviews(user_id) WHERE status = 'pending';

                CREATE TABLE IF NOT EXISTS notification_attempts (
                    id            TEXT PRIMARY KEY,
                    review_id     TEXT NOT NULL,
                    nominee_id    TEXT NOT NULL,
                    attempt_count INTEGER NOT NULL DEFAULT 0,
                    status        TEXT NOT NULL,
                    last_error    TEXT,
                    updated_at    TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_attempts_review
                    ON notification_attempts(review_id);
                CREATE INDEX IF NOT EXISTS idx_attempts_status
                    ON notification_attempts(status);

                CREATE TABLE IF NOT EXISTS audit_log (
                    id          TEXT PRIMARY KEY,
                    entity_type TEXT NOT NULL,
                    entity_id   TEXT NOT NULL,
                    from_state  TEXT NOT NULL,
                    to_state    TEXT NOT NULL,
                    actor       TEXT NOT NULL,
                    at          TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_audit_entity
                    ON audit_log(entity_type, entity_id);",
            )
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(())
    }

    // ── Profiles ─────────────────────────────────────────────────────

    pub fn insert_profile(&self, profile: &LivenessProfile) -> Result<()> {
        self.lock().execute(
            "INSERT INTO profiles
                (user_id, cadence, last_checkin, missed_count, threshold,
                 escalation_enabled, alert_time, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                profile.user_id,
                profile.cadence.as_db_string(),
                ts(profile.last_checkin),
                profile.missed_count,
                profile.threshold,
                profile.escalation_enabled,
                profile.alert_time,
                profile.version,
            ],
        )?;
        Ok(())
    }

    pub fn get_profile(&self, user_id: &str) -> Result<Option<LivenessProfile>> {
        let row = self
            .lock()
            .query_row(
                "SELECT user_id, cadence, last_checkin, missed_count, threshold,
                        escalation_enabled, alert_time, version
                 FROM profiles WHERE user_id = ?1",
                params![user_id],
                profile_columns,
            )
            .optional()?;
        row.map(profile_from_row).transpose()
    }

    pub fn list_profiles(&self) -> Result<Vec<LivenessProfile>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT user_id, cadence, last_checkin, missed_count, threshold,
                    escalation_enabled, alert_time, version
             FROM profiles ORDER BY user_id",
        )?;
        let rows = stmt.query_map([], profile_columns)?;
        let mut profiles = Vec::new();
        for row in rows {
            profiles.push(profile_from_row(row?)?);
        }
        Ok(profiles)
    }

    /// Compare-and-swap write: applies `profile` only if the stored
    /// version still matches `profile.version`, bumping it by one.
    /// Returns false when another writer got there first.
    pub fn update_profile_cas(&self, profile: &LivenessProfile) -> Result<bool> {
        let changed = self.lock().execute(
            "UPDATE profiles SET
                cadence = ?1, last_checkin = ?2, missed_count = ?3,
                threshold = ?4, escalation_enabled = ?5, alert_time = ?6,
                version = version + 1
             WHERE user_id = ?7 AND version = ?8",
            params![
                profile.cadence.as_db_string(),
                ts(profile.last_checkin),
                profile.missed_count,
                profile.threshold,
                profile.escalation_enabled,
                profile.alert_time,
                profile.user_id,
                profile.version,
            ],
        )?;
        Ok(changed == 1)
    }

    #[cfg(test)]
    pub fn force_threshold_for_tests(&self, user_id: &str, threshold: u32) -> Result<()> {
        self.lock().execute(
            "UPDATE profiles SET threshold = ?1 WHERE user_id = ?2",
            params![threshold, user_id],
        )?;
        Ok(())
    }

    // ── Alerts ───────────────────────────────────────────────────────

    pub fn insert_alert(&self, alert: &Alert) -> Result<()> {
        self.lock().execute(
            "INSERT INTO alerts (id, user_id, status, opened_at, closed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                alert.id,
                alert.user_id,
                alert.status.as_str(),
                ts(alert.opened_at),
                alert.closed_at.map(ts),
            ],
        )?;
        Ok(())
    }

    pub fn get_alert(&self, alert_id: &str) -> Result<Option<Alert>> {
        let row = self
            .lock()
            .query_row(
                "SELECT id, user_id, status, opened_at, closed_at
                 FROM alerts WHERE id = ?1",
                params![alert_id],
                alert_columns,
            )
            .optional()?;
        row.map(alert_from_row).transpose()
    }

    /// The user's open alert, if any (closed_at is NULL).
    pub fn get_open_alert(&self, user_id: &str) -> Result<Option<Alert>> {
        let row = self
            .lock()
            .query_row(
                "SELECT id, user_id, status, opened_at, closed_at
                 FROM alerts WHERE user_id = ?1 AND closed_at IS NULL",
                params![user_id],
                alert_columns,
            )
            .optional()?;
        row.map(alert_from_row).transpose()
    }

    pub fn list_alerts(&self, user_id: &str) -> Result<Vec<Alert>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, status, opened_at, closed_at
             FROM alerts WHERE user_id = ?1 ORDER BY opened_at DESC",
        )?;
        let rows = stmt.query_map(params![user_id], alert_columns)?;
        let mut alerts = Vec::new();
        for row in rows {
            alerts.push(alert_from_row(row?)?);
        }
        Ok(alerts)
    }

    /// Apply a state-machine transition to an alert.
    ///
    /// Illegal transitions are rejected here, the single enforcement
    /// point for the alert lifecycle.
    pub fn transition_alert(
        &self,
        alert_id: &str,
        to: AlertStatus,
        closed_at: Option<DateTime<Utc>>,
    ) -> Result<Alert> {
        let mut alert = self.get_alert(alert_id)?.ok_or(CoreError::NotFound {
            entity: "alert",
            id: alert_id.to_string(),
        })?;
        if !alert.status.can_transition(to) {
            return Err(CoreError::InvalidTransition {
                entity: "alert",
                from: alert.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        self.lock().execute(
            "UPDATE alerts SET status = ?1, closed_at = ?2 WHERE id = ?3",
            params![to.as_str(), closed_at.map(ts), alert_id],
        )?;
        alert.status = to;
        alert.closed_at = closed_at;
        Ok(alert)
    }

    // ── Admin reviews ────────────────────────────────────────────────

    pub fn insert_review(&self, review: &AdminReview) -> Result<()> {
        self.lock().execute(
            "INSERT INTO admin_reviews
                (id, user_id, status, reviewer_id, notes, created_at, decided_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                review.id,
                review.user_id,
                review.status.as_str(),
                review.reviewer_id,
                review.notes,
                ts(review.created_at),
                review.decided_at.map(ts),
            ],
        )?;
        Ok(())
    }

    pub fn get_review(&self, review_id: &str) -> Result<Option<AdminReview>> {
        let row = self
            .lock()
            .query_row(
                "SELECT id, user_id, status, reviewer_id, notes, created_at, decided_at
                 FROM admin_reviews WHERE id = ?1",
                params![review_id],
                review_columns,
            )
            .optional()?;
        row.map(review_from_row).transpose()
    }

    pub fn get_pending_review(&self, user_id: &str) -> Result<Option<AdminReview>> {
        let row = self
            .lock()
            .query_row(
                "SELECT id, user_id, status, reviewer_id, notes, created_at, decided_at
                 FROM admin_reviews WHERE user_id = ?1 AND status = 'pending'",
                params![user_id],
                review_columns,
            )
            .optional()?;
        row.map(review_from_row).transpose()
    }

    pub fn list_pending_reviews(&self) -> Result<Vec<AdminReview>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, status, reviewer_id, notes, created_at, decided_at
             FROM admin_reviews WHERE status = 'pending' ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], review_columns)?;
        let mut reviews = Vec::new();
        for row in rows {
            reviews.push(review_from_row(row?)?);
        }
        Ok(reviews)
    }

    pub fn decide_review(
        &self,
        review_id: &str,
        status: ReviewStatus,
        reviewer_id: &str,
        notes: Option<String>,
        decided_at: DateTime<Utc>,
    ) -> Result<AdminReview> {
        self.lock().execute(
            "UPDATE admin_reviews
             SET status = ?1, reviewer_id = ?2, notes = ?3, decided_at = ?4
             WHERE id = ?5",
            params![status.as_str(), reviewer_id, notes, ts(decided_at), review_id],
        )?;
        self.get_review(review_id)?.ok_or(CoreError::NotFound {
            entity: "review",
            id: review_id.to_string(),
        })
    }

    // ── Notification attempts ────────────────────────────────────────

    pub fn insert_attempt(&self, attempt: &NotificationAttempt) -> Result<()> {
        self.lock().execute(
            "INSERT INTO notification_attempts
                (id, review_id, nominee_id, attempt_count, status, last_error, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                attempt.id,
                attempt.review_id,
                attempt.nominee_id,
                attempt.attempt_count,
                attempt.status.as_str(),
                attempt.last_error,
                ts(attempt.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn update_attempt(&self, attempt: &NotificationAttempt) -> Result<()> {
        self.lock().execute(
            "UPDATE notification_attempts
             SET attempt_count = ?1, status = ?2, last_error = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                attempt.attempt_count,
                attempt.status.as_str(),
                attempt.last_error,
                ts(attempt.updated_at),
                attempt.id,
            ],
        )?;
        Ok(())
    }

    pub fn list_attempts(&self, review_id: &str) -> Result<Vec<NotificationAttempt>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, review_id, nominee_id, attempt_count, status, last_error, updated_at
             FROM notification_attempts WHERE review_id = ?1 ORDER BY nominee_id",
        )?;
        let rows = stmt.query_map(params![review_id], attempt_columns)?;
        let mut attempts = Vec::new();
        for row in rows {
            attempts.push(attempt_from_row(row?)?);
        }
        Ok(attempts)
    }

    /// The operator follow-up list: deliveries that ran out of retries.
    pub fn list_exhausted_attempts(&self) -> Result<Vec<NotificationAttempt>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, review_id, nominee_id, attempt_count, status, last_error, updated_at
             FROM notification_attempts WHERE status = 'exhausted' ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map([], attempt_columns)?;
        let mut attempts = Vec::new();
        for row in rows {
            attempts.push(attempt_from_row(row?)?);
        }
        Ok(attempts)
    }

    // ── Audit log ────────────────────────────────────────────────────

    pub fn append_audit(
        &self,
        entity_type: &str,
        entity_id: &str,
        from_state: &str,
        to_state: &str,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.lock().execute(
            "INSERT INTO audit_log (id, entity_type, entity_id, from_state, to_state, actor, at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                uuid::Uuid::new_v4().to_string(),
                entity_type,
                entity_id,
                from_state,
                to_state,
                actor.as_db_string(),
                ts(at),
            ],
        )?;
        Ok(())
    }

    pub fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        let conn = self.lock();
        let mut sql = String::from(
            "SELECT id, entity_type, entity_id, from_state, to_state, actor, at
             FROM audit_log WHERE 1=1",
        );
        let mut args: Vec<&dyn rusqlite::ToSql> = Vec::new();
        if let Some(entity_type) = &filter.entity_type {
            sql.push_str(" AND entity_type = ?");
            args.push(entity_type);
        }
        if let Some(entity_id) = &filter.entity_id {
            sql.push_str(" AND entity_id = ?");
            args.push(entity_id);
        }
        sql.push_str(" ORDER BY at DESC");
        let limit = filter.limit.unwrap_or(100) as i64;
        sql.push_str(" LIMIT ?");
        args.push(&limit);

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(args.as_slice(), audit_columns)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(audit_from_row(row?)?);
        }
        Ok(entries)
    }
}

// ── Row mapping ──────────────────────────────────────────────────────

type ProfileRow = (String, String, String, u32, u32, bool, Option<String>, i64);

fn profile_columns(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProfileRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn profile_from_row(row: ProfileRow) -> Result<LivenessProfile> {
    let (user_id, cadence, last_checkin, missed_count, threshold, escalation_enabled, alert_time, version) =
        row;
    Ok(LivenessProfile {
        user_id,
        cadence: Cadence::parse(&cadence).ok_or_else(|| corrupt("profiles", &cadence))?,
        last_checkin: parse_ts("profiles", &last_checkin)?,
        missed_count,
        threshold,
        escalation_enabled,
        alert_time,
        version,
    })
}

type AlertRow = (String, String, String, String, Option<String>);

fn alert_columns(row: &rusqlite::Row<'_>) -> rusqlite::Result<AlertRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn alert_from_row(row: AlertRow) -> Result<Alert> {
    let (id, user_id, status, opened_at, closed_at) = row;
    Ok(Alert {
        id,
        user_id,
        status: AlertStatus::parse(&status).ok_or_else(|| corrupt("alerts", &status))?,
        opened_at: parse_ts("alerts", &opened_at)?,
        closed_at: closed_at.map(|s| parse_ts("alerts", &s)).transpose()?,
    })
}

type ReviewRow = (
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
);

fn review_columns(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReviewRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn review_from_row(row: ReviewRow) -> Result<AdminReview> {
    let (id, user_id, status, reviewer_id, notes, created_at, decided_at) = row;
    Ok(AdminReview {
        id,
        user_id,
        status: ReviewStatus::parse(&status).ok_or_else(|| corrupt("admin_reviews", &status))?,
        reviewer_id,
        notes,
        created_at: parse_ts("admin_reviews", &created_at)?,
        decided_at: decided_at
            .map(|s| parse_ts("admin_reviews", &s))
            .transpose()?,
    })
}

type AttemptRow = (String, String, String, u32, String, Option<String>, String);

fn attempt_columns(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttemptRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn attempt_from_row(row: AttemptRow) -> Result<NotificationAttempt> {
    let (id, review_id, nominee_id, attempt_count, status, last_error, updated_at) = row;
    Ok(NotificationAttempt {
        id,
        review_id,
        nominee_id,
        attempt_count,
        status: AttemptStatus::parse(&status)
            .ok_or_else(|| corrupt("notification_attempts", &status))?,
        last_error,
        updated_at: parse_ts("notification_attempts", &updated_at)?,
    })
}

type AuditRow = (String, String, String, String, String, String, String);

fn audit_columns(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn audit_from_row(row: AuditRow) -> Result<AuditEntry> {
    let (id, entity_type, entity_id, from_state, to_state, actor, at) = row;
    Ok(AuditEntry {
        id,
        entity_type,
        entity_id,
        from_state,
        to_state,
        actor: Actor::parse(&actor).ok_or_else(|| corrupt("audit_log", &actor))?,
        timestamp: parse_ts("audit_log", &at)?,
    })
}

fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_ts(table: &'static str, s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| corrupt(table, &format!("bad timestamp '{s}': {e}")).into())
}

fn corrupt(table: &'static str, message: &str) -> DatabaseError {
    DatabaseError::CorruptRow {
        table,
        message: message.to_string(),
    }
}
