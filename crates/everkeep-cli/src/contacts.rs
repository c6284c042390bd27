//! Local contact book: nominees and the admin roster.
//!
//! The engine treats nominee lookup and admin membership as external
//! concerns behind traits; this CLI backs both with a small SQLite
//! database next to the engine's own, plus a console notification
//! channel so dispatches are visible when running locally.

use std::sync::Mutex;

use rusqlite::{params, Connection};

use everkeep_core::storage::data_dir;
use everkeep_core::{
    AdminRoster, CoreError, DeliveryError, Nominee, NomineeDirectory, NotificationChannel,
    NotificationMessage,
};

pub struct LocalContacts {
    conn: Mutex<Connection>,
}

impl LocalContacts {
    pub fn open() -> Result<Self, Box<dyn std::error::Error>> {
        let path = data_dir()?.join("contacts.db");
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS nominees (
                id            TEXT PRIMARY KEY,
                user_id       TEXT NOT NULL,
                full_name     TEXT NOT NULL,
                relationship  TEXT NOT NULL,
                mobile_number TEXT NOT NULL,
                email         TEXT,
                verified      INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_nominees_user ON nominees(user_id);
            CREATE TABLE IF NOT EXISTS admins (
                admin_id TEXT PRIMARY KEY
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_nominee(&self, nominee: &Nominee) -> Result<(), Box<dyn std::error::Error>> {
        self.lock().execute(
            "INSERT INTO nominees (id, user_id, full_name, relationship, mobile_number, email, verified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                nominee.id,
                nominee.user_id,
                nominee.full_name,
                nominee.relationship,
                nominee.mobile_number,
                nominee.email,
                nominee.verified,
            ],
        )?;
        Ok(())
    }

    pub fn list_nominees(&self, user_id: &str) -> Result<Vec<Nominee>, Box<dyn std::error::Error>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, full_name, relationship, mobile_number, email, verified
             FROM nominees WHERE user_id = ?1 ORDER BY full_name",
        )?;
        let rows = stmt
            .query_map(params![user_id], nominee_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn verify_nominee(&self, nominee_id: &str) -> Result<bool, Box<dyn std::error::Error>> {
        let changed = self.lock().execute(
            "UPDATE nominees SET verified = 1 WHERE id = ?1",
            params![nominee_id],
        )?;
        Ok(changed == 1)
    }

    pub fn grant_admin(&self, admin_id: &str) -> Result<(), Box<dyn std::error::Error>> {
        self.lock().execute(
            "INSERT OR IGNORE INTO admins (admin_id) VALUES (?1)",
            params![admin_id],
        )?;
        Ok(())
    }
}

impl NomineeDirectory for LocalContacts {
    fn list_verified(&self, user_id: &str) -> Result<Vec<Nominee>, CoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, full_name, relationship, mobile_number, email, verified
             FROM nominees WHERE user_id = ?1 AND verified = 1",
        )?;
        let rows = stmt
            .query_map(params![user_id], nominee_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl AdminRoster for LocalContacts {
    fn is_admin(&self, actor_id: &str) -> bool {
        self.lock()
            .query_row(
                "SELECT 1 FROM admins WHERE admin_id = ?1",
                params![actor_id],
                |_| Ok(()),
            )
            .is_ok()
    }
}

fn nominee_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Nominee> {
    Ok(Nominee {
        id: row.get(0)?,
        user_id: row.get(1)?,
        full_name: row.get(2)?,
        relationship: row.get(3)?,
        mobile_number: row.get(4)?,
        email: row.get(5)?,
        verified: row.get(6)?,
    })
}

/// Prints deliveries to stdout instead of sending anything.
pub struct ConsoleChannel;

impl NotificationChannel for ConsoleChannel {
    fn send(&self, nominee: &Nominee, message: &NotificationMessage) -> Result<(), DeliveryError> {
        println!(
            "[notify] {} <{}>: {} -- {}",
            nominee.full_name, nominee.mobile_number, message.subject, message.body
        );
        Ok(())
    }
}
