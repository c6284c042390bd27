//! Nominee store seam.
//!
//! Nominee CRUD lives outside the engine; the dispatcher only ever asks
//! for the verified nominees of one user at fan-out time.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A trusted contact designated by the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Nominee {
    pub id: String,
    pub user_id: String,
    pub full_name: String,
    /// Relationship to the user (e.g. "spouse", "daughter").
    pub relationship: String,
    pub mobile_number: String,
    pub email: Option<String>,
    /// Only verified nominees are eligible for notification fan-out.
    pub verified: bool,
}

/// Read-only view of the external nominee store.
pub trait NomineeDirectory: Send + Sync {
    /// All verified nominees of `user_id`.
    fn list_verified(&self, user_id: &str) -> Result<Vec<Nominee>>;
}
