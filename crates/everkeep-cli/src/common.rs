//! Shared wiring for CLI commands.

use std::sync::Arc;

use everkeep_core::{
    Cadence, Database, EngineConfig, ProfileSettings, SystemClock, WellbeingEngine,
};

use crate::contacts::{ConsoleChannel, LocalContacts};

/// Build the engine over the local database and contact book.
pub fn build_engine(
) -> Result<(WellbeingEngine, Arc<LocalContacts>), Box<dyn std::error::Error>> {
    let store = Arc::new(Database::open()?);
    let contacts = Arc::new(LocalContacts::open()?);
    let config = EngineConfig::load_or_default();
    let engine = WellbeingEngine::new(
        store,
        Arc::new(SystemClock),
        config,
        contacts.clone(),
        Arc::new(ConsoleChannel),
        contacts.clone(),
    );
    Ok((engine, contacts))
}

/// Parse a cadence argument: `daily`, `weekly` or `custom:<days>`.
pub fn parse_cadence(s: &str) -> Result<Cadence, String> {
    Cadence::parse(s).ok_or_else(|| {
        format!("'{s}' is not a valid cadence (expected daily, weekly or custom:<days>)")
    })
}

/// Settings as currently stored on a profile, for partial updates.
pub fn current_settings(profile: &everkeep_core::LivenessProfile) -> ProfileSettings {
    ProfileSettings {
        cadence: profile.cadence,
        threshold: profile.threshold,
        escalation_enabled: profile.escalation_enabled,
        alert_time: profile.alert_time.clone(),
    }
}
