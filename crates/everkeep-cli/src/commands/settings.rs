//! Monitoring settings commands.

use clap::Subcommand;

use crate::common::{build_engine, current_settings, parse_cadence};

#[derive(Subcommand)]
pub enum SettingsAction {
    /// Show a user's monitoring settings
    Show {
        /// User ID
        user_id: String,
    },
    /// Update monitoring settings (unset options keep their value)
    Set {
        /// User ID
        user_id: String,
        /// Check-in cadence: daily, weekly or custom:<days>
        #[arg(long)]
        cadence: Option<String>,
        /// Missed periods before escalation
        #[arg(long)]
        threshold: Option<u32>,
        /// Enable or disable escalation
        #[arg(long)]
        escalation: Option<bool>,
        /// Preferred reminder time (HH:MM)
        #[arg(long)]
        alert_time: Option<String>,
        /// Clear the reminder time
        #[arg(long)]
        clear_alert_time: bool,
    },
}

pub fn run(action: SettingsAction) -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _) = build_engine()?;

    match action {
        SettingsAction::Show { user_id } => match engine.get_profile(&user_id)? {
            Some(snapshot) => println!(
                "{}",
                serde_json::to_string_pretty(&current_settings(&snapshot.profile))?
            ),
            None => println!("User not found: {user_id}"),
        },
        SettingsAction::Set {
            user_id,
            cadence,
            threshold,
            escalation,
            alert_time,
            clear_alert_time,
        } => {
            let snapshot = engine
                .get_profile(&user_id)?
                .ok_or(format!("User not found: {user_id}"))?;
            let mut settings = current_settings(&snapshot.profile);
            if let Some(c) = cadence {
                settings.cadence = parse_cadence(&c)?;
            }
            if let Some(t) = threshold {
                settings.threshold = t;
            }
            if let Some(e) = escalation {
                settings.escalation_enabled = e;
            }
            if let Some(t) = alert_time {
                settings.alert_time = Some(t);
            }
            if clear_alert_time {
                settings.alert_time = None;
            }

            let profile = engine.update_settings(&user_id, settings)?;
            println!("Settings updated:");
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }
    }
    Ok(())
}
