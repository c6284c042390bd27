//! Monitored user commands.

use clap::Subcommand;
use everkeep_core::ProfileSettings;

use crate::common::{build_engine, parse_cadence};

#[derive(Subcommand)]
pub enum UserAction {
    /// Register a user for well-being monitoring
    Register {
        /// User ID
        user_id: String,
        /// Check-in cadence: daily, weekly or custom:<days>
        #[arg(long, default_value = "daily")]
        cadence: String,
        /// Missed periods before escalation
        #[arg(long, default_value = "15")]
        threshold: u32,
        /// Preferred reminder time (HH:MM)
        #[arg(long)]
        alert_time: Option<String>,
        /// Disable escalation for this user
        #[arg(long)]
        no_escalation: bool,
    },
    /// Show a user's liveness state
    Show {
        /// User ID
        user_id: String,
    },
}

pub fn run(action: UserAction) -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _) = build_engine()?;

    match action {
        UserAction::Register {
            user_id,
            cadence,
            threshold,
            alert_time,
            no_escalation,
        } => {
            let settings = ProfileSettings {
                cadence: parse_cadence(&cadence)?,
                threshold,
                escalation_enabled: !no_escalation,
                alert_time,
            };
            let profile = engine.register_user(&user_id, settings)?;
            println!("User registered: {user_id}");
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }
        UserAction::Show { user_id } => match engine.get_profile(&user_id)? {
            Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
            None => println!("User not found: {user_id}"),
        },
    }
    Ok(())
}
