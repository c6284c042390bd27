//! Well-being check-in commands.

use clap::Subcommand;

use crate::common::build_engine;

#[derive(Subcommand)]
pub enum CheckinAction {
    /// Confirm well-being for a user
    Confirm {
        /// User ID
        user_id: String,
    },
    /// Show check-in status
    Status {
        /// User ID
        user_id: String,
    },
}

pub fn run(action: CheckinAction) -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _) = build_engine()?;

    match action {
        CheckinAction::Confirm { user_id } => {
            let profile = engine.confirm_checkin(&user_id)?;
            println!("Check-in recorded for {user_id}");
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }
        CheckinAction::Status { user_id } => match engine.get_profile(&user_id)? {
            Some(snapshot) => {
                println!(
                    "last check-in: {}, missed periods: {}/{}",
                    snapshot.profile.last_checkin, snapshot.profile.missed_count,
                    snapshot.profile.threshold
                );
                if let Some(alert) = &snapshot.open_alert {
                    println!("open alert: {} ({})", alert.id, alert.status.as_str());
                }
                if let Some(review) = &snapshot.pending_review {
                    println!("pending admin review: {}", review.id);
                }
            }
            None => println!("User not found: {user_id}"),
        },
    }
    Ok(())
}
