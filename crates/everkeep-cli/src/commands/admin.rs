//! Admin review workflow commands.

use clap::Subcommand;
use everkeep_core::Decision;

use crate::common::build_engine;

#[derive(Subcommand)]
pub enum AdminAction {
    /// Add an administrator to the local roster
    Grant {
        /// Admin ID
        admin_id: String,
    },
    /// List pending escalation reviews
    Reviews,
    /// Decide a pending review; approval notifies the user's nominees
    Decide {
        /// Review ID
        review_id: String,
        /// Verdict: approve or reject
        verdict: String,
        /// Deciding administrator's ID
        #[arg(long)]
        reviewer: String,
        /// Decision notes
        #[arg(long)]
        notes: Option<String>,
    },
    /// Re-run the fan-out for an approved review whose dispatch aborted
    Redispatch {
        /// Review ID
        review_id: String,
    },
    /// List deliveries that exhausted their retries
    FollowUp,
}

pub fn run(action: AdminAction) -> Result<(), Box<dyn std::error::Error>> {
    let (engine, contacts) = build_engine()?;

    match action {
        AdminAction::Grant { admin_id } => {
            contacts.grant_admin(&admin_id)?;
            println!("Admin granted: {admin_id}");
        }
        AdminAction::Reviews => {
            let reviews = engine.list_pending_reviews()?;
            println!("{}", serde_json::to_string_pretty(&reviews)?);
        }
        AdminAction::Decide {
            review_id,
            verdict,
            reviewer,
            notes,
        } => {
            let decision = match verdict.as_str() {
                "approve" => Decision::Approve,
                "reject" => Decision::Reject,
                other => return Err(format!("'{other}' is not a verdict (approve|reject)").into()),
            };
            let runtime = tokio::runtime::Runtime::new()?;
            let outcome =
                runtime.block_on(engine.decide_review(&review_id, decision, &reviewer, notes))?;
            println!("Review {}: {}", review_id, outcome.review.status.as_str());
            if let Some(report) = &outcome.dispatch {
                println!(
                    "dispatched to {} nominee(s): {} sent, {} exhausted",
                    report.nominees, report.sent, report.exhausted
                );
            }
        }
        AdminAction::Redispatch { review_id } => {
            let runtime = tokio::runtime::Runtime::new()?;
            let report = runtime.block_on(engine.redispatch_review(&review_id))?;
            println!(
                "redispatched to {} nominee(s): {} sent, {} exhausted",
                report.nominees, report.sent, report.exhausted
            );
        }
        AdminAction::FollowUp => {
            let attempts = engine.follow_up_attempts()?;
            println!("{}", serde_json::to_string_pretty(&attempts)?);
        }
    }
    Ok(())
}
