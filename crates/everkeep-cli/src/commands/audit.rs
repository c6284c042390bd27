//! Audit trail commands.

use clap::Subcommand;
use everkeep_core::AuditFilter;

use crate::common::build_engine;

#[derive(Subcommand)]
pub enum AuditAction {
    /// List audit entries, newest first
    List {
        /// Filter by entity kind: profile, alert, review or attempt
        #[arg(long)]
        entity_type: Option<String>,
        /// Filter by entity ID
        #[arg(long)]
        entity_id: Option<String>,
        /// Maximum entries to return
        #[arg(long)]
        limit: Option<usize>,
    },
}

pub fn run(action: AuditAction) -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _) = build_engine()?;

    match action {
        AuditAction::List {
            entity_type,
            entity_id,
            limit,
        } => {
            let entries = engine.audit_trail(&AuditFilter {
                entity_type,
                entity_id,
                limit,
            })?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
    }
    Ok(())
}
