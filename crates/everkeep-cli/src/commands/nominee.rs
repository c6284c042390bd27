//! Nominee management commands.

use clap::Subcommand;
use everkeep_core::Nominee;
use uuid::Uuid;

use crate::common::build_engine;

#[derive(Subcommand)]
pub enum NomineeAction {
    /// Add a nominee for a user (unverified until confirmed)
    Add {
        /// User ID
        user_id: String,
        /// Nominee full name
        full_name: String,
        /// Relationship to the user
        #[arg(long, default_value = "other")]
        relationship: String,
        /// Mobile number
        #[arg(long)]
        mobile: String,
        /// Email address
        #[arg(long)]
        email: Option<String>,
    },
    /// List a user's nominees
    List {
        /// User ID
        user_id: String,
    },
    /// Mark a nominee as verified
    Verify {
        /// Nominee ID
        id: String,
    },
}

pub fn run(action: NomineeAction) -> Result<(), Box<dyn std::error::Error>> {
    let (_, contacts) = build_engine()?;

    match action {
        NomineeAction::Add {
            user_id,
            full_name,
            relationship,
            mobile,
            email,
        } => {
            let nominee = Nominee {
                id: Uuid::new_v4().to_string(),
                user_id,
                full_name,
                relationship,
                mobile_number: mobile,
                email,
                verified: false,
            };
            contacts.add_nominee(&nominee)?;
            println!("Nominee added: {}", nominee.id);
            println!("{}", serde_json::to_string_pretty(&nominee)?);
        }
        NomineeAction::List { user_id } => {
            let nominees = contacts.list_nominees(&user_id)?;
            println!("{}", serde_json::to_string_pretty(&nominees)?);
        }
        NomineeAction::Verify { id } => {
            if contacts.verify_nominee(&id)? {
                println!("Nominee verified: {id}");
            } else {
                println!("Nominee not found: {id}");
            }
        }
    }
    Ok(())
}
