use clap::{Parser, Subcommand};

mod commands;
mod common;
mod contacts;

#[derive(Parser)]
#[command(name = "everkeep-cli", version, about = "Everkeep CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Monitored user management
    User {
        #[command(subcommand)]
        action: commands::user::UserAction,
    },
    /// Well-being check-ins
    Checkin {
        #[command(subcommand)]
        action: commands::checkin::CheckinAction,
    },
    /// Monitoring settings
    Settings {
        #[command(subcommand)]
        action: commands::settings::SettingsAction,
    },
    /// Nominee management
    Nominee {
        #[command(subcommand)]
        action: commands::nominee::NomineeAction,
    },
    /// Admin review workflow
    Admin {
        #[command(subcommand)]
        action: commands::admin::AdminAction,
    },
    /// Audit trail queries
    Audit {
        #[command(subcommand)]
        action: commands::audit::AuditAction,
    },
    /// Background liveness scanner
    Watch {
        #[command(subcommand)]
        action: commands::watch::WatchAction,
    },
}

fn main() {
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::User { action } => commands::user::run(action),
        Commands::Checkin { action } => commands::checkin::run(action),
        Commands::Settings { action } => commands::settings::run(action),
        Commands::Nominee { action } => commands::nominee::run(action),
        Commands::Admin { action } => commands::admin::run(action),
        Commands::Audit { action } => commands::audit::run(action),
        Commands::Watch { action } => commands::watch::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
