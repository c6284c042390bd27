//! Background liveness scanner.

use clap::Subcommand;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::common::build_engine;

#[derive(Subcommand)]
pub enum WatchAction {
    /// Run the recurring liveness sweep until Ctrl-C
    Run,
    /// Run a single sweep and print its report
    Once,
}

pub fn run(action: WatchAction) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let (engine, _) = build_engine()?;
    let scanner = engine.scanner();
    let runtime = tokio::runtime::Runtime::new()?;

    match action {
        WatchAction::Run => {
            runtime.block_on(async move {
                let (shutdown_tx, shutdown_rx) = watch::channel(false);
                let handle = tokio::spawn(scanner.run(shutdown_rx));
                tokio::signal::ctrl_c().await?;
                info!("shutting down");
                let _ = shutdown_tx.send(true);
                handle.await?;
                Ok::<_, Box<dyn std::error::Error>>(())
            })?;
        }
        WatchAction::Once => {
            let report = runtime.block_on(scanner.run_sweep());
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
