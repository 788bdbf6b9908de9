//! `slidepin` -- turn reviewer output into slide pins and manage project
//! context from the command line.
//!
//! Configuration comes from the environment (see
//! [`CliConfig::from_env`](slidepin_cli::config::CliConfig::from_env)); a
//! `.env` file in the working directory is loaded first.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use slidepin_cli::commands::{App, Command, Invocation, USAGE};
use slidepin_cli::config::CliConfig;
use slidepin_cli::maintenance;
use slidepin_events::EventLogger;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "slidepin=info,slidepin_cli=info,slidepin_core=info,slidepin_events=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let invocation = Invocation::parse(std::env::args().skip(1))?;
    if invocation.command == Command::Help {
        print!("{USAGE}");
        return Ok(());
    }

    let config = CliConfig::from_env().context("Invalid configuration")?;
    tracing::debug!(store_dir = %config.store_dir.display(), "Opening store");
    let app = App::open(config).await?;

    let logger = tokio::spawn(EventLogger::run(app.bus().subscribe()));

    if invocation.command == Command::Watch {
        let cancel = CancellationToken::new();
        let job = tokio::spawn(maintenance::run(
            Arc::clone(app.projects()),
            app.config().maintenance_interval,
            cancel.clone(),
        ));
        shutdown_signal().await;
        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(5), job).await;
    } else {
        let output = app.execute(invocation).await?;
        println!("{}", serde_json::to_string_pretty(&output)?);
    }

    // Dropping the app closes the bus, which ends the logger.
    drop(app);
    let _ = tokio::time::timeout(Duration::from_secs(1), logger).await;
    Ok(())
}

/// Wait for Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), stopping");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, stopping");
        }
    }
}
