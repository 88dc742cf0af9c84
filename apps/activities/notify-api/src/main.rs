//! Activities Notify API
//!
//! Serves the roster API with the notification scheduler running alongside,
//! or runs a single sweep / status check from the command line.

use activities_notify_api::config::Config;
use activities_notify_api::shutdown::shutdown_signal;
use activities_notify_api::{app, AppState, Engine};
use chrono::Utc;
use clap::{Parser, Subcommand};
use core_config::tracing::{init_tracing, install_color_eyre};
use domain_notifications::SweepJob;
use eyre::{Result, WrapErr};
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "notify-api")]
#[command(about = "Mergington activities API with email notifications")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server and the sweep scheduler (default)
    Serve,

    /// Run one sweep for the current period and exit
    Sweep {
        /// Which job to run (daily, weekly)
        #[arg(short, long)]
        job: SweepJob,
    },

    /// Print the email transport status as JSON
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    install_color_eyre();

    let config = Config::from_env()?;
    init_tracing(&config.environment);

    let cli = Cli::parse();
    let engine = Engine::build(&config.notify).await?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(&config, engine).await?,

        Commands::Sweep { job } => {
            info!(job = %job, "Running one-off sweep");
            match engine.scheduler.tick_job(job, Utc::now()).await? {
                Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                None => println!("{{\"message\": \"{} sweep already covered for this period\"}}", job),
            }
            engine.save_state().await?;
        }

        Commands::Status => {
            let status = engine.service.status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

async fn serve(config: &Config, engine: Engine) -> Result<()> {
    if !engine.persists_state() {
        warn!(
            "NOTIFY_STATE_FILE not set: buffered digests are lost on shutdown and sweeps start at the next trigger"
        );
        engine.scheduler.cover_elapsed_periods(Utc::now()).await;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = engine.scheduler.clone();
    let scheduler_handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    let router = app(AppState {
        service: engine.service.clone(),
        roster: engine.roster.clone(),
    });

    let listener = tokio::net::TcpListener::bind(config.server.address())
        .await
        .wrap_err_with(|| format!("Failed to bind {}", config.server.address()))?;
    info!("Server starting on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .wrap_err("Server error")?;

    info!("Stopping scheduler");
    let _ = shutdown_tx.send(true);
    scheduler_handle.await.wrap_err("Scheduler task panicked")?;

    engine.save_state().await?;
    info!("Notify API shutdown complete");
    Ok(())
}
