use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fixup_server::config::Config;
use fixup_server::readiness::TokioSleeper;
use fixup_server::reconciliation::{reconcile_account, reconciliation_loop, ReconcileSettings};
use fixup_server::{app_router, AppState, GitHubApi, GitHubClient, Pipeline, RecordingLogger};

#[derive(Parser)]
#[command(name = "fixup")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Applies review suggestions to pull requests and merges them", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the webhook endpoint (default)
    Serve {
        /// Port to listen on, overriding PORT
        #[arg(long)]
        port: Option<u16>,
    },

    /// Run one reconciliation sweep and exit
    Reconcile {
        /// Account to sweep, overriding RECONCILE_ACCOUNT
        #[arg(long)]
        account: Option<String>,
    },
}

fn reconcile_settings(config: &Config, account: String) -> Result<ReconcileSettings> {
    let callback_url = config
        .webhook_callback_url
        .clone()
        .context("WEBHOOK_CALLBACK_URL is required for reconciliation")?;

    Ok(ReconcileSettings {
        account,
        callback_url,
        webhook_secret: config.github_webhook_secret.clone(),
    })
}

fn recording_logger(config: &Config) -> Option<RecordingLogger> {
    if !config.recording_enabled {
        return None;
    }

    match RecordingLogger::new(PathBuf::from(&config.recording_log_path)) {
        Ok(logger) => {
            info!(
                "Recording enabled, logging to: {}",
                config.recording_log_path
            );
            Some(logger)
        }
        Err(e) => {
            error!("Failed to initialize recording logger: {}", e);
            None
        }
    }
}

async fn serve(config: Config, port: Option<u16>) -> Result<()> {
    let recording_logger = recording_logger(&config);

    let github: Arc<dyn GitHubApi> = Arc::new(GitHubClient::new_with_recording(
        &config.github_api_url,
        config.github_token.clone(),
        recording_logger.clone(),
    )?);

    let pipeline = Pipeline {
        github: github.clone(),
        sleeper: Arc::new(TokioSleeper),
        readiness: config.readiness,
        author: config.commit_author.clone(),
        recording_logger: recording_logger.clone(),
    };

    let app_state = Arc::new(AppState {
        github: github.clone(),
        webhook_secret: config.github_webhook_secret.clone(),
        pipeline,
        recording_logger,
    });

    match config.reconcile_account.clone() {
        Some(account) => {
            let settings = reconcile_settings(&config, account)?;
            let period = config.reconcile_interval;
            let github = github.clone();
            tokio::spawn(async move {
                reconciliation_loop(github, settings, period).await;
            });
        }
        None => info!("RECONCILE_ACCOUNT not set; reconciliation loop disabled"),
    }

    let app = app_router(app_state);

    let port = port.unwrap_or(config.port);
    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Server listening on port {}", port);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn reconcile_once(config: Config, account: Option<String>) -> Result<()> {
    let account = account
        .or_else(|| config.reconcile_account.clone())
        .context("No account to reconcile: pass --account or set RECONCILE_ACCOUNT")?;
    let settings = reconcile_settings(&config, account)?;

    let github = GitHubClient::new_with_recording(
        &config.github_api_url,
        config.github_token.clone(),
        recording_logger(&config),
    )?;

    let report = reconcile_account(&github, &settings).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.errors > 0 {
        anyhow::bail!("reconciliation finished with {} error(s)", report.errors);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    info!("Starting fixup {}", fixup_core::get_bot_version());

    let config = Config::from_env().context("Failed to load configuration from environment variables")?;

    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => serve(config, port).await,
        Commands::Reconcile { account } => reconcile_once(config, account).await,
    }
}
