use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use castwatch_core::{
    load_app_config, load_subscriptions, Notification, NotificationKind, NotificationSink,
    NotifyError, RiskControlStatus, ServiceStatus,
};
use castwatch_monitor::WatchService;

#[derive(Debug, Parser)]
#[command(name = "castwatch")]
#[command(about = "Watches platform accounts for posts and live sessions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the watch service until interrupted.
    Run,
    /// One detection pass over all post subjects, then exit.
    Check,
    /// Print an example status JSON document.
    StatusSchema,
}

/// Sink that prints notifications to stdout. Chat-platform delivery plugs in
/// behind the same trait.
struct StdoutSink;

#[async_trait]
impl NotificationSink for StdoutSink {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let label = match notification.kind {
            NotificationKind::PostUpdate => "post",
            NotificationKind::LiveStart => "live-start",
            NotificationKind::LiveEnd => "live-end",
            NotificationKind::LiveOngoing => "live-ongoing",
        };
        match &notification.url {
            Some(url) => println!(
                "[{label}] {} -> {}: {} ({url})",
                notification.user, notification.target, notification.content
            ),
            None => println!(
                "[{label}] {} -> {}: {}",
                notification.user, notification.target, notification.content
            ),
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run => run().await,
        Commands::Check => check().await,
        Commands::StatusSchema => {
            println!("{}", serde_json::to_string_pretty(&example_status())?);
            Ok(())
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let mut service = build_service()?;
    service.start().await;
    tracing::info!("watching — press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    service.stop().await;

    println!("{}", serde_json::to_string_pretty(&service.status().await)?);
    Ok(())
}

async fn check() -> anyhow::Result<()> {
    let service = build_service()?;
    service.run_detection_pass().await;
    Ok(())
}

fn build_service() -> anyhow::Result<WatchService> {
    let config = load_app_config()?;
    let subscriptions = load_subscriptions(&config.subscriptions_path)?;
    tracing::info!(
        subjects = subscriptions.subscriptions.len(),
        path = %config.subscriptions_path.display(),
        "subscriptions loaded"
    );
    Ok(WatchService::new(
        &config,
        &subscriptions,
        Arc::new(StdoutSink),
    )?)
}

fn example_status() -> ServiceStatus {
    ServiceStatus {
        is_running: true,
        subject_count: 2,
        room_count: 2,
        live_room_count: 1,
        push_connected_count: 1,
        posts_risk: RiskControlStatus::default(),
        live_risk: RiskControlStatus {
            is_blocked: true,
            remaining_secs: 240,
            consecutive_failures: 3,
            block_duration_secs: 300,
            last_error_kind: Some("abuse_detected".to_string()),
        },
    }
}
