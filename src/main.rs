//! Dashboard engine entry point

use clap::{Parser, Subcommand};
use dashgrid::{Config, Dashboard, DashboardError, Providers, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often the serve loop logs a per-page health summary.
const HEALTH_REPORT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "dashgrid", version, about = "Self-hosted dashboard refresh engine")]
struct Cli {
    /// Path to the dashboard configuration file
    #[arg(long, short, default_value = "dashgrid.json", env = "DASHGRID_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Check the configuration file and exit
    Validate,
    /// Print the normalized configuration as JSON
    Print,
    /// Run a single refresh pass and report widget health
    Diagnose,
}

#[tokio::main]
async fn main() -> Result<()> {
    initialize_tracing();

    let cli = Cli::parse();
    match cli.command {
        Some(Command::Validate) => validate(&cli.config),
        Some(Command::Print) => print_config(&cli.config),
        Some(Command::Diagnose) => diagnose(&cli.config).await,
        None => serve(&cli.config).await,
    }
}

fn initialize_tracing() {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .json();

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
        .unwrap_or_default();

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}

fn load_config(path: &Path) -> Result<Config> {
    let mut config = Config::from_file(path)?;
    config.apply_env();
    Ok(config)
}

fn validate(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    match config.validate() {
        Ok(()) => {
            println!("config is valid");
            Ok(())
        }
        Err(message) => {
            eprintln!("config is invalid: {}", message);
            std::process::exit(1);
        }
    }
}

fn print_config(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    if let Err(message) = config.validate() {
        eprintln!("config is invalid: {}", message);
        std::process::exit(1);
    }
    println!("{}", serde_json::to_string_pretty(&config).map_err(DashboardError::Json)?);
    Ok(())
}

/// Loads the configuration, runs one refresh pass, and prints the
/// resulting health of every widget. Exits non-zero if any widget
/// failed to retrieve content.
async fn diagnose(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    if let Err(message) = config.validate() {
        eprintln!("config is invalid: {}", message);
        std::process::exit(1);
    }

    let providers = Providers::new()?;
    let reachable = providers.connectivity.is_reachable().await;
    println!("internet reachable: {}", if reachable { "yes" } else { "no" });

    let dashboard = Dashboard::new(config, &providers).await?;
    dashboard.refresh_all_pages().await;

    let mut failures = 0;
    for page in dashboard.pages() {
        println!("page {}:", page.slug());
        for summary in page.widget_summaries().await {
            if let Some(detail) = &summary.error {
                failures += 1;
                println!("  FAIL {} ({})", summary.title, detail);
            } else if let Some(detail) = &summary.notice {
                println!("  WARN {} ({})", summary.title, detail);
            } else {
                println!("  OK   {}", summary.title);
            }
        }
    }

    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}

async fn serve(path: &Path) -> Result<()> {
    info!("Starting dashgrid v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(path)?;
    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    info!(
        "Dashboard configuration - pages: {}, refresh interval: {}s",
        config.pages.len(),
        config.refresh_interval_seconds
    );

    let providers = Providers::new()?;
    let dashboard = Arc::new(Dashboard::new(config, &providers).await?);

    let refresher = Arc::clone(&dashboard);
    let refresh_task = tokio::spawn(async move {
        refresher.run_background_refresh().await;
    });

    let reporter = Arc::clone(&dashboard);
    let report_task = tokio::spawn(async move {
        report_health(reporter).await;
    });

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| DashboardError::Other(format!("Failed to wait for shutdown signal: {}", e)))?;

    info!("Shutting down dashboard");
    refresh_task.abort();
    report_task.abort();

    Ok(())
}

/// Logs a periodic health line for every page so long-running
/// deployments surface degraded widgets without scraping HTML.
async fn report_health(dashboard: Arc<Dashboard>) {
    let mut ticker = tokio::time::interval(HEALTH_REPORT_INTERVAL);
    loop {
        ticker.tick().await;
        for page in dashboard.pages() {
            let summaries = page.widget_summaries().await;
            let unavailable = summaries.iter().filter(|s| !s.content_available).count();
            info!(
                page = page.slug(),
                widgets = summaries.len(),
                unavailable,
                "Page health"
            );
        }
    }
}
