use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use experiment_store::{
    config::Config,
    monitor::format_alert_message,
    notify::{AlertSink, TelegramNotifier},
    store::SqliteStorage,
    versioning::VersionStore,
};

/// Versioned experiment-configuration store.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Override the database path from the environment.
    #[arg(long)]
    database_path: Option<PathBuf>,

    /// Check one version's critical parameters and exit.
    #[arg(long, value_name = "VERSION_ID")]
    check: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(path) = cli.database_path {
        config.database.path = path;
    }

    // Initialize logging
    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Experiment store starting..."
    );

    // Initialize storage
    let storage = match SqliteStorage::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            Arc::new(s)
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };

    // Initialize the alert sink when configured
    let sink: Option<Arc<dyn AlertSink>> = match &config.notifier {
        Some(notifier_config) => {
            match TelegramNotifier::new(notifier_config, config.request.clone()) {
                Ok(n) => {
                    info!(base_url = %n.base_url(), "Telegram notifier initialized");
                    Some(Arc::new(n))
                }
                Err(e) => {
                    error!(error = %e, "Failed to initialize Telegram notifier");
                    return Err(e.into());
                }
            }
        }
        None => {
            warn!("No Telegram credentials configured; alerts will only be logged");
            None
        }
    };

    let store = VersionStore::new(storage, sink.clone());

    // One-shot check mode
    if let Some(version_id) = cli.check {
        let alerts = store.check_critical_parameters(&version_id).await?;
        if alerts.is_empty() {
            info!(version_id = %version_id, "All critical parameters within range");
        } else {
            println!("{}", format_alert_message(&alerts));
        }
        return Ok(());
    }

    // Start the change-notification pipeline
    let pipeline = match store.start_pipeline(&config.listener, &config.request).await {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "Failed to start notification pipeline");
            return Err(e.into());
        }
    };

    if let Some(sink) = &sink {
        let message = format!(
            "🔔 *Experiment store started*\nVersion: {}",
            env!("CARGO_PKG_VERSION")
        );
        if let Err(e) = sink.send_notification(&message).await {
            warn!(error = %e, "Startup notification failed");
        }
    }

    info!("Store ready; watching for status changes");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    pipeline.listener.abort();
    pipeline.dispatcher.abort();

    info!("Shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        experiment_store::config::LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        experiment_store::config::LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
