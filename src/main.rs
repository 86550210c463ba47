use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use feedmail::{
    Config, Database, FeedReconciler, HttpFeedSource, ReconcilerOptions, Scheduler, SmtpMailer,
};

/// Poll RSS/Atom feeds and email new entries.
#[derive(Debug, Parser)]
#[command(name = "feedmail", version, about)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Run a single check cycle and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let config = match Config::load_with_env(&cli.config).and_then(|c| c.validate().map(|_| c)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {e}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };

    // Dropping the guard flushes buffered log lines, so it lives until exit
    let _log_guard = match feedmail::logging::init(&config.logging) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            feedmail::logging::init_console_only(&config.logging.level);
            None
        }
    };

    info!("feedmail {} starting", env!("CARGO_PKG_VERSION"));

    match run(config, cli.once).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config, once: bool) -> feedmail::Result<()> {
    let db = Arc::new(Database::open(&config.database.path).await?);
    info!("Database ready: {}", config.database.path);

    let source = HttpFeedSource::new(&config.fetch)?;
    let mailer = SmtpMailer::new(&config.smtp)?;
    let options = ReconcilerOptions {
        send_delay: config.feeds.send_delay(),
        base_interval: config.feeds.check_interval(),
    };

    let reconciler = FeedReconciler::new(Arc::clone(&db), source, mailer, options);
    let scheduler = Scheduler::new(
        reconciler,
        config.feeds.urls.clone(),
        config.feeds.check_interval(),
    )
    .with_retention_days(config.database.retention_days);

    if once {
        scheduler.run_once().await;
    } else {
        scheduler.run(shutdown_signal()).await;
    }

    db.close().await;
    info!("feedmail stopped");
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
