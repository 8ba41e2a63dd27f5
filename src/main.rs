use std::{process, sync::Arc};

use archive_purger::{
    config::PurgerConfig,
    db::DbPool,
    observability,
    purger::ReportsPurger,
    retention::{self, resolve_policy},
};
use clap::Parser;
use tokio_util::sync::CancellationToken;

/// CLI arguments for the archive purger
#[derive(Parser, Debug)]
#[command(version, about = "Purge old archived analytics reports", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to config file
    #[arg(short, long, global = true, default_value = "purger.toml")]
    config: String,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Purge old archives once and exit
    ///
    /// Honors `retention.safety.dry_run`, in which case only an estimate is logged.
    Purge {
        /// Optimize trimmed tables afterwards, even if the config does not
        #[arg(long)]
        optimize: bool,
    },
    /// Print what a purge would remove, without changing anything
    ///
    /// Each line is a table name and either a row count or -1 for a table
    /// that would be dropped.
    Estimate {
        /// Print the estimate as a JSON object
        #[arg(long)]
        json: bool,
    },
    /// Run the scheduled purge worker until interrupted
    Worker,
    /// Run database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match PurgerConfig::from_file(&args.config) {
        Ok(c) => c,
        Err(e) => fail(format!("Failed to load config from {}: {}", args.config, e)),
    };

    if let Err(e) = observability::init_tracing(&config.observability) {
        fail(format!("Failed to initialize tracing: {e}"));
    }

    let db = match DbPool::from_config(&config.database).await {
        Ok(db) => db,
        Err(e) => fail(format!("Failed to connect to database: {e}")),
    };

    if (matches!(args.command, Command::Migrate) || config.database.run_migrations())
        && let Err(e) = db.run_migrations().await
    {
        fail(format!("Failed to run migrations: {e}"));
    }

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown(cancel.clone()));

    match args.command {
        Command::Migrate => tracing::info!("Migrations complete"),
        Command::Purge { optimize } => run_purge(&db, config, optimize, &cancel).await,
        Command::Estimate { json } => run_estimate(&db, &config, json, &cancel).await,
        Command::Worker => run_worker(db, config, cancel).await,
    }
}

async fn run_purge(
    db: &DbPool,
    mut config: PurgerConfig,
    optimize: bool,
    cancel: &CancellationToken,
) {
    config.retention.safety.optimize_tables |= optimize;

    match retention::run_purge(db, &config.retention, cancel).await {
        Ok(result) => tracing::info!(
            tables_dropped = result.tables_dropped,
            rows_deleted = result.rows_deleted,
            tables_optimized = result.tables_optimized,
            dry_run = result.estimate.is_some(),
            "Purge complete"
        ),
        Err(e) => fail(format!("Purge failed: {e}")),
    }
}

async fn run_estimate(
    db: &DbPool,
    config: &PurgerConfig,
    json: bool,
    cancel: &CancellationToken,
) {
    let policy = match resolve_policy(db.options().as_ref(), &config.retention).await {
        Ok(p) => p,
        Err(e) => fail(format!("Invalid retention policy: {e}")),
    };
    let purger = ReportsPurger::new(db.archives(), policy).with_cancellation(cancel.clone());

    let estimate = match purger.estimate().await {
        Ok(e) => e,
        Err(e) => fail(format!("Estimate failed: {e}")),
    };

    if json {
        match serde_json::to_string_pretty(&estimate) {
            Ok(out) => println!("{out}"),
            Err(e) => fail(format!("Failed to serialize estimate: {e}")),
        }
    } else {
        for (table, value) in estimate.iter() {
            println!("{table}\t{}", value.as_legacy_value());
        }
    }
}

async fn run_worker(db: DbPool, config: PurgerConfig, cancel: CancellationToken) {
    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::warn!(error = %e, "Failed to initialize metrics");
    }

    if !config.retention.enabled {
        tracing::warn!("retention.enabled is false; the worker has nothing to do");
    }

    retention::start_purge_worker(Arc::new(db), config.retention, cancel).await;
}

/// Cancels `cancel` on Ctrl+C or SIGTERM. In-flight purges stop between
/// batches.
async fn cancel_on_shutdown(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::warn!(error = %e, "Failed to install signal handler");
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

    tracing::info!("Shutdown signal received, stopping after the current batch");
    cancel.cancel();
}

fn fail(message: String) -> ! {
    eprintln!("Error: {message}");
    process::exit(1);
}
