//! Chain reconciler indexer CLI.
//!
//! Entry point for the indexer binary. Provides subcommands for:
//! - `run` - start the live ingestion/finality-reconciliation workers
//! - `backfill` - run the backward workers down to the configured targets
//! - `migrate` - run database migrations
//! - `version` - print the library version

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use chain_indexer::config::Settings;
use chain_indexer::error::Result;
use chain_indexer::supervisor::{Supervisor, install_signal_handlers};

/// Chain reconciler indexer.
#[derive(Parser, Debug)]
#[command(name = "chain-indexer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,

    /// Environment name, selects `config/{name}.toml` as an override layer
    /// on top of `config/default.toml`.
    #[arg(short, long, env = "INDEXER_ENV", default_value = "development")]
    environment: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the live indexer (forward block/milestone workers, priority-fee
    /// backfiller, health endpoint) until a shutdown signal arrives.
    Run,

    /// Run database migrations.
    Migrate {
        /// Revert migrations instead of applying them.
        #[arg(long)]
        revert: bool,
    },

    /// Run the backward workers down to `backfill.target_block` /
    /// `backfill.target_sequence`, then exit.
    Backfill,

    /// Show version information.
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Best-effort: a missing .env is normal in production where config
    // comes from the real environment.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Version/migrate-revert paths don't need full settings to answer, but
    // everything else loads settings up front so a bad config fails fast.
    if matches!(cli.command, Commands::Version) {
        println!("chain-indexer {}", chain_indexer::VERSION);
        return Ok(());
    }

    let settings = Settings::load(&cli.environment).map_err(|e| chain_indexer::error::AppError::Config(e.to_string()))?;
    let _log_guard = init_logging(&settings.logging);

    info!(version = chain_indexer::VERSION, environment = %cli.environment, "starting chain-indexer");

    if let Err(errors) = settings.validate() {
        for err in &errors {
            error!(error = %err, "invalid configuration");
        }
        return Err(chain_indexer::error::AppError::Config(errors.join("; ")));
    }

    match cli.command {
        Commands::Run => {
            let supervisor = Supervisor::new(settings).await?;
            let cancel = CancellationToken::new();
            let shutdown = install_signal_handlers();
            let supervisor_cancel = cancel.clone();

            tokio::select! {
                result = supervisor.run(cancel.clone()) => {
                    if let Err(err) = result {
                        error!(error = %err, "supervisor exited with an error");
                        return Err(err);
                    }
                }
                () = shutdown => {
                    supervisor_cancel.cancel();
                }
            }

            info!("chain-indexer stopped");
        }
        Commands::Migrate { revert } => {
            let supervisor = Supervisor::new(settings).await?;
            if revert {
                supervisor.revert_migrations().await?;
                info!("migrations reverted");
            } else {
                supervisor.migrate().await?;
                info!("migrations applied");
            }
        }
        Commands::Backfill => {
            let supervisor = Supervisor::new(settings).await?;
            let cancel = CancellationToken::new();
            let shutdown = install_signal_handlers();
            let supervisor_cancel = cancel.clone();

            tokio::select! {
                result = supervisor.backfill(cancel.clone()) => {
                    if let Err(err) = result {
                        error!(error = %err, "backfill exited with an error");
                        return Err(err);
                    }
                }
                () = shutdown => {
                    supervisor_cancel.cancel();
                }
            }

            info!("backfill stopped");
        }
        Commands::Version => unreachable!("handled above"),
    }

    Ok(())
}

/// Initialize the tracing subscriber from `settings`.
///
/// When `settings.file_path` is set, log lines are additionally written to a
/// daily-rotating file through a non-blocking writer; the returned guard must
/// stay alive for the process lifetime or buffered lines on that writer are
/// dropped instead of flushed.
fn init_logging(settings: &chain_indexer::config::LoggingSettings) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));

    let (file_layer, guard) = match &settings.file_path {
        Some(raw_path) => {
            let path = std::path::Path::new(raw_path);
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
            let filename = path.file_name().map_or_else(|| "chain-indexer.log".to_string(), |f| f.to_string_lossy().into_owned());
            let appender = tracing_appender::rolling::daily(dir, filename);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(non_blocking)), Some(guard))
        }
        None => (None, None),
    };

    if settings.format == "json" {
        let _ = tracing_subscriber::registry().with(filter).with(fmt::layer().json()).with(file_layer).try_init();
    } else {
        let _ = tracing_subscriber::registry().with(filter).with(fmt::layer()).with(file_layer).try_init();
    }

    guard
}
