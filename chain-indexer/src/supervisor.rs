//! Worker wiring, health endpoint, and graceful shutdown (spec §4.15, §6,
//! §7).
//!
//! [`Supervisor`] owns the shared clients and store, constructs every
//! worker, and spawns them as independent tasks under one
//! [`CancellationToken`]. `run` drives the live topology (forward workers
//! plus the priority-fee backfiller) until a shutdown signal arrives;
//! `backfill` drives a one-shot pass of the backward workers down to a
//! configured target and returns once they are done.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use oracle_client::OracleClient;
use rpc_client::RpcClient;
use serde_json::json;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::{ApiError, InfraError, Result};
use crate::indexer::{
    BlockBackfiller, BlockBackfillerConfig, BlockIndexer, BlockIndexerConfig, EnrichOptions, Enricher, FinalityWriter, MilestoneBackfiller,
    MilestoneBackfillerConfig, MilestoneIndexer, MilestoneIndexerConfig, PriorityFeeBackfiller, PriorityFeeBackfillerConfig, RealtimePush,
};
use crate::ports::WorkerStatusStore;
use crate::store::PostgresStore;

/// Longest the supervisor waits for workers to drain after a shutdown
/// signal before giving up and returning anyway (spec §5).
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Wires together the shared clients, the store, and every worker.
pub struct Supervisor {
    store: PostgresStore,
    rpc: Arc<RpcClient>,
    oracle: Arc<OracleClient>,
    settings: Settings,
}

impl Supervisor {
    /// Build the supervisor's shared clients and connection pool from
    /// `settings`.
    ///
    /// # Errors
    /// Returns an error if the RPC/oracle clients or the database pool
    /// cannot be constructed.
    pub async fn new(settings: Settings) -> Result<Self> {
        let rpc = Arc::new(RpcClient::with_config(
            rpc_client::ClientConfig::new(settings.rpc.endpoints.clone())
                .with_max_retries(settings.rpc.max_retries)
                .with_retry_delay(settings.rpc.retry_delay())
                .with_timeout(settings.rpc.request_timeout())
                .with_max_parallel(settings.rpc.max_parallel),
        )?);
        let oracle = Arc::new(OracleClient::with_config(
            oracle_client::ClientConfig::new(settings.oracle.endpoints.clone())
                .with_max_attempts(settings.oracle.max_attempts)
                .with_timeout(settings.oracle.request_timeout())
                .with_max_parallel(settings.oracle.max_parallel),
        )?);

        let statement_timeout_ms = settings.database.statement_timeout_ms;
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(settings.database.max_connections)
            .min_connections(settings.database.min_connections)
            .acquire_timeout(settings.database.connect_timeout())
            .idle_timeout(settings.database.idle_timeout())
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    sqlx::query(&format!("SET statement_timeout = {statement_timeout_ms}"))
                        .execute(conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(&settings.database.url)
            .await
            .map_err(InfraError::Database)?;
        let store = PostgresStore::new(pool);

        Ok(Self { store, rpc, oracle, settings })
    }

    /// Run pending migrations against the configured database.
    ///
    /// # Errors
    /// Returns an error if the migration runner fails.
    pub async fn migrate(&self) -> Result<()> {
        self.store.run_migrations().await
    }

    /// Revert every applied migration against the configured database.
    ///
    /// # Errors
    /// Returns an error if the migration runner fails.
    pub async fn revert_migrations(&self) -> Result<()> {
        self.store.revert_migrations().await
    }

    /// Install the global Prometheus recorder and start its scrape listener,
    /// if `settings.metrics.enabled`. A no-op on the second call within the
    /// same process since `run`/`backfill` are never both invoked together.
    fn install_metrics_exporter(&self) -> Result<()> {
        if !self.settings.metrics.enabled {
            return Ok(());
        }
        let addr: std::net::SocketAddr = self
            .settings
            .metrics
            .socket_addr()
            .parse()
            .map_err(|e| crate::error::AppError::Config(format!("invalid metrics.host/metrics.port: {e}")))?;

        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| crate::error::AppError::Initialization(format!("failed to start metrics exporter on {addr}: {e}")))?;
        info!(%addr, "metrics exporter listening");
        Ok(())
    }

    fn realtime_push(&self) -> Result<Option<Arc<RealtimePush>>> {
        if !self.settings.realtime.enabled {
            return Ok(None);
        }
        let endpoint = self
            .settings
            .realtime
            .endpoint
            .clone()
            .ok_or_else(|| crate::error::AppError::Config("realtime.enabled is true but realtime.endpoint is unset".into()))?;
        let push = RealtimePush::new(endpoint, self.settings.realtime.timeout())
            .map_err(|e| crate::error::AppError::Initialization(format!("failed to build realtime push client: {e}")))?;
        Ok(Some(Arc::new(push)))
    }

    fn finality_writer(&self, push: Option<Arc<RealtimePush>>) -> Arc<FinalityWriter<PostgresStore>> {
        Arc::new(FinalityWriter::new(self.store.clone(), push, self.settings.workers.finality_window()))
    }

    /// Scale a configured base batch size by the RPC endpoint pool so
    /// per-endpoint load stays uniform as the pool grows (spec §5).
    fn rpc_batch_size(&self, base: u64) -> u64 {
        crate::util::scaled_batch_size(base, self.rpc.endpoints().len())
    }

    /// Same as [`Self::rpc_batch_size`] but scaled by the oracle endpoint pool.
    fn oracle_batch_size(&self, base: u64) -> u64 {
        crate::util::scaled_batch_size(base, self.oracle.endpoints().len())
    }

    /// Run the live topology: the forward block/milestone indexers, the
    /// historical priority-fee backfiller, and the health endpoint. Blocks
    /// until `cancel` fires or a worker task panics, then waits up to
    /// [`SHUTDOWN_GRACE_PERIOD`] for the rest to drain.
    ///
    /// # Errors
    /// Returns an error if the health listener cannot bind.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.install_metrics_exporter()?;

        let push = self.realtime_push()?;
        let finality = self.finality_writer(push.clone());

        let enricher = Arc::new(Enricher::new(self.rpc.clone(), self.settings.workers.enrichment_deadline()));
        let enrich_options = EnrichOptions { push };

        let block_indexer = BlockIndexer::new(
            self.store.clone(),
            self.rpc.clone(),
            enricher,
            enrich_options,
            BlockIndexerConfig {
                batch_size: self.rpc_batch_size(self.settings.workers.block_batch_size),
                poll_interval: self.settings.workers.block_poll_interval(),
                fast_poll_interval: self.settings.workers.fast_poll_interval(),
                lag_threshold_blocks: self.settings.workers.lag_threshold_blocks,
                worker_error_sleep: self.settings.workers.worker_error_sleep(),
                max_reorg_depth: self.settings.workers.max_reorg_depth,
                keep_blocks: self.settings.workers.keep_blocks,
            },
        );

        let milestone_indexer = MilestoneIndexer::new(
            self.store.clone(),
            self.oracle.clone(),
            finality.clone(),
            MilestoneIndexerConfig {
                batch_size: self.oracle_batch_size(self.settings.workers.milestone_batch_size),
                poll_interval: self.settings.workers.milestone_poll_interval(),
                worker_error_sleep: self.settings.workers.worker_error_sleep(),
            },
        );

        let priority_fee_backfiller = PriorityFeeBackfiller::new(
            self.store.clone(),
            self.rpc.clone(),
            PriorityFeeBackfillerConfig {
                batch_size: self.rpc_batch_size(self.settings.workers.priority_fee_batch_size),
                poll_interval: self.settings.workers.milestone_poll_interval(),
                worker_error_sleep: self.settings.workers.worker_error_sleep(),
                target_block: 0,
            },
        );

        let mut tasks = JoinSet::new();
        {
            let cancel = cancel.clone();
            tasks.spawn(async move { block_indexer.run(cancel).await });
        }
        {
            let cancel = cancel.clone();
            tasks.spawn(async move { milestone_indexer.run(cancel).await });
        }
        {
            let cancel = cancel.clone();
            tasks.spawn(async move { priority_fee_backfiller.run(cancel).await });
        }

        let health_cancel = cancel.clone();
        let health_store = self.store.clone();
        let health_addr = self.settings.health.socket_addr();
        tasks.spawn(async move { serve_health(health_store, health_addr, health_cancel).await });

        wait_for_shutdown(&mut tasks, cancel).await;
        Ok(())
    }

    /// Run the backward workers (block, milestone, priority-fee) down to
    /// the configured backfill targets, returning once every backfiller
    /// reports idle at its target.
    ///
    /// # Errors
    /// Returns an error if the health listener cannot bind.
    pub async fn backfill(&self, cancel: CancellationToken) -> Result<()> {
        self.install_metrics_exporter()?;

        let finality = self.finality_writer(None);

        let target_block = self.settings.backfill.target_block.map_or(0, |v| v.max(0) as u64);
        let target_sequence = self.settings.backfill.target_sequence.map_or(0, |v| v.max(0) as u64);

        let block_backfiller = BlockBackfiller::new(
            self.store.clone(),
            self.rpc.clone(),
            BlockBackfillerConfig {
                batch_size: self.rpc_batch_size(self.settings.workers.block_batch_size),
                poll_interval: self.settings.workers.block_poll_interval(),
                worker_error_sleep: self.settings.workers.worker_error_sleep(),
                target_block,
            },
        );

        let milestone_backfiller = MilestoneBackfiller::new(
            self.store.clone(),
            self.oracle.clone(),
            finality.clone(),
            MilestoneBackfillerConfig {
                batch_size: self.oracle_batch_size(self.settings.workers.milestone_batch_size),
                poll_interval: self.settings.workers.milestone_poll_interval(),
                worker_error_sleep: self.settings.workers.worker_error_sleep(),
                target_sequence,
            },
        );

        let priority_fee_backfiller = PriorityFeeBackfiller::new(
            self.store.clone(),
            self.rpc.clone(),
            PriorityFeeBackfillerConfig {
                batch_size: self.rpc_batch_size(self.settings.workers.priority_fee_batch_size),
                poll_interval: self.settings.workers.milestone_poll_interval(),
                worker_error_sleep: self.settings.workers.worker_error_sleep(),
                target_block,
            },
        );

        let mut tasks = JoinSet::new();
        {
            let cancel = cancel.clone();
            tasks.spawn(async move { block_backfiller.run(cancel).await });
        }
        {
            let cancel = cancel.clone();
            tasks.spawn(async move { milestone_backfiller.run(cancel).await });
        }
        {
            let cancel = cancel.clone();
            tasks.spawn(async move { priority_fee_backfiller.run(cancel).await });
        }

        wait_for_shutdown(&mut tasks, cancel).await;
        Ok(())
    }
}

/// Awaits worker tasks until `cancel` fires (from [`install_signal_handlers`]
/// or a caller), then gives them [`SHUTDOWN_GRACE_PERIOD`] to drain before
/// returning regardless of how many are still running.
async fn wait_for_shutdown(tasks: &mut JoinSet<Result<()>>, cancel: CancellationToken) {
    tokio::select! {
        () = cancel.cancelled() => {
            info!("shutdown requested, draining workers");
        }
        Some(result) = tasks.join_next() => {
            warn!(?result, "a worker task exited on its own, initiating shutdown");
            cancel.cancel();
        }
    }

    let drain = async {
        while let Some(result) = tasks.join_next().await {
            if let Err(err) = result {
                warn!(error = %err, "worker task panicked during shutdown");
            }
        }
    };

    if tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, drain).await.is_err() {
        warn!("workers did not drain within the grace period, forcing exit");
        tasks.abort_all();
    }
}

/// Installs SIGINT/SIGTERM handlers and returns a future that resolves once
/// either fires.
pub fn install_signal_handlers() -> impl Future<Output = ()> {
    async {
        let ctrl_c = async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to install ctrl-c handler");
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(err) => warn!(error = %err, "failed to install sigterm handler"),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => warn!("received ctrl-c, initiating graceful shutdown"),
            () = terminate => warn!("received sigterm, initiating graceful shutdown"),
        }
    }
}

#[derive(Clone)]
struct HealthState {
    store: PostgresStore,
}

async fn serve_health(store: PostgresStore, addr: String, cancel: CancellationToken) -> Result<()> {
    let state = HealthState { store };
    let app = Router::new().route("/", get(health_handler)).with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| crate::error::AppError::Initialization(format!("failed to bind health listener on {addr}: {e}")))?;
    info!(%addr, "health endpoint listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| crate::error::AppError::Initialization(format!("health server error: {e}")))?;

    Ok(())
}

async fn health_handler(State(state): State<HealthState>) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    let statuses = state.store.all_worker_statuses().await.map_err(crate::error::AppError::from)?;

    // Spec: healthy (200) as long as at least one worker reports running or
    // idle; 503 only once every worker has stopped or errored out.
    if !statuses.iter().any(|s| s.state.is_healthy()) {
        let states: Vec<String> = statuses.iter().map(|s| format!("{}={:?}", s.worker_name, s.state)).collect();
        return Err(ApiError::Unhealthy(format!("no worker reports running or idle: {}", states.join(", "))));
    }

    Ok(Json(json!({
        "status": "ok",
        "workers": statuses,
    })))
}
