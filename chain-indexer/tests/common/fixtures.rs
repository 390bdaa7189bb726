//! Test fixtures for integration tests.

use sqlx::PgPool;
use testcontainers::ContainerAsync;
use testcontainers::runners::AsyncRunner;

use super::containers::{TimescaleDb, build_connection_string};
use chain_indexer::store::PostgresStore;

/// A test database instance with pool and container.
///
/// The container is kept alive as long as this struct exists. When
/// dropped, the container is automatically stopped.
pub struct TestDb {
    /// The connection pool to the test database.
    pub pool: PgPool,
    /// The `PostgresStore` wrapping the pool.
    pub store: PostgresStore,
    /// The container (kept alive for the duration of the test).
    _container: ContainerAsync<TimescaleDb>,
}

impl TestDb {
    /// Create a new test database with a fresh TimescaleDB container, then
    /// run all migrations.
    ///
    /// # Panics
    /// Panics if container startup, connection, or migrations fail.
    pub async fn new() -> Self {
        let container = TimescaleDb::default().start().await.expect("failed to start TimescaleDB container");

        let host = container.get_host().await.expect("failed to get host");
        let port = container.get_host_port_ipv4(5432).await.expect("failed to get port");

        let connection_string = build_connection_string(&host.to_string(), port);
        let pool = connect_with_retries(&connection_string, 30).await.expect("failed to connect to database");

        let store = PostgresStore::new(pool.clone());
        store.run_migrations().await.expect("failed to run migrations");

        Self { pool, store, _container: container }
    }
}

/// Connect to the database with retries. TimescaleDB can take a moment to
/// be fully ready even after the "ready to accept connections" message
/// appears.
async fn connect_with_retries(url: &str, max_attempts: u32) -> Result<PgPool, sqlx::Error> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match PgPool::connect(url).await {
            Ok(pool) => match sqlx::query("SELECT 1").execute(&pool).await {
                Ok(_) => return Ok(pool),
                Err(e) if attempts < max_attempts => {
                    tracing::debug!("connection verify failed (attempt {attempts}): {e}");
                    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                }
                Err(e) => return Err(e),
            },
            Err(e) if attempts < max_attempts => {
                tracing::debug!("connection failed (attempt {attempts}): {e}");
                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Builders for [`chain_indexer::types::entities::Block`] rows.
pub mod block_fixtures {
    use chrono::Utc;

    use chain_indexer::types::entities::Block;
    use chain_indexer::types::primitives::BlockNumber;

    /// A block with complete priority-fee metrics (as the live path writes).
    #[must_use]
    pub fn enriched_block(number: u64, tx_count: u32) -> Block {
        Block {
            block_number: BlockNumber::new(number),
            block_hash: format!("0x{number:064x}"),
            parent_hash: format!("0x{:064x}", number.saturating_sub(1)),
            timestamp: Utc::now(),
            gas_used: 21_000 * u64::from(tx_count.max(1)),
            gas_limit: 30_000_000,
            tx_count,
            base_fee_gwei: 12.5,
            min_priority_fee_gwei: Some(1.0),
            max_priority_fee_gwei: Some(3.0),
            median_priority_fee_gwei: Some(2.0),
            avg_priority_fee_gwei: Some(2.1),
            total_priority_fee_gwei: Some(2.1 * f64::from(tx_count.max(1))),
            block_time_sec: Some(2.0),
            mgas_per_sec: Some(10.5),
            tps: Some(f64::from(tx_count) / 2.0),
            finalized: false,
            finalized_at: None,
            milestone_id: None,
            time_to_finality_sec: None,
        }
    }

    /// A block written by the backfiller path: tx-bearing but missing
    /// `avg`/`total` priority fee (spec's documented cross-path invariant).
    #[must_use]
    pub fn backfilled_block(number: u64, tx_count: u32) -> Block {
        let mut block = enriched_block(number, tx_count);
        block.avg_priority_fee_gwei = None;
        block.total_priority_fee_gwei = None;
        block
    }

    /// An empty block (no transactions, every priority-fee field null).
    #[must_use]
    pub fn empty_block(number: u64) -> Block {
        let mut block = enriched_block(number, 0);
        block.min_priority_fee_gwei = None;
        block.max_priority_fee_gwei = None;
        block.median_priority_fee_gwei = None;
        block.avg_priority_fee_gwei = None;
        block.total_priority_fee_gwei = None;
        block.tps = Some(0.0);
        block
    }
}

/// Builders for [`chain_indexer::types::entities::Milestone`] and
/// [`chain_indexer::types::entities::BlockFinality`] rows.
pub mod milestone_fixtures {
    use chrono::Utc;

    use chain_indexer::types::entities::{BlockFinality, Milestone};
    use chain_indexer::types::primitives::{BlockNumber, SequenceId};

    /// A milestone covering `[start_block, end_block]` at `sequence_id`.
    #[must_use]
    pub fn milestone(sequence_id: u64, start_block: u64, end_block: u64) -> Milestone {
        Milestone {
            sequence_id: SequenceId::new(sequence_id),
            milestone_id: end_block,
            start_block: BlockNumber::new(start_block),
            end_block: BlockNumber::new(end_block),
            hash: format!("0x{sequence_id:064x}"),
            proposer: Some(format!("0x{sequence_id:040x}")),
            timestamp: Utc::now(),
        }
    }

    /// A finality row for `block_number`, as written by the finality writer.
    #[must_use]
    pub fn block_finality(block_number: u64, milestone_id: u64) -> BlockFinality {
        BlockFinality { block_number: BlockNumber::new(block_number), milestone_id, finalized_at: Utc::now(), time_to_finality_sec: Some(4.0) }
    }
}
