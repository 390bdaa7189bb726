//! PostgreSQL implementation of store ports using SQLx.
//!
//! # Type Conversions
//!
//! PostgreSQL uses signed integers for numeric columns while our domain
//! uses unsigned types. These casts are safe because:
//! - Block numbers and sequence ids won't exceed `i64::MAX`.
//! - Counts won't exceed `i64::MAX`.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless,
    clippy::use_self
)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, postgres::PgPool};
use tracing::instrument;

use crate::error::{InfraError, Result};
use crate::ports::{
    BlockStore, ConflictPolicy, FinalityStore, IndexerStateStore, MilestoneStore, StatsStore,
    WorkerStatusStore,
};
use crate::types::entities::{
    Block, BlockFinality, Milestone, TableStats, WorkerState, WorkerStatus,
};
use crate::types::primitives::BlockNumber;
use crate::util::SUSPECT_BLOCK_TIME_SECS;

// ═══════════════════════════════════════════════════════════════════════════════
// POSTGRES STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// PostgreSQL-based store implementation, backing every store port.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations.
    ///
    /// # Errors
    /// Returns an error if migrations fail.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| InfraError::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Revert every applied migration, in reverse order, down to an empty
    /// schema.
    ///
    /// # Errors
    /// Returns an error if any migration has no `.down.sql` counterpart or
    /// the revert itself fails.
    pub async fn revert_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .undo(&self.pool, 0)
            .await
            .map_err(|e| InfraError::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BLOCK STORE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, FromRow)]
struct BlockRow {
    block_number: i64,
    block_hash: String,
    parent_hash: String,
    timestamp: DateTime<Utc>,
    gas_used: i64,
    gas_limit: i64,
    tx_count: i32,
    base_fee_gwei: f64,
    min_priority_fee_gwei: Option<f64>,
    max_priority_fee_gwei: Option<f64>,
    median_priority_fee_gwei: Option<f64>,
    avg_priority_fee_gwei: Option<f64>,
    total_priority_fee_gwei: Option<f64>,
    block_time_sec: Option<f64>,
    mgas_per_sec: Option<f64>,
    tps: Option<f64>,
    finalized: bool,
    finalized_at: Option<DateTime<Utc>>,
    milestone_id: Option<i64>,
    time_to_finality_sec: Option<f64>,
}

impl From<BlockRow> for Block {
    fn from(row: BlockRow) -> Self {
        Self {
            block_number: BlockNumber::new(row.block_number as u64),
            block_hash: row.block_hash,
            parent_hash: row.parent_hash,
            timestamp: row.timestamp,
            gas_used: row.gas_used as u64,
            gas_limit: row.gas_limit as u64,
            tx_count: row.tx_count as u32,
            base_fee_gwei: row.base_fee_gwei,
            min_priority_fee_gwei: row.min_priority_fee_gwei,
            max_priority_fee_gwei: row.max_priority_fee_gwei,
            median_priority_fee_gwei: row.median_priority_fee_gwei,
            avg_priority_fee_gwei: row.avg_priority_fee_gwei,
            total_priority_fee_gwei: row.total_priority_fee_gwei,
            block_time_sec: row.block_time_sec,
            mgas_per_sec: row.mgas_per_sec,
            tps: row.tps,
            finalized: row.finalized,
            finalized_at: row.finalized_at,
            milestone_id: row.milestone_id.map(|v| v as u64),
            time_to_finality_sec: row.time_to_finality_sec,
        }
    }
}

#[async_trait]
impl BlockStore for PostgresStore {
    #[instrument(skip(self, blocks), fields(count = blocks.len()))]
    async fn insert_blocks(&self, blocks: &[Block], policy: ConflictPolicy) -> Result<u64> {
        if blocks.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;
        let mut inserted = 0_u64;
        for block in blocks {
            let conflict_clause = match policy {
                ConflictPolicy::DoNothing => "ON CONFLICT (timestamp, block_number) DO NOTHING".to_string(),
                ConflictPolicy::DoUpdate => format!(
                    "ON CONFLICT (timestamp, block_number) DO UPDATE SET \
                     block_hash = EXCLUDED.block_hash, \
                     parent_hash = EXCLUDED.parent_hash, \
                     gas_used = EXCLUDED.gas_used, \
                     gas_limit = EXCLUDED.gas_limit, \
                     tx_count = EXCLUDED.tx_count, \
                     base_fee_gwei = EXCLUDED.base_fee_gwei, \
                     min_priority_fee_gwei = EXCLUDED.min_priority_fee_gwei, \
                     max_priority_fee_gwei = EXCLUDED.max_priority_fee_gwei, \
                     median_priority_fee_gwei = EXCLUDED.median_priority_fee_gwei, \
                     avg_priority_fee_gwei = EXCLUDED.avg_priority_fee_gwei, \
                     total_priority_fee_gwei = EXCLUDED.total_priority_fee_gwei, \
                     block_time_sec = CASE \
                         WHEN blocks.block_time_sec IS NULL OR blocks.block_time_sec > {suspect} \
                         THEN COALESCE(EXCLUDED.block_time_sec, blocks.block_time_sec) \
                         ELSE blocks.block_time_sec END, \
                     mgas_per_sec = CASE \
                         WHEN blocks.block_time_sec IS NULL OR blocks.block_time_sec > {suspect} \
                         THEN COALESCE(EXCLUDED.mgas_per_sec, blocks.mgas_per_sec) \
                         ELSE blocks.mgas_per_sec END, \
                     tps = CASE \
                         WHEN blocks.block_time_sec IS NULL OR blocks.block_time_sec > {suspect} \
                         THEN COALESCE(EXCLUDED.tps, blocks.tps) \
                         ELSE blocks.tps END",
                    suspect = SUSPECT_BLOCK_TIME_SECS
                )
            };
            let query = format!(
                "INSERT INTO blocks (
                    block_number, block_hash, parent_hash, timestamp, gas_used, gas_limit,
                    tx_count, base_fee_gwei, min_priority_fee_gwei, max_priority_fee_gwei,
                    median_priority_fee_gwei, avg_priority_fee_gwei, total_priority_fee_gwei,
                    block_time_sec, mgas_per_sec, tps, finalized, finalized_at, milestone_id,
                    time_to_finality_sec
                ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20)
                {conflict_clause}"
            );
            let result = sqlx::query(&query)
                .bind(i64::from(block.block_number))
                .bind(&block.block_hash)
                .bind(&block.parent_hash)
                .bind(block.timestamp)
                .bind(block.gas_used as i64)
                .bind(block.gas_limit as i64)
                .bind(block.tx_count as i32)
                .bind(block.base_fee_gwei)
                .bind(block.min_priority_fee_gwei)
                .bind(block.max_priority_fee_gwei)
                .bind(block.median_priority_fee_gwei)
                .bind(block.avg_priority_fee_gwei)
                .bind(block.total_priority_fee_gwei)
                .bind(block.block_time_sec)
                .bind(block.mgas_per_sec)
                .bind(block.tps)
                .bind(block.finalized)
                .bind(block.finalized_at)
                .bind(block.milestone_id.map(|v| v as i64))
                .bind(block.time_to_finality_sec)
                .execute(&mut *tx)
                .await
                .map_err(InfraError::Database)?;
            inserted += result.rows_affected();
        }
        tx.commit().await.map_err(InfraError::Database)?;
        Ok(inserted)
    }

    #[instrument(skip(self))]
    async fn max_block_number(&self) -> Result<Option<BlockNumber>> {
        let row: Option<i64> = sqlx::query_scalar("SELECT MAX(block_number) FROM blocks")
            .fetch_one(&self.pool)
            .await
            .map_err(InfraError::Database)?;
        Ok(row.map(|n| BlockNumber::new(n as u64)))
    }

    #[instrument(skip(self))]
    async fn min_block_number(&self) -> Result<Option<BlockNumber>> {
        let row: Option<i64> = sqlx::query_scalar("SELECT MIN(block_number) FROM blocks")
            .fetch_one(&self.pool)
            .await
            .map_err(InfraError::Database)?;
        Ok(row.map(|n| BlockNumber::new(n as u64)))
    }

    #[instrument(skip(self, block_numbers), fields(count = block_numbers.len()))]
    async fn block_timestamps(
        &self,
        block_numbers: &[BlockNumber],
    ) -> Result<Vec<(BlockNumber, DateTime<Utc>)>> {
        if block_numbers.is_empty() {
            return Ok(Vec::new());
        }
        let numbers: Vec<i64> = block_numbers.iter().map(|b| i64::from(*b)).collect();
        let rows: Vec<(i64, DateTime<Utc>)> = sqlx::query_as(
            "SELECT block_number, timestamp FROM blocks WHERE block_number = ANY($1)",
        )
        .bind(&numbers)
        .fetch_all(&self.pool)
        .await
        .map_err(InfraError::Database)?;
        Ok(rows
            .into_iter()
            .map(|(n, ts)| (BlockNumber::new(n as u64), ts))
            .collect())
    }

    #[instrument(skip(self))]
    async fn blocks_missing_priority_fee(
        &self,
        from: BlockNumber,
        to: BlockNumber,
        limit: u32,
    ) -> Result<Vec<Block>> {
        let rows = sqlx::query_as::<_, BlockRow>(
            "SELECT block_number, block_hash, parent_hash, timestamp, gas_used, gas_limit,
                    tx_count, base_fee_gwei, min_priority_fee_gwei, max_priority_fee_gwei,
                    median_priority_fee_gwei, avg_priority_fee_gwei, total_priority_fee_gwei,
                    block_time_sec, mgas_per_sec, tps, finalized, finalized_at, milestone_id,
                    time_to_finality_sec
             FROM blocks
             WHERE block_number BETWEEN $1 AND $2
               AND tx_count > 0
               AND (avg_priority_fee_gwei IS NULL OR total_priority_fee_gwei IS NULL)
             ORDER BY block_number ASC
             LIMIT $3",
        )
        .bind(i64::from(from))
        .bind(i64::from(to))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(InfraError::Database)?;
        Ok(rows.into_iter().map(Block::from).collect())
    }

    #[instrument(skip(self, blocks), fields(count = blocks.len()))]
    async fn update_priority_fee_metrics(&self, blocks: &[Block]) -> Result<()> {
        if blocks.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;
        for block in blocks {
            sqlx::query(
                "UPDATE blocks SET
                    min_priority_fee_gwei = $2,
                    max_priority_fee_gwei = $3,
                    median_priority_fee_gwei = $4,
                    avg_priority_fee_gwei = $5,
                    total_priority_fee_gwei = $6
                 WHERE block_number = $1",
            )
            .bind(i64::from(block.block_number))
            .bind(block.min_priority_fee_gwei)
            .bind(block.max_priority_fee_gwei)
            .bind(block.median_priority_fee_gwei)
            .bind(block.avg_priority_fee_gwei)
            .bind(block.total_priority_fee_gwei)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        }
        tx.commit().await.map_err(InfraError::Database)?;
        Ok(())
    }

    #[instrument(skip(self, finality))]
    async fn reconcile_finality_within_window(
        &self,
        window: chrono::Duration,
        finality: &[BlockFinality],
    ) -> Result<u64> {
        if finality.is_empty() {
            return Ok(0);
        }
        let cutoff = Utc::now() - window;
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;
        let mut updated = 0_u64;
        for row in finality {
            let result = sqlx::query(
                "UPDATE blocks SET
                    finalized = true,
                    finalized_at = $2,
                    milestone_id = $3,
                    time_to_finality_sec = $4
                 WHERE block_number = $1 AND timestamp >= $5",
            )
            .bind(i64::from(row.block_number))
            .bind(row.finalized_at)
            .bind(row.milestone_id as i64)
            .bind(row.time_to_finality_sec)
            .bind(cutoff)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
            updated += result.rows_affected();
        }
        tx.commit().await.map_err(InfraError::Database)?;
        Ok(updated)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MILESTONE STORE
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl MilestoneStore for PostgresStore {
    #[instrument(skip(self), fields(sequence_id = %milestone.sequence_id))]
    async fn insert_milestone(&self, milestone: &Milestone) -> Result<()> {
        sqlx::query(
            "INSERT INTO milestones
                (sequence_id, milestone_id, start_block, end_block, hash, proposer, timestamp)
             VALUES ($1,$2,$3,$4,$5,$6,$7)
             ON CONFLICT (sequence_id) DO NOTHING",
        )
        .bind(i64::from(milestone.sequence_id))
        .bind(milestone.milestone_id as i64)
        .bind(i64::from(milestone.start_block))
        .bind(i64::from(milestone.end_block))
        .bind(&milestone.hash)
        .bind(&milestone.proposer)
        .bind(milestone.timestamp)
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn max_sequence_id(&self) -> Result<Option<u64>> {
        let row: Option<i64> = sqlx::query_scalar("SELECT MAX(sequence_id) FROM milestones")
            .fetch_one(&self.pool)
            .await
            .map_err(InfraError::Database)?;
        Ok(row.map(|n| n as u64))
    }

    #[instrument(skip(self))]
    async fn min_sequence_id(&self) -> Result<Option<u64>> {
        let row: Option<i64> = sqlx::query_scalar("SELECT MIN(sequence_id) FROM milestones")
            .fetch_one(&self.pool)
            .await
            .map_err(InfraError::Database)?;
        Ok(row.map(|n| n as u64))
    }

    #[instrument(skip(self))]
    async fn sequence_id_exists(&self, sequence_id: u64) -> Result<bool> {
        let row: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM milestones WHERE sequence_id = $1")
                .bind(sequence_id as i64)
                .fetch_optional(&self.pool)
                .await
                .map_err(InfraError::Database)?;
        Ok(row.is_some())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FINALITY STORE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, FromRow)]
struct FinalityRow {
    block_number: i64,
    milestone_id: i64,
    finalized_at: DateTime<Utc>,
    time_to_finality_sec: Option<f64>,
}

impl From<FinalityRow> for BlockFinality {
    fn from(row: FinalityRow) -> Self {
        Self {
            block_number: BlockNumber::new(row.block_number as u64),
            milestone_id: row.milestone_id as u64,
            finalized_at: row.finalized_at,
            time_to_finality_sec: row.time_to_finality_sec,
        }
    }
}

#[async_trait]
impl FinalityStore for PostgresStore {
    #[instrument(skip(self, rows), fields(count = rows.len()))]
    async fn upsert_finality(&self, rows: &[BlockFinality]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;
        for row in rows {
            // Preserve the earliest accurate time_to_finality_sec: only
            // overwrite it when the stored value is null and the new one
            // is not (spec §4.10 step 3, §8 property 5).
            sqlx::query(
                "INSERT INTO block_finality
                    (block_number, milestone_id, finalized_at, time_to_finality_sec)
                 VALUES ($1,$2,$3,$4)
                 ON CONFLICT (block_number) DO UPDATE SET
                    time_to_finality_sec = COALESCE(
                        block_finality.time_to_finality_sec,
                        EXCLUDED.time_to_finality_sec
                    )",
            )
            .bind(i64::from(row.block_number))
            .bind(row.milestone_id as i64)
            .bind(row.finalized_at)
            .bind(row.time_to_finality_sec)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        }
        tx.commit().await.map_err(InfraError::Database)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_finality(&self, block_number: BlockNumber) -> Result<Option<BlockFinality>> {
        let row = sqlx::query_as::<_, FinalityRow>(
            "SELECT block_number, milestone_id, finalized_at, time_to_finality_sec
             FROM block_finality WHERE block_number = $1",
        )
        .bind(i64::from(block_number))
        .fetch_optional(&self.pool)
        .await
        .map_err(InfraError::Database)?;
        Ok(row.map(BlockFinality::from))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INDEXER STATE STORE
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl IndexerStateStore for PostgresStore {
    #[instrument(skip(self))]
    async fn get_cursor(&self, service_name: &str) -> Result<Option<(u64, Option<String>)>> {
        let row: Option<(i64, Option<String>)> = sqlx::query_as(
            "SELECT last_position, last_hash FROM indexer_state WHERE service_name = $1",
        )
        .bind(service_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(InfraError::Database)?;
        Ok(row.map(|(pos, hash)| (pos as u64, hash)))
    }

    #[instrument(skip(self))]
    async fn set_cursor(
        &self,
        service_name: &str,
        position: u64,
        hash: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO indexer_state (service_name, last_position, last_hash, updated_at)
             VALUES ($1,$2,$3,NOW())
             ON CONFLICT (service_name) DO UPDATE SET
                last_position = EXCLUDED.last_position,
                last_hash = EXCLUDED.last_hash,
                updated_at = NOW()",
        )
        .bind(service_name)
        .bind(position as i64)
        .bind(hash)
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn insert_block_hash(
        &self,
        block: BlockNumber,
        hash: &str,
        parent: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO block_hashes (block_number, hash, parent_hash, timestamp)
             VALUES ($1,$2,$3,$4)
             ON CONFLICT (block_number) DO UPDATE SET
                hash = EXCLUDED.hash,
                parent_hash = EXCLUDED.parent_hash,
                timestamp = EXCLUDED.timestamp",
        )
        .bind(i64::from(block))
        .bind(hash)
        .bind(parent)
        .bind(timestamp)
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_block_hash(&self, block: BlockNumber) -> Result<Option<String>> {
        let row: Option<String> =
            sqlx::query_scalar("SELECT hash FROM block_hashes WHERE block_number = $1")
                .bind(i64::from(block))
                .fetch_optional(&self.pool)
                .await
                .map_err(InfraError::Database)?;
        Ok(row)
    }

    #[instrument(skip(self))]
    async fn archive_reorged_block(
        &self,
        block: BlockNumber,
        replaced_by_hash: &str,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;
        sqlx::query(
            "INSERT INTO reorged_blocks
                (block_number, block_hash, parent_hash, timestamp, reorged_at, replaced_by_hash)
             SELECT block_number, block_hash, parent_hash, timestamp, NOW(), $2
             FROM blocks WHERE block_number = $1",
        )
        .bind(i64::from(block))
        .bind(replaced_by_hash)
        .execute(&mut *tx)
        .await
        .map_err(InfraError::Database)?;
        sqlx::query("DELETE FROM blocks WHERE block_number = $1")
            .bind(i64::from(block))
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        sqlx::query("DELETE FROM block_hashes WHERE block_number = $1")
            .bind(i64::from(block))
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        tx.commit().await.map_err(InfraError::Database)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn is_finalized(&self, block: BlockNumber) -> Result<bool> {
        let row: Option<bool> =
            sqlx::query_scalar("SELECT finalized FROM blocks WHERE block_number = $1")
                .bind(i64::from(block))
                .fetch_optional(&self.pool)
                .await
                .map_err(InfraError::Database)?;
        Ok(row.unwrap_or(false))
    }

    #[instrument(skip(self))]
    async fn prune_old_blocks(&self, keep_blocks: u64) -> Result<u64> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(block_number) FROM block_hashes")
            .fetch_one(&self.pool)
            .await
            .map_err(InfraError::Database)?;
        let Some(max) = max else {
            return Ok(0);
        };
        let threshold = max.saturating_sub(keep_blocks as i64);
        let result = sqlx::query("DELETE FROM block_hashes WHERE block_number < $1")
            .bind(threshold)
            .execute(&self.pool)
            .await
            .map_err(InfraError::Database)?;
        Ok(result.rows_affected())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATS STORE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, FromRow)]
struct TableStatsRow {
    min_value: i64,
    max_value: i64,
    total_count: i64,
    finalized_count: Option<i64>,
    min_finalized: Option<i64>,
    max_finalized: Option<i64>,
}

impl From<TableStatsRow> for TableStats {
    fn from(row: TableStatsRow) -> Self {
        Self {
            min_value: row.min_value as u64,
            max_value: row.max_value as u64,
            total_count: row.total_count as u64,
            finalized_count: row.finalized_count.map(|v| v as u64),
            min_finalized: row.min_finalized.map(|v| v as u64),
            max_finalized: row.max_finalized.map(|v| v as u64),
        }
    }
}

#[async_trait]
impl StatsStore for PostgresStore {
    #[instrument(skip(self))]
    async fn update_table_stats(
        &self,
        table_name: &str,
        min_inserted: u64,
        max_inserted: u64,
        count: u64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO table_stats (table_name, min_value, max_value, total_count)
             VALUES ($1,$2,$3,$4)
             ON CONFLICT (table_name) DO UPDATE SET
                min_value = LEAST(table_stats.min_value, EXCLUDED.min_value),
                max_value = GREATEST(table_stats.max_value, EXCLUDED.max_value),
                total_count = table_stats.total_count + EXCLUDED.total_count",
        )
        .bind(table_name)
        .bind(min_inserted as i64)
        .bind(max_inserted as i64)
        .bind(count as i64)
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_finalized_stats(
        &self,
        table_name: &str,
        min_finalized: u64,
        max_finalized: u64,
        finalized_count: u64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO table_stats
                (table_name, min_value, max_value, total_count,
                 min_finalized, max_finalized, finalized_count)
             VALUES ($1,0,0,0,$2,$3,$4)
             ON CONFLICT (table_name) DO UPDATE SET
                min_finalized = LEAST(
                    COALESCE(table_stats.min_finalized, EXCLUDED.min_finalized),
                    EXCLUDED.min_finalized
                ),
                max_finalized = GREATEST(
                    COALESCE(table_stats.max_finalized, EXCLUDED.max_finalized),
                    EXCLUDED.max_finalized
                ),
                finalized_count = COALESCE(table_stats.finalized_count, 0) + EXCLUDED.finalized_count",
        )
        .bind(table_name)
        .bind(min_finalized as i64)
        .bind(max_finalized as i64)
        .bind(finalized_count as i64)
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_table_stats(&self, table_name: &str) -> Result<Option<TableStats>> {
        let row = sqlx::query_as::<_, TableStatsRow>(
            "SELECT min_value, max_value, total_count, finalized_count, min_finalized, max_finalized
             FROM table_stats WHERE table_name = $1",
        )
        .bind(table_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(InfraError::Database)?;
        Ok(row.map(TableStats::from))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WORKER STATUS STORE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, FromRow)]
struct WorkerStatusRow {
    worker_name: String,
    state: String,
    last_error: Option<String>,
    last_error_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<WorkerStatusRow> for WorkerStatus {
    type Error = InfraError;

    fn try_from(row: WorkerStatusRow) -> std::result::Result<Self, Self::Error> {
        let state = match row.state.as_str() {
            "starting" => WorkerState::Starting,
            "running" => WorkerState::Running,
            "idle" => WorkerState::Idle,
            "error" => WorkerState::Error,
            "stopping" => WorkerState::Stopping,
            "stopped" => WorkerState::Stopped,
            other => return Err(InfraError::DataShape(format!("unknown worker state: {other}"))),
        };
        Ok(Self {
            worker_name: row.worker_name,
            state,
            last_error: row.last_error,
            last_error_at: row.last_error_at,
            updated_at: row.updated_at,
        })
    }
}

fn worker_state_str(state: WorkerState) -> &'static str {
    match state {
        WorkerState::Starting => "starting",
        WorkerState::Running => "running",
        WorkerState::Idle => "idle",
        WorkerState::Error => "error",
        WorkerState::Stopping => "stopping",
        WorkerState::Stopped => "stopped",
    }
}

#[async_trait]
impl WorkerStatusStore for PostgresStore {
    #[instrument(skip(self))]
    async fn upsert_worker_status(&self, status: &WorkerStatus) -> Result<()> {
        sqlx::query(
            "INSERT INTO worker_status (worker_name, state, last_error, last_error_at, updated_at)
             VALUES ($1,$2,$3,$4,$5)
             ON CONFLICT (worker_name) DO UPDATE SET
                state = EXCLUDED.state,
                last_error = EXCLUDED.last_error,
                last_error_at = EXCLUDED.last_error_at,
                updated_at = EXCLUDED.updated_at",
        )
        .bind(&status.worker_name)
        .bind(worker_state_str(status.state))
        .bind(&status.last_error)
        .bind(status.last_error_at)
        .bind(status.updated_at)
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn all_worker_statuses(&self) -> Result<Vec<WorkerStatus>> {
        let rows = sqlx::query_as::<_, WorkerStatusRow>(
            "SELECT worker_name, state, last_error, last_error_at, updated_at FROM worker_status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(InfraError::Database)?;
        rows.into_iter()
            .map(|r| WorkerStatus::try_from(r).map_err(Into::into))
            .collect()
    }
}
