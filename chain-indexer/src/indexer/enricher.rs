//! Receipt enricher (spec §4.8): joins transaction receipts onto blocks for
//! accurate per-transaction priority-fee metrics.
//!
//! [`apply`] is a pure, in-place join: given a receipts map, it overwrites a
//! block's priority-fee fields with the more-accurate receipt-derived
//! values and optionally fires a push notification. [`Enricher::enrich_reliably`]
//! is the live path's contract: it blocks on `rpc-client`'s all-or-nothing
//! receipt fetch until every tx-bearing block is enriched or a deadline
//! fires, so the live indexer never inserts a tx-bearing block with
//! incomplete receipt data.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rpc_client::{Receipt, RpcClient};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{DomainError, Result};
use crate::metrics::{self, ReceiptFeeInput};
use crate::types::entities::Block;

/// Options controlling a single enrichment pass.
#[derive(Debug, Clone)]
pub struct EnrichOptions {
    /// Push sink to notify per-block, if configured.
    pub push: Option<Arc<RealtimePush>>,
}

/// Outcome of an enrichment pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnrichOutcome {
    /// Number of blocks whose priority-fee fields were updated.
    pub enriched_count: usize,
}

/// Join `receipts` onto `blocks` in place. A block is touched only when it
/// carries transactions and an entry exists in `receipts_map`; empty blocks
/// (`tx_count == 0`) are passed through untouched.
pub fn apply(blocks: &mut [Block], receipts_map: &HashMap<u64, Vec<Receipt>>, options: &EnrichOptions) -> EnrichOutcome {
    let mut enriched_count = 0;

    for block in blocks.iter_mut() {
        if block.tx_count == 0 {
            continue;
        }
        let Some(receipts) = receipts_map.get(&block.block_number.value()) else {
            continue;
        };

        let inputs: Vec<ReceiptFeeInput> = receipts
            .iter()
            .map(|r| ReceiptFeeInput {
                effective_gas_price: r.effective_gas_price,
                gas_used: r.gas_used,
            })
            .collect();

        let distribution = metrics::compute_receipt_priority_fee_metrics(&inputs, block.base_fee_gwei);
        block.min_priority_fee_gwei = distribution.min_priority_fee_gwei;
        block.max_priority_fee_gwei = distribution.max_priority_fee_gwei;
        block.median_priority_fee_gwei = distribution.median_priority_fee_gwei;
        block.avg_priority_fee_gwei = distribution.avg_priority_fee_gwei;
        block.total_priority_fee_gwei = distribution.total_priority_fee_gwei;
        enriched_count += 1;

        if let Some(push) = &options.push {
            push.notify_block(block);
        }
    }

    EnrichOutcome { enriched_count }
}

/// Joins receipts onto freshly-fetched blocks with an all-or-nothing
/// contract, bounded by a cancellable deadline (spec §4.8, §5).
pub struct Enricher {
    rpc: Arc<RpcClient>,
    deadline: Duration,
}

impl Enricher {
    /// Build an enricher backed by `rpc`, bounding `enrich_reliably` calls to
    /// `deadline` (spec §5: 5 minutes for the live indexer).
    #[must_use]
    pub const fn new(rpc: Arc<RpcClient>, deadline: Duration) -> Self {
        Self { rpc, deadline }
    }

    /// Fetch receipts for every tx-bearing block in `blocks` and join them
    /// in place. Raises [`DomainError::Cancelled`] if `cancel` fires or the
    /// deadline elapses before every tx-bearing block is enriched; never
    /// returns with an incomplete join otherwise.
    pub async fn enrich_reliably(
        &self,
        blocks: &mut [Block],
        options: &EnrichOptions,
        cancel: &CancellationToken,
    ) -> Result<EnrichOutcome> {
        let tx_bearing: Vec<u64> = blocks
            .iter()
            .filter(|b| b.tx_count > 0)
            .map(|b| b.block_number.value())
            .collect();

        if tx_bearing.is_empty() {
            return Ok(EnrichOutcome::default());
        }

        let fetch = self.rpc.receipts_by_blocks_reliably(&tx_bearing, cancel);

        let rows = tokio::select! {
            () = cancel.cancelled() => return Err(DomainError::Cancelled.into()),
            result = tokio::time::timeout(self.deadline, fetch) => {
                match result {
                    Ok(inner) => inner?,
                    Err(_) => return Err(DomainError::Cancelled.into()),
                }
            }
        };

        let receipts_map: HashMap<u64, Vec<Receipt>> = rows.into_iter().collect();
        Ok(apply(blocks, &receipts_map, options))
    }
}

/// Fire-and-forget push sink for the external real-time consumer (spec
/// §4.8, §4.10, §9: advisory only, failures are swallowed, short timeout).
#[derive(Debug)]
pub struct RealtimePush {
    client: reqwest::Client,
    endpoint: String,
}

impl RealtimePush {
    /// Build a push sink targeting `endpoint`, bounding each request to
    /// `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying `reqwest::Client` cannot be built.
    pub fn new(endpoint: String, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    /// Notify the sink of a block update. Spawns the request and discards
    /// the result; never blocks the caller and never propagates failure.
    pub fn notify_block(&self, block: &Block) {
        let url = self.endpoint.clone();
        let body = serde_json::json!({
            "blockNumber": block.block_number.value(),
            "blockHash": block.block_hash,
        });
        let client = self.client.clone();
        tokio::spawn(async move {
            if let Err(err) = client.post(&url).json(&body).send().await {
                warn!(error = %err, "real-time push failed, ignoring");
            }
        });
    }

    /// Notify the sink of a finalized block-number window (spec §4.10 step 5).
    pub fn notify_finality_window(&self, from_block: u64, to_block: u64) {
        let url = self.endpoint.clone();
        let body = serde_json::json!({ "fromBlock": from_block, "toBlock": to_block });
        let client = self.client.clone();
        tokio::spawn(async move {
            if let Err(err) = client.post(&url).json(&body).send().await {
                warn!(error = %err, "real-time finality push failed, ignoring");
            }
        });
    }
}
