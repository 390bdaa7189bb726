//! Pure per-block and receipt-derived priority-fee metric computation
//! (spec §4.3). Nothing here touches the network or the store: callers
//! translate RPC/store types into the input shapes below, which keeps these
//! functions trivially unit-testable and free of async machinery.
//!
//! Intermediate `priorityFeePerGas × gasUsed` sums are carried in
//! [`BigDecimal`] rather than a native integer type, since a pathological
//! combination of priority fee and gas used can overflow 64 bits; the result
//! is converted down to a gwei-scaled `f64` only at the end.

use std::str::FromStr;

use bigdecimal::{BigDecimal, ToPrimitive};

const WEI_PER_GWEI: f64 = 1_000_000_000.0;

// ═══════════════════════════════════════════════════════════════════════════════
// INPUT SHAPES
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-transaction fee fields needed to derive `priorityFeePerGas`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TxFeeInput {
    /// EIP-1559 `maxPriorityFeePerGas`, in wei.
    pub max_priority_fee_per_gas: Option<u128>,
    /// Legacy `gasPrice`, in wei. Ignored if `max_priority_fee_per_gas` is set.
    pub gas_price: Option<u128>,
    /// Gas used by this transaction, from a joined receipt. `None` when no
    /// receipt has been enriched for it yet.
    pub gas_used: Option<u64>,
}

/// Input to [`compute_per_block_metrics`].
#[derive(Debug, Clone)]
pub struct PerBlockMetricsInput {
    /// Block's base fee, in wei. Zero for pre-EIP-1559 chains/blocks.
    pub base_fee_per_gas: u128,
    /// Total gas used by the block.
    pub gas_used: u64,
    /// Block timestamp, Unix seconds.
    pub timestamp: i64,
    /// Per-transaction fee inputs, in block order.
    pub transactions: Vec<TxFeeInput>,
    /// Timestamp of the previous block, when known (cached across a batch to
    /// avoid an extra RPC lookup).
    pub previous_timestamp: Option<i64>,
}

/// A single receipt's fee fields, for [`compute_receipt_priority_fee_metrics`].
#[derive(Debug, Clone, Copy)]
pub struct ReceiptFeeInput {
    /// `effectiveGasPrice` from the receipt, in wei.
    pub effective_gas_price: u128,
    /// `gasUsed` from the receipt.
    pub gas_used: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// OUTPUT SHAPES
// ═══════════════════════════════════════════════════════════════════════════════

/// Priority-fee distribution over a set of transactions/receipts, in gwei.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PriorityFeeMetrics {
    /// Minimum priority fee per gas, in gwei.
    pub min_priority_fee_gwei: Option<f64>,
    /// Maximum priority fee per gas, in gwei.
    pub max_priority_fee_gwei: Option<f64>,
    /// Median priority fee per gas, in gwei (mean of the two middles if even).
    pub median_priority_fee_gwei: Option<f64>,
    /// Weighted average priority fee (`total / Σ gasUsed`), in gwei. Null
    /// unless every transaction carried a `gasUsed`.
    pub avg_priority_fee_gwei: Option<f64>,
    /// `Σ priorityFeePerGas × gasUsed`, gwei-scaled. Null under the same
    /// condition as `avg_priority_fee_gwei`.
    pub total_priority_fee_gwei: Option<f64>,
}

/// Full per-block metric set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerBlockMetrics {
    /// Base fee, in gwei (fractional).
    pub base_fee_gwei: f64,
    /// Priority-fee distribution derived from the transaction set.
    pub priority_fee: PriorityFeeMetrics,
    /// Seconds since the previous block, when known.
    pub block_time_sec: Option<f64>,
    /// Megagas per second (`gasUsed / blockTime / 1e6`).
    pub mgas_per_sec: Option<f64>,
    /// Transactions per second (`txCount / blockTime`).
    pub tps: Option<f64>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// PRIORITY FEE PER GAS
// ═══════════════════════════════════════════════════════════════════════════════

/// Derive a single transaction's `priorityFeePerGas`, in wei.
///
/// Prefers `maxPriorityFeePerGas` when present (EIP-1559). Falls back to
/// `gasPrice − baseFee`, clamped at zero; when `baseFee` is zero (legacy
/// chain or pre-1559 block) the full `gasPrice` is treated as priority.
#[must_use]
pub fn priority_fee_per_gas_wei(tx: &TxFeeInput, base_fee_per_gas: u128) -> u128 {
    if let Some(max_priority) = tx.max_priority_fee_per_gas {
        return max_priority;
    }
    if let Some(gas_price) = tx.gas_price {
        return if base_fee_per_gas == 0 {
            gas_price
        } else {
            gas_price.saturating_sub(base_fee_per_gas)
        };
    }
    0
}

// ═══════════════════════════════════════════════════════════════════════════════
// PER-BLOCK METRICS
// ═══════════════════════════════════════════════════════════════════════════════

/// Compute per-block metrics from raw transaction fee fields (spec §4.3).
#[must_use]
pub fn compute_per_block_metrics(input: &PerBlockMetricsInput) -> PerBlockMetrics {
    let priority_wei: Vec<u128> = input
        .transactions
        .iter()
        .map(|tx| priority_fee_per_gas_wei(tx, input.base_fee_per_gas))
        .collect();

    let gas_used: Vec<Option<u64>> = input.transactions.iter().map(|tx| tx.gas_used).collect();

    let priority_fee = priority_fee_distribution(&priority_wei, &gas_used);

    let block_time_sec = input.previous_timestamp.and_then(|previous| {
        let delta = input.timestamp - previous;
        if delta > 0 { Some(delta as f64) } else { None }
    });

    #[allow(clippy::cast_precision_loss)]
    let mgas_per_sec = block_time_sec.map(|t| (input.gas_used as f64) / t / 1_000_000.0);
    #[allow(clippy::cast_precision_loss)]
    let tps = block_time_sec.map(|t| (input.transactions.len() as f64) / t);

    PerBlockMetrics {
        base_fee_gwei: wei_to_gwei(input.base_fee_per_gas),
        priority_fee,
        block_time_sec,
        mgas_per_sec,
        tps,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RECEIPT-DERIVED METRICS
// ═══════════════════════════════════════════════════════════════════════════════

/// Compute priority-fee metrics from a block's receipts (spec §4.3). Always
/// returns non-null `avg`/`total` when `receipts` is non-empty, since every
/// receipt carries `gasUsed` by construction.
#[must_use]
pub fn compute_receipt_priority_fee_metrics(
    receipts: &[ReceiptFeeInput],
    base_fee_gwei: f64,
) -> PriorityFeeMetrics {
    let base_fee_wei = gwei_to_wei(base_fee_gwei);

    let priority_wei: Vec<u128> = receipts
        .iter()
        .map(|r| r.effective_gas_price.saturating_sub(base_fee_wei))
        .collect();
    let gas_used: Vec<Option<u64>> = receipts.iter().map(|r| Some(r.gas_used)).collect();

    priority_fee_distribution(&priority_wei, &gas_used)
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED DISTRIBUTION LOGIC
// ═══════════════════════════════════════════════════════════════════════════════

fn priority_fee_distribution(priority_wei: &[u128], gas_used: &[Option<u64>]) -> PriorityFeeMetrics {
    if priority_wei.is_empty() {
        return PriorityFeeMetrics::default();
    }

    let mut gwei_values: Vec<f64> = priority_wei.iter().map(|&w| wei_to_gwei(w)).collect();
    gwei_values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let min = gwei_values.first().copied();
    let max = gwei_values.last().copied();
    let median = Some(median_of_sorted(&gwei_values));

    let all_have_gas_used = gas_used.iter().all(Option::is_some);
    let (avg, total) = if all_have_gas_used {
        weighted_avg_and_total(priority_wei, gas_used)
    } else {
        (None, None)
    };

    PriorityFeeMetrics {
        min_priority_fee_gwei: min,
        max_priority_fee_gwei: max,
        median_priority_fee_gwei: median,
        avg_priority_fee_gwei: avg,
        total_priority_fee_gwei: total,
    }
}

fn median_of_sorted(sorted: &[f64]) -> f64 {
    let len = sorted.len();
    if len % 2 == 1 {
        sorted[len / 2]
    } else {
        (sorted[len / 2 - 1] + sorted[len / 2]) / 2.0
    }
}

fn weighted_avg_and_total(priority_wei: &[u128], gas_used: &[Option<u64>]) -> (Option<f64>, Option<f64>) {
    let mut total_wei = BigDecimal::from(0i64);
    let mut total_gas_used: u128 = 0;

    for (&priority, used) in priority_wei.iter().zip(gas_used) {
        let used = used.unwrap_or(0);
        total_wei += u128_to_bigdecimal(priority) * u128_to_bigdecimal(u128::from(used));
        total_gas_used += u128::from(used);
    }

    if total_gas_used == 0 {
        return (None, None);
    }

    let total_gwei = (&total_wei / u128_to_bigdecimal(1_000_000_000)).to_f64();
    let avg_gwei = total_gwei.map(|t| t / total_gas_used as f64);

    (avg_gwei, total_gwei)
}

fn u128_to_bigdecimal(value: u128) -> BigDecimal {
    BigDecimal::from_str(&value.to_string()).unwrap_or_else(|_| BigDecimal::from(0i64))
}

fn wei_to_gwei(wei: u128) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let wei_f = wei as f64;
    wei_f / WEI_PER_GWEI
}

fn gwei_to_wei(gwei: f64) -> u128 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let wei = (gwei * WEI_PER_GWEI).round() as u128;
    wei
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn tx(max_priority: Option<u128>, gas_price: Option<u128>, gas_used: Option<u64>) -> TxFeeInput {
        TxFeeInput {
            max_priority_fee_per_gas: max_priority,
            gas_price,
            gas_used,
        }
    }

    const GWEI: u128 = 1_000_000_000;

    #[rstest]
    #[case::eip1559_field_preferred(Some(5 * GWEI), Some(100 * GWEI), 30 * GWEI, 5 * GWEI)]
    #[case::legacy_gas_price_minus_base(None, Some(35 * GWEI), 30 * GWEI, 5 * GWEI)]
    #[case::clamps_at_zero_when_base_exceeds_gas_price(None, Some(10 * GWEI), 30 * GWEI, 0)]
    #[case::pre_eip1559_zero_base_fee_uses_full_gas_price(None, Some(10 * GWEI), 0, 10 * GWEI)]
    #[case::no_fee_field_at_all_is_zero(None, None, 30 * GWEI, 0)]
    fn priority_fee_per_gas_edge_cases(
        #[case] max_priority: Option<u128>,
        #[case] gas_price: Option<u128>,
        #[case] base_fee: u128,
        #[case] expected: u128,
    ) {
        let t = tx(max_priority, gas_price, None);
        assert_eq!(priority_fee_per_gas_wei(&t, base_fee), expected);
    }

    #[test]
    fn spec_example_single_tx_block() {
        // Block 101: tx priority 5 gwei, gasUsed 21000, baseFee 30 gwei.
        let input = PerBlockMetricsInput {
            base_fee_per_gas: 30 * GWEI,
            gas_used: 21_000,
            timestamp: 1000,
            transactions: vec![tx(Some(5 * GWEI), None, Some(21_000))],
            previous_timestamp: Some(998),
        };

        let metrics = compute_per_block_metrics(&input);

        assert!((metrics.base_fee_gwei - 30.0).abs() < f64::EPSILON);
        assert_eq!(metrics.priority_fee.min_priority_fee_gwei, Some(5.0));
        assert_eq!(metrics.priority_fee.max_priority_fee_gwei, Some(5.0));
        assert_eq!(metrics.priority_fee.median_priority_fee_gwei, Some(5.0));
        assert_eq!(metrics.priority_fee.avg_priority_fee_gwei, Some(5.0));
        assert_eq!(metrics.priority_fee.total_priority_fee_gwei, Some(105_000.0));
        assert_eq!(metrics.block_time_sec, Some(2.0));
    }

    #[test]
    fn avg_and_total_are_null_when_any_tx_missing_gas_used() {
        let input = PerBlockMetricsInput {
            base_fee_per_gas: 30 * GWEI,
            gas_used: 42_000,
            timestamp: 1000,
            transactions: vec![
                tx(Some(5 * GWEI), None, Some(21_000)),
                tx(Some(5 * GWEI), None, None),
            ],
            previous_timestamp: None,
        };

        let metrics = compute_per_block_metrics(&input);

        assert_eq!(metrics.priority_fee.avg_priority_fee_gwei, None);
        assert_eq!(metrics.priority_fee.total_priority_fee_gwei, None);
        // min/max/median are still computable without receipts.
        assert_eq!(metrics.priority_fee.min_priority_fee_gwei, Some(5.0));
    }

    #[test]
    fn median_is_mean_of_two_middles_for_even_count() {
        let values = vec![1.0, 3.0, 5.0, 7.0];
        assert!((median_of_sorted(&values) - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn block_time_is_null_when_previous_timestamp_missing() {
        let input = PerBlockMetricsInput {
            base_fee_per_gas: 30 * GWEI,
            gas_used: 0,
            timestamp: 1000,
            transactions: vec![],
            previous_timestamp: None,
        };

        let metrics = compute_per_block_metrics(&input);
        assert_eq!(metrics.block_time_sec, None);
        assert_eq!(metrics.mgas_per_sec, None);
        assert_eq!(metrics.tps, None);
    }

    #[test]
    fn block_time_is_null_when_previous_timestamp_equal_or_later() {
        let input = PerBlockMetricsInput {
            base_fee_per_gas: 0,
            gas_used: 0,
            timestamp: 1000,
            transactions: vec![],
            previous_timestamp: Some(1000),
        };

        assert_eq!(compute_per_block_metrics(&input).block_time_sec, None);
    }

    #[test]
    fn empty_block_has_no_priority_fee_distribution() {
        let input = PerBlockMetricsInput {
            base_fee_per_gas: 30 * GWEI,
            gas_used: 0,
            timestamp: 1000,
            transactions: vec![],
            previous_timestamp: Some(998),
        };

        let metrics = compute_per_block_metrics(&input);
        assert_eq!(metrics.priority_fee, PriorityFeeMetrics::default());
        assert_eq!(metrics.mgas_per_sec, Some(0.0));
        assert_eq!(metrics.tps, Some(0.0));
    }

    #[test]
    fn receipt_derived_metrics_are_always_weighted() {
        let receipts = vec![
            ReceiptFeeInput { effective_gas_price: 35 * GWEI, gas_used: 21_000 },
            ReceiptFeeInput { effective_gas_price: 40 * GWEI, gas_used: 63_000 },
        ];

        let metrics = compute_receipt_priority_fee_metrics(&receipts, 30.0);

        assert_eq!(metrics.min_priority_fee_gwei, Some(5.0));
        assert_eq!(metrics.max_priority_fee_gwei, Some(10.0));
        assert!(metrics.avg_priority_fee_gwei.is_some());
        assert!(metrics.total_priority_fee_gwei.is_some());
        // total = 5*21000 + 10*63000 = 735000
        assert_eq!(metrics.total_priority_fee_gwei, Some(735_000.0));
    }

    #[test]
    fn receipt_priority_fee_clamps_at_zero() {
        let receipts = vec![ReceiptFeeInput { effective_gas_price: 10 * GWEI, gas_used: 21_000 }];
        let metrics = compute_receipt_priority_fee_metrics(&receipts, 30.0);
        assert_eq!(metrics.min_priority_fee_gwei, Some(0.0));
        assert_eq!(metrics.total_priority_fee_gwei, Some(0.0));
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROPERTY TESTS (spec §8)
// ═══════════════════════════════════════════════════════════════════════════════
