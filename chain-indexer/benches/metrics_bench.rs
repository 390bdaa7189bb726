//! Benchmarks for the metrics computer's hot paths (spec §4.3): per-block
//! computation runs once per ingested block, so its cost sets a floor on
//! indexer throughput.

use chain_indexer::metrics::{compute_per_block_metrics, PerBlockMetricsInput, TxFeeInput};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

const GWEI: u128 = 1_000_000_000;

fn block_with_tx_count(tx_count: usize) -> PerBlockMetricsInput {
    let transactions = (0..tx_count)
        .map(|i| TxFeeInput {
            max_priority_fee_per_gas: Some((1 + (i as u128 % 50)) * GWEI),
            gas_price: None,
            gas_used: Some(21_000 + (i as u64 % 100_000)),
        })
        .collect();

    PerBlockMetricsInput {
        base_fee_per_gas: 30 * GWEI,
        gas_used: 15_000_000,
        timestamp: 1_700_000_012,
        transactions,
        previous_timestamp: Some(1_700_000_000),
    }
}

fn bench_compute_per_block_metrics(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_per_block_metrics");
    for tx_count in [0usize, 50, 300, 1_000] {
        let input = block_with_tx_count(tx_count);
        group.bench_with_input(BenchmarkId::from_parameter(tx_count), &input, |b, input| {
            b.iter(|| compute_per_block_metrics(black_box(input)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compute_per_block_metrics);
criterion_main!(benches);
