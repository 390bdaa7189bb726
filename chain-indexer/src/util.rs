//! Small helpers shared across workers: adaptive sleep cadence, block-range
//! chunking, and endpoint-count-scaled batch sizing (spec §4.4, §5).

use std::time::Duration;

/// A block time above this is flagged for operator attention (open question
/// resolved in `DESIGN.md`: fixed rather than chain-specific/configurable).
pub const SUSPECT_BLOCK_TIME_SECS: f64 = 30.0;

/// Pick the sleep duration for a forward indexer's next iteration: a short
/// delay while catching up, the full poll interval once caught up.
#[must_use]
pub const fn adaptive_poll_delay(
    lag: u64,
    lag_threshold: u64,
    catch_up_delay: Duration,
    normal_delay: Duration,
) -> Duration {
    if lag > lag_threshold { catch_up_delay } else { normal_delay }
}

/// Scale a base batch size by the number of available endpoints, so that
/// per-endpoint load stays roughly uniform as the endpoint pool grows
/// (spec §5: "batch sizes scale with endpoint count").
#[must_use]
pub const fn scaled_batch_size(base: u64, endpoint_count: usize) -> u64 {
    let multiplier = if endpoint_count == 0 { 1 } else { endpoint_count as u64 };
    base.saturating_mul(multiplier)
}

/// Split `[from, to]` (inclusive) into consecutive `batch_size`-sized chunks,
/// ascending. The final chunk may be shorter than `batch_size`.
#[must_use]
pub fn chunk_ascending(from: u64, to: u64, batch_size: u64) -> Vec<(u64, u64)> {
    if from > to || batch_size == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut current = from;
    while current <= to {
        let end = current.saturating_add(batch_size - 1).min(to);
        chunks.push((current, end));
        if end == u64::MAX {
            break;
        }
        current = end + 1;
    }
    chunks
}

/// Split `[floor, from]` (inclusive, `floor <= from`) into consecutive
/// `batch_size`-sized chunks, descending (used by the backward-walking
/// backfillers).
#[must_use]
pub fn chunk_descending(from: u64, floor: u64, batch_size: u64) -> Vec<(u64, u64)> {
    if from < floor || batch_size == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut current = from;
    loop {
        let start = current.saturating_sub(batch_size - 1).max(floor);
        chunks.push((start, current));
        if start == floor {
            break;
        }
        current = start - 1;
    }
    chunks
}
