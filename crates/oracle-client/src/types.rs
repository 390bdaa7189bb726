//! Wire types for the finality-oracle REST API (spec §6).
//!
//! `GET /milestones/count` returns `{"count": "<decimal string>"}`;
//! `GET /milestones/latest` and `GET /milestones/<sequence_id>` both return
//! `{"milestone": {...}}`. `bor_chain_id` is part of the milestone object
//! but carries no meaning here and is ignored.

use serde::Deserialize;

/// A milestone as reported by the oracle. `proposer` is normalised from an
/// empty string to `None` on construction; callers otherwise use this
/// as-is to build the persisted `Milestone` entity.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OracleMilestone {
    /// Sequence id, unique and monotonically increasing.
    pub milestone_id: u64,
    /// First block covered (inclusive).
    pub start_block: u64,
    /// Last block covered (inclusive).
    pub end_block: u64,
    /// Milestone hash.
    pub hash: String,
    /// Proposer address, or an empty string if the oracle has none on
    /// record for this milestone.
    #[serde(default)]
    pub proposer: String,
    /// Unix timestamp (seconds) of the milestone.
    pub timestamp: i64,
}

impl OracleMilestone {
    /// Proposer address, or `None` when the oracle reported an empty string.
    #[must_use]
    pub fn proposer(&self) -> Option<&str> {
        if self.proposer.is_empty() {
            None
        } else {
            Some(&self.proposer)
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct MilestoneEnvelope {
    pub milestone: OracleMilestone,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CountResponse {
    pub count: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn milestone_deserializes() {
        let json = r#"{
            "milestone_id": 42,
            "start_block": 100,
            "end_block": 164,
            "hash": "0xabc",
            "proposer": "0xdef",
            "timestamp": 1700000000,
            "bor_chain_id": "137"
        }"#;
        let milestone: OracleMilestone = serde_json::from_str(json).expect("parse");
        assert_eq!(milestone.milestone_id, 42);
        assert_eq!(milestone.end_block, 164);
        assert_eq!(milestone.proposer(), Some("0xdef"));
    }

    #[test]
    fn milestone_empty_proposer_is_none() {
        let json = r#"{
            "milestone_id": 1, "start_block": 0, "end_block": 1, "hash": "0x", "timestamp": 0
        }"#;
        let milestone: OracleMilestone = serde_json::from_str(json).expect("parse");
        assert_eq!(milestone.proposer(), None);
    }

    #[test]
    fn envelope_unwraps_milestone() {
        let json = r#"{"milestone": {
            "milestone_id": 1, "start_block": 0, "end_block": 63, "hash": "0x", "timestamp": 0
        }}"#;
        let envelope: MilestoneEnvelope = serde_json::from_str(json).expect("parse");
        assert_eq!(envelope.milestone.milestone_id, 1);
    }

    #[test]
    fn count_response_parses_decimal_string() {
        let response: CountResponse =
            serde_json::from_str(r#"{"count": "13"}"#).expect("parse");
        assert_eq!(response.count.parse::<u64>().expect("decimal"), 13);
    }
}
