//! Request/response wire types for the execution-layer RPC client.
//!
//! Domain-shaped responses (blocks, receipts) are the `alloy` RPC types
//! directly; this module only adds the generic JSON-RPC envelope.

use alloy::rpc::types::{Block, Transaction, TransactionReceipt};
use serde::{Deserialize, Serialize};

/// A full block including transaction bodies, as returned by
/// `eth_getBlockByNumber(number, true)`.
pub type FullBlock = Block<Transaction>;

/// A transaction receipt, as returned by `eth_getTransactionReceipt` or
/// `eth_getBlockReceipts`.
pub type Receipt = TransactionReceipt;

// ═══════════════════════════════════════════════════════════════════════════════
// JSON-RPC ENVELOPE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
pub(crate) struct JsonRpcRequest<'a, P: Serialize> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    pub params: P,
    pub id: u64,
}

impl<'a, P: Serialize> JsonRpcRequest<'a, P> {
    pub fn new(method: &'a str, params: P, id: u64) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
            id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct JsonRpcResponse<T> {
    #[allow(dead_code)]
    pub id: u64,
    pub result: Option<T>,
    pub error: Option<crate::error::RpcErrorDetail>,
}

/// A block number or hash. Used as the fan-out key for `blocks_by_numbers`
/// and `receipts_by_blocks`.
pub fn to_hex_block(number: u64) -> String {
    format!("0x{number:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_block_formatting() {
        assert_eq!(to_hex_block(256), "0x100");
        assert_eq!(to_hex_block(0), "0x0");
    }
}
