//! Execution-layer JSON-RPC client with endpoint rotation, bounded retry
//! and bounded-concurrency fan-out (spec §4.1).
//!
//! # Endpoint Rotation
//!
//! Every call starts at the next endpoint in round-robin order (so load is
//! spread across endpoints even when every call succeeds first try) and,
//! on failure, walks the rest of the list before sleeping and starting a
//! new retry round. After `max_retries` rounds with every endpoint having
//! failed, the call surfaces [`RpcError::AllEndpointsExhausted`].
//!
//! # Fan-out
//!
//! [`blocks_by_numbers`](RpcClient::blocks_by_numbers) and
//! [`receipts_by_blocks`](RpcClient::receipts_by_blocks) issue up to
//! `max_parallel` requests concurrently, each independently subject to the
//! rotation/retry policy above, and return one [`Result`] per input,
//! preserving order. [`receipts_by_blocks_reliably`](RpcClient::receipts_by_blocks_reliably)
//! wraps the same fan-out with a retry-until-complete-or-cancelled contract
//! for callers that cannot tolerate partial enrichment (spec §4.8): it
//! keeps re-fetching whatever is still outstanding, re-entering rotation
//! each round, until every block has receipts or the caller's
//! [`CancellationToken`] fires.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::config::ClientConfig;
use crate::error::{Result, RpcError};
use crate::types::{FullBlock, JsonRpcRequest, JsonRpcResponse, Receipt, to_hex_block};

// ═══════════════════════════════════════════════════════════════════════════════
// RPC CLIENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Execution-layer JSON-RPC client. `Send + Sync`, safe to share across
/// tasks behind an `Arc`.
#[derive(Debug)]
pub struct RpcClient {
    client: reqwest::Client,
    endpoints: Vec<String>,
    rotation: AtomicUsize,
    request_id: AtomicU64,
    config: ClientConfig,
}

impl RpcClient {
    /// Create a client over `endpoints` with the default retry policy.
    ///
    /// # Errors
    /// Returns an error if `endpoints` is empty or the HTTP client cannot be built.
    pub fn new(endpoints: Vec<String>) -> Result<Self> {
        Self::with_config(ClientConfig::new(endpoints))
    }

    /// Create a client with a custom configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RpcError::Connection(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoints: config.endpoints.clone(),
            rotation: AtomicUsize::new(0),
            request_id: AtomicU64::new(1),
            config,
        })
    }

    /// Configured endpoints, in rotation order.
    #[must_use]
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    // ───────────────────────────────────────────────────────────────────────────
    // ROTATION + RETRY
    // ───────────────────────────────────────────────────────────────────────────

    async fn call<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize + Clone + Send + Sync,
        R: DeserializeOwned,
    {
        let start = self.rotation.fetch_add(1, Ordering::Relaxed);
        let mut last_error: Option<RpcError> = None;
        let mut attempts = 0usize;

        for round in 0..self.config.max_retries.max(1) {
            for offset in 0..self.endpoints.len() {
                attempts += 1;
                let endpoint = &self.endpoints[(start + offset) % self.endpoints.len()];
                let id = self.next_request_id();
                let request = JsonRpcRequest::new(method, params.clone(), id);

                match self.send_request::<_, R>(endpoint, &request).await {
                    Ok(response) => {
                        if let Some(error) = response.error {
                            let err = error.into_error();
                            warn!(endpoint, method, error = %err, "rpc error response");
                            last_error = Some(err);
                            continue;
                        }
                        return response
                            .result
                            .ok_or_else(|| RpcError::InvalidResponse("missing result".into()));
                    }
                    Err(e) => {
                        warn!(endpoint, method, error = %e, "rpc transport error");
                        last_error = Some(e);
                    }
                }
            }

            if round + 1 < self.config.max_retries {
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }

        Err(RpcError::AllEndpointsExhausted {
            attempts,
            last_error: last_error.map_or_else(String::new, |e| e.to_string()),
        })
    }

    async fn send_request<P, R>(
        &self,
        endpoint: &str,
        request: &JsonRpcRequest<'_, P>,
    ) -> Result<JsonRpcResponse<R>>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let response = self.client.post(endpoint).json(request).send().await?;
        let body: JsonRpcResponse<R> = response.json().await?;
        Ok(body)
    }

    // ───────────────────────────────────────────────────────────────────────────
    // PUBLIC API (spec §4.1)
    // ───────────────────────────────────────────────────────────────────────────

    /// `eth_blockNumber`.
    ///
    /// # Errors
    /// Returns an error if every endpoint fails for `max_retries` rounds.
    #[instrument(skip(self))]
    pub async fn latest_block_number(&self) -> Result<u64> {
        let hex: String = self.call("eth_blockNumber", ()).await?;
        parse_hex_u64(&hex)
    }

    /// `eth_getBlockByNumber(number, true)`. Returns `None` if the node
    /// does not yet have the block.
    ///
    /// # Errors
    /// Returns an error if every endpoint fails for `max_retries` rounds.
    #[instrument(skip(self))]
    pub async fn block_by_number(&self, number: u64) -> Result<Option<FullBlock>> {
        self.call("eth_getBlockByNumber", (to_hex_block(number), true))
            .await
    }

    /// Fetch blocks for each of `numbers`, up to `max_parallel` concurrent
    /// requests, preserving input order. Each element is independent: one
    /// failure does not affect the others.
    #[instrument(skip(self, numbers), fields(count = numbers.len()))]
    pub async fn blocks_by_numbers(&self, numbers: &[u64]) -> Vec<Result<Option<FullBlock>>> {
        self.fan_out(numbers, |n| self.block_by_number(n)).await
    }

    /// `eth_getBlockReceipts(number)`.
    ///
    /// # Errors
    /// Returns an error if every endpoint fails for `max_retries` rounds.
    #[instrument(skip(self))]
    pub async fn receipts_by_block(&self, number: u64) -> Result<Vec<Receipt>> {
        let receipts: Option<Vec<Receipt>> = self
            .call("eth_getBlockReceipts", [to_hex_block(number)])
            .await?;
        Ok(receipts.unwrap_or_default())
    }

    /// Best-effort fan-out of [`receipts_by_block`](Self::receipts_by_block)
    /// over `numbers`. A failure on one block does not abort the others;
    /// callers that need all-or-nothing should use
    /// [`receipts_by_blocks_reliably`](Self::receipts_by_blocks_reliably).
    #[instrument(skip(self, numbers), fields(count = numbers.len()))]
    pub async fn receipts_by_blocks(&self, numbers: &[u64]) -> Vec<Result<Vec<Receipt>>> {
        self.fan_out(numbers, |n| self.receipts_by_block(n)).await
    }

    /// Fan out receipt fetches with a retry-until-complete-or-cancelled
    /// contract: blocks whose receipts fail to fetch are re-tried, against
    /// a freshly re-rotated endpoint order, until every block in `numbers`
    /// has receipts or `cancel` fires (spec §4.8: enrichment either fully
    /// succeeds or leaves the row untouched, never partial).
    ///
    /// # Errors
    /// Returns [`RpcError::Cancelled`] if `cancel` fires before every block
    /// is covered.
    #[instrument(skip(self, numbers, cancel), fields(count = numbers.len()))]
    pub async fn receipts_by_blocks_reliably(
        &self,
        numbers: &[u64],
        cancel: &CancellationToken,
    ) -> Result<Vec<(u64, Vec<Receipt>)>> {
        let mut collected: HashMap<u64, Vec<Receipt>> = HashMap::with_capacity(numbers.len());
        let mut pending: Vec<u64> = numbers.to_vec();

        loop {
            pending.retain(|n| !collected.contains_key(n));
            if pending.is_empty() {
                break;
            }
            if cancel.is_cancelled() {
                return Err(RpcError::Cancelled);
            }

            let results = self.receipts_by_blocks(&pending).await;
            let mut any_failed = false;
            for (number, result) in pending.iter().zip(results) {
                match result {
                    Ok(receipts) => {
                        collected.insert(*number, receipts);
                    }
                    Err(e) => {
                        warn!(block = *number, error = %e, "receipt fetch failed, will retry outstanding blocks");
                        any_failed = true;
                    }
                }
            }

            if any_failed {
                tokio::select! {
                    () = cancel.cancelled() => return Err(RpcError::Cancelled),
                    () = tokio::time::sleep(self.config.retry_delay) => {}
                }
            }
        }

        Ok(numbers.iter().map(|n| (*n, collected.remove(n).unwrap_or_default())).collect())
    }

    async fn fan_out<T, F, Fut, R>(&self, items: &[T], f: F) -> Vec<Result<R>>
    where
        T: Copy,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        stream::iter(items.iter().copied().map(f))
            .buffered(self.config.max_parallel)
            .collect()
            .await
    }
}

fn parse_hex_u64(s: &str) -> Result<u64> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(stripped, 16)
        .map_err(|e| RpcError::InvalidResponse(format!("invalid hex integer {s}: {e}")))
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn latest_block_number_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0", "id": 1, "result": "0x100"
            })))
            .mount(&mock_server)
            .await;

        let client = RpcClient::new(vec![mock_server.uri()]).expect("client");
        assert_eq!(client.latest_block_number().await.expect("call"), 256);
    }

    #[tokio::test]
    async fn rotates_to_second_endpoint_on_failure() {
        let bad_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&bad_server)
            .await;

        let good_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0", "id": 1, "result": "0x1"
            })))
            .mount(&good_server)
            .await;

        let client = RpcClient::new(vec![bad_server.uri(), good_server.uri()]).expect("client");
        assert_eq!(client.latest_block_number().await.expect("call"), 1);
    }

    #[tokio::test]
    async fn exhausts_all_endpoints_and_retries() {
        let mock_server = MockServer::start().await;
        let call_count = Arc::new(AtomicU32::new(0));

        struct Counter(Arc<AtomicU32>);
        impl Respond for Counter {
            fn respond(&self, _: &Request) -> ResponseTemplate {
                self.0.fetch_add(1, Ordering::SeqCst);
                ResponseTemplate::new(503)
            }
        }

        Mock::given(method("POST"))
            .respond_with(Counter(call_count.clone()))
            .mount(&mock_server)
            .await;

        let config = ClientConfig::new(vec![mock_server.uri()])
            .with_max_retries(2)
            .with_retry_delay(std::time::Duration::from_millis(1));
        let client = RpcClient::with_config(config).expect("client");

        let result = client.latest_block_number().await;
        assert!(matches!(result, Err(RpcError::AllEndpointsExhausted { .. })));
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn blocks_by_numbers_preserves_order() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0", "id": 1, "result": null
            })))
            .mount(&mock_server)
            .await;

        let client = RpcClient::new(vec![mock_server.uri()]).expect("client");
        let results = client.blocks_by_numbers(&[1, 2, 3]).await;
        assert_eq!(results.len(), 3);
        for r in results {
            assert!(r.expect("call").is_none());
        }
    }

    #[tokio::test]
    async fn receipts_by_blocks_reliably_stops_when_cancelled() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let config = ClientConfig::new(vec![mock_server.uri()])
            .with_max_retries(1)
            .with_retry_delay(std::time::Duration::from_millis(1));
        let client = RpcClient::with_config(config).expect("client");

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = client.receipts_by_blocks_reliably(&[1, 2], &cancel).await;
        assert!(matches!(result, Err(RpcError::Cancelled)));
    }

    #[tokio::test]
    async fn receipts_by_blocks_reliably_retries_until_complete() {
        let mock_server = MockServer::start().await;
        let call_count = Arc::new(AtomicU32::new(0));

        struct FlakyThenOk(Arc<AtomicU32>);
        impl Respond for FlakyThenOk {
            fn respond(&self, _: &Request) -> ResponseTemplate {
                let n = self.0.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    ResponseTemplate::new(503)
                } else {
                    ResponseTemplate::new(200).set_body_json(serde_json::json!({
                        "jsonrpc": "2.0", "id": 1, "result": []
                    }))
                }
            }
        }

        Mock::given(method("POST"))
            .respond_with(FlakyThenOk(call_count.clone()))
            .mount(&mock_server)
            .await;

        let config = ClientConfig::new(vec![mock_server.uri()])
            .with_max_retries(1)
            .with_retry_delay(std::time::Duration::from_millis(1));
        let client = RpcClient::with_config(config).expect("client");

        let cancel = CancellationToken::new();
        let result = client.receipts_by_blocks_reliably(&[1], &cancel).await.expect("eventually succeeds");
        assert_eq!(result, vec![(1, Vec::new())]);
        assert!(call_count.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn parse_hex_u64_handles_prefix() {
        assert_eq!(parse_hex_u64("0x100").expect("parse"), 256);
        assert_eq!(parse_hex_u64("100").expect("parse"), 256);
        assert!(parse_hex_u64("not-hex").is_err());
    }
}
