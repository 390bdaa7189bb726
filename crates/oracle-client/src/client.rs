//! Finality-oracle REST client with endpoint rotation and exponential
//! backoff (spec §4.2).
//!
//! # Retry policy
//!
//! Every call starts at the next endpoint in round-robin order and, on
//! failure, walks the rest of the list before retrying the whole list
//! again. Unlike [`rpc-client`](https://docs.rs/rpc-client), which sleeps a
//! fixed delay between bounded retry rounds, each retry round here sleeps
//! `backoff_delay(round)` — doubling from `BASE_BACKOFF`, capped at
//! `MAX_BACKOFF`, with up to 50% jitter — since the oracle's typical
//! failure mode is brief overload rather than a dead endpoint.
//!
//! # Fan-out
//!
//! [`milestones`](OracleClient::milestones) fetches each sequence id up to
//! `max_parallel` concurrently, but unlike `rpc-client`'s reliable
//! fan-out, isolates per-item failures: an id that cannot be fetched
//! becomes `None` in the output rather than failing the whole call.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use tracing::{instrument, warn};

use crate::config::{ClientConfig, backoff_delay};
use crate::error::{OracleError, Result};
use crate::types::{CountResponse, MilestoneEnvelope, OracleMilestone};

/// Finality-oracle REST client. `Send + Sync`, safe to share behind an `Arc`.
#[derive(Debug)]
pub struct OracleClient {
    client: reqwest::Client,
    endpoints: Vec<String>,
    rotation: AtomicUsize,
    config: ClientConfig,
}

impl OracleClient {
    /// Create a client over `endpoints` with the default backoff policy.
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
            .map_err(|e| OracleError::Connection(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoints: config.endpoints.clone(),
            rotation: AtomicUsize::new(0),
            config,
        })
    }

    /// Configured endpoints, in rotation order.
    #[must_use]
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    // ───────────────────────────────────────────────────────────────────────────
    // ROTATION + BACKOFF
    // ───────────────────────────────────────────────────────────────────────────

    async fn get<R>(&self, path: &str) -> Result<R>
    where
        R: DeserializeOwned,
    {
        let start = self.rotation.fetch_add(1, Ordering::Relaxed);
        let mut last_error: Option<OracleError> = None;
        let mut attempts = 0usize;

        for round in 0..self.config.max_attempts {
            let endpoint = &self.endpoints[(start + round) % self.endpoints.len()];
            attempts += 1;
            let url = format!("{}{}", endpoint.trim_end_matches('/'), path);

            match self.send_request::<R>(&url).await {
                Ok(value) => return Ok(value),
                // A 404 means the resource genuinely doesn't exist, not a
                // transient endpoint fault; retrying it across the whole
                // backoff budget would only delay a `None` the caller could
                // have today.
                Err(e @ OracleError::NotFound) => return Err(e),
                Err(e) => {
                    warn!(endpoint, path, error = %e, "oracle request failed");
                    last_error = Some(e);
                }
            }

            if round + 1 < self.config.max_attempts {
                tokio::time::sleep(backoff_delay(u32::try_from(round).unwrap_or(u32::MAX))).await;
            }
        }

        Err(OracleError::Exhausted {
            attempts,
            last_error: last_error.map_or_else(String::new, |e| e.to_string()),
        })
    }

    async fn send_request<R>(&self, url: &str) -> Result<R>
    where
        R: DeserializeOwned,
    {
        let response = self.client.get(url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(OracleError::NotFound);
        }
        if !response.status().is_success() {
            return Err(OracleError::Http(format!("status {}", response.status())));
        }
        let body: R = response.json().await?;
        Ok(body)
    }

    // ───────────────────────────────────────────────────────────────────────────
    // PUBLIC API (spec §4.2)
    // ───────────────────────────────────────────────────────────────────────────

    /// Total number of milestones the oracle has published. The most
    /// recent sequence id is `count() - 1`.
    ///
    /// # Errors
    /// Returns an error if every endpoint fails for `max_attempts` rounds,
    /// or if the oracle's count is not a valid decimal integer.
    #[instrument(skip(self))]
    pub async fn count(&self) -> Result<u64> {
        let response: CountResponse = self.get("/milestones/count").await?;
        response
            .count
            .parse()
            .map_err(|_| OracleError::InvalidResponse(format!("non-decimal count {:?}", response.count)))
    }

    /// Fetch a single milestone by sequence id. Returns `None` if the
    /// oracle does not have it (yet, or never will).
    ///
    /// # Errors
    /// Returns an error if every endpoint fails for `max_attempts` rounds.
    #[instrument(skip(self))]
    pub async fn milestone(&self, seq_id: u64) -> Result<Option<OracleMilestone>> {
        match self
            .get::<MilestoneEnvelope>(&format!("/milestones/{seq_id}"))
            .await
        {
            Ok(envelope) => Ok(Some(envelope.milestone)),
            Err(OracleError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Fetch milestones for each of `seq_ids`, up to `max_parallel`
    /// concurrent requests, preserving input order. A failed fetch is
    /// skipped (`None` in the output) rather than failing the whole call,
    /// since a single stuck sequence id should not block the rest of the
    /// batch.
    #[instrument(skip(self, seq_ids), fields(count = seq_ids.len()))]
    pub async fn milestones(&self, seq_ids: &[u64]) -> Vec<Option<OracleMilestone>> {
        self.fan_out(seq_ids, |id| self.milestone(id))
            .await
            .into_iter()
            .map(|result| result.ok().flatten())
            .collect()
    }

    /// Fetch the most recently published milestone, or `None` if the
    /// oracle does not have it. Computes `seqId = count()`, then fetches
    /// that sequence id (spec §4.2) — this relies on the oracle's counter
    /// already pointing at the latest id rather than one-past it.
    ///
    /// # Errors
    /// Returns an error if every endpoint fails for `max_attempts` rounds.
    #[instrument(skip(self))]
    pub async fn latest(&self) -> Result<Option<OracleMilestone>> {
        let seq_id = self.count().await?;
        self.milestone(seq_id).await
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

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    use super::*;

    fn sample_milestone_envelope(id: u64) -> serde_json::Value {
        serde_json::json!({
            "milestone": {
                "milestone_id": id,
                "start_block": id * 100,
                "end_block": id * 100 + 63,
                "hash": "0xabc",
                "proposer": "0xdef",
                "timestamp": 1_700_000_000,
                "bor_chain_id": "137",
            }
        })
    }

    #[tokio::test]
    async fn count_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/milestones/count"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"count": "7"})),
            )
            .mount(&mock_server)
            .await;

        let client = OracleClient::new(vec![mock_server.uri()]).expect("client");
        assert_eq!(client.count().await.expect("call"), 7);
    }

    #[tokio::test]
    async fn milestone_not_found_returns_none() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/milestones/5"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let client = OracleClient::new(vec![mock_server.uri()]).expect("client");
        assert_eq!(client.milestone(5).await.expect("call"), None);
    }

    #[tokio::test]
    async fn milestone_found() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/milestones/5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_milestone_envelope(5)))
            .mount(&mock_server)
            .await;

        let client = OracleClient::new(vec![mock_server.uri()]).expect("client");
        let milestone = client.milestone(5).await.expect("call").expect("some");
        assert_eq!(milestone.milestone_id, 5);
        assert_eq!(milestone.end_block, 563);
    }

    #[tokio::test]
    async fn rotates_to_second_endpoint_on_failure() {
        let bad_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&bad_server)
            .await;

        let good_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/milestones/count"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"count": "1"})),
            )
            .mount(&good_server)
            .await;

        let client =
            OracleClient::new(vec![bad_server.uri(), good_server.uri()]).expect("client");
        assert_eq!(client.count().await.expect("call"), 1);
    }

    #[tokio::test]
    async fn exhausts_all_endpoints_with_backoff() {
        let mock_server = MockServer::start().await;
        let call_count = Arc::new(AtomicU32::new(0));

        struct Counter(Arc<AtomicU32>);
        impl Respond for Counter {
            fn respond(&self, _: &Request) -> ResponseTemplate {
                self.0.fetch_add(1, Ordering::SeqCst);
                ResponseTemplate::new(503)
            }
        }

        Mock::given(method("GET"))
            .respond_with(Counter(call_count.clone()))
            .mount(&mock_server)
            .await;

        let config = ClientConfig::new(vec![mock_server.uri()])
            .with_max_attempts(2)
            .with_timeout(Duration::from_secs(5));
        let client = OracleClient::with_config(config).expect("client");

        let result = client.count().await;
        assert!(matches!(result, Err(OracleError::Exhausted { .. })));
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn milestones_isolates_per_item_failures() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/milestones/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_milestone_envelope(1)))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/milestones/2"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let config = ClientConfig::new(vec![mock_server.uri()]).with_max_attempts(1);
        let client = OracleClient::with_config(config).expect("client");

        let results = client.milestones(&[1, 2]).await;
        assert_eq!(results.len(), 2);
        assert!(results[0].is_some());
        assert!(results[1].is_none());
    }

    #[tokio::test]
    async fn latest_returns_none_when_unpublished() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/milestones/count"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"count": "9"})),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/milestones/9"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let client = OracleClient::new(vec![mock_server.uri()]).expect("client");
        assert_eq!(client.latest().await.expect("call"), None);
    }
}
