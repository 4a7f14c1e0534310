// src/bundle/mod.rs
//! Atomic bundle submission through a block-engine endpoint.
//!
//! Bundles land together or not at all. Submission is JSON-RPC `sendBundle`
//! with base64-encoded transactions; landing is polled via
//! `getBundleStatuses` up to an explicit ceiling, after which the bundle is
//! treated as dropped rather than retried indefinitely.

use crate::builder::serialize_base64;
use crate::error::{EngineError, Result};
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::json;
use solana_sdk::transaction::VersionedTransaction;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Block engines cap bundle size at five transactions.
pub const MAX_BUNDLE_TRANSACTIONS: usize = 5;

const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleState {
    Pending,
    Landed { slot: Option<u64> },
    Failed { reason: String },
    /// The landing wait ceiling elapsed without a terminal status.
    Dropped,
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct StatusesResult {
    value: Vec<Option<BundleStatusValue>>,
}

#[derive(Debug, Deserialize)]
struct BundleStatusValue {
    #[serde(default)]
    confirmation_status: Option<String>,
    #[serde(default)]
    err: Option<serde_json::Value>,
    #[serde(default)]
    slot: Option<u64>,
}

pub struct BundleClient {
    http: reqwest::Client,
    endpoint: String,
    wait_ceiling: Duration,
    request_id: AtomicU64,
}

impl BundleClient {
    pub fn new(block_engine_url: &str, submission_timeout_secs: u64, wait_ceiling_secs: u64) -> Self {
        info!(
            "BundleClient initialized: {} (landing ceiling {}s)",
            block_engine_url, wait_ceiling_secs
        );
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(submission_timeout_secs))
                .build()
                .unwrap_or_default(),
            endpoint: format!(
                "{}/api/v1/bundles",
                block_engine_url.trim_end_matches('/')
            ),
            wait_ceiling: Duration::from_secs(wait_ceiling_secs),
            request_id: AtomicU64::new(1),
        }
    }

    /// Submits the transactions as one atomic bundle; returns the bundle id.
    pub async fn submit(&self, transactions: &[VersionedTransaction]) -> Result<String> {
        if transactions.is_empty() {
            return Err(EngineError::Execution("bundle cannot be empty".to_string()));
        }
        if transactions.len() > MAX_BUNDLE_TRANSACTIONS {
            return Err(EngineError::Execution(format!(
                "bundle too large: {} transactions (max {})",
                transactions.len(),
                MAX_BUNDLE_TRANSACTIONS
            )));
        }
        let encoded: Vec<String> = transactions
            .iter()
            .map(serialize_base64)
            .collect::<Result<_>>()?;

        let envelope: RpcEnvelope<String> = self
            .call("sendBundle", json!([encoded, {"encoding": "base64"}]))
            .await?;
        if let Some(err) = envelope.error {
            return Err(EngineError::Execution(format!(
                "block engine rejected bundle ({}): {}",
                err.code, err.message
            )));
        }
        let bundle_id = envelope
            .result
            .ok_or_else(|| EngineError::Parse("no bundle id in response".to_string()))?;
        info!(
            "Bundle submitted: {} ({} transaction(s))",
            bundle_id,
            transactions.len()
        );
        Ok(bundle_id)
    }

    pub async fn status(&self, bundle_id: &str) -> Result<BundleState> {
        let envelope: RpcEnvelope<StatusesResult> = self
            .call("getBundleStatuses", json!([[bundle_id]]))
            .await?;
        if let Some(err) = envelope.error {
            return Err(EngineError::Network(format!(
                "bundle status ({}): {}",
                err.code, err.message
            )));
        }
        let value = envelope
            .result
            .and_then(|r| r.value.into_iter().next().flatten());
        Ok(match value {
            None => BundleState::Pending,
            Some(status) => Self::interpret(status),
        })
    }

    /// Polls until the bundle reaches a terminal state or the ceiling
    /// elapses. Status-fetch errors are absorbed and polled through.
    pub async fn wait_for_landing(&self, bundle_id: &str) -> BundleState {
        let deadline = Instant::now() + self.wait_ceiling;
        loop {
            match self.status(bundle_id).await {
                Ok(BundleState::Pending) => {}
                Ok(terminal) => return terminal,
                Err(e) => debug!("Bundle status fetch failed: {}", e),
            }
            if Instant::now() >= deadline {
                warn!("Bundle {} did not land within the ceiling, treating as dropped", bundle_id);
                return BundleState::Dropped;
            }
            sleep(STATUS_POLL_INTERVAL).await;
        }
    }

    fn interpret(status: BundleStatusValue) -> BundleState {
        if let Some(err) = &status.err {
            // The engine reports `{"Ok": null}` for a clean landing.
            let is_ok = err.is_null() || err.get("Ok").map(|v| v.is_null()).unwrap_or(false);
            if !is_ok {
                return BundleState::Failed {
                    reason: err.to_string(),
                };
            }
        }
        match status.confirmation_status.as_deref() {
            Some("confirmed") | Some("finalized") => BundleState::Landed { slot: status.slot },
            _ => BundleState::Pending,
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<RpcEnvelope<T>> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Network(format!("{} request failed: {}", method, e)))?;
        if !response.status().is_success() {
            return Err(EngineError::Network(format!(
                "{} returned {}",
                method,
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| EngineError::Parse(format!("{} payload: {}", method, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn status(confirmation: Option<&str>, err: Option<serde_json::Value>) -> BundleStatusValue {
        BundleStatusValue {
            confirmation_status: confirmation.map(|s| s.to_string()),
            err,
            slot: Some(1234),
        }
    }

    #[test]
    fn confirmed_and_finalized_land() {
        assert_eq!(
            BundleClient::interpret(status(Some("confirmed"), None)),
            BundleState::Landed { slot: Some(1234) }
        );
        assert_eq!(
            BundleClient::interpret(status(Some("finalized"), Some(json!({"Ok": null})))),
            BundleState::Landed { slot: Some(1234) }
        );
    }

    #[test]
    fn processed_stays_pending() {
        assert_eq!(
            BundleClient::interpret(status(Some("processed"), None)),
            BundleState::Pending
        );
        assert_eq!(
            BundleClient::interpret(status(None, None)),
            BundleState::Pending
        );
    }

    #[test]
    fn explicit_errors_fail_the_bundle() {
        let state = BundleClient::interpret(status(
            Some("confirmed"),
            Some(json!({"InstructionError": [0, {"Custom": 6001}]})),
        ));
        assert!(matches!(state, BundleState::Failed { .. }));
    }

    #[tokio::test]
    async fn oversized_and_empty_bundles_are_refused_locally() {
        let client = BundleClient::new("http://127.0.0.1:1", 1, 1);
        let err = client.submit(&[]).await.unwrap_err();
        assert!(matches!(err, EngineError::Execution(_)));
    }
}
