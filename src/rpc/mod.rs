// src/rpc/mod.rs
//! High-availability RPC access with primary/backup failover.
//!
//! One endpoint is designated active at any moment. Reported failures against
//! the active endpoint accumulate; at the failover threshold the other handle
//! becomes active. A periodic health check probes every configured endpoint
//! and prefers the primary whenever it answers again.

use crate::error::{EngineError, Result};
use log::{debug, info, warn};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    commitment_config::CommitmentConfig, hash::Hash, signature::Signature,
    transaction::VersionedTransaction,
};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

const DEFAULT_COMMITMENT: CommitmentConfig = CommitmentConfig::confirmed();

/// Consecutive failures on the active endpoint before switching handles.
pub const FAILOVER_THRESHOLD: u32 = 3;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const PRIMARY: usize = 0;

struct Endpoint {
    url: String,
    client: Arc<RpcClient>,
    consecutive_failures: AtomicU32,
}

impl Endpoint {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            client: Arc::new(RpcClient::new_with_commitment(
                url.to_string(),
                DEFAULT_COMMITMENT,
            )),
            consecutive_failures: AtomicU32::new(0),
        }
    }
}

pub struct RpcManager {
    endpoints: Vec<Endpoint>,
    // Index of the active endpoint. Swapped with a single atomic store so
    // concurrent callers never observe a half-switched state.
    active: AtomicUsize,
}

impl RpcManager {
    pub fn new(primary_url: &str, backup_url: Option<&str>) -> Self {
        let mut endpoints = Vec::new();
        if !primary_url.is_empty() {
            endpoints.push(Endpoint::new(primary_url));
        }
        if let Some(url) = backup_url.filter(|u| !u.is_empty()) {
            endpoints.push(Endpoint::new(url));
        }
        info!(
            "RpcManager initialized with {} endpoint(s), primary: {}",
            endpoints.len(),
            endpoints.first().map(|e| e.url.as_str()).unwrap_or("<none>")
        );
        Self {
            endpoints,
            active: AtomicUsize::new(PRIMARY),
        }
    }

    /// The currently active endpoint handle. Fails fast with a configuration
    /// error when no endpoint is configured at all.
    pub fn active(&self) -> Result<Arc<RpcClient>> {
        let idx = self.active.load(Ordering::Acquire);
        self.endpoints
            .get(idx)
            .map(|e| Arc::clone(&e.client))
            .ok_or_else(|| EngineError::Config("no RPC endpoint configured".to_string()))
    }

    pub fn active_url(&self) -> Option<&str> {
        self.endpoints
            .get(self.active.load(Ordering::Acquire))
            .map(|e| e.url.as_str())
    }

    /// Records a failed call against the active endpoint. At the threshold the
    /// other handle (if any) becomes active and all counters reset.
    pub fn report_failure(&self) {
        let idx = self.active.load(Ordering::Acquire);
        let Some(endpoint) = self.endpoints.get(idx) else {
            return;
        };
        let failures = endpoint.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(
            "RPC failure on {} ({}/{})",
            endpoint.url, failures, FAILOVER_THRESHOLD
        );
        if failures >= FAILOVER_THRESHOLD && self.endpoints.len() > 1 {
            let next = (idx + 1) % self.endpoints.len();
            warn!(
                "RPC failover: {} -> {} after {} consecutive failures",
                endpoint.url, self.endpoints[next].url, failures
            );
            self.reset_counters();
            self.active.store(next, Ordering::Release);
        }
    }

    /// Records a successful call: the active endpoint's counter resets.
    pub fn report_success(&self) {
        let idx = self.active.load(Ordering::Acquire);
        if let Some(endpoint) = self.endpoints.get(idx) {
            endpoint.consecutive_failures.store(0, Ordering::Release);
        }
    }

    /// Probes every configured endpoint. Failure to probe is absorbed (the
    /// endpoint stays unhealthy); this never returns an error. When the
    /// primary answers while the backup is active, the primary is restored.
    pub async fn health_check(&self) {
        let mut primary_healthy = false;
        for (i, endpoint) in self.endpoints.iter().enumerate() {
            let ok = matches!(
                timeout(PROBE_TIMEOUT, endpoint.client.get_health()).await,
                Ok(Ok(()))
            );
            debug!("Health probe {}: {}", endpoint.url, if ok { "ok" } else { "unhealthy" });
            if i == PRIMARY {
                primary_healthy = ok;
            }
        }
        self.note_primary_health(primary_healthy);
    }

    fn note_primary_health(&self, primary_healthy: bool) {
        if primary_healthy && self.active.load(Ordering::Acquire) != PRIMARY {
            info!("Primary RPC endpoint recovered, switching back");
            self.reset_counters();
            self.active.store(PRIMARY, Ordering::Release);
        }
    }

    fn reset_counters(&self) {
        for endpoint in &self.endpoints {
            endpoint.consecutive_failures.store(0, Ordering::Release);
        }
    }

    pub async fn get_latest_blockhash(&self) -> Result<Hash> {
        let client = self.active()?;
        match client.get_latest_blockhash().await {
            Ok(hash) => {
                self.report_success();
                Ok(hash)
            }
            Err(e) => {
                self.report_failure();
                Err(EngineError::Rpc(format!("get_latest_blockhash: {}", e)))
            }
        }
    }

    /// Priority-fee estimate from recent prioritization fees, floored at the
    /// configured default.
    pub async fn estimate_priority_fee(&self, floor: u64) -> u64 {
        let Ok(client) = self.active() else {
            return floor;
        };
        match client.get_recent_prioritization_fees(&[]).await {
            Ok(fees) => {
                self.report_success();
                let mut observed: Vec<u64> =
                    fees.into_iter().map(|f| f.prioritization_fee).collect();
                if observed.is_empty() {
                    return floor;
                }
                observed.sort_unstable();
                let median = observed[observed.len() / 2];
                median.max(floor)
            }
            Err(e) => {
                debug!("Priority fee estimate unavailable: {}", e);
                self.report_failure();
                floor
            }
        }
    }

    pub async fn send_transaction(&self, tx: &VersionedTransaction) -> Result<Signature> {
        let client = self.active()?;
        match client.send_transaction(tx).await {
            Ok(sig) => {
                self.report_success();
                Ok(sig)
            }
            Err(e) => {
                self.report_failure();
                Err(EngineError::Rpc(format!("send_transaction: {}", e)))
            }
        }
    }

    /// Polls for confirmation until `wait` elapses. `Ok(false)` means the
    /// signature never confirmed within the window.
    pub async fn confirm_signature(&self, signature: &Signature, wait: Duration) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let client = self.active()?;
            match client.confirm_transaction(signature).await {
                Ok(true) => {
                    self.report_success();
                    return Ok(true);
                }
                Ok(false) => {
                    self.report_success();
                }
                Err(e) => {
                    debug!("confirm_transaction failed: {}", e);
                    self.report_failure();
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(Duration::from_millis(500)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with_backup() -> RpcManager {
        RpcManager::new("http://primary:8899", Some("http://backup:8899"))
    }

    #[test]
    fn no_endpoints_fails_fast_with_config_error() {
        let manager = RpcManager::new("", None);
        let err = match manager.active() {
            Ok(_) => panic!("expected active() to fail with no endpoints"),
            Err(e) => e,
        };
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn switches_on_third_failure_not_second_or_fourth() {
        let manager = manager_with_backup();

        manager.report_failure();
        manager.report_failure();
        assert_eq!(manager.active_url(), Some("http://primary:8899"));

        manager.report_failure();
        assert_eq!(manager.active_url(), Some("http://backup:8899"));

        // A fourth failure now counts against the backup, not a second switch.
        manager.report_failure();
        assert_eq!(manager.active_url(), Some("http://backup:8899"));
    }

    #[test]
    fn success_resets_the_failure_counter() {
        let manager = manager_with_backup();
        manager.report_failure();
        manager.report_failure();
        manager.report_success();
        manager.report_failure();
        manager.report_failure();
        assert_eq!(manager.active_url(), Some("http://primary:8899"));
    }

    #[test]
    fn recovered_primary_is_preferred_again() {
        let manager = manager_with_backup();
        for _ in 0..FAILOVER_THRESHOLD {
            manager.report_failure();
        }
        assert_eq!(manager.active_url(), Some("http://backup:8899"));

        // The periodic health check observes the primary answering again.
        manager.note_primary_health(true);
        assert_eq!(manager.active_url(), Some("http://primary:8899"));

        // An unhealthy probe leaves the backup active.
        for _ in 0..FAILOVER_THRESHOLD {
            manager.report_failure();
        }
        manager.note_primary_health(false);
        assert_eq!(manager.active_url(), Some("http://backup:8899"));
    }

    #[test]
    fn single_endpoint_never_switches() {
        let manager = RpcManager::new("http://only:8899", None);
        for _ in 0..10 {
            manager.report_failure();
        }
        assert_eq!(manager.active_url(), Some("http://only:8899"));
    }
}
