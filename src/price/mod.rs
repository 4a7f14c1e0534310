// src/price/mod.rs
//! Centralized SOL/USD reference price.
//!
//! Every fiat conversion in the engine goes through this service: one cached
//! value with a TTL, refreshed from the price endpoint when one is configured,
//! otherwise pinned to the configured static price. The static default is a
//! placeholder pending a real oracle.

use log::{debug, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Deserialize)]
struct PriceResponse {
    data: HashMap<String, PriceEntry>,
}

#[derive(Debug, Deserialize)]
struct PriceEntry {
    price: f64,
}

pub struct ReferencePriceService {
    http: reqwest::Client,
    price_url: Option<String>,
    fallback_usd: f64,
    ttl: Duration,
    cached: RwLock<Option<(f64, Instant)>>,
}

impl ReferencePriceService {
    pub fn new(price_url: Option<String>, fallback_usd: f64, ttl_secs: u64) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
            price_url,
            fallback_usd,
            ttl: Duration::from_secs(ttl_secs),
            cached: RwLock::new(None),
        }
    }

    /// A service that always answers with a fixed price. Used in tests and in
    /// deployments without a price endpoint.
    pub fn fixed(price_usd: f64) -> Self {
        Self::new(None, price_usd, u64::MAX / 2)
    }

    /// Current SOL/USD reference price. Never fails: a fetch problem falls
    /// back to the last cached value, then to the configured static price.
    pub async fn sol_usd(&self) -> f64 {
        if let Some((price, at)) = *self.cached.read().await {
            if at.elapsed() < self.ttl {
                return price;
            }
        }
        match self.refresh().await {
            Some(price) => price,
            None => {
                let stale = self.cached.read().await.as_ref().map(|(p, _)| *p);
                stale.unwrap_or(self.fallback_usd)
            }
        }
    }

    pub fn lamports_to_usd(&self, lamports: u64, sol_usd: f64) -> f64 {
        crate::utils::lamports_to_sol(lamports) * sol_usd
    }

    async fn refresh(&self) -> Option<f64> {
        let url = self.price_url.as_ref()?;
        let response = match self.http.get(url).query(&[("ids", "SOL")]).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("Reference price fetch failed: {}", e);
                return None;
            }
        };
        let parsed: PriceResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                warn!("Reference price payload invalid: {}", e);
                return None;
            }
        };
        let price = parsed.data.get("SOL").map(|e| e.price)?;
        if !price.is_finite() || price <= 0.0 {
            warn!("Discarding nonsensical reference price: {}", price);
            return None;
        }
        debug!("Reference price refreshed: {:.2} USD/SOL", price);
        *self.cached.write().await = Some((price, Instant::now()));
        Some(price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[tokio::test]
    async fn fixed_service_answers_with_fallback() {
        let svc = ReferencePriceService::fixed(150.0);
        assert_approx_eq!(svc.sol_usd().await, 150.0);
    }

    #[tokio::test]
    async fn lamport_conversion_uses_given_price() {
        let svc = ReferencePriceService::fixed(150.0);
        let usd = svc.lamports_to_usd(1_000_000_000, 150.0);
        assert_approx_eq!(usd, 150.0);
    }
}
