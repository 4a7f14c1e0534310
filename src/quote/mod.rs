// src/quote/mod.rs
//! Quote provider integration.
//!
//! The swap-routing math lives upstream: this module only fetches priced
//! routes ("give amount X of mint A, receive mint B"), validates the payloads,
//! and turns an accepted quote into the provider-assembled base swap
//! transaction. Requests are paced to stay under the provider's rate budget.

use crate::error::{EngineError, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use solana_sdk::{pubkey::Pubkey, transaction::VersionedTransaction};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

/// Request structure for the provider's /quote endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct QuoteRequest {
    #[serde(rename = "inputMint")]
    pub input_mint: String,
    #[serde(rename = "outputMint")]
    pub output_mint: String,
    pub amount: u64,
    #[serde(rename = "slippageBps")]
    pub slippage_bps: u16,
}

/// Response structure for the provider's /quote endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteResponse {
    #[serde(rename = "inputMint")]
    pub input_mint: String,
    #[serde(rename = "inAmount")]
    pub in_amount: String,
    #[serde(rename = "outputMint")]
    pub output_mint: String,
    #[serde(rename = "outAmount")]
    pub out_amount: String,
    #[serde(rename = "routePlan")]
    pub route_plan: Vec<RoutePlan>,
    #[serde(rename = "priceImpactPct", default)]
    pub price_impact_pct: Option<String>,
    #[serde(rename = "contextSlot", default)]
    pub context_slot: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutePlan {
    #[serde(rename = "swapInfo")]
    pub swap_info: SwapInfo,
    pub percent: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapInfo {
    #[serde(rename = "ammKey")]
    pub amm_key: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// A priced offer for one leg. Immutable once obtained; consumed once and
/// never re-fetched mid-trade.
#[derive(Debug, Clone)]
pub struct Quote {
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    pub in_amount: u64,
    pub out_amount: u64,
    pub route: Vec<String>,
    pub slippage_bps: u16,
    pub fetched_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    /// Raw provider payload, retained for swap-transaction assembly.
    pub raw: serde_json::Value,
}

impl Quote {
    /// Validates an upstream payload. Malformed data is rejected here rather
    /// than trusted through the rest of the pipeline.
    pub fn from_response(
        response: QuoteResponse,
        slippage_bps: u16,
        validity_secs: i64,
    ) -> Result<Self> {
        let input_mint = Pubkey::from_str(&response.input_mint)
            .map_err(|e| EngineError::InvalidQuote(format!("bad input mint: {}", e)))?;
        let output_mint = Pubkey::from_str(&response.output_mint)
            .map_err(|e| EngineError::InvalidQuote(format!("bad output mint: {}", e)))?;
        if input_mint == output_mint {
            return Err(EngineError::InvalidQuote(
                "input and output mint are identical".to_string(),
            ));
        }
        let in_amount: u64 = response
            .in_amount
            .parse()
            .map_err(|_| EngineError::InvalidQuote(format!("bad inAmount: {}", response.in_amount)))?;
        let out_amount: u64 = response.out_amount.parse().map_err(|_| {
            EngineError::InvalidQuote(format!("bad outAmount: {}", response.out_amount))
        })?;
        if in_amount == 0 || out_amount == 0 {
            return Err(EngineError::InvalidQuote("zero-amount quote".to_string()));
        }
        let route = response
            .route_plan
            .iter()
            .map(|p| {
                p.swap_info
                    .label
                    .clone()
                    .unwrap_or_else(|| p.swap_info.amm_key.clone())
            })
            .collect();
        let now = Utc::now();
        let raw = serde_json::to_value(&response)?;
        Ok(Self {
            input_mint,
            output_mint,
            in_amount,
            out_amount,
            route,
            slippage_bps,
            fetched_at: now,
            valid_until: now + ChronoDuration::seconds(validity_secs),
            raw,
        })
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.valid_until
    }
}

#[async_trait]
pub trait QuoteClient: Send + Sync {
    /// `Ok(None)` means the provider found no route for the pair, which is an
    /// expected per-candidate outcome and must not abort a scan pass.
    async fn get_quote(
        &self,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        amount: u64,
        slippage_bps: u16,
    ) -> Result<Option<Quote>>;

    /// The provider-assembled base swap transaction for an accepted quote.
    async fn swap_transaction(&self, quote: &Quote, payer: &Pubkey)
        -> Result<VersionedTransaction>;
}

#[derive(Debug, Serialize)]
struct SwapRequest<'a> {
    #[serde(rename = "quoteResponse")]
    quote_response: &'a serde_json::Value,
    #[serde(rename = "userPublicKey")]
    user_public_key: String,
    #[serde(rename = "wrapAndUnwrapSol")]
    wrap_and_unwrap_sol: bool,
}

#[derive(Debug, Deserialize)]
struct SwapResponse {
    #[serde(rename = "swapTransaction")]
    swap_transaction: String,
}

pub struct HttpQuoteClient {
    http: reqwest::Client,
    base_url: String,
    quote_validity_secs: i64,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl HttpQuoteClient {
    pub fn new(base_url: &str, requests_per_sec: u32, quote_validity_secs: i64) -> Self {
        let rps = requests_per_sec.max(1);
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            quote_validity_secs,
            min_interval: Duration::from_millis(1_000 / rps as u64),
            last_request: Mutex::new(None),
        }
    }

    /// Enforced minimum inter-request delay derived from the RPS ceiling. A
    /// slow provider degrades scan throughput instead of blocking callers on
    /// a hard lock.
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let since = prev.elapsed();
            if since < self.min_interval {
                sleep(self.min_interval - since).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[async_trait]
impl QuoteClient for HttpQuoteClient {
    async fn get_quote(
        &self,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        amount: u64,
        slippage_bps: u16,
    ) -> Result<Option<Quote>> {
        self.pace().await;
        let request = QuoteRequest {
            input_mint: input_mint.to_string(),
            output_mint: output_mint.to_string(),
            amount,
            slippage_bps,
        };
        let url = format!("{}/quote", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("inputMint", request.input_mint.as_str()),
                ("outputMint", request.output_mint.as_str()),
                ("amount", &request.amount.to_string()),
                ("slippageBps", &request.slippage_bps.to_string()),
            ])
            .send()
            .await
            .map_err(|e| EngineError::Network(format!("quote request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(EngineError::QuoteRateLimited);
        }
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::BAD_REQUEST {
            // No route for this pair/size. Expected, the candidate is simply
            // skipped.
            debug!("No route: {} -> {}", input_mint, output_mint);
            return Ok(None);
        }
        if !status.is_success() {
            return Err(EngineError::QuoteApi(format!(
                "quote endpoint returned {}",
                status
            )));
        }

        let parsed: QuoteResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Parse(format!("quote payload: {}", e)))?;
        match Quote::from_response(parsed, slippage_bps, self.quote_validity_secs) {
            Ok(quote) => Ok(Some(quote)),
            Err(e) => {
                warn!("Discarding malformed quote: {}", e);
                Ok(None)
            }
        }
    }

    async fn swap_transaction(
        &self,
        quote: &Quote,
        payer: &Pubkey,
    ) -> Result<VersionedTransaction> {
        self.pace().await;
        let url = format!("{}/swap", self.base_url);
        let body = SwapRequest {
            quote_response: &quote.raw,
            user_public_key: payer.to_string(),
            wrap_and_unwrap_sol: true,
        };
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Network(format!("swap request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(EngineError::QuoteApi(format!(
                "swap endpoint returned {}",
                response.status()
            )));
        }
        let parsed: SwapResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Parse(format!("swap payload: {}", e)))?;
        let bytes = BASE64
            .decode(&parsed.swap_transaction)
            .map_err(|e| EngineError::Parse(format!("swap transaction base64: {}", e)))?;
        bincode::deserialize(&bytes)
            .map_err(|e| EngineError::Parse(format!("swap transaction encoding: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn response(in_amount: &str, out_amount: &str) -> QuoteResponse {
        QuoteResponse {
            input_mint: "So11111111111111111111111111111111111111112".to_string(),
            in_amount: in_amount.to_string(),
            output_mint: "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v".to_string(),
            out_amount: out_amount.to_string(),
            route_plan: vec![RoutePlan {
                swap_info: SwapInfo {
                    amm_key: "amm-1".to_string(),
                    label: Some("Orca".to_string()),
                },
                percent: 100,
            }],
            price_impact_pct: Some("0.01".to_string()),
            context_slot: Some(1),
        }
    }

    #[test]
    fn valid_payload_becomes_a_quote() {
        let quote = Quote::from_response(response("100000000", "103000000"), 50, 10).unwrap();
        assert_eq!(quote.in_amount, 100_000_000);
        assert_eq!(quote.out_amount, 103_000_000);
        assert_eq!(quote.route, vec!["Orca".to_string()]);
        assert!(quote.valid_until > quote.fetched_at);
        assert!(!quote.is_expired());
    }

    #[test]
    fn malformed_amounts_are_rejected() {
        let err = Quote::from_response(response("not-a-number", "1"), 50, 10).unwrap_err();
        assert!(matches!(err, EngineError::InvalidQuote(_)));

        let err = Quote::from_response(response("0", "1"), 50, 10).unwrap_err();
        assert!(matches!(err, EngineError::InvalidQuote(_)));
    }

    #[test]
    fn identical_mints_are_rejected() {
        let mut r = response("1", "1");
        r.output_mint = r.input_mint.clone();
        let err = Quote::from_response(r, 50, 10).unwrap_err();
        assert!(matches!(err, EngineError::InvalidQuote(_)));
    }

    #[test]
    fn expired_validity_window_is_detected() {
        let quote = Quote::from_response(response("1", "1"), 50, -1).unwrap();
        assert!(quote.is_expired());
    }
}
