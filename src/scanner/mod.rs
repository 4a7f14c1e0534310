// src/scanner/mod.rs
//! Opportunity scanners.
//!
//! Each strategy implements the same `scan() -> Vec<Opportunity>` contract,
//! whether it polls the quote provider on a cadence (cyclic, multi-hop) or
//! buffers the output of an asynchronous listener (frontrun). The execution
//! engine never needs to distinguish strategy kinds.

pub mod cyclic;
pub mod frontrun;
pub mod multihop;
pub mod opportunity;

pub use cyclic::CyclicScanner;
pub use frontrun::{FrontrunScanner, PendingTransfer, TransferDirection};
pub use multihop::MultiHopScanner;
pub use opportunity::{Opportunity, Strategy};

use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Scanner: Send + Sync {
    fn name(&self) -> &'static str;

    /// One scan pass. A candidate whose leg quote is unavailable is abandoned
    /// without aborting the pass.
    async fn scan(&self) -> Result<Vec<Opportunity>>;
}

/// Modeled execution costs for a multi-leg swap, all in base-asset lamports.
#[derive(Debug, Clone)]
pub struct CostModel {
    pub network_fee_lamports: u64,
    pub priority_fee_lamports: u64,
    pub platform_fee_pct: f64,
    pub pool_fee_pct: f64,
    pub slippage_allowance_pct: f64,
}

impl CostModel {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            network_fee_lamports: config.network_fee_lamports,
            priority_fee_lamports: config.default_priority_fee_lamports,
            platform_fee_pct: config.platform_fee_pct,
            pool_fee_pct: config.pool_fee_pct,
            slippage_allowance_pct: config.slippage_allowance_pct,
        }
    }

    /// Fixed network fee per leg, one priority-fee allowance, and the
    /// percentage terms (platform fee, average pool fee, worst-case slippage)
    /// applied per leg on the probe size.
    pub fn total_lamports(&self, probe_lamports: u64, legs: u32) -> u64 {
        let fixed = self.network_fee_lamports * legs as u64 + self.priority_fee_lamports;
        let pct_per_leg = self.platform_fee_pct + self.pool_fee_pct + self.slippage_allowance_pct;
        let variable = pct_per_leg * probe_lamports as f64 * legs as f64;
        fixed + variable.round() as u64
    }
}

/// Confidence score: net profit relative to total modeled cost, damped by a
/// per-strategy divisor and clamped. More legs mean a stricter divisor and a
/// lower cap.
pub fn confidence(net_profit_lamports: i64, total_cost_lamports: u64, divisor: f64, cap: f64) -> f64 {
    if total_cost_lamports == 0 || net_profit_lamports <= 0 {
        return 0.05;
    }
    ((net_profit_lamports as f64 / total_cost_lamports as f64) / divisor).clamp(0.05, cap)
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::error::{EngineError, Result};
    use crate::quote::{Quote, QuoteClient};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use solana_sdk::{pubkey::Pubkey, transaction::VersionedTransaction};
    use std::collections::HashMap;

    /// Quote client answering from a fixed (input, output) -> out_amount
    /// table; pairs without an entry report "no route".
    pub(crate) struct StaticQuoteClient {
        quotes: HashMap<(Pubkey, Pubkey), u64>,
    }

    impl StaticQuoteClient {
        pub(crate) fn new(entries: &[(Pubkey, Pubkey, u64)]) -> Self {
            Self {
                quotes: entries
                    .iter()
                    .map(|(a, b, out)| ((*a, *b), *out))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl QuoteClient for StaticQuoteClient {
        async fn get_quote(
            &self,
            input_mint: &Pubkey,
            output_mint: &Pubkey,
            amount: u64,
            slippage_bps: u16,
        ) -> Result<Option<Quote>> {
            let Some(out_amount) = self.quotes.get(&(*input_mint, *output_mint)) else {
                return Ok(None);
            };
            let now = Utc::now();
            Ok(Some(Quote {
                input_mint: *input_mint,
                output_mint: *output_mint,
                in_amount: amount,
                out_amount: *out_amount,
                route: vec!["test-venue".to_string()],
                slippage_bps,
                fetched_at: now,
                valid_until: now + ChronoDuration::seconds(10),
                raw: serde_json::Value::Null,
            }))
        }

        async fn swap_transaction(
            &self,
            _quote: &Quote,
            _payer: &Pubkey,
        ) -> Result<VersionedTransaction> {
            Err(EngineError::Build(
                "swap assembly not available in tests".to_string(),
            ))
        }
    }
}
