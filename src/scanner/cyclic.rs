// src/scanner/cyclic.rs
//! Two-leg cyclic strategy: base -> intermediate -> base.

use crate::error::Result;
use crate::price::ReferencePriceService;
use crate::quote::QuoteClient;
use crate::scanner::{confidence, CostModel, Opportunity, Scanner, Strategy};
use crate::utils::lamports_to_sol;
use async_trait::async_trait;
use log::{debug, info};
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;

const LEGS: u32 = 2;
const CONFIDENCE_DIVISOR: f64 = 3.0;
const CONFIDENCE_CAP: f64 = 0.95;

pub struct CyclicScanner {
    quote_client: Arc<dyn QuoteClient>,
    price: Arc<ReferencePriceService>,
    base_mint: Pubkey,
    intermediates: Vec<Pubkey>,
    probe_lamports: u64,
    slippage_bps: u16,
    cost_model: CostModel,
    min_profit_usd: f64,
    ttl_secs: i64,
}

impl CyclicScanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        quote_client: Arc<dyn QuoteClient>,
        price: Arc<ReferencePriceService>,
        base_mint: Pubkey,
        intermediates: Vec<Pubkey>,
        probe_lamports: u64,
        slippage_bps: u16,
        cost_model: CostModel,
        min_profit_usd: f64,
        ttl_secs: i64,
    ) -> Self {
        info!(
            "CyclicScanner initialized: {} intermediates, probe {} lamports, min profit ${:.2}",
            intermediates.len(),
            probe_lamports,
            min_profit_usd
        );
        Self {
            quote_client,
            price,
            base_mint,
            intermediates,
            probe_lamports,
            slippage_bps,
            cost_model,
            min_profit_usd,
            ttl_secs,
        }
    }

    async fn price_cycle(&self, intermediate: &Pubkey, sol_usd: f64) -> Option<Opportunity> {
        let leg1 = match self
            .quote_client
            .get_quote(
                &self.base_mint,
                intermediate,
                self.probe_lamports,
                self.slippage_bps,
            )
            .await
        {
            Ok(Some(q)) => q,
            Ok(None) => return None,
            Err(e) => {
                debug!("Abandoning candidate {} on leg 1: {}", intermediate, e);
                return None;
            }
        };
        let leg2 = match self
            .quote_client
            .get_quote(
                intermediate,
                &self.base_mint,
                leg1.out_amount,
                self.slippage_bps,
            )
            .await
        {
            Ok(Some(q)) => q,
            Ok(None) => return None,
            Err(e) => {
                debug!("Abandoning candidate {} on leg 2: {}", intermediate, e);
                return None;
            }
        };

        let total_cost = self.cost_model.total_lamports(self.probe_lamports, LEGS);
        let net_lamports =
            leg2.out_amount as i64 - self.probe_lamports as i64 - total_cost as i64;
        if net_lamports <= 0 {
            return None;
        }
        let net_usd = lamports_to_sol(net_lamports as u64) * sol_usd;
        if net_usd < self.min_profit_usd {
            // Economic rejection: expected and frequent, never a failure.
            debug!(
                "Cycle via {} below threshold: ${:.4} < ${:.4}",
                intermediate, net_usd, self.min_profit_usd
            );
            return None;
        }

        let score = confidence(net_lamports, total_cost, CONFIDENCE_DIVISOR, CONFIDENCE_CAP);
        let expected_out = leg2.out_amount;
        info!(
            "Cyclic opportunity via {}: net {} lamports (${:.4}), confidence {:.2}",
            intermediate, net_lamports, net_usd, score
        );
        Some(Opportunity::new(
            Strategy::Cyclic,
            vec![self.base_mint, *intermediate, self.base_mint],
            vec![leg1, leg2],
            self.probe_lamports,
            expected_out,
            net_lamports,
            net_usd,
            score,
            self.ttl_secs,
        ))
    }
}

#[async_trait]
impl Scanner for CyclicScanner {
    fn name(&self) -> &'static str {
        "cyclic"
    }

    async fn scan(&self) -> Result<Vec<Opportunity>> {
        let sol_usd = self.price.sol_usd().await;
        let mut found = Vec::new();
        for intermediate in &self.intermediates {
            if let Some(opp) = self.price_cycle(intermediate, sol_usd).await {
                found.push(opp);
            }
        }
        Ok(found)
    }
}
