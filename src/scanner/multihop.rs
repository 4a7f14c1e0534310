// src/scanner/multihop.rs
//! Three-leg strategy: base -> A -> B -> base over a curated pair set.

use crate::error::Result;
use crate::price::ReferencePriceService;
use crate::quote::{Quote, QuoteClient};
use crate::scanner::{confidence, CostModel, Opportunity, Scanner, Strategy};
use crate::utils::lamports_to_sol;
use async_trait::async_trait;
use itertools::Itertools;
use log::{debug, info};
use solana_sdk::pubkey::Pubkey;
use std::collections::HashSet;
use std::sync::Arc;

const LEGS: u32 = 3;
// An extra leg adds execution risk: stricter damping, lower ceiling.
const CONFIDENCE_DIVISOR: f64 = 4.0;
const CONFIDENCE_CAP: f64 = 0.85;

/// Ordered (A, B) intermediate pairs, de-duplicated, with stable-stable pairs
/// excluded (two stable-value assets cannot arbitrage against each other) and
/// capped to respect the quote request-rate budget.
pub(crate) fn curate_pairs(
    intermediates: &[Pubkey],
    stables: &HashSet<Pubkey>,
    max_pairs: usize,
) -> Vec<(Pubkey, Pubkey)> {
    let mut seen = HashSet::new();
    let mut pairs = Vec::new();
    for combo in intermediates.iter().permutations(2) {
        let (a, b) = (*combo[0], *combo[1]);
        if a == b || (stables.contains(&a) && stables.contains(&b)) {
            continue;
        }
        if !seen.insert((a, b)) {
            continue;
        }
        pairs.push((a, b));
        if pairs.len() >= max_pairs {
            break;
        }
    }
    pairs
}

pub struct MultiHopScanner {
    quote_client: Arc<dyn QuoteClient>,
    price: Arc<ReferencePriceService>,
    base_mint: Pubkey,
    pairs: Vec<(Pubkey, Pubkey)>,
    probe_lamports: u64,
    slippage_bps: u16,
    cost_model: CostModel,
    min_profit_usd: f64,
    ttl_secs: i64,
}

impl MultiHopScanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        quote_client: Arc<dyn QuoteClient>,
        price: Arc<ReferencePriceService>,
        base_mint: Pubkey,
        intermediates: Vec<Pubkey>,
        stables: HashSet<Pubkey>,
        max_pairs: usize,
        probe_lamports: u64,
        slippage_bps: u16,
        cost_model: CostModel,
        min_profit_usd: f64,
        ttl_secs: i64,
    ) -> Self {
        let pairs = curate_pairs(&intermediates, &stables, max_pairs);
        info!(
            "MultiHopScanner initialized: {} curated pairs (cap {}), probe {} lamports",
            pairs.len(),
            max_pairs,
            probe_lamports
        );
        Self {
            quote_client,
            price,
            base_mint,
            pairs,
            probe_lamports,
            slippage_bps,
            cost_model,
            min_profit_usd,
            ttl_secs,
        }
    }

    async fn leg(&self, input: &Pubkey, output: &Pubkey, amount: u64) -> Option<Quote> {
        match self
            .quote_client
            .get_quote(input, output, amount, self.slippage_bps)
            .await
        {
            Ok(Some(q)) => Some(q),
            Ok(None) => None,
            Err(e) => {
                debug!("Abandoning leg {} -> {}: {}", input, output, e);
                None
            }
        }
    }

    async fn price_path(&self, a: &Pubkey, b: &Pubkey, sol_usd: f64) -> Option<Opportunity> {
        let leg1 = self.leg(&self.base_mint, a, self.probe_lamports).await?;
        let leg2 = self.leg(a, b, leg1.out_amount).await?;
        let leg3 = self.leg(b, &self.base_mint, leg2.out_amount).await?;

        let total_cost = self.cost_model.total_lamports(self.probe_lamports, LEGS);
        let net_lamports = leg3.out_amount as i64 - self.probe_lamports as i64 - total_cost as i64;
        if net_lamports <= 0 {
            return None;
        }
        let net_usd = lamports_to_sol(net_lamports as u64) * sol_usd;
        if net_usd < self.min_profit_usd {
            debug!(
                "Path {} -> {} below threshold: ${:.4} < ${:.4}",
                a, b, net_usd, self.min_profit_usd
            );
            return None;
        }

        let score = confidence(net_lamports, total_cost, CONFIDENCE_DIVISOR, CONFIDENCE_CAP);
        let expected_out = leg3.out_amount;
        info!(
            "Multi-hop opportunity {} -> {}: net {} lamports (${:.4}), confidence {:.2}",
            a, b, net_lamports, net_usd, score
        );
        Some(Opportunity::new(
            Strategy::MultiHop,
            vec![self.base_mint, *a, *b, self.base_mint],
            vec![leg1, leg2, leg3],
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
impl Scanner for MultiHopScanner {
    fn name(&self) -> &'static str {
        "multihop"
    }

    async fn scan(&self) -> Result<Vec<Opportunity>> {
        let sol_usd = self.price.sol_usd().await;
        let mut found = Vec::new();
        for (a, b) in &self.pairs {
            if let Some(opp) = self.price_path(a, b, sol_usd).await {
                found.push(opp);
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::test_support::StaticQuoteClient;
    use assert_approx_eq::assert_approx_eq;
    use pretty_assertions::assert_eq;

    const PROBE: u64 = 100_000_000;
    const SOL_USD: f64 = 150.0;

    fn cost_model() -> CostModel {
        CostModel {
            network_fee_lamports: 5_000,
            priority_fee_lamports: 10_000,
            platform_fee_pct: 0.0024,
            pool_fee_pct: 0.0025,
            slippage_allowance_pct: 0.0025,
        }
    }

    #[test]
    fn stable_stable_pairs_are_excluded_and_cap_holds() {
        let usdc = Pubkey::new_unique();
        let usdt = Pubkey::new_unique();
        let bonk = Pubkey::new_unique();
        let stables: HashSet<Pubkey> = [usdc, usdt].into_iter().collect();

        let pairs = curate_pairs(&[usdc, usdt, bonk], &stables, 100);
        // 3 mints give 6 ordered pairs; (usdc,usdt) and (usdt,usdc) drop out.
        assert_eq!(pairs.len(), 4);
        assert!(!pairs.contains(&(usdc, usdt)));
        assert!(!pairs.contains(&(usdt, usdc)));

        let capped = curate_pairs(&[usdc, usdt, bonk], &stables, 2);
        assert_eq!(capped.len(), 2);
    }

    #[tokio::test]
    async fn profitable_three_leg_path_uses_stricter_confidence() {
        let base = Pubkey::new_unique();
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        let client = StaticQuoteClient::new(&[
            (base, a, 1_000_000),
            (a, b, 2_000_000),
            (b, base, 104_000_000),
        ]);
        let scanner = MultiHopScanner::new(
            Arc::new(client),
            Arc::new(ReferencePriceService::fixed(SOL_USD)),
            base,
            vec![a, b],
            HashSet::new(),
            12,
            PROBE,
            50,
            cost_model(),
            0.01,
            10,
        );
        let found = scanner.scan().await.unwrap();
        // (a, b) completes; the reverse order dies on a missing route.
        assert_eq!(found.len(), 1);
        let opp = &found[0];
        // Cost: 3*5000 + 10000 fixed + 0.74% * 1e8 * 3 variable = 2_245_000.
        let total_cost = 2_245_000i64;
        let net = 104_000_000 - PROBE as i64 - total_cost;
        assert_eq!(opp.net_profit_lamports, net);
        assert_eq!(opp.quotes.len(), 3);
        assert_eq!(opp.strategy, Strategy::MultiHop);
        assert_approx_eq!(
            opp.confidence,
            ((net as f64 / total_cost as f64) / 4.0).clamp(0.05, 0.85)
        );
    }
}
