// src/scanner/frontrun.rs
//! Event-driven frontrun strategy.
//!
//! An asynchronous listener consumes observed pending transfers and buffers
//! any resulting opportunities; `scan()` drains that buffer, so the engine
//! drives this strategy through the same polling contract as the others.

use crate::error::Result;
use crate::price::ReferencePriceService;
use crate::scanner::{confidence, Opportunity, Scanner, Strategy};
use crate::utils::lamports_to_sol;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use solana_sdk::pubkey::Pubkey;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const CONFIDENCE_DIVISOR: f64 = 3.0;
const CONFIDENCE_CAP: f64 = 0.95;
/// Two transactions land for a frontrun-then-exit pair.
const TRANSACTION_FEES: u64 = 2;

/// Direction of an observed pending transfer relative to the base asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// The observed user is acquiring the base asset; price moves up.
    BuyBase,
    /// The observed user is disposing of the base asset; following it would
    /// trade against the impact.
    SellBase,
}

#[derive(Debug, Clone)]
pub struct PendingTransfer {
    pub signature: String,
    pub mint: Pubkey,
    pub amount_lamports: u64,
    pub direction: TransferDirection,
    pub observed_at: DateTime<Utc>,
}

pub struct FrontrunScanner {
    price: Arc<ReferencePriceService>,
    base_mint: Pubkey,
    min_transfer_lamports: u64,
    /// Constant-elasticity placeholder: price impact fraction per SOL moved.
    impact_per_sol: f64,
    min_impact_bps: f64,
    follow_fraction: f64,
    max_trade_lamports: u64,
    network_fee_lamports: u64,
    tip_lamports: u64,
    slippage_allowance_pct: f64,
    min_profit_usd: f64,
    ttl_secs: i64,
    buffer: Mutex<Vec<Opportunity>>,
}

impl FrontrunScanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        price: Arc<ReferencePriceService>,
        base_mint: Pubkey,
        min_transfer_lamports: u64,
        impact_per_sol: f64,
        min_impact_bps: f64,
        follow_fraction: f64,
        max_trade_lamports: u64,
        network_fee_lamports: u64,
        tip_lamports: u64,
        slippage_allowance_pct: f64,
        min_profit_usd: f64,
        ttl_secs: i64,
    ) -> Self {
        info!(
            "FrontrunScanner initialized: min transfer {} lamports, min impact {} bps",
            min_transfer_lamports, min_impact_bps
        );
        Self {
            price,
            base_mint,
            min_transfer_lamports,
            impact_per_sol,
            min_impact_bps,
            follow_fraction,
            max_trade_lamports,
            network_fee_lamports,
            tip_lamports,
            slippage_allowance_pct,
            min_profit_usd,
            ttl_secs,
            buffer: Mutex::new(Vec::new()),
        }
    }

    /// Consumes the collaborator-provided pending-transfer stream until the
    /// sender side closes.
    pub fn spawn_listener(
        self: &Arc<Self>,
        mut events: mpsc::Receiver<PendingTransfer>,
    ) -> JoinHandle<()> {
        let scanner = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(transfer) = events.recv().await {
                let sol_usd = scanner.price.sol_usd().await;
                scanner.ingest(&transfer, sol_usd);
            }
            debug!("Pending-transfer stream closed, frontrun listener exiting");
        })
    }

    /// Evaluates one observed transfer and buffers the opportunity if it
    /// clears every gate.
    pub(crate) fn ingest(&self, transfer: &PendingTransfer, sol_usd: f64) {
        if let Some(opp) = self.evaluate(transfer, sol_usd) {
            info!(
                "Frontrun opportunity on {}: net {} lamports (${:.4})",
                transfer.signature, opp.net_profit_lamports, opp.net_profit_usd
            );
            self.buffer.lock().unwrap().push(opp);
        }
    }

    fn evaluate(&self, transfer: &PendingTransfer, sol_usd: f64) -> Option<Opportunity> {
        if transfer.mint != self.base_mint {
            return None;
        }
        if transfer.amount_lamports < self.min_transfer_lamports {
            return None;
        }
        let impact_fraction = lamports_to_sol(transfer.amount_lamports) * self.impact_per_sol;
        if impact_fraction * 10_000.0 < self.min_impact_bps {
            return None;
        }
        if transfer.direction == TransferDirection::SellBase {
            // Following a sell means buying into falling impact; skip.
            debug!("Skipping {}: impact moves against a follower", transfer.signature);
            return None;
        }

        let sized = (transfer.amount_lamports as f64 * self.follow_fraction) as u64;
        let trade_lamports = sized.min(self.max_trade_lamports);
        let gross = (trade_lamports as f64 * impact_fraction) as i64;
        let total_cost = TRANSACTION_FEES * self.network_fee_lamports
            + self.tip_lamports
            + (2.0 * self.slippage_allowance_pct * trade_lamports as f64) as u64;
        let net_lamports = gross - total_cost as i64;
        if net_lamports <= 0 {
            return None;
        }
        let net_usd = lamports_to_sol(net_lamports as u64) * sol_usd;
        if net_usd < self.min_profit_usd {
            return None;
        }

        let score = confidence(net_lamports, total_cost, CONFIDENCE_DIVISOR, CONFIDENCE_CAP);
        Some(Opportunity::new(
            Strategy::Frontrun,
            vec![self.base_mint],
            vec![],
            trade_lamports,
            (trade_lamports as i64 + gross) as u64,
            net_lamports,
            net_usd,
            score,
            self.ttl_secs,
        ))
    }
}

#[async_trait]
impl Scanner for FrontrunScanner {
    fn name(&self) -> &'static str {
        "frontrun"
    }

    /// Drains the listener's buffer. Anything that expired while waiting to
    /// be polled is dropped here.
    async fn scan(&self) -> Result<Vec<Opportunity>> {
        let mut buffer = self.buffer.lock().unwrap();
        let drained: Vec<Opportunity> = buffer.drain(..).filter(|o| !o.is_expired()).collect();
        Ok(drained)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SOL_USD: f64 = 150.0;

    fn scanner(base: Pubkey) -> FrontrunScanner {
        FrontrunScanner::new(
            Arc::new(ReferencePriceService::fixed(SOL_USD)),
            base,
            500_000_000_000, // 500 SOL
            0.000002,
            10.0,
            0.1,
            200_000_000_000,
            5_000,
            100_000,
            0.0005,
            0.01,
            10,
        )
    }

    fn transfer(
        base: Pubkey,
        amount_lamports: u64,
        direction: TransferDirection,
    ) -> PendingTransfer {
        PendingTransfer {
            signature: "sig".to_string(),
            mint: base,
            amount_lamports,
            direction,
            observed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn large_buy_produces_a_sized_capped_opportunity() {
        let base = Pubkey::new_unique();
        let s = scanner(base);
        // 1000 SOL observed: impact 0.2% (20 bps), follow 10% -> 100 SOL trade.
        s.ingest(&transfer(base, 1_000_000_000_000, TransferDirection::BuyBase), SOL_USD);
        let found = s.scan().await.unwrap();
        assert_eq!(found.len(), 1);
        let opp = &found[0];
        assert_eq!(opp.strategy, Strategy::Frontrun);
        assert_eq!(opp.input_lamports, 100_000_000_000);
        // gross = 100 SOL * 0.002; costs = 2 fees + tip + 2-sided slippage.
        let gross = 200_000_000i64;
        let costs = (2 * 5_000 + 100_000 + 100_000_000) as i64;
        assert_eq!(opp.net_profit_lamports, gross - costs);
        assert!(opp.quotes.is_empty());

        // The buffer drains on poll.
        assert!(s.scan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn small_transfers_and_sells_are_ignored() {
        let base = Pubkey::new_unique();
        let s = scanner(base);
        s.ingest(&transfer(base, 1_000_000_000, TransferDirection::BuyBase), SOL_USD);
        s.ingest(
            &transfer(base, 1_000_000_000_000, TransferDirection::SellBase),
            SOL_USD,
        );
        s.ingest(
            &transfer(Pubkey::new_unique(), 1_000_000_000_000, TransferDirection::BuyBase),
            SOL_USD,
        );
        assert!(s.scan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn trade_size_is_capped_by_max_trade() {
        let base = Pubkey::new_unique();
        let mut s = scanner(base);
        s.max_trade_lamports = 10_000_000_000; // 10 SOL cap
        s.ingest(&transfer(base, 1_000_000_000_000, TransferDirection::BuyBase), SOL_USD);
        let found = s.scan().await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].input_lamports, 10_000_000_000);
    }

    #[tokio::test]
    async fn listener_feeds_the_buffer_through_the_channel() {
        let base = Pubkey::new_unique();
        let s = Arc::new(scanner(base));
        let (tx, rx) = mpsc::channel(16);
        let handle = s.spawn_listener(rx);

        tx.send(transfer(base, 1_000_000_000_000, TransferDirection::BuyBase))
            .await
            .unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(s.scan().await.unwrap().len(), 1);
    }
}
