// src/positions/mod.rs
//! Capital exposure bookkeeping.
//!
//! One open position per trade id, total open exposure bounded by the capital
//! ceiling, exact-lamport realized P&L on close. Closed history is capped so
//! long-running processes stay bounded.

use crate::error::{EngineError, Result};
use crate::scanner::Strategy;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use log::{info, warn};
use solana_sdk::pubkey::Pubkey;
use std::collections::VecDeque;
use std::sync::Mutex;

pub const CLOSED_HISTORY_CAP: usize = 1_000;

#[derive(Debug, Clone)]
pub struct Position {
    pub trade_id: String,
    pub strategy: Strategy,
    pub mint: Pubkey,
    pub amount_lamports: u64,
    pub entry_price_usd: f64,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ClosedPosition {
    pub trade_id: String,
    pub strategy: Strategy,
    pub mint: Pubkey,
    pub entry_amount_lamports: u64,
    pub entry_price_usd: f64,
    pub exit_amount_lamports: u64,
    pub exit_price_usd: f64,
    pub realized_pnl_lamports: i64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub hold_duration_ms: i64,
}

pub struct PositionTracker {
    open: DashMap<String, Position>,
    closed: Mutex<VecDeque<ClosedPosition>>,
    capital_ceiling_lamports: u64,
    history_cap: usize,
}

impl PositionTracker {
    pub fn new(capital_ceiling_lamports: u64) -> Self {
        Self::with_history_cap(capital_ceiling_lamports, CLOSED_HISTORY_CAP)
    }

    pub fn with_history_cap(capital_ceiling_lamports: u64, history_cap: usize) -> Self {
        Self {
            open: DashMap::new(),
            closed: Mutex::new(VecDeque::new()),
            capital_ceiling_lamports,
            history_cap: history_cap.max(1),
        }
    }

    /// Opens a position. Idempotent: a second open for an existing trade id is
    /// a warning no-op, never an overwrite. Refuses an open that would push
    /// total exposure past the capital ceiling.
    pub fn open(
        &self,
        trade_id: &str,
        strategy: Strategy,
        mint: Pubkey,
        amount_lamports: u64,
        entry_price_usd: f64,
    ) -> Result<()> {
        if self.open.contains_key(trade_id) {
            warn!("Duplicate open for trade {} ignored", trade_id);
            return Ok(());
        }
        let exposure = self.open_exposure();
        if exposure.saturating_add(amount_lamports) > self.capital_ceiling_lamports {
            return Err(EngineError::InsufficientBalance(format!(
                "opening {} lamports would exceed the capital ceiling ({} committed of {})",
                amount_lamports, exposure, self.capital_ceiling_lamports
            )));
        }
        self.open.insert(
            trade_id.to_string(),
            Position {
                trade_id: trade_id.to_string(),
                strategy,
                mint,
                amount_lamports,
                entry_price_usd,
                opened_at: Utc::now(),
            },
        );
        info!(
            "Position opened: {} ({}, {} lamports)",
            trade_id,
            strategy.as_str(),
            amount_lamports
        );
        Ok(())
    }

    /// Closes a position; `None` if the trade id is unknown. Realized P&L is
    /// exact: exit amount minus entry amount, in lamports.
    pub fn close(
        &self,
        trade_id: &str,
        exit_amount_lamports: u64,
        exit_price_usd: f64,
    ) -> Option<ClosedPosition> {
        let (_, position) = self.open.remove(trade_id)?;
        let closed_at = Utc::now();
        let closed = ClosedPosition {
            trade_id: position.trade_id,
            strategy: position.strategy,
            mint: position.mint,
            entry_amount_lamports: position.amount_lamports,
            entry_price_usd: position.entry_price_usd,
            exit_amount_lamports,
            exit_price_usd,
            realized_pnl_lamports: exit_amount_lamports as i64 - position.amount_lamports as i64,
            opened_at: position.opened_at,
            closed_at,
            hold_duration_ms: (closed_at - position.opened_at).num_milliseconds(),
        };
        info!(
            "Position closed: {} pnl {} lamports after {}ms",
            closed.trade_id, closed.realized_pnl_lamports, closed.hold_duration_ms
        );
        let mut history = self.closed.lock().unwrap();
        if history.len() >= self.history_cap {
            history.pop_front();
        }
        history.push_back(closed.clone());
        Some(closed)
    }

    pub fn get(&self, trade_id: &str) -> Option<Position> {
        self.open.get(trade_id).map(|p| p.clone())
    }

    /// Sum of all open commitments. Hot-path read, O(open-count).
    pub fn open_exposure(&self) -> u64 {
        self.open.iter().map(|p| p.amount_lamports).sum()
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Positions older than `max_age_ms`: trades that never settled.
    pub fn stale(&self, max_age_ms: i64) -> Vec<Position> {
        let cutoff = Utc::now() - ChronoDuration::milliseconds(max_age_ms);
        self.open
            .iter()
            .filter(|p| p.opened_at < cutoff)
            .map(|p| p.clone())
            .collect()
    }

    pub fn closed_recent(&self, limit: usize) -> Vec<ClosedPosition> {
        let history = self.closed.lock().unwrap();
        history.iter().rev().take(limit).cloned().collect()
    }

    pub fn realized_pnl_lamports(&self) -> i64 {
        let history = self.closed.lock().unwrap();
        history.iter().map(|c| c.realized_pnl_lamports).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CEILING: u64 = 1_000_000_000;

    fn tracker() -> PositionTracker {
        PositionTracker::new(CEILING)
    }

    #[test]
    fn duplicate_open_is_a_no_op_not_an_overwrite() {
        let t = tracker();
        t.open("t1", Strategy::Cyclic, Pubkey::new_unique(), 100, 150.0)
            .unwrap();
        t.open("t1", Strategy::Cyclic, Pubkey::new_unique(), 999, 151.0)
            .unwrap();
        assert_eq!(t.open_count(), 1);
        assert_eq!(t.get("t1").unwrap().amount_lamports, 100);
        assert_eq!(t.open_exposure(), 100);
    }

    #[test]
    fn exposure_never_exceeds_the_ceiling() {
        let t = tracker();
        t.open("a", Strategy::Cyclic, Pubkey::new_unique(), 600_000_000, 150.0)
            .unwrap();
        t.open("b", Strategy::MultiHop, Pubkey::new_unique(), 300_000_000, 150.0)
            .unwrap();
        let err = t
            .open("c", Strategy::Cyclic, Pubkey::new_unique(), 200_000_000, 150.0)
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientBalance(_)));
        assert!(t.open_exposure() <= CEILING);
        // A fitting open still goes through.
        t.open("d", Strategy::Cyclic, Pubkey::new_unique(), 100_000_000, 150.0)
            .unwrap();
        assert_eq!(t.open_exposure(), CEILING);
    }

    #[test]
    fn close_round_trip_is_lamport_exact() {
        let t = tracker();
        t.open("t1", Strategy::Cyclic, Pubkey::new_unique(), 100_000_000, 150.0)
            .unwrap();
        let closed = t.close("t1", 101_500_000, 151.0).unwrap();
        assert_eq!(closed.realized_pnl_lamports, 1_500_000);
        assert!(closed.hold_duration_ms >= 0);
        assert!(t.get("t1").is_none());
        assert_eq!(t.open_exposure(), 0);
        assert_eq!(t.realized_pnl_lamports(), 1_500_000);

        // Losses come out negative and exact too.
        t.open("t2", Strategy::Cyclic, Pubkey::new_unique(), 100_000_000, 150.0)
            .unwrap();
        let closed = t.close("t2", 98_000_000, 149.0).unwrap();
        assert_eq!(closed.realized_pnl_lamports, -2_000_000);
    }

    #[test]
    fn closing_an_unknown_trade_returns_none() {
        assert!(tracker().close("ghost", 1, 1.0).is_none());
    }

    #[test]
    fn stale_positions_are_reported() {
        let t = tracker();
        t.open("old", Strategy::Cyclic, Pubkey::new_unique(), 100, 150.0)
            .unwrap();
        t.open("new", Strategy::Cyclic, Pubkey::new_unique(), 100, 150.0)
            .unwrap();
        t.open
            .get_mut("old")
            .unwrap()
            .opened_at = Utc::now() - ChronoDuration::seconds(300);

        let stale = t.stale(120_000);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].trade_id, "old");
    }

    #[test]
    fn closed_history_evicts_oldest_first() {
        let t = PositionTracker::with_history_cap(CEILING, 2);
        for i in 0..3u64 {
            let id = format!("t{}", i);
            t.open(&id, Strategy::Cyclic, Pubkey::new_unique(), 100, 150.0)
                .unwrap();
            t.close(&id, 100 + i, 150.0);
        }
        let recent = t.closed_recent(10);
        assert_eq!(recent.len(), 2);
        // Newest first; t0 was evicted.
        assert_eq!(recent[0].trade_id, "t2");
        assert_eq!(recent[1].trade_id, "t1");
    }
}
