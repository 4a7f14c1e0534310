// src/ledger/mod.rs
//! Durable ledger contract. The storage engine lives elsewhere; only its
//! read/write contract is consumed here.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct TradeRecord {
    pub trade_id: String,
    pub strategy: String,
    pub path: Vec<String>,
    pub input_lamports: u64,
    pub expected_out_lamports: u64,
    pub net_profit_usd: f64,
    pub outcome: String,
    pub detail: String,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn record_trade(&self, record: &TradeRecord) -> Result<()>;
    async fn update_trade(&self, trade_id: &str, fields: serde_json::Value) -> Result<()>;
    async fn record_daily_pnl(&self, delta_usd: f64) -> Result<()>;
}

/// Log-backed ledger used for paper runs and tests.
pub struct LogLedger;

#[async_trait]
impl Ledger for LogLedger {
    async fn record_trade(&self, record: &TradeRecord) -> Result<()> {
        info!(
            "Ledger trade {}: {} ({}) ${:.4}",
            record.trade_id, record.outcome, record.strategy, record.net_profit_usd
        );
        Ok(())
    }

    async fn update_trade(&self, trade_id: &str, fields: serde_json::Value) -> Result<()> {
        info!("Ledger update {}: {}", trade_id, fields);
        Ok(())
    }

    async fn record_daily_pnl(&self, delta_usd: f64) -> Result<()> {
        info!("Ledger daily pnl delta: ${:.4}", delta_usd);
        Ok(())
    }
}
