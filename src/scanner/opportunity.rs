// src/scanner/opportunity.rs
use crate::quote::Quote;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Strategy {
    Cyclic,
    MultiHop,
    Frontrun,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Cyclic => "cyclic",
            Strategy::MultiHop => "multihop",
            Strategy::Frontrun => "frontrun",
        }
    }
}

/// A scored, time-boxed candidate multi-leg trade. Created by a scanner,
/// consumed exactly once by the execution engine (accepted, rejected, or
/// expired) and never acted on after `expires_at`.
#[derive(Debug, Clone)]
pub struct Opportunity {
    pub id: String,
    pub strategy: Strategy,
    /// Ordered mint path, starting and ending at the base mint.
    pub path: Vec<Pubkey>,
    /// The quote chain that produced the pricing (empty for event-driven
    /// strategies that size off observed flow instead of quoted legs).
    pub quotes: Vec<Quote>,
    pub input_lamports: u64,
    pub expected_out_lamports: u64,
    pub net_profit_lamports: i64,
    pub net_profit_usd: f64,
    /// In [0, 1].
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Opportunity {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        strategy: Strategy,
        path: Vec<Pubkey>,
        quotes: Vec<Quote>,
        input_lamports: u64,
        expected_out_lamports: u64,
        net_profit_lamports: i64,
        net_profit_usd: f64,
        confidence: f64,
        ttl_secs: i64,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            strategy,
            path,
            quotes,
            input_lamports,
            expected_out_lamports,
            net_profit_lamports,
            net_profit_usd,
            confidence,
            created_at,
            expires_at: created_at + ChronoDuration::seconds(ttl_secs.max(1)),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.created_at).num_milliseconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opportunity(ttl_secs: i64) -> Opportunity {
        Opportunity::new(
            Strategy::Cyclic,
            vec![Pubkey::new_unique(), Pubkey::new_unique()],
            vec![],
            100_000_000,
            101_500_000,
            1_500_000,
            0.22,
            0.33,
            ttl_secs,
        )
    }

    #[test]
    fn expiry_always_follows_creation() {
        let opp = opportunity(10);
        assert!(opp.expires_at > opp.created_at);
        assert!(!opp.is_expired());

        // Even a degenerate ttl yields a forward-looking window.
        let opp = opportunity(0);
        assert!(opp.expires_at > opp.created_at);
    }

    #[test]
    fn each_opportunity_gets_a_distinct_id() {
        assert_ne!(opportunity(10).id, opportunity(10).id);
    }
}
