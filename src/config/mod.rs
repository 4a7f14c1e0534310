// src/config/mod.rs
use crate::error::{EngineError, Result};
use std::env;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_csv(key: &str) -> Vec<String> {
    env::var(key)
        .ok()
        .map(|s| {
            s.split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// All runtime knobs, loaded once at startup and passed by reference to each
/// component at construction.
#[derive(Debug, Clone)]
pub struct Config {
    // RPC access layer
    pub rpc_url: String,
    pub rpc_url_backup: Option<String>,
    pub health_check_interval_secs: u64,

    // Quote provider
    pub quote_api_url: String,
    pub quote_requests_per_sec: u32,
    pub quote_slippage_bps: u16,

    // Wallet
    pub trader_wallet_keypair_path: String,

    // Scanner universe
    pub base_mint: String,
    pub intermediate_mints: Vec<String>,
    pub stable_mints: Vec<String>,
    pub max_pair_combinations: usize,
    pub probe_amount_lamports: u64,
    pub cyclic_scan_interval_secs: u64,
    pub multihop_scan_interval_secs: u64,
    pub opportunity_ttl_secs: u64,

    // Modeled costs
    pub network_fee_lamports: u64,
    pub default_priority_fee_lamports: u64,
    pub platform_fee_pct: f64,
    pub pool_fee_pct: f64,
    pub slippage_allowance_pct: f64,

    // Profit gating (USD)
    pub min_profit_usd_cyclic: f64,
    pub min_profit_usd_multihop: f64,
    pub min_profit_usd_frontrun: f64,

    // Reference price
    pub sol_price_usd_fallback: f64,
    pub price_ttl_secs: u64,

    // Frontrun strategy
    pub frontrun_min_transfer_lamports: u64,
    pub frontrun_impact_per_sol: f64,
    pub frontrun_min_impact_bps: f64,
    pub frontrun_follow_fraction: f64,
    pub frontrun_max_trade_lamports: u64,
    pub frontrun_tip_lamports: u64,

    // Execution
    pub capital_ceiling_lamports: u64,
    pub max_concurrent_trades: usize,
    pub breaker_threshold: u32,
    pub breaker_cooldown_secs: u64,
    pub daily_loss_limit_usd: f64,
    pub simulation_timeout_secs: u64,
    pub submission_timeout_secs: u64,
    pub stale_trade_max_age_secs: u64,
    pub paper_trading: bool,

    // Bundle submission
    pub block_engine_url: String,
    pub default_tip_lamports: u64,
    pub bundle_wait_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            rpc_url: env::var("RPC_URL").unwrap_or_default(),
            rpc_url_backup: env::var("RPC_URL_BACKUP").ok().filter(|s| !s.is_empty()),
            // Liveness probing tighter than every 30s buys nothing and burns
            // the request budget.
            health_check_interval_secs: env_parse("HEALTH_CHECK_INTERVAL_SECS", 30u64).max(30),

            quote_api_url: env::var("QUOTE_API_URL")
                .unwrap_or_else(|_| "https://quote-api.jup.ag/v6".to_string()),
            quote_requests_per_sec: env_parse("QUOTE_REQUESTS_PER_SEC", 10u32).max(1),
            quote_slippage_bps: env_parse("QUOTE_SLIPPAGE_BPS", 50u16),

            trader_wallet_keypair_path: env::var("TRADER_WALLET_KEYPAIR_PATH").unwrap_or_default(),

            // Empty means the native SOL mint; resolved at wiring time.
            base_mint: env::var("BASE_MINT").unwrap_or_default(),
            intermediate_mints: env_csv("INTERMEDIATE_MINTS"),
            stable_mints: env_csv("STABLE_MINTS"),
            max_pair_combinations: env_parse("MAX_PAIR_COMBINATIONS", 12usize),
            probe_amount_lamports: env_parse("PROBE_AMOUNT_LAMPORTS", 100_000_000u64),
            cyclic_scan_interval_secs: env_parse("CYCLIC_SCAN_INTERVAL_SECS", 3u64),
            multihop_scan_interval_secs: env_parse("MULTIHOP_SCAN_INTERVAL_SECS", 5u64),
            opportunity_ttl_secs: env_parse("OPPORTUNITY_TTL_SECS", 10u64).clamp(8, 15),

            network_fee_lamports: env_parse("NETWORK_FEE_LAMPORTS", 5_000u64),
            default_priority_fee_lamports: env_parse("DEFAULT_PRIORITY_FEE_LAMPORTS", 10_000u64),
            platform_fee_pct: env_parse("PLATFORM_FEE_PCT", 0.001f64),
            pool_fee_pct: env_parse("POOL_FEE_PCT", 0.0025f64),
            slippage_allowance_pct: env_parse("SLIPPAGE_ALLOWANCE_PCT", 0.003f64),

            min_profit_usd_cyclic: env_parse("MIN_PROFIT_USD_CYCLIC", 0.25f64),
            min_profit_usd_multihop: env_parse("MIN_PROFIT_USD_MULTIHOP", 0.50f64),
            min_profit_usd_frontrun: env_parse("MIN_PROFIT_USD_FRONTRUN", 1.00f64),

            sol_price_usd_fallback: env_parse("SOL_PRICE_USD", 150.0f64),
            price_ttl_secs: env_parse("PRICE_TTL_SECS", 60u64),

            frontrun_min_transfer_lamports: env_parse(
                "FRONTRUN_MIN_TRANSFER_LAMPORTS",
                500_000_000_000u64,
            ),
            frontrun_impact_per_sol: env_parse("FRONTRUN_IMPACT_PER_SOL", 0.000002f64),
            frontrun_min_impact_bps: env_parse("FRONTRUN_MIN_IMPACT_BPS", 10.0f64),
            frontrun_follow_fraction: env_parse("FRONTRUN_FOLLOW_FRACTION", 0.1f64),
            frontrun_max_trade_lamports: env_parse("FRONTRUN_MAX_TRADE_LAMPORTS", 2_000_000_000u64),
            frontrun_tip_lamports: env_parse("FRONTRUN_TIP_LAMPORTS", 100_000u64),

            capital_ceiling_lamports: env_parse("CAPITAL_CEILING_LAMPORTS", 5_000_000_000u64),
            max_concurrent_trades: env_parse("MAX_CONCURRENT_TRADES", 2usize).max(1),
            breaker_threshold: env_parse("BREAKER_THRESHOLD", 5u32).max(1),
            breaker_cooldown_secs: env_parse("BREAKER_COOLDOWN_SECS", 300u64),
            daily_loss_limit_usd: env_parse("DAILY_LOSS_LIMIT_USD", 50.0f64),
            simulation_timeout_secs: env_parse("SIMULATION_TIMEOUT_SECS", 10u64),
            submission_timeout_secs: env_parse("SUBMISSION_TIMEOUT_SECS", 30u64),
            stale_trade_max_age_secs: env_parse("STALE_TRADE_MAX_AGE_SECS", 120u64),
            paper_trading: env_parse("PAPER_TRADING", false),

            block_engine_url: env::var("BLOCK_ENGINE_URL")
                .unwrap_or_else(|_| "https://mainnet.block-engine.jito.wtf".to_string()),
            default_tip_lamports: env_parse("DEFAULT_TIP_LAMPORTS", 10_000u64),
            bundle_wait_secs: env_parse("BUNDLE_WAIT_SECS", 30u64),
        }
    }

    /// Startup validation. Anything that fails here is fatal: the process must
    /// not trade on a partially-specified configuration.
    pub fn validate(&self) -> Result<()> {
        if self.rpc_url.is_empty() {
            return Err(EngineError::Config("RPC_URL is not set".to_string()));
        }
        if self.trader_wallet_keypair_path.is_empty() {
            return Err(EngineError::Config(
                "TRADER_WALLET_KEYPAIR_PATH is not set".to_string(),
            ));
        }
        url::Url::parse(&self.quote_api_url)
            .map_err(|e| EngineError::Config(format!("QUOTE_API_URL is invalid: {}", e)))?;
        url::Url::parse(&self.block_engine_url)
            .map_err(|e| EngineError::Config(format!("BLOCK_ENGINE_URL is invalid: {}", e)))?;
        if self.probe_amount_lamports == 0 {
            return Err(EngineError::Config(
                "PROBE_AMOUNT_LAMPORTS must be positive".to_string(),
            ));
        }
        if self.capital_ceiling_lamports == 0 {
            return Err(EngineError::Config(
                "CAPITAL_CEILING_LAMPORTS must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.frontrun_follow_fraction) {
            return Err(EngineError::Config(
                "FRONTRUN_FOLLOW_FRACTION must be within [0, 1]".to_string(),
            ));
        }
        log::info!("Configuration validated: {:?}", self);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        let mut cfg = Config::from_env();
        cfg.rpc_url = "http://127.0.0.1:8899".to_string();
        cfg.trader_wallet_keypair_path = "/tmp/id.json".to_string();
        cfg
    }

    #[test]
    fn missing_rpc_url_is_fatal() {
        let mut cfg = base_config();
        cfg.rpc_url = String::new();
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn missing_keypair_path_is_fatal() {
        let mut cfg = base_config();
        cfg.trader_wallet_keypair_path = String::new();
        assert!(matches!(
            cfg.validate().unwrap_err(),
            EngineError::Config(_)
        ));
    }

    #[test]
    fn opportunity_ttl_is_clamped_to_the_validity_window() {
        let cfg = base_config();
        assert!((8..=15).contains(&cfg.opportunity_ttl_secs));
    }

    #[test]
    fn health_check_interval_floor_is_30s() {
        let cfg = base_config();
        assert!(cfg.health_check_interval_secs >= 30);
    }
}
