// src/simulator/mod.rs
//! Preflight simulation and fee-aware profitability checks.
//!
//! A dry run executes against current chain state (`replace_recent_blockhash`
//! forces a fresh state reference, avoiding stale-state false negatives) with
//! signature verification skipped for speed. Explicit failures are classified
//! against an ordered pattern table; a thrown RPC error is captured as its own
//! classification rather than propagated.

use crate::rpc::RpcManager;
use log::{debug, error, info};
use once_cell::sync::Lazy;
use solana_client::rpc_config::RpcSimulateTransactionConfig;
use solana_sdk::{commitment_config::CommitmentConfig, transaction::VersionedTransaction};
use solana_transaction_status::UiTransactionEncoding;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimErrorKind {
    InsufficientFunds,
    ComputeBudgetExceeded,
    SlippageExceeded,
    CustomProgramError,
    TransactionTooLarge,
    StaleBlockhash,
    AccountNotFound,
    InvalidAccountData,
    ProgramFailed,
    /// The simulation call itself failed (network, timeout), as opposed to
    /// the simulated transaction failing.
    SimulationException,
    Unknown,
}

impl SimErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimErrorKind::InsufficientFunds => "insufficient_funds",
            SimErrorKind::ComputeBudgetExceeded => "compute_budget_exceeded",
            SimErrorKind::SlippageExceeded => "slippage_exceeded",
            SimErrorKind::CustomProgramError => "custom_program_error",
            SimErrorKind::TransactionTooLarge => "transaction_too_large",
            SimErrorKind::StaleBlockhash => "stale_blockhash",
            SimErrorKind::AccountNotFound => "account_not_found",
            SimErrorKind::InvalidAccountData => "invalid_account_data",
            SimErrorKind::ProgramFailed => "program_failed",
            SimErrorKind::SimulationException => "simulation_exception",
            SimErrorKind::Unknown => "unknown_simulation_error",
        }
    }
}

/// Ordered classification table; first matching pattern wins. The numeric
/// custom-error codes known to mean slippage/amount mismatch sit ahead of the
/// generic custom-program-error entry so they are not swallowed by it.
static ERROR_PATTERNS: Lazy<Vec<(&'static [&'static str], SimErrorKind)>> = Lazy::new(|| {
    vec![
        (
            &["insufficient funds", "insufficient lamports", "insufficientfundsforfee"][..],
            SimErrorKind::InsufficientFunds,
        ),
        (
            &["exceeded cus meter", "computebudgetexceeded", "computational budget exceeded"][..],
            SimErrorKind::ComputeBudgetExceeded,
        ),
        (&["0x1771", "custom(6001)"][..], SimErrorKind::SlippageExceeded),
        (
            &["custom program error", "custom("][..],
            SimErrorKind::CustomProgramError,
        ),
        (&["too large", "oversized"][..], SimErrorKind::TransactionTooLarge),
        (
            &["blockhash not found", "blockhashnotfound"][..],
            SimErrorKind::StaleBlockhash,
        ),
        (
            &["account not found", "accountnotfound", "could not find account"][..],
            SimErrorKind::AccountNotFound,
        ),
        (
            &["invalid account data", "invalidaccountdata"][..],
            SimErrorKind::InvalidAccountData,
        ),
        (
            &["program failed to complete", "programfailedtocomplete"][..],
            SimErrorKind::ProgramFailed,
        ),
        (
            &["slippage tolerance exceeded", "slippagetoleranceexceeded"][..],
            SimErrorKind::SlippageExceeded,
        ),
    ]
});

/// Classifies a failed simulation. Each pattern group is checked against the
/// top-level error first, then every log line.
pub fn classify_error(top_level: &str, logs: &[String]) -> SimErrorKind {
    let top = top_level.to_lowercase();
    let lowered: Vec<String> = logs.iter().map(|l| l.to_lowercase()).collect();
    for (needles, kind) in ERROR_PATTERNS.iter() {
        for needle in *needles {
            if top.contains(needle) || lowered.iter().any(|l| l.contains(needle)) {
                return *kind;
            }
        }
    }
    SimErrorKind::Unknown
}

#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub success: bool,
    pub compute_units: Option<u64>,
    pub error: Option<SimErrorKind>,
    pub logs: Vec<String>,
}

impl SimulationResult {
    fn exception(detail: String) -> Self {
        Self {
            success: false,
            compute_units: None,
            error: Some(SimErrorKind::SimulationException),
            logs: vec![detail],
        }
    }
}

// Profitability constants: a fixed compute-unit assumption priced at a fixed
// micro-lamport rate, plus the flat signature fee.
pub const ASSUMED_COMPUTE_UNITS: u64 = 1_400_000;
pub const MICRO_LAMPORTS_PER_CU: u64 = 10_000;
pub const BASE_FEE_LAMPORTS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfitVerdict {
    Profitable,
    BreakEven,
    Loss,
}

#[derive(Debug, Clone)]
pub struct ProfitabilityResult {
    pub gross_profit_lamports: i64,
    pub gas_cost_lamports: u64,
    pub net_profit_lamports: i64,
    pub verdict: ProfitVerdict,
    pub reason: String,
}

/// Estimated gas for one attempt under the fixed assumptions.
pub fn estimated_gas_lamports() -> u64 {
    ASSUMED_COMPUTE_UNITS * MICRO_LAMPORTS_PER_CU / 1_000_000 + BASE_FEE_LAMPORTS
}

/// Pure gross/net profitability check against the fixed gas assumptions.
pub fn check_profitability(input_lamports: u64, expected_out_lamports: u64) -> ProfitabilityResult {
    let gross = expected_out_lamports as i64 - input_lamports as i64;
    let gas = estimated_gas_lamports();
    let net = gross - gas as i64;
    let (verdict, reason) = if net > 0 {
        (
            ProfitVerdict::Profitable,
            format!("nets {} lamports after {} gas", net, gas),
        )
    } else if net == 0 {
        (
            ProfitVerdict::BreakEven,
            format!("gross {} exactly covers {} gas", gross, gas),
        )
    } else {
        (
            ProfitVerdict::Loss,
            format!("short {} lamports after {} gas", -net, gas),
        )
    };
    ProfitabilityResult {
        gross_profit_lamports: gross,
        gas_cost_lamports: gas,
        net_profit_lamports: net,
        verdict,
        reason,
    }
}

pub struct PreflightSimulator {
    rpc: Arc<RpcManager>,
    call_timeout: Duration,
}

impl PreflightSimulator {
    pub fn new(rpc: Arc<RpcManager>, call_timeout_secs: u64) -> Self {
        Self {
            rpc,
            call_timeout: Duration::from_secs(call_timeout_secs),
        }
    }

    /// Non-committing dry run. Never returns an error: every failure mode is
    /// folded into the result's classification.
    pub async fn simulate(&self, tx: &VersionedTransaction) -> SimulationResult {
        let client = match self.rpc.active() {
            Ok(c) => c,
            Err(e) => return SimulationResult::exception(e.to_string()),
        };
        let config = RpcSimulateTransactionConfig {
            sig_verify: false,
            replace_recent_blockhash: true,
            commitment: Some(CommitmentConfig::confirmed()),
            encoding: Some(UiTransactionEncoding::Base64),
            accounts: None,
            min_context_slot: None,
            inner_instructions: false,
        };

        let outcome = timeout(
            self.call_timeout,
            client.simulate_transaction_with_config(tx, config),
        )
        .await;
        match outcome {
            Err(_) => {
                self.rpc.report_failure();
                SimulationResult::exception("simulation timed out".to_string())
            }
            Ok(Err(e)) => {
                self.rpc.report_failure();
                error!("Simulation RPC call failed: {}", e);
                SimulationResult::exception(e.to_string())
            }
            Ok(Ok(response)) => {
                self.rpc.report_success();
                let value = response.value;
                let logs = value.logs.unwrap_or_default();
                match value.err {
                    None => {
                        debug!(
                            "Simulation ok, {} CUs consumed",
                            value.units_consumed.unwrap_or_default()
                        );
                        SimulationResult {
                            success: true,
                            compute_units: value.units_consumed,
                            error: None,
                            logs,
                        }
                    }
                    Some(err) => {
                        let kind = classify_error(&format!("{:?}", err), &logs);
                        info!("Simulation failed as {}: {:?}", kind.as_str(), err);
                        SimulationResult {
                            success: false,
                            compute_units: value.units_consumed,
                            error: Some(kind),
                            logs,
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn first_matching_pattern_wins() {
        let kind = classify_error(
            "Transfer: insufficient funds, also custom program error",
            &[],
        );
        assert_eq!(kind, SimErrorKind::InsufficientFunds);
    }

    #[test]
    fn known_numeric_codes_classify_as_slippage_not_generic_custom() {
        let kind = classify_error("InstructionError(3, Custom(6001))", &[]);
        assert_eq!(kind, SimErrorKind::SlippageExceeded);

        let kind = classify_error(
            "transaction failed",
            &["Program log: custom program error: 0x1771".to_string()],
        );
        assert_eq!(kind, SimErrorKind::SlippageExceeded);

        let kind = classify_error("InstructionError(1, Custom(42))", &[]);
        assert_eq!(kind, SimErrorKind::CustomProgramError);
    }

    #[test]
    fn log_lines_are_searched_when_the_top_level_is_opaque() {
        let kind = classify_error(
            "InstructionError(0, ProgramFailedToComplete)",
            &["Program consumed 1400001 of 1400000 compute units: exceeded CUs meter".to_string()],
        );
        // The compute entry precedes the program-failed entry in the table,
        // and its needle only appears in the log line.
        assert_eq!(kind, SimErrorKind::ComputeBudgetExceeded);
    }

    #[test]
    fn stale_blockhash_and_oversize_are_distinguished() {
        assert_eq!(
            classify_error("BlockhashNotFound", &[]),
            SimErrorKind::StaleBlockhash
        );
        assert_eq!(
            classify_error("transaction too large: 1400 bytes", &[]),
            SimErrorKind::TransactionTooLarge
        );
    }

    #[test]
    fn unmatched_errors_fall_through_to_unknown() {
        assert_eq!(
            classify_error("something nobody anticipated", &["???".to_string()]),
            SimErrorKind::Unknown
        );
    }

    #[test]
    fn profitability_boundaries_are_exact() {
        let gas = estimated_gas_lamports();
        assert_eq!(gas, 19_000);

        let result = check_profitability(100_000_000, 100_000_000 + gas);
        assert_eq!(result.verdict, ProfitVerdict::BreakEven);
        assert_eq!(result.net_profit_lamports, 0);

        let result = check_profitability(100_000_000, 100_000_000 + gas + 1);
        assert_eq!(result.verdict, ProfitVerdict::Profitable);
        assert_eq!(result.net_profit_lamports, 1);

        let result = check_profitability(100_000_000, 100_000_000 + gas - 1);
        assert_eq!(result.verdict, ProfitVerdict::Loss);
        assert_eq!(result.net_profit_lamports, -1);
    }
}
