// src/engine/mod.rs
//! Execution orchestrator.
//!
//! One opportunity at a time walks Discovered -> Validated -> Simulated ->
//! Submitted -> {Landed, Failed, Expired}. Expiry is checked at every state
//! checkpoint (in-flight submissions complete and are recorded, but no new
//! work starts on an expired opportunity). Committing capital and opening a
//! position is one atomic check-and-reserve step behind a single mutex shared
//! by every strategy's execution path.

pub mod events;

pub use events::{EventBus, LifecycleEvent};

use crate::builder::TransactionBuilder;
use crate::bundle::{BundleClient, BundleState};
use crate::config::Config;
use crate::ledger::{Ledger, TradeRecord};
use crate::monitoring::{AlertSeverity, AlertSink};
use crate::positions::PositionTracker;
use crate::price::ReferencePriceService;
use crate::quote::QuoteClient;
use crate::rpc::RpcManager;
use crate::scanner::{CostModel, Opportunity, Strategy};
use crate::simulator::PreflightSimulator;
use crate::utils::lamports_to_sol;
use chrono::{NaiveDate, Utc};
use log::{debug, info, warn};
use rand::Rng;
use solana_sdk::transaction::VersionedTransaction;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;

const DEFAULT_COMPUTE_LIMIT: u32 = 600_000;
const MAX_SUBMIT_ATTEMPTS: u32 = 3;
const SUBMIT_BACKOFF_BASE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeState {
    Discovered,
    Validated,
    Simulated,
    Submitted,
    Landed,
    Failed,
    Expired,
}

/// Exactly one category per terminal outcome, for post-hoc auditing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeCategory {
    LandedOk,
    ExecutionFailed,
    SimulationRejected,
    EconomicallyRejected,
    Expired,
    BreakerRefused,
    DailyLossRefused,
}

impl OutcomeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeCategory::LandedOk => "landed",
            OutcomeCategory::ExecutionFailed => "execution_failed",
            OutcomeCategory::SimulationRejected => "simulation_rejected",
            OutcomeCategory::EconomicallyRejected => "economically_rejected",
            OutcomeCategory::Expired => "expired",
            OutcomeCategory::BreakerRefused => "breaker_refused",
            OutcomeCategory::DailyLossRefused => "daily_loss_refused",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TradeOutcome {
    pub trade_id: String,
    pub state: TradeState,
    pub category: OutcomeCategory,
    pub detail: String,
    pub realized_pnl_lamports: i64,
}

/// Consecutive-failure circuit breaker with a time-based cooldown.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    consecutive_failures: u32,
    tripped_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            consecutive_failures: 0,
            tripped_at: None,
        }
    }

    /// Records a failure; returns true exactly when this failure trips the
    /// breaker (so the trip alert fires once, not once per refusal).
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        if self.tripped_at.is_none() && self.consecutive_failures >= self.threshold {
            self.tripped_at = Some(Instant::now());
            return true;
        }
        false
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.tripped_at = None;
    }

    pub fn is_open(&mut self) -> bool {
        match self.tripped_at {
            Some(at) if at.elapsed() >= self.cooldown => {
                // Cooldown elapsed: close and start counting afresh.
                self.tripped_at = None;
                self.consecutive_failures = 0;
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

/// Cumulative realized P&L per UTC day; submissions halt for the remainder of
/// the day once the loss ceiling is crossed.
#[derive(Debug)]
pub struct DailyLossGate {
    limit_usd: f64,
    date: NaiveDate,
    pnl_usd: f64,
}

impl DailyLossGate {
    pub fn new(limit_usd: f64, today: NaiveDate) -> Self {
        Self {
            limit_usd,
            date: today,
            pnl_usd: 0.0,
        }
    }

    fn roll(&mut self, today: NaiveDate) {
        if today != self.date {
            self.date = today;
            self.pnl_usd = 0.0;
        }
    }

    /// Returns true exactly when this delta crosses the ceiling.
    pub fn add(&mut self, delta_usd: f64, today: NaiveDate) -> bool {
        self.roll(today);
        let was_tripped = self.tripped();
        self.pnl_usd += delta_usd;
        !was_tripped && self.tripped()
    }

    pub fn is_tripped(&mut self, today: NaiveDate) -> bool {
        self.roll(today);
        self.tripped()
    }

    fn tripped(&self) -> bool {
        self.pnl_usd <= -self.limit_usd
    }

    pub fn pnl_usd(&self) -> f64 {
        self.pnl_usd
    }
}

struct ControlState {
    breaker: CircuitBreaker,
    daily: DailyLossGate,
}

struct SlotState {
    active: usize,
}

pub struct ExecutionEngine {
    config: Config,
    rpc: Arc<RpcManager>,
    quote_client: Arc<dyn QuoteClient>,
    simulator: PreflightSimulator,
    builder: TransactionBuilder,
    bundle: Arc<BundleClient>,
    positions: Arc<PositionTracker>,
    price: Arc<ReferencePriceService>,
    ledger: Arc<dyn Ledger>,
    alerts: Arc<dyn AlertSink>,
    events: EventBus,
    base_cost_model: CostModel,
    control: std::sync::Mutex<ControlState>,
    // The serialization point: capital commit + position open is atomic here.
    slots: AsyncMutex<SlotState>,
}

impl ExecutionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        rpc: Arc<RpcManager>,
        quote_client: Arc<dyn QuoteClient>,
        simulator: PreflightSimulator,
        builder: TransactionBuilder,
        bundle: Arc<BundleClient>,
        positions: Arc<PositionTracker>,
        price: Arc<ReferencePriceService>,
        ledger: Arc<dyn Ledger>,
        alerts: Arc<dyn AlertSink>,
        events: EventBus,
    ) -> Self {
        let base_cost_model = CostModel::from_config(&config);
        let control = std::sync::Mutex::new(ControlState {
            breaker: CircuitBreaker::new(
                config.breaker_threshold,
                Duration::from_secs(config.breaker_cooldown_secs),
            ),
            daily: DailyLossGate::new(config.daily_loss_limit_usd, Utc::now().date_naive()),
        });
        Self {
            config,
            rpc,
            quote_client,
            simulator,
            builder,
            bundle,
            positions,
            price,
            ledger,
            alerts,
            events,
            base_cost_model,
            control,
            slots: AsyncMutex::new(SlotState { active: 0 }),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Drives one opportunity to a terminal state.
    pub async fn process(&self, opportunity: Opportunity) -> TradeOutcome {
        self.events.publish(LifecycleEvent::OpportunityFound {
            id: opportunity.id.clone(),
            strategy: opportunity.strategy.as_str(),
            net_profit_usd: opportunity.net_profit_usd,
            confidence: opportunity.confidence,
        });

        // Discovered -> Validated checkpoint.
        if opportunity.is_expired() {
            return self.finish_expired(&opportunity, TradeState::Expired).await;
        }
        let revalidated = match self.revalidate(&opportunity).await {
            Ok(net) => net,
            Err(outcome) => return outcome,
        };

        // Validated -> Simulated is gated by the breaker and the daily loss
        // ceiling.
        let (breaker_open, daily_tripped) = {
            let mut control = self.control.lock().unwrap();
            let today = Utc::now().date_naive();
            (control.breaker.is_open(), control.daily.is_tripped(today))
        };
        if breaker_open {
            debug!("Breaker open, refusing {}", opportunity.id);
            return self
                .finish(
                    &opportunity,
                    TradeState::Failed,
                    OutcomeCategory::BreakerRefused,
                    "circuit breaker open".to_string(),
                    0,
                )
                .await;
        }
        if daily_tripped {
            debug!("Daily loss limit active, refusing {}", opportunity.id);
            return self
                .finish(
                    &opportunity,
                    TradeState::Failed,
                    OutcomeCategory::DailyLossRefused,
                    "daily loss limit reached".to_string(),
                    0,
                )
                .await;
        }

        if self.config.paper_trading {
            return self.settle_paper(&opportunity, revalidated).await;
        }
        self.execute_live(&opportunity, revalidated).await
    }

    /// Closes positions for trades that never settled, at a full loss of the
    /// committed amount.
    pub async fn reap_stale(&self) {
        let max_age_ms = self.config.stale_trade_max_age_secs as i64 * 1_000;
        for position in self.positions.stale(max_age_ms) {
            warn!(
                "Reaping stale position {} ({}ms old)",
                position.trade_id,
                (Utc::now() - position.opened_at).num_milliseconds()
            );
            let sol_usd = self.price.sol_usd().await;
            if let Some(closed) = self.positions.close(&position.trade_id, 0, sol_usd) {
                self.events.publish(LifecycleEvent::PositionClosed {
                    trade_id: closed.trade_id.clone(),
                    realized_pnl_lamports: closed.realized_pnl_lamports,
                });
                self.apply_realized_pnl(closed.realized_pnl_lamports, sol_usd).await;
                let _ = self
                    .ledger
                    .update_trade(
                        &closed.trade_id,
                        serde_json::json!({"state": "failed", "detail": "stale, never settled"}),
                    )
                    .await;
            }
        }
    }

    /// Re-prices modeled costs against a fresh priority-fee estimate and
    /// re-checks the strategy threshold. An opportunity that no longer clears
    /// it is dropped silently: expected, frequent, not a failure.
    async fn revalidate(&self, opportunity: &Opportunity) -> Result<i64, TradeOutcome> {
        let mut model = self.base_cost_model.clone();
        model.priority_fee_lamports = self
            .rpc
            .estimate_priority_fee(self.config.default_priority_fee_lamports)
            .await;
        let legs = opportunity.quotes.len().max(2) as u32;
        let cost = model.total_lamports(opportunity.input_lamports, legs);
        let net = opportunity.expected_out_lamports as i64
            - opportunity.input_lamports as i64
            - cost as i64;
        let sol_usd = self.price.sol_usd().await;
        let net_usd = if net > 0 {
            lamports_to_sol(net as u64) * sol_usd
        } else {
            0.0
        };
        if net <= 0 || net_usd < self.min_profit_usd(opportunity.strategy) {
            debug!(
                "Opportunity {} no longer clears threshold after re-pricing (net ${:.4})",
                opportunity.id, net_usd
            );
            return Err(self
                .finish(
                    opportunity,
                    TradeState::Failed,
                    OutcomeCategory::EconomicallyRejected,
                    format!("re-priced net ${:.4} below threshold", net_usd),
                    0,
                )
                .await);
        }
        Ok(net)
    }

    async fn execute_live(&self, opportunity: &Opportunity, expected_net: i64) -> TradeOutcome {
        // Build the fee-augmented transaction chain from the attached quotes.
        let payer = self.builder.payer_pubkey();
        if opportunity.quotes.is_empty() {
            return self
                .finish(
                    opportunity,
                    TradeState::Failed,
                    OutcomeCategory::ExecutionFailed,
                    "no executable quote chain attached".to_string(),
                    0,
                )
                .await;
        }
        let mut swap_txs: Vec<VersionedTransaction> = Vec::with_capacity(opportunity.quotes.len());
        for quote in &opportunity.quotes {
            match self.quote_client.swap_transaction(quote, &payer).await {
                Ok(tx) => swap_txs.push(tx),
                Err(e) => {
                    return self.fail_attempt(opportunity, TradeState::Validated, e.to_string()).await;
                }
            }
        }
        let fee_rate = self
            .rpc
            .estimate_priority_fee(self.config.default_priority_fee_lamports)
            .await;
        let lead = match self
            .builder
            .add_priority_fee(&swap_txs[0], fee_rate, DEFAULT_COMPUTE_LIMIT)
            .await
        {
            Ok(built) => built,
            Err(e) => {
                return self.fail_attempt(opportunity, TradeState::Validated, e.to_string()).await;
            }
        };
        swap_txs[0] = lead.transaction.clone();

        // Validated -> Simulated.
        let sim = self.simulator.simulate(&lead.transaction).await;
        if !sim.success {
            let kind = sim
                .error
                .map(|k| k.as_str().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            let tripped = {
                let mut control = self.control.lock().unwrap();
                control.breaker.record_failure()
            };
            if tripped {
                self.raise_breaker_alert().await;
            }
            return self
                .finish(
                    opportunity,
                    TradeState::Failed,
                    OutcomeCategory::SimulationRejected,
                    format!("simulation failed: {}", kind),
                    0,
                )
                .await;
        }

        // Simulated -> Submitted checkpoint: an expired opportunity is
        // dropped here, never force-cancelled later.
        if opportunity.is_expired() {
            return self.finish_expired(opportunity, TradeState::Expired).await;
        }

        // Atomic check-and-reserve: slot count and capital commit together.
        let sol_usd = self.price.sol_usd().await;
        {
            let mut slots = self.slots.lock().await;
            if slots.active >= self.config.max_concurrent_trades {
                return self
                    .finish(
                        opportunity,
                        TradeState::Failed,
                        OutcomeCategory::ExecutionFailed,
                        "no execution slot available".to_string(),
                        0,
                    )
                    .await;
            }
            if let Err(e) = self.positions.open(
                &opportunity.id,
                opportunity.strategy,
                opportunity.path.first().copied().unwrap_or_default(),
                opportunity.input_lamports,
                sol_usd,
            ) {
                return self
                    .finish(
                        opportunity,
                        TradeState::Failed,
                        OutcomeCategory::ExecutionFailed,
                        e.to_string(),
                        0,
                    )
                    .await;
            }
            slots.active += 1;
        }
        self.events.publish(LifecycleEvent::PositionOpened {
            trade_id: opportunity.id.clone(),
            amount_lamports: opportunity.input_lamports,
        });

        let outcome = self
            .submit_and_settle(opportunity, swap_txs, expected_net, sol_usd)
            .await;
        self.slots.lock().await.active -= 1;
        outcome
    }

    async fn submit_and_settle(
        &self,
        opportunity: &Opportunity,
        mut bundle_txs: Vec<VersionedTransaction>,
        expected_net: i64,
        sol_usd: f64,
    ) -> TradeOutcome {
        match self
            .builder
            .build_standalone_tip(self.config.default_tip_lamports)
            .await
        {
            Ok(tip) => bundle_txs.push(tip.transaction),
            Err(e) => {
                self.close_at_loss(opportunity, sol_usd).await;
                return self.fail_attempt(opportunity, TradeState::Simulated, e.to_string()).await;
            }
        }

        // Submission retries back off exponentially with jitter, bounded by
        // the attempt cap and the opportunity's own validity window.
        let mut attempt: u32 = 0;
        let bundle_id = loop {
            match self.bundle.submit(&bundle_txs).await {
                Ok(id) => {
                    // Failover accounting for the access layer.
                    self.rpc.report_success();
                    break id;
                }
                Err(e) => {
                    self.rpc.report_failure();
                    attempt += 1;
                    if attempt >= MAX_SUBMIT_ATTEMPTS
                        || !e.is_recoverable()
                        || opportunity.is_expired()
                    {
                        self.close_at_loss(opportunity, sol_usd).await;
                        return self
                            .fail_attempt(opportunity, TradeState::Simulated, e.to_string())
                            .await;
                    }
                    let backoff = SUBMIT_BACKOFF_BASE * 2u32.pow(attempt - 1)
                        + Duration::from_millis(rand::thread_rng().gen_range(0..50));
                    warn!(
                        "Bundle submission attempt {} failed ({}), retrying in {:?}",
                        attempt, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        };
        self.events.publish(LifecycleEvent::TradeSubmitted {
            trade_id: opportunity.id.clone(),
            strategy: opportunity.strategy.as_str(),
        });
        let _ = self
            .ledger
            .update_trade(
                &opportunity.id,
                serde_json::json!({"state": "submitted", "bundle_id": bundle_id}),
            )
            .await;

        match self.bundle.wait_for_landing(&bundle_id).await {
            BundleState::Landed { slot } => {
                info!(
                    "Trade {} landed (slot {:?}), expected net {} lamports",
                    opportunity.id, slot, expected_net
                );
                {
                    let mut control = self.control.lock().unwrap();
                    control.breaker.record_success();
                }
                let exit_amount = opportunity.expected_out_lamports;
                let pnl = self.close_position(opportunity, exit_amount, sol_usd).await;
                self.finish(
                    opportunity,
                    TradeState::Landed,
                    OutcomeCategory::LandedOk,
                    format!("bundle {} landed", bundle_id),
                    pnl,
                )
                .await
            }
            BundleState::Failed { reason } => {
                let pnl = self.close_position(opportunity, 0, sol_usd).await;
                let outcome = self.fail_attempt(opportunity, TradeState::Submitted, reason).await;
                TradeOutcome {
                    realized_pnl_lamports: pnl,
                    ..outcome
                }
            }
            BundleState::Pending | BundleState::Dropped => {
                let pnl = self.close_position(opportunity, 0, sol_usd).await;
                let outcome = self
                    .fail_attempt(
                        opportunity,
                        TradeState::Submitted,
                        "bundle dropped: landing ceiling elapsed".to_string(),
                    )
                    .await;
                TradeOutcome {
                    realized_pnl_lamports: pnl,
                    ..outcome
                }
            }
        }
    }

    /// Paper mode: the whole pipeline short of the chain. Capital is reserved
    /// and released exactly as in live mode.
    async fn settle_paper(&self, opportunity: &Opportunity, expected_net: i64) -> TradeOutcome {
        let sol_usd = self.price.sol_usd().await;
        {
            let mut slots = self.slots.lock().await;
            if slots.active >= self.config.max_concurrent_trades {
                return self
                    .finish(
                        opportunity,
                        TradeState::Failed,
                        OutcomeCategory::ExecutionFailed,
                        "no execution slot available".to_string(),
                        0,
                    )
                    .await;
            }
            if let Err(e) = self.positions.open(
                &opportunity.id,
                opportunity.strategy,
                opportunity.path.first().copied().unwrap_or_default(),
                opportunity.input_lamports,
                sol_usd,
            ) {
                return self
                    .finish(
                        opportunity,
                        TradeState::Failed,
                        OutcomeCategory::ExecutionFailed,
                        e.to_string(),
                        0,
                    )
                    .await;
            }
            slots.active += 1;
        }
        self.events.publish(LifecycleEvent::PositionOpened {
            trade_id: opportunity.id.clone(),
            amount_lamports: opportunity.input_lamports,
        });

        let exit_amount = (opportunity.input_lamports as i64 + expected_net).max(0) as u64;
        let pnl = self.close_position(opportunity, exit_amount, sol_usd).await;
        {
            let mut control = self.control.lock().unwrap();
            control.breaker.record_success();
        }
        self.slots.lock().await.active -= 1;
        self.finish(
            opportunity,
            TradeState::Landed,
            OutcomeCategory::LandedOk,
            "paper fill at expected output".to_string(),
            pnl,
        )
        .await
    }

    async fn close_position(
        &self,
        opportunity: &Opportunity,
        exit_amount: u64,
        sol_usd: f64,
    ) -> i64 {
        match self.positions.close(&opportunity.id, exit_amount, sol_usd) {
            Some(closed) => {
                self.events.publish(LifecycleEvent::PositionClosed {
                    trade_id: closed.trade_id.clone(),
                    realized_pnl_lamports: closed.realized_pnl_lamports,
                });
                self.apply_realized_pnl(closed.realized_pnl_lamports, sol_usd).await;
                closed.realized_pnl_lamports
            }
            None => 0,
        }
    }

    async fn close_at_loss(&self, opportunity: &Opportunity, sol_usd: f64) {
        self.close_position(opportunity, 0, sol_usd).await;
    }

    async fn apply_realized_pnl(&self, pnl_lamports: i64, sol_usd: f64) {
        let delta_usd = pnl_lamports as f64 / crate::utils::LAMPORTS_PER_SOL as f64 * sol_usd;
        let newly_tripped = {
            let mut control = self.control.lock().unwrap();
            control.daily.add(delta_usd, Utc::now().date_naive())
        };
        let _ = self.ledger.record_daily_pnl(delta_usd).await;
        if newly_tripped {
            let loss = {
                let control = self.control.lock().unwrap();
                control.daily.pnl_usd()
            };
            self.events
                .publish(LifecycleEvent::DailyLossLimitTripped { loss_usd: loss });
            self.alerts
                .notify(
                    AlertSeverity::Critical,
                    "Daily loss limit reached",
                    &format!("Cumulative pnl ${:.2}; submissions halted for the day", loss),
                )
                .await;
        }
    }

    /// Terminal failure that feeds the consecutive-failure counter.
    async fn fail_attempt(
        &self,
        opportunity: &Opportunity,
        from_state: TradeState,
        detail: String,
    ) -> TradeOutcome {
        debug!("Attempt {} failed from {:?}: {}", opportunity.id, from_state, detail);
        let tripped = {
            let mut control = self.control.lock().unwrap();
            control.breaker.record_failure()
        };
        if tripped {
            self.raise_breaker_alert().await;
        }
        self.finish(
            opportunity,
            TradeState::Failed,
            OutcomeCategory::ExecutionFailed,
            detail,
            0,
        )
        .await
    }

    async fn raise_breaker_alert(&self) {
        let failures = {
            let control = self.control.lock().unwrap();
            control.breaker.consecutive_failures()
        };
        self.events.publish(LifecycleEvent::CircuitBreakerTripped {
            consecutive_failures: failures,
        });
        self.alerts
            .notify(
                AlertSeverity::Critical,
                "Circuit breaker tripped",
                &format!(
                    "{} consecutive failures; new submissions refused for {}s",
                    failures, self.config.breaker_cooldown_secs
                ),
            )
            .await;
    }

    async fn finish_expired(
        &self,
        opportunity: &Opportunity,
        state: TradeState,
    ) -> TradeOutcome {
        debug!(
            "Opportunity {} expired after {}ms",
            opportunity.id,
            opportunity.age_ms()
        );
        self.finish(
            opportunity,
            state,
            OutcomeCategory::Expired,
            "validity window elapsed".to_string(),
            0,
        )
        .await
    }

    async fn finish(
        &self,
        opportunity: &Opportunity,
        state: TradeState,
        category: OutcomeCategory,
        detail: String,
        realized_pnl_lamports: i64,
    ) -> TradeOutcome {
        let record = TradeRecord {
            trade_id: opportunity.id.clone(),
            strategy: opportunity.strategy.as_str().to_string(),
            path: opportunity.path.iter().map(|p| p.to_string()).collect(),
            input_lamports: opportunity.input_lamports,
            expected_out_lamports: opportunity.expected_out_lamports,
            net_profit_usd: opportunity.net_profit_usd,
            outcome: category.as_str().to_string(),
            detail: detail.clone(),
            recorded_at: Utc::now(),
        };
        if let Err(e) = self.ledger.record_trade(&record).await {
            warn!("Ledger write failed for {}: {}", opportunity.id, e);
        }
        TradeOutcome {
            trade_id: opportunity.id.clone(),
            state,
            category,
            detail,
            realized_pnl_lamports,
        }
    }

    fn min_profit_usd(&self, strategy: Strategy) -> f64 {
        match strategy {
            Strategy::Cyclic => self.config.min_profit_usd_cyclic,
            Strategy::MultiHop => self.config.min_profit_usd_multihop,
            Strategy::Frontrun => self.config.min_profit_usd_frontrun,
        }
    }
}
