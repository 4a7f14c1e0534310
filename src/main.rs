use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use solana_arb_engine::builder::TransactionBuilder;
use solana_arb_engine::bundle::BundleClient;
use solana_arb_engine::config::Config;
use solana_arb_engine::engine::{EventBus, ExecutionEngine};
use solana_arb_engine::ledger::LogLedger;
use solana_arb_engine::monitoring::{EventSink, LogAlertSink, LogEventSink};
use solana_arb_engine::positions::PositionTracker;
use solana_arb_engine::price::ReferencePriceService;
use solana_arb_engine::quote::HttpQuoteClient;
use solana_arb_engine::rpc::RpcManager;
use solana_arb_engine::scanner::{
    CostModel, CyclicScanner, FrontrunScanner, MultiHopScanner, PendingTransfer, Scanner,
};
use solana_arb_engine::simulator::PreflightSimulator;
use solana_arb_engine::utils::{load_keypair, setup_logging};
use solana_sdk::pubkey::Pubkey;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "solana-arb-engine")]
#[command(about = "Multi-leg swap arbitrage engine for Solana")]
struct Args {
    /// Reserve and settle capital without submitting to the chain.
    #[arg(long)]
    paper: bool,

    /// Env file loaded before configuration (defaults to .env).
    #[arg(long)]
    env_file: Option<String>,
}

fn parse_mints(raw: &[String], what: &str) -> Vec<Pubkey> {
    raw.iter()
        .filter_map(|s| match Pubkey::from_str(s) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!("Ignoring invalid {} mint '{}': {}", what, s, e);
                None
            }
        })
        .collect()
}

fn spawn_scanner_loop(
    scanner: Arc<dyn Scanner>,
    engine: Arc<ExecutionEngine>,
    interval_secs: u64,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            ticker.tick().await;
            match scanner.scan().await {
                Ok(opportunities) => {
                    for opportunity in opportunities {
                        let engine = Arc::clone(&engine);
                        tokio::spawn(async move {
                            let outcome = engine.process(opportunity).await;
                            info!(
                                "Trade {} -> {:?} ({})",
                                outcome.trade_id,
                                outcome.state,
                                outcome.detail
                            );
                        });
                    }
                }
                Err(e) => warn!("{} scan pass failed: {}", scanner.name(), e),
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    match &args.env_file {
        Some(path) => {
            dotenv::from_filename(path).ok();
        }
        None => {
            dotenv::dotenv().ok();
        }
    }
    setup_logging().expect("Failed to initialize logging");

    let mut config = Config::from_env();
    if args.paper {
        config.paper_trading = true;
    }
    // Configuration errors are fatal at startup, never retried.
    config.validate().context("configuration invalid")?;
    let payer = Arc::new(
        load_keypair(&config.trader_wallet_keypair_path).context("wallet keypair unavailable")?,
    );
    let base_mint = if config.base_mint.is_empty() {
        spl_token::native_mint::id()
    } else {
        Pubkey::from_str(&config.base_mint)
            .with_context(|| format!("BASE_MINT '{}' is not a valid pubkey", config.base_mint))?
    };

    let rpc = Arc::new(RpcManager::new(
        &config.rpc_url,
        config.rpc_url_backup.as_deref(),
    ));
    let quote_client = Arc::new(HttpQuoteClient::new(
        &config.quote_api_url,
        config.quote_requests_per_sec,
        config.opportunity_ttl_secs as i64,
    ));
    let price = Arc::new(ReferencePriceService::new(
        Some(format!("{}/price", config.quote_api_url.trim_end_matches('/'))),
        config.sol_price_usd_fallback,
        config.price_ttl_secs,
    ));
    let positions = Arc::new(PositionTracker::new(config.capital_ceiling_lamports));
    let simulator = PreflightSimulator::new(Arc::clone(&rpc), config.simulation_timeout_secs);
    let builder = TransactionBuilder::new(Arc::clone(&rpc), Arc::clone(&payer));
    let bundle = Arc::new(BundleClient::new(
        &config.block_engine_url,
        config.submission_timeout_secs,
        config.bundle_wait_secs,
    ));
    let events = EventBus::new();

    let cost_model = CostModel::from_config(&config);
    let intermediates = parse_mints(&config.intermediate_mints, "intermediate");
    let stables: HashSet<Pubkey> = parse_mints(&config.stable_mints, "stable")
        .into_iter()
        .collect();
    if intermediates.is_empty() {
        warn!("No intermediate mints configured; polling scanners will be idle");
    }

    let cyclic = Arc::new(CyclicScanner::new(
        quote_client.clone() as Arc<dyn solana_arb_engine::quote::QuoteClient>,
        Arc::clone(&price),
        base_mint,
        intermediates.clone(),
        config.probe_amount_lamports,
        config.quote_slippage_bps,
        cost_model.clone(),
        config.min_profit_usd_cyclic,
        config.opportunity_ttl_secs as i64,
    ));
    let multihop = Arc::new(MultiHopScanner::new(
        quote_client.clone() as Arc<dyn solana_arb_engine::quote::QuoteClient>,
        Arc::clone(&price),
        base_mint,
        intermediates,
        stables,
        config.max_pair_combinations,
        config.probe_amount_lamports,
        config.quote_slippage_bps,
        cost_model.clone(),
        config.min_profit_usd_multihop,
        config.opportunity_ttl_secs as i64,
    ));
    let frontrun = Arc::new(FrontrunScanner::new(
        Arc::clone(&price),
        base_mint,
        config.frontrun_min_transfer_lamports,
        config.frontrun_impact_per_sol,
        config.frontrun_min_impact_bps,
        config.frontrun_follow_fraction,
        config.frontrun_max_trade_lamports,
        config.network_fee_lamports,
        config.frontrun_tip_lamports,
        config.slippage_allowance_pct,
        config.min_profit_usd_frontrun,
        config.opportunity_ttl_secs as i64,
    ));

    // The pending-transfer feed is collaborator-provided; the sender half is
    // the attachment point for a mempool listener.
    let (transfer_feed, transfer_rx) = mpsc::channel::<PendingTransfer>(256);
    frontrun.spawn_listener(transfer_rx);

    let engine = Arc::new(ExecutionEngine::new(
        config.clone(),
        Arc::clone(&rpc),
        quote_client,
        simulator,
        builder,
        bundle,
        Arc::clone(&positions),
        Arc::clone(&price),
        Arc::new(LogLedger),
        Arc::new(LogAlertSink),
        events.clone(),
    ));

    // Lifecycle events flow to the structured-event sink without ever
    // blocking the engine; a lagging consumer just drops old events.
    let mut event_rx = events.subscribe();
    tokio::spawn(async move {
        let sink = LogEventSink;
        loop {
            match event_rx.recv().await {
                Ok(event) => sink.emit("info", "lifecycle", serde_json::json!(format!("{:?}", event))),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Event consumer lagged, {} events dropped", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Periodic endpoint health check; never tighter than 30s.
    {
        let rpc = Arc::clone(&rpc);
        let interval = config.health_check_interval_secs;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval));
            loop {
                ticker.tick().await;
                rpc.health_check().await;
            }
        });
    }

    // Stale-position reaper.
    {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(30));
            loop {
                ticker.tick().await;
                engine.reap_stale().await;
            }
        });
    }

    spawn_scanner_loop(
        cyclic,
        Arc::clone(&engine),
        config.cyclic_scan_interval_secs,
    );
    spawn_scanner_loop(
        multihop,
        Arc::clone(&engine),
        config.multihop_scan_interval_secs,
    );
    // The frontrun scanner only drains its listener buffer; poll it on the
    // tighter cadence.
    spawn_scanner_loop(frontrun, Arc::clone(&engine), 1);

    info!(
        "Engine running ({} mode), base mint {}",
        if config.paper_trading { "paper" } else { "live" },
        base_mint
    );

    tokio::signal::ctrl_c().await.context("signal handling")?;
    info!("Shutting down");
    drop(transfer_feed);
    engine.reap_stale().await;
    Ok(())
}
