mod replay;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use common::{BarSeries, BrokerGateway, Config, OrderCommand, OrderEvent, SharedSeries};
use engine::{
    OrderEventPump, OrderExecutor, SchedulerEvent, StrategyRule, StrategyRuleScheduler,
};
use paper::PaperBroker;
use replay::Replay;
use risk::EntryLimitTable;
use strategy::{StrategyRegistry, TradestrategyFileConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    // stdout carries the JSON event stream; human logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env().context("loading configuration")?;
    info!(bars = %cfg.bars_path, tz = %cfg.calendar.tz, "GapBot starting");

    // ── Reference data ────────────────────────────────────────────────────────
    let entry_limits = EntryLimitTable::load(&cfg.entry_limits_path)
        .with_context(|| format!("loading entry limits from {}", cfg.entry_limits_path))?;
    let tradestrategies = TradestrategyFileConfig::load(&cfg.tradestrategy_config_path)
        .with_context(|| format!("loading {}", cfg.tradestrategy_config_path))?;
    let registry = StrategyRegistry::new(
        Arc::new(entry_limits),
        cfg.calendar,
        cfg.default_risk_amount,
    );

    // ── Channels ──────────────────────────────────────────────────────────────
    let (command_tx, command_rx) = mpsc::unbounded_channel::<OrderCommand>();
    let (event_tx, event_rx) = mpsc::channel::<OrderEvent>(128);

    // ── Paper broker and order executor ───────────────────────────────────────
    let paper = Arc::new(PaperBroker::new(event_tx.clone(), cfg.paper_slippage_bps));
    let broker: Arc<dyn BrokerGateway> = paper.clone();
    let ack_timeout = Duration::from_millis(cfg.broker_ack_timeout_ms);
    let executor = OrderExecutor::new(command_rx, event_tx, broker, ack_timeout);
    let executor_flush = executor.flush_handle();

    // ── Scheduler and rule instances ──────────────────────────────────────────
    let scheduler = StrategyRuleScheduler::new(command_tx);
    let mut events = scheduler.subscribe();

    let mut series: HashMap<String, SharedSeries> = HashMap::new();
    for ts in &tradestrategies.tradestrategies {
        let strategy = registry.build(ts)?;
        let shared = series
            .entry(ts.symbol.clone())
            .or_insert_with(|| BarSeries::new(ts.symbol.clone(), ts.bar_size).shared())
            .clone();
        let rule = StrategyRule::new(StrategyRegistry::key_for(ts), strategy, registry.calendar());
        scheduler.activate(rule, shared).await?;
    }
    if scheduler.active_count().await == 0 {
        warn!("No tradestrategies configured, nothing to do");
        return Ok(());
    }

    // ── Event log ─────────────────────────────────────────────────────────────
    let (stop_log, mut stop_rx) = oneshot::channel::<()>();
    let event_log = tokio::spawn(async move {
        loop {
            tokio::select! {
                // Everything already broadcast is written before the stop is honoured.
                biased;
                received = events.recv() => match received {
                    Ok(event) => print_event(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event log lagging");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = &mut stop_rx => break,
            }
        }
    });

    // ── Spawn all tasks ───────────────────────────────────────────────────────
    let pump = OrderEventPump::new(scheduler.clone(), event_rx);
    let event_flush = pump.flush_handle();
    tokio::spawn(executor.run());
    tokio::spawn(pump.run());

    // ── Replay ────────────────────────────────────────────────────────────────
    let bars = replay::load_bars(&cfg.bars_path)
        .with_context(|| format!("loading bars from {}", cfg.bars_path))?;
    let replay = Replay::new(
        series,
        cfg.calendar,
        paper.clone(),
        scheduler.clone(),
        executor_flush,
        event_flush,
    );
    let summary = replay.run(bars).await;

    let _ = stop_log.send(());
    event_log.await.context("event log task")?;

    info!(
        applied = summary.applied,
        skipped = summary.skipped,
        live = scheduler.active_count().await,
        working = paper.working_count().await,
        realised_pnl = paper.realised_pnl().await,
        "Replay finished"
    );
    Ok(())
}

/// One JSON object per line on stdout.
fn print_event(event: &SchedulerEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(e) => error!(error = %e, "Failed to encode scheduler event"),
    }
}
