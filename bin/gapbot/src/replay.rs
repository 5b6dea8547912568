use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use common::{Bar, Result, SharedSeries, TradingCalendar};
use engine::{FlushHandle, StrategyRuleScheduler};
use paper::PaperBroker;

/// One CSV row: `symbol,start,end,open,high,low,close`, times in RFC 3339.
#[derive(Debug, Deserialize)]
struct BarRecord {
    symbol: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
}

/// Read a bar file in replay order.
pub fn load_bars(path: &str) -> Result<Vec<(String, Bar)>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut bars = Vec::new();
    for record in reader.deserialize() {
        let r: BarRecord = record?;
        let bar = Bar::new(r.start, r.end, r.open, r.high, r.low, r.close);
        bars.push((r.symbol, bar));
    }
    info!(path, count = bars.len(), "Bars loaded");
    Ok(bars)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReplaySummary {
    pub applied: usize,
    pub skipped: usize,
}

/// A bar's consequences are at most two broker round trips deep: an order
/// goes out, and a rejection of it sends a cancel.
const SETTLE_ROUNDS: usize = 2;

/// Plays recorded bars through the series, the paper broker and the scheduler
/// in the order a live feed would deliver them.
///
/// Every bar is fully settled before the next one: the rules have seen it, the
/// executor has submitted what they decided and the broker's answers are back
/// in the rules.
pub struct Replay {
    series: HashMap<String, SharedSeries>,
    calendar: TradingCalendar,
    paper: Arc<PaperBroker>,
    scheduler: StrategyRuleScheduler,
    executor: FlushHandle,
    order_events: FlushHandle,
}

impl Replay {
    pub fn new(
        series: HashMap<String, SharedSeries>,
        calendar: TradingCalendar,
        paper: Arc<PaperBroker>,
        scheduler: StrategyRuleScheduler,
        executor: FlushHandle,
        order_events: FlushHandle,
    ) -> Self {
        Self {
            series,
            calendar,
            paper,
            scheduler,
            executor,
            order_events,
        }
    }

    pub async fn run(&self, bars: Vec<(String, Bar)>) -> ReplaySummary {
        let mut summary = ReplaySummary::default();

        for (symbol, bar) in bars {
            let Some(series) = self.series.get(&symbol) else {
                debug!(symbol = %symbol, "No tradestrategy for symbol, bar skipped");
                summary.skipped += 1;
                continue;
            };

            let update = series.write().await.update(bar.clone());
            let is_new_bar = match update {
                Ok(is_new_bar) => is_new_bar,
                Err(e) => {
                    warn!(symbol = %symbol, start = %bar.start, error = %e, "Bar rejected");
                    summary.skipped += 1;
                    continue;
                }
            };
            summary.applied += 1;

            // Brackets working before this bar trade against it first, and the
            // rules hear about those fills before they see the bar.
            self.paper.on_bar(&symbol, &bar).await;
            self.order_events.flush().await;

            let trading_day = self.calendar.local_date(bar.start);
            self.scheduler
                .on_bar_update(&symbol, trading_day, is_new_bar)
                .await;
            self.settle().await;

            if self.scheduler.active_count().await == 0 && self.paper.working_count().await == 0 {
                info!(start = %bar.start, "Nothing left to manage, replay stopped");
                break;
            }
        }
        summary
    }

    async fn settle(&self) {
        for _ in 0..SETTLE_ROUNDS {
            self.scheduler.flush().await;
            self.executor.flush().await;
            self.order_events.flush().await;
        }
        self.scheduler.flush().await;
    }
}
