use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use common::{
    CandleSeries, Error, InstanceKey, OrderCommand, OrderEvent, OrderHandle, Result, SeriesView,
    SharedSeries, TradestrategyStatus,
};

use crate::barrier::{flush_channel, FlushHandle};
use crate::rule::{Outcome, RuleState, StrategyRule};

const MAILBOX_CAPACITY: usize = 256;
const EVENT_CAPACITY: usize = 1024;

/// Work delivered to one instance's task.
#[derive(Debug)]
enum RuleEvent {
    /// The series was updated; evaluate the first `bar_count` bars.
    Bar { is_new_bar: bool, bar_count: usize },
    Order(OrderEvent),
    /// Acknowledge once everything queued before it has been applied.
    Flush(oneshot::Sender<()>),
}

/// What the scheduler reports to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulerEvent {
    Transition {
        key: InstanceKey,
        from: RuleState,
        to: RuleState,
    },
    Status {
        key: InstanceKey,
        status: TradestrategyStatus,
    },
    RuleError {
        key: InstanceKey,
        error: String,
    },
    /// The instance reached a terminal state and was removed.
    Retired { key: InstanceKey, state: RuleState },
    /// The instance was removed from outside before finishing.
    Deactivated { key: InstanceKey },
}

struct InstanceHandle {
    mailbox: mpsc::Sender<RuleEvent>,
    series: SharedSeries,
    task: JoinHandle<()>,
}

/// Cloneable handle over the set of live rule instances.
///
/// Every instance runs on its own task and drains its own mailbox, so
/// dispatches for one instance are serial while different instances run in
/// parallel.
#[derive(Clone)]
pub struct StrategyRuleScheduler {
    instances: Arc<RwLock<HashMap<InstanceKey, InstanceHandle>>>,
    routes: Arc<RwLock<HashMap<OrderHandle, InstanceKey>>>,
    /// Unbounded so an instance never waits on the broker side.
    command_tx: mpsc::UnboundedSender<OrderCommand>,
    events_tx: broadcast::Sender<SchedulerEvent>,
}

impl StrategyRuleScheduler {
    pub fn new(command_tx: mpsc::UnboundedSender<OrderCommand>) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            instances: Arc::new(RwLock::new(HashMap::new())),
            routes: Arc::new(RwLock::new(HashMap::new())),
            command_tx,
            events_tx,
        }
    }

    /// Subscribe to transitions, status changes, errors and retirements.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events_tx.subscribe()
    }

    /// Start a rule instance reading `series`. At most one instance may exist
    /// per key.
    pub async fn activate(&self, rule: StrategyRule, series: SharedSeries) -> Result<()> {
        let key = rule.key().clone();
        let strategy = rule.strategy_name().to_string();
        let mut instances = self.instances.write().await;
        if instances.contains_key(&key) {
            return Err(Error::DuplicateInstance(key));
        }

        let (mailbox, inbox) = mpsc::channel(MAILBOX_CAPACITY);
        let actor = RuleActor {
            rule,
            series: series.clone(),
            inbox,
            scheduler: self.clone(),
        };
        let task = tokio::spawn(actor.run());
        instances.insert(
            key.clone(),
            InstanceHandle {
                mailbox,
                series,
                task,
            },
        );
        info!(key = %key, strategy = %strategy, live = instances.len(), "Rule instance activated");
        Ok(())
    }

    /// Dispatch a bar update to every live instance for this instrument and
    /// day. Returns how many instances it reached.
    pub async fn on_bar_update(
        &self,
        instrument: &str,
        trading_day: NaiveDate,
        is_new_bar: bool,
    ) -> usize {
        let targets: Vec<(InstanceKey, mpsc::Sender<RuleEvent>, SharedSeries)> = {
            let instances = self.instances.read().await;
            instances
                .iter()
                .filter(|(k, _)| k.instrument == instrument && k.trading_day == trading_day)
                .map(|(k, h)| (k.clone(), h.mailbox.clone(), h.series.clone()))
                .collect()
        };

        let mut delivered = 0;
        for (key, mailbox, series) in targets {
            // Pin the view to the bars present now, not when the task gets to it.
            let bar_count = series.read().await.bar_count();
            match mailbox
                .send(RuleEvent::Bar {
                    is_new_bar,
                    bar_count,
                })
                .await
            {
                Ok(()) => delivered += 1,
                Err(_) => debug!(key = %key, "Instance retired, bar update dropped"),
            }
        }
        delivered
    }

    /// Route a broker event to the instance that placed the order.
    pub async fn on_order_event(&self, event: OrderEvent) -> bool {
        let key = self.routes.read().await.get(&event.handle).cloned();
        let Some(key) = key else {
            debug!(handle = %event.handle, "No live instance for order event");
            return false;
        };
        let mailbox = self
            .instances
            .read()
            .await
            .get(&key)
            .map(|h| h.mailbox.clone());
        match mailbox {
            Some(mailbox) => mailbox.send(RuleEvent::Order(event)).await.is_ok(),
            None => false,
        }
    }

    /// Stop an instance without waiting for it to finish. In-flight broker
    /// commands are not recalled.
    pub async fn deactivate(&self, key: &InstanceKey) -> bool {
        let removed = self.instances.write().await.remove(key);
        let Some(handle) = removed else {
            return false;
        };
        handle.task.abort();
        self.routes.write().await.retain(|_, k| k != key);
        info!(key = %key, "Rule instance deactivated");
        let _ = self
            .events_tx
            .send(SchedulerEvent::Deactivated { key: key.clone() });
        true
    }

    /// Wait until every live instance has applied all events queued so far
    /// and published the resulting commands.
    pub async fn flush(&self) {
        let mailboxes: Vec<mpsc::Sender<RuleEvent>> = self
            .instances
            .read()
            .await
            .values()
            .map(|h| h.mailbox.clone())
            .collect();

        let mut acks = Vec::with_capacity(mailboxes.len());
        for mailbox in mailboxes {
            let (ack_tx, ack_rx) = oneshot::channel();
            if mailbox.send(RuleEvent::Flush(ack_tx)).await.is_ok() {
                acks.push(ack_rx);
            }
        }
        for ack in acks {
            // An instance that retires first drops its ack; that is settled too.
            let _ = ack.await;
        }
    }

    pub async fn active_count(&self) -> usize {
        self.instances.read().await.len()
    }

    pub async fn is_active(&self, key: &InstanceKey) -> bool {
        self.instances.read().await.contains_key(key)
    }

    /// Act on one dispatch: register order routes before the commands go out
    /// so no broker event can arrive for an unknown handle.
    async fn publish(&self, key: &InstanceKey, outcome: Outcome) {
        for command in &outcome.commands {
            if let OrderCommand::PlaceBracket(order) = command {
                self.routes
                    .write()
                    .await
                    .insert(order.handle.clone(), key.clone());
            }
        }
        for command in outcome.commands {
            if self.command_tx.send(command).is_err() {
                warn!(key = %key, "Order command channel closed");
            }
        }

        for t in outcome.transitions {
            let _ = self.events_tx.send(SchedulerEvent::Transition {
                key: key.clone(),
                from: t.from,
                to: t.to,
            });
        }
        if let Some(status) = outcome.status {
            let _ = self.events_tx.send(SchedulerEvent::Status {
                key: key.clone(),
                status,
            });
        }
        if let Some(error) = outcome.error {
            let _ = self.events_tx.send(SchedulerEvent::RuleError {
                key: key.clone(),
                error: error.to_string(),
            });
        }
    }

    async fn retire(&self, key: &InstanceKey, state: RuleState) {
        let removed = self.instances.write().await.remove(key).is_some();
        self.routes.write().await.retain(|_, k| k != key);
        if removed {
            info!(key = %key, state = %state, "Rule instance retired");
            let _ = self.events_tx.send(SchedulerEvent::Retired {
                key: key.clone(),
                state,
            });
        }
    }
}

/// Routes broker events into the instances, in the order the broker sent them.
pub struct OrderEventPump {
    scheduler: StrategyRuleScheduler,
    event_rx: mpsc::Receiver<OrderEvent>,
    flush: FlushHandle,
    flush_rx: mpsc::UnboundedReceiver<oneshot::Sender<()>>,
}

impl OrderEventPump {
    pub fn new(scheduler: StrategyRuleScheduler, event_rx: mpsc::Receiver<OrderEvent>) -> Self {
        let (flush, flush_rx) = flush_channel();
        Self {
            scheduler,
            event_rx,
            flush,
            flush_rx,
        }
    }

    /// Resolves once every event queued before the call sits in its
    /// instance's mailbox.
    pub fn flush_handle(&self) -> FlushHandle {
        self.flush.clone()
    }

    /// Call from `tokio::spawn`.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                event = self.event_rx.recv() => match event {
                    Some(event) => {
                        self.scheduler.on_order_event(event).await;
                    }
                    None => break,
                },
                Some(ack) = self.flush_rx.recv() => {
                    let _ = ack.send(());
                }
            }
        }
        warn!("Scheduler: order event channel closed");
    }
}

/// Owns one rule and applies its mailbox in order.
struct RuleActor {
    rule: StrategyRule,
    series: SharedSeries,
    inbox: mpsc::Receiver<RuleEvent>,
    scheduler: StrategyRuleScheduler,
}

impl RuleActor {
    async fn run(mut self) {
        while let Some(event) = self.inbox.recv().await {
            let outcome = match event {
                RuleEvent::Bar {
                    is_new_bar,
                    bar_count,
                } => {
                    let series = self.series.read().await;
                    let view = SeriesView::new(&*series, bar_count);
                    self.rule.on_bar(&view, is_new_bar)
                }
                RuleEvent::Order(event) => self.rule.on_order_event(&event),
                RuleEvent::Flush(ack) => {
                    let _ = ack.send(());
                    continue;
                }
            };

            if !outcome.is_empty() {
                self.scheduler.publish(self.rule.key(), outcome).await;
            }
            if self.rule.state().is_terminal() {
                break;
            }
        }
        self.scheduler
            .retire(self.rule.key(), self.rule.state())
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use chrono_tz::America::New_York;
    use common::{
        Bar, BarSeries, BracketOrder, BrokerGateway, OrderCommandError, Side, TradingCalendar,
    };
    use risk::{EntryLimit, EntryLimitTable};
    use strategy::{FiveMinGapBar, GapBarParams, StrategyKind};

    use crate::executor::OrderExecutor;
    use crate::rule::Transition;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
    }

    fn ny(h: u32, m: u32) -> DateTime<Utc> {
        New_York
            .from_local_datetime(&day().and_hms_opt(h, m, 0).unwrap())
            .unwrap()
            .with_timezone(&Utc)
    }

    fn bar(h: u32, m: u32, open: f64, high: f64, low: f64, close: f64) -> Bar {
        let start = ny(h, m);
        Bar::new(start, start + chrono::Duration::minutes(5), open, high, low, close)
    }

    fn opening_bar() -> Bar {
        bar(9, 30, 100.0, 101.0, 99.0, 100.0).with_side(Side::Long)
    }

    fn flat(h: u32, m: u32) -> Bar {
        bar(h, m, 100.0, 100.0, 100.0, 100.0)
    }

    fn make_rule(symbol: &str) -> StrategyRule {
        let limits = EntryLimitTable::new(vec![EntryLimit {
            lower: 0.0,
            upper: 10_000.0,
            percent: 0.03,
        }])
        .unwrap();
        let calendar = TradingCalendar::default();
        let strategy =
            FiveMinGapBar::new(symbol, GapBarParams::default(), calendar, Arc::new(limits));
        StrategyRule::new(
            InstanceKey::new(symbol, day(), FiveMinGapBar::NAME),
            StrategyKind::FiveMinGapBar(strategy),
            calendar,
        )
    }

    fn make_scheduler() -> (StrategyRuleScheduler, mpsc::UnboundedReceiver<OrderCommand>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        (StrategyRuleScheduler::new(command_tx), command_rx)
    }

    /// Update the series and dispatch, the way the feed does.
    async fn push(scheduler: &StrategyRuleScheduler, series: &SharedSeries, b: Bar) -> usize {
        let (symbol, is_new) = {
            let mut s = series.write().await;
            let is_new = s.update(b).unwrap();
            (s.symbol.clone(), is_new)
        };
        scheduler.on_bar_update(&symbol, day(), is_new).await
    }

    async fn next_command(rx: &mut mpsc::UnboundedReceiver<OrderCommand>) -> OrderCommand {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timeout waiting for order command")
            .expect("command channel closed")
    }

    async fn wait_retired(
        rx: &mut broadcast::Receiver<SchedulerEvent>,
    ) -> (InstanceKey, RuleState) {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("timeout waiting for retirement")
                .expect("event channel closed");
            if let SchedulerEvent::Retired { key, state } = event {
                return (key, state);
            }
        }
    }

    // ─── Activation ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn duplicate_instance_is_refused() {
        let (scheduler, _rx) = make_scheduler();
        let series = BarSeries::new("AAPL", 300).shared();
        scheduler
            .activate(make_rule("AAPL"), series.clone())
            .await
            .unwrap();

        let result = scheduler.activate(make_rule("AAPL"), series).await;
        assert!(matches!(result, Err(Error::DuplicateInstance(_))));
        assert_eq!(scheduler.active_count().await, 1);
    }

    #[tokio::test]
    async fn bar_updates_reach_only_matching_instances() {
        let (scheduler, _rx) = make_scheduler();
        let aapl = BarSeries::new("AAPL", 300).shared();
        let msft = BarSeries::new("MSFT", 300).shared();
        scheduler.activate(make_rule("AAPL"), aapl.clone()).await.unwrap();
        scheduler.activate(make_rule("MSFT"), msft).await.unwrap();

        assert_eq!(push(&scheduler, &aapl, opening_bar()).await, 1);
        let other_day = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(scheduler.on_bar_update("AAPL", other_day, true).await, 0);
        assert_eq!(scheduler.on_bar_update("TSLA", day(), true).await, 0);
    }

    // ─── Lifecycle ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn fill_then_next_bar_retires_completed() {
        let (scheduler, mut command_rx) = make_scheduler();
        let mut events = scheduler.subscribe();
        let series = BarSeries::new("AAPL", 300).shared();
        scheduler
            .activate(make_rule("AAPL"), series.clone())
            .await
            .unwrap();

        push(&scheduler, &series, opening_bar()).await;
        push(&scheduler, &series, flat(9, 35)).await;

        let OrderCommand::PlaceBracket(order) = next_command(&mut command_rx).await else {
            panic!("expected a bracket order");
        };
        assert_eq!(order.entry_price, 99.0);
        assert_eq!(order.quantity, 100.0);

        assert!(
            scheduler
                .on_order_event(OrderEvent::filled(order.handle.clone(), 99.0))
                .await
        );
        push(&scheduler, &series, flat(9, 40)).await;

        let (key, state) = wait_retired(&mut events).await;
        assert_eq!(key.instrument, "AAPL");
        assert_eq!(state, RuleState::Completed);
        assert_eq!(scheduler.active_count().await, 0);
        // Routes go with the instance.
        assert!(!scheduler.on_order_event(OrderEvent::cancelled(order.handle)).await);
    }

    #[tokio::test]
    async fn timeout_cancels_once_and_retires() {
        let (scheduler, mut command_rx) = make_scheduler();
        let mut events = scheduler.subscribe();
        let series = BarSeries::new("AAPL", 300).shared();
        scheduler
            .activate(make_rule("AAPL"), series.clone())
            .await
            .unwrap();

        push(&scheduler, &series, opening_bar()).await;
        push(&scheduler, &series, flat(9, 35)).await;
        let placed = next_command(&mut command_rx).await;

        push(&scheduler, &series, flat(10, 30)).await;
        push(&scheduler, &series, flat(10, 35)).await;

        assert_eq!(
            next_command(&mut command_rx).await,
            OrderCommand::Cancel {
                handle: placed.handle().clone()
            }
        );
        let (_, state) = wait_retired(&mut events).await;
        assert_eq!(state, RuleState::Cancelled);
        assert!(command_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn data_error_is_reported_and_instance_retired() {
        let (scheduler, _rx) = make_scheduler();
        let mut events = scheduler.subscribe();
        let series = BarSeries::new("AAPL", 300).shared();
        scheduler
            .activate(make_rule("AAPL"), series.clone())
            .await
            .unwrap();

        push(&scheduler, &series, flat(9, 35)).await;

        let mut saw_error = false;
        loop {
            let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
                .await
                .expect("timeout")
                .expect("closed");
            match event {
                SchedulerEvent::RuleError { .. } => saw_error = true,
                SchedulerEvent::Retired { state, .. } => {
                    assert_eq!(state, RuleState::Errored);
                    break;
                }
                _ => {}
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn flush_waits_for_queued_bars() {
        let (scheduler, mut command_rx) = make_scheduler();
        let series = BarSeries::new("AAPL", 300).shared();
        scheduler
            .activate(make_rule("AAPL"), series.clone())
            .await
            .unwrap();

        push(&scheduler, &series, opening_bar()).await;
        push(&scheduler, &series, flat(9, 35)).await;
        tokio::time::timeout(Duration::from_secs(1), scheduler.flush())
            .await
            .expect("flush did not return");

        assert!(matches!(
            command_rx.try_recv(),
            Ok(OrderCommand::PlaceBracket(_))
        ));
    }

    #[tokio::test]
    async fn deactivate_removes_instance() {
        let (scheduler, _rx) = make_scheduler();
        let series = BarSeries::new("AAPL", 300).shared();
        let rule = make_rule("AAPL");
        let key = rule.key().clone();
        scheduler.activate(rule, series).await.unwrap();

        assert!(scheduler.deactivate(&key).await);
        assert!(!scheduler.is_active(&key).await);
        assert!(!scheduler.deactivate(&key).await);
        assert_eq!(scheduler.on_bar_update("AAPL", day(), true).await, 0);
    }

    // ─── Concurrency ──────────────────────────────────────────────────────────

    /// Transitions per instance, in publication order, from everything
    /// broadcast so far.
    fn transition_chains(
        rx: &mut broadcast::Receiver<SchedulerEvent>,
    ) -> HashMap<InstanceKey, Vec<Transition>> {
        let mut chains: HashMap<InstanceKey, Vec<Transition>> = HashMap::new();
        while let Ok(event) = rx.try_recv() {
            if let SchedulerEvent::Transition { key, from, to } = event {
                chains.entry(key).or_default().push(Transition { from, to });
            }
        }
        chains
    }

    fn assert_entered_serially(chain: &[Transition]) {
        assert_eq!(
            chain,
            [
                Transition {
                    from: RuleState::Idle,
                    to: RuleState::AwaitingEntry
                },
                Transition {
                    from: RuleState::AwaitingEntry,
                    to: RuleState::EntryArmed
                },
            ]
        );
        assert!(chain.windows(2).all(|w| w[0].to == w[1].from));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_instances_each_place_exactly_one_order() {
        const N: usize = 16;
        let (scheduler, mut command_rx) = make_scheduler();
        let mut events = scheduler.subscribe();
        let mut feeds = Vec::new();
        for i in 0..N {
            let symbol = format!("SYM{i}");
            let series = BarSeries::new(symbol.as_str(), 300).shared();
            scheduler
                .activate(make_rule(&symbol), series.clone())
                .await
                .unwrap();
            feeds.push(series);
        }

        let mut tasks = Vec::new();
        for series in feeds {
            let scheduler = scheduler.clone();
            tasks.push(tokio::spawn(async move {
                push(&scheduler, &series, opening_bar()).await;
                push(&scheduler, &series, flat(9, 35)).await;
                // A late revision of the entry bar must not enter again.
                push(&scheduler, &series, flat(9, 35)).await;
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        let mut symbols = std::collections::HashSet::new();
        for _ in 0..N {
            match next_command(&mut command_rx).await {
                OrderCommand::PlaceBracket(order) => {
                    assert!(symbols.insert(order.instrument.clone()));
                }
                other => panic!("unexpected command {other:?}"),
            }
        }
        assert_eq!(symbols.len(), N);
        scheduler.flush().await;
        assert!(command_rx.try_recv().is_err());
        assert_eq!(scheduler.active_count().await, N);

        let chains = transition_chains(&mut events);
        assert_eq!(chains.len(), N);
        for chain in chains.values() {
            assert_entered_serially(chain);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_dispatches_to_one_instance_are_applied_serially() {
        const DISPATCHERS: usize = 8;
        let (scheduler, mut command_rx) = make_scheduler();
        let mut events = scheduler.subscribe();
        let series = BarSeries::new("AAPL", 300).shared();
        scheduler
            .activate(make_rule("AAPL"), series.clone())
            .await
            .unwrap();
        push(&scheduler, &series, opening_bar()).await;

        // The entry bar lands once, then every dispatcher reports it as new
        // at the same moment.
        series.write().await.update(flat(9, 35)).unwrap();
        let mut tasks = Vec::new();
        for _ in 0..DISPATCHERS {
            let scheduler = scheduler.clone();
            tasks.push(tokio::spawn(async move {
                scheduler.on_bar_update("AAPL", day(), true).await
            }));
        }
        for t in tasks {
            assert_eq!(t.await.unwrap(), 1);
        }
        scheduler.flush().await;

        assert!(matches!(
            command_rx.try_recv(),
            Ok(OrderCommand::PlaceBracket(_))
        ));
        assert!(command_rx.try_recv().is_err());

        let chains = transition_chains(&mut events);
        assert_eq!(chains.len(), 1);
        for chain in chains.values() {
            assert_entered_serially(chain);
        }
    }

    /// Accepts commands but never answers them.
    struct HungBroker;

    #[async_trait]
    impl BrokerGateway for HungBroker {
        async fn place_bracket_order(
            &self,
            _order: &BracketOrder,
        ) -> std::result::Result<OrderHandle, OrderCommandError> {
            std::future::pending().await
        }

        async fn cancel_order(
            &self,
            _handle: &OrderHandle,
        ) -> std::result::Result<(), OrderCommandError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn unanswered_broker_does_not_stall_other_instruments() {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(16);
        let scheduler = StrategyRuleScheduler::new(command_tx);
        let executor = OrderExecutor::new(
            command_rx,
            event_tx,
            Arc::new(HungBroker),
            Duration::from_secs(60),
        );
        tokio::spawn(executor.run());
        tokio::spawn(OrderEventPump::new(scheduler.clone(), event_rx).run());
        let mut events = scheduler.subscribe();

        let mut feeds = Vec::new();
        for symbol in ["AAA", "BBB", "CCC"] {
            let series = BarSeries::new(symbol, 300).shared();
            scheduler
                .activate(make_rule(symbol), series.clone())
                .await
                .unwrap();
            push(&scheduler, &series, opening_bar()).await;
            push(&scheduler, &series, flat(9, 35)).await;
            feeds.push(series);
        }
        tokio::time::timeout(Duration::from_secs(1), scheduler.flush())
            .await
            .expect("instances blocked behind the broker");

        // AAA's placement is still waiting on the broker.
        push(&scheduler, &feeds[2], flat(10, 30)).await;
        let (key, state) = wait_retired(&mut events).await;
        assert_eq!(key.instrument, "CCC");
        assert_eq!(state, RuleState::Cancelled);
        assert_eq!(scheduler.active_count().await, 2);
    }

    #[tokio::test]
    async fn event_pump_flush_waits_for_routed_events() {
        let (scheduler, mut command_rx) = make_scheduler();
        let (event_tx, event_rx) = mpsc::channel(16);
        let pump = OrderEventPump::new(scheduler.clone(), event_rx);
        let flush = pump.flush_handle();
        tokio::spawn(pump.run());

        let series = BarSeries::new("AAPL", 300).shared();
        let rule = make_rule("AAPL");
        let key = rule.key().clone();
        scheduler.activate(rule, series.clone()).await.unwrap();
        push(&scheduler, &series, opening_bar()).await;
        push(&scheduler, &series, flat(9, 35)).await;
        let placed = next_command(&mut command_rx).await;

        event_tx
            .send(OrderEvent::rejected(placed.handle().clone(), "no buying power"))
            .await
            .unwrap();
        flush.flush().await;
        scheduler.flush().await;

        assert!(!scheduler.is_active(&key).await);
        assert_eq!(
            command_rx.try_recv().unwrap(),
            OrderCommand::Cancel {
                handle: placed.handle().clone()
            }
        );
    }
}
