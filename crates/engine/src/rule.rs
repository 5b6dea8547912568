use serde::Serialize;
use tracing::{debug, error, info, warn};

use common::{
    BracketOrder, CandleSeries, InstanceKey, OrderCommand, OrderEvent, OrderEventKind,
    OrderHandle, RuleError, TradestrategyStatus, TradingCalendar,
};
use strategy::{Action, EntryPlan, Strategy, StrategyKind};

/// Lifecycle of one tradestrategy for one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleState {
    /// Waiting for the first tradable bar.
    Idle,
    /// Market open, no order yet.
    AwaitingEntry,
    /// Entry order placed, not yet filled.
    EntryArmed,
    PositionOpen,
    Cancelled,
    Completed,
    Errored,
}

impl RuleState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RuleState::Cancelled | RuleState::Completed | RuleState::Errored
        )
    }
}

impl std::fmt::Display for RuleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RuleState::Idle => "idle",
            RuleState::AwaitingEntry => "awaiting_entry",
            RuleState::EntryArmed => "entry_armed",
            RuleState::PositionOpen => "position_open",
            RuleState::Cancelled => "cancelled",
            RuleState::Completed => "completed",
            RuleState::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// Local view of the broker-owned order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionStatus {
    Pending,
    Open,
    Cancelled,
    /// Filled, then exited on the stop or the target.
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionMirror {
    pub order: BracketOrder,
    pub status: PositionStatus,
    pub fill_price: Option<f64>,
    pub exit_price: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: RuleState,
    pub to: RuleState,
}

/// Everything one dispatch produced, for the scheduler to act on.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Outcome {
    pub commands: Vec<OrderCommand>,
    pub transitions: Vec<Transition>,
    pub status: Option<TradestrategyStatus>,
    pub error: Option<RuleError>,
}

impl Outcome {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
            && self.transitions.is_empty()
            && self.status.is_none()
            && self.error.is_none()
    }
}

/// Single-shot, day-scoped state machine around one strategy.
///
/// Not thread-safe by itself: the scheduler gives every instance its own task
/// so dispatches are strictly serial.
#[derive(Debug)]
pub struct StrategyRule {
    key: InstanceKey,
    strategy: StrategyKind,
    calendar: TradingCalendar,
    state: RuleState,
    status: Option<TradestrategyStatus>,
    position: Option<PositionMirror>,
}

impl StrategyRule {
    pub fn new(key: InstanceKey, strategy: StrategyKind, calendar: TradingCalendar) -> Self {
        Self {
            key,
            strategy,
            calendar,
            state: RuleState::Idle,
            status: None,
            position: None,
        }
    }

    pub fn key(&self) -> &InstanceKey {
        &self.key
    }

    pub fn state(&self) -> RuleState {
        self.state
    }

    pub fn status(&self) -> Option<TradestrategyStatus> {
        self.status
    }

    pub fn position(&self) -> Option<&PositionMirror> {
        self.position.as_ref()
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    /// Handle a new or revised bar. Errors never escape: they leave the rule
    /// `Errored` and are reported in the outcome.
    pub fn on_bar(&mut self, series: &dyn CandleSeries, is_new_bar: bool) -> Outcome {
        let mut out = Outcome::default();
        if self.state.is_terminal() {
            return out;
        }
        if let Err(e) = self.evaluate_bar(series, is_new_bar, &mut out) {
            let start = series.current().map(|b| b.start.to_rfc3339()).unwrap_or_default();
            error!(
                symbol = %self.key.instrument,
                start = %start,
                state = %self.state,
                error = %e,
                "Rule evaluation failed, deactivating"
            );
            self.set_status(TradestrategyStatus::Error, &mut out);
            self.transition(RuleState::Errored, &mut out);
            out.error = Some(e);
        }
        out
    }

    /// Mirror a broker notification for this instance's order.
    pub fn on_order_event(&mut self, event: &OrderEvent) -> Outcome {
        let mut out = Outcome::default();
        if self.state.is_terminal() {
            return out;
        }
        let Some(position) = self.position.as_mut() else {
            warn!(symbol = %self.key.instrument, handle = %event.handle, "Order event without an order");
            return out;
        };
        if position.order.handle != event.handle {
            warn!(symbol = %self.key.instrument, handle = %event.handle, "Order event for a foreign order");
            return out;
        }

        match &event.kind {
            OrderEventKind::Filled { price } => {
                if position.status != PositionStatus::Pending {
                    return out;
                }
                position.status = PositionStatus::Open;
                position.fill_price = Some(*price);
                info!(symbol = %self.key.instrument, price, "Entry filled");
                self.set_status(TradestrategyStatus::Filled, &mut out);
                self.transition(RuleState::PositionOpen, &mut out);
            }
            OrderEventKind::Closed { price } => {
                if position.status != PositionStatus::Open {
                    return out;
                }
                position.status = PositionStatus::Closed;
                position.exit_price = Some(*price);
                info!(symbol = %self.key.instrument, price, "Position closed");
            }
            OrderEventKind::Cancelled => {
                if position.status != PositionStatus::Pending {
                    return out;
                }
                position.status = PositionStatus::Cancelled;
                info!(symbol = %self.key.instrument, "Entry order cancelled by broker");
                self.set_status(TradestrategyStatus::Cancelled, &mut out);
            }
            OrderEventKind::Rejected { reason } => {
                warn!(symbol = %self.key.instrument, reason = %reason, "Entry order rejected");
                if position.status == PositionStatus::Pending {
                    out.commands.push(OrderCommand::Cancel {
                        handle: position.order.handle.clone(),
                    });
                }
                position.status = PositionStatus::Cancelled;
                self.set_status(TradestrategyStatus::Rejected, &mut out);
                self.transition(RuleState::Cancelled, &mut out);
            }
        }
        out
    }

    fn evaluate_bar(
        &mut self,
        series: &dyn CandleSeries,
        is_new_bar: bool,
        out: &mut Outcome,
    ) -> Result<(), RuleError> {
        if series.bar_count() == 0 {
            return Ok(());
        }
        let start = series.current()?.start;

        // Only manage trades in market hours on this tradestrategy's own day.
        if !self.calendar.is_market_hours(start)
            || !self.calendar.is_trading_day(start, self.key.trading_day)
        {
            debug!(symbol = %self.key.instrument, start = %start, "Bar outside session, ignored");
            return Ok(());
        }

        if self.state == RuleState::Idle {
            self.set_status(TradestrategyStatus::Active, out);
            self.transition(RuleState::AwaitingEntry, out);
        }

        // The job is done once a position is open or gone.
        match self.position.as_ref().map(|p| p.status) {
            Some(PositionStatus::Open | PositionStatus::Closed) => {
                info!(symbol = %self.key.instrument, start = %start, "Position taken, rule complete");
                self.set_status(TradestrategyStatus::Completed, out);
                self.transition(RuleState::Completed, out);
                return Ok(());
            }
            Some(PositionStatus::Cancelled) => {
                info!(symbol = %self.key.instrument, start = %start, "Position cancelled, rule complete");
                self.transition(RuleState::Cancelled, out);
                return Ok(());
            }
            Some(PositionStatus::Pending) | None => {}
        }

        match self.strategy.evaluate(series, is_new_bar)? {
            Action::Hold => {}
            Action::Enter(plan) => {
                if self.state != RuleState::AwaitingEntry {
                    debug!(symbol = %self.key.instrument, state = %self.state, "Entry already decided");
                    return Ok(());
                }
                self.enter(plan, out);
            }
            Action::RejectRange { range_pct, limit } => {
                if self.state != RuleState::AwaitingEntry {
                    return Ok(());
                }
                info!(
                    symbol = %self.key.instrument,
                    start = %start,
                    range_pct,
                    limit,
                    "Entry bar outside percent limit, done for the day"
                );
                self.set_status(TradestrategyStatus::PercentRejected, out);
                self.transition(RuleState::Cancelled, out);
            }
            Action::RejectRisk(reason) => {
                if self.state != RuleState::AwaitingEntry {
                    return Ok(());
                }
                info!(
                    symbol = %self.key.instrument,
                    start = %start,
                    reason = %reason,
                    "No tradable risk on the decision bar, done for the day"
                );
                self.set_status(TradestrategyStatus::RiskRejected, out);
                self.transition(RuleState::Cancelled, out);
            }
            Action::Timeout => {
                if let Some(position) = self.position.as_mut() {
                    if position.status == PositionStatus::Pending {
                        out.commands.push(OrderCommand::Cancel {
                            handle: position.order.handle.clone(),
                        });
                        position.status = PositionStatus::Cancelled;
                    }
                }
                info!(symbol = %self.key.instrument, start = %start, "Entry window closed without a fill");
                self.set_status(TradestrategyStatus::TimedOut, out);
                self.transition(RuleState::Cancelled, out);
            }
        }
        Ok(())
    }

    fn enter(&mut self, plan: EntryPlan, out: &mut Outcome) {
        let order = BracketOrder {
            handle: OrderHandle::new(),
            instrument: self.key.instrument.clone(),
            side: plan.side,
            quantity: plan.quantity,
            entry_price: plan.bracket.entry,
            stop_price: plan.bracket.stop,
            target_price: plan.bracket.target,
        };
        info!(
            symbol = %order.instrument,
            handle = %order.handle,
            side = %order.side,
            qty = order.quantity,
            entry = order.entry_price,
            stop = order.stop_price,
            target = order.target_price,
            "Placing bracket order"
        );
        out.commands.push(OrderCommand::PlaceBracket(order.clone()));
        self.position = Some(PositionMirror {
            order,
            status: PositionStatus::Pending,
            fill_price: None,
            exit_price: None,
        });
        self.set_status(TradestrategyStatus::Pending, out);
        self.transition(RuleState::EntryArmed, out);
    }

    fn transition(&mut self, to: RuleState, out: &mut Outcome) {
        if self.state == to {
            return;
        }
        debug!(symbol = %self.key.instrument, from = %self.state, to = %to, "Rule transition");
        out.transitions.push(Transition {
            from: self.state,
            to,
        });
        self.state = to;
    }

    fn set_status(&mut self, status: TradestrategyStatus, out: &mut Outcome) {
        self.status = Some(status);
        out.status = Some(status);
    }
}
