use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use common::{
    Bar, BracketOrder, BrokerGateway, OrderCommandError, OrderEvent, OrderHandle, OrderSide,
};

/// One bracket the simulator is working.
#[derive(Debug, Clone)]
struct WorkingBracket {
    order: BracketOrder,
    /// Set once the entry leg has executed.
    fill_price: Option<f64>,
}

/// Simulated broker for replay.
///
/// Brackets are worked against the bars fed to `on_bar`: the entry is a stop
/// order at `entry_price`, then the stop leg and the target leg race, stop
/// first. Slippage applies to entry and stop executions. No real orders are
/// ever sent anywhere.
pub struct PaperBroker {
    orders: Arc<RwLock<HashMap<OrderHandle, WorkingBracket>>>,
    event_tx: mpsc::Sender<OrderEvent>,
    /// Slippage in basis points, always against the trade.
    slippage_bps: f64,
    realised_pnl: Arc<RwLock<f64>>,
}

impl PaperBroker {
    pub fn new(event_tx: mpsc::Sender<OrderEvent>, slippage_bps: f64) -> Self {
        info!(slippage_bps, "PaperBroker initialized");
        Self {
            orders: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            slippage_bps,
            realised_pnl: Arc::new(RwLock::new(0.0)),
        }
    }

    /// Work every bracket for `instrument` against one bar update.
    pub async fn on_bar(&self, instrument: &str, bar: &Bar) {
        let mut events = Vec::new();
        let mut pnl = 0.0;
        {
            let mut orders = self.orders.write().await;
            let mut done = Vec::new();

            for (handle, working) in orders
                .iter_mut()
                .filter(|(_, w)| w.order.instrument == instrument)
            {
                let order = &working.order;
                if working.fill_price.is_none() && entry_touched(order, bar) {
                    let price = self.slip(order.side, order.entry_price);
                    debug!(
                        symbol = %instrument,
                        handle = %handle,
                        side = %order.side,
                        price,
                        "Paper entry filled"
                    );
                    working.fill_price = Some(price);
                    events.push(OrderEvent::filled(handle.clone(), price));
                }

                let Some(fill) = working.fill_price else {
                    continue;
                };
                if let Some(exit) = self.exit_price(order, bar) {
                    let trade_pnl = match order.side {
                        OrderSide::Buy => (exit - fill) * order.quantity,
                        OrderSide::Sell => (fill - exit) * order.quantity,
                    };
                    info!(
                        symbol = %instrument,
                        handle = %handle,
                        entry = fill,
                        exit,
                        pnl = trade_pnl,
                        "Paper position closed"
                    );
                    pnl += trade_pnl;
                    events.push(OrderEvent::closed(handle.clone(), exit));
                    done.push(handle.clone());
                }
            }

            for handle in done {
                orders.remove(&handle);
            }
        }

        if pnl != 0.0 {
            *self.realised_pnl.write().await += pnl;
        }
        for event in events {
            if self.event_tx.send(event).await.is_err() {
                warn!("PaperBroker: event channel closed");
            }
        }
    }

    /// Net P&L of every closed paper trade.
    pub async fn realised_pnl(&self) -> f64 {
        *self.realised_pnl.read().await
    }

    /// Brackets still pending or open.
    pub async fn working_count(&self) -> usize {
        self.orders.read().await.len()
    }

    /// Buys pay more, sells receive less.
    fn slip(&self, side: OrderSide, price: f64) -> f64 {
        match side {
            OrderSide::Buy => price * (1.0 + self.slippage_bps / 10_000.0),
            OrderSide::Sell => price * (1.0 - self.slippage_bps / 10_000.0),
        }
    }

    /// Exit execution price if the stop or the target trades in this bar.
    fn exit_price(&self, order: &BracketOrder, bar: &Bar) -> Option<f64> {
        let exit_side = order.side.opposite();
        let (stop_hit, target_hit) = match order.side {
            OrderSide::Buy => (bar.low <= order.stop_price, bar.high >= order.target_price),
            OrderSide::Sell => (bar.high >= order.stop_price, bar.low <= order.target_price),
        };
        if stop_hit {
            Some(self.slip(exit_side, order.stop_price))
        } else if target_hit {
            Some(order.target_price)
        } else {
            None
        }
    }
}

fn entry_touched(order: &BracketOrder, bar: &Bar) -> bool {
    match order.side {
        OrderSide::Buy => bar.high >= order.entry_price,
        OrderSide::Sell => bar.low <= order.entry_price,
    }
}

#[async_trait]
impl BrokerGateway for PaperBroker {
    async fn place_bracket_order(
        &self,
        order: &BracketOrder,
    ) -> Result<OrderHandle, OrderCommandError> {
        let prices = [order.entry_price, order.stop_price, order.target_price];
        let bad_price = prices.iter().any(|p| !p.is_finite() || *p <= 0.0);
        if bad_price || order.quantity.is_nan() || order.quantity < 1.0 {
            return Err(OrderCommandError::Rejected {
                handle: order.handle.clone(),
                reason: format!(
                    "invalid bracket: qty {} entry {} stop {} target {}",
                    order.quantity, order.entry_price, order.stop_price, order.target_price
                ),
            });
        }

        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.handle) {
            return Err(OrderCommandError::Rejected {
                handle: order.handle.clone(),
                reason: "duplicate order handle".into(),
            });
        }
        orders.insert(
            order.handle.clone(),
            WorkingBracket {
                order: order.clone(),
                fill_price: None,
            },
        );
        info!(
            symbol = %order.instrument,
            handle = %order.handle,
            side = %order.side,
            qty = order.quantity,
            entry = order.entry_price,
            "Paper bracket working"
        );
        Ok(order.handle.clone())
    }

    async fn cancel_order(&self, handle: &OrderHandle) -> Result<(), OrderCommandError> {
        {
            let mut orders = self.orders.write().await;
            let filled = match orders.get(handle) {
                None => return Err(OrderCommandError::UnknownOrder(handle.clone())),
                Some(w) => w.fill_price.is_some(),
            };
            if filled {
                return Err(OrderCommandError::Rejected {
                    handle: handle.clone(),
                    reason: "entry already filled".into(),
                });
            }
            orders.remove(handle);
        }
        info!(handle = %handle, "Paper bracket cancelled");
        if self
            .event_tx
            .send(OrderEvent::cancelled(handle.clone()))
            .await
            .is_err()
        {
            warn!("PaperBroker: event channel closed");
        }
        Ok(())
    }
}
