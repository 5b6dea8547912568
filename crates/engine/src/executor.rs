use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use common::{
    BracketOrder, BrokerGateway, OrderCommand, OrderCommandError, OrderEvent, OrderHandle,
};

use crate::barrier::{flush_channel, FlushHandle};

/// Receives order commands from the rule instances and submits them to the
/// broker, one at a time in arrival order.
///
/// This is the ONLY component that talks to `BrokerGateway`. Every broker call
/// is bounded by `ack_timeout`; an unanswered placement is reported to the rule
/// as a rejection.
pub struct OrderExecutor {
    command_rx: mpsc::UnboundedReceiver<OrderCommand>,
    event_tx: mpsc::Sender<OrderEvent>,
    broker: Arc<dyn BrokerGateway>,
    ack_timeout: Duration,
    flush: FlushHandle,
    flush_rx: mpsc::UnboundedReceiver<oneshot::Sender<()>>,
}

impl OrderExecutor {
    pub fn new(
        command_rx: mpsc::UnboundedReceiver<OrderCommand>,
        event_tx: mpsc::Sender<OrderEvent>,
        broker: Arc<dyn BrokerGateway>,
        ack_timeout: Duration,
    ) -> Self {
        let (flush, flush_rx) = flush_channel();
        Self {
            command_rx,
            event_tx,
            broker,
            ack_timeout,
            flush,
            flush_rx,
        }
    }

    /// Resolves once every command queued before the call has been submitted.
    pub fn flush_handle(&self) -> FlushHandle {
        self.flush.clone()
    }

    /// Run the executor loop. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!(ack_timeout_ms = self.ack_timeout.as_millis() as u64, "OrderExecutor running");
        loop {
            tokio::select! {
                biased;
                command = self.command_rx.recv() => match command {
                    Some(command) => self.execute(command).await,
                    None => break,
                },
                Some(ack) = self.flush_rx.recv() => {
                    let _ = ack.send(());
                }
            }
        }
        warn!("OrderExecutor: command channel closed");
    }

    async fn execute(&self, command: OrderCommand) {
        match command {
            OrderCommand::PlaceBracket(order) => {
                info!(
                    symbol = %order.instrument,
                    handle = %order.handle,
                    side = %order.side,
                    qty = order.quantity,
                    "Submitting bracket order"
                );
                match self.place(&order).await {
                    Ok(handle) => info!(handle = %handle, "Bracket order acknowledged"),
                    Err(e) => {
                        error!(symbol = %order.instrument, error = %e, "Bracket order failed");
                        // The rule only learns of the failure through its event stream.
                        let event = OrderEvent::rejected(order.handle.clone(), e.to_string());
                        if self.event_tx.send(event).await.is_err() {
                            warn!(handle = %order.handle, "OrderExecutor: event channel closed");
                        }
                    }
                }
            }
            OrderCommand::Cancel { handle } => {
                info!(handle = %handle, "Cancelling order");
                if let Err(e) = self.cancel(&handle).await {
                    warn!(handle = %handle, error = %e, "Cancel failed");
                }
            }
        }
    }

    async fn place(&self, order: &BracketOrder) -> Result<OrderHandle, OrderCommandError> {
        match tokio::time::timeout(self.ack_timeout, self.broker.place_bracket_order(order)).await
        {
            Ok(result) => result,
            Err(_) => Err(self.not_acknowledged(&order.handle)),
        }
    }

    async fn cancel(&self, handle: &OrderHandle) -> Result<(), OrderCommandError> {
        match tokio::time::timeout(self.ack_timeout, self.broker.cancel_order(handle)).await {
            Ok(result) => result,
            Err(_) => Err(self.not_acknowledged(handle)),
        }
    }

    fn not_acknowledged(&self, handle: &OrderHandle) -> OrderCommandError {
        OrderCommandError::NotAcknowledged {
            handle: handle.clone(),
            reason: format!("no broker answer within {} ms", self.ack_timeout.as_millis()),
        }
    }
}
