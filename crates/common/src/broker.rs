use async_trait::async_trait;

use crate::error::OrderCommandError;
use crate::{BracketOrder, OrderHandle};

/// Abstraction over the broker connection.
///
/// `PaperBroker` implements this for simulation. Fills, cancellations and
/// rejections are not returned here: implementations report them later as
/// [`crate::OrderEvent`]s on the channel they were built with.
///
/// Only `OrderExecutor` in `crates/engine` should hold a reference to a
/// `dyn BrokerGateway`. Rules never call the broker directly.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Submit entry, stop and target legs as one bracket. Returns the handle
    /// the broker acknowledged.
    async fn place_bracket_order(
        &self,
        order: &BracketOrder,
    ) -> Result<OrderHandle, OrderCommandError>;

    /// Cancel every still-working leg of the bracket.
    async fn cancel_order(&self, handle: &OrderHandle) -> Result<(), OrderCommandError>;
}
