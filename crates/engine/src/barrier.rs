use tokio::sync::{mpsc, oneshot};

/// Lets a caller wait until a queue-draining task has handled everything
/// that was queued before the call.
#[derive(Debug, Clone)]
pub struct FlushHandle {
    tx: mpsc::UnboundedSender<oneshot::Sender<()>>,
}

impl FlushHandle {
    /// Returns once the task has reached the barrier, or has stopped.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(ack_tx).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

/// The draining task polls its work queue first (`biased` select) and only
/// acks a barrier once that queue is empty.
pub(crate) fn flush_channel() -> (FlushHandle, mpsc::UnboundedReceiver<oneshot::Sender<()>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (FlushHandle { tx }, rx)
}
