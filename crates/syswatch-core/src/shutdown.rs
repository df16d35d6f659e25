//! Stop request for the dispatcher loop.
//!
//! The replay binary holds the [`ShutdownSender`] (fired on Ctrl-C) and hands the
//! [`ShutdownSignal`] to [`Dispatcher::run`](crate::Dispatcher::run), which checks it
//! between batches and while waiting on idle sources.

use tokio::sync::broadcast::{self, error::TryRecvError};

/// Observed by the dispatcher. Every clone sees the same request.
pub struct ShutdownSignal {
    tx: broadcast::Sender<()>,
    rx: broadcast::Receiver<()>,
}

impl Clone for ShutdownSignal {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.tx.subscribe(),
        }
    }
}

impl ShutdownSignal {
    pub fn new() -> (ShutdownSender, ShutdownSignal) {
        let (tx, rx) = broadcast::channel(1);
        (ShutdownSender(tx.clone()), ShutdownSignal { tx, rx })
    }

    /// Wait until a stop is requested.
    pub async fn recv(&mut self) {
        let _ = self.rx.recv().await;
    }

    /// True once a stop was requested, without waiting.
    pub fn is_requested(&mut self) -> bool {
        !matches!(self.rx.try_recv(), Err(TryRecvError::Empty))
    }
}

/// Requests the stop. Consumed, so a dispatcher is stopped at most once.
pub struct ShutdownSender(broadcast::Sender<()>);

impl ShutdownSender {
    pub fn send_signal(self) {
        let _ = self.0.send(());
    }
}
