//! In-process queue backend for single-node mode and tests.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

use super::QueueBackend;

/// Unbounded in-process channel behind the [`QueueBackend`] interface.
pub struct ChannelQueue {
    tx: mpsc::UnboundedSender<String>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
}

impl ChannelQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }
}

impl Default for ChannelQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueBackend for ChannelQueue {
    async fn push(&self, payload: String) -> Result<()> {
        self.tx
            .send(payload)
            .map_err(|_| Error::other("in-process queue is closed"))
    }

    async fn pop(&self, cancel: &CancellationToken) -> Result<Option<String>> {
        let mut rx = self.rx.lock().await;
        // Buffered messages are still handed out after cancellation; an empty
        // queue resolves to `None` immediately.
        tokio::select! {
            biased;
            message = rx.recv() => Ok(message),
            _ = cancel.cancelled() => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pop_returns_pushed_payloads_in_order() {
        let queue = ChannelQueue::new();
        queue.push("one".into()).await.unwrap();
        queue.push("two".into()).await.unwrap();

        let cancel = CancellationToken::new();
        assert_eq!(queue.pop(&cancel).await.unwrap().as_deref(), Some("one"));
        assert_eq!(queue.pop(&cancel).await.unwrap().as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn cancelled_pop_on_empty_queue_returns_none() {
        let queue = ChannelQueue::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(queue.pop(&cancel).await.unwrap().is_none());
    }
}
