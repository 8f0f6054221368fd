// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Push subscription handle returned by every `subscribe_*` operation.

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// A stream of rows pushed by a change feed.
///
/// Dropping the subscription (or calling [`Subscription::close`]) stops the
/// forwarding task that feeds it. Delivery is at-least-once: consumers must
/// tolerate duplicates.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::Receiver<T>,
    task: Option<AbortHandle>,
}

impl<T> Subscription<T> {
    /// Wraps a receiver fed by the task behind `task`.
    pub fn new(rx: mpsc::Receiver<T>, task: AbortHandle) -> Self {
        Self {
            rx,
            task: Some(task),
        }
    }

    /// Wraps a receiver whose sender is owned elsewhere.
    pub fn from_receiver(rx: mpsc::Receiver<T>) -> Self {
        Self { rx, task: None }
    }

    /// Next pushed item, or `None` once the feed is closed.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Non-blocking poll, used by tests and drain loops.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Stops delivery. Items already buffered can still be drained.
    pub fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.rx.close();
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn close_stops_forwarding_task() {
        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(async move {
            loop {
                if tx.send(1u32).await.is_err() {
                    break;
                }
                tokio::task::yield_now().await;
            }
        });
        let mut sub = Subscription::new(rx, handle.abort_handle());
        assert_eq!(sub.recv().await, Some(1));
        sub.close();
        let _ = handle.await;
        while sub.try_recv().is_some() {}
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn from_receiver_ends_when_sender_drops() {
        let (tx, rx) = mpsc::channel(1);
        let mut sub = Subscription::from_receiver(rx);
        tx.send("x").await.unwrap();
        drop(tx);
        assert_eq!(sub.recv().await, Some("x"));
        assert_eq!(sub.recv().await, None);
    }
}
