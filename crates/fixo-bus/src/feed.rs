// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Committed-row change feed.
//!
//! Writers publish after their transaction commits. Each subscription gets
//! its own forwarding task that applies a filter and feeds an mpsc queue.
//! A subscriber that falls behind loses events (logged) and is expected to
//! recover by re-fetching.

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use fixo_core::{Identity, Message, Role, SessionChange, SignalEnvelope, Subscription};

const DEFAULT_CAPACITY: usize = 1024;
const SUBSCRIBER_BUFFER: usize = 256;

/// One committed change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", rename_all = "snake_case")]
pub enum ChangeEvent {
    Session(SessionChange),
    Message(Message),
    Signal(SignalEnvelope),
}

impl ChangeEvent {
    pub fn session_id(&self) -> &str {
        match self {
            ChangeEvent::Session(change) => &change.session.id,
            ChangeEvent::Message(m) => &m.session_id,
            ChangeEvent::Signal(s) => &s.session_id,
        }
    }
}

#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Push a committed change. Returns the number of live subscriptions.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        debug!(session_id = %event.session_id(), "change published");
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Forward events accepted by `filter` into a [`Subscription`].
    ///
    /// The broadcast receiver is attached before this returns, so nothing
    /// published afterwards is missed.
    pub fn subscribe_with<T, F>(&self, filter: F) -> Subscription<T>
    where
        T: Send + 'static,
        F: Fn(ChangeEvent) -> Option<T> + Send + 'static,
    {
        let mut source = self.tx.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let task = tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(event) => {
                        if let Some(item) = filter(event)
                            && tx.send(item).await.is_err()
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "change feed subscriber lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Subscription::new(rx, task.abort_handle())
    }

    /// Session rows visible to `viewer`.
    ///
    /// Students get their own sessions. Admins get every session change so
    /// their queue drops entries another admin picked up.
    pub fn sessions_for(&self, viewer: &Identity) -> Subscription<SessionChange> {
        let viewer = viewer.clone();
        self.subscribe_with(move |event| match event {
            ChangeEvent::Session(change)
                if viewer.role == Role::Admin || change.session.is_participant(&viewer.user_id) =>
            {
                Some(change)
            }
            _ => None,
        })
    }

    /// Inserted messages of one session.
    pub fn messages_for(&self, session_id: &str) -> Subscription<Message> {
        let session_id = session_id.to_string();
        self.subscribe_with(move |event| match event {
            ChangeEvent::Message(m) if m.session_id == session_id => Some(m),
            _ => None,
        })
    }

    /// Inserted signal envelopes of one session, including the caller's own.
    pub fn signals_for(&self, session_id: &str) -> Subscription<SignalEnvelope> {
        let session_id = session_id.to_string();
        self.subscribe_with(move |event| match event {
            ChangeEvent::Signal(s) if s.session_id == session_id => Some(s),
            _ => None,
        })
    }
}
