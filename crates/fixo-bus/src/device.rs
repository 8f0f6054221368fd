// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Same-device event bus.
//!
//! Views running in one process tell each other about complaint and session
//! changes without re-querying the store. Nothing here leaves the process.

use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::broadcast;
use tracing::trace;

const DEFAULT_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceEventKind {
    /// Published by complaint views, which live outside this workspace. Kept
    /// so their events still decode on a shared bus.
    ComplaintUpdate,
    /// See [`DeviceEventKind::ComplaintUpdate`].
    NewComplaint,
    Notification,
    StatusChange,
}

/// `{type, payload, timestamp}`; timestamp is Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEvent {
    #[serde(rename = "type")]
    pub kind: DeviceEventKind,
    pub payload: serde_json::Value,
    pub timestamp: i64,
}

impl DeviceEvent {
    pub fn new(kind: DeviceEventKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            payload,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Decodes the payload of a `notification` event.
    pub fn notice(&self) -> Option<Notice> {
        if self.kind != DeviceEventKind::Notification {
            return None;
        }
        serde_json::from_value(self.payload.clone()).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A transient user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

#[derive(Clone)]
pub struct DeviceBus {
    tx: broadcast::Sender<DeviceEvent>,
}

impl Default for DeviceBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl DeviceBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Returns the number of listeners that received the event.
    pub fn publish(&self, kind: DeviceEventKind, payload: serde_json::Value) -> usize {
        trace!(%kind, "device event");
        self.tx.send(DeviceEvent::new(kind, payload)).unwrap_or(0)
    }

    pub fn notify(&self, level: NoticeLevel, message: impl Into<String>) -> usize {
        let notice = Notice {
            level,
            message: message.into(),
        };
        let payload = serde_json::to_value(&notice).unwrap_or(serde_json::Value::Null);
        self.publish(DeviceEventKind::Notification, payload)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.tx.subscribe()
    }
}
