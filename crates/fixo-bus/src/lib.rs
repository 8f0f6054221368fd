// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process publish/subscribe for the Fixo live support engine.
//!
//! - [`ChangeFeed`]: pushes committed session, message and signal rows to
//!   filtered subscribers (the store's change feed).
//! - [`DeviceBus`]: same-device fan-out of UI-level events and notices
//!   between views that share one process.

pub mod device;
pub mod feed;

pub use device::{DeviceBus, DeviceEvent, DeviceEventKind, Notice, NoticeLevel};
pub use feed::{ChangeEvent, ChangeFeed};
