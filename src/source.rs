// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Raw connectivity source interface.
//!
//! Abstraction over the platform's network-status feed: a broadcast stream
//! of change events plus a one-shot snapshot fetch. The monitor consumes
//! this interface and never interprets anything beyond the connected flag.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A raw connectivity snapshot from the underlying platform source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawStatusEvent {
    /// Whether the platform reports network connectivity.
    pub is_connected: bool,
    /// Extra connectivity metadata (interface type, signal strength, ...).
    /// Passed through to notifications untouched.
    #[serde(default)]
    pub details: serde_json::Value,
}

impl RawStatusEvent {
    /// Create an event with no extra metadata.
    #[must_use]
    pub fn new(is_connected: bool) -> Self {
        Self {
            is_connected,
            details: serde_json::Value::Null,
        }
    }
}

/// Source of raw connectivity events.
///
/// Dropping the receiver returned by [`subscribe`](Self::subscribe)
/// deregisters the subscription.
#[async_trait]
pub trait RawStatusSource: Send + Sync {
    /// Subscribe to connectivity change events.
    fn subscribe(&self) -> broadcast::Receiver<RawStatusEvent>;

    /// Fetch the current connectivity snapshot.
    async fn fetch(&self) -> RawStatusEvent;
}

/// Hand-driven status source.
///
/// Bridges platforms whose connectivity signal arrives through FFI or
/// another event system: push snapshots in with
/// [`set_state`](Self::set_state) and subscribers see them as change events.
#[derive(Debug)]
pub struct ManualStatusSource {
    current: Mutex<RawStatusEvent>,
    events_tx: broadcast::Sender<RawStatusEvent>,
}

impl ManualStatusSource {
    /// Create a source reporting `initial` until the first update.
    #[must_use]
    pub fn new(initial: RawStatusEvent) -> Self {
        let (events_tx, _) = broadcast::channel(64);
        Self {
            current: Mutex::new(initial),
            events_tx,
        }
    }

    /// Record a new snapshot and broadcast it to subscribers.
    pub fn set_state(&self, event: RawStatusEvent) {
        *self.current.lock().unwrap() = event.clone();
        let _ = self.events_tx.send(event);
    }
}

#[async_trait]
impl RawStatusSource for ManualStatusSource {
    fn subscribe(&self) -> broadcast::Receiver<RawStatusEvent> {
        self.events_tx.subscribe()
    }

    async fn fetch(&self) -> RawStatusEvent {
        self.current.lock().unwrap().clone()
    }
}
