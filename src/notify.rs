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

//! Change notification dispatch.
//!
//! Final stage of the pipeline: deduplicates consecutive identical values
//! and invokes the application callback, optionally enriched with a fresh
//! connectivity snapshot.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::correlator::SessionState;
use crate::source::RawStatusSource;
use crate::ChangeCallback;

pub(crate) struct Dispatcher {
    on_change: Option<ChangeCallback>,
    attach_connection_info: bool,
    source: Arc<dyn RawStatusSource>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("has_callback", &self.on_change.is_some())
            .field("attach_connection_info", &self.attach_connection_info)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub(crate) fn new(
        on_change: Option<ChangeCallback>,
        attach_connection_info: bool,
        source: Arc<dyn RawStatusSource>,
    ) -> Self {
        Self {
            on_change,
            attach_connection_info,
            source,
        }
    }

    /// Notify the application of a connectivity change, unless the value
    /// matches the last one delivered.
    pub(crate) async fn dispatch(
        &self,
        state: &Mutex<SessionState>,
        is_connected: bool,
        at: DateTime<Utc>,
    ) {
        {
            let mut state = state.lock().unwrap();
            if !state.active {
                return;
            }
            if state.last_notified == Some(is_connected) {
                debug!(
                    "Connectivity unchanged (connected = {}), skipping notification",
                    is_connected
                );
                return;
            }
            state.last_notified = Some(is_connected);
        }

        info!("Connectivity changed: connected = {}", is_connected);

        let Some(on_change) = &self.on_change else {
            return;
        };

        if self.attach_connection_info {
            let snapshot = self.source.fetch().await;
            // the session may have stopped while the snapshot was in flight
            if !state.lock().unwrap().active {
                return;
            }
            on_change(is_connected, at, Some(snapshot));
        } else {
            on_change(is_connected, at, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ManualStatusSource, RawStatusEvent};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::broadcast;

    type Seen = Arc<Mutex<Vec<(bool, Option<RawStatusEvent>)>>>;

    fn recording_callback() -> (Seen, ChangeCallback) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ChangeCallback = Arc::new(move |is_connected, _, snapshot| {
            sink.lock().unwrap().push((is_connected, snapshot));
        });
        (seen, callback)
    }

    fn source_with(details: serde_json::Value) -> Arc<ManualStatusSource> {
        Arc::new(ManualStatusSource::new(RawStatusEvent {
            is_connected: true,
            details,
        }))
    }

    #[tokio::test]
    async fn duplicate_values_notify_once() {
        let (seen, callback) = recording_callback();
        let dispatcher = Dispatcher::new(Some(callback), false, source_with(serde_json::Value::Null));
        let state = Mutex::new(SessionState::new());

        dispatcher.dispatch(&state, true, Utc::now()).await;
        dispatcher.dispatch(&state, true, Utc::now()).await;
        dispatcher.dispatch(&state, false, Utc::now()).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].0);
        assert!(!seen[1].0);
    }

    #[tokio::test]
    async fn attaches_snapshot_when_configured() {
        let (seen, callback) = recording_callback();
        let details = serde_json::json!({ "interface": "wifi" });
        let dispatcher = Dispatcher::new(Some(callback), true, source_with(details.clone()));
        let state = Mutex::new(SessionState::new());

        dispatcher.dispatch(&state, true, Utc::now()).await;

        let seen = seen.lock().unwrap();
        let snapshot = seen[0].1.as_ref().unwrap();
        assert_eq!(snapshot.details, details);
    }

    #[tokio::test]
    async fn inactive_session_suppresses_notification() {
        let (seen, callback) = recording_callback();
        let dispatcher = Dispatcher::new(Some(callback), false, source_with(serde_json::Value::Null));
        let state = Mutex::new(SessionState::default());

        dispatcher.dispatch(&state, true, Utc::now()).await;

        assert!(seen.lock().unwrap().is_empty());
    }

    struct CountingSource {
        fetches: AtomicUsize,
        events_tx: broadcast::Sender<RawStatusEvent>,
    }

    #[async_trait]
    impl RawStatusSource for CountingSource {
        fn subscribe(&self) -> broadcast::Receiver<RawStatusEvent> {
            self.events_tx.subscribe()
        }

        async fn fetch(&self) -> RawStatusEvent {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            RawStatusEvent::new(true)
        }
    }

    #[tokio::test]
    async fn enrichment_fetch_is_skipped_without_callback() {
        let (events_tx, _) = broadcast::channel(1);
        let source = Arc::new(CountingSource {
            fetches: AtomicUsize::new(0),
            events_tx,
        });
        let dispatcher = Dispatcher::new(None, true, source.clone());
        let state = Mutex::new(SessionState::new());

        dispatcher.dispatch(&state, true, Utc::now()).await;

        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
    }
}
