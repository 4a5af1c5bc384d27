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

//! Connectivity event correlation.
//!
//! The core state machine. Each observed raw event gets a monotonic sequence
//! token before any verification starts; when a verification completes, the
//! token decides whether the event is still the most recent one or was
//! superseded while the check ran. Superseded results are dropped silently,
//! never delivered out of order.

use std::sync::Mutex;

use chrono::Utc;
use log::debug;

use crate::notify::Dispatcher;
use crate::source::RawStatusEvent;
use crate::verify::Verifier;

/// Shared correlation state. Reset wholesale when the session stops.
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    /// False once the session is stopped; late verification results
    /// observing this skip notification entirely.
    pub(crate) active: bool,
    /// Sequence token of the most recently observed raw event.
    pub(crate) last_change_seq: u64,
    /// Last value delivered to the change callback.
    pub(crate) last_notified: Option<bool>,
    next_seq: u64,
}

impl SessionState {
    pub(crate) fn new() -> Self {
        Self {
            active: true,
            ..Self::default()
        }
    }

    /// Assign the next sequence token to a newly observed event.
    fn observe(&mut self) -> u64 {
        self.next_seq += 1;
        self.last_change_seq = self.next_seq;
        self.last_change_seq
    }
}

pub(crate) struct Correlator {
    also_verify_online: bool,
    dispatch_old_events: bool,
    verifier: Verifier,
    dispatcher: Dispatcher,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("also_verify_online", &self.also_verify_online)
            .field("dispatch_old_events", &self.dispatch_old_events)
            .finish_non_exhaustive()
    }
}

impl Correlator {
    pub(crate) fn new(
        also_verify_online: bool,
        dispatch_old_events: bool,
        verifier: Verifier,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            also_verify_online,
            dispatch_old_events,
            verifier,
            dispatcher,
            state: Mutex::new(SessionState::new()),
        }
    }

    /// Route one raw event through the correlation pipeline.
    ///
    /// Returns the consolidated value once the event has been fully handled,
    /// or `None` when a newer event superseded it while its verification was
    /// in flight.
    pub(crate) async fn handle_event(&self, event: RawStatusEvent) -> Option<bool> {
        let observed_at = Utc::now();
        // the token must be recorded before the first suspension point,
        // otherwise a slow verification could not detect it was superseded
        let seq = self.state.lock().unwrap().observe();

        if !event.is_connected || self.also_verify_online {
            let verdict = self.verifier.verify().await;
            if !self.should_dispatch(seq) {
                debug!("Dropping superseded connectivity event (seq {})", seq);
                return None;
            }
            let is_connected = verdict.resolve(event.is_connected);
            self.dispatcher
                .dispatch(&self.state, is_connected, observed_at)
                .await;
            Some(is_connected)
        } else {
            if self.should_dispatch(seq) {
                self.dispatcher
                    .dispatch(&self.state, event.is_connected, observed_at)
                    .await;
            }
            Some(event.is_connected)
        }
    }

    /// An event is still dispatchable if the session is active and no newer
    /// event superseded it (or superseded events are explicitly allowed).
    fn should_dispatch(&self, seq: u64) -> bool {
        let state = self.state.lock().unwrap();
        state.active && (state.last_change_seq == seq || self.dispatch_old_events)
    }

    /// Clear correlation state; verifications still in flight become no-ops.
    pub(crate) fn deactivate(&self) {
        *self.state.lock().unwrap() = SessionState::default();
    }
}
