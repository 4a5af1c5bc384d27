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

//! Debounced network connectivity monitoring.
//!
//! Raw OS connectivity signals are noisy: they flap rapidly during network
//! transitions and say nothing about whether the application's own backend
//! is reachable. This library turns that stream into a single consolidated
//! connectivity-changed notification:
//!
//! - **Throttle layer**: coalesces raw-event bursts to at most one per
//!   window, always keeping the most recent event
//! - **Verification layer**: optionally cross-checks each event against a
//!   user-supplied reachability check or a default HTTP probe
//! - **Correlation layer**: drops verification results that became stale
//!   while they ran, and deduplicates the final value before notifying
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use netwatch::{ManualStatusSource, Monitor, MonitorOptions, RawStatusEvent};
//!
//! #[tokio::main]
//! async fn main() {
//!     let source = Arc::new(ManualStatusSource::new(RawStatusEvent::new(true)));
//!
//!     let monitor = Monitor::start(
//!         source.clone(),
//!         MonitorOptions {
//!             on_change: Some(Arc::new(|is_connected, at, _| {
//!                 println!("{}: connected = {}", at, is_connected);
//!             })),
//!             ..Default::default()
//!         },
//!     );
//!
//!     // feed raw platform events in; the monitor debounces and verifies
//!     source.set_state(RawStatusEvent::new(false));
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!     monitor.stop();
//! }
//! ```
//!
//! # Custom reachability checks
//!
//! By default a disconnect is verified against a well-known HTTP endpoint.
//! Applications that care about their own backend supply a check instead:
//!
//! ```no_run
//! use std::sync::Arc;
//! use netwatch::{MonitorOptions, ServerCheck};
//!
//! let options = MonitorOptions {
//!     verify_servers: Some(Arc::new(|| {
//!         ServerCheck::Pending(Box::pin(async {
//!             // ping your API here
//!             Ok(true)
//!         }))
//!     })),
//!     ..Default::default()
//! };
//! ```

mod correlator;
mod notify;
pub mod source;
pub mod throttle;
pub mod verify;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::sync::broadcast;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::correlator::Correlator;
use crate::notify::Dispatcher;

pub use source::{ManualStatusSource, RawStatusEvent, RawStatusSource};
pub use throttle::Throttle;
pub use verify::{
    BoxError, CheckFuture, ErrorCallback, ServerCheck, ServerCheckFn, Verdict, Verifier,
    VerifyError, DEFAULT_PROBE_URL,
};

/// Connectivity-change notification callback.
///
/// Receives the consolidated value, the timestamp of the raw event that
/// produced it, and a fresh snapshot when
/// [`attach_connection_info`](MonitorOptions::attach_connection_info) is set.
pub type ChangeCallback = Arc<dyn Fn(bool, DateTime<Utc>, Option<RawStatusEvent>) + Send + Sync>;

/// Configuration for a monitoring session.
#[derive(Clone)]
pub struct MonitorOptions {
    /// Double-check server reachability even when the raw status says
    /// connected.
    pub also_verify_online: bool,
    /// Dispatch events that were superseded while their verification ran.
    pub dispatch_old_events: bool,
    /// Attach a fresh connectivity snapshot to each notification.
    pub attach_connection_info: bool,
    /// Custom reachability check; the default HTTP probe runs when absent.
    pub verify_servers: Option<ServerCheckFn>,
    /// Connectivity-change notification sink.
    pub on_change: Option<ChangeCallback>,
    /// Diagnostic sink for verification failures.
    pub on_error: Option<ErrorCallback>,
    /// Endpoint for the default reachability probe.
    pub probe_url: String,
    /// Minimum spacing between processed raw events.
    pub throttle_window: Duration,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            also_verify_online: false,
            dispatch_old_events: false,
            attach_connection_info: false,
            verify_servers: None,
            on_change: None,
            on_error: None,
            probe_url: DEFAULT_PROBE_URL.to_string(),
            throttle_window: Duration::from_millis(1000),
        }
    }
}

impl std::fmt::Debug for MonitorOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorOptions")
            .field("also_verify_online", &self.also_verify_online)
            .field("dispatch_old_events", &self.dispatch_old_events)
            .field("attach_connection_info", &self.attach_connection_info)
            .field("has_verify_servers", &self.verify_servers.is_some())
            .field("has_on_change", &self.on_change.is_some())
            .field("has_on_error", &self.on_error.is_some())
            .field("probe_url", &self.probe_url)
            .field("throttle_window", &self.throttle_window)
            .finish()
    }
}

/// Handle to a running connectivity monitoring session.
///
/// Created by [`Monitor::start`]; the session runs in a background task
/// until [`stop`](Monitor::stop) is called or the handle is dropped.
pub struct Monitor {
    correlator: Arc<Correlator>,
    source: Arc<dyn RawStatusSource>,
    cancel_token: CancellationToken,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("cancel_token", &self.cancel_token)
            .finish_non_exhaustive()
    }
}

impl Monitor {
    /// Start a monitoring session.
    ///
    /// Subscribes to the source (throttled to one event per
    /// [`throttle_window`](MonitorOptions::throttle_window)) and immediately
    /// checks the current snapshot, so the first notification fires without
    /// waiting for a change event.
    #[must_use]
    pub fn start(source: Arc<dyn RawStatusSource>, options: MonitorOptions) -> Self {
        let MonitorOptions {
            also_verify_online,
            dispatch_old_events,
            attach_connection_info,
            verify_servers,
            on_change,
            on_error,
            probe_url,
            throttle_window,
        } = options;

        let verifier = Verifier::new(verify_servers, on_error, probe_url);
        let dispatcher = Dispatcher::new(on_change, attach_connection_info, Arc::clone(&source));
        let correlator = Arc::new(Correlator::new(
            also_verify_online,
            dispatch_old_events,
            verifier,
            dispatcher,
        ));
        let cancel_token = CancellationToken::new();

        info!("Starting connectivity monitor");

        let task_correlator = Arc::clone(&correlator);
        let task_source = Arc::clone(&source);
        let task_cancel = cancel_token.clone();
        tokio::spawn(async move {
            monitor_loop(task_correlator, task_source, throttle_window, task_cancel).await;
        });

        Self {
            correlator,
            source,
            cancel_token,
        }
    }

    /// Fetch the current snapshot and route it through the correlation
    /// pipeline, bypassing the throttle.
    ///
    /// Returns the consolidated value, or `None` if the result was
    /// superseded by a fresher event before it resolved.
    pub async fn check_now(&self) -> Option<bool> {
        let event = self.source.fetch().await;
        self.correlator.handle_event(event).await
    }

    /// Stop the session.
    ///
    /// Unsubscribes from the source and clears correlation state. In-flight
    /// verifications are not aborted; their late results are discarded.
    pub fn stop(&self) {
        info!("Stopping connectivity monitor");
        self.cancel_token.cancel();
        self.correlator.deactivate();
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.cancel_token.cancel();
        self.correlator.deactivate();
    }
}

async fn monitor_loop(
    correlator: Arc<Correlator>,
    source: Arc<dyn RawStatusSource>,
    throttle_window: Duration,
    cancel_token: CancellationToken,
) {
    let mut events = source.subscribe();
    let mut throttle = Throttle::new(throttle_window);

    // initial snapshot check, through the same path as change events
    let initial = source.fetch().await;
    spawn_handler(&correlator, initial);

    loop {
        let deadline = throttle.deadline();

        tokio::select! {
            () = cancel_token.cancelled() => {
                debug!("Connectivity monitor cancelled");
                return;
            }

            received = events.recv() => match received {
                Ok(event) => {
                    if let Some(event) = throttle.offer(event) {
                        spawn_handler(&correlator, event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!("Status source outpaced the monitor, skipped {} events", missed);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    warn!("Status source closed, stopping connectivity monitor");
                    return;
                }
            },

            () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if let Some(event) = throttle.flush() {
                    spawn_handler(&correlator, event);
                }
            }
        }
    }
}

/// One task per event so a slow verification never blocks fresher events.
fn spawn_handler(correlator: &Arc<Correlator>, event: RawStatusEvent) {
    let correlator = Arc::clone(correlator);
    tokio::spawn(async move {
        correlator.handle_event(event).await;
    });
}
