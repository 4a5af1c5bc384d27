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

//! Trailing-edge value throttling.
//!
//! Rate-limits a stream of values to at most one per window. The first value
//! in a window passes through immediately; later values coalesce to the most
//! recent one, which is released when the window elapses.

use std::time::Duration;

use tokio::time::Instant;

/// Throttle over values of type `T`.
///
/// Designed to be driven from a `tokio::select!` loop: feed values through
/// [`offer`](Self::offer), sleep until [`deadline`](Self::deadline), then
/// [`flush`](Self::flush) the coalesced trailing value.
#[derive(Debug)]
pub struct Throttle<T> {
    window: Duration,
    window_end: Option<Instant>,
    pending: Option<T>,
}

impl<T> Throttle<T> {
    /// Create a throttle with the given window.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            window_end: None,
            pending: None,
        }
    }

    /// Offer a value.
    ///
    /// Returns it back if no window is open (it may fire immediately);
    /// otherwise stores it as the pending trailing value, replacing any
    /// earlier one.
    pub fn offer(&mut self, value: T) -> Option<T> {
        let now = Instant::now();
        match self.window_end {
            Some(end) if now < end => {
                self.pending = Some(value);
                None
            }
            _ => {
                self.window_end = Some(now + self.window);
                Some(value)
            }
        }
    }

    /// Instant at which the pending trailing value should be flushed.
    ///
    /// `None` while nothing is pending.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().and(self.window_end)
    }

    /// Take the pending trailing value and restart the window, so
    /// back-to-back flushes stay rate-limited.
    pub fn flush(&mut self) -> Option<T> {
        let value = self.pending.take();
        if value.is_some() {
            self.window_end = Some(Instant::now() + self.window);
        }
        value
    }
}
