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

//! Server reachability verification.
//!
//! Raw OS connectivity does not guarantee the application's backend is
//! reachable. This module normalizes the configured reachability check into
//! a [`Verdict`], falling back to an HTTP probe against a well-known
//! endpoint when no check is configured (or the configured one is unusable).
//! No failure escapes as an error; everything collapses to
//! [`Verdict::Unknown`] at worst.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use log::{debug, warn};
use thiserror::Error;

/// Opaque error payload from a user-supplied check.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Future returned by an asynchronous server check.
pub type CheckFuture = Pin<Box<dyn Future<Output = Result<bool, BoxError>> + Send>>;

/// User-supplied reachability check, invoked once per verified event.
pub type ServerCheckFn = Arc<dyn Fn() -> ServerCheck + Send + Sync>;

/// Diagnostic sink for verification failures.
pub type ErrorCallback = Arc<dyn Fn(VerifyError) + Send + Sync>;

/// Endpoint probed when no custom server check is configured.
pub const DEFAULT_PROBE_URL: &str = "https://www.google.com";

/// Result shape of a configured server check.
pub enum ServerCheck {
    /// The check answered immediately.
    Ready(bool),
    /// The check is running asynchronously.
    Pending(CheckFuture),
    /// The check could not produce a usable answer. The reason is reported
    /// to the diagnostic sink and the default probe runs instead.
    Invalid(String),
}

impl std::fmt::Debug for ServerCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(up) => f.debug_tuple("Ready").field(up).finish(),
            Self::Pending(_) => f.write_str("Pending(..)"),
            Self::Invalid(reason) => f.debug_tuple("Invalid").field(reason).finish(),
        }
    }
}

/// Outcome of a reachability verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Servers confirmed reachable.
    Up,
    /// Servers confirmed unreachable.
    Down,
    /// Verification could not decide; callers fall back to the raw status.
    Unknown,
}

impl Verdict {
    /// Collapse to a final boolean, substituting `raw` for `Unknown`.
    #[must_use]
    pub fn resolve(self, raw: bool) -> bool {
        match self {
            Self::Up => true,
            Self::Down => false,
            Self::Unknown => raw,
        }
    }
}

impl From<bool> for Verdict {
    fn from(up: bool) -> Self {
        if up {
            Self::Up
        } else {
            Self::Down
        }
    }
}

/// Errors reported to the diagnostic sink.
///
/// None of these propagate to the caller; they only describe why a
/// verification came back [`Verdict::Unknown`] (or fell back to the probe).
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The configured check returned [`ServerCheck::Invalid`].
    #[error("unusable server check ({0}); supported forms are an immediate boolean or a future")]
    InvalidCheck(String),

    /// The configured asynchronous check failed.
    #[error("server check failed: {0}")]
    CheckFailed(#[source] BoxError),

    /// The default probe failed for a reason other than missing connectivity.
    #[error("reachability probe failed: {0}")]
    ProbeFailed(#[source] reqwest::Error),
}

/// Runs reachability verification per the active configuration.
pub struct Verifier {
    check: Option<ServerCheckFn>,
    on_error: Option<ErrorCallback>,
    probe_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("has_check", &self.check.is_some())
            .field("probe_url", &self.probe_url)
            .finish_non_exhaustive()
    }
}

impl Verifier {
    /// Create a verifier. With no check configured, every verification goes
    /// to the probe at `probe_url`.
    #[must_use]
    pub fn new(
        check: Option<ServerCheckFn>,
        on_error: Option<ErrorCallback>,
        probe_url: String,
    ) -> Self {
        Self {
            check,
            on_error,
            probe_url,
            client: reqwest::Client::new(),
        }
    }

    /// Run the configured check (or the default probe) to a [`Verdict`].
    pub async fn verify(&self) -> Verdict {
        if let Some(check) = &self.check {
            match check() {
                ServerCheck::Ready(up) => return Verdict::from(up),
                ServerCheck::Pending(pending) => {
                    return match pending.await {
                        Ok(up) => Verdict::from(up),
                        Err(e) => {
                            self.report(VerifyError::CheckFailed(e));
                            Verdict::Unknown
                        }
                    };
                }
                ServerCheck::Invalid(reason) => {
                    self.report(VerifyError::InvalidCheck(reason));
                    // fall through to the default probe
                }
            }
        }

        self.probe().await
    }

    /// Probe the configured endpoint with caches disabled.
    ///
    /// A response with any status in [200, 400) means reachable; any other
    /// status means not reachable. A connect-level request failure means no
    /// connectivity, which is a valid `Down`, not an error.
    async fn probe(&self) -> Verdict {
        debug!("Probing {} for server reachability", self.probe_url);

        let request = self
            .client
            .get(&self.probe_url)
            .header("Cache-Control", "no-cache, no-store, must-revalidate")
            .header("Pragma", "no-cache")
            .header("Expires", "0");

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                Verdict::from((200..400).contains(&status))
            }
            Err(e) if e.is_connect() || e.is_timeout() => Verdict::Down,
            Err(e) => {
                self.report(VerifyError::ProbeFailed(e));
                Verdict::Unknown
            }
        }
    }

    fn report(&self, error: VerifyError) {
        warn!("Reachability verification error: {}", error);
        if let Some(on_error) = &self.on_error {
            on_error(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    type ErrorLog = Arc<Mutex<Vec<String>>>;

    fn error_log() -> (ErrorLog, ErrorCallback) {
        let log: ErrorLog = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let callback: ErrorCallback = Arc::new(move |e| sink.lock().unwrap().push(e.to_string()));
        (log, callback)
    }

    #[test]
    fn verdict_resolves_unknown_to_raw() {
        assert!(Verdict::Up.resolve(false));
        assert!(!Verdict::Down.resolve(true));
        assert!(Verdict::Unknown.resolve(true));
        assert!(!Verdict::Unknown.resolve(false));
    }

    #[tokio::test]
    async fn ready_check_answers_without_probing() {
        let check: ServerCheckFn = Arc::new(|| ServerCheck::Ready(false));
        let verifier = Verifier::new(Some(check), None, DEFAULT_PROBE_URL.to_string());

        assert_eq!(verifier.verify().await, Verdict::Down);
    }

    #[tokio::test]
    async fn pending_check_resolves_to_its_value() {
        let check: ServerCheckFn = Arc::new(|| ServerCheck::Pending(Box::pin(async { Ok(true) })));
        let verifier = Verifier::new(Some(check), None, DEFAULT_PROBE_URL.to_string());

        assert_eq!(verifier.verify().await, Verdict::Up);
    }

    #[tokio::test]
    async fn failed_check_reports_and_returns_unknown() {
        let (errors, on_error) = error_log();
        let check: ServerCheckFn = Arc::new(|| {
            ServerCheck::Pending(Box::pin(async { Err::<bool, BoxError>("backend gone".into()) }))
        });
        let verifier = Verifier::new(Some(check), Some(on_error), DEFAULT_PROBE_URL.to_string());

        assert_eq!(verifier.verify().await, Verdict::Unknown);

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("server check failed"));
    }

    #[tokio::test]
    async fn invalid_check_reports_and_falls_back_to_probe() {
        let (errors, on_error) = error_log();
        let check: ServerCheckFn =
            Arc::new(|| ServerCheck::Invalid("returned a string".to_string()));
        // nothing listens on the probe port, so the fallback probe sees a
        // connect failure and classifies it Down
        let verifier = Verifier::new(Some(check), Some(on_error), "http://127.0.0.1:9".to_string());

        assert_eq!(verifier.verify().await, Verdict::Down);

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("unusable server check"));
    }

    #[tokio::test]
    async fn probe_classifies_response_status() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            for status_line in ["204 No Content", "503 Service Unavailable"] {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    status_line
                );
                socket.write_all(response.as_bytes()).await.unwrap();
            }
        });

        let verifier = Verifier::new(None, None, format!("http://{}", addr));
        assert_eq!(verifier.verify().await, Verdict::Up);
        assert_eq!(verifier.verify().await, Verdict::Down);
    }

    #[tokio::test]
    async fn garbled_probe_response_reports_and_returns_unknown() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket.write_all(b"not http at all\r\n\r\n").await.unwrap();
        });

        let (errors, on_error) = error_log();
        let verifier = Verifier::new(None, Some(on_error), format!("http://{}", addr));

        assert_eq!(verifier.verify().await, Verdict::Unknown);

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("reachability probe failed"));
    }
}
