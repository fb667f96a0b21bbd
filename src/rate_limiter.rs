use crate::backends::{BackendError, BackendKind, RateBackend};
use crate::clock::{Clock, SystemClock};
use crate::metrics::{DiagnosticSink, TracingDiagnostics};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_WINDOW_SECS: u64 = 60;
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_millis(1500);

/// Result of one rate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_in_secs: u64,
}

impl Decision {
    /// What the limiter answers when its backend cannot: allow, with the
    /// full budget reported.
    pub fn fail_open(limit: u32, window_secs: u64) -> Self {
        Self {
            allowed: true,
            remaining: limit,
            reset_in_secs: window_secs.max(1),
        }
    }
}

/// Per-client request limiter over one storage backend.
///
/// This is the only path to stored rate windows. It never returns an error:
/// backend failures and timeouts are reported to the diagnostic sink and
/// answered with [`Decision::fail_open`].
#[derive(Clone)]
pub struct RateLimiter {
    backend: Arc<dyn RateBackend>,
    clock: Arc<dyn Clock>,
    diagnostics: Arc<dyn DiagnosticSink>,
    timeout: Duration,
}

impl RateLimiter {
    pub fn new(backend: Arc<dyn RateBackend>) -> Self {
        Self {
            backend,
            clock: Arc::new(SystemClock::new()),
            diagnostics: Arc::new(TracingDiagnostics),
            timeout: DEFAULT_BACKEND_TIMEOUT,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Upper bound on a single backend call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Count one request for `key` against `limit` per `window_secs`.
    pub async fn check_and_consume(&self, key: &str, limit: u32, window_secs: u64) -> Decision {
        self.check_within(key, limit, window_secs, self.timeout).await
    }

    /// Like [`check_and_consume`](Self::check_and_consume), but also gives up
    /// (failing open) once `deadline` passes.
    pub async fn check_and_consume_by(
        &self,
        key: &str,
        limit: u32,
        window_secs: u64,
        deadline: Instant,
    ) -> Decision {
        let budget = deadline.saturating_duration_since(Instant::now());
        self.check_within(key, limit, window_secs, budget.min(self.timeout))
            .await
    }

    async fn check_within(
        &self,
        key: &str,
        limit: u32,
        window_secs: u64,
        budget: Duration,
    ) -> Decision {
        let now = self.clock.now();
        let call = self.backend.check_and_consume(key, limit, window_secs, now);

        let outcome = match tokio::time::timeout(budget, call).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(budget.as_millis())),
        };

        match outcome {
            Ok(decision) => {
                debug!(
                    backend = %self.backend.kind(),
                    allowed = decision.allowed,
                    remaining = decision.remaining,
                    reset_in_secs = decision.reset_in_secs,
                    "rate check"
                );
                decision
            }
            Err(e) => {
                self.diagnostics.backend_failure(self.backend.kind(), &e);
                Decision::fail_open(limit, window_secs)
            }
        }
    }

    /// Probe the backend within the configured timeout.
    pub async fn ping(&self) -> Result<(), BackendError> {
        match tokio::time::timeout(self.timeout, self.backend.ping()).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(self.timeout.as_millis())),
        }
    }

    /// Remove expired windows. Failures are reported, not returned.
    pub async fn purge_expired(&self, window_secs: u64) -> usize {
        let now = self.clock.now();
        match self.backend.purge_expired(now, window_secs).await {
            Ok(removed) => removed,
            Err(e) => {
                self.diagnostics.backend_failure(self.backend.kind(), &e);
                0
            }
        }
    }
}
