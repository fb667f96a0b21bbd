use crate::backends::{BackendError, BackendKind};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Receives rate-limiter backend failures that were answered by failing open.
pub trait DiagnosticSink: Send + Sync {
    fn backend_failure(&self, kind: BackendKind, error: &BackendError);
}

/// Logs backend failures and nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl DiagnosticSink for TracingDiagnostics {
    fn backend_failure(&self, kind: BackendKind, error: &BackendError) {
        warn!(backend = %kind, error = %error, "rate limit backend failed, allowing request");
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionSnapshot {
    pub total_submissions: u64,
    pub accepted: u64,
    pub rate_limited: u64,
    pub validation_failed: u64,
    pub malformed: u64,
    pub mail_failures: u64,
    pub backend_failures: u64,
    pub started_at: u64,
}

/// Process-wide submission counters.
#[derive(Debug)]
pub struct AdmissionMetrics {
    accepted: AtomicU64,
    rate_limited: AtomicU64,
    validation_failed: AtomicU64,
    malformed: AtomicU64,
    mail_failures: AtomicU64,
    backend_failures: AtomicU64,
    started_at: u64,
}

impl Default for AdmissionMetrics {
    fn default() -> Self {
        Self {
            accepted: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            validation_failed: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            mail_failures: AtomicU64::new(0),
            backend_failures: AtomicU64::new(0),
            started_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }
}

impl AdmissionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_validation_failed(&self) {
        self.validation_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Mail failures happen after acceptance, so they are not a separate
    /// submission outcome.
    pub fn record_mail_failure(&self) {
        self.mail_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> AdmissionSnapshot {
        let accepted = self.accepted.load(Ordering::Relaxed);
        let rate_limited = self.rate_limited.load(Ordering::Relaxed);
        let validation_failed = self.validation_failed.load(Ordering::Relaxed);
        let malformed = self.malformed.load(Ordering::Relaxed);

        AdmissionSnapshot {
            total_submissions: accepted + rate_limited + validation_failed + malformed,
            accepted,
            rate_limited,
            validation_failed,
            malformed,
            mail_failures: self.mail_failures.load(Ordering::Relaxed),
            backend_failures: self.backend_failures.load(Ordering::Relaxed),
            started_at: self.started_at,
        }
    }
}

impl DiagnosticSink for AdmissionMetrics {
    fn backend_failure(&self, kind: BackendKind, error: &BackendError) {
        self.backend_failures.fetch_add(1, Ordering::Relaxed);
        TracingDiagnostics.backend_failure(kind, error);
    }
}
