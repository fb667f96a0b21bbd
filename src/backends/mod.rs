//! Storage backends for rate windows.
//!
//! Every backend applies the same reset-on-expiry window through
//! [`advance`]; they differ only in where the window lives and how the
//! read-check-write cycle is made exclusive.

pub mod file;
pub mod memory;
pub mod redis;

pub use self::file::FileBackend;
pub use self::memory::MemoryBackend;
pub use self::redis::RedisBackend;

use crate::rate_limiter::Decision;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("window encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("backend did not answer within {0} ms")]
    Timeout(u128),

    #[error("blocking storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("unexpected backend reply: {0}")]
    Protocol(String),
}

/// Which storage the rate limiter runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Redis,
    Memory,
    File,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Redis => "redis",
            BackendKind::Memory => "memory",
            BackendKind::File => "file",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" | "distributed" => Ok(BackendKind::Redis),
            "memory" | "local" | "process" => Ok(BackendKind::Memory),
            "file" => Ok(BackendKind::File),
            other => Err(format!(
                "unknown rate limit backend '{}', expected redis, memory or file",
                other
            )),
        }
    }
}

/// Request count for one client key since `start` (Unix seconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateWindow {
    pub start: u64,
    pub count: u32,
}

impl RateWindow {
    pub fn open(now: u64) -> Self {
        Self { start: now, count: 1 }
    }

    /// A clock that moved backwards counts as zero elapsed time.
    pub fn elapsed(&self, now: u64) -> u64 {
        now.saturating_sub(self.start)
    }

    pub fn is_expired(&self, now: u64, window_secs: u64) -> bool {
        self.elapsed(now) >= window_secs
    }

    /// Seconds until the window closes, never less than one.
    pub fn reset_in(&self, now: u64, window_secs: u64) -> u64 {
        window_secs.saturating_sub(self.elapsed(now)).max(1)
    }
}

/// Outcome of applying one request to a stored window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// No live window existed; a fresh one was opened with count 1.
    Opened(RateWindow),
    /// The live window had room and was incremented.
    Incremented(RateWindow),
    /// The live window is full; nothing is written.
    Exhausted(RateWindow),
}

impl Transition {
    /// The window to persist, if the transition changed anything.
    pub fn to_store(&self) -> Option<RateWindow> {
        match self {
            Transition::Opened(w) | Transition::Incremented(w) => Some(*w),
            Transition::Exhausted(_) => None,
        }
    }

    pub fn decision(&self, limit: u32, now: u64, window_secs: u64) -> Decision {
        match self {
            Transition::Opened(_) => Decision {
                allowed: true,
                remaining: limit.saturating_sub(1),
                reset_in_secs: window_secs.max(1),
            },
            Transition::Incremented(w) => Decision {
                allowed: true,
                remaining: limit.saturating_sub(w.count),
                reset_in_secs: w.reset_in(now, window_secs),
            },
            Transition::Exhausted(w) => Decision {
                allowed: false,
                remaining: 0,
                reset_in_secs: w.reset_in(now, window_secs),
            },
        }
    }
}

/// Apply one request to `stored`.
///
/// An expired window is replaced, never incremented. A full window is left
/// untouched, so the `limit`-th request is the last one allowed.
pub fn advance(stored: Option<RateWindow>, limit: u32, window_secs: u64, now: u64) -> Transition {
    match stored {
        Some(window) if !window.is_expired(now, window_secs) => {
            if window.count >= limit {
                Transition::Exhausted(window)
            } else {
                Transition::Incremented(RateWindow {
                    start: window.start,
                    count: window.count + 1,
                })
            }
        }
        _ => Transition::Opened(RateWindow::open(now)),
    }
}

/// Storage for rate windows.
///
/// Implementations must make the read-check-write cycle for one key
/// exclusive, and report storage failures as errors rather than guessing a
/// decision; [`crate::rate_limiter::RateLimiter`] owns the fail-open policy.
#[async_trait]
pub trait RateBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn check_and_consume(
        &self,
        key: &str,
        limit: u32,
        window_secs: u64,
        now: u64,
    ) -> Result<Decision, BackendError>;

    /// Cheap liveness probe used by the health endpoint.
    async fn ping(&self) -> Result<(), BackendError> {
        Ok(())
    }

    /// Drop windows that have expired. Returns how many were removed.
    async fn purge_expired(&self, _now: u64, _window_secs: u64) -> Result<usize, BackendError> {
        Ok(0)
    }
}
