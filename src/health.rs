use serde::{Deserialize, Serialize};
use std::time::{Instant, SystemTime};

use crate::backends::BackendKind;
use crate::rate_limiter::RateLimiter;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: DependencyStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub rate_backend: ServiceStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub kind: BackendKind,
    pub status: String,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

pub struct HealthChecker {
    rate_limiter: RateLimiter,
    started: Instant,
}

impl HealthChecker {
    pub fn new(rate_limiter: RateLimiter) -> Self {
        Self {
            rate_limiter,
            started: Instant::now(),
        }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let backend = self.check_backend().await;

        // Submissions keep flowing while the backend is down, so this is
        // never reported as unhealthy.
        let overall_status = if backend.status == "healthy" {
            "healthy"
        } else {
            "degraded"
        };

        HealthStatus {
            status: overall_status.to_string(),
            timestamp: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.started.elapsed().as_secs(),
            dependencies: DependencyStatus {
                rate_backend: backend,
            },
        }
    }

    async fn check_backend(&self) -> ServiceStatus {
        let start = Instant::now();
        let result = self.rate_limiter.ping().await;
        let response_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => ServiceStatus {
                kind: self.rate_limiter.backend_kind(),
                status: "healthy".to_string(),
                response_time_ms,
                error: None,
            },
            Err(e) => ServiceStatus {
                kind: self.rate_limiter.backend_kind(),
                status: "unavailable".to_string(),
                response_time_ms,
                error: Some(e.to_string()),
            },
        }
    }
}
