//! The admission pipeline every submission passes before any side effect.
//!
//! Stages run strictly in order and the first rejection ends the pipeline:
//!
//! ```text
//! Pending -> RateChecked -> Validated -> Sanitized -> Accepted
//!    |            |
//!    +-> Rejected +-> Rejected
//! ```

use crate::constraints::ConstraintSet;
use crate::rate_limiter::{Decision, RateLimiter, DEFAULT_WINDOW_SECS};
use crate::sanitizer::{sanitize_all, SanitizedFields};
use crate::submission::SubmittedFields;
use crate::validation::{ConstraintValidator, ValidationFailure};
use std::fmt;
use tokio::time::Instant;
use tracing::{debug, info_span, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionStage {
    Pending,
    RateChecked,
    Validated,
    Sanitized,
    Accepted,
    Rejected,
}

impl AdmissionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionStage::Pending => "PENDING",
            AdmissionStage::RateChecked => "RATE_CHECKED",
            AdmissionStage::Validated => "VALIDATED",
            AdmissionStage::Sanitized => "SANITIZED",
            AdmissionStage::Accepted => "ACCEPTED",
            AdmissionStage::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for AdmissionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    RateLimited { reset_in_secs: u64 },
    ValidationFailed { failures: Vec<ValidationFailure> },
}

impl Rejection {
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::RateLimited { .. } => "RATE_LIMITED",
            Rejection::ValidationFailed { .. } => "VALIDATION_FAILED",
        }
    }

    /// Last stage reached before the rejection.
    pub fn stage(&self) -> AdmissionStage {
        match self {
            Rejection::RateLimited { .. } => AdmissionStage::Pending,
            Rejection::ValidationFailed { .. } => AdmissionStage::RateChecked,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Accepted {
        fields: SanitizedFields,
        decision: Decision,
    },
    Rejected {
        rejection: Rejection,
        decision: Decision,
    },
}

impl Admission {
    pub fn stage(&self) -> AdmissionStage {
        match self {
            Admission::Accepted { .. } => AdmissionStage::Accepted,
            Admission::Rejected { .. } => AdmissionStage::Rejected,
        }
    }

    pub fn decision(&self) -> Decision {
        match self {
            Admission::Accepted { decision, .. } | Admission::Rejected { decision, .. } => *decision,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accepted { .. })
    }
}

/// Limit applied to every client key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSettings {
    pub limit: u32,
    pub window_secs: u64,
}

impl RateSettings {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            window_secs: DEFAULT_WINDOW_SECS,
        }
    }

    pub fn per_window(mut self, window_secs: u64) -> Self {
        self.window_secs = window_secs;
        self
    }
}

#[derive(Clone)]
pub struct AdmissionGate {
    limiter: RateLimiter,
    validator: ConstraintValidator,
    settings: RateSettings,
}

impl AdmissionGate {
    pub fn new(limiter: RateLimiter, validator: ConstraintValidator, settings: RateSettings) -> Self {
        Self {
            limiter,
            validator,
            settings,
        }
    }

    pub fn settings(&self) -> RateSettings {
        self.settings
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn constraints(&self) -> &ConstraintSet {
        self.validator.constraints()
    }

    pub async fn admit(&self, client_key: &str, fields: SubmittedFields) -> Admission {
        self.run(client_key, fields, None).await
    }

    /// Admit with a caller deadline; a rate check still pending at the
    /// deadline fails open.
    pub async fn admit_by(
        &self,
        client_key: &str,
        fields: SubmittedFields,
        deadline: Instant,
    ) -> Admission {
        self.run(client_key, fields, Some(deadline)).await
    }

    async fn run(
        &self,
        client_key: &str,
        fields: SubmittedFields,
        deadline: Option<Instant>,
    ) -> Admission {
        let span = info_span!("admission", client = %client_key);
        async move {
            let RateSettings { limit, window_secs } = self.settings;
            debug!(stage = %AdmissionStage::Pending, "submission received");

            let decision = match deadline {
                Some(deadline) => {
                    self.limiter
                        .check_and_consume_by(client_key, limit, window_secs, deadline)
                        .await
                }
                None => {
                    self.limiter
                        .check_and_consume(client_key, limit, window_secs)
                        .await
                }
            };
            if !decision.allowed {
                debug!(stage = %AdmissionStage::Rejected, reason = "RATE_LIMITED", reset_in_secs = decision.reset_in_secs);
                return Admission::Rejected {
                    rejection: Rejection::RateLimited {
                        reset_in_secs: decision.reset_in_secs,
                    },
                    decision,
                };
            }
            debug!(stage = %AdmissionStage::RateChecked, remaining = decision.remaining);

            let failures = self.validator.validate_all(&fields);
            if !failures.is_empty() {
                debug!(stage = %AdmissionStage::Rejected, reason = "VALIDATION_FAILED", failures = failures.len());
                return Admission::Rejected {
                    rejection: Rejection::ValidationFailed { failures },
                    decision,
                };
            }
            debug!(stage = %AdmissionStage::Validated);

            let sanitized = sanitize_all(&fields, self.validator.constraints());
            debug!(stage = %AdmissionStage::Sanitized, fields = sanitized.len());

            debug!(stage = %AdmissionStage::Accepted);
            Admission::Accepted {
                fields: sanitized,
                decision,
            }
        }
        .instrument(span)
        .await
    }
}
