use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::admission::{Admission, AdmissionGate, Rejection};
use crate::error::GatewayError;
use crate::health::HealthChecker;
use crate::key_generator::KeyGenerator;
use crate::mail::{Envelope, Mailer, OutgoingMessage};
use crate::metrics::AdmissionMetrics;
use crate::response::{with_rate_headers, SubmissionResponse};
use crate::submission::Submission;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<AdmissionGate>,
    pub mailer: Arc<dyn Mailer>,
    pub keys: KeyGenerator,
    pub envelope: Envelope,
    pub metrics: Arc<AdmissionMetrics>,
    pub health: Arc<HealthChecker>,
}

/// Accept one form submission
pub async fn submit_form(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    // Decode before touching the limiter: a malformed body costs no slot.
    let submission = Submission::from_json(&body).inspect_err(|e| {
        state.metrics.record_malformed();
        tracing::debug!(error = %e, "rejecting malformed submission");
    })?;

    let client_key = state
        .keys
        .key_for_request(&headers, peer.map(|ConnectInfo(addr)| addr.ip()));
    let limit = state.gate.settings().limit;

    let admission = state.gate.admit(&client_key, submission.into_fields()).await;
    let decision = admission.decision();

    let fields = match admission {
        Admission::Accepted { fields, .. } => fields,
        Admission::Rejected {
            rejection: Rejection::RateLimited { reset_in_secs },
            ..
        } => {
            state.metrics.record_rate_limited();
            tracing::info!(client = %client_key, reset_in_secs, "submission rate limited");
            return Err(GatewayError::RateLimited {
                limit,
                retry_after_secs: reset_in_secs,
            });
        }
        Admission::Rejected {
            rejection: Rejection::ValidationFailed { failures },
            ..
        } => {
            state.metrics.record_validation_failed();
            let response = GatewayError::ValidationFailed(failures).into_response();
            return Ok(with_rate_headers(response, limit, &decision));
        }
    };

    let message = OutgoingMessage::compose(&state.envelope, &fields);
    if let Err(e) = state.mailer.send(&message).await {
        state.metrics.record_mail_failure();
        let response = GatewayError::from(e).into_response();
        return Ok(with_rate_headers(response, limit, &decision));
    }

    state.metrics.record_accepted();
    tracing::info!(client = %client_key, remaining = decision.remaining, "submission accepted");

    Ok(with_rate_headers(
        Json(SubmissionResponse::sent()).into_response(),
        limit,
        &decision,
    ))
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.health.check_health().await)
}

/// Submission counters
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}
