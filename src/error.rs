use crate::mail::MailError;
use crate::validation::ValidationFailure;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced to the submitter.
///
/// Backend failures never appear here: the rate limiter fails open and
/// reports them through its diagnostic hook instead.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { limit: u32, retry_after_secs: u64 },

    #[error("Validation failed for {} field(s)", .0.len())]
    ValidationFailed(Vec<ValidationFailure>),

    #[error(transparent)]
    Mail(#[from] MailError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub message: String,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ValidationFailure>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: StatusCode) -> Self {
        Self {
            success: false,
            error: error.to_string(),
            message: message.to_string(),
            code: code.as_u16(),
            errors: None,
            retry_after: None,
        }
    }

    pub fn from_gateway_error(err: &GatewayError) -> Self {
        match err {
            GatewayError::MalformedRequest(_) => {
                Self::new("bad_request", "Invalid JSON payload", StatusCode::BAD_REQUEST)
            }
            GatewayError::RateLimited {
                retry_after_secs, ..
            } => Self {
                retry_after: Some(*retry_after_secs),
                ..Self::new(
                    "rate_limit_exceeded",
                    "Too many requests, please try again later",
                    StatusCode::TOO_MANY_REQUESTS,
                )
            },
            GatewayError::ValidationFailed(failures) => Self {
                errors: Some(failures.clone()),
                ..Self::new("validation_error", "Validation failed", StatusCode::BAD_REQUEST)
            },
            GatewayError::Mail(e) => Self::new(
                "mail_error",
                &format!("Message could not be sent. Mailer Error: {}", e),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            GatewayError::Configuration(msg) => {
                Self::new("configuration_error", msg, StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::from_gateway_error(&self);
        match &self {
            GatewayError::Mail(e) => tracing::error!(error = %e, "mail handoff failed"),
            GatewayError::Configuration(msg) => tracing::error!(error = %msg, "configuration error"),
            _ => {}
        }

        let mut response = (body.status(), Json(body)).into_response();
        if let GatewayError::RateLimited {
            limit,
            retry_after_secs,
        } = self
        {
            let headers = response.headers_mut();
            headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
            headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(0u32));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::InputRule;

    #[test]
    fn test_malformed_maps_to_bad_request() {
        let body = ErrorResponse::from_gateway_error(&GatewayError::MalformedRequest(
            "expected value".into(),
        ));
        assert_eq!(body.code, 400);
        assert_eq!(body.message, "Invalid JSON payload");
    }

    #[test]
    fn test_rate_limited_response_headers() {
        let response = GatewayError::RateLimited {
            limit: 5,
            retry_after_secs: 42,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
        assert_eq!(response.headers()["x-ratelimit-limit"], "5");
    }

    #[test]
    fn test_validation_failures_serialized() {
        let failure = ValidationFailure {
            field: "replyTo".into(),
            value: String::new(),
            message: "replyTo is required".into(),
            rule: InputRule::required(),
        };
        let body = ErrorResponse::from_gateway_error(&GatewayError::ValidationFailed(vec![failure]));
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["errors"][0]["field"], "replyTo");
        assert_eq!(json["errors"][0]["rule"]["required"], true);
        assert!(json.get("retryAfter").is_none());
    }
}
