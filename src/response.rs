use crate::rate_limiter::Decision;
use axum::http::HeaderValue;
use axum::response::Response;
use serde::Serialize;

pub const RATE_LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const RATE_REMAINING_HEADER: &str = "x-ratelimit-remaining";

#[derive(Debug, Serialize)]
pub struct SubmissionResponse {
    pub success: bool,
    pub message: String,
}

impl SubmissionResponse {
    pub fn sent() -> Self {
        Self {
            success: true,
            message: "Email sent successfully".to_string(),
        }
    }
}

/// Attach the limiter's view of the client to a response that passed the
/// rate check.
pub fn with_rate_headers(mut response: Response, limit: u32, decision: &Decision) -> Response {
    let headers = response.headers_mut();
    headers.insert(RATE_LIMIT_HEADER, HeaderValue::from(limit));
    headers.insert(RATE_REMAINING_HEADER, HeaderValue::from(decision.remaining));
    response
}
