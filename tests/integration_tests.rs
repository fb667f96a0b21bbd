use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use formgate::{
    config::Config,
    constraints::ConstraintSet,
    mail::{MailError, Mailer, OutgoingMessage},
    server::create_app,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<OutgoingMessage>>,
}

impl RecordingMailer {
    fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

struct BrokenMailer;

#[async_trait]
impl Mailer for BrokenMailer {
    async fn send(&self, _message: &OutgoingMessage) -> Result<(), MailError> {
        Err(MailError::Transport("connection refused".into()))
    }
}

fn config(vars: &[(&str, &str)]) -> Config {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Config::from_map(&map).unwrap()
}

fn app(vars: &[(&str, &str)], mailer: Arc<dyn Mailer>) -> Router {
    create_app(&config(vars), ConstraintSet::contact_defaults(), mailer).unwrap()
}

fn valid_body() -> Value {
    json!({
        "replyTo": "visitor@example.com",
        "fields": [
            { "key": "subject", "value": "Question about pricing" },
            { "key": "message", "value": "Hello <b>team</b>, quick question." }
        ]
    })
}

async fn submit(app: &Router, body: String, client_ip: &str) -> Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/contact")
                .header(header::CONTENT_TYPE, "application/json")
                .header("client-ip", client_ip)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_valid_submission_reaches_mailer_escaped() {
    let mailer = Arc::new(RecordingMailer::default());
    let app = app(&[], mailer.clone());

    let mut body = valid_body();
    body["fields"]
        .as_array_mut()
        .unwrap()
        .push(json!({ "key": "website", "value": "spam.example" }));

    let response = submit(&app, body.to_string(), "203.0.113.9").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-limit"], "5");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "4");
    assert!(response.headers().contains_key("x-request-id"));

    let json = json_body(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["message"], "Email sent successfully");

    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].reply_to, "visitor@example.com");
    assert_eq!(sent[0].subject, "Question about pricing");
    assert!(sent[0].html_body.contains("Hello &lt;b&gt;team&lt;/b&gt;, quick question."));
    assert!(!sent[0].html_body.contains("<b>team"));
    // Undeclared fields never reach the message.
    assert!(!sent[0].html_body.contains("spam.example"));
}

#[tokio::test]
async fn test_malformed_json_does_not_consume_a_slot() {
    let mailer = Arc::new(RecordingMailer::default());
    let app = app(&[("RATE_LIMIT", "2")], mailer.clone());

    for raw in ["{not json", "[]", r#"{"fields": []}"#, r#"{"replyTo": 7}"#] {
        let response = submit(&app, raw.to_string(), "198.51.100.1").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {raw}");
        let json = json_body(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "Invalid JSON payload");
    }

    let response = submit(&app, valid_body().to_string(), "198.51.100.1").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "1");
    assert!(mailer.sent().len() == 1);
}

#[tokio::test]
async fn test_submission_over_limit_is_rejected() {
    let mailer = Arc::new(RecordingMailer::default());
    let app = app(&[("RATE_LIMIT", "3"), ("RATE_WINDOW_SECS", "60")], mailer.clone());

    for expected_remaining in ["2", "1", "0"] {
        let response = submit(&app, valid_body().to_string(), "192.0.2.44").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-remaining"], expected_remaining);
    }

    let response = submit(&app, valid_body().to_string(), "192.0.2.44").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let retry_after: u64 = response.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));

    let json = json_body(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["retryAfter"], retry_after);
    assert_eq!(mailer.sent().len(), 3);
}

#[tokio::test]
async fn test_validation_failure_reports_every_field() {
    let mailer = Arc::new(RecordingMailer::default());
    let app = app(&[("RATE_LIMIT", "2")], mailer.clone());

    let body = json!({
        "replyTo": "not-an-address",
        "fields": [{ "key": "message", "value": "   " }]
    });
    let response = submit(&app, body.to_string(), "192.0.2.10").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    // The rate check ran first, so the slot is spent.
    assert_eq!(response.headers()["x-ratelimit-remaining"], "1");

    let json = json_body(response).await;
    let errors = json["errors"].as_array().unwrap();
    let fields: Vec<&str> = errors.iter().map(|e| e["field"].as_str().unwrap()).collect();
    assert_eq!(fields, vec!["replyTo", "message"]);
    assert_eq!(errors[1]["message"], "message is required");
    assert!(mailer.sent().is_empty());
}

#[tokio::test]
async fn test_client_ip_header_takes_precedence() {
    let app = app(&[("RATE_LIMIT", "1")], Arc::new(RecordingMailer::default()));

    let request = |client_ip: &'static str, forwarded: &'static str| {
        Request::builder()
            .method(Method::POST)
            .uri("/contact")
            .header("client-ip", client_ip)
            .header("x-forwarded-for", forwarded)
            .body(Body::from(valid_body().to_string()))
            .unwrap()
    };

    let first = app.clone().oneshot(request("203.0.113.5", "10.0.0.1")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    // Same Client-IP, different forwarding chain: same client.
    let second = app.clone().oneshot(request("203.0.113.5", "10.0.0.2")).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

    let other = app.clone().oneshot(request("203.0.113.6", "10.0.0.1")).await.unwrap();
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_first_forwarded_for_entry_identifies_client() {
    let app = app(&[("RATE_LIMIT", "1")], Arc::new(RecordingMailer::default()));

    let request = |forwarded: &'static str| {
        Request::builder()
            .method(Method::POST)
            .uri("/contact")
            .header("x-forwarded-for", forwarded)
            .body(Body::from(valid_body().to_string()))
            .unwrap()
    };

    let first = app.clone().oneshot(request("192.168.1.1, 10.0.0.1")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.clone().oneshot(request("192.168.1.1, 10.9.9.9")).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_mail_failure_is_server_error() {
    let app = app(&[], Arc::new(BrokenMailer));

    let response = submit(&app, valid_body().to_string(), "192.0.2.77").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "4");

    let json = json_body(response).await;
    assert_eq!(json["error"], "mail_error");
    assert!(json["message"]
        .as_str()
        .unwrap()
        .starts_with("Message could not be sent."));
}

#[tokio::test]
async fn test_unreachable_redis_fails_open() {
    let mailer = Arc::new(RecordingMailer::default());
    let app = app(
        &[
            ("RATE_BACKEND", "redis"),
            ("REDIS_URL", "redis://127.0.0.1:1/"),
            ("BACKEND_TIMEOUT_MS", "200"),
            ("RATE_LIMIT", "2"),
        ],
        mailer.clone(),
    );

    for _ in 0..5 {
        let response = submit(&app, valid_body().to_string(), "192.0.2.200").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "2");
    }
    assert_eq!(mailer.sent().len(), 5);

    let metrics = app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = json_body(metrics).await;
    assert_eq!(json["accepted"], 5);
    assert_eq!(json["backend_failures"], 5);

    let health = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    let json = json_body(health).await;
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["dependencies"]["rate_backend"]["kind"], "redis");
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = app(&[], Arc::new(RecordingMailer::default()));

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["dependencies"]["rate_backend"]["kind"], "memory");
}

#[tokio::test]
async fn test_metrics_endpoint_counts_outcomes() {
    let app = app(&[("RATE_LIMIT", "1")], Arc::new(RecordingMailer::default()));

    submit(&app, "{".to_string(), "192.0.2.1").await;
    submit(&app, valid_body().to_string(), "192.0.2.1").await;
    submit(&app, valid_body().to_string(), "192.0.2.1").await;

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = json_body(response).await;

    assert_eq!(json["total_submissions"], 3);
    assert_eq!(json["malformed"], 1);
    assert_eq!(json["accepted"], 1);
    assert_eq!(json["rate_limited"], 1);
}

#[tokio::test]
async fn test_cors_preflight_is_answered() {
    let app = app(&[], Arc::new(RecordingMailer::default()));

    let response = app
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/contact")
                .header(header::ORIGIN, "https://site.example")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
}
