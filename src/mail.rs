//! Handoff to the mail transport.
//!
//! Delivery itself belongs to whatever implements [`Mailer`]; this module
//! only turns accepted fields into a message.

use crate::sanitizer::{line_breaks, SanitizedFields};
use crate::submission::REPLY_TO;
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::info;

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag pattern"));

pub const FALLBACK_SUBJECT: &str = "New contact form submission";

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail transport unavailable: {0}")]
    Transport(String),

    #[error("message rejected: {0}")]
    Rejected(String),
}

/// Sender and recipient for every message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub from: String,
    pub to: String,
    pub reply_to: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

impl OutgoingMessage {
    /// Build the message for accepted, already sanitized fields.
    ///
    /// Values are used as-is: they were HTML-escaped by the sanitizer, and
    /// escaping them again here would double-encode them.
    pub fn compose(envelope: &Envelope, fields: &SanitizedFields) -> Self {
        let html_body = html_body(fields);
        let subject = fields
            .get("subject")
            .filter(|s| !s.is_empty())
            .unwrap_or(FALLBACK_SUBJECT)
            .to_string();

        Self {
            from: envelope.from.clone(),
            to: envelope.to.clone(),
            reply_to: fields.get(REPLY_TO).unwrap_or_default().to_string(),
            subject,
            text_body: strip_tags(&html_body),
            html_body,
        }
    }
}

fn capitalize(field: &str) -> String {
    let mut chars = field.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// One `<p>` per field, newlines rendered as `<br />`.
pub fn html_body(fields: &SanitizedFields) -> String {
    fields
        .iter()
        .map(|(field, value)| {
            format!(
                "<p><strong>{}:</strong> {}</p>\n",
                capitalize(field),
                line_breaks(value)
            )
        })
        .collect()
}

pub fn strip_tags(html: &str) -> String {
    TAG.replace_all(html, "").into_owned()
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), MailError>;
}

/// Writes messages to the log instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), MailError> {
        info!(
            from = %message.from,
            to = %message.to,
            subject = %message.subject,
            body_len = message.html_body.len(),
            "message handed off"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::{ConstraintSet, InputRule};
    use crate::sanitizer::sanitize_all;
    use crate::submission::SubmittedFields;

    fn accepted() -> SanitizedFields {
        let constraints = ConstraintSet::builder()
            .rule(REPLY_TO, InputRule::required())
            .rule("subject", InputRule::optional())
            .rule("message", InputRule::required())
            .build()
            .unwrap();
        let mut fields = SubmittedFields::new();
        fields.insert(REPLY_TO, "visitor@example.com");
        fields.insert("subject", "Quote <request>");
        fields.insert("message", "Line one\nLine two & more");
        sanitize_all(&fields, &constraints)
    }

    #[test]
    fn test_compose_message() {
        let envelope = Envelope {
            from: "forms@example.com".into(),
            to: "owner@example.com".into(),
        };
        let message = OutgoingMessage::compose(&envelope, &accepted());

        assert_eq!(message.reply_to, "visitor@example.com");
        assert_eq!(message.subject, "Quote &lt;request&gt;");
        assert!(message
            .html_body
            .contains("<p><strong>Message:</strong> Line one<br />\nLine two &amp; more</p>"));
        assert!(message.html_body.starts_with("<p><strong>ReplyTo:</strong>"));
        assert!(!message.text_body.contains("<p>"));
        assert!(message.text_body.contains("Message: Line one"));
    }

    #[test]
    fn test_missing_subject_uses_fallback() {
        let constraints = ConstraintSet::builder()
            .rule("message", InputRule::required())
            .build()
            .unwrap();
        let mut fields = SubmittedFields::new();
        fields.insert(REPLY_TO, "visitor@example.com");
        fields.insert("message", "hi");

        let message = OutgoingMessage::compose(&Envelope::default(), &sanitize_all(&fields, &constraints));
        assert_eq!(message.subject, FALLBACK_SUBJECT);
    }

    #[test]
    fn test_log_mailer_accepts_everything() {
        let message = OutgoingMessage::compose(&Envelope::default(), &accepted());
        assert!(tokio_test::block_on(LogMailer.send(&message)).is_ok());
    }
}
