//! Output escaping for submitted values.
//!
//! Escaping is not idempotent: `&` becomes `&amp;`, so sanitizing an already
//! sanitized value escapes it a second time. Sanitize exactly once, right
//! before the values leave the admission pipeline.

use crate::constraints::ConstraintSet;
use crate::submission::{SubmittedFields, REPLY_TO};

/// Escape the five HTML-reserved characters with named entities.
pub fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Trim surrounding whitespace, then escape.
pub fn sanitize_field(value: &str) -> String {
    escape_html(value.trim())
}

/// Insert `<br />` before every line break (`\r\n`, `\n` or `\r`).
pub fn line_breaks(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                out.push_str("<br />\r");
                if chars.peek() == Some(&'\n') {
                    chars.next();
                    out.push('\n');
                }
            }
            '\n' => out.push_str("<br />\n"),
            _ => out.push(c),
        }
    }
    out
}

/// Sanitized values in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizedFields {
    entries: Vec<(String, String)>,
}

impl SanitizedFields {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Sanitize every declared field, plus `replyTo` when it is not declared.
///
/// Absent fields come out as empty strings; undeclared fields are dropped.
pub fn sanitize_all(fields: &SubmittedFields, constraints: &ConstraintSet) -> SanitizedFields {
    let mut entries: Vec<(String, String)> = constraints
        .iter()
        .map(|(field, _)| (field.to_string(), sanitize_field(fields.get(field))))
        .collect();

    if !constraints.contains(REPLY_TO) {
        entries.insert(0, (REPLY_TO.to_string(), sanitize_field(fields.get(REPLY_TO))));
    }

    SanitizedFields { entries }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::InputRule;

    #[test]
    fn test_sanitize_field_trims_then_escapes() {
        assert_eq!(sanitize_field("  <b>hi</b>  "), "&lt;b&gt;hi&lt;/b&gt;");
        assert_eq!(
            sanitize_field(r#"Tom & "Jerry's""#),
            "Tom &amp; &quot;Jerry&#39;s&quot;"
        );
        assert_eq!(sanitize_field("plain"), "plain");
    }

    #[test]
    fn test_escaping_is_not_idempotent() {
        let once = sanitize_field("a & b");
        let twice = sanitize_field(&once);
        assert_eq!(once, "a &amp; b");
        assert_eq!(twice, "a &amp;amp; b");
        assert_ne!(once, twice);
    }

    #[test]
    fn test_line_breaks() {
        assert_eq!(line_breaks("a\nb"), "a<br />\nb");
        assert_eq!(line_breaks("a\r\nb"), "a<br />\r\nb");
        assert_eq!(line_breaks("a\rb"), "a<br />\rb");
        assert_eq!(line_breaks("none"), "none");
    }

    #[test]
    fn test_sanitize_all_order_and_defaults() {
        let constraints = ConstraintSet::builder()
            .rule("subject", InputRule::optional())
            .rule("message", InputRule::required())
            .build()
            .unwrap();

        let mut fields = SubmittedFields::new();
        fields.insert(REPLY_TO, " me@example.com ");
        fields.insert("message", "<hi>");
        fields.insert("unexpected", "dropped");

        let sanitized = sanitize_all(&fields, &constraints);
        let entries: Vec<(&str, &str)> = sanitized.iter().collect();
        assert_eq!(
            entries,
            vec![
                ("replyTo", "me@example.com"),
                ("subject", ""),
                ("message", "&lt;hi&gt;"),
            ]
        );
        assert_eq!(sanitized.get("unexpected"), None);
    }
}
