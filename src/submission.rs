//! Submission payload decoding.

use crate::error::GatewayError;
use serde::Deserialize;
use std::collections::HashMap;

/// Name of the mandatory reply-to field.
pub const REPLY_TO: &str = "replyTo";

/// Untrusted field values for one request, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmittedFields {
    values: HashMap<String, String>,
}

impl SubmittedFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value for `field`, or the empty string when absent.
    pub fn get(&self, field: &str) -> &str {
        self.values.get(field).map(String::as_str).unwrap_or("")
    }

    pub fn contains(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.values.insert(field.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, String)> for SubmittedFields {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FieldPair {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    value: Option<String>,
}

/// Decoded request body: `{"replyTo": "...", "fields": [{"key": .., "value": ..}]}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    reply_to: String,
    #[serde(default)]
    fields: Vec<FieldPair>,
}

impl Submission {
    /// Decode a request body. Anything that is not an object with a string
    /// `replyTo` is a malformed request.
    pub fn from_json(body: &[u8]) -> Result<Self, GatewayError> {
        serde_json::from_slice(body).map_err(|e| GatewayError::MalformedRequest(e.to_string()))
    }

    /// Flatten into a field map. Pairs missing a key or a value are skipped;
    /// later pairs overwrite earlier ones.
    pub fn into_fields(self) -> SubmittedFields {
        let mut fields = SubmittedFields::new();
        fields.insert(REPLY_TO, self.reply_to);
        for pair in self.fields {
            if let (Some(key), Some(value)) = (pair.key, pair.value) {
                fields.insert(key, value);
            }
        }
        fields
    }
}
