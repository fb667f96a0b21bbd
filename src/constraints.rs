//! Per-field validation constraints.

use crate::error::{GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Phone number grammar applied to the phone field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum PhoneMode {
    /// Digits, spaces, `+`, parentheses and hyphens; at least 8 characters.
    Loose,
    /// Digits only, 8 to 15 of them.
    Strict,
    /// Optional `+`, then 8 to 15 digits not starting with `0`.
    #[default]
    E164,
}

impl PhoneMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhoneMode::Loose => "loose",
            PhoneMode::Strict => "strict",
            PhoneMode::E164 => "e164",
        }
    }
}

impl fmt::Display for PhoneMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhoneMode {
    type Err = std::convert::Infallible;

    /// Unknown modes fall back to E.164.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "loose" => PhoneMode::Loose,
            "strict" => PhoneMode::Strict,
            _ => PhoneMode::E164,
        })
    }
}

impl From<String> for PhoneMode {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_default()
    }
}

/// Constraints for a single field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputRule {
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_email: Option<bool>,
    #[serde(
        default,
        alias = "phoneValidationMode",
        skip_serializing_if = "Option::is_none"
    )]
    pub phone_mode: Option<PhoneMode>,
}

impl InputRule {
    pub fn required() -> Self {
        Self {
            required: true,
            ..Self::default()
        }
    }

    pub fn optional() -> Self {
        Self::default()
    }

    pub fn length(self, min: usize, max: usize) -> Self {
        self.min(min).max(max)
    }

    pub fn min(mut self, min: usize) -> Self {
        self.min_length = Some(min);
        self
    }

    pub fn max(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    pub fn email(mut self) -> Self {
        self.is_email = Some(true);
        self
    }

    pub fn phone(mut self, mode: PhoneMode) -> Self {
        self.phone_mode = Some(mode);
        self
    }

    /// Email checks run only when the flag is explicitly `true`.
    pub fn wants_email(&self) -> bool {
        self.is_email == Some(true)
    }

    fn check(&self, field: &str) -> Result<(), GatewayError> {
        if let (Some(min), Some(max)) = (self.min_length, self.max_length) {
            if min > max {
                return Err(GatewayError::Configuration(format!(
                    "rule for '{}' has minLength {} greater than maxLength {}",
                    field, min, max
                )));
            }
        }
        Ok(())
    }
}

/// Ordered, immutable mapping from field name to [`InputRule`].
///
/// The declaration order is the order in which validation failures are
/// reported and in which sanitized fields are handed to the mailer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstraintSet {
    rules: Vec<(String, InputRule)>,
}

impl ConstraintSet {
    pub fn builder() -> ConstraintSetBuilder {
        ConstraintSetBuilder::default()
    }

    /// Rules used when no rules file is configured.
    pub fn contact_defaults() -> Self {
        Self {
            rules: vec![
                ("replyTo".to_string(), InputRule::required().email().length(5, 50)),
                ("subject".to_string(), InputRule::optional().length(5, 100)),
                ("message".to_string(), InputRule::required().length(10, 300)),
            ],
        }
    }

    /// Parse a JSON object of `field -> rule`, keeping key order.
    pub fn from_json_str(raw: &str) -> GatewayResult<Self> {
        let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(raw)
            .map_err(|e| GatewayError::Configuration(format!("invalid rules document: {}", e)))?;

        let mut builder = Self::builder();
        for (field, value) in object {
            let rule: InputRule = serde_json::from_value(value).map_err(|e| {
                GatewayError::Configuration(format!("invalid rule for '{}': {}", field, e))
            })?;
            builder = builder.rule(field, rule);
        }
        builder.build()
    }

    pub fn from_file(path: impl AsRef<Path>) -> GatewayResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Configuration(format!("cannot read rules file {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &InputRule)> {
        self.rules.iter().map(|(field, rule)| (field.as_str(), rule))
    }

    pub fn get(&self, field: &str) -> Option<&InputRule> {
        self.rules
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, rule)| rule)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ConstraintSetBuilder {
    rules: Vec<(String, InputRule)>,
}

impl ConstraintSetBuilder {
    /// Declare a field. Declaring the same field twice keeps the first
    /// position and the last rule.
    pub fn rule(mut self, field: impl Into<String>, rule: InputRule) -> Self {
        let field = field.into();
        match self.rules.iter_mut().find(|(name, _)| *name == field) {
            Some(slot) => slot.1 = rule,
            None => self.rules.push((field, rule)),
        }
        self
    }

    pub fn build(self) -> GatewayResult<ConstraintSet> {
        for (field, rule) in &self.rules {
            if field.trim().is_empty() {
                return Err(GatewayError::Configuration(
                    "field names in rules cannot be empty".to_string(),
                ));
            }
            rule.check(field)?;
        }
        Ok(ConstraintSet { rules: self.rules })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_keeps_declared_order() {
        let set = ConstraintSet::from_json_str(
            r#"{
                "message": { "required": true, "minLength": 10 },
                "replyTo": { "required": true, "isEmail": true },
                "phoneNumber": { "phoneValidationMode": "strict" }
            }"#,
        )
        .unwrap();

        let fields: Vec<&str> = set.iter().map(|(field, _)| field).collect();
        assert_eq!(fields, vec!["message", "replyTo", "phoneNumber"]);
        assert_eq!(set.get("message").unwrap().min_length, Some(10));
        assert!(set.get("replyTo").unwrap().wants_email());
        assert_eq!(
            set.get("phoneNumber").unwrap().phone_mode,
            Some(PhoneMode::Strict)
        );
    }

    #[test]
    fn test_unknown_phone_mode_falls_back_to_e164() {
        let rule: InputRule = serde_json::from_str(r#"{ "phoneMode": "international" }"#).unwrap();
        assert_eq!(rule.phone_mode, Some(PhoneMode::E164));
    }

    #[test]
    fn test_min_greater_than_max_rejected() {
        let result = ConstraintSet::builder()
            .rule("subject", InputRule::optional().length(20, 5))
            .build();
        assert!(matches!(result, Err(GatewayError::Configuration(_))));
    }

    #[test]
    fn test_non_object_document_rejected() {
        assert!(ConstraintSet::from_json_str("[1, 2, 3]").is_err());
        assert!(ConstraintSet::from_json_str(r#"{ "replyTo": { "required": "yes" } }"#).is_err());
    }

    #[test]
    fn test_builder_redeclaration_keeps_position() {
        let set = ConstraintSet::builder()
            .rule("replyTo", InputRule::optional())
            .rule("message", InputRule::required())
            .rule("replyTo", InputRule::required().email())
            .build()
            .unwrap();

        let fields: Vec<&str> = set.iter().map(|(field, _)| field).collect();
        assert_eq!(fields, vec!["replyTo", "message"]);
        assert!(set.get("replyTo").unwrap().required);
    }

    #[test]
    fn test_contact_defaults() {
        let set = ConstraintSet::contact_defaults();
        assert_eq!(set.len(), 3);
        assert!(set.get("replyTo").unwrap().wants_email());
        assert!(!set.get("subject").unwrap().required);
    }
}
