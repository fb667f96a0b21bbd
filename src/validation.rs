use crate::constraints::{ConstraintSet, InputRule, PhoneMode};
use crate::submission::SubmittedFields;
use regex::Regex;
use serde::Serialize;
use std::sync::{Arc, LazyLock};

static EMAIL_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]{1,64}@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").expect("email pattern")
});

static PHONE_LOOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9\s()+-]{8,}$").expect("loose phone pattern"));

static PHONE_STRICT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{8,15}$").expect("strict phone pattern"));

static PHONE_E164: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[1-9][0-9]{7,14}$").expect("e164 phone pattern"));

/// Field that phone rules apply to unless configured otherwise.
pub const DEFAULT_PHONE_FIELD: &str = "phoneNumber";

/// A single rule violation for a submitted field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationFailure {
    pub field: String,
    pub value: String,
    pub message: String,
    pub rule: InputRule,
}

/// Structural email check.
///
/// Accepts `local@domain.tld` where the local part is at most 64 characters,
/// the TLD has at least two letters, and neither part starts, ends or
/// contains a run of dots.
pub fn is_email(value: &str) -> bool {
    if !(6..=254).contains(&value.len()) || !EMAIL_SHAPE.is_match(value) {
        return false;
    }

    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };

    [local, domain]
        .iter()
        .all(|part| !part.starts_with('.') && !part.ends_with('.') && !part.contains(".."))
}

/// Phone number check for the given mode. Surrounding whitespace is ignored.
pub fn is_phone(value: &str, mode: PhoneMode) -> bool {
    let value = value.trim();
    if value.is_empty() {
        return false;
    }

    match mode {
        PhoneMode::Loose => PHONE_LOOSE.is_match(value),
        PhoneMode::Strict => PHONE_STRICT.is_match(value),
        PhoneMode::E164 => PHONE_E164.is_match(value),
    }
}

fn phone_message(field: &str, mode: PhoneMode) -> String {
    match mode {
        PhoneMode::E164 => format!(
            "{} must be a valid E.164 phone number (e.g. +14155552671)",
            field
        ),
        PhoneMode::Strict => format!(
            "{} must be a valid phone number of 8-15 digits (e.g. 14155552671)",
            field
        ),
        PhoneMode::Loose => format!(
            "{} must be a valid phone number of at least 8 characters (e.g. +1 (415) 555-2671)",
            field
        ),
    }
}

/// Evaluates submitted fields against a [`ConstraintSet`].
#[derive(Debug, Clone)]
pub struct ConstraintValidator {
    constraints: Arc<ConstraintSet>,
    phone_field: String,
}

impl ConstraintValidator {
    pub fn new(constraints: ConstraintSet) -> Self {
        Self {
            constraints: Arc::new(constraints),
            phone_field: DEFAULT_PHONE_FIELD.to_string(),
        }
    }

    /// Apply phone rules to a differently named field.
    pub fn with_phone_field(mut self, field: impl Into<String>) -> Self {
        self.phone_field = field.into();
        self
    }

    pub fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    /// Validate every declared field, in declared order.
    ///
    /// Missing fields are validated as empty strings. The result is empty
    /// if and only if every rule is satisfied.
    pub fn validate_all(&self, fields: &SubmittedFields) -> Vec<ValidationFailure> {
        self.constraints
            .iter()
            .flat_map(|(field, rule)| self.validate_field(field, fields.get(field), rule))
            .collect()
    }

    /// Validate one value. A missing required value short-circuits the
    /// remaining checks; every other check runs independently.
    pub fn validate_field(&self, field: &str, value: &str, rule: &InputRule) -> Vec<ValidationFailure> {
        let value = value.trim();
        let fail = |message: String| ValidationFailure {
            field: field.to_string(),
            value: value.to_string(),
            message,
            rule: rule.clone(),
        };

        if value.is_empty() {
            if rule.required {
                return vec![fail(format!("{} is required", field))];
            }
            return Vec::new();
        }

        let mut failures = Vec::new();
        let length = value.chars().count();

        if let Some(min) = rule.min_length {
            if length < min {
                failures.push(fail(format!(
                    "{} is too short (minimum length: {})",
                    field, min
                )));
            }
        }

        if let Some(max) = rule.max_length {
            if length > max {
                failures.push(fail(format!(
                    "{} is too long (maximum length: {})",
                    field, max
                )));
            }
        }

        if rule.wants_email() && !is_email(value) {
            failures.push(fail(format!("{} must be a valid email address", field)));
        }

        if let Some(mode) = rule.phone_mode {
            if field == self.phone_field && !is_phone(value, mode) {
                failures.push(fail(phone_message(field, mode)));
            }
        }

        failures
    }
}
