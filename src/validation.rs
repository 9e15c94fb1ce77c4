//! Request body checks that collect every field problem before failing

use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::error::ApiError;

#[derive(Debug, Default)]
pub struct FieldErrors {
    errors: HashMap<String, String>,
}

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps the first problem reported for a field
    pub fn add(&mut self, field: &str, problem: impl Into<String>) {
        self.errors.entry(field.to_string()).or_insert_with(|| problem.into());
    }

    pub fn check(&mut self, ok: bool, field: &str, problem: &str) {
        if !ok {
            self.add(field, problem);
        }
    }

    /// Trimmed, non-empty, at most `max` characters. Returns the trimmed value.
    pub fn text(&mut self, field: &str, value: &str, max: usize) -> String {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            self.add(field, format!("{} is required", field));
        } else if trimmed.chars().count() > max {
            self.add(field, format!("{} must be at most {} characters", field, max));
        }
        trimmed.to_string()
    }

    /// Like `text` for optional fields; blank becomes `None`
    pub fn optional_text(&mut self, field: &str, value: Option<&str>, max: usize) -> Option<String> {
        let trimmed = value.map(str::trim).filter(|v| !v.is_empty())?;
        if trimmed.chars().count() > max {
            self.add(field, format!("{} must be at most {} characters", field, max));
        }
        Some(trimmed.to_string())
    }

    /// Lowercased and trimmed
    pub fn email(&mut self, field: &str, value: &str) -> String {
        let email = normalize_email(value);
        if !is_valid_email(&email) {
            self.add(field, "must be a valid email address");
        }
        email
    }

    /// Fits a `NUMERIC(14, 2)` column and is not negative
    pub fn money(&mut self, field: &str, value: Option<Decimal>) {
        match value {
            Some(v) if v.is_sign_negative() && !v.is_zero() => self.add(field, "must not be negative"),
            Some(v) if v > MAX_AMOUNT => self.add(field, format!("must not exceed {}", MAX_AMOUNT)),
            _ => {}
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn finish(self) -> Result<(), ApiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::validation_error("Validation failed", Some(self.errors)))
        }
    }
}

pub fn normalize_email(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Shape check only: one `@`, something on both sides, a dot in the domain
pub fn is_valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Largest amount a `NUMERIC(14, 2)` column holds
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(276_447_231, 23_283, 0, false, 2);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_all_problems() {
        let mut errors = FieldErrors::new();
        assert_eq!(errors.text("name", "  Acme  ", 10), "Acme");
        errors.text("title", "   ", 10);
        errors.email("email", "nobody");
        errors.money("budget", Some(Decimal::from(-5)));
        errors.money("value", Some(Decimal::ZERO));
        errors.money("price", Some(MAX_AMOUNT + Decimal::new(1, 2)));

        let err = errors.finish().unwrap_err();
        let body = err.to_json();
        assert_eq!(body["code"], "VALIDATION_ERROR");
        assert_eq!(body["field_errors"]["title"], "title is required");
        assert!(body["field_errors"]["email"].is_string());
        assert!(body["field_errors"]["budget"].is_string());
        assert!(body["field_errors"].get("value").is_none());
        assert!(body["field_errors"]["price"].is_string());
        assert!(body["field_errors"].get("name").is_none());
    }

    #[test]
    fn optional_text_treats_blank_as_absent() {
        let mut errors = FieldErrors::new();
        assert_eq!(errors.optional_text("notes", Some("   "), 5), None);
        assert_eq!(errors.optional_text("notes", None, 5), None);
        assert_eq!(errors.optional_text("notes", Some(" ok "), 5), Some("ok".to_string()));
        assert!(errors.is_empty());
    }

    #[test]
    fn money_limit_matches_the_column() {
        assert_eq!(MAX_AMOUNT.to_string(), "999999999999.99");
    }

    #[test]
    fn email_shapes() {
        assert!(is_valid_email("ada@acme.test"));
        assert!(!is_valid_email("ada@acme"));
        assert!(!is_valid_email("@acme.test"));
        assert!(!is_valid_email("a b@acme.test"));
        assert_eq!(normalize_email("  Ada@Acme.TEST "), "ada@acme.test");
    }
}
