//! Credential checks run before any remote call is made.

use once_cell::sync::Lazy;
use regex::Regex;

pub const DEFAULT_MIN_PASSWORD_LEN: usize = 8;

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$")
        .expect("email pattern compiles")
});

/// Outcome of one credential check. A failed result always carries a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    error_message: Option<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            error_message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
        }
    }

    pub fn successful(&self) -> bool {
        self.error_message.is_none()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

/// Pluggable credential policy. Implementations must be pure and deterministic.
pub trait CredentialValidator: Send + Sync {
    fn validate_email(&self, email: &str) -> ValidationResult;
    fn validate_password(&self, password: &str) -> ValidationResult;
}

#[derive(Debug, Clone)]
pub struct DefaultCredentialPolicy {
    min_password_len: usize,
}

impl DefaultCredentialPolicy {
    pub fn new(min_password_len: usize) -> Self {
        Self { min_password_len }
    }
}

impl Default for DefaultCredentialPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_PASSWORD_LEN)
    }
}

impl CredentialValidator for DefaultCredentialPolicy {
    fn validate_email(&self, email: &str) -> ValidationResult {
        if email.trim().is_empty() {
            return ValidationResult::error("The email can't be blank");
        }
        if !EMAIL_PATTERN.is_match(email.trim()) {
            return ValidationResult::error("That's not a valid email");
        }
        ValidationResult::ok()
    }

    fn validate_password(&self, password: &str) -> ValidationResult {
        if password.chars().count() < self.min_password_len {
            return ValidationResult::error(format!(
                "The password needs to consist of at least {} characters",
                self.min_password_len
            ));
        }
        let has_letter = password.chars().any(char::is_alphabetic);
        let has_digit = password.chars().any(|c| c.is_ascii_digit());
        if !has_letter || !has_digit {
            return ValidationResult::error(
                "The password needs to contain at least one letter and digit",
            );
        }
        ValidationResult::ok()
    }
}
