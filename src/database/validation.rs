use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$").unwrap());

/// Field-level validation failures collected while turning a draft into a
/// valid entity. Field names are the API (camelCase) names.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ValidationErrors {
    errors: Vec<(String, String)>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push((field.to_string(), message.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has(&self, field: &str) -> bool {
        self.errors.iter().any(|(f, _)| f == field)
    }

    /// Records `message` when the value is missing
    pub fn require<T>(&mut self, field: &str, value: Option<T>, message: &str) -> Option<T> {
        if value.is_none() {
            self.add(field, message);
        }
        value
    }

    /// Requires a non-blank string and returns it trimmed
    pub fn require_text(&mut self, field: &str, value: Option<String>, message: &str) -> Option<String> {
        match value.map(|v| v.trim().to_string()) {
            Some(v) if !v.is_empty() => Some(v),
            _ => {
                self.add(field, message);
                None
            }
        }
    }

    /// Checks a character count, inclusive on both ends
    pub fn length(&mut self, field: &str, value: &str, min: usize, max: usize, message: &str) {
        let len = value.chars().count();
        if len < min || len > max {
            self.add(field, message);
        }
    }

    pub fn range(&mut self, field: &str, value: f64, min: f64, max: f64, message: &str) {
        if !(min..=max).contains(&value) {
            self.add(field, message);
        }
    }

    pub fn email(&mut self, field: &str, value: &str, message: &str) {
        if !is_email(value) {
            self.add(field, message);
        }
    }

    /// `Invalid data input: a. b.`
    pub fn message(&self) -> String {
        let messages: Vec<&str> = self.errors.iter().map(|(_, m)| m.as_str()).collect();
        format!("Invalid data input: {}.", messages.join(". "))
    }

    pub fn into_map(self) -> HashMap<String, String> {
        self.errors.into_iter().collect()
    }

    /// `Ok(value)` when nothing was recorded
    pub fn finish<T>(self, value: impl FnOnce() -> Option<T>) -> Result<T, ValidationErrors> {
        if !self.is_empty() {
            return Err(self);
        }
        match value() {
            Some(v) => Ok(v),
            None => {
                let mut errors = self;
                errors.add("document", "Document is incomplete");
                Err(errors)
            }
        }
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ValidationErrors {}

pub fn is_email(value: &str) -> bool {
    EMAIL.is_match(value)
}

/// Rounds to one decimal place, as stored for rating averages
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_messages_in_order() {
        let mut errors = ValidationErrors::new();
        errors.add("name", "A tour must have a name");
        errors.add("price", "A tour must have a price");
        assert_eq!(errors.message(), "Invalid data input: A tour must have a name. A tour must have a price.");
        assert!(errors.has("price"));
        assert_eq!(errors.into_map().len(), 2);
    }

    #[test]
    fn require_text_trims_and_rejects_blank() {
        let mut errors = ValidationErrors::new();
        assert_eq!(errors.require_text("summary", Some("  hi  ".into()), "required"), Some("hi".to_string()));
        assert_eq!(errors.require_text("summary", Some("   ".into()), "required"), None);
        assert!(errors.has("summary"));
    }

    #[test]
    fn finish_reports_collected_errors() {
        let mut errors = ValidationErrors::new();
        errors.length("review", "short", 15, 1000, "too short");
        let result: Result<u8, _> = errors.finish(|| Some(1));
        assert!(result.is_err());

        let ok: Result<u8, _> = ValidationErrors::new().finish(|| Some(7));
        assert_eq!(ok.unwrap(), 7);
    }

    #[test]
    fn validates_emails() {
        assert!(is_email("jonas@example.com"));
        assert!(is_email("a.b+c@mail.example.io"));
        assert!(!is_email("jonas@"));
        assert!(!is_email("no-at-sign.com"));
        assert!(!is_email("a b@example.com"));
    }

    #[test]
    fn rounds_to_one_decimal() {
        assert_eq!(round1(4.666), 4.7);
        assert_eq!(round1(4.0), 4.0);
        assert_eq!(round1(3.25), 3.3);
    }
}
