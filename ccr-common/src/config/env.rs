//! Environment variable parsing with type safety.
//!
//! Provides a type-safe parser for CCR environment variables with
//! validation and error collection, so every bad variable is reported at
//! once instead of failing on the first.

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvError {
    /// Invalid value for a variable.
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    /// Invalid duration format.
    #[error("Invalid duration for {var}: {value}")]
    InvalidDuration { var: String, value: String },

    /// Value out of valid range.
    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },
}

/// Type-safe environment variable parser.
///
/// Collects errors during parsing so all issues can be reported at once.
/// Every getter returns `None` when the variable is unset, leaving the
/// file/default value in place.
pub struct EnvParser {
    prefix: &'static str,
    errors: Vec<EnvError>,
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvParser {
    /// Create a new parser with the CCR_ prefix.
    pub fn new() -> Self {
        Self {
            prefix: "CCR_",
            errors: Vec::new(),
        }
    }

    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn raw(&self, name: &str) -> Option<(String, String)> {
        let var_name = self.var_name(name);
        env::var(&var_name).ok().map(|value| (var_name, value))
    }

    /// Get a string value. Empty strings count as unset.
    pub fn get_string(&mut self, name: &str) -> Option<String> {
        self.raw(name)
            .map(|(_, value)| value)
            .filter(|value| !value.trim().is_empty())
    }

    pub fn get_path(&mut self, name: &str) -> Option<PathBuf> {
        self.get_string(name).map(PathBuf::from)
    }

    /// Get a boolean value.
    ///
    /// Accepts: 1, true, yes, on (for true)
    ///          0, false, no, off (for false)
    pub fn get_bool(&mut self, name: &str) -> Option<bool> {
        let (var_name, value) = self.raw(name)?;
        match value.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => {
                self.errors.push(EnvError::InvalidValue {
                    var: var_name,
                    expected: "boolean (true/false/1/0/yes/no)".to_string(),
                    value,
                });
                None
            }
        }
    }

    /// Get one of a fixed set of lowercase values.
    pub fn get_one_of(&mut self, name: &str, choices: &[&'static str]) -> Option<&'static str> {
        let (var_name, value) = self.raw(name)?;
        let lowered = value.trim().to_lowercase();
        match choices.iter().copied().find(|choice| *choice == lowered) {
            Some(choice) => Some(choice),
            None => {
                self.errors.push(EnvError::InvalidValue {
                    var: var_name,
                    expected: choices.join("/"),
                    value,
                });
                None
            }
        }
    }

    /// Get a u32 value with range validation.
    pub fn get_u32_range(&mut self, name: &str, min: u32, max: u32) -> Option<u32> {
        let (var_name, value) = self.raw(name)?;
        match value.trim().parse::<u32>() {
            Ok(n) if n >= min && n <= max => Some(n),
            Ok(n) => {
                self.errors.push(EnvError::OutOfRange {
                    var: var_name,
                    value: n.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                });
                None
            }
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var: var_name,
                    expected: "unsigned 32-bit integer".to_string(),
                    value,
                });
                None
            }
        }
    }

    /// Get a duration in humantime format ("300s", "5m", "1m 30s").
    /// A bare number is read as seconds.
    pub fn get_duration(&mut self, name: &str) -> Option<Duration> {
        let (var_name, value) = self.raw(name)?;
        let trimmed = value.trim();
        if let Ok(secs) = trimmed.parse::<u64>() {
            return Some(Duration::from_secs(secs));
        }
        match humantime::parse_duration(trimmed) {
            Ok(duration) => Some(duration),
            Err(_) => {
                self.errors.push(EnvError::InvalidDuration {
                    var: var_name,
                    value,
                });
                None
            }
        }
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn set(name: &str, value: &str) {
        // SAFETY: env-mutating tests are serialized with #[serial].
        unsafe { env::set_var(name, value) };
    }

    fn unset(name: &str) {
        // SAFETY: env-mutating tests are serialized with #[serial].
        unsafe { env::remove_var(name) };
    }

    #[test]
    #[serial]
    fn test_unset_variables_return_none() {
        unset("CCR_TEST_UNSET");
        let mut parser = EnvParser::new();
        assert_eq!(parser.get_string("TEST_UNSET"), None);
        assert_eq!(parser.get_bool("TEST_UNSET"), None);
        assert_eq!(parser.get_duration("TEST_UNSET"), None);
        assert!(!parser.has_errors());
    }

    #[test]
    #[serial]
    fn test_bool_parsing() {
        set("CCR_TEST_BOOL", "yes");
        let mut parser = EnvParser::new();
        assert_eq!(parser.get_bool("TEST_BOOL"), Some(true));

        set("CCR_TEST_BOOL", "maybe");
        assert_eq!(parser.get_bool("TEST_BOOL"), None);
        assert_eq!(parser.errors().len(), 1);
        unset("CCR_TEST_BOOL");
    }

    #[test]
    #[serial]
    fn test_u32_range_collects_errors() {
        set("CCR_TEST_COUNT", "0");
        set("CCR_TEST_OTHER", "three");
        let mut parser = EnvParser::new();
        assert_eq!(parser.get_u32_range("TEST_COUNT", 1, 100), None);
        assert_eq!(parser.get_u32_range("TEST_OTHER", 1, 100), None);

        let errors = parser.take_errors();
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0], EnvError::OutOfRange { .. }));
        assert!(matches!(errors[1], EnvError::InvalidValue { .. }));
        assert!(!parser.has_errors());
        unset("CCR_TEST_COUNT");
        unset("CCR_TEST_OTHER");
    }

    #[test]
    #[serial]
    fn test_one_of_accepts_listed_values_only() {
        set("CCR_TEST_FORMAT", "JSON");
        let mut parser = EnvParser::new();
        assert_eq!(parser.get_one_of("TEST_FORMAT", &["pretty", "json"]), Some("json"));

        set("CCR_TEST_FORMAT", "xml");
        assert_eq!(parser.get_one_of("TEST_FORMAT", &["pretty", "json"]), None);
        assert!(matches!(parser.errors()[0], EnvError::InvalidValue { .. }));
        unset("CCR_TEST_FORMAT");
    }

    #[test]
    #[serial]
    fn test_duration_formats() {
        let mut parser = EnvParser::new();

        set("CCR_TEST_WAIT", "45");
        assert_eq!(parser.get_duration("TEST_WAIT"), Some(Duration::from_secs(45)));

        set("CCR_TEST_WAIT", "5m");
        assert_eq!(parser.get_duration("TEST_WAIT"), Some(Duration::from_secs(300)));

        set("CCR_TEST_WAIT", "soon");
        assert_eq!(parser.get_duration("TEST_WAIT"), None);
        assert!(parser.has_errors());
        unset("CCR_TEST_WAIT");
    }

    #[test]
    #[serial]
    fn test_empty_string_is_unset() {
        set("CCR_TEST_EMPTY", "  ");
        let mut parser = EnvParser::new();
        assert_eq!(parser.get_string("TEST_EMPTY"), None);
        unset("CCR_TEST_EMPTY");
    }
}
