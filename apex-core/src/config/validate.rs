//! Structured validation reporting for configuration loads

use serde::Serialize;
use std::fmt;

/// Weight of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ValidationSeverity {
    /// Fatal; the registry build fails
    Error,
    /// Suspicious but tolerated
    Warning,
}

/// One validation finding.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationMessage {
    /// Finding weight
    pub severity: ValidationSeverity,
    /// Where the finding was made (file, entity id)
    pub location: String,
    /// What was found
    pub text: String,
}

/// Everything found while loading and merging configuration documents.
///
/// A report with any error-severity message fails the registry build
/// atomically; no partial registry is observable.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    /// Findings in discovery order
    pub messages: Vec<ValidationMessage>,
}

impl ValidationReport {
    /// Empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fatal finding.
    pub fn error(&mut self, location: impl AsRef<str>, text: impl Into<String>) {
        self.messages.push(ValidationMessage {
            severity: ValidationSeverity::Error,
            location: location.as_ref().to_string(),
            text: text.into(),
        });
    }

    /// Record a tolerated finding.
    pub fn warning(&mut self, location: impl AsRef<str>, text: impl Into<String>) {
        self.messages.push(ValidationMessage {
            severity: ValidationSeverity::Warning,
            location: location.as_ref().to_string(),
            text: text.into(),
        });
    }

    /// Whether any fatal finding was recorded.
    pub fn has_errors(&self) -> bool {
        self.messages
            .iter()
            .any(|m| m.severity == ValidationSeverity::Error)
    }

    /// Merge another report into this one.
    pub fn absorb(&mut self, other: ValidationReport) {
        self.messages.extend(other.messages);
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.messages.is_empty() {
            return write!(f, "no validation findings");
        }
        for (i, message) in self.messages.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            let tag = match message.severity {
                ValidationSeverity::Error => "error",
                ValidationSeverity::Warning => "warning",
            };
            write!(f, "[{tag}] {}: {}", message.location, message.text)?;
        }
        Ok(())
    }
}

/// Check a `major.minor.patch` semantic-version string.
pub fn is_semantic_version(version: &str) -> bool {
    let parts: Vec<&str> = version.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semantic_version_format() {
        assert!(is_semantic_version("1.0.0"));
        assert!(is_semantic_version("12.34.56"));
        assert!(!is_semantic_version("1.0"));
        assert!(!is_semantic_version("1.0.x"));
        assert!(!is_semantic_version("v1.0.0"));
        assert!(!is_semantic_version(""));
    }

    #[test]
    fn report_error_detection_and_display() {
        let mut report = ValidationReport::new();
        assert!(!report.has_errors());
        report.warning("a.yaml", "odd but fine");
        assert!(!report.has_errors());
        report.error("a.yaml/rule-1", "duplicate id");
        assert!(report.has_errors());
        let text = report.to_string();
        assert!(text.contains("[error] a.yaml/rule-1: duplicate id"));
    }
}
