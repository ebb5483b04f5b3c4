//! Error types for APEX

use thiserror::Error;

/// Classification of expression evaluation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ExpressionErrorKind {
    /// Property or field access failed
    PropertyAccess,
    /// Method call failed or method is unknown
    MethodInvocation,
    /// Value could not be coerced to the requested type
    TypeCoercion,
    /// Null was dereferenced without safe navigation
    NullDereference,
    /// The expression source failed to parse
    Syntax,
    /// Anything else
    Unknown,
}

impl std::fmt::Display for ExpressionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExpressionErrorKind::PropertyAccess => "PROPERTY_ACCESS",
            ExpressionErrorKind::MethodInvocation => "METHOD_INVOCATION",
            ExpressionErrorKind::TypeCoercion => "TYPE_COERCION",
            ExpressionErrorKind::NullDereference => "NULL_DEREFERENCE",
            ExpressionErrorKind::Syntax => "SYNTAX",
            ExpressionErrorKind::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Classification of data-store failures, consumed by pipeline callers to
/// decide skip/retry/fail semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DataSourceErrorClass {
    /// Bad record; skip it and continue the batch
    DataIntegrity,
    /// Transient outage; retry per caller policy
    Transient,
    /// Misconfiguration; fail fast
    Configuration,
    /// Unrecoverable; fail fast
    Fatal,
}

impl DataSourceErrorClass {
    /// Whether a caller may continue the surrounding batch after this failure.
    pub fn is_skippable(&self) -> bool {
        matches!(self, DataSourceErrorClass::DataIntegrity)
    }

    /// Whether a retry is worth attempting.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DataSourceErrorClass::Transient)
    }
}

/// Main error type for APEX operations
#[derive(Error, Debug)]
pub enum ApexError {
    /// Configuration load, merge, or semantic validation failed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Expression parse or evaluation failed
    #[error("Expression error ({kind}): {message}")]
    Expression {
        /// Failure classification
        kind: ExpressionErrorKind,
        /// Human-readable description
        message: String,
        /// The offending expression source, when known
        expression: Option<String>,
    },

    /// Missing reference or dependency cycle
    #[error("Dependency error: {0}")]
    Dependency(String),

    /// Evaluation deadline exceeded
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// Data-source adapter failure with classification
    #[error("Data source error ({class:?}): {message}")]
    DataSource {
        /// Retry/skip/fail classification
        class: DataSourceErrorClass,
        /// Human-readable description
        message: String,
    },

    /// Chain guard tripped (fluent depth, workflow cycle at runtime)
    #[error("Chain limit error: {0}")]
    ChainLimit(String),

    /// An id was looked up that the registry does not hold
    #[error("Unknown {entity} id: {id}")]
    UnknownId {
        /// Entity kind (rule, group, chain, ...)
        entity: &'static str,
        /// The missing id
        id: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML (de)serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ApexError {
    /// Build an expression error with a kind and message.
    pub fn expression(kind: ExpressionErrorKind, message: impl Into<String>) -> Self {
        ApexError::Expression {
            kind,
            message: message.into(),
            expression: None,
        }
    }

    /// Attach the offending expression source.
    pub fn with_expression(self, source: impl Into<String>) -> Self {
        match self {
            ApexError::Expression { kind, message, .. } => ApexError::Expression {
                kind,
                message,
                expression: Some(source.into()),
            },
            other => other,
        }
    }

    /// Build a classified data-source error.
    pub fn data_source(class: DataSourceErrorClass, message: impl Into<String>) -> Self {
        ApexError::DataSource {
            class,
            message: message.into(),
        }
    }

    /// The expression error kind, if this is an expression error.
    pub fn expression_kind(&self) -> Option<ExpressionErrorKind> {
        match self {
            ApexError::Expression { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Result type alias for APEX operations
pub type Result<T> = std::result::Result<T, ApexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expression_error_display_includes_kind() {
        let err = ApexError::expression(ExpressionErrorKind::NullDereference, "oops");
        assert!(err.to_string().contains("NULL_DEREFERENCE"));
    }

    #[test]
    fn data_source_class_semantics() {
        assert!(DataSourceErrorClass::DataIntegrity.is_skippable());
        assert!(!DataSourceErrorClass::DataIntegrity.is_retryable());
        assert!(DataSourceErrorClass::Transient.is_retryable());
        assert!(!DataSourceErrorClass::Fatal.is_skippable());
    }
}
