//! Accessor namespaces exposed to expressions
//!
//! Expressions reach engine-supplied services through variable-like
//! namespaces, e.g. `#dateTime.now()` or `#uuid.random()`. The registry maps
//! namespace names to accessor implementations; the engine clock is threaded
//! into every call so time-dependent expressions stay testable.

use crate::clock::Clock;
use crate::error::{ApexError, ExpressionErrorKind, Result};
use crate::types::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A named namespace of methods callable from expressions.
pub trait Accessor: Send + Sync {
    /// Invoke `method` with evaluated arguments.
    fn call(&self, method: &str, args: &[Value], clock: &dyn Clock) -> Result<Value>;
}

/// Registry of accessor namespaces keyed by variable name.
pub struct AccessorRegistry {
    accessors: HashMap<String, Arc<dyn Accessor>>,
}

impl AccessorRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        AccessorRegistry {
            accessors: HashMap::new(),
        }
    }

    /// Registry with the built-in `dateTime` and `uuid` namespaces.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("dateTime", Arc::new(DateTimeAccessor));
        registry.register("uuid", Arc::new(UuidAccessor));
        registry
    }

    /// Register an accessor under a namespace name.
    pub fn register(&mut self, name: impl Into<String>, accessor: Arc<dyn Accessor>) {
        self.accessors.insert(name.into(), accessor);
    }

    /// Look up an accessor by namespace name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Accessor>> {
        self.accessors.get(name)
    }
}

impl Default for AccessorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn unknown_method(namespace: &str, method: &str) -> ApexError {
    ApexError::expression(
        ExpressionErrorKind::MethodInvocation,
        format!("unknown method '{method}' on #{namespace}"),
    )
}

/// `#dateTime` namespace
struct DateTimeAccessor;

impl Accessor for DateTimeAccessor {
    fn call(&self, method: &str, args: &[Value], clock: &dyn Clock) -> Result<Value> {
        match method {
            "now" => Ok(Value::DateTime(clock.now())),
            "today" => {
                let now = clock.now();
                let midnight = now
                    .date_naive()
                    .and_hms_opt(0, 0, 0)
                    .map(|naive| naive.and_utc())
                    .unwrap_or(now);
                Ok(Value::DateTime(midnight))
            }
            "parse" => {
                let text = args.first().and_then(Value::as_str).ok_or_else(|| {
                    ApexError::expression(
                        ExpressionErrorKind::MethodInvocation,
                        "#dateTime.parse expects a string argument",
                    )
                })?;
                let parsed = chrono::DateTime::parse_from_rfc3339(text).map_err(|e| {
                    ApexError::expression(
                        ExpressionErrorKind::TypeCoercion,
                        format!("cannot parse '{text}' as a datetime: {e}"),
                    )
                })?;
                Ok(Value::DateTime(parsed.with_timezone(&chrono::Utc)))
            }
            other => Err(unknown_method("dateTime", other)),
        }
    }
}

/// `#uuid` namespace
struct UuidAccessor;

impl Accessor for UuidAccessor {
    fn call(&self, method: &str, _args: &[Value], _clock: &dyn Clock) -> Result<Value> {
        match method {
            "random" | "generate" => Ok(Value::string(uuid::Uuid::new_v4().to_string())),
            other => Err(unknown_method("uuid", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::TimeZone;

    #[test]
    fn date_time_now_uses_injected_clock() {
        let instant = chrono::Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        let clock = FixedClock(instant);
        let registry = AccessorRegistry::with_builtins();
        let accessor = registry.get("dateTime").unwrap();
        assert_eq!(accessor.call("now", &[], &clock).unwrap(), Value::DateTime(instant));
    }

    #[test]
    fn uuid_random_produces_distinct_values() {
        let registry = AccessorRegistry::with_builtins();
        let accessor = registry.get("uuid").unwrap();
        let clock = FixedClock(chrono::Utc::now());
        let a = accessor.call("random", &[], &clock).unwrap();
        let b = accessor.call("random", &[], &clock).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn unknown_namespace_method_is_classified() {
        let registry = AccessorRegistry::with_builtins();
        let accessor = registry.get("uuid").unwrap();
        let clock = FixedClock(chrono::Utc::now());
        let err = accessor.call("nope", &[], &clock).unwrap_err();
        assert_eq!(
            err.expression_kind(),
            Some(ExpressionErrorKind::MethodInvocation)
        );
    }
}
