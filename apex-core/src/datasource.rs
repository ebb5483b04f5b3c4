//! External data-source adapter contract consumed by the lookup provider
//!
//! The core never performs I/O itself; rows arrive through this interface.
//! Implementations may be backed by anything (databases, REST, files) and may
//! be internally async; the core awaits completion through the blocking call.

use crate::error::{ApexError, DataSourceErrorClass, Result};
use crate::types::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Parameter name a lookup key is bound to when querying an adapter.
pub const DEFAULT_KEY_PARAMETER: &str = "key";

/// Health of an adapter.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub enum HealthStatus {
    /// Adapter is reachable
    Up,
    /// Adapter is unavailable
    Down {
        /// Why
        reason: String,
    },
}

/// A row returned by an adapter.
pub type Row = BTreeMap<String, Value>;

/// External interface through which lookups and optional writes reach the
/// outside world.
pub trait DataSourceAdapter: Send + Sync {
    /// Run a named operation; `None` means no row matched.
    fn query(&self, operation: &str, parameters: &Row) -> Result<Option<Row>>;

    /// Batched form of [`DataSourceAdapter::query`].
    fn batch_query(&self, operation: &str, parameter_sets: &[Row]) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        for parameters in parameter_sets {
            if let Some(row) = self.query(operation, parameters)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Adapter health.
    fn health(&self) -> HealthStatus {
        HealthStatus::Up
    }

    /// Optional write; the core never calls this, pipeline callers do.
    fn write(&self, operation: &str, _record: &Row) -> Result<()> {
        Err(ApexError::data_source(
            DataSourceErrorClass::Configuration,
            format!("adapter does not support writes (operation '{operation}')"),
        ))
    }
}

/// Adapters registered by logical data-source name.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn DataSourceAdapter>>,
}

impl AdapterRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under a logical name.
    pub fn register(&mut self, name: impl Into<String>, adapter: Arc<dyn DataSourceAdapter>) {
        self.adapters.insert(name.into(), adapter);
    }

    /// Adapter by logical name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn DataSourceAdapter>> {
        self.adapters.get(name)
    }
}

/// Substitute `{name}` placeholders in an operation template.
///
/// Unmatched placeholders are left verbatim so callers see what was missing.
pub fn substitute_template(template: &str, parameters: &Row) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        match rest[open..].find('}') {
            Some(close_offset) => {
                let name = &rest[open + 1..open + close_offset];
                match parameters.get(name) {
                    Some(value) => out.push_str(&value.render()),
                    None => out.push_str(&rest[open..=open + close_offset]),
                }
                rest = &rest[open + close_offset + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Classification of a failure, when it is a data-source failure.
pub fn classification(error: &ApexError) -> Option<DataSourceErrorClass> {
    match error {
        ApexError::DataSource { class, .. } => Some(*class),
        _ => None,
    }
}
