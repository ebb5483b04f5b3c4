//! APEX Core - Declarative business-rules engine
//!
//! This crate provides the APEX rule execution core: YAML-configured rules,
//! rule groups, enrichments, and multi-stage rule chains evaluated against
//! arbitrary fact maps.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod analyzer;
pub mod chain;
pub mod clock;
pub mod config;
pub mod datasource;
pub mod engine;
pub mod enrichment;
pub mod error;
pub mod expr;
pub mod group;
pub mod lookup;
pub mod model;
pub mod monitor;
pub mod recovery;
pub mod registry;
pub mod types;

pub use chain::{AuditEvent, AuditSink, ChainExecutor, ChainedEvaluationContext};
pub use clock::{Clock, FixedClock, SharedClock, SystemClock};
pub use config::{Loader, ValidationReport};
pub use datasource::{AdapterRegistry, DataSourceAdapter, HealthStatus};
pub use engine::{ApexEngine, ApexEngineBuilder, EvalOptions};
pub use enrichment::EnrichmentEngine;
pub use error::{ApexError, DataSourceErrorClass, ExpressionErrorKind, Result};
pub use expr::{ExpressionEngine, TypeHint};
pub use group::GroupExecutor;
pub use lookup::LookupProvider;
pub use model::{
    ChainResult, Enrichment, GroupResult, Rule, RuleChain, RuleGroup, RuleResult, Scenario,
    ScenarioResult, Severity,
};
pub use monitor::{MetricsSnapshot, PerformanceMonitor};
pub use recovery::{ErrorRecovery, RecoveryStrategy};
pub use registry::{Registry, RegistryHandle};
pub use types::{FactContext, Value};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
