//! Immutable typed model objects held by the registry

pub mod chain;
pub mod enrichment;
pub mod results;
pub mod rule;

pub use chain::{
    AccumulationRule, ChainRule, ChainSpec, FailureAction, FluentNode, RuleChain, RulePriority,
    RuleSelection, SequentialStage, StageExecution, WorkflowStage, DEFAULT_MAX_FLUENT_DEPTH,
};
pub use enrichment::{
    CalculationSpec, ConditionSet, ConditionalMappingSpec, DataSourceRef, Dataset, DatasetRef,
    Enrichment, EnrichmentKind, FieldMapping, FieldSpec, LookupSpec, MappingRule, SourceField,
};
pub use results::{ChainResult, DebugDecision, GroupResult, RuleResult, ScenarioResult};
pub use rule::{
    GroupOperator, MemberTarget, Rule, RuleGroup, RuleMetadata, RuleReference, Severity,
    DEFAULT_RULE_PRIORITY,
};

use serde::Serialize;
use std::sync::Arc;

/// A data-type-scoped bundle of rule configurations selected by payload kind.
#[derive(Debug, Clone, Serialize)]
pub struct Scenario {
    /// Unique id within the registry
    pub id: Arc<str>,
    /// Business domain the scenario belongs to
    pub business_domain: String,
    /// Payload type tags this scenario handles
    pub data_types: Vec<String>,
    /// Rule ids to evaluate
    pub rule_ids: Vec<Arc<str>>,
    /// Group ids to evaluate
    pub group_ids: Vec<Arc<str>>,
    /// Enrichment ids to apply before rules run
    pub enrichment_ids: Vec<Arc<str>>,
}

impl Scenario {
    /// Whether this scenario handles the given payload type tag.
    pub fn handles(&self, data_type: &str) -> bool {
        self.data_types.iter().any(|t| t == data_type)
    }
}
