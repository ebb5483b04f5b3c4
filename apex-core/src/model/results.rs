//! Structured evaluation results returned to callers

use crate::model::rule::Severity;
use crate::types::{FactContext, Value};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Outcome of evaluating a single rule.
#[derive(Debug, Clone, Serialize)]
pub struct RuleResult {
    /// Rule id
    pub rule_id: Arc<str>,
    /// Whether the condition held
    pub triggered: bool,
    /// Message attached to the outcome
    pub message: String,
    /// Severity of the outcome
    pub severity: Severity,
    /// Stage key when produced inside a chain
    pub stage_key: Option<String>,
    /// Evaluation time in microseconds
    pub evaluation_time_us: u64,
    /// Recovered error description, when the condition failed to evaluate
    pub error: Option<String>,
}

impl RuleResult {
    /// An untriggered result carrying a recovered error.
    pub fn errored(rule_id: Arc<str>, severity: Severity, error: String) -> Self {
        RuleResult {
            rule_id,
            triggered: false,
            message: String::new(),
            severity,
            stage_key: None,
            evaluation_time_us: 0,
            error: Some(error),
        }
    }
}

/// Per-rule decision recorded by a group running in debug mode.
#[derive(Debug, Clone, Serialize)]
pub struct DebugDecision {
    /// Rule id
    pub rule_id: Arc<str>,
    /// Decision for that rule
    pub triggered: bool,
    /// Running group outcome after this member
    pub running_result: bool,
}

/// Outcome of evaluating a rule group.
#[derive(Debug, Clone, Serialize)]
pub struct GroupResult {
    /// Group id
    pub group_id: Arc<str>,
    /// Combined AND/OR outcome; an empty group is untriggered
    pub triggered: bool,
    /// Aggregated severity per the failing/succeeding member election
    pub severity: Severity,
    /// Members actually evaluated (short-circuiting skips the rest)
    pub evaluated: usize,
    /// Members that triggered
    pub passed: usize,
    /// Members that did not
    pub failed: usize,
    /// Ids of members that triggered
    pub passed_rules: Vec<Arc<str>>,
    /// Ids of members that did not
    pub failed_rules: Vec<Arc<str>>,
    /// Individual member results
    pub rule_results: Vec<RuleResult>,
    /// Debug-mode decision log
    pub decisions: Vec<DebugDecision>,
    /// Total group evaluation time in microseconds
    pub evaluation_time_us: u64,
}

/// Outcome of executing a rule chain.
#[derive(Debug, Clone, Serialize)]
pub struct ChainResult {
    /// Chain id
    pub chain_id: Arc<str>,
    /// Whether the chain completed without unhandled error
    pub success: bool,
    /// Final outcome value of the chain
    pub final_outcome: Value,
    /// Stage key to stage value
    pub stage_results: BTreeMap<String, Value>,
    /// Stages and rules in visitation order
    pub execution_path: Vec<String>,
    /// Per-stage errors
    pub errors: Vec<String>,
}

impl ChainResult {
    /// An empty result shell for a chain.
    pub fn new(chain_id: Arc<str>) -> Self {
        ChainResult {
            chain_id,
            success: false,
            final_outcome: Value::Null,
            stage_results: BTreeMap::new(),
            execution_path: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Outcome of dispatching facts to scenarios.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Ids of the scenarios that matched, in declaration order
    pub matched_scenarios: Vec<Arc<str>>,
    /// Whether any scenario matched
    pub matched: bool,
    /// Per-rule results across all matched scenarios
    pub rule_results: Vec<RuleResult>,
    /// Group results across all matched scenarios
    pub group_results: Vec<GroupResult>,
    /// Facts after enrichment
    pub enriched_facts: FactContext,
}

impl ScenarioResult {
    /// The well-defined result for a fact type no scenario declares.
    pub fn unmatched(facts: FactContext) -> Self {
        ScenarioResult {
            matched_scenarios: Vec::new(),
            matched: false,
            rule_results: Vec::new(),
            group_results: Vec::new(),
            enriched_facts: facts,
        }
    }
}
