//! Chained evaluation context: fact wrapper plus stage results and path

use crate::model::ChainResult;
use crate::types::{FactContext, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// FactContext wrapper carrying stage-result bindings and the execution path.
///
/// Chain stages run sequentially, so derived writes happen here and never on
/// the caller's input map.
#[derive(Debug, Clone)]
pub struct ChainedEvaluationContext {
    facts: FactContext,
    stage_results: BTreeMap<String, Value>,
    execution_path: Vec<String>,
}

impl ChainedEvaluationContext {
    /// Wrap a snapshot of the input facts.
    pub fn new(facts: FactContext) -> Self {
        ChainedEvaluationContext {
            facts,
            stage_results: BTreeMap::new(),
            execution_path: Vec::new(),
        }
    }

    /// The current variable environment.
    pub fn facts(&self) -> &FactContext {
        &self.facts
    }

    /// Bind a derived variable for later stages.
    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.facts.insert(name.into(), value);
    }

    /// Record a stage outcome under its key.
    pub fn record_stage(&mut self, key: impl Into<String>, value: Value) {
        self.stage_results.insert(key.into(), value);
    }

    /// Append a stage or rule id to the execution path.
    pub fn push_path(&mut self, id: impl Into<String>) {
        self.execution_path.push(id.into());
    }

    /// Stage result by key.
    pub fn stage(&self, key: &str) -> Option<&Value> {
        self.stage_results.get(key)
    }

    /// The path so far.
    pub fn path(&self) -> &[String] {
        &self.execution_path
    }

    /// Finish the chain and build its result.
    pub fn into_result(
        self,
        chain_id: Arc<str>,
        success: bool,
        final_outcome: Value,
        errors: Vec<String>,
    ) -> ChainResult {
        ChainResult {
            chain_id,
            success,
            final_outcome,
            stage_results: self.stage_results,
            execution_path: self.execution_path,
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_writes_stay_in_the_context() {
        let mut input = FactContext::new();
        input.insert("amount".to_string(), Value::Int(10));
        let mut ctx = ChainedEvaluationContext::new(input.clone());
        ctx.set_variable("doubled", Value::Int(20));
        ctx.record_stage("base", Value::Int(20));
        ctx.push_path("base");

        assert_eq!(ctx.facts().get("doubled"), Some(&Value::Int(20)));
        assert!(!input.contains_key("doubled"));

        let result = ctx.into_result(Arc::from("c"), true, Value::Int(20), Vec::new());
        assert_eq!(result.execution_path, vec!["base"]);
        assert_eq!(result.stage_results.get("base"), Some(&Value::Int(20)));
    }
}
