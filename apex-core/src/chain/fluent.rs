//! Fluent-builder chaining: a recursive decision tree with bounded depth

use crate::chain::{ChainExecutor, ChainedEvaluationContext};
use crate::error::{ApexError, Result};
use crate::expr::Deadline;
use crate::model::{ChainResult, FluentNode, RuleChain};
use crate::types::Value;
use tracing::debug;

pub(super) fn execute(
    executor: &ChainExecutor<'_>,
    chain: &RuleChain,
    root: &FluentNode,
    max_depth: usize,
    mut context: ChainedEvaluationContext,
    deadline: Option<Deadline>,
) -> Result<ChainResult> {
    let mut errors = Vec::new();
    let mut node = root;
    let mut depth = 0;
    let mut last_triggered = false;

    loop {
        depth += 1;
        if depth > max_depth {
            return Err(ApexError::ChainLimit(format!(
                "fluent chain '{}' exceeded max depth {max_depth}",
                chain.id
            )));
        }

        let (triggered, error) = executor.eval_rule_bool(&node.rule, context.facts(), deadline)?;
        context.record_stage(format!("fluent_rule_{}_result", node.rule.id), Value::Bool(triggered));
        context.push_path(node.rule.id.to_string());
        executor.audit(&chain.id, &node.rule.id, if triggered { "success branch" } else { "failure branch" });
        if let Some(error) = error {
            errors.push(error);
        }
        last_triggered = triggered;

        let child = if triggered { &node.on_success } else { &node.on_failure };
        match child {
            Some(next) => node = next,
            None => break,
        }
    }

    debug!(chain = %chain.id, depth, leaf = %node.rule.id, "fluent chain reached a leaf");
    let success = errors.is_empty();
    let outcome = if last_triggered {
        Value::string(node.rule.id.to_string())
    } else {
        Value::Null
    };
    Ok(context.into_result(chain.id.clone(), success, outcome, errors))
}
