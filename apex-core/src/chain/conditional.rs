//! Conditional chaining: a trigger rule selects one of two branches

use crate::chain::{ChainExecutor, ChainedEvaluationContext};
use crate::error::Result;
use crate::expr::Deadline;
use crate::model::{ChainResult, ChainRule, RuleChain};
use crate::types::Value;
use tracing::debug;

pub(super) fn execute(
    executor: &ChainExecutor<'_>,
    chain: &RuleChain,
    trigger: &ChainRule,
    on_trigger: &[ChainRule],
    on_no_trigger: &[ChainRule],
    mut context: ChainedEvaluationContext,
    deadline: Option<Deadline>,
) -> Result<ChainResult> {
    let mut errors = Vec::new();

    let (triggered, trigger_error) = executor.eval_rule_bool(trigger, context.facts(), deadline)?;
    context.record_stage(format!("rule_{}_result", trigger.id), Value::Bool(triggered));
    context.push_path(trigger.id.to_string());
    if let Some(error) = trigger_error {
        errors.push(error);
    }

    let (branch_name, branch) = if triggered {
        ("on-trigger", on_trigger)
    } else {
        ("on-no-trigger", on_no_trigger)
    };
    debug!(chain = %chain.id, branch = branch_name, "conditional chain branching");
    context.record_stage("branchTaken", Value::string(branch_name));
    executor.audit(&chain.id, branch_name, "branch selected");

    for rule in branch {
        let (result, error) = executor.eval_rule_bool(rule, context.facts(), deadline)?;
        context.record_stage(format!("rule_{}_result", rule.id), Value::Bool(result));
        context.push_path(rule.id.to_string());
        if let Some(error) = error {
            errors.push(error);
        }
    }

    let success = errors.is_empty();
    Ok(context.into_result(chain.id.clone(), success, Value::string(branch_name), errors))
}
