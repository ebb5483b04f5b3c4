//! Sequential dependency chaining: each stage's output feeds the next

use crate::chain::{ChainExecutor, ChainedEvaluationContext};
use crate::error::Result;
use crate::expr::Deadline;
use crate::model::{ChainResult, RuleChain, SequentialStage};
use crate::types::Value;

pub(super) fn execute(
    executor: &ChainExecutor<'_>,
    chain: &RuleChain,
    stages: &[SequentialStage],
    mut context: ChainedEvaluationContext,
    deadline: Option<Deadline>,
) -> Result<ChainResult> {
    let mut last_value = Value::Null;

    for stage in stages {
        match executor.eval_value(&stage.expression, context.facts(), deadline) {
            Ok(value) => {
                context.set_variable(stage.output_variable.clone(), value.clone());
                context.record_stage(stage.id.to_string(), value.clone());
                context.push_path(stage.id.to_string());
                executor.audit(&chain.id, &stage.id, "stage completed");
                last_value = value;
            }
            Err(error) => {
                context.push_path(stage.id.to_string());
                executor.audit(&chain.id, &stage.id, "stage failed");
                let errors = vec![format!("stage '{}': {error}", stage.id)];
                return Ok(context.into_result(chain.id.clone(), false, Value::Null, errors));
            }
        }
    }

    Ok(context.into_result(chain.id.clone(), true, last_value, Vec::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::tests_support::fixture;
    use crate::model::ChainSpec;
    use crate::types::FactContext;
    use rust_decimal::Decimal;
    use std::sync::Arc;

    fn stage(id: &str, expression: &str, output: &str) -> SequentialStage {
        SequentialStage {
            id: Arc::from(id),
            expression: expression.to_string(),
            output_variable: output.to_string(),
        }
    }

    #[test]
    fn stage_outputs_thread_forward() {
        let fixture = fixture();
        let chain = RuleChain {
            id: Arc::from("seq"),
            name: "seq".to_string(),
            spec: ChainSpec::Sequential {
                stages: vec![
                    stage("base", "#amount * 2", "baseAmount"),
                    stage("fee", "#baseAmount * 0.1", "feeAmount"),
                    stage("total", "#baseAmount + #feeAmount", "totalAmount"),
                ],
            },
        };
        let mut facts = FactContext::new();
        facts.insert("amount".to_string(), Value::Int(100));
        let result = fixture.executor().execute(&chain, &facts, None).unwrap();
        assert!(result.success);
        assert_eq!(result.final_outcome, Value::Decimal(Decimal::from(220)));
        assert_eq!(result.execution_path, vec!["base", "fee", "total"]);
        assert_eq!(result.stage_results.get("base"), Some(&Value::Int(200)));
    }

    #[test]
    fn failing_stage_stops_the_chain() {
        let fixture = fixture();
        let chain = RuleChain {
            id: Arc::from("seq"),
            name: "seq".to_string(),
            spec: ChainSpec::Sequential {
                stages: vec![
                    stage("bad", "#missing.field", "x"),
                    stage("never", "1", "y"),
                ],
            },
        };
        let result = fixture.executor().execute(&chain, &FactContext::new(), None).unwrap();
        assert!(!result.success);
        assert_eq!(result.execution_path, vec!["bad"]);
        assert_eq!(result.errors.len(), 1);
    }
}
