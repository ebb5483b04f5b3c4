//! Complex workflow chaining: a stage DAG with per-stage failure policy

use crate::analyzer::topological_order;
use crate::chain::{ChainExecutor, ChainedEvaluationContext};
use crate::error::{ApexError, Result};
use crate::expr::Deadline;
use crate::model::{ChainResult, ChainRule, FailureAction, RuleChain, StageExecution, WorkflowStage};
use crate::types::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// Final outcome recorded when a terminate-on-failure stage fails.
pub const WORKFLOW_TERMINATED: &str = "WORKFLOW_TERMINATED";

enum StageOutcome {
    Passed(Value),
    Failed(String),
}

pub(super) fn execute(
    executor: &ChainExecutor<'_>,
    chain: &RuleChain,
    stages: &[WorkflowStage],
    mut context: ChainedEvaluationContext,
    deadline: Option<Deadline>,
) -> Result<ChainResult> {
    let nodes: Vec<Arc<str>> = stages.iter().map(|s| s.id.clone()).collect();
    let mut depends_on: BTreeMap<Arc<str>, Vec<Arc<str>>> = BTreeMap::new();
    for stage in stages {
        depends_on.insert(stage.id.clone(), stage.depends_on.clone());
    }
    // Cycles are caught at load time; a registry assembled by hand still
    // must not loop here.
    let order = topological_order(&nodes, &depends_on)
        .map_err(|e| ApexError::ChainLimit(format!("workflow '{}': {e}", chain.id)))?;
    let by_id: HashMap<&str, &WorkflowStage> =
        stages.iter().map(|s| (s.id.as_ref(), s)).collect();

    let mut passed: HashMap<Arc<str>, bool> = HashMap::new();
    let mut errors = Vec::new();
    let mut last_value = Value::Null;

    for stage_id in order {
        let stage = by_id[stage_id.as_ref()];

        let unsatisfied: Vec<&Arc<str>> = stage
            .depends_on
            .iter()
            .filter(|dep| !passed.get(dep.as_ref()).copied().unwrap_or(false))
            .collect();
        if !unsatisfied.is_empty() {
            debug!(chain = %chain.id, stage = %stage.id, "skipping stage with unsatisfied dependencies");
            errors.push(format!(
                "stage '{}' skipped: dependency '{}' unsatisfied",
                stage.id, unsatisfied[0]
            ));
            passed.insert(stage.id.clone(), false);
            continue;
        }

        context.push_path(stage.id.to_string());
        let outcome = run_stage(executor, &chain.id, stage, &mut context, deadline)?;
        match outcome {
            StageOutcome::Passed(value) => {
                context.record_stage(stage.id.to_string(), value.clone());
                if let Some(output) = &stage.output_variable {
                    context.set_variable(output.clone(), value.clone());
                }
                executor.audit(&chain.id, &stage.id, "stage passed");
                passed.insert(stage.id.clone(), true);
                last_value = value;
            }
            StageOutcome::Failed(reason) => {
                context.record_stage(stage.id.to_string(), Value::Bool(false));
                executor.audit(&chain.id, &stage.id, "stage failed");
                passed.insert(stage.id.clone(), false);
                errors.push(format!("stage '{}': {reason}", stage.id));
                match stage.failure_action {
                    FailureAction::Terminate => {
                        warn!(chain = %chain.id, stage = %stage.id, "workflow terminated");
                        return Ok(context.into_result(
                            chain.id.clone(),
                            false,
                            Value::string(WORKFLOW_TERMINATED),
                            errors,
                        ));
                    }
                    FailureAction::Continue => continue,
                }
            }
        }
    }

    let success = errors.is_empty();
    Ok(context.into_result(chain.id.clone(), success, last_value, errors))
}

fn run_stage(
    executor: &ChainExecutor<'_>,
    chain_id: &Arc<str>,
    stage: &WorkflowStage,
    context: &mut ChainedEvaluationContext,
    deadline: Option<Deadline>,
) -> Result<StageOutcome> {
    let rules: &[ChainRule] = match &stage.execution {
        StageExecution::Rules(rules) => rules,
        StageExecution::Conditional {
            condition,
            on_true,
            on_false,
        } => {
            let branch = match executor.eval_value(condition, context.facts(), deadline) {
                Ok(value) => value.is_truthy(),
                Err(error) => return Ok(StageOutcome::Failed(error.to_string())),
            };
            context.record_stage(
                format!("{}_branch", stage.id),
                Value::string(if branch { "on-true" } else { "on-false" }),
            );
            if branch {
                on_true
            } else {
                on_false
            }
        }
    };

    // Stage rules are AND-grouped: all must pass, and the stage's value is
    // the last rule's raw expression result.
    let mut last_value = Value::Bool(true);
    for rule in rules {
        match executor.eval_value(&rule.condition, context.facts(), deadline) {
            Ok(value) => {
                let holds = value.is_truthy();
                context.record_stage(format!("rule_{}_result", rule.id), Value::Bool(holds));
                if !holds {
                    let reason = rule
                        .message
                        .clone()
                        .unwrap_or_else(|| format!("rule '{}' did not pass", rule.id));
                    return Ok(StageOutcome::Failed(reason));
                }
                last_value = value;
            }
            Err(error) => {
                executor.audit(chain_id, &rule.id, "rule errored");
                return Ok(StageOutcome::Failed(error.to_string()));
            }
        }
    }
    Ok(StageOutcome::Passed(last_value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::tests_support::fixture;
    use crate::model::ChainSpec;
    use crate::types::FactContext;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn rule(id: &str, condition: &str, message: Option<&str>) -> ChainRule {
        ChainRule {
            id: Arc::from(id),
            condition: condition.to_string(),
            message: message.map(str::to_string),
        }
    }

    fn trade_workflow() -> RuleChain {
        RuleChain {
            id: Arc::from("trade-approval"),
            name: "trade approval".to_string(),
            spec: ChainSpec::ComplexWorkflow {
                stages: vec![
                    WorkflowStage {
                        id: Arc::from("pre-validation"),
                        depends_on: vec![],
                        execution: StageExecution::Rules(vec![
                            rule("trade-type-required", "#tradeType != null", Some("trade type missing")),
                            rule("notional-required", "#notionalAmount != null", None),
                            rule("counterparty-required", "#counterparty != null", None),
                        ]),
                        output_variable: None,
                        failure_action: FailureAction::Terminate,
                    },
                    WorkflowStage {
                        id: Arc::from("risk-assessment"),
                        depends_on: vec![Arc::from("pre-validation")],
                        execution: StageExecution::Rules(vec![rule(
                            "risk-level",
                            "#notionalAmount > 1000000 && #marketVolatility > 0.2 ? 'HIGH' : 'MEDIUM'",
                            None,
                        )]),
                        output_variable: Some("riskLevel".to_string()),
                        failure_action: FailureAction::Terminate,
                    },
                    WorkflowStage {
                        id: Arc::from("approval"),
                        depends_on: vec![Arc::from("risk-assessment")],
                        execution: StageExecution::Conditional {
                            condition: "#riskLevel == 'HIGH'".to_string(),
                            on_true: vec![rule(
                                "senior-approval",
                                "#seniorApprovalObtained == true",
                                Some("senior approval required"),
                            )],
                            on_false: vec![rule("auto-approve", "true", None)],
                        },
                        output_variable: Some("approved".to_string()),
                        failure_action: FailureAction::Terminate,
                    },
                ],
            },
        }
    }

    #[test]
    fn null_trade_terminates_after_first_stage() {
        let fixture = fixture();
        let mut facts = FactContext::new();
        facts.insert("tradeType".to_string(), Value::Null);
        let result = fixture.executor().execute(&trade_workflow(), &facts, None).unwrap();
        assert!(!result.success);
        assert_eq!(result.final_outcome, Value::string(WORKFLOW_TERMINATED));
        assert_eq!(result.execution_path, vec!["pre-validation"]);
        assert!(result.errors[0].contains("trade type missing"));
    }

    #[test]
    fn high_risk_path_requires_senior_approval() {
        let fixture = fixture();
        let mut facts = FactContext::new();
        facts.insert("tradeType".to_string(), Value::string("SWAP"));
        facts.insert("notionalAmount".to_string(), Value::Int(5_000_000));
        facts.insert("counterparty".to_string(), Value::string("ACME"));
        facts.insert(
            "marketVolatility".to_string(),
            Value::Decimal(Decimal::from_str("0.3").unwrap()),
        );
        facts.insert("seniorApprovalObtained".to_string(), Value::Bool(true));
        let result = fixture.executor().execute(&trade_workflow(), &facts, None).unwrap();
        assert!(result.success);
        assert_eq!(
            result.stage_results.get("risk-assessment"),
            Some(&Value::string("HIGH"))
        );
        assert_eq!(
            result.stage_results.get("approval_branch"),
            Some(&Value::string("on-true"))
        );
        assert_eq!(
            result.execution_path,
            vec!["pre-validation", "risk-assessment", "approval"]
        );
    }

    #[test]
    fn continue_failure_action_skips_dependents() {
        let fixture = fixture();
        let chain = RuleChain {
            id: Arc::from("wf"),
            name: "wf".to_string(),
            spec: ChainSpec::ComplexWorkflow {
                stages: vec![
                    WorkflowStage {
                        id: Arc::from("gate"),
                        depends_on: vec![],
                        execution: StageExecution::Rules(vec![rule("never", "false", None)]),
                        output_variable: None,
                        failure_action: FailureAction::Continue,
                    },
                    WorkflowStage {
                        id: Arc::from("dependent"),
                        depends_on: vec![Arc::from("gate")],
                        execution: StageExecution::Rules(vec![rule("always", "true", None)]),
                        output_variable: None,
                        failure_action: FailureAction::Continue,
                    },
                    WorkflowStage {
                        id: Arc::from("independent"),
                        depends_on: vec![],
                        execution: StageExecution::Rules(vec![rule("also-always", "true", None)]),
                        output_variable: None,
                        failure_action: FailureAction::Continue,
                    },
                ],
            },
        };
        let result = fixture.executor().execute(&chain, &FactContext::new(), None).unwrap();
        assert!(!result.success);
        // gate failed, dependent skipped, independent still ran.
        assert!(result.execution_path.contains(&"independent".to_string()));
        assert!(!result.execution_path.contains(&"dependent".to_string()));
        assert!(result.errors.iter().any(|e| e.contains("dependent")));
    }

    #[test]
    fn runtime_cycle_is_a_chain_limit_error() {
        let fixture = fixture();
        let chain = RuleChain {
            id: Arc::from("wf"),
            name: "wf".to_string(),
            spec: ChainSpec::ComplexWorkflow {
                stages: vec![
                    WorkflowStage {
                        id: Arc::from("a"),
                        depends_on: vec![Arc::from("b")],
                        execution: StageExecution::Rules(vec![rule("r", "true", None)]),
                        output_variable: None,
                        failure_action: FailureAction::Terminate,
                    },
                    WorkflowStage {
                        id: Arc::from("b"),
                        depends_on: vec![Arc::from("a")],
                        execution: StageExecution::Rules(vec![rule("s", "true", None)]),
                        output_variable: None,
                        failure_action: FailureAction::Terminate,
                    },
                ],
            },
        };
        let err = fixture.executor().execute(&chain, &FactContext::new(), None).unwrap_err();
        assert!(matches!(err, ApexError::ChainLimit(_)));
    }
}
