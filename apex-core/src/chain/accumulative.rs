//! Accumulative chaining: weighted score accumulation with rule selection

use crate::chain::{ChainExecutor, ChainedEvaluationContext};
use crate::error::{ApexError, ExpressionErrorKind, Result};
use crate::expr::Deadline;
use crate::model::{AccumulationRule, ChainResult, RuleChain, RuleSelection};
use crate::types::Value;
use rust_decimal::Decimal;
use tracing::debug;

/// Indices of the rules retained by a selection strategy, in declaration
/// order.
fn select_rules(
    executor: &ChainExecutor<'_>,
    rules: &[AccumulationRule],
    selection: &RuleSelection,
    context: &ChainedEvaluationContext,
    deadline: Option<Deadline>,
) -> Result<Vec<usize>> {
    match selection {
        RuleSelection::All => Ok((0..rules.len()).collect()),
        RuleSelection::WeightThreshold(threshold) => Ok(rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.weight >= *threshold)
            .map(|(index, _)| index)
            .collect()),
        RuleSelection::TopWeighted(max_rules) => {
            let mut by_weight: Vec<usize> = (0..rules.len()).collect();
            // Stable sort keeps declaration order for equal weights.
            by_weight.sort_by(|a, b| rules[*b].weight.cmp(&rules[*a].weight));
            let mut selected: Vec<usize> = by_weight.into_iter().take(*max_rules).collect();
            selected.sort_unstable();
            Ok(selected)
        }
        RuleSelection::PriorityBased(min_priority) => Ok(rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.priority >= *min_priority)
            .map(|(index, _)| index)
            .collect()),
        RuleSelection::DynamicThreshold(expression) => {
            let value = executor.eval_value(expression, context.facts(), deadline)?;
            let threshold = value.as_decimal().ok_or_else(|| {
                ApexError::expression(
                    ExpressionErrorKind::TypeCoercion,
                    format!("threshold expression produced {}, expected a number", value.type_name()),
                )
            })?;
            Ok(rules
                .iter()
                .enumerate()
                .filter(|(_, rule)| rule.weight >= threshold)
                .map(|(index, _)| index)
                .collect())
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub(super) fn execute(
    executor: &ChainExecutor<'_>,
    chain: &RuleChain,
    accumulator_variable: &str,
    initial_value: &Value,
    rules: &[AccumulationRule],
    selection: &RuleSelection,
    final_decision_rule: &str,
    mut context: ChainedEvaluationContext,
    deadline: Option<Deadline>,
) -> Result<ChainResult> {
    let mut errors = Vec::new();

    let selected = match select_rules(executor, rules, selection, &context, deadline) {
        Ok(selected) => selected,
        Err(error) => {
            let errors = vec![format!("rule selection: {error}")];
            return Ok(context.into_result(chain.id.clone(), false, Value::Null, errors));
        }
    };

    let selected_ids: Vec<Value> = selected
        .iter()
        .map(|index| Value::string(rules[*index].id.to_string()))
        .collect();
    let skipped_ids: Vec<Value> = (0..rules.len())
        .filter(|index| !selected.contains(index))
        .map(|index| Value::string(rules[index].id.to_string()))
        .collect();
    context.record_stage("selectedRules", Value::list(selected_ids));
    context.record_stage("skippedRules", Value::list(skipped_ids));

    let mut total = initial_value.as_decimal().unwrap_or(Decimal::ZERO);
    context.set_variable(accumulator_variable.to_string(), Value::Decimal(total));

    for index in selected {
        let rule = &rules[index];
        match executor.eval_value(&rule.condition, context.facts(), deadline) {
            Ok(value) => match value.as_decimal() {
                Some(score) => {
                    let contribution = score * rule.weight;
                    total += contribution;
                    debug!(chain = %chain.id, rule = %rule.id, %contribution, %total, "accumulated");
                    context.record_stage(
                        format!("rule_{}_score", rule.id),
                        Value::Decimal(contribution.normalize()),
                    );
                    context.set_variable(accumulator_variable.to_string(), Value::Decimal(total.normalize()));
                    context.push_path(rule.id.to_string());
                    executor.audit(&chain.id, &rule.id, "accumulated");
                }
                None => {
                    errors.push(format!(
                        "rule '{}' produced {}, expected a number",
                        rule.id,
                        value.type_name()
                    ));
                    context.push_path(rule.id.to_string());
                }
            },
            Err(error) => {
                // An errored accumulation rule contributes nothing.
                errors.push(format!("rule '{}': {error}", rule.id));
                context.push_path(rule.id.to_string());
            }
        }
    }

    let decision = match executor.eval_value(final_decision_rule, context.facts(), deadline) {
        Ok(value) => value,
        Err(error) => {
            errors.push(format!("final decision: {error}"));
            let total_value = Value::Decimal(total.normalize());
            context.record_stage("finalDecision", Value::Null);
            context.record_stage(accumulator_variable.to_string(), total_value);
            return Ok(context.into_result(chain.id.clone(), false, Value::Null, errors));
        }
    };
    context.record_stage(accumulator_variable.to_string(), Value::Decimal(total.normalize()));
    context.record_stage("finalDecision", decision.clone());
    context.push_path("final-decision".to_string());

    let success = errors.is_empty();
    Ok(context.into_result(chain.id.clone(), success, decision, errors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::tests_support::fixture;
    use crate::model::{ChainSpec, RulePriority};
    use crate::types::FactContext;
    use std::str::FromStr;
    use std::sync::Arc;

    fn acc_rule(id: &str, condition: &str, weight: &str, priority: RulePriority) -> AccumulationRule {
        AccumulationRule {
            id: Arc::from(id),
            condition: condition.to_string(),
            weight: Decimal::from_str(weight).unwrap(),
            priority,
        }
    }

    fn credit_rules() -> Vec<AccumulationRule> {
        vec![
            acc_rule("credit-history", "#creditScore >= 700 ? 30 : 15", "0.9", RulePriority::High),
            acc_rule(
                "income-verification",
                "#annualIncome >= 80000 ? 25 : 10",
                "0.8",
                RulePriority::Medium,
            ),
            acc_rule("employment-check", "#employmentYears >= 5 ? 15 : 5", "0.6", RulePriority::Low),
        ]
    }

    fn chain(selection: RuleSelection) -> RuleChain {
        RuleChain {
            id: Arc::from("score"),
            name: "score".to_string(),
            spec: ChainSpec::Accumulative {
                accumulator_variable: "totalScore".to_string(),
                initial_value: Value::Int(0),
                rules: credit_rules(),
                selection,
                final_decision_rule: "#totalScore >= 40 ? 'APPROVED' : 'DENIED'".to_string(),
            },
        }
    }

    fn applicant() -> FactContext {
        let mut facts = FactContext::new();
        facts.insert("creditScore".to_string(), Value::Int(750));
        facts.insert("annualIncome".to_string(), Value::Int(85_000));
        facts.insert("employmentYears".to_string(), Value::Int(8));
        facts
    }

    #[test]
    fn weight_threshold_selects_and_accumulates() {
        let fixture = fixture();
        let chain = chain(RuleSelection::WeightThreshold(Decimal::from_str("0.7").unwrap()));
        let result = fixture.executor().execute(&chain, &applicant(), None).unwrap();
        assert!(result.success);
        // 0.9 * 30 + 0.8 * 25 = 47
        assert_eq!(
            result.stage_results.get("totalScore"),
            Some(&Value::Decimal(Decimal::from(47)))
        );
        assert_eq!(result.final_outcome, Value::string("APPROVED"));
        assert_eq!(
            result.stage_results.get("selectedRules"),
            Some(&Value::list(vec![
                Value::string("credit-history"),
                Value::string("income-verification"),
            ]))
        );
        assert_eq!(
            result.stage_results.get("skippedRules"),
            Some(&Value::list(vec![Value::string("employment-check")]))
        );
        assert_eq!(
            result.execution_path,
            vec!["credit-history", "income-verification", "final-decision"]
        );
    }

    #[test]
    fn top_weighted_takes_exactly_n() {
        let fixture = fixture();
        let chain = chain(RuleSelection::TopWeighted(1));
        let result = fixture.executor().execute(&chain, &applicant(), None).unwrap();
        // Only credit-history: 0.9 * 30 = 27 -> DENIED
        assert_eq!(result.final_outcome, Value::string("DENIED"));
        assert_eq!(
            result.stage_results.get("selectedRules"),
            Some(&Value::list(vec![Value::string("credit-history")]))
        );
    }

    #[test]
    fn priority_based_selection() {
        let fixture = fixture();
        let chain = chain(RuleSelection::PriorityBased(RulePriority::Medium));
        let result = fixture.executor().execute(&chain, &applicant(), None).unwrap();
        // HIGH and MEDIUM retained, LOW dropped.
        assert_eq!(
            result.stage_results.get("skippedRules"),
            Some(&Value::list(vec![Value::string("employment-check")]))
        );
    }

    #[test]
    fn dynamic_threshold_reads_the_context() {
        let fixture = fixture();
        let chain = chain(RuleSelection::DynamicThreshold(
            "#strict ? 0.85 : 0.5".to_string(),
        ));
        let mut facts = applicant();
        facts.insert("strict".to_string(), Value::Bool(true));
        let result = fixture.executor().execute(&chain, &facts, None).unwrap();
        assert_eq!(
            result.stage_results.get("selectedRules"),
            Some(&Value::list(vec![Value::string("credit-history")]))
        );
    }

    #[test]
    fn all_strategy_uses_every_rule() {
        let fixture = fixture();
        let chain = chain(RuleSelection::All);
        let result = fixture.executor().execute(&chain, &applicant(), None).unwrap();
        // 27 + 20 + 9 = 56
        assert_eq!(
            result.stage_results.get("totalScore"),
            Some(&Value::Decimal(Decimal::from(56)))
        );
    }
}
