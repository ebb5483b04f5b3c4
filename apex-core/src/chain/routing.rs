//! Result-based routing: a router expression dispatches to a keyed rule list

use crate::chain::{ChainExecutor, ChainedEvaluationContext};
use crate::error::Result;
use crate::expr::Deadline;
use crate::model::{ChainResult, ChainRule, RuleChain};
use crate::types::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Final outcome recorded when no route matches and no default is configured.
pub const UNMATCHED_ROUTE: &str = "unmatched";

#[allow(clippy::too_many_arguments)]
pub(super) fn execute(
    executor: &ChainExecutor<'_>,
    chain: &RuleChain,
    router: &str,
    routes: &BTreeMap<String, Vec<ChainRule>>,
    default_route: Option<&[ChainRule]>,
    mut context: ChainedEvaluationContext,
    deadline: Option<Deadline>,
) -> Result<ChainResult> {
    let mut errors = Vec::new();

    let route_key = match executor.eval_value(router, context.facts(), deadline) {
        Ok(value) => value.render(),
        Err(error) => {
            context.push_path("router".to_string());
            let errors = vec![format!("router: {error}")];
            return Ok(context.into_result(chain.id.clone(), false, Value::Null, errors));
        }
    };
    context.record_stage("routeKey", Value::string(route_key.clone()));
    context.push_path("router".to_string());
    debug!(chain = %chain.id, route = %route_key, "routing chain dispatch");

    let (outcome, rules): (String, &[ChainRule]) = match routes.get(&route_key) {
        Some(rules) => (route_key.clone(), rules),
        None => match default_route {
            Some(rules) => ("default".to_string(), rules),
            None => {
                context.record_stage("routeMatched", Value::Bool(false));
                return Ok(context.into_result(
                    chain.id.clone(),
                    true,
                    Value::string(UNMATCHED_ROUTE),
                    errors,
                ));
            }
        },
    };
    context.record_stage("routeMatched", Value::Bool(true));
    executor.audit(&chain.id, &outcome, "route selected");

    for rule in rules {
        let (result, error) = executor.eval_rule_bool(rule, context.facts(), deadline)?;
        context.record_stage(format!("rule_{}_result", rule.id), Value::Bool(result));
        context.push_path(rule.id.to_string());
        if let Some(error) = error {
            errors.push(error);
        }
    }

    let success = errors.is_empty();
    Ok(context.into_result(chain.id.clone(), success, Value::string(outcome), errors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::tests_support::fixture;
    use crate::model::ChainSpec;
    use crate::types::FactContext;
    use std::sync::Arc;

    fn rule(id: &str, condition: &str) -> ChainRule {
        ChainRule {
            id: Arc::from(id),
            condition: condition.to_string(),
            message: None,
        }
    }

    fn chain(default_route: Option<Vec<ChainRule>>) -> RuleChain {
        let mut routes = BTreeMap::new();
        routes.insert("HIGH".to_string(), vec![rule("senior-approval", "#approver == 'senior'")]);
        routes.insert("LOW".to_string(), vec![rule("auto-approve", "true")]);
        RuleChain {
            id: Arc::from("route"),
            name: "route".to_string(),
            spec: ChainSpec::Routing {
                router: "#amount > 100000 ? 'HIGH' : 'LOW'".to_string(),
                routes,
                default_route,
            },
        }
    }

    #[test]
    fn dispatches_to_the_matching_route() {
        let fixture = fixture();
        let mut facts = FactContext::new();
        facts.insert("amount".to_string(), Value::Int(500_000));
        facts.insert("approver".to_string(), Value::string("senior"));
        let result = fixture.executor().execute(&chain(None), &facts, None).unwrap();
        assert!(result.success);
        assert_eq!(result.final_outcome, Value::string("HIGH"));
        assert_eq!(result.execution_path, vec!["router", "senior-approval"]);
    }

    #[test]
    fn unmatched_route_without_default_is_well_defined() {
        let fixture = fixture();
        let chain = RuleChain {
            id: Arc::from("route"),
            name: "route".to_string(),
            spec: ChainSpec::Routing {
                router: "'UNKNOWN'".to_string(),
                routes: BTreeMap::new(),
                default_route: None,
            },
        };
        let result = fixture.executor().execute(&chain, &FactContext::new(), None).unwrap();
        assert!(result.success);
        assert_eq!(result.final_outcome, Value::string(UNMATCHED_ROUTE));
        assert_eq!(result.stage_results.get("routeMatched"), Some(&Value::Bool(false)));
    }

    #[test]
    fn unmatched_route_uses_the_default() {
        let fixture = fixture();
        let chain = chain(Some(vec![rule("fallback", "true")]));
        let mut facts = FactContext::new();
        facts.insert("amount".to_string(), Value::Int(1));
        // LOW matches, so force an unmatched key instead.
        let unmatched = RuleChain {
            id: Arc::from("route"),
            name: "route".to_string(),
            spec: match chain.spec {
                ChainSpec::Routing { routes, default_route, .. } => ChainSpec::Routing {
                    router: "'MEDIUM'".to_string(),
                    routes,
                    default_route,
                },
                other => other,
            },
        };
        let result = fixture.executor().execute(&unmatched, &facts, None).unwrap();
        assert_eq!(result.final_outcome, Value::string("default"));
        assert_eq!(result.execution_path, vec!["router", "fallback"]);
    }
}
