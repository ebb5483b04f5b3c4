//! Rule group execution: AND/OR aggregation, short-circuiting, parallel
//! members, debug mode, severity election

use crate::error::Result;
use crate::expr::{Deadline, ExpressionEngine};
use crate::model::{
    DebugDecision, GroupOperator, GroupResult, MemberTarget, Rule, RuleGroup, RuleResult, Severity,
};
use crate::monitor::PerformanceMonitor;
use crate::recovery::{ErrorRecovery, RuleRecovery};
use crate::registry::Registry;
use crate::types::{FactContext, Value};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{instrument, trace};

/// One member's outcome: `None` when the member was skipped by recovery.
type MemberOutcome = Option<(bool, RuleResult)>;

/// Executes rule groups against a shared fact context.
pub struct GroupExecutor<'a> {
    registry: &'a Registry,
    exprs: &'a ExpressionEngine,
    recovery: &'a ErrorRecovery,
    monitor: &'a PerformanceMonitor,
}

impl<'a> GroupExecutor<'a> {
    /// Executor over the given collaborators.
    pub fn new(
        registry: &'a Registry,
        exprs: &'a ExpressionEngine,
        recovery: &'a ErrorRecovery,
        monitor: &'a PerformanceMonitor,
    ) -> Self {
        GroupExecutor {
            registry,
            exprs,
            recovery,
            monitor,
        }
    }

    /// Evaluate a group; members run sequentially or on the worker pool.
    #[instrument(skip(self, facts, deadline), fields(group_id = %group.id))]
    pub fn execute(
        &self,
        group: &RuleGroup,
        facts: &FactContext,
        deadline: Option<Deadline>,
    ) -> Result<GroupResult> {
        let start = Instant::now();
        // A per-group timeout overrides the evaluation deadline.
        let deadline = match group.timeout_ms {
            Some(timeout_ms) => Some(Deadline::from_millis(timeout_ms)),
            None => deadline,
        };

        let members: Vec<_> = group.enabled_members().collect();
        let parallel = group.parallel && members.len() > 1 && !group.debug;

        let mut result = GroupResult {
            group_id: group.id.clone(),
            triggered: false,
            severity: Severity::Info,
            evaluated: 0,
            passed: 0,
            failed: 0,
            passed_rules: Vec::new(),
            failed_rules: Vec::new(),
            rule_results: Vec::new(),
            decisions: Vec::new(),
            evaluation_time_us: 0,
        };

        if members.is_empty() {
            // An empty group is untriggered regardless of operator.
            result.evaluation_time_us = start.elapsed().as_micros() as u64;
            return Ok(result);
        }

        let outcomes: Vec<MemberOutcome> = if parallel {
            trace!(members = members.len(), "evaluating group members in parallel");
            let evaluated: Vec<Result<MemberOutcome>> = members
                .par_iter()
                .map(|member| self.evaluate_member(&member.target, facts, deadline))
                .collect();
            let mut outcomes = Vec::with_capacity(evaluated.len());
            for outcome in evaluated {
                outcomes.push(outcome?);
            }
            outcomes
        } else {
            let short_circuit = group.short_circuit && !group.debug;
            let mut outcomes = Vec::with_capacity(members.len());
            let mut running: Option<bool> = None;
            for member in &members {
                let outcome = self.evaluate_member(&member.target, facts, deadline)?;
                let triggered = outcome.as_ref().map(|(t, _)| *t);
                if let Some(triggered) = triggered {
                    running = Some(match (running, group.operator) {
                        (None, _) => triggered,
                        (Some(acc), GroupOperator::And) => acc && triggered,
                        (Some(acc), GroupOperator::Or) => acc || triggered,
                    });
                    if group.debug {
                        if let Some((_, rule_result)) = &outcome {
                            result.decisions.push(DebugDecision {
                                rule_id: rule_result.rule_id.clone(),
                                triggered,
                                running_result: running.unwrap_or(false),
                            });
                        }
                    }
                }
                let stop_failure = group.stop_on_first_failure && triggered == Some(false);
                outcomes.push(outcome);
                if stop_failure {
                    break;
                }
                if short_circuit {
                    match (group.operator, running) {
                        (GroupOperator::And, Some(false)) | (GroupOperator::Or, Some(true)) => break,
                        _ => {}
                    }
                }
            }
            outcomes
        };

        // Combine: skipped members take no part in aggregation.
        let mut combined: Option<bool> = None;
        for outcome in outcomes.into_iter().flatten() {
            let (triggered, rule_result) = outcome;
            result.evaluated += 1;
            if triggered {
                result.passed += 1;
                result.passed_rules.push(rule_result.rule_id.clone());
            } else {
                result.failed += 1;
                result.failed_rules.push(rule_result.rule_id.clone());
            }
            combined = Some(match (combined, group.operator) {
                (None, _) => triggered,
                (Some(acc), GroupOperator::And) => acc && triggered,
                (Some(acc), GroupOperator::Or) => acc || triggered,
            });
            result.rule_results.push(rule_result);
        }
        result.triggered = combined.unwrap_or(false);

        // Severity election: failing members decide on failure, every
        // evaluated member decides on success.
        let electorate: Vec<&RuleResult> = if result.triggered {
            result.rule_results.iter().collect()
        } else {
            result.rule_results.iter().filter(|r| !r.triggered).collect()
        };
        result.severity = electorate
            .iter()
            .map(|r| r.severity)
            .max()
            .unwrap_or(Severity::Info);

        result.evaluation_time_us = start.elapsed().as_micros() as u64;
        Ok(result)
    }

    fn evaluate_member(
        &self,
        target: &MemberTarget,
        facts: &FactContext,
        deadline: Option<Deadline>,
    ) -> Result<MemberOutcome> {
        match target {
            MemberTarget::Rule(id) => {
                let Some(rule) = self.registry.rule(id) else {
                    // Missing references fail validation; a skip here only
                    // covers registries assembled without the loader.
                    return Ok(None);
                };
                self.evaluate_rule(rule, facts, deadline)
            }
            MemberTarget::Group(id) => {
                let Some(nested) = self.registry.group(id) else {
                    return Ok(None);
                };
                let nested_result = self.execute(nested, facts, deadline)?;
                let rule_result = RuleResult {
                    rule_id: nested_result.group_id.clone(),
                    triggered: nested_result.triggered,
                    message: String::new(),
                    severity: nested_result.severity,
                    stage_key: None,
                    evaluation_time_us: nested_result.evaluation_time_us,
                    error: None,
                };
                Ok(Some((nested_result.triggered, rule_result)))
            }
        }
    }

    /// Evaluate one rule's condition, routing failures to recovery.
    pub fn evaluate_rule(
        &self,
        rule: &Rule,
        facts: &FactContext,
        deadline: Option<Deadline>,
    ) -> Result<MemberOutcome> {
        let start = Instant::now();
        match self.exprs.evaluate_bool(&rule.condition, facts, deadline) {
            Ok(triggered) => {
                let elapsed = start.elapsed();
                self.monitor.record_rule(&rule.id, triggered, elapsed);
                Ok(Some((
                    triggered,
                    RuleResult {
                        rule_id: rule.id.clone(),
                        triggered,
                        message: if triggered { rule.message.clone() } else { String::new() },
                        severity: rule.severity,
                        stage_key: None,
                        evaluation_time_us: elapsed.as_micros() as u64,
                        error: None,
                    },
                )))
            }
            Err(error) => {
                let recovered = self.recovery.recover_rule(
                    self.exprs,
                    &rule.id,
                    &rule.condition,
                    facts,
                    deadline,
                    error,
                )?;
                match recovered {
                    RuleRecovery::Value(triggered) => {
                        let elapsed = start.elapsed();
                        self.monitor.record_rule(&rule.id, triggered, elapsed);
                        Ok(Some((
                            triggered,
                            RuleResult {
                                rule_id: rule.id.clone(),
                                triggered,
                                message: if triggered { rule.message.clone() } else { String::new() },
                                severity: rule.severity,
                                stage_key: None,
                                evaluation_time_us: elapsed.as_micros() as u64,
                                error: None,
                            },
                        )))
                    }
                    RuleRecovery::Untriggered(context) => {
                        self.monitor.record_rule_error(&rule.id, &context.kind);
                        Ok(Some((
                            false,
                            RuleResult::errored(rule.id.clone(), rule.severity, context.message),
                        )))
                    }
                    RuleRecovery::Skipped(context) => {
                        self.monitor.record_rule_error(&rule.id, &context.kind);
                        Ok(None)
                    }
                }
            }
        }
    }
}

/// Publish a group's outcome into the fact context for downstream chains:
/// `#ruleResults['rule-id']` and `#ruleGroupResults['group-id']`.
pub fn publish_group_result(result: &GroupResult, facts: &mut FactContext) {
    let mut rule_results = match facts.get("ruleResults") {
        Some(Value::Map(map)) => (**map).clone(),
        _ => BTreeMap::new(),
    };
    for rule_result in &result.rule_results {
        rule_results.insert(rule_result.rule_id.to_string(), Value::Bool(rule_result.triggered));
    }
    facts.insert("ruleResults".to_string(), Value::map(rule_results));

    let mut group_entry = BTreeMap::new();
    group_entry.insert("passed".to_string(), Value::Bool(result.triggered));
    group_entry.insert(
        "passedRules".to_string(),
        Value::list(result.passed_rules.iter().map(|id| Value::string(id.to_string())).collect()),
    );
    group_entry.insert(
        "failedRules".to_string(),
        Value::list(result.failed_rules.iter().map(|id| Value::string(id.to_string())).collect()),
    );

    let mut group_results = match facts.get("ruleGroupResults") {
        Some(Value::Map(map)) => (**map).clone(),
        _ => BTreeMap::new(),
    };
    group_results.insert(result.group_id.to_string(), Value::map(group_entry));
    facts.insert("ruleGroupResults".to_string(), Value::map(group_results));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;
    use crate::model::{RuleMetadata, RuleReference};
    use crate::recovery::RecoveryStrategy;
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn rule(id: &str, condition: &str, severity: Severity) -> Rule {
        Rule {
            id: Arc::from(id),
            name: id.to_string(),
            condition: condition.to_string(),
            message: format!("{id} matched"),
            severity,
            priority: 100,
            categories: BTreeSet::new(),
            depends_on: Vec::new(),
            metadata: RuleMetadata::stamped(Utc::now()),
        }
    }

    fn group(id: &str, operator: GroupOperator, rule_ids: &[&str]) -> RuleGroup {
        RuleGroup {
            id: Arc::from(id),
            name: id.to_string(),
            operator,
            priority: 100,
            categories: BTreeSet::new(),
            members: rule_ids
                .iter()
                .enumerate()
                .map(|(index, rule_id)| RuleReference {
                    target: MemberTarget::Rule(Arc::from(*rule_id)),
                    sequence: (index + 1) as u32,
                    enabled: true,
                    override_priority: None,
                })
                .collect(),
            short_circuit: true,
            parallel: false,
            debug: false,
            stop_on_first_failure: false,
            timeout_ms: None,
        }
    }

    struct Fixture {
        registry: Registry,
        exprs: ExpressionEngine,
        recovery: ErrorRecovery,
        monitor: PerformanceMonitor,
    }

    impl Fixture {
        fn new(rules: Vec<Rule>, groups: Vec<RuleGroup>) -> Self {
            let mut registry = Registry::new();
            for rule in rules {
                registry.add_rule(rule).unwrap();
            }
            for group in groups {
                registry.add_group(group).unwrap();
            }
            Fixture {
                registry,
                exprs: ExpressionEngine::new(system_clock()),
                recovery: ErrorRecovery::new(RecoveryStrategy::ContinueWithDefault),
                monitor: PerformanceMonitor::new(),
            }
        }

        fn executor(&self) -> GroupExecutor<'_> {
            GroupExecutor::new(&self.registry, &self.exprs, &self.recovery, &self.monitor)
        }
    }

    fn facts(pairs: &[(&str, Value)]) -> FactContext {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn or_group_short_circuits_after_first_pass() {
        let fixture = Fixture::new(
            vec![
                rule("high-value", "#amount > 100000", Severity::Warning),
                rule("premium-customer", "#customerTier == 'PREMIUM'", Severity::Info),
                rule("urgent", "#priority == 'URGENT' || #sla == 'SAME_DAY'", Severity::Info),
            ],
            vec![group("triage", GroupOperator::Or, &["high-value", "premium-customer", "urgent"])],
        );
        let ctx = facts(&[
            ("amount", Value::Int(50)),
            ("customerTier", Value::string("PREMIUM")),
            ("priority", Value::string("NORMAL")),
        ]);
        let group = fixture.registry.group("triage").unwrap().clone();
        let result = fixture.executor().execute(&group, &ctx, None).unwrap();
        assert!(result.triggered);
        assert_eq!(result.evaluated, 2);
        assert_eq!(result.passed, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.passed_rules, vec![Arc::from("premium-customer")]);
    }

    #[test]
    fn and_group_requires_every_member() {
        let fixture = Fixture::new(
            vec![
                rule("a", "#x > 1", Severity::Info),
                rule("b", "#x > 10", Severity::Error),
            ],
            vec![group("all", GroupOperator::And, &["a", "b"])],
        );
        let group = fixture.registry.group("all").unwrap().clone();

        let result = fixture
            .executor()
            .execute(&group, &facts(&[("x", Value::Int(50))]), None)
            .unwrap();
        assert!(result.triggered);

        let result = fixture
            .executor()
            .execute(&group, &facts(&[("x", Value::Int(5))]), None)
            .unwrap();
        assert!(!result.triggered);
        // The failing member carries ERROR, which wins the election.
        assert_eq!(result.severity, Severity::Error);
    }

    #[test]
    fn empty_group_is_untriggered() {
        let fixture = Fixture::new(vec![], vec![group("empty", GroupOperator::And, &[])]);
        let group = fixture.registry.group("empty").unwrap().clone();
        let result = fixture.executor().execute(&group, &FactContext::new(), None).unwrap();
        assert!(!result.triggered);
        assert_eq!(result.evaluated, 0);
    }

    #[test]
    fn debug_mode_disables_short_circuit_and_records_decisions() {
        let fixture = Fixture::new(
            vec![
                rule("a", "true", Severity::Info),
                rule("b", "false", Severity::Info),
            ],
            vec![{
                let mut g = group("dbg", GroupOperator::Or, &["a", "b"]);
                g.debug = true;
                g
            }],
        );
        let group = fixture.registry.group("dbg").unwrap().clone();
        let result = fixture.executor().execute(&group, &FactContext::new(), None).unwrap();
        assert_eq!(result.evaluated, 2);
        assert_eq!(result.decisions.len(), 2);
        assert!(result.decisions[0].running_result);
    }

    #[test]
    fn parallel_group_evaluates_all_members() {
        let fixture = Fixture::new(
            vec![
                rule("a", "#x > 1", Severity::Info),
                rule("b", "#x > 2", Severity::Info),
                rule("c", "#x > 3", Severity::Info),
            ],
            vec![{
                let mut g = group("par", GroupOperator::And, &["a", "b", "c"]);
                g.parallel = true;
                g
            }],
        );
        let group = fixture.registry.group("par").unwrap().clone();
        let result = fixture
            .executor()
            .execute(&group, &facts(&[("x", Value::Int(10))]), None)
            .unwrap();
        assert!(result.triggered);
        assert_eq!(result.evaluated, 3);
    }

    #[test]
    fn parallel_member_error_recovers_as_untriggered() {
        let fixture = Fixture::new(
            vec![
                rule("ok", "true", Severity::Info),
                rule("broken", "#missing.deref > 1", Severity::Info),
            ],
            vec![{
                let mut g = group("par", GroupOperator::Or, &["ok", "broken"]);
                g.parallel = true;
                g
            }],
        );
        let group = fixture.registry.group("par").unwrap().clone();
        let result = fixture.executor().execute(&group, &FactContext::new(), None).unwrap();
        assert!(result.triggered);
        assert_eq!(result.evaluated, 2);
        assert_eq!(result.failed, 1);
        let errored = result.rule_results.iter().find(|r| r.rule_id.as_ref() == "broken").unwrap();
        assert!(errored.error.is_some());
    }

    #[test]
    fn nested_group_counts_as_one_member() {
        let fixture = Fixture::new(
            vec![
                rule("a", "true", Severity::Info),
                rule("b", "false", Severity::Info),
            ],
            vec![
                group("inner", GroupOperator::Or, &["a", "b"]),
                {
                    let mut outer = group("outer", GroupOperator::And, &[]);
                    outer.members = vec![RuleReference {
                        target: MemberTarget::Group(Arc::from("inner")),
                        sequence: 1,
                        enabled: true,
                        override_priority: None,
                    }];
                    outer
                },
            ],
        );
        let group = fixture.registry.group("outer").unwrap().clone();
        let result = fixture.executor().execute(&group, &FactContext::new(), None).unwrap();
        assert!(result.triggered);
        assert_eq!(result.evaluated, 1);
    }

    #[test]
    fn publish_exposes_results_to_expressions() {
        let fixture = Fixture::new(
            vec![rule("a", "true", Severity::Info)],
            vec![group("g", GroupOperator::And, &["a"])],
        );
        let group = fixture.registry.group("g").unwrap().clone();
        let mut ctx = FactContext::new();
        let result = fixture.executor().execute(&group, &ctx, None).unwrap();
        publish_group_result(&result, &mut ctx);

        let exprs = ExpressionEngine::new(system_clock());
        assert_eq!(exprs.evaluate("#ruleResults['a']", &ctx).unwrap(), Value::Bool(true));
        assert_eq!(
            exprs.evaluate("#ruleGroupResults['g']['passed']", &ctx).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            exprs.evaluate("#ruleGroupResults['g']['passedRules'].size()", &ctx).unwrap(),
            Value::Int(1)
        );
    }

    #[test]
    fn missing_variable_in_null_comparison_counts_as_failed_not_error() {
        let fixture = Fixture::new(
            vec![rule("urgent", "#priority == 'URGENT' || #sla == 'SAME_DAY'", Severity::Info)],
            vec![group("g", GroupOperator::Or, &["urgent"])],
        );
        let group = fixture.registry.group("g").unwrap().clone();
        let result = fixture
            .executor()
            .execute(&group, &facts(&[("priority", Value::string("NORMAL"))]), None)
            .unwrap();
        assert!(!result.triggered);
        assert!(result.rule_results[0].error.is_none());
    }
}
