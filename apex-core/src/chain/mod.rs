//! Rule chain execution: the six declarative patterns

mod accumulative;
mod conditional;
pub mod context;
mod fluent;
mod routing;
mod sequential;
mod workflow;

pub use context::ChainedEvaluationContext;

use crate::error::Result;
use crate::expr::{Deadline, ExpressionEngine, TypeHint};
use crate::model::{ChainResult, ChainRule, ChainSpec, RuleChain};
use crate::monitor::PerformanceMonitor;
use crate::recovery::{ErrorRecovery, RuleRecovery};
use crate::registry::Registry;
use crate::types::{FactContext, Value};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// One audit record emitted on a stage transition.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AuditEvent {
    /// Chain the event belongs to
    pub chain_id: Arc<str>,
    /// Stage or rule id
    pub stage: String,
    /// Engine-clock timestamp
    pub timestamp: DateTime<Utc>,
    /// What happened
    pub detail: String,
}

/// Caller-supplied sink for audit records.
pub trait AuditSink: Send + Sync {
    /// Receive one event.
    fn record(&self, event: AuditEvent);
}

/// Executes rule chains over a chained evaluation context.
pub struct ChainExecutor<'a> {
    registry: &'a Registry,
    exprs: &'a ExpressionEngine,
    recovery: &'a ErrorRecovery,
    monitor: &'a PerformanceMonitor,
    audit: Option<&'a dyn AuditSink>,
}

impl<'a> ChainExecutor<'a> {
    /// Executor over the given collaborators.
    pub fn new(
        registry: &'a Registry,
        exprs: &'a ExpressionEngine,
        recovery: &'a ErrorRecovery,
        monitor: &'a PerformanceMonitor,
    ) -> Self {
        ChainExecutor {
            registry,
            exprs,
            recovery,
            monitor,
            audit: None,
        }
    }

    /// Attach an audit sink; stage transitions are reported through it.
    pub fn with_audit(mut self, audit: Option<&'a dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// The registry chains may resolve ids against.
    pub fn registry(&self) -> &Registry {
        self.registry
    }

    /// Execute a chain against a snapshot of the input facts.
    #[instrument(skip(self, facts, deadline), fields(chain_id = %chain.id, pattern = chain.spec.pattern_name()))]
    pub fn execute(
        &self,
        chain: &RuleChain,
        facts: &FactContext,
        deadline: Option<Deadline>,
    ) -> Result<ChainResult> {
        let context = ChainedEvaluationContext::new(facts.clone());
        self.audit(&chain.id, "chain", "started");
        let result = match &chain.spec {
            ChainSpec::Conditional {
                trigger,
                on_trigger,
                on_no_trigger,
            } => conditional::execute(self, chain, trigger, on_trigger, on_no_trigger, context, deadline),
            ChainSpec::Sequential { stages } => {
                sequential::execute(self, chain, stages, context, deadline)
            }
            ChainSpec::Routing {
                router,
                routes,
                default_route,
            } => routing::execute(self, chain, router, routes, default_route.as_deref(), context, deadline),
            ChainSpec::Accumulative {
                accumulator_variable,
                initial_value,
                rules,
                selection,
                final_decision_rule,
            } => accumulative::execute(
                self,
                chain,
                accumulator_variable,
                initial_value,
                rules,
                selection,
                final_decision_rule,
                context,
                deadline,
            ),
            ChainSpec::ComplexWorkflow { stages } => {
                workflow::execute(self, chain, stages, context, deadline)
            }
            ChainSpec::FluentBuilder { root, max_depth } => {
                fluent::execute(self, chain, root, *max_depth, context, deadline)
            }
        };
        match &result {
            Ok(chain_result) => self.audit(
                &chain.id,
                "chain",
                if chain_result.success { "completed" } else { "failed" },
            ),
            Err(_) => self.audit(&chain.id, "chain", "errored"),
        }
        result
    }

    /// Evaluate an embedded rule's condition to a boolean, routing failures
    /// to the recovery layer. Returns the decision and a recovered error
    /// description when one occurred.
    pub(crate) fn eval_rule_bool(
        &self,
        rule: &ChainRule,
        facts: &FactContext,
        deadline: Option<Deadline>,
    ) -> Result<(bool, Option<String>)> {
        let start = Instant::now();
        match self.exprs.evaluate_bool(&rule.condition, facts, deadline) {
            Ok(triggered) => {
                self.monitor.record_rule(&rule.id, triggered, start.elapsed());
                Ok((triggered, None))
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
                        self.monitor.record_rule(&rule.id, triggered, start.elapsed());
                        Ok((triggered, None))
                    }
                    RuleRecovery::Untriggered(context) | RuleRecovery::Skipped(context) => {
                        self.monitor.record_rule_error(&rule.id, &context.kind);
                        Ok((false, Some(context.message)))
                    }
                }
            }
        }
    }

    /// Evaluate an expression to its raw value.
    pub(crate) fn eval_value(
        &self,
        source: &str,
        facts: &FactContext,
        deadline: Option<Deadline>,
    ) -> Result<Value> {
        self.exprs.evaluate_hinted(source, facts, TypeHint::Any, deadline)
    }

    /// The shared expression engine.
    pub(crate) fn exprs(&self) -> &ExpressionEngine {
        self.exprs
    }

    /// Emit an audit event when a sink is installed.
    pub(crate) fn audit(&self, chain_id: &Arc<str>, stage: &str, detail: &str) {
        if let Some(sink) = self.audit {
            sink.record(AuditEvent {
                chain_id: chain_id.clone(),
                stage: stage.to_string(),
                timestamp: self.exprs.clock().now(),
                detail: detail.to_string(),
            });
        }
    }
}
