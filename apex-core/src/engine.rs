//! Orchestration facade: evaluate facts, run scenarios, run chains

use crate::chain::{AuditSink, ChainExecutor};
use crate::clock::{system_clock, SharedClock};
use crate::config::Loader;
use crate::datasource::{AdapterRegistry, DataSourceAdapter};
use crate::error::{ApexError, Result};
use crate::expr::{AccessorRegistry, Deadline, ExpressionEngine};
use crate::group::{publish_group_result, GroupExecutor};
use crate::lookup::LookupProvider;
use crate::model::{ChainResult, GroupResult, RuleResult, Scenario, ScenarioResult};
use crate::monitor::{CacheStats, MetricsSnapshot, PerformanceMonitor};
use crate::recovery::{ErrorRecovery, RecoveryStrategy};
use crate::registry::{Registry, RegistryHandle};
use crate::types::FactContext;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument};

/// Per-call evaluation options.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvalOptions {
    /// Overall deadline in milliseconds; `None` means unbounded
    pub timeout_ms: Option<u64>,
}

impl EvalOptions {
    /// Options with a deadline.
    pub fn with_timeout_ms(timeout_ms: u64) -> Self {
        EvalOptions {
            timeout_ms: Some(timeout_ms),
        }
    }

    fn deadline(&self) -> Option<Deadline> {
        self.timeout_ms.map(Deadline::from_millis)
    }
}

/// Builder threading configuration into the engine's components.
pub struct ApexEngineBuilder {
    registry: Registry,
    clock: SharedClock,
    adapters: AdapterRegistry,
    accessors: Option<AccessorRegistry>,
    strategy: RecoveryStrategy,
    audit: Option<Box<dyn AuditSink>>,
    data_type_field: String,
}

impl ApexEngineBuilder {
    /// Override the engine clock (tests inject a fixed clock here).
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Register a data-source adapter under its logical name.
    pub fn adapter(mut self, name: impl Into<String>, adapter: Arc<dyn DataSourceAdapter>) -> Self {
        self.adapters.register(name, adapter);
        self
    }

    /// Replace the expression accessor registry.
    pub fn accessors(mut self, accessors: AccessorRegistry) -> Self {
        self.accessors = Some(accessors);
        self
    }

    /// Select the error recovery strategy.
    pub fn recovery_strategy(mut self, strategy: RecoveryStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Install an audit sink for chain stage transitions.
    pub fn audit_sink(mut self, sink: Box<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Name of the fact field carrying the payload type tag.
    pub fn data_type_field(mut self, field: impl Into<String>) -> Self {
        self.data_type_field = field.into();
        self
    }

    /// Assemble the engine.
    pub fn build(self) -> ApexEngine {
        let mut exprs = ExpressionEngine::new(self.clock.clone());
        if let Some(accessors) = self.accessors {
            exprs = exprs.with_accessors(accessors);
        }
        let adapters = Arc::new(self.adapters);
        ApexEngine {
            registry: RegistryHandle::new(self.registry),
            lookup: LookupProvider::new(adapters.clone(), self.clock.clone()),
            exprs,
            recovery: ErrorRecovery::new(self.strategy),
            monitor: PerformanceMonitor::new(),
            audit: self.audit,
            data_type_field: self.data_type_field,
            clock: self.clock,
        }
    }
}

/// The engine instance: an immutable registry snapshot plus the shared
/// evaluation components.
pub struct ApexEngine {
    registry: RegistryHandle,
    exprs: ExpressionEngine,
    lookup: LookupProvider,
    recovery: ErrorRecovery,
    monitor: PerformanceMonitor,
    audit: Option<Box<dyn AuditSink>>,
    data_type_field: String,
    clock: SharedClock,
}

impl ApexEngine {
    /// Builder over a loaded registry.
    pub fn builder(registry: Registry) -> ApexEngineBuilder {
        ApexEngineBuilder {
            registry,
            clock: system_clock(),
            adapters: AdapterRegistry::new(),
            accessors: None,
            strategy: RecoveryStrategy::default(),
            audit: None,
            data_type_field: "dataType".to_string(),
        }
    }

    /// Load configuration files and build an engine with defaults.
    pub fn from_paths<P: AsRef<Path>>(paths: &[P]) -> Result<ApexEngine> {
        let clock = system_clock();
        let registry = Loader::new(clock.clone()).load_many(paths)?;
        Ok(Self::builder(registry).clock(clock).build())
    }

    /// Atomically replace the registry; in-flight evaluations finish against
    /// the snapshot they started with.
    pub fn reload(&self, registry: Registry) {
        self.registry.replace(registry);
    }

    /// Current registry snapshot.
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.snapshot()
    }

    /// The engine clock.
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Evaluate every registered rule (ordered by priority) against the
    /// facts.
    #[instrument(skip_all)]
    pub fn evaluate_facts(&self, facts: &FactContext, options: EvalOptions) -> Result<Vec<RuleResult>> {
        let _guard = self.monitor.evaluation_guard();
        let registry = self.registry.snapshot();
        let deadline = options.deadline();
        let executor = GroupExecutor::new(&registry, &self.exprs, &self.recovery, &self.monitor);

        let mut rules: Vec<_> = registry.rules().cloned().collect();
        rules.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));

        let mut results = Vec::new();
        for rule in rules {
            if let Some((_, result)) = executor.evaluate_rule(&rule, facts, deadline)? {
                results.push(result);
            }
        }
        self.monitor.record_evaluation();
        Ok(results)
    }

    /// Execute one scenario by id.
    #[instrument(skip(self, facts, options))]
    pub fn run_scenario(
        &self,
        scenario_id: &str,
        facts: &FactContext,
        options: EvalOptions,
    ) -> Result<ScenarioResult> {
        let _guard = self.monitor.evaluation_guard();
        let registry = self.registry.snapshot();
        let scenario = registry
            .scenario(scenario_id)
            .ok_or_else(|| ApexError::UnknownId {
                entity: "scenario",
                id: scenario_id.to_string(),
            })?
            .clone();
        let mut result = ScenarioResult {
            matched_scenarios: vec![scenario.id.clone()],
            matched: true,
            rule_results: Vec::new(),
            group_results: Vec::new(),
            enriched_facts: facts.clone(),
        };
        self.run_scenario_into(&registry, &scenario, &mut result, options.deadline())?;
        self.monitor.record_evaluation();
        Ok(result)
    }

    /// Dispatch facts to every scenario declaring their data type, in
    /// declaration order. Unknown types return a well-defined unmatched
    /// result.
    #[instrument(skip_all)]
    pub fn dispatch_scenarios(&self, facts: &FactContext, options: EvalOptions) -> Result<ScenarioResult> {
        let _guard = self.monitor.evaluation_guard();
        let registry = self.registry.snapshot();
        let data_type = facts
            .get(&self.data_type_field)
            .and_then(|v| v.as_str().map(str::to_string));
        let Some(data_type) = data_type else {
            info!("no data type tag on input facts");
            return Ok(ScenarioResult::unmatched(facts.clone()));
        };

        let matching: Vec<Arc<Scenario>> = registry
            .scenarios_in_order()
            .filter(|s| s.handles(&data_type))
            .cloned()
            .collect();
        if matching.is_empty() {
            info!(%data_type, "no scenario declares this data type");
            return Ok(ScenarioResult::unmatched(facts.clone()));
        }

        let mut result = ScenarioResult {
            matched_scenarios: matching.iter().map(|s| s.id.clone()).collect(),
            matched: true,
            rule_results: Vec::new(),
            group_results: Vec::new(),
            enriched_facts: facts.clone(),
        };
        for scenario in &matching {
            self.run_scenario_into(&registry, scenario, &mut result, options.deadline())?;
        }
        self.monitor.record_evaluation();
        Ok(result)
    }

    fn run_scenario_into(
        &self,
        registry: &Registry,
        scenario: &Scenario,
        result: &mut ScenarioResult,
        deadline: Option<Deadline>,
    ) -> Result<()> {
        // Enrichments first, then rules and groups over the enriched facts.
        let enrichments: Vec<_> = scenario
            .enrichment_ids
            .iter()
            .filter_map(|id| registry.enrichment(id))
            .cloned()
            .collect();
        if !enrichments.is_empty() {
            let enricher = crate::enrichment::EnrichmentEngine::new(
                &self.exprs,
                &self.lookup,
                &self.recovery,
                &self.monitor,
            );
            result.enriched_facts = enricher.apply(&enrichments, &result.enriched_facts, deadline)?;
        }

        let executor = GroupExecutor::new(registry, &self.exprs, &self.recovery, &self.monitor);
        for rule_id in &scenario.rule_ids {
            if let Some(rule) = registry.rule(rule_id) {
                if let Some((_, rule_result)) =
                    executor.evaluate_rule(rule, &result.enriched_facts, deadline)?
                {
                    result.rule_results.push(rule_result);
                }
            }
        }
        for group_id in &scenario.group_ids {
            if let Some(group) = registry.group(group_id) {
                let group_result = executor.execute(group, &result.enriched_facts, deadline)?;
                publish_group_result(&group_result, &mut result.enriched_facts);
                result.group_results.push(group_result);
            }
        }
        Ok(())
    }

    /// Execute a rule group by id.
    pub fn run_group(&self, group_id: &str, facts: &FactContext, options: EvalOptions) -> Result<GroupResult> {
        let _guard = self.monitor.evaluation_guard();
        let registry = self.registry.snapshot();
        let group = registry.group(group_id).ok_or_else(|| ApexError::UnknownId {
            entity: "rule-group",
            id: group_id.to_string(),
        })?;
        let executor = GroupExecutor::new(&registry, &self.exprs, &self.recovery, &self.monitor);
        let result = executor.execute(group, facts, options.deadline())?;
        self.monitor.record_evaluation();
        Ok(result)
    }

    /// Execute a rule chain by id.
    #[instrument(skip(self, facts, options))]
    pub fn run_chain(&self, chain_id: &str, facts: &FactContext, options: EvalOptions) -> Result<ChainResult> {
        let _guard = self.monitor.evaluation_guard();
        let registry = self.registry.snapshot();
        let chain = registry.chain(chain_id).ok_or_else(|| ApexError::UnknownId {
            entity: "rule-chain",
            id: chain_id.to_string(),
        })?;
        let executor = ChainExecutor::new(&registry, &self.exprs, &self.recovery, &self.monitor)
            .with_audit(self.audit.as_deref());
        let result = executor.execute(chain, facts, options.deadline())?;
        self.monitor.record_evaluation();
        Ok(result)
    }

    /// Apply a list of registered enrichments by id.
    pub fn enrich(
        &self,
        enrichment_ids: &[&str],
        facts: &FactContext,
        options: EvalOptions,
    ) -> Result<FactContext> {
        let registry = self.registry.snapshot();
        let mut enrichments = Vec::new();
        for id in enrichment_ids {
            let enrichment = registry.enrichment(id).ok_or_else(|| ApexError::UnknownId {
                entity: "enrichment",
                id: id.to_string(),
            })?;
            enrichments.push(enrichment.clone());
        }
        let enricher = crate::enrichment::EnrichmentEngine::new(
            &self.exprs,
            &self.lookup,
            &self.recovery,
            &self.monitor,
        );
        enricher.apply(&enrichments, facts, options.deadline())
    }

    /// Immutable metrics snapshot.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.monitor.snapshot(CacheStats {
            hits: self.lookup.cache_hits(),
            misses: self.lookup.cache_misses(),
        })
    }
}
