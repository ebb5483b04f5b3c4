//! Enrichment engine: lookup, field, calculation, and conditional-mapping
//! operations over a fact map

use crate::datasource::Row;
use crate::error::{ApexError, Result};
use crate::expr::{Deadline, ExpressionEngine, TypeHint};
use crate::lookup::LookupProvider;
use crate::model::{
    ConditionalMappingSpec, Enrichment, EnrichmentKind, FieldMapping, GroupOperator, LookupSpec,
    SourceField,
};
use crate::monitor::PerformanceMonitor;
use crate::recovery::{build_error_context, ErrorRecovery, RecoveryStrategy};
use crate::types::{FactContext, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Applies ordered enrichments to a fact map, producing an enriched copy.
pub struct EnrichmentEngine<'a> {
    exprs: &'a ExpressionEngine,
    lookup: &'a LookupProvider,
    recovery: &'a ErrorRecovery,
    monitor: &'a PerformanceMonitor,
}

impl<'a> EnrichmentEngine<'a> {
    /// Engine over the given collaborators.
    pub fn new(
        exprs: &'a ExpressionEngine,
        lookup: &'a LookupProvider,
        recovery: &'a ErrorRecovery,
        monitor: &'a PerformanceMonitor,
    ) -> Self {
        EnrichmentEngine {
            exprs,
            lookup,
            recovery,
            monitor,
        }
    }

    /// Apply enrichments in order, honoring conditions and `depends-on`.
    ///
    /// The input map is never mutated; all writes land on the returned copy.
    /// Enrichments whose dependencies have not yet run are deferred for a
    /// later pass; dependencies still unmet once no pass makes progress are
    /// dependency failures.
    #[instrument(skip_all, fields(enrichments = enrichments.len()))]
    pub fn apply(
        &self,
        enrichments: &[Arc<Enrichment>],
        facts: &FactContext,
        deadline: Option<Deadline>,
    ) -> Result<FactContext> {
        let mut working = facts.clone();
        let mut done: HashSet<Arc<str>> = HashSet::new();
        let mut remaining: Vec<Arc<Enrichment>> = enrichments
            .iter()
            .filter(|e| {
                if !e.enabled {
                    debug!(enrichment = %e.id, "skipping disabled enrichment");
                }
                e.enabled
            })
            .cloned()
            .collect();

        while !remaining.is_empty() {
            let mut deferred = Vec::new();
            let mut progressed = false;
            for enrichment in remaining {
                if !enrichment.depends_on.iter().all(|d| done.contains(d)) {
                    deferred.push(enrichment);
                    continue;
                }
                progressed = true;
                match self.apply_one(&enrichment, &mut working, deadline) {
                    Ok(applied) => {
                        if applied {
                            done.insert(enrichment.id.clone());
                        }
                    }
                    Err(error) => self.handle_failure(&enrichment, &working, error)?,
                }
            }
            if !progressed {
                for enrichment in &deferred {
                    let error = ApexError::Dependency(format!(
                        "enrichment '{}' has unmet dependencies",
                        enrichment.id
                    ));
                    self.handle_failure(enrichment, &working, error)?;
                }
                break;
            }
            remaining = deferred;
        }

        Ok(working)
    }

    /// Route an enrichment failure through the recovery policy: fail fast
    /// surfaces it, every other strategy skips with a warning.
    fn handle_failure(
        &self,
        enrichment: &Enrichment,
        facts: &FactContext,
        error: ApexError,
    ) -> Result<()> {
        if self.recovery.strategy() == RecoveryStrategy::FailFast {
            return Err(error);
        }
        let context = build_error_context(&error, Some(&enrichment.id), None, facts);
        self.monitor.record_rule_error(&enrichment.id, &context.kind);
        warn!(enrichment = %enrichment.id, kind = %context.kind, "enrichment skipped after failure");
        Ok(())
    }

    /// Returns whether the enrichment actually ran (conditions may skip it).
    fn apply_one(
        &self,
        enrichment: &Enrichment,
        working: &mut FactContext,
        deadline: Option<Deadline>,
    ) -> Result<bool> {
        if let Some(condition) = &enrichment.condition {
            if !self.exprs.evaluate_bool(condition, working, deadline)? {
                debug!(enrichment = %enrichment.id, "condition not met, skipping");
                return Ok(false);
            }
        }
        match &enrichment.kind {
            EnrichmentKind::Lookup(spec) => self.apply_lookup(&enrichment.id, spec, working, deadline)?,
            EnrichmentKind::Field(spec) => {
                for mapping in &spec.field_mappings {
                    let value = self.resolve_source(mapping, &Row::new(), working, deadline)?;
                    let value = self.transform(mapping, value, working, deadline)?;
                    working.insert(mapping.target_field.clone(), value);
                }
            }
            EnrichmentKind::Calculation(spec) => {
                let value = self
                    .exprs
                    .evaluate_hinted(&spec.expression, working, TypeHint::Any, deadline)?;
                working.insert(spec.result_field.clone(), value);
            }
            EnrichmentKind::ConditionalMapping(spec) => {
                self.apply_conditional_mapping(spec, working, deadline)?;
            }
        }
        Ok(true)
    }

    fn apply_lookup(
        &self,
        enrichment_id: &Arc<str>,
        spec: &LookupSpec,
        working: &mut FactContext,
        deadline: Option<Deadline>,
    ) -> Result<()> {
        let key = self
            .exprs
            .evaluate_hinted(&spec.lookup_key, working, TypeHint::Any, deadline)?;
        let row = if key.is_null() {
            None
        } else {
            self.lookup.resolve(enrichment_id, spec, &key)?
        };

        // Defaults fill null or missing row fields before mapping; with no
        // row at all they form the row by themselves.
        let mut effective: Row = row.clone().unwrap_or_default();
        for (field, default) in &spec.default_values {
            let missing = effective.get(field).map(Value::is_null).unwrap_or(true);
            if missing {
                effective.insert(field.clone(), default.clone());
            }
        }
        if row.is_none() && spec.default_values.is_empty() {
            debug!(enrichment = %enrichment_id, key = %key.render(), "no row and no defaults");
            return Ok(());
        }

        for mapping in &spec.field_mappings {
            let value = self.resolve_source(mapping, &effective, working, deadline)?;
            let value = self.transform(mapping, value, working, deadline)?;
            working.insert(mapping.target_field.clone(), value);
        }
        Ok(())
    }

    /// A `#`-prefixed source is an expression over the facts with the row's
    /// fields overlaid; a plain name reads the row first, then the facts.
    fn resolve_source(
        &self,
        mapping: &FieldMapping,
        row: &Row,
        working: &FactContext,
        deadline: Option<Deadline>,
    ) -> Result<Value> {
        match &mapping.source {
            SourceField::Name(name) => Ok(row
                .get(name)
                .or_else(|| working.get(name))
                .cloned()
                .unwrap_or(Value::Null)),
            SourceField::Expression(expression) => {
                let mut scope = working.clone();
                for (field, value) in row {
                    scope.insert(field.clone(), value.clone());
                }
                self.exprs.evaluate_hinted(expression, &scope, TypeHint::Any, deadline)
            }
        }
    }

    /// Apply the optional transformation with `#value` bound.
    fn transform(
        &self,
        mapping: &FieldMapping,
        value: Value,
        working: &FactContext,
        deadline: Option<Deadline>,
    ) -> Result<Value> {
        match &mapping.transformation {
            None => Ok(value),
            Some(transformation) => {
                let mut scope = working.clone();
                scope.insert("value".to_string(), value);
                self.exprs.evaluate_hinted(transformation, &scope, TypeHint::Any, deadline)
            }
        }
    }

    fn apply_conditional_mapping(
        &self,
        spec: &ConditionalMappingSpec,
        working: &mut FactContext,
        deadline: Option<Deadline>,
    ) -> Result<()> {
        // Rules arrive sorted by ascending priority from the loader; sort a
        // view anyway so hand-built specs behave identically.
        let mut rules: Vec<_> = spec.mapping_rules.iter().collect();
        rules.sort_by_key(|r| r.priority);

        for rule in rules {
            let matched = match rule.conditions.operator {
                GroupOperator::And => {
                    let mut all = true;
                    for condition in &rule.conditions.conditions {
                        if !self.exprs.evaluate_bool(condition, working, deadline)? {
                            all = false;
                            break;
                        }
                    }
                    all
                }
                GroupOperator::Or => {
                    let mut any = false;
                    for condition in &rule.conditions.conditions {
                        if self.exprs.evaluate_bool(condition, working, deadline)? {
                            any = true;
                            break;
                        }
                    }
                    any
                }
            };
            if !matched {
                continue;
            }
            let value = self
                .exprs
                .evaluate_hinted(&rule.transformation, working, TypeHint::Any, deadline)?;
            working.insert(spec.target_field.clone(), value);
            if spec.log_matched_rule {
                info!(rule = %rule.id, target = %spec.target_field, "conditional mapping matched");
            }
            if spec.stop_on_first_match {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;
    use crate::datasource::AdapterRegistry;
    use crate::model::{
        CalculationSpec, ConditionSet, Dataset, DatasetRef, FieldSpec, MappingRule, RuleMetadata,
    };
    use chrono::Utc;
    use std::collections::BTreeMap;

    struct Fixture {
        exprs: ExpressionEngine,
        lookup: LookupProvider,
        recovery: ErrorRecovery,
        monitor: PerformanceMonitor,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                exprs: ExpressionEngine::new(system_clock()),
                lookup: LookupProvider::new(Arc::new(AdapterRegistry::new()), system_clock()),
                recovery: ErrorRecovery::new(RecoveryStrategy::ContinueWithDefault),
                monitor: PerformanceMonitor::new(),
            }
        }

        fn engine(&self) -> EnrichmentEngine<'_> {
            EnrichmentEngine::new(&self.exprs, &self.lookup, &self.recovery, &self.monitor)
        }
    }

    fn enrichment(id: &str, kind: EnrichmentKind) -> Arc<Enrichment> {
        Arc::new(Enrichment {
            id: Arc::from(id),
            kind,
            condition: None,
            enabled: true,
            depends_on: Vec::new(),
            metadata: RuleMetadata::stamped(Utc::now()),
        })
    }

    fn calculation(id: &str, expression: &str, result_field: &str) -> Arc<Enrichment> {
        enrichment(
            id,
            EnrichmentKind::Calculation(CalculationSpec {
                expression: expression.to_string(),
                result_field: result_field.to_string(),
            }),
        )
    }

    fn facts(pairs: &[(&str, Value)]) -> FactContext {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn ternary_risk_classification() {
        let fixture = Fixture::new();
        let risk = calculation(
            "risk-level",
            "#amount>1000000?'CRITICAL':#amount>100000?'HIGH':#amount>10000?'MEDIUM':#amount>1000?'LOW':'MINIMAL'",
            "riskLevel",
        );
        for (amount, expected) in [(50_000, "MEDIUM"), (1_000, "MINIMAL"), (1_000_001, "CRITICAL")] {
            let input = facts(&[("amount", Value::Int(amount))]);
            let enriched = fixture.engine().apply(&[risk.clone()], &input, None).unwrap();
            assert_eq!(enriched.get("riskLevel"), Some(&Value::string(expected)), "amount {amount}");
            assert!(!input.contains_key("riskLevel"), "input must stay unmodified");
        }
    }

    #[test]
    fn lookup_applies_mappings_and_defaults() {
        let fixture = Fixture::new();
        let mut row = BTreeMap::new();
        row.insert("code".to_string(), Value::string("P1"));
        row.insert("productName".to_string(), Value::string("widget"));
        let spec = LookupSpec {
            lookup_key: "#productCode".to_string(),
            dataset: DatasetRef::Inline(Dataset {
                rows: vec![row],
                key_field: "code".to_string(),
            }),
            cache_enabled: false,
            cache_ttl_seconds: 0,
            default_values: {
                let mut defaults = BTreeMap::new();
                defaults.insert("productName".to_string(), Value::string("UNKNOWN"));
                defaults
            },
            field_mappings: vec![FieldMapping {
                source: SourceField::Name("productName".to_string()),
                target_field: "productName".to_string(),
                transformation: Some("#value.toUpperCase()".to_string()),
            }],
        };
        let lookup = enrichment("product-lookup", EnrichmentKind::Lookup(spec));

        let enriched = fixture
            .engine()
            .apply(&[lookup.clone()], &facts(&[("productCode", Value::string("P1"))]), None)
            .unwrap();
        assert_eq!(enriched.get("productName"), Some(&Value::string("WIDGET")));

        // Missing row falls back to defaults, still transformed.
        let enriched = fixture
            .engine()
            .apply(&[lookup], &facts(&[("productCode", Value::string("P9"))]), None)
            .unwrap();
        assert_eq!(enriched.get("productName"), Some(&Value::string("UNKNOWN")));
    }

    #[test]
    fn field_enrichment_with_expression_source() {
        let fixture = Fixture::new();
        let field = enrichment(
            "normalize",
            EnrichmentKind::Field(FieldSpec {
                field_mappings: vec![FieldMapping {
                    source: SourceField::Expression("#firstName + ' ' + #lastName".to_string()),
                    target_field: "fullName".to_string(),
                    transformation: None,
                }],
            }),
        );
        let enriched = fixture
            .engine()
            .apply(
                &[field],
                &facts(&[("firstName", Value::string("Ada")), ("lastName", Value::string("Lovelace"))]),
                None,
            )
            .unwrap();
        assert_eq!(enriched.get("fullName"), Some(&Value::string("Ada Lovelace")));
    }

    #[test]
    fn depends_on_orders_execution() {
        let fixture = Fixture::new();
        // Declared out of order: 'derived' depends on 'base'.
        let mut derived = calculation("derived", "#base * 2", "double");
        Arc::get_mut(&mut derived).unwrap().depends_on = vec![Arc::from("base")];
        let base = calculation("base", "#amount + 1", "base");

        let enriched = fixture
            .engine()
            .apply(&[derived, base], &facts(&[("amount", Value::Int(10))]), None)
            .unwrap();
        assert_eq!(enriched.get("base"), Some(&Value::Int(11)));
        assert_eq!(enriched.get("double"), Some(&Value::Int(22)));
    }

    #[test]
    fn unmet_dependency_fails_fast_when_configured() {
        let mut fixture = Fixture::new();
        fixture.recovery = ErrorRecovery::new(RecoveryStrategy::FailFast);
        let mut orphan = calculation("orphan", "1", "x");
        Arc::get_mut(&mut orphan).unwrap().depends_on = vec![Arc::from("ghost")];
        let err = fixture.engine().apply(&[orphan], &FactContext::new(), None).unwrap_err();
        assert!(matches!(err, ApexError::Dependency(_)));
    }

    #[test]
    fn unmet_dependency_skips_by_default() {
        let fixture = Fixture::new();
        let mut orphan = calculation("orphan", "1", "x");
        Arc::get_mut(&mut orphan).unwrap().depends_on = vec![Arc::from("ghost")];
        let enriched = fixture.engine().apply(&[orphan], &FactContext::new(), None).unwrap();
        assert!(!enriched.contains_key("x"));
    }

    #[test]
    fn conditional_mapping_priority_and_stop_on_first_match() {
        let fixture = Fixture::new();
        let rule = |id: &str, priority: i32, condition: &str, queue: &str| MappingRule {
            id: Arc::from(id),
            priority,
            conditions: ConditionSet {
                operator: GroupOperator::And,
                conditions: vec![condition.to_string()],
            },
            transformation: format!("'{queue}'"),
        };
        let spec = ConditionalMappingSpec {
            target_field: "processingQueue".to_string(),
            mapping_rules: vec![
                rule("edd-required", 3, "#riskScore > 50", "edd-queue"),
                rule("executive-review", 2, "#amount > 1000000", "executive-queue"),
                rule("sanctions-hit", 1, "#sanctionsMatch == true", "sanctions-queue"),
            ],
            stop_on_first_match: true,
            log_matched_rule: true,
        };
        let mapping = enrichment("routing", EnrichmentKind::ConditionalMapping(spec));

        // Both executive-review (priority 2) and edd-required (priority 3)
        // match; only the lower priority may write.
        let enriched = fixture
            .engine()
            .apply(
                &[mapping],
                &facts(&[
                    ("riskScore", Value::Int(80)),
                    ("amount", Value::Int(2_000_000)),
                    ("sanctionsMatch", Value::Bool(false)),
                ]),
                None,
            )
            .unwrap();
        assert_eq!(enriched.get("processingQueue"), Some(&Value::string("executive-queue")));
    }

    #[test]
    fn conditional_mapping_without_stop_lets_later_matches_overwrite() {
        let fixture = Fixture::new();
        let spec = ConditionalMappingSpec {
            target_field: "tier".to_string(),
            mapping_rules: vec![
                MappingRule {
                    id: Arc::from("first"),
                    priority: 1,
                    conditions: ConditionSet {
                        operator: GroupOperator::And,
                        conditions: vec!["true".to_string()],
                    },
                    transformation: "'A'".to_string(),
                },
                MappingRule {
                    id: Arc::from("second"),
                    priority: 2,
                    conditions: ConditionSet {
                        operator: GroupOperator::Or,
                        conditions: vec!["false".to_string(), "true".to_string()],
                    },
                    transformation: "'B'".to_string(),
                },
            ],
            stop_on_first_match: false,
            log_matched_rule: false,
        };
        let mapping = enrichment("tiering", EnrichmentKind::ConditionalMapping(spec));
        let enriched = fixture.engine().apply(&[mapping], &FactContext::new(), None).unwrap();
        assert_eq!(enriched.get("tier"), Some(&Value::string("B")));
    }

    #[test]
    fn failing_enrichment_is_skipped_and_processing_continues() {
        let fixture = Fixture::new();
        let broken = calculation("broken", "#missing.deref", "x");
        let fine = calculation("fine", "2 + 2", "four");
        let enriched = fixture
            .engine()
            .apply(&[broken, fine], &FactContext::new(), None)
            .unwrap();
        assert!(!enriched.contains_key("x"));
        assert_eq!(enriched.get("four"), Some(&Value::Int(4)));
    }

    #[test]
    fn applying_twice_is_idempotent() {
        let fixture = Fixture::new();
        let risk = calculation("risk", "#amount > 1000 ? 'HIGH' : 'LOW'", "riskLevel");
        let input = facts(&[("amount", Value::Int(5_000))]);
        let once = fixture.engine().apply(&[risk.clone()], &input, None).unwrap();
        let twice = fixture.engine().apply(&[risk], &once, None).unwrap();
        assert_eq!(once, twice);
    }
}
