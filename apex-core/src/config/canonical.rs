//! Canonical serialization of a merged registry
//!
//! Emits one rule-config document containing every registered entity in
//! sorted-by-id order. Reparsing the output yields an isomorphic registry,
//! which is the round-trip property the loader tests rely on.

use crate::error::Result;
use crate::model::{
    ChainSpec, DatasetRef, Enrichment, EnrichmentKind, FieldMapping, FluentNode, GroupOperator,
    MemberTarget, Rule, RuleChain, RuleGroup, RuleMetadata, RulePriority, RuleSelection, Severity,
    SourceField, StageExecution,
};
use crate::registry::Registry;
use crate::types::Value;
use rust_decimal::prelude::ToPrimitive;
use serde_yaml::{Mapping, Value as Yaml};

/// Serialize the registry to canonical YAML.
pub fn to_canonical_yaml(registry: &Registry) -> Result<String> {
    let mut root = Mapping::new();
    root.insert(yaml("metadata"), metadata_section());

    let mut rules: Vec<_> = registry.rules().collect();
    rules.sort_by(|a, b| a.id.cmp(&b.id));
    if !rules.is_empty() {
        root.insert(yaml("rules"), Yaml::Sequence(rules.iter().map(|r| rule_node(r)).collect()));
    }

    let mut groups: Vec<_> = registry.groups().collect();
    groups.sort_by(|a, b| a.id.cmp(&b.id));
    if !groups.is_empty() {
        root.insert(
            yaml("rule-groups"),
            Yaml::Sequence(groups.iter().map(|g| group_node(g)).collect()),
        );
    }

    let mut enrichments: Vec<_> = registry.enrichments().collect();
    enrichments.sort_by(|a, b| a.id.cmp(&b.id));
    if !enrichments.is_empty() {
        root.insert(
            yaml("enrichments"),
            Yaml::Sequence(enrichments.iter().map(|e| enrichment_node(e)).collect()),
        );
    }

    let mut chains: Vec<_> = registry.chains().collect();
    chains.sort_by(|a, b| a.id.cmp(&b.id));
    if !chains.is_empty() {
        root.insert(
            yaml("rule-chains"),
            Yaml::Sequence(chains.iter().map(|c| chain_node(c)).collect()),
        );
    }

    let scenarios: Vec<_> = registry.scenarios_in_order().collect();
    if !scenarios.is_empty() {
        let nodes = scenarios
            .iter()
            .map(|s| {
                let mut node = Mapping::new();
                node.insert(yaml("id"), yaml(&s.id));
                if !s.business_domain.is_empty() {
                    node.insert(yaml("business-domain"), yaml(&s.business_domain));
                }
                node.insert(yaml("data-types"), string_seq(s.data_types.iter()));
                if !s.rule_ids.is_empty() {
                    node.insert(yaml("rule-ids"), string_seq(s.rule_ids.iter()));
                }
                if !s.group_ids.is_empty() {
                    node.insert(yaml("rule-group-ids"), string_seq(s.group_ids.iter()));
                }
                if !s.enrichment_ids.is_empty() {
                    node.insert(yaml("enrichment-ids"), string_seq(s.enrichment_ids.iter()));
                }
                Yaml::Mapping(node)
            })
            .collect();
        root.insert(yaml("scenarios"), Yaml::Sequence(nodes));
    }

    let mut datasets: Vec<_> = registry.datasets().collect();
    datasets.sort_by(|a, b| a.0.cmp(b.0));
    if !datasets.is_empty() {
        let nodes = datasets
            .iter()
            .map(|(id, dataset)| {
                let mut node = Mapping::new();
                node.insert(yaml("id"), yaml(id));
                node.insert(yaml("key-field"), yaml(&dataset.key_field));
                node.insert(
                    yaml("data"),
                    Yaml::Sequence(dataset.rows.iter().map(row_node).collect()),
                );
                Yaml::Mapping(node)
            })
            .collect();
        root.insert(yaml("datasets"), Yaml::Sequence(nodes));
    }

    let mut sources: Vec<_> = registry.data_sources().collect();
    sources.sort_by(|a, b| a.name.cmp(&b.name));
    if !sources.is_empty() {
        let nodes = sources
            .iter()
            .map(|source| {
                let mut node = Mapping::new();
                node.insert(yaml("name"), yaml(&source.name));
                node.insert(yaml("config-file"), yaml(&source.config_file));
                Yaml::Mapping(node)
            })
            .collect();
        root.insert(yaml("data-sources"), Yaml::Sequence(nodes));
    }

    Ok(serde_yaml::to_string(&Yaml::Mapping(root))?)
}

fn metadata_section() -> Yaml {
    let mut metadata = Mapping::new();
    metadata.insert(yaml("name"), yaml("canonical-registry"));
    metadata.insert(yaml("version"), yaml("1.0.0"));
    metadata.insert(yaml("type"), yaml("rule-config"));
    Yaml::Mapping(metadata)
}

fn yaml(s: &str) -> Yaml {
    Yaml::String(s.to_string())
}

fn string_seq<'a, S, I>(items: I) -> Yaml
where
    S: AsRef<str> + 'a,
    I: Iterator<Item = &'a S>,
{
    Yaml::Sequence(items.map(|item| yaml(item.as_ref())).collect())
}

fn value_node(value: &Value) -> Yaml {
    match value {
        Value::Null => Yaml::Null,
        Value::Bool(b) => Yaml::Bool(*b),
        Value::Int(i) => Yaml::Number((*i).into()),
        Value::Decimal(d) => Yaml::Number(serde_yaml::Number::from(d.to_f64().unwrap_or_default())),
        Value::String(s) => yaml(s),
        Value::List(items) => Yaml::Sequence(items.iter().map(value_node).collect()),
        Value::Map(map) => {
            let mut node = Mapping::new();
            for (k, v) in map.iter() {
                node.insert(yaml(k), value_node(v));
            }
            Yaml::Mapping(node)
        }
        Value::DateTime(dt) => yaml(&dt.to_rfc3339()),
        Value::Duration(d) => Yaml::Number(d.num_milliseconds().into()),
    }
}

fn row_node(row: &std::collections::BTreeMap<String, Value>) -> Yaml {
    let mut node = Mapping::new();
    for (k, v) in row {
        node.insert(yaml(k), value_node(v));
    }
    Yaml::Mapping(node)
}

fn severity_name(severity: Severity) -> &'static str {
    match severity {
        Severity::Error => "ERROR",
        Severity::Warning => "WARNING",
        Severity::Info => "INFO",
    }
}

fn metadata_node(metadata: &RuleMetadata) -> Yaml {
    let mut node = Mapping::new();
    if let Some(owner) = &metadata.owner {
        node.insert(yaml("owner"), yaml(owner));
    }
    if let Some(domain) = &metadata.domain {
        node.insert(yaml("domain"), yaml(domain));
    }
    if !metadata.tags.is_empty() {
        node.insert(yaml("tags"), string_seq(metadata.tags.iter()));
    }
    if let Some(effective) = &metadata.effective_date {
        node.insert(yaml("effective-date"), yaml(&effective.to_rfc3339()));
    }
    if let Some(expiration) = &metadata.expiration_date {
        node.insert(yaml("expiration-date"), yaml(&expiration.to_rfc3339()));
    }
    node.insert(yaml("created-at"), yaml(&metadata.created_at.to_rfc3339()));
    node.insert(yaml("modified-at"), yaml(&metadata.modified_at.to_rfc3339()));
    Yaml::Mapping(node)
}

fn rule_node(rule: &Rule) -> Yaml {
    let mut node = Mapping::new();
    node.insert(yaml("id"), yaml(&rule.id));
    node.insert(yaml("name"), yaml(&rule.name));
    node.insert(yaml("condition"), yaml(&rule.condition));
    if !rule.message.is_empty() {
        node.insert(yaml("message"), yaml(&rule.message));
    }
    node.insert(yaml("severity"), yaml(severity_name(rule.severity)));
    node.insert(yaml("priority"), Yaml::Number(rule.priority.into()));
    if !rule.categories.is_empty() {
        node.insert(yaml("categories"), string_seq(rule.categories.iter()));
    }
    if !rule.depends_on.is_empty() {
        node.insert(yaml("depends-on"), string_seq(rule.depends_on.iter()));
    }
    node.insert(yaml("metadata"), metadata_node(&rule.metadata));
    Yaml::Mapping(node)
}

fn group_node(group: &RuleGroup) -> Yaml {
    let mut node = Mapping::new();
    node.insert(yaml("id"), yaml(&group.id));
    node.insert(yaml("name"), yaml(&group.name));
    node.insert(
        yaml("operator"),
        yaml(match group.operator {
            GroupOperator::And => "AND",
            GroupOperator::Or => "OR",
        }),
    );
    node.insert(yaml("priority"), Yaml::Number(group.priority.into()));
    if !group.categories.is_empty() {
        node.insert(yaml("categories"), string_seq(group.categories.iter()));
    }
    let references = group
        .members
        .iter()
        .map(|member| {
            let mut reference = Mapping::new();
            match &member.target {
                MemberTarget::Rule(id) => reference.insert(yaml("rule-id"), yaml(id)),
                MemberTarget::Group(id) => reference.insert(yaml("rule-group-id"), yaml(id)),
            };
            reference.insert(yaml("sequence"), Yaml::Number(member.sequence.into()));
            reference.insert(yaml("enabled"), Yaml::Bool(member.enabled));
            if let Some(priority) = member.override_priority {
                reference.insert(yaml("override-priority"), Yaml::Number(priority.into()));
            }
            Yaml::Mapping(reference)
        })
        .collect();
    node.insert(yaml("rule-references"), Yaml::Sequence(references));
    node.insert(yaml("short-circuit"), Yaml::Bool(group.short_circuit));
    node.insert(yaml("parallel-execution"), Yaml::Bool(group.parallel));
    node.insert(yaml("debug-mode"), Yaml::Bool(group.debug));
    node.insert(yaml("stop-on-first-failure"), Yaml::Bool(group.stop_on_first_failure));
    if let Some(timeout) = group.timeout_ms {
        let mut execution = Mapping::new();
        execution.insert(yaml("timeout-ms"), Yaml::Number(timeout.into()));
        node.insert(yaml("execution-config"), Yaml::Mapping(execution));
    }
    Yaml::Mapping(node)
}

fn mapping_nodes(mappings: &[FieldMapping]) -> Yaml {
    let nodes = mappings
        .iter()
        .map(|mapping| {
            let mut node = Mapping::new();
            let source = match &mapping.source {
                SourceField::Name(name) => name,
                SourceField::Expression(expression) => expression,
            };
            node.insert(yaml("source-field"), yaml(source));
            node.insert(yaml("target-field"), yaml(&mapping.target_field));
            if let Some(transformation) = &mapping.transformation {
                node.insert(yaml("transformation"), yaml(transformation));
            }
            Yaml::Mapping(node)
        })
        .collect();
    Yaml::Sequence(nodes)
}

fn enrichment_node(enrichment: &Enrichment) -> Yaml {
    let mut node = Mapping::new();
    node.insert(yaml("id"), yaml(&enrichment.id));
    node.insert(yaml("type"), yaml(enrichment.kind.type_name()));
    if let Some(condition) = &enrichment.condition {
        node.insert(yaml("condition"), yaml(condition));
    }
    node.insert(yaml("enabled"), Yaml::Bool(enrichment.enabled));
    if !enrichment.depends_on.is_empty() {
        node.insert(yaml("depends-on"), string_seq(enrichment.depends_on.iter()));
    }
    match &enrichment.kind {
        EnrichmentKind::Lookup(spec) => {
            let mut dataset = Mapping::new();
            match &spec.dataset {
                DatasetRef::Inline(inline) => {
                    dataset.insert(yaml("type"), yaml("inline"));
                    dataset.insert(yaml("key-field"), yaml(&inline.key_field));
                    dataset.insert(
                        yaml("data"),
                        Yaml::Sequence(inline.rows.iter().map(row_node).collect()),
                    );
                }
                DatasetRef::ExternalFile { path, key_field } => {
                    dataset.insert(yaml("type"), yaml("external-file"));
                    dataset.insert(yaml("file-path"), yaml(path));
                    dataset.insert(yaml("key-field"), yaml(key_field));
                }
                DatasetRef::DataSource { name, query_ref } => {
                    dataset.insert(yaml("type"), yaml("data-source"));
                    dataset.insert(yaml("data-source-ref"), yaml(name));
                    dataset.insert(yaml("query-ref"), yaml(query_ref));
                }
            }
            dataset.insert(yaml("cache-enabled"), Yaml::Bool(spec.cache_enabled));
            dataset.insert(yaml("cache-ttl-seconds"), Yaml::Number(spec.cache_ttl_seconds.into()));
            if !spec.default_values.is_empty() {
                dataset.insert(yaml("default-values"), row_node(&spec.default_values));
            }
            let mut lookup = Mapping::new();
            lookup.insert(yaml("lookup-key"), yaml(&spec.lookup_key));
            lookup.insert(yaml("lookup-dataset"), Yaml::Mapping(dataset));
            lookup.insert(yaml("field-mappings"), mapping_nodes(&spec.field_mappings));
            node.insert(yaml("lookup-config"), Yaml::Mapping(lookup));
        }
        EnrichmentKind::Field(spec) => {
            node.insert(yaml("field-mappings"), mapping_nodes(&spec.field_mappings));
        }
        EnrichmentKind::Calculation(spec) => {
            let mut calculation = Mapping::new();
            calculation.insert(yaml("expression"), yaml(&spec.expression));
            calculation.insert(yaml("result-field"), yaml(&spec.result_field));
            node.insert(yaml("calculation-config"), Yaml::Mapping(calculation));
        }
        EnrichmentKind::ConditionalMapping(spec) => {
            let rules = spec
                .mapping_rules
                .iter()
                .map(|rule| {
                    let mut conditions = Mapping::new();
                    conditions.insert(
                        yaml("operator"),
                        yaml(match rule.conditions.operator {
                            GroupOperator::And => "AND",
                            GroupOperator::Or => "OR",
                        }),
                    );
                    conditions.insert(yaml("conditions"), string_seq(rule.conditions.conditions.iter()));
                    let mut mapping = Mapping::new();
                    mapping.insert(yaml("transformation"), yaml(&rule.transformation));
                    let mut entry = Mapping::new();
                    entry.insert(yaml("id"), yaml(&rule.id));
                    entry.insert(yaml("priority"), Yaml::Number(rule.priority.into()));
                    entry.insert(yaml("conditions"), Yaml::Mapping(conditions));
                    entry.insert(yaml("mapping"), Yaml::Mapping(mapping));
                    Yaml::Mapping(entry)
                })
                .collect();
            let mut settings = Mapping::new();
            settings.insert(yaml("stop-on-first-match"), Yaml::Bool(spec.stop_on_first_match));
            settings.insert(yaml("log-matched-rule"), Yaml::Bool(spec.log_matched_rule));
            let mut config = Mapping::new();
            config.insert(yaml("target-field"), yaml(&spec.target_field));
            config.insert(yaml("mapping-rules"), Yaml::Sequence(rules));
            config.insert(yaml("execution-settings"), Yaml::Mapping(settings));
            node.insert(yaml("conditional-mapping-config"), Yaml::Mapping(config));
        }
    }
    node.insert(yaml("metadata"), metadata_node(&enrichment.metadata));
    Yaml::Mapping(node)
}

fn chain_rule_nodes(rules: &[crate::model::ChainRule]) -> Yaml {
    let nodes = rules
        .iter()
        .map(|rule| {
            let mut node = Mapping::new();
            node.insert(yaml("id"), yaml(&rule.id));
            node.insert(yaml("condition"), yaml(&rule.condition));
            if let Some(message) = &rule.message {
                node.insert(yaml("message"), yaml(message));
            }
            Yaml::Mapping(node)
        })
        .collect();
    Yaml::Sequence(nodes)
}

fn fluent_node(node: &FluentNode) -> Yaml {
    let mut out = Mapping::new();
    out.insert(yaml("id"), yaml(&node.rule.id));
    out.insert(yaml("condition"), yaml(&node.rule.condition));
    if let Some(message) = &node.rule.message {
        out.insert(yaml("message"), yaml(message));
    }
    if let Some(child) = &node.on_success {
        let mut wrapper = Mapping::new();
        wrapper.insert(yaml("rule"), fluent_node(child));
        out.insert(yaml("on-success"), Yaml::Mapping(wrapper));
    }
    if let Some(child) = &node.on_failure {
        let mut wrapper = Mapping::new();
        wrapper.insert(yaml("rule"), fluent_node(child));
        out.insert(yaml("on-failure"), Yaml::Mapping(wrapper));
    }
    Yaml::Mapping(out)
}

fn chain_node(chain: &RuleChain) -> Yaml {
    let mut configuration = Mapping::new();
    match &chain.spec {
        ChainSpec::Conditional {
            trigger,
            on_trigger,
            on_no_trigger,
        } => {
            let mut trigger_node = Mapping::new();
            trigger_node.insert(yaml("id"), yaml(&trigger.id));
            trigger_node.insert(yaml("condition"), yaml(&trigger.condition));
            if let Some(message) = &trigger.message {
                trigger_node.insert(yaml("message"), yaml(message));
            }
            configuration.insert(yaml("trigger-rule"), Yaml::Mapping(trigger_node));
            configuration.insert(yaml("on-trigger"), chain_rule_nodes(on_trigger));
            configuration.insert(yaml("on-no-trigger"), chain_rule_nodes(on_no_trigger));
        }
        ChainSpec::Sequential { stages } => {
            let nodes = stages
                .iter()
                .map(|stage| {
                    let mut node = Mapping::new();
                    node.insert(yaml("id"), yaml(&stage.id));
                    node.insert(yaml("expression"), yaml(&stage.expression));
                    node.insert(yaml("output-variable"), yaml(&stage.output_variable));
                    Yaml::Mapping(node)
                })
                .collect();
            configuration.insert(yaml("stages"), Yaml::Sequence(nodes));
        }
        ChainSpec::Routing {
            router,
            routes,
            default_route,
        } => {
            configuration.insert(yaml("router-expression"), yaml(router));
            let mut route_nodes = Mapping::new();
            for (key, rules) in routes {
                route_nodes.insert(yaml(key), chain_rule_nodes(rules));
            }
            configuration.insert(yaml("routes"), Yaml::Mapping(route_nodes));
            if let Some(rules) = default_route {
                configuration.insert(yaml("default-route"), chain_rule_nodes(rules));
            }
        }
        ChainSpec::Accumulative {
            accumulator_variable,
            initial_value,
            rules,
            selection,
            final_decision_rule,
        } => {
            configuration.insert(yaml("accumulator-variable"), yaml(accumulator_variable));
            configuration.insert(yaml("initial-value"), value_node(initial_value));
            let nodes = rules
                .iter()
                .map(|rule| {
                    let mut node = Mapping::new();
                    node.insert(yaml("id"), yaml(&rule.id));
                    node.insert(yaml("condition"), yaml(&rule.condition));
                    node.insert(
                        yaml("weight"),
                        Yaml::Number(serde_yaml::Number::from(rule.weight.to_f64().unwrap_or_default())),
                    );
                    node.insert(
                        yaml("priority"),
                        yaml(match rule.priority {
                            RulePriority::High => "HIGH",
                            RulePriority::Medium => "MEDIUM",
                            RulePriority::Low => "LOW",
                        }),
                    );
                    Yaml::Mapping(node)
                })
                .collect();
            configuration.insert(yaml("accumulation-rules"), Yaml::Sequence(nodes));
            let mut selection_node = Mapping::new();
            match selection {
                RuleSelection::All => {
                    selection_node.insert(yaml("strategy"), yaml("all"));
                }
                RuleSelection::WeightThreshold(threshold) => {
                    selection_node.insert(yaml("strategy"), yaml("weight-threshold"));
                    selection_node.insert(
                        yaml("threshold"),
                        Yaml::Number(serde_yaml::Number::from(threshold.to_f64().unwrap_or_default())),
                    );
                }
                RuleSelection::TopWeighted(max_rules) => {
                    selection_node.insert(yaml("strategy"), yaml("top-weighted"));
                    selection_node.insert(yaml("max-rules"), Yaml::Number((*max_rules as u64).into()));
                }
                RuleSelection::PriorityBased(priority) => {
                    selection_node.insert(yaml("strategy"), yaml("priority-based"));
                    selection_node.insert(
                        yaml("min-priority"),
                        yaml(match priority {
                            RulePriority::High => "HIGH",
                            RulePriority::Medium => "MEDIUM",
                            RulePriority::Low => "LOW",
                        }),
                    );
                }
                RuleSelection::DynamicThreshold(expression) => {
                    selection_node.insert(yaml("strategy"), yaml("dynamic-threshold"));
                    selection_node.insert(yaml("threshold-expression"), yaml(expression));
                }
            }
            configuration.insert(yaml("rule-selection"), Yaml::Mapping(selection_node));
            configuration.insert(yaml("final-decision-rule"), yaml(final_decision_rule));
        }
        ChainSpec::ComplexWorkflow { stages } => {
            let nodes = stages
                .iter()
                .map(|stage| {
                    let mut node = Mapping::new();
                    node.insert(yaml("id"), yaml(&stage.id));
                    if !stage.depends_on.is_empty() {
                        node.insert(yaml("depends-on"), string_seq(stage.depends_on.iter()));
                    }
                    match &stage.execution {
                        StageExecution::Rules(rules) => {
                            node.insert(yaml("rules"), chain_rule_nodes(rules));
                        }
                        StageExecution::Conditional {
                            condition,
                            on_true,
                            on_false,
                        } => {
                            let mut conditional = Mapping::new();
                            conditional.insert(yaml("condition"), yaml(condition));
                            let mut true_branch = Mapping::new();
                            true_branch.insert(yaml("rules"), chain_rule_nodes(on_true));
                            conditional.insert(yaml("on-true"), Yaml::Mapping(true_branch));
                            let mut false_branch = Mapping::new();
                            false_branch.insert(yaml("rules"), chain_rule_nodes(on_false));
                            conditional.insert(yaml("on-false"), Yaml::Mapping(false_branch));
                            node.insert(yaml("conditional-execution"), Yaml::Mapping(conditional));
                        }
                    }
                    if let Some(output) = &stage.output_variable {
                        node.insert(yaml("output-variable"), yaml(output));
                    }
                    node.insert(
                        yaml("failure-action"),
                        yaml(match stage.failure_action {
                            crate::model::FailureAction::Terminate => "terminate",
                            crate::model::FailureAction::Continue => "continue",
                        }),
                    );
                    Yaml::Mapping(node)
                })
                .collect();
            configuration.insert(yaml("stages"), Yaml::Sequence(nodes));
        }
        ChainSpec::FluentBuilder { root, max_depth } => {
            configuration.insert(yaml("root-rule"), fluent_node(root));
            configuration.insert(yaml("max-depth"), Yaml::Number((*max_depth as u64).into()));
        }
    }

    let mut node = Mapping::new();
    node.insert(yaml("id"), yaml(&chain.id));
    node.insert(yaml("name"), yaml(&chain.name));
    node.insert(yaml("pattern"), yaml(chain.spec.pattern_name()));
    node.insert(yaml("configuration"), Yaml::Mapping(configuration));
    Yaml::Mapping(node)
}
