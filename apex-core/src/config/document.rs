//! Raw YAML document shapes and their conversion into the typed model

use crate::config::validate::{is_semantic_version, ValidationReport};
use crate::model::{
    AccumulationRule, CalculationSpec, ChainRule, ChainSpec, ConditionSet, ConditionalMappingSpec,
    DataSourceRef, Dataset, DatasetRef, Enrichment, EnrichmentKind, FailureAction, FieldMapping,
    FieldSpec, FluentNode, GroupOperator, LookupSpec, MappingRule, MemberTarget, Rule, RuleChain,
    RuleGroup, RuleMetadata, RulePriority, RuleReference, RuleSelection, Scenario, SequentialStage,
    SourceField, StageExecution, Severity, WorkflowStage, DEFAULT_MAX_FLUENT_DEPTH,
    DEFAULT_RULE_PRIORITY,
};
use crate::types::{from_yaml, Value};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::Arc;

/// Recognized document types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentType {
    /// Rules, groups, enrichments, chains
    RuleConfig,
    /// Scenario definitions
    Scenario,
    /// Registry of scenario files
    ScenarioRegistry,
    /// Named datasets
    Dataset,
    /// Enrichment definitions
    Enrichment,
    /// Rule-chain definitions
    RuleChain,
    /// External data-source configuration
    ExternalDataConfig,
}

impl DocumentType {
    /// Parse the YAML `type` spelling.
    pub fn parse(s: &str) -> Option<DocumentType> {
        match s {
            "rule-config" => Some(DocumentType::RuleConfig),
            "scenario" => Some(DocumentType::Scenario),
            "scenario-registry" => Some(DocumentType::ScenarioRegistry),
            "dataset" => Some(DocumentType::Dataset),
            "enrichment" => Some(DocumentType::Enrichment),
            "rule-chain" => Some(DocumentType::RuleChain),
            "external-data-config" => Some(DocumentType::ExternalDataConfig),
            _ => None,
        }
    }
}

/// Validated document metadata.
#[derive(Debug, Clone)]
pub struct DocumentMetadata {
    /// Document name
    pub name: String,
    /// Semantic version
    pub version: String,
    /// Document type
    pub doc_type: DocumentType,
    /// Business domain, required for scenario documents
    pub business_domain: Option<String>,
}

/// A reference declared under `external-data-sources`.
#[derive(Debug, Clone)]
pub struct ExternalSourceRef {
    /// Logical name
    pub name: String,
    /// Referenced file, resolved against the classpath root only
    pub source: String,
}

/// One parsed and converted configuration document.
#[derive(Debug, Clone)]
pub struct Document {
    /// Source path, used in reports
    pub path: String,
    /// Validated metadata
    pub metadata: DocumentMetadata,
    /// Rules
    pub rules: Vec<Rule>,
    /// Rule groups
    pub groups: Vec<RuleGroup>,
    /// Enrichments
    pub enrichments: Vec<Enrichment>,
    /// Rule chains
    pub chains: Vec<RuleChain>,
    /// Scenarios
    pub scenarios: Vec<Scenario>,
    /// Named datasets
    pub datasets: Vec<(Arc<str>, Dataset)>,
    /// Logical data-source references
    pub data_source_refs: Vec<DataSourceRef>,
    /// External-data-source references (classpath loading only)
    pub external_refs: Vec<ExternalSourceRef>,
}

// ---------------------------------------------------------------------------
// Raw serde shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RawDocument {
    pub(crate) metadata: RawMetadata,
    #[serde(default)]
    pub(crate) rules: Vec<RawRule>,
    #[serde(default)]
    pub(crate) rule_groups: Vec<RawRuleGroup>,
    #[serde(default)]
    pub(crate) enrichments: Vec<RawEnrichment>,
    #[serde(default)]
    pub(crate) rule_chains: Vec<RawRuleChain>,
    #[serde(default)]
    pub(crate) scenarios: Vec<RawScenario>,
    #[serde(default)]
    pub(crate) datasets: Vec<RawDataset>,
    #[serde(default)]
    pub(crate) data_sources: Vec<RawDataSource>,
    #[serde(default)]
    pub(crate) external_data_sources: Vec<RawExternalDataSource>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RawMetadata {
    pub(crate) name: Option<String>,
    pub(crate) version: Option<String>,
    #[serde(rename = "type")]
    pub(crate) doc_type: Option<String>,
    pub(crate) business_domain: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RawAuditMetadata {
    pub(crate) owner: Option<String>,
    pub(crate) domain: Option<String>,
    #[serde(default)]
    pub(crate) tags: Vec<String>,
    pub(crate) effective_date: Option<String>,
    pub(crate) expiration_date: Option<String>,
    pub(crate) created_at: Option<String>,
    pub(crate) modified_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RawRule {
    pub(crate) id: String,
    pub(crate) name: Option<String>,
    pub(crate) condition: Option<String>,
    pub(crate) message: Option<String>,
    pub(crate) severity: Option<String>,
    pub(crate) priority: Option<i32>,
    #[serde(default)]
    pub(crate) categories: Vec<String>,
    #[serde(default)]
    pub(crate) depends_on: Vec<String>,
    pub(crate) metadata: Option<RawAuditMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RawRuleReference {
    pub(crate) rule_id: Option<String>,
    pub(crate) rule_group_id: Option<String>,
    pub(crate) sequence: u32,
    pub(crate) enabled: Option<bool>,
    pub(crate) override_priority: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RawExecutionConfig {
    pub(crate) timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RawRuleGroup {
    pub(crate) id: String,
    pub(crate) name: Option<String>,
    pub(crate) operator: Option<String>,
    pub(crate) priority: Option<i32>,
    #[serde(default)]
    pub(crate) categories: Vec<String>,
    pub(crate) rule_ids: Option<Vec<String>>,
    pub(crate) rule_references: Option<Vec<RawRuleReference>>,
    #[serde(default)]
    pub(crate) rule_group_references: Vec<RawRuleReference>,
    pub(crate) short_circuit: Option<bool>,
    pub(crate) parallel_execution: Option<bool>,
    pub(crate) debug_mode: Option<bool>,
    pub(crate) stop_on_first_failure: Option<bool>,
    pub(crate) execution_config: Option<RawExecutionConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RawFieldMapping {
    pub(crate) source_field: String,
    pub(crate) target_field: String,
    pub(crate) transformation: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RawLookupDataset {
    #[serde(rename = "type")]
    pub(crate) kind: String,
    pub(crate) key_field: Option<String>,
    pub(crate) data: Option<serde_yaml::Value>,
    pub(crate) file_path: Option<String>,
    pub(crate) data_source_ref: Option<String>,
    pub(crate) query_ref: Option<String>,
    pub(crate) cache_enabled: Option<bool>,
    pub(crate) cache_ttl_seconds: Option<u64>,
    pub(crate) default_values: Option<serde_yaml::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RawLookupConfig {
    pub(crate) lookup_key: String,
    pub(crate) lookup_dataset: RawLookupDataset,
    #[serde(default)]
    pub(crate) field_mappings: Vec<RawFieldMapping>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RawCalculationConfig {
    pub(crate) expression: String,
    pub(crate) result_field: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RawConditionSet {
    pub(crate) operator: Option<String>,
    #[serde(default)]
    pub(crate) conditions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RawMappingBody {
    pub(crate) transformation: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RawMappingRule {
    pub(crate) id: String,
    pub(crate) priority: i32,
    pub(crate) conditions: RawConditionSet,
    pub(crate) mapping: RawMappingBody,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RawExecutionSettings {
    pub(crate) stop_on_first_match: Option<bool>,
    pub(crate) log_matched_rule: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RawConditionalMappingConfig {
    pub(crate) target_field: String,
    #[serde(default)]
    pub(crate) mapping_rules: Vec<RawMappingRule>,
    pub(crate) execution_settings: Option<RawExecutionSettings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RawEnrichment {
    pub(crate) id: String,
    #[serde(rename = "type")]
    pub(crate) kind: String,
    pub(crate) condition: Option<String>,
    pub(crate) enabled: Option<bool>,
    #[serde(default)]
    pub(crate) depends_on: Vec<String>,
    pub(crate) lookup_config: Option<RawLookupConfig>,
    pub(crate) field_mappings: Option<Vec<RawFieldMapping>>,
    pub(crate) calculation_config: Option<RawCalculationConfig>,
    pub(crate) conditional_mapping_config: Option<RawConditionalMappingConfig>,
    pub(crate) metadata: Option<RawAuditMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RawChainRule {
    pub(crate) id: String,
    pub(crate) condition: String,
    pub(crate) message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RawBranchRules {
    #[serde(default)]
    pub(crate) rules: Vec<RawChainRule>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RawConditionalExecution {
    pub(crate) condition: String,
    pub(crate) on_true: Option<RawBranchRules>,
    pub(crate) on_false: Option<RawBranchRules>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RawStage {
    pub(crate) id: String,
    pub(crate) expression: Option<String>,
    pub(crate) output_variable: Option<String>,
    #[serde(default)]
    pub(crate) depends_on: Vec<String>,
    pub(crate) rules: Option<Vec<RawChainRule>>,
    pub(crate) conditional_execution: Option<RawConditionalExecution>,
    pub(crate) failure_action: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RawAccumulationRule {
    pub(crate) id: String,
    pub(crate) condition: String,
    pub(crate) weight: Option<serde_yaml::Number>,
    pub(crate) priority: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RawRuleSelection {
    pub(crate) strategy: String,
    pub(crate) threshold: Option<serde_yaml::Number>,
    pub(crate) max_rules: Option<usize>,
    pub(crate) min_priority: Option<String>,
    pub(crate) threshold_expression: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RawFluentChild {
    pub(crate) rule: Box<RawFluentNode>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RawFluentNode {
    pub(crate) id: String,
    pub(crate) condition: String,
    pub(crate) message: Option<String>,
    pub(crate) on_success: Option<RawFluentChild>,
    pub(crate) on_failure: Option<RawFluentChild>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RawChainConfig {
    pub(crate) trigger_rule: Option<RawChainRule>,
    pub(crate) on_trigger: Option<Vec<RawChainRule>>,
    pub(crate) on_no_trigger: Option<Vec<RawChainRule>>,
    pub(crate) stages: Option<Vec<RawStage>>,
    pub(crate) router_expression: Option<String>,
    pub(crate) routes: Option<BTreeMap<String, Vec<RawChainRule>>>,
    pub(crate) default_route: Option<Vec<RawChainRule>>,
    pub(crate) accumulator_variable: Option<String>,
    pub(crate) initial_value: Option<serde_yaml::Value>,
    pub(crate) accumulation_rules: Option<Vec<RawAccumulationRule>>,
    pub(crate) rule_selection: Option<RawRuleSelection>,
    pub(crate) final_decision_rule: Option<String>,
    pub(crate) root_rule: Option<RawFluentNode>,
    pub(crate) max_depth: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RawRuleChain {
    pub(crate) id: String,
    pub(crate) name: Option<String>,
    pub(crate) pattern: String,
    #[serde(default)]
    pub(crate) configuration: RawChainConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RawScenario {
    pub(crate) id: String,
    pub(crate) business_domain: Option<String>,
    #[serde(default)]
    pub(crate) data_types: Vec<String>,
    #[serde(default)]
    pub(crate) rule_ids: Vec<String>,
    #[serde(default)]
    pub(crate) rule_group_ids: Vec<String>,
    #[serde(default)]
    pub(crate) enrichment_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RawDataset {
    pub(crate) id: String,
    pub(crate) key_field: String,
    #[serde(default)]
    pub(crate) data: serde_yaml::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RawDataSource {
    pub(crate) name: String,
    pub(crate) config_file: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RawExternalDataSource {
    pub(crate) name: String,
    #[serde(rename = "type")]
    pub(crate) kind: Option<String>,
    pub(crate) source: String,
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::from_str(raw)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn audit_metadata(
    raw: Option<&RawAuditMetadata>,
    now: DateTime<Utc>,
    location: &str,
    report: &mut ValidationReport,
) -> RuleMetadata {
    let mut metadata = RuleMetadata::stamped(now);
    let Some(raw) = raw else {
        return metadata;
    };
    metadata.owner = raw.owner.clone();
    metadata.domain = raw.domain.clone();
    metadata.tags = raw.tags.clone();
    let mut date_field = |value: &Option<String>, field: &str| -> Option<DateTime<Utc>> {
        value.as_deref().and_then(|text| {
            let parsed = parse_timestamp(text);
            if parsed.is_none() {
                report.warning(location, format!("unparseable {field} '{text}', ignoring"));
            }
            parsed
        })
    };
    metadata.effective_date = date_field(&raw.effective_date, "effective-date");
    metadata.expiration_date = date_field(&raw.expiration_date, "expiration-date");
    if let Some(created) = date_field(&raw.created_at, "created-at") {
        metadata.created_at = created;
        metadata.modified_at = created;
    }
    if let Some(modified) = date_field(&raw.modified_at, "modified-at") {
        metadata.modified_at = modified.max(metadata.created_at);
    }
    metadata
}

fn decimal_from_number(n: &serde_yaml::Number) -> Option<Decimal> {
    Decimal::from_str(&n.to_string()).ok()
}

fn yaml_rows(
    node: &serde_yaml::Value,
    location: &str,
    report: &mut ValidationReport,
) -> Vec<BTreeMap<String, Value>> {
    let mut rows = Vec::new();
    match node {
        serde_yaml::Value::Null => {}
        serde_yaml::Value::Sequence(seq) => {
            for entry in seq {
                match from_yaml(entry) {
                    Value::Map(map) => rows.push((*map).clone()),
                    _ => report.error(location, "dataset rows must be mappings"),
                }
            }
        }
        _ => report.error(location, "dataset data must be a sequence of mappings"),
    }
    rows
}

fn yaml_defaults(
    node: Option<&serde_yaml::Value>,
    location: &str,
    report: &mut ValidationReport,
) -> BTreeMap<String, Value> {
    match node.map(from_yaml) {
        None | Some(Value::Null) => BTreeMap::new(),
        Some(Value::Map(map)) => (*map).clone(),
        Some(_) => {
            report.error(location, "default-values must be a mapping");
            BTreeMap::new()
        }
    }
}

fn field_mappings(raw: &[RawFieldMapping]) -> Vec<FieldMapping> {
    raw.iter()
        .map(|m| FieldMapping {
            source: SourceField::parse(&m.source_field),
            target_field: m.target_field.clone(),
            transformation: m.transformation.clone(),
        })
        .collect()
}

fn chain_rules(raw: &[RawChainRule]) -> Vec<ChainRule> {
    raw.iter()
        .map(|r| ChainRule {
            id: Arc::from(r.id.as_str()),
            condition: r.condition.clone(),
            message: r.message.clone(),
        })
        .collect()
}

impl RawDocument {
    /// Convert the raw document, appending findings to `report`.
    ///
    /// Returns `None` when the document has fatal shape problems; entity-level
    /// findings leave the remaining entities converted so one pass reports as
    /// much as possible.
    pub(crate) fn convert(
        &self,
        path: &str,
        now: DateTime<Utc>,
        report: &mut ValidationReport,
    ) -> Option<Document> {
        let metadata = self.convert_metadata(path, report)?;

        let mut document = Document {
            path: path.to_string(),
            metadata,
            rules: Vec::new(),
            groups: Vec::new(),
            enrichments: Vec::new(),
            chains: Vec::new(),
            scenarios: Vec::new(),
            datasets: Vec::new(),
            data_source_refs: Vec::new(),
            external_refs: Vec::new(),
        };

        for raw in &self.rules {
            let location = format!("{path}/rules/{}", raw.id);
            let Some(condition) = raw.condition.clone() else {
                report.error(&location, "rule is missing required field 'condition'");
                continue;
            };
            let severity = match raw.severity.as_deref() {
                None => Severity::Info,
                Some(text) => match Severity::parse(text) {
                    Some(severity) => severity,
                    None => {
                        report.error(&location, format!("unknown severity '{text}'"));
                        continue;
                    }
                },
            };
            document.rules.push(Rule {
                id: Arc::from(raw.id.as_str()),
                name: raw.name.clone().unwrap_or_else(|| raw.id.clone()),
                condition,
                message: raw.message.clone().unwrap_or_default(),
                severity,
                priority: raw.priority.unwrap_or(DEFAULT_RULE_PRIORITY),
                categories: raw.categories.iter().cloned().collect::<BTreeSet<_>>(),
                depends_on: raw.depends_on.iter().map(|d| Arc::from(d.as_str())).collect(),
                metadata: audit_metadata(raw.metadata.as_ref(), now, &location, report),
            });
        }

        for raw in &self.rule_groups {
            let location = format!("{path}/rule-groups/{}", raw.id);
            if let Some(group) = convert_group(raw, &location, report) {
                document.groups.push(group);
            }
        }

        for raw in &self.enrichments {
            let location = format!("{path}/enrichments/{}", raw.id);
            if let Some(enrichment) = convert_enrichment(raw, now, &location, report) {
                document.enrichments.push(enrichment);
            }
        }

        for raw in &self.rule_chains {
            let location = format!("{path}/rule-chains/{}", raw.id);
            if let Some(chain) = convert_chain(raw, &location, report) {
                document.chains.push(chain);
            }
        }

        for raw in &self.scenarios {
            document.scenarios.push(Scenario {
                id: Arc::from(raw.id.as_str()),
                business_domain: raw
                    .business_domain
                    .clone()
                    .or_else(|| self.metadata.business_domain.clone())
                    .unwrap_or_default(),
                data_types: raw.data_types.clone(),
                rule_ids: raw.rule_ids.iter().map(|r| Arc::from(r.as_str())).collect(),
                group_ids: raw.rule_group_ids.iter().map(|g| Arc::from(g.as_str())).collect(),
                enrichment_ids: raw
                    .enrichment_ids
                    .iter()
                    .map(|e| Arc::from(e.as_str()))
                    .collect(),
            });
        }

        for raw in &self.datasets {
            let location = format!("{path}/datasets/{}", raw.id);
            let rows = yaml_rows(&raw.data, &location, report);
            document.datasets.push((
                Arc::from(raw.id.as_str()),
                Dataset {
                    rows,
                    key_field: raw.key_field.clone(),
                },
            ));
        }

        for raw in &self.data_sources {
            document.data_source_refs.push(DataSourceRef {
                name: Arc::from(raw.name.as_str()),
                config_file: raw.config_file.clone(),
            });
        }

        for raw in &self.external_data_sources {
            let location = format!("{path}/external-data-sources/{}", raw.name);
            if let Some(kind) = raw.kind.as_deref() {
                if kind != "external-data-config" {
                    report.error(&location, format!("unsupported external source type '{kind}'"));
                    continue;
                }
            }
            document.external_refs.push(ExternalSourceRef {
                name: raw.name.clone(),
                source: raw.source.clone(),
            });
        }

        Some(document)
    }

    fn convert_metadata(&self, path: &str, report: &mut ValidationReport) -> Option<DocumentMetadata> {
        let location = format!("{path}/metadata");
        let name = match &self.metadata.name {
            Some(name) => name.clone(),
            None => {
                report.error(&location, "missing required field 'name'");
                return None;
            }
        };
        let version = match &self.metadata.version {
            Some(version) => version.clone(),
            None => {
                report.error(&location, "missing required field 'version'");
                return None;
            }
        };
        if !is_semantic_version(&version) {
            report.error(
                &location,
                format!("version '{version}' is not a semantic version (major.minor.patch)"),
            );
            return None;
        }
        let doc_type = match self.metadata.doc_type.as_deref() {
            None => {
                report.error(&location, "missing required field 'type'");
                return None;
            }
            Some(text) => match DocumentType::parse(text) {
                Some(doc_type) => doc_type,
                None => {
                    report.error(&location, format!("unrecognized document type '{text}'"));
                    return None;
                }
            },
        };
        if matches!(doc_type, DocumentType::Scenario | DocumentType::ScenarioRegistry)
            && self.metadata.business_domain.is_none()
        {
            report.error(&location, "scenario documents require 'business-domain'");
            return None;
        }
        Some(DocumentMetadata {
            name,
            version,
            doc_type,
            business_domain: self.metadata.business_domain.clone(),
        })
    }
}

fn convert_group(
    raw: &RawRuleGroup,
    location: &str,
    report: &mut ValidationReport,
) -> Option<RuleGroup> {
    let operator = match raw.operator.as_deref() {
        None => GroupOperator::And,
        Some(text) => match GroupOperator::parse(text) {
            Some(op) => op,
            None => {
                report.error(location, format!("unknown group operator '{text}'"));
                return None;
            }
        },
    };

    if raw.rule_ids.is_some() && raw.rule_references.is_some() {
        report.error(location, "'rule-ids' and 'rule-references' are mutually exclusive");
        return None;
    }

    let mut members: Vec<RuleReference> = Vec::new();
    if let Some(ids) = &raw.rule_ids {
        for (index, id) in ids.iter().enumerate() {
            members.push(RuleReference {
                target: MemberTarget::Rule(Arc::from(id.as_str())),
                sequence: (index + 1) as u32,
                enabled: true,
                override_priority: None,
            });
        }
    }
    if let Some(refs) = &raw.rule_references {
        for reference in refs {
            let target = match (&reference.rule_id, &reference.rule_group_id) {
                (Some(rule), None) => MemberTarget::Rule(Arc::from(rule.as_str())),
                (None, Some(group)) => MemberTarget::Group(Arc::from(group.as_str())),
                _ => {
                    report.error(
                        location,
                        "rule reference must set exactly one of 'rule-id' or 'rule-group-id'",
                    );
                    return None;
                }
            };
            members.push(RuleReference {
                target,
                sequence: reference.sequence,
                enabled: reference.enabled.unwrap_or(true),
                override_priority: reference.override_priority,
            });
        }
    }
    for reference in &raw.rule_group_references {
        let Some(group) = &reference.rule_group_id else {
            report.error(location, "rule-group-references entries require 'rule-group-id'");
            return None;
        };
        members.push(RuleReference {
            target: MemberTarget::Group(Arc::from(group.as_str())),
            sequence: reference.sequence,
            enabled: reference.enabled.unwrap_or(true),
            override_priority: reference.override_priority,
        });
    }

    let mut seen = HashMap::new();
    for member in &members {
        if let Some(previous) = seen.insert(member.sequence, member.target.id().clone()) {
            report.error(
                location,
                format!(
                    "sequence {} assigned to both '{}' and '{}'",
                    member.sequence,
                    previous,
                    member.target.id()
                ),
            );
            return None;
        }
    }
    members.sort_by_key(|m| m.sequence);

    Some(RuleGroup {
        id: Arc::from(raw.id.as_str()),
        name: raw.name.clone().unwrap_or_else(|| raw.id.clone()),
        operator,
        priority: raw.priority.unwrap_or(DEFAULT_RULE_PRIORITY),
        categories: raw.categories.iter().cloned().collect(),
        members,
        short_circuit: raw.short_circuit.unwrap_or(true),
        parallel: raw.parallel_execution.unwrap_or(false),
        debug: raw.debug_mode.unwrap_or(false),
        stop_on_first_failure: raw.stop_on_first_failure.unwrap_or(false),
        timeout_ms: raw.execution_config.as_ref().and_then(|c| c.timeout_ms),
    })
}

fn convert_enrichment(
    raw: &RawEnrichment,
    now: DateTime<Utc>,
    location: &str,
    report: &mut ValidationReport,
) -> Option<Enrichment> {
    let kind = match raw.kind.as_str() {
        "lookup" => {
            let Some(config) = &raw.lookup_config else {
                report.error(location, "lookup enrichment requires 'lookup-config'");
                return None;
            };
            let dataset = convert_lookup_dataset(&config.lookup_dataset, location, report)?;
            EnrichmentKind::Lookup(LookupSpec {
                lookup_key: config.lookup_key.clone(),
                dataset,
                cache_enabled: config.lookup_dataset.cache_enabled.unwrap_or(true),
                cache_ttl_seconds: config.lookup_dataset.cache_ttl_seconds.unwrap_or(300),
                default_values: yaml_defaults(
                    config.lookup_dataset.default_values.as_ref(),
                    location,
                    report,
                ),
                field_mappings: field_mappings(&config.field_mappings),
            })
        }
        "field" => {
            let Some(mappings) = &raw.field_mappings else {
                report.error(location, "field enrichment requires 'field-mappings'");
                return None;
            };
            EnrichmentKind::Field(FieldSpec {
                field_mappings: field_mappings(mappings),
            })
        }
        "calculation" => {
            let Some(config) = &raw.calculation_config else {
                report.error(location, "calculation enrichment requires 'calculation-config'");
                return None;
            };
            EnrichmentKind::Calculation(CalculationSpec {
                expression: config.expression.clone(),
                result_field: config.result_field.clone(),
            })
        }
        "conditional-mapping" => {
            let Some(config) = &raw.conditional_mapping_config else {
                report.error(
                    location,
                    "conditional-mapping enrichment requires 'conditional-mapping-config'",
                );
                return None;
            };
            let mut rules = Vec::new();
            for rule in &config.mapping_rules {
                let operator = match rule.conditions.operator.as_deref() {
                    None => GroupOperator::And,
                    Some(text) => match GroupOperator::parse(text) {
                        Some(op) => op,
                        None => {
                            report.error(location, format!("unknown condition operator '{text}'"));
                            return None;
                        }
                    },
                };
                rules.push(MappingRule {
                    id: Arc::from(rule.id.as_str()),
                    priority: rule.priority,
                    conditions: ConditionSet {
                        operator,
                        conditions: rule.conditions.conditions.clone(),
                    },
                    transformation: rule.mapping.transformation.clone(),
                });
            }
            rules.sort_by_key(|r| r.priority);
            let settings = config.execution_settings.as_ref();
            EnrichmentKind::ConditionalMapping(ConditionalMappingSpec {
                target_field: config.target_field.clone(),
                mapping_rules: rules,
                stop_on_first_match: settings
                    .and_then(|s| s.stop_on_first_match)
                    .unwrap_or(true),
                log_matched_rule: settings.and_then(|s| s.log_matched_rule).unwrap_or(false),
            })
        }
        other => {
            report.error(location, format!("unknown enrichment type '{other}'"));
            return None;
        }
    };

    Some(Enrichment {
        id: Arc::from(raw.id.as_str()),
        kind,
        condition: raw.condition.clone(),
        enabled: raw.enabled.unwrap_or(true),
        depends_on: raw.depends_on.iter().map(|d| Arc::from(d.as_str())).collect(),
        metadata: audit_metadata(raw.metadata.as_ref(), now, location, report),
    })
}

fn convert_lookup_dataset(
    raw: &RawLookupDataset,
    location: &str,
    report: &mut ValidationReport,
) -> Option<DatasetRef> {
    match raw.kind.as_str() {
        "inline" => {
            let key_field = match &raw.key_field {
                Some(key_field) => key_field.clone(),
                None => {
                    report.error(location, "inline dataset requires 'key-field'");
                    return None;
                }
            };
            let rows = match &raw.data {
                Some(data) => yaml_rows(data, location, report),
                None => {
                    report.error(location, "inline dataset requires 'data'");
                    return None;
                }
            };
            Some(DatasetRef::Inline(Dataset { rows, key_field }))
        }
        "external-file" => {
            let (Some(path), Some(key_field)) = (&raw.file_path, &raw.key_field) else {
                report.error(location, "external-file dataset requires 'file-path' and 'key-field'");
                return None;
            };
            Some(DatasetRef::ExternalFile {
                path: path.clone(),
                key_field: key_field.clone(),
            })
        }
        "data-source" => {
            let (Some(name), Some(query_ref)) = (&raw.data_source_ref, &raw.query_ref) else {
                report.error(
                    location,
                    "data-source dataset requires 'data-source-ref' and 'query-ref'",
                );
                return None;
            };
            Some(DatasetRef::DataSource {
                name: Arc::from(name.as_str()),
                query_ref: query_ref.clone(),
            })
        }
        other => {
            report.error(location, format!("unknown dataset type '{other}'"));
            None
        }
    }
}

fn convert_chain(raw: &RawRuleChain, location: &str, report: &mut ValidationReport) -> Option<RuleChain> {
    let config = &raw.configuration;
    let spec = match raw.pattern.as_str() {
        "conditional" => {
            let Some(trigger) = &config.trigger_rule else {
                report.error(location, "conditional chain requires 'trigger-rule'");
                return None;
            };
            ChainSpec::Conditional {
                trigger: ChainRule {
                    id: Arc::from(trigger.id.as_str()),
                    condition: trigger.condition.clone(),
                    message: trigger.message.clone(),
                },
                on_trigger: chain_rules(config.on_trigger.as_deref().unwrap_or(&[])),
                on_no_trigger: chain_rules(config.on_no_trigger.as_deref().unwrap_or(&[])),
            }
        }
        "sequential" => {
            let Some(stages) = &config.stages else {
                report.error(location, "sequential chain requires 'stages'");
                return None;
            };
            let mut converted = Vec::new();
            for stage in stages {
                let (Some(expression), Some(output)) = (&stage.expression, &stage.output_variable)
                else {
                    report.error(
                        location,
                        format!(
                            "sequential stage '{}' requires 'expression' and 'output-variable'",
                            stage.id
                        ),
                    );
                    return None;
                };
                converted.push(SequentialStage {
                    id: Arc::from(stage.id.as_str()),
                    expression: expression.clone(),
                    output_variable: output.clone(),
                });
            }
            ChainSpec::Sequential { stages: converted }
        }
        "routing" => {
            let Some(router) = &config.router_expression else {
                report.error(location, "routing chain requires 'router-expression'");
                return None;
            };
            let routes = config
                .routes
                .as_ref()
                .map(|routes| {
                    routes
                        .iter()
                        .map(|(key, rules)| (key.clone(), chain_rules(rules)))
                        .collect()
                })
                .unwrap_or_default();
            ChainSpec::Routing {
                router: router.clone(),
                routes,
                default_route: config.default_route.as_deref().map(chain_rules),
            }
        }
        "accumulative" => {
            let Some(accumulator) = &config.accumulator_variable else {
                report.error(location, "accumulative chain requires 'accumulator-variable'");
                return None;
            };
            let Some(decision) = &config.final_decision_rule else {
                report.error(location, "accumulative chain requires 'final-decision-rule'");
                return None;
            };
            let mut rules = Vec::new();
            for rule in config.accumulation_rules.as_deref().unwrap_or(&[]) {
                let weight = match &rule.weight {
                    None => Decimal::ONE,
                    Some(number) => match decimal_from_number(number) {
                        Some(weight) => weight,
                        None => {
                            report.error(
                                location,
                                format!("rule '{}' has a non-numeric weight", rule.id),
                            );
                            return None;
                        }
                    },
                };
                let priority = match rule.priority.as_deref() {
                    None => RulePriority::Medium,
                    Some(text) => match RulePriority::parse(text) {
                        Some(priority) => priority,
                        None => {
                            report.error(location, format!("unknown rule priority '{text}'"));
                            return None;
                        }
                    },
                };
                rules.push(AccumulationRule {
                    id: Arc::from(rule.id.as_str()),
                    condition: rule.condition.clone(),
                    weight,
                    priority,
                });
            }
            let selection = convert_selection(config.rule_selection.as_ref(), location, report)?;
            let initial_value = config
                .initial_value
                .as_ref()
                .map(from_yaml)
                .unwrap_or(Value::Int(0));
            if initial_value.as_decimal().is_none() {
                report.error(location, "accumulative 'initial-value' must be numeric");
                return None;
            }
            ChainSpec::Accumulative {
                accumulator_variable: accumulator.clone(),
                initial_value,
                rules,
                selection,
                final_decision_rule: decision.clone(),
            }
        }
        "complex-workflow" => {
            let Some(stages) = &config.stages else {
                report.error(location, "complex-workflow chain requires 'stages'");
                return None;
            };
            let mut converted = Vec::new();
            for stage in stages {
                let stage_location = format!("{location}/stages/{}", stage.id);
                let execution = match (&stage.rules, &stage.conditional_execution) {
                    (Some(rules), None) => StageExecution::Rules(chain_rules(rules)),
                    (None, Some(conditional)) => StageExecution::Conditional {
                        condition: conditional.condition.clone(),
                        on_true: chain_rules(
                            conditional.on_true.as_ref().map(|b| b.rules.as_slice()).unwrap_or(&[]),
                        ),
                        on_false: chain_rules(
                            conditional
                                .on_false
                                .as_ref()
                                .map(|b| b.rules.as_slice())
                                .unwrap_or(&[]),
                        ),
                    },
                    _ => {
                        report.error(
                            &stage_location,
                            "stage must declare exactly one of 'rules' or 'conditional-execution'",
                        );
                        return None;
                    }
                };
                let failure_action = match stage.failure_action.as_deref() {
                    None | Some("terminate") => FailureAction::Terminate,
                    Some("continue") => FailureAction::Continue,
                    Some(other) => {
                        report.error(&stage_location, format!("unknown failure-action '{other}'"));
                        return None;
                    }
                };
                converted.push(WorkflowStage {
                    id: Arc::from(stage.id.as_str()),
                    depends_on: stage.depends_on.iter().map(|d| Arc::from(d.as_str())).collect(),
                    execution,
                    output_variable: stage.output_variable.clone(),
                    failure_action,
                });
            }
            ChainSpec::ComplexWorkflow { stages: converted }
        }
        "fluent-builder" => {
            let Some(root) = &config.root_rule else {
                report.error(location, "fluent-builder chain requires 'root-rule'");
                return None;
            };
            ChainSpec::FluentBuilder {
                root: convert_fluent(root),
                max_depth: config.max_depth.unwrap_or(DEFAULT_MAX_FLUENT_DEPTH),
            }
        }
        other => {
            report.error(location, format!("unknown chain pattern '{other}'"));
            return None;
        }
    };

    Some(RuleChain {
        id: Arc::from(raw.id.as_str()),
        name: raw.name.clone().unwrap_or_else(|| raw.id.clone()),
        spec,
    })
}

fn convert_selection(
    raw: Option<&RawRuleSelection>,
    location: &str,
    report: &mut ValidationReport,
) -> Option<RuleSelection> {
    let Some(raw) = raw else {
        return Some(RuleSelection::All);
    };
    match raw.strategy.as_str() {
        "all" => Some(RuleSelection::All),
        "weight-threshold" => {
            let threshold = raw.threshold.as_ref().and_then(decimal_from_number);
            match threshold {
                Some(threshold) => Some(RuleSelection::WeightThreshold(threshold)),
                None => {
                    report.error(location, "weight-threshold selection requires numeric 'threshold'");
                    None
                }
            }
        }
        "top-weighted" => match raw.max_rules {
            Some(max_rules) => Some(RuleSelection::TopWeighted(max_rules)),
            None => {
                report.error(location, "top-weighted selection requires 'max-rules'");
                None
            }
        },
        "priority-based" => {
            let priority = raw.min_priority.as_deref().and_then(RulePriority::parse);
            match priority {
                Some(priority) => Some(RuleSelection::PriorityBased(priority)),
                None => {
                    report.error(location, "priority-based selection requires 'min-priority'");
                    None
                }
            }
        }
        "dynamic-threshold" => match &raw.threshold_expression {
            Some(expression) => Some(RuleSelection::DynamicThreshold(expression.clone())),
            None => {
                report.error(
                    location,
                    "dynamic-threshold selection requires 'threshold-expression'",
                );
                None
            }
        },
        other => {
            report.error(location, format!("unknown selection strategy '{other}'"));
            None
        }
    }
}

fn convert_fluent(raw: &RawFluentNode) -> FluentNode {
    FluentNode {
        rule: ChainRule {
            id: Arc::from(raw.id.as_str()),
            condition: raw.condition.clone(),
            message: raw.message.clone(),
        },
        on_success: raw
            .on_success
            .as_ref()
            .map(|child| Box::new(convert_fluent(&child.rule))),
        on_failure: raw
            .on_failure
            .as_ref()
            .map(|child| Box::new(convert_fluent(&child.rule))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert(yaml: &str) -> (Option<Document>, ValidationReport) {
        let raw: RawDocument = serde_yaml::from_str(yaml).expect("yaml parses");
        let mut report = ValidationReport::new();
        let doc = raw.convert("test.yaml", Utc::now(), &mut report);
        (doc, report)
    }

    #[test]
    fn minimal_rule_config_document() {
        let (doc, report) = convert(
            r##"
metadata:
  name: sample
  version: 1.0.0
  type: rule-config
rules:
  - id: high-value
    condition: "#amount > 100000"
    message: high value transaction
    severity: WARNING
"##,
        );
        assert!(!report.has_errors(), "{report}");
        let doc = doc.unwrap();
        assert_eq!(doc.rules.len(), 1);
        let rule = &doc.rules[0];
        assert_eq!(rule.severity, Severity::Warning);
        assert_eq!(rule.priority, DEFAULT_RULE_PRIORITY);
        assert_eq!(rule.metadata.created_at, rule.metadata.modified_at);
    }

    #[test]
    fn missing_metadata_fields_are_fatal() {
        let (doc, report) = convert("metadata:\n  name: x\n");
        assert!(doc.is_none());
        assert!(report.has_errors());
    }

    #[test]
    fn bad_semver_is_fatal() {
        let (doc, report) = convert(
            "metadata:\n  name: x\n  version: one\n  type: rule-config\n",
        );
        assert!(doc.is_none());
        assert!(report.has_errors());
    }

    #[test]
    fn scenario_requires_business_domain() {
        let (doc, report) = convert(
            "metadata:\n  name: x\n  version: 1.0.0\n  type: scenario\n",
        );
        assert!(doc.is_none());
        assert!(report.to_string().contains("business-domain"));
    }

    #[test]
    fn duplicate_sequence_numbers_rejected() {
        let (_, report) = convert(
            r##"
metadata:
  name: x
  version: 1.0.0
  type: rule-config
rule-groups:
  - id: g
    operator: OR
    rule-references:
      - rule-id: a
        sequence: 1
      - rule-id: b
        sequence: 1
"##,
        );
        assert!(report.has_errors());
        assert!(report.to_string().contains("sequence 1"));
    }

    #[test]
    fn group_rule_ids_shorthand_orders_by_position() {
        let (doc, report) = convert(
            r##"
metadata:
  name: x
  version: 1.0.0
  type: rule-config
rule-groups:
  - id: g
    operator: OR
    rule-ids: [b, a]
"##,
        );
        assert!(!report.has_errors(), "{report}");
        let group = &doc.unwrap().groups[0];
        let order: Vec<_> = group.members.iter().map(|m| m.target.id().to_string()).collect();
        assert_eq!(order, vec!["b", "a"]);
        assert!(group.short_circuit);
        assert!(!group.parallel);
    }

    #[test]
    fn lookup_enrichment_with_inline_dataset() {
        let (doc, report) = convert(
            r##"
metadata:
  name: x
  version: 1.0.0
  type: rule-config
enrichments:
  - id: product-lookup
    type: lookup
    condition: "#productCode != null"
    lookup-config:
      lookup-key: "#productCode"
      lookup-dataset:
        type: inline
        key-field: code
        cache-ttl-seconds: 60
        default-values:
          productName: UNKNOWN
        data:
          - code: P1
            productName: Widget
      field-mappings:
        - source-field: productName
          target-field: productName
"##,
        );
        assert!(!report.has_errors(), "{report}");
        let enrichment = &doc.unwrap().enrichments[0];
        match &enrichment.kind {
            EnrichmentKind::Lookup(spec) => {
                assert_eq!(spec.cache_ttl_seconds, 60);
                assert!(spec.cache_enabled);
                assert_eq!(spec.default_values.get("productName"), Some(&Value::string("UNKNOWN")));
                assert!(matches!(spec.dataset, DatasetRef::Inline(_)));
            }
            other => panic!("expected lookup, got {other:?}"),
        }
    }

    #[test]
    fn workflow_stage_with_both_shapes_rejected() {
        let (_, report) = convert(
            r##"
metadata:
  name: x
  version: 1.0.0
  type: rule-config
rule-chains:
  - id: wf
    pattern: complex-workflow
    configuration:
      stages:
        - id: s1
          rules:
            - id: r1
              condition: "true"
          conditional-execution:
            condition: "true"
            on-true:
              rules: []
"##,
        );
        assert!(report.has_errors());
        assert!(report.to_string().contains("exactly one"));
    }

    #[test]
    fn accumulative_chain_weights_parse_exactly() {
        let (doc, report) = convert(
            r##"
metadata:
  name: x
  version: 1.0.0
  type: rule-config
rule-chains:
  - id: score
    pattern: accumulative
    configuration:
      accumulator-variable: totalScore
      initial-value: 0
      accumulation-rules:
        - id: credit-history
          condition: "#creditScore >= 700 ? 30 : 15"
          weight: 0.9
          priority: HIGH
      rule-selection:
        strategy: weight-threshold
        threshold: 0.7
      final-decision-rule: "#totalScore >= 40 ? 'APPROVED' : 'DENIED'"
"##,
        );
        assert!(!report.has_errors(), "{report}");
        let chain = &doc.unwrap().chains[0];
        match &chain.spec {
            ChainSpec::Accumulative { rules, selection, .. } => {
                assert_eq!(rules[0].weight, Decimal::from_str("0.9").unwrap());
                match selection {
                    RuleSelection::WeightThreshold(t) => {
                        assert_eq!(*t, Decimal::from_str("0.7").unwrap());
                    }
                    other => panic!("expected weight-threshold, got {other:?}"),
                }
            }
            other => panic!("expected accumulative, got {other:?}"),
        }
    }

    #[test]
    fn fluent_builder_tree_converts_recursively() {
        let (doc, report) = convert(
            r##"
metadata:
  name: x
  version: 1.0.0
  type: rule-config
rule-chains:
  - id: tree
    pattern: fluent-builder
    configuration:
      root-rule:
        id: customer-type-check
        condition: "#customerType == 'VIP'"
        on-success:
          rule:
            id: high-value-check
            condition: "#transactionAmount > 100000"
"##,
        );
        assert!(!report.has_errors(), "{report}");
        let chain = &doc.unwrap().chains[0];
        match &chain.spec {
            ChainSpec::FluentBuilder { root, max_depth } => {
                assert_eq!(*max_depth, DEFAULT_MAX_FLUENT_DEPTH);
                assert_eq!(root.depth(), 2);
            }
            other => panic!("expected fluent-builder, got {other:?}"),
        }
    }
}
