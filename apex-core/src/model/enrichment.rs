//! Enrichment model: lookup, field, calculation, conditional-mapping

use crate::model::rule::{GroupOperator, RuleMetadata};
use crate::types::Value;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A dataset materialized as rows keyed by a field.
#[derive(Debug, Clone, Serialize)]
pub struct Dataset {
    /// Rows as field-name to value mappings
    pub rows: Vec<BTreeMap<String, Value>>,
    /// Field whose value identifies a row
    pub key_field: String,
}

impl Dataset {
    /// Find the first row whose key field loosely equals `key`.
    pub fn find(&self, key: &Value) -> Option<&BTreeMap<String, Value>> {
        self.rows
            .iter()
            .find(|row| row.get(&self.key_field).map(|v| v.loose_eq(key)).unwrap_or(false))
    }
}

/// Logical name to external-config reference for a data source.
#[derive(Debug, Clone, Serialize)]
pub struct DataSourceRef {
    /// Logical name used by lookup specs
    pub name: Arc<str>,
    /// External configuration file the name resolves to
    pub config_file: String,
}

/// Where a lookup's rows come from.
#[derive(Debug, Clone, Serialize)]
pub enum DatasetRef {
    /// Rows embedded in the configuration document
    Inline(Dataset),
    /// Rows loaded once from an external YAML file
    ExternalFile {
        /// Path to the dataset document
        path: String,
        /// Key field within the loaded rows
        key_field: String,
    },
    /// Rows fetched through a data-source adapter
    DataSource {
        /// Logical data-source name
        name: Arc<str>,
        /// Named operation on the adapter
        query_ref: String,
    },
}

/// Source side of a field mapping: a plain row/fact key, or an expression
/// when the document value starts with `#`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SourceField {
    /// Simple key lookup on the row, falling back to the fact map
    Name(String),
    /// Expression evaluated against the fact context
    Expression(String),
}

impl SourceField {
    /// Classify a document value by its `#` prefix.
    pub fn parse(raw: &str) -> SourceField {
        if raw.starts_with('#') {
            SourceField::Expression(raw.to_string())
        } else {
            SourceField::Name(raw.to_string())
        }
    }
}

/// One source-to-target field mapping with an optional transformation.
#[derive(Debug, Clone, Serialize)]
pub struct FieldMapping {
    /// Where the pre-transform value comes from
    pub source: SourceField,
    /// Fact key the result is written to
    pub target_field: String,
    /// Transformation evaluated with `#value` bound to the source value
    pub transformation: Option<String>,
}

/// Declarative lookup configuration.
#[derive(Debug, Clone, Serialize)]
pub struct LookupSpec {
    /// Expression producing the lookup key
    pub lookup_key: String,
    /// Dataset the key is resolved against
    pub dataset: DatasetRef,
    /// Cache toggle
    pub cache_enabled: bool,
    /// Cache TTL in seconds
    pub cache_ttl_seconds: u64,
    /// Values overlaid when the row is missing a field (or the row is absent)
    pub default_values: BTreeMap<String, Value>,
    /// Mappings applied when a row is found
    pub field_mappings: Vec<FieldMapping>,
}

/// Field enrichment: a list of mappings over the fact map itself.
#[derive(Debug, Clone, Serialize)]
pub struct FieldSpec {
    /// Mappings applied in order
    pub field_mappings: Vec<FieldMapping>,
}

/// Calculation enrichment: one expression into one result field.
#[derive(Debug, Clone, Serialize)]
pub struct CalculationSpec {
    /// Expression evaluated against the fact context
    pub expression: String,
    /// Fact key the result is written to
    pub result_field: String,
}

/// Combined condition over sub-conditions.
#[derive(Debug, Clone, Serialize)]
pub struct ConditionSet {
    /// AND/OR combinator over the sub-conditions
    pub operator: GroupOperator,
    /// Sub-condition expressions
    pub conditions: Vec<String>,
}

/// One prioritized mapping rule inside a conditional mapping.
#[derive(Debug, Clone, Serialize)]
pub struct MappingRule {
    /// Rule id, recorded when matched
    pub id: Arc<str>,
    /// Ascending application order
    pub priority: i32,
    /// Conditions gating the mapping
    pub conditions: ConditionSet,
    /// Transformation producing the target value
    pub transformation: String,
}

/// Conditional-mapping enrichment: prioritized rules into one target field.
#[derive(Debug, Clone, Serialize)]
pub struct ConditionalMappingSpec {
    /// Fact key written by matching rules
    pub target_field: String,
    /// Rules, applied in ascending priority
    pub mapping_rules: Vec<MappingRule>,
    /// Stop after the first matching rule
    pub stop_on_first_match: bool,
    /// Log the id of each matched rule
    pub log_matched_rule: bool,
}

/// Type-specific payload of an enrichment.
#[derive(Debug, Clone, Serialize)]
pub enum EnrichmentKind {
    /// Row lookup with field mappings
    Lookup(LookupSpec),
    /// Direct field mappings
    Field(FieldSpec),
    /// Single calculated field
    Calculation(CalculationSpec),
    /// Prioritized conditional mapping
    ConditionalMapping(ConditionalMappingSpec),
}

impl EnrichmentKind {
    /// The YAML `type` spelling.
    pub fn type_name(&self) -> &'static str {
        match self {
            EnrichmentKind::Lookup(_) => "lookup",
            EnrichmentKind::Field(_) => "field",
            EnrichmentKind::Calculation(_) => "calculation",
            EnrichmentKind::ConditionalMapping(_) => "conditional-mapping",
        }
    }
}

/// A declarative operation that extends a fact map.
#[derive(Debug, Clone, Serialize)]
pub struct Enrichment {
    /// Unique id within the registry
    pub id: Arc<str>,
    /// Type-specific payload
    pub kind: EnrichmentKind,
    /// Optional gating condition
    pub condition: Option<String>,
    /// Disabled enrichments are skipped
    pub enabled: bool,
    /// Enrichment ids that must run first in the same evaluation
    pub depends_on: Vec<Arc<str>>,
    /// Audit metadata
    pub metadata: RuleMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_field_classification() {
        assert_eq!(
            SourceField::parse("#row.price * 2"),
            SourceField::Expression("#row.price * 2".to_string())
        );
        assert_eq!(SourceField::parse("price"), SourceField::Name("price".to_string()));
    }

    #[test]
    fn dataset_find_uses_loose_equality() {
        let mut row = BTreeMap::new();
        row.insert("code".to_string(), Value::Int(7));
        row.insert("name".to_string(), Value::string("seven"));
        let dataset = Dataset {
            rows: vec![row],
            key_field: "code".to_string(),
        };
        let found = dataset.find(&Value::Decimal(rust_decimal::Decimal::from(7)));
        assert!(found.is_some());
        assert!(dataset.find(&Value::Int(8)).is_none());
    }
}
