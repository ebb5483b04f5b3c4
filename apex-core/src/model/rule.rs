//! Rules, rule groups, and their metadata

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Severity of a rule outcome; ordering is INFO < WARNING < ERROR so `max`
/// yields the aggregation the group executor needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, serde::Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Informational outcome
    #[default]
    Info,
    /// Non-fatal problem
    Warning,
    /// Fatal problem
    Error,
}

impl Severity {
    /// Parse the YAML spelling; unknown spellings are rejected upstream.
    pub fn parse(s: &str) -> Option<Severity> {
        match s.to_ascii_uppercase().as_str() {
            "ERROR" => Some(Severity::Error),
            "WARNING" => Some(Severity::Warning),
            "INFO" => Some(Severity::Info),
            _ => None,
        }
    }
}

/// Audit metadata carried by every rule and enrichment.
///
/// `created_at` and `modified_at` are always present; the loader stamps them
/// from the engine clock when the document does not supply them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleMetadata {
    /// Owning team or person
    pub owner: Option<String>,
    /// Business domain
    pub domain: Option<String>,
    /// Free-form tags
    pub tags: Vec<String>,
    /// Date the rule becomes effective
    pub effective_date: Option<DateTime<Utc>>,
    /// Date the rule expires
    pub expiration_date: Option<DateTime<Utc>>,
    /// Creation timestamp, never null
    pub created_at: DateTime<Utc>,
    /// Last-modified timestamp, never null
    pub modified_at: DateTime<Utc>,
}

impl RuleMetadata {
    /// Metadata with both audit timestamps stamped to `now`.
    pub fn stamped(now: DateTime<Utc>) -> Self {
        RuleMetadata {
            owner: None,
            domain: None,
            tags: Vec::new(),
            effective_date: None,
            expiration_date: None,
            created_at: now,
            modified_at: now,
        }
    }
}

/// A named boolean expression with metadata and severity.
#[derive(Debug, Clone, Serialize)]
pub struct Rule {
    /// Unique id within the registry
    pub id: Arc<str>,
    /// Display name
    pub name: String,
    /// Condition expression source
    pub condition: String,
    /// Message attached to a triggered result
    pub message: String,
    /// Outcome severity
    pub severity: Severity,
    /// Ordering priority, lower runs first
    pub priority: i32,
    /// Category tags; order irrelevant
    pub categories: BTreeSet<String>,
    /// Ids of rules this rule depends on
    pub depends_on: Vec<Arc<str>>,
    /// Audit metadata
    pub metadata: RuleMetadata,
}

/// Default rule priority when a document omits it.
pub const DEFAULT_RULE_PRIORITY: i32 = 100;

/// AND/OR combinator for groups and condition sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GroupOperator {
    /// All members must trigger
    And,
    /// Any member may trigger
    Or,
}

impl GroupOperator {
    /// Parse the YAML spelling.
    pub fn parse(s: &str) -> Option<GroupOperator> {
        match s.to_ascii_uppercase().as_str() {
            "AND" => Some(GroupOperator::And),
            "OR" => Some(GroupOperator::Or),
            _ => None,
        }
    }
}

/// What a group member points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MemberTarget {
    /// A rule id
    Rule(Arc<str>),
    /// A nested group id
    Group(Arc<str>),
}

impl MemberTarget {
    /// The referenced id regardless of kind.
    pub fn id(&self) -> &Arc<str> {
        match self {
            MemberTarget::Rule(id) | MemberTarget::Group(id) => id,
        }
    }
}

/// Ordered, toggleable reference from a group to a rule or nested group.
#[derive(Debug, Clone, Serialize)]
pub struct RuleReference {
    /// Referenced rule or group
    pub target: MemberTarget,
    /// Position within the group; ties are rejected at load time
    pub sequence: u32,
    /// Disabled members are skipped entirely
    pub enabled: bool,
    /// Priority override applied while executing inside this group
    pub override_priority: Option<i32>,
}

/// An ordered collection of rule references combined by AND or OR.
#[derive(Debug, Clone, Serialize)]
pub struct RuleGroup {
    /// Unique id within the registry
    pub id: Arc<str>,
    /// Display name
    pub name: String,
    /// AND/OR combinator
    pub operator: GroupOperator,
    /// Ordering priority
    pub priority: i32,
    /// Category tags
    pub categories: BTreeSet<String>,
    /// Members ordered by sequence number
    pub members: Vec<RuleReference>,
    /// Stop evaluating once the outcome is decided
    pub short_circuit: bool,
    /// Evaluate members on a worker pool
    pub parallel: bool,
    /// Record per-rule decisions and disable short-circuiting
    pub debug: bool,
    /// Abort the sequential pass on the first failing member
    pub stop_on_first_failure: bool,
    /// Per-group deadline override in milliseconds
    pub timeout_ms: Option<u64>,
}

impl RuleGroup {
    /// Members that are enabled, in sequence order.
    pub fn enabled_members(&self) -> impl Iterator<Item = &RuleReference> {
        self.members.iter().filter(|m| m.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_matches_aggregation() {
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
        assert_eq!(
            [Severity::Info, Severity::Error, Severity::Warning].iter().max(),
            Some(&Severity::Error)
        );
    }

    #[test]
    fn severity_parse_is_case_insensitive() {
        assert_eq!(Severity::parse("error"), Some(Severity::Error));
        assert_eq!(Severity::parse("WARNING"), Some(Severity::Warning));
        assert_eq!(Severity::parse("bogus"), None);
    }

    #[test]
    fn enabled_members_skips_disabled() {
        let member = |id: &str, enabled: bool, sequence: u32| RuleReference {
            target: MemberTarget::Rule(Arc::from(id)),
            sequence,
            enabled,
            override_priority: None,
        };
        let group = RuleGroup {
            id: Arc::from("g"),
            name: "g".to_string(),
            operator: GroupOperator::And,
            priority: 100,
            categories: BTreeSet::new(),
            members: vec![member("a", true, 1), member("b", false, 2), member("c", true, 3)],
            short_circuit: true,
            parallel: false,
            debug: false,
            stop_on_first_failure: false,
            timeout_ms: None,
        };
        let ids: Vec<_> = group.enabled_members().map(|m| m.target.id().to_string()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }
}
