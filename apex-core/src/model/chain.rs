//! Rule chains: six declarative execution patterns as a sum type

use crate::types::Value;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Default fluent-builder recursion bound.
pub const DEFAULT_MAX_FLUENT_DEPTH: usize = 20;

/// A rule embedded in a chain: condition plus optional message.
#[derive(Debug, Clone, Serialize)]
pub struct ChainRule {
    /// Rule id, recorded in execution paths and stage keys
    pub id: Arc<str>,
    /// Condition expression
    pub condition: String,
    /// Message carried on a triggered result
    pub message: Option<String>,
}

/// One stage of a sequential-dependency chain.
#[derive(Debug, Clone, Serialize)]
pub struct SequentialStage {
    /// Stage id, recorded in the execution path
    pub id: Arc<str>,
    /// Expression evaluated against the chained context
    pub expression: String,
    /// Variable the stage result is bound to
    pub output_variable: String,
}

/// Priority band of an accumulation rule; HIGH > MEDIUM > LOW.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RulePriority {
    /// Lowest band
    Low,
    /// Middle band
    Medium,
    /// Highest band
    High,
}

impl RulePriority {
    /// Parse the YAML spelling.
    pub fn parse(s: &str) -> Option<RulePriority> {
        match s.to_ascii_uppercase().as_str() {
            "HIGH" => Some(RulePriority::High),
            "MEDIUM" => Some(RulePriority::Medium),
            "LOW" => Some(RulePriority::Low),
            _ => None,
        }
    }
}

/// One weighted rule of an accumulative chain.
#[derive(Debug, Clone, Serialize)]
pub struct AccumulationRule {
    /// Rule id, recorded as selected or skipped
    pub id: Arc<str>,
    /// Numeric-returning condition expression
    pub condition: String,
    /// Score multiplier
    pub weight: Decimal,
    /// Priority band for priority-based selection
    pub priority: RulePriority,
}

/// How an accumulative chain selects contributing rules.
#[derive(Debug, Clone, Serialize)]
pub enum RuleSelection {
    /// Every rule contributes
    All,
    /// Rules with weight >= threshold
    WeightThreshold(Decimal),
    /// Top N rules by weight, declaration order breaking ties
    TopWeighted(usize),
    /// Rules with priority >= the minimum band
    PriorityBased(RulePriority),
    /// Threshold computed from the current context
    DynamicThreshold(String),
}

/// What to do when a workflow stage fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureAction {
    /// Stop the chain with a workflow-terminated outcome
    Terminate,
    /// Record the failure and keep executing satisfiable stages
    Continue,
}

/// Body of a workflow stage: a plain AND-grouped rule list, or a
/// conditional-execution branch.
#[derive(Debug, Clone, Serialize)]
pub enum StageExecution {
    /// All rules must pass
    Rules(Vec<ChainRule>),
    /// Branch on a condition, then AND-group the chosen side
    Conditional {
        /// Branch condition
        condition: String,
        /// Rules when the condition holds
        on_true: Vec<ChainRule>,
        /// Rules when it does not
        on_false: Vec<ChainRule>,
    },
}

/// One stage of a complex workflow.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowStage {
    /// Stage id, unique within the chain
    pub id: Arc<str>,
    /// Stage ids that must complete first
    pub depends_on: Vec<Arc<str>>,
    /// Stage body
    pub execution: StageExecution,
    /// Variable bound to the stage outcome in the chained context
    pub output_variable: Option<String>,
    /// Failure handling
    pub failure_action: FailureAction,
}

/// A node of a fluent decision tree.
#[derive(Debug, Clone, Serialize)]
pub struct FluentNode {
    /// Rule evaluated at this node
    pub rule: ChainRule,
    /// Branch taken when the rule triggers
    pub on_success: Option<Box<FluentNode>>,
    /// Branch taken when it does not
    pub on_failure: Option<Box<FluentNode>>,
}

/// Pattern-specific configuration, one variant per chain pattern.
#[derive(Debug, Clone, Serialize)]
pub enum ChainSpec {
    /// Trigger rule selecting one of two branches
    Conditional {
        /// Rule deciding the branch
        trigger: ChainRule,
        /// Branch when the trigger fires
        on_trigger: Vec<ChainRule>,
        /// Branch when it does not
        on_no_trigger: Vec<ChainRule>,
    },
    /// Ordered stages threading outputs forward
    Sequential {
        /// Stages in execution order
        stages: Vec<SequentialStage>,
    },
    /// Router expression dispatching to a keyed rule list
    Routing {
        /// Expression producing the route key
        router: String,
        /// Route key to rule list
        routes: BTreeMap<String, Vec<ChainRule>>,
        /// Fallback when no key matches
        default_route: Option<Vec<ChainRule>>,
    },
    /// Weighted score accumulation with rule selection
    Accumulative {
        /// Variable carrying the running total
        accumulator_variable: String,
        /// Starting total
        initial_value: Value,
        /// Weighted rules in declaration order
        rules: Vec<AccumulationRule>,
        /// Selection strategy
        selection: RuleSelection,
        /// Decision expression evaluated with the total bound
        final_decision_rule: String,
    },
    /// Stage DAG with per-stage failure policy
    ComplexWorkflow {
        /// Stages in declaration order
        stages: Vec<WorkflowStage>,
    },
    /// Recursive decision tree
    FluentBuilder {
        /// Tree root
        root: FluentNode,
        /// Recursion bound; exceeding it fails the chain
        max_depth: usize,
    },
}

impl ChainSpec {
    /// The YAML `pattern` spelling.
    pub fn pattern_name(&self) -> &'static str {
        match self {
            ChainSpec::Conditional { .. } => "conditional",
            ChainSpec::Sequential { .. } => "sequential",
            ChainSpec::Routing { .. } => "routing",
            ChainSpec::Accumulative { .. } => "accumulative",
            ChainSpec::ComplexWorkflow { .. } => "complex-workflow",
            ChainSpec::FluentBuilder { .. } => "fluent-builder",
        }
    }
}

/// One of the six declarative execution patterns over rules and expressions.
#[derive(Debug, Clone, Serialize)]
pub struct RuleChain {
    /// Unique id within the registry
    pub id: Arc<str>,
    /// Display name
    pub name: String,
    /// Pattern configuration
    pub spec: ChainSpec,
}

impl FluentNode {
    /// Depth of the deepest path below (and including) this node.
    pub fn depth(&self) -> usize {
        let success = self.on_success.as_ref().map(|n| n.depth()).unwrap_or(0);
        let failure = self.on_failure.as_ref().map(|n| n.depth()).unwrap_or(0);
        1 + success.max(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_priority_ordering() {
        assert!(RulePriority::High > RulePriority::Medium);
        assert!(RulePriority::Medium > RulePriority::Low);
    }

    #[test]
    fn fluent_depth_counts_longest_branch() {
        let leaf = |id: &str| FluentNode {
            rule: ChainRule {
                id: Arc::from(id),
                condition: "true".to_string(),
                message: None,
            },
            on_success: None,
            on_failure: None,
        };
        let mut root = leaf("root");
        let mut mid = leaf("mid");
        mid.on_success = Some(Box::new(leaf("deep")));
        root.on_success = Some(Box::new(mid));
        root.on_failure = Some(Box::new(leaf("shallow")));
        assert_eq!(root.depth(), 3);
    }
}
