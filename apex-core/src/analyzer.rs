//! Dependency analysis over the reference graph of a merged registry
//!
//! Edges covered: file -> file (external-data-source references),
//! group -> rule, group -> group, enrichment -> enrichment, rule -> rule
//! (depends-on), and workflow stage -> stage. Missing references and cycles
//! are fatal before execution.

use crate::error::{ApexError, Result};
use crate::model::{ChainSpec, DatasetRef, EnrichmentKind, MemberTarget};
use crate::registry::Registry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A reference whose target does not exist in the registry.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MissingReference {
    /// Node holding the reference
    pub from: String,
    /// Referenced id that could not be resolved
    pub to: String,
}

/// Result of analyzing a registry's reference graph.
#[derive(Debug, Clone, Default)]
pub struct AnalysisReport {
    /// Unresolvable references
    pub missing: Vec<MissingReference>,
    /// Each cycle as the node labels along it
    pub cycles: Vec<Vec<String>>,
}

impl AnalysisReport {
    /// Whether the registry is safe to execute.
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.cycles.is_empty()
    }

    /// Render the findings as an indented text report.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("dependency analysis\n");
        out.push_str(&format!("├─ missing references: {}\n", self.missing.len()));
        for missing in &self.missing {
            out.push_str(&format!("│  ├─ {} -> {}\n", missing.from, missing.to));
        }
        out.push_str(&format!("└─ cycles: {}\n", self.cycles.len()));
        for cycle in &self.cycles {
            out.push_str(&format!("   ├─ {}\n", cycle.join(" -> ")));
        }
        out
    }
}

/// Directed graph keyed by string labels.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: BTreeSet<String>,
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node without edges.
    pub fn add_node(&mut self, node: impl Into<String>) {
        self.nodes.insert(node.into());
    }

    /// Add a directed edge, creating both nodes.
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) {
        let from = from.into();
        let to = to.into();
        self.nodes.insert(from.clone());
        self.nodes.insert(to.clone());
        self.edges.entry(from).or_default().insert(to);
    }

    /// All cycles reachable in the graph, one representative path each.
    pub fn cycles(&self) -> Vec<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }
        let mut color: BTreeMap<&str, Color> =
            self.nodes.iter().map(|n| (n.as_str(), Color::White)).collect();
        let mut cycles = Vec::new();

        fn visit<'g>(
            node: &'g str,
            graph: &'g DependencyGraph,
            color: &mut BTreeMap<&'g str, Color>,
            path: &mut Vec<&'g str>,
            cycles: &mut Vec<Vec<String>>,
        ) {
            color.insert(node, Color::Gray);
            path.push(node);
            if let Some(neighbors) = graph.edges.get(node) {
                for next in neighbors {
                    match color.get(next.as_str()).copied().unwrap_or(Color::White) {
                        Color::White => visit(next, graph, color, path, cycles),
                        Color::Gray => {
                            if let Some(start) = path.iter().position(|n| *n == next.as_str()) {
                                let mut cycle: Vec<String> =
                                    path[start..].iter().map(|s| s.to_string()).collect();
                                cycle.push(next.to_string());
                                cycles.push(cycle);
                            }
                        }
                        Color::Black => {}
                    }
                }
            }
            path.pop();
            color.insert(node, Color::Black);
        }

        let nodes: Vec<&str> = self.nodes.iter().map(String::as_str).collect();
        for node in nodes {
            if color.get(node).copied() == Some(Color::White) {
                let mut path = Vec::new();
                visit(node, self, &mut color, &mut path, &mut cycles);
            }
        }
        cycles
    }
}

/// Stable topological order: among unconstrained nodes, declaration order
/// wins. Errors when the edges contain a cycle.
pub fn topological_order(
    nodes: &[Arc<str>],
    depends_on: &BTreeMap<Arc<str>, Vec<Arc<str>>>,
) -> Result<Vec<Arc<str>>> {
    let mut remaining: Vec<Arc<str>> = nodes.to_vec();
    let mut done: BTreeSet<Arc<str>> = BTreeSet::new();
    let mut order = Vec::with_capacity(nodes.len());

    while !remaining.is_empty() {
        let position = remaining.iter().position(|node| {
            depends_on
                .get(node)
                .map(|deps| deps.iter().all(|d| done.contains(d)))
                .unwrap_or(true)
        });
        match position {
            Some(index) => {
                let node = remaining.remove(index);
                done.insert(node.clone());
                order.push(node);
            }
            None => {
                let stuck: Vec<String> = remaining.iter().map(|n| n.to_string()).collect();
                return Err(ApexError::Dependency(format!(
                    "cycle among: {}",
                    stuck.join(", ")
                )));
            }
        }
    }
    Ok(order)
}

/// Build the full reference graph for a registry and check it.
pub fn analyze(registry: &Registry) -> AnalysisReport {
    let mut graph = DependencyGraph::new();
    let mut missing = Vec::new();

    for rule in registry.rules() {
        let label = format!("rule:{}", rule.id);
        graph.add_node(label.clone());
        for dep in &rule.depends_on {
            if registry.rule(dep).is_none() {
                missing.push(MissingReference {
                    from: label.clone(),
                    to: format!("rule:{dep}"),
                });
            } else {
                graph.add_edge(label.clone(), format!("rule:{dep}"));
            }
        }
    }

    for group in registry.groups() {
        let label = format!("group:{}", group.id);
        graph.add_node(label.clone());
        for member in &group.members {
            match &member.target {
                MemberTarget::Rule(id) => {
                    if registry.rule(id).is_none() {
                        missing.push(MissingReference {
                            from: label.clone(),
                            to: format!("rule:{id}"),
                        });
                    } else {
                        graph.add_edge(label.clone(), format!("rule:{id}"));
                    }
                }
                MemberTarget::Group(id) => {
                    if registry.group(id).is_none() {
                        missing.push(MissingReference {
                            from: label.clone(),
                            to: format!("group:{id}"),
                        });
                    } else {
                        graph.add_edge(label.clone(), format!("group:{id}"));
                    }
                }
            }
        }
    }

    for enrichment in registry.enrichments() {
        let label = format!("enrichment:{}", enrichment.id);
        graph.add_node(label.clone());
        for dep in &enrichment.depends_on {
            if registry.enrichment(dep).is_none() {
                missing.push(MissingReference {
                    from: label.clone(),
                    to: format!("enrichment:{dep}"),
                });
            } else {
                graph.add_edge(label.clone(), format!("enrichment:{dep}"));
            }
        }
        if let EnrichmentKind::Lookup(spec) = &enrichment.kind {
            if let DatasetRef::DataSource { name, .. } = &spec.dataset {
                if registry.data_source(name).is_none() {
                    missing.push(MissingReference {
                        from: label.clone(),
                        to: format!("data-source:{name}"),
                    });
                }
            }
        }
    }

    for chain in registry.chains() {
        if let ChainSpec::ComplexWorkflow { stages } = &chain.spec {
            let stage_ids: BTreeSet<&str> = stages.iter().map(|s| s.id.as_ref()).collect();
            for stage in stages {
                let label = format!("stage:{}/{}", chain.id, stage.id);
                graph.add_node(label.clone());
                for dep in &stage.depends_on {
                    if !stage_ids.contains(dep.as_ref()) {
                        missing.push(MissingReference {
                            from: label.clone(),
                            to: format!("stage:{}/{dep}", chain.id),
                        });
                    } else {
                        graph.add_edge(label.clone(), format!("stage:{}/{dep}", chain.id));
                    }
                }
            }
        }
    }

    for scenario in registry.scenarios_in_order() {
        let label = format!("scenario:{}", scenario.id);
        graph.add_node(label.clone());
        for id in &scenario.rule_ids {
            if registry.rule(id).is_none() {
                missing.push(MissingReference {
                    from: label.clone(),
                    to: format!("rule:{id}"),
                });
            }
        }
        for id in &scenario.group_ids {
            if registry.group(id).is_none() {
                missing.push(MissingReference {
                    from: label.clone(),
                    to: format!("group:{id}"),
                });
            }
        }
        for id in &scenario.enrichment_ids {
            if registry.enrichment(id).is_none() {
                missing.push(MissingReference {
                    from: label.clone(),
                    to: format!("enrichment:{id}"),
                });
            }
        }
    }

    AnalysisReport {
        missing,
        cycles: graph.cycles(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RuleMetadata, Severity};
    use chrono::Utc;
    use std::collections::BTreeSet as Set;

    fn rule_with_deps(id: &str, deps: &[&str]) -> crate::model::Rule {
        crate::model::Rule {
            id: Arc::from(id),
            name: id.to_string(),
            condition: "true".to_string(),
            message: String::new(),
            severity: Severity::Info,
            priority: 100,
            categories: Set::new(),
            depends_on: deps.iter().map(|d| Arc::from(*d)).collect(),
            metadata: RuleMetadata::stamped(Utc::now()),
        }
    }

    #[test]
    fn detects_missing_rule_reference() {
        let mut registry = Registry::new();
        registry.add_rule(rule_with_deps("a", &["ghost"])).unwrap();
        let report = analyze(&registry);
        assert!(!report.is_clean());
        assert_eq!(report.missing[0].to, "rule:ghost");
    }

    #[test]
    fn detects_dependency_cycle() {
        let mut registry = Registry::new();
        registry.add_rule(rule_with_deps("a", &["b"])).unwrap();
        registry.add_rule(rule_with_deps("b", &["a"])).unwrap();
        let report = analyze(&registry);
        assert_eq!(report.cycles.len(), 1);
        assert!(report.render().contains("cycles: 1"));
    }

    #[test]
    fn clean_registry_reports_clean() {
        let mut registry = Registry::new();
        registry.add_rule(rule_with_deps("a", &[])).unwrap();
        registry.add_rule(rule_with_deps("b", &["a"])).unwrap();
        let report = analyze(&registry);
        assert!(report.is_clean());
    }

    #[test]
    fn topological_order_is_stable_by_declaration() {
        let nodes: Vec<Arc<str>> = ["c", "a", "b"].iter().map(|s| Arc::from(*s)).collect();
        let mut deps: BTreeMap<Arc<str>, Vec<Arc<str>>> = BTreeMap::new();
        deps.insert(Arc::from("b"), vec![Arc::from("c")]);
        let order = topological_order(&nodes, &deps).unwrap();
        let order: Vec<&str> = order.iter().map(|n| n.as_ref()).collect();
        // c and a are unconstrained; declaration order keeps c first.
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn topological_order_rejects_cycles() {
        let nodes: Vec<Arc<str>> = ["a", "b"].iter().map(|s| Arc::from(*s)).collect();
        let mut deps: BTreeMap<Arc<str>, Vec<Arc<str>>> = BTreeMap::new();
        deps.insert(Arc::from("a"), vec![Arc::from("b")]);
        deps.insert(Arc::from("b"), vec![Arc::from("a")]);
        assert!(matches!(
            topological_order(&nodes, &deps),
            Err(ApexError::Dependency(_))
        ));
    }
}
