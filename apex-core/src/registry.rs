//! Immutable in-memory catalog of loaded configuration objects

use crate::error::{ApexError, Result};
use crate::model::{DataSourceRef, Dataset, Enrichment, Rule, RuleChain, RuleGroup, Scenario};
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;

/// The immutable catalog built by a successful load/merge.
///
/// All stored objects are shared by reference; a registry is never mutated
/// after construction. Reload builds a fresh registry and swaps it in
/// atomically via [`RegistryHandle`].
#[derive(Default, Debug)]
pub struct Registry {
    rules: HashMap<Arc<str>, Arc<Rule>>,
    groups: HashMap<Arc<str>, Arc<RuleGroup>>,
    enrichments: HashMap<Arc<str>, Arc<Enrichment>>,
    chains: HashMap<Arc<str>, Arc<RuleChain>>,
    scenarios: HashMap<Arc<str>, Arc<Scenario>>,
    scenario_order: Vec<Arc<str>>,
    datasets: HashMap<Arc<str>, Arc<Dataset>>,
    data_sources: HashMap<Arc<str>, Arc<DataSourceRef>>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn duplicate(entity: &'static str, id: &Arc<str>) -> ApexError {
        ApexError::Validation(format!("duplicate {entity} id '{id}'"))
    }

    /// Register a rule; duplicate ids fail the merge.
    pub fn add_rule(&mut self, rule: Rule) -> Result<()> {
        let id = rule.id.clone();
        if self.rules.insert(id.clone(), Arc::new(rule)).is_some() {
            return Err(Self::duplicate("rule", &id));
        }
        Ok(())
    }

    /// Register a rule group.
    pub fn add_group(&mut self, group: RuleGroup) -> Result<()> {
        let id = group.id.clone();
        if self.groups.insert(id.clone(), Arc::new(group)).is_some() {
            return Err(Self::duplicate("rule-group", &id));
        }
        Ok(())
    }

    /// Register an enrichment.
    pub fn add_enrichment(&mut self, enrichment: Enrichment) -> Result<()> {
        let id = enrichment.id.clone();
        if self.enrichments.insert(id.clone(), Arc::new(enrichment)).is_some() {
            return Err(Self::duplicate("enrichment", &id));
        }
        Ok(())
    }

    /// Register a rule chain.
    pub fn add_chain(&mut self, chain: RuleChain) -> Result<()> {
        let id = chain.id.clone();
        if self.chains.insert(id.clone(), Arc::new(chain)).is_some() {
            return Err(Self::duplicate("rule-chain", &id));
        }
        Ok(())
    }

    /// Register a scenario; declaration order is preserved for dispatch.
    pub fn add_scenario(&mut self, scenario: Scenario) -> Result<()> {
        let id = scenario.id.clone();
        if self.scenarios.insert(id.clone(), Arc::new(scenario)).is_some() {
            return Err(Self::duplicate("scenario", &id));
        }
        self.scenario_order.push(id);
        Ok(())
    }

    /// Register a named dataset.
    pub fn add_dataset(&mut self, id: Arc<str>, dataset: Dataset) -> Result<()> {
        if self.datasets.insert(id.clone(), Arc::new(dataset)).is_some() {
            return Err(Self::duplicate("dataset", &id));
        }
        Ok(())
    }

    /// Register a logical data-source reference.
    pub fn add_data_source(&mut self, data_source: DataSourceRef) -> Result<()> {
        let name = data_source.name.clone();
        if self.data_sources.insert(name.clone(), Arc::new(data_source)).is_some() {
            return Err(Self::duplicate("data-source", &name));
        }
        Ok(())
    }

    /// Rule by id.
    pub fn rule(&self, id: &str) -> Option<&Arc<Rule>> {
        self.rules.get(id)
    }

    /// Group by id.
    pub fn group(&self, id: &str) -> Option<&Arc<RuleGroup>> {
        self.groups.get(id)
    }

    /// Enrichment by id.
    pub fn enrichment(&self, id: &str) -> Option<&Arc<Enrichment>> {
        self.enrichments.get(id)
    }

    /// Chain by id.
    pub fn chain(&self, id: &str) -> Option<&Arc<RuleChain>> {
        self.chains.get(id)
    }

    /// Scenario by id.
    pub fn scenario(&self, id: &str) -> Option<&Arc<Scenario>> {
        self.scenarios.get(id)
    }

    /// Dataset by id.
    pub fn dataset(&self, id: &str) -> Option<&Arc<Dataset>> {
        self.datasets.get(id)
    }

    /// Data-source reference by logical name.
    pub fn data_source(&self, name: &str) -> Option<&Arc<DataSourceRef>> {
        self.data_sources.get(name)
    }

    /// All rules, unordered.
    pub fn rules(&self) -> impl Iterator<Item = &Arc<Rule>> {
        self.rules.values()
    }

    /// All groups, unordered.
    pub fn groups(&self) -> impl Iterator<Item = &Arc<RuleGroup>> {
        self.groups.values()
    }

    /// All enrichments, unordered.
    pub fn enrichments(&self) -> impl Iterator<Item = &Arc<Enrichment>> {
        self.enrichments.values()
    }

    /// All chains, unordered.
    pub fn chains(&self) -> impl Iterator<Item = &Arc<RuleChain>> {
        self.chains.values()
    }

    /// All datasets, unordered.
    pub fn datasets(&self) -> impl Iterator<Item = (&Arc<str>, &Arc<Dataset>)> {
        self.datasets.iter()
    }

    /// All data-source references, unordered.
    pub fn data_sources(&self) -> impl Iterator<Item = &Arc<DataSourceRef>> {
        self.data_sources.values()
    }

    /// Scenarios in declaration order.
    pub fn scenarios_in_order(&self) -> impl Iterator<Item = &Arc<Scenario>> {
        self.scenario_order.iter().filter_map(|id| self.scenarios.get(id))
    }

    /// Rules carrying a category tag.
    pub fn rules_in_category(&self, category: &str) -> Vec<Arc<Rule>> {
        let mut rules: Vec<Arc<Rule>> = self
            .rules
            .values()
            .filter(|r| r.categories.contains(category))
            .cloned()
            .collect();
        rules.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        rules
    }

    /// Total entity count, used by reload logging.
    pub fn len(&self) -> usize {
        self.rules.len()
            + self.groups.len()
            + self.enrichments.len()
            + self.chains.len()
            + self.scenarios.len()
            + self.datasets.len()
            + self.data_sources.len()
    }

    /// Whether the registry holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lock-free shared handle over the current registry snapshot.
///
/// Readers load a snapshot and keep it for the whole evaluation; reload
/// replaces the snapshot atomically, so in-flight evaluations finish against
/// the registry they started with.
pub struct RegistryHandle {
    current: ArcSwap<Registry>,
}

impl RegistryHandle {
    /// Handle over an initial registry.
    pub fn new(registry: Registry) -> Self {
        RegistryHandle {
            current: ArcSwap::new(Arc::new(registry)),
        }
    }

    /// Load the current snapshot.
    pub fn snapshot(&self) -> Arc<Registry> {
        self.current.load_full()
    }

    /// Atomically replace the registry.
    pub fn replace(&self, registry: Registry) {
        let next = Arc::new(registry);
        tracing::info!(entities = next.len(), "replacing registry snapshot");
        self.current.store(next);
    }
}
