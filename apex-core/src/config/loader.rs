//! Configuration loading, merging, and registry construction

use crate::analyzer;
use crate::clock::SharedClock;
use crate::config::document::{Document, RawDocument};
use crate::config::validate::ValidationReport;
use crate::error::{ApexError, Result};
use crate::expr;
use crate::model::{ChainSpec, EnrichmentKind, SourceField, StageExecution};
use crate::registry::Registry;
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Outcome of a checked load: the registry when the report is clean.
pub struct LoadOutcome {
    /// Built registry, absent when the report has errors
    pub registry: Option<Registry>,
    /// Everything found during the load
    pub report: ValidationReport,
}

/// Parses YAML documents and assembles merged registries.
pub struct Loader {
    clock: SharedClock,
}

impl Loader {
    /// Loader stamping audit metadata from `clock`.
    pub fn new(clock: SharedClock) -> Self {
        Loader { clock }
    }

    /// Parse one YAML file into a validated document.
    pub fn load_single(&self, path: impl AsRef<Path>) -> Result<Document> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        self.load_str(&path.display().to_string(), &content)
    }

    /// Parse one YAML string into a validated document.
    pub fn load_str(&self, name: &str, content: &str) -> Result<Document> {
        let mut report = ValidationReport::new();
        let document = self.parse_document(name, content, &mut report);
        match document {
            Some(document) if !report.has_errors() => Ok(document),
            _ => Err(ApexError::Validation(report.to_string())),
        }
    }

    /// Load and merge multiple file-system documents into one registry.
    ///
    /// Documents declaring `external-data-sources` are rejected here; those
    /// references are resolved only by [`Loader::load_classpath`].
    pub fn load_many<P: AsRef<Path>>(&self, paths: &[P]) -> Result<Registry> {
        let outcome = self.check_many(paths);
        match outcome.registry {
            Some(registry) => Ok(registry),
            None => Err(ApexError::Validation(outcome.report.to_string())),
        }
    }

    /// Like [`Loader::load_many`] but always returns the full report.
    pub fn check_many<P: AsRef<Path>>(&self, paths: &[P]) -> LoadOutcome {
        let mut report = ValidationReport::new();
        let mut documents = Vec::new();
        for path in paths {
            let path = path.as_ref();
            match std::fs::read_to_string(path) {
                Ok(content) => {
                    if let Some(doc) =
                        self.parse_document(&path.display().to_string(), &content, &mut report)
                    {
                        documents.push(doc);
                    }
                }
                Err(e) => report.error(path.display().to_string(), format!("unreadable: {e}")),
            }
        }
        for document in &documents {
            if !document.external_refs.is_empty() {
                report.error(
                    &document.path,
                    "external-data-sources require classpath loading; \
                     file-system loads do not resolve them",
                );
            }
        }
        let registry = self.merge(documents, &mut report);
        LoadOutcome { registry, report }
    }

    /// Load entry documents relative to a classpath root, resolving
    /// `external-data-sources` references strictly below that root.
    pub fn load_classpath<P: AsRef<Path>>(&self, root: impl AsRef<Path>, entries: &[P]) -> Result<Registry> {
        let root = root.as_ref();
        let mut report = ValidationReport::new();
        let mut documents = Vec::new();
        let mut loaded: BTreeSet<PathBuf> = BTreeSet::new();
        let mut queue: Vec<PathBuf> = entries.iter().map(|p| p.as_ref().to_path_buf()).collect();

        while let Some(relative) = queue.pop() {
            if let Some(reason) = escapes_root(&relative) {
                report.error(relative.display().to_string(), reason);
                continue;
            }
            if !loaded.insert(relative.clone()) {
                continue;
            }
            let absolute = root.join(&relative);
            let content = match std::fs::read_to_string(&absolute) {
                Ok(content) => content,
                Err(e) => {
                    report.error(relative.display().to_string(), format!("unreadable: {e}"));
                    continue;
                }
            };
            let Some(document) =
                self.parse_document(&relative.display().to_string(), &content, &mut report)
            else {
                continue;
            };
            for external in &document.external_refs {
                debug!(from = %document.path, source = %external.source, "following external data source");
                queue.push(PathBuf::from(&external.source));
            }
            documents.push(document);
        }

        match self.merge(documents, &mut report) {
            Some(registry) => Ok(registry),
            None => Err(ApexError::Validation(report.to_string())),
        }
    }

    /// Merge already-loaded documents into a registry.
    pub fn merge_documents(&self, documents: Vec<Document>) -> Result<Registry> {
        let mut report = ValidationReport::new();
        match self.merge(documents, &mut report) {
            Some(registry) => Ok(registry),
            None => Err(ApexError::Validation(report.to_string())),
        }
    }

    fn parse_document(
        &self,
        name: &str,
        content: &str,
        report: &mut ValidationReport,
    ) -> Option<Document> {
        let raw: RawDocument = match serde_yaml::from_str(content) {
            Ok(raw) => raw,
            Err(e) => {
                report.error(name, format!("YAML parse failure: {e}"));
                return None;
            }
        };
        raw.convert(name, self.clock.now(), report)
    }

    /// Merge documents into a registry, then run semantic validation. The
    /// build is atomic: any fatal finding yields no registry at all.
    fn merge(&self, documents: Vec<Document>, report: &mut ValidationReport) -> Option<Registry> {
        let mut registry = Registry::new();
        for document in documents {
            let location = document.path.clone();
            let mut register = |result: Result<()>| {
                if let Err(e) = result {
                    report.error(&location, e.to_string());
                }
            };
            for rule in document.rules {
                register(registry.add_rule(rule));
            }
            for group in document.groups {
                register(registry.add_group(group));
            }
            for enrichment in document.enrichments {
                register(registry.add_enrichment(enrichment));
            }
            for chain in document.chains {
                register(registry.add_chain(chain));
            }
            for scenario in document.scenarios {
                register(registry.add_scenario(scenario));
            }
            for (id, dataset) in document.datasets {
                register(registry.add_dataset(id, dataset));
            }
            for data_source in document.data_source_refs {
                register(registry.add_data_source(data_source));
            }
        }

        check_expressions(&registry, report);

        let analysis = analyzer::analyze(&registry);
        for missing in &analysis.missing {
            report.error(&missing.from, format!("missing reference to {}", missing.to));
        }
        for cycle in &analysis.cycles {
            report.error("dependency-graph", format!("cycle: {}", cycle.join(" -> ")));
        }

        if report.has_errors() {
            return None;
        }
        info!(entities = registry.len(), "registry built");
        Some(registry)
    }
}

fn escapes_root(relative: &Path) -> Option<String> {
    if relative.is_absolute() {
        return Some(format!(
            "absolute path '{}' rejected; external data sources resolve against the classpath root",
            relative.display()
        ));
    }
    if relative.components().any(|c| matches!(c, Component::ParentDir)) {
        return Some(format!(
            "path '{}' escapes the classpath root",
            relative.display()
        ));
    }
    None
}

fn check_expr(source: &str, location: &str, report: &mut ValidationReport) {
    if let Err(e) = expr::parse(source) {
        report.error(location, format!("expression does not parse: {e}"));
    }
}

/// Parse-check every expression string held by the registry.
fn check_expressions(registry: &Registry, report: &mut ValidationReport) {
    for rule in registry.rules() {
        check_expr(&rule.condition, &format!("rule:{}", rule.id), report);
    }
    for enrichment in registry.enrichments() {
        let location = format!("enrichment:{}", enrichment.id);
        if let Some(condition) = &enrichment.condition {
            check_expr(condition, &location, report);
        }
        match &enrichment.kind {
            EnrichmentKind::Lookup(spec) => {
                check_expr(&spec.lookup_key, &location, report);
                for mapping in &spec.field_mappings {
                    if let SourceField::Expression(source) = &mapping.source {
                        check_expr(source, &location, report);
                    }
                    if let Some(transformation) = &mapping.transformation {
                        check_expr(transformation, &location, report);
                    }
                }
            }
            EnrichmentKind::Field(spec) => {
                for mapping in &spec.field_mappings {
                    if let SourceField::Expression(source) = &mapping.source {
                        check_expr(source, &location, report);
                    }
                    if let Some(transformation) = &mapping.transformation {
                        check_expr(transformation, &location, report);
                    }
                }
            }
            EnrichmentKind::Calculation(spec) => {
                check_expr(&spec.expression, &location, report);
            }
            EnrichmentKind::ConditionalMapping(spec) => {
                for rule in &spec.mapping_rules {
                    for condition in &rule.conditions.conditions {
                        check_expr(condition, &location, report);
                    }
                    check_expr(&rule.transformation, &location, report);
                }
            }
        }
    }
    for chain in registry.chains() {
        let location = format!("rule-chain:{}", chain.id);
        match &chain.spec {
            ChainSpec::Conditional {
                trigger,
                on_trigger,
                on_no_trigger,
            } => {
                check_expr(&trigger.condition, &location, report);
                for rule in on_trigger.iter().chain(on_no_trigger) {
                    check_expr(&rule.condition, &location, report);
                }
            }
            ChainSpec::Sequential { stages } => {
                for stage in stages {
                    check_expr(&stage.expression, &location, report);
                }
            }
            ChainSpec::Routing {
                router,
                routes,
                default_route,
            } => {
                check_expr(router, &location, report);
                for rule in routes.values().flatten().chain(default_route.iter().flatten()) {
                    check_expr(&rule.condition, &location, report);
                }
            }
            ChainSpec::Accumulative {
                rules,
                selection,
                final_decision_rule,
                ..
            } => {
                for rule in rules {
                    check_expr(&rule.condition, &location, report);
                }
                if let crate::model::RuleSelection::DynamicThreshold(expression) = selection {
                    check_expr(expression, &location, report);
                }
                check_expr(final_decision_rule, &location, report);
            }
            ChainSpec::ComplexWorkflow { stages } => {
                for stage in stages {
                    match &stage.execution {
                        StageExecution::Rules(rules) => {
                            for rule in rules {
                                check_expr(&rule.condition, &location, report);
                            }
                        }
                        StageExecution::Conditional {
                            condition,
                            on_true,
                            on_false,
                        } => {
                            check_expr(condition, &location, report);
                            for rule in on_true.iter().chain(on_false) {
                                check_expr(&rule.condition, &location, report);
                            }
                        }
                    }
                }
            }
            ChainSpec::FluentBuilder { root, .. } => {
                let mut stack: Vec<&crate::model::FluentNode> = vec![root];
                while let Some(node) = stack.pop() {
                    check_expr(&node.rule.condition, &location, report);
                    if let Some(child) = &node.on_success {
                        stack.push(child.as_ref());
                    }
                    if let Some(child) = &node.on_failure {
                        stack.push(child.as_ref());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).expect("create file");
        file.write_all(content.as_bytes()).expect("write file");
        path
    }

    const RULES_DOC: &str = r##"
metadata:
  name: rules
  version: 1.0.0
  type: rule-config
rules:
  - id: high-value
    condition: "#amount > 100000"
    message: high value
"##;

    #[test]
    fn load_many_merges_documents() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_file(&dir, "a.yaml", RULES_DOC);
        let second = write_file(
            &dir,
            "b.yaml",
            r##"
metadata:
  name: more-rules
  version: 1.0.0
  type: rule-config
rules:
  - id: premium
    condition: "#tier == 'PREMIUM'"
"##,
        );
        let loader = Loader::new(system_clock());
        let registry = loader.load_many(&[first, second]).unwrap();
        assert!(registry.rule("high-value").is_some());
        assert!(registry.rule("premium").is_some());
    }

    #[test]
    fn duplicate_ids_across_files_fail_the_merge() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_file(&dir, "a.yaml", RULES_DOC);
        let second = write_file(&dir, "b.yaml", RULES_DOC);
        let loader = Loader::new(system_clock());
        let err = loader.load_many(&[first, second]).unwrap_err();
        assert!(err.to_string().contains("duplicate rule id"));
    }

    #[test]
    fn unparseable_expression_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "bad.yaml",
            r##"
metadata:
  name: bad
  version: 1.0.0
  type: rule-config
rules:
  - id: broken
    condition: "#amount >"
"##,
        );
        let loader = Loader::new(system_clock());
        let err = loader.load_many(&[path]).unwrap_err();
        assert!(err.to_string().contains("does not parse"));
    }

    #[test]
    fn load_many_rejects_external_data_sources() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "ext.yaml",
            r##"
metadata:
  name: ext
  version: 1.0.0
  type: rule-config
external-data-sources:
  - name: products
    type: external-data-config
    source: datasources/products.yaml
"##,
        );
        let loader = Loader::new(system_clock());
        let err = loader.load_many(&[path]).unwrap_err();
        assert!(err.to_string().contains("classpath"));
    }

    #[test]
    fn classpath_load_follows_external_references() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("datasources")).unwrap();
        write_file(
            &dir,
            "entry.yaml",
            r##"
metadata:
  name: entry
  version: 1.0.0
  type: rule-config
external-data-sources:
  - name: products
    type: external-data-config
    source: datasources/products.yaml
"##,
        );
        write_file(
            &dir,
            "datasources/products.yaml",
            r##"
metadata:
  name: products
  version: 1.0.0
  type: external-data-config
data-sources:
  - name: products
    config-file: products-db.yaml
"##,
        );
        let loader = Loader::new(system_clock());
        let registry = loader
            .load_classpath(dir.path(), &[PathBuf::from("entry.yaml")])
            .unwrap();
        assert!(registry.data_source("products").is_some());
    }

    #[test]
    fn classpath_load_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            &dir,
            "entry.yaml",
            r##"
metadata:
  name: entry
  version: 1.0.0
  type: rule-config
external-data-sources:
  - name: escape
    type: external-data-config
    source: ../outside.yaml
"##,
        );
        let loader = Loader::new(system_clock());
        let err = loader
            .load_classpath(dir.path(), &[PathBuf::from("entry.yaml")])
            .unwrap_err();
        assert!(err.to_string().contains("escapes the classpath root"));
    }

    #[test]
    fn atomic_failure_returns_no_registry() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_file(&dir, "good.yaml", RULES_DOC);
        let bad = write_file(
            &dir,
            "bad.yaml",
            "metadata:\n  name: bad\n  version: nope\n  type: rule-config\n",
        );
        let loader = Loader::new(system_clock());
        let outcome = loader.check_many(&[good, bad]);
        assert!(outcome.registry.is_none());
        assert!(outcome.report.has_errors());
    }
}
