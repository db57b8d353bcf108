//! Session facade over the four stores.
//!
//! An [`Engine`] is one driver's session on one branch. It opens the rule
//! store read-only, the project and extension stores read-write, and the
//! preference store only when the configuration enables it.

use crate::config::EngineConfig;
use crate::directive;
use crate::error::{DirectiveError, Result};
use crate::extensions::{ExtensionStore, Theme, ThemeSignal};
use crate::invoker::{ActionRegistry, ActionRunResult, ExecutionContext, InvokeScope, Invoker};
use crate::io;
use crate::merge::{self, MergePlan};
use crate::model::Rule;
use crate::paths;
use crate::preferences::{EventSink, PreferenceStore};
use crate::progression::{self, ScopeEvaluation};
use crate::project::ProjectStore;
use crate::resolver::{self, StateSnapshot};
use crate::rule_store::RuleStore;
use crate::snapshot;
use crate::types::ValidationWarning;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct Engine {
    root: PathBuf,
    config: EngineConfig,
    rules: RuleStore,
    registry: ActionRegistry,
    project: ProjectStore,
    preferences: Option<PreferenceStore>,
    extensions: ExtensionStore,
}

impl Engine {
    /// Create `.directive/`, write `config` and create the project and
    /// extension stores. The rule store is created by the loader.
    pub fn init(root: &Path, config: &EngineConfig) -> Result<()> {
        io::ensure_dir(&paths::directive_dir(root))?;
        if !paths::config_path(root).exists() {
            config.save(root)?;
        }
        ProjectStore::open(&config.project_store_path(root), &config.branch)?;
        ExtensionStore::open(&config.extension_store_path(root))?;
        info!(root = %root.display(), branch = %config.branch, "initialized");
        Ok(())
    }

    pub fn open(root: &Path) -> Result<Self> {
        let config = EngineConfig::load(root)?;
        Self::open_with(root, config, ActionRegistry::with_builtins())
    }

    pub fn open_with(root: &Path, config: EngineConfig, registry: ActionRegistry) -> Result<Self> {
        let rules = RuleStore::open(&config.rule_store_path(root))?;
        let project = ProjectStore::open(&config.project_store_path(root), &config.branch)?;
        let preferences = if config.preferences.enabled {
            Some(PreferenceStore::open(
                &config.preference_store_path(root),
                config.preferences.tracking,
            )?)
        } else {
            None
        };
        let extensions = ExtensionStore::open(&config.extension_store_path(root))?;
        debug!(branch = %config.branch, preferences = preferences.is_some(), "engine opened");
        Ok(Self {
            root: root.to_path_buf(),
            config,
            rules,
            registry,
            project,
            preferences,
            extensions,
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn rules(&self) -> &RuleStore {
        &self.rules
    }

    pub fn registry_mut(&mut self) -> &mut ActionRegistry {
        &mut self.registry
    }

    pub fn project(&self) -> &ProjectStore {
        &self.project
    }

    pub fn project_mut(&mut self) -> &mut ProjectStore {
        &mut self.project
    }

    pub fn preferences(&self) -> Option<&PreferenceStore> {
        self.preferences.as_ref()
    }

    pub fn extensions(&self) -> &ExtensionStore {
        &self.extensions
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    pub fn snapshot(&self) -> Result<StateSnapshot> {
        snapshot::snapshot(self.project.state())
    }

    /// Rules eligible after `current_rule` for the current project state:
    /// the rule store's flow first, then active extension flows.
    pub fn resolve_next(&self, current_rule: Option<&str>) -> Result<Vec<Rule>> {
        let state = self.snapshot()?;
        let mut next: Vec<Rule> =
            resolver::resolve_rules(self.rules.catalog(), current_rule, &state)
                .into_iter()
                .cloned()
                .collect();

        let flows = self.extensions.flow_catalog()?;
        let mut seen: HashSet<String> = next.iter().map(|r| r.id.clone()).collect();
        for rule in resolver::resolve_rules(&flows, current_rule, &state) {
            if seen.insert(rule.id.clone()) {
                next.push(rule.clone());
            }
        }
        Ok(next)
    }

    /// Like [`resolve_next`](Self::resolve_next), but an empty result falls
    /// back to the bundle's fallback rule.
    pub fn next(&self, current_rule: Option<&str>) -> Result<Vec<Rule>> {
        let next = self.resolve_next(current_rule)?;
        if !next.is_empty() {
            return Ok(next);
        }
        Ok(self
            .rules
            .catalog()
            .fallback_rule()
            .cloned()
            .into_iter()
            .collect())
    }

    /// Markdown brief for `rule_id`.
    pub fn directive(&self, rule_id: &str) -> Result<String> {
        let rule = self.rules.rule(rule_id)?;
        let guidance = self.rules.guidance(rule_id)?;
        Ok(directive::build_directive(
            self.rules.catalog(),
            rule,
            &guidance,
            &self.snapshot()?,
        ))
    }

    // -----------------------------------------------------------------------
    // Invocation
    // -----------------------------------------------------------------------

    /// Run the actions bound to `rule_id`. Rules unknown to the rule store
    /// are looked up among the active extension flows.
    pub fn execute_rule_actions(
        &mut self,
        rule_id: &str,
        ctx: &ExecutionContext,
    ) -> Result<ActionRunResult> {
        let scope = InvokeScope {
            settings: &self.config.invoker,
            preferences: self.preferences.as_ref(),
            extensions: Some(&self.extensions),
            events: self.preferences.as_ref().map(|p| p as &dyn EventSink),
        };
        if self.rules.catalog().rule(rule_id).is_some() {
            let invoker = Invoker::new(&self.rules, &self.registry, scope);
            return invoker.execute_rule_actions(&mut self.project, rule_id, ctx);
        }
        let flows = self.extensions.flow_catalog()?;
        if flows.rule(rule_id).is_none() {
            return Err(DirectiveError::RuleNotFound(rule_id.to_string()));
        }
        let invoker = Invoker::for_catalog(&flows, &self.registry, scope);
        invoker.execute_rule_actions(&mut self.project, rule_id, ctx)
    }

    pub fn invoke_tool(&mut self, action_id: &str, params: Map<String, Value>) -> Result<Value> {
        let scope = InvokeScope {
            settings: &self.config.invoker,
            preferences: self.preferences.as_ref(),
            extensions: Some(&self.extensions),
            events: self.preferences.as_ref().map(|p| p as &dyn EventSink),
        };
        let invoker = Invoker::new(&self.rules, &self.registry, scope);
        invoker.invoke_tool(&mut self.project, action_id, params)
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Configuration, handler coverage and project-state warnings.
    pub fn validate(&self) -> Result<Vec<ValidationWarning>> {
        let mut warnings = self.config.validate();
        for action in self.registry.missing_for(self.rules.catalog()) {
            warnings.push(ValidationWarning::warning(format!(
                "no handler registered for action '{action}'"
            )));
        }
        warnings.extend(self.project.state().validate()?);
        Ok(warnings)
    }

    /// Record the current theme set, then bring this branch's completion
    /// path up to the latest theme revision.
    pub fn record_themes(&mut self, themes: Vec<Theme>) -> Result<Option<ScopeEvaluation>> {
        self.extensions.record_themes(themes)?;
        self.apply_themes()
    }

    /// Re-evaluate scope when this branch has not seen the latest theme
    /// revision. A failed re-evaluation leaves the branch behind, so the next
    /// call retries it.
    pub fn apply_themes(&mut self) -> Result<Option<ScopeEvaluation>> {
        let revision = self.extensions.theme_revision()?;
        let applied = self
            .project
            .state()
            .project()?
            .map(|p| p.theme_revision)
            .unwrap_or(0);
        if revision == 0 || applied >= revision {
            return Ok(None);
        }
        let signal = ThemeSignal {
            revision,
            themes: self.extensions.themes()?,
        };
        let eval = self.project.with_transaction(|ops| {
            let eval = progression::reevaluate_scope(ops, &signal)?;
            ops.set_theme_revision(revision)?;
            Ok(eval)
        })?;
        Ok(Some(eval))
    }

    /// Check whether `other_branch`'s changes can merge into this branch.
    pub fn plan_merge(&self, other_branch: &str) -> Result<MergePlan> {
        paths::validate_branch(other_branch)?;
        let state = self.project.state();
        let ours = state.changes(0)?;
        let theirs = state.changes_on(other_branch, 0)?;
        merge::plan_merge(&ours, &theirs)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::LifecycleStatus;
    use crate::loader::Loader;
    use crate::model::{Action, Bundle, FlowEdge, RuleAction};
    use crate::types::FlowType;
    use serde_json::json;
    use tempfile::TempDir;

    const BUNDLE: &str = r#"
version: 1
fallback_rule: status
rules:
  - { id: status, name: Status }
  - { id: init, name: Initialize }
  - { id: plan, name: Plan }
actions:
  - { id: status, name: project_status, pure: true }
  - id: init_project
    name: init_project
    params: [{ name: name, required: true }]
  - id: plan_stage
    name: plan_stage
    params: [{ name: name, required: true }]
rule_actions:
  - { rule_id: status, action_id: status, sequence_order: 1 }
  - { rule_id: init, action_id: init_project, sequence_order: 1, parameter_mapping: { name: "$ctx.project_name" } }
  - { rule_id: plan, action_id: plan_stage, sequence_order: 1 }
flow_edges:
  - { from_rule: "@entry", to_rule: init, condition_key: project_initialized, condition_value: false, priority: 10 }
  - { from_rule: init, to_rule: plan }
guidance:
  init: ["Name the project after the repository"]
"#;

    fn setup(config: EngineConfig) -> (TempDir, Engine) {
        let dir = TempDir::new().unwrap();
        Engine::init(dir.path(), &config).unwrap();
        Loader::for_config(dir.path(), &config)
            .load(&Bundle::from_yaml_str(BUNDLE).unwrap())
            .unwrap();
        let engine = Engine::open(dir.path()).unwrap();
        (dir, engine)
    }

    #[test]
    fn open_without_rule_store_fails() {
        let dir = TempDir::new().unwrap();
        Engine::init(dir.path(), &EngineConfig::default()).unwrap();
        assert!(matches!(
            Engine::open(dir.path()),
            Err(DirectiveError::RuleStoreMissing(_))
        ));
    }

    #[test]
    fn next_falls_back_when_nothing_matches() {
        let (_dir, mut engine) = setup(EngineConfig::default());
        let next = engine.next(None).unwrap();
        assert_eq!(next[0].id, "init");

        let ctx = ExecutionContext::new().with("project_name", json!("demo"));
        let run = engine.execute_rule_actions("init", &ctx).unwrap();
        assert!(run.succeeded());
        assert_eq!(run.guidance(), ["Name the project after the repository"]);

        assert!(engine.resolve_next(None).unwrap().is_empty());
        assert_eq!(engine.next(None).unwrap()[0].id, "status");
        assert_eq!(engine.next(Some("init")).unwrap()[0].id, "plan");
    }

    #[test]
    fn directive_renders_guidance() {
        let (_dir, engine) = setup(EngineConfig::default());
        let doc = engine.directive("init").unwrap();
        assert!(doc.contains("# Directive: Initialize"));
        assert!(doc.contains("Name the project after the repository"));
    }

    #[test]
    fn preferences_not_created_when_disabled() {
        let (dir, mut engine) = setup(EngineConfig::default());
        let ctx = ExecutionContext::new().with("project_name", json!("demo"));
        engine.execute_rule_actions("init", &ctx).unwrap();
        assert!(engine.preferences().is_none());
        assert!(!engine
            .config()
            .preference_store_path(dir.path())
            .exists());
    }

    #[test]
    fn preference_defaults_and_tracking_when_enabled() {
        let mut config = EngineConfig::default();
        config.preferences.enabled = true;
        config.preferences.tracking = true;
        let (_dir, mut engine) = setup(config);
        engine
            .preferences()
            .unwrap()
            .set_default("init", "name", &json!("from prefs"))
            .unwrap();

        let run = engine
            .execute_rule_actions("init", &ExecutionContext::new())
            .unwrap();
        assert!(run.succeeded());
        let project = engine.project().state().project().unwrap().unwrap();
        assert_eq!(project.name, "from prefs");
        assert_eq!(engine.preferences().unwrap().events().unwrap().len(), 1);
    }

    #[test]
    fn extension_flows_join_resolution_once_active() {
        let (_dir, mut engine) = setup(EngineConfig::default());
        let ext = engine.extensions();
        ext.add_rule(&Rule {
            id: "audit".into(),
            name: "Audit".into(),
            category: String::new(),
            level: 0,
            parent: None,
            workflow: Default::default(),
            priority: 0,
        })
        .unwrap();
        ext.add_action(&Action {
            id: "audit_status".into(),
            name: "project_status".into(),
            params: vec![],
            pure: true,
            is_tool: true,
            is_sub_action: false,
            target: Default::default(),
        })
        .unwrap();
        ext.link(&RuleAction {
            rule_id: "audit".into(),
            action_id: "audit_status".into(),
            sequence_order: 1,
            is_required: true,
            parameter_mapping: Default::default(),
            execution_context: None,
        })
        .unwrap();
        ext.add_edge(&FlowEdge {
            id: 0,
            from_rule: "@entry".into(),
            to_rule: "audit".into(),
            condition_key: None,
            condition_value: None,
            priority: 0,
            flow_type: FlowType::Conditional,
        })
        .unwrap();

        // Draft actions keep their bindings out of the flow catalog, but the
        // rule and edge still resolve.
        let ids: Vec<String> = engine.resolve_next(None).unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["init", "audit"]);

        engine
            .extensions()
            .advance("audit_status", LifecycleStatus::Active)
            .unwrap();
        let run = engine
            .execute_rule_actions("audit", &ExecutionContext::new())
            .unwrap();
        assert!(run.succeeded());
        assert_eq!(run.results[0].action_id, "audit_status");
    }

    #[test]
    fn theme_change_adds_milestone() {
        let (_dir, mut engine) = setup(EngineConfig::default());
        let ctx = ExecutionContext::new().with("project_name", json!("demo"));
        engine.execute_rule_actions("init", &ctx).unwrap();

        let themes = vec![Theme {
            name: "billing".into(),
            flows: vec!["invoices".into()],
        }];
        let eval = engine.record_themes(themes.clone()).unwrap().unwrap();
        assert_eq!(eval.added_milestones.len(), 1);
        assert!(eval.added_stage.is_some());
        assert!(engine.record_themes(themes).unwrap().is_none());
    }

    #[test]
    fn theme_signal_before_init_is_applied_later() {
        let (_dir, mut engine) = setup(EngineConfig::default());
        let themes = vec![Theme {
            name: "billing".into(),
            flows: vec!["invoices".into()],
        }];
        assert!(matches!(
            engine.record_themes(themes.clone()),
            Err(DirectiveError::StateConsistency(_))
        ));

        engine
            .project_mut()
            .with_transaction(|ops| progression::initialize(ops, "demo"))
            .unwrap();
        let eval = engine.record_themes(themes).unwrap().unwrap();
        assert_eq!(eval.added_milestones.len(), 1);
        assert_eq!(engine.project().state().all_milestones().unwrap().len(), 1);
        assert!(engine.apply_themes().unwrap().is_none());
    }

    #[test]
    fn unknown_rule_is_reported() {
        let (_dir, mut engine) = setup(EngineConfig::default());
        assert!(matches!(
            engine.execute_rule_actions("nope", &ExecutionContext::new()),
            Err(DirectiveError::RuleNotFound(_))
        ));
    }
}
