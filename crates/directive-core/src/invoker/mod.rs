//! Rule action execution.
//!
//! [`Invoker::execute_rule_actions`] runs a rule's bound actions in
//! sequence order inside one project-store transaction:
//!
//! - a required action that fails aborts the run; the transaction is rolled
//!   back, so none of the run's writes become visible;
//! - an optional action runs inside its own savepoint; on failure only that
//!   savepoint is rolled back and a warning is recorded;
//! - on success the transaction commits, queued extension-store writes are
//!   applied, and the rule's guidance lines are read from the rule store.
//!
//! Handlers never write the extension store directly; they queue
//! [`ExtensionWrite`](crate::extensions::ExtensionWrite)s, which a rollback
//! discards along with the project writes.
//!
//! The invoker receives its optional collaborators through an explicit
//! [`InvokeScope`]; it holds no global state.

pub mod binding;
mod builtin;
pub mod registry;

pub use registry::{ActionCall, ActionHandler, ActionRegistry, PendingWrites};

use crate::config::InvokerConfig;
use crate::error::{DirectiveError, Result};
use crate::extensions::ExtensionStore;
use crate::model::RuleAction;
use crate::preferences::{EventKind, EventSink, InvocationEvent, PreferenceStore};
use crate::project::{ProjectStore, Reservation, StateOps};
use crate::rule_store::{Catalog, RuleStore};
use crate::types::StoreTarget;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Named values supplied by the driver for one rule run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContext {
    values: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutput {
    /// Position of the binding within the rule run.
    pub index: usize,
    pub action_id: String,
    pub sequence_order: u32,
    pub payload: Value,
}

/// A failed optional action. The run continued past it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionalActionWarning {
    pub index: usize,
    pub action_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Binding,
    MissingHandler,
    /// The milestone already has an open task.
    OpenTaskExists { milestone: i64, task: i64 },
    StateConsistency,
    Execution,
    /// More optional actions failed than the invoker tolerates.
    OptionalTolerance,
}

impl FailureKind {
    fn classify(err: &DirectiveError) -> Self {
        match err {
            DirectiveError::Binding { .. } => FailureKind::Binding,
            DirectiveError::MissingHandler(_) | DirectiveError::ActionNotFound(_) => {
                FailureKind::MissingHandler
            }
            DirectiveError::OpenTaskExists { milestone, task } => FailureKind::OpenTaskExists {
                milestone: *milestone,
                task: *task,
            },
            DirectiveError::StateConsistency(_)
            | DirectiveError::InvalidTransition { .. }
            | DirectiveError::NotFound { .. }
            | DirectiveError::AlreadyFinalized { .. } => FailureKind::StateConsistency,
            _ => FailureKind::Execution,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionFailure {
    pub index: usize,
    pub action_id: String,
    pub kind: FailureKind,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed { guidance: Vec<String> },
    Failed { failure: ActionFailure },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRunResult {
    pub rule_id: String,
    /// Payloads of the actions that succeeded, in run order. On failure these
    /// are the results produced before the failing action; their writes were
    /// rolled back with the rest of the run.
    pub results: Vec<ActionOutput>,
    pub warnings: Vec<OptionalActionWarning>,
    /// Reservations made during the run and never finalized.
    pub orphaned_reservations: Vec<Reservation>,
    pub outcome: RunOutcome,
}

impl ActionRunResult {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed { .. })
    }

    pub fn failure(&self) -> Option<&ActionFailure> {
        match &self.outcome {
            RunOutcome::Failed { failure } => Some(failure),
            RunOutcome::Completed { .. } => None,
        }
    }

    pub fn guidance(&self) -> &[String] {
        match &self.outcome {
            RunOutcome::Completed { guidance } => guidance,
            RunOutcome::Failed { .. } => &[],
        }
    }

    /// Convert a failed run into the matching error.
    pub fn into_error(self) -> Option<DirectiveError> {
        let failure = self.failure()?;
        Some(DirectiveError::ActionExecution {
            action: failure.action_id.clone(),
            reason: failure.error.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Invoker
// ---------------------------------------------------------------------------

/// Optional collaborators and settings for one invoker.
#[derive(Clone, Copy)]
pub struct InvokeScope<'a> {
    pub settings: &'a InvokerConfig,
    /// Source of per-rule parameter defaults.
    pub preferences: Option<&'a PreferenceStore>,
    pub extensions: Option<&'a ExtensionStore>,
    /// Receives one event per rule run or tool call. Failing to record one
    /// never fails the invocation.
    pub events: Option<&'a dyn EventSink>,
}

pub struct Invoker<'a> {
    catalog: &'a Catalog,
    guidance: Option<&'a RuleStore>,
    registry: &'a ActionRegistry,
    scope: InvokeScope<'a>,
}

impl<'a> Invoker<'a> {
    pub fn new(rules: &'a RuleStore, registry: &'a ActionRegistry, scope: InvokeScope<'a>) -> Self {
        Self {
            catalog: rules.catalog(),
            guidance: Some(rules),
            registry,
            scope,
        }
    }

    /// An invoker over a bare catalog, such as the extension flows. Runs
    /// complete with no guidance lines.
    pub fn for_catalog(
        catalog: &'a Catalog,
        registry: &'a ActionRegistry,
        scope: InvokeScope<'a>,
    ) -> Self {
        Self {
            catalog,
            guidance: None,
            registry,
            scope,
        }
    }

    pub fn execute_rule_actions(
        &self,
        project: &mut ProjectStore,
        rule_id: &str,
        ctx: &ExecutionContext,
    ) -> Result<ActionRunResult> {
        if self.catalog.rule(rule_id).is_none() {
            return Err(DirectiveError::RuleNotFound(rule_id.to_string()));
        }
        let defaults = match self.scope.preferences {
            Some(prefs) => Some(prefs.defaults_for(rule_id)?),
            None => None,
        };
        let branch = project.branch().to_string();

        let mut run = ActionRunResult {
            rule_id: rule_id.to_string(),
            results: Vec::new(),
            warnings: Vec::new(),
            orphaned_reservations: Vec::new(),
            outcome: RunOutcome::Completed {
                guidance: Vec::new(),
            },
        };

        let pending = PendingWrites::default();
        let mut tx = project.transaction()?;
        let reserved_before = tx.state().max_code_entity_id()?;

        for (index, binding) in self.catalog.bindings(rule_id).iter().enumerate() {
            let outcome = if binding.is_required {
                self.run_binding(
                    tx.state(),
                    &pending,
                    binding,
                    ctx,
                    &run.results,
                    defaults.as_ref(),
                )
            } else {
                let queued = pending.len();
                let scope = tx.scope()?;
                match self.run_binding(
                    scope.state(),
                    &pending,
                    binding,
                    ctx,
                    &run.results,
                    defaults.as_ref(),
                ) {
                    Ok(payload) => {
                        scope.commit()?;
                        Ok(payload)
                    }
                    Err(e) => {
                        scope.rollback()?;
                        pending.truncate(queued);
                        Err(e)
                    }
                }
            };

            let err = match outcome {
                Ok(payload) => {
                    run.results.push(ActionOutput {
                        index,
                        action_id: binding.action_id.clone(),
                        sequence_order: binding.sequence_order,
                        payload,
                    });
                    continue;
                }
                Err(e) => e,
            };

            if binding.is_required {
                warn!(rule = rule_id, action = %binding.action_id, error = %err, "required action failed");
                tx.rollback()?;
                run.outcome = RunOutcome::Failed {
                    failure: ActionFailure {
                        index,
                        action_id: binding.action_id.clone(),
                        kind: FailureKind::classify(&err),
                        error: err.to_string(),
                    },
                };
                self.track(EventKind::RuleRun, &branch, rule_id, &run);
                return Ok(run);
            }

            warn!(rule = rule_id, action = %binding.action_id, error = %err, "optional action failed");
            run.warnings.push(OptionalActionWarning {
                index,
                action_id: binding.action_id.clone(),
                error: err.to_string(),
            });
            if run.warnings.len() > self.scope.settings.max_optional_failures {
                tx.rollback()?;
                run.outcome = RunOutcome::Failed {
                    failure: ActionFailure {
                        index,
                        action_id: binding.action_id.clone(),
                        kind: FailureKind::OptionalTolerance,
                        error: format!(
                            "{} optional actions failed (limit {})",
                            run.warnings.len(),
                            self.scope.settings.max_optional_failures
                        ),
                    },
                };
                self.track(EventKind::RuleRun, &branch, rule_id, &run);
                return Ok(run);
            }
        }

        run.orphaned_reservations = tx
            .state()
            .provisional_since(reserved_before)?
            .iter()
            .map(|e| e.reservation())
            .collect();
        for orphan in &run.orphaned_reservations {
            warn!(rule = rule_id, kind = %orphan.kind, id = orphan.id, "reservation left provisional");
        }
        tx.commit()?;
        self.apply_pending(&pending)?;

        let guidance = match self.guidance {
            Some(rules) => rules.guidance(rule_id)?,
            None => Vec::new(),
        };
        run.outcome = RunOutcome::Completed { guidance };
        info!(
            rule = rule_id,
            actions = run.results.len(),
            warnings = run.warnings.len(),
            "rule run completed"
        );
        self.track(EventKind::RuleRun, &branch, rule_id, &run);
        Ok(run)
    }

    /// Invoke one tool action directly with caller-supplied parameters.
    /// Sub-actions are refused.
    pub fn invoke_tool(
        &self,
        project: &mut ProjectStore,
        action_id: &str,
        params: Map<String, Value>,
    ) -> Result<Value> {
        let action = self
            .catalog
            .action(action_id)
            .ok_or_else(|| DirectiveError::ActionNotFound(action_id.to_string()))?;
        if action.is_sub_action || !action.is_tool {
            return Err(DirectiveError::NotATool(action_id.to_string()));
        }
        let ctx = ExecutionContext::from_map(params);
        let binding = RuleAction {
            rule_id: String::new(),
            action_id: action_id.to_string(),
            sequence_order: 0,
            is_required: true,
            parameter_mapping: Default::default(),
            execution_context: None,
        };
        let branch = project.branch().to_string();
        let pending = PendingWrites::default();
        let result = project
            .with_transaction(|ops| self.run_binding(ops, &pending, &binding, &ctx, &[], None))
            .and_then(|payload| {
                self.apply_pending(&pending)?;
                Ok(payload)
            });
        let event = InvocationEvent::new(EventKind::ToolCall, &branch, action_id, result.is_ok(), 0);
        self.record(&event);
        result
    }

    fn run_binding(
        &self,
        ops: StateOps<'_>,
        pending: &PendingWrites,
        binding: &RuleAction,
        ctx: &ExecutionContext,
        steps: &[ActionOutput],
        defaults: Option<&Map<String, Value>>,
    ) -> Result<Value> {
        let action = self
            .catalog
            .action(&binding.action_id)
            .ok_or_else(|| DirectiveError::ActionNotFound(binding.action_id.clone()))?;
        let handler = self
            .registry
            .get(&action.name)
            .ok_or_else(|| DirectiveError::MissingHandler(action.name.clone()))?;
        let unavailable = match action.target {
            StoreTarget::Extensions => self.scope.extensions.is_none(),
            StoreTarget::Preferences => self.scope.preferences.is_none(),
            StoreTarget::Project | StoreTarget::RuleConfig => false,
        };
        if unavailable {
            return Err(DirectiveError::ActionExecution {
                action: action.id.clone(),
                reason: format!("the {} store is not open", action.target),
            });
        }

        let params =
            binding::resolve_params(action, &binding.parameter_mapping, ctx, steps, defaults)?;
        let call = ActionCall {
            action,
            params: &params,
            state: ops,
            extensions: self.scope.extensions,
            pending,
            execution_context: binding.execution_context.as_deref(),
        };
        handler.call(&call)
    }

    /// Apply extension writes queued by a committed run. They were checked
    /// when queued, so only a storage error fails here.
    fn apply_pending(&self, pending: &PendingWrites) -> Result<()> {
        // Queuing requires the extension store, so no store means no writes.
        match self.scope.extensions {
            Some(store) => store.apply(&pending.take()),
            None => Ok(()),
        }
    }

    fn track(&self, kind: EventKind, branch: &str, target: &str, run: &ActionRunResult) {
        let event = InvocationEvent::new(kind, branch, target, run.succeeded(), run.warnings.len());
        self.record(&event);
    }

    fn record(&self, event: &InvocationEvent) {
        if let Some(sink) = self.scope.events {
            if let Err(e) = sink.record(event) {
                warn!(event = %event.target, error = %e, "invocation event not recorded");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::LifecycleStatus;
    use crate::model::Bundle;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const BUNDLE: &str = r#"
version: 1
rules:
  - { id: setup, name: Setup }
  - { id: tolerant, name: Tolerant }
  - { id: promote, name: Promote }
  - { id: promote_then_fail, name: Promote then fail }
actions:
  - { id: stage_a, name: plan_stage, params: [{ name: name, required: true }] }
  - { id: boom, name: boom }
  - { id: counted, name: counted }
  - { id: hidden, name: plan_stage, is_tool: false, is_sub_action: true, params: [{ name: name, required: true }] }
  - { id: advance, name: advance_extension, target: extensions, params: [{ name: action_id, required: true }, { name: status, required: true }] }
rule_actions:
  - { rule_id: setup, action_id: stage_a, sequence_order: 1, parameter_mapping: { name: "Alpha" } }
  - { rule_id: setup, action_id: boom, sequence_order: 2 }
  - { rule_id: setup, action_id: counted, sequence_order: 3 }
  - { rule_id: tolerant, action_id: stage_a, sequence_order: 1, parameter_mapping: { name: "Kept" } }
  - { rule_id: tolerant, action_id: boom, sequence_order: 2, is_required: false }
  - { rule_id: tolerant, action_id: stage_a, sequence_order: 3, parameter_mapping: { name: "$ctx.second" } }
  - { rule_id: promote, action_id: advance, sequence_order: 1, parameter_mapping: { action_id: "lint", status: "tested" } }
  - { rule_id: promote, action_id: advance, sequence_order: 2, is_required: false, parameter_mapping: { action_id: "lint", status: "draft" } }
  - { rule_id: promote_then_fail, action_id: advance, sequence_order: 1, parameter_mapping: { action_id: "lint", status: "tested" } }
  - { rule_id: promote_then_fail, action_id: boom, sequence_order: 2 }
"#;

    static COUNTED: AtomicUsize = AtomicUsize::new(0);

    fn boom(call: &ActionCall<'_>) -> Result<Value> {
        // Write first so the rollback is observable.
        call.state.add_stage("doomed")?;
        Err(DirectiveError::ActionExecution {
            action: call.action.id.clone(),
            reason: "boom".into(),
        })
    }

    fn counted(_call: &ActionCall<'_>) -> Result<Value> {
        COUNTED.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Null)
    }

    fn fixture() -> (Catalog, ActionRegistry, ProjectStore) {
        let catalog = Catalog::from_bundle(&Bundle::from_yaml_str(BUNDLE).unwrap());
        let mut registry = ActionRegistry::with_builtins();
        registry.register("boom", boom);
        registry.register("counted", counted);
        let project = ProjectStore::open_in_memory("main").unwrap();
        crate::progression::initialize(project.state(), "demo").unwrap();
        (catalog, registry, project)
    }

    fn extension_store() -> ExtensionStore {
        let store = ExtensionStore::open_in_memory().unwrap();
        store
            .add_action(&crate::model::Action {
                id: "lint".into(),
                name: "project_status".into(),
                params: vec![],
                pure: true,
                is_tool: true,
                is_sub_action: false,
                target: StoreTarget::Project,
            })
            .unwrap();
        store
    }

    struct BrokenSink;

    impl EventSink for BrokenSink {
        fn record(&self, _event: &InvocationEvent) -> Result<bool> {
            Err(DirectiveError::Preferences("disk full".into()))
        }
    }

    fn stage_names(project: &ProjectStore) -> Vec<String> {
        project
            .state()
            .stages()
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect()
    }

    #[test]
    fn required_failure_stops_run_and_rolls_back() {
        let (catalog, registry, mut project) = fixture();
        let settings = InvokerConfig::default();
        let scope = InvokeScope {
            settings: &settings,
            preferences: None,
            extensions: None,
            events: None,
        };
        let invoker = Invoker::for_catalog(&catalog, &registry, scope);

        let run = invoker
            .execute_rule_actions(&mut project, "setup", &ExecutionContext::new())
            .unwrap();
        let failure = run.failure().unwrap();
        assert_eq!(failure.index, 1);
        assert_eq!(failure.action_id, "boom");
        assert_eq!(failure.kind, FailureKind::Execution);
        assert_eq!(run.results.len(), 1);
        assert_eq!(run.results[0].action_id, "stage_a");
        assert_eq!(COUNTED.load(Ordering::SeqCst), 0, "action 3 must not run");
        assert!(stage_names(&project).is_empty(), "no partial writes");
    }

    #[test]
    fn optional_failure_is_isolated() {
        let (catalog, registry, mut project) = fixture();
        let settings = InvokerConfig::default();
        let scope = InvokeScope {
            settings: &settings,
            preferences: None,
            extensions: None,
            events: None,
        };
        let invoker = Invoker::for_catalog(&catalog, &registry, scope);
        let ctx = ExecutionContext::new().with("second", json!("Also kept"));

        let run = invoker
            .execute_rule_actions(&mut project, "tolerant", &ctx)
            .unwrap();
        assert!(run.succeeded());
        assert_eq!(run.warnings.len(), 1);
        assert_eq!(run.warnings[0].action_id, "boom");
        assert_eq!(run.results.len(), 2);
        assert_eq!(stage_names(&project), vec!["Kept", "Also kept"]);
    }

    #[test]
    fn optional_tolerance_can_be_zero() {
        let (catalog, registry, mut project) = fixture();
        let settings = InvokerConfig {
            max_optional_failures: 0,
        };
        let scope = InvokeScope {
            settings: &settings,
            preferences: None,
            extensions: None,
            events: None,
        };
        let invoker = Invoker::for_catalog(&catalog, &registry, scope);
        let ctx = ExecutionContext::new().with("second", json!("x"));
        let run = invoker
            .execute_rule_actions(&mut project, "tolerant", &ctx)
            .unwrap();
        assert_eq!(run.failure().unwrap().kind, FailureKind::OptionalTolerance);
        assert!(stage_names(&project).is_empty());
    }

    #[test]
    fn binding_error_fails_before_invocation() {
        let (catalog, registry, mut project) = fixture();
        let settings = InvokerConfig::default();
        let scope = InvokeScope {
            settings: &settings,
            preferences: None,
            extensions: None,
            events: None,
        };
        let invoker = Invoker::for_catalog(&catalog, &registry, scope);
        // `$ctx.second` is unresolved and `name` is required.
        let run = invoker
            .execute_rule_actions(&mut project, "tolerant", &ExecutionContext::new())
            .unwrap();
        let failure = run.failure().unwrap();
        assert_eq!(failure.index, 2);
        assert_eq!(failure.kind, FailureKind::Binding);
    }

    #[test]
    fn unknown_rule_is_an_error() {
        let (catalog, registry, mut project) = fixture();
        let settings = InvokerConfig::default();
        let scope = InvokeScope {
            settings: &settings,
            preferences: None,
            extensions: None,
            events: None,
        };
        let invoker = Invoker::for_catalog(&catalog, &registry, scope);
        assert!(matches!(
            invoker.execute_rule_actions(&mut project, "nope", &ExecutionContext::new()),
            Err(DirectiveError::RuleNotFound(_))
        ));
    }

    #[test]
    fn invoke_tool_rejects_sub_actions() {
        let (catalog, registry, mut project) = fixture();
        let settings = InvokerConfig::default();
        let scope = InvokeScope {
            settings: &settings,
            preferences: None,
            extensions: None,
            events: None,
        };
        let invoker = Invoker::for_catalog(&catalog, &registry, scope);
        let params = Map::from_iter([("name".to_string(), json!("Direct"))]);

        assert!(matches!(
            invoker.invoke_tool(&mut project, "hidden", params.clone()),
            Err(DirectiveError::NotATool(_))
        ));
        let payload = invoker.invoke_tool(&mut project, "stage_a", params).unwrap();
        assert_eq!(payload["stage"]["name"], "Direct");
    }

    #[test]
    fn event_recording_failure_keeps_committed_run() {
        let (catalog, registry, mut project) = fixture();
        let settings = InvokerConfig::default();
        let sink = BrokenSink;
        let scope = InvokeScope {
            settings: &settings,
            preferences: None,
            extensions: None,
            events: Some(&sink),
        };
        let invoker = Invoker::for_catalog(&catalog, &registry, scope);
        let ctx = ExecutionContext::new().with("second", json!("Also kept"));

        let run = invoker
            .execute_rule_actions(&mut project, "tolerant", &ctx)
            .unwrap();
        assert!(run.succeeded());
        assert_eq!(stage_names(&project), vec!["Kept", "Also kept"]);

        let params = Map::from_iter([("name".to_string(), json!("Direct"))]);
        invoker.invoke_tool(&mut project, "stage_a", params).unwrap();
        assert_eq!(stage_names(&project).len(), 3);
    }

    #[test]
    fn extension_writes_discarded_when_required_action_fails() {
        let (catalog, registry, mut project) = fixture();
        let extensions = extension_store();
        let settings = InvokerConfig::default();
        let scope = InvokeScope {
            settings: &settings,
            preferences: None,
            extensions: Some(&extensions),
            events: None,
        };
        let invoker = Invoker::for_catalog(&catalog, &registry, scope);

        let run = invoker
            .execute_rule_actions(&mut project, "promote_then_fail", &ExecutionContext::new())
            .unwrap();
        assert_eq!(run.failure().unwrap().action_id, "boom");
        assert_eq!(
            extensions.action("lint").unwrap().status,
            LifecycleStatus::Draft
        );
    }

    #[test]
    fn extension_writes_apply_on_commit() {
        let (catalog, registry, mut project) = fixture();
        let extensions = extension_store();
        let settings = InvokerConfig::default();
        let scope = InvokeScope {
            settings: &settings,
            preferences: None,
            extensions: Some(&extensions),
            events: None,
        };
        let invoker = Invoker::for_catalog(&catalog, &registry, scope);

        // The second move goes backwards and is checked against the queued
        // `tested`, not the stored `draft`.
        let run = invoker
            .execute_rule_actions(&mut project, "promote", &ExecutionContext::new())
            .unwrap();
        assert!(run.succeeded());
        assert_eq!(run.warnings.len(), 1);
        assert_eq!(run.results[0].payload["from"], "draft");
        assert_eq!(
            extensions.action("lint").unwrap().status,
            LifecycleStatus::Tested
        );
    }

    #[test]
    fn open_task_conflict_keeps_its_ids() {
        let err = DirectiveError::OpenTaskExists {
            milestone: 4,
            task: 9,
        };
        assert_eq!(
            FailureKind::classify(&err),
            FailureKind::OpenTaskExists {
                milestone: 4,
                task: 9
            }
        );
    }
}
