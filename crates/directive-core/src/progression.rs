//! Progression state machine over the completion hierarchy.
//!
//! The project row carries a [`ProgressionState`]; it only changes through
//! [`transition`], which checks the move against the allowed set. Completing
//! work cascades upwards: item → task → milestone → stage → project, and
//! each step opens the next unit of work where one exists. Every public call
//! returns the [`ProgressionEvent`]s it applied.

use crate::error::{DirectiveError, Result};
use crate::extensions::ThemeSignal;
use crate::project::{Milestone, Stage, StateOps, Task};
use crate::types::{text_enum, EntityKind, Status};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::info;

pub const MILESTONE_JUST_COMPLETED: &str = "milestone_just_completed";
pub const STAGE_JUST_COMPLETED: &str = "stage_just_completed";

// ---------------------------------------------------------------------------
// ProgressionState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressionState {
    NotInitialized,
    AwaitingDiscovery,
    TaskCreationEligible,
    ActiveWork,
    MilestoneTransition,
    StageTransition,
    Complete,
}

text_enum!(ProgressionState, "progression state", {
    NotInitialized => "not_initialized",
    AwaitingDiscovery => "awaiting_discovery",
    TaskCreationEligible => "task_creation_eligible",
    ActiveWork => "active_work",
    MilestoneTransition => "milestone_transition",
    StageTransition => "stage_transition",
    Complete => "complete",
});

impl ProgressionState {
    /// Whether `self → to` is a legal move. Staying put is always legal.
    pub fn can_move_to(self, to: ProgressionState) -> bool {
        use ProgressionState::*;
        if self == to {
            return true;
        }
        matches!(
            (self, to),
            (NotInitialized, AwaitingDiscovery)
                | (AwaitingDiscovery, TaskCreationEligible | ActiveWork)
                | (
                    TaskCreationEligible,
                    ActiveWork | MilestoneTransition | StageTransition | AwaitingDiscovery
                )
                | (ActiveWork, TaskCreationEligible | MilestoneTransition)
                | (
                    MilestoneTransition,
                    ActiveWork | TaskCreationEligible | StageTransition
                )
                | (
                    StageTransition,
                    ActiveWork | TaskCreationEligible | AwaitingDiscovery | Complete
                )
                | (Complete, TaskCreationEligible | AwaitingDiscovery)
        )
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressionEvent {
    PhaseChanged {
        from: ProgressionState,
        to: ProgressionState,
    },
    StageAdded { stage: i64, name: String },
    StageOpened { stage: i64 },
    StageCompleted { stage: i64 },
    MilestoneAdded { milestone: i64, name: String },
    MilestoneOpened { milestone: i64 },
    MilestoneCompleted { milestone: i64 },
    TaskCreated { task: i64, milestone: i64, name: String },
    TaskStarted { task: i64 },
    TaskCompleted { task: i64 },
    SubtaskCompleted { subtask: i64 },
    ItemCompleted { item: i64 },
    ProjectCompleted,
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

pub fn current_state(ops: StateOps<'_>) -> Result<ProgressionState> {
    Ok(ops
        .project()?
        .map(|p| p.phase)
        .unwrap_or(ProgressionState::NotInitialized))
}

/// Move the project to `to`, rejecting moves outside the allowed set.
pub fn transition(
    ops: StateOps<'_>,
    to: ProgressionState,
    events: &mut Vec<ProgressionEvent>,
) -> Result<()> {
    let from = ops.require_project()?.phase;
    if !from.can_move_to(to) {
        return Err(DirectiveError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
            reason: "not a progression step".to_string(),
        });
    }
    if from != to {
        ops.set_phase(to)?;
        info!(branch = ops.branch(), %from, %to, "progression");
        events.push(ProgressionEvent::PhaseChanged { from, to });
    }
    Ok(())
}

pub fn initialize(ops: StateOps<'_>, name: &str) -> Result<Vec<ProgressionEvent>> {
    let mut events = Vec::new();
    ops.create_project(name)?;
    transition(ops, ProgressionState::AwaitingDiscovery, &mut events)?;
    Ok(events)
}

pub fn plan_stage(ops: StateOps<'_>, name: &str) -> Result<(Stage, Vec<ProgressionEvent>)> {
    let mut events = Vec::new();
    let project = ops.require_project()?;
    if project.phase == ProgressionState::Complete {
        reopen_project(ops, ProgressionState::AwaitingDiscovery, &mut events)?;
    }
    let stage = ops.add_stage(name)?;
    events.push(ProgressionEvent::StageAdded {
        stage: stage.id,
        name: stage.name.clone(),
    });
    Ok((stage, events))
}

pub fn plan_milestone(
    ops: StateOps<'_>,
    stage_id: i64,
    name: &str,
    scope: &[String],
    theme: Option<&str>,
) -> Result<(Milestone, Vec<ProgressionEvent>)> {
    let mut events = Vec::new();
    let phase = ops.require_project()?.phase;
    let milestone = ops.add_milestone(stage_id, name, scope, theme)?;
    events.push(ProgressionEvent::MilestoneAdded {
        milestone: milestone.id,
        name: milestone.name.clone(),
    });
    match phase {
        ProgressionState::Complete => {
            reopen_project(ops, ProgressionState::TaskCreationEligible, &mut events)?
        }
        ProgressionState::AwaitingDiscovery
        | ProgressionState::MilestoneTransition
        | ProgressionState::StageTransition => {
            transition(ops, ProgressionState::TaskCreationEligible, &mut events)?
        }
        _ => {}
    }
    Ok((milestone, events))
}

/// Create the single open task of a milestone. Clears the
/// just-completed flags.
pub fn create_task(
    ops: StateOps<'_>,
    milestone_id: i64,
    name: &str,
    priority: i64,
) -> Result<(Task, Vec<ProgressionEvent>)> {
    let mut events = Vec::new();
    let phase = ops.require_project()?.phase;
    if !phase.can_move_to(ProgressionState::ActiveWork) {
        return Err(DirectiveError::InvalidTransition {
            from: phase.to_string(),
            to: ProgressionState::ActiveWork.to_string(),
            reason: "tasks cannot be created in this phase".to_string(),
        });
    }
    let task = new_task(ops, milestone_id, name, priority, &mut events)?;
    ops.set_flag(MILESTONE_JUST_COMPLETED, false)?;
    ops.set_flag(STAGE_JUST_COMPLETED, false)?;
    transition(ops, ProgressionState::ActiveWork, &mut events)?;
    Ok((task, events))
}

pub fn start_task(ops: StateOps<'_>, task_id: i64) -> Result<Vec<ProgressionEvent>> {
    let mut events = Vec::new();
    let task = ops.task(task_id)?;
    if task.status == Status::Pending {
        ops.set_task_status(task_id, Status::InProgress)?;
        events.push(ProgressionEvent::TaskStarted { task: task_id });
    }
    open_milestone(ops, task.milestone_id, &mut events)?;
    transition(ops, ProgressionState::ActiveWork, &mut events)?;
    Ok(events)
}

/// Complete an item and cascade: the last open item of a subtask completes
/// the subtask, and the last open child of a task completes the task.
pub fn complete_item(ops: StateOps<'_>, item_id: i64) -> Result<Vec<ProgressionEvent>> {
    let mut events = Vec::new();
    ensure_open(EntityKind::Item, item_id, ops.item(item_id)?.status)?;
    let item = ops.set_item_status(item_id, Status::Completed)?;
    events.push(ProgressionEvent::ItemCompleted { item: item_id });

    if let Some(subtask_id) = item.subtask_id {
        let subtask = ops.subtask(subtask_id)?;
        if subtask.status.is_open() && ops.open_children("items", "subtask_id", subtask_id)? == 0 {
            ops.set_subtask_status(subtask_id, Status::Completed)?;
            events.push(ProgressionEvent::SubtaskCompleted { subtask: subtask_id });
        }
    }

    let task = ops.task(item.task_id)?;
    let open = ops.open_children("items", "task_id", task.id)?
        + ops.open_children("subtasks", "task_id", task.id)?;
    if task.status.is_open() && open == 0 {
        finish_task(ops, &task, &mut events)?;
    }
    Ok(events)
}

pub fn complete_task(ops: StateOps<'_>, task_id: i64) -> Result<Vec<ProgressionEvent>> {
    let mut events = Vec::new();
    let task = ops.task(task_id)?;
    ensure_open(EntityKind::Task, task.id, task.status)?;
    finish_task(ops, &task, &mut events)?;
    Ok(events)
}

pub fn complete_milestone(ops: StateOps<'_>, milestone_id: i64) -> Result<Vec<ProgressionEvent>> {
    let mut events = Vec::new();
    let milestone = ops.milestone(milestone_id)?;
    finish_milestone(ops, &milestone, &mut events)?;
    Ok(events)
}

pub fn complete_stage(ops: StateOps<'_>, stage_id: i64) -> Result<Vec<ProgressionEvent>> {
    let mut events = Vec::new();
    let stage = ops.stage(stage_id)?;
    finish_stage(ops, &stage, &mut events)?;
    Ok(events)
}

// ---------------------------------------------------------------------------
// Cascade
// ---------------------------------------------------------------------------

/// Completion is one-way; finishing a terminal entity again is refused so the
/// cascade and its flags fire once.
fn ensure_open(kind: EntityKind, id: i64, status: Status) -> Result<()> {
    if status.is_terminal() {
        return Err(DirectiveError::InvalidTransition {
            from: status.to_string(),
            to: Status::Completed.to_string(),
            reason: format!("{kind} {id} is already {status}"),
        });
    }
    Ok(())
}

fn new_task(
    ops: StateOps<'_>,
    milestone_id: i64,
    name: &str,
    priority: i64,
    events: &mut Vec<ProgressionEvent>,
) -> Result<Task> {
    let task = ops.create_task(milestone_id, name, priority)?;
    events.push(ProgressionEvent::TaskCreated {
        task: task.id,
        milestone: milestone_id,
        name: task.name.clone(),
    });
    open_milestone(ops, milestone_id, events)?;
    Ok(task)
}

fn open_milestone(
    ops: StateOps<'_>,
    milestone_id: i64,
    events: &mut Vec<ProgressionEvent>,
) -> Result<()> {
    let milestone = ops.milestone(milestone_id)?;
    if milestone.status == Status::Pending {
        ops.set_milestone_status(milestone_id, Status::InProgress)?;
        events.push(ProgressionEvent::MilestoneOpened {
            milestone: milestone_id,
        });
    }
    let stage = ops.stage(milestone.stage_id)?;
    if stage.status == Status::Pending {
        ops.set_stage_status(stage.id, Status::InProgress)?;
        events.push(ProgressionEvent::StageOpened { stage: stage.id });
    }
    Ok(())
}

fn finish_task(ops: StateOps<'_>, task: &Task, events: &mut Vec<ProgressionEvent>) -> Result<()> {
    ops.set_task_status(task.id, Status::Completed)?;
    events.push(ProgressionEvent::TaskCompleted { task: task.id });

    let milestone = ops.milestone(task.milestone_id)?;
    if ops.open_task(milestone.id)?.is_some() {
        return Ok(());
    }
    match ops.pop_scope(milestone.id)? {
        Some(next) => {
            new_task(ops, milestone.id, &next, 0, events)?;
            Ok(())
        }
        None => finish_milestone(ops, &milestone, events),
    }
}

fn finish_milestone(
    ops: StateOps<'_>,
    milestone: &Milestone,
    events: &mut Vec<ProgressionEvent>,
) -> Result<()> {
    let milestone = ops.milestone(milestone.id)?;
    ensure_open(EntityKind::Milestone, milestone.id, milestone.status)?;
    if !milestone.scope.is_empty() {
        return Err(DirectiveError::StateConsistency(format!(
            "milestone {} still has {} scope entr(ies) to turn into tasks",
            milestone.id,
            milestone.scope.len()
        )));
    }
    ops.set_milestone_status(milestone.id, Status::Completed)?;
    events.push(ProgressionEvent::MilestoneCompleted {
        milestone: milestone.id,
    });
    ops.set_flag(MILESTONE_JUST_COMPLETED, true)?;
    transition(ops, ProgressionState::MilestoneTransition, events)?;

    let next = ops
        .milestones(milestone.stage_id)?
        .into_iter()
        .find(|m| m.status.is_open());
    match next {
        Some(next) => open_with_first_task(ops, &next, events),
        None => {
            let stage = ops.stage(milestone.stage_id)?;
            finish_stage(ops, &stage, events)
        }
    }
}

fn finish_stage(ops: StateOps<'_>, stage: &Stage, events: &mut Vec<ProgressionEvent>) -> Result<()> {
    ensure_open(EntityKind::Stage, stage.id, ops.stage(stage.id)?.status)?;
    ops.set_stage_status(stage.id, Status::Completed)?;
    events.push(ProgressionEvent::StageCompleted { stage: stage.id });
    ops.set_flag(STAGE_JUST_COMPLETED, true)?;
    transition(ops, ProgressionState::StageTransition, events)?;

    let next = ops.stages()?.into_iter().find(|s| s.status.is_open());
    let Some(next) = next else {
        transition(ops, ProgressionState::Complete, events)?;
        ops.set_project_status(Status::Completed)?;
        events.push(ProgressionEvent::ProjectCompleted);
        info!(branch = ops.branch(), "project complete");
        return Ok(());
    };

    let first = ops
        .milestones(next.id)?
        .into_iter()
        .find(|m| m.status.is_open());
    match first {
        Some(milestone) => open_with_first_task(ops, &milestone, events),
        None => transition(ops, ProgressionState::AwaitingDiscovery, events),
    }
}

/// Open `milestone` and create its first task from the remaining scope. A
/// milestone without scope waits for the driver to create a task.
fn open_with_first_task(
    ops: StateOps<'_>,
    milestone: &Milestone,
    events: &mut Vec<ProgressionEvent>,
) -> Result<()> {
    if ops.open_task(milestone.id)?.is_some() {
        open_milestone(ops, milestone.id, events)?;
        return transition(ops, ProgressionState::ActiveWork, events);
    }
    match ops.pop_scope(milestone.id)? {
        Some(first) => {
            new_task(ops, milestone.id, &first, 0, events)?;
            transition(ops, ProgressionState::ActiveWork, events)
        }
        None => transition(ops, ProgressionState::TaskCreationEligible, events),
    }
}

fn reopen_project(
    ops: StateOps<'_>,
    to: ProgressionState,
    events: &mut Vec<ProgressionEvent>,
) -> Result<()> {
    ops.set_project_status(Status::InProgress)?;
    transition(ops, to, events)
}

// ---------------------------------------------------------------------------
// Scope evolution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScopeEvaluation {
    /// Themes the existing structure already represents.
    pub represented: Vec<String>,
    pub added_milestones: Vec<Milestone>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added_stage: Option<Stage>,
    pub events: Vec<ProgressionEvent>,
}

/// Re-evaluate the completion path against a changed theme set. Only themes
/// no milestone represents get a new milestone; a stage is added only when
/// no open stage can hold it.
pub fn reevaluate_scope(ops: StateOps<'_>, signal: &ThemeSignal) -> Result<ScopeEvaluation> {
    let project = ops.require_project()?;
    let mut eval = ScopeEvaluation::default();

    let known: HashSet<String> = ops
        .all_milestones()?
        .into_iter()
        .filter_map(|m| m.theme)
        .collect();

    let mut target: Option<Stage> = ops.stages()?.into_iter().find(|s| s.status.is_open());
    for theme in &signal.themes {
        if known.contains(&theme.name) {
            eval.represented.push(theme.name.clone());
            continue;
        }
        let stage = match &target {
            Some(stage) => stage.clone(),
            None => {
                let stage = ops.add_stage(&format!("Revision {}", signal.revision))?;
                eval.events.push(ProgressionEvent::StageAdded {
                    stage: stage.id,
                    name: stage.name.clone(),
                });
                eval.added_stage = Some(stage.clone());
                target = Some(stage.clone());
                stage
            }
        };
        let milestone = ops.add_milestone(stage.id, &theme.name, &theme.flows, Some(&theme.name))?;
        eval.events.push(ProgressionEvent::MilestoneAdded {
            milestone: milestone.id,
            name: milestone.name.clone(),
        });
        eval.added_milestones.push(milestone);
    }

    if !eval.added_milestones.is_empty() {
        match project.phase {
            ProgressionState::Complete => {
                reopen_project(ops, ProgressionState::TaskCreationEligible, &mut eval.events)?
            }
            ProgressionState::AwaitingDiscovery | ProgressionState::StageTransition => {
                transition(ops, ProgressionState::TaskCreationEligible, &mut eval.events)?
            }
            _ => {}
        }
        info!(
            revision = signal.revision,
            added = eval.added_milestones.len(),
            "scope re-evaluated"
        );
    }
    Ok(eval)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::Theme;
    use crate::project::ProjectStore;

    fn scope(entries: &[&str]) -> Vec<String> {
        entries.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn allowed_moves() {
        use ProgressionState::*;
        assert!(NotInitialized.can_move_to(AwaitingDiscovery));
        assert!(!NotInitialized.can_move_to(ActiveWork));
        assert!(StageTransition.can_move_to(Complete));
        assert!(!ActiveWork.can_move_to(Complete));
        assert!(!Complete.can_move_to(ActiveWork));
        assert!(Complete.can_move_to(Complete));
    }

    #[test]
    fn item_cascade_runs_to_project_complete() {
        let store = ProjectStore::open_in_memory("main").unwrap();
        let ops = store.state();
        initialize(ops, "demo").unwrap();
        let (stage, _) = plan_stage(ops, "Only").unwrap();
        let (m, _) = plan_milestone(ops, stage.id, "Last", &[], None).unwrap();
        assert_eq!(
            current_state(ops).unwrap(),
            ProgressionState::TaskCreationEligible
        );

        let (task, _) = create_task(ops, m.id, "finish", 0).unwrap();
        let item = ops.add_item(task.id, None, "do it").unwrap();
        let events = complete_item(ops, item.id).unwrap();

        assert!(events.contains(&ProgressionEvent::TaskCompleted { task: task.id }));
        assert!(events.contains(&ProgressionEvent::MilestoneCompleted { milestone: m.id }));
        assert!(events.contains(&ProgressionEvent::StageCompleted { stage: stage.id }));
        assert_eq!(events.last(), Some(&ProgressionEvent::ProjectCompleted));
        assert_eq!(current_state(ops).unwrap(), ProgressionState::Complete);
        assert_eq!(ops.require_project().unwrap().status, Status::Completed);
    }

    #[test]
    fn completed_task_pulls_next_from_scope() {
        let store = ProjectStore::open_in_memory("main").unwrap();
        let ops = store.state();
        initialize(ops, "demo").unwrap();
        let (stage, _) = plan_stage(ops, "S").unwrap();
        let (m, _) = plan_milestone(ops, stage.id, "M", &scope(&["second"]), None).unwrap();
        let (first, _) = create_task(ops, m.id, "first", 0).unwrap();

        let events = complete_task(ops, first.id).unwrap();
        let created: Vec<&ProgressionEvent> = events
            .iter()
            .filter(|e| matches!(e, ProgressionEvent::TaskCreated { .. }))
            .collect();
        assert_eq!(created.len(), 1);
        let open = ops.open_task(m.id).unwrap().unwrap();
        assert_eq!(open.name, "second");
        assert_eq!(current_state(ops).unwrap(), ProgressionState::ActiveWork);
    }

    #[test]
    fn milestone_completion_opens_next_with_first_task() {
        let store = ProjectStore::open_in_memory("main").unwrap();
        let ops = store.state();
        initialize(ops, "demo").unwrap();
        let (stage, _) = plan_stage(ops, "S").unwrap();
        let (m1, _) = plan_milestone(ops, stage.id, "M1", &[], None).unwrap();
        let (m2, _) = plan_milestone(ops, stage.id, "M2", &scope(&["kickoff"]), None).unwrap();
        let (t, _) = create_task(ops, m1.id, "only", 0).unwrap();

        let events = complete_task(ops, t.id).unwrap();
        assert!(events.contains(&ProgressionEvent::MilestoneOpened { milestone: m2.id }));
        assert!(ops.flag(MILESTONE_JUST_COMPLETED).unwrap());
        assert_eq!(ops.open_task(m2.id).unwrap().unwrap().name, "kickoff");
        assert_eq!(current_state(ops).unwrap(), ProgressionState::ActiveWork);
    }

    #[test]
    fn next_milestone_without_scope_waits_for_task() {
        let store = ProjectStore::open_in_memory("main").unwrap();
        let ops = store.state();
        initialize(ops, "demo").unwrap();
        let (stage, _) = plan_stage(ops, "S").unwrap();
        let (m1, _) = plan_milestone(ops, stage.id, "M1", &[], None).unwrap();
        let (m2, _) = plan_milestone(ops, stage.id, "M2", &[], None).unwrap();
        let (t, _) = create_task(ops, m1.id, "only", 0).unwrap();
        complete_task(ops, t.id).unwrap();

        assert_eq!(
            current_state(ops).unwrap(),
            ProgressionState::TaskCreationEligible
        );
        assert!(ops.flag(MILESTONE_JUST_COMPLETED).unwrap());
        create_task(ops, m2.id, "next", 0).unwrap();
        assert!(!ops.flag(MILESTONE_JUST_COMPLETED).unwrap());
    }

    #[test]
    fn completing_a_finished_task_again_is_refused() {
        let store = ProjectStore::open_in_memory("main").unwrap();
        let ops = store.state();
        initialize(ops, "demo").unwrap();
        let (stage, _) = plan_stage(ops, "S").unwrap();
        let (m1, _) = plan_milestone(ops, stage.id, "M1", &[], None).unwrap();
        let (m2, _) = plan_milestone(ops, stage.id, "M2", &[], None).unwrap();
        let (t1, _) = create_task(ops, m1.id, "first", 0).unwrap();
        complete_task(ops, t1.id).unwrap();
        create_task(ops, m2.id, "second", 0).unwrap();
        assert!(!ops.flag(MILESTONE_JUST_COMPLETED).unwrap());

        assert!(matches!(
            complete_task(ops, t1.id),
            Err(DirectiveError::InvalidTransition { .. })
        ));
        assert!(matches!(
            complete_milestone(ops, m1.id),
            Err(DirectiveError::InvalidTransition { .. })
        ));
        assert!(!ops.flag(MILESTONE_JUST_COMPLETED).unwrap());
        assert_eq!(current_state(ops).unwrap(), ProgressionState::ActiveWork);
        assert_eq!(ops.milestone(m2.id).unwrap().status, Status::InProgress);
    }

    #[test]
    fn completing_an_item_twice_is_refused() {
        let store = ProjectStore::open_in_memory("main").unwrap();
        let ops = store.state();
        initialize(ops, "demo").unwrap();
        let (stage, _) = plan_stage(ops, "S").unwrap();
        let (m, _) = plan_milestone(ops, stage.id, "M", &[], None).unwrap();
        let (t, _) = create_task(ops, m.id, "t", 0).unwrap();
        let first = ops.add_item(t.id, None, "a").unwrap();
        ops.add_item(t.id, None, "b").unwrap();
        complete_item(ops, first.id).unwrap();
        assert!(matches!(
            complete_item(ops, first.id),
            Err(DirectiveError::InvalidTransition { .. })
        ));
        assert_eq!(ops.task(t.id).unwrap().status, Status::Pending);
    }

    #[test]
    fn cannot_create_task_when_complete() {
        let store = ProjectStore::open_in_memory("main").unwrap();
        let ops = store.state();
        initialize(ops, "demo").unwrap();
        let (stage, _) = plan_stage(ops, "S").unwrap();
        let (m, _) = plan_milestone(ops, stage.id, "M", &[], None).unwrap();
        let (t, _) = create_task(ops, m.id, "t", 0).unwrap();
        complete_task(ops, t.id).unwrap();
        assert!(matches!(
            create_task(ops, m.id, "more", 0),
            Err(DirectiveError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn milestone_with_open_task_cannot_complete() {
        let store = ProjectStore::open_in_memory("main").unwrap();
        let ops = store.state();
        initialize(ops, "demo").unwrap();
        let (stage, _) = plan_stage(ops, "S").unwrap();
        let (m, _) = plan_milestone(ops, stage.id, "M", &[], None).unwrap();
        create_task(ops, m.id, "t", 0).unwrap();
        assert!(matches!(
            complete_milestone(ops, m.id),
            Err(DirectiveError::StateConsistency(_))
        ));
        assert_eq!(current_state(ops).unwrap(), ProgressionState::ActiveWork);
    }

    #[test]
    fn scope_evolution_adds_only_new_themes() {
        let store = ProjectStore::open_in_memory("main").unwrap();
        let ops = store.state();
        initialize(ops, "demo").unwrap();
        let (stage, _) = plan_stage(ops, "S").unwrap();
        plan_milestone(ops, stage.id, "Auth", &[], Some("auth")).unwrap();

        let signal = ThemeSignal {
            revision: 2,
            themes: vec![
                Theme {
                    name: "auth".into(),
                    flows: vec![],
                },
                Theme {
                    name: "billing".into(),
                    flows: vec!["invoices".into()],
                },
            ],
        };
        let eval = reevaluate_scope(ops, &signal).unwrap();
        assert_eq!(eval.represented, vec!["auth"]);
        assert_eq!(eval.added_milestones.len(), 1);
        assert_eq!(eval.added_milestones[0].stage_id, stage.id);
        assert_eq!(eval.added_milestones[0].scope, vec!["invoices"]);
        assert!(eval.added_stage.is_none());

        // Same signal again changes nothing.
        let again = reevaluate_scope(ops, &signal).unwrap();
        assert!(again.added_milestones.is_empty());
    }

    #[test]
    fn scope_evolution_adds_stage_when_all_closed() {
        let store = ProjectStore::open_in_memory("main").unwrap();
        let ops = store.state();
        initialize(ops, "demo").unwrap();
        let (stage, _) = plan_stage(ops, "S").unwrap();
        let (m, _) = plan_milestone(ops, stage.id, "M", &[], None).unwrap();
        let (t, _) = create_task(ops, m.id, "t", 0).unwrap();
        complete_task(ops, t.id).unwrap();
        assert_eq!(current_state(ops).unwrap(), ProgressionState::Complete);

        let signal = ThemeSignal {
            revision: 7,
            themes: vec![Theme {
                name: "search".into(),
                flows: vec!["index".into()],
            }],
        };
        let eval = reevaluate_scope(ops, &signal).unwrap();
        assert_eq!(eval.added_stage.as_ref().unwrap().name, "Revision 7");
        assert_eq!(
            current_state(ops).unwrap(),
            ProgressionState::TaskCreationEligible
        );
        assert_eq!(ops.require_project().unwrap().status, Status::InProgress);
    }
}
