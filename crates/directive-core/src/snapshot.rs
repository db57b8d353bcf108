//! Derive the resolver's [`StateSnapshot`] from project state.

use crate::error::Result;
use crate::progression::{self, ProgressionState, MILESTONE_JUST_COMPLETED, STAGE_JUST_COMPLETED};
use crate::project::StateOps;
use crate::resolver::StateSnapshot;

pub const PROJECT_INITIALIZED: &str = "project_initialized";
pub const PROGRESSION: &str = "progression";
pub const HAS_OPEN_TASK: &str = "has_open_task";
pub const HAS_INCOMPLETE_ITEMS: &str = "has_incomplete_items";
pub const PROJECT_COMPLETE: &str = "project_complete";
pub const HAS_STAGES: &str = "has_stages";
pub const HAS_ORPHANED_RESERVATIONS: &str = "has_orphaned_reservations";

pub fn snapshot(ops: StateOps<'_>) -> Result<StateSnapshot> {
    let phase = progression::current_state(ops)?;
    let open_tasks = ops.open_tasks()?;

    let mut incomplete_items = false;
    for task in &open_tasks {
        if ops.items(task.id)?.iter().any(|i| i.status.is_open()) {
            incomplete_items = true;
            break;
        }
    }

    Ok(StateSnapshot::new()
        .with(PROJECT_INITIALIZED, phase != ProgressionState::NotInitialized)
        .with(PROGRESSION, phase.as_str())
        .with(HAS_OPEN_TASK, !open_tasks.is_empty())
        .with(HAS_INCOMPLETE_ITEMS, incomplete_items)
        .with(MILESTONE_JUST_COMPLETED, ops.flag(MILESTONE_JUST_COMPLETED)?)
        .with(STAGE_JUST_COMPLETED, ops.flag(STAGE_JUST_COMPLETED)?)
        .with(PROJECT_COMPLETE, phase == ProgressionState::Complete)
        .with(HAS_STAGES, !ops.stages()?.is_empty())
        .with(
            HAS_ORPHANED_RESERVATIONS,
            !ops.provisional_entities()?.is_empty(),
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::ProjectStore;
    use crate::types::StateValue;

    #[test]
    fn fresh_branch_is_uninitialized() {
        let store = ProjectStore::open_in_memory("main").unwrap();
        let snap = snapshot(store.state()).unwrap();
        assert_eq!(snap.get(PROJECT_INITIALIZED), Some(&StateValue::Bool(false)));
        assert_eq!(
            snap.get(PROGRESSION),
            Some(&StateValue::Text("not_initialized".into()))
        );
        assert!(!snap.flag(HAS_OPEN_TASK));
    }

    #[test]
    fn active_work_reports_open_task_and_items() {
        let store = ProjectStore::open_in_memory("main").unwrap();
        let ops = store.state();
        progression::initialize(ops, "demo").unwrap();
        let (stage, _) = progression::plan_stage(ops, "S").unwrap();
        let (m, _) = progression::plan_milestone(ops, stage.id, "M", &[], None).unwrap();
        let (task, _) = progression::create_task(ops, m.id, "T", 0).unwrap();
        ops.add_item(task.id, None, "item").unwrap();

        let snap = snapshot(ops).unwrap();
        assert!(snap.flag(PROJECT_INITIALIZED));
        assert!(snap.flag(HAS_OPEN_TASK));
        assert!(snap.flag(HAS_INCOMPLETE_ITEMS));
        assert!(snap.flag(HAS_STAGES));
        assert_eq!(
            snap.get(PROGRESSION),
            Some(&StateValue::Text("active_work".into()))
        );
    }
}
