//! Built-in handlers covering the project-state surface. Bundles bind their
//! actions to these by name.

use super::registry::{ActionCall, ActionRegistry};
use crate::error::Result;
use crate::extensions::LifecycleStatus;
use crate::progression;
use crate::snapshot;
use crate::types::EntityKind;
use serde_json::{json, Value};

pub(crate) fn register_all(registry: &mut ActionRegistry) {
    registry.register("project_status", project_status);
    registry.register("init_project", init_project);
    registry.register("plan_stage", plan_stage);
    registry.register("plan_milestone", plan_milestone);
    registry.register("create_task", create_task);
    registry.register("start_task", start_task);
    registry.register("add_subtask", add_subtask);
    registry.register("add_item", add_item);
    registry.register("complete_item", complete_item);
    registry.register("complete_task", complete_task);
    registry.register("complete_milestone", complete_milestone);
    registry.register("pending_tasks", pending_tasks);
    registry.register("list_items", list_items);
    registry.register("reserve_entity", reserve_entity);
    registry.register("finalize_entity", finalize_entity);
    registry.register("get_entity", get_entity);
    registry.register("add_entity", add_entity);
    registry.register("update_entity", update_entity);
    registry.register("delete_entity", delete_entity);
    registry.register("validate_state", validate_state);
    registry.register("extension_status", extension_status);
    registry.register("advance_extension", advance_extension);
}

fn kind(call: &ActionCall<'_>) -> Result<EntityKind> {
    call.str("kind")?.parse()
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

fn project_status(call: &ActionCall<'_>) -> Result<Value> {
    let ops = call.state;
    let project = ops.project()?;
    let open_tasks = ops.open_tasks()?;
    Ok(json!({
        "project": project,
        "state": snapshot::snapshot(ops)?,
        "open_tasks": open_tasks,
    }))
}

fn pending_tasks(call: &ActionCall<'_>) -> Result<Value> {
    let tasks = call.state.pending_tasks(call.int("milestone_id")?)?;
    Ok(json!({ "tasks": tasks }))
}

fn list_items(call: &ActionCall<'_>) -> Result<Value> {
    let items = call.state.items(call.int("task_id")?)?;
    Ok(json!({ "items": items }))
}

fn validate_state(call: &ActionCall<'_>) -> Result<Value> {
    Ok(json!({ "warnings": call.state.validate()? }))
}

// ---------------------------------------------------------------------------
// Progression
// ---------------------------------------------------------------------------

fn init_project(call: &ActionCall<'_>) -> Result<Value> {
    let events = progression::initialize(call.state, call.str("name")?)?;
    Ok(json!({ "project": call.state.project()?, "events": events }))
}

fn plan_stage(call: &ActionCall<'_>) -> Result<Value> {
    let (stage, events) = progression::plan_stage(call.state, call.str("name")?)?;
    Ok(json!({ "stage": stage, "events": events }))
}

fn plan_milestone(call: &ActionCall<'_>) -> Result<Value> {
    let (milestone, events) = progression::plan_milestone(
        call.state,
        call.int("stage_id")?,
        call.str("name")?,
        &call.strings("scope")?,
        call.opt_str("theme")?,
    )?;
    Ok(json!({ "milestone": milestone, "events": events }))
}

fn create_task(call: &ActionCall<'_>) -> Result<Value> {
    let (task, events) = progression::create_task(
        call.state,
        call.int("milestone_id")?,
        call.str("name")?,
        call.opt_int("priority")?.unwrap_or(0),
    )?;
    Ok(json!({ "task": task, "events": events }))
}

fn start_task(call: &ActionCall<'_>) -> Result<Value> {
    let events = progression::start_task(call.state, call.int("task_id")?)?;
    Ok(json!({ "events": events }))
}

fn add_subtask(call: &ActionCall<'_>) -> Result<Value> {
    let kind = match call.opt_str("kind")? {
        Some(k) => k.parse()?,
        None => EntityKind::Subtask,
    };
    let subtask = call.state.add_subtask(
        call.int("task_id")?,
        kind,
        call.str("name")?,
        call.opt_int("priority")?.unwrap_or(0),
    )?;
    Ok(json!({ "subtask": subtask }))
}

fn add_item(call: &ActionCall<'_>) -> Result<Value> {
    let item = call.state.add_item(
        call.int("task_id")?,
        call.opt_int("subtask_id")?,
        call.str("name")?,
    )?;
    Ok(json!({ "item": item }))
}

fn complete_item(call: &ActionCall<'_>) -> Result<Value> {
    let events = progression::complete_item(call.state, call.int("item_id")?)?;
    Ok(json!({ "events": events }))
}

fn complete_task(call: &ActionCall<'_>) -> Result<Value> {
    let events = progression::complete_task(call.state, call.int("task_id")?)?;
    Ok(json!({ "events": events }))
}

fn complete_milestone(call: &ActionCall<'_>) -> Result<Value> {
    let events = progression::complete_milestone(call.state, call.int("milestone_id")?)?;
    Ok(json!({ "events": events }))
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

fn reserve_entity(call: &ActionCall<'_>) -> Result<Value> {
    let reservation = call.state.reserve(kind(call)?, call.object("attrs")?)?;
    Ok(json!(reservation))
}

fn finalize_entity(call: &ActionCall<'_>) -> Result<Value> {
    let reservation = call.state.finalize(call.int("id")?, call.object("attrs")?)?;
    Ok(json!(reservation))
}

fn get_entity(call: &ActionCall<'_>) -> Result<Value> {
    Ok(json!(call.state.get(kind(call)?, call.int("id")?)?))
}

fn add_entity(call: &ActionCall<'_>) -> Result<Value> {
    Ok(json!(call.state.add(kind(call)?, &call.object("fields")?)?))
}

fn update_entity(call: &ActionCall<'_>) -> Result<Value> {
    let record = call
        .state
        .update(kind(call)?, call.int("id")?, &call.object("fields")?)?;
    Ok(json!(record))
}

fn delete_entity(call: &ActionCall<'_>) -> Result<Value> {
    let (kind, id) = (kind(call)?, call.int("id")?);
    call.state.delete(kind, id)?;
    Ok(json!({ "deleted": { "kind": kind, "id": id } }))
}

// ---------------------------------------------------------------------------
// Extensions
// ---------------------------------------------------------------------------

fn extension_status(call: &ActionCall<'_>) -> Result<Value> {
    let store = call.require_extensions()?;
    Ok(json!({
        "actions": store.actions()?,
        "themes": store.themes()?,
        "theme_revision": store.theme_revision()?,
    }))
}

fn advance_extension(call: &ActionCall<'_>) -> Result<Value> {
    let action_id = call.str("action_id")?;
    let target: LifecycleStatus = call.str("status")?.parse()?;
    let from = call.queue_advance(action_id, target)?;
    Ok(json!({ "action_id": action_id, "from": from, "to": target }))
}
