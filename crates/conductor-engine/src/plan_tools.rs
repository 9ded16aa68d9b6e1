//! Engine-internal tools that mutate the run's plan. They are handled inline
//! by the dispatcher and never reach the tool registry.

use serde_json::{json, Value};

use conductor_core::ids::TaskId;
use conductor_core::plan::{PlanState, TaskStatus};
use conductor_core::tools::{ToolDefinition, ToolError};

pub const PLAN_ADD_TASKS: &str = "plan_add_tasks";
pub const PLAN_UPDATE_TASK: &str = "plan_update_task";

pub fn is_plan_tool(name: &str) -> bool {
    let name = name.trim();
    name.eq_ignore_ascii_case(PLAN_ADD_TASKS) || name.eq_ignore_ascii_case(PLAN_UPDATE_TASK)
}

pub fn add_tasks_definition() -> ToolDefinition {
    ToolDefinition {
        name: PLAN_ADD_TASKS.into(),
        description: "Append tasks to the plan, in execution order".into(),
        parameters_schema: json!({
            "type": "object",
            "required": ["tasks"],
            "properties": {
                "tasks": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "One short description per task"
                }
            }
        }),
    }
}

pub fn update_task_definition() -> ToolDefinition {
    ToolDefinition {
        name: PLAN_UPDATE_TASK.into(),
        description: "Record the outcome of a plan task".into(),
        parameters_schema: json!({
            "type": "object",
            "required": ["task_id", "status"],
            "properties": {
                "task_id": { "type": "string" },
                "status": { "type": "string", "enum": ["completed", "failed", "canceled"] }
            }
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanChange {
    Added(Vec<TaskId>),
    Updated { task_id: TaskId, status: TaskStatus },
}

impl PlanChange {
    pub fn to_result(&self) -> Value {
        match self {
            Self::Added(ids) => json!({ "ok": true, "task_ids": ids }),
            Self::Updated { task_id, status } => {
                json!({ "ok": true, "task_id": task_id, "status": status })
            }
        }
    }
}

/// Apply a plan tool call to `plan`.
pub fn apply(name: &str, args: &Value, plan: &mut PlanState) -> Result<PlanChange, ToolError> {
    if name.trim().eq_ignore_ascii_case(PLAN_ADD_TASKS) {
        add_tasks(args, plan)
    } else {
        update_task(args, plan)
    }
}

fn add_tasks(args: &Value, plan: &mut PlanState) -> Result<PlanChange, ToolError> {
    let items = args["tasks"]
        .as_array()
        .ok_or_else(|| ToolError::InvalidArguments("tasks array is required".into()))?;

    // Validate everything before touching the plan.
    let descriptions = items
        .iter()
        .map(|item| {
            item.as_str()
                .or_else(|| item["description"].as_str())
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .ok_or_else(|| ToolError::InvalidArguments("each task needs a description".into()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if descriptions.is_empty() {
        return Err(ToolError::InvalidArguments("tasks array is empty".into()));
    }

    let mut ids = Vec::with_capacity(descriptions.len());
    for description in descriptions {
        let id = plan
            .add_task(description)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        ids.push(id);
    }
    Ok(PlanChange::Added(ids))
}

fn update_task(args: &Value, plan: &mut PlanState) -> Result<PlanChange, ToolError> {
    let task_id = args["task_id"]
        .as_str()
        .map(TaskId::from_raw)
        .ok_or_else(|| ToolError::InvalidArguments("task_id is required".into()))?;
    let status = args["status"]
        .as_str()
        .and_then(TaskStatus::parse)
        .filter(|s| s.is_terminal())
        .ok_or_else(|| {
            ToolError::InvalidArguments("status must be completed, failed or canceled".into())
        })?;

    plan.set_status(&task_id, status)
        .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
    Ok(PlanChange::Updated { task_id, status })
}
