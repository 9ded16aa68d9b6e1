use serde::{Deserialize, Serialize};

use crate::ids::{PlanId, TaskId};

/// Lifecycle of a single plan task. Every status other than `Init` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Init,
    Completed,
    Failed,
    Canceled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Init)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "init" => Some(Self::Init),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "canceled" | "cancelled" => Some(Self::Canceled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanTask {
    pub task_id: TaskId,
    pub description: String,
    pub status: TaskStatus,
}

/// Serializable copy of a run's plan, used to seed a follow-up run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSnapshot {
    pub plan_id: PlanId,
    pub tasks: Vec<PlanTask>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("unknown task: {0}")]
    UnknownTask(TaskId),
    #[error("task {task_id} is already {status} and cannot change")]
    AlreadyTerminal { task_id: TaskId, status: &'static str },
    #[error("empty task description")]
    EmptyDescription,
}

/// The ordered task list of a run. Tasks are append-only; a terminal
/// status is never reverted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanState {
    plan_id: PlanId,
    tasks: Vec<PlanTask>,
}

impl PlanState {
    pub fn new() -> Self {
        Self {
            plan_id: PlanId::new(),
            tasks: Vec::new(),
        }
    }

    pub fn from_snapshot(snapshot: PlanSnapshot) -> Self {
        Self {
            plan_id: snapshot.plan_id,
            tasks: snapshot.tasks,
        }
    }

    pub fn plan_id(&self) -> &PlanId {
        &self.plan_id
    }

    pub fn tasks(&self) -> &[PlanTask] {
        &self.tasks
    }

    pub fn task(&self, task_id: &TaskId) -> Option<&PlanTask> {
        self.tasks.iter().find(|t| &t.task_id == task_id)
    }

    pub fn has_open_tasks(&self) -> bool {
        self.tasks.iter().any(|t| !t.status.is_terminal())
    }

    /// Next task still in `Init`, in plan order.
    pub fn next_open(&self) -> Option<&PlanTask> {
        self.tasks.iter().find(|t| !t.status.is_terminal())
    }

    pub fn add_task(&mut self, description: impl Into<String>) -> Result<TaskId, PlanError> {
        let description = description.into();
        if description.trim().is_empty() {
            return Err(PlanError::EmptyDescription);
        }
        let task_id = TaskId::new();
        self.tasks.push(PlanTask {
            task_id: task_id.clone(),
            description,
            status: TaskStatus::Init,
        });
        Ok(task_id)
    }

    pub fn set_status(&mut self, task_id: &TaskId, status: TaskStatus) -> Result<(), PlanError> {
        let task = self
            .tasks
            .iter_mut()
            .find(|t| &t.task_id == task_id)
            .ok_or_else(|| PlanError::UnknownTask(task_id.clone()))?;
        if task.status.is_terminal() {
            if task.status == status {
                return Ok(());
            }
            return Err(PlanError::AlreadyTerminal {
                task_id: task_id.clone(),
                status: task.status.as_str(),
            });
        }
        task.status = status;
        Ok(())
    }

    /// Cancel every task still open. Returns how many changed.
    pub fn cancel_open(&mut self) -> usize {
        let mut changed = 0;
        for task in self.tasks.iter_mut().filter(|t| !t.status.is_terminal()) {
            task.status = TaskStatus::Canceled;
            changed += 1;
        }
        changed
    }

    pub fn snapshot(&self) -> PlanSnapshot {
        PlanSnapshot {
            plan_id: self.plan_id.clone(),
            tasks: self.tasks.clone(),
        }
    }
}

impl Default for PlanState {
    fn default() -> Self {
        Self::new()
    }
}
