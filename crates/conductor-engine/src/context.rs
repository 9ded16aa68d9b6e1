use std::sync::Arc;

use serde::{Deserialize, Serialize};

use conductor_core::agent::AgentDefinition;
use conductor_core::ids::{RunId, ToolCallId};
use conductor_core::messages::Message;
use conductor_core::plan::{PlanSnapshot, PlanState};

use crate::budget::BudgetState;

/// One dispatched tool call and its outcome. The per-run log of these is
/// append-only and feeds argument template resolution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolRecord {
    pub call_id: ToolCallId,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub result: serde_json::Value,
}

/// Mutable state of a single run. Owned by the run's task and handed by
/// `&mut` through the stage chain; never shared between runs.
pub struct ExecutionContext {
    pub run_id: RunId,
    pub agent: Arc<AgentDefinition>,
    pub history: Vec<Message>,
    pub plan: PlanState,
    pub skill_catalog: Option<String>,
    pub budget: BudgetState,
    records: Vec<ToolRecord>,
}

impl ExecutionContext {
    pub fn new(
        run_id: RunId,
        agent: Arc<AgentDefinition>,
        prior_history: Vec<Message>,
        prior_plan: Option<PlanSnapshot>,
        user_message: String,
    ) -> Self {
        let mut history = prior_history;
        history.push(Message::user_text(user_message));
        let budget = BudgetState::new(*agent.budget());
        Self {
            run_id,
            history,
            plan: prior_plan.map(PlanState::from_snapshot).unwrap_or_default(),
            skill_catalog: None,
            budget,
            records: Vec::new(),
            agent,
        }
    }

    pub fn records(&self) -> &[ToolRecord] {
        &self.records
    }

    pub fn push_record(&mut self, record: ToolRecord) {
        self.records.push(record);
    }

    /// System prompt with the resolved skill catalog appended.
    pub fn system_prompt(&self, base: &str) -> String {
        match &self.skill_catalog {
            Some(catalog) if base.is_empty() => catalog.clone(),
            Some(catalog) => format!("{base}\n\n{catalog}"),
            None => base.to_string(),
        }
    }
}
