use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, RunId, ToolCallId};

/// Where a tool's work actually happens.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Runs inside the engine on the worker pool.
    #[default]
    Backend,
    /// Completed by the client; the run suspends until a result is submitted.
    Frontend,
    /// Client-side side effect with no data coming back.
    Action,
}

impl ToolKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Backend => "backend",
            Self::Frontend => "frontend",
            Self::Action => "action",
        }
    }
}

/// Context available to tools during execution.
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub run_id: RunId,
    pub agent_id: AgentId,
    pub call_id: ToolCallId,
}

/// Tool definition sent to the model as part of the request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// Trait implemented by each tool.
///
/// `invoke` is synchronous: the dispatcher runs backend bodies on a bounded
/// blocking pool, so an implementation is free to block. Frontend and action
/// tools are never invoked; only their metadata is used.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;

    fn kind(&self) -> ToolKind {
        ToolKind::Backend
    }

    fn invoke(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.parameters_schema(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("not invocable: {0}")]
    NotInvocable(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
}
