use std::time::Duration;

use conductor_core::errors::GatewayError;
use conductor_core::ids::{RunId, ToolCallId};
use conductor_core::plan::PlanError;

use crate::budget::CallTimeout;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("model call failed: {0}")]
    ModelTimeout(#[from] CallTimeout),

    #[error("model stream stalled after {0:?} with output already delivered")]
    ModelStalled(Duration),

    #[error("frontend tool {tool} was not completed within {timeout:?}")]
    FrontendSubmitTimeout { tool: String, timeout: Duration },

    #[error("rendezvous error: {0}")]
    Rendezvous(#[from] RendezvousError),

    #[error("plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("event consumer disconnected")]
    ConsumerGone,

    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    /// Errors that end the run without any further events.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::ConsumerGone)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RendezvousError {
    #[error("a submission is already pending for {run_id}/{tool_id}")]
    AlreadyPending { run_id: RunId, tool_id: ToolCallId },

    #[error("no submission within {0:?}")]
    Timeout(Duration),

    #[error("pending submission abandoned")]
    Abandoned,
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| payload.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}
