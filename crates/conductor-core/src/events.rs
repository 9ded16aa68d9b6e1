use serde::{Deserialize, Serialize};

use crate::ids::{BlockId, PlanId, ToolCallId};
use crate::plan::PlanTask;

/// Canonical run-progress events, the engine's only output.
///
/// Ordering contract for one run: events arrive in emission order, text
/// deltas sharing a `block_id` belong to one open block, and exactly one
/// `Finish` closes the stream as its last event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeltaEvent {
    Content {
        block_id: BlockId,
        text: String,
    },

    Reasoning {
        block_id: BlockId,
        text: String,
    },

    ToolCallChunk {
        id: ToolCallId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(rename = "call_type", default, skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
        args_chunk: String,
        index: u32,
    },

    ToolResult {
        tool_id: ToolCallId,
        result: serde_json::Value,
    },

    PlanUpdate {
        plan_id: PlanId,
        tasks: Vec<PlanTask>,
    },

    StageMarker {
        label: String,
    },

    Finish {
        reason: FinishReason,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Timeout,
}

impl DeltaEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Content { .. } => "content",
            Self::Reasoning { .. } => "reasoning",
            Self::ToolCallChunk { .. } => "tool_call_chunk",
            Self::ToolResult { .. } => "tool_result",
            Self::PlanUpdate { .. } => "plan_update",
            Self::StageMarker { .. } => "stage_marker",
            Self::Finish { .. } => "finish",
        }
    }

    pub fn is_finish(&self) -> bool {
        matches!(self, Self::Finish { .. })
    }

    /// Text payload of content and reasoning deltas.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Content { text, .. } | Self::Reasoning { text, .. } => Some(text),
            _ => None,
        }
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Stop => "stop",
            Self::Timeout => "timeout",
        })
    }
}
