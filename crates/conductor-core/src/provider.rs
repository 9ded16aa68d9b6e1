use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;
use crate::messages::Message;
use crate::stream::ModelStream;
use crate::tools::ToolDefinition;

/// How the model may use the tools offered to it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
    Tool(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EffortLevel {
    Low,
    Medium,
    High,
    Max,
}

/// Generation controls forwarded to the model client.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ComputePolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<EffortLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub parallel_tool_calls: bool,
}

/// Everything a model client needs for one streaming call.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelRequest {
    pub model: String,
    pub system_prompt: String,
    pub history: Vec<Message>,
    pub user_prompt: Option<String>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: ToolChoice,
    pub compute: ComputePolicy,
}

impl ModelRequest {
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }
}

/// Streaming model client. Provider wire plumbing lives behind this trait.
#[async_trait]
pub trait ModelClient: Send + Sync {
    fn name(&self) -> &str;

    async fn stream(&self, request: &ModelRequest) -> Result<ModelStream, GatewayError>;
}
