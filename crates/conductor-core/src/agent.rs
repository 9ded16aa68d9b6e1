use serde::{Deserialize, Serialize};

use crate::ids::AgentId;
use crate::provider::{ComputePolicy, ToolChoice};

/// Execution mode an agent is driven through.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    #[default]
    Oneshot,
    React,
    PlanExecute,
}

impl AgentMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Oneshot => "oneshot",
            Self::React => "react",
            Self::PlanExecute => "plan_execute",
        }
    }
}

/// A named budget bucket. Zero means unlimited for both caps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scope {
    pub max_calls: u32,
    pub timeout_ms: u64,
    pub retry_count: u32,
}

impl Scope {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_max_calls(mut self, max_calls: u32) -> Self {
        self.max_calls = max_calls;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn timeout(&self) -> Option<std::time::Duration> {
        (self.timeout_ms > 0).then(|| std::time::Duration::from_millis(self.timeout_ms))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Budget {
    pub run_timeout_ms: u64,
    pub model: Scope,
    pub tool: Scope,
}

impl Budget {
    pub fn run_timeout(&self) -> Option<std::time::Duration> {
        (self.run_timeout_ms > 0).then(|| std::time::Duration::from_millis(self.run_timeout_ms))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSpec {
    pub budget: Budget,
    pub tool_choice: ToolChoice,
    pub compute: ComputePolicy,
}

/// Prompt and tool overrides for one stage. `None` falls back to the agent's
/// defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagePrompt {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageOverrides {
    pub plan: StagePrompt,
    pub execute: StagePrompt,
    pub summary: StagePrompt,
    pub react: StagePrompt,
}

/// Immutable agent configuration, shared across runs as an `Arc`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    #[serde(default)]
    pub id: AgentId,
    pub name: String,
    pub model: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub mode: AgentMode,
    #[serde(default)]
    pub run_spec: RunSpec,
    #[serde(default)]
    pub stages: StageOverrides,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<u32>,
}

impl AgentDefinition {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: AgentId::new(),
            name: name.into(),
            model: model.into(),
            provider: String::new(),
            system_prompt: String::new(),
            tools: Vec::new(),
            skills: Vec::new(),
            mode: AgentMode::default(),
            run_spec: RunSpec::default(),
            stages: StageOverrides::default(),
            max_steps: None,
        }
    }

    pub fn with_mode(mut self, mode: AgentMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skills = skills.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.run_spec.budget = budget;
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    pub fn budget(&self) -> &Budget {
        &self.run_spec.budget
    }

    /// System prompt for a stage, falling back to the agent default.
    pub fn stage_prompt<'a>(&'a self, stage: &'a StagePrompt) -> &'a str {
        stage
            .system_prompt
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(&self.system_prompt)
    }

    /// Tool names for a stage, falling back to the declared tools.
    pub fn stage_tools<'a>(&'a self, stage: &'a StagePrompt) -> &'a [String] {
        stage.tools.as_deref().unwrap_or(&self.tools)
    }
}
