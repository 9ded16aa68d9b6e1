//! Per-mode state machines. Each runner moves a run through
//! Deciding, AwaitingTools and Summarizing until Done.

mod oneshot;
mod plan_execute;
mod react;

use conductor_core::agent::{AgentDefinition, AgentMode};

use crate::config::EngineConfig;
use crate::decoder::DecodedCall;
use crate::error::EngineError;
use crate::run::Run;

#[derive(Debug)]
pub(crate) enum StageState {
    Deciding,
    AwaitingTools(Vec<DecodedCall>),
    Summarizing,
    Done,
}

/// Mode dispatch for a run, fixed when the run starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageRunner {
    Oneshot,
    React { max_steps: u32 },
    PlanExecute { max_task_rounds: u32 },
}

impl StageRunner {
    pub fn for_agent(agent: &AgentDefinition, config: &EngineConfig) -> Self {
        match agent.mode {
            AgentMode::Oneshot => Self::Oneshot,
            AgentMode::React => Self::React {
                max_steps: agent
                    .max_steps
                    .filter(|n| *n > 0)
                    .unwrap_or(config.react_max_steps),
            },
            AgentMode::PlanExecute => Self::PlanExecute {
                max_task_rounds: config.max_task_rounds,
            },
        }
    }

    pub fn mode(&self) -> AgentMode {
        match self {
            Self::Oneshot => AgentMode::Oneshot,
            Self::React { .. } => AgentMode::React,
            Self::PlanExecute { .. } => AgentMode::PlanExecute,
        }
    }

    pub(crate) async fn run(&self, run: &mut Run) -> Result<(), EngineError> {
        match *self {
            Self::Oneshot => oneshot::run(run).await,
            Self::React { max_steps } => react::run(run, max_steps).await,
            Self::PlanExecute { max_task_rounds } => plan_execute::run(run, max_task_rounds).await,
        }
    }
}
