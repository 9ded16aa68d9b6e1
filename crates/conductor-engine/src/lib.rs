//! Orchestration engine: drives an agent through one conversational turn
//! and streams the resulting delta events.

pub mod budget;
pub mod config;
pub mod context;
pub mod decoder;
pub mod dispatcher;
pub mod error;
pub mod orchestrator;
pub mod plan_tools;
pub mod registry;
pub mod rendezvous;
pub mod resolver;
pub(crate) mod run;
pub mod sink;
pub mod skills;
pub mod stages;

pub use config::{ConfigError, EngineConfig};
pub use error::{EngineError, RendezvousError};
pub use orchestrator::{Orchestrator, FRONTEND_TIMEOUT_MESSAGE, GENERIC_FAILURE_MESSAGE};
pub use registry::ToolRegistry;
pub use rendezvous::{RendezvousRegistry, SubmitAck};
pub use run::BUDGET_EXHAUSTED_MESSAGE;
pub use sink::RunStream;
pub use skills::{Skill, SkillRegistry};
pub use stages::StageRunner;
