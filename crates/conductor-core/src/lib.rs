//! Shared data model for the conductor engine: identifiers, agent
//! definitions, messages, plan state, delta events and the model-client and
//! tool seams.

pub mod agent;
pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;
pub mod plan;
pub mod provider;
pub mod stream;
pub mod tools;
