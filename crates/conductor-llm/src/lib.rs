//! Model-client implementations. Only the scripted mock ships here; real
//! provider clients implement `conductor_core::provider::ModelClient`
//! outside this workspace.

pub mod mock;

pub use mock::{MockModelClient, MockResponse};
