use std::sync::Arc;

use tracing::{instrument, warn};

use super::StageState;
use crate::error::EngineError;
use crate::run::{ModelStep, Run};

/// One decision, at most one tool call, then a summary folding in its result.
#[instrument(skip_all, name = "oneshot", fields(run_id = %run.ctx.run_id))]
pub(super) async fn run(run: &mut Run) -> Result<(), EngineError> {
    let agent = Arc::clone(&run.ctx.agent);
    let mut state = StageState::Deciding;

    loop {
        state = match state {
            StageState::Deciding => {
                let step = ModelStep {
                    system_prompt: agent.system_prompt.clone(),
                    tools: run.tools_for(&Default::default()),
                    tool_choice: agent.run_spec.tool_choice.clone(),
                    directive: None,
                };
                match run.call_model(step).await? {
                    None => StageState::Summarizing,
                    Some(mut turn) => {
                        let dropped = turn.truncate_calls(1);
                        if !dropped.is_empty() {
                            warn!(dropped = dropped.len(), "oneshot keeps only the first tool call");
                        }
                        run.commit(&turn);
                        if turn.has_tool_calls() {
                            StageState::AwaitingTools(turn.tool_calls)
                        } else {
                            StageState::Done
                        }
                    }
                }
            }
            StageState::AwaitingTools(calls) => {
                for call in &calls {
                    run.dispatch(call).await?;
                }
                StageState::Summarizing
            }
            StageState::Summarizing => {
                run.summarize().await?;
                StageState::Done
            }
            StageState::Done => return Ok(()),
        };
    }
}
