use std::sync::Arc;

use tracing::{debug, instrument, warn};

use super::StageState;
use crate::error::EngineError;
use crate::run::{ModelStep, Run};

/// Reason-act loop: each decision is a final answer or exactly one tool
/// call. Running out of steps, model budget or run time forces a summary
/// over whatever was gathered.
#[instrument(skip_all, name = "react", fields(run_id = %run.ctx.run_id, max_steps = max_steps))]
pub(super) async fn run(run: &mut Run, max_steps: u32) -> Result<(), EngineError> {
    let agent = Arc::clone(&run.ctx.agent);
    let mut state = StageState::Deciding;
    let mut steps = 0u32;

    loop {
        state = match state {
            StageState::Deciding if steps >= max_steps => {
                warn!(steps, "step budget exhausted, summarizing");
                StageState::Summarizing
            }
            StageState::Deciding if run.timed_out() => {
                warn!(steps, "run timeout reached, summarizing");
                StageState::Summarizing
            }
            StageState::Deciding => {
                steps += 1;
                let step = ModelStep {
                    system_prompt: agent.stage_prompt(&agent.stages.react).to_string(),
                    tools: run.tools_for(&agent.stages.react),
                    tool_choice: agent.run_spec.tool_choice.clone(),
                    directive: None,
                };
                match run.call_model(step).await? {
                    None => StageState::Summarizing,
                    Some(mut turn) => {
                        let dropped = turn.truncate_calls(1);
                        if !dropped.is_empty() {
                            warn!(step = steps, dropped = dropped.len(), "extra tool calls dropped");
                        }
                        run.commit(&turn);
                        if turn.has_tool_calls() {
                            StageState::AwaitingTools(turn.tool_calls)
                        } else {
                            debug!(steps, "final answer");
                            StageState::Done
                        }
                    }
                }
            }
            StageState::AwaitingTools(calls) => {
                for call in &calls {
                    run.dispatch(call).await?;
                }
                StageState::Deciding
            }
            StageState::Summarizing => {
                run.summarize().await?;
                StageState::Done
            }
            StageState::Done => return Ok(()),
        };
    }
}
