use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;
use tracing::{debug, warn};

use conductor_core::agent::StagePrompt;
use conductor_core::events::{DeltaEvent, FinishReason};
use conductor_core::ids::BlockId;
use conductor_core::messages::Message;
use conductor_core::provider::{ModelClient, ModelRequest, ToolChoice};
use conductor_core::tools::ToolDefinition;

use crate::budget::CallTimeout;
use crate::context::ExecutionContext;
use crate::decoder::{DecodedCall, DecodedTurn, DeltaDecoder};
use crate::dispatcher::{DispatchOutcome, ToolDispatcher};
use crate::error::EngineError;
use crate::plan_tools;
use crate::sink::EventSink;

pub const BUDGET_EXHAUSTED_MESSAGE: &str =
    "I ran out of model calls for this request before I could put together a final answer.";

const SUMMARY_DIRECTIVE: &str =
    "Write the final answer for the user based on everything gathered so far. Do not call tools.";

/// Shared collaborators a run calls into.
#[derive(Clone)]
pub(crate) struct RunEnv {
    pub model: Arc<dyn ModelClient>,
    pub dispatcher: ToolDispatcher,
}

/// Inputs of one model call.
pub(crate) struct ModelStep {
    pub system_prompt: String,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: ToolChoice,
    pub directive: Option<String>,
}

enum StreamEnd {
    Complete,
    TimedOut { emitted: bool },
}

/// Everything a running turn owns: its context, decoder and event sink.
pub(crate) struct Run {
    pub env: RunEnv,
    pub ctx: ExecutionContext,
    pub sink: EventSink,
    pub decoder: DeltaDecoder,
}

impl Run {
    pub fn new(env: RunEnv, ctx: ExecutionContext, sink: EventSink) -> Self {
        Self {
            env,
            ctx,
            sink,
            decoder: DeltaDecoder::new(),
        }
    }

    pub fn timed_out(&self) -> bool {
        self.ctx.budget.run_timed_out()
    }

    /// Definitions for a stage's tools. Plan tools may be declared by name
    /// and resolve to their built-in definitions.
    pub fn tools_for(&self, stage: &StagePrompt) -> Vec<ToolDefinition> {
        let agent = &self.ctx.agent;
        let mut registered = Vec::new();
        let mut defs = Vec::new();
        for name in agent.stage_tools(stage) {
            if name.trim().eq_ignore_ascii_case(plan_tools::PLAN_ADD_TASKS) {
                defs.push(plan_tools::add_tasks_definition());
            } else if name.trim().eq_ignore_ascii_case(plan_tools::PLAN_UPDATE_TASK) {
                defs.push(plan_tools::update_task_definition());
            } else {
                registered.push(name.clone());
            }
        }
        let mut out = self.env.dispatcher.registry().definitions_for(&registered);
        out.extend(defs);
        out
    }

    /// Stream one model call through the decoder. Returns `None` when the
    /// model budget denies the call.
    ///
    /// A call that times out before anything was emitted is retried up to
    /// the scope's `retry_count`; once output has reached the consumer it
    /// cannot be replayed, so a later stall fails the run.
    pub async fn call_model(&mut self, step: ModelStep) -> Result<Option<DecodedTurn>, EngineError> {
        if let Err(denied) = self.ctx.budget.admit_model_call() {
            warn!(used = self.ctx.budget.model_calls(), "model call denied: {denied}");
            return Ok(None);
        }

        let agent = Arc::clone(&self.ctx.agent);
        let tool_choice = if step.tools.is_empty() {
            ToolChoice::None
        } else {
            step.tool_choice
        };
        let request = ModelRequest {
            model: agent.model.clone(),
            system_prompt: self.ctx.system_prompt(&step.system_prompt),
            history: self.ctx.history.clone(),
            user_prompt: step.directive,
            tools: step.tools,
            tool_choice,
            compute: agent.run_spec.compute.clone(),
        };

        let scope = self.ctx.budget.budget().model;
        let timeout = scope.timeout();
        let attempts = if timeout.is_some() { scope.retry_count + 1 } else { 1 };

        for attempt in 1..=attempts {
            debug!(attempt, model = %request.model, tools = request.tools.len(), "model call");
            match self.stream_once(&request, timeout).await? {
                StreamEnd::Complete => return Ok(Some(self.decoder.finish_stream())),
                StreamEnd::TimedOut { emitted: false } if attempt < attempts => {
                    warn!(attempt, "model call timed out before any output, retrying");
                    self.decoder.finish_stream();
                }
                StreamEnd::TimedOut { emitted } => {
                    let timeout = timeout.unwrap_or(Duration::ZERO);
                    warn!(attempt, emitted, "model call timed out");
                    return Err(if emitted {
                        EngineError::ModelStalled(timeout)
                    } else {
                        EngineError::ModelTimeout(CallTimeout { attempts, timeout })
                    });
                }
            }
        }
        Err(EngineError::Internal("model call loop exited without a result".into()))
    }

    async fn stream_once(
        &mut self,
        request: &ModelRequest,
        timeout: Option<Duration>,
    ) -> Result<StreamEnd, EngineError> {
        let deadline = timeout.map(|t| Instant::now() + t);

        let open = self.env.model.stream(request);
        let mut stream = match deadline {
            Some(at) => match tokio::time::timeout_at(at, open).await {
                Ok(opened) => opened?,
                Err(_) => return Ok(StreamEnd::TimedOut { emitted: false }),
            },
            None => open.await?,
        };

        let mut emitted = false;
        loop {
            let next = match deadline {
                Some(at) => match tokio::time::timeout_at(at, stream.next()).await {
                    Ok(next) => next,
                    Err(_) => return Ok(StreamEnd::TimedOut { emitted }),
                },
                None => stream.next().await,
            };
            let Some(item) = next else {
                return Ok(StreamEnd::Complete);
            };
            let events = self.decoder.push(item?);
            if !events.is_empty() {
                emitted = true;
                self.sink.emit_all(events).await?;
            }
        }
    }

    /// Record the assistant side of a turn in history.
    pub fn commit(&mut self, turn: &DecodedTurn) {
        if turn.text.is_empty() && turn.reasoning.is_empty() && !turn.has_tool_calls() {
            return;
        }
        self.ctx
            .history
            .push(Message::Assistant(turn.to_assistant_message()));
    }

    pub async fn dispatch(&mut self, call: &DecodedCall) -> Result<DispatchOutcome, EngineError> {
        self.env
            .dispatcher
            .execute(call, &mut self.ctx, &mut self.sink)
            .await
    }

    pub async fn stage_marker(&mut self, label: &str) -> Result<(), EngineError> {
        self.decoder.close_blocks();
        self.sink
            .emit(DeltaEvent::StageMarker {
                label: label.to_string(),
            })
            .await
    }

    /// Emit engine-authored text as a standalone content block.
    pub async fn say(&mut self, text: &str) -> Result<(), EngineError> {
        self.decoder.close_blocks();
        self.sink
            .emit(DeltaEvent::Content {
                block_id: BlockId::new(),
                text: text.to_string(),
            })
            .await?;
        self.ctx.history.push(Message::assistant_text(text));
        Ok(())
    }

    pub async fn plan_update(&mut self) -> Result<(), EngineError> {
        self.sink
            .emit(DeltaEvent::PlanUpdate {
                plan_id: self.ctx.plan.plan_id().clone(),
                tasks: self.ctx.plan.tasks().to_vec(),
            })
            .await
    }

    /// Final synthesis call with no tools. Falls back to a fixed message
    /// when the model budget is already spent.
    pub async fn summarize(&mut self) -> Result<(), EngineError> {
        if self.ctx.budget.model_exhausted() {
            warn!("model budget spent before summary");
            return self.say(BUDGET_EXHAUSTED_MESSAGE).await;
        }
        let agent = Arc::clone(&self.ctx.agent);
        let step = ModelStep {
            system_prompt: agent.stage_prompt(&agent.stages.summary).to_string(),
            tools: Vec::new(),
            tool_choice: ToolChoice::None,
            directive: Some(SUMMARY_DIRECTIVE.to_string()),
        };
        match self.call_model(step).await? {
            Some(turn) => {
                if turn.has_tool_calls() {
                    warn!(calls = turn.tool_calls.len(), "tool calls in summary ignored");
                }
                let mut turn = turn;
                turn.truncate_calls(0);
                self.commit(&turn);
                Ok(())
            }
            None => self.say(BUDGET_EXHAUSTED_MESSAGE).await,
        }
    }

    pub async fn finish(&mut self, reason: FinishReason) -> Result<(), EngineError> {
        self.decoder.close_blocks();
        self.sink.finish(reason).await
    }
}
