use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, info_span, warn, Instrument};

use conductor_core::agent::AgentDefinition;
use conductor_core::events::FinishReason;
use conductor_core::ids::{RunId, ToolCallId};
use conductor_core::messages::Message;
use conductor_core::plan::PlanSnapshot;
use conductor_core::provider::ModelClient;

use crate::config::EngineConfig;
use crate::context::ExecutionContext;
use crate::dispatcher::ToolDispatcher;
use crate::error::{panic_message, EngineError};
use crate::registry::ToolRegistry;
use crate::rendezvous::{RendezvousRegistry, SubmitAck};
use crate::run::{Run, RunEnv};
use crate::sink::{EventSink, RunStream};
use crate::skills::SkillRegistry;
use crate::stages::StageRunner;

pub const GENERIC_FAILURE_MESSAGE: &str =
    "Something went wrong while working on this request. Please try again.";

pub const FRONTEND_TIMEOUT_MESSAGE: &str =
    "Timed out waiting for the requested input, so this request was stopped.";

/// Entry point of the engine. Starts runs and routes frontend submissions
/// back to the runs waiting on them.
pub struct Orchestrator {
    model: Arc<dyn ModelClient>,
    dispatcher: ToolDispatcher,
    skills: Arc<SkillRegistry>,
    rendezvous: Arc<RendezvousRegistry>,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(model: Arc<dyn ModelClient>, tools: ToolRegistry, config: EngineConfig) -> Self {
        let rendezvous = Arc::new(RendezvousRegistry::new());
        let dispatcher = ToolDispatcher::new(
            Arc::new(tools),
            Arc::clone(&rendezvous),
            Arc::new(Semaphore::new(config.tool_workers.max(1))),
            config.frontend_submit_timeout(),
        );
        Self {
            model,
            dispatcher,
            skills: Arc::new(SkillRegistry::new()),
            rendezvous,
            config,
        }
    }

    pub fn with_skills(mut self, skills: SkillRegistry) -> Self {
        self.skills = Arc::new(skills);
        self
    }

    pub fn rendezvous(&self) -> &Arc<RendezvousRegistry> {
        &self.rendezvous
    }

    /// Spawn a run and return its event stream. The stream always ends with
    /// exactly one `Finish`, unless it is dropped first.
    pub fn start_run(
        &self,
        agent: Arc<AgentDefinition>,
        prior_history: Vec<Message>,
        prior_plan: Option<PlanSnapshot>,
        user_message: impl Into<String>,
    ) -> RunStream {
        let run_id = RunId::new();
        let runner = StageRunner::for_agent(&agent, &self.config);
        let span = info_span!(
            "run",
            run_id = %run_id,
            agent_id = %agent.id,
            agent = %agent.name,
            mode = ?runner.mode(),
        );

        let mut ctx = ExecutionContext::new(
            run_id.clone(),
            Arc::clone(&agent),
            prior_history,
            prior_plan,
            user_message.into(),
        );
        ctx.skill_catalog = self.skills.format_catalog(&agent.skills);

        let (tx, rx) = mpsc::channel(self.config.event_buffer.max(1));
        let env = RunEnv {
            model: Arc::clone(&self.model),
            dispatcher: self.dispatcher.clone(),
        };
        let run = Run::new(env, ctx, EventSink::new(tx));
        tokio::spawn(drive(run, runner).instrument(span));

        RunStream::new(run_id, rx)
    }

    /// Deliver the payload a frontend tool is waiting for.
    pub fn submit_frontend_result(
        &self,
        run_id: &RunId,
        tool_id: &ToolCallId,
        payload: Value,
    ) -> SubmitAck {
        let ack = self.rendezvous.submit(run_id, tool_id, payload);
        if !ack.accepted {
            warn!(%run_id, %tool_id, reason = ?ack.reason, "frontend submission rejected");
        }
        ack
    }
}

/// Run the stage machine and convert whatever it ends with into a clean
/// end of stream.
async fn drive(mut run: Run, runner: StageRunner) {
    info!("run started");
    let outcome = std::panic::AssertUnwindSafe(runner.run(&mut run))
        .catch_unwind()
        .await;

    let closing = match outcome {
        Ok(Ok(())) => run.finish(FinishReason::Stop).await,
        Ok(Err(e)) if e.is_disconnect() => {
            warn!("consumer disconnected, run abandoned");
            return;
        }
        Ok(Err(e @ EngineError::FrontendSubmitTimeout { .. })) => {
            warn!(error = %e, "run ended waiting for frontend input");
            fail(&mut run, FRONTEND_TIMEOUT_MESSAGE, FinishReason::Timeout).await
        }
        Ok(Err(EngineError::Gateway(e))) => {
            error!(kind = e.kind(), transient = e.is_transient(), error = %e, "model client failed");
            fail(&mut run, GENERIC_FAILURE_MESSAGE, FinishReason::Stop).await
        }
        Ok(Err(e)) => {
            error!(error = %e, "run failed");
            fail(&mut run, GENERIC_FAILURE_MESSAGE, FinishReason::Stop).await
        }
        Err(panic) => {
            error!(panic = %panic_message(panic.as_ref()), "run panicked");
            fail(&mut run, GENERIC_FAILURE_MESSAGE, FinishReason::Stop).await
        }
    };

    match closing {
        Ok(()) => info!(
            model_calls = run.ctx.budget.model_calls(),
            tool_calls = run.ctx.budget.tool_calls(),
            "run finished"
        ),
        Err(e) => warn!(error = %e, "could not deliver end of run"),
    }
}

async fn fail(run: &mut Run, message: &str, reason: FinishReason) -> Result<(), EngineError> {
    run.say(message).await?;
    run.finish(reason).await
}
