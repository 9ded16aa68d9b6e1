use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tracing::{debug, error, instrument, warn};

use conductor_core::agent::Scope;
use conductor_core::events::DeltaEvent;
use conductor_core::messages::Message;
use conductor_core::tools::{Tool, ToolContext, ToolKind};

use crate::budget::retry_on_timeout;
use crate::context::{ExecutionContext, ToolRecord};
use crate::decoder::DecodedCall;
use crate::error::{panic_message, EngineError, RendezvousError};
use crate::plan_tools::{self, PlanChange};
use crate::registry::ToolRegistry;
use crate::rendezvous::RendezvousRegistry;
use crate::resolver;
use crate::sink::EventSink;

/// Structured error payload for a tool call that did not produce data.
pub fn error_result(message: impl std::fmt::Display) -> Value {
    json!({ "ok": false, "error": message.to_string() })
}

/// What one dispatched call produced.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub result: Value,
    pub plan_change: Option<PlanChange>,
}

/// Routes planned tool calls: template resolution, budget gating, then
/// inline plan handling, frontend rendezvous, action acknowledgement or a
/// backend invocation on the shared worker pool.
#[derive(Clone)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    rendezvous: Arc<RendezvousRegistry>,
    workers: Arc<Semaphore>,
    frontend_timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(
        registry: Arc<ToolRegistry>,
        rendezvous: Arc<RendezvousRegistry>,
        workers: Arc<Semaphore>,
        frontend_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            rendezvous,
            workers,
            frontend_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Dispatch one call. Emits at most one echo chunk and exactly one
    /// `ToolResult`, unless the run ends first (frontend timeout or
    /// consumer disconnect), which is returned as an error.
    #[instrument(skip_all, fields(run_id = %ctx.run_id, tool = %call.name, call_id = %call.id))]
    pub async fn execute(
        &self,
        call: &DecodedCall,
        ctx: &mut ExecutionContext,
        sink: &mut EventSink,
    ) -> Result<DispatchOutcome, EngineError> {
        let raw_args = match call.arguments() {
            Ok(args) => args,
            Err(e) => {
                warn!(error = %e, "tool arguments are not valid JSON");
                let result = error_result(format!("invalid JSON arguments: {e}"));
                let raw = Value::String(call.raw_arguments.clone());
                return self.complete(call, raw, result, None, ctx, sink).await;
            }
        };
        let args = resolver::resolve(&call.name, &raw_args, ctx.records());

        if plan_tools::is_plan_tool(&call.name) {
            let (result, change) = match plan_tools::apply(&call.name, &args, &mut ctx.plan) {
                Ok(change) => (change.to_result(), Some(change)),
                Err(e) => {
                    warn!(error = %e, "plan tool rejected");
                    (error_result(e), None)
                }
            };
            return self.complete(call, args, result, change, ctx, sink).await;
        }

        if let Err(denied) = ctx.budget.admit_tool_call() {
            warn!(used = ctx.budget.tool_calls(), "tool call denied: {denied}");
            let result = error_result(denied);
            return self.complete(call, args, result, None, ctx, sink).await;
        }

        let Some(tool) = self.registry.get(&call.name) else {
            warn!("unknown tool");
            let result = error_result(format!("unknown tool: {}", call.name));
            return self.complete(call, args, result, None, ctx, sink).await;
        };

        let result = match tool.kind() {
            ToolKind::Frontend => self.await_frontend(call, &args, ctx, sink).await?,
            ToolKind::Action => {
                sink.emit(echo(call, &args, ToolKind::Action)).await?;
                json!({ "ok": true, "dispatched": true })
            }
            ToolKind::Backend => {
                let tool_ctx = ToolContext {
                    run_id: ctx.run_id.clone(),
                    agent_id: ctx.agent.id.clone(),
                    call_id: call.id.clone(),
                };
                let scope = ctx.budget.budget().tool;
                self.invoke_backend(tool, args.clone(), tool_ctx, &scope).await
            }
        };

        self.complete(call, args, result, None, ctx, sink).await
    }

    /// Suspend until the client submits a result for this call.
    async fn await_frontend(
        &self,
        call: &DecodedCall,
        args: &Value,
        ctx: &ExecutionContext,
        sink: &mut EventSink,
    ) -> Result<Value, EngineError> {
        // Register before echoing so an immediate submission finds the wait.
        let pending = self.rendezvous.register(ctx.run_id.clone(), call.id.clone())?;
        sink.emit(echo(call, args, ToolKind::Frontend)).await?;
        debug!(timeout_ms = self.frontend_timeout.as_millis() as u64, "waiting for frontend result");

        tokio::select! {
            outcome = pending.wait(self.frontend_timeout) => match outcome {
                Ok(payload) => Ok(payload),
                Err(RendezvousError::Timeout(timeout)) => {
                    warn!(timeout_ms = timeout.as_millis() as u64, "frontend result not submitted in time");
                    Err(EngineError::FrontendSubmitTimeout {
                        tool: call.name.clone(),
                        timeout,
                    })
                }
                Err(e) => Err(e.into()),
            },
            _ = sink.closed() => {
                warn!("consumer disconnected during frontend wait");
                Err(EngineError::ConsumerGone)
            }
        }
    }

    /// Run a backend tool body on the blocking pool. The worker permit moves
    /// into the blocking closure, so it is held until the body returns even
    /// if the call has already timed out.
    async fn invoke_backend(
        &self,
        tool: Arc<dyn Tool>,
        args: Value,
        tool_ctx: ToolContext,
        scope: &Scope,
    ) -> Value {
        let name = tool.name().to_string();
        let attempt = || {
            let tool = Arc::clone(&tool);
            let args = args.clone();
            let tool_ctx = tool_ctx.clone();
            let workers = Arc::clone(&self.workers);
            async move {
                let Ok(permit) = workers.acquire_owned().await else {
                    return error_result("tool worker pool closed");
                };
                let handle = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    tool.invoke(args, &tool_ctx)
                });
                match handle.await {
                    Ok(Ok(value)) => value,
                    Ok(Err(e)) => {
                        warn!(error = %e, "tool returned an error");
                        error_result(e)
                    }
                    Err(join) if join.is_panic() => {
                        let msg = panic_message(join.into_panic().as_ref());
                        error!(panic = %msg, "tool panicked during execution");
                        error_result(format!("tool panicked: {msg}"))
                    }
                    Err(join) => {
                        error!(error = %join, "tool task failed");
                        error_result("tool execution failed")
                    }
                }
            }
        };

        match retry_on_timeout(&name, scope, attempt).await {
            Ok(value) => value,
            Err(timeout) => error_result(format!("tool {timeout}")),
        }
    }

    /// Log the call, append it to history and emit its result.
    async fn complete(
        &self,
        call: &DecodedCall,
        args: Value,
        result: Value,
        plan_change: Option<PlanChange>,
        ctx: &mut ExecutionContext,
        sink: &mut EventSink,
    ) -> Result<DispatchOutcome, EngineError> {
        ctx.push_record(ToolRecord {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            arguments: args,
            result: result.clone(),
        });
        ctx.history
            .push(Message::tool_result(call.id.clone(), call.name.clone(), result.clone()));

        sink.emit(DeltaEvent::ToolResult {
            tool_id: call.id.clone(),
            result: result.clone(),
        })
        .await?;
        if plan_change.is_some() {
            sink.emit(DeltaEvent::PlanUpdate {
                plan_id: ctx.plan.plan_id().clone(),
                tasks: ctx.plan.tasks().to_vec(),
            })
            .await?;
        }

        Ok(DispatchOutcome {
            result,
            plan_change,
        })
    }
}

fn echo(call: &DecodedCall, args: &Value, kind: ToolKind) -> DeltaEvent {
    DeltaEvent::ToolCallChunk {
        id: call.id.clone(),
        name: Some(call.name.clone()),
        kind: Some(kind.as_str().to_string()),
        args_chunk: args.to_string(),
        index: call.index,
    }
}
