use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use conductor_core::plan::{PlanTask, TaskStatus};
use conductor_core::provider::ToolChoice;

use super::StageState;
use crate::error::EngineError;
use crate::plan_tools::{self, PLAN_ADD_TASKS, PLAN_UPDATE_TASK};
use crate::run::{ModelStep, Run};

/// Plan, execute each task, then summarize.
#[instrument(skip_all, name = "plan_execute", fields(run_id = %run.ctx.run_id))]
pub(super) async fn run(run: &mut Run, max_task_rounds: u32) -> Result<(), EngineError> {
    run.stage_marker("plan").await?;
    if run.ctx.plan.has_open_tasks() {
        info!(tasks = run.ctx.plan.tasks().len(), "continuing seeded plan");
    } else if run.timed_out() {
        warn!("run timeout reached before planning");
    } else {
        plan(run).await?;
    }

    run.stage_marker("execute").await?;
    execute(run, max_task_rounds).await?;

    run.stage_marker("summary").await?;
    run.summarize().await
}

async fn plan(run: &mut Run) -> Result<(), EngineError> {
    let agent = Arc::clone(&run.ctx.agent);
    let available = run
        .tools_for(&agent.stages.execute)
        .into_iter()
        .map(|d| d.name)
        .collect::<Vec<_>>();
    let directive = if available.is_empty() {
        format!("Break the request into ordered tasks and record them with {PLAN_ADD_TASKS}.")
    } else {
        format!(
            "Break the request into ordered tasks and record them with {PLAN_ADD_TASKS}. \
             Tools available when executing: {}.",
            available.join(", ")
        )
    };
    let step = ModelStep {
        system_prompt: agent.stage_prompt(&agent.stages.plan).to_string(),
        tools: vec![plan_tools::add_tasks_definition()],
        tool_choice: ToolChoice::Tool(PLAN_ADD_TASKS.to_string()),
        directive: Some(directive),
    };

    let Some(turn) = run.call_model(step).await? else {
        return Ok(());
    };
    run.commit(&turn);
    for call in &turn.tool_calls {
        run.dispatch(call).await?;
    }
    debug!(tasks = run.ctx.plan.tasks().len(), "plan recorded");
    Ok(())
}

async fn execute(run: &mut Run, max_task_rounds: u32) -> Result<(), EngineError> {
    while let Some(task) = run.ctx.plan.next_open().cloned() {
        if run.timed_out() {
            warn!("run timeout reached, canceling open tasks");
            return cancel_open(run).await;
        }
        if !run_task(run, &task, max_task_rounds).await? {
            warn!("model budget spent, canceling open tasks");
            return cancel_open(run).await;
        }
    }
    Ok(())
}

/// Drive one task until the model reports its outcome, its rounds run out
/// or the run times out. Returns false when the model budget denied a call.
#[instrument(skip_all, fields(task_id = %task.task_id))]
async fn run_task(run: &mut Run, task: &PlanTask, max_task_rounds: u32) -> Result<bool, EngineError> {
    let agent = Arc::clone(&run.ctx.agent);
    let mut tools = run.tools_for(&agent.stages.execute);
    if !tools.iter().any(|t| t.name == PLAN_UPDATE_TASK) {
        tools.push(plan_tools::update_task_definition());
    }
    let directive = format!(
        "Current task {}: {}\nWhen it is done, or cannot be done, call {PLAN_UPDATE_TASK} \
         with this task_id and the outcome.",
        task.task_id, task.description
    );

    let mut rounds = 0u32;
    let mut state = StageState::Deciding;
    loop {
        state = match state {
            StageState::Deciding if is_settled(run, task) => StageState::Done,
            StageState::Deciding if rounds >= max_task_rounds => {
                warn!(rounds, "task rounds exhausted, marking failed");
                run.ctx.plan.set_status(&task.task_id, TaskStatus::Failed)?;
                run.plan_update().await?;
                StageState::Done
            }
            StageState::Deciding if run.timed_out() => StageState::Done,
            StageState::Deciding => {
                rounds += 1;
                let step = ModelStep {
                    system_prompt: agent.stage_prompt(&agent.stages.execute).to_string(),
                    tools: tools.clone(),
                    tool_choice: agent.run_spec.tool_choice.clone(),
                    directive: Some(directive.clone()),
                };
                match run.call_model(step).await? {
                    None => return Ok(false),
                    Some(turn) => {
                        run.commit(&turn);
                        if turn.has_tool_calls() {
                            StageState::AwaitingTools(turn.tool_calls)
                        } else {
                            debug!(round = rounds, "no tool call this round");
                            StageState::Deciding
                        }
                    }
                }
            }
            // Sequential, in requested order: later calls may reference
            // earlier results through templates.
            StageState::AwaitingTools(calls) => {
                for call in &calls {
                    run.dispatch(call).await?;
                }
                StageState::Deciding
            }
            StageState::Summarizing | StageState::Done => return Ok(true),
        };
    }
}

fn is_settled(run: &Run, task: &PlanTask) -> bool {
    run.ctx
        .plan
        .task(&task.task_id)
        .map_or(true, |t| t.status.is_terminal())
}

async fn cancel_open(run: &mut Run) -> Result<(), EngineError> {
    if run.ctx.plan.cancel_open() > 0 {
        run.plan_update().await?;
    }
    Ok(())
}
