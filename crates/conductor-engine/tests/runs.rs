//! End-to-end runs through the orchestrator against a scripted model.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};

use conductor_core::agent::{AgentDefinition, AgentMode, Budget, Scope};
use conductor_core::errors::GatewayError;
use conductor_core::events::{DeltaEvent, FinishReason};
use conductor_core::ids::{PlanId, TaskId, ToolCallId};
use conductor_core::plan::{PlanSnapshot, PlanTask, TaskStatus};
use conductor_core::provider::{ModelClient, ModelRequest, ToolChoice};
use conductor_core::stream::{ModelChunk, ModelStream};
use conductor_core::tools::{Tool, ToolContext, ToolError, ToolKind};
use conductor_engine::{
    EngineConfig, Orchestrator, RunStream, ToolRegistry, BUDGET_EXHAUSTED_MESSAGE,
    FRONTEND_TIMEOUT_MESSAGE, GENERIC_FAILURE_MESSAGE,
};
use conductor_llm::{MockModelClient, MockResponse};

// ── helpers ──

struct EchoTool {
    name: &'static str,
    calls: AtomicUsize,
}

impl EchoTool {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Tool for EchoTool {
    fn name(&self) -> &str {
        self.name
    }
    fn description(&self) -> &str {
        "Returns its arguments"
    }
    fn parameters_schema(&self) -> Value {
        json!({ "type": "object" })
    }
    fn invoke(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(args)
    }
}

struct FixedTool {
    name: &'static str,
    result: Value,
}

impl Tool for FixedTool {
    fn name(&self) -> &str {
        self.name
    }
    fn description(&self) -> &str {
        "Returns a fixed value"
    }
    fn parameters_schema(&self) -> Value {
        json!({ "type": "object" })
    }
    fn invoke(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        Ok(self.result.clone())
    }
}

struct PanickingTool;

impl Tool for PanickingTool {
    fn name(&self) -> &str {
        "explode"
    }
    fn description(&self) -> &str {
        "Always panics"
    }
    fn parameters_schema(&self) -> Value {
        json!({ "type": "object" })
    }
    fn invoke(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        panic!("kaboom");
    }
}

struct ConfirmTool;

impl Tool for ConfirmTool {
    fn name(&self) -> &str {
        "confirm"
    }
    fn description(&self) -> &str {
        "Ask the user to confirm"
    }
    fn parameters_schema(&self) -> Value {
        json!({ "type": "object" })
    }
    fn kind(&self) -> ToolKind {
        ToolKind::Frontend
    }
    fn invoke(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        Err(ToolError::NotInvocable("confirm".into()))
    }
}

struct PanickingModel;

#[async_trait]
impl ModelClient for PanickingModel {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn stream(&self, _request: &ModelRequest) -> Result<ModelStream, GatewayError> {
        panic!("model client bug");
    }
}

fn registry(tools: Vec<Arc<dyn Tool>>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool);
    }
    registry
}

fn agent(mode: AgentMode, tools: &[&str]) -> AgentDefinition {
    AgentDefinition::new("tester", "mock-model")
        .with_mode(mode)
        .with_system_prompt("You are a test agent.")
        .with_tools(tools.iter().copied())
}

async fn collect(stream: RunStream) -> Vec<DeltaEvent> {
    stream.collect().await
}

fn assert_single_finish(events: &[DeltaEvent], reason: FinishReason) {
    let finishes = events.iter().filter(|e| e.is_finish()).count();
    assert_eq!(finishes, 1, "expected exactly one finish: {events:#?}");
    assert_eq!(events.last(), Some(&DeltaEvent::Finish { reason }));
}

fn content(events: &[DeltaEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            DeltaEvent::Content { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

fn tool_results(events: &[DeltaEvent]) -> Vec<(ToolCallId, Value)> {
    events
        .iter()
        .filter_map(|e| match e {
            DeltaEvent::ToolResult { tool_id, result } => Some((tool_id.clone(), result.clone())),
            _ => None,
        })
        .collect()
}

fn markers(events: &[DeltaEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            DeltaEvent::StageMarker { label } => Some(label.clone()),
            _ => None,
        })
        .collect()
}

fn last_plan(events: &[DeltaEvent]) -> Vec<PlanTask> {
    events
        .iter()
        .rev()
        .find_map(|e| match e {
            DeltaEvent::PlanUpdate { tasks, .. } => Some(tasks.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

// ── oneshot ──

#[tokio::test]
async fn oneshot_direct_answer() {
    let model = Arc::new(MockModelClient::new(vec![MockResponse::text_chunks(&[
        "Hello", ", world",
    ])]));
    let orch = Orchestrator::new(model.clone(), ToolRegistry::new(), EngineConfig::default());

    let events = collect(orch.start_run(Arc::new(agent(AgentMode::Oneshot, &[])), vec![], None, "hi")).await;

    assert_eq!(content(&events), "Hello, world");
    assert_single_finish(&events, FinishReason::Stop);
    assert_eq!(model.call_count(), 1);
    let request = &model.requests()[0];
    assert_eq!(request.tool_choice, ToolChoice::None);
    assert!(request.system_prompt.starts_with("You are a test agent."));
}

#[tokio::test]
async fn oneshot_tool_then_summary() {
    let lookup = EchoTool::new("lookup");
    let model = Arc::new(MockModelClient::new(vec![
        MockResponse::tool_call("c1", "lookup", json!({"q": "rust"})),
        MockResponse::text("Rust is a language."),
    ]));
    let orch = Orchestrator::new(
        model.clone(),
        registry(vec![lookup.clone() as Arc<dyn Tool>]),
        EngineConfig::default(),
    );

    let events = collect(orch.start_run(
        Arc::new(agent(AgentMode::Oneshot, &["lookup"])),
        vec![],
        None,
        "what is rust",
    ))
    .await;

    let results = tool_results(&events);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0.as_str(), "c1");
    assert_eq!(results[0].1, json!({"q": "rust"}));
    assert_eq!(lookup.calls(), 1);
    assert_eq!(content(&events), "Rust is a language.");
    assert_single_finish(&events, FinishReason::Stop);

    // The summary call sees the tool result and offers no tools.
    let summary = &model.requests()[1];
    assert!(summary.tools.is_empty());
    assert_eq!(summary.tool_choice, ToolChoice::None);
    assert_eq!(summary.history.len(), 3);
}

#[tokio::test]
async fn oneshot_drops_extra_calls() {
    let lookup = EchoTool::new("lookup");
    let model = Arc::new(MockModelClient::new(vec![
        MockResponse::tool_calls(&[
            ("c1", "lookup", json!({"n": 1})),
            ("c2", "lookup", json!({"n": 2})),
        ]),
        MockResponse::text("done"),
    ]));
    let orch = Orchestrator::new(
        model,
        registry(vec![lookup.clone() as Arc<dyn Tool>]),
        EngineConfig::default(),
    );

    let events =
        collect(orch.start_run(Arc::new(agent(AgentMode::Oneshot, &["lookup"])), vec![], None, "go")).await;

    let results = tool_results(&events);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0.as_str(), "c1");
    assert_eq!(lookup.calls(), 1);
    assert_single_finish(&events, FinishReason::Stop);
}

// ── react ──

#[tokio::test]
async fn react_forced_summary_after_max_steps() {
    let search = EchoTool::new("search");
    let mut script: Vec<MockResponse> = (0..3)
        .map(|i| MockResponse::tool_call(&format!("c{i}"), "search", json!({"step": i})))
        .collect();
    script.push(MockResponse::text("Here is what I found."));
    let model = Arc::new(MockModelClient::new(script));
    let orch = Orchestrator::new(
        model.clone(),
        registry(vec![search.clone() as Arc<dyn Tool>]),
        EngineConfig::default(),
    );

    let agent = agent(AgentMode::React, &["search"]).with_max_steps(3);
    let events = collect(orch.start_run(Arc::new(agent), vec![], None, "dig")).await;

    assert_eq!(model.call_count(), 4);
    assert_eq!(search.calls(), 3);
    assert_eq!(tool_results(&events).len(), 3);
    assert_eq!(content(&events), "Here is what I found.");
    assert_eq!(model.requests()[3].tool_choice, ToolChoice::None);
    assert_single_finish(&events, FinishReason::Stop);
}

#[tokio::test]
async fn react_tool_budget_denies_third_call() {
    let search = EchoTool::new("search");
    let mut script: Vec<MockResponse> = (0..3)
        .map(|i| MockResponse::tool_call(&format!("c{i}"), "search", json!({})))
        .collect();
    script.push(MockResponse::text("partial answer"));
    let model = Arc::new(MockModelClient::new(script));
    let orch = Orchestrator::new(
        model,
        registry(vec![search.clone() as Arc<dyn Tool>]),
        EngineConfig::default(),
    );

    let budget = Budget {
        tool: Scope::unlimited().with_max_calls(2),
        ..Budget::default()
    };
    let agent = agent(AgentMode::React, &["search"]).with_budget(budget);
    let events = collect(orch.start_run(Arc::new(agent), vec![], None, "dig")).await;

    let results = tool_results(&events);
    assert_eq!(results.len(), 3);
    assert_eq!(search.calls(), 2);
    assert_eq!(results[2].1["ok"], json!(false));
    assert!(results[2].1["error"].as_str().unwrap().contains("tool"));
    assert_single_finish(&events, FinishReason::Stop);
}

#[tokio::test]
async fn react_resolves_templates_from_earlier_results() {
    let weather = Arc::new(FixedTool {
        name: "weather",
        result: json!({"date": "2024-01-01", "temp": 3}),
    });
    let calendar = EchoTool::new("calendar");
    let model = Arc::new(MockModelClient::new(vec![
        MockResponse::tool_call("c1", "weather", json!({})),
        MockResponse::tool_call(
            "c2",
            "calendar",
            json!({"day": "{{weather.date+1d}}", "note": "{{missing.field}}"}),
        ),
        MockResponse::text("Booked."),
    ]));
    let orch = Orchestrator::new(
        model,
        registry(vec![weather as Arc<dyn Tool>, calendar.clone() as Arc<dyn Tool>]),
        EngineConfig::default(),
    );

    let events = collect(orch.start_run(
        Arc::new(agent(AgentMode::React, &["weather", "calendar"])),
        vec![],
        None,
        "book the day after",
    ))
    .await;

    let results = tool_results(&events);
    assert_eq!(
        results[1].1,
        json!({"day": "2024-01-02", "note": "{{missing.field}}"})
    );
    assert_single_finish(&events, FinishReason::Stop);
}

#[tokio::test]
async fn react_split_arguments_attributed_to_first_id() {
    let search = EchoTool::new("search");
    let model = Arc::new(MockModelClient::new(vec![
        MockResponse::split_tool_call("c1", "search", &["{\"q\":", "\"rust\"}"]),
        MockResponse::text("ok"),
    ]));
    let orch = Orchestrator::new(
        model,
        registry(vec![search as Arc<dyn Tool>]),
        EngineConfig::default(),
    );

    let events =
        collect(orch.start_run(Arc::new(agent(AgentMode::React, &["search"])), vec![], None, "q")).await;

    let results = tool_results(&events);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0.as_str(), "c1");
    assert_eq!(results[0].1, json!({"q": "rust"}));
}

// ── plan / execute ──

fn seeded_plan() -> PlanSnapshot {
    PlanSnapshot {
        plan_id: PlanId::from_raw("plan-1"),
        tasks: vec![
            PlanTask {
                task_id: TaskId::from_raw("t1"),
                description: "gather facts".into(),
                status: TaskStatus::Init,
            },
            PlanTask {
                task_id: TaskId::from_raw("t2"),
                description: "write it up".into(),
                status: TaskStatus::Init,
            },
        ],
    }
}

#[tokio::test]
async fn plan_execute_runs_seeded_tasks() {
    let search = EchoTool::new("search");
    let model = Arc::new(MockModelClient::new(vec![
        MockResponse::tool_call("u1", "plan_update_task", json!({"task_id": "t1", "status": "completed"})),
        MockResponse::tool_calls(&[
            ("s1", "search", json!({"q": "x"})),
            ("u2", "plan_update_task", json!({"task_id": "t2", "status": "completed"})),
        ]),
        MockResponse::text("All done."),
    ]));
    let orch = Orchestrator::new(
        model.clone(),
        registry(vec![search.clone() as Arc<dyn Tool>]),
        EngineConfig::default(),
    );

    let events = collect(orch.start_run(
        Arc::new(agent(AgentMode::PlanExecute, &["search"])),
        vec![],
        Some(seeded_plan()),
        "do it",
    ))
    .await;

    assert_eq!(markers(&events), vec!["plan", "execute", "summary"]);
    let plan = last_plan(&events);
    assert!(plan.iter().all(|t| t.status == TaskStatus::Completed));
    assert_eq!(search.calls(), 1);
    assert_eq!(tool_results(&events).len(), 3);
    assert_eq!(content(&events), "All done.");
    // No planning call: seeded open tasks skip straight to execution.
    assert_eq!(model.call_count(), 3);
    assert!(model.requests()[0]
        .user_prompt
        .as_deref()
        .unwrap_or_default()
        .contains("t1"));
    assert_single_finish(&events, FinishReason::Stop);
}

#[tokio::test]
async fn plan_execute_plans_then_fails_stuck_tasks() {
    let model = Arc::new(
        MockModelClient::new(vec![MockResponse::tool_call(
            "p1",
            "plan_add_tasks",
            json!({"tasks": ["first", "second"]}),
        )])
        .with_fallback(MockResponse::text("thinking")),
    );
    let config = EngineConfig {
        max_task_rounds: 1,
        ..EngineConfig::default()
    };
    let orch = Orchestrator::new(model.clone(), ToolRegistry::new(), config);

    let events = collect(orch.start_run(
        Arc::new(agent(AgentMode::PlanExecute, &[])),
        vec![],
        None,
        "plan it",
    ))
    .await;

    let first_plan = events
        .iter()
        .find_map(|e| match e {
            DeltaEvent::PlanUpdate { tasks, .. } => Some(tasks.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(first_plan.len(), 2);
    assert!(first_plan.iter().all(|t| t.status == TaskStatus::Init));

    let plan = last_plan(&events);
    assert!(plan.iter().all(|t| t.status == TaskStatus::Failed));
    assert_eq!(
        model.requests()[0].tool_choice,
        ToolChoice::Tool("plan_add_tasks".into())
    );
    // plan + one round per task + summary
    assert_eq!(model.call_count(), 4);
    assert_single_finish(&events, FinishReason::Stop);
}

#[tokio::test]
async fn plan_execute_budget_cancels_remaining_tasks() {
    let model = Arc::new(MockModelClient::new(vec![MockResponse::tool_call(
        "u1",
        "plan_update_task",
        json!({"task_id": "t1", "status": "completed"}),
    )]));
    let orch = Orchestrator::new(model.clone(), ToolRegistry::new(), EngineConfig::default());

    let budget = Budget {
        model: Scope::unlimited().with_max_calls(1),
        ..Budget::default()
    };
    let agent = agent(AgentMode::PlanExecute, &[]).with_budget(budget);
    let events = collect(orch.start_run(Arc::new(agent), vec![], Some(seeded_plan()), "go")).await;

    let plan = last_plan(&events);
    assert_eq!(plan[0].status, TaskStatus::Completed);
    assert_eq!(plan[1].status, TaskStatus::Canceled);
    assert_eq!(content(&events), BUDGET_EXHAUSTED_MESSAGE);
    assert_eq!(model.call_count(), 1);
    assert_single_finish(&events, FinishReason::Stop);
}

// ── frontend rendezvous ──

#[tokio::test]
async fn frontend_submission_resumes_run() {
    let model = Arc::new(MockModelClient::new(vec![
        MockResponse::tool_call("c1", "confirm", json!({"question": "ok?"})),
        MockResponse::text("Confirmed."),
    ]));
    let orch = Orchestrator::new(
        model,
        registry(vec![Arc::new(ConfirmTool) as Arc<dyn Tool>]),
        EngineConfig::default(),
    );

    let mut stream = orch.start_run(
        Arc::new(agent(AgentMode::Oneshot, &["confirm"])),
        vec![],
        None,
        "ask me",
    );
    let run_id = stream.run_id().clone();
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        if let DeltaEvent::ToolCallChunk { id, kind: Some(kind), .. } = &event {
            if kind == "frontend" {
                let ack = orch.submit_frontend_result(&run_id, id, json!({"answer": "yes"}));
                assert!(ack.accepted);
                let again = orch.submit_frontend_result(&run_id, id, json!({"answer": "no"}));
                assert!(!again.accepted);
            }
        }
        events.push(event);
    }

    let results = tool_results(&events);
    assert_eq!(results, vec![(ToolCallId::from_raw("c1"), json!({"answer": "yes"}))]);
    assert_eq!(content(&events), "Confirmed.");
    assert_single_finish(&events, FinishReason::Stop);
    assert_eq!(orch.rendezvous().pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn frontend_timeout_ends_run() {
    let model = Arc::new(MockModelClient::new(vec![MockResponse::tool_call(
        "c1",
        "confirm",
        json!({}),
    )]));
    let config = EngineConfig {
        frontend_submit_timeout_ms: 1_000,
        ..EngineConfig::default()
    };
    let orch = Orchestrator::new(
        model,
        registry(vec![Arc::new(ConfirmTool) as Arc<dyn Tool>]),
        config,
    );

    let events = collect(orch.start_run(
        Arc::new(agent(AgentMode::Oneshot, &["confirm"])),
        vec![],
        None,
        "ask me",
    ))
    .await;

    assert!(tool_results(&events).is_empty());
    assert_eq!(content(&events), FRONTEND_TIMEOUT_MESSAGE);
    assert_single_finish(&events, FinishReason::Timeout);
    assert_eq!(orch.rendezvous().pending_count(), 0);
}

#[tokio::test]
async fn dropped_stream_releases_pending_wait() {
    let model = Arc::new(MockModelClient::new(vec![MockResponse::tool_call(
        "c1",
        "confirm",
        json!({}),
    )]));
    let orch = Orchestrator::new(
        model,
        registry(vec![Arc::new(ConfirmTool) as Arc<dyn Tool>]),
        EngineConfig::default(),
    );

    let mut stream = orch.start_run(
        Arc::new(agent(AgentMode::Oneshot, &["confirm"])),
        vec![],
        None,
        "ask me",
    );
    while let Some(event) = stream.next().await {
        if matches!(event, DeltaEvent::ToolCallChunk { kind: Some(ref k), .. } if k == "frontend") {
            break;
        }
    }
    assert_eq!(orch.rendezvous().pending_count(), 1);
    drop(stream);

    for _ in 0..100 {
        if orch.rendezvous().pending_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(orch.rendezvous().pending_count(), 0);
}

// ── failures ──

#[tokio::test]
async fn gateway_error_becomes_generic_message() {
    let model = Arc::new(MockModelClient::new(vec![MockResponse::Error(
        GatewayError::Unavailable("502 bad gateway".into()),
    )]));
    let orch = Orchestrator::new(model, ToolRegistry::new(), EngineConfig::default());

    let events = collect(orch.start_run(Arc::new(agent(AgentMode::React, &[])), vec![], None, "hi")).await;

    assert_eq!(content(&events), GENERIC_FAILURE_MESSAGE);
    assert_single_finish(&events, FinishReason::Stop);
}

#[tokio::test]
async fn mid_stream_error_keeps_partial_text() {
    let model = Arc::new(MockModelClient::new(vec![MockResponse::StreamThenError(
        vec![ModelChunk::content("partial ")],
        GatewayError::StreamInterrupted("reset".into()),
    )]));
    let orch = Orchestrator::new(model, ToolRegistry::new(), EngineConfig::default());

    let events = collect(orch.start_run(Arc::new(agent(AgentMode::Oneshot, &[])), vec![], None, "hi")).await;

    assert_eq!(content(&events), format!("partial {GENERIC_FAILURE_MESSAGE}"));
    assert_single_finish(&events, FinishReason::Stop);
}

#[tokio::test]
async fn panicking_model_is_contained() {
    let orch = Orchestrator::new(Arc::new(PanickingModel), ToolRegistry::new(), EngineConfig::default());

    let events = collect(orch.start_run(Arc::new(agent(AgentMode::Oneshot, &[])), vec![], None, "hi")).await;

    assert_eq!(content(&events), GENERIC_FAILURE_MESSAGE);
    assert_single_finish(&events, FinishReason::Stop);
}

#[tokio::test]
async fn panicking_tool_yields_error_result() {
    let model = Arc::new(MockModelClient::new(vec![
        MockResponse::tool_call("c1", "explode", json!({})),
        MockResponse::text("That tool failed."),
    ]));
    let orch = Orchestrator::new(
        model,
        registry(vec![Arc::new(PanickingTool) as Arc<dyn Tool>]),
        EngineConfig::default(),
    );

    let events =
        collect(orch.start_run(Arc::new(agent(AgentMode::Oneshot, &["explode"])), vec![], None, "go")).await;

    let results = tool_results(&events);
    assert_eq!(results[0].1["ok"], json!(false));
    assert!(results[0].1["error"].as_str().unwrap().contains("kaboom"));
    assert_eq!(content(&events), "That tool failed.");
    assert_single_finish(&events, FinishReason::Stop);
}

#[tokio::test]
async fn model_budget_spent_before_summary() {
    let model = Arc::new(MockModelClient::new(vec![MockResponse::tool_call(
        "c1",
        "lookup",
        json!({}),
    )]));
    let orch = Orchestrator::new(
        model.clone(),
        registry(vec![EchoTool::new("lookup") as Arc<dyn Tool>]),
        EngineConfig::default(),
    );

    let budget = Budget {
        model: Scope::unlimited().with_max_calls(1),
        ..Budget::default()
    };
    let agent = agent(AgentMode::Oneshot, &["lookup"]).with_budget(budget);
    let events = collect(orch.start_run(Arc::new(agent), vec![], None, "go")).await;

    assert_eq!(model.call_count(), 1);
    assert_eq!(content(&events), BUDGET_EXHAUSTED_MESSAGE);
    assert_single_finish(&events, FinishReason::Stop);
}

#[tokio::test(start_paused = true)]
async fn silent_model_is_retried() {
    let model = Arc::new(MockModelClient::new(vec![
        MockResponse::stall(),
        MockResponse::text("second try"),
    ]));
    let orch = Orchestrator::new(model.clone(), ToolRegistry::new(), EngineConfig::default());

    let budget = Budget {
        model: Scope::unlimited().with_timeout_ms(1_000).with_retries(1),
        ..Budget::default()
    };
    let agent = agent(AgentMode::Oneshot, &[]).with_budget(budget);
    let events = collect(orch.start_run(Arc::new(agent), vec![], None, "hi")).await;

    assert_eq!(model.call_count(), 2);
    assert_eq!(content(&events), "second try");
    assert_single_finish(&events, FinishReason::Stop);
}

#[tokio::test(start_paused = true)]
async fn stall_after_output_fails_run() {
    let model = Arc::new(MockModelClient::new(vec![
        MockResponse::StallAfter(vec![ModelChunk::content("half ")]),
        MockResponse::text("never used"),
    ]));
    let orch = Orchestrator::new(model.clone(), ToolRegistry::new(), EngineConfig::default());

    let budget = Budget {
        model: Scope::unlimited().with_timeout_ms(1_000).with_retries(3),
        ..Budget::default()
    };
    let agent = agent(AgentMode::Oneshot, &[]).with_budget(budget);
    let events = collect(orch.start_run(Arc::new(agent), vec![], None, "hi")).await;

    assert_eq!(model.call_count(), 1);
    assert_eq!(content(&events), format!("half {GENERIC_FAILURE_MESSAGE}"));
    assert_single_finish(&events, FinishReason::Stop);
}

#[tokio::test]
async fn skill_catalog_reaches_system_prompt() {
    use conductor_engine::{Skill, SkillRegistry};

    let model = Arc::new(MockModelClient::new(vec![MockResponse::text("ok")]));
    let skills = SkillRegistry::new().with_skill(Skill::new("haiku", "Write haiku", "Use 5-7-5."));
    let orch = Orchestrator::new(model.clone(), ToolRegistry::new(), EngineConfig::default())
        .with_skills(skills);

    let agent = agent(AgentMode::Oneshot, &[]).with_skills(["haiku"]);
    let events = collect(orch.start_run(Arc::new(agent), vec![], None, "poem")).await;

    assert_single_finish(&events, FinishReason::Stop);
    let prompt = &model.requests()[0].system_prompt;
    assert!(prompt.contains("<skills>"));
    assert!(prompt.contains("Use 5-7-5."));
}

// ── run timeout ──

#[tokio::test(start_paused = true)]
async fn run_timeout_forces_react_summary() {
    let search = EchoTool::new("search");
    let model = Arc::new(
        MockModelClient::new(vec![
            MockResponse::delayed(
                Duration::from_millis(600),
                MockResponse::tool_call("c1", "search", json!({})),
            ),
            MockResponse::delayed(
                Duration::from_millis(600),
                MockResponse::tool_call("c2", "search", json!({})),
            ),
        ])
        .with_fallback(MockResponse::text("summary")),
    );
    let orch = Orchestrator::new(
        model.clone(),
        registry(vec![search.clone() as Arc<dyn Tool>]),
        EngineConfig::default(),
    );

    let budget = Budget {
        run_timeout_ms: 1_000,
        ..Budget::default()
    };
    let agent = agent(AgentMode::React, &["search"]).with_budget(budget);
    let events = collect(orch.start_run(Arc::new(agent), vec![], None, "dig")).await;

    // Both steps started inside the limit; the third decision is replaced
    // by a summary.
    assert_eq!(search.calls(), 2);
    assert_eq!(model.call_count(), 3);
    assert_eq!(model.requests()[2].tool_choice, ToolChoice::None);
    assert!(model.requests()[2].tools.is_empty());
    assert_eq!(content(&events), "summary");
    assert_single_finish(&events, FinishReason::Stop);
}

#[tokio::test(start_paused = true)]
async fn run_timeout_cancels_open_tasks() {
    let model = Arc::new(
        MockModelClient::new(vec![MockResponse::delayed(
            Duration::from_millis(1_100),
            MockResponse::tool_call(
                "u1",
                "plan_update_task",
                json!({"task_id": "t1", "status": "completed"}),
            ),
        )])
        .with_fallback(MockResponse::text("summary")),
    );
    let orch = Orchestrator::new(model.clone(), ToolRegistry::new(), EngineConfig::default());

    let budget = Budget {
        run_timeout_ms: 1_000,
        ..Budget::default()
    };
    let agent = agent(AgentMode::PlanExecute, &[]).with_budget(budget);
    let events = collect(orch.start_run(Arc::new(agent), vec![], Some(seeded_plan()), "do it")).await;

    let plan = last_plan(&events);
    assert_eq!(plan.len(), 2);
    assert_eq!(plan[0].status, TaskStatus::Completed);
    assert_eq!(plan[1].status, TaskStatus::Canceled);
    assert_eq!(markers(&events), vec!["plan", "execute", "summary"]);
    // t1's round and the summary; t2 never reaches the model.
    assert_eq!(model.call_count(), 2);
    assert_eq!(content(&events), "summary");
    assert_single_finish(&events, FinishReason::Stop);
}

#[tokio::test(start_paused = true)]
async fn run_timeout_mid_task_cancels_the_task_in_progress() {
    let model = Arc::new(
        MockModelClient::new(vec![MockResponse::delayed(
            Duration::from_millis(1_100),
            MockResponse::text("still working"),
        )])
        .with_fallback(MockResponse::text("summary")),
    );
    let orch = Orchestrator::new(model.clone(), ToolRegistry::new(), EngineConfig::default());

    let budget = Budget {
        run_timeout_ms: 1_000,
        ..Budget::default()
    };
    let agent = agent(AgentMode::PlanExecute, &[]).with_budget(budget);
    let events = collect(orch.start_run(Arc::new(agent), vec![], Some(seeded_plan()), "do it")).await;

    let plan = last_plan(&events);
    assert!(plan.iter().all(|t| t.status == TaskStatus::Canceled));
    assert_eq!(model.call_count(), 2);
    assert!(content(&events).ends_with("summary"));
    assert_single_finish(&events, FinishReason::Stop);
}
