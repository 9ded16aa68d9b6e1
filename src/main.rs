//! conductor CLI: drive one agent turn against a scripted model and print
//! the delta event stream as JSON lines.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{info, Level};

use conductor_core::agent::AgentDefinition;
use conductor_core::events::DeltaEvent;
use conductor_core::messages::Message;
use conductor_core::plan::PlanSnapshot;
use conductor_core::stream::ModelChunk;
use conductor_core::tools::{Tool, ToolContext, ToolError, ToolKind};
use conductor_engine::{EngineConfig, Orchestrator, ToolRegistry};
use conductor_llm::{MockModelClient, MockResponse};
use conductor_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser)]
#[command(name = "conductor", version, about = "Staged agent-run orchestration engine")]
struct Cli {
    /// Default log level (RUST_LOG takes precedence).
    #[arg(long, global = true, default_value = "info")]
    log_level: Level,

    /// Per-module log level, e.g. `conductor_engine=debug`. Repeatable.
    #[arg(long = "log-module", global = true, value_parser = parse_module_level)]
    log_modules: Vec<(String, Level)>,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one turn and print its events.
    Run {
        /// Agent definition (JSON).
        #[arg(long)]
        agent: PathBuf,

        /// Scripted model responses: a JSON array with one array of chunks
        /// per model call.
        #[arg(long)]
        script: PathBuf,

        /// User message for this turn.
        #[arg(long, short)]
        message: String,

        /// Engine config (JSON). `CONDUCTOR_*` env vars override it.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Prior conversation history (JSON array of messages).
        #[arg(long)]
        history: Option<PathBuf>,

        /// Prior plan snapshot (JSON).
        #[arg(long)]
        plan: Option<PathBuf>,

        /// Payload submitted automatically for every frontend tool call.
        /// Without it frontend calls wait until the submit timeout.
        #[arg(long)]
        submit: Option<String>,
    },

    /// Print the built-in demo tools as JSON.
    Tools,
}

fn parse_module_level(raw: &str) -> Result<(String, Level), String> {
    TelemetryConfig::parse_module_level(raw).ok_or_else(|| format!("expected module=level, got {raw:?}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut telemetry = TelemetryConfig::default()
        .with_level(cli.log_level)
        .json(cli.log_json);
    for (module, level) in cli.log_modules {
        telemetry = telemetry.with_module_level(module, level);
    }
    init_telemetry(&telemetry).context("failed to install log subscriber")?;

    match cli.command {
        Commands::Run {
            agent,
            script,
            message,
            config,
            history,
            plan,
            submit,
        } => {
            let agent: AgentDefinition = read_json(&agent)?;
            let script: Vec<Vec<ModelChunk>> = read_json(&script)?;
            let history: Vec<Message> = match history {
                Some(path) => read_json(&path)?,
                None => Vec::new(),
            };
            let plan: Option<PlanSnapshot> = plan.map(|p| read_json(&p)).transpose()?;
            let submit: Option<Value> = submit
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .context("--submit is not valid JSON")?;
            let config = match config {
                Some(path) => EngineConfig::from_file(&path)?,
                None => EngineConfig::default(),
            }
            .with_env_overrides()?;

            run(agent, script, message, config, history, plan, submit).await
        }
        Commands::Tools => {
            let defs: Vec<_> = demo_tools().iter().map(|t| t.to_definition()).collect();
            println!("{}", serde_json::to_string_pretty(&defs)?);
            Ok(())
        }
    }
}

async fn run(
    agent: AgentDefinition,
    script: Vec<Vec<ModelChunk>>,
    message: String,
    config: EngineConfig,
    history: Vec<Message>,
    plan: Option<PlanSnapshot>,
    submit: Option<Value>,
) -> Result<()> {
    let calls = script.len();
    let model = MockModelClient::new(script.into_iter().map(MockResponse::Stream).collect());
    let mut tools = ToolRegistry::new();
    for tool in demo_tools() {
        tools.register(tool);
    }
    info!(agent = %agent.name, mode = agent.mode.as_str(), scripted_calls = calls, "starting run");

    let orchestrator = Orchestrator::new(Arc::new(model), tools, config);
    let mut stream = orchestrator.start_run(Arc::new(agent), history, plan, message);
    let run_id = stream.run_id().clone();

    let stdout = std::io::stdout();
    while let Some(event) = stream.next().await {
        {
            let mut out = stdout.lock();
            writeln!(out, "{}", serde_json::to_string(&event)?)?;
            out.flush()?;
        }
        if let (Some(payload), DeltaEvent::ToolCallChunk { id, kind: Some(kind), .. }) = (&submit, &event) {
            if kind == ToolKind::Frontend.as_str() {
                let ack = orchestrator.submit_frontend_result(&run_id, id, payload.clone());
                info!(tool_id = %id, accepted = ack.accepted, "submitted frontend result");
            }
        }
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

// ── demo tools ──

fn demo_tools() -> Vec<Arc<dyn Tool>> {
    vec![Arc::new(Today), Arc::new(Echo), Arc::new(Confirm), Arc::new(Notify)]
}

/// Today's date, for exercising date templates like `{{today.date+1d}}`.
struct Today;

impl Tool for Today {
    fn name(&self) -> &str {
        "today"
    }
    fn description(&self) -> &str {
        "Current UTC date and time"
    }
    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }
    fn invoke(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let now = chrono::Utc::now();
        Ok(json!({
            "date": now.format("%Y-%m-%d").to_string(),
            "timestamp": now.to_rfc3339(),
        }))
    }
}

struct Echo;

impl Tool for Echo {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Return the arguments unchanged"
    }
    fn parameters_schema(&self) -> Value {
        json!({ "type": "object" })
    }
    fn invoke(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        Ok(json!({ "echo": args }))
    }
}

struct Confirm;

impl Tool for Confirm {
    fn name(&self) -> &str {
        "confirm"
    }
    fn description(&self) -> &str {
        "Ask the user to approve an action"
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["question"],
            "properties": { "question": { "type": "string" } }
        })
    }
    fn kind(&self) -> ToolKind {
        ToolKind::Frontend
    }
    fn invoke(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        Err(ToolError::NotInvocable(self.name().to_string()))
    }
}

struct Notify;

impl Tool for Notify {
    fn name(&self) -> &str {
        "notify"
    }
    fn description(&self) -> &str {
        "Show a notification in the client"
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "text": { "type": "string" } }
        })
    }
    fn kind(&self) -> ToolKind {
        ToolKind::Action
    }
    fn invoke(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        Err(ToolError::NotInvocable(self.name().to_string()))
    }
}
