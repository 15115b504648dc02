//! Sandforge CLI - run the coding agent against a local sandbox
//!
//! Usage:
//!   sandforge run --project <id> <instruction>   Record the instruction and run the workflow
//!   sandforge history --project <id>             List stored messages of a project

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use sandforge::store::NewMessage;
use sandforge::tracing::{init_tracing, shutdown_tracing};
use sandforge::{
    AgentConfig, ChatClient, CodeAgentWorkflow, JsonMessageStore, LocalSandboxProvider,
    MessageStore, RunEvent,
};

#[derive(Parser)]
#[command(name = "sandforge")]
#[command(author, version, about = "Durable coding-agent orchestration")]
struct Cli {
    /// Emit logs as JSON lines (overrides SANDFORGE_LOG_JSON)
    #[arg(long)]
    log_json: bool,

    /// OTLP gRPC endpoint for trace export (overrides SANDFORGE_OTLP_ENDPOINT)
    #[arg(long)]
    otlp_endpoint: Option<String>,

    /// Directory holding project conversations
    #[arg(long)]
    store_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a user instruction and run the workflow on it
    Run {
        /// Project the conversation belongs to
        #[arg(long)]
        project: String,

        /// Reuse a run id to resume its journal
        #[arg(long)]
        run_id: Option<String>,

        /// Coding-agent model
        #[arg(long)]
        model: Option<String>,

        /// Maximum agent turns
        #[arg(long)]
        max_iterations: Option<usize>,

        /// Directory of sandbox templates
        #[arg(long)]
        templates: Option<PathBuf>,

        /// The instruction for the agent
        instruction: String,
    },

    /// List the stored messages of a project, newest first
    History {
        #[arg(long)]
        project: String,

        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AgentConfig::from_env()?;
    if cli.log_json {
        config.log_json = true;
    }
    if cli.otlp_endpoint.is_some() {
        config.otlp_endpoint = cli.otlp_endpoint;
    }

    init_tracing(&config.telemetry("sandforge"))
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))?;

    if let Some(dir) = cli.store_dir {
        config.store_dir = dir;
    }

    let result = match cli.command {
        Commands::Run {
            project,
            run_id,
            model,
            max_iterations,
            templates,
            instruction,
        } => {
            if let Some(model) = model {
                config.model = model;
            }
            if let Some(max) = max_iterations {
                config.max_iterations = max;
            }
            if templates.is_some() {
                config.sandbox_templates_dir = templates;
            }
            run(config, project, run_id, instruction).await
        }
        Commands::History { project, limit } => history(&config, &project, limit).await,
    };

    shutdown_tracing();
    result
}

async fn run(
    config: AgentConfig,
    project: String,
    run_id: Option<String>,
    instruction: String,
) -> Result<()> {
    let store = Arc::new(
        JsonMessageStore::new(&config.store_dir)
            .with_context(|| format!("Failed to open store at {}", config.store_dir.display()))?,
    );

    let mut sandboxes =
        LocalSandboxProvider::new(&config.sandbox_root, &config.sandbox_host_suffix);
    if let Some(dir) = &config.sandbox_templates_dir {
        sandboxes = sandboxes.with_templates(dir);
    }
    let model = Arc::new(ChatClient::new(
        config.api_base_url.clone(),
        config.api_key.clone(),
    ));

    let mut event = RunEvent::new(&project, &instruction);
    if let Some(run_id) = run_id {
        event = event.with_run_id(run_id);
    }

    // A resumed run must not record the instruction twice
    let mut user_message = NewMessage::user(&project, &instruction);
    if let Some(run_id) = &event.run_id {
        user_message = user_message.with_idempotency_key(format!("{}/user", run_id));
    }
    store
        .create_message(user_message)
        .await
        .context("Failed to record user message")?;

    let workflow = CodeAgentWorkflow::new(config, model, Arc::new(sandboxes), store);
    info!(project = %project, "Triggering code agent workflow");
    let output = workflow.run(event).await.context("Workflow run failed")?;

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn history(config: &AgentConfig, project: &str, limit: usize) -> Result<()> {
    let store = JsonMessageStore::new(&config.store_dir)
        .with_context(|| format!("Failed to open store at {}", config.store_dir.display()))?;
    let messages = store.recent_messages(project, limit).await?;
    println!("{}", serde_json::to_string_pretty(&messages)?);
    Ok(())
}
