//! # Forgeloop CLI
//!
//! Usage:
//!   forgeloop run --conversation <id> <request>
//!   forgeloop resume <run-id>
//!   forgeloop runs
//!   forgeloop metrics
//!
//! Examples:
//!   forgeloop run -c demo "Build a todo app with local storage"
//!   forgeloop runs

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use forgeloop::agent::{CheckpointStore, DispatchError, FileCheckpointStore};
use forgeloop::config::Settings;
use forgeloop::conversation::{FileConversationStore, StoredMessage};
use forgeloop::llm::OpenAiClient;
use forgeloop::quota::{FileCreditStore, QuotaGate, Unmetered};
use forgeloop::sandbox::RemoteSandboxClient;
use forgeloop::{AgentController, Dispatcher, RunEvent, RunOutcome, RunReport};

#[derive(Parser)]
#[command(name = "forgeloop")]
#[command(author, version, about = "Agentic code generation in remote sandboxes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override the model (FORGELOOP_MODEL)
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Override the maximum agent steps (FORGELOOP_MAX_ITERATIONS)
    #[arg(long, global = true)]
    max_iterations: Option<usize>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent for a request
    Run {
        /// Conversation the request belongs to
        #[arg(short, long)]
        conversation: String,

        /// The request text
        #[arg(trailing_var_arg = true, required = true)]
        request: Vec<String>,
    },
    /// Resume a run from its checkpoint
    Resume {
        run_id: String,
    },
    /// List run checkpoints
    Runs,
    /// Print metrics in the Prometheus text format
    Metrics,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(model) = cli.model.clone() {
        settings.agent.model = model;
    }
    if let Some(max_iterations) = cli.max_iterations {
        settings.agent.max_iterations = max_iterations;
    }
    settings.log_json |= cli.json;

    if let Err(e) = forgeloop::tracing::init_tracing("forgeloop", settings.otlp_endpoint.as_deref(), settings.log_json) {
        eprintln!("Failed to initialize tracing: {}", e);
        return ExitCode::FAILURE;
    }

    let result = execute(cli.command, settings).await;
    forgeloop::tracing::shutdown_tracing();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn execute(command: Commands, settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let checkpoints: Arc<dyn CheckpointStore> = Arc::new(FileCheckpointStore::new(settings.checkpoint_dir())?);

    match command {
        Commands::Runs => {
            let runs = checkpoints.list().await?;
            if runs.is_empty() {
                println!("No runs found.");
            }
            for run in runs {
                println!(
                    "{}  {}  {:<12}  {:>3} steps  {}",
                    run.run_id,
                    run.created_at.format("%Y-%m-%d %H:%M"),
                    run.outcome.as_deref().unwrap_or("in progress"),
                    run.steps,
                    run.request
                );
            }
            Ok(())
        }
        Commands::Metrics => {
            print!("{}", forgeloop::metrics::gather());
            Ok(())
        }
        Commands::Run { conversation, request } => {
            let request = request.join(" ");
            let store = Arc::new(FileConversationStore::new(settings.conversation_dir())?);
            // The request is part of the conversation before the run starts
            store.append(&conversation, StoredMessage::user(request.as_str())).await?;

            let dispatcher = dispatcher(&settings, store, checkpoints)?;
            let report = dispatcher.submit(RunEvent::new(conversation, request)).await;
            print_report(report)
        }
        Commands::Resume { run_id } => {
            let store = Arc::new(FileConversationStore::new(settings.conversation_dir())?);
            let dispatcher = dispatcher(&settings, store, checkpoints)?;
            print_report(dispatcher.resume(&run_id).await)
        }
    }
}

fn dispatcher(
    settings: &Settings,
    store: Arc<FileConversationStore>,
    checkpoints: Arc<dyn CheckpointStore>,
) -> std::io::Result<Dispatcher> {
    let model = OpenAiClient::new(
        settings.openai_base_url.as_str(),
        settings.openai_api_key.as_str(),
        settings.agent.model.as_str(),
    )
    .with_temperature(settings.agent.temperature);
    let sandbox = RemoteSandboxClient::new(settings.sandbox.clone());

    let controller = AgentController::new(
        settings.agent.clone(),
        Arc::new(model),
        Arc::new(sandbox),
        store.clone(),
        store,
        checkpoints,
    );

    let quota: Arc<dyn QuotaGate> = if settings.quota_points == 0 {
        Arc::new(Unmetered)
    } else {
        Arc::new(FileCreditStore::new(
            settings.quota_path(),
            settings.quota_points,
            settings.quota_window,
        )?)
    };

    Ok(Dispatcher::new(Arc::new(controller), quota))
}

fn print_report(report: Result<RunReport, DispatchError>) -> Result<(), Box<dyn std::error::Error>> {
    let report = report?;
    println!("Run:        {}", report.run_id);
    println!("Iterations: {}", report.iterations);
    match &report.outcome {
        RunOutcome::Success { title, message, files, url } => {
            println!("Title:      {}", title);
            println!("Preview:    {}", url);
            println!("Files:      {}", files.len());
            for path in files.keys() {
                println!("  - {}", path);
            }
            println!();
            println!("{}", message);
        }
        RunOutcome::Error { message } => {
            println!("Result:     {}", message);
        }
    }
    Ok(())
}
