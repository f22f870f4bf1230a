use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

use doc_assistant::agent::tools::{ToolLogger, ToolRegistry};
use doc_assistant::agent::Workflow;
use doc_assistant::documents::InMemoryCorpus;
use doc_assistant::models::OpenAICompatible;
use doc_assistant::server;
use doc_assistant::session::SessionState;
use doc_assistant::settings::{GlobalConfigDefaults, SessionSettings};
use doc_assistant::storage::{SessionRepository, SqliteSessionRepository};

#[derive(Debug, Parser)]
#[command(name = "doc_assistant")]
#[command(about = "Document assistant that routes requests to QA, summarization and calculation agents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the HTTP API.
    Start {
        #[arg(long, default_value = "127.0.0.1:7171")]
        listen: String,
        #[arg(long)]
        database_url: Option<String>,
        /// JSON file with the document corpus; the bundled samples are used otherwise.
        #[arg(long)]
        documents: Option<PathBuf>,
        /// Seconds to wait on the generation service (defaults to ASSISTANT_REQUEST_TIMEOUT_SECS, then 60).
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Interactive session on stdin.
    Chat {
        #[arg(long, default_value = "demo_user")]
        user: String,
        /// Resume a stored session.
        #[arg(long)]
        session: Option<Uuid>,
        #[arg(long)]
        database_url: Option<String>,
        #[arg(long)]
        documents: Option<PathBuf>,
        #[arg(long)]
        timeout: Option<u64>,
    },
}

fn build_workflow(documents: Option<PathBuf>, timeout: Option<u64>) -> anyhow::Result<Workflow> {
    let corpus = match documents {
        Some(path) => InMemoryCorpus::from_json_file(&path)?,
        None => InMemoryCorpus::with_sample_documents(),
    };
    tracing::info!(documents = corpus.len(), "corpus loaded");
    let defaults = GlobalConfigDefaults::from_env();
    let timeout = timeout.map(Duration::from_secs).unwrap_or_else(|| defaults.request_timeout());
    let model = OpenAICompatible::from_env(timeout)?;
    let tools = ToolRegistry::with_default_tools(Arc::new(corpus), ToolLogger::new());
    Ok(Workflow::new(Arc::new(model), tools, defaults))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Start { listen, database_url, documents, timeout } => {
            let addr: SocketAddr = listen.parse()?;
            let workflow = Arc::new(build_workflow(documents, timeout)?);
            let repo = SqliteSessionRepository::initialize(database_url).await?;
            let mut state = server::AppState::new(workflow).with_repository(Arc::new(repo));
            match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
                Ok(handle) => state = state.with_metrics(handle),
                Err(e) => tracing::warn!(error = %e, "metrics exporter unavailable"),
            }
            server::serve(addr, state).await?;
        }
        Commands::Chat { user, session, database_url, documents, timeout } => {
            let workflow = build_workflow(documents, timeout)?;
            let repo = SqliteSessionRepository::initialize(database_url).await?;
            chat(workflow, repo, user, session).await?;
        }
    }
    Ok(())
}

const HELP: &str = "Commands: /logs (tool calls this session), /docs (active documents), /help, /quit";

async fn chat(
    workflow: Workflow,
    repo: SqliteSessionRepository,
    user: String,
    resume: Option<Uuid>,
) -> anyhow::Result<()> {
    let mut state = match resume {
        Some(id) => match repo.load_session(id).await? {
            Some(snapshot) => SessionState::from_snapshot(snapshot),
            None => anyhow::bail!("session {} not found", id),
        },
        None => SessionState::new(user, SessionSettings::default()),
    };
    println!("Session {} ({} previous turns). {}", state.session_id, state.conversation_history.len(), HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/help" => println!("{}", HELP),
            "/docs" => {
                if state.active_documents.is_empty() {
                    println!("No documents referenced yet.");
                } else {
                    let docs: Vec<&str> = state.active_documents.iter().map(String::as_str).collect();
                    println!("Active documents: {}", docs.join(", "));
                }
            }
            "/logs" => println!("{}", workflow.tools().logger().export_json(state.session_id).await?),
            input => match workflow.run_turn(state.clone(), input).await {
                Ok(outcome) => {
                    println!("\n{}\n", outcome.rendered);
                    println!("[intent: {} | tools: {}]", outcome.intent.intent_type, outcome.tools_used.join(", "));
                    state = outcome.state;
                    let log = workflow.tools().logger().snapshot(state.session_id).await;
                    if let Err(e) = repo.save_session(&state.snapshot()).await {
                        tracing::warn!(error = %e, "failed to save session");
                    }
                    if let Err(e) = repo.save_tool_log(state.session_id, &log).await {
                        tracing::warn!(error = %e, "failed to save tool log");
                    }
                }
                Err(e) => eprintln!("error: {}", e),
            },
        }
    }
    Ok(())
}
