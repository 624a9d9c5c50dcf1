//! Operator CLI — runs one turn against a tenant and prints the event
//! stream as SSE frames, exactly as an HTTP client would receive them.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;

use lexgate_config::AppConfig;
use lexgate_llm::LlmClient;
use lexgate_normative::{NormativeStore, SqliteNormativeStore};
use lexgate_runtime::{to_sse, TurnModel, TurnOrchestrator, TurnRequest, SSE_DONE};

#[derive(Parser, Debug)]
#[command(name = "lexgate", about = "Multi-tenant conversational inference gateway")]
struct Args {
    /// The user question for this turn.
    question: String,

    #[arg(long, default_value = "lexgate.toml")]
    config: String,

    #[arg(long, default_value = "cli-user")]
    user: String,

    #[arg(long, default_value = "cli-chat")]
    chat: String,

    /// Tenant id; the process default applies when omitted.
    #[arg(long)]
    instance: Option<String>,

    /// Path to the pre-built normative database.
    #[arg(long)]
    normative_db: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = AppConfig::load_from(&args.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.telemetry.log_level)),
        )
        .init();

    let api_key = lexgate_config::api_key()
        .context("LEXGATE_API_KEY is not set (a .env file also works)")?;
    let client = LlmClient::new(
        config.llm.base_url.clone(),
        api_key,
        Duration::from_secs(config.llm.request_timeout_secs),
    )?;

    let normative: Option<Arc<dyn NormativeStore>> = match &args.normative_db {
        Some(path) => Some(Arc::new(
            SqliteNormativeStore::open(path).context("open normative database")?,
        )),
        None => None,
    };

    let orchestrator =
        TurnOrchestrator::new(config, Arc::new(client) as Arc<dyn TurnModel>, normative);

    info!(user = %args.user, chat = %args.chat, "running turn");
    let (tx, mut rx) = mpsc::channel(64);
    let request = TurnRequest {
        question: args.question,
        user_id: args.user,
        chat_id: args.chat,
        instance_id: args.instance,
        attachments: Vec::new(),
    };

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print!("{}", to_sse(&event));
        }
        print!("{SSE_DONE}");
    });

    let result = orchestrator.run_stream(request, tx).await;
    printer.await?;
    result?;
    Ok(())
}
