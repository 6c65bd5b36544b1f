//! Talk to the rig booking agent from the command line.
//!
//! Reads the API key from `OPENROUTER_KEY` and the database from
//! `DATABASE_URL`.
//!
//! # Examples
//!
//! ```sh
//! # Create the tables, then ask one question
//! rigbook --migrate --message "What is free for VIN 1FT-001 on 2024-01-15?"
//!
//! # Keep a conversation across invocations
//! rigbook --thread ops-desk --checkpoint-dir .rigbook/threads \
//!   --message "Book the brake test on Rig-2, moving up to 3 days if needed"
//!
//! # One turn per stdin line
//! cat requests.txt | rigbook --thread batch
//! ```

use clap::Parser;
use rigbook::prelude::*;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rigbook")]
struct Cli {
    // ── Conversation ───────────────────────────────────────────
    /// Message to send. Without it, each stdin line is one turn.
    #[arg(long)]
    message: Option<String>,

    /// Conversation thread id
    #[arg(long, default_value = "default")]
    thread: String,

    /// Persist threads as JSON files in this directory (in-memory otherwise)
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    // ── Model ──────────────────────────────────────────────────
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    #[arg(long, default_value_t = 0.0)]
    temperature: f32,

    #[arg(long, default_value_t = 2048)]
    max_tokens: u32,

    #[arg(long, env = "OPENROUTER_KEY", hide_env_values = true)]
    openrouter_key: String,

    // ── Database ───────────────────────────────────────────────
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: String,

    /// Create missing tables before serving
    #[arg(long)]
    migrate: bool,

    #[arg(long, default_value_t = 10)]
    max_connections: u32,

    /// Row-lock wait per allocation attempt, in milliseconds
    #[arg(long, default_value_t = 5_000)]
    lock_timeout_ms: u64,

    // ── Budgets ────────────────────────────────────────────────
    /// Retryable failures tolerated per turn
    #[arg(long, default_value_t = 2)]
    retry_budget: u32,

    /// Reasoning plus tool calls allowed per turn
    #[arg(long, default_value_t = 16)]
    max_calls: u32,

    /// Wall-clock limit per turn, in seconds
    #[arg(long, default_value_t = 120)]
    turn_timeout_secs: u64,

    /// Furthest a backup window may move forward, in days
    #[arg(long, default_value_t = 7)]
    max_backup_days: u32,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rigbook=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn build(cli: &Cli) -> Result<Orchestrator, String> {
    let store = PgStore::connect(&cli.database_url, cli.max_connections)
        .await
        .map_err(|e| format!("failed to connect to database: {e}"))?
        .with_lock_timeout(Duration::from_millis(cli.lock_timeout_ms));
    if cli.migrate {
        store
            .migrate()
            .await
            .map_err(|e| format!("migration failed: {e}"))?;
        info!("Schema migrated");
    }
    let store = Arc::new(store);

    let allocator = AllocatorConfig::default().with_max_backup_days(cli.max_backup_days);
    let service = Arc::new(AllocationService::new(store.clone(), allocator));
    let tools = allocation_tools(service).map_err(|e| e.to_string())?;

    let client = OpenRouterClient::new(cli.openrouter_key.clone())
        .map_err(|e| format!("failed to create API client: {e}"))?;
    let engine = OpenRouterEngine::new(client, &cli.model)
        .with_temperature(cli.temperature)
        .with_max_tokens(cli.max_tokens);

    let checkpoints: Arc<dyn CheckpointStore> = match &cli.checkpoint_dir {
        Some(dir) => Arc::new(FileCheckpointStore::new(dir).map_err(|e| e.to_string())?),
        None => Arc::new(MemoryCheckpointStore::new()),
    };

    let config = OrchestratorConfig::new(&cli.model)
        .with_retry_budget(cli.retry_budget)
        .with_max_calls(cli.max_calls)
        .with_turn_timeout(Duration::from_secs(cli.turn_timeout_secs));

    Ok(Orchestrator::new(
        Arc::new(engine),
        Arc::new(tools),
        store,
        checkpoints,
        config,
    )
    .with_event_handler(LoggingHandler))
}

async fn run(cli: Cli) -> Result<(), String> {
    let orchestrator = build(&cli).await?;

    if let Some(message) = &cli.message {
        let turn = orchestrator.handle_message(&cli.thread, message).await;
        println!("{}", turn.reply);
        return Ok(());
    }

    for line in io::stdin().lock().lines() {
        let line = line.map_err(|e| format!("failed to read stdin: {e}"))?;
        if line.trim().is_empty() {
            continue;
        }
        let turn = orchestrator.handle_message(&cli.thread, &line).await;
        println!("{}", turn.reply);
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
