use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use metamorphosis_core::config::{AppConfig, ModelConfig};
use metamorphosis_core::event::EventBus;
use metamorphosis_core::types::ThreadId;

use metamorphosis_agent::{open_store, self_review_graph, ExecutionEngine, RunOutcome};
use metamorphosis_tools::{register_review_tools, ToolRegistry};

#[derive(Parser)]
#[command(name = "metamorphosis", version, about = "Self-review workflow engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "metamorphosis.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Review a self-review text, streaming events as JSON lines
    Run {
        /// Read the text from a file
        #[arg(short, long, conflicts_with = "text")]
        file: Option<PathBuf>,
        /// The text itself
        #[arg(short, long)]
        text: Option<String>,
        /// Thread ID (auto-generated if not provided)
        #[arg(long)]
        thread: Option<String>,
    },
    /// Continue an interrupted thread from its checkpoint
    Resume {
        thread: String,
    },
    /// Print a thread's checkpoint
    Show {
        thread: String,
    },
    /// List threads with a checkpoint
    Threads,
    /// Print the workflow graph as a mermaid diagram
    Graph,
    /// List registered tools
    Tools,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr, stdout carries the JSON event stream
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("metamorphosis=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "metamorphosis", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;
    let model = metamorphosis_llm::create_invoker(&config.model);

    let mut registry = ToolRegistry::new().with_default_timeout(config.engine.tool_timeout());
    register_review_tools(&mut registry, model.clone(), &config.word_cloud);
    let registry = Arc::new(registry);

    if let Commands::Tools = &cli.command {
        for name in registry.list() {
            let description = registry
                .get(name)
                .map(|t| t.description().to_string())
                .unwrap_or_default();
            println!("{:<24} {}", name, description);
        }
        return Ok(());
    }

    let graph = self_review_graph(registry.clone(), model, &config.engine)?;
    if let Commands::Graph = &cli.command {
        print!("{}", graph.to_mermaid());
        return Ok(());
    }

    let store = open_store(&config.checkpoint)?;
    let engine = ExecutionEngine::new(graph, store, config.engine.clone());

    match cli.command {
        Commands::Run { file, text, thread } => {
            let text = match (file, text) {
                (Some(path), _) => std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                (None, Some(text)) => text,
                (None, None) => anyhow::bail!("pass the review text with --text or --file"),
            };
            let thread_id = thread
                .map(|t| ThreadId::from_str(&t))
                .unwrap_or_default();
            run_streaming(&engine, thread_id, Some(text), config.engine.event_buffer).await
        }
        Commands::Resume { thread } => {
            run_streaming(
                &engine,
                ThreadId::from_str(&thread),
                None,
                config.engine.event_buffer,
            )
            .await
        }
        Commands::Show { thread } => {
            let checkpoint = engine.checkpoint(&ThreadId::from_str(&thread)).await?;
            println!("{}", serde_json::to_string_pretty(&checkpoint)?);
            Ok(())
        }
        Commands::Threads => {
            for thread in engine.threads().await? {
                println!("{}", thread);
            }
            Ok(())
        }
        Commands::Graph | Commands::Tools | Commands::Completions { .. } => Ok(()),
    }
}

/// Run (or resume) a thread, printing every event as one JSON line.
async fn run_streaming(
    engine: &ExecutionEngine,
    thread_id: ThreadId,
    text: Option<String>,
    event_buffer: usize,
) -> anyhow::Result<()> {
    let bus = Arc::new(EventBus::new(event_buffer));
    let mut events = bus.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!(error = %e, "Failed to serialize event"),
                },
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "Event printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let interrupt = {
        let engine = engine.clone();
        let thread_id = thread_id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                engine.cancel(&thread_id);
            }
        })
    };

    info!(thread_id = %thread_id, "Starting review");
    let result = match text {
        Some(text) => engine.run(thread_id, text, bus.as_ref()).await,
        None => engine.resume(thread_id, bus.as_ref()).await,
    };
    interrupt.abort();
    drop(bus);
    let _ = printer.await;

    let outcome = result?;
    println!("{}", serde_json::to_string(&summary(&outcome))?);
    Ok(())
}

fn summary(outcome: &RunOutcome) -> serde_json::Value {
    serde_json::json!({
        "event": "outcome",
        "thread_id": outcome.thread_id,
        "status": outcome.status,
        "failures": outcome.failures,
        "state": outcome.state,
    })
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }
    if let Some(home) = dirs_home().map(|h| h.join(".metamorphosis").join("config.toml")) {
        if home.exists() {
            info!(path = %home.display(), "Loading config from home directory");
            return Ok(AppConfig::load(&home)?);
        }
    }
    warn!("No config file found, using environment defaults");
    Ok(env_config())
}

/// Minimal config from environment: OpenAI if a key is set, local Ollama otherwise.
fn env_config() -> AppConfig {
    let (provider, model_id, api_key) = match std::env::var("OPENAI_API_KEY") {
        Ok(key) => ("openai", "gpt-4o-mini", Some(key)),
        Err(_) => ("ollama", "llama3.2", None),
    };
    AppConfig {
        model: ModelConfig {
            provider: provider.to_string(),
            model_id: std::env::var("METAMORPHOSIS_MODEL").unwrap_or_else(|_| model_id.to_string()),
            api_key,
            base_url: None,
            max_tokens: 4096,
            temperature: 0.0,
            retry: Some(Default::default()),
        },
        engine: Default::default(),
        checkpoint: Default::default(),
        word_cloud: Default::default(),
    }
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
