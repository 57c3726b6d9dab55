use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use bobbin_core::config::BobbinConfig;
use bobbin_core::entities::{AgentDefinition, Conversation, Project, Thread};
use bobbin_core::message::ContentItem;
use bobbin_core::types::{ConversationId, Initiator, ProviderTag};
use bobbin_engine::providers::AnthropicProvider;
use bobbin_engine::{
    EngineCommand, EngineEvent, ProviderRegistry, Supervisor,
};
use bobbin_session::{spawn_session, ClaudeTransport, SessionEvent, SpawnOptions};
use bobbin_store::{ConversationStore, SqliteStore};

#[derive(Parser)]
#[command(name = "bobbin", version, about = "Headless driver for the bobbin conversation engine")]
struct Cli {
    /// Config file (default: ~/.bobbin/bobbin.toml, BOBBIN_* env overrides).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run one turn through the in-process engine and print the reply.
    Chat {
        /// Project directory the conversation operates in.
        #[arg(long, default_value = ".")]
        project: PathBuf,
        /// The user message.
        message: String,
    },
    /// Drive an interactive subprocess session; reads turns from stdin.
    Session {
        /// Project directory the subprocess runs in.
        #[arg(long, default_value = ".")]
        project: PathBuf,
        /// Resume a previous session by id.
        #[arg(long)]
        resume: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bobbin=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = BobbinConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("config load failed ({e}), using defaults");
        BobbinConfig::default()
    });

    match cli.command {
        CliCommand::Chat { project, message } => chat(config, project, message).await,
        CliCommand::Session { project, resume } => session(config, project, resume).await,
    }
}

/// One engine turn: bootstrap a conversation, send the message, print
/// everything the engine emits until it completes.
async fn chat(config: BobbinConfig, project_path: PathBuf, message: String) -> anyhow::Result<()> {
    let store = open_store(&config)?;

    let api_key = config
        .provider
        .api_key
        .clone()
        .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
        .context("no API key — set provider.api_key or ANTHROPIC_API_KEY")?;
    let provider = Arc::new(AnthropicProvider::new(
        api_key,
        Some(config.provider.base_url.clone()),
    ));
    let registry = ProviderRegistry::new().with(ProviderTag::Anthropic, provider);

    let conversation_id = bootstrap_conversation(store.as_ref(), &project_path)?;
    let supervisor = Arc::new(Supervisor::new(
        Arc::clone(&store) as Arc<dyn ConversationStore>,
        Arc::new(registry),
        Vec::new(),
        config.engine.clone(),
        config.provider.model.clone(),
    ));

    let handle = supervisor.get_or_create(&conversation_id);
    let (snapshot, mut rx) = handle.subscribe();
    handle.command(EngineCommand::SendUserMessage {
        items: vec![ContentItem::user_text(message)],
    });

    for event in snapshot {
        print_engine_event(&event);
    }
    loop {
        match rx.recv().await {
            Ok(event) => {
                let done = matches!(event, EngineEvent::Completed | EngineEvent::Error { .. });
                print_engine_event(&event);
                if done {
                    break;
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
    Ok(())
}

/// Interactive subprocess session: every stdin line is one user turn.
async fn session(
    config: BobbinConfig,
    project_path: PathBuf,
    resume: Option<String>,
) -> anyhow::Result<()> {
    let store = open_store(&config)?;
    let conversation_id = bootstrap_conversation(store.as_ref(), &project_path)?;

    let transport = ClaudeTransport::new(config.claude.clone(), config.session.stop_grace_ms);
    let handle = spawn_session(
        conversation_id,
        Box::new(transport),
        Arc::clone(&store) as Arc<dyn ConversationStore>,
    );
    handle.start(SpawnOptions {
        project_path,
        resume_session_id: resume,
        ..SpawnOptions::default()
    });

    // Printer task: follow the session's event stream.
    let (_, mut rx) = handle.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let stopped = matches!(event, SessionEvent::Stopped);
                    print_session_event(&event);
                    if stopped {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    eprintln!("… skipped {skipped} events …");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text == "/quit" {
            break;
        }
        if text == "/interrupt" {
            handle.interrupt();
            continue;
        }
        handle.send_message(text);
    }

    info!("stdin closed — stopping session");
    handle.stop();
    let _ = printer.await;
    Ok(())
}

fn open_store(config: &BobbinConfig) -> anyhow::Result<Arc<SqliteStore>> {
    let path = PathBuf::from(&config.database.path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let store = SqliteStore::open(&config.database.path)
        .with_context(|| format!("opening database {}", config.database.path))?;
    Ok(Arc::new(store))
}

/// Create the project/definition/conversation/thread rows for a fresh chat.
fn bootstrap_conversation(
    store: &SqliteStore,
    project_path: &std::path::Path,
) -> anyhow::Result<ConversationId> {
    let name = project_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workspace".to_string());
    let project = Project::new(project_path, name);
    store.save_project(&project)?;

    let definition = AgentDefinition::new("assistant", ProviderTag::Anthropic)
        .with_system_prompt("You are a helpful assistant working inside the user's project.");
    store.save_agent_definition(&definition)?;

    // Thread and conversation reference each other; mint the thread first,
    // then point it at the conversation that owns it.
    let thread = Thread::root(ConversationId::new());
    let conversation = Conversation::new(
        project.id.clone(),
        definition.id.clone(),
        Initiator::User,
        thread.id.clone(),
    );
    let thread = Thread {
        conversation_id: conversation.id.clone(),
        ..thread
    };
    store.save_thread(&thread)?;
    store.save_conversation(&conversation)?;
    Ok(conversation.id)
}

fn print_engine_event(event: &EngineEvent) {
    match event {
        EngineEvent::MessageEmitted { message } => {
            println!("[{}] {}", message.role, message.text());
        }
        EngineEvent::Completed => println!("— turn complete —"),
        EngineEvent::Warning { message } => eprintln!("warning: {message}"),
        EngineEvent::Error { message } => eprintln!("error: {message}"),
        _ => {}
    }
}

fn print_session_event(event: &SessionEvent) {
    match event {
        SessionEvent::Message { message } => {
            let text = message.text();
            if !text.is_empty() {
                println!("[{}] {}", message.role, text);
            }
        }
        SessionEvent::TurnCompleted {
            subtype, num_turns, ..
        } => println!("— {subtype} after {num_turns} turns —"),
        SessionEvent::Started => println!("— session started —"),
        SessionEvent::Stopped => println!("— session stopped —"),
        SessionEvent::InterruptSent { .. } => println!("— interrupt sent —"),
        SessionEvent::InterruptAcknowledged => println!("— interrupted —"),
        SessionEvent::HistoricalMessagesLoaded { count } => {
            println!("— replayed {count} earlier messages —")
        }
        SessionEvent::SessionIdChanged { current, .. } => {
            println!("— session id: {current} —")
        }
        SessionEvent::Warning { message } => eprintln!("warning: {message}"),
        SessionEvent::Error { message } => eprintln!("error: {message}"),
    }
}
