#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::cast_precision_loss,
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use flaco::agent::{Agent, RunOutcome};
use flaco::approval::{PermissionManager, PermissionMode};
use flaco::config::Config;
use flaco::providers::{create_client, LlmClient, ProviderError};
use flaco::security::{PathScope, SecurityValidator};
use flaco::session::{
    is_valid_session_id, new_session_id, InMemorySessionStore, LocalSessionStore, SessionStore,
};
use flaco::tools::default_registry;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

/// Local coding assistant powered by Ollama.
#[derive(Parser, Debug)]
#[command(name = "flaco")]
#[command(version)]
#[command(about = "Local AI coding assistant powered by Ollama", long_about = None)]
struct Cli {
    /// Ollama model to use (overrides config)
    #[arg(short, long)]
    model: Option<String>,

    /// Ollama server URL (overrides config)
    #[arg(short = 'u', long)]
    ollama_url: Option<String>,

    /// Deny every tool that needs permission; no prompts are shown
    #[arg(short = 'p', long, conflicts_with = "auto_approve")]
    headless: bool,

    /// Approve every tool call without prompting
    #[arg(short = 'y', long)]
    auto_approve: bool,

    /// Run a single request and exit
    #[arg(long)]
    prompt: Option<String>,

    /// Directory to work in (defaults to the current directory)
    #[arg(short = 'd', long)]
    working_dir: Option<PathBuf>,

    /// Resume a stored session by id
    #[arg(long)]
    session: Option<String>,

    /// Debug logging to stderr
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List models available on the Ollama server
    Models,
    /// List stored sessions, newest first
    Sessions,
    /// Print the JSON Schema of config.toml
    ConfigSchema,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let subscriber = fmt::Subscriber::builder()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to initialize logging: {e}");
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            print_error(&e);
            ExitCode::FAILURE
        }
    }
}

/// Provider errors carry their own remediation text; anything else gets its
/// context chain on one line.
fn print_error(error: &anyhow::Error) {
    let message = match error.downcast_ref::<ProviderError>() {
        Some(provider) => provider.to_string(),
        None => format!("{error:#}"),
    };
    eprintln!("{} {message}", style("Error:").red().bold());
}

async fn run(cli: Cli) -> Result<ExitCode> {
    if let Some(Commands::ConfigSchema) = &cli.command {
        println!("{}", serde_json::to_string_pretty(&Config::json_schema())?);
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(dir) = &cli.working_dir {
        std::env::set_current_dir(dir)
            .with_context(|| format!("Cannot change to working directory {}", dir.display()))?;
    }

    let mut config = Config::load_or_init().await?;
    config.apply_env_overrides();
    if let Some(model) = &cli.model {
        config.ollama.model.clone_from(model);
    }
    if let Some(url) = &cli.ollama_url {
        config.ollama.url.clone_from(url);
    }
    if cli.headless {
        config.permissions.mode = PermissionMode::Headless;
    } else if cli.auto_approve {
        config.permissions.mode = PermissionMode::AutoApprove;
    }
    config.validate()?;
    if let Some(id) = cli.session.as_deref().filter(|id| !is_valid_session_id(id)) {
        bail!("Invalid session id '{id}': use letters, digits, '-', '_' or '.', not starting with '.'");
    }

    let store: Arc<dyn SessionStore> = if config.storage.persist_sessions {
        Arc::new(LocalSessionStore::new(&config.data_dir()))
    } else {
        Arc::new(InMemorySessionStore::new())
    };

    let client = create_client(&config);
    let base_url = client.base_url().to_string();
    let llm: Arc<dyn LlmClient> = Arc::new(client);

    match cli.command {
        Some(Commands::Models) => {
            print_models(llm.as_ref()).await?;
            return Ok(ExitCode::SUCCESS);
        }
        Some(Commands::Sessions) => {
            print_sessions(store.as_ref()).await;
            return Ok(ExitCode::SUCCESS);
        }
        Some(Commands::ConfigSchema) | None => {}
    }

    if !llm.is_reachable().await {
        return Err(ProviderError::ConnectionFailure {
            url: base_url,
            attempts: 1,
        }
        .into());
    }

    let scope = PathScope::from_env()?;
    let workspace_dir = scope.cwd.clone();
    let security = Arc::new(SecurityValidator::new(scope));
    let permissions = Arc::new(PermissionManager::terminal(
        config.permissions.mode,
        config.permissions.approval_scope,
    ));

    let mut agent = Agent::builder()
        .llm(llm)
        .tools(default_registry(security))
        .permissions(permissions)
        .store(store)
        .session_id(cli.session.clone().unwrap_or_else(new_session_id))
        .workspace_dir(workspace_dir)
        .config(config.agent.clone())
        .temperature(config.ollama.temperature)
        .max_tokens(config.ollama.max_tokens)
        .build()?;

    if cli.session.is_some() {
        let restored = agent.restore_session().await;
        eprintln!(
            "{}",
            style(format!("Resumed session {} ({restored} messages)", agent.session_id())).dim()
        );
    }

    if let Some(prompt) = cli.prompt {
        return match run_turn(&mut agent, &prompt).await? {
            RunOutcome::Completed { .. } => Ok(ExitCode::SUCCESS),
            RunOutcome::Interrupted { .. } => Ok(ExitCode::from(130)),
        };
    }

    repl(&mut agent, &config).await?;
    Ok(ExitCode::SUCCESS)
}

/// One request with Ctrl-C bound to the turn's cancellation token.
async fn run_turn(agent: &mut Agent, input: &str) -> Result<RunOutcome> {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!(
                    "\n{}",
                    style("Interrupting after the current step...").yellow()
                );
                cancel.cancel();
            }
        })
    };

    let outcome = agent.run(input, &cancel).await;
    watcher.abort();
    let outcome = outcome?;

    match &outcome {
        RunOutcome::Completed { text, metrics } => {
            println!("{text}");
            eprintln!(
                "{}",
                style(format!(
                    "[{:.1}s, {} tokens, {} model calls]",
                    metrics.time_taken.as_secs_f64(),
                    metrics.tokens,
                    metrics.llm_calls
                ))
                .dim()
            );
        }
        RunOutcome::Interrupted { .. } => {
            eprintln!("{}", style("Interrupted.").yellow());
        }
    }
    Ok(outcome)
}

async fn repl(agent: &mut Agent, config: &Config) -> Result<()> {
    eprintln!(
        "{} {} | mode: {} | session: {}",
        style("flaco").cyan().bold(),
        style(&config.ollama.model).bold(),
        agent.permission_mode(),
        agent.session_id()
    );
    eprintln!("{}", style("Type /help for commands, /exit to quit.").dim());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("{} ", style(">").green().bold());
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            eprintln!();
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(command) = input.strip_prefix('/') {
            if !handle_command(agent, command).await? {
                break;
            }
            continue;
        }

        if let Err(e) = run_turn(agent, input).await {
            print_error(&e);
        }
    }
    Ok(())
}

/// Returns `false` when the REPL should exit.
async fn handle_command(agent: &mut Agent, command: &str) -> Result<bool> {
    let mut parts = command.split_whitespace();
    match parts.next().unwrap_or_default() {
        "exit" | "quit" => return Ok(false),
        "reset" => {
            agent.reset_session().await;
            eprintln!("{}", style("Conversation cleared.").green());
        }
        "context" => {
            let info = agent.context_info();
            eprintln!(
                "Context: {}/{} messages ({:.0}%), {} remaining",
                info.message_count, info.limit, info.percentage, info.remaining
            );
        }
        "mode" => match parts.next() {
            None => eprintln!("Permission mode: {}", agent.permission_mode()),
            Some(raw) => match raw.parse::<PermissionMode>() {
                Ok(mode) => {
                    agent.set_permission_mode(mode);
                    eprintln!("Permission mode set to {}", style(mode).bold());
                }
                Err(e) => eprintln!("{}", style(e).red()),
            },
        },
        "models" => {
            if let Err(e) = print_models(agent.llm().as_ref()).await {
                print_error(&e);
            }
        }
        "help" => {
            eprintln!(
                "/reset            clear the conversation\n\
                 /context          show context window usage\n\
                 /mode [mode]      show or set interactive | auto_approve | headless\n\
                 /models           list available models\n\
                 /exit             quit"
            );
        }
        other => print_unknown_command(other),
    }
    Ok(true)
}

fn print_unknown_command(command: &str) {
    eprintln!(
        "{}",
        style(format!("Unknown command '/{command}'. Type /help.")).red()
    );
}

async fn print_models(llm: &dyn LlmClient) -> Result<()> {
    let models = llm.list_models().await?;
    if models.is_empty() {
        bail!("No models installed. Pull one with: ollama pull {}", llm.model());
    }
    for model in models {
        let marker = if model.name == llm.model() { "*" } else { " " };
        let size = model
            .size
            .map(|bytes| format!("{:.1} GB", bytes as f64 / 1_000_000_000.0))
            .unwrap_or_default();
        println!("{marker} {:<40} {size}", model.name);
    }
    Ok(())
}

async fn print_sessions(store: &dyn SessionStore) {
    let sessions = store.list().await;
    if sessions.is_empty() {
        println!("No stored sessions.");
        return;
    }
    for session in sessions {
        let updated = session
            .updated_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{}  {updated}  {} messages",
            session.session_id, session.message_count
        );
    }
}
