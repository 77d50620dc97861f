use std::path::Path;

use clap::Parser;
use clap::Subcommand;
use dev_core::Session;
use dev_core::SessionStore;
use dev_core::config;
use dev_core::llm::LlmClient;
use dev_core::session::Message;
use dev_core::tools::background::BackgroundRegistry;
use dev_core::tools::background::IdAllocator;

use crate::sessions;
use crate::setup;

/// A software development agent that drives an external chat model through
/// a Markdown tool-call envelope.
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Cli {
    /// Run a single prompt non-interactively, then exit.
    #[arg(short = 'p', long = "prompt", value_name = "PROMPT")]
    pub prompt: Option<String>,

    /// Resume the last session associated with the current directory.
    #[arg(long)]
    pub resume: bool,

    /// Resume a specific session by id.
    #[arg(long, value_name = "UUID", conflicts_with = "resume")]
    pub session: Option<String>,

    #[clap(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inspect saved sessions.
    Sessions {
        #[clap(subcommand)]
        action: SessionsAction,
    },
    /// Open the config file in the OS default editor.
    Config,
    /// Run the first-run configuration wizard.
    Setup,
}

#[derive(Debug, Subcommand)]
pub enum SessionsAction {
    /// Print up to 20 sessions, newest first.
    List,
}

pub async fn run_main(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Command::Sessions {
            action: SessionsAction::List,
        }) => {
            let store = SessionStore::from_config_dir()?;
            sessions::print_recent(&store);
            return Ok(());
        }
        Some(Command::Config) => {
            setup::open_config_in_editor()?;
            return Ok(());
        }
        Some(Command::Setup) => {
            setup::run_wizard()?;
            return Ok(());
        }
        None => {}
    }

    let config = match config::load_config()? {
        Some(config) => config,
        None => setup::run_wizard()?,
    };

    let store = SessionStore::from_config_dir()?;
    store.sweep_expired(config.session_retention_days);

    let cwd = std::env::current_dir()?;
    let automated = cli.prompt.is_some();

    let mut session = resolve_session(&cli, &store, &cwd)?;

    if let Some(prompt) = &cli.prompt {
        if session.history.is_empty() {
            session.original_prompt = prompt.clone();
        }
        session.history.push(Message::user(prompt.clone()));
    } else if session.history.is_empty() {
        let prompt = read_initial_prompt_from_stdin()?;
        session.original_prompt = prompt.clone();
        session.history.push(Message::user(prompt));
    }

    let llm = LlmClient::new(config.api_url.clone(), config.api_key.clone(), config.model.clone());
    let background = BackgroundRegistry::new();
    let id_allocator = IdAllocator::default();

    let summary = dev_core::agent::run(
        &mut session,
        &store,
        &llm,
        &config,
        &background,
        &id_allocator,
        automated,
    )
    .await?;

    println!("{summary}");
    Ok(())
}

fn resolve_session(cli: &Cli, store: &SessionStore, cwd: &Path) -> anyhow::Result<Session> {
    if let Some(id) = &cli.session {
        let session = store.require(id)?;
        println!("Resumed: {}", session.id);
        return Ok(session);
    }
    if cli.resume {
        let id = store
            .last_session_for(cwd)
            .ok_or_else(|| anyhow::anyhow!("no previous session found for {}", cwd.display()))?;
        let session = store.require(&id)?;
        println!("Resumed: {}", session.id);
        return Ok(session);
    }
    let session = Session::new(cwd.to_path_buf(), String::new());
    println!("Session: {}", session.id);
    Ok(session)
}

fn read_initial_prompt_from_stdin() -> anyhow::Result<String> {
    use std::io::IsTerminal;
    use std::io::Read;

    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        println!("Describe what you'd like done:");
    }
    let mut buf = String::new();
    stdin.read_to_string(&mut buf)?;
    Ok(buf.trim().to_string())
}
