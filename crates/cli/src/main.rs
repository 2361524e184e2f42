use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use std::future::Future;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tidings_agent::{ChatSession, SessionEvent, SubmitOutcome, Submission};
use tidings_core::logging::{self, LogSettings};
use tidings_core::{Config, EndpointConfig, MessageId, Profile, RestartConfirmation, Role};
use tidings_providers::{CancelToken, EndpointFactory};
use tokio::runtime::Runtime;
use tokio::sync::mpsc::UnboundedReceiver;

/// Tidings - stream answers from a text-generation endpoint
#[derive(Parser, Debug)]
#[command(name = "tidings")]
#[command(about = "A streaming chat client for text-generation endpoints", long_about = None)]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to config.toml (default: ./config.toml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Profile name to use (default: config's default_profile)
    #[arg(short, long, value_name = "PROFILE")]
    profile: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start an interactive conversation
    Chat,
    /// Send a single prompt and print the answer
    Ask {
        /// Prompt text
        #[arg(required = true, value_name = "PROMPT")]
        prompt: Vec<String>,
    },
    /// Show configured profiles
    Status,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(|| PathBuf::from("config.toml"));
    let config = load_or_create_config(&config_path)?;

    let mut settings = LogSettings::from_config(&config.logging).context("Invalid logging settings")?;
    if cli.verbose {
        settings = settings.with_level("debug");
    }
    let _log_guard = logging::init_logging(Some(settings)).context("Failed to initialize logging")?;

    if cli.verbose {
        println!("{} Using config: {}", "Info:".blue().bold(), config_path.display());
        println!("{} Available profiles: {:?}", "Info:".blue().bold(), config.profile_names());
    }

    let base_dir = config_path.parent().map(Path::to_path_buf).unwrap_or_default();

    match cli.command {
        Commands::Chat => cmd_chat(&config, &base_dir, cli.profile, cli.verbose)?,
        Commands::Ask { prompt } => cmd_ask(&config, &base_dir, cli.profile, prompt.join(" "))?,
        Commands::Status => cmd_status(&config, cli.verbose)?,
    }

    Ok(())
}

/// Load config from file or create from example
fn load_or_create_config(path: &Path) -> Result<Config> {
    if path.exists() {
        Config::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    } else {
        println!("{} Config not found at {}", "Warning:".yellow().bold(), path.display());
        println!("{} Creating config from example...", "Info:".blue().bold());

        std::fs::write(path, Config::example()).context("Failed to create config")?;

        println!(
            "{} Created config at {}. Please check the endpoint settings.",
            "Success:".green().bold(),
            path.display()
        );

        anyhow::bail!("Please edit {} with your settings and run again", path.display())
    }
}

fn select_profile<'a>(config: &'a Config, profile_name: Option<&str>) -> Result<&'a Profile> {
    let profile_name = profile_name.unwrap_or(&config.default_profile);
    config
        .profile(profile_name)
        .with_context(|| format!("Failed to load profile '{}'", profile_name))
}

fn build_session(profile: &Profile, base_dir: &Path) -> Result<ChatSession> {
    let endpoint = EndpointFactory::create_from_config(&profile.endpoint, base_dir)
        .with_context(|| format!("Failed to set up endpoint for profile '{}'", profile.name))?;
    tracing::debug!(profile = %profile.name, endpoint = %endpoint.describe(), "session ready");
    Ok(ChatSession::new(endpoint))
}

fn describe_endpoint(endpoint: &EndpointConfig) -> String {
    match endpoint {
        EndpointConfig::Http { url, connect_timeout_secs: Some(secs) } => format!("{} (connect timeout {}s)", url, secs),
        EndpointConfig::Http { url, connect_timeout_secs: None } => url.clone(),
        EndpointConfig::Mock { responses_file: Some(path) } => format!("mock ({})", path.display()),
        EndpointConfig::Mock { responses_file: None } => "mock".to_string(),
    }
}

/// Interactive conversation on stdin/stdout
fn cmd_chat(config: &Config, base_dir: &Path, profile_name: Option<String>, verbose: bool) -> Result<()> {
    let profile = select_profile(config, profile_name.as_deref())?;
    let runtime = Runtime::new().context("Failed to start async runtime")?;
    let session = Arc::new(build_session(profile, base_dir)?);
    let mut events = session.subscribe();
    let mut renderer = Renderer::new(io::stdout());
    let confirmation = StdinConfirmation;
    let interrupts = Arc::new(Interrupts::default());
    spawn_interrupt_watcher(&runtime, Arc::clone(&interrupts));

    println!("{} Chatting with {}", "Info:".blue().bold(), profile.name.cyan());
    if verbose {
        println!("{} Endpoint: {}", "Info:".blue().bold(), describe_endpoint(&profile.endpoint));
    }
    println!("{}", "Type /restart to start over, /quit to leave.".dimmed());
    print_suggestions(&profile.suggestions);

    let stdin = io::stdin();
    loop {
        print!("{} ", ">".green().bold());
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).context("Failed to read input")? == 0 {
            println!();
            break;
        }

        let line = line.trim();
        let outcome = match line {
            "/quit" | "/exit" => break,
            "/restart" => {
                let cancel = interrupts.begin();
                let outcome = runtime.block_on(render_while(
                    session.restart(&confirmation, cancel),
                    &mut events,
                    &mut renderer,
                ));
                interrupts.end();
                outcome?
            }
            _ => {
                let prompt = pick_suggestion(line, &profile.suggestions, session.transcript().is_empty());
                session.set_input(prompt);
                let cancel = interrupts.begin();
                let outcome = runtime.block_on(render_while(session.submit_input(cancel), &mut events, &mut renderer));
                interrupts.end();
                outcome?
            }
        };

        if let SubmitOutcome::Declined = outcome {
            println!("{}", "Restart cancelled.".dimmed());
        }
    }

    Ok(())
}

/// One-shot prompt
fn cmd_ask(config: &Config, base_dir: &Path, profile_name: Option<String>, prompt: String) -> Result<()> {
    let profile = select_profile(config, profile_name.as_deref())?;
    let runtime = Runtime::new().context("Failed to start async runtime")?;
    let session = build_session(profile, base_dir)?;

    match runtime.block_on(session.submit(Submission::Prompt(prompt), CancelToken::new())) {
        SubmitOutcome::Completed { message } => {
            println!("{}", message.text);
            Ok(())
        }
        SubmitOutcome::Ignored => anyhow::bail!("Prompt is empty"),
        SubmitOutcome::Failed(e) => Err(anyhow::anyhow!(e.user_message())),
        other => anyhow::bail!("Unexpected outcome: {:?}", other),
    }
}

/// Show configured profiles
fn cmd_status(config: &Config, verbose: bool) -> Result<()> {
    println!("{}", "Tidings Status".green().bold().underline());
    println!();

    println!("{} Configuration", "Info:".blue().bold());
    println!("  Default profile: {}", config.default_profile.cyan());
    println!("  Available profiles:");
    for profile_name in config.profile_names() {
        let profile = config.profile(&profile_name)?;
        println!("    - {} ({})", profile_name.cyan(), describe_endpoint(&profile.endpoint));

        if verbose && !profile.suggestions.is_empty() {
            for suggestion in &profile.suggestions {
                println!("        * {}", suggestion.dimmed());
            }
        }
    }

    if verbose {
        println!();
        println!("{} Logging", "Info:".blue().bold());
        println!("  Level: {}", config.logging.level.cyan());
        println!("  Format: {}", config.logging.format.cyan());
        println!("  File output: {}", if config.logging.file.enabled { "enabled" } else { "disabled" });
    }

    Ok(())
}

fn print_suggestions(suggestions: &[String]) {
    if suggestions.is_empty() {
        return;
    }

    println!("{}", "Try one of these (type its number):".dimmed());
    for (index, suggestion) in suggestions.iter().enumerate() {
        println!("  {} {}", format!("{}.", index + 1).cyan(), suggestion);
    }
}

/// A bare number picks a suggestion while the conversation is still empty
fn pick_suggestion(line: &str, suggestions: &[String], transcript_empty: bool) -> String {
    if transcript_empty
        && let Ok(choice) = line.parse::<usize>()
        && let Some(suggestion) = choice.checked_sub(1).and_then(|index| suggestions.get(index))
    {
        return suggestion.clone();
    }
    line.to_string()
}

/// Cancel token of the request currently in flight, if any
#[derive(Debug, Default)]
struct Interrupts {
    active: Mutex<Option<CancelToken>>,
}

impl Interrupts {
    /// Register a fresh token for the request about to start
    fn begin(&self) -> CancelToken {
        let cancel = CancelToken::new();
        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = Some(cancel.clone());
        cancel
    }

    fn end(&self) {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    /// Cancel the active request; false when nothing is in flight
    fn interrupt(&self) -> bool {
        match self.active.lock().unwrap_or_else(|e| e.into_inner()).take() {
            Some(cancel) => {
                cancel.cancel();
                true
            }
            None => false,
        }
    }
}

/// One Ctrl-C handler for the whole chat: cancels the request in flight, or exits when idle
fn spawn_interrupt_watcher(runtime: &Runtime, interrupts: Arc<Interrupts>) {
    runtime.spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !interrupts.interrupt() {
                println!();
                std::process::exit(130);
            }
            tracing::debug!("request interrupted");
        }
    });
}

/// Drive a submission while rendering the events it emits
async fn render_while<F, W>(
    submission: F, events: &mut UnboundedReceiver<SessionEvent>, renderer: &mut Renderer<W>,
) -> Result<SubmitOutcome>
where
    F: Future<Output = SubmitOutcome>,
    W: Write,
{
    tokio::pin!(submission);

    loop {
        tokio::select! {
            outcome = &mut submission => {
                while let Ok(event) = events.try_recv() {
                    renderer.render(&event)?;
                }
                return Ok(outcome);
            }
            Some(event) = events.recv() => renderer.render(&event)?,
        }
    }
}

/// Writes session events to a terminal as they arrive
struct Renderer<W> {
    out: W,
    /// Streaming message currently on screen and how many bytes of it are printed
    open: Option<(MessageId, usize)>,
}

impl<W: Write> Renderer<W> {
    fn new(out: W) -> Self {
        Self { out, open: None }
    }

    fn render(&mut self, event: &SessionEvent) -> io::Result<()> {
        match event {
            SessionEvent::MessageAppended(message) => match message.role {
                Role::User => {}
                Role::Assistant if message.is_streaming => {
                    if let Some(id) = message.id {
                        self.open = Some((id, 0));
                    }
                }
                Role::Assistant => writeln!(self.out, "{}", message.text)?,
                Role::System if message.is_error => writeln!(self.out, "{}", message.text.red())?,
                Role::System => writeln!(self.out, "{}", message.text.yellow())?,
            },
            SessionEvent::MessageUpdated { id, text } => {
                if let Some((open_id, printed)) = self.open.as_mut()
                    && *open_id == *id
                    && let Some(delta) = text.get(*printed..)
                {
                    write!(self.out, "{}", delta)?;
                    *printed = text.len();
                    self.out.flush()?;
                }
            }
            SessionEvent::MessageFinished(id) => {
                if self.open.is_some_and(|(open_id, _)| open_id == *id) {
                    writeln!(self.out)?;
                    self.open = None;
                }
            }
            SessionEvent::MessageRemoved(id) => {
                if self.open.is_some_and(|(open_id, _)| open_id == *id) {
                    self.open = None;
                }
            }
            SessionEvent::TranscriptReset(message) => {
                self.open = None;
                writeln!(self.out, "{}", message.text.yellow())?;
            }
            SessionEvent::BusyChanged(_) => {}
        }
        Ok(())
    }
}

/// Asks on the terminal before history is thrown away
struct StdinConfirmation;

impl RestartConfirmation for StdinConfirmation {
    fn confirm_restart(&self, message_count: usize) -> tidings_core::Result<bool> {
        print!("Restart the conversation? {} messages will be cleared. [y/N] ", message_count);
        io::stdout().flush()?;

        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(is_yes(&answer))
    }

    fn name(&self) -> &str {
        "stdin"
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
