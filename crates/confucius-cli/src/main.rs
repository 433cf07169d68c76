//! # confucius-cli
//!
//! Binary entry point for Confucius Agent.
//!
//! This crate provides:
//! - CLI argument parsing using `clap`
//! - Configuration loading with command-line overrides
//! - `confucius run`: the full coding agent inside a Ralph loop
//! - `confucius loop`: a plain shell command repeated until a promise appears
//! - `confucius notes` and `confucius init` for workspace housekeeping

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use confucius_adapters::process::{self, CommandSpec};
use confucius_adapters::{CliLlm, coding_agent_with_cancel};
use confucius_core::{AgentConfig, CancelToken, NoteStore, NoteType, RalphOutcome, RalphTermination};
use confucius_proto::LlmClient;
use std::fs;
use std::io::{IsTerminal, stdout};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Color output mode for terminal display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorMode {
    /// Automatically detect if stdout is a TTY
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl ColorMode {
    fn should_use_colors(self) -> bool {
        match self {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => stdout().is_terminal(),
        }
    }
}

/// ANSI color codes for terminal output.
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const CYAN: &str = "\x1b[36m";
    pub const MAGENTA: &str = "\x1b[35m";
}

/// Confucius Agent - LLM coding agent with Ralph-loop retries and persistent notes
#[derive(Parser, Debug)]
#[command(name = "confucius", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    // ─────────────────────────────────────────────────────────────────────────
    // Global options (available for all subcommands)
    // ─────────────────────────────────────────────────────────────────────────

    /// Path to configuration file
    #[arg(short, long, default_value = ".confucius/config.yml", global = true)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Color output mode (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorMode::Auto, global = true)]
    color: ColorMode,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the coding agent on a task until it completes
    Run(RunArgs),

    /// Repeat a shell command until its output contains a completion string
    Loop(LoopArgs),

    /// Search notes from past sessions
    Notes(NotesArgs),

    /// Create the .confucius directory with a default config
    Init(InitArgs),
}

/// Arguments for the run subcommand.
#[derive(Parser, Debug)]
struct RunArgs {
    /// Task description
    #[arg(conflicts_with = "task_file")]
    task: Option<String>,

    /// Read the task from a file
    #[arg(short = 'f', long)]
    task_file: Option<PathBuf>,

    /// Override workspace root
    #[arg(short, long)]
    workspace: Option<PathBuf>,

    /// Override the LLM backend (claude, kiro, gemini, codex, amp, auto)
    #[arg(short, long)]
    backend: Option<String>,

    /// Override max Ralph iterations
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Override completion promise
    #[arg(long)]
    completion_promise: Option<String>,

    /// Write a JSONL trajectory to this directory
    #[arg(long)]
    trace_dir: Option<PathBuf>,

    /// Skip note distillation
    #[arg(long)]
    no_notes: bool,

    /// Disable subagent delegation
    #[arg(long)]
    no_subagents: bool,

    /// Print the outcome as JSON
    #[arg(long)]
    json: bool,

    /// Show the resolved configuration without running
    #[arg(long)]
    dry_run: bool,
}

/// Arguments for the loop subcommand.
#[derive(Parser, Debug)]
struct LoopArgs {
    /// Shell command to repeat
    command: String,

    /// String whose appearance in the output ends the loop
    #[arg(short = 'p', long, default_value = "DONE")]
    completion_promise: String,

    /// Maximum iterations
    #[arg(short = 'i', long, default_value_t = 20)]
    max_iterations: u32,

    /// Delay between iterations, in seconds
    #[arg(short, long, default_value_t = 2)]
    delay: u64,

    /// Per-run timeout, in seconds
    #[arg(long, default_value_t = 300)]
    timeout: u64,

    /// Echo each run's output
    #[arg(long)]
    show_output: bool,
}

/// Arguments for the notes subcommand.
#[derive(Parser, Debug)]
struct NotesArgs {
    /// Case-insensitive text to look for
    #[arg(short, long, default_value = "")]
    query: String,

    /// Restrict to one note type
    #[arg(short = 't', long = "type")]
    note_type: Option<String>,

    /// Match notes carrying any of the listed tags (repeatable)
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Search failure notes by error message instead
    #[arg(long, conflicts_with_all = ["note_type", "tags"])]
    failures: bool,

    /// Print the note tree as JSON
    #[arg(long)]
    tree: bool,

    /// Notes directory (default: ralph.notes_path from config)
    #[arg(long)]
    path: Option<PathBuf>,
}

/// Arguments for the init subcommand.
#[derive(Parser, Debug)]
struct InitArgs {
    /// Workspace to initialize (default: current directory)
    path: Option<PathBuf>,

    /// Overwrite an existing config file
    #[arg(long)]
    force: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(cli.color.should_use_colors())
        .init();

    let exit_code = match cli.command {
        Commands::Run(args) => run_command(&cli.config, cli.verbose, cli.color, args).await?,
        Commands::Loop(args) => loop_command(cli.color, args).await?,
        Commands::Notes(args) => {
            notes_command(&cli.config, args)?;
            0
        }
        Commands::Init(args) => {
            init_command(args)?;
            0
        }
    };

    // Use explicit exit for non-zero codes to ensure proper exit status
    if exit_code != 0 {
        std::process::exit(exit_code);
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<AgentConfig> {
    let mut config = if path.exists() {
        AgentConfig::from_file(path).with_context(|| format!("Failed to load config from {}", path.display()))?
    } else {
        debug!(path = %path.display(), "Config file not found, using defaults");
        AgentConfig::default()
    };
    config.normalize();
    Ok(config)
}

/// Cancels `cancel` on SIGINT, and on SIGTERM where available.
fn spawn_signal_handlers(cancel: &CancelToken) {
    let on_sigint = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received (SIGINT), stopping after the current step...");
            on_sigint.cancel();
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let on_sigterm = cancel.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    warn!("SIGTERM received, stopping after the current step...");
                    on_sigterm.cancel();
                }
                Err(e) => warn!(error = %e, "Failed to register SIGTERM handler"),
            }
        });
    }
}

async fn run_command(config_path: &Path, verbose: bool, color_mode: ColorMode, args: RunArgs) -> Result<i32> {
    if !config_path.exists() {
        warn!("Config file {} not found, using defaults", config_path.display());
    }
    let mut config = load_config(config_path)?;

    let task = match (args.task, args.task_file) {
        (Some(task), _) => task,
        (None, Some(path)) => fs::read_to_string(&path)
            .with_context(|| format!("Failed to read task file {}", path.display()))?,
        (None, None) => anyhow::bail!("No task given: pass TASK or --task-file"),
    };

    // CLI overrides take final precedence
    if let Some(workspace) = args.workspace {
        config.workspace.root = workspace.to_string_lossy().into_owned();
    }
    if let Some(backend) = args.backend {
        config.cli.backend = backend;
    }
    if let Some(max) = args.max_iterations {
        config.ralph.max_iterations = max;
    }
    if let Some(promise) = args.completion_promise {
        config.ralph.completion_promise = promise;
    }
    if let Some(dir) = args.trace_dir {
        config.ralph.trace_dir = Some(dir.to_string_lossy().into_owned());
    }
    if args.no_notes {
        config.ralph.enable_notes = false;
    }
    if args.no_subagents {
        config.subagents.enabled = false;
    }

    let warnings = config.validate().context("Configuration validation failed")?;
    for warning in &warnings {
        eprintln!("{warning}");
    }

    if args.dry_run {
        println!("Dry run mode - configuration:");
        println!("  Task: {}", preview(&task, 60));
        println!("  Workspace: {}", config.workspace.root);
        println!("  Backend: {}", config.cli.backend);
        println!("  Completion promise: {}", config.ralph.completion_promise);
        println!("  Max Ralph iterations: {}", config.ralph.max_iterations);
        println!("  Max orchestrator iterations: {}", config.orchestrator.max_iterations);
        println!(
            "  Notes: {}",
            if config.ralph.enable_notes { config.ralph.notes_path.as_str() } else { "disabled" }
        );
        println!(
            "  Subagents: {}",
            if config.subagents.enabled {
                format!("max depth {}", config.subagents.max_depth)
            } else {
                "disabled".to_string()
            }
        );
        if !warnings.is_empty() {
            println!("  Warnings: {}", warnings.len());
        }
        return Ok(0);
    }

    let llm = CliLlm::from_config(&config).context("Failed to resolve LLM backend")?;
    info!(backend = %llm.backend().command, workspace = %config.workspace.root, "Starting agent");

    let cancel = CancelToken::new();
    spawn_signal_handlers(&cancel);

    // The loop blocks on model calls and subprocesses, so it runs off the async workers
    let (outcome, subagent_trace) = tokio::task::spawn_blocking(move || -> Result<(RalphOutcome, Option<String>)> {
        let llm: Arc<dyn LlmClient> = Arc::new(llm);
        let mut agent = coding_agent_with_cancel(llm, &config, cancel)?;
        let outcome = agent.ralph.run_ralph_loop(&task)?;
        let trace = agent
            .subagents
            .as_ref()
            .filter(|ext| !ext.trace().is_empty())
            .map(|ext| ext.trace_summary());
        Ok((outcome, trace))
    })
    .await
    .context("Agent task panicked")??;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome, color_mode.should_use_colors());
        if verbose && let Some(trace) = subagent_trace {
            println!("\n{trace}");
        }
    }

    Ok(outcome.termination.exit_code())
}

/// Runs a shell command repeatedly until its output contains the promise.
async fn loop_command(color_mode: ColorMode, args: LoopArgs) -> Result<i32> {
    use colors::*;

    let use_colors = color_mode.should_use_colors();
    let cancel = CancelToken::new();
    spawn_signal_handlers(&cancel);

    if use_colors {
        println!("{BOLD}{CYAN}Ralph Loop{RESET}");
        println!("  Command:        {}", args.command);
        println!("  Completion:     '{}'", args.completion_promise);
        println!("  Max iterations: {}", args.max_iterations);
    } else {
        println!("Ralph Loop");
        println!("  Command:        {}", args.command);
        println!("  Completion:     '{}'", args.completion_promise);
        println!("  Max iterations: {}", args.max_iterations);
    }

    let spec = CommandSpec::shell(&args.command);
    let timeout = Duration::from_secs(args.timeout);
    let mut iteration: u32 = 0;
    let mut termination = RalphTermination::MaxIterations;

    while iteration < args.max_iterations {
        if cancel.is_cancelled() {
            termination = RalphTermination::Cancelled;
            break;
        }

        iteration += 1;
        if use_colors {
            println!("\n{BOLD}{MAGENTA}[{iteration}/{}] Executing...{RESET}", args.max_iterations);
        } else {
            println!("\n[{iteration}/{}] Executing...", args.max_iterations);
        }

        match process::run(&spec, Some(timeout)).await {
            Ok(output) if output.timed_out => {
                warn!(iteration, timeout_secs = args.timeout, "Command timed out");
            }
            Ok(output) => {
                let combined = output.combined();
                if args.show_output {
                    print!("{combined}");
                }
                if combined.contains(&args.completion_promise) {
                    termination = RalphTermination::CompletionPromise;
                    break;
                }
                debug!(iteration, exit_code = ?output.exit_code, "Completion string not found");
            }
            Err(e) => warn!(iteration, error = %e, "Command failed to start"),
        }

        if iteration < args.max_iterations && args.delay > 0 {
            tokio::time::sleep(Duration::from_secs(args.delay)).await;
        }
    }

    let message = match termination {
        RalphTermination::CompletionPromise | RalphTermination::CompletionSignal => {
            format!("Completed after {iteration} iterations")
        }
        RalphTermination::MaxIterations => "Max iterations reached".to_string(),
        RalphTermination::Cancelled => "Interrupted".to_string(),
    };
    if use_colors {
        let color = if termination.is_success() { GREEN } else { YELLOW };
        println!("\n{color}{BOLD}{message}{RESET}");
    } else {
        println!("\n{message}");
    }

    Ok(termination.exit_code())
}

fn notes_command(config_path: &Path, args: NotesArgs) -> Result<()> {
    let config = load_config(config_path)?;
    let path = args
        .path
        .unwrap_or_else(|| PathBuf::from(&config.ralph.notes_path));

    if !path.is_dir() {
        println!("No notes found at {}", path.display());
        return Ok(());
    }

    let store = NoteStore::open(&path).with_context(|| format!("Failed to open notes at {}", path.display()))?;

    if args.tree {
        println!("{}", serde_json::to_string_pretty(&store.hierarchy())?);
        return Ok(());
    }

    let note_type = args
        .note_type
        .as_deref()
        .map(|name| {
            NoteType::parse(name).with_context(|| {
                let valid: Vec<_> = NoteType::ALL.iter().map(|t| t.as_str()).collect();
                format!("Invalid note type: {name} (expected one of: {})", valid.join(", "))
            })
        })
        .transpose()?;

    let results = if args.failures {
        store.search_failures(&args.query)
    } else {
        store.search(&args.query, note_type, &args.tags)
    };

    if results.is_empty() {
        println!("No matching notes found");
        return Ok(());
    }

    println!("Found {} notes:\n", results.len());
    for note in results {
        println!("{} [{}]", note.title, note.note_type);
        println!("  {}", note.path);
        println!("  {}\n", preview(&note.content, 200));
    }
    Ok(())
}

fn init_command(args: InitArgs) -> Result<()> {
    let workspace = args.path.unwrap_or_else(|| PathBuf::from("."));
    let dir = workspace.join(".confucius");

    fs::create_dir_all(dir.join("notes")).with_context(|| format!("Failed to create {}", dir.display()))?;
    fs::create_dir_all(dir.join("traces"))?;

    let config_file = dir.join("config.yml");
    if config_file.exists() && !args.force {
        println!("Keeping existing {}", config_file.display());
    } else {
        let mut config = AgentConfig::default();
        config.ralph.trace_dir = Some(".confucius/traces".to_string());
        let yaml = config.to_yaml()?;
        fs::write(&config_file, format!("# Confucius Agent configuration\n{yaml}"))
            .with_context(|| format!("Failed to write {}", config_file.display()))?;
    }

    let gitignore = workspace.join(".gitignore");
    if gitignore.exists() {
        let content = fs::read_to_string(&gitignore)?;
        if !content.contains(".confucius/traces") {
            fs::write(&gitignore, format!("{content}\n# Confucius Agent\n.confucius/traces/\n"))?;
        }
    }

    println!("Initialized Confucius Agent in {}", workspace.display());
    println!("\nCreated:\n  {}/\n  ├── config.yml\n  ├── notes/\n  └── traces/", dir.display());
    Ok(())
}

fn print_outcome(outcome: &RalphOutcome, use_colors: bool) {
    use colors::*;

    let (color, icon, label) = match outcome.termination {
        RalphTermination::CompletionPromise => (GREEN, "✓", "Completion promise detected"),
        RalphTermination::CompletionSignal => (GREEN, "✓", "Agent signaled completion"),
        RalphTermination::MaxIterations => (YELLOW, "⚠", "Maximum iterations reached"),
        RalphTermination::Cancelled => (YELLOW, "⚡", "Interrupted by signal"),
    };

    let separator = "─".repeat(58);

    if use_colors {
        println!("\n{BOLD}┌{separator}┐{RESET}");
        println!("{BOLD}│{RESET} {color}{BOLD}{icon}{RESET} Loop terminated: {color}{label}{RESET}");
        println!("{BOLD}├{separator}┤{RESET}");
        println!("{BOLD}│{RESET}   Session:     {DIM}{}{RESET}", outcome.session_id);
        println!("{BOLD}│{RESET}   Iterations:  {CYAN}{}{RESET}", outcome.ralph_iterations);
        println!(
            "{BOLD}│{RESET}   Inner steps: {CYAN}{}{RESET}",
            outcome.total_orchestrator_iterations
        );
        if !outcome.notes_created.is_empty() {
            println!("{BOLD}│{RESET}   Notes:       {CYAN}{}{RESET}", outcome.notes_created.len());
        }
        println!("{BOLD}└{separator}┘{RESET}");
    } else {
        println!("\n+{}+", "-".repeat(58));
        println!("| {icon} Loop terminated: {label}");
        println!("+{}+", "-".repeat(58));
        println!("|   Session:     {}", outcome.session_id);
        println!("|   Iterations:  {}", outcome.ralph_iterations);
        println!("|   Inner steps: {}", outcome.total_orchestrator_iterations);
        if !outcome.notes_created.is_empty() {
            println!("|   Notes:       {}", outcome.notes_created.len());
        }
        println!("+{}+", "-".repeat(58));
    }
}

/// First `max` characters on one line.
fn preview(text: &str, max: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() > max {
        format!("{}...", flat.chars().take(max).collect::<String>())
    } else {
        flat
    }
}
