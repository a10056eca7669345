use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use cobra::analysis::{AnalysisRequest, Analyzer, ChatClient};
use cobra::change::{ChangeSource, PollingChangeSource};
use cobra::config::{setup_api_key_interactive, Config};
use cobra::editor::{parse_problem_id, EditorAccessor, EditorHost, FileEditor};
use cobra::extract::extract_line_numbers;
use cobra::history::History;
use cobra::keyring::{CredentialStore, EnvOverride, KeyringStore};
use cobra::messages::SurfaceMessage;
use cobra::pipeline::{Pipeline, PipelineSettings};
use cobra::present::Presenter;
use cobra::rules::StaticAnalyzer;
use cobra::surface::TerminalSurface;
use std::io::{self, BufRead, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;
use tracing_subscriber::EnvFilter;

const COMMAND_HELP: &str =
    "Commands: a(ctivate)  m(inimize)  r(estore)  c(lose)  o(reopen)  n <problem url>  q(uit)";

#[derive(Parser, Debug)]
#[command(
    name = "cobra",
    about = "Reviews your interview solution after each burst of edits and highlights the lines it talks about",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch a solution file and review it whenever editing pauses
    Watch(WatchArgs),
    /// Review a solution file once
    Analyze(AnalyzeArgs),
    /// Print the line numbers referenced in review text
    Lines(LinesArgs),
    /// Save an API key to the system keychain
    Setup,
    /// Show time spent per problem
    Stats(StatsArgs),
}

#[derive(Args, Debug)]
struct WatchArgs {
    /// Solution file acting as the editor
    file: PathBuf,
    /// Problem URL or slug, e.g. https://leetcode.com/problems/two-sum/
    #[arg(long)]
    problem: String,
    /// Use the built-in static rules instead of the model
    #[arg(long)]
    offline: bool,
    /// Quiet window in milliseconds before a review is requested
    #[arg(long)]
    debounce_ms: Option<u64>,
    /// Start with the assistant open
    #[arg(long)]
    activate: bool,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    file: PathBuf,
    #[arg(long)]
    problem: String,
    #[arg(long)]
    offline: bool,
    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct LinesArgs {
    /// Text to scan; read from stdin when omitted
    text: Option<String>,
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct StatsArgs {
    /// Number of most recent sessions to include
    #[arg(long, default_value_t = 500)]
    limit: usize,
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Watch(args) => run_watch(args).await,
        Commands::Analyze(args) => run_analyze(args).await,
        Commands::Lines(args) => run_lines(args),
        Commands::Setup => setup_api_key_interactive(&KeyringStore),
        Commands::Stats(args) => run_stats(args),
    }
}

/// Logs go to stderr; stdout belongs to the rendered surface.
fn init_logging() {
    let filter = EnvFilter::try_from_env("COBRA_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn credentials() -> Arc<dyn CredentialStore> {
    Arc::new(EnvOverride::new(KeyringStore))
}

fn load_config(credentials: &dyn CredentialStore) -> Config {
    let mut config = Config::load();
    if config.migrate_legacy_key(credentials) {
        if let Err(err) = config.save() {
            warn!(error = %err, "failed to save config after moving the API key to the keychain");
        }
    }
    config
}

fn build_analyzer(
    config: &Config,
    credentials: Arc<dyn CredentialStore>,
    offline: bool,
) -> Result<Arc<dyn Analyzer>> {
    if offline {
        return Ok(Arc::new(StaticAnalyzer));
    }
    Ok(Arc::new(ChatClient::new(config, credentials)?))
}

async fn run_watch(args: WatchArgs) -> Result<()> {
    let credentials = credentials();
    let mut config = load_config(credentials.as_ref());
    if let Some(debounce_ms) = args.debounce_ms {
        config.debounce_ms = debounce_ms;
        config.sanitize();
    }

    let path = args
        .file
        .canonicalize()
        .with_context(|| format!("Cannot open {}", args.file.display()))?;
    let editor = Arc::new(FileEditor::new(path, args.problem.clone()));
    let host: Arc<dyn EditorHost> = editor.clone();
    if EditorAccessor::resolve(host.clone()).is_none() {
        anyhow::bail!("'{}' does not name a problem", args.problem);
    }

    let analyzer = build_analyzer(&config, credentials, args.offline)?;
    let changes = PollingChangeSource::new(host.clone(), config.poll_interval()).subscribe();
    let surface = TerminalSurface::new(host.clone());
    let mut pipeline = Pipeline::new(
        host,
        changes,
        analyzer,
        Box::new(surface),
        PipelineSettings::from_config(&config),
    );
    match History::open_default() {
        Some(history) => pipeline = pipeline.with_history(history),
        None => warn!("no data directory; sessions will not be recorded"),
    }
    let handle = pipeline.spawn();

    eprintln!("{}", COMMAND_HELP);
    if args.activate {
        handle.send(SurfaceMessage::Activate);
    }

    // Blocking stdin reads live on their own thread so shutdown never waits
    // for a line of input.
    let input = handle.sender();
    std::thread::spawn(move || read_commands(editor, input));

    let interrupt = handle.sender();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = interrupt.send(SurfaceMessage::Shutdown);
        }
    });

    let report = handle.join().await?;
    eprintln!(
        "{} review(s) requested, {} shown, {} superseded",
        report.requests_issued, report.results_presented, report.stale_dropped
    );
    for session in &report.sessions {
        eprintln!(
            "  {}: {} active, {} review(s)",
            session.problem_id,
            format_duration(Duration::from_millis(session.active_ms)),
            session.analyses
        );
    }
    Ok(())
}

fn read_commands(editor: Arc<FileEditor>, sender: UnboundedSender<SurfaceMessage>) {
    for line in io::stdin().lock().lines() {
        let Ok(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(message) = SurfaceMessage::from_command(line) else {
            eprintln!("Unknown command '{}'. {}", line, COMMAND_HELP);
            continue;
        };
        // The host must be at the new location before the pipeline re-resolves
        if let SurfaceMessage::Navigate { location } = &message {
            editor.navigate(location);
        }
        let quit = message == SurfaceMessage::Shutdown;
        if sender.send(message).is_err() || quit {
            return;
        }
    }
    let _ = sender.send(SurfaceMessage::Shutdown);
}

async fn run_analyze(args: AnalyzeArgs) -> Result<()> {
    let credentials = credentials();
    let config = load_config(credentials.as_ref());
    let problem_id = parse_problem_id(&args.problem)
        .with_context(|| format!("'{}' does not name a problem", args.problem))?;
    let code = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;

    let analyzer = build_analyzer(&config, credentials, args.offline)?;
    let request = AnalysisRequest { code, problem_id };
    let result = analyzer.analyze(&request).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let host: Arc<dyn EditorHost> = Arc::new(FileEditor::new(&args.file, args.problem.clone()));
    let mut surface = TerminalSurface::new(host);
    Presenter::new(config.retry_policy()).present(&mut surface, &result);
    Ok(())
}

fn run_lines(args: LinesArgs) -> Result<()> {
    let text = match args.text {
        Some(text) => text,
        None => {
            let mut text = String::new();
            io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read stdin")?;
            text
        }
    };
    let lines = extract_line_numbers(&text);
    if args.json {
        println!("{}", serde_json::to_string(&lines)?);
    } else {
        let joined: Vec<String> = lines.iter().map(|n| n.to_string()).collect();
        println!("{}", joined.join(", "));
    }
    Ok(())
}

fn run_stats(args: StatsArgs) -> Result<()> {
    let history = History::open_default().context("Could not determine data directory")?;
    let stats = history.summarize(args.limit)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    if stats.is_empty() {
        println!("No sessions recorded yet.");
        return Ok(());
    }

    println!(
        "{:<32} {:>8} {:>10} {:>8} {:>8}",
        "PROBLEM", "SESSIONS", "ACTIVE", "REVIEWS", "FLAGGED"
    );
    for entry in &stats {
        println!(
            "{:<32} {:>8} {:>10} {:>8} {:>8}",
            entry.problem_id,
            entry.sessions,
            format_duration(entry.active()),
            entry.analyses,
            entry.lines_flagged
        );
    }
    Ok(())
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}
