//! CLI command definitions, routing, and tracing setup.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use lineage_core::runtime::{build_orchestrator, database_path, open_report, state_path};
use lineage_core::{CancelFlag, PipelineResult, ProgressReporter, RunSummary, citation_graph};
use lineage_shared::{
    AppConfig, IngestSource, PaperIdentity, RankingPolicyKind, RunLimits, init_config,
    load_config, load_config_from,
};
use lineage_state::FrontierEntry;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Recursive knowledge distillation over citation graphs.
#[derive(Parser)]
#[command(
    name = "lineage",
    version,
    about = "Distill a paper and its foundational ancestry into linked knowledge notes.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.lineage/lineage.toml.
    #[arg(long, global = true, env = "LINEAGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the recursion state and database.
    #[arg(long, global = true)]
    pub state_dir: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Citation ranking policy.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum PolicyArg {
    Age,
    Influence,
    Blend,
}

impl From<PolicyArg> for RankingPolicyKind {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Age => Self::Age,
            PolicyArg::Influence => Self::Influence,
            PolicyArg::Blend => Self::Blend,
        }
    }
}

/// Paper source.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum SourceArg {
    SemanticScholar,
    Local,
}

impl From<SourceArg> for IngestSource {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::SemanticScholar => Self::SemanticScholar,
            SourceArg::Local => Self::Local,
        }
    }
}

/// Flags shared by `analyze` and `resume`; each overrides the config file.
#[derive(Args, Debug, Default)]
pub(crate) struct RunArgs {
    /// Maximum recursion depth (inclusive).
    #[arg(short = 'd', long)]
    pub max_depth: Option<u32>,

    /// Foundational citations followed per paper.
    #[arg(short = 'c', long)]
    pub max_citations: Option<usize>,

    /// Papers processed concurrently within one depth.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Citation ranking policy.
    #[arg(long, value_enum)]
    pub policy: Option<PolicyArg>,

    /// Paper source.
    #[arg(long, value_enum)]
    pub source: Option<SourceArg>,

    /// Local corpus directory. Used only with --source local.
    #[arg(long)]
    pub corpus: Option<String>,

    /// Output directory for rendered notes.
    #[arg(short, long)]
    pub out: Option<String>,

    /// Extraction model identifier.
    #[arg(long)]
    pub model: Option<String>,

    /// Print the run summary as JSON.
    #[arg(long)]
    pub json: bool,
}

impl RunArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(depth) = self.max_depth {
            config.defaults.max_depth = depth;
        }
        if let Some(n) = self.max_citations {
            config.defaults.max_citations = n;
        }
        if let Some(n) = self.concurrency {
            config.defaults.concurrency = n;
        }
        if let Some(policy) = self.policy {
            config.ranking.policy = policy.into();
        }
        if let Some(source) = self.source {
            config.ingest.source = source.into();
        }
        if let Some(corpus) = &self.corpus {
            config.ingest.corpus_dir = corpus.clone();
        }
        if let Some(out) = &self.out {
            config.defaults.output_dir = out.clone();
        }
        if let Some(model) = &self.model {
            config.extraction.model = model.clone();
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Distill a seed paper and recurse into its foundational citations.
    Analyze {
        /// Seed paper: DOI, doi: key, or doi.org URL.
        seed: String,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Continue draining the persisted frontier.
    Resume {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Show visited papers and pending work.
    Status {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Clear recursion state, stored records, and results.
    Reset {
        /// Confirm the reset.
        #[arg(long)]
        yes: bool,
    },

    /// Export the citation graph of processed papers as JSON.
    Graph {
        /// Write to a file instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "lineage=info",
        1 => "lineage=debug",
        _ => "lineage=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    if let Some(dir) = &cli.state_dir {
        config.defaults.state_dir = dir.clone();
    }

    match cli.command {
        Command::Analyze { seed, run } => cmd_analyze(config, &seed, &run).await,
        Command::Resume { run } => cmd_resume(config, &run).await,
        Command::Status { json } => cmd_status(&config, json).await,
        Command::Reset { yes } => cmd_reset(&config, yes).await,
        Command::Graph { out } => cmd_graph(&config, out).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config).await,
        },
    }
}

/// Trip `cancel` on Ctrl-C. In-flight papers finish their current call.
fn install_ctrl_c(cancel: CancelFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight papers");
            cancel.cancel();
        }
    });
}

async fn cmd_analyze(mut config: AppConfig, seed: &str, run: &RunArgs) -> Result<()> {
    run.apply(&mut config);
    let seed = PaperIdentity::parse(seed)?;
    let limits = RunLimits::from(&config);

    info!(
        %seed,
        max_depth = limits.max_depth,
        max_citations = limits.max_citations,
        "starting analysis"
    );

    let cancel = CancelFlag::new();
    install_ctrl_c(cancel.clone());
    let progress = Arc::new(CliProgress::new());
    let orchestrator = build_orchestrator(&config, cancel)
        .await?
        .with_progress(progress);

    let summary = orchestrator.analyze(seed.clone(), limits).await?;
    if summary.seed_already_visited && summary.papers_processed == 0 {
        println!("  {seed} was already analyzed. Use `lineage reset --yes` to start over.");
    }
    print_summary(&summary, &config, run.json)
}

async fn cmd_resume(mut config: AppConfig, run: &RunArgs) -> Result<()> {
    run.apply(&mut config);
    let limits = RunLimits::from(&config);

    let cancel = CancelFlag::new();
    install_ctrl_c(cancel.clone());
    let progress = Arc::new(CliProgress::new());
    let orchestrator = build_orchestrator(&config, cancel)
        .await?
        .with_progress(progress);

    let summary = orchestrator.resume(limits).await?;
    print_summary(&summary, &config, run.json)
}

fn print_summary(summary: &RunSummary, config: &AppConfig, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!();
    println!("  Run finished");
    println!("  Processed:          {}", summary.papers_processed);
    println!("  Completed:          {}", summary.completed);
    println!("  Render failed:      {}", summary.render_failed);
    println!("  Extraction failed:  {}", summary.extraction_failed);
    println!("  Fetch failed:       {}", summary.fetch_failed);
    if summary.cancelled > 0 {
        println!("  Cancelled:          {}", summary.cancelled);
    }
    println!("  Pending:            {}", summary.pending);
    for (depth, count) in &summary.per_depth_counts {
        println!("  Depth {depth}:            {count}");
    }
    println!("  Notes:              {}", config.defaults.output_dir);
    println!("  Time:               {:.1}s", summary.elapsed_ms as f64 / 1000.0);
    if summary.pending > 0 {
        println!();
        println!("  Run `lineage resume` to continue.");
    }
    println!();
    Ok(())
}

async fn cmd_status(config: &AppConfig, json: bool) -> Result<()> {
    let (snapshot, storage) = open_report(config).await?;
    let outcome_counts = match &storage {
        Some(storage) => storage.count_results_by_outcome().await?,
        None => Vec::new(),
    };

    if json {
        let visited: Vec<serde_json::Value> = snapshot
            .visited
            .iter()
            .map(|(identity, entry)| {
                serde_json::json!({
                    "identity": identity,
                    "depth": entry.depth,
                    "title": entry.title,
                    "outcome": entry.outcome,
                    "completed_at": entry.completed_at,
                })
            })
            .collect();
        let outcomes: BTreeMap<String, u64> = outcome_counts.into_iter().collect();
        let status = serde_json::json!({
            "per_depth_counts": snapshot.per_depth_counts(),
            "visited": visited,
            "pending": snapshot.pending,
            "outcomes": outcomes,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    println!("  State: {}", state_path(config).display());
    if snapshot.visited.is_empty() && snapshot.pending.is_empty() {
        println!("  Nothing analyzed yet.");
        println!();
        return Ok(());
    }

    for (depth, count) in snapshot.per_depth_counts() {
        println!("  Depth {depth}: {count} visited");
    }
    for (outcome, count) in &outcome_counts {
        println!("  {outcome}: {count}");
    }
    println!("  Pending: {}", snapshot.pending.len());
    println!();

    for (identity, entry) in &snapshot.visited {
        println!(
            "  [{}] {:<18} {}  {}",
            entry.depth,
            entry.outcome.as_str(),
            identity,
            entry.title.as_deref().unwrap_or("")
        );
    }
    println!();
    Ok(())
}

async fn cmd_reset(config: &AppConfig, yes: bool) -> Result<()> {
    if !yes {
        return Err(eyre!(
            "reset clears {} and the records in {}; rerun with --yes to confirm",
            state_path(config).display(),
            database_path(config).display()
        ));
    }
    let orchestrator = build_orchestrator(config, CancelFlag::new()).await?;
    orchestrator.reset().await?;
    println!("  State and stored records cleared.");
    Ok(())
}

async fn cmd_graph(config: &AppConfig, out: Option<PathBuf>) -> Result<()> {
    let (snapshot, storage) = open_report(config).await?;
    let storage = storage.ok_or_else(|| eyre!("no database yet; run `lineage analyze` first"))?;
    let graph = citation_graph(&storage, &snapshot).await?;
    let json = serde_json::to_string_pretty(&graph)?;

    match out {
        Some(path) => {
            std::fs::write(&path, json)?;
            println!(
                "  Wrote {} nodes and {} edges to {}",
                graph.metadata.node_count,
                graph.metadata.edge_count,
                path.display()
            );
        }
        None => println!("{json}"),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
    finished: AtomicUsize,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self {
            spinner,
            finished: AtomicUsize::new(0),
        }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn paper_started(&self, entry: &FrontierEntry) {
        let label = entry.title.as_deref().unwrap_or(entry.identity.as_str());
        self.spinner
            .set_message(format!("Depth {} · {label}", entry.depth));
    }

    fn paper_finished(&self, result: &PipelineResult) {
        let n = self.finished.fetch_add(1, Ordering::Relaxed) + 1;
        let status = match result.outcome() {
            Some(outcome) => outcome.as_str(),
            None => "cancelled",
        };
        self.spinner
            .println(format!("  [{n}] {status:<18} {}", result.identity()));
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}
