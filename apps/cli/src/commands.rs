//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use openness_artifacts::write_report;
use openness_core::{
    Adjudicator, AdjudicatorConfig, Evaluator, OpenAiEvaluator, Pipeline, ProgressReporter,
};
use openness_crawler::Crawler;
use openness_inputs::{load_catalog, load_roster};
use openness_shared::{
    AppConfig, Organization, OrganizationEvaluation, RunConfig, RunReport, RunSummary,
    init_config, load_config, load_config_from, validate_api_key,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// openness: score organization websites against a criteria catalog.
#[derive(Parser)]
#[command(
    name = "openness",
    version,
    about = "Crawl organization websites and evaluate them against a criteria catalog.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.openness/openness.toml.
    #[arg(long, global = true, env = "OPENNESS_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Crawl every organization in a roster and evaluate it.
    Run(RunArgs),

    /// Validate a criteria catalog and print its summary.
    Catalog {
        /// Path to the catalog YAML.
        path: PathBuf,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Arguments for `openness run`. Unset flags keep the config file value.
#[derive(Args, Debug)]
pub(crate) struct RunArgs {
    /// Criteria catalog (YAML).
    #[arg(long)]
    pub catalog: PathBuf,

    /// Organization roster (CSV: name, url).
    #[arg(long)]
    pub roster: PathBuf,

    /// Output directory for exports.
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Maximum link depth from each base URL.
    #[arg(long)]
    pub depth: Option<u32>,

    /// Maximum pages per organization.
    #[arg(long)]
    pub max_pages: Option<usize>,

    /// Organizations processed concurrently.
    #[arg(long)]
    pub parallelism: Option<usize>,

    /// Per-request timeout in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Fetch retries per page.
    #[arg(long)]
    pub retries: Option<u32>,

    /// Evaluator calls in flight at once.
    #[arg(long)]
    pub llm_concurrency: Option<usize>,

    /// Default confidence threshold (0..1).
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Roster and export delimiter.
    #[arg(long)]
    pub delimiter: Option<String>,

    /// Skip the evaluator and decide from pattern matches only.
    #[arg(long)]
    pub no_llm: bool,
}

impl RunArgs {
    /// Layer the flags that were given over the loaded config.
    fn apply(&self, config: &mut AppConfig) {
        if let Some(out) = &self.out {
            config.run.output_dir = out.to_string_lossy().into_owned();
        }
        if let Some(depth) = self.depth {
            config.crawl.max_depth = depth;
        }
        if let Some(max_pages) = self.max_pages {
            config.crawl.max_pages = max_pages;
        }
        if let Some(parallelism) = self.parallelism {
            config.run.parallelism = parallelism;
        }
        if let Some(timeout) = self.timeout_secs {
            config.crawl.timeout_secs = timeout;
        }
        if let Some(retries) = self.retries {
            config.crawl.max_retries = retries;
        }
        if let Some(concurrency) = self.llm_concurrency {
            config.llm.concurrency = concurrency;
        }
        if let Some(threshold) = self.threshold {
            config.evaluation.confidence_threshold = threshold;
        }
        if let Some(delimiter) = &self.delimiter {
            config.roster.delimiter = delimiter.clone();
        }
    }
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
        0 => "openness=info",
        1 => "openness=debug",
        _ => "openness=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

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
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run(args) => cmd_run(config_path, &args).await,
        Command::Catalog { path } => cmd_catalog(&path),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn load_app_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: Option<&Path>, args: &RunArgs) -> Result<()> {
    let mut app = load_app_config(config_path)?;
    args.apply(&mut app);
    let config = RunConfig::from(&app);
    config.validate()?;
    let delimiter = config.delimiter_byte()?;

    let loaded = load_catalog(&args.catalog)?;
    for issue in &loaded.issues {
        warn!(%issue, "catalog entry skipped");
    }
    let catalog = loaded.catalog;
    if catalog.criterion_count() == 0 {
        return Err(eyre!(
            "catalog '{}' contains no usable criteria",
            args.catalog.display()
        ));
    }

    let roster = load_roster(&args.roster, delimiter)?;
    for issue in &roster.issues {
        warn!(%issue, "roster row skipped");
    }
    if roster.organizations.is_empty() {
        return Err(eyre!("roster '{}' contains no organizations", args.roster.display()));
    }

    let evaluator = build_evaluator(&config, args.no_llm)?;
    let crawler = Crawler::new(config.crawl.clone())?;
    let adjudicator = Adjudicator::new(evaluator, AdjudicatorConfig::from(&config));
    let pipeline = Pipeline::new(crawler, adjudicator, config.parallelism);

    info!(
        catalog = %catalog.identifier(),
        organizations = roster.organizations.len(),
        out = %config.output_dir.display(),
        "starting evaluation"
    );

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, finishing with partial results");
                cancel.cancel();
            }
        }
    });

    let progress = CliProgress::new();
    let report = pipeline
        .run(Arc::new(catalog), roster.organizations, &progress, &cancel)
        .await?;

    let written = write_report(&config.output_dir, &report, delimiter)?;
    print_summary(&report, &written);
    Ok(())
}

fn build_evaluator(config: &RunConfig, no_llm: bool) -> Result<Option<Arc<dyn Evaluator>>> {
    if no_llm {
        warn!("evaluator disabled, deciding from pattern matches only");
        return Ok(None);
    }
    match validate_api_key(&config.llm) {
        Ok(key) => {
            let evaluator = OpenAiEvaluator::new(&config.llm, key)?;
            info!(
                model = %config.llm.model,
                endpoint = evaluator.endpoint(),
                "evaluator enabled"
            );
            let evaluator: Arc<dyn Evaluator> = Arc::new(evaluator);
            Ok(Some(evaluator))
        }
        Err(e) => {
            warn!(error = %e, "evaluator unavailable, deciding from pattern matches only");
            Ok(None)
        }
    }
}

fn print_summary(report: &RunReport, written: &[PathBuf]) {
    let summary = &report.summary;
    let bands = &summary.confidence_bands;

    println!();
    if summary.cancelled {
        println!("  Run cancelled, results are partial.");
    } else {
        println!("  Evaluation complete!");
    }
    println!("  Run:           {}", summary.run_id);
    println!("  Catalog:       {}", summary.catalog_identifier);
    println!(
        "  Organizations: {} ({} reachable)",
        summary.total_organizations, summary.successful_organizations
    );
    println!("  Results:       {}", summary.total_results);
    println!("  Fulfilled:     {:.1}%", summary.overall_fulfillment_rate);
    if let Some(top) = &summary.top_organization {
        println!("  Top:           {} ({:.1}%)", top.name, top.fulfillment_rate);
    }
    println!(
        "  Confidence:    {} high, {} medium, {} low ({} for review)",
        bands.high, bands.medium, bands.low, bands.manual_review
    );
    println!("  Mean conf.:    {:.2}", summary.mean_confidence);
    if let Some(strongest) = &summary.strongest_dimension {
        println!(
            "  Strongest:     {} ({:.1}%)",
            strongest.dimension_name, strongest.fulfillment_rate
        );
    }
    if let Some(weakest) = &summary.weakest_dimension {
        println!(
            "  Weakest:       {} ({:.1}%)",
            weakest.dimension_name, weakest.fulfillment_rate
        );
    }
    println!(
        "  Time:          {:.1}s",
        (summary.finished_at - summary.started_at).num_milliseconds() as f64 / 1000.0
    );
    println!();
    for path in written {
        println!("  wrote {}", path.display());
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} [{pos}/{len}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn run_started(&self, organizations: usize, criteria: usize) {
        self.spinner.set_length(organizations as u64);
        self.spinner
            .set_message(format!("Evaluating {criteria} criteria"));
    }

    fn organization_started(&self, organization: &Organization) {
        self.spinner
            .set_message(format!("Crawling {}", organization.name));
    }

    fn organization_finished(
        &self,
        evaluation: &OrganizationEvaluation,
        completed: usize,
        _total: usize,
    ) {
        self.spinner.set_position(completed as u64);
        let fulfilled = evaluation.results.iter().filter(|r| r.fulfilled).count();
        self.spinner.set_message(format!(
            "{}: {fulfilled}/{} fulfilled",
            evaluation.organization.name,
            evaluation.results.len()
        ));
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// catalog / config
// ---------------------------------------------------------------------------

fn cmd_catalog(path: &Path) -> Result<()> {
    let loaded = load_catalog(path)?;
    let info = loaded.catalog.info();

    println!();
    println!("  Catalog:      {} ({})", info.name, loaded.catalog.identifier());
    if !info.description.is_empty() {
        println!("  Description:  {}", info.description);
    }
    println!("  Organization: {}", info.organization_type);
    println!("  Dimensions:   {}", info.dimensions);
    println!("  Factors:      {}", info.factors);
    println!("  Criteria:     {}", info.total_criteria);
    println!("  Fingerprint:  {}", info.fingerprint);

    if loaded.issues.is_empty() {
        println!("  No validation issues.");
    } else {
        println!("  Issues:       {}", loaded.issues.len());
        for issue in &loaded.issues {
            println!("    - {issue}");
        }
    }
    println!();
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = load_app_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn run_flags_override_config() {
        let cli = parse(&[
            "openness", "run", "--catalog", "c.yaml", "--roster", "r.csv", "--depth", "0",
            "--max-pages", "4", "--threshold", "0.7", "--delimiter", ",", "--no-llm",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.no_llm);

        let mut app = AppConfig::default();
        let untouched = app.run.parallelism;
        args.apply(&mut app);
        let config = RunConfig::from(&app);

        assert_eq!(config.crawl.max_depth, 0);
        assert_eq!(config.crawl.max_pages, 4);
        assert_eq!(config.confidence_threshold, 0.7);
        assert_eq!(config.delimiter_byte().unwrap(), b',');
        assert_eq!(config.parallelism, untouched);
        config.validate().unwrap();
    }

    #[test]
    fn retries_flag_reaches_crawl_policy() {
        let cli = parse(&[
            "openness", "run", "--catalog", "c.yaml", "--roster", "r.csv", "--retries", "0",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let mut app = AppConfig::default();
        args.apply(&mut app);
        assert_eq!(RunConfig::from(&app).crawl.retry.max_retries, 0);
    }

    #[test]
    fn invalid_override_fails_validation() {
        let cli = parse(&[
            "openness", "run", "--catalog", "c.yaml", "--roster", "r.csv", "--parallelism", "0",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let mut app = AppConfig::default();
        args.apply(&mut app);
        assert!(RunConfig::from(&app).validate().is_err());
    }

    #[test]
    fn run_requires_catalog_and_roster() {
        assert!(Cli::try_parse_from(["openness", "run", "--roster", "r.csv"]).is_err());
    }

    #[test]
    fn no_llm_skips_the_evaluator() {
        let config = RunConfig::default();
        assert!(build_evaluator(&config, true).unwrap().is_none());
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = parse(&["openness", "catalog", "x.yaml", "-vv", "--log-format", "json"]);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.log_format, LogFormat::Json));
    }
}
