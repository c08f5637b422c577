use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use mendloop::config::{ProviderKind, RunConfig};
use mendloop::executor::{process::program_available_on_path, PythonSandbox};
use mendloop::llm::LlmBackend;
use mendloop::persistence::{self, RunReport};
use mendloop::{benchmark, logger, run_pipeline};

#[derive(Parser)]
#[command(
    name = "mendloop",
    version,
    about = "Repairs failing generated programs with batched model inference and sandboxed execution."
)]
struct Cli {
    /// More log output (-v debug, -vv trace). MENDLOOP_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[arg(long, global = true, help = "Emit logs as JSON (or set MENDLOOP_LOG_JSON)")]
    json_logs: bool,

    #[arg(long, global = true, help = "Config file (default: <config dir>/mendloop/config.toml)")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Repair every failing candidate in an evaluation file
    Repair(RepairArgs),
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Args, Debug, Clone)]
struct RepairArgs {
    #[arg(long, help = "Evaluation JSON with code_list / graded_list / metadata per problem")]
    input: PathBuf,

    #[arg(long, help = "Report path (default: <data dir>/mendloop/runs/...)")]
    out: Option<PathBuf>,

    #[arg(long, help = "Concurrent sandbox executions")]
    pool_size: Option<usize>,

    #[arg(long, help = "Per-test-case timeout in seconds")]
    timeout: Option<u64>,

    #[arg(long, help = "Repair attempts per candidate")]
    repair_attempts: Option<usize>,

    #[arg(long, help = "Model name passed to the provider")]
    model: Option<String>,

    #[arg(long, help = "openai | anthropic | local")]
    provider: Option<String>,
}

fn env_truthy(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => {
            let v = val.to_ascii_lowercase();
            matches!(v.as_str(), "1" | "true" | "yes" | "on")
        }
        Err(_) => default,
    }
}

fn parse_provider(name: &str) -> Result<ProviderKind> {
    match name.to_ascii_lowercase().as_str() {
        "openai" => Ok(ProviderKind::OpenAI),
        "anthropic" => Ok(ProviderKind::Anthropic),
        "local" => Ok(ProviderKind::Local),
        other => bail!("unknown provider '{other}' (expected openai, anthropic or local)"),
    }
}

fn apply_overrides(cfg: &mut RunConfig, args: &RepairArgs) -> Result<()> {
    if let Some(n) = args.pool_size {
        cfg.pool_size = n;
    }
    if let Some(t) = args.timeout {
        cfg.exec_timeout_secs = t;
    }
    if let Some(n) = args.repair_attempts {
        cfg.repair_attempts = n;
    }
    if let Some(m) = &args.model {
        cfg.llm.model = m.clone();
    }
    if let Some(p) = &args.provider {
        cfg.llm.provider = parse_provider(p)?;
    }
    cfg.validate().context("invalid configuration after CLI overrides")?;
    Ok(())
}

fn repair(mut cfg: RunConfig, args: RepairArgs) -> Result<()> {
    apply_overrides(&mut cfg, &args)?;

    if !program_available_on_path(&cfg.python) {
        bail!("python interpreter '{}' not found on PATH", cfg.python);
    }

    let started_at = Utc::now();
    let entries = benchmark::load(&args.input)
        .with_context(|| format!("loading {}", args.input.display()))?;

    let backend = LlmBackend::from_config(&cfg.llm).context("configuring inference backend")?;
    info!(backend = %backend.describe(), problems = entries.len(), "starting repair run");

    let sandbox = PythonSandbox::new(cfg.python.clone());
    let model = cfg.llm.model.clone();
    let cfg = Arc::new(cfg);

    let result = run_pipeline(&entries, cfg, Arc::new(backend), Arc::new(sandbox))
        .context("repair run aborted")?;

    let report = RunReport::new(&args.input, model, started_at, &result);
    let path = persistence::save(&report, args.out.as_deref())
        .map_err(anyhow::Error::msg)
        .context("saving run report")?;

    let repaired = result
        .problems
        .iter()
        .flat_map(|p| p.candidates.iter())
        .filter(|c| c.repaired && c.passed)
        .count();

    println!(
        "run {}: {} failing candidates, {} repaired against their tests, {} already passing",
        report.run_id, result.stats.failing, repaired, result.stats.already_passing
    );
    println!("report written to {}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init(cli.verbose, cli.json_logs || env_truthy("MENDLOOP_LOG_JSON", false));

    let cfg = RunConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        CliCommand::Repair(args) => repair(cfg, args),
        CliCommand::Config => {
            print!("{}", cfg.to_toml());
            Ok(())
        }
    }
}
