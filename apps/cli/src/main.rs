//! `bundlecheck` - validate a bundle against a rule set from the command line
//!
//! Usage:
//!   bundlecheck validate --bundle bundle.json --rules rules.json [--code-systems dir] [--config engine.yaml]
//!   bundlecheck plan --bundle bundle.json --rules rules.json
//!   bundlecheck review --rules rules.json

mod logging;

use anyhow::{Context, Result};
use bundlecheck_engine::{
    gate_rule_set, BaselineReview, CancelToken, EngineConfig, GateResult, InMemoryTerminology,
    LaneDecision, RuleEngine, ValidationReport,
};
use bundlecheck_model::{ParsedBundle, RuleSet};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "bundlecheck", version)]
#[command(about = "Rule-based validation for healthcare bundles")]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the rule set over a bundle and report violations
    Validate(ValidateArgs),
    /// Show which evaluation lane each rule takes for each record
    Plan(InputArgs),
    /// Review rule metadata without evaluating anything
    Review {
        #[arg(short, long)]
        rules: PathBuf,

        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Bundle JSON file
    #[arg(short, long)]
    bundle: PathBuf,

    /// Rule set JSON file
    #[arg(short, long)]
    rules: PathBuf,

    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,
}

#[derive(Args, Debug)]
struct ValidateArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Directory of CodeSystem JSON files
    #[arg(long)]
    code_systems: Option<PathBuf>,

    /// Engine configuration (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Skip the reference integrity pass
    #[arg(long)]
    no_references: bool,

    /// Override max_concurrent_rules from the configuration
    #[arg(long)]
    concurrency: Option<usize>,

    /// Stop evaluating new rules after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = logging::init_logging(&cli.log_level, cli.log_json) {
        eprintln!("failed to initialize logging: {err:#}");
        return ExitCode::from(2);
    }

    match run(cli.command).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "bundlecheck failed");
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}

/// Returns whether the run came out clean.
async fn run(command: Command) -> Result<bool> {
    match command {
        Command::Validate(args) => validate(args).await,
        Command::Plan(args) => plan(args),
        Command::Review { rules, format } => {
            let rules = load_rules(&rules)?;
            let gate = gate_rule_set(&BaselineReview, &rules);
            print_review(&gate, format)?;
            let clean = gate.blocked().next().is_none();
            Ok(clean)
        }
    }
}

async fn validate(args: ValidateArgs) -> Result<bool> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("Failed to load engine config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if args.no_references {
        config.references.enabled = false;
    }
    if let Some(concurrency) = args.concurrency {
        config.max_concurrent_rules = concurrency;
    }

    let mut terminology = InMemoryTerminology::new();
    if let Some(dir) = &args.code_systems {
        let loaded = terminology
            .load_dir(dir)
            .with_context(|| format!("Failed to load code systems from {}", dir.display()))?;
        tracing::info!(code_systems = loaded, dir = %dir.display(), "loaded code systems");
    }

    let engine = RuleEngine::new(config)
        .context("Invalid engine configuration")?
        .with_terminology(Arc::new(terminology));

    let bundle = load_bundle(&args.input.bundle)?;
    let rules = load_rules(&args.input.rules)?;

    let gate = gate_rule_set(&BaselineReview, &rules);
    for outcome in gate.blocked() {
        tracing::warn!(rule = %outcome.rule_id, "rule blocked by review, not evaluated");
    }

    let cancel = match args.timeout_ms {
        Some(ms) => CancelToken::with_timeout(Duration::from_millis(ms)),
        None => CancelToken::new(),
    };
    let report = engine
        .validate_with_cancel(&bundle, &gate.admitted, &cancel)
        .await;

    print_report(&report, &gate, args.input.format)?;
    Ok(!report.has_errors() && gate.blocked().next().is_none())
}

fn plan(args: InputArgs) -> Result<bool> {
    let engine = RuleEngine::new(EngineConfig::default()).context("Invalid engine configuration")?;
    let bundle = load_bundle(&args.bundle)?;
    let rules = load_rules(&args.rules)?;
    let decisions = engine.plan(&bundle, &rules);
    print_plan(&decisions, args.format)?;
    Ok(true)
}

fn load_bundle(path: &Path) -> Result<ParsedBundle> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read bundle {}", path.display()))?;
    ParsedBundle::from_json_str(&json)
        .with_context(|| format!("Failed to parse bundle {}", path.display()))
}

fn load_rules(path: &Path) -> Result<RuleSet> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read rule set {}", path.display()))?;
    RuleSet::from_json_str(&json)
        .with_context(|| format!("Failed to parse rule set {}", path.display()))
}

fn print_report(report: &ValidationReport, gate: &GateResult, format: Format) -> Result<()> {
    match format {
        Format::Json => {
            let blocked: Vec<_> = gate.blocked().collect();
            let output = json!({
                "errors": report.errors,
                "rulesEvaluated": report.rules_evaluated,
                "cancelled": report.cancelled,
                "blockedRules": blocked,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Format::Text => {
            for outcome in gate.blocked() {
                println!("[blocked] rule {} was not evaluated", outcome.rule_id);
                for issue in &outcome.issues {
                    println!("    {} {}", issue.code, issue.message);
                }
            }
            for error in &report.errors {
                println!("{} (rule {})", error, error.rule_id);
            }
            println!(
                "{} rules evaluated, {} errors, {} warnings{}",
                report.rules_evaluated,
                report.error_count(),
                report.warning_count(),
                if report.cancelled { ", cancelled" } else { "" }
            );
        }
    }
    Ok(())
}

fn print_plan(decisions: &[LaneDecision], format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(decisions)?),
        Format::Text => {
            for decision in decisions {
                let reasons: Vec<String> = decision.reasons.iter().map(ToString::to_string).collect();
                if reasons.is_empty() {
                    println!("{} entry {}: {}", decision.rule_id, decision.entry_index, decision.lane);
                } else {
                    println!(
                        "{} entry {}: {} ({})",
                        decision.rule_id,
                        decision.entry_index,
                        decision.lane,
                        reasons.join(", ")
                    );
                }
            }
        }
    }
    Ok(())
}

fn print_review(gate: &GateResult, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&gate.outcomes)?),
        Format::Text => {
            for outcome in &gate.outcomes {
                println!("{} {}", outcome.status, outcome.rule_id);
                for issue in &outcome.issues {
                    println!("    [{}] {} {}", issue.status, issue.code, issue.message);
                }
            }
        }
    }
    Ok(())
}
