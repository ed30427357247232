use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use driftloop_kernel::config::ControlConfig;
use driftloop_kernel::cycle::{CycleResult, CycleState};
use driftloop_kernel::dataset::Dataset;
use driftloop_kernel::resolve::{
    Decision, Detection, Outcome, ResolutionController, ResolutionError, ResolutionRun, Termination,
    TimelineEntry,
};
use driftloop_kernel::severity::{SeverityClassifier, SeverityTier};
use driftloop_kernel::simulate::{ChurnScenario, DatasetFactory};
use driftloop_kernel::store::{ArtifactStore, FsStore};

const DEFAULT_DEMO_SEED: u64 = 7;

/// Driftloop CLI
#[derive(Parser, Debug)]
#[command(name = "driftloop")]
#[command(about = "Drift detection and approval-gated retraining", long_about = None)]
struct Cli {
    /// Artifact store directory
    #[arg(long, global = true, default_value = "./driftloop-store")]
    store: PathBuf,

    /// Path to control config JSON
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Seed for blending (and for the demo scenario)
    #[arg(long, global = true)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Install reference and current datasets and train the initial model
    Init {
        /// Reference dataset JSON (`{"columns": [...], "rows": [[...]]}`)
        #[arg(long)]
        reference: PathBuf,

        /// Current dataset JSON
        #[arg(long)]
        current: PathBuf,
    },

    /// Refresh the drift analysis
    Detect,

    /// Retrain once if drift exceeds the single-approval threshold
    Approve,

    /// Leave the store unchanged
    Reject,

    /// Retrain repeatedly until drift falls below the target
    Auto,

    /// Apply a decision given as text (approve/y, reject/n, auto)
    Decide {
        #[arg(long)]
        decision: Decision,
    },

    /// Summarize the active model and the latest report
    Status,

    /// Reset the store with a synthetic high-drift churn scenario
    Demo {
        /// Rows in each of the reference and current datasets
        #[arg(long, default_value_t = 400)]
        rows: usize,

        /// How many feature columns drift (0-5)
        #[arg(long, default_value_t = 5)]
        shifted: usize,
    },
}

/// Wrapper for a single-cycle result
#[derive(Debug, Serialize)]
struct CycleOutput {
    state: CycleState,
    triggered: bool,
    ratio_before: f64,
    severity_before: SeverityTier,
    ratio_after: Option<f64>,
    severity_after: Option<SeverityTier>,
    rows_replaced: Option<usize>,
    blend_fraction: Option<f64>,
    model_id: Option<String>,
}

impl From<&CycleResult> for CycleOutput {
    fn from(result: &CycleResult) -> Self {
        Self {
            state: result.state,
            triggered: result.triggered,
            ratio_before: result.report_before.ratio,
            severity_before: result.severity_before,
            ratio_after: result.report_after.as_ref().map(|r| r.ratio),
            severity_after: result.severity_after,
            rows_replaced: result.rows_replaced,
            blend_fraction: result.blend_fraction,
            model_id: result.new_model.as_ref().map(|m| m.id.to_string()),
        }
    }
}

/// Wrapper for an auto-resolve run
#[derive(Debug, Serialize)]
struct RunOutput {
    run_id: String,
    termination: Option<Termination>,
    converged: bool,
    iterations: usize,
    final_ratio: Option<f64>,
    timeline: Vec<TimelineEntry>,
}

impl From<&ResolutionRun> for RunOutput {
    fn from(run: &ResolutionRun) -> Self {
        Self {
            run_id: run.run_id().to_string(),
            termination: run.termination(),
            converged: run.converged(),
            iterations: run.len(),
            final_ratio: run.final_ratio(),
            timeline: run.timeline(),
        }
    }
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let output = execute(&cli)?;

    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<ControlConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let data = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            ControlConfig::from_json(&data)
                .with_context(|| format!("loading config {}", path.display()))?
        }
        None => ControlConfig::default_config(),
    };

    if cli.seed.is_some() {
        config.seed = cli.seed;
    }
    config.validate()?;
    Ok(config)
}

fn read_dataset(path: &Path) -> Result<Dataset> {
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing dataset {}", path.display()))
}

fn execute(cli: &Cli) -> Result<serde_json::Value> {
    let config = load_config(cli)?;
    let store = FsStore::open(&cli.store)
        .with_context(|| format!("opening store {}", cli.store.display()))?;

    let mut controller = ResolutionController::new(store, config)?;

    match &cli.command {
        Command::Status => status(controller.store(), controller.config()),
        Command::Init { reference, current } => {
            let detection = controller.bootstrap(read_dataset(reference)?, read_dataset(current)?)?;
            detection_output(&detection)
        }
        Command::Demo { rows, shifted } => {
            let scenario = ChurnScenario {
                reference_rows: *rows,
                current_rows: *rows,
                shifted_columns: *shifted,
                ..ChurnScenario::default()
            };
            let pair = scenario.generate(cli.seed.unwrap_or(DEFAULT_DEMO_SEED))?;
            let detection = controller.bootstrap(pair.reference, pair.current)?;
            detection_output(&detection)
        }
        Command::Detect => detection_output(&controller.detect()?),
        Command::Approve => decide(&mut controller, Decision::ApproveOnce),
        Command::Reject => decide(&mut controller, Decision::Reject),
        Command::Auto => decide(&mut controller, Decision::AutoResolve),
        Command::Decide { decision } => decide(&mut controller, *decision),
    }
}

fn detection_output(detection: &Detection) -> Result<serde_json::Value> {
    let drifted: Vec<&str> = detection.report.drifted().collect();
    Ok(json!({
        "report_id": detection.report.report_id,
        "ratio": detection.report.ratio,
        "drifted_columns": drifted,
        "total_columns": detection.report.total_columns,
        "dataset_drift": detection.report.dataset_drift,
        "severity": detection.severity,
        "action": detection.action,
        "description": detection.description,
        "columns": detection.report.columns,
    }))
}

fn decide<S: ArtifactStore>(
    controller: &mut ResolutionController<S>,
    decision: Decision,
) -> Result<serde_json::Value> {
    match controller.decide(decision) {
        Ok(Outcome::Rejected) => Ok(json!({ "decision": decision, "changed": false })),
        Ok(Outcome::Single(result)) => Ok(json!({
            "decision": decision,
            "changed": result.triggered,
            "cycle": CycleOutput::from(&result),
        })),
        Ok(Outcome::Resolved(run)) => Ok(json!({
            "decision": decision,
            "changed": !run.is_empty(),
            "run": RunOutput::from(&run),
        })),
        Err(ResolutionError::Cycle(err)) => Err(anyhow!("retraining failed, no changes made: {err}")),
        Err(ResolutionError::Resolution(failure)) => {
            let timeline = failure.run.timeline();
            let progress = match (timeline.first(), timeline.last()) {
                (Some(first), Some(last)) => format!(
                    "{} iteration(s) persisted, drift {:.3} -> {:.3}",
                    timeline.len(),
                    first.ratio_before,
                    last.ratio_after
                ),
                _ => "no iterations persisted".to_string(),
            };
            Err(anyhow!("auto-resolve stopped ({progress}): {}", failure.source))
        }
        Err(err) => Err(err.into()),
    }
}

fn status(store: &FsStore, config: &ControlConfig) -> Result<serde_json::Value> {
    let manifest = store.manifest()?;
    let model = store.active_model()?;
    let report = store.latest_report()?;
    let severity = SeverityClassifier::from_thresholds(&config.severity)?;

    Ok(json!({
        "store": store.root(),
        "generation": manifest.generation,
        "updated_at": manifest.updated_at,
        "retired_models": manifest.retired_models.len(),
        "model": model.map(|m| json!({
            "id": m.id,
            "created_at": m.created_at,
            "training_rows": m.training_rows,
            "holdout_accuracy": m.holdout_accuracy,
        })),
        "latest_report": report.map(|r| json!({
            "report_id": r.report_id,
            "generated_at": r.generated_at,
            "ratio": r.ratio,
            "severity": severity.classify(r.ratio),
        })),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cli(dir: &TempDir, args: &[&str]) -> Cli {
        let store = dir.path().to_str().unwrap();
        let mut argv = vec!["driftloop", "--store", store, "--seed", "11"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from(["driftloop", "approve", "--store", "/tmp/s", "--seed", "3"]).unwrap();

        assert!(matches!(cli.command, Command::Approve));
        assert_eq!(cli.store, PathBuf::from("/tmp/s"));
        assert_eq!(cli.seed, Some(3));
    }

    #[test]
    fn store_defaults_to_working_directory() {
        let cli = Cli::try_parse_from(["driftloop", "status"]).unwrap();
        assert_eq!(cli.store, PathBuf::from("./driftloop-store"));
        assert!(cli.config.is_none());
    }

    #[test]
    fn decide_parses_operator_text() {
        let cli = Cli::try_parse_from(["driftloop", "decide", "--decision", "y"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Decide {
                decision: Decision::ApproveOnce
            }
        ));

        assert!(Cli::try_parse_from(["driftloop", "decide", "--decision", "later"]).is_err());
        assert!(Cli::try_parse_from(["driftloop", "decide"]).is_err());
    }

    #[test]
    fn demo_then_reject_changes_nothing() {
        let dir = TempDir::new().unwrap();

        let detected = execute(&cli(&dir, &["demo", "--rows", "120"])).unwrap();
        assert_eq!(detected["severity"], "HIGH");

        let before = execute(&cli(&dir, &["status"])).unwrap();
        let rejected = execute(&cli(&dir, &["reject"])).unwrap();
        let after = execute(&cli(&dir, &["status"])).unwrap();

        assert_eq!(rejected["changed"], false);
        assert_eq!(before["generation"], after["generation"]);
        assert_eq!(before["model"], after["model"]);
    }

    #[test]
    fn demo_then_approve_replaces_the_model() {
        let dir = TempDir::new().unwrap();
        execute(&cli(&dir, &["demo", "--rows", "120"])).unwrap();
        let before = execute(&cli(&dir, &["status"])).unwrap();

        let approved = execute(&cli(&dir, &["approve"])).unwrap();
        let after = execute(&cli(&dir, &["status"])).unwrap();

        assert_eq!(approved["changed"], true);
        assert_eq!(approved["cycle"]["state"], "PERSISTED");
        assert_ne!(before["model"]["id"], after["model"]["id"]);
        assert_eq!(after["retired_models"], 1);
    }

    #[test]
    fn init_requires_both_datasets() {
        assert!(Cli::try_parse_from(["driftloop", "init", "--reference", "r.json"]).is_err());
    }

    #[test]
    fn detect_on_empty_store_fails() {
        let dir = TempDir::new().unwrap();
        assert!(execute(&cli(&dir, &["detect"])).is_err());
    }
}
