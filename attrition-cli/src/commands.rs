//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use crate::InstanceArgs;
use anyhow::{Context, bail};
use attrition_core::config::{GuardianConfig, load_config};
use attrition_core::narration::{EmployeeProfile, NarrationRequest};
use attrition_core::{
    Dataset, DriftMonitor, ExplanationService, RawInstance, RawValue, build_narrator,
    simulate_shift,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Options shared by every subcommand.
#[derive(Debug, Clone)]
pub struct GlobalOptions {
    pub workspace: PathBuf,
    pub bundle: Option<PathBuf>,
}

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, options: &GlobalOptions) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => handle_config(action, &options.workspace),
        Commands::Predict { instance, json } => handle_predict(&instance, json, options),
        Commands::Explain {
            instance,
            top_k,
            name,
            no_narrate,
            json,
        } => handle_explain(&instance, top_k, &name, !no_narrate, json, options).await,
        Commands::Chat { instance, question } => handle_chat(&instance, &question, options).await,
        Commands::Drift {
            reference,
            current,
            simulate,
            rows,
            seed,
            output,
            json,
        } => handle_drift(
            DriftArgs {
                reference,
                current,
                simulate,
                rows,
                seed,
                output,
                json,
            },
            options,
        ),
    }
}

fn load(options: &GlobalOptions) -> anyhow::Result<GuardianConfig> {
    let mut config = load_config(Some(&options.workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    if let Some(bundle) = &options.bundle {
        config.model.bundle_path = bundle.clone();
    }
    config.model.bundle_path = resolve(&options.workspace, &config.model.bundle_path);
    config.drift.reference_dataset = resolve(&options.workspace, &config.drift.reference_dataset);
    config.explain.background_dataset = config
        .explain
        .background_dataset
        .as_deref()
        .map(|p| resolve(&options.workspace, p));
    Ok(config)
}

/// Relative paths resolve against the workspace.
fn resolve(workspace: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace.join(path)
    }
}

/// Parse one `KEY=VALUE` assignment.
fn parse_assignment(raw: &str) -> anyhow::Result<(String, RawValue)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("Invalid assignment '{}': expected KEY=VALUE", raw);
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("Invalid assignment '{}': empty attribute name", raw);
    }
    Ok((key.to_string(), RawValue::parse(value)))
}

fn build_instance(args: &InstanceArgs) -> anyhow::Result<RawInstance> {
    let mut instance = match &args.input {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str::<RawInstance>(&content)
                .with_context(|| format!("{} is not a JSON object of attributes", path.display()))?
        }
        None => RawInstance::new(),
    };
    for raw in &args.set {
        let (key, value) = parse_assignment(raw)?;
        instance.set(key, value);
    }
    debug!(attributes = instance.len(), "Instance assembled");
    Ok(instance)
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init { force } => {
            let config_path = attrition_core::config::workspace_config_path(workspace);
            if config_path.exists() && !force {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            let path = attrition_core::config::init_workspace_config(workspace, force)?;
            println!("Created default configuration at: {}", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config(Some(workspace), None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}

fn handle_predict(args: &InstanceArgs, json: bool, options: &GlobalOptions) -> anyhow::Result<()> {
    let config = load(options)?;
    let service = ExplanationService::from_config(&config)?;
    let instance = build_instance(args)?;
    let risk = service.predict(&instance)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&risk)?);
    } else {
        println!("{}", risk);
        println!(
            "Predicted attrition: {} (threshold {})",
            if risk.label { "Yes" } else { "No" },
            service.threshold()
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct ExplainOutput<'a> {
    #[serde(flatten)]
    assessment: &'a attrition_core::Assessment,
    statements: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    narration: Option<String>,
}

async fn handle_explain(
    args: &InstanceArgs,
    top_k: Option<usize>,
    name: &str,
    narrate: bool,
    json: bool,
    options: &GlobalOptions,
) -> anyhow::Result<()> {
    let config = load(options)?;
    let service = ExplanationService::from_config(&config)?;
    let instance = build_instance(args)?;
    let assessment = service.assess_top(&instance, top_k.unwrap_or(service.top_k()))?;
    let statements = assessment.explanation.statements();

    let narration = if narrate {
        let narrator = build_narrator(&config.narration);
        let request = NarrationRequest {
            employee: name.to_string(),
            risk_percent: assessment.risk.percent(),
            factors: statements.clone(),
        };
        Some(narrator.narrate(&request).await)
    } else {
        None
    };

    if json {
        let output = ExplainOutput {
            assessment: &assessment,
            statements,
            narration,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{}", assessment.risk);
    if let Some(text) = &narration {
        println!();
        println!("{}", text);
    }
    println!();
    println!("Key drivers:");
    for statement in &statements {
        println!("  \u{2022} {}", statement);
    }
    if assessment.explanation.dropped > 0 {
        println!(
            "  ({} features could not be attributed)",
            assessment.explanation.dropped
        );
    }
    Ok(())
}

async fn handle_chat(
    args: &InstanceArgs,
    question: &str,
    options: &GlobalOptions,
) -> anyhow::Result<()> {
    let config = load(options)?;
    let instance = build_instance(args)?;

    let mut profile = EmployeeProfile::from(&instance);
    // Risk is added when a model is available; chat still works without one.
    match ExplanationService::from_config(&config) {
        Ok(service) => {
            let risk = service.predict(&instance)?;
            profile.push("Attrition Risk", format!("{:.1}%", risk.percent()));
        }
        Err(e) => debug!(error = %e, "Chat without model context"),
    }

    let narrator = build_narrator(&config.narration);
    let answer = narrator.chat(question, &profile).await?;
    println!("{}", answer);
    Ok(())
}

struct DriftArgs {
    reference: Option<PathBuf>,
    current: Option<PathBuf>,
    simulate: bool,
    rows: Option<usize>,
    seed: u64,
    output: Option<PathBuf>,
    json: bool,
}

fn handle_drift(args: DriftArgs, options: &GlobalOptions) -> anyhow::Result<()> {
    let config = load(options)?;
    let reference_path = args
        .reference
        .map(|p| resolve(&options.workspace, &p))
        .unwrap_or_else(|| config.drift.reference_dataset.clone());
    let reference = Dataset::load(&reference_path)?;

    let current = match (args.current, args.simulate) {
        (Some(path), _) => Dataset::load(&resolve(&options.workspace, &path))?,
        (None, true) => simulate_shift(
            &reference,
            args.rows.unwrap_or(config.drift.simulate_rows),
            args.seed,
        )?,
        (None, false) => bail!("Provide --current <CSV> or --simulate"),
    };

    let monitor = DriftMonitor::new(reference, config.drift.clone())?;
    let report = monitor.run(&current)?;

    if let Some(path) = &args.output {
        let path = resolve(&options.workspace, path);
        report.save_json(&path)?;
        eprintln!("Report written to {}", path.display());
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}
