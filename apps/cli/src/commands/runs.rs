//! Lists finished fine-tuning runs.

use crate::config::CliConfig;
use anyhow::{Context, Result};
use colored::Colorize;
use finetune_training::discover_runs;
use finetune_training::job::DEFAULT_OUTPUT;
use serde_json::json;
use std::path::PathBuf;

pub fn execute(output: Option<PathBuf>, config: &CliConfig, json_output: bool) -> Result<()> {
    let root = output.or_else(|| config.output.clone()).unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));
    let runs = discover_runs(&root).with_context(|| format!("Failed to scan runs in {}", root.display()))?;

    if json_output {
        let out: Vec<_> = runs
            .iter()
            .map(|r| {
                json!({
                    "name": r.name(),
                    "run_dir": r.run_dir,
                    "run_id": r.manifest.run_id.0,
                    "created_at": r.manifest.created_at,
                    "base_model": r.manifest.base_model,
                    "device": r.manifest.device,
                    "dataset_id": r.manifest.dataset_id.0,
                    "train_loss": r.manifest.metrics.train_loss,
                    "eval_loss": r.manifest.metrics.eval_loss,
                    "steps": r.manifest.metrics.steps,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("{}", format!("Fine-tuning runs ({})", runs.len()).bold().cyan());
    println!();

    if runs.is_empty() {
        println!("  {}", format!("No runs found under {}.", root.display()).dimmed());
        println!();
        return Ok(());
    }

    println!("{:<26} {:<28} {:<6} {:>10}", "Run", "Base model", "Steps", "Train loss");
    println!("{}", "─".repeat(74));
    for run in runs {
        let metrics = &run.manifest.metrics;
        println!(
            "{:<26} {:<28} {:<6} {:>10}",
            run.name().cyan(),
            run.manifest.base_model,
            metrics.steps.map_or_else(|| "-".to_string(), |s| s.to_string()),
            metrics.train_loss.map_or_else(|| "-".to_string(), |l| format!("{l:.4}")).dimmed()
        );
    }
    println!();
    Ok(())
}
