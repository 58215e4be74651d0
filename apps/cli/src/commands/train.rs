//! Training command implementation.

use crate::TrainArgs;
use crate::config::CliConfig;
use crate::progress::CliProgressSink;
use anyhow::{Context, Result};
use colored::Colorize;
use finetune_core::{NativeBackend, RunReport};
use finetune_training::RunConfig;
use finetune_training::job::{DEFAULT_MODEL, DEFAULT_OUTPUT};
use std::path::PathBuf;

/// Flags override config values, which override built-in defaults.
pub fn build_run_config(args: TrainArgs, config: &CliConfig) -> Result<RunConfig> {
    let data = args.data.context("--data is required")?;
    Ok(RunConfig {
        data,
        output: args.output.or_else(|| config.output.clone()).unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT)),
        model: args.model.or_else(|| config.model.clone()).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        epochs: args.epochs,
        batch_size: args.batch_size,
        learning_rate: args.learning_rate,
        max_length: args.max_length,
        lora_r: args.lora_r,
        export_gguf: args.export_gguf,
        gguf_output: args.gguf_output,
        lr_scheduler: args.lr_scheduler,
        early_stopping_patience: args.early_stopping_patience,
    })
}

pub async fn execute(args: TrainArgs, cli_config: &CliConfig, model_root: PathBuf) -> Result<()> {
    let config = build_run_config(args, cli_config)?;

    println!();
    println!("{}", "LoRA fine-tuning".bold().cyan());
    println!("  Data:  {}", config.data.display().to_string().dimmed());
    println!("  Model: {}", config.model.cyan());
    println!();

    let mut backend = NativeBackend::new(model_root);
    let sink = CliProgressSink::default();
    let report = finetune_core::run(&config, &mut backend, &sink).await?;

    print_summary(&report);
    Ok(())
}

fn print_summary(report: &RunReport) {
    println!();
    println!("{}", "Training complete".bold().green());
    println!("  Run:        {}", report.run_dir.display().to_string().cyan());
    println!("  Steps:      {}", report.outcome.steps);
    println!("  Train loss: {:.4}", report.outcome.train_loss);
    if let Some(loss) = report.eval_loss {
        println!("  Eval loss:  {loss:.4}");
    }
    if report.outcome.stopped_early {
        println!("  {}", "Stopped early: eval loss stopped improving".yellow());
    }
    println!("  Merged:     {}", report.merged.weights_path.display().to_string().dimmed());

    if let Some(plan) = &report.export {
        println!();
        println!("{}", "GGUF export".bold().cyan());
        println!("  Run this to convert the merged model:");
        println!("    {}", plan.convert_command());
        println!("  Ollama Modelfile written next to the run (FROM {})", plan.gguf_path.display());
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use finetune_training::SchedulerKind;

    fn args(data: Option<PathBuf>) -> TrainArgs {
        TrainArgs {
            data,
            output: None,
            model: None,
            epochs: 3,
            batch_size: 1,
            learning_rate: 2e-4,
            max_length: 512,
            lora_r: 8,
            export_gguf: false,
            gguf_output: None,
            lr_scheduler: SchedulerKind::Cosine,
            early_stopping_patience: 3,
        }
    }

    #[test]
    fn test_config_values_fill_unset_flags() {
        let cli = CliConfig { model: Some("tiny".to_string()), ..CliConfig::default() };
        let config = build_run_config(args(Some(PathBuf::from("d.jsonl"))), &cli).unwrap();
        assert_eq!(config.model, "tiny");
        assert_eq!(config.output, PathBuf::from(DEFAULT_OUTPUT));
    }

    #[test]
    fn test_flags_override_config() {
        let cli = CliConfig { model: Some("tiny".to_string()), ..CliConfig::default() };
        let mut a = args(Some(PathBuf::from("d.jsonl")));
        a.model = Some("other".to_string());
        assert_eq!(build_run_config(a, &cli).unwrap().model, "other");
    }

    #[test]
    fn test_missing_data_is_error() {
        assert!(build_run_config(args(None), &CliConfig::default()).is_err());
    }
}
