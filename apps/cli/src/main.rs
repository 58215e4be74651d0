//! Finetune CLI - LoRA supervised fine-tuning from the command line
//!
//! The `finetune` command trains a LoRA adapter on prompt/completion JSONL
//! data, merges it into the base model and writes run metadata. The `base`
//! and `runs` subcommands bootstrap native base models and list past runs.

mod commands;
mod config;
mod progress;

use clap::{Args as ClapArgs, Parser, Subcommand};
use colored::Colorize;
use finetune_training::SchedulerKind;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{base, runs, train};
use config::CliConfig;

/// Finetune - LoRA supervised fine-tuning
#[derive(Parser, Debug)]
#[command(
    name = "finetune",
    author,
    version,
    about = "LoRA supervised fine-tuning of chat models",
    args_conflicts_with_subcommands = true,
    subcommand_negates_reqs = true
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, value_parser = clap::value_parser!(Level))]
    log_level: Option<Level>,

    /// Extra TOML config file, applied after ~/.finetune/config.toml and ./.finetunerc
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding native base models (overrides FINETUNE_MODEL_ROOT)
    #[arg(long, global = true)]
    model_root: Option<PathBuf>,

    #[command(flatten)]
    train: TrainArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

/// Training flags used when no subcommand is given.
#[derive(ClapArgs, Debug, Clone)]
pub struct TrainArgs {
    /// JSONL file with one {"prompt", "completion"} object per line
    #[arg(long, required = true)]
    pub data: Option<PathBuf>,

    /// Output root; each run writes to <output>/finetune_<timestamp>
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Base model id or directory
    #[arg(long)]
    pub model: Option<String>,

    #[arg(long, default_value_t = 3)]
    pub epochs: u32,

    /// Per-device batch size
    #[arg(long, default_value_t = 1)]
    pub batch_size: u32,

    #[arg(long, default_value_t = 2e-4)]
    pub learning_rate: f64,

    /// Maximum tokens per sample; longer samples are truncated
    #[arg(long, default_value_t = 512)]
    pub max_length: u32,

    /// LoRA rank
    #[arg(long, default_value_t = 8)]
    pub lora_r: u32,

    /// Print the GGUF conversion command and write an Ollama Modelfile
    #[arg(long)]
    pub export_gguf: bool,

    /// GGUF output path (defaults to <run dir>/model.gguf)
    #[arg(long)]
    pub gguf_output: Option<PathBuf>,

    /// Learning-rate schedule (linear, cosine, constant, constant_with_warmup)
    #[arg(long, default_value = "cosine")]
    pub lr_scheduler: SchedulerKind,

    /// Evaluations without improvement before stopping (needs an eval split)
    #[arg(long, default_value_t = 3)]
    pub early_stopping_patience: u32,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a native base model from local text files
    Base {
        /// Text files or directories to read
        #[arg(long = "text", required = true, num_args = 1..)]
        text: Vec<PathBuf>,

        /// Model id; written to <model root>/<name>
        #[arg(long)]
        name: String,

        /// Hidden size (clamped to the vocabulary size)
        #[arg(long, default_value_t = 64)]
        dim: usize,
    },

    /// List finished runs under an output root
    Runs {
        /// Output root to scan (defaults to the configured output)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

async fn dispatch(args: Args) -> anyhow::Result<()> {
    let cli_config = CliConfig::discover_and_load(args.config.as_deref())?;

    let level = match (args.log_level, cli_config.log_level.as_deref()) {
        (Some(level), _) => level,
        (None, Some(configured)) => configured
            .parse::<Level>()
            .map_err(|e| anyhow::anyhow!("invalid log_level '{configured}' in config: {e}"))?,
        (None, None) => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let model_root = cli_config.resolve_model_root(args.model_root);
    match args.command {
        Some(Command::Base { text, name, dim }) => base::execute(&text, &name, dim, &model_root),
        Some(Command::Runs { output, json }) => runs::execute(output, &cli_config, json),
        None => train::execute(args.train, &cli_config, model_root).await,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    if let Err(e) = dispatch(args).await {
        eprintln!("{} {e:#}", "Error:".red().bold());
        std::process::exit(1);
    }
}
