//! Base-model bootstrap command.

use anyhow::{Context, Result};
use colored::Colorize;
use finetune_core::{BaseModelOptions, bootstrap_base_model};
use std::path::{Path, PathBuf};

pub fn execute(text: &[PathBuf], name: &str, dim: usize, model_root: &Path) -> Result<()> {
    let options = BaseModelOptions { dim, ..BaseModelOptions::default() };
    let summary = bootstrap_base_model(text, model_root, name, &options)
        .with_context(|| format!("Failed to build base model '{name}'"))?;

    println!();
    println!("{}", "Base model ready".bold().green());
    println!("  Id:    {}", name.cyan());
    println!("  Path:  {}", summary.dir.display().to_string().dimmed());
    println!("  Files: {} ({} chars)", summary.files, summary.chars);
    println!("  Vocab: {}  Dim: {}", summary.vocab_size, summary.dim);
    println!("  Use:   {}", format!("finetune --model {name} --data <file.jsonl>").dimmed());
    println!();
    Ok(())
}
