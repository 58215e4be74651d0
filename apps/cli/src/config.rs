//! CLI configuration loading and merging.
//!
//! Precedence, lowest first: global `~/.finetune/config.toml`, local
//! `./.finetunerc`, an explicit `--config` file, environment, then flags.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MODEL_ROOT_ENV: &str = "FINETUNE_MODEL_ROOT";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Default base model id.
    #[serde(default)]
    pub model: Option<String>,

    /// Default output root for runs.
    #[serde(default)]
    pub output: Option<PathBuf>,

    /// Directory holding native base models.
    #[serde(default)]
    pub model_root: Option<PathBuf>,

    #[serde(default)]
    pub log_level: Option<String>,
}

impl CliConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read config: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    pub fn default_global_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".finetune").join("config.toml"))
    }

    pub fn default_local_path() -> PathBuf {
        PathBuf::from(".finetunerc")
    }

    /// Load global and local config, then `explicit` if given.
    ///
    /// Missing default files are skipped; a missing or malformed explicit
    /// file is an error.
    pub fn discover_and_load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        let defaults = Self::default_global_path().into_iter().chain([Self::default_local_path()]);
        for path in defaults {
            if !path.is_file() {
                continue;
            }
            match Self::load_from_file(&path) {
                Ok(found) => config.merge(&found),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable config"),
            }
        }

        if let Some(path) = explicit {
            config.merge(&Self::load_from_file(path)?);
        }
        Ok(config)
    }

    /// Values set in `other` override values in `self`.
    pub fn merge(&mut self, other: &Self) {
        if let Some(ref model) = other.model {
            self.model = Some(model.clone());
        }
        if let Some(ref output) = other.output {
            self.output = Some(output.clone());
        }
        if let Some(ref model_root) = other.model_root {
            self.model_root = Some(model_root.clone());
        }
        if let Some(ref log_level) = other.log_level {
            self.log_level = Some(log_level.clone());
        }
    }

    /// Flag, then `FINETUNE_MODEL_ROOT`, then config, then `~/.finetune/models`.
    pub fn resolve_model_root(&self, flag: Option<PathBuf>) -> PathBuf {
        flag.or_else(|| std::env::var_os(MODEL_ROOT_ENV).map(PathBuf::from))
            .or_else(|| self.model_root.clone())
            .or_else(|| dirs::home_dir().map(|home| home.join(".finetune").join("models")))
            .unwrap_or_else(|| PathBuf::from(".finetune").join("models"))
    }
}
