use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

pub const DEFAULT_MODEL: &str = "Qwen/Qwen2.5-0.5B-Instruct";
pub const DEFAULT_OUTPUT: &str = "./output";

/// Identifier for a fine-tuning run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Learning-rate schedule applied after warmup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    Linear,
    #[default]
    Cosine,
    Constant,
    ConstantWithWarmup,
}

impl SchedulerKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Cosine => "cosine",
            Self::Constant => "constant",
            Self::ConstantWithWarmup => "constant_with_warmup",
        }
    }
}

impl std::fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SchedulerKind {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "linear" => Ok(Self::Linear),
            "cosine" => Ok(Self::Cosine),
            "constant" => Ok(Self::Constant),
            "constant_with_warmup" => Ok(Self::ConstantWithWarmup),
            other => Err(TrainingError::InvalidSpec(format!(
                "unknown lr scheduler '{other}' (expected linear, cosine, constant, constant_with_warmup)"
            ))),
        }
    }
}

/// Everything a run needs, fixed once arguments are parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub data: PathBuf,
    pub output: PathBuf,
    pub model: String,
    pub epochs: u32,
    pub batch_size: u32,
    pub learning_rate: f64,
    pub max_length: u32,
    pub lora_r: u32,
    pub export_gguf: bool,
    pub gguf_output: Option<PathBuf>,
    pub lr_scheduler: SchedulerKind,
    pub early_stopping_patience: u32,
}

impl RunConfig {
    #[must_use]
    pub fn new(data: PathBuf) -> Self {
        Self {
            data,
            output: PathBuf::from(DEFAULT_OUTPUT),
            model: DEFAULT_MODEL.to_string(),
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

    pub fn validate(&self) -> TrainingResult<()> {
        if self.model.trim().is_empty() {
            return Err(TrainingError::InvalidSpec("model is required".to_string()));
        }
        if self.epochs == 0 {
            return Err(TrainingError::InvalidSpec("epochs must be >= 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(TrainingError::InvalidSpec("batch_size must be >= 1".to_string()));
        }
        if !(self.learning_rate.is_finite()) || self.learning_rate <= 0.0 {
            return Err(TrainingError::InvalidSpec("learning_rate must be > 0".to_string()));
        }
        if self.max_length < 2 {
            return Err(TrainingError::InvalidSpec("max_length must be >= 2".to_string()));
        }
        if self.lora_r == 0 {
            return Err(TrainingError::InvalidSpec("lora_r must be >= 1".to_string()));
        }
        if self.early_stopping_patience == 0 {
            return Err(TrainingError::InvalidSpec("early_stopping_patience must be >= 1".to_string()));
        }
        Ok(())
    }
}

/// Low-rank adapter configuration handed to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoraSettings {
    pub r: u32,
    pub alpha: u32,
    pub dropout: f32,
    pub target_modules: Vec<String>,
    pub bias: String,
    pub task_type: String,
}

impl LoraSettings {
    /// Rank `r` with alpha `2r`, 5% dropout, attention projections targeted.
    #[must_use]
    pub fn with_rank(r: u32) -> Self {
        Self {
            r,
            alpha: r * 2,
            dropout: 0.05,
            target_modules: ["q_proj", "k_proj", "v_proj", "o_proj"].map(String::from).to_vec(),
            bias: "none".to_string(),
            task_type: "CAUSAL_LM".to_string(),
        }
    }

    #[must_use]
    pub fn scaling(&self) -> f32 {
        self.alpha as f32 / self.r as f32
    }
}

/// Trainer arguments: user hyper-parameters plus the fixed recipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainSettings {
    pub epochs: u32,
    pub batch_size: u32,
    pub learning_rate: f64,
    pub max_length: u32,
    pub lr_scheduler: SchedulerKind,
    pub gradient_accumulation_steps: u32,
    pub weight_decay: f64,
    pub warmup_ratio: f64,
    pub max_grad_norm: f64,
    pub logging_steps: u64,
    pub save_steps: u64,
    pub save_total_limit: usize,
    /// Evaluate every N optimizer steps; `None` when there is no eval split.
    pub eval_steps: Option<u64>,
    /// Early stopping patience; only set alongside `eval_steps`.
    pub early_stopping_patience: Option<u32>,
    pub load_best_model_at_end: bool,
    pub seed: u64,
}

impl TrainSettings {
    #[must_use]
    pub fn from_config(config: &RunConfig, has_eval: bool) -> Self {
        Self {
            epochs: config.epochs,
            batch_size: config.batch_size,
            learning_rate: config.learning_rate,
            max_length: config.max_length,
            lr_scheduler: config.lr_scheduler,
            gradient_accumulation_steps: 4,
            weight_decay: 0.01,
            warmup_ratio: 0.1,
            max_grad_norm: 1.0,
            logging_steps: 10,
            save_steps: 100,
            save_total_limit: 2,
            eval_steps: has_eval.then_some(50),
            early_stopping_patience: has_eval.then_some(config.early_stopping_patience),
            load_best_model_at_end: has_eval,
            seed: 42,
        }
    }

    /// Optimizer steps for a training set of `n_train` records.
    #[must_use]
    pub fn total_steps(&self, n_train: usize) -> u64 {
        let batches = n_train.div_ceil(self.batch_size as usize) as u64;
        let per_epoch = batches.div_ceil(u64::from(self.gradient_accumulation_steps)).max(1);
        per_epoch * u64::from(self.epochs)
    }

    #[must_use]
    pub fn warmup_steps(&self, total_steps: u64) -> u64 {
        ((total_steps as f64) * self.warmup_ratio).ceil() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = RunConfig::new(PathBuf::from("data.jsonl"));
        assert!(config.validate().is_ok());
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.lr_scheduler, SchedulerKind::Cosine);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = RunConfig::new(PathBuf::from("data.jsonl"));
        config.epochs = 0;
        assert!(config.validate().is_err());

        let mut config = RunConfig::new(PathBuf::from("data.jsonl"));
        config.learning_rate = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = RunConfig::new(PathBuf::from("data.jsonl"));
        config.lora_r = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scheduler_parsing() {
        assert_eq!("cosine".parse::<SchedulerKind>().unwrap(), SchedulerKind::Cosine);
        assert_eq!("constant-with-warmup".parse::<SchedulerKind>().unwrap(), SchedulerKind::ConstantWithWarmup);
        assert!("exponential".parse::<SchedulerKind>().is_err());
    }

    #[test]
    fn test_lora_settings_from_rank() {
        let lora = LoraSettings::with_rank(8);
        assert_eq!(lora.alpha, 16);
        assert!((lora.scaling() - 2.0).abs() < f32::EPSILON);
        assert_eq!(lora.target_modules.len(), 4);
    }

    #[test]
    fn test_eval_settings_follow_split() {
        let config = RunConfig::new(PathBuf::from("data.jsonl"));
        let without = TrainSettings::from_config(&config, false);
        assert!(without.eval_steps.is_none());
        assert!(without.early_stopping_patience.is_none());
        assert!(!without.load_best_model_at_end);

        let with = TrainSettings::from_config(&config, true);
        assert_eq!(with.eval_steps, Some(50));
        assert_eq!(with.early_stopping_patience, Some(3));
    }

    #[test]
    fn test_total_steps_accounts_for_accumulation() {
        let mut config = RunConfig::new(PathBuf::from("data.jsonl"));
        config.epochs = 2;
        let settings = TrainSettings::from_config(&config, false);
        // 9 batches of 1 -> 3 optimizer steps per epoch
        assert_eq!(settings.total_steps(9), 6);
        assert_eq!(settings.warmup_steps(6), 1);
    }
}
