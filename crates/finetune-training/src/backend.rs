use crate::dataset::ChatSample;
use crate::device::{DeviceAvailability, LoadOptions};
use crate::error::TrainingResult;
use crate::job::{LoraSettings, TrainSettings};
use crate::progress::ProgressSink;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Trainable vs. total parameter counts after adapter injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterReport {
    pub trainable: usize,
    pub total: usize,
}

impl ParameterReport {
    #[must_use]
    pub fn trainable_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        100.0 * self.trainable as f64 / self.total as f64
    }
}

impl std::fmt::Display for ParameterReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "trainable params: {} || all params: {} || trainable%: {:.4}",
            self.trainable,
            self.total,
            self.trainable_percent()
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainOutcome {
    /// Mean loss over all optimizer steps.
    pub train_loss: f64,
    pub steps: u64,
    pub stopped_early: bool,
    pub best_eval_loss: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedExport {
    pub weights_path: PathBuf,
    pub tokenizer_path: PathBuf,
}

/// The training stack a run delegates to.
///
/// Calls arrive in pipeline order: `load`, `inject_lora`, `train`,
/// optionally `evaluate`, then `save_adapter` and `merge_and_save`.
#[async_trait]
pub trait FineTuneBackend: Send + Sync {
    fn id(&self) -> &'static str;

    fn available_devices(&self) -> DeviceAvailability;

    /// Load tokenizer and base weights for `model_id`.
    async fn load(&mut self, model_id: &str, options: &LoadOptions) -> TrainingResult<()>;

    async fn inject_lora(&mut self, lora: &LoraSettings) -> TrainingResult<ParameterReport>;

    /// Run the optimization loop; checkpoints land under `output_dir`.
    async fn train(
        &mut self,
        settings: &TrainSettings,
        train: &[ChatSample],
        eval: Option<&[ChatSample]>,
        output_dir: &Path,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<TrainOutcome>;

    async fn evaluate(&mut self, samples: &[ChatSample], max_length: u32) -> TrainingResult<f64>;

    /// Persist the trained adapter and its config into `dir`.
    async fn save_adapter(&self, dir: &Path) -> TrainingResult<Vec<PathBuf>>;

    /// Fold adapters into the base weights and write model + tokenizer to `dir`.
    async fn merge_and_save(&mut self, dir: &Path) -> TrainingResult<MergedExport>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_report_display() {
        let report = ParameterReport { trainable: 25, total: 1000 };
        assert_eq!(report.to_string(), "trainable params: 25 || all params: 1000 || trainable%: 2.5000");
    }
}
