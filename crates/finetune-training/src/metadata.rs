use crate::device::DeviceKind;
use crate::error::TrainingResult;
use crate::job::RunConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Summary of a run written to `config.json` once training finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub base_model: String,
    pub timestamp: String,
    pub epochs: u32,
    pub learning_rate: f64,
    pub lora_r: u32,
    pub train_samples: usize,
    pub device: DeviceKind,
    pub batch_size: u32,
    pub max_length: u32,
    pub lr_scheduler: String,
}

impl RunMetadata {
    /// `train_samples` counts every loaded record, before any eval split.
    #[must_use]
    pub fn from_config(config: &RunConfig, timestamp: &str, train_samples: usize, device: DeviceKind) -> Self {
        Self {
            base_model: config.model.clone(),
            timestamp: timestamp.to_string(),
            epochs: config.epochs,
            learning_rate: config.learning_rate,
            lora_r: config.lora_r,
            train_samples,
            device,
            batch_size: config.batch_size,
            max_length: config.max_length,
            lr_scheduler: config.lr_scheduler.to_string(),
        }
    }

    pub fn write(&self, path: &Path) -> TrainingResult<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_metadata_keeps_non_ascii_model_names() {
        let temp = TempDir::new().unwrap();
        let mut config = RunConfig::new(PathBuf::from("d.jsonl"));
        config.model = "本地/模型".to_string();

        let meta = RunMetadata::from_config(&config, "20240101_000000", 12, DeviceKind::Cpu);
        let path = temp.path().join("config.json");
        meta.write(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("本地/模型"));

        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["train_samples"], 12);
        assert_eq!(value["device"], "cpu");
        assert_eq!(value["lora_r"], 8);
        assert_eq!(value["timestamp"], "20240101_000000");
    }
}
