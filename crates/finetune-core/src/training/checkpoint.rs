use crate::training::model::BigramLm;
use finetune_training::layout::checkpoint_step;
use finetune_training::{LoraSettings, TrainingResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ADAPTER_MODEL_FILE: &str = "adapter_model.safetensors";
pub const ADAPTER_CONFIG_FILE: &str = "adapter_config.json";
pub const TRAINER_STATE_FILE: &str = "trainer_state.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub base_model_name_or_path: String,
    #[serde(flatten)]
    pub lora: LoraSettings,
    pub matched_modules: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogEntry {
    pub step: u64,
    pub epoch: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learning_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eval_loss: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainerState {
    pub global_step: u64,
    pub epoch: f64,
    pub best_metric: Option<f64>,
    pub best_model_checkpoint: Option<PathBuf>,
    pub log_history: Vec<LogEntry>,
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> TrainingResult<()> {
    std::fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

/// Write the model's adapter weights and `config` into `dir`.
pub fn save_adapter(dir: &Path, config: &AdapterConfig, model: &BigramLm) -> TrainingResult<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let model_path = dir.join(ADAPTER_MODEL_FILE);
    let config_path = dir.join(ADAPTER_CONFIG_FILE);
    model.save_adapters(&model_path)?;
    write_json(&config_path, config)?;
    Ok(vec![model_path, config_path])
}

pub fn save_checkpoint(dir: &Path, config: &AdapterConfig, model: &BigramLm, state: &TrainerState) -> TrainingResult<()> {
    save_adapter(dir, config, model)?;
    write_json(&dir.join(TRAINER_STATE_FILE), state)
}

/// Delete the oldest `checkpoint-<step>` directories in `run_dir` so that
/// at most `limit` remain. `keep` is never deleted.
pub fn rotate_checkpoints(run_dir: &Path, limit: usize, keep: Option<&Path>) -> TrainingResult<Vec<PathBuf>> {
    let mut checkpoints: Vec<(u64, PathBuf)> = std::fs::read_dir(run_dir)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .filter_map(|p| checkpoint_step(&p).map(|step| (step, p)))
        .collect();
    checkpoints.sort();

    let excess = checkpoints.len().saturating_sub(limit);
    let removed: Vec<PathBuf> = checkpoints
        .into_iter()
        .map(|(_, p)| p)
        .filter(|p| keep != Some(p.as_path()))
        .take(excess)
        .collect();

    for path in &removed {
        tracing::debug!(path = %path.display(), "removing old checkpoint");
        std::fs::remove_dir_all(path)?;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::model::tests::tiny_model;
    use candle_core::Device;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use tempfile::TempDir;

    fn make_checkpoints(root: &Path, steps: &[u64]) -> Vec<PathBuf> {
        steps
            .iter()
            .map(|s| {
                let p = root.join(format!("checkpoint-{s}"));
                std::fs::create_dir_all(&p).unwrap();
                p
            })
            .collect()
    }

    #[test]
    fn test_rotate_keeps_newest() {
        let temp = TempDir::new().unwrap();
        let dirs = make_checkpoints(temp.path(), &[100, 200, 300]);
        std::fs::create_dir_all(temp.path().join("merged")).unwrap();

        let removed = rotate_checkpoints(temp.path(), 2, None).unwrap();
        assert_eq!(removed, vec![dirs[0].clone()]);
        assert!(dirs[1].exists() && dirs[2].exists());
        assert!(temp.path().join("merged").exists());
    }

    #[test]
    fn test_rotate_never_removes_best() {
        let temp = TempDir::new().unwrap();
        let dirs = make_checkpoints(temp.path(), &[100, 200, 300]);

        rotate_checkpoints(temp.path(), 2, Some(&dirs[0])).unwrap();
        assert!(dirs[0].exists());
        assert!(!dirs[1].exists());
        assert!(dirs[2].exists());
    }

    #[test]
    fn test_rotate_orders_numerically() {
        let temp = TempDir::new().unwrap();
        let dirs = make_checkpoints(temp.path(), &[900, 1000]);
        rotate_checkpoints(temp.path(), 1, None).unwrap();
        assert!(!dirs[0].exists());
        assert!(dirs[1].exists());
    }

    #[test]
    fn test_adapter_save_writes_named_tensors() {
        let temp = TempDir::new().unwrap();
        let mut model = tiny_model(2);
        let mut rng = StdRng::seed_from_u64(0);
        let config = AdapterConfig {
            base_model_name_or_path: "base".to_string(),
            lora: LoraSettings::with_rank(2),
            matched_modules: model.inject(&LoraSettings::with_rank(2), &mut rng).unwrap(),
        };

        let written = save_adapter(temp.path(), &config, &model).unwrap();
        assert_eq!(written.len(), 2);

        let tensors = candle_core::safetensors::load(temp.path().join(ADAPTER_MODEL_FILE), &Device::Cpu).unwrap();
        let mut names: Vec<&String> = tensors.keys().collect();
        names.sort();
        assert_eq!(names, ["o_proj.lora_A.weight", "o_proj.lora_B.weight", "v_proj.lora_A.weight", "v_proj.lora_B.weight"]);
        assert_eq!(tensors["v_proj.lora_A.weight"].dims(), &[3, 2]);

        let saved: AdapterConfig =
            serde_json::from_slice(&std::fs::read(temp.path().join(ADAPTER_CONFIG_FILE)).unwrap()).unwrap();
        assert_eq!(saved, config);
    }
}
