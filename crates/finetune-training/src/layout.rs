use crate::artifacts::MANIFEST_FILE;
use crate::error::TrainingResult;
use std::path::{Path, PathBuf};

pub const RUN_DIR_PREFIX: &str = "finetune_";

/// Filesystem layout of a single run.
///
/// `<output>/finetune_<YYYYmmdd_HHMMSS>/` holds checkpoints, the final
/// adapter, `merged/`, `config.json` and the training manifest.
#[derive(Debug, Clone)]
pub struct RunLayout {
    run_dir: PathBuf,
}

impl RunLayout {
    #[must_use]
    pub fn new(run_dir: PathBuf) -> Self {
        Self { run_dir }
    }

    #[must_use]
    pub fn for_timestamp(output_root: &Path, timestamp: &str) -> Self {
        Self::new(output_root.join(format!("{RUN_DIR_PREFIX}{timestamp}")))
    }

    #[must_use]
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    #[must_use]
    pub fn merged_dir(&self) -> PathBuf {
        self.run_dir.join("merged")
    }

    #[must_use]
    pub fn metadata_path(&self) -> PathBuf {
        self.run_dir.join("config.json")
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.run_dir.join(MANIFEST_FILE)
    }

    #[must_use]
    pub fn checkpoint_dir(&self, step: u64) -> PathBuf {
        self.run_dir.join(format!("checkpoint-{step}"))
    }

    #[must_use]
    pub fn default_gguf_path(&self) -> PathBuf {
        self.run_dir.join("model.gguf")
    }

    #[must_use]
    pub fn modelfile_path(&self) -> PathBuf {
        self.run_dir.join("Modelfile")
    }

    pub fn ensure_dirs(&self) -> TrainingResult<()> {
        std::fs::create_dir_all(&self.run_dir)?;
        Ok(())
    }
}

/// Parse the step out of a `checkpoint-<step>` directory name.
#[must_use]
pub fn checkpoint_step(path: &Path) -> Option<u64> {
    path.file_name()?.to_str()?.strip_prefix("checkpoint-")?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let temp = TempDir::new().unwrap();
        let layout = RunLayout::for_timestamp(temp.path(), "20240101_120000");

        assert!(layout.run_dir().ends_with("finetune_20240101_120000"));
        assert!(layout.merged_dir().ends_with("finetune_20240101_120000/merged"));
        assert_eq!(checkpoint_step(&layout.checkpoint_dir(300)), Some(300));
        assert_eq!(checkpoint_step(&layout.merged_dir()), None);
    }

    #[test]
    fn test_ensure_dirs_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let layout = RunLayout::for_timestamp(temp.path(), "ts");
        layout.ensure_dirs().unwrap();
        layout.ensure_dirs().unwrap();
        assert!(layout.run_dir().is_dir());
    }
}
