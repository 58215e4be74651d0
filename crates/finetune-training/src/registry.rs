use crate::artifacts::{MANIFEST_FILE, TrainingManifest};
use crate::error::TrainingResult;
use crate::layout::RUN_DIR_PREFIX;
use std::path::{Path, PathBuf};

/// A finished run discovered under an output root.
#[derive(Debug, Clone)]
pub struct RunEntry {
    pub run_dir: PathBuf,
    pub manifest: TrainingManifest,
}

impl RunEntry {
    #[must_use]
    pub fn name(&self) -> String {
        self.run_dir.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
    }
}

/// Discover runs by scanning `<output>/finetune_*/training_manifest.json`.
///
/// Directories without a manifest (interrupted runs) are skipped. Entries
/// are sorted by run directory name, which sorts by timestamp.
pub fn discover_runs(output_root: &Path) -> TrainingResult<Vec<RunEntry>> {
    let mut out = Vec::new();

    let dir = match std::fs::read_dir(output_root) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e.into()),
    };

    for entry in dir {
        let entry = entry?;
        let run_dir = entry.path();
        if !run_dir.is_dir() {
            continue;
        }
        let is_run = run_dir
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(RUN_DIR_PREFIX));
        if !is_run {
            continue;
        }
        let manifest_path = run_dir.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            continue;
        }
        let manifest = TrainingManifest::read(&manifest_path)?;
        out.push(RunEntry { run_dir, manifest });
    }

    out.sort_by(|a, b| a.run_dir.cmp(&b.run_dir));
    Ok(out)
}
