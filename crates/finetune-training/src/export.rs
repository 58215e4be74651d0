use crate::error::TrainingResult;
use std::path::{Path, PathBuf};

/// Manual GGUF conversion step for a merged model.
///
/// Conversion runs in an external tool; this only renders what the user
/// has to run and the Modelfile that points Ollama at the result.
#[derive(Debug, Clone)]
pub struct ExportPlan {
    pub merged_dir: PathBuf,
    pub gguf_path: PathBuf,
    pub quant_type: String,
}

impl ExportPlan {
    #[must_use]
    pub fn new(merged_dir: PathBuf, gguf_path: PathBuf) -> Self {
        Self { merged_dir, gguf_path, quant_type: "q4_k_m".to_string() }
    }

    #[must_use]
    pub fn convert_command(&self) -> String {
        format!(
            "python -m llama_cpp.convert {} --outfile {} --outtype {}",
            self.merged_dir.display(),
            self.gguf_path.display(),
            self.quant_type
        )
    }

    #[must_use]
    pub fn modelfile(&self) -> String {
        format!(
            "FROM {}\n\nPARAMETER temperature 0.7\nPARAMETER top_p 0.9\nPARAMETER num_ctx 4096\n\nSYSTEM \"\"\"You are a personalized intelligent assistant.\"\"\"\n",
            self.gguf_path.display()
        )
    }

    pub fn write_modelfile(&self, path: &Path) -> TrainingResult<()> {
        std::fs::write(path, self.modelfile())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_command() {
        let plan = ExportPlan::new(PathBuf::from("/out/merged"), PathBuf::from("/out/model.gguf"));
        assert_eq!(
            plan.convert_command(),
            "python -m llama_cpp.convert /out/merged --outfile /out/model.gguf --outtype q4_k_m"
        );
    }

    #[test]
    fn test_modelfile_points_at_gguf() {
        let plan = ExportPlan::new(PathBuf::from("m"), PathBuf::from("/tmp/x.gguf"));
        assert!(plan.modelfile().starts_with("FROM /tmp/x.gguf\n"));
    }
}
