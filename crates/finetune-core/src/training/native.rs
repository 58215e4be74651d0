use crate::training::checkpoint::{self, AdapterConfig};
use crate::training::model::{BigramLm, MODEL_CONFIG_FILE, MODEL_WEIGHTS_FILE, PROJECTIONS};
use crate::training::tensor_error;
use crate::training::tokenizer::{CharTokenizer, TOKENIZER_FILE};
use crate::training::trainer::{self, TrainLoop};
use finetune_training::{
    ChatSample, DeviceAvailability, FineTuneBackend, LoadOptions, LoraSettings, MergedExport, ParameterReport,
    Precision, ProgressSink, TrainOutcome, TrainSettings, TrainingError, TrainingResult,
};

use async_trait::async_trait;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::{Path, PathBuf};

struct LoadedModel {
    model_id: String,
    tokenizer: CharTokenizer,
    model: BigramLm,
    adapter_config: Option<AdapterConfig>,
    rng: StdRng,
}

/// In-process backend that fine-tunes the bigram language model on CPU.
pub struct NativeBackend {
    model_root: PathBuf,
    seed: u64,
    state: Option<LoadedModel>,
}

impl NativeBackend {
    #[must_use]
    pub fn new(model_root: PathBuf) -> Self {
        Self { model_root, seed: 42, state: None }
    }

    /// A model id is either a directory holding the model files or a name
    /// under the model root.
    pub fn resolve_model_dir(&self, model_id: &str) -> TrainingResult<PathBuf> {
        let is_model_dir = |dir: &Path| dir.join(MODEL_CONFIG_FILE).is_file() && dir.join(MODEL_WEIGHTS_FILE).is_file();
        let literal = PathBuf::from(model_id);
        if is_model_dir(&literal) {
            return Ok(literal);
        }
        let under_root = self.model_root.join(model_id);
        if is_model_dir(&under_root) {
            return Ok(under_root);
        }
        Err(TrainingError::ModelNotFound(format!(
            "{model_id} (looked in {} and {})",
            literal.display(),
            under_root.display()
        )))
    }

    fn loaded(&self) -> TrainingResult<&LoadedModel> {
        self.state.as_ref().ok_or_else(|| TrainingError::Backend("no model loaded".to_string()))
    }

    fn loaded_mut(&mut self) -> TrainingResult<&mut LoadedModel> {
        self.state.as_mut().ok_or_else(|| TrainingError::Backend("no model loaded".to_string()))
    }
}

#[async_trait]
impl FineTuneBackend for NativeBackend {
    fn id(&self) -> &'static str {
        "native-bigram"
    }

    fn available_devices(&self) -> DeviceAvailability {
        DeviceAvailability::cpu_only()
    }

    async fn load(&mut self, model_id: &str, options: &LoadOptions) -> TrainingResult<()> {
        if let Precision::Nf4 { .. } = options.precision {
            return Err(TrainingError::Unsupported(format!(
                "4-bit weights on {} (the native backend runs in float32 on cpu)",
                options.device
            )));
        }

        let dir = self.resolve_model_dir(model_id)?;
        tracing::info!(model = model_id, dir = %dir.display(), "loading base model");

        let mut tokenizer = CharTokenizer::load(&dir)?;
        tokenizer.ensure_pad_token();
        let model = BigramLm::load(&dir)?;
        if model.vocab_size() != tokenizer.vocab_size() {
            return Err(TrainingError::Backend(format!(
                "tokenizer has {} tokens but model expects {}",
                tokenizer.vocab_size(),
                model.vocab_size()
            )));
        }

        self.state = Some(LoadedModel {
            model_id: model_id.to_string(),
            tokenizer,
            model,
            adapter_config: None,
            rng: StdRng::seed_from_u64(self.seed),
        });
        Ok(())
    }

    async fn inject_lora(&mut self, lora: &LoraSettings) -> TrainingResult<ParameterReport> {
        let state = self.loaded_mut()?;
        let matched = state.model.inject(lora, &mut state.rng)?;

        let missing: Vec<&String> = lora.target_modules.iter().filter(|t| !matched.contains(t)).collect();
        if !missing.is_empty() {
            tracing::warn!(?missing, available = ?PROJECTIONS, "target modules not present in model; skipped");
        }

        state.adapter_config = Some(AdapterConfig {
            base_model_name_or_path: state.model_id.clone(),
            lora: lora.clone(),
            matched_modules: matched,
        });
        Ok(ParameterReport { trainable: state.model.trainable_params(), total: state.model.total_params() })
    }

    async fn train(
        &mut self,
        settings: &TrainSettings,
        train: &[ChatSample],
        eval: Option<&[ChatSample]>,
        output_dir: &Path,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<TrainOutcome> {
        let state = self.loaded_mut()?;
        let adapter_config = state
            .adapter_config
            .as_ref()
            .ok_or_else(|| TrainingError::Backend("train called before inject_lora".to_string()))?;
        state.rng = StdRng::seed_from_u64(settings.seed);

        TrainLoop {
            model: &mut state.model,
            tokenizer: &state.tokenizer,
            adapter_config,
            rng: &mut state.rng,
        }
        .run(settings, train, eval, output_dir, progress)
    }

    async fn evaluate(&mut self, samples: &[ChatSample], max_length: u32) -> TrainingResult<f64> {
        let state = self.loaded()?;
        let seqs = trainer::encode_samples(&state.tokenizer, samples, max_length);
        trainer::evaluate(&state.model, &seqs, 1, state.tokenizer.pad_id()).map_err(tensor_error)
    }

    async fn save_adapter(&self, dir: &Path) -> TrainingResult<Vec<PathBuf>> {
        let state = self.loaded()?;
        let config = state
            .adapter_config
            .as_ref()
            .ok_or_else(|| TrainingError::Backend("no adapter to save".to_string()))?;
        let mut written = checkpoint::save_adapter(dir, config, &state.model)?;
        state.tokenizer.save(dir)?;
        written.push(dir.join(TOKENIZER_FILE));
        Ok(written)
    }

    async fn merge_and_save(&mut self, dir: &Path) -> TrainingResult<MergedExport> {
        let state = self.loaded_mut()?;
        std::fs::create_dir_all(dir)?;

        let mut merged = state.model.clone();
        merged.merge_and_unload()?;
        merged.save(dir)?;
        state.tokenizer.save(dir)?;

        tracing::info!(dir = %dir.display(), "merged model saved");
        Ok(MergedExport { weights_path: dir.join(MODEL_WEIGHTS_FILE), tokenizer_path: dir.join(TOKENIZER_FILE) })
    }
}
