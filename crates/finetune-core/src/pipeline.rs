//! End-to-end fine-tuning run.

use finetune_training::artifacts::make_artifact;
use finetune_training::{
    ArtifactKind, DeviceKind, ExportPlan, FineTuneBackend, LoadOptions, LoraSettings, MergedExport, ParameterReport,
    ProgressEvent, ProgressSink, RunConfig, RunId, RunLayout, RunMetadata, SPLIT_SEED, TrainOutcome, TrainSettings,
    TrainingError, TrainingManifest, TrainingMetrics, TrainingResult, compute_dataset_id, load_jsonl, split_for_eval,
};
use std::path::PathBuf;

/// Timestamp format used in run directory names and metadata.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    pub run_dir: PathBuf,
    pub timestamp: String,
    pub device: DeviceKind,
    pub parameters: ParameterReport,
    pub total_samples: usize,
    pub train_samples: usize,
    pub eval_samples: usize,
    pub outcome: TrainOutcome,
    pub eval_loss: Option<f64>,
    pub merged: MergedExport,
    pub export: Option<ExportPlan>,
    pub manifest_path: PathBuf,
}

/// Execute a run against `backend`.
///
/// The data file and base model are loaded before anything is written, so a
/// bad dataset or model id never leaves a run directory behind.
pub async fn run(
    config: &RunConfig,
    backend: &mut dyn FineTuneBackend,
    progress: &dyn ProgressSink,
) -> TrainingResult<RunReport> {
    config.validate()?;
    if !config.data.is_file() {
        return Err(TrainingError::DataNotFound(config.data.clone()));
    }

    let dataset = load_jsonl(&config.data)?;
    let dataset_id = compute_dataset_id(&dataset);
    let total_samples = dataset.len();
    progress.on_event(ProgressEvent::message(format!("loaded {total_samples} samples")));

    let device = DeviceKind::select(&backend.available_devices());
    progress.on_event(ProgressEvent::message(format!("device: {device}")));

    progress.on_event(ProgressEvent::message(format!("loading model {}", config.model)));
    backend.load(&config.model, &LoadOptions::for_device(device)).await?;

    let parameters = backend.inject_lora(&LoraSettings::with_rank(config.lora_r)).await?;
    progress.on_event(ProgressEvent::message(parameters.to_string()));

    let split = split_for_eval(dataset, SPLIT_SEED);
    let settings = TrainSettings::from_config(config, split.eval.is_some());
    let (train_samples, eval_samples) = (split.train.len(), split.eval_len());

    progress.on_event(ProgressEvent::message(format!(
        "epochs: {}, batch size: {}, learning rate: {}, scheduler: {}",
        settings.epochs, settings.batch_size, settings.learning_rate, settings.lr_scheduler
    )));
    progress.on_event(ProgressEvent::message(format!("train samples: {train_samples}, eval samples: {eval_samples}")));

    let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
    let layout = RunLayout::for_timestamp(&config.output, &timestamp);
    layout.ensure_dirs()?;
    tracing::info!(run_dir = %layout.run_dir().display(), backend = backend.id(), "run directory created");

    let outcome =
        backend.train(&settings, &split.train, split.eval.as_deref(), layout.run_dir(), progress).await?;

    let eval_loss = match split.eval.as_deref() {
        Some(eval) => {
            let loss = backend.evaluate(eval, settings.max_length).await?;
            progress.on_event(ProgressEvent::message(format!("final eval loss: {loss:.4}")));
            Some(loss)
        }
        None => None,
    };

    let adapter_files = backend.save_adapter(layout.run_dir()).await?;
    progress.on_event(ProgressEvent::message(format!("adapter saved to {}", layout.run_dir().display())));

    let merged = backend.merge_and_save(&layout.merged_dir()).await?;
    progress.on_event(ProgressEvent::message(format!("merged model saved to {}", layout.merged_dir().display())));

    let export = if config.export_gguf {
        let gguf = config.gguf_output.clone().unwrap_or_else(|| layout.default_gguf_path());
        let plan = ExportPlan::new(layout.merged_dir(), gguf);
        plan.write_modelfile(&layout.modelfile_path())?;
        Some(plan)
    } else {
        None
    };

    let metadata = RunMetadata::from_config(config, &timestamp, total_samples, device);
    metadata.write(&layout.metadata_path())?;

    let mut artifacts = vec![
        make_artifact(ArtifactKind::MergedWeights, merged.weights_path.clone())?,
        make_artifact(ArtifactKind::Tokenizer, merged.tokenizer_path.clone())?,
        make_artifact(ArtifactKind::RunMetadata, layout.metadata_path())?,
    ];
    for path in adapter_files {
        let kind = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) if name.starts_with("adapter_config") => ArtifactKind::AdapterConfig,
            Some(name) if name.starts_with("adapter") => ArtifactKind::Adapter,
            _ => continue,
        };
        artifacts.push(make_artifact(kind, path)?);
    }
    if export.is_some() {
        artifacts.push(make_artifact(ArtifactKind::Modelfile, layout.modelfile_path())?);
    }

    let run_id = RunId::new();
    let manifest = TrainingManifest {
        run_id: run_id.clone(),
        created_at: chrono::Utc::now(),
        base_model: config.model.clone(),
        device,
        dataset_id,
        metrics: TrainingMetrics {
            train_loss: Some(outcome.train_loss),
            eval_loss: eval_loss.or(outcome.best_eval_loss),
            steps: Some(outcome.steps),
            stopped_early: outcome.stopped_early,
        },
        artifacts,
    };
    let manifest_path = layout.manifest_path();
    manifest.write(&manifest_path)?;
    tracing::info!(run_id = %run_id, steps = outcome.steps, "run complete");

    Ok(RunReport {
        run_id,
        run_dir: layout.run_dir().to_path_buf(),
        timestamp,
        device,
        parameters,
        total_samples,
        train_samples,
        eval_samples,
        outcome,
        eval_loss,
        merged,
        export,
        manifest_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::{BaseModelOptions, NativeBackend, bootstrap_base_model};
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<ProgressEvent>>);

    impl ProgressSink for RecordingSink {
        fn on_event(&self, event: ProgressEvent) {
            if let Ok(mut events) = self.0.lock() {
                events.push(event);
            }
        }
    }

    fn write_dataset(path: &std::path::Path, n: usize) {
        let lines: Vec<String> = (0..n)
            .map(|i| serde_json::json!({"prompt": format!("User: q{i}"), "completion": "Assistant: ok"}).to_string())
            .collect();
        std::fs::write(path, lines.join("\n")).unwrap();
    }

    fn setup(temp: &TempDir, n: usize) -> (RunConfig, NativeBackend) {
        let corpus = temp.path().join("corpus.txt");
        std::fs::write(&corpus, "user assistant q0123456789 ok\n".repeat(10)).unwrap();
        let root = temp.path().join("models");
        bootstrap_base_model(&[corpus], &root, "tiny", &BaseModelOptions { dim: 8, ..Default::default() })
            .unwrap();

        let data = temp.path().join("data.jsonl");
        write_dataset(&data, n);
        let mut config = RunConfig::new(data);
        config.model = "tiny".to_string();
        config.output = temp.path().join("out");
        config.epochs = 1;
        config.lora_r = 2;
        (config, NativeBackend::new(root))
    }

    #[tokio::test]
    async fn test_missing_data_creates_nothing() {
        let temp = TempDir::new().unwrap();
        let (mut config, mut backend) = setup(&temp, 1);
        config.data = temp.path().join("missing.jsonl");

        let err = run(&config, &mut backend, &RecordingSink::default()).await.unwrap_err();
        assert!(matches!(err, TrainingError::DataNotFound(_)));
        assert!(!config.output.exists());
    }

    #[tokio::test]
    async fn test_empty_dataset_creates_nothing() {
        let temp = TempDir::new().unwrap();
        let (config, mut backend) = setup(&temp, 0);

        let err = run(&config, &mut backend, &RecordingSink::default()).await.unwrap_err();
        assert!(matches!(err, TrainingError::EmptyDataset(_)));
        assert!(!config.output.exists());
    }

    #[tokio::test]
    async fn test_unknown_model_creates_nothing() {
        let temp = TempDir::new().unwrap();
        let (mut config, mut backend) = setup(&temp, 3);
        config.model = "nope".to_string();

        let err = run(&config, &mut backend, &RecordingSink::default()).await.unwrap_err();
        assert!(matches!(err, TrainingError::ModelNotFound(_)));
        assert!(!config.output.exists());
    }

    #[tokio::test]
    async fn test_run_without_eval_split() {
        let temp = TempDir::new().unwrap();
        let (config, mut backend) = setup(&temp, 5);
        let sink = RecordingSink::default();

        let report = run(&config, &mut backend, &sink).await.unwrap();
        assert_eq!(report.device, DeviceKind::Cpu);
        assert_eq!((report.train_samples, report.eval_samples), (5, 0));
        assert!(report.eval_loss.is_none());
        assert!(report.export.is_none());
        assert!(report.run_dir.join("merged").join("model.safetensors").exists());
        assert!(!report.run_dir.join("Modelfile").exists());

        let metadata: serde_json::Value =
            serde_json::from_slice(&std::fs::read(report.run_dir.join("config.json")).unwrap()).unwrap();
        assert_eq!(metadata["base_model"], "tiny");
        assert_eq!(metadata["train_samples"], 5);
        assert_eq!(metadata["lora_r"], 2);
        assert_eq!(metadata["device"], "cpu");

        let events = sink.0.lock().unwrap();
        assert!(events.iter().any(|e| matches!(e, ProgressEvent::TrainingFinished { .. })));
    }

    #[tokio::test]
    async fn test_run_with_eval_split_and_export() {
        let temp = TempDir::new().unwrap();
        let (mut config, mut backend) = setup(&temp, 21);
        config.export_gguf = true;

        let report = run(&config, &mut backend, &RecordingSink::default()).await.unwrap();
        assert_eq!((report.train_samples, report.eval_samples), (18, 3));
        assert!(report.eval_loss.is_some_and(f64::is_finite));

        let plan = report.export.as_ref().unwrap();
        assert_eq!(plan.gguf_path, report.run_dir.join("model.gguf"));
        assert!(plan.convert_command().contains("--outtype q4_k_m"));
        assert!(report.run_dir.join("Modelfile").exists());

        let manifest = TrainingManifest::read(&report.manifest_path).unwrap();
        assert_eq!(manifest.base_model, "tiny");
        assert!(manifest.artifact(&ArtifactKind::MergedWeights).is_some());
        assert!(manifest.artifact(&ArtifactKind::Adapter).is_some());
        assert!(manifest.artifact(&ArtifactKind::Modelfile).is_some());
        assert_eq!(manifest.metrics.steps, Some(report.outcome.steps));
    }
}
