//! Finetune Training
//!
//! Backend-agnostic primitives for LoRA supervised fine-tuning runs:
//! - Loading prompt/completion JSONL data into chat-templated samples
//! - Describing a run (`RunConfig`, `LoraSettings`, `TrainSettings`)
//! - Splitting, scheduling and device selection
//! - Writing run metadata, artifacts and manifests
//! - Implementing training backends (`FineTuneBackend`)

pub mod artifacts;
pub mod backend;
pub mod dataset;
pub mod device;
pub mod error;
pub mod export;
pub mod job;
pub mod layout;
pub mod metadata;
pub mod progress;
pub mod registry;
pub mod schedule;
pub mod split;

pub use artifacts::{ArtifactKind, TrainingArtifact, TrainingManifest, TrainingMetrics};
pub use backend::{FineTuneBackend, MergedExport, ParameterReport, TrainOutcome};
pub use dataset::{ChatDataset, ChatSample, DatasetId, TrainingExample, compute_dataset_id, format_chat, load_jsonl};
pub use device::{DeviceAvailability, DeviceKind, LoadOptions, Precision};
pub use error::{TrainingError, TrainingResult};
pub use export::ExportPlan;
pub use job::{LoraSettings, RunConfig, RunId, SchedulerKind, TrainSettings};
pub use layout::RunLayout;
pub use metadata::RunMetadata;
pub use progress::{ProgressEvent, ProgressSink, StdoutProgressSink};
pub use registry::{RunEntry, discover_runs};
pub use schedule::LrSchedule;
pub use split::{DatasetSplit, EVAL_SPLIT_THRESHOLD, SPLIT_SEED, split_for_eval};
