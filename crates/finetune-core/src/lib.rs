//! Finetune Core
//!
//! Runs LoRA supervised fine-tuning end to end:
//! - `pipeline` drives a run through any `FineTuneBackend`
//! - `training` provides the native CPU backend and base-model bootstrap

pub mod pipeline;
pub mod training;

pub use pipeline::{RunReport, run};
pub use training::{BaseModelOptions, BaseModelSummary, NativeBackend, bootstrap_base_model};
