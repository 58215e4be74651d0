//! Native training backend.
//!
//! The backend-agnostic types live in `finetune-training`. This module holds
//! the in-process implementation: a character tokenizer, a candle bigram
//! language model with LoRA-adaptable projections, and the training loop
//! around it.

pub mod base;
pub mod checkpoint;
pub mod model;
pub mod native;
pub mod tokenizer;
pub mod trainer;

pub use base::{BaseModelOptions, BaseModelSummary, bootstrap_base_model};
pub use native::NativeBackend;

use finetune_training::TrainingError;

pub(crate) fn tensor_error(err: candle_core::Error) -> TrainingError {
    TrainingError::Backend(err.to_string())
}
