use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Message { message: String },
    TrainingStarted { total_steps: u64 },
    /// Emitted after every optimizer update.
    StepCompleted { step: u64, loss: f64 },
    /// Emitted every `logging_steps` with the loss averaged since the last log.
    Step { step: u64, total: u64, loss: f64, learning_rate: f64, epoch: f64 },
    Eval { step: u64, loss: f64 },
    Checkpoint { step: u64, path: PathBuf },
    EarlyStopped { step: u64 },
    TrainingFinished { steps: u64, train_loss: f64 },
}

impl ProgressEvent {
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message { message: message.into() }
    }
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

#[derive(Debug, Default)]
pub struct StdoutProgressSink;

impl ProgressSink for StdoutProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Message { message } => println!("[finetune] {message}"),
            ProgressEvent::TrainingStarted { total_steps } => {
                println!("[finetune] training started ({total_steps} steps)");
            }
            ProgressEvent::StepCompleted { .. } => {}
            ProgressEvent::Step { step, total, loss, learning_rate, epoch } => {
                println!("[finetune] step {step}/{total} loss={loss:.4} lr={learning_rate:.2e} epoch={epoch:.2}");
            }
            ProgressEvent::Eval { step, loss } => println!("[finetune] eval @ {step}: loss={loss:.4}"),
            ProgressEvent::Checkpoint { step, path } => {
                println!("[finetune] checkpoint {step} -> {}", path.display());
            }
            ProgressEvent::EarlyStopped { step } => println!("[finetune] early stopping at step {step}"),
            ProgressEvent::TrainingFinished { steps, train_loss } => {
                println!("[finetune] training finished after {steps} steps (loss {train_loss:.4})");
            }
        }
    }
}
