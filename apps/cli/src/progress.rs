//! Terminal rendering of training progress.

use colored::Colorize;
use finetune_training::{ProgressEvent, ProgressSink};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;

/// Prints run messages and drives a step progress bar while training.
#[derive(Default)]
pub struct CliProgressSink {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliProgressSink {
    fn print(&self, line: String) {
        match self.bar.lock().ok().as_deref().and_then(Option::as_ref) {
            Some(bar) => bar.suspend(|| println!("{line}")),
            None => println!("{line}"),
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(bar) = guard.as_ref() {
                f(bar);
            }
        }
    }
}

impl ProgressSink for CliProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Message { message } => self.print(format!("{} {message}", "•".cyan())),
            ProgressEvent::TrainingStarted { total_steps } => {
                let bar = ProgressBar::new(total_steps);
                if let Ok(style) = ProgressStyle::default_bar().template("{bar:40.cyan/blue} {pos}/{len} {msg}") {
                    bar.set_style(style);
                }
                if let Ok(mut slot) = self.bar.lock() {
                    *slot = Some(bar);
                }
                self.print(format!("{} training for {total_steps} steps", "•".cyan()));
            }
            ProgressEvent::StepCompleted { step, loss } => {
                self.with_bar(|bar| {
                    bar.set_position(step);
                    bar.set_message(format!("loss {loss:.4}"));
                });
            }
            ProgressEvent::Step { step, total, loss, learning_rate, epoch } => {
                self.print(format!(
                    "  step {step}/{total}  loss {}  lr {learning_rate:.2e}  epoch {epoch:.2}",
                    format!("{loss:.4}").yellow()
                ));
            }
            ProgressEvent::Eval { step, loss } => {
                self.print(format!("  eval @ step {step}: loss {}", format!("{loss:.4}").green()));
            }
            ProgressEvent::Checkpoint { step, path } => {
                self.print(format!("  checkpoint {step} -> {}", path.display().to_string().dimmed()));
            }
            ProgressEvent::EarlyStopped { step } => {
                self.print(format!("  {} at step {step}", "early stopping".yellow()));
            }
            ProgressEvent::TrainingFinished { steps, train_loss } => {
                if let Ok(mut slot) = self.bar.lock() {
                    if let Some(bar) = slot.take() {
                        bar.finish_and_clear();
                    }
                }
                self.print(format!(
                    "{} training finished after {steps} steps (train loss {train_loss:.4})",
                    "✓".green()
                ));
            }
        }
    }
}
