//! Supervised training loop over chat samples.

use crate::training::checkpoint::{AdapterConfig, LogEntry, TrainerState, rotate_checkpoints, save_checkpoint};
use crate::training::model::BigramLm;
use crate::training::tensor_error;
use crate::training::tokenizer::CharTokenizer;
use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use finetune_training::{
    ChatSample, LrSchedule, ProgressEvent, ProgressSink, RunLayout, TrainOutcome, TrainSettings, TrainingResult,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Tokenize and truncate each sample to `max_length` tokens.
#[must_use]
pub fn encode_samples(tokenizer: &CharTokenizer, samples: &[ChatSample], max_length: u32) -> Vec<Vec<u32>> {
    samples
        .iter()
        .map(|s| {
            let mut ids = tokenizer.encode(&s.text);
            ids.truncate(max_length as usize);
            ids
        })
        .collect()
}

/// A right-padded batch. Positions at or past a row's length are padding
/// and never contribute to the loss.
#[derive(Debug, Clone)]
pub struct Batch {
    pub input_ids: Vec<Vec<u32>>,
    pub lengths: Vec<usize>,
}

impl Batch {
    #[must_use]
    pub fn collate(seqs: &[&[u32]], pad_id: u32) -> Self {
        let width = seqs.iter().map(|s| s.len()).max().unwrap_or(0);
        let input_ids = seqs
            .iter()
            .map(|s| {
                let mut row = s.to_vec();
                row.resize(width, pad_id);
                row
            })
            .collect();
        Self { input_ids, lengths: seqs.iter().map(|s| s.len()).collect() }
    }

    /// Number of next-token targets in the batch.
    #[must_use]
    pub fn target_count(&self) -> usize {
        self.lengths.iter().map(|l| l.saturating_sub(1)).sum()
    }

    /// `(previous, next)` token pairs over unpadded positions.
    #[must_use]
    pub fn targets(&self) -> (Vec<u32>, Vec<u32>) {
        let mut prev = Vec::with_capacity(self.target_count());
        let mut next = Vec::with_capacity(self.target_count());
        for (row, &len) in self.input_ids.iter().zip(&self.lengths) {
            for pair in row[..len].windows(2) {
                prev.push(pair[0]);
                next.push(pair[1]);
            }
        }
        (prev, next)
    }

    /// Mean next-token loss, or `None` when no row has a target.
    pub fn loss(&self, model: &BigramLm, rng: Option<&mut StdRng>) -> candle_core::Result<Option<Tensor>> {
        let (prev, next) = self.targets();
        if prev.is_empty() {
            return Ok(None);
        }
        model.loss(&prev, &next, rng).map(Some)
    }
}

/// Mean batch loss over `seqs` without dropout.
pub fn evaluate(model: &BigramLm, seqs: &[Vec<u32>], batch_size: usize, pad_id: u32) -> candle_core::Result<f64> {
    let mut losses = Vec::new();
    for chunk in seqs.chunks(batch_size.max(1)) {
        let refs: Vec<&[u32]> = chunk.iter().map(Vec::as_slice).collect();
        if let Some(loss) = Batch::collate(&refs, pad_id).loss(model, None)? {
            losses.push(f64::from(loss.to_scalar::<f32>()?));
        }
    }
    Ok(mean(&losses))
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Scale every gradient so their global L2 norm is at most `max_norm`.
/// Returns the norm before clipping.
pub fn clip_grad_norm(grads: &mut GradStore, vars: &[Var], max_norm: f64) -> candle_core::Result<f64> {
    let mut sum_sq = 0.0f64;
    for var in vars {
        if let Some(g) = grads.get(var) {
            sum_sq += f64::from(g.sqr()?.sum_all()?.to_scalar::<f32>()?);
        }
    }
    let norm = sum_sq.sqrt();
    if norm > max_norm {
        let factor = max_norm / norm;
        for var in vars {
            if let Some(g) = grads.remove(var) {
                grads.insert(var, g.affine(factor, 0.0)?);
            }
        }
    }
    Ok(norm)
}

struct BestModel {
    loss: f64,
    step: u64,
    adapters: HashMap<String, Tensor>,
}

/// Borrowed state the loop trains against.
pub struct TrainLoop<'a> {
    pub model: &'a mut BigramLm,
    pub tokenizer: &'a CharTokenizer,
    pub adapter_config: &'a AdapterConfig,
    pub rng: &'a mut StdRng,
}

impl TrainLoop<'_> {
    pub fn run(
        self,
        settings: &TrainSettings,
        train: &[ChatSample],
        eval: Option<&[ChatSample]>,
        output_dir: &Path,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<TrainOutcome> {
        let Self { model, tokenizer, adapter_config, rng } = self;
        let layout = RunLayout::new(output_dir.to_path_buf());

        let pad_id = tokenizer.pad_id();
        let batch_size = settings.batch_size.max(1) as usize;
        let accumulation = settings.gradient_accumulation_steps.max(1) as usize;
        let train_seqs = encode_samples(tokenizer, train, settings.max_length);
        let eval_seqs = eval.map(|e| encode_samples(tokenizer, e, settings.max_length));

        let total_steps = settings.total_steps(train.len());
        let schedule = LrSchedule::new(
            settings.lr_scheduler,
            settings.learning_rate,
            settings.warmup_steps(total_steps),
            total_steps,
        );
        let vars = model.trainable_vars();
        let params = ParamsAdamW {
            lr: settings.learning_rate,
            weight_decay: settings.weight_decay,
            ..ParamsAdamW::default()
        };
        let mut optimizer = AdamW::new(vars.clone(), params).map_err(tensor_error)?;
        let mut steps = 0u64;

        progress.on_event(ProgressEvent::TrainingStarted { total_steps });
        tracing::info!(total_steps, train = train.len(), "starting training loop");

        let mut state = TrainerState::default();
        let mut order: Vec<usize> = (0..train_seqs.len()).collect();
        let mut pending: Option<Tensor> = None;
        let mut micro_batches = 0usize;
        let mut micro_losses: Vec<f64> = Vec::new();
        let mut step_losses: Vec<f64> = Vec::new();
        let mut log_window: Vec<f64> = Vec::new();
        let mut best: Option<BestModel> = None;
        let mut best_checkpoint: Option<PathBuf> = None;
        let mut evals_without_improvement = 0u32;
        let mut stopped_early = false;

        'epochs: for epoch in 0..settings.epochs {
            order.shuffle(&mut *rng);
            let n_batches = order.len().div_ceil(batch_size);

            for (bi, chunk) in order.chunks(batch_size).enumerate() {
                let seqs: Vec<&[u32]> = chunk.iter().map(|&i| train_seqs[i].as_slice()).collect();
                let batch = Batch::collate(&seqs, pad_id);
                if let Some(loss) = batch.loss(model, Some(&mut *rng)).map_err(tensor_error)? {
                    micro_losses.push(f64::from(loss.to_scalar::<f32>().map_err(tensor_error)?));
                    let scaled = loss.affine(1.0 / accumulation as f64, 0.0).map_err(tensor_error)?;
                    pending = Some(match pending.take() {
                        Some(acc) => acc.add(&scaled).map_err(tensor_error)?,
                        None => scaled,
                    });
                }
                micro_batches += 1;

                if micro_batches < accumulation && bi + 1 < n_batches {
                    continue;
                }
                micro_batches = 0;
                let Some(accumulated) = pending.take() else {
                    continue;
                };

                let mut grads = accumulated.backward().map_err(tensor_error)?;
                clip_grad_norm(&mut grads, &vars, settings.max_grad_norm).map_err(tensor_error)?;
                let lr = schedule.lr_at(steps);
                optimizer.set_learning_rate(lr);
                optimizer.step(&grads).map_err(tensor_error)?;
                steps += 1;

                let step = steps;
                let step_loss = mean(&micro_losses);
                micro_losses.clear();
                step_losses.push(step_loss);
                log_window.push(step_loss);
                progress.on_event(ProgressEvent::StepCompleted { step, loss: step_loss });

                let epoch_progress = f64::from(epoch) + (bi + 1) as f64 / n_batches as f64;
                state.global_step = step;
                state.epoch = epoch_progress;

                if step % settings.logging_steps == 0 {
                    let window_loss = mean(&log_window);
                    log_window.clear();
                    state.log_history.push(LogEntry {
                        step,
                        epoch: epoch_progress,
                        loss: Some(window_loss),
                        learning_rate: Some(lr),
                        ..LogEntry::default()
                    });
                    progress.on_event(ProgressEvent::Step {
                        step,
                        total: total_steps,
                        loss: window_loss,
                        learning_rate: lr,
                        epoch: epoch_progress,
                    });
                }

                let mut should_stop = false;
                if let (Some(every), Some(eval_seqs)) = (settings.eval_steps, eval_seqs.as_ref()) {
                    if step % every == 0 {
                        let eval_loss = evaluate(model, eval_seqs, batch_size, pad_id).map_err(tensor_error)?;
                        progress.on_event(ProgressEvent::Eval { step, loss: eval_loss });
                        state.log_history.push(LogEntry {
                            step,
                            epoch: epoch_progress,
                            eval_loss: Some(eval_loss),
                            ..LogEntry::default()
                        });

                        if best.as_ref().is_none_or(|b| eval_loss < b.loss) {
                            best = Some(BestModel { loss: eval_loss, step, adapters: model.snapshot_adapters()? });
                            state.best_metric = Some(eval_loss);
                            evals_without_improvement = 0;
                        } else {
                            evals_without_improvement += 1;
                            if settings.early_stopping_patience.is_some_and(|p| evals_without_improvement >= p) {
                                should_stop = true;
                            }
                        }
                    }
                }

                if step % settings.save_steps == 0 {
                    let dir = layout.checkpoint_dir(step);
                    if best.as_ref().is_some_and(|b| b.step == step) {
                        best_checkpoint = Some(dir.clone());
                        state.best_model_checkpoint = Some(dir.clone());
                    }
                    save_checkpoint(&dir, adapter_config, model, &state)?;
                    rotate_checkpoints(output_dir, settings.save_total_limit, best_checkpoint.as_deref())?;
                    progress.on_event(ProgressEvent::Checkpoint { step, path: dir });
                }

                if should_stop {
                    tracing::info!(step, "early stopping: eval loss stopped improving");
                    progress.on_event(ProgressEvent::EarlyStopped { step });
                    stopped_early = true;
                    break 'epochs;
                }
            }
        }

        if settings.load_best_model_at_end {
            if let Some(best) = &best {
                tracing::info!(step = best.step, loss = best.loss, "restoring best adapter");
                model.restore_adapters(&best.adapters)?;
            }
        }

        let outcome = TrainOutcome {
            train_loss: mean(&step_losses),
            steps,
            stopped_early,
            best_eval_loss: best.map(|b| b.loss),
        };
        progress.on_event(ProgressEvent::TrainingFinished { steps: outcome.steps, train_loss: outcome.train_loss });
        Ok(outcome)
    }
}
