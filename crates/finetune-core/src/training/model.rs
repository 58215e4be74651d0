//! Bigram language model with named projections and LoRA adapters.
//!
//! For a previous token `p` the model computes
//! `h = E[p]`, `r = h + o_proj(v_proj(h))`, `logits = lm_head(r)`.
//! Base weights are plain tensors. Adapter matrices are `Var`s registered in
//! a `VarMap`, so `backward()` only produces gradients for them.

use crate::training::tensor_error;
use candle_core::{D, DType, Device, Tensor, Var};
use candle_nn::VarMap;
use finetune_training::{LoraSettings, TrainingError, TrainingResult};
use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub const MODEL_CONFIG_FILE: &str = "config.json";
pub const MODEL_WEIGHTS_FILE: &str = "model.safetensors";
pub const ARCHITECTURE: &str = "bigram-lm";

/// Adaptable projections, in name order.
pub const PROJECTIONS: [&str; 3] = ["lm_head", "o_proj", "v_proj"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub architecture: String,
    pub vocab_size: usize,
    pub hidden_size: usize,
}

/// `ΔW = scaling · A · B` with `A: in×r`, `B: r×out`.
#[derive(Debug, Clone)]
pub struct LoraAdapter {
    pub a: Var,
    pub b: Var,
    pub scaling: f64,
    pub dropout: f32,
}

impl LoraAdapter {
    /// `A` uniform in `±1/sqrt(in)`, `B` zero, so the adapter starts as a no-op.
    pub fn new(
        in_dim: usize,
        out_dim: usize,
        settings: &LoraSettings,
        rng: &mut StdRng,
        device: &Device,
    ) -> candle_core::Result<Self> {
        let r = settings.r as usize;
        let bound = 1.0 / (in_dim as f32).sqrt();
        let a: Vec<f32> = (0..in_dim * r).map(|_| rng.gen_range(-bound..=bound)).collect();
        Ok(Self {
            a: Var::from_tensor(&Tensor::from_vec(a, (in_dim, r), device)?)?,
            b: Var::zeros((r, out_dim), DType::F32, device)?,
            scaling: f64::from(settings.scaling()),
            dropout: settings.dropout,
        })
    }

    pub fn delta(&self) -> candle_core::Result<Tensor> {
        self.a.as_tensor().matmul(self.b.as_tensor())?.affine(self.scaling, 0.0)
    }

    #[must_use]
    pub fn num_params(&self) -> usize {
        self.a.elem_count() + self.b.elem_count()
    }
}

/// `scale · I` of size `n`.
pub fn scaled_identity(n: usize, scale: f32, device: &Device) -> candle_core::Result<Tensor> {
    let data: Vec<f32> = (0..n * n).map(|i| if i / n == i % n { scale } else { 0.0 }).collect();
    Tensor::from_vec(data, (n, n), device)
}

/// Inverted-dropout mask drawn from the training rng.
fn dropout_mask(dims: &[usize], p: f32, rng: &mut StdRng, device: &Device) -> candle_core::Result<Tensor> {
    let keep = 1.0 / (1.0 - p);
    let n = dims.iter().product();
    let data: Vec<f32> = (0..n).map(|_| if rng.gen_range(0.0..1.0) < p { 0.0 } else { keep }).collect();
    Tensor::from_vec(data, dims, device)
}

#[derive(Debug, Clone)]
pub struct Projection {
    pub weight: Tensor,
    pub adapter: Option<LoraAdapter>,
}

impl Projection {
    fn new(weight: Tensor) -> Self {
        Self { weight, adapter: None }
    }

    fn forward(&self, x: &Tensor, rng: Option<&mut StdRng>) -> candle_core::Result<Tensor> {
        let y = x.matmul(&self.weight)?;
        let Some(adapter) = &self.adapter else {
            return Ok(y);
        };

        let x = match rng {
            Some(rng) if adapter.dropout > 0.0 => x.mul(&dropout_mask(x.dims(), adapter.dropout, rng, x.device())?)?,
            _ => x.clone(),
        };
        let update = x.matmul(adapter.a.as_tensor())?.matmul(adapter.b.as_tensor())?.affine(adapter.scaling, 0.0)?;
        y.add(&update)
    }

    /// Fold the adapter into the base weight and drop it.
    fn merge(&mut self) -> candle_core::Result<()> {
        if let Some(adapter) = self.adapter.take() {
            self.weight = self.weight.add(&adapter.delta()?)?.copy()?;
        }
        Ok(())
    }
}

/// Base (or merged) weights, laid out `in × out`.
#[derive(Debug, Clone)]
pub struct ModelWeights {
    pub embed_tokens: Tensor,
    pub v_proj: Tensor,
    pub o_proj: Tensor,
    pub lm_head: Tensor,
}

impl ModelWeights {
    fn from_safetensors(mut tensors: HashMap<String, Tensor>) -> TrainingResult<Self> {
        let mut take = |name: &str| {
            tensors
                .remove(&format!("{name}.weight"))
                .ok_or_else(|| TrainingError::Backend(format!("{MODEL_WEIGHTS_FILE} is missing {name}.weight")))
        };
        Ok(Self { embed_tokens: take("embed_tokens")?, v_proj: take("v_proj")?, o_proj: take("o_proj")?, lm_head: take("lm_head")? })
    }

    fn validate(&self, config: &ModelConfig) -> TrainingResult<()> {
        if config.architecture != ARCHITECTURE {
            return Err(TrainingError::Unsupported(format!("model architecture '{}'", config.architecture)));
        }
        let (v, d) = (config.vocab_size, config.hidden_size);
        let shapes = [
            ("embed_tokens", &self.embed_tokens, v, d),
            ("v_proj", &self.v_proj, d, d),
            ("o_proj", &self.o_proj, d, d),
            ("lm_head", &self.lm_head, d, v),
        ];
        for (name, t, rows, cols) in shapes {
            if t.dims() != [rows, cols].as_slice() || t.dtype() != DType::F32 {
                return Err(TrainingError::Backend(format!(
                    "{name} is {:?} {:?}, expected f32 [{rows}, {cols}]",
                    t.dtype(),
                    t.dims()
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct BigramLm {
    pub config: ModelConfig,
    device: Device,
    pub embed_tokens: Tensor,
    pub v_proj: Projection,
    pub o_proj: Projection,
    pub lm_head: Projection,
    adapters: VarMap,
}

impl BigramLm {
    pub fn from_weights(config: ModelConfig, weights: ModelWeights) -> TrainingResult<Self> {
        weights.validate(&config)?;
        Ok(Self {
            config,
            device: weights.embed_tokens.device().clone(),
            embed_tokens: weights.embed_tokens,
            v_proj: Projection::new(weights.v_proj),
            o_proj: Projection::new(weights.o_proj),
            lm_head: Projection::new(weights.lm_head),
            adapters: VarMap::new(),
        })
    }

    pub fn load(dir: &Path) -> TrainingResult<Self> {
        let config: ModelConfig = serde_json::from_slice(&std::fs::read(dir.join(MODEL_CONFIG_FILE))?)?;
        let tensors = candle_core::safetensors::load(dir.join(MODEL_WEIGHTS_FILE), &Device::Cpu).map_err(tensor_error)?;
        Self::from_weights(config, ModelWeights::from_safetensors(tensors)?)
    }

    /// Save base weights. Adapters are not included; merge first to keep them.
    pub fn save(&self, dir: &Path) -> TrainingResult<()> {
        std::fs::write(dir.join(MODEL_CONFIG_FILE), serde_json::to_string_pretty(&self.config)?)?;
        let tensors: HashMap<String, Tensor> = [
            ("embed_tokens", &self.embed_tokens),
            ("v_proj", &self.v_proj.weight),
            ("o_proj", &self.o_proj.weight),
            ("lm_head", &self.lm_head.weight),
        ]
        .into_iter()
        .map(|(name, t)| (format!("{name}.weight"), t.clone()))
        .collect();
        candle_core::safetensors::save(&tensors, dir.join(MODEL_WEIGHTS_FILE)).map_err(tensor_error)
    }

    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }

    fn projections(&self) -> [(&'static str, &Projection); 3] {
        [("lm_head", &self.lm_head), ("o_proj", &self.o_proj), ("v_proj", &self.v_proj)]
    }

    fn projections_mut(&mut self) -> [(&'static str, &mut Projection); 3] {
        [("lm_head", &mut self.lm_head), ("o_proj", &mut self.o_proj), ("v_proj", &mut self.v_proj)]
    }

    /// Attach adapters to every projection named in `settings`.
    ///
    /// Returns the matched names; names the model lacks are ignored, but at
    /// least one must match.
    pub fn inject(&mut self, settings: &LoraSettings, rng: &mut StdRng) -> TrainingResult<Vec<String>> {
        let device = self.device.clone();
        let registry = self.adapters.clone();
        let mut vars = registry.data().lock().map_err(|_| TrainingError::Backend("adapter registry poisoned".to_string()))?;

        let mut matched = Vec::new();
        for (name, proj) in self.projections_mut() {
            if !settings.target_modules.iter().any(|t| t == name) {
                continue;
            }
            let (rows, cols) = proj.weight.dims2().map_err(tensor_error)?;
            let adapter = LoraAdapter::new(rows, cols, settings, rng, &device).map_err(tensor_error)?;
            vars.insert(format!("{name}.lora_A.weight"), adapter.a.clone());
            vars.insert(format!("{name}.lora_B.weight"), adapter.b.clone());
            proj.adapter = Some(adapter);
            matched.push(name.to_string());
        }

        if matched.is_empty() {
            return Err(TrainingError::Backend(format!(
                "none of the target modules {:?} exist in this model (available: {:?})",
                settings.target_modules, PROJECTIONS
            )));
        }
        Ok(matched)
    }

    #[must_use]
    pub fn total_params(&self) -> usize {
        self.embed_tokens.elem_count()
            + self.projections().iter().map(|(_, p)| p.weight.elem_count()).sum::<usize>()
            + self.trainable_params()
    }

    #[must_use]
    pub fn trainable_params(&self) -> usize {
        self.projections().iter().filter_map(|(_, p)| p.adapter.as_ref()).map(LoraAdapter::num_params).sum()
    }

    /// Adapter variables the optimizer updates.
    #[must_use]
    pub fn trainable_vars(&self) -> Vec<Var> {
        self.projections()
            .iter()
            .filter_map(|(_, p)| p.adapter.as_ref())
            .flat_map(|a| [a.a.clone(), a.b.clone()])
            .collect()
    }

    /// Detached copies of the current adapter values, keyed by tensor name.
    pub fn snapshot_adapters(&self) -> TrainingResult<HashMap<String, Tensor>> {
        let vars = self.adapters.data().lock().map_err(|_| TrainingError::Backend("adapter registry poisoned".to_string()))?;
        vars.iter()
            .map(|(name, var)| Ok((name.clone(), var.as_tensor().copy().map_err(tensor_error)?)))
            .collect()
    }

    pub fn restore_adapters(&self, snapshot: &HashMap<String, Tensor>) -> TrainingResult<()> {
        let vars = self.adapters.data().lock().map_err(|_| TrainingError::Backend("adapter registry poisoned".to_string()))?;
        for (name, var) in vars.iter() {
            if let Some(value) = snapshot.get(name) {
                var.set(value).map_err(tensor_error)?;
            }
        }
        Ok(())
    }

    /// Write the adapter variables as safetensors.
    pub fn save_adapters(&self, path: &Path) -> TrainingResult<()> {
        self.adapters.save(path).map_err(tensor_error)
    }

    /// Logits `[n, vocab]` for each previous token in `prev`. `rng` enables
    /// adapter dropout.
    pub fn forward(&self, prev: &Tensor, mut rng: Option<&mut StdRng>) -> candle_core::Result<Tensor> {
        let h = self.embed_tokens.index_select(prev, 0)?;
        let u = self.v_proj.forward(&h, rng.as_deref_mut())?;
        let a = self.o_proj.forward(&u, rng.as_deref_mut())?;
        self.lm_head.forward(&h.add(&a)?, rng)
    }

    /// Mean cross-entropy of predicting each `next[i]` after `prev[i]`.
    pub fn loss(&self, prev: &[u32], next: &[u32], rng: Option<&mut StdRng>) -> candle_core::Result<Tensor> {
        let prev = Tensor::from_slice(prev, prev.len(), &self.device)?;
        let next = Tensor::from_slice(next, next.len(), &self.device)?;
        let logits = self.forward(&prev, rng)?;
        candle_nn::loss::cross_entropy(&logits, &next)
    }

    /// Fold every adapter into its base weight.
    pub fn merge_and_unload(&mut self) -> TrainingResult<()> {
        for (_, proj) in self.projections_mut() {
            proj.merge().map_err(tensor_error)?;
        }
        self.adapters = VarMap::new();
        Ok(())
    }

    /// Next-token log-probabilities after `prev`.
    pub fn next_token_log_probs(&self, prev: u32) -> candle_core::Result<Vec<f32>> {
        let prev = Tensor::new(&[prev], &self.device)?;
        let logits = self.forward(&prev, None)?;
        candle_nn::ops::log_softmax(&logits, D::Minus1)?.squeeze(0)?.to_vec1::<f32>()
    }
}
