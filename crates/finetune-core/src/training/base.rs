//! Bootstrap a native base model from local text files.
//!
//! The base model encodes smoothed bigram statistics: with centred
//! log-probabilities `L` and a matrix `H` with orthonormal rows, the
//! embeddings are `E = L·Hᵀ / 1.5` and `lm_head = H`. With `v_proj = I`
//! and `o_proj = 0.5·I` the residual path scales by 1.5, so the logits
//! reproduce `L` projected onto the row space of `H`.

use crate::training::model::{ARCHITECTURE, BigramLm, ModelConfig, ModelWeights, scaled_identity};
use crate::training::tensor_error;
use crate::training::tokenizer::CharTokenizer;
use candle_core::{Device, Tensor};
use finetune_training::{TrainingError, TrainingResult};
use ignore::WalkBuilder;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

const RESIDUAL_SCALE: f64 = 1.5;

#[derive(Debug, Clone)]
pub struct BaseModelOptions {
    /// Hidden size; clamped to the vocabulary size.
    pub dim: usize,
    pub seed: u64,
    pub max_files: usize,
    pub max_bytes_per_file: u64,
    pub include_extensions: Vec<&'static str>,
}

impl Default for BaseModelOptions {
    fn default() -> Self {
        Self {
            dim: 64,
            seed: 42,
            max_files: 200,
            max_bytes_per_file: 1_000_000,
            include_extensions: vec!["md", "txt", "jsonl", "json", "rs", "py", "toml"],
        }
    }
}

#[derive(Debug, Clone)]
pub struct BaseModelSummary {
    pub dir: PathBuf,
    pub files: usize,
    pub chars: usize,
    pub vocab_size: usize,
    pub dim: usize,
}

/// Build a base model from `paths` and write it to `<model_root>/<name>`.
pub fn bootstrap_base_model(
    paths: &[PathBuf],
    model_root: &Path,
    name: &str,
    options: &BaseModelOptions,
) -> TrainingResult<BaseModelSummary> {
    if name.trim().is_empty() {
        return Err(TrainingError::InvalidSpec("base model name must not be empty".to_string()));
    }

    let files = collect_text_files(paths, options)?;
    let mut corpus = String::new();
    let mut used = 0;
    for path in &files {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                corpus.push_str(&text.replace("\r\n", "\n"));
                corpus.push('\n');
                used += 1;
            }
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable file"),
        }
    }
    if corpus.trim().is_empty() {
        return Err(TrainingError::Dataset("no text found in the given paths".to_string()));
    }

    let chars: BTreeSet<char> = corpus.chars().collect();
    let tokenizer = CharTokenizer::from_chars(chars);
    let (config, weights) = bigram_weights(&tokenizer, &corpus, options.dim, options.seed).map_err(tensor_error)?;
    let (vocab_size, dim) = (config.vocab_size, config.hidden_size);
    let model = BigramLm::from_weights(config, weights)?;

    let dir = model_root.join(name);
    std::fs::create_dir_all(&dir)?;
    model.save(&dir)?;
    tokenizer.save(&dir)?;

    tracing::info!(dir = %dir.display(), vocab_size, dim, files = used, "base model written");
    Ok(BaseModelSummary { dir, files: used, chars: corpus.chars().count(), vocab_size, dim })
}

fn collect_text_files(paths: &[PathBuf], options: &BaseModelOptions) -> TrainingResult<Vec<PathBuf>> {
    if paths.is_empty() {
        return Err(TrainingError::InvalidSpec("text file paths must not be empty".to_string()));
    }

    let mut files = Vec::new();
    for root in paths {
        if root.is_file() {
            files.push(root.clone());
            continue;
        }
        if !root.exists() {
            return Err(TrainingError::Dataset(format!("path does not exist: {}", root.display())));
        }

        for entry in WalkBuilder::new(root).follow_links(false).build() {
            let Ok(entry) = entry else { continue };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let path = entry.path();
            if !is_allowed_extension(path, &options.include_extensions) {
                continue;
            }
            if path.metadata().is_ok_and(|md| md.len() > options.max_bytes_per_file) {
                continue;
            }
            files.push(path.to_path_buf());
        }
    }

    files.sort();
    files.dedup();
    files.truncate(options.max_files);
    Ok(files)
}

fn is_allowed_extension(path: &Path, allowed: &[&'static str]) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let ext = ext.to_lowercase();
    allowed.iter().any(|a| *a == ext)
}

/// Laplace-smoothed bigram log-probabilities, each row centred to zero mean.
fn centred_log_probs(tokenizer: &CharTokenizer, corpus: &str) -> candle_core::Result<Tensor> {
    let v = tokenizer.vocab_size();
    let mut counts = vec![1.0f32; v * v];
    let ids = tokenizer.encode(corpus);
    for pair in ids.windows(2) {
        counts[pair[0] as usize * v + pair[1] as usize] += 1.0;
    }

    let counts = Tensor::from_vec(counts, (v, v), &Device::Cpu)?;
    let log_probs = counts.broadcast_div(&counts.sum_keepdim(1)?)?.log()?;
    log_probs.broadcast_sub(&log_probs.mean_keepdim(1)?)
}

/// `dim` orthonormal rows of length `width` by Gram-Schmidt over random vectors.
fn orthonormal_rows(dim: usize, width: usize, rng: &mut StdRng) -> candle_core::Result<Tensor> {
    let mut rows: Vec<Vec<f32>> = Vec::with_capacity(dim);
    while rows.len() < dim {
        let mut v: Vec<f32> = (0..width).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
        for prev in &rows {
            let p: f32 = v.iter().zip(prev).map(|(x, y)| x * y).sum();
            for (x, y) in v.iter_mut().zip(prev) {
                *x -= p * y;
            }
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm < 1e-3 {
            continue;
        }
        rows.push(v.into_iter().map(|x| x / norm).collect());
    }
    Tensor::from_vec(rows.concat(), (dim, width), &Device::Cpu)
}

fn bigram_weights(
    tokenizer: &CharTokenizer,
    corpus: &str,
    dim: usize,
    seed: u64,
) -> candle_core::Result<(ModelConfig, ModelWeights)> {
    let vocab_size = tokenizer.vocab_size();
    let dim = dim.clamp(1, vocab_size);
    let mut rng = StdRng::seed_from_u64(seed);

    let log_probs = centred_log_probs(tokenizer, corpus)?;
    let head = orthonormal_rows(dim, vocab_size, &mut rng)?;
    let embed_tokens = log_probs.matmul(&head.t()?.contiguous()?)?.affine(1.0 / RESIDUAL_SCALE, 0.0)?;

    let config = ModelConfig { architecture: ARCHITECTURE.to_string(), vocab_size, hidden_size: dim };
    let weights = ModelWeights {
        embed_tokens,
        v_proj: scaled_identity(dim, 1.0, &Device::Cpu)?,
        o_proj: scaled_identity(dim, (RESIDUAL_SCALE - 1.0) as f32, &Device::Cpu)?,
        lm_head: head,
    };
    Ok((config, weights))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_orthonormal_rows() {
        let mut rng = StdRng::seed_from_u64(7);
        let h = orthonormal_rows(4, 6, &mut rng).unwrap();
        let gram = h.matmul(&h.t().unwrap().contiguous().unwrap()).unwrap().to_vec2::<f32>().unwrap();
        for i in 0..4 {
            for j in 0..4 {
                let d = gram[i][j];
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((d - expected).abs() < 1e-4, "row {i}·{j} = {d}");
            }
        }
    }

    #[test]
    fn test_full_rank_model_reproduces_bigram_statistics() {
        let corpus = "abababab";
        let tokenizer = CharTokenizer::from_chars(['a', 'b']);
        let (config, weights) = bigram_weights(&tokenizer, corpus, 1000, 1).unwrap();
        assert_eq!(config.hidden_size, tokenizer.vocab_size());

        let model = BigramLm::from_weights(config, weights).unwrap();
        let a = tokenizer.id("a").unwrap();
        let b = tokenizer.id("b").unwrap();
        let log_probs = model.next_token_log_probs(a).unwrap();
        let best = log_probs
            .iter()
            .enumerate()
            .max_by(|x, y| x.1.total_cmp(y.1))
            .map(|(i, _)| i as u32)
            .unwrap();
        assert_eq!(best, b);
    }

    #[test]
    fn test_bootstrap_writes_loadable_model() {
        let temp = TempDir::new().unwrap();
        let texts = temp.path().join("texts");
        std::fs::create_dir_all(texts.join("nested")).unwrap();
        std::fs::write(texts.join("a.txt"), "hello world").unwrap();
        std::fs::write(texts.join("nested/b.md"), "你好").unwrap();
        std::fs::write(texts.join("skip.bin"), "zzzz").unwrap();

        let root = temp.path().join("models");
        let summary =
            bootstrap_base_model(&[texts], &root, "tiny", &BaseModelOptions { dim: 4, ..Default::default() }).unwrap();
        assert_eq!(summary.files, 2);
        assert_eq!(summary.dim, 4);

        let model = BigramLm::load(&summary.dir).unwrap();
        let tokenizer = CharTokenizer::load(&summary.dir).unwrap();
        assert_eq!(model.vocab_size(), tokenizer.vocab_size());
        assert_eq!(tokenizer.id("z"), None);
        assert!(tokenizer.id("你").is_some());
    }

    #[test]
    fn test_bootstrap_rejects_empty_corpus() {
        let temp = TempDir::new().unwrap();
        let empty = temp.path().join("empty.txt");
        std::fs::write(&empty, "  \n").unwrap();
        let err = bootstrap_base_model(&[empty], temp.path(), "x", &BaseModelOptions::default()).unwrap_err();
        assert!(matches!(err, TrainingError::Dataset(_)));
    }
}
