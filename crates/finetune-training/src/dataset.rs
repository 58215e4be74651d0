use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Role labels removed from prompts before templating.
pub const USER_LABELS: [&str; 2] = ["用户: ", "User: "];

/// Role labels removed from completions before templating.
pub const ASSISTANT_LABELS: [&str; 2] = ["助手: ", "Assistant: "];

pub const TURN_START: &str = "<|im_start|>";
pub const TURN_END: &str = "<|im_end|>";

/// Stable identifier for a dataset (content hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetId(pub String);

/// A single prompt/completion record as it appears in the JSONL input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrainingExample {
    pub prompt: String,
    pub completion: String,
}

impl TrainingExample {
    /// Read `prompt` / `completion` from a parsed JSON line. Missing or
    /// non-string fields read as empty.
    #[must_use]
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let obj = value.as_object()?;
        let field = |name: &str| obj.get(name).and_then(|v| v.as_str()).unwrap_or_default().to_string();
        Some(Self { prompt: field("prompt"), completion: field("completion") })
    }

    /// Chat-templated text for this record, or `None` when the record is
    /// excluded.
    #[must_use]
    pub fn to_sample(&self) -> Option<ChatSample> {
        format_chat(&self.prompt, &self.completion).map(|text| ChatSample { text })
    }
}

/// One templated training string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSample {
    pub text: String,
}

pub type ChatDataset = Vec<ChatSample>;

fn strip_labels(text: &str, labels: &[&str]) -> String {
    labels.iter().fold(text.to_string(), |acc, label| acc.replace(label, ""))
}

/// Format a prompt/completion pair into a single chat-turn string.
///
/// Returns `None` when either raw field is blank. Blankness is judged
/// before role labels are removed, so a label-only field is kept.
#[must_use]
pub fn format_chat(prompt: &str, completion: &str) -> Option<String> {
    if prompt.trim().is_empty() || completion.trim().is_empty() {
        return None;
    }

    let prompt = strip_labels(prompt, &USER_LABELS);
    let completion = strip_labels(completion, &ASSISTANT_LABELS);

    Some(format!(
        "{TURN_START}user\n{prompt}{TURN_END}\n{TURN_START}assistant\n{completion}{TURN_END}"
    ))
}

/// Parse JSONL content into templated samples, preserving line order.
///
/// Lines that are not JSON objects are skipped with a warning.
#[must_use]
pub fn parse_jsonl(contents: &str) -> ChatDataset {
    let mut dataset = Vec::new();

    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let value: serde_json::Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(line = idx + 1, error = %e, "skipping malformed jsonl line");
                continue;
            }
        };

        let Some(example) = TrainingExample::from_value(&value) else {
            tracing::warn!(line = idx + 1, "skipping jsonl line that is not an object");
            continue;
        };

        if let Some(sample) = example.to_sample() {
            dataset.push(sample);
        }
    }

    dataset
}

/// Load a JSONL prompt/completion file.
///
/// Fails with `DataNotFound` when the file is missing and `EmptyDataset`
/// when no record survives filtering.
pub fn load_jsonl(path: &Path) -> TrainingResult<ChatDataset> {
    if !path.is_file() {
        return Err(TrainingError::DataNotFound(path.to_path_buf()));
    }

    let contents = std::fs::read_to_string(path)?;
    let dataset = parse_jsonl(&contents);
    tracing::info!(count = dataset.len(), path = %path.display(), "loaded training records");

    if dataset.is_empty() {
        return Err(TrainingError::EmptyDataset(path.to_path_buf()));
    }

    Ok(dataset)
}

pub fn compute_dataset_id(samples: &[ChatSample]) -> DatasetId {
    let mut hasher = Sha256::new();

    for sample in samples {
        hasher.update(sample.text.as_bytes());
        hasher.update(b"\n");
    }

    DatasetId(hex::encode(hasher.finalize()))
}
