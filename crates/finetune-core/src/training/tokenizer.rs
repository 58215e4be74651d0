//! Character-level tokenizer with whole-token chat delimiters.

use finetune_training::dataset::{TURN_END, TURN_START};
use finetune_training::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub const EOS_TOKEN: &str = "<|endoftext|>";
pub const UNK_TOKEN: &str = "<unk>";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// On-disk form of the tokenizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenizerFile {
    vocab: Vec<String>,
    special_tokens: Vec<String>,
    eos_token: String,
    unk_token: String,
    #[serde(default)]
    pad_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CharTokenizer {
    vocab: Vec<String>,
    special_tokens: Vec<String>,
    eos_token: String,
    unk_token: String,
    pad_token: Option<String>,
    index: HashMap<String, u32>,
}

impl CharTokenizer {
    /// Build a vocabulary from the characters in `chars` plus the chat,
    /// end-of-text and unknown tokens. Character order is kept as given.
    #[must_use]
    pub fn from_chars(chars: impl IntoIterator<Item = char>) -> Self {
        let special_tokens: Vec<String> =
            [TURN_START, TURN_END, EOS_TOKEN, UNK_TOKEN].map(String::from).to_vec();
        let mut vocab = special_tokens.clone();
        for ch in chars {
            let s = ch.to_string();
            if !vocab.contains(&s) {
                vocab.push(s);
            }
        }
        Self::from_parts(TokenizerFile {
            vocab,
            special_tokens,
            eos_token: EOS_TOKEN.to_string(),
            unk_token: UNK_TOKEN.to_string(),
            pad_token: None,
        })
    }

    fn from_parts(file: TokenizerFile) -> Self {
        let index = file.vocab.iter().enumerate().map(|(i, t)| (t.clone(), i as u32)).collect();
        Self {
            vocab: file.vocab,
            special_tokens: file.special_tokens,
            eos_token: file.eos_token,
            unk_token: file.unk_token,
            pad_token: file.pad_token,
            index,
        }
    }

    pub fn load(dir: &Path) -> TrainingResult<Self> {
        let path = dir.join(TOKENIZER_FILE);
        let bytes = std::fs::read(&path)?;
        let file: TokenizerFile = serde_json::from_slice(&bytes)?;
        if file.special_tokens.iter().any(String::is_empty) {
            return Err(TrainingError::Backend(format!("{} has an empty special token", path.display())));
        }
        let tokenizer = Self::from_parts(file);

        for required in [&tokenizer.eos_token, &tokenizer.unk_token] {
            if !tokenizer.index.contains_key(required) {
                return Err(TrainingError::Backend(format!(
                    "{} is missing required token {required}",
                    path.display()
                )));
            }
        }
        Ok(tokenizer)
    }

    pub fn save(&self, dir: &Path) -> TrainingResult<()> {
        let file = TokenizerFile {
            vocab: self.vocab.clone(),
            special_tokens: self.special_tokens.clone(),
            eos_token: self.eos_token.clone(),
            unk_token: self.unk_token.clone(),
            pad_token: self.pad_token.clone(),
        };
        std::fs::write(dir.join(TOKENIZER_FILE), serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    #[must_use]
    pub fn pad_token(&self) -> Option<&str> {
        self.pad_token.as_deref()
    }

    /// Use the end-of-text token for padding when none is configured.
    pub fn ensure_pad_token(&mut self) {
        if self.pad_token.is_none() {
            self.pad_token = Some(self.eos_token.clone());
        }
    }

    #[must_use]
    pub fn pad_id(&self) -> u32 {
        let token = self.pad_token.as_ref().unwrap_or(&self.eos_token);
        self.id(token).unwrap_or_else(|| self.unk_id())
    }

    #[must_use]
    pub fn unk_id(&self) -> u32 {
        self.index.get(&self.unk_token).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn id(&self, token: &str) -> Option<u32> {
        self.index.get(token).copied()
    }

    /// Encode text, matching special tokens before single characters.
    #[must_use]
    pub fn encode(&self, text: &str) -> Vec<u32> {
        let mut ids = Vec::with_capacity(text.len());
        let mut rest = text;

        'outer: while !rest.is_empty() {
            for special in &self.special_tokens {
                if let Some(tail) = rest.strip_prefix(special.as_str()) {
                    if let Some(id) = self.id(special) {
                        ids.push(id);
                        rest = tail;
                        continue 'outer;
                    }
                }
            }

            let mut chars = rest.chars();
            if let Some(ch) = chars.next() {
                let mut buf = [0u8; 4];
                ids.push(self.id(ch.encode_utf8(&mut buf)).unwrap_or_else(|| self.unk_id()));
            }
            rest = chars.as_str();
        }

        ids
    }
}
