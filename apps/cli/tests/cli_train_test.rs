//! Integration tests for the `finetune` command.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Command isolated from the user's home config and model root.
fn finetune(temp: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("finetune").unwrap();
    cmd.current_dir(temp.path()).env("HOME", temp.path()).env_remove("FINETUNE_MODEL_ROOT");
    cmd
}

fn write_dataset(path: &Path, n: usize) {
    let lines: Vec<String> = (0..n)
        .map(|i| format!(r#"{{"prompt": "User: question {i}", "completion": "Assistant: answer {i}"}}"#))
        .collect();
    fs::write(path, lines.join("\n")).unwrap();
}

fn bootstrap_model(temp: &TempDir) -> PathBuf {
    let corpus = temp.path().join("corpus.txt");
    fs::write(&corpus, "user assistant question answer 0123456789\n".repeat(10)).unwrap();
    let root = temp.path().join("models");

    finetune(temp)
        .args(["base", "--text"])
        .arg(&corpus)
        .args(["--name", "tiny", "--dim", "8", "--model-root"])
        .arg(&root)
        .assert()
        .success()
        .stdout(predicate::str::contains("Base model ready"));
    root
}

fn run_dirs(output: &Path) -> Vec<PathBuf> {
    fs::read_dir(output)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.file_name().unwrap().to_string_lossy().starts_with("finetune_"))
        .collect()
}

#[test]
fn test_missing_data_file_exits_1() {
    let temp = TempDir::new().unwrap();
    let output = temp.path().join("out");

    finetune(&temp)
        .arg("--data")
        .arg(temp.path().join("missing.jsonl"))
        .arg("--output")
        .arg(&output)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("data file not found"));

    assert!(!output.exists());
}

#[test]
fn test_empty_dataset_exits_1() {
    let temp = TempDir::new().unwrap();
    let data = temp.path().join("data.jsonl");
    fs::write(&data, "{\"prompt\": \"\", \"completion\": \"hi\"}\nnot json\n").unwrap();
    let output = temp.path().join("out");

    finetune(&temp)
        .arg("--data")
        .arg(&data)
        .arg("--output")
        .arg(&output)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("no valid training records"));

    assert!(!output.exists());
}

#[test]
fn test_data_flag_is_required() {
    let temp = TempDir::new().unwrap();
    finetune(&temp).assert().failure().stderr(predicate::str::contains("--data"));
}

#[test]
fn test_unknown_scheduler_rejected() {
    let temp = TempDir::new().unwrap();
    finetune(&temp)
        .args(["--data", "d.jsonl", "--lr-scheduler", "bogus"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown lr scheduler"));
}

#[test]
fn test_unknown_log_level_rejected() {
    let temp = TempDir::new().unwrap();
    finetune(&temp)
        .args(["--log-level", "loud", "--data", "d.jsonl"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--log-level"));
}

#[test]
fn test_unknown_log_level_in_config_exits_1() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join(".finetunerc"), "log_level = \"loud\"\n").unwrap();
    finetune(&temp)
        .args(["--data", "d.jsonl"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid log_level 'loud'"));
}

#[test]
fn test_unknown_model_exits_1() {
    let temp = TempDir::new().unwrap();
    let data = temp.path().join("data.jsonl");
    write_dataset(&data, 3);

    let output = temp.path().join("out");

    finetune(&temp)
        .arg("--data")
        .arg(&data)
        .args(["--model", "nope", "--output"])
        .arg(&output)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("model not found"));

    assert!(!output.exists() || run_dirs(&output).is_empty());
}

#[test]
fn test_full_run_with_export() {
    let temp = TempDir::new().unwrap();
    let root = bootstrap_model(&temp);
    let data = temp.path().join("data.jsonl");
    write_dataset(&data, 21);
    let output = temp.path().join("out");

    finetune(&temp)
        .arg("--data")
        .arg(&data)
        .args(["--model", "tiny", "--epochs", "1", "--lora-r", "2", "--export-gguf", "--model-root"])
        .arg(&root)
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("trainable params:"))
        .stdout(predicate::str::contains("train samples: 18, eval samples: 3"))
        .stdout(predicate::str::contains("python -m llama_cpp.convert"))
        .stdout(predicate::str::contains("--outtype q4_k_m"));

    let dirs = run_dirs(&output);
    assert_eq!(dirs.len(), 1);
    let run_dir = &dirs[0];
    assert!(run_dir.join("merged").join("model.safetensors").exists());
    assert!(run_dir.join("merged").join("tokenizer.json").exists());
    assert!(run_dir.join("adapter_model.safetensors").exists());
    assert!(run_dir.join("Modelfile").exists());

    let metadata: serde_json::Value = serde_json::from_slice(&fs::read(run_dir.join("config.json")).unwrap()).unwrap();
    assert_eq!(metadata["base_model"], "tiny");
    assert_eq!(metadata["epochs"], 1);
    assert_eq!(metadata["train_samples"], 21);
    assert_eq!(metadata["device"], "cpu");

    let listed = finetune(&temp).args(["runs", "--json", "--output"]).arg(&output).assert().success();
    let runs: serde_json::Value = serde_json::from_slice(&listed.get_output().stdout).unwrap();
    assert_eq!(runs.as_array().map(Vec::len), Some(1));
    assert_eq!(runs[0]["base_model"], "tiny");
}

#[test]
fn test_config_file_supplies_model() {
    let temp = TempDir::new().unwrap();
    let root = bootstrap_model(&temp);
    let data = temp.path().join("data.jsonl");
    write_dataset(&data, 2);
    fs::write(
        temp.path().join(".finetunerc"),
        format!("model = \"tiny\"\nmodel_root = {:?}\noutput = \"runs\"\n", root.display().to_string()),
    )
    .unwrap();

    finetune(&temp).arg("--data").arg(&data).args(["--epochs", "1"]).assert().success();
    assert_eq!(run_dirs(&temp.path().join("runs")).len(), 1);
}

#[test]
fn test_runs_on_empty_output() {
    let temp = TempDir::new().unwrap();
    finetune(&temp)
        .args(["runs", "--output"])
        .arg(temp.path().join("nothing"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Fine-tuning runs (0)"));
}
