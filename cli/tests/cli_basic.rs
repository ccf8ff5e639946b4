//! Basic CLI integration tests
//!
//! Exercises the `analyze` subcommand end to end against small on-disk
//! fixtures, checking exit codes and the shape of the printed output.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

// ============================================================================
// Help and Version
// ============================================================================

#[test]
fn test_help() {
    Command::cargo_bin("tagmetry")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("tag-health analytics"));
}

#[test]
fn test_analyze_help() {
    Command::cargo_bin("tagmetry")
        .unwrap()
        .args(&["analyze", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Run the full analysis pipeline"));
}

#[test]
fn test_version() {
    Command::cargo_bin("tagmetry")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tagmetry"));
}

// ============================================================================
// Analyze Command
// ============================================================================

#[test]
fn test_analyze_empty_dataset_json() {
    let dir = tempfile::tempdir().unwrap();

    let output = Command::cargo_bin("tagmetry")
        .unwrap()
        .args(&["analyze", dir.path().to_str().unwrap(), "--json"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["state"], "Completed");
    assert!(json["outputs"]["datasetJsonl"].is_string());
}

#[test]
fn test_analyze_missing_directory_fails() {
    Command::cargo_bin("tagmetry")
        .unwrap()
        .args(&["analyze", "/nonexistent/tagmetry-cli-test-xyz", "--json"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn test_analyze_writes_artifacts_to_custom_output_dir() {
    let dataset_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();

    let img = image::RgbImage::new(4, 4);
    img.save(dataset_dir.path().join("sample.png")).unwrap();
    fs::write(dataset_dir.path().join("sample.txt"), "a cat, cute").unwrap();

    Command::cargo_bin("tagmetry")
        .unwrap()
        .args(&[
            "analyze",
            dataset_dir.path().to_str().unwrap(),
            "--output",
            output_dir.path().to_str().unwrap(),
            "--json",
        ])
        .assert()
        .success();

    assert!(output_dir.path().join("dataset.jsonl").exists());
    assert!(output_dir.path().join("metrics.json").exists());
    assert!(output_dir.path().join("duplicates.json").exists());
}

#[test]
fn test_analyze_invalid_thresholds_is_bad_arguments() {
    let dir = tempfile::tempdir().unwrap();

    Command::cargo_bin("tagmetry")
        .unwrap()
        .args(&[
            "analyze",
            dir.path().to_str().unwrap(),
            "--likely-threshold",
            "20",
            "--maybe-threshold",
            "5",
            "--json",
        ])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("BadArguments"));
}

#[test]
fn test_analyze_rejects_malformed_ruleset_file() {
    let dataset_dir = tempfile::tempdir().unwrap();
    let rules_path = dataset_dir.path().join("rules.json");
    fs::write(&rules_path, "{ not json").unwrap();

    Command::cargo_bin("tagmetry")
        .unwrap()
        .args(&[
            "analyze",
            dataset_dir.path().to_str().unwrap(),
            "--rules",
            rules_path.to_str().unwrap(),
            "--json",
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("InvalidRuleset"));
}

#[test]
fn test_analyze_human_output_on_non_tty_without_json_flag() {
    // stdout is piped (not a TTY) under assert_cmd, so output falls back to JSON
    // even without --json.
    let dir = tempfile::tempdir().unwrap();

    let output = Command::cargo_bin("tagmetry")
        .unwrap()
        .args(&["analyze", dir.path().to_str().unwrap()])
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["state"], "Completed");
}
