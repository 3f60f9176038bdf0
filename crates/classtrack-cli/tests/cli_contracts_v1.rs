#![allow(clippy::single_match_else, clippy::uninlined_format_args)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use serde_json::Value;

fn classtrack_binary_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_classtrack"))
}

fn fixture_record_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../classtrack-parser/tests/data/record.txt")
}

fn classtrack_output(args: &[&str], stdin: Option<&str>) -> Output {
    let mut command = Command::new(classtrack_binary_path());
    command
        .args(args)
        .env_remove("CLASSTRACK_SCHEME")
        .env_remove("RUST_LOG")
        .env_remove("RUST_BACKTRACE")
        .env_remove("RUST_LIB_BACKTRACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => panic!("failed to run classtrack command {:?}: {err}", args),
    };

    if let Some(mut handle) = child.stdin.take() {
        if let Some(body) = stdin {
            if let Err(err) = handle.write_all(body.as_bytes()) {
                panic!("failed writing stdin: {err}");
            }
        }
    }

    match child.wait_with_output() {
        Ok(output) => output,
        Err(err) => panic!("failed waiting for classtrack command {:?}: {err}", args),
    }
}

fn fixture_output(args: &[&str]) -> Output {
    let input = fixture_record_path();
    let input = match input.to_str() {
        Some(value) => value.to_string(),
        None => panic!("fixture path must be valid UTF-8"),
    };
    let mut full = vec!["--input", input.as_str()];
    full.extend_from_slice(args);
    classtrack_output(&full, None)
}

fn stdout_json(output: &Output) -> Value {
    match serde_json::from_slice::<Value>(&output.stdout) {
        Ok(value) => value,
        Err(err) => panic!(
            "failed to parse stdout as JSON: {err}\nstdout={}\nstderr={}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ),
    }
}

fn as_f64(value: &Value) -> f64 {
    match value.as_f64() {
        Some(number) => number,
        None => panic!("expected a number, got {value}"),
    }
}

#[test]
fn help_contract_lists_expected_subcommands() {
    let output = classtrack_output(&["--help"], None);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for required in ["records", "history", "current", "needed"] {
        assert!(
            stdout.contains(required),
            "expected help output to contain subcommand {required}; output={stdout}"
        );
    }
}

#[test]
fn history_json_covers_full_fixture_record() {
    let output = fixture_output(&["history", "--json"]);
    assert!(output.status.success());

    let payload = stdout_json(&output);
    assert_eq!(
        payload["contract_version"],
        Value::String("history.v1".to_string())
    );

    let Some(snapshots) = payload["snapshots"].as_array() else {
        panic!("snapshots must be an array: {payload}");
    };
    assert_eq!(snapshots.len(), 18);
    assert_eq!(snapshots[0]["date"], Value::String("2023-07-15".to_string()));
    assert_eq!(snapshots[17]["date"], Value::String("2025-06-01".to_string()));
    assert!((as_f64(&snapshots[17]["percentage"]) - 96.645_516_666_666_67).abs() < 1e-9);
}

#[test]
fn current_json_reports_grandmaster_standing() {
    let output = fixture_output(&["current", "--json"]);
    assert!(output.status.success());

    let payload = stdout_json(&output);
    assert_eq!(payload["contract_version"], Value::String("current.v1".to_string()));
    assert_eq!(payload["can_score"], Value::Bool(true));
    assert_eq!(payload["standing"]["current_class"], Value::String("GM".to_string()));
    assert_eq!(payload["standing"]["next_class"], Value::Null);
    assert_eq!(payload["entries"].as_array().map(Vec::len), Some(8));
}

#[test]
fn needed_next_class_at_top_band_has_no_target() {
    let output = fixture_output(&["needed", "--next-class", "--json"]);
    assert!(output.status.success());

    let payload = stdout_json(&output);
    assert_eq!(payload["target_class"], Value::Null);
    assert_eq!(payload["score_needed"], Value::Null);
}

#[test]
fn needed_target_evicts_earliest_result_of_full_window() {
    let output = fixture_output(&["needed", "--target", "99", "--json"]);
    assert!(output.status.success());

    let payload = stdout_json(&output);
    assert!((as_f64(&payload["score_needed"]) - 106.8715).abs() < 1e-6);
    assert_eq!(payload["achievable"], Value::Bool(false));
}

#[test]
fn table_input_is_read_from_stdin() {
    let table = "3/03/24 \t23-01 \tClub \tY \t100.0000 \t10.3250\n\
                 3/04/24 \t23-02 \tClub \tD \t40.0000 \t5.0000\n";
    let output = classtrack_output(&["records", "--json"], Some(table));
    assert!(output.status.success());

    let payload = stdout_json(&output);
    assert_eq!(payload["contract_version"], Value::String("records.v1".to_string()));
    assert_eq!(payload["records"].as_array().map(Vec::len), Some(2));
}

#[test]
fn missing_input_file_exits_non_zero() {
    let output = classtrack_output(
        &["--input", "/nonexistent/classtrack/record.txt", "history"],
        None,
    );
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("failed reading input"),
        "expected stable error shape, got stderr={stderr}"
    );
}

#[test]
fn invalid_scheme_file_exits_non_zero() {
    let scheme_path = std::env::temp_dir().join(format!(
        "classtrack-contract-scheme-{}.json",
        std::process::id()
    ));
    if let Err(err) = std::fs::write(&scheme_path, r#"{"max_dropped": 8}"#) {
        panic!("failed writing scheme fixture: {err}");
    }
    let scheme_arg = scheme_path.to_str().unwrap_or("").to_string();

    let output = classtrack_output(&["--scheme", &scheme_arg, "history"], Some(""));
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("invalid rating scheme") && stderr.contains("max_dropped"),
        "expected stable error shape, got stderr={stderr}"
    );

    let _ = std::fs::remove_file(&scheme_path);
}
