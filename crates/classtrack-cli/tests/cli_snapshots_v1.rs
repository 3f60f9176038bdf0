#![allow(clippy::single_match_else, clippy::uninlined_format_args)]

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

const SIX_RESULTS: &str = r#"[
  { "occurred_on": "2024-01-01", "event_key": "01-00", "score": 50.0 },
  { "occurred_on": "2024-01-02", "event_key": "01-01", "score": 60.0 },
  { "occurred_on": "2024-01-03", "event_key": "01-02", "score": 70.0 },
  { "occurred_on": "2024-01-04", "event_key": "01-03", "score": 80.0 },
  { "occurred_on": "2024-01-05", "event_key": "01-04", "score": 90.0 },
  { "occurred_on": "2024-01-06", "event_key": "01-05", "score": 95.0 }
]"#;

fn classtrack_binary_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_classtrack"))
}

fn json_stdin_output(args: &[&str], body: &str) -> Output {
    let mut command = Command::new(classtrack_binary_path());
    command
        .args(["--format", "json"])
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
        Err(err) => panic!("failed to execute classtrack command {:?}: {err}", args),
    };
    if let Some(mut handle) = child.stdin.take() {
        if let Err(err) = handle.write_all(body.as_bytes()) {
            panic!("failed writing stdin: {err}");
        }
    }

    match child.wait_with_output() {
        Ok(output) => output,
        Err(err) => panic!("failed waiting for classtrack command {:?}: {err}", args),
    }
}

#[test]
fn snapshot_history_table_v1() {
    let output = json_stdin_output(&["history"], SIX_RESULTS);
    assert!(output.status.success());

    let expected = "date          rating  class\n\
                    ----------------------------\n\
                    2024-01-04   65.0000  B\n\
                    2024-01-05   75.0000  A\n\
                    2024-01-06   83.7500  A\n";
    assert_eq!(String::from_utf8_lossy(&output.stdout), expected);
}

#[test]
fn snapshot_needed_next_class_v1() {
    let output = json_stdin_output(&["needed", "--next-class"], SIX_RESULTS);
    assert!(output.status.success());

    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "to reach M (85.00%) you need 115.00% on your next event (not achievable in a single event)\n"
    );
}

#[test]
fn snapshot_needed_target_met_v1() {
    let output = json_stdin_output(&["needed", "--target", "80"], SIX_RESULTS);
    assert!(output.status.success());

    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "current rating 83.75% already meets 80.00%\n"
    );
}

#[test]
fn snapshot_insufficient_history_v1() {
    let output = json_stdin_output(&["history"], "[]");
    assert!(output.status.success());

    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "no classification yet: at least 4 eligible results are required\n"
    );
}

#[test]
fn snapshot_invalid_json_record_stderr_v1() {
    let output = json_stdin_output(
        &["history"],
        r#"[{ "occurred_on": "2024-01-01", "status_flag": "", "score": 50.0 }]"#,
    );
    assert!(!output.status.success());

    assert_eq!(
        String::from_utf8_lossy(&output.stderr),
        "Error: invalid event record at index 0\n\nCaused by:\n    validation error: status_flag MUST NOT be blank when present\n"
    );
}
