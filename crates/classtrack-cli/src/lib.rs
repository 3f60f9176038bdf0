//! Command surface for the classification engine.
//!
//! Hosts embed through:
//! - [`run_cli`] for full parsed CLI execution.
//! - [`run_command`] for a single command against records already in memory.
//!
//! JSON output is built by the `build_*_payload` functions and carries a
//! `contract_version` so consumers can detect shape changes.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use classtrack_core::{
    classification_history, current_window, project_next_class, score_needed_for_window,
    sort_records, ClassStanding, ClassificationSnapshot, EventRecord, RatingScheme,
};
use classtrack_parser::parse_report;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "classtrack")]
#[command(about = "Classification rating history and next-event targets")]
pub struct Cli {
    /// Rating scheme JSON; omitted fields keep the USPSA defaults.
    #[arg(long, env = "CLASSTRACK_SCHEME")]
    scheme: Option<PathBuf>,

    /// Score table or JSON records; `-` reads stdin.
    #[arg(long, default_value = "-")]
    input: String,

    #[arg(long, value_enum, default_value_t = InputFormatArg::Table)]
    format: InputFormatArg,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List parsed records in canonical order.
    Records(OutputArgs),
    /// Rating after every qualifying result.
    History(OutputArgs),
    /// Current window, rating and class.
    Current(OutputArgs),
    /// Score needed on the next event.
    Needed(NeededArgs),
}

#[derive(Debug, Args)]
pub struct OutputArgs {
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct NeededArgs {
    #[arg(
        long,
        required_unless_present = "next_class",
        conflicts_with = "next_class"
    )]
    pub target: Option<f64>,
    #[arg(long)]
    pub next_class: bool,
    /// Event key the next result will replace.
    #[arg(long)]
    pub replacing: Option<String>,
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum, Eq, PartialEq)]
pub enum InputFormatArg {
    Table,
    Json,
}

/// Installs the stderr log subscriber. `RUST_LOG` overrides the `warn`
/// default.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Executes the parsed top-level CLI command.
///
/// # Errors
/// Returns an error when the scheme or input cannot be read or decoded, or
/// when the command arguments are invalid.
pub fn run_cli(cli: Cli) -> Result<()> {
    let scheme = load_scheme(cli.scheme.as_deref())?;
    let text = read_input(&cli.input)?;
    let records = load_records(&text, cli.format)?;
    run_command(&cli.command, &records, &scheme)
}

/// Executes one command against in-memory records.
///
/// # Errors
/// Returns an error when command arguments are invalid or output
/// serialization fails.
pub fn run_command(command: &Command, records: &[EventRecord], scheme: &RatingScheme) -> Result<()> {
    match command {
        Command::Records(args) => {
            let payload = build_records_payload(records);
            if args.json {
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                print_records_table(&payload.records);
            }
        }
        Command::History(args) => {
            let payload = build_history_payload(records, scheme);
            if args.json {
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                print_history_table(&payload, scheme);
            }
        }
        Command::Current(args) => {
            let payload = build_current_payload(records, scheme);
            if args.json {
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                print_current(&payload, scheme);
            }
        }
        Command::Needed(args) => {
            let payload = build_needed_payload(records, scheme, args)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                print_needed(&payload, scheme);
            }
        }
    }
    Ok(())
}

/// Loads a rating scheme file, or the USPSA defaults when no path is given.
///
/// # Errors
/// Returns an error when the file cannot be read, is not JSON, or fails
/// scheme validation.
pub fn load_scheme(path: Option<&Path>) -> Result<RatingScheme> {
    let Some(path) = path else {
        return Ok(RatingScheme::uspsa());
    };

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed reading rating scheme {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("rating scheme {} must be valid JSON", path.display()))?;
    let scheme = RatingScheme::from_json(&value)
        .with_context(|| format!("invalid rating scheme {}", path.display()))?;

    info!(
        path = %path.display(),
        scheme_version = scheme.scheme_version,
        "loaded rating scheme"
    );
    Ok(scheme)
}

/// Turns raw input into records.
///
/// # Errors
/// Returns an error when JSON input does not decode into event records or a
/// decoded record is malformed.
pub fn load_records(text: &str, format: InputFormatArg) -> Result<Vec<EventRecord>> {
    match format {
        InputFormatArg::Table => {
            let report = parse_report(text);
            debug!(
                records = report.records.len(),
                skipped_lines = report.skipped_lines,
                "parsed score table"
            );
            Ok(report.records)
        }
        InputFormatArg::Json => {
            let records: Vec<EventRecord> = serde_json::from_str(text)
                .context("JSON input must be an array of event records")?;
            for (index, record) in records.iter().enumerate() {
                record
                    .validate()
                    .with_context(|| format!("invalid event record at index {index}"))?;
            }
            Ok(records)
        }
    }
}

fn read_input(source: &str) -> Result<String> {
    if source == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("failed reading input from stdin")?;
        return Ok(buffer);
    }

    std::fs::read_to_string(source).with_context(|| format!("failed reading input {source}"))
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct RecordsJsonPayload {
    contract_version: String,
    records: Vec<EventRecord>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct HistoryJsonPayload {
    contract_version: String,
    scheme_version: u32,
    snapshots: Vec<ClassificationSnapshot>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct CurrentJsonPayload {
    contract_version: String,
    scheme_version: u32,
    can_score: bool,
    rating: Option<f64>,
    standing: Option<ClassStanding>,
    entries: Vec<EventRecord>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct NeededJsonPayload {
    contract_version: String,
    scheme_version: u32,
    current_rating: Option<f64>,
    target_class: Option<String>,
    target_rating: Option<f64>,
    replacing_key: Option<String>,
    score_needed: Option<f64>,
    achievable: Option<bool>,
}

#[must_use]
pub fn build_records_payload(records: &[EventRecord]) -> RecordsJsonPayload {
    RecordsJsonPayload {
        contract_version: "records.v1".to_string(),
        records: sort_records(records),
    }
}

#[must_use]
pub fn build_history_payload(records: &[EventRecord], scheme: &RatingScheme) -> HistoryJsonPayload {
    HistoryJsonPayload {
        contract_version: "history.v1".to_string(),
        scheme_version: scheme.scheme_version,
        snapshots: classification_history(records, scheme),
    }
}

#[must_use]
pub fn build_current_payload(records: &[EventRecord], scheme: &RatingScheme) -> CurrentJsonPayload {
    let window = current_window(records, scheme);
    let rating = window.rating_percentage();
    CurrentJsonPayload {
        contract_version: "current.v1".to_string(),
        scheme_version: scheme.scheme_version,
        can_score: window.can_score(),
        rating,
        standing: rating.map(|value| scheme.standing(value)),
        entries: window.entries().to_vec(),
    }
}

/// Builds the `needed.v1` payload for an explicit target or the next class.
///
/// # Errors
/// Returns an error when `--target` is not a finite percentage.
pub fn build_needed_payload(
    records: &[EventRecord],
    scheme: &RatingScheme,
    args: &NeededArgs,
) -> Result<NeededJsonPayload> {
    let replacing_key = args.replacing.as_deref();

    let mut payload = NeededJsonPayload {
        contract_version: "needed.v1".to_string(),
        scheme_version: scheme.scheme_version,
        current_rating: None,
        target_class: None,
        target_rating: None,
        replacing_key: args.replacing.clone(),
        score_needed: None,
        achievable: None,
    };

    if args.next_class {
        if let Some(projection) = project_next_class(records, replacing_key, scheme) {
            payload.current_rating = Some(projection.current_rating);
            payload.target_class = projection.standing.next_class;
            payload.target_rating = projection.standing.next_threshold;
            payload.score_needed = projection.score_needed;
            payload.achievable = projection.achievable;
        }
        return Ok(payload);
    }

    let Some(target) = args.target else {
        return Err(anyhow!("either --target or --next-class is required"));
    };
    if !target.is_finite() {
        return Err(anyhow!("--target must be a finite percentage"));
    }

    let window = current_window(records, scheme);
    payload.current_rating = window.rating_percentage();
    payload.target_rating = Some(target);
    payload.score_needed = score_needed_for_window(&window, target, replacing_key);
    payload.achievable = payload
        .score_needed
        .map(|needed| needed <= scheme.single_event_cap);
    Ok(payload)
}

fn print_records_table(records: &[EventRecord]) {
    println!(
        "{:<10} {:<7} {:<4} {:>9}  origin",
        "date", "key", "flag", "score"
    );
    println!("{}", "-".repeat(72));
    for record in records {
        println!(
            "{:<10} {:<7} {:<4} {:>9.4}  {}",
            record.occurred_on,
            record.event_key.as_deref().unwrap_or("-"),
            record.status_flag.as_deref().unwrap_or("-"),
            record.score,
            record.origin.as_deref().unwrap_or("")
        );
    }
}

fn print_history_table(payload: &HistoryJsonPayload, scheme: &RatingScheme) {
    if payload.snapshots.is_empty() {
        println!(
            "no classification yet: at least {} eligible results are required",
            scheme.min_scored
        );
        return;
    }

    println!("{:<10} {:>9}  class", "date", "rating");
    println!("{}", "-".repeat(28));
    for snapshot in &payload.snapshots {
        println!(
            "{:<10} {:>9.4}  {}",
            snapshot.date,
            snapshot.percentage,
            scheme.class_for(snapshot.percentage)
        );
    }
}

fn print_current(payload: &CurrentJsonPayload, scheme: &RatingScheme) {
    print_records_table(&payload.entries);
    match (payload.rating, payload.standing.as_ref()) {
        (Some(rating), Some(standing)) => {
            println!(
                "rating={rating:.4} class={} next={}",
                standing.current_class,
                format_next(standing)
            );
        }
        _ => println!(
            "no classification yet: {} of {} eligible results required",
            payload.entries.len(),
            scheme.min_scored
        ),
    }
}

fn format_next(standing: &ClassStanding) -> String {
    match (&standing.next_class, standing.next_threshold) {
        (Some(label), Some(threshold)) => format!("{label}@{threshold:.2}"),
        _ => "none".to_string(),
    }
}

fn print_needed(payload: &NeededJsonPayload, scheme: &RatingScheme) {
    let Some(current) = payload.current_rating else {
        println!(
            "no classification yet: at least {} eligible results are required",
            scheme.min_scored
        );
        return;
    };

    let Some(target) = payload.target_rating else {
        println!("current rating {current:.2}% is already in the top class");
        return;
    };

    let label = payload
        .target_class
        .as_ref()
        .map_or_else(|| format!("{target:.2}%"), |class| format!("{class} ({target:.2}%)"));

    match payload.score_needed {
        Some(needed) if needed <= 0.0 => {
            println!("current rating {current:.2}% already meets {label}");
        }
        Some(needed) => {
            let suffix = if payload.achievable == Some(false) {
                " (not achievable in a single event)"
            } else {
                ""
            };
            println!("to reach {label} you need {needed:.2}% on your next event{suffix}");
        }
        None => println!("no projection available"),
    }
}
