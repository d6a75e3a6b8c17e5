//! End-to-end tests driving the `tally` binary against a temporary database.
//!
//! Tests the full pipeline: ingest → aggregate → rules → summary

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use insta::assert_snapshot;
use tempfile::TempDir;

fn tally_binary() -> String {
    env!("CARGO_BIN_EXE_tally").to_string()
}

/// Writes a config pointing at a database inside `temp`.
fn write_config(temp: &Path) -> PathBuf {
    let config_file = temp.join("config.toml");
    let db_file = temp.join("tally.db");
    std::fs::write(
        &config_file,
        format!(r#"database_path = "{}""#, db_file.display()),
    )
    .unwrap();
    config_file
}

fn tally(temp: &Path, args: &[&str], stdin: Option<&str>) -> Output {
    let mut child = Command::new(tally_binary())
        .env("HOME", temp)
        .env_remove("XDG_CONFIG_HOME")
        .env_remove("RUST_LOG")
        .arg("--config")
        .arg(temp.join("config.toml"))
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to run tally");

    {
        let mut input = child.stdin.take().unwrap();
        if let Some(stdin) = stdin {
            input.write_all(stdin.as_bytes()).unwrap();
        }
    }

    let output = child.wait_with_output().unwrap();
    assert!(
        output.status.success(),
        "tally {args:?} should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

const HEARTBEATS: &str = r#"{"user":"ferris","entity":"src/main.rs","time":"2025-01-13T09:00:00Z","project":"tally","editor":"vim","operating_system":"linux","machine":"laptop"}
{"user":"ferris","entity":"src/main.rs","time":"2025-01-13T09:00:30Z","project":"tally","editor":"vim","operating_system":"linux","machine":"laptop"}
{"user":"ferris","entity":"src/main.rs","time":"2025-01-13T09:01:00Z","project":"tally","editor":"vim","operating_system":"linux","machine":"laptop"}
{"user":"ferris","entity":"setup.py","time":"2025-01-13T10:00:00Z","project":"dotfiles","editor":"vim","operating_system":"linux","machine":"laptop"}
"#;

const DAY: [&str; 4] = ["--from", "2025-01-13", "--to", "2025-01-14"];

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn ingest_then_summary() {
    let temp = TempDir::new().unwrap();
    write_config(temp.path());

    let ingest = tally(temp.path(), &["ingest"], Some(HEARTBEATS));
    assert!(
        stderr(&ingest).contains("Ingested 4 new heartbeats"),
        "unexpected ingest output: {}",
        stderr(&ingest)
    );

    let mut args = vec!["summary", "--user", "ferris"];
    args.extend(DAY);
    let summary = tally(temp.path(), &args, None);
    assert_snapshot!(stdout(&summary), @r"
    Summary for ferris
    2025-01-13T00:00:00.000Z to 2025-01-14T00:00:00.000Z

    Total: 1m 2s

    PROJECTS
      tally                            1m 1s   98.4%
      dotfiles                            1s    1.6%

    LANGUAGES
      Rust                             1m 1s   98.4%
      Python                              1s    1.6%

    EDITORS
      vim                              1m 2s  100.0%

    OPERATING SYSTEMS
      linux                            1m 2s  100.0%

    MACHINES
      laptop                           1m 2s  100.0%
    ");
}

#[test]
fn ingest_counts_malformed_lines_without_failing() {
    let temp = TempDir::new().unwrap();
    write_config(temp.path());

    let input = "not valid json\n{\"entity\":\"a.rs\",\"time\":1736758800}\n";
    let output = tally(temp.path(), &["ingest"], Some(input));
    assert!(
        stderr(&output).contains("Ingested 0 new heartbeats (0 accepted, 2 rejected)"),
        "unexpected ingest output: {}",
        stderr(&output)
    );
}

#[test]
fn ingest_uses_fallback_user() {
    let temp = TempDir::new().unwrap();
    write_config(temp.path());

    let input = "{\"entity\":\"a.rs\",\"time\":1736758800}\n";
    tally(temp.path(), &["ingest", "--user", "ferris"], Some(input));

    let mut args = vec!["summary", "--user", "ferris", "--json"];
    args.extend(DAY);
    let summary: serde_json::Value = serde_json::from_str(&stdout(&tally(temp.path(), &args, None))).unwrap();
    assert_eq!(summary["total_secs"], 1);
    assert_eq!(summary["languages"][0]["key"], "Rust");
}

#[test]
fn filtered_summary_as_json() {
    let temp = TempDir::new().unwrap();
    write_config(temp.path());
    tally(temp.path(), &["ingest"], Some(HEARTBEATS));

    let mut args = vec!["summary", "--user", "ferris", "--json", "--project", "dotfiles"];
    args.extend(DAY);
    let summary: serde_json::Value = serde_json::from_str(&stdout(&tally(temp.path(), &args, None))).unwrap();
    assert_eq!(summary["total_secs"], 1);
    assert_eq!(summary["projects"].as_array().unwrap().len(), 1);
    assert_eq!(summary["projects"][0]["key"], "dotfiles");
}

#[test]
fn aggregate_and_status() {
    let temp = TempDir::new().unwrap();
    write_config(temp.path());

    let status = tally(temp.path(), &["status"], None);
    assert!(stdout(&status).contains("No heartbeats recorded."));

    tally(temp.path(), &["ingest"], Some(HEARTBEATS));
    let aggregate = tally(temp.path(), &["aggregate"], None);
    assert!(
        stderr(&aggregate).contains("Aggregated 1 days for 1 users"),
        "unexpected aggregate output: {}",
        stderr(&aggregate)
    );

    let status = stdout(&tally(temp.path(), &["status"], None));
    assert!(status.contains("- ferris: last heartbeat 2025-01-13T10:00:00.000Z"));
    assert!(!status.contains("aggregated until never"));
}

#[test]
fn alias_applies_to_aggregated_days() {
    let temp = TempDir::new().unwrap();
    write_config(temp.path());
    tally(temp.path(), &["ingest"], Some(HEARTBEATS));
    tally(temp.path(), &["aggregate"], None);

    tally(
        temp.path(),
        &[
            "alias", "add", "--user", "ferris", "--category", "project", "--key", "dotfiles",
            "--value", "tally",
        ],
        None,
    );

    let mut args = vec!["summary", "--user", "ferris", "--json"];
    args.extend(DAY);
    let summary: serde_json::Value = serde_json::from_str(&stdout(&tally(temp.path(), &args, None))).unwrap();
    assert_eq!(summary["projects"].as_array().unwrap().len(), 1);
    assert_eq!(summary["projects"][0]["key"], "tally");
    assert_eq!(summary["projects"][0]["total_secs"], 62);

    let regenerate = tally(temp.path(), &["regenerate", "--user", "ferris"], None);
    assert!(stderr(&regenerate).contains("Regenerated 1 daily summaries for ferris"));
}

#[test]
fn import_resumes_from_previous_run() {
    let temp = TempDir::new().unwrap();
    write_config(temp.path());
    let file = temp.path().join("history.jsonl");
    std::fs::write(&file, HEARTBEATS).unwrap();
    let file = file.display().to_string();

    let first = tally(
        temp.path(),
        &["import", "--user", "ferris", "--file", &file, "--origin", "wakatime"],
        None,
    );
    assert!(stderr(&first).contains("Full wakatime import"));
    assert!(stderr(&first).contains("Imported 4 new heartbeats"));

    let second = tally(
        temp.path(),
        &["import", "--user", "ferris", "--file", &file, "--origin", "wakatime"],
        None,
    );
    assert!(stderr(&second).contains("Resuming wakatime import after 2025-01-13 10:00:00 UTC"));
    assert!(stderr(&second).contains("Imported 0 new heartbeats (0 read"));
}

#[test]
fn mapping_with_backfill_relabels_stored_heartbeats() {
    let temp = TempDir::new().unwrap();
    write_config(temp.path());
    let input = "{\"user\":\"ferris\",\"entity\":\"query.tql\",\"time\":1736758800}\n";
    tally(temp.path(), &["ingest"], Some(input));

    let mapping = tally(
        temp.path(),
        &[
            "mapping", "add", "--user", "ferris", "--extension", ".tql", "--language", "TallyQL",
            "--backfill",
        ],
        None,
    );
    assert!(stderr(&mapping).contains("Back-filled 1 stored heartbeats"));

    let again = tally(temp.path(), &["backfill-language", "--user", "ferris"], None);
    assert!(stderr(&again).contains("Back-filled 0 stored heartbeats"));

    let mut args = vec!["summary", "--user", "ferris", "--json"];
    args.extend(DAY);
    let summary: serde_json::Value = serde_json::from_str(&stdout(&tally(temp.path(), &args, None))).unwrap();
    assert_eq!(summary["languages"][0]["key"], "TallyQL");
}

#[test]
fn delete_user_removes_history() {
    let temp = TempDir::new().unwrap();
    write_config(temp.path());
    tally(temp.path(), &["ingest"], Some(HEARTBEATS));

    let deleted = tally(temp.path(), &["delete-user", "--user", "ferris"], None);
    assert!(stderr(&deleted).contains("Deleted 4 heartbeats"));

    let status = tally(temp.path(), &["status"], None);
    assert!(stdout(&status).contains("No heartbeats recorded."));
}
