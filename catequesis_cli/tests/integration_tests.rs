//! Integration tests for the catequesis binary.
//!
//! These tests verify end-to-end behavior including:
//! - Catalog setup and group creation
//! - Enrollment, grading and period close
//! - Sacrament certificates
//! - Reports and CSV export
//! - Persistence across invocations and between processes

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Data directory plus an isolated config file
struct Workspace {
    _dir: TempDir,
    data_dir: PathBuf,
    config: PathBuf,
}

fn setup_workspace(config_toml: &str) -> Workspace {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = dir.path().join("data");
    let config = dir.path().join("config.toml");
    fs::write(&config, config_toml).expect("Failed to write config");
    Workspace {
        _dir: dir,
        data_dir,
        config,
    }
}

fn cli() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("catequesis"))
}

fn cmd(ws: &Workspace) -> Command {
    let mut cmd = cli();
    cmd.arg("--data-dir")
        .arg(&ws.data_dir)
        .arg("--config")
        .arg(&ws.config);
    cmd
}

/// Run a command that must succeed and return its trimmed stdout
fn run(ws: &Workspace, args: &[&str]) -> String {
    let output = cmd(ws).args(args).output().expect("Failed to run catequesis");
    assert!(
        output.status.success(),
        "{:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Period "2024" for the built-in parish, and a group at the first level
fn setup_term(ws: &Workspace, capacity: u32) -> String {
    run(
        ws,
        &[
            "period", "add", "--id", "2024", "--parish", "central", "--starts", "2024-09-01",
            "--ends", "2025-06-30",
        ],
    );
    run(
        ws,
        &[
            "group",
            "create",
            "--name",
            "Sábado A",
            "--parish",
            "central",
            "--level",
            "preparation",
            "--period",
            "2024",
            "--capacity",
            &capacity.to_string(),
        ],
    )
}

fn register(ws: &Workspace, name: &str, birth_date: &str) -> String {
    run(ws, &["register", "--name", name, "--birth-date", birth_date])
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).expect("Failed to read file")
}

#[test]
fn test_cli_help() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Parish catechesis enrollment and progression",
        ));
}

#[test]
fn test_init_writes_catalog() {
    let ws = setup_workspace("");

    cmd(&ws)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote catalog"))
        .stdout(predicate::str::contains("preparation"));

    let catalog = read(&ws.data_dir.join("catalog.toml"));
    assert!(catalog.contains("first_communion"));

    cmd(&ws)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already present"));
}

#[test]
fn test_full_term() {
    let ws = setup_workspace("");
    let group = setup_term(&ws, 2);
    let a = register(&ws, "Ana", "2017-03-01");
    let b = register(&ws, "Bruno", "2017-05-10");
    let c = register(&ws, "Carla", "2017-01-20");

    let ea = run(&ws, &["enroll", &a, &group]);
    let eb = run(&ws, &["enroll", &b, &group]);
    cmd(&ws)
        .args(["enroll", c.as_str(), group.as_str()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("GroupFull"));

    run(&ws, &["grade", &ea, "passed"]);
    run(&ws, &["grade", &eb, "failed"]);

    cmd(&ws)
        .args(["close-period", "2024"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 record(s)"));

    // Closing again is a no-op
    cmd(&ws)
        .args(["close-period", "2024"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 record(s)"));

    cmd(&ws)
        .args(["history", a.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Current level: first_communion"))
        .stdout(predicate::str::contains("2024 preparation Passed"));

    cmd(&ws)
        .args(["history", b.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Current level: preparation"));

    let events = read(&ws.data_dir.join("events.jsonl"));
    assert_eq!(events.matches("\"enrollment_created\"").count(), 2);
    assert_eq!(events.matches("\"period_closed\"").count(), 1);
}

#[test]
fn test_certificate_issue_and_verify() {
    let ws = setup_workspace("");
    let prep = setup_term(&ws, 5);
    let a = register(&ws, "Ana", "2017-03-01");
    let e = run(&ws, &["enroll", &a, &prep]);
    run(&ws, &["grade", &e, "passed"]);
    run(&ws, &["close-period", "2024"]);

    run(
        &ws,
        &[
            "period", "add", "--id", "2025", "--parish", "central", "--starts", "2025-09-01",
            "--ends", "2026-06-30",
        ],
    );
    let communion = run(
        &ws,
        &[
            "group", "create", "--name", "Comunión", "--parish", "central", "--level",
            "first_communion", "--period", "2025",
        ],
    );
    let e = run(&ws, &["enroll", &a, &communion]);
    run(&ws, &["grade", &e, "passed"]);
    run(&ws, &["close-period", "2025"]);

    let issued = run(&ws, &["certificate", "issue", &e]);
    assert!(issued.contains("✓ Certificate COM"));
    let code = issued
        .lines()
        .find_map(|line| line.trim().strip_prefix("Verification code: "))
        .expect("no verification code printed")
        .to_string();

    cmd(&ws)
        .args(["certificate", "verify", code.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Ana received FirstCommunion"))
        .stdout(predicate::str::contains("Parroquia Central"));

    cmd(&ws)
        .args(["certificate", "verify", "NOT-A-CODE"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("NotFound"));

    let output = ws.data_dir.join("certificates.csv");
    cmd(&ws)
        .args(["export", "certificates", "--parish", "central", "--output"])
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported 1 rows"));
    let csv = read(&output);
    assert!(csv.starts_with("number,verification_code,catechumen_id,catechumen_name"));
    assert!(csv.contains(&code));

    let events = read(&ws.data_dir.join("events.jsonl"));
    assert_eq!(events.matches("\"certificate_issued\"").count(), 1);
}

#[test]
fn test_close_with_ungraded_enrollment_fails() {
    let ws = setup_workspace("");
    let group = setup_term(&ws, 5);
    let a = register(&ws, "Ana", "2017-03-01");
    run(&ws, &["enroll", &a, &group]);

    cmd(&ws)
        .args(["close-period", "2024"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("UngradedEnrollment"));

    let registry = read(&ws.data_dir.join("registry.json"));
    assert!(registry.contains("\"closed_periods\":[]"));
}

#[test]
fn test_age_out_of_range_rejected() {
    let ws = setup_workspace("");
    let group = setup_term(&ws, 5);
    let teen = register(&ws, "Tomás", "2011-02-01");

    cmd(&ws)
        .args(["enroll", teen.as_str(), group.as_str()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("AgeOutOfRange"));
}

#[test]
fn test_suspend_and_reactivate() {
    let ws = setup_workspace("");
    let group = setup_term(&ws, 5);
    let a = register(&ws, "Ana", "2017-03-01");

    run(&ws, &["suspend", &a]);
    cmd(&ws)
        .args(["enroll", a.as_str(), group.as_str()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("IneligibleStatus"));

    run(&ws, &["reactivate", &a]);
    run(&ws, &["enroll", &a, &group]);
}

#[test]
fn test_attendance_report() {
    let ws = setup_workspace("");
    let group = setup_term(&ws, 5);
    let a = register(&ws, "Ana", "2017-03-01");
    let e = run(&ws, &["enroll", &a, &group]);

    run(&ws, &["attend", &e, "--date", "2024-09-07"]);
    run(&ws, &["attend", &e, "--date", "2024-09-14", "--absent"]);

    cmd(&ws)
        .args(["report", "attendance", "--parish", "central", "--period", "2024"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Ana 1/2 (50%)"));
}

#[test]
fn test_export_occupancy_csv() {
    let ws = setup_workspace("");
    let group = setup_term(&ws, 4);
    let a = register(&ws, "Ana", "2017-03-01");
    run(&ws, &["enroll", &a, &group]);

    let output = ws.data_dir.join("exports").join("occupancy.csv");
    cmd(&ws)
        .args(["export", "occupancy", "--parish", "central", "--period", "2024", "--output"])
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported 1 rows"));

    let csv = read(&output);
    assert!(csv.starts_with("group_id,group_name,level_id,capacity,enrolled"));
    assert!(csv.contains(",4,1,3,25"));
}

#[test]
fn test_export_too_large_fails() {
    let ws = setup_workspace("[reports]\nmax_export_rows = 1\n");
    setup_term(&ws, 4);
    run(
        &ws,
        &[
            "group", "create", "--name", "Sábado B", "--parish", "central", "--level",
            "preparation", "--period", "2024",
        ],
    );

    let output = ws.data_dir.join("occupancy.csv");
    cmd(&ws)
        .args(["export", "occupancy", "--parish", "central", "--period", "2024", "--output"])
        .arg(&output)
        .assert()
        .failure()
        .stderr(predicate::str::contains("ExportTooLarge"));
    assert!(!output.exists());

    // Paging keeps each request under the cap
    cmd(&ws)
        .args([
            "export", "occupancy", "--parish", "central", "--period", "2024", "--limit", "1",
            "--output",
        ])
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported 1 rows"));
}

#[test]
fn test_corrupted_registry_is_reported() {
    let ws = setup_workspace("");
    fs::create_dir_all(&ws.data_dir).unwrap();
    fs::write(ws.data_dir.join("registry.json"), "{ invalid json }}}}").unwrap();

    cmd(&ws)
        .args(["register", "--name", "Ana", "--birth-date", "2017-03-01"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Json"));

    // The damaged file is left for inspection
    assert_eq!(
        read(&ws.data_dir.join("registry.json")),
        "{ invalid json }}}}"
    );
}

#[test]
fn test_concurrent_processes_respect_capacity() {
    let ws = setup_workspace("");
    let group = setup_term(&ws, 4);
    let children: Vec<String> = (0..6)
        .map(|i| register(&ws, &format!("Niño {}", i), "2017-03-01"))
        .collect();

    let successes = std::thread::scope(|scope| {
        let handles: Vec<_> = children
            .iter()
            .map(|child| {
                let ws = &ws;
                let group = &group;
                scope.spawn(move || {
                    cmd(ws)
                        .args(["enroll", child.as_str(), group.as_str()])
                        .output()
                        .expect("Failed to run catequesis")
                        .status
                        .success()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("enroll thread panicked"))
            .filter(|ok| *ok)
            .count()
    });
    assert_eq!(successes, 4);

    cmd(&ws)
        .args(["report", "occupancy", "--parish", "central", "--period", "2024"])
        .assert()
        .success()
        .stdout(predicate::str::contains("4/4 (0 free)"));
}
