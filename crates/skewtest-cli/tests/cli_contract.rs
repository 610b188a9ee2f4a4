#![allow(deprecated)]
#![cfg(unix)]
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

/// `skewtest` isolated in `dir`: no config discovery, logs and clock state
/// kept inside the temp dir.
fn skewtest(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("skewtest").unwrap();
    cmd.current_dir(dir)
        .env("SKEWTEST_LOG_DIR", dir.join("logs"))
        .env("SKEWTEST_CLOCK_FILE", dir.join("faketimerc"))
        .env_remove("SKEWTEST_CONFIG")
        .env_remove("SKEWTEST_FAKETIME")
        .env_remove("SKEWTEST_SWITCH")
        .env_remove("SKEWTEST_TIMEZONE")
        .env_remove("SKEWTEST_PRELOAD")
        .env_remove("SKEWTEST_PRELOAD_MT")
        .env_remove("SKEWTEST_OUTPUT_ROOT");
    cmd
}

#[test]
fn contract_successful_command_exits_0_and_prints_record() {
    let dir = tempdir().unwrap();
    let output = skewtest(dir.path())
        .args(["run", "--timezone", "UTC", "--", "echo", "hello"])
        .assert()
        .code(0)
        .stdout(predicate::str::starts_with("hello\n"))
        .get_output()
        .stdout
        .clone();

    let stdout = String::from_utf8(output).unwrap();
    let record: Value = serde_json::from_str(stdout.lines().last().unwrap()).unwrap();
    assert_eq!(record["failed"], Value::Bool(false));
    assert_eq!(record["timezone"], "UTC");
    assert_eq!(record["faketime"], "");

    let log = dir
        .path()
        .join("logs")
        .join(record["log_file"].as_str().unwrap());
    assert_eq!(fs::read_to_string(log).unwrap(), "hello\n");
}

#[test]
fn contract_failing_command_exits_1() {
    let dir = tempdir().unwrap();
    skewtest(dir.path())
        .args(["run", "--", "sh", "-c", "echo boom >&2; exit 7"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("boom"))
        .stdout(predicate::str::contains("\"exit_code\":7"));
}

#[test]
fn contract_single_argument_command_is_split() {
    let dir = tempdir().unwrap();
    skewtest(dir.path())
        .args(["run", "echo split words"])
        .assert()
        .code(0)
        .stdout(predicate::str::starts_with("split words\n"));
}

#[test]
fn contract_missing_binary_exits_2() {
    let dir = tempdir().unwrap();
    skewtest(dir.path())
        .args(["run", "--", "skewtest-no-such-binary-4f2a"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("failed to spawn"));
}

#[test]
fn contract_missing_shim_exits_2() {
    let dir = tempdir().unwrap();
    skewtest(dir.path())
        .args(["run", "--faketime", "-1d", "--preload"])
        .arg(dir.path().join("missing.so"))
        .args(["--", "true"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("clock shim library not found"));
}

#[test]
fn contract_trigger_with_speed_up_is_rejected() {
    let dir = tempdir().unwrap();
    skewtest(dir.path())
        .args(["run", "--faketime", "+0 x2", "--switch", "GO", "--", "true"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("cannot be combined"));
}

#[test]
fn contract_existing_artifact_is_skipped() {
    let dir = tempdir().unwrap();
    let artifact = dir.path().join("test-ori.out");
    fs::write(&artifact, "kept\n").unwrap();
    skewtest(dir.path())
        .args(["run", "--output"])
        .arg(&artifact)
        .args(["--", "sh", "-c", "exit 1"])
        .assert()
        .code(0)
        .stderr(predicate::str::contains("Skipped"));
    assert_eq!(fs::read_to_string(&artifact).unwrap(), "kept\n");
}

#[test]
fn matrix_list_prints_plan_without_running() {
    let dir = tempdir().unwrap();
    skewtest(dir.path())
        .args([
            "matrix",
            "https://github.com/acme/widgets/",
            "--list",
            "--switch",
            "Running ",
            "--year",
            "2026",
            "--",
            "touch",
            "ran",
        ])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("test-fake-timezone-Chatham-DST"))
        .stdout(predicate::str::contains("@2026-01-01 00:00:00"))
        .stdout(predicate::str::contains("test-switch-20"))
        .stdout(predicate::str::contains("output/widgets/test-ori.out"));
    assert!(!dir.path().join("ran").exists());
    assert!(!dir.path().join("output").exists());
}

#[test]
fn matrix_config_file_is_discovered() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("skewtest.yaml"),
        "matrix:\n  speed_factors: [7]\n  increment_factors: []\n",
    )
    .unwrap();
    skewtest(dir.path())
        .args(["matrix", "proj", "--list", "--", "true"])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("test-fake-speed-up-7x"))
        .stdout(predicate::str::contains("test-fake-speed-up-2x").not())
        .stdout(predicate::str::contains("test-switch-").not());
}

#[test]
fn matrix_rejects_duplicate_factors() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("skewtest.yaml"),
        "matrix:\n  speed_factors: [2, 2]\n",
    )
    .unwrap();
    skewtest(dir.path())
        .args(["matrix", "proj", "--list", "--", "true"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("duplicate factor"));
}

#[test]
fn maven_command_rewrites_method_separator() {
    let dir = tempdir().unwrap();
    skewtest(dir.path())
        .args(["maven-command", "org.acme.FooTest.testBar", "org.acme.BazTest.testQux"])
        .assert()
        .code(0)
        .stdout(predicate::str::diff(
            "mvn -fae -DfailIfNoTests=false -Dtest=org.acme.FooTest#testBar,org.acme.BazTest#testQux test\n",
        ));
}

#[test]
fn maven_command_reads_stdin() {
    let dir = tempdir().unwrap();
    skewtest(dir.path())
        .args(["maven-command", "--stdin", "--json"])
        .write_stdin("a.B.c\n\nignored.X.y\n")
        .assert()
        .code(0)
        .stdout(predicate::str::contains(r#""-Dtest=a.B#c""#))
        .stdout(predicate::str::contains("ignored").not());
}

#[test]
fn version_prints_package_version() {
    let dir = tempdir().unwrap();
    skewtest(dir.path())
        .arg("version")
        .assert()
        .code(0)
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}
