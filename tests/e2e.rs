//! End-to-end scenarios: the engine driven through its public API, plus CLI
//! smoke tests against the built binary.

use jsonrunner::commands::builtin_handlers;
use jsonrunner::report::Outcome;
use jsonrunner::runner::{execute, Test};
use jsonrunner::runtime::Runtime;
use jsonrunner::schema::TestData;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;

fn runner_cmd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_jsonrunner"))
}

fn engine_runtime(target: &str, temp_dir: &Path) -> Runtime {
    Runtime {
        target: PathBuf::from(target),
        rt_target: PathBuf::from(target),
        temp_dir: temp_dir.to_path_buf(),
        counter_total: 1,
        counter_digits: 1,
        handlers: Arc::new(builtin_handlers()),
        ..Runtime::default()
    }
}

fn load_test(dir: &Path, body: &str) -> Test {
    let path = dir.join("main-set").join("001-case.json");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, body).unwrap();
    Test::new(TestData::load(&path, 1, None).unwrap())
}

fn process_env() -> BTreeMap<String, String> {
    jsonrunner::env::get_env()
}

// ==================== Engine scenarios ====================

#[test]
#[cfg(unix)]
fn scenario_happy_path() {
    let dir = TempDir::new().unwrap();
    let mut test = load_test(dir.path(), r#"{"args":"hello","expected":[0,"hello\n",""]}"#);
    let rt = engine_runtime("/bin/echo", &dir.path().join("tmp"));
    let results = execute(&mut test, &process_env(), &rt);
    assert_eq!(results.outcome, Outcome::Ok, "report: {:?}", results.report);
}

#[test]
#[cfg(unix)]
fn scenario_save_on_first_run_then_pass() {
    let dir = TempDir::new().unwrap();
    let mut test = load_test(dir.path(), r#"{"args":"world","expected":null}"#);
    let filename = test.data.filename.clone();
    let rt = engine_runtime("/bin/echo", &dir.path().join("tmp"));

    let results = execute(&mut test, &process_env(), &rt);
    assert_eq!(results.outcome, Outcome::Saved);

    // The document now carries the captured expectation and passes.
    let mut rerun = Test::new(TestData::load(&filename, 1, None).unwrap());
    assert_eq!(rerun.data.expected.as_ref().unwrap().output, "world\n");
    let results = execute(&mut rerun, &process_env(), &rt);
    assert_eq!(results.outcome, Outcome::Ok, "report: {:?}", results.report);
}

#[test]
#[cfg(unix)]
fn scenario_tmp_canonicalisation() {
    let dir = TempDir::new().unwrap();
    let mut test = load_test(
        dir.path(),
        r#"{"args":"$TMP/foo","expected":[0,"$TMP/foo\n",""]}"#,
    );
    let rt = engine_runtime("/bin/echo", &dir.path().join("tmp"));
    let results = execute(&mut test, &process_env(), &rt);
    assert_eq!(results.outcome, Outcome::Ok, "report: {:?}", results.report);
}

#[test]
#[cfg(unix)]
fn scenario_version_patch() {
    let dir = TempDir::new().unwrap();
    let mut test = load_test(
        dir.path(),
        r#"{"args":"ver=2.7.1",
            "patches":{"^ver=([0-9.]+)$":"ver=$VERSION"},
            "expected":[0,"ver=$VERSION\n",""]}"#,
    );
    let mut rt = engine_runtime("/bin/echo", &dir.path().join("tmp"));
    rt.version = "2.7.1".to_string();
    // The $VERSION built-in replacement runs before the per-test patch;
    // either way the line canonicalises.
    let results = execute(&mut test, &process_env(), &rt);
    assert_eq!(results.outcome, Outcome::Ok, "report: {:?}", results.report);
}

#[test]
#[cfg(unix)]
fn scenario_prepared_directory_listing() {
    let dir = TempDir::new().unwrap();
    let work = dir.path().join("work");
    std::fs::create_dir_all(work.join("sub")).unwrap();
    std::fs::write(work.join("sub/a"), "").unwrap();
    std::fs::write(work.join("sub/b"), "").unwrap();

    let mut test = load_test(
        dir.path(),
        &format!(
            r#"{{"prepare":[["cd","{}"]],"args":["sub"],"expected":[0,["a","b\n"],""]}}"#,
            work.display()
        ),
    );
    let rt = engine_runtime("/bin/ls", &dir.path().join("tmp"));
    let results = execute(&mut test, &process_env(), &rt);
    assert_eq!(results.outcome, Outcome::Ok, "report: {:?}", results.report);
}

#[test]
#[cfg(unix)]
fn scenario_failed_test_reports_diff() {
    let dir = TempDir::new().unwrap();
    let mut test = load_test(
        dir.path(),
        r#"{"args":"actual","expected":[0,"expected\n",""]}"#,
    );
    let rt = engine_runtime("/bin/echo", &dir.path().join("tmp"));
    let results = execute(&mut test, &process_env(), &rt);
    assert_eq!(results.outcome, Outcome::Failed);
    let report = results.report.unwrap();
    assert!(report.contains("Diff:"));
    assert!(report.contains("LANGUAGE=en"));
    assert!(report.contains("001-case.json"));
}

#[test]
#[cfg(unix)]
fn scenario_check_begin_clips_actual() {
    let dir = TempDir::new().unwrap();
    let mut test = load_test(
        dir.path(),
        r#"{"args":"abcdef","check":{"stdout":"begin"},"expected":[0,"abc",""]}"#,
    );
    let rt = engine_runtime("/bin/echo", &dir.path().join("tmp"));
    let results = execute(&mut test, &process_env(), &rt);
    assert_eq!(results.outcome, Outcome::Ok, "report: {:?}", results.report);
}

#[test]
#[cfg(unix)]
fn scenario_check_too_short_is_clip_failure() {
    let dir = TempDir::new().unwrap();
    let mut test = load_test(
        dir.path(),
        r#"{"args":"ab","check":{"stdout":"begin"},"expected":[0,"much longer than that",""]}"#,
    );
    let rt = engine_runtime("/bin/echo", &dir.path().join("tmp"));
    let results = execute(&mut test, &process_env(), &rt);
    assert_eq!(results.outcome, Outcome::ClipFailed("begin".to_string()));
}

// ==================== CLI smoke tests ====================

/// Lay out a minimal project: description, presets, a staged-target stand-in
/// and one test document.
fn scaffold_project(root: &Path) -> PathBuf {
    std::fs::write(
        root.join("runner.json"),
        r#"{"target": "tool", "datasets_dir": "tests"}"#,
    )
    .unwrap();
    std::fs::write(
        root.join("CMakePresets.json"),
        r#"{"configurePresets": [
            {"name": "dev",
             "binaryDir": "${sourceDir}/build",
             "cacheVariables": {"CMAKE_BUILD_TYPE": "Debug"}}
        ]}"#,
    )
    .unwrap();

    let bin = root.join("build/bin");
    std::fs::create_dir_all(&bin).unwrap();
    std::fs::write(
        bin.join(format!("tool{}", std::env::consts::EXE_SUFFIX)),
        "stand-in",
    )
    .unwrap();

    let suite = root.join("tests/suite");
    std::fs::create_dir_all(&suite).unwrap();
    let doc = suite.join("001-case.json");
    std::fs::write(&doc, r#"{"args":"x","expected":[0,"done",""]}"#).unwrap();
    doc
}

#[test]
fn cli_version_exits_zero() {
    let output = runner_cmd().arg("--version").output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("jsonrunner"));
}

#[test]
fn cli_without_project_file_fails() {
    let dir = TempDir::new().unwrap();
    let output = runner_cmd()
        .args(["--preset", "dev", "--tests", "suite"])
        .current_dir(dir.path())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("project description"));
}

#[test]
fn cli_unknown_preset_fails() {
    let dir = TempDir::new().unwrap();
    scaffold_project(dir.path());
    let output = runner_cmd()
        .args(["--preset", "nope", "--tests", "suite"])
        .current_dir(dir.path())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("`nope` is not found"));
}

#[test]
fn cli_nullify_rewrites_documents() {
    let dir = TempDir::new().unwrap();
    let doc = scaffold_project(dir.path());
    let output = runner_cmd()
        .args(["--preset", "dev", "--tests", "suite", "--nullify", "--lang", "pl"])
        .current_dir(dir.path())
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&doc).unwrap()).unwrap();
    assert_eq!(value["expected"], serde_json::Value::Null);
    assert_eq!(value["lang"], serde_json::Value::String("pl".into()));
}

#[test]
fn cli_schema_renovation_rewrites_documents() {
    let dir = TempDir::new().unwrap();
    let doc = scaffold_project(dir.path());
    let output = runner_cmd()
        .args([
            "--preset",
            "dev",
            "--tests",
            "suite",
            "--nullify",
            "--schema",
            "https://example.com/case.schema.json",
        ])
        .current_dir(dir.path())
        .output()
        .unwrap();
    assert!(output.status.success());

    let text = std::fs::read_to_string(&doc).unwrap();
    assert!(text.contains("\"$schema\""));
    assert!(text.contains("https://example.com/case.schema.json"));
}
