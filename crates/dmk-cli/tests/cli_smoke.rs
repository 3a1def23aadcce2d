use std::process::Command;

fn demo_scripts_dir() -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("demos")
        .join("scripts")
}

#[test]
fn check_constructs_every_demo_script() {
    let output = Command::new(env!("CARGO_BIN_EXE_dmk"))
        .arg("check")
        .arg("--scripts-dir")
        .arg(demo_scripts_dir())
        .output()
        .expect("cli should execute");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        output.status.success(),
        "check failed\nstdout:\n{}\nstderr:\n{}",
        stdout,
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(stdout.starts_with("RESULT:OK"));
    assert!(stdout.contains("SCRIPT_JSON:\"boss.dmk\""));
    assert!(stdout.contains("ROOT:PatternSM"));
}

#[test]
fn run_prints_a_completed_report() {
    let output = Command::new(env!("CARGO_BIN_EXE_dmk"))
        .arg("run")
        .arg(demo_scripts_dir().join("stage").join("macros.dmk"))
        .arg("--no-phase-buffer")
        .output()
        .expect("cli should execute");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "run failed\nstdout:\n{}", stdout);
    assert!(stdout.contains("OUTCOME:completed"));
    let report = stdout
        .lines()
        .find_map(|line| line.strip_prefix("REPORT_JSON:"))
        .expect("report line");
    let report: serde_json::Value = serde_json::from_str(report).expect("report should be json");
    assert_eq!(report["debug_floats"], serde_json::json!([4.0, 4.0]));
    assert_eq!(report["prints"], serde_json::json!(["done"]));
}

#[test]
fn errors_are_reported_on_stdout() {
    let output = Command::new(env!("CARGO_BIN_EXE_dmk"))
        .arg("expand")
        .arg(demo_scripts_dir().join("missing.dmk"))
        .output()
        .expect("cli should execute");

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("RESULT:ERROR"));
    assert!(stdout.contains("ERROR_CODE:CLI_SOURCE_NOT_FOUND"));
}
