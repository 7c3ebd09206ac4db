//! CLI subprocess integration tests.
//!
//! These tests invoke the `padstone` binary with the mock engine and check
//! exit codes, stdout content, and the state file left on disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const CONFIG: &str = r#"
[variable.version]
default = "dev"

[[provider]]
name = "aws"

[temporary_resource.aws_instance.builder]
ami = "ami-06b94666"
tag = "build-${var.version}"

[temporary_module.network]
source = "./network"

[resource.aws_ami_from_instance.image]
source_instance_id = "${aws_instance.builder.id}"

[output.image_id]
value = "${aws_ami_from_instance.image.id}"
"#;

fn padstone_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_padstone"));
    cmd.env("PADSTONE_ENGINE", "mock");
    cmd.env_remove("PADSTONE_LOG");
    cmd
}

fn config_dir(content: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("main.pad.toml"), content).unwrap();
    dir
}

fn run(args: &[&str]) -> Output {
    padstone_bin().args(args).output().unwrap()
}

fn path_str(p: &Path) -> &str {
    p.to_str().unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn build(config: &Path, state: &Path) -> Output {
    run(&["build", path_str(config), path_str(state)])
}

fn read_state(path: &Path) -> serde_json::Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

fn root_keys(state: &serde_json::Value) -> Vec<String> {
    let root = state["modules"]
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["path"] == serde_json::json!(["root"]))
        .unwrap();
    root["resources"]
        .as_object()
        .unwrap()
        .keys()
        .cloned()
        .collect()
}

#[test]
fn cli_version_exits_zero() {
    let output = run(&["--version"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("padstone"));
}

#[test]
fn cli_help_lists_commands() {
    let output = run(&["--help"]);
    assert!(output.status.success());
    let out = stdout(&output);
    for command in ["build", "destroy", "validate", "show"] {
        assert!(out.contains(command), "help must list '{command}': {out}");
    }
}

#[test]
fn build_keeps_only_results_then_destroy_removes_the_file() {
    let config = config_dir(CONFIG);
    let work = tempfile::tempdir().unwrap();
    let state = work.path().join("build.json");

    let output = build(config.path(), &state);
    assert!(output.status.success(), "build failed: {}", stderr(&output));
    assert!(stdout(&output).contains("image_id = aws_ami_from_instance-"));
    assert!(state.exists());

    let doc = read_state(&state);
    assert_eq!(root_keys(&doc), vec!["aws_ami_from_instance.image"]);
    assert_eq!(doc["modules"].as_array().unwrap().len(), 1);

    let output = run(&["destroy", path_str(config.path()), path_str(&state)]);
    assert!(output.status.success(), "destroy failed: {}", stderr(&output));
    assert!(!state.exists());
}

#[test]
fn build_refuses_an_existing_state_file() {
    let config = config_dir(CONFIG);
    let work = tempfile::tempdir().unwrap();
    let state = work.path().join("build.json");
    fs::write(&state, "precious").unwrap();

    let output = build(config.path(), &state);
    assert_eq!(output.status.code(), Some(4));
    assert!(stderr(&output).contains("already exists"));
    assert_eq!(fs::read_to_string(&state).unwrap(), "precious");
}

#[test]
fn destroy_requires_the_state_file() {
    let config = config_dir(CONFIG);
    let work = tempfile::tempdir().unwrap();
    let output = run(&[
        "destroy",
        path_str(config.path()),
        path_str(&work.path().join("missing.json")),
    ]);
    assert_eq!(output.status.code(), Some(4));
}

#[test]
fn mixed_shapes_are_a_configuration_error() {
    let config = config_dir(
        r#"
[resource.null_resource.a]
[target.app.resource.null_resource.b]
"#,
    );
    let work = tempfile::tempdir().unwrap();
    let state = work.path().join("build.json");
    let output = build(config.path(), &state);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("configuration error"));
    assert!(!state.exists());
}

#[test]
fn unresolved_reference_fails_validation_before_apply() {
    let config = config_dir(
        r#"
[resource.aws_ami.image]
source = "${aws_instance.missing.id}"
"#,
    );
    let work = tempfile::tempdir().unwrap();
    let state = work.path().join("build.json");
    let output = build(config.path(), &state);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("unknown resource 'aws_instance.missing'"));
    assert!(!state.exists());
}

#[test]
fn required_variables_come_from_the_command_line() {
    let config = config_dir(
        r#"
[variable.region]

[resource.null_resource.marker]
region = "${var.region}"
"#,
    );
    let work = tempfile::tempdir().unwrap();
    let state = work.path().join("build.json");

    let output = build(config.path(), &state);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("required variable 'region' is not set"));

    let output = run(&[
        "build",
        path_str(config.path()),
        path_str(&state),
        "region=eu-west-1",
    ]);
    assert!(output.status.success(), "{}", stderr(&output));
    let doc = read_state(&state);
    let marker = &doc["modules"][0]["resources"]["null_resource.marker"];
    assert_eq!(marker["attributes"]["region"], "eu-west-1");
}

#[test]
fn malformed_variable_spec_is_rejected() {
    let config = config_dir(CONFIG);
    let work = tempfile::tempdir().unwrap();
    let state = work.path().join("build.json");
    let output = run(&["build", path_str(config.path()), path_str(&state), "version"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("expected name=value"));
}

#[test]
fn build_json_reports_outputs() {
    let config = config_dir(CONFIG);
    let work = tempfile::tempdir().unwrap();
    let state = work.path().join("build.json");
    let output = run(&["--json", "build", path_str(config.path()), path_str(&state)]);
    assert!(output.status.success(), "{}", stderr(&output));

    let payload: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(payload["status"], "cleaned_up");
    assert_eq!(payload["resources"], 1);
    assert!(payload["outputs"]["image_id"]
        .as_str()
        .unwrap()
        .starts_with("aws_ami_from_instance-"));
}

#[test]
fn validate_json_reports_missing_provider() {
    let config = config_dir(CONFIG);
    let output = run(&["--json", "validate", path_str(config.path())]);
    assert!(output.status.success(), "{}", stderr(&output));
    let diagnostics: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(
        diagnostics["warnings"],
        serde_json::json!(["provider 'aws' is not installed"])
    );
    assert_eq!(diagnostics["errors"], serde_json::json!([]));
}

#[cfg(unix)]
#[test]
fn validate_finds_providers_in_plugin_dirs() {
    use std::os::unix::fs::PermissionsExt;

    let config = config_dir(CONFIG);
    let plugins = tempfile::tempdir().unwrap();
    let provider: PathBuf = plugins.path().join("padstone-provider-aws");
    fs::write(&provider, "#!/bin/sh\n").unwrap();
    fs::set_permissions(&provider, fs::Permissions::from_mode(0o755)).unwrap();

    let output = run(&[
        "--json",
        "--plugin-dir",
        path_str(plugins.path()),
        "validate",
        path_str(config.path()),
    ]);
    assert!(output.status.success(), "{}", stderr(&output));
    let diagnostics: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(diagnostics["warnings"], serde_json::json!([]));
}

#[test]
fn validate_exits_nonzero_on_errors() {
    let config = config_dir(
        r#"
[output.x]
value = "${module.absent.id}"
"#,
    );
    let output = run(&["validate", path_str(config.path())]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("unknown module 'absent'"));
}

#[test]
fn show_prints_scopes_and_outputs() {
    let config = config_dir(CONFIG);
    let work = tempfile::tempdir().unwrap();
    let state = work.path().join("build.json");
    assert!(build(config.path(), &state).status.success());

    let output = run(&["show", path_str(&state)]);
    assert!(output.status.success(), "{}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("root:"));
    assert!(out.contains("aws_ami_from_instance.image"));
    assert!(out.contains("output image_id = aws_ami_from_instance-"));
    assert!(!out.contains("aws_instance.builder"));
}

#[test]
fn corrupt_state_file_is_a_state_error() {
    let work = tempfile::tempdir().unwrap();
    let state = work.path().join("build.json");
    fs::write(&state, "{ not json").unwrap();
    let output = run(&["show", path_str(&state)]);
    assert_eq!(output.status.code(), Some(3));
    assert!(stderr(&output).contains("state error"));
}

#[test]
fn tampered_state_file_fails_integrity_check() {
    let config = config_dir(CONFIG);
    let work = tempfile::tempdir().unwrap();
    let state = work.path().join("build.json");
    assert!(build(config.path(), &state).status.success());

    let content = fs::read_to_string(&state).unwrap();
    let lineage = read_state(&state)["lineage"].as_str().unwrap().to_owned();
    fs::write(&state, content.replace(&lineage, "forged")).unwrap();

    let output = run(&["destroy", path_str(config.path()), path_str(&state)]);
    assert_eq!(output.status.code(), Some(3));
    assert!(state.exists());
}

#[test]
fn unavailable_engine_fails_without_a_state_file() {
    let config = config_dir(CONFIG);
    let work = tempfile::tempdir().unwrap();
    let state = work.path().join("build.json");
    let output = run(&[
        "--engine",
        "exec:/nonexistent/padstone-engine",
        "build",
        path_str(config.path()),
        path_str(&state),
    ]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("not available"));
    assert!(!state.exists());
}

#[test]
fn target_configuration_builds_per_target_scopes() {
    let config = config_dir(
        r#"
[target.base.temporary_resource.docker_container.builder]
image = "debian:stable"
[target.base.resource.docker_image.result]
name = "base:latest"
[target.base.output.image]
value = "${docker_image.result.id}"
"#,
    );
    let work = tempfile::tempdir().unwrap();
    let state = work.path().join("build.json");
    let output = build(config.path(), &state);
    assert!(output.status.success(), "{}", stderr(&output));

    let doc = read_state(&state);
    let base = doc["modules"]
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["path"] == serde_json::json!(["root", "base"]))
        .unwrap();
    let keys: Vec<&String> = base["resources"].as_object().unwrap().keys().collect();
    assert_eq!(keys, vec!["docker_image.result"]);
    let image = base["outputs"]["image"].as_str().unwrap();
    assert!(stdout(&output).contains(&format!("base.image = {image}")));

    fs::remove_file(&state).unwrap();
    let output = run(&["--json", "build", path_str(config.path()), path_str(&state)]);
    assert!(output.status.success(), "{}", stderr(&output));
    let payload: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert!(payload["outputs"]["base.image"]
        .as_str()
        .unwrap()
        .starts_with("docker_image-"));
}
