use assert_cmd::prelude::*;
use predicates::str::contains;
use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

fn settings_file(json: &str) -> NamedTempFile {
    let mut tmp = NamedTempFile::new().expect("temp settings");
    tmp.write_all(json.as_bytes()).expect("write settings");
    tmp
}

#[test]
fn headless_run_prints_summary() {
    let mut cmd = Command::cargo_bin("penumbra").expect("binary exists");
    cmd.args(["--headless", "--frames", "2", "--size", "320x240"]);
    cmd.assert()
        .success()
        .stdout(contains("Rendered 2 frame(s) at 320x240"))
        .stdout(contains(
            "Last frame: ShadowPass -> MainColorPass -> ToneMap -> Present",
        ))
        .stdout(contains("Live GPU resources after shutdown: 0"));
}

#[test]
fn settings_file_changes_the_stage_list() {
    let settings = settings_file(
        r#"{
  "shadows": false,
  "tone_map": "reinhard",
  "anti_aliasing": "off",
  "cel_shading": { "enabled": true, "levels": 3 },
  "depth_of_field": { "enabled": true }
}"#,
    );
    let mut cmd = Command::cargo_bin("penumbra").expect("binary exists");
    cmd.arg("--headless")
        .args(["--frames", "1"])
        .arg("--settings")
        .arg(settings.path());
    cmd.assert()
        .success()
        .stdout(contains("Rendered 1 frame(s) at 1280x720"))
        .stdout(contains(
            "Last frame: MainColorPass -> Stylize -> DepthOfField -> ToneMap -> Present",
        ));
}

#[test]
fn malformed_settings_file_fails_with_context() {
    let settings = settings_file("{ \"exposure\": \"bright\" }");
    let mut cmd = Command::cargo_bin("penumbra").expect("binary exists");
    cmd.arg("--headless").arg("--settings").arg(settings.path());
    cmd.assert()
        .failure()
        .stderr(contains("Error:"))
        .stderr(contains("failed to parse"));
}

#[test]
fn unknown_argument_is_rejected() {
    let mut cmd = Command::cargo_bin("penumbra").expect("binary exists");
    cmd.arg("--fullscreen");
    cmd.assert()
        .failure()
        .stderr(contains("Unknown argument: --fullscreen"))
        .stderr(contains("Usage: penumbra"));
}

#[test]
fn zero_size_is_rejected() {
    let mut cmd = Command::cargo_bin("penumbra").expect("binary exists");
    cmd.args(["--headless", "--size", "0x600"]);
    cmd.assert()
        .failure()
        .stderr(contains("must be non-zero"));
}
