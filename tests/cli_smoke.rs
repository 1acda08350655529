//! Behavioural smoke tests for the `kiln` CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;
use tempfile::TempDir;

fn isolated_command(home: &TempDir) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("kiln");
    cmd.env_clear()
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path())
        .current_dir(home.path());
    cmd
}

#[test]
fn cli_without_arguments_prints_usage() {
    let mut cmd = cargo_bin_cmd!("kiln");
    cmd.assert().failure().stderr(contains("prepare"));
}

#[test]
fn help_lists_prepare_subcommand() {
    let mut cmd = cargo_bin_cmd!("kiln");
    cmd.arg("--help");
    cmd.assert().success().stdout(contains("prepare"));
}

#[test]
fn prepare_without_credentials_reports_configuration_error() {
    let home = TempDir::new().expect("temp dir");
    let mut cmd = isolated_command(&home);
    cmd.arg("prepare");

    cmd.assert()
        .failure()
        .code(1)
        .stderr(contains("configuration error"));
}

#[test]
fn prepare_reports_unreadable_spec_before_contacting_the_service() {
    let home = TempDir::new().expect("temp dir");
    let missing = home.path().join("missing-env.json");
    let mut cmd = isolated_command(&home);
    cmd.env("KILN_API_TOKEN", "token")
        .env("KILN_PROJECT_ID", "prj_1")
        .args(["prepare", "--environment-name", "release-env", "--environment-spec"])
        .arg(&missing);

    cmd.assert()
        .failure()
        .code(1)
        .stderr(contains("descriptor error"));
}

#[test]
fn spec_without_name_is_rejected_by_the_parser() {
    let mut cmd = cargo_bin_cmd!("kiln");
    cmd.args(["prepare", "--compute-spec", "compute.json"]);
    cmd.assert().failure().stderr(contains("--compute-name"));
}
