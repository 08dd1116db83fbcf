use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;
use tempfile::TempDir;

/// An isolated config directory. Every command below fails or finishes
/// before touching the network; the URLs point at a reserved TLD.
struct TestEnv {
    dir: TempDir,
}

impl TestEnv {
    fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create temp dir"),
        }
    }

    fn with_config(contents: &str) -> (Self, PathBuf) {
        let env = Self::new();
        let path = env.dir.path().join("config.toml");
        fs::write(&path, contents).expect("write config");
        (env, path)
    }

    fn cmd(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("poolctl");
        cmd.current_dir(self.dir.path())
            .env("HOME", self.dir.path())
            .env("XDG_CONFIG_HOME", self.dir.path().join("xdg"))
            .env_remove("POOLCTL_CONFIG")
            .env_remove("POOLCTL_PASSWORD")
            .env_remove("RUST_LOG");
        cmd
    }
}

const VMPOOLER: &str = r#"
user = "alice"

[services.vm]
url = "https://vmpooler.invalid/api/v1"

[services.abs]
type = "abs"
url = "https://abs.invalid/api/v2"
token = "abs-token"
"#;

#[test]
fn help_lists_commands() {
    TestEnv::new()
        .cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("get"))
        .stdout(contains("modify"))
        .stdout(contains("--service"));
}

#[test]
fn unknown_service_is_rejected() {
    let (env, config) = TestEnv::with_config(VMPOOLER);
    env.cmd()
        .arg("--config")
        .arg(&config)
        .args(["--service", "nope", "status"])
        .assert()
        .failure()
        .code(1)
        .stderr(contains("service 'nope' is not configured"));
}

#[test]
fn config_path_can_come_from_the_environment() {
    let (env, config) = TestEnv::with_config(VMPOOLER);
    env.cmd()
        .env("POOLCTL_CONFIG", &config)
        .args(["--service", "nope", "status"])
        .assert()
        .failure()
        .stderr(contains("service 'nope' is not configured"));
}

#[test]
fn unknown_service_type_is_rejected() {
    let (env, config) = TestEnv::with_config(
        "[services.cloud]\ntype = \"openstack\"\nurl = \"https://cloud.invalid\"\n",
    );
    env.cmd()
        .arg("--config")
        .arg(&config)
        .arg("status")
        .assert()
        .failure()
        .stderr(contains("unknown service type 'openstack'"));
}

#[test]
fn missing_url_is_reported() {
    TestEnv::new()
        .cmd()
        .arg("list")
        .assert()
        .failure()
        .stderr(contains("no url configured"));
}

#[test]
fn missing_explicit_config_file_is_reported() {
    let env = TestEnv::new();
    env.cmd()
        .args(["--config", "absent.toml", "list"])
        .assert()
        .failure()
        .stderr(contains("could not read config file"));
}

#[test]
fn get_without_os_is_a_missing_parameter() {
    let (env, config) = TestEnv::with_config(VMPOOLER);
    env.cmd()
        .arg("--config")
        .arg(&config)
        .arg("get")
        .assert()
        .failure()
        .stderr(contains("no operating systems provided"));
}

#[test]
fn large_requests_need_force() {
    let (env, config) = TestEnv::with_config(VMPOOLER);
    env.cmd()
        .arg("--config")
        .arg(&config)
        .args(["get", "centos-7-x86_64=6"])
        .assert()
        .failure()
        .stderr(contains("--force"));
}

#[test]
fn invalid_count_is_rejected() {
    let (env, config) = TestEnv::with_config(VMPOOLER);
    env.cmd()
        .arg("--config")
        .arg(&config)
        .args(["get", "centos-7-x86_64=zero"])
        .assert()
        .failure()
        .stderr(contains("'centos-7-x86_64=zero'"));
}

#[test]
fn snapshot_is_unsupported_on_abs() {
    let (env, config) = TestEnv::with_config(VMPOOLER);
    env.cmd()
        .arg("--config")
        .arg(&config)
        .args(["--service", "abs", "snapshot", "alice-1"])
        .assert()
        .failure()
        .stderr(contains("snapshot is not supported by the abs service type"));
}

#[test]
fn modify_without_token_fails() {
    let (env, config) = TestEnv::with_config(VMPOOLER);
    env.cmd()
        .arg("--config")
        .arg(&config)
        .args(["modify", "h1", "--lifetime", "4"])
        .assert()
        .failure()
        .stderr(contains("a token is required"));
}

#[test]
fn modify_needs_something_to_change() {
    let (env, config) = TestEnv::with_config(VMPOOLER);
    env.cmd()
        .arg("--config")
        .arg(&config)
        .args(["--token", "t", "modify", "h1"])
        .assert()
        .failure()
        .stderr(contains("nothing to modify"));
}

#[test]
fn modify_rejects_malformed_tags() {
    let (env, config) = TestEnv::with_config(VMPOOLER);
    env.cmd()
        .arg("--config")
        .arg(&config)
        .args(["--token", "t", "modify", "h1", "--tags", "team=qa"])
        .assert()
        .failure()
        .stderr(contains("--tags must be a JSON object"));
}

#[test]
fn delete_without_hosts_fails() {
    let (env, config) = TestEnv::with_config(VMPOOLER);
    env.cmd()
        .arg("--config")
        .arg(&config)
        .args(["--token", "t", "delete"])
        .assert()
        .failure()
        .stderr(contains("no hostnames given"));
}
