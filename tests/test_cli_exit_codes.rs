//! Exit code tests for the mtls-pubsub binary
//!
//! Configuration errors exit with 2, connect failures with 3.

use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

const SETTINGS_ENV: [&str; 7] = [
    "MQTT_BROKER_FQDN",
    "MQTT_TOPIC",
    "MQTT_USERNAME",
    "MQTT_CLIENT_ID",
    "MQTT_TLS_CERT_FILE",
    "MQTT_TLS_KEY_FILE",
    "MQTT_TLS_CA_FILE",
];

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures")).join(name)
}

/// Run the binary in an empty directory with only `env` set
fn run_client(workdir: &TempDir, env: &[(&str, String)], args: &[&str]) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_mtls-pubsub"));
    command.current_dir(workdir.path()).args(args);
    for key in SETTINGS_ENV {
        command.env_remove(key);
    }
    for (key, value) in env {
        command.env(key, value);
    }
    command.output().unwrap()
}

fn complete_env(fqdn: &str) -> Vec<(&'static str, String)> {
    vec![
        ("MQTT_BROKER_FQDN", fqdn.to_string()),
        ("MQTT_TOPIC", "sample/t1".to_string()),
        ("MQTT_USERNAME", "client1-authn-ID".to_string()),
        ("MQTT_CLIENT_ID", "client1-session1".to_string()),
        ("MQTT_TLS_CERT_FILE", fixture("client.crt").display().to_string()),
        ("MQTT_TLS_KEY_FILE", fixture("client.key").display().to_string()),
    ]
}

#[test]
fn test_missing_broker_exits_with_configuration_code() {
    let workdir = TempDir::new().unwrap();
    let env: Vec<_> = complete_env("unused")
        .into_iter()
        .filter(|(key, _)| *key != "MQTT_BROKER_FQDN")
        .collect();

    let output = run_client(&workdir, &env, &["--message", "hello"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_invalid_qos_exits_with_configuration_code() {
    let workdir = TempDir::new().unwrap();
    let env = complete_env("broker.example.net");

    let output = run_client(&workdir, &env, &["--message", "hello", "--qos", "3"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_config_check_succeeds_without_connecting() {
    let workdir = TempDir::new().unwrap();
    let env = complete_env("broker.example.net");

    let output = run_client(&workdir, &env, &["--message", "hello", "config", "--show"]);
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).contains("broker.example.net"));
}

#[test]
fn test_unreachable_broker_exits_with_connect_code() {
    let workdir = TempDir::new().unwrap();
    let env = complete_env("127.0.0.1");

    let output = run_client(&workdir, &env, &["--message", "hello"]);
    assert_eq!(output.status.code(), Some(3));
}
