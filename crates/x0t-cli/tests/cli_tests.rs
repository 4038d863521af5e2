//! End-to-end tests for the `x0t` binary

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const KEY: &str = "4141414141414141414141414141414141414141414141414141414141414141";
const OTHER_KEY: &str = "4242424242424242424242424242424242424242424242424242424242424242";

/// `x0t` run from an empty directory so no stray config file is picked up
fn x0t(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("x0t").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("X0T_CONFIG")
        .env_remove("X0T_MASTER_KEY")
        .env_remove("RUST_LOG");
    cmd
}

fn encode(dir: &TempDir, args: &[&str]) -> Vec<String> {
    let output = x0t(dir)
        .env("X0T_MASTER_KEY", KEY)
        .arg("encode")
        .args(args)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn test_encode_requires_master_key() {
    let dir = TempDir::new().unwrap();
    x0t(&dir)
        .args(["encode", "hello"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("X0T_MASTER_KEY"));
}

#[test]
fn test_encode_rejects_short_key() {
    let dir = TempDir::new().unwrap();
    x0t(&dir)
        .env("X0T_MASTER_KEY", "00ff")
        .args(["encode", "hello"])
        .assert()
        .failure();
}

#[test]
fn test_encode_emits_disguised_packet() {
    let dir = TempDir::new().unwrap();
    let packets = encode(&dir, &["--mimic", "http", "mesh heartbeat"]);
    assert_eq!(packets.len(), 1);

    let packet = hex::decode(&packets[0]).unwrap();
    assert!(packet.starts_with(b"GET /index.html HTTP/1.1\r\n"));
}

#[test]
fn test_decode_authenticates_against_key() {
    let dir = TempDir::new().unwrap();
    let packets = encode(&dir, &["--mimic", "dns", ""]);

    x0t(&dir)
        .env("X0T_MASTER_KEY", KEY)
        .args(["decode", &packets[0]])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    x0t(&dir)
        .env("X0T_MASTER_KEY", OTHER_KEY)
        .args(["decode", &packets[0]])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a stego packet"));
}

#[test]
fn test_decode_reads_stdin() {
    let dir = TempDir::new().unwrap();
    let packets = encode(&dir, &["--mimic", "icmp", ""]);

    x0t(&dir)
        .env("X0T_MASTER_KEY", KEY)
        .args(["decode", "-"])
        .write_stdin(format!("{}\n", packets[0]))
        .assert()
        .success();
}

#[test]
fn test_inspect_json() {
    let dir = TempDir::new().unwrap();
    let packets = encode(&dir, &["--mimic", "http", "payload"]);

    x0t(&dir)
        .args(["inspect", "--json", &packets[0]])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"mimic_valid\": true"))
        .stdout(predicate::str::contains("\"mimic_protocol\": \"http\""));
}

#[test]
fn test_inspect_rejects_bad_hex() {
    let dir = TempDir::new().unwrap();
    x0t(&dir).args(["inspect", "xyz"]).assert().failure();
}

#[test]
fn test_obfuscate_round_trip() {
    let dir = TempDir::new().unwrap();
    x0t(&dir)
        .args(["obfuscate", "--profile", "balanced", "--verify", "--stats", "mesh payload"])
        .assert()
        .success()
        .stdout(predicate::str::contains("round trip: ok"))
        .stdout(predicate::str::contains("\"packet_count\": 1"));
}

#[test]
fn test_train_writes_strategy() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("best.json");

    x0t(&dir)
        .args(["train", "--generations", "2", "--population", "4", "--seed", "7", "--output"])
        .arg(&output)
        .assert()
        .success()
        .stderr(predicate::str::contains("generations, best fitness"));

    let json = std::fs::read_to_string(&output).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert!(value["actions"].is_array());
    assert!(value["fitness"].is_number());
}

#[test]
fn test_trained_strategy_feeds_encode() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("best.json");
    x0t(&dir)
        .args(["train", "-g", "1", "-p", "2", "--seed", "1", "-o"])
        .arg(&output)
        .assert()
        .success();

    x0t(&dir)
        .env("X0T_MASTER_KEY", KEY)
        .args(["encode", "--dna"])
        .arg(&output)
        .arg("hello")
        .assert()
        .success();
}

#[test]
fn test_config_generate_and_validate() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("x0t.toml");

    x0t(&dir)
        .args(["config", "generate", "--profile", "paranoid", "--output"])
        .arg(&path)
        .assert()
        .success();
    assert!(std::fs::read_to_string(&path).unwrap().contains("# x0t configuration"));

    x0t(&dir)
        .args(["config", "validate"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("Profile: paranoid"));

    // picked up from the working directory
    x0t(&dir)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("profile = \"paranoid\""));
}

#[test]
fn test_invalid_config_is_rejected_at_startup() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[probe]\nretries = 0\n").unwrap();

    x0t(&dir)
        .arg("-c")
        .arg(&path)
        .args(["config", "paths"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("probe.retries"));
}

#[test]
fn test_config_profiles() {
    let dir = TempDir::new().unwrap();
    x0t(&dir)
        .args(["config", "profiles"])
        .assert()
        .success()
        .stdout(predicate::str::contains("minimal"))
        .stdout(predicate::str::contains("paranoid"));
}

#[test]
fn test_completions() {
    let dir = TempDir::new().unwrap();
    x0t(&dir)
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("x0t"));
}

#[test]
fn test_probe_tcp_closed_port_json() {
    let dir = TempDir::new().unwrap();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    x0t(&dir)
        .args(["probe", "--json", "tcp", "127.0.0.1", "--port", &port.to_string()])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"is_blocked\": false"))
        .stdout(predicate::str::contains("refused"));
}

#[test]
fn test_send_unknown_transport() {
    let dir = TempDir::new().unwrap();
    x0t(&dir)
        .args(["send", "--transport", "carrier-pigeon", "--target", "127.0.0.1", "hi"])
        .assert()
        .failure();
}

#[test]
fn test_send_snowflake_roundtrip() {
    use std::io::{Read, Write};

    let dir = TempDir::new().unwrap();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = std::thread::spawn(move || {
        let (mut sock, _) = listener.accept().unwrap();
        let mut buf = [0u8; 64];
        let n = sock.read(&mut buf).unwrap();
        sock.write_all(&buf[..n].to_ascii_uppercase()).unwrap();
    });

    x0t(&dir)
        .args([
            "send",
            "--transport",
            "snowflake",
            "--target",
            "127.0.0.1",
            "--port",
            &port.to_string(),
            "--receive",
            "ping",
        ])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("PING"));
    server.join().unwrap();
}
