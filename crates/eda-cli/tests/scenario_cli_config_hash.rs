//! `eda config-hash` over layered YAML.
//!
//! GREEN when:
//! - the same layers print the same hash twice;
//! - an override layer changes the hash and the merged value;
//! - a secret-looking literal aborts with CONFIG_SECRET_DETECTED.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

fn write(dir: &std::path::Path, name: &str, body: &str) -> String {
    let p = dir.join(name);
    std::fs::write(&p, body).unwrap();
    p.to_string_lossy().to_string()
}

fn hash_line(out: &[u8]) -> String {
    String::from_utf8_lossy(out)
        .lines()
        .find(|l| l.starts_with("config_hash="))
        .unwrap()
        .to_string()
}

#[test]
fn config_hash_is_stable_and_layer_sensitive() {
    let dir = tempfile::tempdir().unwrap();
    let base = write(
        dir.path(),
        "base.yaml",
        "ledger:\n  default_vat_bps: 2000\naudit:\n  path: var/audit/ledger.jsonl\n",
    );
    let site = write(dir.path(), "site.yaml", "ledger:\n  default_vat_bps: 1000\n");

    let first = Command::cargo_bin("eda")
        .unwrap()
        .args(["config-hash", &base])
        .output()
        .unwrap();
    assert!(first.status.success());
    let second = Command::cargo_bin("eda")
        .unwrap()
        .args(["config-hash", &base])
        .output()
        .unwrap();
    assert_eq!(hash_line(&first.stdout), hash_line(&second.stdout));

    let layered = Command::cargo_bin("eda")
        .unwrap()
        .args(["config-hash", &base, &site])
        .output()
        .unwrap();
    assert!(layered.status.success());
    assert_ne!(hash_line(&first.stdout), hash_line(&layered.stdout));
    assert!(String::from_utf8_lossy(&layered.stdout).contains("\"default_vat_bps\":1000"));
}

#[test]
fn secret_literal_refused() {
    let dir = tempfile::tempdir().unwrap();
    let bad = write(
        dir.path(),
        "bad.yaml",
        "database:\n  url_env: \"postgres://eda:hunter2@db:5432/eda\"\n",
    );

    Command::cargo_bin("eda")
        .unwrap()
        .args(["config-hash", &bad])
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONFIG_SECRET_DETECTED"))
        .stderr(predicate::str::contains("hunter2").not());
}

#[test]
fn out_of_range_vat_refused() {
    let dir = tempfile::tempdir().unwrap();
    let bad = write(dir.path(), "vat.yaml", "ledger:\n  default_vat_bps: 12000\n");

    Command::cargo_bin("eda")
        .unwrap()
        .args(["config-hash", &bad])
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONFIG_INVALID"));
}
