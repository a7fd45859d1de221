use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;
use uuid::Uuid;

/// `--qty -1` is a value, not a flag: clap hands it to the command, which
/// then stops at the missing database rather than at argument parsing.
#[test]
fn negative_qty_is_parsed_as_a_value() {
    let statement_id = Uuid::new_v4().to_string();
    let item_id = Uuid::new_v4().to_string();
    Command::cargo_bin("eda")
        .unwrap()
        .env_remove(eda_db::ENV_DB_URL)
        .args([
            "statement",
            "set-qty",
            "--statement-id",
            &statement_id,
            "--item-id",
            &item_id,
            "--qty",
            "-1",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unexpected argument").not())
        .stderr(predicate::str::contains("missing env var"));
}
