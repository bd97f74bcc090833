// CLI surface contract: subcommands and required flags are stable. No
// database required — only --help output is exercised.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn top_level_help_lists_all_subcommands() {
    Command::cargo_bin("ibx")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("db")
                .and(predicate::str::contains("backfill"))
                .and(predicate::str::contains("status"))
                .and(predicate::str::contains("sweep"))
                .and(predicate::str::contains("config-hash")),
        );
}

#[test]
fn backfill_help_names_required_flags() {
    Command::cargo_bin("ibx")
        .unwrap()
        .args(["backfill", "--help"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("--inbox-id")
                .and(predicate::str::contains("--config-id"))
                .and(predicate::str::contains("--grant-id"))
                .and(predicate::str::contains("--start"))
                .and(predicate::str::contains("--end")),
        );
}

#[test]
fn backfill_requires_grant_id() {
    Command::cargo_bin("ibx")
        .unwrap()
        .args([
            "backfill",
            "--inbox-id",
            "7b7c0a52-53e0-4f2b-a53d-111111111111",
            "--config-id",
            "7b7c0a52-53e0-4f2b-a53d-222222222222",
            "--start",
            "2024-01-01T00:00:00Z",
            "--end",
            "2024-01-02T00:00:00Z",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--grant-id"));
}

#[test]
fn db_migrate_help_mentions_yes_guard() {
    Command::cargo_bin("ibx")
        .unwrap()
        .args(["db", "migrate", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--yes"));
}
