//! Command-line behaviour against a temporary data directory

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const CONFIG: &str = r#"
[sources]
cards = "cards.json"
rulings = "rulings.json"
rules = "rules.txt"
glossary = "glossary.txt"

[embedding]
provider = "mock"
dimension = 256
"#;

fn setup() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("mtgsage.toml");

    std::fs::write(&config, CONFIG).unwrap();
    std::fs::write(
        dir.path().join("cards.json"),
        r#"[{"oracle_id": "abc", "name": "Serra Angel", "oracle_text": "Flying, vigilance"}]"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("rulings.json"),
        r#"{"oracle_id": "abc", "comment": "Attacking doesn't cause it to tap.", "published_at": "2020-01-01"}"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("rules.txt"),
        "702. Keyword Abilities\n702.20 Vigilance\n702.20a Vigilance is a static ability.\n702.20b Attacking doesn't cause creatures with vigilance to tap.\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("glossary.txt"),
        "Vigilance\nA keyword ability that lets a creature attack without tapping. See rule 702.20.\n",
    )
    .unwrap();

    (dir, config)
}

fn mtgsage(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("mtgsage").unwrap();
    cmd.arg("--config").arg(config).env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("mtgsage")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("ingest"))
        .stdout(predicate::str::contains("ask"));
}

#[test]
fn test_lookup_before_ingest_fails() {
    let (_dir, config) = setup();

    mtgsage(&config)
        .args(["rule", "702.20"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn test_ingest_then_lookups() {
    let (dir, config) = setup();

    mtgsage(&config)
        .arg("ingest")
        .assert()
        .success()
        .stdout(predicate::str::contains("Rules: 4"))
        .stdout(predicate::str::contains("built"));
    assert!(dir.path().join("index").join("index.db").exists());

    mtgsage(&config)
        .arg("ingest")
        .assert()
        .success()
        .stdout(predicate::str::contains("loaded"));

    mtgsage(&config)
        .args(["rule", "702.20"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Rule 702.20: Vigilance"))
        .stdout(predicate::str::contains("- 702.20b:"));

    mtgsage(&config)
        .args(["rule", "702.20A"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Rule 702.20a:"));

    mtgsage(&config)
        .args(["rule", "vigilance"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not a rule number"));

    mtgsage(&config)
        .args(["card", "serra", "angel"])
        .assert()
        .success()
        .stdout(predicate::str::contains("(2020-01-01) Attacking doesn't cause it to tap."));

    mtgsage(&config)
        .args(["glossary", "VIGILANCE"])
        .assert()
        .success()
        .stdout(predicate::str::contains("See: 702.20"));

    mtgsage(&config)
        .args(["search", "vigilance", "static", "ability", "-k", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("rule_702_20a"));

    mtgsage(&config)
        .args(["--format", "json", "stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"glossary_terms\": 1"));

    mtgsage(&config)
        .args(["card", "--oracle-id", "zzz"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Card not found"));
}

#[test]
fn test_ingest_reports_missing_source() {
    let (dir, config) = setup();
    std::fs::remove_file(dir.path().join("glossary.txt")).unwrap();

    mtgsage(&config)
        .args(["ingest", "--skip-index"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Source glossary failed"))
        .stdout(predicate::str::contains("Index skipped"));
}

#[test]
fn test_config_reset() {
    let (_dir, config) = setup();

    mtgsage(&config)
        .args(["config", "--reset"])
        .assert()
        .success();

    mtgsage(&config)
        .args(["config", "--show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("provider = \"ollama\""));
}
