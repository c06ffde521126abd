use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn cli_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("keysieve"))
}

#[test]
fn filter_create_add_query() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("names.ksbf");
    let path = path.to_str().unwrap();

    cli_cmd()
        .args(["filter", "create", "--path", path, "--size", "100", "--k", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("size=100 k=3 scheme=windowed"));

    cli_cmd()
        .args(["filter", "add", "--path", path, "alice", "bob"])
        .assert()
        .success()
        .stdout(predicate::str::contains("added: 2 item(s)"));

    cli_cmd()
        .args(["filter", "contains", "--path", path, "alice"])
        .assert()
        .success()
        .stdout(predicate::str::contains("maybe-present"));

    cli_cmd()
        .args(["filter", "info", "--path", path])
        .assert()
        .success()
        .stdout(predicate::str::contains("size   : 100"))
        .stdout(predicate::str::contains("bytes  : 13"));
}

#[test]
fn filter_create_needs_dimensions() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("x.ksbf");
    cli_cmd()
        .args(["filter", "create", "--path", path.to_str().unwrap(), "--size", "100"])
        .assert()
        .failure();

    cli_cmd()
        .args(["filter", "create", "--path", path.to_str().unwrap(), "--size", "0", "--k", "3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("size must be > 0"));
}

#[test]
fn positions_cycle_after_seven() {
    let out = cli_cmd()
        .args(["filter", "positions", "--size", "1000003", "--k", "10", "alice"])
        .assert()
        .success()
        .stdout(predicate::str::contains("sha256: "))
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(out).unwrap();
    let line = text.lines().find(|l| l.starts_with("positions: ")).unwrap();
    let pos: Vec<&str> = line["positions: ".len()..].split(',').collect();
    assert_eq!(pos.len(), 10);
    assert_eq!(&pos[0..3], &pos[7..10]);
}

#[test]
fn keys_add_check_and_filter() {
    let tmp = tempdir().expect("tempdir");
    let file = tmp.path().join("allowed_keys.json");
    let file = file.to_str().unwrap();
    let out = tmp.path().join("allowed_keys.ksbf");
    let out = out.to_str().unwrap();

    for key in ["k-beta", "k-alpha"] {
        cli_cmd()
            .args(["keys", "add", "--file", file, key])
            .assert()
            .success()
            .stdout(predicate::str::contains("Key added successfully."));
    }

    cli_cmd()
        .args(["keys", "add", "--file", file, "k-alpha"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Key 'k-alpha' already exists."));

    let saved = std::fs::read_to_string(file).unwrap();
    assert_eq!(saved, "[\n  \"k-alpha\",\n  \"k-beta\"\n]");

    cli_cmd()
        .args(["keys", "check", "--file", file, "k-beta"])
        .assert()
        .success()
        .stdout(predicate::str::contains("allowed"));

    cli_cmd()
        .args(["keys", "check", "--file", file, "k-gamma"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("denied"));

    cli_cmd()
        .args(["keys", "build-filter", "--file", file, "--out", out])
        .assert()
        .success()
        .stdout(predicate::str::contains("keys=2"));

    cli_cmd()
        .args(["filter", "contains", "--path", out, "k-alpha"])
        .assert()
        .success()
        .stdout(predicate::str::contains("maybe-present"));
}
