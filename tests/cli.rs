//! Integration tests for the docpool CLI.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn docpool() -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("docpool").unwrap();
    cmd.env_remove("DOCPOOL_MAX_PROCESSES")
        .env_remove("DOCPOOL_PORT_RANGE")
        .env_remove("DOCPOOL_LOG");
    cmd
}

fn write_doc(dir: &std::path::Path, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_help() {
    docpool()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("analyze"))
        .stdout(predicate::str::contains("internal-worker").not());
}

#[test]
fn test_analyze_in_process() {
    let dir = tempdir().unwrap();
    let doc = write_doc(dir.path(), "memo.txt", "three short words\n");

    docpool()
        .args(["--max-processes", "0", "--no-color", "analyze"])
        .arg(&doc)
        .assert()
        .success()
        .stdout(predicate::str::contains("memo.txt:1:0 info [word-count] 3 words"));
}

#[test]
fn test_analyze_through_worker_json() {
    let dir = tempdir().unwrap();
    let doc = write_doc(dir.path(), "memo.txt", "wide line here\n");

    docpool()
        .args(["--max-processes", "1", "-s", "max_line_width=4", "analyze", "--format", "json"])
        .arg(&doc)
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""code":"long-line""#))
        .stdout(predicate::str::contains(r#""severity":"warning""#));
}

#[test]
fn test_convert_to_file() {
    let dir = tempdir().unwrap();
    let doc = write_doc(dir.path(), "page.txt", "Tom & Jerry");
    let out = dir.path().join("page.html");

    docpool()
        .args(["--max-processes", "1", "convert", "--to", "html", "-o"])
        .arg(&out)
        .arg(&doc)
        .assert()
        .success();

    let html = std::fs::read_to_string(&out).unwrap();
    assert!(html.contains("<p>Tom &amp; Jerry</p>"));
}

#[test]
fn test_render_writes_pgm_per_page() {
    let dir = tempdir().unwrap();
    let doc = write_doc(dir.path(), "deck.txt", "one\u{0c}two\u{0c}three");
    let out = dir.path().join("pages");

    docpool()
        .args(["--max-processes", "2", "-s", "resolution=18", "render", "--first", "2", "--out"])
        .arg(&out)
        .arg(&doc)
        .assert()
        .success()
        .stdout(predicate::str::contains("deck-002.pgm"))
        .stdout(predicate::str::contains("deck-003.pgm"))
        .stdout(predicate::str::contains("deck-001.pgm").not());

    let page = std::fs::read(out.join("deck-002.pgm")).unwrap();
    assert!(page.starts_with(b"P5\n"));
}

#[test]
fn test_unsupported_input_fails() {
    let dir = tempdir().unwrap();
    let doc = dir.path().join("photo.png");
    std::fs::write(&doc, [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]).unwrap();

    docpool()
        .args(["--no-color", "analyze"])
        .arg(&doc)
        .assert()
        .failure()
        .stderr(predicate::str::contains("analyzer does not accept image documents"));
}

#[test]
fn test_bad_setting_fails() {
    let dir = tempdir().unwrap();
    let doc = write_doc(dir.path(), "a.txt", "x");

    docpool()
        .args(["--no-color", "-s", "paper_size=tabloid", "render"])
        .arg(&doc)
        .assert()
        .failure()
        .stderr(predicate::str::contains("paper_size"));
}

#[test]
fn test_worker_without_port_exits_2() {
    docpool()
        .env_remove("DOCPOOL_WORKER_PORT")
        .args(["internal-worker", "--kind", "analyzer"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("DOCPOOL_WORKER_PORT"));
}

#[test]
fn test_worker_with_garbage_port_exits_2() {
    docpool()
        .env("DOCPOOL_WORKER_PORT", "not-a-port")
        .args(["internal-worker", "--kind", "converter"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("not a valid port"));
}
