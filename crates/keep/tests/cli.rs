// ABOUTME: Integration tests for the keep CLI binary.
// ABOUTME: Tests local HTML input, JSON output, archive output and failing pages.

use assert_cmd::assert::OutputAssertExt;
use assert_cmd::cargo::CommandCargoExt;
use httpmock::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::TempDir;

const GIF: &[u8] = b"GIF89a\x01\x00\x01\x00\x80\x00\x00\x00\x00\x00\xff\xff\xff!\xf9\x04\x01\x00\x00\x00\x00,\x00\x00\x00\x00\x01\x00\x01\x00\x00\x02\x02D\x01\x00;";

fn keep_cmd() -> Command {
    Command::cargo_bin("keep").unwrap()
}

const PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Test Page</title></head>
<body>
<article>
<p>Hi there, this is a paragraph with enough words, commas, and length to be kept.</p>
<p>Another paragraph follows, so the article has a little more weight to it.</p>
</article>
</body>
</html>"#;

#[test]
fn extracts_local_html_file() {
    let temp_dir = TempDir::new().unwrap();
    let html_path = temp_dir.path().join("page.html");
    fs::write(&html_path, PAGE).unwrap();

    // Private destinations are denied by default, so nothing leaves the machine.
    keep_cmd()
        .arg("--html")
        .arg(&html_path)
        .arg("http://127.0.0.1:9/article")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"title\": \"Test Page\""))
        .stdout(predicate::str::contains("Hi there"));
}

#[test]
fn writes_output_file() {
    let temp_dir = TempDir::new().unwrap();
    let html_path = temp_dir.path().join("page.html");
    let out_path = temp_dir.path().join("out.json");
    fs::write(&html_path, PAGE).unwrap();

    keep_cmd()
        .arg("--html")
        .arg(&html_path)
        .arg("-o")
        .arg(&out_path)
        .arg("http://127.0.0.1:9/article")
        .assert()
        .success();

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out_path).unwrap()).unwrap();
    assert_eq!(json["title"], "Test Page");
    assert!(json["text"].as_str().unwrap().contains("Another paragraph"));
}

#[test]
fn private_destination_is_blocked_by_default() {
    let server = MockServer::start();
    let page = server.mock(|when, then| {
        when.method(GET).path("/article");
        then.status(200).header("content-type", "text/html").body(PAGE);
    });

    keep_cmd()
        .arg(server.url("/article"))
        .assert()
        .failure()
        .stdout(predicate::str::contains("destination blocked"));
    page.assert_hits(0);
}

#[test]
fn archive_prints_self_contained_html() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/article");
        then.status(200).header("content-type", "text/html").body(PAGE.replace(
            "<p>Another",
            r#"<p><img src="/dot.gif" alt="dot"> Another"#,
        ));
    });
    server.mock(|when, then| {
        when.method(GET).path("/dot.gif");
        then.status(200).header("content-type", "image/gif").body(GIF);
    });

    keep_cmd()
        .arg("--allow-private-networks")
        .arg("--archive")
        .arg(server.url("/article"))
        .assert()
        .success()
        .stdout(predicate::str::contains("data:image/gif;base64,"))
        .stdout(predicate::str::contains("Hi there"));
}

#[test]
fn missing_page_fails() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/gone");
        then.status(404);
    });

    keep_cmd()
        .arg("--allow-private-networks")
        .arg(server.url("/gone"))
        .assert()
        .failure()
        .stdout(predicate::str::contains("fetch error"));
}
