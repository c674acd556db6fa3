use std::fs;
use std::path::Path;

use assert_cmd::Command;
use draftdoc_core::document::{Document, EntityId};
use draftdoc_core::geometry::Point2;
use draftdoc_core::history::HistoryLog;
use draftdoc_core::shape::{LineRecord, RectRecord, Shape};
use draftdoc_core::text::TextRecord;
use draftdoc_io::{Layout, deserialize, serialize, serialize_with_layout};
use predicates::prelude::*;

fn document() -> Document {
    let mut doc = Document::new();
    doc.upsert(EntityId::new(1), Shape::Rect(RectRecord::new(0.0, 0.0, 4.0, 2.0)), None)
        .unwrap();
    doc.upsert(
        EntityId::new(2),
        Shape::Line(LineRecord::new(Point2::ORIGIN, Point2::new(3.0, 3.0))),
        None,
    )
    .unwrap();
    doc.upsert(
        EntityId::new(3),
        Shape::Text(TextRecord::new(Point2::new(0.0, 10.0), "note")),
        None,
    )
    .unwrap();
    doc
}

fn write_v3(path: &Path) {
    let layout = Layout::for_version(3).unwrap();
    let bytes = serialize_with_layout(layout, &document(), &[], &HistoryLog::default()).unwrap();
    fs::write(path, bytes).unwrap();
}

fn summary(output: &[u8]) -> serde_json::Value {
    serde_json::from_slice(output).unwrap()
}

#[test]
fn migrates_in_place_and_reports_a_digest() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plan.esnp");
    write_v3(&path);

    let output = Command::cargo_bin("snapshot-migrate")
        .unwrap()
        .args(["--to", "4"])
        .arg(&path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let expected = serialize(&document(), &[], &HistoryLog::default()).unwrap();
    assert_eq!(fs::read(&path).unwrap(), expected);
    let report = summary(&output);
    assert_eq!(report["migrated"], 1);
    assert_eq!(report["files"][0]["status"], "migrated");
    assert_eq!(report["files"][0]["sha256"].as_str().unwrap().len(), 64);
}

#[test]
fn walks_directories_into_an_output_dir() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    fs::create_dir_all(input.join("nested")).unwrap();
    write_v3(&input.join("a.esnp"));
    write_v3(&input.join("nested").join("b.esnp"));
    fs::write(input.join("readme.txt"), "not a snapshot").unwrap();
    let out = dir.path().join("out");

    Command::cargo_bin("snapshot-migrate")
        .unwrap()
        .arg("--out-dir")
        .arg(&out)
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"migrated\": 2"));

    for name in ["a.esnp", "nested/b.esnp"] {
        let loaded = deserialize(&fs::read(out.join(name)).unwrap()).unwrap();
        assert_eq!(loaded.document.dump(), document().dump());
    }
    // Inputs stay at v3.
    assert_eq!(&fs::read(input.join("a.esnp")).unwrap()[4..8], &3u32.to_le_bytes());
}

#[test]
fn same_named_files_in_subdirectories_keep_their_layout() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    for sub in ["a", "b"] {
        fs::create_dir_all(input.join(sub)).unwrap();
        write_v3(&input.join(sub).join("x.esnp"));
    }
    let out = dir.path().join("out");

    Command::cargo_bin("snapshot-migrate")
        .unwrap()
        .arg("--out-dir")
        .arg(&out)
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"migrated\": 2"));

    for sub in ["a", "b"] {
        let bytes = fs::read(out.join(sub).join("x.esnp")).unwrap();
        assert_eq!(deserialize(&bytes).unwrap().document.dump(), document().dump());
    }
}

#[test]
fn colliding_outputs_fail_instead_of_overwriting() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("one").join("x.esnp");
    let second = dir.path().join("two").join("x.esnp");
    for path in [&first, &second] {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        write_v3(path);
    }
    let out = dir.path().join("out");

    let output = Command::cargo_bin("snapshot-migrate")
        .unwrap()
        .arg("--out-dir")
        .arg(&out)
        .arg(&first)
        .arg(&second)
        .assert()
        .failure()
        .get_output()
        .stdout
        .clone();

    let report = summary(&output);
    assert_eq!(report["migrated"], 1);
    assert_eq!(report["failed"], 1);
    assert_eq!(report["files"][1]["status"], "failed");
    assert!(out.join("x.esnp").exists());
}

#[test]
fn dry_run_writes_nothing_and_current_files_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let old = dir.path().join("old.esnp");
    let current = dir.path().join("current.esnp");
    write_v3(&old);
    fs::write(&current, serialize(&document(), &[], &HistoryLog::default()).unwrap()).unwrap();
    let before = fs::read(&old).unwrap();

    let output = Command::cargo_bin("snapshot-migrate")
        .unwrap()
        .arg("--dry-run")
        .arg(&old)
        .arg(&current)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    assert_eq!(fs::read(&old).unwrap(), before);
    let report = summary(&output);
    assert_eq!(report["migrated"], 1);
    assert_eq!(report["skipped"], 1);
}

#[test]
fn corrupt_input_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.esnp");
    write_v3(&path);
    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&path, bytes).unwrap();

    Command::cargo_bin("snapshot-migrate")
        .unwrap()
        .arg(&path)
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"failed\": 1"))
        .stdout(predicate::str::contains("checksum"));
}
