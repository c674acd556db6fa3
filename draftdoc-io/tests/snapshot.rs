use draftdoc_core::document::{Document, EntityFlags, EntityId, LayerFlags, LayerId};
use draftdoc_core::geometry::Point2;
use draftdoc_core::history::{Diff, EntityChange, HistoryEntry, HistoryLog};
use draftdoc_core::shape::{
    ArrowRecord, CircleRecord, LineRecord, PolygonShape, PolylineShape, RectRecord, Shape,
};
use draftdoc_core::style::{Color, StyleTargets};
use draftdoc_core::text::{TextRecord, TextStyleFlags, TextStyleOp};
use draftdoc_io::{
    EsnpFile, HEADER_BYTES, Layout, SectionTag, SnapshotData, SnapshotError, SnapshotLoader,
    SnapshotSaver, TABLE_ENTRY_BYTES, deserialize, migrate_bytes, read_container, serialize,
    serialize_with_layout, write_container,
};

fn sample_document() -> Document {
    let mut doc = Document::new();
    let notes = LayerId::new(2);
    doc.ensure_layer(notes, "Notes");
    if let Some(layer) = doc.layer_mut(notes) {
        layer.flags = LayerFlags::VISIBLE | LayerFlags::LOCKED;
        layer.style.fill.enabled = false;
    }

    let mut rect = RectRecord::new(0.0, 0.0, 100.0, 50.0);
    rect.rotation = 0.3;
    rect.fill = Color::rgba(0.1, 0.5, 0.9, 1.0);
    doc.upsert(EntityId::new(1), Shape::Rect(rect), None).unwrap();
    doc.upsert(
        EntityId::new(2),
        Shape::Line(LineRecord::new(Point2::new(-5.0, 2.0), Point2::new(40.0, 8.0))),
        Some(notes),
    )
    .unwrap();
    doc.upsert(
        EntityId::new(4),
        Shape::Polyline(PolylineShape::new(vec![
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 10.0),
            Point2::new(20.0, 0.0),
            Point2::new(30.0, 10.0),
        ])),
        None,
    )
    .unwrap();
    let mut circle = CircleRecord::new(Point2::new(60.0, 60.0), 12.0, 6.0);
    circle.rotation = 1.2;
    circle.scale_x = -1.0;
    doc.upsert(EntityId::new(5), Shape::Circle(circle), None).unwrap();
    doc.upsert(
        EntityId::new(7),
        Shape::Polygon(PolygonShape::regular(Point2::new(-40.0, 0.0), 15.0, 6, 0.1)),
        None,
    )
    .unwrap();
    doc.upsert(
        EntityId::new(8),
        Shape::Arrow(ArrowRecord::new(Point2::ORIGIN, Point2::new(0.0, 30.0), 4.0)),
        None,
    )
    .unwrap();
    let mut text = TextRecord::new(Point2::new(5.0, 80.0), "Ruler: 10 mm ± 0.1");
    text.apply_style(0, 6, TextStyleFlags::BOLD, TextStyleOp::Set).unwrap();
    text.layout.width = 120.0;
    text.layout.height = 19.2;
    text.layout.line_height = 19.2;
    doc.upsert(EntityId::new(9), Shape::Text(text), Some(notes)).unwrap();

    doc.set_flags(EntityId::new(4), EntityFlags::LOCKED, true);
    doc.set_style_color(
        EntityId::new(9),
        StyleTargets::TEXT_COLOR,
        Color::rgba(1.0, 0.0, 0.0, 1.0),
    );
    doc.set_draw_order(vec![
        EntityId::new(5),
        EntityId::new(1),
        EntityId::new(9),
        EntityId::new(2),
        EntityId::new(4),
        EntityId::new(7),
        EntityId::new(8),
    ])
    .unwrap();
    doc
}

fn sample_history(doc: &Document) -> HistoryLog {
    let after = doc.capture(EntityId::new(1)).unwrap();
    let mut before = after.clone();
    before.shape.translate(draftdoc_core::geometry::Vector2::new(-10.0, 0.0));
    HistoryLog {
        entries: vec![HistoryEntry {
            entities: vec![EntityChange {
                id: EntityId::new(1),
                before: Some(before),
                after: Some(after),
            }],
            layers: None,
            draw_order: None,
            selection: Some(Diff {
                before: Vec::new(),
                after: vec![EntityId::new(1)],
            }),
            next_id: Diff {
                before: doc.next_id(),
                after: doc.next_id(),
            },
        }],
        cursor: 1,
    }
}

fn dump_json(doc: &Document) -> serde_json::Value {
    serde_json::to_value(doc.dump()).unwrap()
}

#[test]
fn round_trip_preserves_the_whole_document() {
    let doc = sample_document();
    let selection = vec![EntityId::new(7), EntityId::new(1)];
    let history = sample_history(&doc);
    let bytes = serialize(&doc, &selection, &history).unwrap();

    let loaded = deserialize(&bytes).unwrap();
    assert_eq!(dump_json(&loaded.document), dump_json(&doc));
    assert_eq!(loaded.document.dump(), doc.dump());
    assert_eq!(loaded.selection, selection);
    assert_eq!(loaded.history, history);
    loaded.document.validate().unwrap();

    // Output depends on content only.
    let again = serialize(&loaded.document, &loaded.selection, &loaded.history).unwrap();
    assert_eq!(again, bytes);
}

#[test]
fn every_section_is_listed_in_the_table() {
    let doc = sample_document();
    let bytes = serialize(&doc, &[], &HistoryLog::default()).unwrap();
    let container = read_container(&bytes).unwrap();
    let tags: Vec<SectionTag> = container.sections.iter().map(|s| s.tag).collect();
    assert_eq!(
        tags,
        vec![
            SectionTag::LAYR,
            SectionTag::ENTS,
            SectionTag::TEXT,
            SectionTag::STYL,
            SectionTag::ORDR,
            SectionTag::SELC,
            SectionTag::HIST,
            SectionTag::NIDX,
        ]
    );
    assert_eq!(container.version, 4);
}

#[test]
fn any_flipped_payload_byte_is_a_checksum_failure() {
    let doc = sample_document();
    let bytes = serialize(&doc, &[EntityId::new(1)], &sample_history(&doc)).unwrap();
    let payload_start = HEADER_BYTES + 8 * TABLE_ENTRY_BYTES;
    for at in (payload_start..bytes.len()).step_by(7) {
        let mut corrupt = bytes.clone();
        corrupt[at] ^= 0x5A;
        match deserialize(&corrupt) {
            Err(SnapshotError::CrcMismatch { .. }) => {}
            other => panic!("byte {at}: expected a checksum failure, got {other:?}"),
        }
    }
}

#[test]
fn two_section_container_with_corrupt_second_section() {
    let mut bytes = write_container(
        4,
        &[
            draftdoc_io::Section::new(SectionTag::NIDX, 3u32.to_le_bytes().to_vec()),
            draftdoc_io::Section::new(SectionTag::ORDR, vec![0, 0, 0, 0]),
        ],
    )
    .unwrap();
    let last = bytes.len() - 2;
    bytes[last] ^= 1;
    assert!(matches!(
        deserialize(&bytes),
        Err(SnapshotError::CrcMismatch {
            tag: SectionTag::ORDR,
            ..
        })
    ));
}

#[test]
fn truncation_anywhere_is_rejected() {
    let doc = sample_document();
    let bytes = serialize(&doc, &[], &HistoryLog::default()).unwrap();
    for len in [0, 4, HEADER_BYTES - 1, HEADER_BYTES + 3, bytes.len() / 2, bytes.len() - 1] {
        assert!(deserialize(&bytes[..len]).is_err(), "prefix of {len} bytes loaded");
    }
}

#[test]
fn missing_required_section_is_reported() {
    let bytes = write_container(
        4,
        &[draftdoc_io::Section::new(SectionTag::NIDX, 1u32.to_le_bytes().to_vec())],
    )
    .unwrap();
    assert_eq!(
        deserialize(&bytes).unwrap_err(),
        SnapshotError::MissingSection {
            tag: SectionTag::LAYR
        }
    );
}

#[test]
fn future_versions_are_refused() {
    let bytes = write_container(9, &[]).unwrap();
    assert_eq!(
        deserialize(&bytes).unwrap_err(),
        SnapshotError::UnsupportedVersion {
            found: 9,
            expected: 4
        }
    );
}

#[test]
fn version_three_loads_and_migrates_to_identical_bytes() {
    let doc = sample_document();
    let history = sample_history(&doc);
    let v3 = serialize_with_layout(Layout::for_version(3).unwrap(), &doc, &[], &history).unwrap();
    let v4 = serialize(&doc, &[], &history).unwrap();

    let loaded = deserialize(&v3).unwrap();
    assert_eq!(loaded.document.dump(), doc.dump());

    let (migrated, report) = migrate_bytes(&v3, 4).unwrap();
    assert_eq!(migrated, v4);
    assert_eq!(report.resliced, vec![SectionTag::ENTS, SectionTag::TEXT]);

    // A second pass is a version mismatch, reported as a skip.
    let err = migrate_bytes(&migrated, 4).unwrap_err();
    assert!(err.is_skip());
}

#[test]
fn esnp_files_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plan.esnp");
    let doc = sample_document();
    let snapshot = SnapshotData {
        selection: vec![EntityId::new(2)],
        ..SnapshotData::new(doc.clone())
    };
    EsnpFile::new().save(&snapshot, &path).unwrap();
    let loaded = EsnpFile::new().load(&path).unwrap();
    assert_eq!(loaded.document.dump(), doc.dump());
    assert_eq!(loaded.selection, vec![EntityId::new(2)]);

    let missing = dir.path().join("missing.esnp");
    assert!(matches!(
        EsnpFile::new().load(&missing),
        Err(draftdoc_io::IoError::ReadError { .. })
    ));
}
