//! HIST payload: the undo log, written entry by entry with self-contained
//! entity states so that undo survives a save and reload.

use draftdoc_core::document::{EntityFlags, EntityId, EntityState, LayerId};
use draftdoc_core::geometry::Point2;
use draftdoc_core::history::{Diff, EntityChange, HistoryEntry, HistoryLog};
use draftdoc_core::shape::{EntityKind, PolygonShape, PolylineShape, Shape};

use crate::SnapshotError;
use crate::container::SectionTag;
use crate::sections::{
    STYLE_BODY_BYTES, read_arrow, read_circle, read_id_list, read_layer_list, read_line,
    read_rect, read_style_body, read_text, write_arrow, write_circle, write_id_list,
    write_layer_list, write_line, write_rect, write_style_body, write_text,
};
use crate::wire::{ByteReader, ByteWriter};

/// next_id pair, three presence bytes plus one reserved, change count.
const ENTRY_HEADER_BYTES: usize = 16;

pub(crate) fn encode_history(log: &HistoryLog) -> Result<Vec<u8>, SnapshotError> {
    let mut w = ByteWriter::new();
    w.count(log.entries.len(), "history entries")?;
    w.count(log.cursor, "history cursor")?;
    for entry in &log.entries {
        w.u32(entry.next_id.before);
        w.u32(entry.next_id.after);
        w.u8(u8::from(entry.layers.is_some()));
        w.u8(u8::from(entry.draw_order.is_some()));
        w.u8(u8::from(entry.selection.is_some()));
        w.u8(0);
        w.count(entry.entities.len(), "history changes")?;
        for change in &entry.entities {
            w.u32(change.id.get());
            w.u8(u8::from(change.before.is_some()));
            w.u8(u8::from(change.after.is_some()));
            w.u16(0);
            for state in [&change.before, &change.after].into_iter().flatten() {
                write_state(&mut w, state)?;
            }
        }
        if let Some(layers) = &entry.layers {
            write_layer_list(&mut w, &layers.before)?;
            write_layer_list(&mut w, &layers.after)?;
        }
        if let Some(order) = &entry.draw_order {
            write_id_list(&mut w, &order.before)?;
            write_id_list(&mut w, &order.after)?;
        }
        if let Some(selection) = &entry.selection {
            write_id_list(&mut w, &selection.before)?;
            write_id_list(&mut w, &selection.after)?;
        }
    }
    Ok(w.into_inner())
}

pub(crate) fn decode_history(payload: &[u8]) -> Result<HistoryLog, SnapshotError> {
    let mut r = ByteReader::new(SectionTag::HIST, payload);
    let count = r.u32()?;
    let cursor = r.u32()? as usize;
    let count = r.expect_items(count, ENTRY_HEADER_BYTES)?;
    if cursor > count {
        return Err(r.malformed(format!("cursor {cursor} is past {count} entries")));
    }
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        entries.push(read_entry(&mut r)?);
    }
    r.finish()?;
    Ok(HistoryLog { entries, cursor })
}

fn read_entry(r: &mut ByteReader<'_>) -> Result<HistoryEntry, SnapshotError> {
    let next_id = Diff {
        before: r.u32()?,
        after: r.u32()?,
    };
    let has_layers = r.flag()?;
    let has_order = r.flag()?;
    let has_selection = r.flag()?;
    r.skip(1)?;
    let changes = r.u32()?;
    // Smallest change: id, two presence bytes and padding.
    let changes = r.expect_items(changes, 8)?;
    let mut entities = Vec::with_capacity(changes);
    for _ in 0..changes {
        let id = EntityId::new(r.u32()?);
        let has_before = r.flag()?;
        let has_after = r.flag()?;
        r.skip(2)?;
        let before = if has_before { Some(read_state(r)?) } else { None };
        let after = if has_after { Some(read_state(r)?) } else { None };
        let mismatched = [&before, &after]
            .into_iter()
            .flatten()
            .any(|state| state.id != id);
        if mismatched {
            return Err(r.malformed(format!("history change for {id} carries another entity")));
        }
        entities.push(EntityChange { id, before, after });
    }
    let layers = if has_layers {
        Some(Diff {
            before: read_layer_list(r)?,
            after: read_layer_list(r)?,
        })
    } else {
        None
    };
    let draw_order = if has_order {
        Some(Diff {
            before: read_id_list(r)?,
            after: read_id_list(r)?,
        })
    } else {
        None
    };
    let selection = if has_selection {
        Some(Diff {
            before: read_id_list(r)?,
            after: read_id_list(r)?,
        })
    } else {
        None
    };
    Ok(HistoryEntry {
        entities,
        layers,
        draw_order,
        selection,
        next_id,
    })
}

fn write_state(w: &mut ByteWriter, state: &EntityState) -> Result<(), SnapshotError> {
    w.u8(state.kind() as u8);
    w.u8(u8::from(state.style.is_some()));
    w.u16(0);
    w.u32(state.id.get());
    w.u32(state.layer.get());
    w.u32(state.flags.bits());
    if let Some(style) = &state.style {
        write_style_body(w, style);
    }
    match &state.shape {
        Shape::Rect(rect) => write_rect(w, rect),
        Shape::Line(line) => write_line(w, line),
        Shape::Circle(circle) => write_circle(w, circle),
        Shape::Arrow(arrow) => write_arrow(w, arrow),
        Shape::Text(text) => write_text(w, text)?,
        Shape::Polyline(poly) => {
            w.count(poly.points.len(), "polyline points")?;
            for point in &poly.points {
                w.point(*point);
            }
            w.stroke(&poly.stroke);
            w.f32(poly.elevation);
        }
        Shape::Polygon(poly) => {
            w.count(poly.points.len(), "polygon points")?;
            for point in &poly.points {
                w.point(*point);
            }
            w.f32(poly.rotation);
            w.color(poly.fill);
            w.stroke(&poly.stroke);
            w.f32(poly.elevation);
        }
    }
    Ok(())
}

fn read_state(r: &mut ByteReader<'_>) -> Result<EntityState, SnapshotError> {
    let raw_kind = r.u8()?;
    let kind = EntityKind::from_u8(raw_kind)
        .ok_or_else(|| r.malformed(format!("unknown entity kind {raw_kind}")))?;
    let has_style = r.flag()?;
    r.skip(2)?;
    let id = EntityId::new(r.u32()?);
    let layer = LayerId::new(r.u32()?);
    let flags = EntityFlags::from_bits_retain(r.u32()?);
    let style = if has_style {
        r.expect_items(1, STYLE_BODY_BYTES)?;
        Some(read_style_body(r)?)
    } else {
        None
    };
    let shape = match kind {
        EntityKind::Rect => Shape::Rect(read_rect(r)?),
        EntityKind::Line => Shape::Line(read_line(r)?),
        EntityKind::Circle => Shape::Circle(read_circle(r)?),
        EntityKind::Arrow => Shape::Arrow(read_arrow(r)?),
        EntityKind::Text => Shape::Text(read_text(r)?),
        EntityKind::Polyline => {
            let points = read_points(r)?;
            Shape::Polyline(PolylineShape {
                points,
                stroke: r.stroke()?,
                elevation: r.f32()?,
            })
        }
        EntityKind::Polygon => {
            let points = read_points(r)?;
            Shape::Polygon(PolygonShape {
                points,
                rotation: r.f32()?,
                fill: r.color()?,
                stroke: r.stroke()?,
                elevation: r.f32()?,
            })
        }
    };
    Ok(EntityState {
        id,
        layer,
        flags,
        style,
        shape,
    })
}

fn read_points(r: &mut ByteReader<'_>) -> Result<Vec<Point2>, SnapshotError> {
    let count = r.u32()?;
    let count = r.expect_items(count, 8)?;
    (0..count).map(|_| r.point()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use draftdoc_core::document::LayerRecord;
    use draftdoc_core::shape::RectRecord;
    use draftdoc_core::style::StyleOverride;
    use draftdoc_core::text::TextRecord;

    fn state(id: u32, shape: Shape) -> EntityState {
        EntityState {
            id: EntityId::new(id),
            layer: LayerId::DEFAULT,
            flags: EntityFlags::VISIBLE,
            style: Some(StyleOverride::default()),
            shape,
        }
    }

    #[test]
    fn every_kind_of_change_survives_encoding() {
        let moved_before = state(1, Shape::Rect(RectRecord::new(0.0, 0.0, 5.0, 5.0)));
        let mut moved_after = moved_before.clone();
        moved_after.shape = Shape::Rect(RectRecord::new(3.0, 1.0, 5.0, 5.0));
        let created = state(
            2,
            Shape::Polygon(PolygonShape::regular(Point2::new(1.0, 1.0), 2.0, 6, 0.25)),
        );
        let mut deleted = state(3, Shape::Text(TextRecord::new(Point2::ORIGIN, "gone")));
        deleted.style = None;

        let log = HistoryLog {
            entries: vec![
                HistoryEntry {
                    entities: vec![
                        EntityChange {
                            id: EntityId::new(1),
                            before: Some(moved_before),
                            after: Some(moved_after),
                        },
                        EntityChange {
                            id: EntityId::new(2),
                            before: None,
                            after: Some(created),
                        },
                        EntityChange {
                            id: EntityId::new(3),
                            before: Some(deleted),
                            after: None,
                        },
                    ],
                    layers: Some(Diff {
                        before: vec![LayerRecord::new(LayerId::DEFAULT, 0, "Default")],
                        after: vec![
                            LayerRecord::new(LayerId::DEFAULT, 0, "Default"),
                            LayerRecord::new(LayerId::new(1), 1, "Notes"),
                        ],
                    }),
                    draw_order: Some(Diff {
                        before: vec![EntityId::new(1), EntityId::new(3)],
                        after: vec![EntityId::new(1), EntityId::new(2)],
                    }),
                    selection: None,
                    next_id: Diff { before: 3, after: 4 },
                },
                HistoryEntry {
                    entities: Vec::new(),
                    layers: None,
                    draw_order: None,
                    selection: Some(Diff {
                        before: Vec::new(),
                        after: vec![EntityId::new(2)],
                    }),
                    next_id: Diff { before: 4, after: 4 },
                },
            ],
            cursor: 1,
        };
        let bytes = encode_history(&log).unwrap();
        assert_eq!(decode_history(&bytes).unwrap(), log);
    }

    #[test]
    fn cursor_past_the_log_is_malformed() {
        let mut bytes = encode_history(&HistoryLog::default()).unwrap();
        bytes[4..8].copy_from_slice(&1u32.to_le_bytes());
        assert!(matches!(
            decode_history(&bytes),
            Err(SnapshotError::Malformed { tag: SectionTag::HIST, .. })
        ));
    }
}
