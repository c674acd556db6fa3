//! Payload codecs for the individual ESNP sections.
//!
//! Entity records are written per kind in ascending id order, so the bytes
//! depend only on document content. Decoders never trust a count: every
//! block is sized against the remaining payload before it is read.

use std::collections::HashMap;

use draftdoc_core::document::{EntityFlags, EntityId, EntityState, LayerFlags, LayerId, LayerRecord};
use draftdoc_core::geometry::Point2;
use draftdoc_core::shape::{
    ArrowRecord, CircleRecord, EntityKind, LineRecord, PolygonShape, PolylineShape, RectRecord,
    Shape,
};
use draftdoc_core::style::{LayerStyle, StyleEntry, StyleOverride, StyleTargets};
use draftdoc_core::text::{
    TextAlign, TextBoxMode, TextLayout, TextRecord, TextRun, TextStyleFlags,
};

use crate::SnapshotError;
use crate::container::SectionTag;
use crate::layout::{EntsBlock, Layout, TEXT_HEADER_BYTES, TEXT_RUN_BYTES};
use crate::wire::{ByteReader, ByteWriter};

pub(crate) const STYLE_RECORD_BYTES: usize = 24;
/// Override body without the id, shared with the history codec.
pub(crate) const STYLE_BODY_BYTES: usize = 20;

fn prefix(w: &mut ByteWriter, state: &EntityState) {
    w.u32(state.id.get());
    w.u32(state.layer.get());
    w.u32(state.flags.bits());
}

struct Prefix {
    id: EntityId,
    layer: LayerId,
    flags: EntityFlags,
}

fn read_prefix(r: &mut ByteReader<'_>) -> Result<Prefix, SnapshotError> {
    Ok(Prefix {
        id: EntityId::new(r.u32()?),
        layer: LayerId::new(r.u32()?),
        flags: EntityFlags::from_bits_retain(r.u32()?),
    })
}

fn trailer(w: &mut ByteWriter, layout: Layout) {
    for _ in 0..layout.trailer_bytes() {
        w.u8(0);
    }
}

// ---- shape bodies ---------------------------------------------------------

pub(crate) fn write_rect(w: &mut ByteWriter, rect: &RectRecord) {
    w.f32(rect.x);
    w.f32(rect.y);
    w.f32(rect.w);
    w.f32(rect.h);
    w.f32(rect.rotation);
    w.f32(rect.scale_x);
    w.f32(rect.scale_y);
    w.color(rect.fill);
    w.stroke(&rect.stroke);
    w.f32(rect.elevation);
}

pub(crate) fn read_rect(r: &mut ByteReader<'_>) -> Result<RectRecord, SnapshotError> {
    Ok(RectRecord {
        x: r.f32()?,
        y: r.f32()?,
        w: r.f32()?,
        h: r.f32()?,
        rotation: r.f32()?,
        scale_x: r.f32()?,
        scale_y: r.f32()?,
        fill: r.color()?,
        stroke: r.stroke()?,
        elevation: r.f32()?,
    })
}

pub(crate) fn write_line(w: &mut ByteWriter, line: &LineRecord) {
    w.point(line.a);
    w.point(line.b);
    w.stroke(&line.stroke);
    w.f32(line.elevation);
}

pub(crate) fn read_line(r: &mut ByteReader<'_>) -> Result<LineRecord, SnapshotError> {
    Ok(LineRecord {
        a: r.point()?,
        b: r.point()?,
        stroke: r.stroke()?,
        elevation: r.f32()?,
    })
}

pub(crate) fn write_circle(w: &mut ByteWriter, circle: &CircleRecord) {
    w.point(circle.center);
    w.f32(circle.rx);
    w.f32(circle.ry);
    w.f32(circle.rotation);
    w.f32(circle.scale_x);
    w.f32(circle.scale_y);
    w.color(circle.fill);
    w.stroke(&circle.stroke);
    w.f32(circle.elevation);
}

pub(crate) fn read_circle(r: &mut ByteReader<'_>) -> Result<CircleRecord, SnapshotError> {
    Ok(CircleRecord {
        center: r.point()?,
        rx: r.f32()?,
        ry: r.f32()?,
        rotation: r.f32()?,
        scale_x: r.f32()?,
        scale_y: r.f32()?,
        fill: r.color()?,
        stroke: r.stroke()?,
        elevation: r.f32()?,
    })
}

pub(crate) fn write_arrow(w: &mut ByteWriter, arrow: &ArrowRecord) {
    w.point(arrow.a);
    w.point(arrow.b);
    w.f32(arrow.head);
    w.stroke(&arrow.stroke);
    w.f32(arrow.elevation);
}

pub(crate) fn read_arrow(r: &mut ByteReader<'_>) -> Result<ArrowRecord, SnapshotError> {
    Ok(ArrowRecord {
        a: r.point()?,
        b: r.point()?,
        head: r.f32()?,
        stroke: r.stroke()?,
        elevation: r.f32()?,
    })
}

/// Text fields after the id/layer/flags prefix: the rest of the fixed
/// header, the run array and the content bytes.
pub(crate) fn write_text(w: &mut ByteWriter, text: &TextRecord) -> Result<(), SnapshotError> {
    w.point(text.origin);
    w.f32(text.rotation);
    w.u8(text.box_mode as u8);
    w.u8(text.align as u8);
    w.u16(0);
    w.f32(text.constraint_width);
    w.count(text.runs.len(), "text runs")?;
    w.count(text.content.len(), "text content")?;
    w.f32(text.layout.width);
    w.f32(text.layout.height);
    w.f32(text.layout.line_height);
    w.f32(text.elevation);
    for run in &text.runs {
        w.u32(run.start);
        w.u32(run.len);
        w.u32(run.font_id);
        w.f32(run.size);
        w.packed(run.color);
        w.u8(run.flags.bits());
        w.u8(0);
        w.u16(0);
    }
    w.bytes(text.content.as_bytes());
    Ok(())
}

pub(crate) fn read_text(r: &mut ByteReader<'_>) -> Result<TextRecord, SnapshotError> {
    let origin = r.point()?;
    let rotation = r.f32()?;
    let mode = r.u8()?;
    let align = r.u8()?;
    r.skip(2)?;
    let constraint_width = r.f32()?;
    let run_count = r.u32()?;
    let content_len = r.u32()?;
    let layout = TextLayout {
        width: r.f32()?,
        height: r.f32()?,
        line_height: r.f32()?,
    };
    let elevation = r.f32()?;
    let box_mode =
        TextBoxMode::from_u8(mode).ok_or_else(|| r.malformed(format!("text box mode {mode}")))?;
    let align =
        TextAlign::from_u8(align).ok_or_else(|| r.malformed(format!("text alignment {align}")))?;

    let run_count = r.expect_items(run_count, TEXT_RUN_BYTES)?;
    let mut runs = Vec::with_capacity(run_count);
    for _ in 0..run_count {
        let run = TextRun {
            start: r.u32()?,
            len: r.u32()?,
            font_id: r.u32()?,
            size: r.f32()?,
            color: r.packed()?,
            flags: TextStyleFlags::from_bits_retain(r.u8()?),
        };
        r.skip(3)?;
        let in_range = run
            .start
            .checked_add(run.len)
            .is_some_and(|end| end <= content_len);
        if !in_range {
            return Err(r.malformed(format!(
                "text run {}+{} exceeds {content_len} content bytes",
                run.start, run.len
            )));
        }
        runs.push(run);
    }
    let content = r.take(content_len as usize)?;
    let content = String::from_utf8(content.to_vec())
        .map_err(|err| r.malformed(format!("text content is not UTF-8: {err}")))?;
    Ok(TextRecord {
        origin,
        rotation,
        box_mode,
        align,
        constraint_width,
        content,
        runs,
        layout,
        elevation,
    })
}

pub(crate) fn write_style_body(w: &mut ByteWriter, style: &StyleOverride) {
    w.u8(style.color_mask.bits());
    w.u8(style.enabled_mask.bits());
    w.u16(0);
    w.packed(style.text_color);
    w.packed(style.text_background);
    w.bool32(style.fill_enabled);
    w.bool32(style.text_background_enabled);
}

pub(crate) fn read_style_body(r: &mut ByteReader<'_>) -> Result<StyleOverride, SnapshotError> {
    let color_mask = StyleTargets::from_bits_retain(r.u8()?);
    let enabled_mask = StyleTargets::from_bits_retain(r.u8()?);
    r.skip(2)?;
    Ok(StyleOverride {
        color_mask,
        enabled_mask,
        text_color: r.packed()?,
        text_background: r.packed()?,
        fill_enabled: r.bool32()?,
        text_background_enabled: r.bool32()?,
    })
}

// ---- LAYR -----------------------------------------------------------------

pub(crate) fn encode_layers(layers: &[LayerRecord]) -> Result<Vec<u8>, SnapshotError> {
    let mut w = ByteWriter::new();
    w.count(layers.len(), "layer count")?;
    for layer in layers {
        w.u32(layer.id.get());
        w.u32(layer.order);
        w.u32(layer.flags.bits());
        w.count(layer.name.len(), "layer name")?;
        w.bytes(layer.name.as_bytes());
        let style = &layer.style;
        for entry in [style.stroke, style.fill, style.text_color, style.text_background] {
            w.packed(entry.color);
        }
        for entry in [style.stroke, style.fill, style.text_color, style.text_background] {
            w.u8(u8::from(entry.enabled));
        }
    }
    Ok(w.into_inner())
}

pub(crate) fn decode_layers(payload: &[u8]) -> Result<Vec<LayerRecord>, SnapshotError> {
    let mut r = ByteReader::new(SectionTag::LAYR, payload);
    let layers = read_layer_list(&mut r)?;
    r.finish()?;
    Ok(layers)
}

/// Count-prefixed layer list, shared with the history codec.
pub(crate) fn read_layer_list(r: &mut ByteReader<'_>) -> Result<Vec<LayerRecord>, SnapshotError> {
    // Smallest layer: four words, no name, four colors, four switches.
    const MIN_LAYER_BYTES: usize = 16 + 16 + 4;
    let count = r.u32()?;
    let count = r.expect_items(count, MIN_LAYER_BYTES)?;
    let mut layers = Vec::with_capacity(count);
    for _ in 0..count {
        let id = LayerId::new(r.u32()?);
        let order = r.u32()?;
        let flags = LayerFlags::from_bits_retain(r.u32()?);
        let name_len = r.u32()? as usize;
        let name = String::from_utf8(r.take(name_len)?.to_vec())
            .map_err(|err| r.malformed(format!("layer {id} name is not UTF-8: {err}")))?;
        let colors = [r.packed()?, r.packed()?, r.packed()?, r.packed()?];
        let mut enabled = [false; 4];
        for slot in &mut enabled {
            *slot = r.u8()? != 0;
        }
        let entry = |i: usize| StyleEntry {
            color: colors[i],
            enabled: enabled[i],
        };
        layers.push(LayerRecord {
            id,
            order,
            flags,
            name,
            style: LayerStyle {
                stroke: entry(0),
                fill: entry(1),
                text_color: entry(2),
                text_background: entry(3),
            },
        });
    }
    Ok(layers)
}

pub(crate) fn write_layer_list(
    w: &mut ByteWriter,
    layers: &[LayerRecord],
) -> Result<(), SnapshotError> {
    w.bytes(&encode_layers(layers)?);
    Ok(())
}

// ---- ENTS -----------------------------------------------------------------

/// Encodes every non-text entity. `states` must be sorted by id.
pub(crate) fn encode_entities(
    states: &[EntityState],
    layout: Layout,
) -> Result<Vec<u8>, SnapshotError> {
    let of_kind = |kind: EntityKind| states.iter().filter(move |s| s.kind() == kind);
    let mut points: Vec<Point2> = Vec::new();
    let mut ranges: HashMap<EntityId, (u32, u32)> = HashMap::new();
    for state in of_kind(EntityKind::Polyline).chain(of_kind(EntityKind::Polygon)) {
        let path = match &state.shape {
            Shape::Polyline(p) => &p.points,
            Shape::Polygon(p) => &p.points,
            _ => continue,
        };
        let offset =
            u32::try_from(points.len()).map_err(|_| SnapshotError::overflow("point pool"))?;
        let count = u32::try_from(path.len()).map_err(|_| SnapshotError::overflow("point pool"))?;
        points.extend_from_slice(path);
        ranges.insert(state.id, (offset, count));
    }

    let mut w = ByteWriter::new();
    for block in EntsBlock::ORDER {
        let count = match block {
            EntsBlock::Point => points.len(),
            other => of_kind(block_kind(other)).count(),
        };
        w.count(count, "entity count")?;
    }
    for block in EntsBlock::ORDER {
        if block == EntsBlock::Point {
            for point in &points {
                w.point(*point);
            }
            continue;
        }
        for state in of_kind(block_kind(block)) {
            prefix(&mut w, state);
            match &state.shape {
                Shape::Rect(rect) => write_rect(&mut w, rect),
                Shape::Line(line) => write_line(&mut w, line),
                Shape::Circle(circle) => write_circle(&mut w, circle),
                Shape::Arrow(arrow) => write_arrow(&mut w, arrow),
                Shape::Polyline(poly) => {
                    let (offset, count) = ranges.get(&state.id).copied().unwrap_or_default();
                    w.u32(offset);
                    w.u32(count);
                    w.stroke(&poly.stroke);
                    w.f32(poly.elevation);
                }
                Shape::Polygon(poly) => {
                    let (offset, count) = ranges.get(&state.id).copied().unwrap_or_default();
                    w.u32(offset);
                    w.u32(count);
                    w.f32(poly.rotation);
                    w.color(poly.fill);
                    w.stroke(&poly.stroke);
                    w.f32(poly.elevation);
                }
                Shape::Text(_) => {}
            }
            trailer(&mut w, layout);
        }
    }
    Ok(w.into_inner())
}

fn block_kind(block: EntsBlock) -> EntityKind {
    match block {
        EntsBlock::Rect => EntityKind::Rect,
        EntsBlock::Line => EntityKind::Line,
        EntsBlock::Polyline | EntsBlock::Point => EntityKind::Polyline,
        EntsBlock::Circle => EntityKind::Circle,
        EntsBlock::Polygon => EntityKind::Polygon,
        EntsBlock::Arrow => EntityKind::Arrow,
    }
}

/// Reads the seven block counts and checks that the payload is exactly as
/// long as they imply.
pub(crate) fn ents_counts(
    payload: &[u8],
    layout: Layout,
) -> Result<[u32; EntsBlock::ORDER.len()], SnapshotError> {
    let mut r = ByteReader::new(SectionTag::ENTS, payload);
    let mut counts = [0u32; EntsBlock::ORDER.len()];
    for slot in &mut counts {
        *slot = r.u32()?;
    }
    let mut expected = EntsBlock::HEADER_BYTES;
    for (block, count) in EntsBlock::ORDER.into_iter().zip(counts) {
        expected = (count as usize)
            .checked_mul(layout.record_bytes(block))
            .and_then(|bytes| bytes.checked_add(expected))
            .ok_or_else(|| SnapshotError::overflow("ENTS records"))?;
    }
    if expected != payload.len() {
        return Err(SnapshotError::malformed(
            SectionTag::ENTS,
            format!("counts imply {expected} bytes, section has {}", payload.len()),
        ));
    }
    Ok(counts)
}

struct PathRef {
    prefix: Prefix,
    offset: u32,
    count: u32,
    body: PathBody,
}

enum PathBody {
    Polyline(PolylineShape),
    Polygon(PolygonShape),
}

pub(crate) fn decode_entities(
    payload: &[u8],
    layout: Layout,
) -> Result<Vec<EntityState>, SnapshotError> {
    let counts = ents_counts(payload, layout)?;
    let mut r = ByteReader::new(SectionTag::ENTS, &payload[EntsBlock::HEADER_BYTES..]);
    let mut states = Vec::new();
    let mut paths = Vec::new();
    let mut points = Vec::new();

    for (block, count) in EntsBlock::ORDER.into_iter().zip(counts) {
        for _ in 0..count {
            if block == EntsBlock::Point {
                points.push(r.point()?);
                continue;
            }
            let head = read_prefix(&mut r)?;
            match block {
                EntsBlock::Rect => states.push(state(head, Shape::Rect(read_rect(&mut r)?))),
                EntsBlock::Line => states.push(state(head, Shape::Line(read_line(&mut r)?))),
                EntsBlock::Circle => states.push(state(head, Shape::Circle(read_circle(&mut r)?))),
                EntsBlock::Arrow => states.push(state(head, Shape::Arrow(read_arrow(&mut r)?))),
                EntsBlock::Polyline => {
                    let offset = r.u32()?;
                    let count = r.u32()?;
                    let stroke = r.stroke()?;
                    let elevation = r.f32()?;
                    paths.push(PathRef {
                        prefix: head,
                        offset,
                        count,
                        body: PathBody::Polyline(PolylineShape {
                            points: Vec::new(),
                            stroke,
                            elevation,
                        }),
                    });
                }
                EntsBlock::Polygon => {
                    let offset = r.u32()?;
                    let count = r.u32()?;
                    let rotation = r.f32()?;
                    let fill = r.color()?;
                    let stroke = r.stroke()?;
                    let elevation = r.f32()?;
                    paths.push(PathRef {
                        prefix: head,
                        offset,
                        count,
                        body: PathBody::Polygon(PolygonShape {
                            points: Vec::new(),
                            rotation,
                            fill,
                            stroke,
                            elevation,
                        }),
                    });
                }
                EntsBlock::Point => {}
            }
            r.skip(layout.trailer_bytes())?;
        }
    }
    r.finish()?;

    for path in paths {
        let start = path.offset as usize;
        let slice = start
            .checked_add(path.count as usize)
            .and_then(|end| points.get(start..end))
            .ok_or_else(|| {
                SnapshotError::malformed(
                    SectionTag::ENTS,
                    format!(
                        "entity {} points {}+{} fall outside the {}-point pool",
                        path.prefix.id,
                        path.offset,
                        path.count,
                        points.len()
                    ),
                )
            })?;
        let shape = match path.body {
            PathBody::Polyline(mut poly) => {
                poly.points = slice.to_vec();
                Shape::Polyline(poly)
            }
            PathBody::Polygon(mut poly) => {
                poly.points = slice.to_vec();
                Shape::Polygon(poly)
            }
        };
        states.push(state(path.prefix, shape));
    }
    Ok(states)
}

fn state(prefix: Prefix, shape: Shape) -> EntityState {
    EntityState {
        id: prefix.id,
        layer: prefix.layer,
        flags: prefix.flags,
        style: None,
        shape,
    }
}

// ---- TEXT -----------------------------------------------------------------

/// Encodes the text entities among `states`, which must be sorted by id.
pub(crate) fn encode_texts(
    states: &[EntityState],
    layout: Layout,
) -> Result<Vec<u8>, SnapshotError> {
    let texts: Vec<(&EntityState, &TextRecord)> = states
        .iter()
        .filter_map(|state| match &state.shape {
            Shape::Text(text) => Some((state, text)),
            _ => None,
        })
        .collect();
    let mut w = ByteWriter::new();
    w.count(texts.len(), "text count")?;
    for (state, text) in texts {
        prefix(&mut w, state);
        write_text(&mut w, text)?;
        trailer(&mut w, layout);
    }
    Ok(w.into_inner())
}

pub(crate) fn decode_texts(
    payload: &[u8],
    layout: Layout,
) -> Result<Vec<EntityState>, SnapshotError> {
    let mut r = ByteReader::new(SectionTag::TEXT, payload);
    let count = r.u32()?;
    let count = r.expect_items(count, TEXT_HEADER_BYTES + layout.trailer_bytes())?;
    let mut states = Vec::with_capacity(count);
    for _ in 0..count {
        let head = read_prefix(&mut r)?;
        let text = read_text(&mut r)?;
        r.skip(layout.trailer_bytes())?;
        states.push(state(head, Shape::Text(text)));
    }
    r.finish()?;
    Ok(states)
}

// ---- STYL -----------------------------------------------------------------

pub(crate) fn encode_styles(states: &[EntityState]) -> Result<Vec<u8>, SnapshotError> {
    let styled: Vec<(EntityId, &StyleOverride)> = states
        .iter()
        .filter_map(|state| state.style.as_ref().map(|style| (state.id, style)))
        .collect();
    let mut w = ByteWriter::new();
    w.count(styled.len(), "style count")?;
    for (id, style) in styled {
        w.u32(id.get());
        write_style_body(&mut w, style);
    }
    Ok(w.into_inner())
}

pub(crate) fn decode_styles(
    payload: &[u8],
) -> Result<Vec<(EntityId, StyleOverride)>, SnapshotError> {
    let mut r = ByteReader::new(SectionTag::STYL, payload);
    let count = r.u32()?;
    let count = r.expect_items(count, STYLE_RECORD_BYTES)?;
    let mut styles = Vec::with_capacity(count);
    for _ in 0..count {
        let id = EntityId::new(r.u32()?);
        styles.push((id, read_style_body(&mut r)?));
    }
    r.finish()?;
    Ok(styles)
}

// ---- ORDR / SELC / NIDX ---------------------------------------------------

pub(crate) fn write_id_list(w: &mut ByteWriter, ids: &[EntityId]) -> Result<(), SnapshotError> {
    w.count(ids.len(), "id list")?;
    for id in ids {
        w.u32(id.get());
    }
    Ok(())
}

pub(crate) fn read_id_list(r: &mut ByteReader<'_>) -> Result<Vec<EntityId>, SnapshotError> {
    let count = r.u32()?;
    let count = r.expect_items(count, 4)?;
    let mut ids = Vec::with_capacity(count);
    for _ in 0..count {
        ids.push(EntityId::new(r.u32()?));
    }
    Ok(ids)
}

pub(crate) fn encode_ids(ids: &[EntityId]) -> Result<Vec<u8>, SnapshotError> {
    let mut w = ByteWriter::new();
    write_id_list(&mut w, ids)?;
    Ok(w.into_inner())
}

pub(crate) fn decode_ids(tag: SectionTag, payload: &[u8]) -> Result<Vec<EntityId>, SnapshotError> {
    let mut r = ByteReader::new(tag, payload);
    let ids = read_id_list(&mut r)?;
    r.finish()?;
    Ok(ids)
}

pub(crate) fn encode_next_id(next_id: u32) -> Vec<u8> {
    next_id.to_le_bytes().to_vec()
}

pub(crate) fn decode_next_id(payload: &[u8]) -> Result<u32, SnapshotError> {
    let mut r = ByteReader::new(SectionTag::NIDX, payload);
    let value = r.u32()?;
    r.finish()?;
    Ok(value)
}
