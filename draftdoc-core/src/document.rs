use std::collections::{BTreeMap, HashMap, HashSet};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::Point2;
use crate::shape::{
    ArrowRecord, CircleRecord, EntityKind, LineRecord, PolygonShape, PolylineShape, RectRecord,
    Shape,
};
use crate::style::{
    Color, LayerStyle, PackedColor, ResolvedStyle, StrokeStyle, StyleOverride, StyleTargets,
};
use crate::text::TextRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(u32);

impl EntityId {
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerId(u32);

impl LayerId {
    /// Layer every fresh document starts with. It cannot be removed.
    pub const DEFAULT: LayerId = LayerId(0);

    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.0)
    }
}

bitflags! {
    /// Unknown bits are retained so that round trips stay lossless.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct EntityFlags: u32 {
        const VISIBLE = 1 << 0;
        const LOCKED = 1 << 1;
    }
}

impl Default for EntityFlags {
    fn default() -> Self {
        EntityFlags::VISIBLE
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct LayerFlags: u32 {
        const VISIBLE = 1 << 0;
        const LOCKED = 1 << 1;
    }
}

impl Default for LayerFlags {
    fn default() -> Self {
        LayerFlags::VISIBLE
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerRecord {
    pub id: LayerId,
    pub order: u32,
    pub flags: LayerFlags,
    pub name: String,
    pub style: LayerStyle,
}

impl LayerRecord {
    pub fn new(id: LayerId, order: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            order,
            flags: LayerFlags::default(),
            name: name.into(),
            style: LayerStyle::default(),
        }
    }
}

/// Kind-independent metadata held per id.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntityMeta {
    pub layer: LayerId,
    pub flags: EntityFlags,
    pub style: Option<StyleOverride>,
}

/// Self-contained copy of one entity, independent of slot layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub id: EntityId,
    pub layer: LayerId,
    pub flags: EntityFlags,
    pub style: Option<StyleOverride>,
    pub shape: Shape,
}

impl EntityState {
    #[inline]
    pub fn kind(&self) -> EntityKind {
        self.shape.kind()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Changed,
    KindChanged { previous: EntityKind },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReorderAction {
    BringToFront,
    SendToBack,
    BringForward,
    SendBackward,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    #[error("entity {0} appears more than once")]
    DuplicateEntity(EntityId),
    #[error("layer {0} appears more than once")]
    DuplicateLayer(LayerId),
    #[error("entity {entity} refers to unknown layer {layer}")]
    UnknownLayer { entity: EntityId, layer: LayerId },
    #[error("draw order does not list exactly the live entities")]
    DrawOrderMismatch,
    #[error("id index entry for {0} does not resolve to a slot")]
    DanglingIndex(EntityId),
    #[error("layer {0} not found")]
    LayerNotFound(LayerId),
    #[error("layer {layer} still owns {count} entities")]
    LayerInUse { layer: LayerId, count: usize },
    #[error("the default layer cannot be removed")]
    DefaultLayer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    kind: EntityKind,
    index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PolylineRecord {
    offset: u32,
    count: u32,
    stroke: StrokeStyle,
    elevation: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PolygonRecord {
    offset: u32,
    count: u32,
    rotation: f32,
    fill: Color,
    stroke: StrokeStyle,
    elevation: f32,
}

/// Dense array of one kind's records with the owning id per slot.
#[derive(Debug, Clone)]
struct KindArray<T> {
    ids: Vec<EntityId>,
    records: Vec<T>,
}

impl<T> Default for KindArray<T> {
    fn default() -> Self {
        Self {
            ids: Vec::new(),
            records: Vec::new(),
        }
    }
}

impl<T> KindArray<T> {
    fn push(&mut self, id: EntityId, record: T) -> u32 {
        self.ids.push(id);
        self.records.push(record);
        (self.records.len() - 1) as u32
    }

    /// Removes a slot; returns the record and the id that moved into the hole.
    fn swap_remove(&mut self, index: u32) -> (T, Option<EntityId>) {
        let index = index as usize;
        let record = self.records.swap_remove(index);
        self.ids.swap_remove(index);
        (record, self.ids.get(index).copied())
    }

    fn get(&self, index: u32) -> Option<&T> {
        self.records.get(index as usize)
    }

    fn get_mut(&mut self, index: u32) -> Option<&mut T> {
        self.records.get_mut(index as usize)
    }

    fn owner(&self, index: u32) -> Option<EntityId> {
        self.ids.get(index as usize).copied()
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

/// Columnar entity store: one dense array per kind, a single id index,
/// per-id metadata, the draw order, layers and the shared point pool used by
/// polylines and polygons.
#[derive(Debug, Clone)]
pub struct Document {
    rects: KindArray<RectRecord>,
    lines: KindArray<LineRecord>,
    polylines: KindArray<PolylineRecord>,
    circles: KindArray<CircleRecord>,
    polygons: KindArray<PolygonRecord>,
    arrows: KindArray<ArrowRecord>,
    texts: KindArray<TextRecord>,
    points: Vec<Point2>,
    point_garbage: usize,
    index: HashMap<EntityId, Slot>,
    meta: HashMap<EntityId, EntityMeta>,
    draw_order: Vec<EntityId>,
    layers: BTreeMap<LayerId, LayerRecord>,
    next_id: u32,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        let mut layers = BTreeMap::new();
        layers.insert(
            LayerId::DEFAULT,
            LayerRecord::new(LayerId::DEFAULT, 0, "Default"),
        );
        Self {
            rects: KindArray::default(),
            lines: KindArray::default(),
            polylines: KindArray::default(),
            circles: KindArray::default(),
            polygons: KindArray::default(),
            arrows: KindArray::default(),
            texts: KindArray::default(),
            points: Vec::new(),
            point_garbage: 0,
            index: HashMap::new(),
            meta: HashMap::new(),
            draw_order: Vec::new(),
            layers,
            next_id: 1,
        }
    }

    /// Rebuilds a document from slot-independent parts, validating every
    /// cross reference before anything is returned.
    pub fn from_parts(
        layers: Vec<LayerRecord>,
        entities: Vec<EntityState>,
        draw_order: Vec<EntityId>,
        next_id: u32,
    ) -> Result<Self, DocumentError> {
        let mut document = Self::new();
        document.layers.clear();
        for layer in layers {
            let id = layer.id;
            if document.layers.insert(id, layer).is_some() {
                return Err(DocumentError::DuplicateLayer(id));
            }
        }
        for state in &entities {
            if document.index.contains_key(&state.id) {
                return Err(DocumentError::DuplicateEntity(state.id));
            }
            if !document.layers.contains_key(&state.layer) {
                return Err(DocumentError::UnknownLayer {
                    entity: state.id,
                    layer: state.layer,
                });
            }
            document.insert_slot(state.id, &state.shape);
            document.meta.insert(
                state.id,
                EntityMeta {
                    layer: state.layer,
                    flags: state.flags,
                    style: state.style,
                },
            );
        }
        document.set_draw_order(draw_order)?;
        let highest = entities.iter().map(|s| s.id.get()).max().unwrap_or(0);
        document.next_id = next_id.max(highest.saturating_add(1)).max(1);
        Ok(document)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[inline]
    pub fn contains(&self, id: EntityId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn kind_of(&self, id: EntityId) -> Option<EntityKind> {
        self.index.get(&id).map(|slot| slot.kind)
    }

    pub fn meta(&self, id: EntityId) -> Option<&EntityMeta> {
        self.meta.get(&id)
    }

    /// Live ids in paint order, bottom first.
    #[inline]
    pub fn draw_order(&self) -> &[EntityId] {
        &self.draw_order
    }

    pub fn draw_position(&self, id: EntityId) -> Option<usize> {
        self.draw_order.iter().position(|candidate| *candidate == id)
    }

    /// Draw positions of `ids` from one pass over the draw order. Unknown
    /// ids are left out.
    pub fn draw_positions<I>(&self, ids: I) -> HashMap<EntityId, usize>
    where
        I: IntoIterator<Item = EntityId>,
    {
        let wanted: HashSet<EntityId> = ids.into_iter().collect();
        self.draw_order
            .iter()
            .enumerate()
            .filter(|(_, id)| wanted.contains(id))
            .map(|(position, id)| (*id, position))
            .collect()
    }

    #[inline]
    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    /// Issues a fresh id. Ids are never handed out twice.
    pub fn allocate_id(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        id
    }

    /// Keeps the id counter ahead of an explicitly chosen id.
    pub fn observe_id(&mut self, id: EntityId) {
        self.next_id = self.next_id.max(id.0.saturating_add(1));
    }

    pub fn rect(&self, id: EntityId) -> Option<&RectRecord> {
        self.slot_of(id, EntityKind::Rect)
            .and_then(|i| self.rects.get(i))
    }

    pub fn line(&self, id: EntityId) -> Option<&LineRecord> {
        self.slot_of(id, EntityKind::Line)
            .and_then(|i| self.lines.get(i))
    }

    pub fn circle(&self, id: EntityId) -> Option<&CircleRecord> {
        self.slot_of(id, EntityKind::Circle)
            .and_then(|i| self.circles.get(i))
    }

    pub fn arrow(&self, id: EntityId) -> Option<&ArrowRecord> {
        self.slot_of(id, EntityKind::Arrow)
            .and_then(|i| self.arrows.get(i))
    }

    pub fn text(&self, id: EntityId) -> Option<&TextRecord> {
        self.slot_of(id, EntityKind::Text)
            .and_then(|i| self.texts.get(i))
    }

    pub fn text_mut(&mut self, id: EntityId) -> Option<&mut TextRecord> {
        let index = self.slot_of(id, EntityKind::Text)?;
        self.texts.get_mut(index)
    }

    /// Vertices of a polyline or polygon, borrowed from the shared pool.
    pub fn path_points(&self, id: EntityId) -> Option<&[Point2]> {
        let slot = self.index.get(&id)?;
        let (offset, count) = match slot.kind {
            EntityKind::Polyline => {
                let rec = self.polylines.get(slot.index)?;
                (rec.offset, rec.count)
            }
            EntityKind::Polygon => {
                let rec = self.polygons.get(slot.index)?;
                (rec.offset, rec.count)
            }
            _ => return None,
        };
        let start = offset as usize;
        self.points.get(start..start + count as usize)
    }

    /// Materializes the geometry of `id` as an owned shape.
    pub fn shape(&self, id: EntityId) -> Option<Shape> {
        let slot = self.index.get(&id)?;
        let shape = match slot.kind {
            EntityKind::Rect => Shape::Rect(*self.rects.get(slot.index)?),
            EntityKind::Line => Shape::Line(*self.lines.get(slot.index)?),
            EntityKind::Circle => Shape::Circle(*self.circles.get(slot.index)?),
            EntityKind::Arrow => Shape::Arrow(*self.arrows.get(slot.index)?),
            EntityKind::Text => Shape::Text(self.texts.get(slot.index)?.clone()),
            EntityKind::Polyline => {
                let rec = self.polylines.get(slot.index)?;
                Shape::Polyline(PolylineShape {
                    points: self.path_points(id)?.to_vec(),
                    stroke: rec.stroke,
                    elevation: rec.elevation,
                })
            }
            EntityKind::Polygon => {
                let rec = self.polygons.get(slot.index)?;
                Shape::Polygon(PolygonShape {
                    points: self.path_points(id)?.to_vec(),
                    rotation: rec.rotation,
                    fill: rec.fill,
                    stroke: rec.stroke,
                    elevation: rec.elevation,
                })
            }
        };
        Some(shape)
    }

    pub fn capture(&self, id: EntityId) -> Option<EntityState> {
        let meta = self.meta.get(&id)?;
        Some(EntityState {
            id,
            layer: meta.layer,
            flags: meta.flags,
            style: meta.style,
            shape: self.shape(id)?,
        })
    }

    /// Every live entity in id order.
    pub fn entity_states(&self) -> Vec<EntityState> {
        let mut ids: Vec<EntityId> = self.index.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter().filter_map(|id| self.capture(id)).collect()
    }

    /// Creates or replaces `id`. New entities land on `layer` (or the default
    /// layer), at the top of the draw order, with style overrides seeded from
    /// their fill and stroke.
    pub fn upsert(
        &mut self,
        id: EntityId,
        shape: Shape,
        layer: Option<LayerId>,
    ) -> Result<UpsertOutcome, DocumentError> {
        if let Some(layer) = layer {
            if !self.layers.contains_key(&layer) {
                return Err(DocumentError::LayerNotFound(layer));
            }
        }
        let outcome = match self.index.get(&id).copied() {
            None => {
                self.insert_slot(id, &shape);
                self.meta.insert(
                    id,
                    EntityMeta {
                        layer: layer.unwrap_or(LayerId::DEFAULT),
                        flags: EntityFlags::default(),
                        style: seeded_override(&shape),
                    },
                );
                self.draw_order.push(id);
                self.observe_id(id);
                UpsertOutcome::Created
            }
            Some(slot) if slot.kind == shape.kind() => {
                self.write_slot(slot, &shape);
                UpsertOutcome::Changed
            }
            Some(slot) => {
                self.remove_slot(slot);
                self.insert_slot(id, &shape);
                // The old override's masks belong to the previous kind.
                if let Some(meta) = self.meta.get_mut(&id) {
                    meta.style = seeded_override(&shape);
                }
                UpsertOutcome::KindChanged {
                    previous: slot.kind,
                }
            }
        };
        if let (Some(layer), Some(meta)) = (layer, self.meta.get_mut(&id)) {
            meta.layer = layer;
        }
        self.maybe_compact_points();
        Ok(outcome)
    }

    /// Rewrites the geometry of an existing entity without touching metadata.
    pub fn replace_shape(&mut self, id: EntityId, shape: &Shape) -> bool {
        let Some(slot) = self.index.get(&id).copied() else {
            return false;
        };
        if slot.kind == shape.kind() {
            self.write_slot(slot, shape);
        } else {
            self.remove_slot(slot);
            self.insert_slot(id, shape);
        }
        self.maybe_compact_points();
        true
    }

    /// Puts a captured state back. Missing entities are re-created on top of
    /// the draw order.
    pub fn restore(&mut self, state: &EntityState) {
        if self.contains(state.id) {
            self.replace_shape(state.id, &state.shape);
        } else {
            self.insert_slot(state.id, &state.shape);
            self.draw_order.push(state.id);
            self.observe_id(state.id);
        }
        self.meta.insert(
            state.id,
            EntityMeta {
                layer: state.layer,
                flags: state.flags,
                style: state.style,
            },
        );
    }

    pub fn remove(&mut self, id: EntityId) -> Option<EntityState> {
        let state = self.capture(id)?;
        let slot = self.index.remove(&id)?;
        self.remove_slot_storage(slot);
        self.meta.remove(&id);
        self.draw_order.retain(|candidate| *candidate != id);
        self.maybe_compact_points();
        Some(state)
    }

    /// Replaces the draw order with a permutation of the live ids.
    pub fn set_draw_order(&mut self, order: Vec<EntityId>) -> Result<(), DocumentError> {
        let unique: HashSet<EntityId> = order.iter().copied().collect();
        if unique.len() != order.len()
            || order.len() != self.index.len()
            || !order.iter().all(|id| self.index.contains_key(id))
        {
            return Err(DocumentError::DrawOrderMismatch);
        }
        self.draw_order = order;
        Ok(())
    }

    /// Moves `ids` within the draw order. Returns whether anything moved.
    pub fn reorder(&mut self, ids: &[EntityId], action: ReorderAction) -> bool {
        let moving: HashSet<EntityId> = ids
            .iter()
            .copied()
            .filter(|id| self.contains(*id))
            .collect();
        if moving.is_empty() {
            return false;
        }
        let before = self.draw_order.clone();
        match action {
            ReorderAction::BringToFront | ReorderAction::SendToBack => {
                let (picked, rest): (Vec<EntityId>, Vec<EntityId>) =
                    before.iter().copied().partition(|id| moving.contains(id));
                self.draw_order = if action == ReorderAction::BringToFront {
                    rest.into_iter().chain(picked).collect()
                } else {
                    picked.into_iter().chain(rest).collect()
                };
            }
            ReorderAction::BringForward => {
                let order = &mut self.draw_order;
                for i in (0..order.len().saturating_sub(1)).rev() {
                    if moving.contains(&order[i]) && !moving.contains(&order[i + 1]) {
                        order.swap(i, i + 1);
                    }
                }
            }
            ReorderAction::SendBackward => {
                let order = &mut self.draw_order;
                for i in 1..order.len() {
                    if moving.contains(&order[i]) && !moving.contains(&order[i - 1]) {
                        order.swap(i, i - 1);
                    }
                }
            }
        }
        before != self.draw_order
    }

    pub fn set_flags(&mut self, id: EntityId, mask: EntityFlags, value: bool) -> bool {
        let Some(meta) = self.meta.get_mut(&id) else {
            return false;
        };
        let before = meta.flags;
        meta.flags.set(mask, value);
        before != meta.flags
    }

    pub fn set_layer_of(&mut self, id: EntityId, layer: LayerId) -> Result<bool, DocumentError> {
        if !self.layers.contains_key(&layer) {
            return Err(DocumentError::LayerNotFound(layer));
        }
        let Some(meta) = self.meta.get_mut(&id) else {
            return Ok(false);
        };
        let changed = meta.layer != layer;
        meta.layer = layer;
        Ok(changed)
    }

    /// Sets the entity's own color for `target` and marks it as overridden.
    pub fn set_style_color(&mut self, id: EntityId, target: StyleTargets, color: Color) -> bool {
        let Some(slot) = self.index.get(&id).copied() else {
            return false;
        };
        match target {
            StyleTargets::STROKE => {
                let Some(stroke) = self.stroke_mut(slot) else {
                    return false;
                };
                stroke.color = color;
            }
            StyleTargets::FILL => {
                let Some(fill) = self.fill_mut(slot) else {
                    return false;
                };
                *fill = color;
            }
            StyleTargets::TEXT_COLOR | StyleTargets::TEXT_BACKGROUND => {
                if slot.kind != EntityKind::Text {
                    return false;
                }
            }
            _ => return false,
        }
        let Some(meta) = self.meta.get_mut(&id) else {
            return false;
        };
        let style = meta.style.get_or_insert_with(StyleOverride::default);
        style.color_mask |= target;
        if target == StyleTargets::TEXT_COLOR {
            style.text_color = PackedColor::from(color);
        } else if target == StyleTargets::TEXT_BACKGROUND {
            style.text_background = PackedColor::from(color);
        }
        true
    }

    pub fn set_style_enabled(&mut self, id: EntityId, target: StyleTargets, enabled: bool) -> bool {
        let Some(slot) = self.index.get(&id).copied() else {
            return false;
        };
        match target {
            StyleTargets::STROKE => {
                let Some(stroke) = self.stroke_mut(slot) else {
                    return false;
                };
                stroke.enabled = enabled;
            }
            StyleTargets::FILL => {
                if !slot.kind.is_filled() {
                    return false;
                }
            }
            StyleTargets::TEXT_BACKGROUND => {
                if slot.kind != EntityKind::Text {
                    return false;
                }
            }
            _ => return false,
        }
        let Some(meta) = self.meta.get_mut(&id) else {
            return false;
        };
        let style = meta.style.get_or_insert_with(StyleOverride::default);
        style.enabled_mask |= target;
        match target {
            StyleTargets::FILL => style.fill_enabled = enabled,
            StyleTargets::TEXT_BACKGROUND => style.text_background_enabled = enabled,
            _ => {}
        }
        true
    }

    /// Drops the override bits for `target`; the entity falls back to its layer.
    pub fn clear_style_override(&mut self, id: EntityId, target: StyleTargets) -> bool {
        let Some(meta) = self.meta.get_mut(&id) else {
            return false;
        };
        let Some(style) = meta.style.as_mut() else {
            return false;
        };
        let before = *style;
        style.color_mask -= target;
        style.enabled_mask -= target;
        let changed = before != *style;
        if style.is_empty() {
            meta.style = None;
        }
        changed
    }

    pub fn resolved_style(&self, id: EntityId) -> Option<ResolvedStyle> {
        let meta = self.meta.get(&id)?;
        let slot = *self.index.get(&id)?;
        let layer = self
            .layers
            .get(&meta.layer)
            .map(|layer| layer.style)
            .unwrap_or_default();
        let own = meta.style.unwrap_or_default();
        let stroke = self.stroke_of(slot);
        let fill = self.fill_of(slot);

        let pick_color =
            |target: StyleTargets, own_color: Option<Color>, layer_color: PackedColor| {
                match own_color {
                    Some(color) if own.color_mask.contains(target) => color,
                    _ => Color::from(layer_color),
                }
            };
        let pick_enabled = |target: StyleTargets, own_enabled: bool, layer_enabled: bool| {
            if own.enabled_mask.contains(target) {
                own_enabled
            } else {
                layer_enabled
            }
        };
        Some(ResolvedStyle {
            stroke: pick_color(
                StyleTargets::STROKE,
                stroke.map(|s| s.color),
                layer.stroke.color,
            ),
            stroke_enabled: stroke.is_some_and(|s| {
                pick_enabled(StyleTargets::STROKE, s.enabled, layer.stroke.enabled)
            }),
            fill: pick_color(StyleTargets::FILL, fill, layer.fill.color),
            fill_enabled: fill.is_some()
                && pick_enabled(StyleTargets::FILL, own.fill_enabled, layer.fill.enabled),
            text_color: pick_color(
                StyleTargets::TEXT_COLOR,
                Some(Color::from(own.text_color)),
                layer.text_color.color,
            ),
            text_background: pick_color(
                StyleTargets::TEXT_BACKGROUND,
                Some(Color::from(own.text_background)),
                layer.text_background.color,
            ),
            text_background_enabled: pick_enabled(
                StyleTargets::TEXT_BACKGROUND,
                own.text_background_enabled,
                layer.text_background.enabled,
            ),
        })
    }

    /// Visible and unlocked on a visible, unlocked layer.
    pub fn is_interactive(&self, id: EntityId) -> bool {
        let Some(meta) = self.meta.get(&id) else {
            return false;
        };
        let layer_ok = self.layers.get(&meta.layer).is_some_and(|layer| {
            layer.flags.contains(LayerFlags::VISIBLE) && !layer.flags.contains(LayerFlags::LOCKED)
        });
        layer_ok
            && meta.flags.contains(EntityFlags::VISIBLE)
            && !meta.flags.contains(EntityFlags::LOCKED)
    }

    /// Layers in paint order.
    pub fn layers(&self) -> impl Iterator<Item = &LayerRecord> {
        let mut layers: Vec<&LayerRecord> = self.layers.values().collect();
        layers.sort_by_key(|layer| (layer.order, layer.id));
        layers.into_iter()
    }

    pub fn layer(&self, id: LayerId) -> Option<&LayerRecord> {
        self.layers.get(&id)
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut LayerRecord> {
        self.layers.get_mut(&id)
    }

    pub fn layer_list(&self) -> Vec<LayerRecord> {
        self.layers().cloned().collect()
    }

    /// Creates the layer on top of the stack if it does not exist yet.
    pub fn ensure_layer(&mut self, id: LayerId, name: impl Into<String>) -> bool {
        if self.layers.contains_key(&id) {
            return false;
        }
        let order = self
            .layers
            .values()
            .map(|layer| layer.order + 1)
            .max()
            .unwrap_or(0);
        self.layers.insert(id, LayerRecord::new(id, order, name));
        true
    }

    pub fn remove_layer(&mut self, id: LayerId) -> Result<LayerRecord, DocumentError> {
        if id == LayerId::DEFAULT {
            return Err(DocumentError::DefaultLayer);
        }
        if !self.layers.contains_key(&id) {
            return Err(DocumentError::LayerNotFound(id));
        }
        let count = self.meta.values().filter(|meta| meta.layer == id).count();
        if count > 0 {
            return Err(DocumentError::LayerInUse { layer: id, count });
        }
        self.layers
            .remove(&id)
            .ok_or(DocumentError::LayerNotFound(id))
    }

    /// Swaps the whole layer table, used when undoing layer edits.
    pub fn replace_layers(&mut self, layers: Vec<LayerRecord>) {
        self.layers = layers.into_iter().map(|layer| (layer.id, layer)).collect();
    }

    pub fn entities_on_layer(&self, layer: LayerId) -> Vec<EntityId> {
        self.draw_order
            .iter()
            .copied()
            .filter(|id| self.meta.get(id).is_some_and(|meta| meta.layer == layer))
            .collect()
    }

    /// Slot-independent, id-sorted view used for deep comparisons and dumps.
    pub fn dump(&self) -> DocumentDump {
        DocumentDump {
            next_id: self.next_id,
            layers: self.layer_list(),
            entities: self.entity_states(),
            draw_order: self.draw_order.clone(),
        }
    }

    /// Checks that every index entry resolves to its slot and that the draw
    /// order lists exactly the live ids.
    pub fn validate(&self) -> Result<(), DocumentError> {
        for (id, slot) in &self.index {
            let owner = match slot.kind {
                EntityKind::Rect => self.rects.owner(slot.index),
                EntityKind::Line => self.lines.owner(slot.index),
                EntityKind::Polyline => self.polylines.owner(slot.index),
                EntityKind::Circle => self.circles.owner(slot.index),
                EntityKind::Polygon => self.polygons.owner(slot.index),
                EntityKind::Arrow => self.arrows.owner(slot.index),
                EntityKind::Text => self.texts.owner(slot.index),
            };
            if owner != Some(*id) || !self.meta.contains_key(id) {
                return Err(DocumentError::DanglingIndex(*id));
            }
            if let Some(meta) = self.meta.get(id) {
                if !self.layers.contains_key(&meta.layer) {
                    return Err(DocumentError::UnknownLayer {
                        entity: *id,
                        layer: meta.layer,
                    });
                }
            }
        }
        let stored = self.rects.len()
            + self.lines.len()
            + self.polylines.len()
            + self.circles.len()
            + self.polygons.len()
            + self.arrows.len()
            + self.texts.len();
        if stored != self.index.len() {
            return Err(DocumentError::DrawOrderMismatch);
        }
        let unique: HashSet<&EntityId> = self.draw_order.iter().collect();
        if unique.len() != self.draw_order.len()
            || self.draw_order.len() != self.index.len()
            || !self.draw_order.iter().all(|id| self.index.contains_key(id))
        {
            return Err(DocumentError::DrawOrderMismatch);
        }
        Ok(())
    }

    #[cfg(test)]
    fn point_pool_len(&self) -> usize {
        self.points.len()
    }

    fn slot_of(&self, id: EntityId, kind: EntityKind) -> Option<u32> {
        self.index
            .get(&id)
            .filter(|slot| slot.kind == kind)
            .map(|slot| slot.index)
    }

    fn insert_slot(&mut self, id: EntityId, shape: &Shape) {
        let index = match shape {
            Shape::Rect(r) => self.rects.push(id, *r),
            Shape::Line(l) => self.lines.push(id, *l),
            Shape::Circle(c) => self.circles.push(id, *c),
            Shape::Arrow(a) => self.arrows.push(id, *a),
            Shape::Text(t) => self.texts.push(id, t.clone()),
            Shape::Polyline(p) => {
                let (offset, count) = self.append_points(&p.points);
                self.polylines.push(
                    id,
                    PolylineRecord {
                        offset,
                        count,
                        stroke: p.stroke,
                        elevation: p.elevation,
                    },
                )
            }
            Shape::Polygon(p) => {
                let (offset, count) = self.append_points(&p.points);
                self.polygons.push(
                    id,
                    PolygonRecord {
                        offset,
                        count,
                        rotation: p.rotation,
                        fill: p.fill,
                        stroke: p.stroke,
                        elevation: p.elevation,
                    },
                )
            }
        };
        self.index.insert(
            id,
            Slot {
                kind: shape.kind(),
                index,
            },
        );
    }

    fn write_slot(&mut self, slot: Slot, shape: &Shape) {
        match shape {
            Shape::Rect(r) => {
                if let Some(rec) = self.rects.get_mut(slot.index) {
                    *rec = *r;
                }
            }
            Shape::Line(l) => {
                if let Some(rec) = self.lines.get_mut(slot.index) {
                    *rec = *l;
                }
            }
            Shape::Circle(c) => {
                if let Some(rec) = self.circles.get_mut(slot.index) {
                    *rec = *c;
                }
            }
            Shape::Arrow(a) => {
                if let Some(rec) = self.arrows.get_mut(slot.index) {
                    *rec = *a;
                }
            }
            Shape::Text(t) => {
                if let Some(rec) = self.texts.get_mut(slot.index) {
                    *rec = t.clone();
                }
            }
            Shape::Polyline(p) => {
                let Some(rec) = self.polylines.get(slot.index).copied() else {
                    return;
                };
                let (offset, count) = self.rewrite_points(rec.offset, rec.count, &p.points);
                if let Some(rec) = self.polylines.get_mut(slot.index) {
                    *rec = PolylineRecord {
                        offset,
                        count,
                        stroke: p.stroke,
                        elevation: p.elevation,
                    };
                }
            }
            Shape::Polygon(p) => {
                let Some(rec) = self.polygons.get(slot.index).copied() else {
                    return;
                };
                let (offset, count) = self.rewrite_points(rec.offset, rec.count, &p.points);
                if let Some(rec) = self.polygons.get_mut(slot.index) {
                    *rec = PolygonRecord {
                        offset,
                        count,
                        rotation: p.rotation,
                        fill: p.fill,
                        stroke: p.stroke,
                        elevation: p.elevation,
                    };
                }
            }
        }
    }

    /// Removes the slot and its index entry, keeping metadata and draw order.
    fn remove_slot(&mut self, slot: Slot) {
        if let Some(id) = self.owner_of(slot) {
            self.index.remove(&id);
        }
        self.remove_slot_storage(slot);
    }

    fn owner_of(&self, slot: Slot) -> Option<EntityId> {
        match slot.kind {
            EntityKind::Rect => self.rects.owner(slot.index),
            EntityKind::Line => self.lines.owner(slot.index),
            EntityKind::Polyline => self.polylines.owner(slot.index),
            EntityKind::Circle => self.circles.owner(slot.index),
            EntityKind::Polygon => self.polygons.owner(slot.index),
            EntityKind::Arrow => self.arrows.owner(slot.index),
            EntityKind::Text => self.texts.owner(slot.index),
        }
    }

    fn remove_slot_storage(&mut self, slot: Slot) {
        let moved = match slot.kind {
            EntityKind::Rect => self.rects.swap_remove(slot.index).1,
            EntityKind::Line => self.lines.swap_remove(slot.index).1,
            EntityKind::Circle => self.circles.swap_remove(slot.index).1,
            EntityKind::Arrow => self.arrows.swap_remove(slot.index).1,
            EntityKind::Text => self.texts.swap_remove(slot.index).1,
            EntityKind::Polyline => {
                let (rec, moved) = self.polylines.swap_remove(slot.index);
                self.point_garbage += rec.count as usize;
                moved
            }
            EntityKind::Polygon => {
                let (rec, moved) = self.polygons.swap_remove(slot.index);
                self.point_garbage += rec.count as usize;
                moved
            }
        };
        if let Some(entry) = moved.and_then(|id| self.index.get_mut(&id)) {
            entry.index = slot.index;
        }
    }

    fn append_points(&mut self, points: &[Point2]) -> (u32, u32) {
        let offset = self.points.len() as u32;
        self.points.extend_from_slice(points);
        (offset, points.len() as u32)
    }

    fn rewrite_points(&mut self, offset: u32, count: u32, points: &[Point2]) -> (u32, u32) {
        if count as usize == points.len() {
            let start = offset as usize;
            self.points[start..start + points.len()].copy_from_slice(points);
            return (offset, count);
        }
        self.point_garbage += count as usize;
        self.append_points(points)
    }

    fn maybe_compact_points(&mut self) {
        if self.point_garbage == 0 || self.point_garbage * 2 <= self.points.len() {
            return;
        }
        let mut compacted = Vec::with_capacity(self.points.len() - self.point_garbage);
        for rec in &mut self.polylines.records {
            let start = rec.offset as usize;
            let range = start..start + rec.count as usize;
            rec.offset = compacted.len() as u32;
            compacted.extend_from_slice(&self.points[range]);
        }
        for rec in &mut self.polygons.records {
            let start = rec.offset as usize;
            let range = start..start + rec.count as usize;
            rec.offset = compacted.len() as u32;
            compacted.extend_from_slice(&self.points[range]);
        }
        self.points = compacted;
        self.point_garbage = 0;
    }

    fn stroke_of(&self, slot: Slot) -> Option<StrokeStyle> {
        match slot.kind {
            EntityKind::Rect => self.rects.get(slot.index).map(|r| r.stroke),
            EntityKind::Line => self.lines.get(slot.index).map(|r| r.stroke),
            EntityKind::Polyline => self.polylines.get(slot.index).map(|r| r.stroke),
            EntityKind::Circle => self.circles.get(slot.index).map(|r| r.stroke),
            EntityKind::Polygon => self.polygons.get(slot.index).map(|r| r.stroke),
            EntityKind::Arrow => self.arrows.get(slot.index).map(|r| r.stroke),
            EntityKind::Text => None,
        }
    }

    fn fill_of(&self, slot: Slot) -> Option<Color> {
        match slot.kind {
            EntityKind::Rect => self.rects.get(slot.index).map(|r| r.fill),
            EntityKind::Circle => self.circles.get(slot.index).map(|r| r.fill),
            EntityKind::Polygon => self.polygons.get(slot.index).map(|r| r.fill),
            _ => None,
        }
    }

    fn stroke_mut(&mut self, slot: Slot) -> Option<&mut StrokeStyle> {
        match slot.kind {
            EntityKind::Rect => self.rects.get_mut(slot.index).map(|r| &mut r.stroke),
            EntityKind::Line => self.lines.get_mut(slot.index).map(|r| &mut r.stroke),
            EntityKind::Polyline => self.polylines.get_mut(slot.index).map(|r| &mut r.stroke),
            EntityKind::Circle => self.circles.get_mut(slot.index).map(|r| &mut r.stroke),
            EntityKind::Polygon => self.polygons.get_mut(slot.index).map(|r| &mut r.stroke),
            EntityKind::Arrow => self.arrows.get_mut(slot.index).map(|r| &mut r.stroke),
            EntityKind::Text => None,
        }
    }

    fn fill_mut(&mut self, slot: Slot) -> Option<&mut Color> {
        match slot.kind {
            EntityKind::Rect => self.rects.get_mut(slot.index).map(|r| &mut r.fill),
            EntityKind::Circle => self.circles.get_mut(slot.index).map(|r| &mut r.fill),
            EntityKind::Polygon => self.polygons.get_mut(slot.index).map(|r| &mut r.fill),
            _ => None,
        }
    }
}

fn seeded_override(shape: &Shape) -> Option<StyleOverride> {
    let kind = shape.kind();
    if kind == EntityKind::Text {
        return None;
    }
    let mut style = StyleOverride {
        color_mask: StyleTargets::STROKE,
        enabled_mask: StyleTargets::STROKE,
        ..StyleOverride::default()
    };
    if kind.is_filled() {
        style.color_mask |= StyleTargets::FILL;
        style.enabled_mask |= StyleTargets::FILL;
        style.fill_enabled = shape.fill().is_some_and(|fill| fill.is_visible());
    }
    Some(style)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentDump {
    pub next_id: u32,
    pub layers: Vec<LayerRecord>,
    pub entities: Vec<EntityState>,
    pub draw_order: Vec<EntityId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{PolygonShape, PolylineShape};

    fn rect(x: f32) -> Shape {
        Shape::Rect(RectRecord::new(x, 0.0, 10.0, 10.0))
    }

    fn polyline(n: usize) -> Shape {
        Shape::Polyline(PolylineShape::new(
            (0..n).map(|i| Point2::new(i as f32, 0.0)).collect(),
        ))
    }

    #[test]
    fn upsert_creates_then_changes_in_place() {
        let mut doc = Document::new();
        let id = EntityId::new(7);
        assert_eq!(doc.upsert(id, rect(0.0), None), Ok(UpsertOutcome::Created));
        assert_eq!(doc.upsert(id, rect(5.0), None), Ok(UpsertOutcome::Changed));
        assert_eq!(doc.rect(id).map(|r| r.x), Some(5.0));
        assert_eq!(doc.draw_order(), &[id]);
        assert_eq!(doc.next_id(), 8);
        doc.validate().unwrap();
    }

    #[test]
    fn kind_change_moves_storage_and_keeps_metadata() {
        let mut doc = Document::new();
        doc.ensure_layer(LayerId::new(3), "walls");
        let a = EntityId::new(1);
        let b = EntityId::new(2);
        doc.upsert(a, rect(0.0), Some(LayerId::new(3))).unwrap();
        doc.upsert(b, rect(20.0), None).unwrap();
        let outcome = doc.upsert(a, polyline(3), None).unwrap();
        assert_eq!(
            outcome,
            UpsertOutcome::KindChanged {
                previous: EntityKind::Rect
            }
        );
        assert_eq!(doc.kind_of(a), Some(EntityKind::Polyline));
        assert_eq!(doc.meta(a).map(|m| m.layer), Some(LayerId::new(3)));
        // b was swapped into a's old rect slot.
        assert_eq!(doc.rect(b).map(|r| r.x), Some(20.0));
        assert_eq!(doc.draw_order(), &[a, b]);
        doc.validate().unwrap();
    }

    #[test]
    fn removal_patches_the_swapped_slot() {
        let mut doc = Document::new();
        for i in 1..=3 {
            doc.upsert(EntityId::new(i), rect(i as f32), None).unwrap();
        }
        let removed = doc.remove(EntityId::new(1)).unwrap();
        assert_eq!(removed.kind(), EntityKind::Rect);
        assert!(!doc.contains(EntityId::new(1)));
        assert_eq!(doc.rect(EntityId::new(3)).map(|r| r.x), Some(3.0));
        assert_eq!(doc.draw_order(), &[EntityId::new(2), EntityId::new(3)]);
        doc.validate().unwrap();
    }

    #[test]
    fn point_pool_reuses_equal_length_ranges_and_compacts() {
        let mut doc = Document::new();
        let id = EntityId::new(1);
        doc.upsert(id, polyline(4), None).unwrap();
        doc.upsert(id, polyline(4), None).unwrap();
        assert_eq!(doc.point_pool_len(), 4);
        doc.upsert(id, polyline(2), None).unwrap();
        // The old 4-point range became garbage and was compacted away.
        assert_eq!(doc.point_pool_len(), 2);
        assert_eq!(doc.path_points(id).map(|p| p.len()), Some(2));
        let polygon = EntityId::new(2);
        let hexagon = PolygonShape::regular(Point2::ORIGIN, 5.0, 5, 0.0);
        doc.upsert(polygon, Shape::Polygon(hexagon), None)
            .unwrap();
        doc.remove(id);
        assert_eq!(doc.path_points(polygon).map(|p| p.len()), Some(5));
        doc.validate().unwrap();
    }

    #[test]
    fn seeded_overrides_follow_fill_presence() {
        let mut doc = Document::new();
        doc.upsert(EntityId::new(1), rect(0.0), None).unwrap();
        doc.upsert(
            EntityId::new(2),
            Shape::Line(LineRecord::new(Point2::ORIGIN, Point2::new(1.0, 0.0))),
            None,
        )
        .unwrap();
        doc.upsert(
            EntityId::new(3),
            Shape::Text(TextRecord::new(Point2::ORIGIN, "hi")),
            None,
        )
        .unwrap();
        let rect_style = doc.meta(EntityId::new(1)).and_then(|m| m.style).unwrap();
        assert_eq!(rect_style.color_mask, StyleTargets::STROKE | StyleTargets::FILL);
        assert!(rect_style.fill_enabled);
        let line_style = doc.meta(EntityId::new(2)).and_then(|m| m.style).unwrap();
        assert_eq!(line_style.color_mask, StyleTargets::STROKE);
        assert!(doc.meta(EntityId::new(3)).unwrap().style.is_none());
    }

    #[test]
    fn kind_change_reseeds_the_style_override() {
        let mut doc = Document::new();
        let id = EntityId::new(1);
        doc.upsert(
            id,
            Shape::Line(LineRecord::new(Point2::ORIGIN, Point2::new(1.0, 0.0))),
            None,
        )
        .unwrap();
        let mut record = RectRecord::new(0.0, 0.0, 1.0, 1.0);
        record.fill = Color::rgba(0.0, 1.0, 0.0, 1.0);
        let outcome = doc.upsert(id, Shape::Rect(record), None).unwrap();
        assert_eq!(
            outcome,
            UpsertOutcome::KindChanged {
                previous: EntityKind::Line
            }
        );
        let style = doc.meta(id).and_then(|m| m.style).unwrap();
        assert!(style.color_mask.contains(StyleTargets::FILL));
        assert_eq!(doc.resolved_style(id).unwrap().fill, record.fill);
    }

    #[test]
    fn resolved_style_falls_back_to_layer_after_clear() {
        let mut doc = Document::new();
        let id = EntityId::new(1);
        let mut record = RectRecord::new(0.0, 0.0, 1.0, 1.0);
        record.fill = Color::rgba(1.0, 0.0, 0.0, 1.0);
        doc.upsert(id, Shape::Rect(record), None).unwrap();
        assert_eq!(doc.resolved_style(id).unwrap().fill, record.fill);

        assert!(doc.clear_style_override(id, StyleTargets::FILL));
        let layer_fill = Color::from(LayerStyle::default().fill.color);
        assert_eq!(doc.resolved_style(id).unwrap().fill, layer_fill);

        doc.clear_style_override(id, StyleTargets::STROKE);
        assert!(doc.meta(id).unwrap().style.is_none());
    }

    #[test]
    fn reorder_moves_blocks_in_relative_order() {
        let mut doc = Document::new();
        let ids: Vec<EntityId> = (1..=4).map(EntityId::new).collect();
        for id in &ids {
            doc.upsert(*id, rect(0.0), None).unwrap();
        }
        assert!(doc.reorder(&[ids[0], ids[2]], ReorderAction::BringToFront));
        assert_eq!(doc.draw_order(), &[ids[1], ids[3], ids[0], ids[2]]);
        assert!(doc.reorder(&[ids[3]], ReorderAction::SendBackward));
        assert_eq!(doc.draw_order(), &[ids[3], ids[1], ids[0], ids[2]]);
        assert!(!doc.reorder(&[ids[3]], ReorderAction::SendToBack));
    }

    #[test]
    fn draw_positions_follow_the_current_order() {
        let mut doc = Document::new();
        let ids: Vec<EntityId> = (1..=3).map(EntityId::new).collect();
        for id in &ids {
            doc.upsert(*id, rect(0.0), None).unwrap();
        }
        doc.reorder(&[ids[0]], ReorderAction::BringToFront);
        let positions = doc.draw_positions([ids[0], ids[2], EntityId::new(9)]);
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[&ids[0]], 2);
        assert_eq!(positions[&ids[2]], 1);
        assert_eq!(doc.draw_position(ids[1]), Some(0));
    }

    #[test]
    fn from_parts_rejects_inconsistent_draw_order() {
        let mut doc = Document::new();
        doc.upsert(EntityId::new(1), rect(0.0), None).unwrap();
        let states = doc.entity_states();
        let result = Document::from_parts(doc.layer_list(), states.clone(), Vec::new(), 2);
        assert_eq!(result.err(), Some(DocumentError::DrawOrderMismatch));

        let rebuilt =
            Document::from_parts(doc.layer_list(), states, vec![EntityId::new(1)], 2).unwrap();
        assert_eq!(rebuilt.dump(), doc.dump());
    }

    #[test]
    fn layers_in_use_cannot_be_removed() {
        let mut doc = Document::new();
        let layer = LayerId::new(4);
        doc.ensure_layer(layer, "annotations");
        doc.upsert(EntityId::new(1), rect(0.0), Some(layer)).unwrap();
        assert_eq!(
            doc.remove_layer(layer),
            Err(DocumentError::LayerInUse { layer, count: 1 })
        );
        assert_eq!(doc.remove_layer(LayerId::DEFAULT), Err(DocumentError::DefaultLayer));
        doc.remove(EntityId::new(1));
        assert!(doc.remove_layer(layer).is_ok());
    }
}
