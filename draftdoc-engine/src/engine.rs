use draftdoc_core::document::{
    Document, EntityFlags, EntityId, EntityState, LayerFlags, LayerId, LayerRecord, ReorderAction,
    UpsertOutcome,
};
use draftdoc_core::geometry::Point2;
use draftdoc_core::history::{HistoryEntry, HistoryLog};
use draftdoc_core::shape::{
    ArrowRecord, CircleRecord, EntityKind, LineRecord, PolygonShape, PolylineShape, RectRecord,
    Shape,
};
use draftdoc_core::style::{Color, PackedColor, ResolvedStyle, StyleTargets};
use draftdoc_core::text::{
    TextEditError, TextRecord, TextStyleFlags, TextStyleOp, TextStyleSummary,
};
use draftdoc_io::{deserialize, serialize};
use tracing::{debug, warn};

use crate::errors::EngineError;
use crate::events::{ChangeMask, EventBatch, EventQueue, FlushStamp};
use crate::history::{CommitOutcome, HistoryManager};
use crate::selection::Selection;
use crate::session::Session;
use crate::snap::SnapOptions;
use crate::spatial::SpatialIndex;
use crate::text_layout::{MonospaceShaper, TextShaper};

/// Tunables of one engine instance. Distances are in document units.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    pub event_capacity: usize,
    pub spatial_cell_size: f32,
    pub pick_tolerance: f32,
    /// Divided by `ViewContext::scale` before use.
    pub drag_threshold: f32,
    pub rotate_handle_offset: f32,
    pub min_entity_size: f32,
    pub rotation_snap_degrees: f32,
    pub text_advance_ratio: f32,
    pub text_line_height_ratio: f32,
    pub snap: SnapOptions,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            event_capacity: 4096,
            spatial_cell_size: 64.0,
            pick_tolerance: 4.0,
            drag_threshold: 0.0,
            rotate_handle_offset: 24.0,
            min_entity_size: 1.0,
            rotation_snap_degrees: 15.0,
            text_advance_ratio: 0.6,
            text_line_height_ratio: 1.2,
            snap: SnapOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryMeta {
    /// Open transaction nesting depth.
    pub depth: u32,
    pub cursor: usize,
    pub len: usize,
    pub generation: u64,
}

/// One document with everything that operates on it: spatial index,
/// selection, event pipeline, undo history and the transform session.
#[derive(Debug)]
pub struct Engine {
    pub(crate) document: Document,
    pub(crate) index: SpatialIndex,
    pub(crate) selection: Selection,
    pub(crate) events: EventQueue,
    pub(crate) history: HistoryManager,
    pub(crate) session: Option<Session>,
    pub(crate) options: EngineOptions,
    pub(crate) shaper: Box<dyn TextShaper>,
    generation: u64,
    snapshot_cache: Option<Vec<u8>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::with_options(EngineOptions::default())
    }

    pub fn with_options(options: EngineOptions) -> Self {
        let shaper = MonospaceShaper {
            advance_ratio: options.text_advance_ratio,
            line_height_ratio: options.text_line_height_ratio,
        };
        Self::with_shaper(options, Box::new(shaper))
    }

    pub fn with_shaper(options: EngineOptions, shaper: Box<dyn TextShaper>) -> Self {
        Self {
            document: Document::new(),
            index: SpatialIndex::new(options.spatial_cell_size),
            selection: Selection::default(),
            events: EventQueue::new(options.event_capacity),
            history: HistoryManager::default(),
            session: None,
            options,
            shaper,
            generation: 0,
            snapshot_cache: None,
        }
    }

    #[inline]
    pub fn document(&self) -> &Document {
        &self.document
    }

    #[inline]
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Bumped once per committed transaction, undo, redo or load.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn entity(&self, id: EntityId) -> Option<EntityState> {
        self.document.capture(id)
    }

    // ---- transactions -------------------------------------------------

    /// Document edits other than the session's own are refused while a
    /// transform session is open.
    #[inline]
    pub(crate) fn ensure_idle(&self) -> Result<(), EngineError> {
        match self.session {
            Some(_) => Err(EngineError::SessionActive),
            None => Ok(()),
        }
    }

    /// Runs `f` inside a history transaction. `f` must validate before it
    /// mutates; on error the transaction is dropped.
    pub(crate) fn transact<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        self.ensure_idle()?;
        self.history.begin(&self.document);
        match f(self) {
            Ok(value) => {
                self.finish_transaction();
                Ok(value)
            }
            Err(err) => {
                self.history.discard();
                Err(err)
            }
        }
    }

    pub(crate) fn finish_transaction(&mut self) -> bool {
        match self.history.commit(&self.document, self.selection.ids()) {
            CommitOutcome::Pushed => {
                self.generation += 1;
                self.events.record_history();
                self.mark_dirty();
                debug!(
                    generation = self.generation,
                    cursor = self.history.log().cursor,
                    "committed history entry"
                );
                true
            }
            CommitOutcome::NotOpen | CommitOutcome::Nested | CommitOutcome::Empty => false,
        }
    }

    #[inline]
    pub(crate) fn mark_dirty(&mut self) {
        self.snapshot_cache = None;
    }

    // ---- low level mutation ---------------------------------------------

    fn check_shape(&self, shape: &Shape, layer: Option<LayerId>) -> Result<(), EngineError> {
        if !shape.is_finite() {
            return Err(EngineError::NonFinite { what: "geometry" });
        }
        match layer {
            Some(layer) if self.document.layer(layer).is_none() => {
                Err(EngineError::LayerNotFound(layer))
            }
            _ => Ok(()),
        }
    }

    /// Lays out text shapes with the configured shaper.
    pub(crate) fn prepare_shape(&self, shape: &mut Shape) {
        if let Shape::Text(text) = shape {
            text.normalize_runs();
            text.layout = self.shaper.layout(text);
        }
    }

    pub(crate) fn reindex(&mut self, id: EntityId) {
        match self.document.shape(id) {
            Some(shape) => self.index.update(id, shape.coverage_bounds()),
            None => self.index.remove(id),
        }
    }

    /// Upserts one entity with history marks, index upkeep and events.
    pub(crate) fn write_entity(
        &mut self,
        id: EntityId,
        mut shape: Shape,
        layer: Option<LayerId>,
    ) -> Result<UpsertOutcome, EngineError> {
        self.check_shape(&shape, layer)?;
        let previous = self.document.kind_of(id);
        self.history.mark_entity(&self.document, id);
        if previous != Some(shape.kind()) {
            self.history.mark_draw_order(&self.document);
        }
        self.prepare_shape(&mut shape);
        let kind = shape.kind();
        let layer_before = self.document.meta(id).map(|meta| meta.layer);
        let outcome = self.document.upsert(id, shape, layer)?;
        self.reindex(id);
        match outcome {
            UpsertOutcome::Created => {
                self.events.record_created(id, kind);
                self.events.record_order();
            }
            UpsertOutcome::Changed => {
                let mut mask = ChangeMask::GEOMETRY | ChangeMask::BOUNDS | ChangeMask::STYLE;
                if kind == EntityKind::Text {
                    mask |= ChangeMask::TEXT;
                }
                if layer.is_some() && layer != layer_before {
                    mask |= ChangeMask::LAYER;
                }
                self.events.record_changed(id, mask);
            }
            UpsertOutcome::KindChanged { .. } => {
                self.events.record_changed(id, ChangeMask::all());
                self.events.record_order();
            }
        }
        self.mark_dirty();
        Ok(outcome)
    }

    /// Replaces the geometry of an existing entity of the same kind.
    pub(crate) fn rewrite_shape(&mut self, id: EntityId, mut shape: Shape, mask: ChangeMask) {
        self.history.mark_entity(&self.document, id);
        self.prepare_shape(&mut shape);
        if self.document.replace_shape(id, &shape) {
            self.reindex(id);
            self.events.record_changed(id, mask);
            self.mark_dirty();
        }
    }

    pub(crate) fn remove_entity(&mut self, id: EntityId) -> bool {
        if !self.document.contains(id) {
            return false;
        }
        self.history.mark_entity(&self.document, id);
        self.history.mark_draw_order(&self.document);
        if self.selection.contains(id) {
            self.history.mark_selection(self.selection.ids());
            self.selection.remove(id);
            self.events.record_selection();
        }
        self.document.remove(id);
        self.index.remove(id);
        self.events.record_deleted(id);
        self.events.record_order();
        self.mark_dirty();
        true
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        let ids: Vec<EntityId> = self.document.draw_order().to_vec();
        for id in ids {
            self.reindex(id);
        }
    }

    // ---- entity store ---------------------------------------------------

    /// Creates `id` or replaces its geometry. A new id lands on `layer` (or
    /// the default layer) at the top of the draw order.
    pub fn upsert_entity(
        &mut self,
        id: EntityId,
        shape: Shape,
        layer: Option<LayerId>,
    ) -> Result<UpsertOutcome, EngineError> {
        self.ensure_idle()?;
        self.check_shape(&shape, layer)?;
        let kind = shape.kind();
        let outcome = self.transact(|engine| engine.write_entity(id, shape, layer))?;
        debug!(id = id.get(), %kind, ?outcome, "upserted entity");
        Ok(outcome)
    }

    pub fn upsert_rect(
        &mut self,
        id: EntityId,
        rect: RectRecord,
    ) -> Result<UpsertOutcome, EngineError> {
        self.upsert_entity(id, Shape::Rect(rect), None)
    }

    pub fn upsert_line(
        &mut self,
        id: EntityId,
        line: LineRecord,
    ) -> Result<UpsertOutcome, EngineError> {
        self.upsert_entity(id, Shape::Line(line), None)
    }

    pub fn upsert_polyline(
        &mut self,
        id: EntityId,
        polyline: PolylineShape,
    ) -> Result<UpsertOutcome, EngineError> {
        self.upsert_entity(id, Shape::Polyline(polyline), None)
    }

    pub fn upsert_circle(
        &mut self,
        id: EntityId,
        circle: CircleRecord,
    ) -> Result<UpsertOutcome, EngineError> {
        self.upsert_entity(id, Shape::Circle(circle), None)
    }

    pub fn upsert_polygon(
        &mut self,
        id: EntityId,
        polygon: PolygonShape,
    ) -> Result<UpsertOutcome, EngineError> {
        self.upsert_entity(id, Shape::Polygon(polygon), None)
    }

    pub fn upsert_arrow(
        &mut self,
        id: EntityId,
        arrow: ArrowRecord,
    ) -> Result<UpsertOutcome, EngineError> {
        self.upsert_entity(id, Shape::Arrow(arrow), None)
    }

    pub fn upsert_text(
        &mut self,
        id: EntityId,
        text: TextRecord,
    ) -> Result<UpsertOutcome, EngineError> {
        self.upsert_entity(id, Shape::Text(text), None)
    }

    /// Creates an entity under a freshly allocated id.
    pub fn create_entity(
        &mut self,
        shape: Shape,
        layer: Option<LayerId>,
    ) -> Result<EntityId, EngineError> {
        self.ensure_idle()?;
        self.check_shape(&shape, layer)?;
        let id = self.transact(|engine| {
            let id = engine.document.allocate_id();
            engine.write_entity(id, shape, layer)?;
            Ok(id)
        })?;
        debug!(id = id.get(), "created entity");
        Ok(id)
    }

    /// Issues the next id without creating anything.
    pub fn allocate_entity_id(&mut self) -> EntityId {
        let id = self.document.allocate_id();
        self.mark_dirty();
        id
    }

    /// Deletes every known id in `ids` as one transaction.
    pub fn delete_entities(&mut self, ids: &[EntityId]) -> Result<usize, EngineError> {
        self.ensure_idle()?;
        let first = *ids.first().ok_or(EngineError::EmptySelection)?;
        let live: Vec<EntityId> = ids
            .iter()
            .copied()
            .filter(|id| self.document.contains(*id))
            .collect();
        if live.is_empty() {
            return Err(EngineError::EntityNotFound(first));
        }
        let removed = self.transact(|engine| {
            Ok(live.iter().filter(|id| engine.remove_entity(**id)).count())
        })?;
        debug!(count = removed, "deleted entities");
        Ok(removed)
    }

    pub fn delete_entity(&mut self, id: EntityId) -> Result<(), EngineError> {
        self.delete_entities(&[id]).map(|_| ())
    }

    /// Applies `edit` to a copy of the shape and writes it back as one
    /// transaction. `edit` returning false means the kind does not support
    /// the operation.
    fn edit_shape(
        &mut self,
        id: EntityId,
        op: &'static str,
        mask: ChangeMask,
        edit: impl FnOnce(&mut Shape) -> bool,
    ) -> Result<(), EngineError> {
        self.ensure_idle()?;
        let mut shape = self
            .document
            .shape(id)
            .ok_or(EngineError::EntityNotFound(id))?;
        let kind = shape.kind();
        if !edit(&mut shape) {
            return Err(EngineError::UnsupportedKind { op, kind });
        }
        if !shape.is_finite() {
            return Err(EngineError::NonFinite { what: op });
        }
        self.transact(|engine| {
            engine.rewrite_shape(id, shape, mask);
            Ok(())
        })?;
        debug!(id = id.get(), op, "edited entity");
        Ok(())
    }

    fn require_finite(values: &[f32], what: &'static str) -> Result<(), EngineError> {
        if values.iter().all(|v| v.is_finite()) {
            Ok(())
        } else {
            Err(EngineError::NonFinite { what })
        }
    }

    /// Moves the entity so that its bounds center lands on `(x, y)`.
    pub fn set_entity_position(&mut self, id: EntityId, x: f32, y: f32) -> Result<(), EngineError> {
        Self::require_finite(&[x, y], "position")?;
        self.edit_shape(
            id,
            "set_entity_position",
            ChangeMask::GEOMETRY | ChangeMask::BOUNDS,
            |shape| {
                shape.set_center(Point2::new(x, y));
                true
            },
        )
    }

    /// Sets the unrotated size around the current center.
    pub fn set_entity_size(
        &mut self,
        id: EntityId,
        width: f32,
        height: f32,
    ) -> Result<(), EngineError> {
        Self::require_finite(&[width, height], "size")?;
        let min = self.options.min_entity_size;
        self.edit_shape(
            id,
            "set_entity_size",
            ChangeMask::GEOMETRY | ChangeMask::BOUNDS,
            |shape| shape.set_size(width.abs().max(min), height.abs().max(min)),
        )
    }

    /// Sets the absolute rotation in degrees.
    pub fn set_entity_rotation(&mut self, id: EntityId, degrees: f32) -> Result<(), EngineError> {
        Self::require_finite(&[degrees], "rotation")?;
        self.edit_shape(
            id,
            "set_entity_rotation",
            ChangeMask::GEOMETRY | ChangeMask::BOUNDS,
            |shape| shape.set_rotation(degrees.to_radians()),
        )
    }

    pub fn set_entity_length(&mut self, id: EntityId, length: f32) -> Result<(), EngineError> {
        Self::require_finite(&[length], "length")?;
        self.edit_shape(
            id,
            "set_entity_length",
            ChangeMask::GEOMETRY | ChangeMask::BOUNDS,
            |shape| shape.set_length(length.max(0.0)),
        )
    }

    pub fn set_entity_scale(
        &mut self,
        id: EntityId,
        scale_x: f32,
        scale_y: f32,
    ) -> Result<(), EngineError> {
        Self::require_finite(&[scale_x, scale_y], "scale")?;
        self.edit_shape(
            id,
            "set_entity_scale",
            ChangeMask::GEOMETRY | ChangeMask::BOUNDS,
            |shape| shape.set_scale(scale_x, scale_y),
        )
    }

    /// Sets or clears `mask` on every known id. Returns how many changed.
    pub fn set_entity_flags(
        &mut self,
        ids: &[EntityId],
        mask: EntityFlags,
        value: bool,
    ) -> Result<usize, EngineError> {
        self.for_each_entity(ids, ChangeMask::FLAGS, |document, id| {
            document.set_flags(id, mask, value)
        })
    }

    pub fn set_entity_style_color(
        &mut self,
        ids: &[EntityId],
        target: StyleTargets,
        color: Color,
    ) -> Result<usize, EngineError> {
        if !color.is_finite() {
            return Err(EngineError::NonFinite { what: "color" });
        }
        self.for_each_entity(ids, ChangeMask::STYLE, |document, id| {
            document.set_style_color(id, target, color)
        })
    }

    pub fn set_entity_style_enabled(
        &mut self,
        ids: &[EntityId],
        target: StyleTargets,
        enabled: bool,
    ) -> Result<usize, EngineError> {
        self.for_each_entity(ids, ChangeMask::STYLE, |document, id| {
            document.set_style_enabled(id, target, enabled)
        })
    }

    pub fn clear_entity_style_override(
        &mut self,
        ids: &[EntityId],
        target: StyleTargets,
    ) -> Result<usize, EngineError> {
        self.for_each_entity(ids, ChangeMask::STYLE, |document, id| {
            document.clear_style_override(id, target)
        })
    }

    pub fn resolved_style(&self, id: EntityId) -> Option<ResolvedStyle> {
        self.document.resolved_style(id)
    }

    /// Moves entities to another layer.
    pub fn set_entity_layer(
        &mut self,
        ids: &[EntityId],
        layer: LayerId,
    ) -> Result<usize, EngineError> {
        if self.document.layer(layer).is_none() {
            return Err(EngineError::LayerNotFound(layer));
        }
        self.for_each_entity(ids, ChangeMask::LAYER, |document, id| {
            document.set_layer_of(id, layer).unwrap_or(false)
        })
    }

    /// Shared body of the per-id metadata setters.
    fn for_each_entity(
        &mut self,
        ids: &[EntityId],
        mask: ChangeMask,
        mut apply: impl FnMut(&mut Document, EntityId) -> bool,
    ) -> Result<usize, EngineError> {
        self.ensure_idle()?;
        let first = *ids.first().ok_or(EngineError::EmptySelection)?;
        if !ids.iter().any(|id| self.document.contains(*id)) {
            return Err(EngineError::EntityNotFound(first));
        }
        self.transact(|engine| {
            let mut changed = 0;
            for &id in ids {
                if !engine.document.contains(id) {
                    continue;
                }
                engine.history.mark_entity(&engine.document, id);
                if apply(&mut engine.document, id) {
                    engine.events.record_changed(id, mask);
                    changed += 1;
                }
            }
            if changed > 0 {
                engine.mark_dirty();
            }
            Ok(changed)
        })
    }

    // ---- layers -----------------------------------------------------------

    pub fn ensure_layer(&mut self, id: LayerId, name: &str) -> Result<bool, EngineError> {
        self.ensure_idle()?;
        if self.document.layer(id).is_some() {
            return Ok(false);
        }
        self.transact(|engine| {
            engine.history.mark_layers(&engine.document);
            let created = engine.document.ensure_layer(id, name);
            engine.events.record_layer(id, ChangeMask::all());
            engine.mark_dirty();
            Ok(created)
        })
    }

    /// Updates flags and/or name of a layer.
    pub fn set_layer_props(
        &mut self,
        id: LayerId,
        flags: Option<LayerFlags>,
        name: Option<&str>,
    ) -> Result<(), EngineError> {
        self.edit_layer(id, ChangeMask::FLAGS, |layer| {
            if let Some(flags) = flags {
                layer.flags = flags;
            }
            if let Some(name) = name {
                layer.name = name.to_string();
            }
        })
    }

    pub fn set_layer_style(
        &mut self,
        id: LayerId,
        target: StyleTargets,
        color: Color,
    ) -> Result<(), EngineError> {
        if !color.is_finite() {
            return Err(EngineError::NonFinite { what: "color" });
        }
        self.edit_layer(id, ChangeMask::STYLE, |layer| {
            if let Some(entry) = layer.style.entry_mut(target) {
                entry.color = PackedColor::from(color);
            }
        })
    }

    pub fn set_layer_style_enabled(
        &mut self,
        id: LayerId,
        target: StyleTargets,
        enabled: bool,
    ) -> Result<(), EngineError> {
        self.edit_layer(id, ChangeMask::STYLE, |layer| {
            if let Some(entry) = layer.style.entry_mut(target) {
                entry.enabled = enabled;
            }
        })
    }

    fn edit_layer(
        &mut self,
        id: LayerId,
        mask: ChangeMask,
        edit: impl FnOnce(&mut LayerRecord),
    ) -> Result<(), EngineError> {
        self.ensure_idle()?;
        if self.document.layer(id).is_none() {
            return Err(EngineError::LayerNotFound(id));
        }
        self.transact(|engine| {
            engine.history.mark_layers(&engine.document);
            if let Some(layer) = engine.document.layer_mut(id) {
                edit(layer);
            }
            engine.events.record_layer(id, mask);
            engine.mark_dirty();
            Ok(())
        })
    }

    /// Removes an empty layer. Moving or deleting its entities first is up
    /// to the caller.
    pub fn delete_layer(&mut self, id: LayerId) -> Result<LayerRecord, EngineError> {
        let removed = self.transact(|engine| {
            engine.history.mark_layers(&engine.document);
            let removed = engine.document.remove_layer(id)?;
            engine.events.record_layer(id, ChangeMask::all());
            engine.mark_dirty();
            Ok(removed)
        })?;
        debug!(layer = id.get(), "deleted layer");
        Ok(removed)
    }

    // ---- draw order ---------------------------------------------------------

    pub fn reorder(
        &mut self,
        ids: &[EntityId],
        action: ReorderAction,
    ) -> Result<bool, EngineError> {
        self.ensure_idle()?;
        let first = *ids.first().ok_or(EngineError::EmptySelection)?;
        if !ids.iter().any(|id| self.document.contains(*id)) {
            return Err(EngineError::EntityNotFound(first));
        }
        self.transact(|engine| {
            engine.history.mark_draw_order(&engine.document);
            let moved = engine.document.reorder(ids, action);
            if moved {
                engine.selection.sync_order(&engine.document);
                engine.events.record_order();
                for &id in ids {
                    engine.events.record_changed(id, ChangeMask::ORDER);
                }
                engine.mark_dirty();
            }
            Ok(moved)
        })
    }

    // ---- text -------------------------------------------------------------

    fn text_copy(&self, id: EntityId, op: &'static str) -> Result<TextRecord, EngineError> {
        match self.document.kind_of(id) {
            None => Err(EngineError::EntityNotFound(id)),
            Some(EntityKind::Text) => self
                .document
                .text(id)
                .cloned()
                .ok_or(EngineError::EntityNotFound(id)),
            Some(kind) => Err(EngineError::UnsupportedKind { op, kind }),
        }
    }

    fn write_text(&mut self, id: EntityId, text: TextRecord) -> Result<(), EngineError> {
        self.transact(|engine| {
            engine.rewrite_shape(
                id,
                Shape::Text(text),
                ChangeMask::TEXT | ChangeMask::BOUNDS,
            );
            Ok(())
        })
    }

    /// Inserts `content` at a byte index; the run containing it grows.
    pub fn insert_text_content(
        &mut self,
        id: EntityId,
        index: u32,
        content: &str,
    ) -> Result<(), EngineError> {
        let mut text = self.text_copy(id, "insert_text_content")?;
        text.insert_content(index, content)?;
        self.write_text(id, text)
    }

    pub fn delete_text_content(
        &mut self,
        id: EntityId,
        start: u32,
        end: u32,
    ) -> Result<(), EngineError> {
        let mut text = self.text_copy(id, "delete_text_content")?;
        text.delete_content(start, end)?;
        self.write_text(id, text)
    }

    /// Returns whether any run changed.
    pub fn apply_text_style(
        &mut self,
        id: EntityId,
        start: u32,
        end: u32,
        flags: TextStyleFlags,
        op: TextStyleOp,
    ) -> Result<bool, EngineError> {
        let mut text = self.text_copy(id, "apply_text_style")?;
        if !text.apply_style(start, end, flags, op)? {
            return Ok(false);
        }
        self.write_text(id, text)?;
        Ok(true)
    }

    pub fn text_style_summary(
        &self,
        id: EntityId,
        start: u32,
        end: u32,
    ) -> Result<TextStyleSummary, EngineError> {
        let text = self.text_copy(id, "text_style_summary")?;
        if start > end {
            return Err(TextEditError::InvertedRange { start, end }.into());
        }
        Ok(text.style_summary(start, end))
    }

    // ---- history ------------------------------------------------------------

    /// Opens (or nests into) a transaction grouping later mutations.
    /// Returns false while a transform session owns the open transaction.
    pub fn begin_history_entry(&mut self) -> bool {
        if self.session.is_some() {
            return false;
        }
        self.history.begin(&self.document);
        true
    }

    /// Closes one level; returns true when an entry was pushed.
    pub fn commit_history_entry(&mut self) -> bool {
        self.session.is_none() && self.finish_transaction()
    }

    /// Closes one level without recording. Applied changes are kept.
    pub fn discard_history_entry(&mut self) -> bool {
        self.session.is_none() && self.history.discard()
    }

    pub fn can_undo(&self) -> bool {
        self.session.is_none() && self.history.depth() == 0 && self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.session.is_none() && self.history.depth() == 0 && self.history.can_redo()
    }

    pub fn undo(&mut self) -> bool {
        if !self.can_undo() {
            return false;
        }
        let Some(entry) = self.history.step_back() else {
            return false;
        };
        self.apply_entry(&entry, true);
        debug!(generation = self.generation, "undo");
        true
    }

    pub fn redo(&mut self) -> bool {
        if !self.can_redo() {
            return false;
        }
        let Some(entry) = self.history.step_forward() else {
            return false;
        };
        self.apply_entry(&entry, false);
        debug!(generation = self.generation, "redo");
        true
    }

    pub fn history_meta(&self) -> HistoryMeta {
        let log = self.history.log();
        HistoryMeta {
            depth: self.history.depth(),
            cursor: log.cursor,
            len: log.entries.len(),
            generation: self.generation,
        }
    }

    pub fn history_log(&self) -> &HistoryLog {
        self.history.log()
    }

    pub fn clear_history(&mut self) {
        if self.session.is_some() {
            return;
        }
        self.history.clear();
        self.events.record_history();
        self.mark_dirty();
    }

    fn apply_entry(&mut self, entry: &HistoryEntry, undo: bool) {
        if let Some(layers) = &entry.layers {
            let target = if undo { &layers.before } else { &layers.after };
            let mut touched: Vec<LayerId> = layers
                .before
                .iter()
                .chain(&layers.after)
                .map(|layer| layer.id)
                .collect();
            touched.sort_unstable();
            touched.dedup();
            self.document.replace_layers(target.clone());
            for layer in touched {
                self.events.record_layer(layer, ChangeMask::all());
            }
        }
        for change in &entry.entities {
            let state = if undo { &change.before } else { &change.after };
            match state {
                None => {
                    if self.document.remove(change.id).is_some() {
                        self.index.remove(change.id);
                        self.events.record_deleted(change.id);
                    }
                }
                Some(state) => {
                    let existed = self.document.contains(change.id);
                    self.document.restore(state);
                    self.reindex(change.id);
                    if existed {
                        self.events.record_changed(change.id, ChangeMask::all());
                    } else {
                        self.events.record_created(change.id, state.kind());
                    }
                }
            }
        }
        if let Some(order) = &entry.draw_order {
            let target = if undo { &order.before } else { &order.after };
            if let Err(err) = self.document.set_draw_order(target.clone()) {
                warn!(%err, "history entry carries an inconsistent draw order");
            }
            self.events.record_order();
        }
        match &entry.selection {
            Some(selection) => {
                let target = if undo {
                    &selection.before
                } else {
                    &selection.after
                };
                self.selection.replace(target.clone(), &self.document);
                self.events.record_selection();
            }
            None => {
                if self.selection.retain_live(&self.document) {
                    self.events.record_selection();
                }
            }
        }
        self.generation += 1;
        self.events.record_history();
        self.mark_dirty();
    }

    // ---- events -------------------------------------------------------------

    /// Flushes pending changes and returns up to `max_events` of them.
    pub fn poll_events(&mut self, max_events: usize) -> EventBatch {
        let stamp = FlushStamp {
            generation: self.generation,
            selection_generation: self.selection.generation(),
            selection_count: self.selection.len() as u32,
            order_count: self.document.draw_order().len() as u32,
        };
        EventBatch {
            generation: self.generation,
            events: self.events.poll(max_events, stamp),
        }
    }

    /// Clears an overflow once the consumer has resynced up to `generation`.
    pub fn ack_resync(&mut self, generation: u64) -> bool {
        self.events.ack_resync(generation)
    }

    pub fn event_overflow(&self) -> Option<u64> {
        self.events.overflow_generation()
    }

    // ---- snapshots ----------------------------------------------------------

    /// Encodes document, selection and history. The bytes are cached until
    /// the next mutation.
    pub fn serialize_to_bytes(&mut self) -> Result<Vec<u8>, EngineError> {
        if let Some(bytes) = &self.snapshot_cache {
            return Ok(bytes.clone());
        }
        let bytes = serialize(&self.document, self.selection.ids(), self.history.log())?;
        self.snapshot_cache = Some(bytes.clone());
        Ok(bytes)
    }

    /// Replaces everything with the decoded snapshot. Any decode failure
    /// leaves the engine exactly as it was.
    pub fn load_snapshot_from_bytes(&mut self, bytes: &[u8]) -> Result<(), EngineError> {
        self.ensure_idle()?;
        let data = match deserialize(bytes) {
            Ok(data) => data,
            Err(err) => {
                warn!(%err, len = bytes.len(), "rejected snapshot");
                return Err(err.into());
            }
        };

        self.document = data.document;
        self.rebuild_index();
        self.selection.replace(data.selection, &self.document);
        self.history.replace(data.history);
        self.events.reset();
        self.events.record_doc(ChangeMask::all());
        for id in self.document.draw_order().to_vec() {
            if let Some(kind) = self.document.kind_of(id) {
                self.events.record_created(id, kind);
            }
        }
        self.events.record_selection();
        self.events.record_order();
        self.events.record_history();
        self.generation += 1;
        self.mark_dirty();
        debug!(
            entities = self.document.len(),
            indexed = self.index.len(),
            generation = self.generation,
            "loaded snapshot"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EngineEvent;

    fn rect(x: f32, y: f32, w: f32, h: f32) -> RectRecord {
        RectRecord::new(x, y, w, h)
    }

    #[test]
    fn upsert_creates_then_replaces() {
        let mut engine = Engine::new();
        let id = EntityId::new(1);
        assert_eq!(
            engine.upsert_rect(id, rect(0.0, 0.0, 10.0, 10.0)).unwrap(),
            UpsertOutcome::Created
        );
        assert_eq!(
            engine.upsert_rect(id, rect(5.0, 0.0, 10.0, 10.0)).unwrap(),
            UpsertOutcome::Changed
        );
        assert_eq!(engine.generation(), 2);
        assert_eq!(engine.document().draw_order(), &[id]);
        assert_eq!(engine.document().rect(id).map(|r| r.x), Some(5.0));
    }

    #[test]
    fn kind_change_keeps_the_id_and_its_draw_position() {
        let mut engine = Engine::new();
        engine.upsert_rect(EntityId::new(1), rect(0.0, 0.0, 1.0, 1.0)).unwrap();
        engine.upsert_rect(EntityId::new(2), rect(0.0, 0.0, 1.0, 1.0)).unwrap();
        let outcome = engine
            .upsert_line(
                EntityId::new(1),
                LineRecord::new(Point2::ORIGIN, Point2::new(3.0, 4.0)),
            )
            .unwrap();
        assert_eq!(
            outcome,
            UpsertOutcome::KindChanged {
                previous: EntityKind::Rect
            }
        );
        assert_eq!(engine.document().kind_of(EntityId::new(1)), Some(EntityKind::Line));
        assert_eq!(
            engine.document().draw_order(),
            &[EntityId::new(1), EntityId::new(2)]
        );
        engine.document().validate().unwrap();
    }

    #[test]
    fn non_finite_input_changes_nothing() {
        let mut engine = Engine::new();
        engine.upsert_rect(EntityId::new(1), rect(0.0, 0.0, 1.0, 1.0)).unwrap();
        engine.poll_events(64);
        let before = engine.document().dump();

        let err = engine
            .upsert_rect(EntityId::new(1), rect(f32::NAN, 0.0, 1.0, 1.0))
            .unwrap_err();
        assert!(matches!(err, EngineError::NonFinite { .. }));
        assert!(engine.set_entity_position(EntityId::new(1), f32::INFINITY, 0.0).is_err());
        assert_eq!(engine.document().dump(), before);
        assert_eq!(engine.generation(), 1);
        assert!(engine.poll_events(64).events.is_empty());
    }

    #[test]
    fn unsupported_kinds_are_soft_failures() {
        let mut engine = Engine::new();
        let line = EntityId::new(3);
        engine
            .upsert_line(line, LineRecord::new(Point2::ORIGIN, Point2::new(10.0, 0.0)))
            .unwrap();
        assert_eq!(
            engine.set_entity_rotation(line, 45.0).unwrap_err(),
            EngineError::UnsupportedKind {
                op: "set_entity_rotation",
                kind: EntityKind::Line
            }
        );
        assert_eq!(
            engine.set_entity_rotation(EntityId::new(99), 45.0).unwrap_err(),
            EngineError::EntityNotFound(EntityId::new(99))
        );
        assert_eq!(engine.history_meta().len, 1);
    }

    #[test]
    fn length_setter_keeps_the_midpoint() {
        let mut engine = Engine::new();
        let id = EntityId::new(1);
        engine
            .upsert_arrow(id, ArrowRecord::new(Point2::ORIGIN, Point2::new(10.0, 0.0), 2.0))
            .unwrap();
        engine.set_entity_length(id, 20.0).unwrap();
        let arrow = *engine.document().arrow(id).unwrap();
        assert!((arrow.a.x() + 5.0).abs() < 1e-4);
        assert!((arrow.b.x() - 15.0).abs() < 1e-4);
    }

    #[test]
    fn size_is_clamped_to_the_minimum() {
        let mut engine = Engine::new();
        let id = EntityId::new(1);
        engine.upsert_rect(id, rect(0.0, 0.0, 10.0, 10.0)).unwrap();
        engine.set_entity_size(id, 0.0, 4.0).unwrap();
        let r = *engine.document().rect(id).unwrap();
        assert_eq!((r.w, r.h), (1.0, 4.0));
        assert_eq!(r.center(), Point2::new(5.0, 5.0));
    }

    #[test]
    fn deleting_a_selected_entity_updates_the_selection() {
        let mut engine = Engine::new();
        let a = EntityId::new(1);
        let b = EntityId::new(2);
        engine.upsert_rect(a, rect(0.0, 0.0, 1.0, 1.0)).unwrap();
        engine.upsert_rect(b, rect(2.0, 0.0, 1.0, 1.0)).unwrap();
        engine.set_selection(&[a, b], crate::selection::SelectionMode::Replace);

        assert_eq!(engine.delete_entities(&[a]).unwrap(), 1);
        assert_eq!(engine.selection(), &[b]);
        assert!(engine.undo());
        assert_eq!(engine.selection(), &[a, b]);
        assert_eq!(engine.document().draw_order(), &[a, b]);
    }

    #[test]
    fn text_edits_relayout_and_reject_bad_ranges() {
        let mut engine = Engine::new();
        let id = EntityId::new(4);
        engine
            .upsert_text(id, TextRecord::new(Point2::new(0.0, 0.0), "abc"))
            .unwrap();
        let width = engine.document().text(id).unwrap().layout.width;
        assert!(width > 0.0);

        engine.insert_text_content(id, 3, "def").unwrap();
        let text = engine.document().text(id).unwrap();
        assert_eq!(text.content, "abcdef");
        assert!((text.layout.width - 2.0 * width).abs() < 1e-3);

        let err = engine.delete_text_content(id, 4, 2).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTextRange(_)));

        assert!(engine
            .apply_text_style(id, 0, 3, TextStyleFlags::BOLD, TextStyleOp::Set)
            .unwrap());
        let summary = engine.text_style_summary(id, 0, 6).unwrap();
        assert_eq!(summary.bold, draftdoc_core::text::TriState::Mixed);
    }

    #[test]
    fn layers_cannot_be_deleted_while_in_use() {
        let mut engine = Engine::new();
        let layer = LayerId::new(5);
        assert!(engine.ensure_layer(layer, "Hidden").unwrap());
        engine
            .upsert_entity(
                EntityId::new(1),
                Shape::Rect(rect(0.0, 0.0, 1.0, 1.0)),
                Some(layer),
            )
            .unwrap();
        assert!(matches!(
            engine.delete_layer(layer),
            Err(EngineError::Document(_))
        ));
        engine.set_entity_layer(&[EntityId::new(1)], LayerId::DEFAULT).unwrap();
        engine.delete_layer(layer).unwrap();
        assert!(engine.document().layer(layer).is_none());

        assert!(engine.undo());
        assert!(engine.document().layer(layer).is_some());
    }

    #[test]
    fn snapshot_cache_is_dropped_on_mutation() {
        let mut engine = Engine::new();
        engine.upsert_rect(EntityId::new(1), rect(0.0, 0.0, 1.0, 1.0)).unwrap();
        let first = engine.serialize_to_bytes().unwrap();
        assert_eq!(engine.serialize_to_bytes().unwrap(), first);
        engine.set_entity_position(EntityId::new(1), 10.0, 10.0).unwrap();
        assert_ne!(engine.serialize_to_bytes().unwrap(), first);
    }

    #[test]
    fn load_replaces_everything_and_announces_it() {
        let mut source = Engine::new();
        source.upsert_rect(EntityId::new(2), rect(0.0, 0.0, 4.0, 4.0)).unwrap();
        source
            .upsert_line(
                EntityId::new(1),
                LineRecord::new(Point2::ORIGIN, Point2::new(1.0, 1.0)),
            )
            .unwrap();
        let bytes = source.serialize_to_bytes().unwrap();

        let mut engine = Engine::new();
        engine.upsert_rect(EntityId::new(9), rect(0.0, 0.0, 1.0, 1.0)).unwrap();
        let generation = engine.generation();
        engine.load_snapshot_from_bytes(&bytes).unwrap();
        assert_eq!(engine.generation(), generation + 1);
        assert_eq!(engine.document().dump(), source.document().dump());
        assert!(engine.can_undo());

        let events = engine.poll_events(64).events;
        assert_eq!(
            events[0],
            EngineEvent::DocChanged {
                mask: ChangeMask::all()
            }
        );
        assert_eq!(
            events[1],
            EngineEvent::EntityCreated {
                id: EntityId::new(1),
                kind: EntityKind::Line
            }
        );
        assert!(matches!(events.last(), Some(EngineEvent::HistoryChanged { .. })));
    }
}
