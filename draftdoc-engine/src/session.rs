//! Interactive transform sessions.
//!
//! Every update recomputes geometry from the session-start reference plus
//! the total pointer delta, so many small updates never accumulate error and
//! cancelling restores the reference exactly.

use std::collections::BTreeSet;
use std::f32::consts::FRAC_PI_4;

use bitflags::bitflags;
use draftdoc_core::document::EntityId;
use draftdoc_core::geometry::{Bounds2D, Point2, Vector2, rotate_vec};
use draftdoc_core::shape::{EntityKind, Shape};
use glam::Vec2;
use tracing::debug;

use crate::Engine;
use crate::errors::EngineError;
use crate::events::ChangeMask;
use crate::pick::{SIDE_HANDLE_EAST, SIDE_HANDLE_NORTH, SIDE_HANDLE_SOUTH, SIDE_HANDLE_WEST};
use crate::selection::tight_bounds;
use crate::snap::SnapResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformMode {
    Move,
    VertexDrag,
    EdgeDrag,
    /// Corner resize, `sub_index` 0..3 in BL, BR, TR, TL order.
    Resize,
    Rotate,
    /// Side resize of one rect or ellipse, `sub_index` 4..7 in N, E, S, W order.
    SideResize,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u32 {
        const SHIFT = 1 << 0;
        const ALT = 1 << 1;
        const CTRL = 1 << 2;
    }
}

/// World units per screen unit at session start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewContext {
    pub scale: f32,
}

impl Default for ViewContext {
    fn default() -> Self {
        Self { scale: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformState {
    Idle,
    Active(TransformMode),
}

/// Arguments of [`Engine::begin_transform`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransformBegin {
    pub ids: Vec<EntityId>,
    pub mode: TransformMode,
    /// Entity owning the dragged vertex or edge. Defaults to the first id.
    pub target: Option<EntityId>,
    pub sub_index: u32,
    pub pointer: Point2,
    pub view: ViewContext,
    pub modifiers: Modifiers,
}

impl TransformBegin {
    pub fn new(ids: Vec<EntityId>, mode: TransformMode, pointer: Point2) -> Self {
        Self {
            ids,
            mode,
            target: None,
            sub_index: 0,
            pointer,
            view: ViewContext::default(),
            modifiers: Modifiers::empty(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Session {
    mode: TransformMode,
    target: EntityId,
    sub_index: u32,
    start: Point2,
    modifiers: Modifiers,
    threshold: f32,
    engaged: bool,
    references: Vec<(EntityId, Shape)>,
    union: Bounds2D,
    pivot: Point2,
    view_scale: f32,
    touched: BTreeSet<EntityId>,
    pub(crate) snap: SnapResult,
}

fn corner_sign(index: u32) -> Vec2 {
    match index {
        0 => Vec2::new(-1.0, -1.0),
        1 => Vec2::new(1.0, -1.0),
        2 => Vec2::new(1.0, 1.0),
        _ => Vec2::new(-1.0, 1.0),
    }
}

fn sign_or_one(v: f32) -> f32 {
    if v < 0.0 { -1.0 } else { 1.0 }
}

fn angle_of(v: Vec2) -> Option<f32> {
    (v.length_squared() > f32::EPSILON).then(|| v.y.atan2(v.x))
}

/// Snaps `point` onto the nearest 45 degree ray from `anchor`.
fn snap_45(anchor: Point2, point: Point2) -> Point2 {
    let offset = point.0 - anchor.0;
    let Some(angle) = angle_of(offset) else {
        return point;
    };
    let snapped = (angle / FRAC_PI_4).round() * FRAC_PI_4;
    Point2::from_vec(anchor.0 + rotate_vec(Vec2::new(offset.length(), 0.0), snapped))
}

/// Neighbour that a shift-snapped endpoint turns around.
fn snap_anchor(shape: &Shape, index: usize) -> Option<Point2> {
    let vertices = shape.vertices();
    match shape.kind() {
        EntityKind::Line | EntityKind::Arrow => vertices.get(1 - index.min(1)).copied(),
        EntityKind::Polyline if vertices.len() >= 2 => {
            if index == 0 {
                vertices.get(1).copied()
            } else if index == vertices.len() - 1 {
                vertices.get(index - 1).copied()
            } else {
                None
            }
        }
        _ => None,
    }
}

fn translate_bounds(bounds: &Bounds2D, delta: Vec2) -> Bounds2D {
    if bounds.is_empty() {
        return *bounds;
    }
    Bounds2D::new(
        bounds.min().translate(Vector2(delta)),
        bounds.max().translate(Vector2(delta)),
    )
}

fn edge_count(shape: &Shape) -> usize {
    match shape {
        Shape::Polygon(p) if p.points.len() >= 2 => p.points.len(),
        Shape::Polyline(p) => p.points.len().saturating_sub(1),
        _ => 0,
    }
}

impl Session {
    fn reference(&self, id: EntityId) -> Option<&Shape> {
        self.references
            .iter()
            .find(|(candidate, _)| *candidate == id)
            .map(|(_, shape)| shape)
    }

    fn moving_ids(&self) -> Vec<EntityId> {
        self.references.iter().map(|(id, _)| *id).collect()
    }

    /// Geometry of every reference for the pointer at `pointer`. Records the
    /// snap it applied.
    fn apply(
        &mut self,
        pointer: Point2,
        modifiers: Modifiers,
        engine: &Engine,
    ) -> Vec<(EntityId, Shape)> {
        self.snap = SnapResult::default();
        let snapping = !modifiers.contains(Modifiers::CTRL);
        let pointer = if snapping {
            engine.options.snap.snap_to_grid(pointer)
        } else {
            pointer
        };
        let delta = pointer.0 - self.start.0;
        match self.mode {
            TransformMode::Move => {
                let mut d = delta;
                let (mut allow_x, mut allow_y) = (snapping, snapping);
                if modifiers.contains(Modifiers::SHIFT) {
                    if d.x.abs() >= d.y.abs() {
                        d.y = 0.0;
                        allow_y = false;
                    } else {
                        d.x = 0.0;
                        allow_x = false;
                    }
                }
                let moved = translate_bounds(&self.union, d);
                self.snap = engine.object_snap(
                    &self.moving_ids(),
                    &moved,
                    allow_x,
                    allow_y,
                    self.view_scale,
                );
                self.translated(d + self.snap.offset, None)
            }
            TransformMode::VertexDrag => {
                let angle_snap = modifiers.contains(Modifiers::SHIFT);
                let mut d = delta;
                if snapping && !angle_snap {
                    let vertex = self
                        .reference(self.target)
                        .and_then(|shape| shape.vertices().get(self.sub_index as usize).copied());
                    if let Some(vertex) = vertex {
                        let moved = vertex.translate(Vector2(d));
                        self.snap = engine.object_snap(
                            &self.moving_ids(),
                            &Bounds2D::from_corners(moved, moved),
                            true,
                            true,
                            self.view_scale,
                        );
                        d += self.snap.offset;
                    }
                }
                self.vertex_drag(d, modifiers)
            }
            TransformMode::EdgeDrag => self.edge_drag(delta, modifiers),
            TransformMode::Resize => self.resize(delta, modifiers, engine.options.min_entity_size),
            TransformMode::Rotate => {
                self.rotate(pointer, modifiers, engine.options.rotation_snap_degrees)
            }
            TransformMode::SideResize => {
                self.side_resize(delta, modifiers, engine.options.min_entity_size)
            }
        }
    }

    fn translated(&self, delta: Vec2, skip: Option<EntityId>) -> Vec<(EntityId, Shape)> {
        self.references
            .iter()
            .filter(|(id, _)| Some(*id) != skip)
            .map(|(id, shape)| {
                let mut shape = shape.clone();
                shape.translate(Vector2(delta));
                (*id, shape)
            })
            .collect()
    }

    fn vertex_drag(&self, delta: Vec2, modifiers: Modifiers) -> Vec<(EntityId, Shape)> {
        let Some(reference) = self.reference(self.target) else {
            return Vec::new();
        };
        let index = self.sub_index as usize;
        let mut shape = reference.clone();
        let anchor = snap_anchor(reference, index);
        let Some(vertex) = shape.vertex_mut(index) else {
            return Vec::new();
        };
        let mut moved = vertex.translate(Vector2(delta));
        if let Some(anchor) = anchor.filter(|_| modifiers.contains(Modifiers::SHIFT)) {
            moved = snap_45(anchor, moved);
        }
        *vertex = moved;
        vec![(self.target, shape)]
    }

    fn edge_drag(&self, delta: Vec2, modifiers: Modifiers) -> Vec<(EntityId, Shape)> {
        let Some(reference) = self.reference(self.target) else {
            return Vec::new();
        };
        let vertices = reference.vertices();
        let i = self.sub_index as usize;
        let j = (i + 1) % vertices.len().max(1);
        let mut d = delta;
        if !modifiers.contains(Modifiers::ALT) {
            let edge = vertices[j].0 - vertices[i].0;
            d = match edge.perp().try_normalize() {
                Some(normal) => normal * d.dot(normal),
                None => Vec2::ZERO,
            };
        }
        let mut shape = reference.clone();
        for index in [i, j] {
            if let Some(vertex) = shape.vertex_mut(index) {
                *vertex = vertex.translate(Vector2(d));
            }
        }
        let mut out = self.translated(delta, Some(self.target));
        out.push((self.target, shape));
        out
    }

    fn resize(&self, delta: Vec2, modifiers: Modifiers, min_size: f32) -> Vec<(EntityId, Shape)> {
        let keep_aspect = modifiers.contains(Modifiers::SHIFT);
        if let [(id, reference)] = self.references.as_slice() {
            if let Some(frame) = reference.oriented_frame() {
                let sign = corner_sign(self.sub_index);
                let anchor = -sign * frame.half;
                let dragged = sign * frame.half + rotate_vec(delta, -frame.rotation);
                let original = frame.half * 2.0;
                let mut size = ((dragged - anchor) * sign).max(Vec2::splat(min_size));
                if keep_aspect && original.x > f32::EPSILON && original.y > f32::EPSILON {
                    let factor = (size / original).max_element();
                    size = (original * factor).max(Vec2::splat(min_size));
                }
                let mut shape = reference.clone();
                if !shape.fit_local_box(&frame, anchor, anchor + sign * size) {
                    return Vec::new();
                }
                return vec![(*id, shape)];
            }
        }

        if self.union.is_empty() {
            return Vec::new();
        }
        let corners = self.union.corners();
        let index = (self.sub_index as usize).min(3);
        let anchor = corners[(index + 2) % 4];
        let original = corners[index].0 - anchor.0;
        let dragged = original + delta;
        let axis = |original: f32, dragged: f32| {
            if original.abs() <= f32::EPSILON {
                return 1.0;
            }
            let factor = dragged / original;
            let floor = min_size / original.abs();
            if factor.abs() < floor {
                sign_or_one(factor) * floor
            } else {
                factor
            }
        };
        let mut factor = Vec2::new(axis(original.x, dragged.x), axis(original.y, dragged.y));
        if keep_aspect {
            let uniform = if factor.x.abs() >= factor.y.abs() {
                factor.x
            } else {
                factor.y
            };
            factor = Vec2::splat(uniform);
        }
        self.references
            .iter()
            .map(|(id, shape)| {
                let mut shape = shape.clone();
                shape.scale_about(anchor, factor);
                (*id, shape)
            })
            .collect()
    }

    fn rotate(
        &self,
        pointer: Point2,
        modifiers: Modifiers,
        snap_degrees: f32,
    ) -> Vec<(EntityId, Shape)> {
        let (Some(from), Some(to)) = (
            angle_of(self.start.0 - self.pivot.0),
            angle_of(pointer.0 - self.pivot.0),
        ) else {
            return self.references.clone();
        };
        let mut angle = to - from;
        if modifiers.contains(Modifiers::SHIFT) && snap_degrees > 0.0 {
            let step = snap_degrees.to_radians();
            angle = (angle / step).round() * step;
        }
        self.references
            .iter()
            .map(|(id, shape)| {
                let mut shape = shape.clone();
                shape.rotate_about(self.pivot, angle);
                (*id, shape)
            })
            .collect()
    }

    fn side_resize(
        &self,
        delta: Vec2,
        modifiers: Modifiers,
        min_size: f32,
    ) -> Vec<(EntityId, Shape)> {
        let Some(reference) = self.reference(self.target) else {
            return Vec::new();
        };
        let Some(frame) = reference.oriented_frame() else {
            return Vec::new();
        };
        let local = rotate_vec(delta, -frame.rotation);
        let half = frame.half;
        let symmetric = modifiers.contains(Modifiers::ALT);
        let mut min = -half;
        let mut max = half;
        match self.sub_index {
            SIDE_HANDLE_NORTH => {
                let limit = if symmetric { min_size * 0.5 } else { min.y + min_size };
                max.y = (half.y + local.y).max(limit);
                if symmetric {
                    min.y = -max.y;
                }
            }
            SIDE_HANDLE_SOUTH => {
                let limit = if symmetric { -min_size * 0.5 } else { max.y - min_size };
                min.y = (-half.y + local.y).min(limit);
                if symmetric {
                    max.y = -min.y;
                }
            }
            SIDE_HANDLE_EAST => {
                let limit = if symmetric { min_size * 0.5 } else { min.x + min_size };
                max.x = (half.x + local.x).max(limit);
                if symmetric {
                    min.x = -max.x;
                }
            }
            SIDE_HANDLE_WEST => {
                let limit = if symmetric { -min_size * 0.5 } else { max.x - min_size };
                min.x = (-half.x + local.x).min(limit);
                if symmetric {
                    max.x = -min.x;
                }
            }
            _ => return Vec::new(),
        }
        let mut shape = reference.clone();
        if !shape.fit_local_box(&frame, min, max) {
            return Vec::new();
        }
        vec![(self.target, shape)]
    }
}

impl Engine {
    pub fn transform_state(&self) -> TransformState {
        match &self.session {
            Some(session) => TransformState::Active(session.mode),
            None => TransformState::Idle,
        }
    }

    /// Validates the request, captures reference geometry and opens the
    /// history transaction the session commits into.
    pub fn begin_transform(&mut self, request: TransformBegin) -> Result<(), EngineError> {
        self.ensure_idle()?;
        let first = *request.ids.first().ok_or(EngineError::EmptySelection)?;
        if !request.pointer.is_finite()
            || !request.view.scale.is_finite()
            || request.view.scale <= 0.0
        {
            return Err(EngineError::NonFinite { what: "pointer" });
        }
        let mut ids = request.ids.clone();
        let target = request.target.unwrap_or(first);
        if !ids.contains(&target) {
            ids.push(target);
        }
        ids.sort_unstable();
        ids.dedup();

        let mut references = Vec::with_capacity(ids.len());
        for id in &ids {
            let shape = self.document.shape(*id).ok_or(EngineError::EntityNotFound(*id))?;
            references.push((*id, shape));
        }
        let target_shape = references
            .iter()
            .find(|(id, _)| *id == target)
            .map(|(_, shape)| shape)
            .ok_or(EngineError::EntityNotFound(target))?;
        let invalid = EngineError::InvalidSubTarget {
            id: target,
            index: request.sub_index,
        };
        let unsupported = |op| EngineError::UnsupportedKind {
            op,
            kind: target_shape.kind(),
        };
        match request.mode {
            TransformMode::Move | TransformMode::Rotate => {}
            TransformMode::VertexDrag => {
                let count = target_shape.vertices().len();
                if count == 0 {
                    return Err(unsupported("vertex_drag"));
                }
                if request.sub_index as usize >= count {
                    return Err(invalid);
                }
            }
            TransformMode::EdgeDrag => {
                if !matches!(target_shape.kind(), EntityKind::Polygon | EntityKind::Polyline) {
                    return Err(unsupported("edge_drag"));
                }
                if request.sub_index as usize >= edge_count(target_shape) {
                    return Err(invalid);
                }
            }
            TransformMode::Resize => {
                if request.sub_index > 3 {
                    return Err(invalid);
                }
            }
            TransformMode::SideResize => {
                if ids.len() != 1
                    || !matches!(target_shape.kind(), EntityKind::Rect | EntityKind::Circle)
                {
                    return Err(unsupported("side_resize"));
                }
                if !(SIDE_HANDLE_NORTH..=SIDE_HANDLE_WEST).contains(&request.sub_index) {
                    return Err(invalid);
                }
            }
        }

        let mut union = Bounds2D::empty();
        for (_, shape) in &references {
            union.include_bounds(&tight_bounds(shape));
        }
        let pivot = if union.is_empty() {
            request.pointer
        } else {
            union.center()
        };

        self.history.begin(&self.document);
        for id in &ids {
            self.history.mark_entity(&self.document, *id);
        }
        debug!(
            mode = ?request.mode,
            count = ids.len(),
            target = target.get(),
            "transform session started"
        );
        self.session = Some(Session {
            mode: request.mode,
            target,
            sub_index: request.sub_index,
            start: request.pointer,
            modifiers: request.modifiers,
            threshold: self.options.drag_threshold.max(0.0) / request.view.scale,
            engaged: false,
            references,
            union,
            pivot,
            view_scale: request.view.scale,
            touched: BTreeSet::new(),
            snap: SnapResult::default(),
        });
        Ok(())
    }

    /// Moves the pointer. `modifiers` replaces the set given at begin.
    pub fn update_transform(
        &mut self,
        pointer: Point2,
        modifiers: Modifiers,
    ) -> Result<(), EngineError> {
        if !pointer.is_finite() {
            return Err(EngineError::NonFinite { what: "pointer" });
        }
        let mut session = self.session.take().ok_or(EngineError::NoActiveSession)?;
        session.modifiers = modifiers;
        if !session.engaged && session.start.distance(pointer) >= session.threshold {
            session.engaged = true;
        }
        if session.engaged {
            for (id, shape) in session.apply(pointer, session.modifiers, self) {
                if shape.is_finite() {
                    self.rewrite_shape(id, shape, ChangeMask::GEOMETRY | ChangeMask::BOUNDS);
                    session.touched.insert(id);
                }
            }
        }
        self.session = Some(session);
        Ok(())
    }

    /// Ends the session and records one history entry for all of it.
    pub fn commit_transform(&mut self) -> Result<bool, EngineError> {
        let session = self.session.take().ok_or(EngineError::NoActiveSession)?;
        let pushed = self.finish_transaction();
        debug!(
            mode = ?session.mode,
            touched = session.touched.len(),
            pushed,
            "transform session committed"
        );
        Ok(pushed)
    }

    /// Puts every touched entity back to its reference and drops the
    /// transaction.
    pub fn cancel_transform(&mut self) -> Result<(), EngineError> {
        let session = self.session.take().ok_or(EngineError::NoActiveSession)?;
        for id in &session.touched {
            if let Some(reference) = session.reference(*id) {
                self.rewrite_shape(
                    *id,
                    reference.clone(),
                    ChangeMask::GEOMETRY | ChangeMask::BOUNDS,
                );
            }
        }
        self.history.discard();
        debug!(
            mode = ?session.mode,
            restored = session.touched.len(),
            "transform session cancelled"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use draftdoc_core::document::{EntityFlags, LayerId, ReorderAction, UpsertOutcome};
    use draftdoc_core::shape::{CircleRecord, LineRecord, PolygonShape, RectRecord};

    fn id(raw: u32) -> EntityId {
        EntityId::new(raw)
    }

    fn near(a: Point2, b: Point2) -> bool {
        a.distance(b) < 1e-3
    }

    fn square() -> PolygonShape {
        PolygonShape::new(vec![
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(10.0, 10.0),
            Point2::new(0.0, 10.0),
        ])
    }

    #[test]
    fn move_is_relative_to_the_session_start() {
        let mut engine = Engine::new();
        engine.upsert_rect(id(1), RectRecord::new(0.0, 0.0, 10.0, 10.0)).unwrap();
        let start = Point2::new(5.0, 5.0);
        engine
            .begin_transform(TransformBegin::new(vec![id(1)], TransformMode::Move, start))
            .unwrap();
        for step in 1..=100 {
            let t = step as f32 * 0.1;
            engine
                .update_transform(Point2::new(5.0 + t, 5.0 + t), Modifiers::empty())
                .unwrap();
        }
        let rect = *engine.document().rect(id(1)).unwrap();
        assert_eq!((rect.x, rect.y), (10.0, 10.0));
        assert_eq!(engine.transform_state(), TransformState::Active(TransformMode::Move));
        assert!(engine.commit_transform().unwrap());
        assert_eq!(engine.transform_state(), TransformState::Idle);
        assert_eq!(engine.history_meta().len, 2);
    }

    #[test]
    fn shift_locks_move_to_the_dominant_axis() {
        let mut engine = Engine::new();
        engine.upsert_rect(id(1), RectRecord::new(0.0, 0.0, 10.0, 10.0)).unwrap();
        engine
            .begin_transform(TransformBegin::new(vec![id(1)], TransformMode::Move, Point2::ORIGIN))
            .unwrap();
        engine.update_transform(Point2::new(8.0, 3.0), Modifiers::SHIFT).unwrap();
        let rect = *engine.document().rect(id(1)).unwrap();
        assert_eq!((rect.x, rect.y), (8.0, 0.0));
    }

    #[test]
    fn cancel_restores_and_pushes_nothing() {
        let mut engine = Engine::new();
        engine.upsert_polygon(id(1), square()).unwrap();
        let before = engine.document().dump();
        let generation = engine.generation();
        let mut request =
            TransformBegin::new(vec![id(1)], TransformMode::Rotate, Point2::new(10.0, 5.0));
        request.target = Some(id(1));
        engine.begin_transform(request).unwrap();
        engine.update_transform(Point2::new(5.0, 10.0), Modifiers::empty()).unwrap();
        assert_ne!(engine.document().dump(), before);

        engine.cancel_transform().unwrap();
        assert_eq!(engine.document().dump(), before);
        assert_eq!(engine.generation(), generation);
        assert_eq!(engine.history_meta().len, 1);
        assert!(matches!(engine.cancel_transform(), Err(EngineError::NoActiveSession)));
    }

    #[test]
    fn other_edits_are_refused_until_the_session_ends() {
        let mut engine = Engine::new();
        engine.upsert_rect(id(1), RectRecord::new(0.0, 0.0, 10.0, 10.0)).unwrap();
        let before = engine.document().dump();
        let generation = engine.generation();
        engine
            .begin_transform(TransformBegin::new(vec![id(1)], TransformMode::Move, Point2::ORIGIN))
            .unwrap();
        engine.update_transform(Point2::new(5.0, 5.0), Modifiers::empty()).unwrap();

        let extra = RectRecord::new(50.0, 0.0, 5.0, 5.0);
        assert_eq!(engine.upsert_rect(id(2), extra), Err(EngineError::SessionActive));
        assert_eq!(engine.delete_entity(id(1)), Err(EngineError::SessionActive));
        assert_eq!(
            engine.reorder(&[id(1)], ReorderAction::SendToBack),
            Err(EngineError::SessionActive)
        );
        assert_eq!(
            engine.set_entity_flags(&[id(1)], EntityFlags::LOCKED, true),
            Err(EngineError::SessionActive)
        );
        assert_eq!(
            engine.ensure_layer(LayerId::new(3), "Extra"),
            Err(EngineError::SessionActive)
        );
        assert!(!engine.select_all());
        assert!(!engine.begin_history_entry());
        assert!(!engine.commit_history_entry());
        assert_eq!(engine.history_meta().depth, 1);

        engine.cancel_transform().unwrap();
        assert_eq!(engine.document().dump(), before);
        assert_eq!(engine.generation(), generation);
        assert_eq!(engine.history_meta().len, 1);
        assert!(engine.selection().is_empty());
        assert_eq!(engine.upsert_rect(id(2), extra), Ok(UpsertOutcome::Created));
    }

    #[test]
    fn edge_drag_follows_the_normal_unless_alt() {
        let mut engine = Engine::new();
        engine.upsert_polygon(id(1), square()).unwrap();
        let mut request =
            TransformBegin::new(vec![id(1)], TransformMode::EdgeDrag, Point2::new(5.0, 0.0));
        request.sub_index = 0;
        engine.begin_transform(request).unwrap();

        engine.update_transform(Point2::new(8.0, -4.0), Modifiers::empty()).unwrap();
        let points = engine.document().path_points(id(1)).unwrap().to_vec();
        assert!(near(points[0], Point2::new(0.0, -4.0)));
        assert!(near(points[1], Point2::new(10.0, -4.0)));
        assert!(near(points[2], Point2::new(10.0, 10.0)));

        engine.update_transform(Point2::new(8.0, -4.0), Modifiers::ALT).unwrap();
        let points = engine.document().path_points(id(1)).unwrap().to_vec();
        assert!(near(points[0], Point2::new(3.0, -4.0)));
        engine.commit_transform().unwrap();
    }

    #[test]
    fn vertex_drag_snaps_line_endpoints() {
        let mut engine = Engine::new();
        engine
            .upsert_line(id(1), LineRecord::new(Point2::ORIGIN, Point2::new(10.0, 0.0)))
            .unwrap();
        let mut request =
            TransformBegin::new(vec![id(1)], TransformMode::VertexDrag, Point2::new(10.0, 0.0));
        request.sub_index = 1;
        engine.begin_transform(request).unwrap();
        engine.update_transform(Point2::new(10.0, 9.0), Modifiers::SHIFT).unwrap();
        let line = *engine.document().line(id(1)).unwrap();
        let expected = (10.0f32 * 10.0 + 9.0 * 9.0).sqrt() / 2.0f32.sqrt();
        assert!(near(line.b, Point2::new(expected, expected)));
        assert!(near(line.a, Point2::ORIGIN));
    }

    #[test]
    fn resize_of_a_rotated_rect_happens_in_its_frame() {
        let mut engine = Engine::new();
        engine.upsert_rect(id(1), RectRecord::new(-10.0, -5.0, 20.0, 10.0)).unwrap();
        engine.set_entity_rotation(id(1), 90.0).unwrap();
        // TR corner local (10, 5) is world (-5, 10).
        let mut request =
            TransformBegin::new(vec![id(1)], TransformMode::Resize, Point2::new(-5.0, 10.0));
        request.sub_index = 2;
        engine.begin_transform(request).unwrap();
        // World +y is local +x after a quarter turn.
        engine.update_transform(Point2::new(-5.0, 14.0), Modifiers::empty()).unwrap();
        engine.commit_transform().unwrap();

        let transform = engine.entity_transform(id(1));
        assert!((transform.width - 24.0).abs() < 1e-3);
        assert!((transform.height - 10.0).abs() < 1e-3);
        assert!((transform.rotation_deg - 90.0).abs() < 1e-3);
        // The BL corner stays where it was.
        let frame = engine.document().shape(id(1)).unwrap().oriented_frame().unwrap();
        assert!(near(frame.corners()[0], Point2::new(5.0, -10.0)));
    }

    #[test]
    fn resize_clamps_to_the_minimum_size() {
        let mut engine = Engine::new();
        engine.upsert_rect(id(1), RectRecord::new(0.0, 0.0, 10.0, 10.0)).unwrap();
        let mut request =
            TransformBegin::new(vec![id(1)], TransformMode::Resize, Point2::new(10.0, 10.0));
        request.sub_index = 2;
        engine.begin_transform(request).unwrap();
        engine.update_transform(Point2::new(-50.0, -50.0), Modifiers::empty()).unwrap();
        let rect = *engine.document().rect(id(1)).unwrap();
        assert_eq!((rect.x, rect.y, rect.w, rect.h), (0.0, 0.0, 1.0, 1.0));
    }

    #[test]
    fn group_resize_scales_about_the_opposite_corner() {
        let mut engine = Engine::new();
        engine.upsert_rect(id(1), RectRecord::new(0.0, 0.0, 10.0, 10.0)).unwrap();
        engine
            .upsert_circle(id(2), CircleRecord::new(Point2::new(15.0, 5.0), 5.0, 5.0))
            .unwrap();
        let mut request =
            TransformBegin::new(vec![id(1), id(2)], TransformMode::Resize, Point2::new(20.0, 10.0));
        request.sub_index = 2;
        engine.begin_transform(request).unwrap();
        engine.update_transform(Point2::new(40.0, 20.0), Modifiers::empty()).unwrap();
        engine.commit_transform().unwrap();

        let rect = *engine.document().rect(id(1)).unwrap();
        assert_eq!((rect.x, rect.y, rect.w, rect.h), (0.0, 0.0, 20.0, 20.0));
        let circle = *engine.document().circle(id(2)).unwrap();
        assert!(near(circle.center, Point2::new(30.0, 10.0)));
        assert!((circle.rx - 10.0).abs() < 1e-4);
    }

    #[test]
    fn side_resize_moves_one_side_or_both_with_alt() {
        let mut engine = Engine::new();
        engine.upsert_rect(id(1), RectRecord::new(0.0, 0.0, 10.0, 10.0)).unwrap();
        let mut request =
            TransformBegin::new(vec![id(1)], TransformMode::SideResize, Point2::new(10.0, 5.0));
        request.sub_index = SIDE_HANDLE_EAST;
        engine.begin_transform(request).unwrap();

        engine.update_transform(Point2::new(14.0, 7.0), Modifiers::empty()).unwrap();
        let rect = *engine.document().rect(id(1)).unwrap();
        assert_eq!((rect.x, rect.y, rect.w, rect.h), (0.0, 0.0, 14.0, 10.0));

        engine.update_transform(Point2::new(14.0, 7.0), Modifiers::ALT).unwrap();
        let rect = *engine.document().rect(id(1)).unwrap();
        assert_eq!((rect.x, rect.w), (-4.0, 18.0));
        engine.cancel_transform().unwrap();
    }

    #[test]
    fn begin_rejects_bad_requests_without_side_effects() {
        let mut engine = Engine::new();
        engine
            .upsert_line(id(1), LineRecord::new(Point2::ORIGIN, Point2::new(1.0, 0.0)))
            .unwrap();
        let begin = |mode, sub_index| {
            let mut request = TransformBegin::new(vec![id(1)], mode, Point2::ORIGIN);
            request.sub_index = sub_index;
            request
        };
        assert_eq!(
            engine.begin_transform(TransformBegin::new(
                Vec::new(),
                TransformMode::Move,
                Point2::ORIGIN
            )),
            Err(EngineError::EmptySelection)
        );
        assert_eq!(
            engine.begin_transform(begin(TransformMode::VertexDrag, 2)),
            Err(EngineError::InvalidSubTarget { id: id(1), index: 2 })
        );
        assert!(matches!(
            engine.begin_transform(begin(TransformMode::EdgeDrag, 0)),
            Err(EngineError::UnsupportedKind { .. })
        ));
        assert!(matches!(
            engine.begin_transform(TransformBegin::new(
                vec![id(1)],
                TransformMode::Move,
                Point2::new(f32::NAN, 0.0)
            )),
            Err(EngineError::NonFinite { .. })
        ));
        assert_eq!(engine.transform_state(), TransformState::Idle);
        assert_eq!(engine.history_meta().depth, 0);

        engine.begin_transform(begin(TransformMode::Move, 0)).unwrap();
        assert_eq!(
            engine.begin_transform(begin(TransformMode::Move, 0)),
            Err(EngineError::SessionActive)
        );
        assert!(!engine.undo());
    }

    #[test]
    fn drag_threshold_scales_with_the_view() {
        let mut engine = Engine::with_options(crate::EngineOptions {
            drag_threshold: 4.0,
            ..crate::EngineOptions::default()
        });
        engine.upsert_rect(id(1), RectRecord::new(0.0, 0.0, 10.0, 10.0)).unwrap();
        let mut request = TransformBegin::new(vec![id(1)], TransformMode::Move, Point2::ORIGIN);
        request.view = ViewContext { scale: 2.0 };
        engine.begin_transform(request).unwrap();

        engine.update_transform(Point2::new(1.5, 0.0), Modifiers::empty()).unwrap();
        assert_eq!(engine.document().rect(id(1)).unwrap().x, 0.0);
        engine.update_transform(Point2::new(2.5, 0.0), Modifiers::empty()).unwrap();
        assert_eq!(engine.document().rect(id(1)).unwrap().x, 2.5);
        // Once past the threshold, small offsets apply too.
        engine.update_transform(Point2::new(0.5, 0.0), Modifiers::empty()).unwrap();
        assert_eq!(engine.document().rect(id(1)).unwrap().x, 0.5);
        assert!(engine.commit_transform().unwrap());
    }
}
