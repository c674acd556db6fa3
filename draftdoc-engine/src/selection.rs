//! Selection set, marquee queries and the handle geometry derived from them.

use std::f32::consts::TAU;

use draftdoc_core::document::{Document, EntityId};
use draftdoc_core::geometry::{
    Bounds2D, Point2, normalize_degrees, polygon_intersects_rect, segment_intersects_rect,
};
use draftdoc_core::shape::{EntityKind, EntityTransform, OrientedFrame, Shape};
use glam::Vec2;

use crate::Engine;
use crate::pick::PickMask;

/// Segments used to approximate an ellipse outline in crossing tests.
const ELLIPSE_SAMPLES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    Replace,
    Add,
    Remove,
    Toggle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarqueeMode {
    /// Entities must lie completely inside the rectangle.
    Window,
    /// Touching the rectangle is enough.
    Crossing,
}

/// Pre-rotated handle positions of a homogeneous selection, in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientedHandleMeta {
    pub kind: EntityKind,
    /// BL, BR, TR, TL.
    pub corners: [Point2; 4],
    /// N, E, S, W. Only rects and ellipses have side handles.
    pub sides: Option<[Point2; 4]>,
    pub rotate: Option<Point2>,
    pub center: Point2,
    pub rotation_deg: f32,
}

/// Selected ids kept in draw order.
#[derive(Debug, Clone, Default)]
pub(crate) struct Selection {
    ids: Vec<EntityId>,
    generation: u64,
}

impl Selection {
    #[inline]
    pub fn ids(&self) -> &[EntityId] {
        &self.ids
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.ids.contains(&id)
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn remove(&mut self, id: EntityId) {
        let before = self.ids.len();
        self.ids.retain(|candidate| *candidate != id);
        if self.ids.len() != before {
            self.generation += 1;
        }
    }

    /// Drops unknown ids and duplicates, then sorts by draw position.
    fn normalized(ids: Vec<EntityId>, document: &Document) -> Vec<EntityId> {
        let positions = document.draw_positions(ids.iter().copied());
        let mut keyed: Vec<(usize, EntityId)> = ids
            .into_iter()
            .filter_map(|id| positions.get(&id).map(|position| (*position, id)))
            .collect();
        keyed.sort_unstable();
        keyed.dedup();
        keyed.into_iter().map(|(_, id)| id).collect()
    }

    pub fn replace(&mut self, ids: Vec<EntityId>, document: &Document) {
        self.ids = Self::normalized(ids, document);
        self.generation += 1;
    }

    /// Re-sorts after a draw-order change. Membership is unchanged.
    pub fn sync_order(&mut self, document: &Document) {
        self.ids = Self::normalized(std::mem::take(&mut self.ids), document);
    }

    /// Forgets deleted ids. Returns whether anything was dropped.
    pub fn retain_live(&mut self, document: &Document) -> bool {
        let before = self.ids.len();
        self.ids.retain(|id| document.contains(*id));
        let changed = self.ids.len() != before;
        if changed {
            self.generation += 1;
        }
        changed
    }
}

/// Box the entity actually covers: rotated corners for rects, the laid-out
/// box for text, the exact AABB otherwise.
pub(crate) fn tight_bounds(shape: &Shape) -> Bounds2D {
    match shape {
        Shape::Rect(_) => shape
            .outline()
            .map(Bounds2D::from_points)
            .unwrap_or_else(|| shape.aabb()),
        _ => shape.aabb(),
    }
}

pub(crate) fn ellipse_outline(frame: &OrientedFrame) -> Vec<Point2> {
    (0..ELLIPSE_SAMPLES)
        .map(|i| {
            let t = TAU * i as f32 / ELLIPSE_SAMPLES as f32;
            frame.to_world(Vec2::new(frame.half.x * t.cos(), frame.half.y * t.sin()))
        })
        .collect()
}

fn crosses(shape: &Shape, rect: &Bounds2D) -> bool {
    match shape {
        Shape::Line(l) => segment_intersects_rect(l.a, l.b, rect),
        Shape::Arrow(a) => segment_intersects_rect(a.a, a.b, rect),
        Shape::Polyline(p) => match p.points.as_slice() {
            [] => false,
            [single] => rect.contains_point(*single),
            points => points
                .windows(2)
                .any(|segment| segment_intersects_rect(segment[0], segment[1], rect)),
        },
        Shape::Circle(_) => shape
            .oriented_frame()
            .is_some_and(|frame| polygon_intersects_rect(&ellipse_outline(&frame), rect)),
        Shape::Rect(_) | Shape::Polygon(_) | Shape::Text(_) => match shape.outline() {
            Some(outline) if outline.len() >= 3 => polygon_intersects_rect(&outline, rect),
            Some(outline) => outline.iter().any(|pt| rect.contains_point(*pt)),
            None => false,
        },
    }
}

impl Engine {
    /// Selected ids in draw order.
    #[inline]
    pub fn selection(&self) -> &[EntityId] {
        self.selection.ids()
    }

    #[inline]
    pub fn selection_generation(&self) -> u64 {
        self.selection.generation()
    }

    /// Combines `ids` with the current selection. Unknown ids are ignored.
    /// Returns whether the selection changed.
    pub fn set_selection(&mut self, ids: &[EntityId], mode: SelectionMode) -> bool {
        let current = self.selection.ids();
        let next: Vec<EntityId> = match mode {
            SelectionMode::Replace => ids.to_vec(),
            SelectionMode::Add => current.iter().chain(ids).copied().collect(),
            SelectionMode::Remove => current
                .iter()
                .copied()
                .filter(|id| !ids.contains(id))
                .collect(),
            SelectionMode::Toggle => {
                let kept = current.iter().copied().filter(|id| !ids.contains(id));
                let added = ids.iter().copied().filter(|id| !current.contains(id));
                kept.chain(added).collect()
            }
        };
        self.apply_selection(next)
    }

    pub fn clear_selection(&mut self) -> bool {
        self.apply_selection(Vec::new())
    }

    /// Selects every visible, unlocked entity.
    pub fn select_all(&mut self) -> bool {
        let ids: Vec<EntityId> = self
            .document
            .draw_order()
            .iter()
            .copied()
            .filter(|id| self.document.is_interactive(*id))
            .collect();
        self.apply_selection(ids)
    }

    /// Selection is fixed for the lifetime of a transform session.
    fn apply_selection(&mut self, ids: Vec<EntityId>) -> bool {
        if self.session.is_some() {
            return false;
        }
        let mut staged = self.selection.clone();
        staged.replace(ids, &self.document);
        if staged.ids() == self.selection.ids() {
            return false;
        }
        self.history.mark_selection(self.selection.ids());
        self.selection = staged;
        self.events.record_selection();
        self.mark_dirty();
        true
    }

    /// Picks the topmost entity under `point` and feeds it to
    /// [`Engine::set_selection`]. A replace-pick on empty space clears.
    pub fn select_by_pick(
        &mut self,
        point: Point2,
        tolerance: f32,
        mode: SelectionMode,
    ) -> Option<EntityId> {
        match self.pick(point, tolerance, PickMask::BODY | PickMask::EDGE | PickMask::VERTEX) {
            Some(hit) => {
                self.set_selection(&[hit.id], mode);
                Some(hit.id)
            }
            None => {
                if mode == SelectionMode::Replace {
                    self.clear_selection();
                }
                None
            }
        }
    }

    /// Broad phase: ids whose indexed bounds touch `area`, ascending.
    pub fn query_area(&self, area: &Bounds2D) -> Vec<EntityId> {
        self.index.query_area(area)
    }

    /// Exact per-kind marquee test over interactive entities, in draw order.
    pub fn query_marquee(&self, rect: &Bounds2D, mode: MarqueeMode) -> Vec<EntityId> {
        if rect.is_empty() || !rect.min().is_finite() || !rect.max().is_finite() {
            return Vec::new();
        }
        let hits: Vec<EntityId> = self
            .index
            .query_area(rect)
            .into_iter()
            .filter(|id| self.document.is_interactive(*id))
            .filter(|id| {
                let Some(shape) = self.document.shape(*id) else {
                    return false;
                };
                match mode {
                    MarqueeMode::Window => {
                        let bounds = tight_bounds(&shape);
                        !bounds.is_empty() && rect.contains_bounds(&bounds)
                    }
                    MarqueeMode::Crossing => crosses(&shape, rect),
                }
            })
            .collect();
        let positions = self.document.draw_positions(hits.iter().copied());
        let mut keyed: Vec<(usize, EntityId)> = hits
            .into_iter()
            .filter_map(|id| positions.get(&id).map(|position| (*position, id)))
            .collect();
        keyed.sort_unstable();
        keyed.into_iter().map(|(_, id)| id).collect()
    }

    pub fn marquee_select(
        &mut self,
        rect: &Bounds2D,
        marquee: MarqueeMode,
        mode: SelectionMode,
    ) -> bool {
        let ids = self.query_marquee(rect, marquee);
        self.set_selection(&ids, mode)
    }

    /// Exact bounds of one entity; `None` for unknown ids.
    pub fn entity_aabb(&self, id: EntityId) -> Option<Bounds2D> {
        self.document
            .shape(id)
            .map(|shape| shape.aabb())
            .filter(|bounds| !bounds.is_empty())
    }

    pub fn entity_transform(&self, id: EntityId) -> EntityTransform {
        self.document
            .shape(id)
            .map(|shape| shape.transform())
            .unwrap_or(EntityTransform::INVALID)
    }

    /// Union of member AABBs; `None` when nothing valid is selected.
    pub fn selection_bounds(&self) -> Option<Bounds2D> {
        if self.selection.is_empty() {
            return None;
        }
        let mut bounds = Bounds2D::empty();
        for id in self.selection.ids() {
            if let Some(member) = self.entity_aabb(*id) {
                bounds.include_bounds(&member);
            }
        }
        (!bounds.is_empty()).then_some(bounds)
    }

    /// Kind and local frame shared by every selected entity, when the
    /// selection is homogeneous and of a kind with oriented handles.
    pub(crate) fn selection_frame(&self) -> Option<(EntityKind, OrientedFrame)> {
        let ids = self.selection.ids();
        let kind = self.document.kind_of(*ids.first()?)?;
        if !kind.has_oriented_handles() {
            return None;
        }
        if ids.iter().any(|id| self.document.kind_of(*id) != Some(kind)) {
            return None;
        }
        if let [single] = ids {
            return self.document.shape(*single)?.oriented_frame().map(|frame| (kind, frame));
        }
        let mut union = Bounds2D::empty();
        for id in ids {
            union.include_bounds(&tight_bounds(&self.document.shape(*id)?));
        }
        if union.is_empty() {
            return None;
        }
        let frame = OrientedFrame {
            center: union.center(),
            half: Vec2::new(union.width(), union.height()) * 0.5,
            rotation: 0.0,
        };
        Some((kind, frame))
    }

    pub fn oriented_handle_meta(&self) -> Option<OrientedHandleMeta> {
        let (kind, frame) = self.selection_frame()?;
        let sides = matches!(kind, EntityKind::Rect | EntityKind::Circle).then(|| frame.sides());
        let offset = frame.half.y + self.options.rotate_handle_offset;
        let rotate = frame.to_world(Vec2::new(0.0, offset));
        Some(OrientedHandleMeta {
            kind,
            corners: frame.corners(),
            sides,
            rotate: Some(rotate),
            center: frame.center,
            rotation_deg: normalize_degrees(frame.rotation.to_degrees()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use draftdoc_core::document::EntityFlags;
    use draftdoc_core::shape::{CircleRecord, LineRecord, PolygonShape, RectRecord};

    fn id(raw: u32) -> EntityId {
        EntityId::new(raw)
    }

    fn bounds(x0: f32, y0: f32, x1: f32, y1: f32) -> Bounds2D {
        Bounds2D::new(Point2::new(x0, y0), Point2::new(x1, y1))
    }

    fn engine_with_three() -> Engine {
        let mut engine = Engine::new();
        engine.upsert_rect(id(1), RectRecord::new(0.0, 0.0, 10.0, 10.0)).unwrap();
        engine.upsert_rect(id(2), RectRecord::new(20.0, 0.0, 10.0, 10.0)).unwrap();
        engine.upsert_rect(id(3), RectRecord::new(40.0, 0.0, 10.0, 10.0)).unwrap();
        engine
    }

    #[test]
    fn modes_combine_with_the_current_selection() {
        let mut engine = engine_with_three();
        assert!(engine.set_selection(&[id(3), id(1), id(99)], SelectionMode::Replace));
        assert_eq!(engine.selection(), &[id(1), id(3)]);

        assert!(engine.set_selection(&[id(2)], SelectionMode::Add));
        assert_eq!(engine.selection(), &[id(1), id(2), id(3)]);

        assert!(engine.set_selection(&[id(1)], SelectionMode::Remove));
        assert!(engine.set_selection(&[id(2), id(1)], SelectionMode::Toggle));
        assert_eq!(engine.selection(), &[id(1), id(3)]);

        let generation = engine.selection_generation();
        assert!(!engine.set_selection(&[id(3), id(1)], SelectionMode::Replace));
        assert_eq!(engine.selection_generation(), generation);
    }

    #[test]
    fn standalone_selection_is_not_undoable() {
        let mut engine = engine_with_three();
        let len = engine.history_meta().len;
        engine.set_selection(&[id(1)], SelectionMode::Replace);
        assert_eq!(engine.history_meta().len, len);
    }

    #[test]
    fn selection_inside_a_transaction_is_recorded() {
        let mut engine = engine_with_three();
        engine.begin_history_entry();
        engine.set_selection(&[id(2)], SelectionMode::Replace);
        assert!(engine.commit_history_entry());
        engine.set_selection(&[id(1)], SelectionMode::Replace);
        assert!(engine.undo());
        assert!(engine.selection().is_empty());
        assert!(engine.redo());
        assert_eq!(engine.selection(), &[id(2)]);
    }

    #[test]
    fn window_needs_rotated_corners_inside() {
        let mut engine = Engine::new();
        engine.upsert_rect(id(1), RectRecord::new(0.0, 0.0, 10.0, 10.0)).unwrap();
        engine.set_entity_rotation(id(1), 45.0).unwrap();
        // Literal box fits, rotated corners reach about 7.07 from the center.
        assert!(engine
            .query_marquee(&bounds(-0.5, -0.5, 10.5, 10.5), MarqueeMode::Window)
            .is_empty());
        assert_eq!(
            engine.query_marquee(&bounds(-3.0, -3.0, 13.0, 13.0), MarqueeMode::Window),
            vec![id(1)]
        );
    }

    #[test]
    fn crossing_tests_exact_geometry() {
        let mut engine = Engine::new();
        engine
            .upsert_line(id(1), LineRecord::new(Point2::new(0.0, 0.0), Point2::new(10.0, 10.0)))
            .unwrap();
        engine
            .upsert_circle(id(2), CircleRecord::new(Point2::new(50.0, 50.0), 10.0, 10.0))
            .unwrap();
        // AABB corner of the line but off the segment itself.
        assert!(engine
            .query_marquee(&bounds(8.0, 0.0, 10.0, 2.0), MarqueeMode::Crossing)
            .is_empty());
        // Inside the circle's box corner, outside the circle.
        assert!(engine
            .query_marquee(&bounds(40.5, 40.5, 41.5, 41.5), MarqueeMode::Crossing)
            .is_empty());
        assert_eq!(
            engine.query_marquee(&bounds(55.0, 45.0, 70.0, 55.0), MarqueeMode::Crossing),
            vec![id(2)]
        );
    }

    #[test]
    fn hidden_entities_are_not_marquee_selected() {
        let mut engine = engine_with_three();
        engine.set_entity_flags(&[id(2)], EntityFlags::VISIBLE, false).unwrap();
        assert!(engine.marquee_select(
            &bounds(-5.0, -5.0, 100.0, 100.0),
            MarqueeMode::Window,
            SelectionMode::Replace
        ));
        assert_eq!(engine.selection(), &[id(1), id(3)]);
    }

    #[test]
    fn pick_selects_and_empty_space_clears() {
        let mut engine = engine_with_three();
        assert_eq!(
            engine.select_by_pick(Point2::new(25.0, 5.0), 1.0, SelectionMode::Replace),
            Some(id(2))
        );
        assert_eq!(engine.selection(), &[id(2)]);
        assert_eq!(
            engine.select_by_pick(Point2::new(25.0, 500.0), 1.0, SelectionMode::Replace),
            None
        );
        assert!(engine.selection().is_empty());
    }

    #[test]
    fn selection_bounds_and_transforms() {
        let mut engine = engine_with_three();
        assert!(engine.selection_bounds().is_none());
        engine.set_selection(&[id(1), id(3)], SelectionMode::Replace);
        let union = engine.selection_bounds().unwrap();
        assert_eq!((union.min(), union.max()), (Point2::new(0.0, 0.0), Point2::new(50.0, 10.0)));
        assert!(!engine.entity_transform(id(42)).valid);
        assert!(engine.entity_aabb(id(42)).is_none());
    }

    #[test]
    fn oriented_meta_follows_a_single_rotated_rect() {
        let mut engine = Engine::new();
        engine.upsert_rect(id(1), RectRecord::new(-10.0, -5.0, 20.0, 10.0)).unwrap();
        engine.set_entity_rotation(id(1), 90.0).unwrap();
        engine.set_selection(&[id(1)], SelectionMode::Replace);

        let meta = engine.oriented_handle_meta().unwrap();
        assert!((meta.rotation_deg - 90.0).abs() < 1e-3);
        // BL local (-10, -5) turned by 90 degrees lands on (5, -10).
        assert!(meta.corners[0].distance(Point2::new(5.0, -10.0)) < 1e-3);
        let rotate = meta.rotate.unwrap();
        assert!(rotate.distance(Point2::new(-(5.0 + 24.0), 0.0)) < 1e-3);
        assert!(meta.sides.is_some());
    }

    #[test]
    fn mixed_or_vertex_kinds_have_no_oriented_meta() {
        let mut engine = engine_with_three();
        engine
            .upsert_polygon(id(4), PolygonShape::regular(Point2::ORIGIN, 5.0, 5, 0.0))
            .unwrap();
        engine.set_selection(&[id(4)], SelectionMode::Replace);
        assert!(engine.oriented_handle_meta().is_none());
        engine.set_selection(&[id(1), id(4)], SelectionMode::Replace);
        assert!(engine.oriented_handle_meta().is_none());

        engine.set_selection(&[id(1), id(2)], SelectionMode::Replace);
        let meta = engine.oriented_handle_meta().unwrap();
        assert_eq!(meta.rotation_deg, 0.0);
        assert_eq!(meta.corners[2], Point2::new(30.0, 10.0));
    }
}
