//! Point picking with sub-target priorities.

use std::cmp::Ordering;

use bitflags::bitflags;
use draftdoc_core::document::EntityId;
use draftdoc_core::geometry::{Point2, distance_to_segment, point_in_polygon};
use draftdoc_core::shape::{EntityKind, Shape};
use glam::Vec2;

use crate::Engine;

bitflags! {
    /// Sub-target categories a pick may report.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PickMask: u32 {
        const BODY = 1 << 0;
        const EDGE = 1 << 1;
        /// Also enables text carets.
        const VERTEX = 1 << 2;
        const HANDLES = 1 << 3;
    }
}

impl Default for PickMask {
    fn default() -> Self {
        PickMask::all()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubTarget {
    Body,
    Edge,
    Vertex,
    ResizeHandle,
    RotateHandle,
    TextBody,
    TextCaret,
}

impl SubTarget {
    pub fn priority(self) -> u8 {
        match self {
            SubTarget::ResizeHandle => 10,
            SubTarget::RotateHandle => 9,
            SubTarget::Vertex | SubTarget::TextCaret => 8,
            SubTarget::Edge => 5,
            SubTarget::Body | SubTarget::TextBody => 1,
        }
    }
}

/// One pick candidate.
///
/// `sub_index` is the vertex or edge index, the handle index (corners 0..3
/// in BL, BR, TR, TL order, sides 4..7 in N, E, S, W order, rotate 8) or
/// the caret byte index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PickHit {
    pub id: EntityId,
    pub kind: EntityKind,
    pub sub_target: SubTarget,
    pub sub_index: Option<u32>,
    pub distance: f32,
}

impl PickHit {
    #[inline]
    pub fn priority(&self) -> u8 {
        self.sub_target.priority()
    }
}

pub const SIDE_HANDLE_NORTH: u32 = 4;
pub const SIDE_HANDLE_EAST: u32 = 5;
pub const SIDE_HANDLE_SOUTH: u32 = 6;
pub const SIDE_HANDLE_WEST: u32 = 7;
pub const ROTATE_HANDLE: u32 = 8;

/// Higher priority first, then nearer.
fn better(a: &PickHit, b: &PickHit) -> Ordering {
    b.priority()
        .cmp(&a.priority())
        .then(a.distance.total_cmp(&b.distance))
}

fn closest_segment(point: Point2, points: &[Point2], closed: bool) -> Option<(u32, f32)> {
    let count = match points.len() {
        0 => return None,
        1 => return Some((0, point.distance(points[0]))),
        n if closed => n,
        n => n - 1,
    };
    (0..count)
        .map(|i| {
            let (d, _) = distance_to_segment(point, points[i], points[(i + 1) % points.len()]);
            (i as u32, d)
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

/// Approximate distance from a local point to an ellipse outline, plus
/// whether it lies inside.
fn ellipse_distance(local: Vec2, radii: Vec2) -> (f32, bool) {
    if radii.x <= f32::EPSILON || radii.y <= f32::EPSILON {
        return (local.length(), false);
    }
    let normalized = (local / radii).length();
    if normalized <= f32::EPSILON {
        return (radii.min_element(), true);
    }
    (local.length() * (1.0 - 1.0 / normalized).abs(), normalized <= 1.0)
}

impl Engine {
    /// Every hit within `tolerance` of `point`, best first.
    pub fn pick_candidates(&self, point: Point2, tolerance: f32, mask: PickMask) -> Vec<PickHit> {
        if !point.is_finite() || !tolerance.is_finite() {
            return Vec::new();
        }
        let tolerance = tolerance.max(0.0);
        let mut hits = Vec::new();
        if mask.contains(PickMask::HANDLES) {
            hits.extend(self.handle_hits(point, tolerance));
        }
        for id in self.index.query_point(point, tolerance) {
            if !self.document.is_interactive(id) {
                continue;
            }
            if let Some(hit) = self.entity_hit(id, point, tolerance, mask) {
                hits.push(hit);
            }
        }
        self.sort_hits(&mut hits);
        hits
    }

    pub fn pick(&self, point: Point2, tolerance: f32, mask: PickMask) -> Option<PickHit> {
        self.pick_candidates(point, tolerance, mask).into_iter().next()
    }

    /// Handles of a homogeneous oriented selection; otherwise vertices and
    /// edges of the selected entities only.
    pub fn pick_selection_handle(&self, point: Point2, tolerance: f32) -> Option<PickHit> {
        if !point.is_finite() || !tolerance.is_finite() {
            return None;
        }
        let tolerance = tolerance.max(0.0);
        let mut hits: Vec<PickHit> = if self.oriented_handle_meta().is_some() {
            self.handle_hits(point, tolerance)
        } else {
            self.selection
                .ids()
                .iter()
                .filter(|id| self.document.is_interactive(**id))
                .filter_map(|id| {
                    self.entity_hit(*id, point, tolerance, PickMask::VERTEX | PickMask::EDGE)
                })
                .collect()
        };
        self.sort_hits(&mut hits);
        hits.into_iter().next()
    }

    /// Side of a single selected rect or ellipse under `point`, tested in
    /// the entity's unrotated frame. Points near a corner belong to the
    /// corner handle instead.
    pub fn pick_side_handle(&self, point: Point2, tolerance: f32) -> Option<PickHit> {
        if !point.is_finite() || !tolerance.is_finite() {
            return None;
        }
        let [id] = self.selection.ids() else {
            return None;
        };
        let shape = self.document.shape(*id)?;
        if !matches!(shape.kind(), EntityKind::Rect | EntityKind::Circle)
            || !self.document.is_interactive(*id)
        {
            return None;
        }
        let frame = shape.oriented_frame()?;
        let local = frame.to_local(point);
        let half = frame.half;
        let tolerance = tolerance.max(0.0);
        let margin = 1.5 * tolerance;
        let along_x = local.x.abs() <= half.x - margin;
        let along_y = local.y.abs() <= half.y - margin;
        let sides = [
            (SIDE_HANDLE_NORTH, (local.y - half.y).abs(), along_x),
            (SIDE_HANDLE_EAST, (local.x - half.x).abs(), along_y),
            (SIDE_HANDLE_SOUTH, (local.y + half.y).abs(), along_x),
            (SIDE_HANDLE_WEST, (local.x + half.x).abs(), along_y),
        ];
        sides
            .into_iter()
            .filter(|(_, distance, along)| *along && *distance <= tolerance)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(index, distance, _)| PickHit {
                id: *id,
                kind: shape.kind(),
                sub_target: SubTarget::ResizeHandle,
                sub_index: Some(index),
                distance,
            })
    }

    fn sort_hits(&self, hits: &mut [PickHit]) {
        let positions = self.document.draw_positions(hits.iter().map(|hit| hit.id));
        hits.sort_by(|a, b| {
            better(a, b).then_with(|| positions.get(&b.id).cmp(&positions.get(&a.id)))
        });
    }

    fn handle_hits(&self, point: Point2, tolerance: f32) -> Vec<PickHit> {
        let Some(meta) = self.oriented_handle_meta() else {
            return Vec::new();
        };
        // Handles belong to the topmost selected entity.
        let Some(&owner) = self.selection.ids().last() else {
            return Vec::new();
        };
        if !self.document.is_interactive(owner) {
            return Vec::new();
        }
        let mut handles: Vec<(SubTarget, u32, Point2)> = meta
            .corners
            .iter()
            .enumerate()
            .map(|(i, pt)| (SubTarget::ResizeHandle, i as u32, *pt))
            .collect();
        if let Some(sides) = meta.sides {
            handles.extend(
                sides
                    .iter()
                    .enumerate()
                    .map(|(i, pt)| (SubTarget::ResizeHandle, SIDE_HANDLE_NORTH + i as u32, *pt)),
            );
        }
        if let Some(rotate) = meta.rotate {
            handles.push((SubTarget::RotateHandle, ROTATE_HANDLE, rotate));
        }
        handles
            .into_iter()
            .filter_map(|(sub_target, index, at)| {
                let distance = point.distance(at);
                (distance <= tolerance).then_some(PickHit {
                    id: owner,
                    kind: meta.kind,
                    sub_target,
                    sub_index: Some(index),
                    distance,
                })
            })
            .collect()
    }

    /// Best hit on one entity under `mask`.
    fn entity_hit(
        &self,
        id: EntityId,
        point: Point2,
        tolerance: f32,
        mask: PickMask,
    ) -> Option<PickHit> {
        let shape = self.document.shape(id)?;
        let kind = shape.kind();
        let hit = |sub_target: SubTarget, sub_index: Option<u32>, distance: f32| PickHit {
            id,
            kind,
            sub_target,
            sub_index,
            distance,
        };
        let mut hits = Vec::new();

        if let Shape::Text(text) = &shape {
            let local = text.to_local(point);
            let (w, h) = (text.layout.width, text.layout.height);
            let dx = (-local.x).max(local.x - w).max(0.0);
            let dy = (local.y).max(-h - local.y).max(0.0);
            let outside = Vec2::new(dx, dy).length();
            if outside > tolerance {
                return None;
            }
            if mask.contains(PickMask::VERTEX) {
                if let Some((byte, distance)) = self.shaper.caret_at(text, local) {
                    hits.push(hit(SubTarget::TextCaret, Some(byte), distance));
                }
            }
            if mask.contains(PickMask::BODY) {
                hits.push(hit(SubTarget::TextBody, None, outside));
            }
            return hits.into_iter().min_by(better);
        }

        if mask.contains(PickMask::VERTEX) {
            let nearest = shape
                .vertices()
                .iter()
                .enumerate()
                .map(|(i, v)| (i as u32, point.distance(*v)))
                .min_by(|a, b| a.1.total_cmp(&b.1));
            if let Some((index, distance)) = nearest.filter(|(_, d)| *d <= tolerance) {
                hits.push(hit(SubTarget::Vertex, Some(index), distance));
            }
        }

        let (edge, inside) = match &shape {
            Shape::Line(l) => (closest_segment(point, &[l.a, l.b], false), false),
            Shape::Arrow(a) => (closest_segment(point, &[a.a, a.b], false), false),
            Shape::Polyline(p) => (closest_segment(point, &p.points, false), false),
            Shape::Polygon(p) => (
                closest_segment(point, &p.points, true),
                point_in_polygon(point, &p.points),
            ),
            Shape::Rect(_) => match shape.outline() {
                Some(outline) => (
                    closest_segment(point, &outline, true),
                    point_in_polygon(point, &outline),
                ),
                None => (None, false),
            },
            Shape::Circle(_) => match shape.oriented_frame() {
                Some(frame) => {
                    let (distance, inside) = ellipse_distance(frame.to_local(point), frame.half);
                    (Some((0, distance)), inside)
                }
                None => (None, false),
            },
            Shape::Text(_) => (None, false),
        };

        if let Some((index, distance)) = edge.filter(|(_, d)| *d <= tolerance) {
            if mask.contains(PickMask::EDGE) {
                hits.push(hit(SubTarget::Edge, Some(index), distance));
            }
            if mask.contains(PickMask::BODY) {
                hits.push(hit(SubTarget::Body, None, distance));
            }
        }
        if inside && mask.contains(PickMask::BODY) {
            let filled = self
                .document
                .resolved_style(id)
                .is_some_and(|style| style.fill_enabled);
            if filled {
                hits.push(hit(SubTarget::Body, None, 0.0));
            }
        }
        hits.into_iter().min_by(better)
    }
}
