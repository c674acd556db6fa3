//! Grid and object snapping for transform sessions.
//!
//! Object snapping aligns the moving bounds (edges and center) with the
//! bounds, centers, endpoints and segment midpoints of the entities around
//! them. Each axis snaps independently to its closest candidate.

use draftdoc_core::document::EntityId;
use draftdoc_core::geometry::{Bounds2D, Point2};
use draftdoc_core::shape::Shape;
use glam::Vec2;

use crate::Engine;
use crate::selection::tight_bounds;

/// Distances under which two snap points count as the same hit.
const SAME_POINT_EPSILON: f32 = 1e-4;

#[derive(Debug, Clone, PartialEq)]
pub struct SnapOptions {
    pub enabled: bool,
    pub grid_enabled: bool,
    pub grid_size: f32,
    pub endpoint: bool,
    pub midpoint: bool,
    pub center: bool,
    /// Screen units; divided by `ViewContext::scale` before use.
    pub tolerance: f32,
}

impl Default for SnapOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            grid_enabled: false,
            grid_size: 10.0,
            endpoint: true,
            midpoint: true,
            center: true,
            tolerance: 10.0,
        }
    }
}

impl SnapOptions {
    pub fn grid_active(&self) -> bool {
        self.enabled && self.grid_enabled && self.grid_size > 1e-4
    }

    pub fn objects_active(&self) -> bool {
        self.enabled && (self.endpoint || self.midpoint || self.center)
    }

    /// Rounds `point` to the nearest grid intersection.
    pub fn snap_to_grid(&self, point: Point2) -> Point2 {
        if !self.grid_active() {
            return point;
        }
        let size = self.grid_size;
        Point2::from_vec((point.0 / size).round() * size)
    }

    fn world_tolerance(&self, view_scale: f32) -> f32 {
        let tolerance = if self.tolerance > 0.0 { self.tolerance } else { 10.0 };
        if view_scale > 1e-6 {
            tolerance / view_scale
        } else {
            tolerance
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapTargetKind {
    /// Edge of another entity's bounds.
    Bounds,
    Endpoint,
    Midpoint,
    Center,
}

/// A concrete point the moving bounds snapped to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapHit {
    pub kind: SnapTargetKind,
    pub point: Point2,
}

/// Alignment line drawn while a snap holds. Vertical for x snaps,
/// horizontal for y snaps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapGuide {
    pub from: Point2,
    pub to: Point2,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapResult {
    /// Correction added to the pointer delta.
    pub offset: Vec2,
    pub snapped_x: bool,
    pub snapped_y: bool,
    pub hits: Vec<SnapHit>,
    pub guides: Vec<SnapGuide>,
}

#[derive(Debug, Clone, Copy)]
struct AxisMatch {
    delta: f32,
    guide: f32,
    distance: f32,
    kind: SnapTargetKind,
    point: Point2,
    /// Extent of the candidate along the other axis.
    span: (f32, f32),
}

/// Closest candidate per axis for one moving box.
struct AxisSearch {
    tolerance: f32,
    targets_x: Vec<f32>,
    targets_y: Vec<f32>,
    allow_x: bool,
    allow_y: bool,
    best_x: Option<AxisMatch>,
    best_y: Option<AxisMatch>,
}

impl AxisSearch {
    fn new(moved: &Bounds2D, center: bool, tolerance: f32, allow_x: bool, allow_y: bool) -> Self {
        let (min, max) = (moved.min(), moved.max());
        let mut targets_x = vec![min.x(), max.x()];
        let mut targets_y = vec![min.y(), max.y()];
        if center {
            targets_x.push((min.x() + max.x()) * 0.5);
            targets_y.push((min.y() + max.y()) * 0.5);
        }
        Self {
            tolerance,
            targets_x,
            targets_y,
            allow_x,
            allow_y,
            best_x: None,
            best_y: None,
        }
    }

    fn consider_axis(
        best: &mut Option<AxisMatch>,
        targets: &[f32],
        candidate: f32,
        tolerance: f32,
        kind: SnapTargetKind,
        point: Point2,
        span: (f32, f32),
    ) {
        for &target in targets {
            let delta = candidate - target;
            let distance = delta.abs();
            let closer = best.is_none_or(|current| distance < current.distance);
            if distance <= tolerance && closer {
                *best = Some(AxisMatch {
                    delta,
                    guide: candidate,
                    distance,
                    kind,
                    point,
                    span,
                });
            }
        }
    }

    fn consider_x(&mut self, x: f32, kind: SnapTargetKind, point: Point2, span: (f32, f32)) {
        if self.allow_x {
            Self::consider_axis(
                &mut self.best_x,
                &self.targets_x,
                x,
                self.tolerance,
                kind,
                point,
                span,
            );
        }
    }

    fn consider_y(&mut self, y: f32, kind: SnapTargetKind, point: Point2, span: (f32, f32)) {
        if self.allow_y {
            Self::consider_axis(
                &mut self.best_y,
                &self.targets_y,
                y,
                self.tolerance,
                kind,
                point,
                span,
            );
        }
    }

    fn consider_point(&mut self, point: Point2, kind: SnapTargetKind) {
        self.consider_x(point.x(), kind, point, (point.y(), point.y()));
        self.consider_y(point.y(), kind, point, (point.x(), point.x()));
    }

    fn consider_edges(&mut self, bounds: &Bounds2D) {
        let (min, max) = (bounds.min(), bounds.max());
        let span_y = (min.y(), max.y());
        let span_x = (min.x(), max.x());
        for x in [min.x(), max.x()] {
            self.consider_x(x, SnapTargetKind::Bounds, Point2::new(x, min.y()), span_y);
        }
        for y in [min.y(), max.y()] {
            self.consider_y(y, SnapTargetKind::Bounds, Point2::new(min.x(), y), span_x);
        }
    }

    fn finish(self, moved: &Bounds2D) -> SnapResult {
        let mut result = SnapResult::default();
        if let Some(best) = self.best_x {
            result.snapped_x = true;
            result.offset.x = best.delta;
        }
        if let Some(best) = self.best_y {
            result.snapped_y = true;
            result.offset.y = best.delta;
        }

        for best in [self.best_x, self.best_y].into_iter().flatten() {
            if best.kind == SnapTargetKind::Bounds || result.hits.len() >= 2 {
                continue;
            }
            let duplicate = result.hits.iter().any(|hit| {
                hit.kind == best.kind && hit.point.distance(best.point) <= SAME_POINT_EPSILON
            });
            if !duplicate {
                result.hits.push(SnapHit {
                    kind: best.kind,
                    point: best.point,
                });
            }
        }

        let min = moved.min().0 + result.offset;
        let max = moved.max().0 + result.offset;
        if let Some(best) = self.best_x {
            let (low, high) = (min.y.min(best.span.0), max.y.max(best.span.1));
            result.guides.push(SnapGuide {
                from: Point2::new(best.guide, low),
                to: Point2::new(best.guide, high),
            });
        }
        if let Some(best) = self.best_y {
            let (low, high) = (min.x.min(best.span.0), max.x.max(best.span.1));
            result.guides.push(SnapGuide {
                from: Point2::new(low, best.guide),
                to: Point2::new(high, best.guide),
            });
        }
        result
    }
}

fn endpoints(shape: &Shape) -> Vec<Point2> {
    match shape {
        Shape::Line(_) | Shape::Arrow(_) | Shape::Polyline(_) | Shape::Polygon(_) => {
            shape.vertices()
        }
        Shape::Rect(_) | Shape::Circle(_) | Shape::Text(_) => Vec::new(),
    }
}

fn midpoints(shape: &Shape) -> Vec<Point2> {
    let vertices = shape.vertices();
    let closed = matches!(shape, Shape::Polygon(_)) && vertices.len() >= 3;
    let mut out: Vec<Point2> = vertices
        .windows(2)
        .map(|pair| Point2::from_vec((pair[0].0 + pair[1].0) * 0.5))
        .collect();
    if closed {
        if let (Some(first), Some(last)) = (vertices.first(), vertices.last()) {
            out.push(Point2::from_vec((first.0 + last.0) * 0.5));
        }
    }
    out
}

impl Engine {
    /// Snaps `moved` against every interactive entity near it that is not
    /// in `moving`.
    pub(crate) fn object_snap(
        &self,
        moving: &[EntityId],
        moved: &Bounds2D,
        allow_x: bool,
        allow_y: bool,
        view_scale: f32,
    ) -> SnapResult {
        let options = &self.options.snap;
        if moved.is_empty() || !options.objects_active() || (!allow_x && !allow_y) {
            return SnapResult::default();
        }
        let tolerance = options.world_tolerance(view_scale);
        let mut search = AxisSearch::new(moved, options.center, tolerance, allow_x, allow_y);
        for id in self.index.query_area(&moved.inflate(tolerance)) {
            if moving.contains(&id) || !self.document.is_interactive(id) {
                continue;
            }
            let Some(shape) = self.document.shape(id) else {
                continue;
            };
            let bounds = tight_bounds(&shape);
            if bounds.is_empty() {
                continue;
            }
            // Concrete points first so they win ties against plain edges.
            if options.endpoint {
                for point in endpoints(&shape) {
                    search.consider_point(point, SnapTargetKind::Endpoint);
                }
            }
            if options.midpoint {
                for point in midpoints(&shape) {
                    search.consider_point(point, SnapTargetKind::Midpoint);
                }
            }
            if options.center {
                search.consider_point(bounds.center(), SnapTargetKind::Center);
            }
            search.consider_edges(&bounds);
        }
        search.finish(moved)
    }

    /// Guides of the snap applied by the latest transform update.
    pub fn snap_guides(&self) -> &[SnapGuide] {
        match &self.session {
            Some(session) => &session.snap.guides,
            None => &[],
        }
    }

    pub fn snap_hits(&self) -> &[SnapHit] {
        match &self.session {
            Some(session) => &session.snap.hits,
            None => &[],
        }
    }
}
