//! Per-kind geometry records and the kind-independent `Shape` view over them.

use std::f32::consts::TAU;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::geometry::{Bounds2D, Point2, Vector2, normalize_degrees, rotate_vec};
use crate::style::{Color, StrokeStyle};
use crate::text::{TextBoxMode, TextRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntityKind {
    Rect = 1,
    Line = 2,
    Polyline = 3,
    Circle = 4,
    Polygon = 5,
    Arrow = 6,
    Text = 7,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Rect,
        EntityKind::Line,
        EntityKind::Polyline,
        EntityKind::Circle,
        EntityKind::Polygon,
        EntityKind::Arrow,
        EntityKind::Text,
    ];

    pub fn from_u8(raw: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| *kind as u8 == raw)
    }

    pub fn name(self) -> &'static str {
        match self {
            EntityKind::Rect => "rect",
            EntityKind::Line => "line",
            EntityKind::Polyline => "polyline",
            EntityKind::Circle => "circle",
            EntityKind::Polygon => "polygon",
            EntityKind::Arrow => "arrow",
            EntityKind::Text => "text",
        }
    }

    /// Kinds that carry a fill and therefore seed a fill override on creation.
    pub fn is_filled(self) -> bool {
        matches!(
            self,
            EntityKind::Rect | EntityKind::Circle | EntityKind::Polygon
        )
    }

    /// Kinds whose selection uses pre-rotated corner handles.
    pub fn has_oriented_handles(self) -> bool {
        matches!(
            self,
            EntityKind::Rect | EntityKind::Circle | EntityKind::Text
        )
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Axis-aligned box `[x, x + w] x [y, y + h]`, turned by `rotation` around its center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RectRecord {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub rotation: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub fill: Color,
    pub stroke: StrokeStyle,
    pub elevation: f32,
}

impl RectRecord {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self {
            x,
            y,
            w,
            h,
            rotation: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            fill: Color::WHITE,
            stroke: StrokeStyle::default(),
            elevation: 0.0,
        }
    }

    pub fn center(&self) -> Point2 {
        Point2::new(self.x + self.w * 0.5, self.y + self.h * 0.5)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineRecord {
    pub a: Point2,
    pub b: Point2,
    pub stroke: StrokeStyle,
    pub elevation: f32,
}

impl LineRecord {
    pub fn new(a: Point2, b: Point2) -> Self {
        Self {
            a,
            b,
            stroke: StrokeStyle::default(),
            elevation: 0.0,
        }
    }
}

/// Ellipse with radii `rx`, `ry` before scaling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CircleRecord {
    pub center: Point2,
    pub rx: f32,
    pub ry: f32,
    pub rotation: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub fill: Color,
    pub stroke: StrokeStyle,
    pub elevation: f32,
}

impl CircleRecord {
    pub fn new(center: Point2, rx: f32, ry: f32) -> Self {
        Self {
            center,
            rx,
            ry,
            rotation: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            fill: Color::WHITE,
            stroke: StrokeStyle::default(),
            elevation: 0.0,
        }
    }

    #[inline]
    pub fn radii(&self) -> Vec2 {
        Vec2::new(self.rx * self.scale_x.abs(), self.ry * self.scale_y.abs())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArrowRecord {
    pub a: Point2,
    pub b: Point2,
    pub head: f32,
    pub stroke: StrokeStyle,
    pub elevation: f32,
}

impl ArrowRecord {
    pub fn new(a: Point2, b: Point2, head: f32) -> Self {
        Self {
            a,
            b,
            head,
            stroke: StrokeStyle::default(),
            elevation: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolylineShape {
    pub points: Vec<Point2>,
    pub stroke: StrokeStyle,
    pub elevation: f32,
}

impl PolylineShape {
    pub fn new(points: Vec<Point2>) -> Self {
        Self {
            points,
            stroke: StrokeStyle::default(),
            elevation: 0.0,
        }
    }
}

/// Closed polygon with explicit world-space vertices. `rotation` is the
/// accumulated orientation of its local frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonShape {
    pub points: Vec<Point2>,
    pub rotation: f32,
    pub fill: Color,
    pub stroke: StrokeStyle,
    pub elevation: f32,
}

impl PolygonShape {
    pub fn new(points: Vec<Point2>) -> Self {
        Self {
            points,
            rotation: 0.0,
            fill: Color::WHITE,
            stroke: StrokeStyle::default(),
            elevation: 0.0,
        }
    }

    /// Regular N-gon inscribed in a circle of `radius`, first vertex at `rotation`.
    pub fn regular(center: Point2, radius: f32, sides: u32, rotation: f32) -> Self {
        let sides = sides.max(3);
        let points = (0..sides)
            .map(|i| {
                let angle = rotation + TAU * i as f32 / sides as f32;
                Point2::new(
                    center.x() + radius * angle.cos(),
                    center.y() + radius * angle.sin(),
                )
            })
            .collect();
        Self {
            rotation,
            ..Self::new(points)
        }
    }
}

/// Center, half extents and rotation of an entity's local box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientedFrame {
    pub center: Point2,
    pub half: Vec2,
    pub rotation: f32,
}

impl OrientedFrame {
    pub fn to_local(&self, point: Point2) -> Vec2 {
        point.to_local(self.center, self.rotation)
    }

    pub fn to_world(&self, local: Vec2) -> Point2 {
        Point2::from_local(local, self.center, self.rotation)
    }

    /// World corners in BL, BR, TR, TL order.
    pub fn corners(&self) -> [Point2; 4] {
        let h = self.half;
        [
            Vec2::new(-h.x, -h.y),
            Vec2::new(h.x, -h.y),
            Vec2::new(h.x, h.y),
            Vec2::new(-h.x, h.y),
        ]
        .map(|local| self.to_world(local))
    }

    /// World side midpoints in N, E, S, W order.
    pub fn sides(&self) -> [Point2; 4] {
        let h = self.half;
        [
            Vec2::new(0.0, h.y),
            Vec2::new(h.x, 0.0),
            Vec2::new(0.0, -h.y),
            Vec2::new(-h.x, 0.0),
        ]
        .map(|local| self.to_world(local))
    }
}

/// Result of `getEntityTransform`. `valid` is false only for unknown ids.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntityTransform {
    pub center: Point2,
    pub width: f32,
    pub height: f32,
    pub rotation_deg: f32,
    pub has_rotation: bool,
    pub valid: bool,
}

impl EntityTransform {
    pub const INVALID: EntityTransform = EntityTransform {
        center: Point2::ORIGIN,
        width: 0.0,
        height: 0.0,
        rotation_deg: 0.0,
        has_rotation: false,
        valid: false,
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Shape {
    Rect(RectRecord),
    Line(LineRecord),
    Polyline(PolylineShape),
    Circle(CircleRecord),
    Polygon(PolygonShape),
    Arrow(ArrowRecord),
    Text(TextRecord),
}

impl Shape {
    pub fn kind(&self) -> EntityKind {
        match self {
            Shape::Rect(_) => EntityKind::Rect,
            Shape::Line(_) => EntityKind::Line,
            Shape::Polyline(_) => EntityKind::Polyline,
            Shape::Circle(_) => EntityKind::Circle,
            Shape::Polygon(_) => EntityKind::Polygon,
            Shape::Arrow(_) => EntityKind::Arrow,
            Shape::Text(_) => EntityKind::Text,
        }
    }

    pub fn is_finite(&self) -> bool {
        let all = |values: &[f32]| values.iter().all(|v| v.is_finite());
        let stroke_ok = |s: &StrokeStyle| s.color.is_finite() && s.width.is_finite();
        match self {
            Shape::Rect(r) => {
                all(&[r.x, r.y, r.w, r.h, r.rotation, r.scale_x, r.scale_y, r.elevation])
                    && r.fill.is_finite()
                    && stroke_ok(&r.stroke)
            }
            Shape::Line(l) => {
                l.a.is_finite()
                    && l.b.is_finite()
                    && l.elevation.is_finite()
                    && stroke_ok(&l.stroke)
            }
            Shape::Polyline(p) => {
                p.points.iter().all(|pt| pt.is_finite())
                    && p.elevation.is_finite()
                    && stroke_ok(&p.stroke)
            }
            Shape::Circle(c) => {
                c.center.is_finite()
                    && all(&[c.rx, c.ry, c.rotation, c.scale_x, c.scale_y, c.elevation])
                    && c.fill.is_finite()
                    && stroke_ok(&c.stroke)
            }
            Shape::Polygon(p) => {
                p.points.iter().all(|pt| pt.is_finite())
                    && all(&[p.rotation, p.elevation])
                    && p.fill.is_finite()
                    && stroke_ok(&p.stroke)
            }
            Shape::Arrow(a) => {
                a.a.is_finite()
                    && a.b.is_finite()
                    && all(&[a.head, a.elevation])
                    && stroke_ok(&a.stroke)
            }
            Shape::Text(t) => {
                t.origin.is_finite()
                    && all(&[
                        t.rotation,
                        t.constraint_width,
                        t.elevation,
                        t.layout.width,
                        t.layout.height,
                        t.layout.line_height,
                    ])
                    && t.runs.iter().all(|run| run.size.is_finite())
            }
        }
    }

    /// Vertex list for kinds addressed by vertex index.
    pub fn vertices(&self) -> Vec<Point2> {
        match self {
            Shape::Line(l) => vec![l.a, l.b],
            Shape::Arrow(a) => vec![a.a, a.b],
            Shape::Polyline(p) => p.points.clone(),
            Shape::Polygon(p) => p.points.clone(),
            Shape::Rect(_) | Shape::Circle(_) | Shape::Text(_) => Vec::new(),
        }
    }

    /// Exact bounds: the literal box for rects, the rotation-aware tight box
    /// for ellipses, sampled vertices for polygons and paths, the laid-out
    /// box for text.
    pub fn aabb(&self) -> Bounds2D {
        match self {
            Shape::Rect(r) => Bounds2D::from_corners(
                Point2::new(r.x, r.y),
                Point2::new(r.x + r.w, r.y + r.h),
            ),
            Shape::Circle(c) => {
                let radii = c.radii();
                let (sin, cos) = c.rotation.sin_cos();
                let ex = ((radii.x * cos).powi(2) + (radii.y * sin).powi(2)).sqrt();
                let ey = ((radii.x * sin).powi(2) + (radii.y * cos).powi(2)).sqrt();
                Bounds2D::new(
                    Point2::new(c.center.x() - ex, c.center.y() - ey),
                    Point2::new(c.center.x() + ex, c.center.y() + ey),
                )
            }
            Shape::Text(t) => t.bounds(),
            _ => Bounds2D::from_points(self.vertices()),
        }
    }

    /// Bounds that enclose everything drawn, used by the spatial index.
    pub fn coverage_bounds(&self) -> Bounds2D {
        match self {
            Shape::Rect(r) => {
                let frame = self.oriented_frame().unwrap_or(OrientedFrame {
                    center: r.center(),
                    half: Vec2::new(r.w, r.h) * 0.5,
                    rotation: 0.0,
                });
                Bounds2D::from_points(frame.corners()).inflate(r.stroke.width * 0.5)
            }
            Shape::Arrow(a) => self.aabb().inflate(a.head.max(a.stroke.width * 0.5)),
            Shape::Line(l) => self.aabb().inflate(l.stroke.width * 0.5),
            Shape::Polyline(p) => self.aabb().inflate(p.stroke.width * 0.5),
            Shape::Circle(c) => self.aabb().inflate(c.stroke.width * 0.5),
            Shape::Polygon(p) => self.aabb().inflate(p.stroke.width * 0.5),
            Shape::Text(_) => self.aabb(),
        }
    }

    /// Closed outline for kinds tested by edges and containment.
    pub fn outline(&self) -> Option<Vec<Point2>> {
        match self {
            Shape::Rect(_) => self.oriented_frame().map(|frame| frame.corners().to_vec()),
            Shape::Polygon(p) => Some(p.points.clone()),
            Shape::Text(t) => Some(t.corners().to_vec()),
            _ => None,
        }
    }

    /// Local box for kinds that rotate as a whole.
    pub fn oriented_frame(&self) -> Option<OrientedFrame> {
        match self {
            Shape::Rect(r) => Some(OrientedFrame {
                center: r.center(),
                half: Vec2::new(r.w.abs(), r.h.abs()) * 0.5,
                rotation: r.rotation,
            }),
            Shape::Circle(c) => Some(OrientedFrame {
                center: c.center,
                half: c.radii(),
                rotation: c.rotation,
            }),
            Shape::Text(t) => {
                let local_center = Vec2::new(t.layout.width * 0.5, -t.layout.height * 0.5);
                Some(OrientedFrame {
                    center: Point2::from_local(local_center, t.origin, t.rotation),
                    half: Vec2::new(t.layout.width, t.layout.height) * 0.5,
                    rotation: t.rotation,
                })
            }
            _ => None,
        }
    }

    pub fn transform(&self) -> EntityTransform {
        let bounds = self.aabb();
        let center = if bounds.is_empty() {
            Point2::ORIGIN
        } else {
            bounds.center()
        };
        let (width, height, rotation, has_rotation) = match self {
            Shape::Rect(r) => (r.w, r.h, r.rotation, true),
            Shape::Circle(c) => {
                let radii = c.radii();
                (radii.x * 2.0, radii.y * 2.0, c.rotation, true)
            }
            Shape::Text(t) => (t.layout.width, t.layout.height, t.rotation, true),
            Shape::Polygon(p) => {
                let local =
                    Bounds2D::from_points(p.points.iter().map(|pt| {
                        Point2::from_vec(pt.to_local(center, p.rotation))
                    }));
                (local.width(), local.height(), p.rotation, true)
            }
            Shape::Line(l) => (l.a.distance(l.b), 0.0, 0.0, false),
            Shape::Arrow(a) => (a.a.distance(a.b), 0.0, 0.0, false),
            Shape::Polyline(_) => (bounds.width(), bounds.height(), 0.0, false),
        };
        EntityTransform {
            center,
            width,
            height,
            rotation_deg: normalize_degrees(rotation.to_degrees()),
            has_rotation,
            valid: true,
        }
    }

    pub fn translate(&mut self, delta: Vector2) {
        let d = delta.as_vec2();
        match self {
            Shape::Rect(r) => {
                r.x += d.x;
                r.y += d.y;
            }
            Shape::Line(l) => {
                l.a = l.a.translate(delta);
                l.b = l.b.translate(delta);
            }
            Shape::Arrow(a) => {
                a.a = a.a.translate(delta);
                a.b = a.b.translate(delta);
            }
            Shape::Polyline(p) => p.points.iter_mut().for_each(|pt| *pt = pt.translate(delta)),
            Shape::Polygon(p) => p.points.iter_mut().for_each(|pt| *pt = pt.translate(delta)),
            Shape::Circle(c) => c.center = c.center.translate(delta),
            Shape::Text(t) => t.origin = t.origin.translate(delta),
        }
    }

    /// Turns the whole shape around `pivot`.
    pub fn rotate_about(&mut self, pivot: Point2, radians: f32) {
        match self {
            Shape::Rect(r) => {
                let center = r.center().rotate_about(pivot, radians);
                r.x = center.x() - r.w * 0.5;
                r.y = center.y() - r.h * 0.5;
                r.rotation += radians;
            }
            Shape::Circle(c) => {
                c.center = c.center.rotate_about(pivot, radians);
                c.rotation += radians;
            }
            Shape::Polygon(p) => {
                p.points
                    .iter_mut()
                    .for_each(|pt| *pt = pt.rotate_about(pivot, radians));
                p.rotation += radians;
            }
            Shape::Polyline(p) => p
                .points
                .iter_mut()
                .for_each(|pt| *pt = pt.rotate_about(pivot, radians)),
            Shape::Line(l) => {
                l.a = l.a.rotate_about(pivot, radians);
                l.b = l.b.rotate_about(pivot, radians);
            }
            Shape::Arrow(a) => {
                a.a = a.a.rotate_about(pivot, radians);
                a.b = a.b.rotate_about(pivot, radians);
            }
            Shape::Text(t) => {
                t.origin = t.origin.rotate_about(pivot, radians);
                t.rotation += radians;
            }
        }
    }

    /// Scales positions and extents away from `anchor`.
    pub fn scale_about(&mut self, anchor: Point2, factor: Vec2) {
        let map = |pt: Point2| Point2::from_vec(anchor.0 + (pt.0 - anchor.0) * factor);
        match self {
            Shape::Rect(r) => {
                let a = map(Point2::new(r.x, r.y));
                let b = map(Point2::new(r.x + r.w, r.y + r.h));
                let bounds = Bounds2D::from_corners(a, b);
                r.x = bounds.min().x();
                r.y = bounds.min().y();
                r.w = bounds.width();
                r.h = bounds.height();
            }
            Shape::Circle(c) => {
                c.center = map(c.center);
                c.rx *= factor.x.abs();
                c.ry *= factor.y.abs();
            }
            Shape::Polygon(p) => p.points.iter_mut().for_each(|pt| *pt = map(*pt)),
            Shape::Polyline(p) => p.points.iter_mut().for_each(|pt| *pt = map(*pt)),
            Shape::Line(l) => {
                l.a = map(l.a);
                l.b = map(l.b);
            }
            Shape::Arrow(a) => {
                a.a = map(a.a);
                a.b = map(a.b);
            }
            Shape::Text(t) => t.origin = map(t.origin),
        }
    }

    /// Replaces the local box of a rect, ellipse or text with
    /// `[min, max]` expressed in `frame`. Returns false for other kinds.
    pub fn fit_local_box(&mut self, frame: &OrientedFrame, min: Vec2, max: Vec2) -> bool {
        let size = (max - min).abs();
        let center = frame.to_world((min + max) * 0.5);
        match self {
            Shape::Rect(r) => {
                r.w = size.x;
                r.h = size.y;
                r.x = center.x() - size.x * 0.5;
                r.y = center.y() - size.y * 0.5;
                true
            }
            Shape::Circle(c) => {
                if c.scale_x.abs() > f32::EPSILON {
                    c.rx = size.x * 0.5 / c.scale_x.abs();
                }
                if c.scale_y.abs() > f32::EPSILON {
                    c.ry = size.y * 0.5 / c.scale_y.abs();
                }
                c.center = center;
                true
            }
            Shape::Text(t) => {
                t.box_mode = TextBoxMode::FixedWidth;
                t.constraint_width = size.x;
                t.origin = frame.to_world(Vec2::new(min.x.min(max.x), min.y.max(max.y)));
                true
            }
            _ => false,
        }
    }

    /// Moves the shape so that its AABB center lands on `center`.
    pub fn set_center(&mut self, center: Point2) {
        let bounds = self.aabb();
        if bounds.is_empty() {
            return;
        }
        self.translate(bounds.center().vector_to(center));
    }

    /// Sets the unrotated size around a fixed center. Rects, ellipses and polygons only.
    pub fn set_size(&mut self, width: f32, height: f32) -> bool {
        match self {
            Shape::Rect(r) => {
                let center = r.center();
                r.w = width;
                r.h = height;
                r.x = center.x() - width * 0.5;
                r.y = center.y() - height * 0.5;
                true
            }
            Shape::Circle(c) => {
                if c.scale_x.abs() > f32::EPSILON {
                    c.rx = width / (2.0 * c.scale_x.abs());
                }
                if c.scale_y.abs() > f32::EPSILON {
                    c.ry = height / (2.0 * c.scale_y.abs());
                }
                true
            }
            Shape::Polygon(_) => {
                let current = self.transform();
                if current.width <= f32::EPSILON || current.height <= f32::EPSILON {
                    return false;
                }
                let Shape::Polygon(p) = self else {
                    return false;
                };
                let factor = Vec2::new(width / current.width, height / current.height);
                let center = current.center;
                for pt in &mut p.points {
                    let local = pt.to_local(center, p.rotation) * factor;
                    *pt = Point2::from_local(local, center, p.rotation);
                }
                true
            }
            _ => false,
        }
    }

    /// Sets the absolute rotation. Rects, ellipses, polygons and text only.
    pub fn set_rotation(&mut self, radians: f32) -> bool {
        match self {
            Shape::Rect(r) => r.rotation = radians,
            Shape::Circle(c) => c.rotation = radians,
            Shape::Text(t) => t.rotation = radians,
            Shape::Polygon(p) => {
                let center = Bounds2D::from_points(p.points.iter().copied());
                if center.is_empty() {
                    return false;
                }
                let pivot = center.center();
                let delta = radians - p.rotation;
                p.points
                    .iter_mut()
                    .for_each(|pt| *pt = pt.rotate_about(pivot, delta));
                p.rotation = radians;
            }
            _ => return false,
        }
        true
    }

    /// Sets the length of a line or arrow, keeping its midpoint and direction.
    pub fn set_length(&mut self, length: f32) -> bool {
        let (a, b) = match self {
            Shape::Line(l) => (&mut l.a, &mut l.b),
            Shape::Arrow(arrow) => (&mut arrow.a, &mut arrow.b),
            _ => return false,
        };
        let mid = (a.0 + b.0) * 0.5;
        let dir = b.0 - a.0;
        let angle = dir.y.atan2(dir.x);
        let half = rotate_vec(Vec2::new(length * 0.5, 0.0), angle);
        *a = Point2::from_vec(mid - half);
        *b = Point2::from_vec(mid + half);
        true
    }

    pub fn set_scale(&mut self, scale_x: f32, scale_y: f32) -> bool {
        match self {
            Shape::Rect(r) => {
                r.scale_x = scale_x;
                r.scale_y = scale_y;
            }
            Shape::Circle(c) => {
                c.scale_x = scale_x;
                c.scale_y = scale_y;
            }
            _ => return false,
        }
        true
    }

    /// Mutable access to a single vertex of a vertex-addressed shape.
    pub fn vertex_mut(&mut self, index: usize) -> Option<&mut Point2> {
        match self {
            Shape::Line(l) => match index {
                0 => Some(&mut l.a),
                1 => Some(&mut l.b),
                _ => None,
            },
            Shape::Arrow(a) => match index {
                0 => Some(&mut a.a),
                1 => Some(&mut a.b),
                _ => None,
            },
            Shape::Polyline(p) => p.points.get_mut(index),
            Shape::Polygon(p) => p.points.get_mut(index),
            _ => None,
        }
    }

    pub fn has_fill(&self) -> bool {
        self.kind().is_filled()
    }

    pub fn stroke(&self) -> Option<&StrokeStyle> {
        match self {
            Shape::Rect(r) => Some(&r.stroke),
            Shape::Line(l) => Some(&l.stroke),
            Shape::Polyline(p) => Some(&p.stroke),
            Shape::Circle(c) => Some(&c.stroke),
            Shape::Polygon(p) => Some(&p.stroke),
            Shape::Arrow(a) => Some(&a.stroke),
            Shape::Text(_) => None,
        }
    }

    pub fn fill(&self) -> Option<&Color> {
        match self {
            Shape::Rect(r) => Some(&r.fill),
            Shape::Circle(c) => Some(&c.fill),
            Shape::Polygon(p) => Some(&p.fill),
            _ => None,
        }
    }

    pub fn stroke_mut(&mut self) -> Option<&mut StrokeStyle> {
        match self {
            Shape::Rect(r) => Some(&mut r.stroke),
            Shape::Line(l) => Some(&mut l.stroke),
            Shape::Polyline(p) => Some(&mut p.stroke),
            Shape::Circle(c) => Some(&mut c.stroke),
            Shape::Polygon(p) => Some(&mut p.stroke),
            Shape::Arrow(a) => Some(&mut a.stroke),
            Shape::Text(_) => None,
        }
    }

    pub fn fill_mut(&mut self) -> Option<&mut Color> {
        match self {
            Shape::Rect(r) => Some(&mut r.fill),
            Shape::Circle(c) => Some(&mut c.fill),
            Shape::Polygon(p) => Some(&mut p.fill),
            _ => None,
        }
    }
}
