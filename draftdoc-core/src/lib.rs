pub mod document;
pub mod history;
pub mod shape;
pub mod style;
pub mod text;

pub mod geometry {
    use glam::Vec2;
    use serde::{Deserialize, Serialize};

    /// 2D point in document units, backed by `glam::Vec2`.
    #[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
    pub struct Point2(pub Vec2);

    impl Point2 {
        pub const ORIGIN: Point2 = Point2(Vec2::ZERO);

        #[inline]
        pub fn new(x: f32, y: f32) -> Self {
            Self(Vec2::new(x, y))
        }

        #[inline]
        pub fn from_vec(vec: Vec2) -> Self {
            Self(vec)
        }

        #[inline]
        pub fn x(self) -> f32 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f32 {
            self.0.y
        }

        #[inline]
        pub fn translate(self, offset: Vector2) -> Self {
            Self(self.0 + offset.0)
        }

        #[inline]
        pub fn vector_to(self, other: Point2) -> Vector2 {
            Vector2(other.0 - self.0)
        }

        #[inline]
        pub fn distance(self, other: Point2) -> f32 {
            self.0.distance(other.0)
        }

        #[inline]
        pub fn as_vec2(self) -> Vec2 {
            self.0
        }

        #[inline]
        pub fn is_finite(self) -> bool {
            self.0.is_finite()
        }

        /// Rotates around `pivot` by `radians` (counter-clockwise, y up).
        pub fn rotate_about(self, pivot: Point2, radians: f32) -> Self {
            let local = self.0 - pivot.0;
            Self(pivot.0 + rotate_vec(local, radians))
        }

        /// Expresses the point in a frame centered at `origin` and turned by `radians`.
        pub fn to_local(self, origin: Point2, radians: f32) -> Vec2 {
            rotate_vec(self.0 - origin.0, -radians)
        }

        pub fn from_local(local: Vec2, origin: Point2, radians: f32) -> Self {
            Self(origin.0 + rotate_vec(local, radians))
        }
    }

    impl From<Vec2> for Point2 {
        fn from(value: Vec2) -> Self {
            Self::from_vec(value)
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
    pub struct Vector2(pub Vec2);

    impl Vector2 {
        pub const ZERO: Vector2 = Vector2(Vec2::ZERO);

        #[inline]
        pub fn new(x: f32, y: f32) -> Self {
            Self(Vec2::new(x, y))
        }

        #[inline]
        pub fn from_points(start: Point2, end: Point2) -> Self {
            Self(end.0 - start.0)
        }

        #[inline]
        pub fn x(self) -> f32 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f32 {
            self.0.y
        }

        #[inline]
        pub fn length(self) -> f32 {
            self.0.length()
        }

        #[inline]
        pub fn as_vec2(self) -> Vec2 {
            self.0
        }
    }

    impl From<Vec2> for Vector2 {
        fn from(value: Vec2) -> Self {
            Self(value)
        }
    }

    /// Axis-aligned bounding box. An empty box has `min > max`.
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Bounds2D {
        min: Point2,
        max: Point2,
    }

    impl Bounds2D {
        #[inline]
        pub fn new(min: Point2, max: Point2) -> Self {
            Self { min, max }
        }

        /// Builds a normalized box from two arbitrary corners.
        pub fn from_corners(a: Point2, b: Point2) -> Self {
            Self {
                min: Point2(a.0.min(b.0)),
                max: Point2(a.0.max(b.0)),
            }
        }

        pub fn from_points<I>(points: I) -> Self
        where
            I: IntoIterator<Item = Point2>,
        {
            let mut bounds = Self::empty();
            for point in points {
                bounds.include_point(point);
            }
            bounds
        }

        #[inline]
        pub fn empty() -> Self {
            Self {
                min: Point2::new(f32::INFINITY, f32::INFINITY),
                max: Point2::new(f32::NEG_INFINITY, f32::NEG_INFINITY),
            }
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.min.x() > self.max.x() || self.min.y() > self.max.y()
        }

        #[inline]
        pub fn min(&self) -> Point2 {
            self.min
        }

        #[inline]
        pub fn max(&self) -> Point2 {
            self.max
        }

        #[inline]
        pub fn width(&self) -> f32 {
            if self.is_empty() { 0.0 } else { self.max.x() - self.min.x() }
        }

        #[inline]
        pub fn height(&self) -> f32 {
            if self.is_empty() { 0.0 } else { self.max.y() - self.min.y() }
        }

        pub fn include_point(&mut self, point: Point2) {
            if self.is_empty() {
                self.min = point;
                self.max = point;
                return;
            }
            self.min = Point2(self.min.0.min(point.0));
            self.max = Point2(self.max.0.max(point.0));
        }

        pub fn include_bounds(&mut self, other: &Bounds2D) {
            if other.is_empty() {
                return;
            }
            self.include_point(other.min);
            self.include_point(other.max);
        }

        #[inline]
        pub fn center(&self) -> Point2 {
            debug_assert!(!self.is_empty());
            Point2((self.min.0 + self.max.0) * 0.5)
        }

        pub fn inflate(&self, amount: f32) -> Self {
            if self.is_empty() {
                return *self;
            }
            Self {
                min: Point2(self.min.0 - Vec2::splat(amount)),
                max: Point2(self.max.0 + Vec2::splat(amount)),
            }
        }

        pub fn contains_point(&self, point: Point2) -> bool {
            !self.is_empty()
                && point.x() >= self.min.x()
                && point.x() <= self.max.x()
                && point.y() >= self.min.y()
                && point.y() <= self.max.y()
        }

        pub fn contains_bounds(&self, other: &Bounds2D) -> bool {
            !other.is_empty() && self.contains_point(other.min) && self.contains_point(other.max)
        }

        pub fn intersects(&self, other: &Bounds2D) -> bool {
            !self.is_empty()
                && !other.is_empty()
                && self.min.x() <= other.max.x()
                && self.max.x() >= other.min.x()
                && self.min.y() <= other.max.y()
                && self.max.y() >= other.min.y()
        }

        /// Corners in BL, BR, TR, TL order.
        pub fn corners(&self) -> [Point2; 4] {
            [
                self.min,
                Point2::new(self.max.x(), self.min.y()),
                self.max,
                Point2::new(self.min.x(), self.max.y()),
            ]
        }
    }

    #[inline]
    pub fn rotate_vec(v: Vec2, radians: f32) -> Vec2 {
        let (sin, cos) = radians.sin_cos();
        Vec2::new(v.x * cos - v.y * sin, v.x * sin + v.y * cos)
    }

    /// Normalizes an angle in degrees into (-180, 180].
    pub fn normalize_degrees(degrees: f32) -> f32 {
        let mut wrapped = degrees % 360.0;
        if wrapped <= -180.0 {
            wrapped += 360.0;
        } else if wrapped > 180.0 {
            wrapped -= 360.0;
        }
        wrapped
    }

    /// Distance from `p` to segment `ab` and the clamped parameter of the closest point.
    pub fn distance_to_segment(p: Point2, a: Point2, b: Point2) -> (f32, f32) {
        let ab = b.0 - a.0;
        let len_sq = ab.length_squared();
        if len_sq <= f32::EPSILON {
            return (p.distance(a), 0.0);
        }
        let t = ((p.0 - a.0).dot(ab) / len_sq).clamp(0.0, 1.0);
        let closest = a.0 + ab * t;
        (p.0.distance(closest), t)
    }

    /// Liang-Barsky clip test of segment `ab` against `rect`.
    pub fn segment_intersects_rect(a: Point2, b: Point2, rect: &Bounds2D) -> bool {
        if rect.is_empty() {
            return false;
        }
        let d = b.0 - a.0;
        let mut t0 = 0.0f32;
        let mut t1 = 1.0f32;
        let checks = [
            (-d.x, a.x() - rect.min().x()),
            (d.x, rect.max().x() - a.x()),
            (-d.y, a.y() - rect.min().y()),
            (d.y, rect.max().y() - a.y()),
        ];
        for (p, q) in checks {
            if p == 0.0 {
                if q < 0.0 {
                    return false;
                }
                continue;
            }
            let r = q / p;
            if p < 0.0 {
                if r > t1 {
                    return false;
                }
                t0 = t0.max(r);
            } else {
                if r < t0 {
                    return false;
                }
                t1 = t1.min(r);
            }
        }
        t0 <= t1
    }

    /// Even-odd point-in-polygon test.
    pub fn point_in_polygon(p: Point2, vertices: &[Point2]) -> bool {
        if vertices.len() < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = vertices.len() - 1;
        for i in 0..vertices.len() {
            let (vi, vj) = (vertices[i], vertices[j]);
            if (vi.y() > p.y()) != (vj.y() > p.y()) {
                let x = vj.x() + (p.y() - vj.y()) * (vi.x() - vj.x()) / (vi.y() - vj.y());
                if p.x() < x {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }

    /// True when any edge of the closed polygon touches `rect`, or the polygon
    /// encloses the rect, or the rect encloses a vertex.
    pub fn polygon_intersects_rect(vertices: &[Point2], rect: &Bounds2D) -> bool {
        if vertices.is_empty() || rect.is_empty() {
            return false;
        }
        if vertices.iter().any(|v| rect.contains_point(*v)) {
            return true;
        }
        let n = vertices.len();
        for i in 0..n {
            if segment_intersects_rect(vertices[i], vertices[(i + 1) % n], rect) {
                return true;
            }
        }
        point_in_polygon(rect.center(), vertices)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn normalize_degrees_wraps_into_half_open_range() {
            assert_eq!(normalize_degrees(180.0), 180.0);
            assert_eq!(normalize_degrees(-180.0), 180.0);
            assert_eq!(normalize_degrees(270.0), -90.0);
            assert_eq!(normalize_degrees(-450.0), -90.0);
            assert_eq!(normalize_degrees(90.0), 90.0);
        }

        #[test]
        fn liang_barsky_detects_crossing_and_miss() {
            let rect = Bounds2D::new(Point2::new(0.0, 0.0), Point2::new(10.0, 10.0));
            assert!(segment_intersects_rect(
                Point2::new(-5.0, 5.0),
                Point2::new(15.0, 5.0),
                &rect
            ));
            assert!(!segment_intersects_rect(
                Point2::new(-5.0, 12.0),
                Point2::new(15.0, 12.0),
                &rect
            ));
            assert!(segment_intersects_rect(
                Point2::new(2.0, 2.0),
                Point2::new(3.0, 3.0),
                &rect
            ));
        }

        #[test]
        fn segment_distance_clamps_to_endpoints() {
            let (d, t) = distance_to_segment(
                Point2::new(-3.0, 4.0),
                Point2::new(0.0, 0.0),
                Point2::new(10.0, 0.0),
            );
            assert!((d - 5.0).abs() < 1e-6);
            assert_eq!(t, 0.0);
        }

        #[test]
        fn polygon_containment_uses_even_odd_rule() {
            let square = [
                Point2::new(0.0, 0.0),
                Point2::new(4.0, 0.0),
                Point2::new(4.0, 4.0),
                Point2::new(0.0, 4.0),
            ];
            assert!(point_in_polygon(Point2::new(2.0, 2.0), &square));
            assert!(!point_in_polygon(Point2::new(5.0, 2.0), &square));
        }

        #[test]
        fn bounds_track_included_points() {
            let mut bounds = Bounds2D::empty();
            assert!(bounds.is_empty());
            bounds.include_point(Point2::new(1.0, 2.0));
            bounds.include_point(Point2::new(-1.0, 5.0));
            assert_eq!(bounds.min(), Point2::new(-1.0, 2.0));
            assert_eq!(bounds.max(), Point2::new(1.0, 5.0));
            assert_eq!(bounds.center(), Point2::new(0.0, 3.5));
        }
    }
}
