//! Planar geometry primitives used by the contour and target stages.
//!
//! Everything here works in image pixel coordinates: x grows to the right,
//! y grows downward.

use serde::{Deserialize, Serialize};

const EPSILON: f64 = 1e-9;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point2) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn midpoint(self, other: Point2) -> Point2 {
        Point2::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }

    fn sub(self, other: Point2) -> Point2 {
        Point2::new(self.x - other.x, self.y - other.y)
    }

    fn cross(self, other: Point2) -> f64 {
        self.x * other.y - self.y * other.x
    }

    fn dot(self, other: Point2) -> f64 {
        self.x * other.x + self.y * other.y
    }
}

/// Axis-aligned rectangle with inclusive pixel semantics (a single pixel is 1x1).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> f64 {
        f64::from(self.width) * f64::from(self.height)
    }

    /// Width over height, or `None` for a zero-height rectangle.
    pub fn aspect_ratio(&self) -> Option<f64> {
        if self.height <= 0 {
            return None;
        }
        Some(f64::from(self.width) / f64::from(self.height))
    }

    pub fn center(&self) -> Point2 {
        Point2::new(
            f64::from(self.x) + f64::from(self.width) / 2.0,
            f64::from(self.y) + f64::from(self.height) / 2.0,
        )
    }

    /// Centers of the four corner pixels. Their `bounding_rect` is `self`.
    pub fn pixel_corners(&self) -> [Point2; 4] {
        let (x0, y0) = (f64::from(self.x), f64::from(self.y));
        let x1 = x0 + f64::from(self.width - 1).max(0.0);
        let y1 = y0 + f64::from(self.height - 1).max(0.0);
        [
            Point2::new(x0, y0),
            Point2::new(x1, y0),
            Point2::new(x1, y1),
            Point2::new(x0, y1),
        ]
    }
}

/// Smallest enclosing rectangle of integral pixel coordinates.
pub fn bounding_rect(points: &[Point2]) -> Option<Rect> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in &points[1..] {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    let x = min_x.floor() as i32;
    let y = min_y.floor() as i32;
    Some(Rect::new(
        x,
        y,
        max_x.floor() as i32 - x + 1,
        max_y.floor() as i32 - y + 1,
    ))
}

/// Rectangle of arbitrary orientation.
///
/// `angle` is the direction of the `width` side in degrees, normalized to
/// `[-45, 45)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RotatedRect {
    pub center: Point2,
    pub width: f64,
    pub height: f64,
    pub angle: f64,
}

impl RotatedRect {
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Corners in drawing order, starting at the `-width/2, -height/2` corner.
    pub fn corners(&self) -> [Point2; 4] {
        let (sin, cos) = self.angle.to_radians().sin_cos();
        let (hw, hh) = (self.width / 2.0, self.height / 2.0);
        let c = self.center;
        let at = |sx: f64, sy: f64| {
            Point2::new(
                c.x + sx * hw * cos - sy * hh * sin,
                c.y + sx * hw * sin + sy * hh * cos,
            )
        };
        [at(-1.0, -1.0), at(1.0, -1.0), at(1.0, 1.0), at(-1.0, 1.0)]
    }

    fn degenerate(center: Point2) -> Self {
        Self {
            center,
            ..Self::default()
        }
    }
}

/// Sort four corners into top-left, top-right, bottom-right, bottom-left order.
pub fn order_corners(mut corners: [Point2; 4]) -> [Point2; 4] {
    corners.sort_by(|a, b| a.y.total_cmp(&b.y).then(a.x.total_cmp(&b.x)));
    let (mut top, mut bottom) = ([corners[0], corners[1]], [corners[2], corners[3]]);
    top.sort_by(|a, b| a.x.total_cmp(&b.x));
    bottom.sort_by(|a, b| a.x.total_cmp(&b.x));
    [top[0], top[1], bottom[1], bottom[0]]
}

/// Convex hull by monotone chain, counter-clockwise in image coordinates.
///
/// Collinear points are dropped; fully collinear input yields its two endpoints.
pub fn convex_hull(points: &[Point2]) -> Vec<Point2> {
    let mut pts: Vec<Point2> = points.to_vec();
    pts.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }

    let turns_left = |hull: &[Point2], p: Point2| {
        let a = hull[hull.len() - 2];
        let b = hull[hull.len() - 1];
        b.sub(a).cross(p.sub(a)) > EPSILON
    };

    let mut hull: Vec<Point2> = Vec::with_capacity(pts.len() * 2);
    for &p in &pts {
        while hull.len() >= 2 && !turns_left(&hull, p) {
            hull.pop();
        }
        hull.push(p);
    }
    let lower_len = hull.len() + 1;
    for &p in pts.iter().rev().skip(1) {
        while hull.len() >= lower_len && !turns_left(&hull, p) {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();
    hull
}

/// Minimum-area enclosing rectangle via rotating calipers over hull edges.
pub fn min_area_rect(points: &[Point2]) -> Option<RotatedRect> {
    let hull = convex_hull(points);
    match hull.len() {
        0 => return None,
        1 => return Some(RotatedRect::degenerate(hull[0])),
        _ => {}
    }

    let mut best: Option<(f64, RotatedRect)> = None;
    for i in 0..hull.len() {
        let a = hull[i];
        let b = hull[(i + 1) % hull.len()];
        let edge = b.sub(a);
        let len = edge.dot(edge).sqrt();
        if len < EPSILON {
            continue;
        }
        let u = Point2::new(edge.x / len, edge.y / len);
        let v = Point2::new(-u.y, u.x);

        let (mut min_u, mut max_u, mut min_v, mut max_v) =
            (f64::MAX, f64::MIN, f64::MAX, f64::MIN);
        for p in &hull {
            let d = p.sub(a);
            let pu = d.dot(u);
            let pv = d.dot(v);
            min_u = min_u.min(pu);
            max_u = max_u.max(pu);
            min_v = min_v.min(pv);
            max_v = max_v.max(pv);
        }

        let width = max_u - min_u;
        let height = max_v - min_v;
        let area = width * height;
        if best.as_ref().is_some_and(|(best_area, _)| *best_area <= area) {
            continue;
        }

        let mid_u = (min_u + max_u) / 2.0;
        let mid_v = (min_v + max_v) / 2.0;
        let center = Point2::new(a.x + u.x * mid_u + v.x * mid_v, a.y + u.y * mid_u + v.y * mid_v);
        best = Some((area, normalized_rect(center, width, height, u)));
    }

    best.map(|(_, rect)| rect)
}

fn normalized_rect(center: Point2, width: f64, height: f64, axis: Point2) -> RotatedRect {
    let mut angle = axis.y.atan2(axis.x).to_degrees();
    while angle >= 90.0 {
        angle -= 180.0;
    }
    while angle < -90.0 {
        angle += 180.0;
    }
    let (mut width, mut height) = (width, height);
    if angle >= 45.0 {
        angle -= 90.0;
        std::mem::swap(&mut width, &mut height);
    } else if angle < -45.0 {
        angle += 90.0;
        std::mem::swap(&mut width, &mut height);
    }
    RotatedRect {
        center,
        width,
        height,
        angle,
    }
}

/// Signed shoelace area; positive when the polygon winds clockwise on screen.
fn signed_area(points: &[Point2]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut acc = 0.0;
    for i in 0..points.len() {
        let a = points[i];
        let b = points[(i + 1) % points.len()];
        acc += a.x * b.y - b.x * a.y;
    }
    acc / 2.0
}

pub fn polygon_area(points: &[Point2]) -> f64 {
    signed_area(points).abs()
}

/// Closed polyline length.
pub fn polygon_perimeter(points: &[Point2]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    (0..points.len())
        .map(|i| points[i].distance(points[(i + 1) % points.len()]))
        .sum()
}

/// Spatial moments up to second order.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Moments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
    pub m20: f64,
    pub m11: f64,
    pub m02: f64,
}

impl Moments {
    /// Moments of the region enclosed by a polygon (Green's theorem).
    pub fn from_polygon(points: &[Point2]) -> Self {
        if points.len() < 3 {
            return Self::default();
        }
        let mut m = Self::default();
        for i in 0..points.len() {
            let p = points[i];
            let q = points[(i + 1) % points.len()];
            let a = p.x * q.y - q.x * p.y;
            m.m00 += a;
            m.m10 += a * (p.x + q.x);
            m.m01 += a * (p.y + q.y);
            m.m20 += a * (p.x * p.x + p.x * q.x + q.x * q.x);
            m.m02 += a * (p.y * p.y + p.y * q.y + q.y * q.y);
            m.m11 += a * (p.x * q.y + 2.0 * p.x * p.y + 2.0 * q.x * q.y + q.x * p.y);
        }
        m.m00 /= 2.0;
        m.m10 /= 6.0;
        m.m01 /= 6.0;
        m.m20 /= 12.0;
        m.m02 /= 12.0;
        m.m11 /= 24.0;
        if m.m00 < 0.0 {
            m = Self {
                m00: -m.m00,
                m10: -m.m10,
                m01: -m.m01,
                m20: -m.m20,
                m11: -m.m11,
                m02: -m.m02,
            };
        }
        m
    }

    /// Moments of a discrete point set, each point weighted 1.
    pub fn from_points(points: &[Point2]) -> Self {
        points.iter().fold(Self::default(), |mut m, p| {
            m.m00 += 1.0;
            m.m10 += p.x;
            m.m01 += p.y;
            m.m20 += p.x * p.x;
            m.m11 += p.x * p.y;
            m.m02 += p.y * p.y;
            m
        })
    }

    pub fn centroid(&self) -> Option<Point2> {
        if self.m00.abs() < EPSILON {
            return None;
        }
        Some(Point2::new(self.m10 / self.m00, self.m01 / self.m00))
    }

    /// Orientation of the equivalent ellipse's major axis in radians.
    pub fn orientation(&self) -> Option<f64> {
        let c = self.centroid()?;
        let mu20 = self.m20 / self.m00 - c.x * c.x;
        let mu02 = self.m02 / self.m00 - c.y * c.y;
        let mu11 = self.m11 / self.m00 - c.x * c.y;
        if mu11.abs() < EPSILON && (mu20 - mu02).abs() < EPSILON {
            return None;
        }
        Some(0.5 * (2.0 * mu11).atan2(mu20 - mu02))
    }
}

/// Infinite line through `point` along `direction`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Line2 {
    pub point: Point2,
    pub direction: Point2,
}

impl Line2 {
    pub fn from_angle(point: Point2, radians: f64) -> Self {
        let (sin, cos) = radians.sin_cos();
        Self {
            point,
            direction: Point2::new(cos, sin),
        }
    }

    /// Intersection with another line, `None` when (nearly) parallel.
    pub fn intersect(&self, other: &Line2) -> Option<Point2> {
        let denom = self.direction.cross(other.direction);
        if denom.abs() < EPSILON {
            return None;
        }
        let t = other.point.sub(self.point).cross(other.direction) / denom;
        Some(Point2::new(
            self.point.x + t * self.direction.x,
            self.point.y + t * self.direction.y,
        ))
    }
}
