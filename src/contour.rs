//! Contours extracted from a binary mask.
//!
//! A `Contour` owns its boundary points and derives its shape descriptors on
//! first use. Contours live for one frame.

use std::cell::OnceCell;

use anyhow::{anyhow, Result};

use crate::geometry::{
    self, bounding_rect, convex_hull, min_area_rect, Line2, Moments, Point2, Rect, RotatedRect,
};
use crate::settings::IntersectionDirection;

#[derive(Clone, Debug)]
pub struct Contour {
    points: Vec<Point2>,
    area: OnceCell<f64>,
    perimeter: OnceCell<f64>,
    min_area_rect: OnceCell<RotatedRect>,
    bounding_rect: OnceCell<Rect>,
    moments: OnceCell<Moments>,
    convex_hull: OnceCell<Vec<Point2>>,
}

impl Contour {
    pub fn new(points: Vec<Point2>) -> Result<Self> {
        if points.is_empty() {
            return Err(anyhow!("contour must contain at least one point"));
        }
        Ok(Self {
            points,
            area: OnceCell::new(),
            perimeter: OnceCell::new(),
            min_area_rect: OnceCell::new(),
            bounding_rect: OnceCell::new(),
            moments: OnceCell::new(),
            convex_hull: OnceCell::new(),
        })
    }

    /// Concatenate the boundaries of several contours into one.
    pub fn merge<'a>(contours: impl IntoIterator<Item = &'a Contour>) -> Result<Self> {
        let points: Vec<Point2> = contours
            .into_iter()
            .flat_map(|c| c.points.iter().copied())
            .collect();
        Self::new(points)
    }

    pub fn points(&self) -> &[Point2] {
        &self.points
    }

    pub fn area(&self) -> f64 {
        *self.area.get_or_init(|| geometry::polygon_area(&self.points))
    }

    pub fn perimeter(&self) -> f64 {
        *self
            .perimeter
            .get_or_init(|| geometry::polygon_perimeter(&self.points))
    }

    pub fn min_area_rect(&self) -> &RotatedRect {
        self.min_area_rect.get_or_init(|| {
            min_area_rect(&self.points).unwrap_or(RotatedRect {
                center: self.points[0],
                ..RotatedRect::default()
            })
        })
    }

    pub fn bounding_rect(&self) -> Rect {
        *self
            .bounding_rect
            .get_or_init(|| bounding_rect(&self.points).unwrap_or_default())
    }

    pub fn moments(&self) -> &Moments {
        self.moments
            .get_or_init(|| Moments::from_polygon(&self.points))
    }

    pub fn convex_hull(&self) -> &[Point2] {
        self.convex_hull.get_or_init(|| convex_hull(&self.points))
    }

    /// Area centroid, falling back to the vertex mean for zero-area outlines.
    pub fn centroid(&self) -> Point2 {
        self.moments()
            .centroid()
            .or_else(|| Moments::from_points(&self.points).centroid())
            .unwrap_or(self.points[0])
    }

    /// Major axis of the contour's equivalent ellipse, through its centroid.
    pub fn principal_axis(&self) -> Option<Line2> {
        let angle = self
            .moments()
            .orientation()
            .or_else(|| Moments::from_points(&self.points).orientation())?;
        Some(Line2::from_angle(self.centroid(), angle))
    }

    /// Whether the principal axes of two contours meet on the requested side
    /// of their combined mass center.
    pub fn is_intersecting(&self, other: &Contour, direction: IntersectionDirection) -> bool {
        if direction == IntersectionDirection::None {
            return true;
        }
        let (Some(a), Some(b)) = (self.principal_axis(), other.principal_axis()) else {
            return false;
        };
        let Some(intersection) = a.intersect(&b) else {
            return false;
        };
        let mass_center = a.point.midpoint(b.point);
        direction.accepts(intersection, mass_center)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::geometry::RotatedRect;
    use approx::assert_relative_eq;

    /// Contour tracing the corners of a rotated strip.
    pub(crate) fn strip(cx: f64, cy: f64, width: f64, height: f64, angle: f64) -> Contour {
        let rect = RotatedRect {
            center: Point2::new(cx, cy),
            width,
            height,
            angle,
        };
        Contour::new(rect.corners().to_vec()).unwrap()
    }

    pub(crate) fn boxed(x: f64, y: f64, w: f64, h: f64) -> Contour {
        Contour::new(vec![
            Point2::new(x, y),
            Point2::new(x + w, y),
            Point2::new(x + w, y + h),
            Point2::new(x, y + h),
        ])
        .unwrap()
    }

    #[test]
    fn empty_contours_are_rejected() {
        assert!(Contour::new(Vec::new()).is_err());
    }

    #[test]
    fn derived_properties_of_a_box() {
        let c = boxed(0.0, 0.0, 9.0, 19.0);
        assert_relative_eq!(c.area(), 171.0);
        assert_relative_eq!(c.perimeter(), 56.0);
        assert_relative_eq!(c.min_area_rect().area(), 171.0, epsilon = 1e-9);
        assert_eq!(c.bounding_rect(), Rect::new(0, 0, 10, 20));
        let centroid = c.centroid();
        assert_relative_eq!(centroid.x, 4.5, epsilon = 1e-9);
        assert_relative_eq!(centroid.y, 9.5, epsilon = 1e-9);
    }

    #[test]
    fn single_point_contour_is_degenerate_not_fatal() {
        let c = Contour::new(vec![Point2::new(3.0, 4.0)]).unwrap();
        assert_eq!(c.area(), 0.0);
        assert_eq!(c.min_area_rect().area(), 0.0);
        assert_eq!(c.centroid(), Point2::new(3.0, 4.0));
        assert!(c.principal_axis().is_none());
    }

    #[test]
    fn leaning_strips_meet_above_their_center() {
        // "/" on the left and "\" on the right, like the legs of an A.
        let left = strip(100.0, 200.0, 80.0, 10.0, -60.0);
        let right = strip(300.0, 200.0, 80.0, 10.0, 60.0);
        assert!(left.is_intersecting(&right, IntersectionDirection::Up));
        assert!(!left.is_intersecting(&right, IntersectionDirection::Down));
        assert!(left.is_intersecting(&right, IntersectionDirection::None));
    }

    #[test]
    fn parallel_strips_never_intersect() {
        let a = strip(100.0, 200.0, 80.0, 10.0, 30.0);
        let b = strip(300.0, 200.0, 80.0, 10.0, 30.0);
        assert!(!a.is_intersecting(&b, IntersectionDirection::Up));
        assert!(!a.is_intersecting(&b, IntersectionDirection::Down));
    }

    #[test]
    fn merge_concatenates_points() {
        let merged = Contour::merge([&boxed(0.0, 0.0, 2.0, 2.0), &boxed(10.0, 0.0, 2.0, 2.0)]).unwrap();
        assert_eq!(merged.points().len(), 8);
        assert_relative_eq!(merged.min_area_rect().area(), 24.0, epsilon = 1e-9);
    }
}
