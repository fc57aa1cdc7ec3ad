//! Contour extraction, geometric filtering, and speckle rejection.

use anyhow::{bail, Result};
use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use imageproc::point::Point;

use super::Pipe;
use crate::contour::Contour;
use crate::geometry::Point2;
use crate::settings::DoubleRange;

/// Outer boundaries of every top-level blob in a mask. Holes, and blobs
/// nested inside holes, are ignored.
#[derive(Debug, Default)]
pub struct FindContoursPipe;

impl<'a> Pipe<&'a GrayImage> for FindContoursPipe {
    type Output = Vec<Contour>;
    type Params = ();

    fn name(&self) -> &'static str {
        "find_contours"
    }

    fn set_params(&mut self, _params: ()) {}

    fn process(&mut self, input: &'a GrayImage) -> Result<Vec<Contour>> {
        if input.width() == 0 || input.height() == 0 {
            bail!("cannot find contours in an empty mask");
        }
        find_contours::<i32>(input)
            .into_iter()
            .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
            .map(|c| Contour::new(compress_chain(&c.points)))
            .collect()
    }
}

/// Collapse runs of boundary pixels that step in the same direction down to
/// their endpoints.
pub fn compress_chain(points: &[Point<i32>]) -> Vec<Point2> {
    let to_point = |p: &Point<i32>| Point2::new(f64::from(p.x), f64::from(p.y));
    let n = points.len();
    if n <= 2 {
        return points.iter().map(to_point).collect();
    }

    let step = |a: &Point<i32>, b: &Point<i32>| ((b.x - a.x).signum(), (b.y - a.y).signum());
    (0..n)
        .filter(|&i| {
            let prev = &points[(i + n - 1) % n];
            let next = &points[(i + 1) % n];
            step(prev, &points[i]) != step(&points[i], next)
        })
        .map(|i| to_point(&points[i]))
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FilterContoursParams {
    /// Percent of `image_area`.
    pub area: DoubleRange,
    pub ratio: DoubleRange,
    /// Percent of the min-area rect.
    pub extent: DoubleRange,
    pub image_area: f64,
}

impl Default for FilterContoursParams {
    fn default() -> Self {
        Self {
            area: DoubleRange::new(0.0, 100.0),
            ratio: DoubleRange::new(0.0, 20.0),
            extent: DoubleRange::new(0.0, 100.0),
            image_area: 1.0,
        }
    }
}

#[derive(Debug, Default)]
pub struct FilterContoursPipe {
    params: FilterContoursParams,
}

impl FilterContoursPipe {
    pub fn new(params: FilterContoursParams) -> Self {
        Self { params }
    }

    /// Whether a contour passes every range; degenerate shapes never pass.
    pub fn accepts(&self, contour: &Contour) -> bool {
        let p = &self.params;
        let area = contour.area();

        let area_percent = area / p.image_area * 100.0;
        if !p.area.contains(area_percent) {
            return false;
        }

        let rect_area = contour.min_area_rect().area();
        if rect_area <= 0.0 {
            return false;
        }
        // Float noise can push a perfect fill past 100.
        let extent = (area / rect_area * 100.0).min(100.0);
        if !p.extent.contains(extent) {
            return false;
        }

        match contour.bounding_rect().aspect_ratio() {
            Some(ratio) => p.ratio.contains(ratio),
            None => false,
        }
    }
}

impl Pipe<Vec<Contour>> for FilterContoursPipe {
    type Output = Vec<Contour>;
    type Params = FilterContoursParams;

    fn name(&self) -> &'static str {
        "filter_contours"
    }

    fn set_params(&mut self, params: FilterContoursParams) {
        self.params = params;
    }

    fn process(&mut self, input: Vec<Contour>) -> Result<Vec<Contour>> {
        if self.params.image_area <= 0.0 {
            bail!("filter image area must be positive");
        }
        Ok(input.into_iter().filter(|c| self.accepts(c)).collect())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpeckleRejectParams {
    pub min_percent_of_average: f64,
}

impl Default for SpeckleRejectParams {
    fn default() -> Self {
        Self {
            min_percent_of_average: 5.0,
        }
    }
}

#[derive(Debug, Default)]
pub struct SpeckleRejectPipe {
    params: SpeckleRejectParams,
}

impl SpeckleRejectPipe {
    pub fn new(params: SpeckleRejectParams) -> Self {
        Self { params }
    }
}

impl Pipe<Vec<Contour>> for SpeckleRejectPipe {
    type Output = Vec<Contour>;
    type Params = SpeckleRejectParams;

    fn name(&self) -> &'static str {
        "speckle_reject"
    }

    fn set_params(&mut self, params: SpeckleRejectParams) {
        self.params = params;
    }

    fn process(&mut self, input: Vec<Contour>) -> Result<Vec<Contour>> {
        if input.is_empty() {
            return Ok(input);
        }

        let (mut sum, mut smallest, mut largest) = (0.0, f64::MAX, f64::MIN);
        for c in &input {
            let area = c.area();
            sum += area;
            smallest = smallest.min(area);
            largest = largest.max(area);
        }
        // The true mean lies in [smallest, largest]; clamping removes rounding drift.
        let mean = (sum / input.len() as f64).clamp(smallest, largest);
        let min_area = self.params.min_percent_of_average / 100.0 * mean;

        Ok(input.into_iter().filter(|c| c.area() >= min_area).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contour::tests::boxed;
    use image::Luma;

    fn mask(size: u32, blocks: &[(u32, u32, u32, u32)]) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            let on = blocks
                .iter()
                .any(|&(bx, by, w, h)| x >= bx && x < bx + w && y >= by && y < by + h);
            Luma([if on { 255 } else { 0 }])
        })
    }

    #[test]
    fn finds_outer_boundaries_only() {
        // A ring with a blob inside its hole, plus a separate box.
        let mut m = mask(60, &[(5, 5, 30, 30), (45, 45, 10, 5)]);
        for y in 10..30 {
            for x in 10..30 {
                m.put_pixel(x, y, Luma([0]));
            }
        }
        for y in 18..22 {
            for x in 18..22 {
                m.put_pixel(x, y, Luma([255]));
            }
        }
        let contours = FindContoursPipe.run(&m).unwrap().value;
        assert_eq!(contours.len(), 2);
    }

    #[test]
    fn rectangles_compress_to_corners() {
        let m = mask(40, &[(5, 5, 10, 20)]);
        let contours = FindContoursPipe.run(&m).unwrap().value;
        assert_eq!(contours.len(), 1);
        let c = &contours[0];
        assert_eq!(c.points().len(), 4);
        assert_eq!(c.area(), 9.0 * 19.0);
        assert_eq!(c.bounding_rect(), crate::geometry::Rect::new(5, 5, 10, 20));
    }

    #[test]
    fn compress_keeps_short_chains() {
        let pts = [Point::new(1, 1), Point::new(2, 1)];
        assert_eq!(compress_chain(&pts).len(), 2);
    }

    fn params(area: (f64, f64), ratio: (f64, f64), extent: (f64, f64)) -> FilterContoursParams {
        FilterContoursParams {
            area: DoubleRange::new(area.0, area.1),
            ratio: DoubleRange::new(ratio.0, ratio.1),
            extent: DoubleRange::new(extent.0, extent.1),
            image_area: 100.0 * 100.0,
        }
    }

    #[test]
    fn filter_rejects_each_range() {
        // 10x20 pixel box: area 171 (1.71%), ratio 0.5, extent 100%
        let c = || boxed(0.0, 0.0, 9.0, 19.0);
        let run = |p| {
            FilterContoursPipe::new(p)
                .run(vec![c()])
                .unwrap()
                .value
                .len()
        };
        assert_eq!(run(params((0.0, 100.0), (0.0, 20.0), (0.0, 100.0))), 1);
        assert_eq!(run(params((2.0, 100.0), (0.0, 20.0), (0.0, 100.0))), 0);
        assert_eq!(run(params((0.0, 100.0), (1.0, 20.0), (0.0, 100.0))), 0);
        assert_eq!(run(params((0.0, 100.0), (0.0, 20.0), (0.0, 90.0))), 0);
        // inclusive bounds
        assert_eq!(run(params((1.7, 1.72), (0.5, 0.5), (99.0, 101.0))), 1);
    }

    #[test]
    fn widening_ranges_never_drops_a_contour() {
        let shapes = [
            boxed(0.0, 0.0, 9.0, 19.0),
            boxed(10.0, 10.0, 30.0, 4.0),
            crate::contour::tests::strip(50.0, 50.0, 20.0, 6.0, 25.0),
        ];
        let narrow = params((0.5, 2.0), (0.3, 3.0), (60.0, 100.0));
        let widenings = [
            params((0.1, 2.0), (0.3, 3.0), (60.0, 100.0)),
            params((0.5, 50.0), (0.3, 3.0), (60.0, 100.0)),
            params((0.5, 2.0), (0.0, 3.0), (60.0, 100.0)),
            params((0.5, 2.0), (0.3, 10.0), (60.0, 100.0)),
            params((0.5, 2.0), (0.3, 3.0), (0.0, 100.0)),
        ];
        let base = FilterContoursPipe::new(narrow);
        for wide in widenings {
            let wide = FilterContoursPipe::new(wide);
            for shape in &shapes {
                if base.accepts(shape) {
                    assert!(wide.accepts(shape));
                }
            }
        }
    }

    #[test]
    fn degenerate_contours_are_skipped() {
        let line = Contour::new(vec![Point2::new(0.0, 0.0), Point2::new(5.0, 0.0)]).unwrap();
        let out = FilterContoursPipe::new(params((0.0, 100.0), (0.0, 100.0), (0.0, 100.0)))
            .run(vec![line])
            .unwrap()
            .value;
        assert!(out.is_empty());
    }

    #[test]
    fn speckle_reject_drops_small_contours() {
        let input = vec![
            boxed(0.0, 0.0, 10.0, 10.0),
            boxed(20.0, 0.0, 10.0, 10.0),
            boxed(40.0, 0.0, 1.0, 1.0),
        ];
        let out = SpeckleRejectPipe::new(SpeckleRejectParams {
            min_percent_of_average: 10.0,
        })
        .run(input)
        .unwrap()
        .value;
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn speckle_reject_keeps_equal_areas() {
        for percent in [0.0, 5.0, 50.0, 99.9, 100.0] {
            let input: Vec<Contour> = (0..7).map(|_| boxed(0.3, 0.3, 0.1, 0.7)).collect();
            let out = SpeckleRejectPipe::new(SpeckleRejectParams {
                min_percent_of_average: percent,
            })
            .run(input)
            .unwrap()
            .value;
            assert_eq!(out.len(), 7);
        }
    }

    #[test]
    fn speckle_reject_handles_empty_input() {
        let out = SpeckleRejectPipe::default().run(Vec::new()).unwrap().value;
        assert!(out.is_empty());
    }
}
