//! Contour grouping: turns contours into candidate targets.

use anyhow::Result;

use super::Pipe;
use crate::contour::Contour;
use crate::geometry::RotatedRect;
use crate::settings::{ContourGrouping, IntersectionDirection};
use crate::target::DetectedClass;

/// One candidate target: the (possibly merged) contour it was built from.
#[derive(Clone, Debug)]
pub struct PotentialTarget {
    pub contour: Contour,
    pub detection: Option<DetectedClass>,
}

impl PotentialTarget {
    pub fn new(contour: Contour) -> Self {
        Self {
            contour,
            detection: None,
        }
    }

    pub fn rect(&self) -> &RotatedRect {
        self.contour.min_area_rect()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GroupContoursParams {
    pub grouping: ContourGrouping,
    pub direction: IntersectionDirection,
}

#[derive(Debug, Default)]
pub struct GroupContoursPipe {
    params: GroupContoursParams,
}

impl GroupContoursPipe {
    pub fn new(params: GroupContoursParams) -> Self {
        Self { params }
    }

    fn group(&self, mut contours: Vec<Contour>) -> Result<Vec<PotentialTarget>> {
        let n = self.params.grouping.count();
        if n == 1 {
            return Ok(contours.into_iter().map(PotentialTarget::new).collect());
        }
        if contours.len() < n {
            return Ok(Vec::new());
        }

        // Right to left by centroid, so windows hold horizontal neighbours.
        contours.sort_by(|a, b| b.centroid().x.total_cmp(&a.centroid().x));

        let mut targets = Vec::new();
        for window in contours.windows(n) {
            let linked = window
                .windows(2)
                .all(|pair| pair[0].is_intersecting(&pair[1], self.params.direction));
            if linked {
                targets.push(PotentialTarget::new(Contour::merge(window)?));
            }
        }
        Ok(targets)
    }
}

impl Pipe<Vec<Contour>> for GroupContoursPipe {
    type Output = Vec<PotentialTarget>;
    type Params = GroupContoursParams;

    fn name(&self) -> &'static str {
        "group_contours"
    }

    fn set_params(&mut self, params: GroupContoursParams) {
        self.params = params;
    }

    fn process(&mut self, input: Vec<Contour>) -> Result<Vec<PotentialTarget>> {
        self.group(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contour::tests::{boxed, strip};

    fn dual(direction: IntersectionDirection) -> GroupContoursPipe {
        GroupContoursPipe::new(GroupContoursParams {
            grouping: ContourGrouping::Dual,
            direction,
        })
    }

    #[test]
    fn single_grouping_keeps_every_contour() {
        let input = vec![boxed(0.0, 0.0, 5.0, 5.0), boxed(20.0, 0.0, 5.0, 5.0)];
        let mut pipe = GroupContoursPipe::default();
        let out = pipe.run(input).unwrap().value;
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn leaning_pair_merges_into_one_target() {
        // Two strips leaning toward each other at the top, 200 px apart.
        let left = strip(100.0, 200.0, 80.0, 10.0, -60.0);
        let right = strip(300.0, 200.0, 80.0, 10.0, 60.0);

        let up = dual(IntersectionDirection::Up)
            .run(vec![left.clone(), right.clone()])
            .unwrap()
            .value;
        assert_eq!(up.len(), 1);
        let rect = up[0].rect();
        assert!((rect.center.x - 200.0).abs() < 1.0);
        assert!((rect.center.y - 200.0).abs() < 1.0);

        let down = dual(IntersectionDirection::Down)
            .run(vec![left, right])
            .unwrap()
            .value;
        assert!(down.is_empty());
    }

    #[test]
    fn fewer_contours_than_group_size_yields_nothing() {
        let out = dual(IntersectionDirection::None)
            .run(vec![boxed(0.0, 0.0, 5.0, 5.0)])
            .unwrap()
            .value;
        assert!(out.is_empty());

        let mut triple = GroupContoursPipe::new(GroupContoursParams {
            grouping: ContourGrouping::Multiple(3),
            direction: IntersectionDirection::None,
        });
        let out = triple
            .run(vec![boxed(0.0, 0.0, 5.0, 5.0), boxed(10.0, 0.0, 5.0, 5.0)])
            .unwrap()
            .value;
        assert!(out.is_empty());
    }

    #[test]
    fn windows_slide_without_wrapping() {
        let input = vec![
            boxed(0.0, 0.0, 5.0, 5.0),
            boxed(10.0, 0.0, 5.0, 5.0),
            boxed(20.0, 0.0, 5.0, 5.0),
        ];
        let out = dual(IntersectionDirection::None).run(input).unwrap().value;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].contour.points().len(), 8);
    }
}
