//! Candidate ranking. Index 0 of the output is the best target.

use std::cmp::Ordering;

use anyhow::Result;

use super::group::PotentialTarget;
use super::Pipe;
use crate::geometry::Point2;
use crate::settings::SortMode;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SortTargetsParams {
    pub mode: SortMode,
    pub image_center: Point2,
    pub max_targets: usize,
}

impl Default for SortTargetsParams {
    fn default() -> Self {
        Self {
            mode: SortMode::Largest,
            image_center: Point2::default(),
            max_targets: 20,
        }
    }
}

#[derive(Debug, Default)]
pub struct SortTargetsPipe {
    params: SortTargetsParams,
}

impl SortTargetsPipe {
    pub fn new(params: SortTargetsParams) -> Self {
        Self { params }
    }

    fn compare(&self, a: &PotentialTarget, b: &PotentialTarget) -> Ordering {
        let (ra, rb) = (a.rect(), b.rect());
        match self.params.mode {
            SortMode::Largest => rb.area().total_cmp(&ra.area()),
            SortMode::Smallest => ra.area().total_cmp(&rb.area()),
            SortMode::Highest => ra.center.y.total_cmp(&rb.center.y),
            SortMode::Lowest => rb.center.y.total_cmp(&ra.center.y),
            SortMode::Leftmost => ra.center.x.total_cmp(&rb.center.x),
            SortMode::Rightmost => rb.center.x.total_cmp(&ra.center.x),
            SortMode::Centermost => {
                let c = self.params.image_center;
                ra.center.distance(c).total_cmp(&rb.center.distance(c))
            }
        }
    }
}

impl Pipe<Vec<PotentialTarget>> for SortTargetsPipe {
    type Output = Vec<PotentialTarget>;
    type Params = SortTargetsParams;

    fn name(&self) -> &'static str {
        "sort_targets"
    }

    fn set_params(&mut self, params: SortTargetsParams) {
        self.params = params;
    }

    fn process(&mut self, mut input: Vec<PotentialTarget>) -> Result<Vec<PotentialTarget>> {
        input.sort_by(|a, b| self.compare(a, b));
        input.truncate(self.params.max_targets);
        Ok(input)
    }
}
