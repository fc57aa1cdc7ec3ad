//! Pipe framework: one typed transform step per stage.
//!
//! A pipe is configured through `set_params` and then run once per frame.
//! Parameters are re-applied between frames without rebuilding the pipe, so a
//! pipe can keep scratch buffers across frames. Scratch state is cleared at the
//! start of every `process` call and never leaks into the output.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};

pub mod collect;
pub mod contours;
pub mod draw;
pub mod group;
pub mod morphology;
pub mod pose;
pub mod sort;
pub mod threshold;

pub use collect::{Collect2dTargetsParams, Collect2dTargetsPipe};
pub use contours::{
    FilterContoursParams, FilterContoursPipe, FindContoursPipe, SpeckleRejectParams,
    SpeckleRejectPipe,
};
pub use draw::{CrosshairParams, CrosshairPipe, DrawTargetsParams, DrawTargetsPipe};
pub use group::{GroupContoursParams, GroupContoursPipe, PotentialTarget};
pub use morphology::{MorphologyParams, MorphologyPipe};
pub use pose::{SolvePoseParams, SolvePosePipe};
pub use sort::{SortTargetsParams, SortTargetsPipe};
pub use threshold::{HsvThresholdParams, HsvThresholdPipe};

/// Output of a single pipe invocation.
#[derive(Debug)]
pub struct PipeOutput<T> {
    pub value: T,
    pub elapsed: Duration,
}

pub trait Pipe<I> {
    type Output;
    type Params: Clone;

    fn name(&self) -> &'static str;

    fn set_params(&mut self, params: Self::Params);

    fn process(&mut self, input: I) -> Result<Self::Output>;

    /// Run `process` and measure it.
    fn run(&mut self, input: I) -> Result<PipeOutput<Self::Output>> {
        let name = self.name();
        let start = Instant::now();
        let value = self
            .process(input)
            .with_context(|| format!("{} pipe failed", name))?;
        Ok(PipeOutput {
            value,
            elapsed: start.elapsed(),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageTiming {
    pub stage: &'static str,
    pub elapsed: Duration,
}

/// Per-frame timing ledger filled in as a pipeline runs its pipes.
#[derive(Clone, Debug, Default)]
pub struct StageTimings {
    stages: Vec<StageTiming>,
}

impl StageTimings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pipe's elapsed time and unwrap its value.
    pub fn record<T>(&mut self, stage: &'static str, output: PipeOutput<T>) -> T {
        self.stages.push(StageTiming {
            stage,
            elapsed: output.elapsed,
        });
        output.value
    }

    /// Time a step that is not a pipe.
    pub fn measure<T>(&mut self, stage: &'static str, step: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let value = step();
        self.stages.push(StageTiming {
            stage,
            elapsed: start.elapsed(),
        });
        value
    }

    pub fn total(&self) -> Duration {
        self.stages.iter().map(|s| s.elapsed).sum()
    }

    pub fn into_vec(self) -> Vec<StageTiming> {
        self.stages
    }
}
