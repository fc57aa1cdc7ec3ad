//! Frame pipelines.
//!
//! A pipeline owns one instance of every pipe it needs and turns a `Frame` into
//! a `PipelineResult`. `configure` derives all pipe parameters from the
//! pipeline settings and the camera context; it runs whenever either changes,
//! and again if a frame arrives at a resolution the pipeline was not built for.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::Serialize;

use crate::camera::{CameraGeometry, CameraIntrinsics};
use crate::contour::Contour;
use crate::detect::BackendRegistry;
use crate::frame::Frame;
use crate::geometry::Point2;
use crate::pipe::{
    Collect2dTargetsParams, Collect2dTargetsPipe, CrosshairParams, CrosshairPipe,
    DrawTargetsParams, DrawTargetsPipe, FilterContoursParams, FilterContoursPipe,
    FindContoursPipe, GroupContoursParams, GroupContoursPipe, HsvThresholdParams,
    HsvThresholdPipe, MorphologyParams, MorphologyPipe, Pipe, PotentialTarget, SolvePoseParams,
    SolvePosePipe, SortTargetsParams, SortTargetsPipe, SpeckleRejectParams, SpeckleRejectPipe,
    StageTiming, StageTimings,
};
use crate::settings::{
    CalibrationMode, CameraControls, DriverModeSettings, ImageRotation, MorphologyOrder,
    PipelineSettings, PipelineType,
};
use crate::target::{DetectedClass, TrackedTarget};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Detection2d,
    Detection3d,
    DriverMode,
}

/// Output of one pipeline run. Immutable once published.
#[derive(Clone, Debug)]
pub struct PipelineResult {
    /// Best target first.
    pub targets: Vec<TrackedTarget>,
    pub output_image: Arc<RgbImage>,
    pub processing_time: Duration,
    pub stage_timings: Vec<StageTiming>,
    pub captured_at: Instant,
    pub sequence: u64,
    pub kind: ResultKind,
}

impl PipelineResult {
    pub fn has_targets(&self) -> bool {
        !self.targets.is_empty()
    }

    pub fn best_target(&self) -> Option<&TrackedTarget> {
        self.targets.first()
    }

    /// Time from capture until now.
    pub fn latency(&self) -> Duration {
        self.captured_at.elapsed()
    }
}

/// Camera facts every pipeline is configured against.
#[derive(Clone)]
pub struct PipelineContext {
    /// Geometry of frames as delivered by the source, before rotation.
    pub geometry: CameraGeometry,
    /// Calibrated intrinsics for the source orientation, if known.
    pub intrinsics: Option<CameraIntrinsics>,
    pub detectors: BackendRegistry,
}

impl PipelineContext {
    pub fn new(geometry: CameraGeometry) -> Self {
        Self {
            geometry,
            intrinsics: None,
            detectors: BackendRegistry::new(),
        }
    }

    /// Geometry of frames after `rotation`.
    fn oriented_geometry(&self, rotation: ImageRotation) -> Result<CameraGeometry> {
        if rotation.swaps_dimensions() {
            self.geometry
                .with_resolution(self.geometry.height, self.geometry.width)
        } else {
            Ok(self.geometry)
        }
    }

    fn oriented_intrinsics(&self, rotation: ImageRotation, geometry: &CameraGeometry) -> CameraIntrinsics {
        match self.intrinsics {
            Some(k) if rotation == ImageRotation::Deg0 && k.is_valid() => k,
            Some(_) => {
                log::debug!("calibrated intrinsics ignored for rotated input");
                CameraIntrinsics::from_geometry(geometry)
            }
            None => CameraIntrinsics::from_geometry(geometry),
        }
    }
}

/// A detection pipeline selectable through the pipeline manager.
pub trait VisionPipeline: Send {
    fn pipeline_type(&self) -> PipelineType;

    /// Re-derive every pipe parameter. Must run before the next frame after a
    /// settings, resolution or field-of-view change.
    fn configure(&mut self, settings: &PipelineSettings, context: &PipelineContext) -> Result<()>;

    fn process(&mut self, frame: Frame) -> Result<PipelineResult>;

    fn camera_controls(&self) -> CameraControls;
}

pub fn build_pipeline(
    settings: &PipelineSettings,
    context: &PipelineContext,
) -> Result<Box<dyn VisionPipeline>> {
    let pipeline: Box<dyn VisionPipeline> = match settings.pipeline_type {
        PipelineType::Reflective => Box::new(ReflectivePipeline::new(settings, context)?),
        PipelineType::ObjectDetection => Box::new(ObjectDetectionPipeline::new(settings, context)?),
    };
    Ok(pipeline)
}

/// Apply the configured rotation, then the horizontal flip.
pub fn orient(image: RgbImage, rotation: ImageRotation, flip_horizontal: bool) -> RgbImage {
    let rotated = match rotation {
        ImageRotation::Deg0 => image,
        ImageRotation::Deg90 => imageops::rotate90(&image),
        ImageRotation::Deg180 => imageops::rotate180(&image),
        ImageRotation::Deg270 => imageops::rotate270(&image),
    };
    if flip_horizontal {
        imageops::flip_horizontal(&rotated)
    } else {
        rotated
    }
}

/// Shrink the stream image by an integer factor.
pub fn downscale(image: RgbImage, divisor: u32) -> RgbImage {
    if divisor <= 1 {
        return image;
    }
    let width = (image.width() / divisor).max(1);
    let height = (image.height() / divisor).max(1);
    imageops::resize(&image, width, height, FilterType::Triangle)
}

fn aim_marker(geometry: &CameraGeometry, calibration: CalibrationMode) -> Option<Point2> {
    match calibration {
        CalibrationMode::None => Some(geometry.center),
        CalibrationMode::SinglePoint { x, y } => Some(Point2::new(x, y)),
        CalibrationMode::DualPoint { .. } => None,
    }
}

fn check_frame(frame: &Frame) -> Result<()> {
    if frame.width() == 0 || frame.height() == 0 {
        return Err(anyhow!("frame {} is empty", frame.sequence));
    }
    Ok(())
}

/// Color-threshold detection of retroreflective targets.
pub struct ReflectivePipeline {
    settings: PipelineSettings,
    context: PipelineContext,
    geometry: CameraGeometry,
    threshold: HsvThresholdPipe,
    morphology: MorphologyPipe,
    find: FindContoursPipe,
    filter: FilterContoursPipe,
    speckle: SpeckleRejectPipe,
    group: GroupContoursPipe,
    sort: SortTargetsPipe,
    collect: Collect2dTargetsPipe,
    pose: SolvePosePipe,
    draw: DrawTargetsPipe,
}

impl ReflectivePipeline {
    pub fn new(settings: &PipelineSettings, context: &PipelineContext) -> Result<Self> {
        let geometry = context.oriented_geometry(settings.input_rotation)?;
        let mut pipeline = Self {
            settings: settings.clone(),
            context: context.clone(),
            geometry,
            threshold: HsvThresholdPipe::default(),
            morphology: MorphologyPipe::default(),
            find: FindContoursPipe,
            filter: FilterContoursPipe::default(),
            speckle: SpeckleRejectPipe::default(),
            group: GroupContoursPipe::default(),
            sort: SortTargetsPipe::default(),
            collect: Collect2dTargetsPipe::new(Collect2dTargetsParams {
                geometry,
                calibration: settings.calibration,
            }),
            pose: SolvePosePipe::new(SolvePoseParams {
                model: None,
                intrinsics: CameraIntrinsics::from_geometry(&geometry),
            }),
            draw: DrawTargetsPipe::default(),
        };
        pipeline.apply_params()?;
        Ok(pipeline)
    }

    fn apply_params(&mut self) -> Result<()> {
        let s = &self.settings;
        self.geometry = self.context.oriented_geometry(s.input_rotation)?;
        let geometry = self.geometry;

        self.threshold.set_params(HsvThresholdParams {
            lower: s.hsv_lower,
            upper: s.hsv_upper,
            hue_inverted: s.hue_inverted,
        });
        Pipe::<RgbImage>::set_params(
            &mut self.morphology,
            MorphologyParams {
                erode: s.erode,
                dilate: s.dilate,
                kernel_size: s.morphology_kernel,
            },
        );
        self.filter.set_params(FilterContoursParams {
            area: s.area,
            ratio: s.ratio,
            extent: s.extent,
            image_area: geometry.image_area,
        });
        self.speckle.set_params(SpeckleRejectParams {
            min_percent_of_average: s.speckle_rejection_percent,
        });
        self.group.set_params(GroupContoursParams {
            grouping: s.grouping,
            direction: s.intersection,
        });
        self.sort.set_params(SortTargetsParams {
            mode: s.sort_mode,
            image_center: geometry.center,
            max_targets: s.max_targets,
        });
        self.collect.set_params(Collect2dTargetsParams {
            geometry,
            calibration: s.calibration,
        });
        self.pose.set_params(SolvePoseParams {
            model: if s.solve_pose { s.target_model.clone() } else { None },
            intrinsics: self.context.oriented_intrinsics(s.input_rotation, &geometry),
        });
        self.draw.set_params(DrawTargetsParams {
            show_multiple: s.show_multiple_targets,
            draw_bounding_rect: true,
            crosshair: aim_marker(&geometry, s.calibration),
        });
        Ok(())
    }

    fn solves_pose(&self) -> bool {
        self.settings.solve_pose && self.settings.target_model.is_some()
    }
}

impl VisionPipeline for ReflectivePipeline {
    fn pipeline_type(&self) -> PipelineType {
        PipelineType::Reflective
    }

    fn configure(&mut self, settings: &PipelineSettings, context: &PipelineContext) -> Result<()> {
        self.settings = settings.clone();
        self.context = context.clone();
        self.apply_params()
    }

    fn process(&mut self, frame: Frame) -> Result<PipelineResult> {
        check_frame(&frame)?;
        let start = Instant::now();
        let (captured_at, sequence) = (frame.captured_at, frame.sequence);
        let mut timings = StageTimings::new();

        let (rotation, flip) = (self.settings.input_rotation, self.settings.flip_horizontal);
        let mut image = timings.measure("orient", || orient(frame.image, rotation, flip));
        if image.dimensions() != (self.geometry.width, self.geometry.height) {
            log::debug!(
                "reflective pipeline reconfiguring for {}x{}",
                image.width(),
                image.height()
            );
            let (w, h) = if rotation.swaps_dimensions() {
                (image.height(), image.width())
            } else {
                image.dimensions()
            };
            self.context.geometry = self.context.geometry.with_resolution(w, h)?;
            self.apply_params()?;
        }

        let mask = match self.settings.morphology_order {
            MorphologyOrder::BeforeThreshold => {
                image = timings.record(
                    "morphology",
                    Pipe::<RgbImage>::run(&mut self.morphology, image)?,
                );
                timings.record("threshold", self.threshold.run(&image)?)
            }
            MorphologyOrder::AfterThreshold => {
                let mask = timings.record("threshold", self.threshold.run(&image)?);
                timings.record("morphology", Pipe::<image::GrayImage>::run(&mut self.morphology, mask)?)
            }
        };

        let contours = timings.record("find_contours", self.find.run(&mask)?);
        let contours = timings.record("filter_contours", self.filter.run(contours)?);
        let contours = timings.record("speckle_reject", self.speckle.run(contours)?);
        let candidates = timings.record("group_contours", self.group.run(contours)?);
        let candidates = timings.record("sort_targets", self.sort.run(candidates)?);
        let mut targets = timings.record("collect_targets", self.collect.run(candidates)?);
        if self.solves_pose() {
            targets = timings.record("solve_pose", self.pose.run(targets)?);
        }

        let drawn = timings.record("draw", self.draw.run((image, targets.as_slice()))?);
        let divisor = self.settings.stream_divisor;
        let output = timings.measure("downscale", || downscale(drawn, divisor));

        Ok(PipelineResult {
            targets,
            output_image: Arc::new(output),
            processing_time: start.elapsed(),
            stage_timings: timings.into_vec(),
            captured_at,
            sequence,
            kind: if self.solves_pose() {
                ResultKind::Detection3d
            } else {
                ResultKind::Detection2d
            },
        })
    }

    fn camera_controls(&self) -> CameraControls {
        self.settings.camera
    }
}

/// Detection through a registered `DetectorBackend` instead of contours.
pub struct ObjectDetectionPipeline {
    settings: PipelineSettings,
    context: PipelineContext,
    geometry: CameraGeometry,
    sort: SortTargetsPipe,
    collect: Collect2dTargetsPipe,
    draw: DrawTargetsPipe,
}

impl ObjectDetectionPipeline {
    pub fn new(settings: &PipelineSettings, context: &PipelineContext) -> Result<Self> {
        context
            .detectors
            .resolve(settings.detector.as_deref())
            .with_context(|| format!("pipeline '{}' has no detector", settings.name))?;
        let geometry = context.oriented_geometry(settings.input_rotation)?;
        let mut pipeline = Self {
            settings: settings.clone(),
            context: context.clone(),
            geometry,
            sort: SortTargetsPipe::default(),
            collect: Collect2dTargetsPipe::new(Collect2dTargetsParams {
                geometry,
                calibration: settings.calibration,
            }),
            draw: DrawTargetsPipe::default(),
        };
        pipeline.apply_params()?;
        Ok(pipeline)
    }

    fn apply_params(&mut self) -> Result<()> {
        let s = &self.settings;
        self.geometry = self.context.oriented_geometry(s.input_rotation)?;
        let geometry = self.geometry;
        self.sort.set_params(SortTargetsParams {
            mode: s.sort_mode,
            image_center: geometry.center,
            max_targets: s.max_targets,
        });
        self.collect.set_params(Collect2dTargetsParams {
            geometry,
            calibration: s.calibration,
        });
        self.draw.set_params(DrawTargetsParams {
            show_multiple: s.show_multiple_targets,
            draw_bounding_rect: false,
            crosshair: aim_marker(&geometry, s.calibration),
        });
        Ok(())
    }

    fn candidates(&self, image: &RgbImage) -> Result<Vec<PotentialTarget>> {
        let s = &self.settings;
        let detections = self.context.detectors.detect(s.detector.as_deref(), image)?;
        let mut candidates = Vec::with_capacity(detections.len());
        for d in detections {
            if d.confidence < s.min_confidence {
                continue;
            }
            let area_percent = d.bbox.area() / self.geometry.image_area * 100.0;
            let ratio_ok = d.bbox.aspect_ratio().is_some_and(|r| s.ratio.contains(r));
            if !s.area.contains(area_percent) || !ratio_ok {
                continue;
            }
            candidates.push(PotentialTarget {
                contour: Contour::new(d.bbox.pixel_corners().to_vec())?,
                detection: Some(DetectedClass {
                    class_id: d.class_id,
                    label: d.label,
                    confidence: d.confidence,
                }),
            });
        }
        Ok(candidates)
    }
}

impl VisionPipeline for ObjectDetectionPipeline {
    fn pipeline_type(&self) -> PipelineType {
        PipelineType::ObjectDetection
    }

    fn configure(&mut self, settings: &PipelineSettings, context: &PipelineContext) -> Result<()> {
        context
            .detectors
            .resolve(settings.detector.as_deref())
            .with_context(|| format!("pipeline '{}' has no detector", settings.name))?;
        self.settings = settings.clone();
        self.context = context.clone();
        self.apply_params()
    }

    fn process(&mut self, frame: Frame) -> Result<PipelineResult> {
        check_frame(&frame)?;
        let start = Instant::now();
        let (captured_at, sequence) = (frame.captured_at, frame.sequence);
        let mut timings = StageTimings::new();

        let (rotation, flip) = (self.settings.input_rotation, self.settings.flip_horizontal);
        let image = timings.measure("orient", || orient(frame.image, rotation, flip));
        if image.dimensions() != (self.geometry.width, self.geometry.height) {
            let (w, h) = if rotation.swaps_dimensions() {
                (image.height(), image.width())
            } else {
                image.dimensions()
            };
            self.context.geometry = self.context.geometry.with_resolution(w, h)?;
            self.apply_params()?;
        }

        let candidates = timings.measure("detect", || self.candidates(&image))?;
        let candidates = timings.record("sort_targets", self.sort.run(candidates)?);
        let targets = timings.record("collect_targets", self.collect.run(candidates)?);
        let drawn = timings.record("draw", self.draw.run((image, targets.as_slice()))?);
        let divisor = self.settings.stream_divisor;
        let output = timings.measure("downscale", || downscale(drawn, divisor));

        Ok(PipelineResult {
            targets,
            output_image: Arc::new(output),
            processing_time: start.elapsed(),
            stage_timings: timings.into_vec(),
            captured_at,
            sequence,
            kind: ResultKind::Detection2d,
        })
    }

    fn camera_controls(&self) -> CameraControls {
        self.settings.camera
    }
}

/// Live view for the driver: orientation and a crosshair, never targets.
pub struct DriverModePipeline {
    settings: DriverModeSettings,
    crosshair: CrosshairPipe,
}

impl DriverModePipeline {
    pub fn new(settings: DriverModeSettings) -> Self {
        let crosshair = CrosshairPipe::new(CrosshairParams {
            enabled: settings.crosshair,
            at: None,
        });
        Self {
            settings,
            crosshair,
        }
    }

    pub fn settings(&self) -> &DriverModeSettings {
        &self.settings
    }

    pub fn configure(&mut self, settings: DriverModeSettings) {
        self.crosshair.set_params(CrosshairParams {
            enabled: settings.crosshair,
            at: None,
        });
        self.settings = settings;
    }

    pub fn process(&mut self, frame: Frame) -> Result<PipelineResult> {
        check_frame(&frame)?;
        let start = Instant::now();
        let (captured_at, sequence) = (frame.captured_at, frame.sequence);
        let mut timings = StageTimings::new();

        let (rotation, flip) = (self.settings.input_rotation, self.settings.flip_horizontal);
        let image = timings.measure("orient", || orient(frame.image, rotation, flip));
        let image = timings.record("crosshair", self.crosshair.run(image)?);
        let divisor = self.settings.stream_divisor;
        let output = timings.measure("downscale", || downscale(image, divisor));

        Ok(PipelineResult {
            targets: Vec::new(),
            output_image: Arc::new(output),
            processing_time: start.elapsed(),
            stage_timings: timings.into_vec(),
            captured_at,
            sequence,
            kind: ResultKind::DriverMode,
        })
    }

    pub fn camera_controls(&self) -> CameraControls {
        self.settings.camera
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Detection, StubBackend};
    use crate::geometry::Rect;
    use crate::settings::{ContourGrouping, DoubleRange, TargetModel};
    use image::Rgb;

    const GREEN: Rgb<u8> = Rgb([0, 255, 0]);

    fn context(width: u32, height: u32) -> PipelineContext {
        PipelineContext::new(CameraGeometry::new(75.0, width, height).unwrap())
    }

    fn scene(width: u32, height: u32, boxes: &[(u32, u32, u32, u32)], specks: &[(u32, u32)]) -> Frame {
        let mut image = RgbImage::from_pixel(width, height, Rgb([15, 15, 15]));
        for &(x0, y0, w, h) in boxes {
            for y in y0..y0 + h {
                for x in x0..x0 + w {
                    image.put_pixel(x, y, GREEN);
                }
            }
        }
        for &(x, y) in specks {
            image.put_pixel(x, y, GREEN);
        }
        Frame::new(image, 1)
    }

    #[test]
    fn reflective_pipeline_finds_a_lit_rectangle() -> Result<()> {
        let settings = PipelineSettings::named("Goal");
        let mut pipeline = ReflectivePipeline::new(&settings, &context(160, 120))?;
        let result = pipeline.process(scene(160, 120, &[(100, 20, 20, 30)], &[]))?;

        assert!(result.has_targets());
        assert_eq!(result.kind, ResultKind::Detection2d);
        let best = result.best_target().unwrap();
        assert!((best.center.x - 109.5).abs() < 1e-6);
        assert!((best.center.y - 34.5).abs() < 1e-6);
        assert!(best.pitch > 0.0 && best.yaw > 0.0);
        assert_eq!(result.output_image.dimensions(), (160, 120));
        assert!(result.stage_timings.iter().any(|t| t.stage == "find_contours"));
        Ok(())
    }

    #[test]
    fn speckles_never_become_targets() -> Result<()> {
        let mut settings = PipelineSettings::named("Goal");
        settings.area = DoubleRange::new(0.5, 100.0);
        let mut pipeline = ReflectivePipeline::new(&settings, &context(160, 120))?;
        let specks = [(5, 5), (150, 100), (80, 110), (40, 60)];
        let result = pipeline.process(scene(160, 120, &[(20, 20, 20, 20)], &specks))?;
        assert_eq!(result.targets.len(), 1);
        Ok(())
    }

    #[test]
    fn empty_scene_has_no_targets() -> Result<()> {
        let mut pipeline =
            ReflectivePipeline::new(&PipelineSettings::default(), &context(64, 48))?;
        let result = pipeline.process(scene(64, 48, &[], &[]))?;
        assert!(!result.has_targets());
        Ok(())
    }

    #[test]
    fn dual_grouping_needs_two_contours() -> Result<()> {
        let mut settings = PipelineSettings::named("Pair");
        settings.grouping = ContourGrouping::Dual;
        let mut pipeline = ReflectivePipeline::new(&settings, &context(160, 120))?;

        let single = pipeline.process(scene(160, 120, &[(20, 20, 10, 30)], &[]))?;
        assert!(!single.has_targets());

        let pair = pipeline.process(scene(160, 120, &[(20, 20, 10, 30), (60, 20, 10, 30)], &[]))?;
        assert_eq!(pair.targets.len(), 1);
        assert!((pair.targets[0].center.x - 44.5).abs() < 1.0);
        Ok(())
    }

    #[test]
    fn rotation_swaps_the_working_geometry() -> Result<()> {
        let mut settings = PipelineSettings::named("Rotated");
        settings.input_rotation = ImageRotation::Deg90;
        settings.stream_divisor = 2;
        let mut pipeline = ReflectivePipeline::new(&settings, &context(160, 120))?;
        let result = pipeline.process(scene(160, 120, &[(10, 10, 20, 20)], &[]))?;
        assert_eq!(result.output_image.dimensions(), (60, 80));
        assert!(result.has_targets());
        // Top-left of the source lands top-right after a clockwise turn.
        assert!(result.targets[0].center.x > 60.0);
        Ok(())
    }

    #[test]
    fn resolution_change_rebuilds_geometry() -> Result<()> {
        let mut pipeline =
            ReflectivePipeline::new(&PipelineSettings::default(), &context(160, 120))?;
        pipeline.process(scene(160, 120, &[], &[]))?;
        let result = pipeline.process(scene(320, 240, &[(150, 110, 20, 20)], &[]))?;
        let best = result.best_target().unwrap();
        assert!(best.yaw.abs() < 0.1);
        assert!(best.pitch.abs() < 0.1);
        Ok(())
    }

    #[test]
    fn pose_solve_marks_three_dimensional_results() -> Result<()> {
        let mut settings = PipelineSettings::named("Pose");
        settings.solve_pose = true;
        settings.target_model = Some(TargetModel::rectangle(0.5, 0.5));
        let mut pipeline = ReflectivePipeline::new(&settings, &context(320, 240))?;
        let result = pipeline.process(scene(320, 240, &[(140, 100, 40, 40)], &[]))?;
        assert_eq!(result.kind, ResultKind::Detection3d);
        let pose = result.targets[0].pose.expect("square target should solve");
        assert!(pose.translation[2] > 0.0);
        Ok(())
    }

    #[test]
    fn empty_frames_are_rejected() {
        let mut pipeline =
            ReflectivePipeline::new(&PipelineSettings::default(), &context(64, 48)).unwrap();
        assert!(pipeline.process(Frame::new(RgbImage::new(0, 0), 1)).is_err());
    }

    fn detection(x: i32, confidence: f32) -> Detection {
        Detection {
            bbox: Rect::new(x, 10, 20, 20),
            confidence,
            class_id: 2,
            label: Some("cone".into()),
        }
    }

    #[test]
    fn object_detection_filters_on_confidence() -> Result<()> {
        let mut ctx = context(160, 120);
        ctx.detectors
            .register(StubBackend::new(vec![detection(10, 0.9), detection(100, 0.2)]));
        let mut settings = PipelineSettings::named("Cones");
        settings.pipeline_type = PipelineType::ObjectDetection;
        settings.min_confidence = 0.5;

        let mut pipeline = build_pipeline(&settings, &ctx)?;
        assert_eq!(pipeline.pipeline_type(), PipelineType::ObjectDetection);
        let result = pipeline.process(scene(160, 120, &[], &[]))?;
        assert_eq!(result.targets.len(), 1);
        let class = result.targets[0].detection.as_ref().unwrap();
        assert_eq!(class.class_id, 2);
        assert_eq!(result.targets[0].bounding_rect, Rect::new(10, 10, 20, 20));
        assert!((result.targets[0].center.x - 19.5).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn object_detection_needs_a_backend() {
        let mut settings = PipelineSettings::named("Cones");
        settings.pipeline_type = PipelineType::ObjectDetection;
        assert!(build_pipeline(&settings, &context(64, 48)).is_err());
    }

    #[test]
    fn driver_mode_never_reports_targets() -> Result<()> {
        let mut pipeline = DriverModePipeline::new(DriverModeSettings::default());
        let result = pipeline.process(scene(64, 48, &[(10, 10, 20, 20)], &[]))?;
        assert!(!result.has_targets());
        assert_eq!(result.kind, ResultKind::DriverMode);
        Ok(())
    }

    #[test]
    fn orient_flips_after_rotating() {
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(0, 0, GREEN);
        let flipped = orient(image.clone(), ImageRotation::Deg0, true);
        assert_eq!(flipped.get_pixel(1, 0).0, GREEN.0);
        let turned = orient(image, ImageRotation::Deg90, false);
        assert_eq!(turned.dimensions(), (1, 2));
        assert_eq!(turned.get_pixel(0, 0).0, GREEN.0);
    }
}
