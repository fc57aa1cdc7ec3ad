//! Pipeline settings value objects.
//!
//! Settings are plain serde data. Pipelines read them in `configure` and
//! derive their per-pipe parameters from them; nothing here holds state.

use serde::{Deserialize, Serialize};

use crate::geometry::Point2;

/// Inclusive numeric range. Both ends are accepted.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DoubleRange {
    pub min: f64,
    pub max: f64,
}

impl DoubleRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineType {
    #[default]
    Reflective,
    ObjectDetection,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MorphologyOrder {
    #[default]
    AfterThreshold,
    BeforeThreshold,
}

/// How many contours make up one target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContourGrouping {
    #[default]
    Single,
    Dual,
    Multiple(usize),
}

impl ContourGrouping {
    pub fn count(self) -> usize {
        match self {
            ContourGrouping::Single => 1,
            ContourGrouping::Dual => 2,
            ContourGrouping::Multiple(n) => n.max(1),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntersectionDirection {
    #[default]
    None,
    Up,
    Down,
    Left,
    Right,
}

impl IntersectionDirection {
    /// Whether `intersection` lies on this side of `mass_center`.
    pub fn accepts(self, intersection: Point2, mass_center: Point2) -> bool {
        match self {
            IntersectionDirection::None => true,
            IntersectionDirection::Up => intersection.y < mass_center.y,
            IntersectionDirection::Down => intersection.y > mass_center.y,
            IntersectionDirection::Left => intersection.x < mass_center.x,
            IntersectionDirection::Right => intersection.x > mass_center.x,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    #[default]
    Largest,
    Smallest,
    Highest,
    Lowest,
    Leftmost,
    Rightmost,
    Centermost,
}

/// Source of the aim-point offset used by the angle calculation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum CalibrationMode {
    #[default]
    None,
    SinglePoint {
        x: f64,
        y: f64,
    },
    /// Line fit `y = slope * x + intercept` produced by a two-point calibration.
    DualPoint {
        slope: f64,
        intercept: f64,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageRotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl ImageRotation {
    pub fn swaps_dimensions(self) -> bool {
        matches!(self, ImageRotation::Deg90 | ImageRotation::Deg270)
    }
}

/// Known target corners in meters, in top-left, top-right, bottom-right,
/// bottom-left order. The model must be planar (z = 0).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetModel {
    pub corners: [[f64; 3]; 4],
}

impl TargetModel {
    /// Axis-aligned rectangle centred on the origin.
    pub fn rectangle(width_m: f64, height_m: f64) -> Self {
        let (hw, hh) = (width_m / 2.0, height_m / 2.0);
        Self {
            corners: [
                [-hw, -hh, 0.0],
                [hw, -hh, 0.0],
                [hw, hh, 0.0],
                [-hw, hh, 0.0],
            ],
        }
    }

    pub fn is_planar(&self) -> bool {
        self.corners.iter().all(|c| c[2].abs() < 1e-9)
    }
}

/// Camera controls a pipeline asks for when it becomes active.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraControls {
    pub exposure: Option<f64>,
    pub brightness: Option<f64>,
    pub gain: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub name: String,
    pub pipeline_type: PipelineType,

    pub input_rotation: ImageRotation,
    pub flip_horizontal: bool,
    pub camera: CameraControls,

    pub hsv_lower: [u8; 3],
    pub hsv_upper: [u8; 3],
    pub hue_inverted: bool,

    pub erode: bool,
    pub dilate: bool,
    pub morphology_kernel: u32,
    pub morphology_order: MorphologyOrder,

    /// Percent of image area.
    pub area: DoubleRange,
    /// Bounding rect width / height.
    pub ratio: DoubleRange,
    /// Percent of the min-area rect filled by the contour.
    pub extent: DoubleRange,
    pub speckle_rejection_percent: f64,

    pub grouping: ContourGrouping,
    pub intersection: IntersectionDirection,
    pub sort_mode: SortMode,
    pub max_targets: usize,

    pub calibration: CalibrationMode,
    pub show_multiple_targets: bool,

    pub solve_pose: bool,
    pub target_model: Option<TargetModel>,

    pub detector: Option<String>,
    pub min_confidence: f32,

    pub stream_divisor: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            name: "New Pipeline".to_string(),
            pipeline_type: PipelineType::Reflective,
            input_rotation: ImageRotation::Deg0,
            flip_horizontal: false,
            camera: CameraControls::default(),
            hsv_lower: [50, 180, 40],
            hsv_upper: [90, 255, 255],
            hue_inverted: false,
            erode: false,
            dilate: false,
            morphology_kernel: 7,
            morphology_order: MorphologyOrder::AfterThreshold,
            area: DoubleRange::new(0.0, 100.0),
            ratio: DoubleRange::new(0.0, 20.0),
            extent: DoubleRange::new(0.0, 100.0),
            speckle_rejection_percent: 5.0,
            grouping: ContourGrouping::Single,
            intersection: IntersectionDirection::None,
            sort_mode: SortMode::Largest,
            max_targets: 20,
            calibration: CalibrationMode::None,
            show_multiple_targets: false,
            solve_pose: false,
            target_model: None,
            detector: None,
            min_confidence: 0.5,
            stream_divisor: 1,
        }
    }
}

impl PipelineSettings {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Settings for the detection-free live view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverModeSettings {
    pub input_rotation: ImageRotation,
    pub flip_horizontal: bool,
    pub crosshair: bool,
    pub camera: CameraControls,
    pub stream_divisor: u32,
}

impl Default for DriverModeSettings {
    fn default() -> Self {
        Self {
            input_rotation: ImageRotation::Deg0,
            flip_horizontal: false,
            crosshair: true,
            camera: CameraControls::default(),
            stream_divisor: 1,
        }
    }
}
