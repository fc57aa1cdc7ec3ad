use serde::Serialize;

use crate::geometry::Rect;

/// One object reported by a detector backend, in frame pixel coordinates.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: Rect,
    pub confidence: f32,
    pub class_id: u32,
    pub label: Option<String>,
}
