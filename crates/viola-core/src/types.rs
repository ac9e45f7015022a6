use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in image pixel coordinates.
///
/// Coordinates refer to the image the region was detected in. Any region used
/// to crop satisfies `x + width <= image.width` and `y + height <= image.height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Integer-truncated center of the rectangle.
    pub fn center(&self) -> (u32, u32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }
}

/// Pixel center of a detected eye region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EyePoint {
    pub x: u32,
    pub y: u32,
}

/// A resolved pair of eye centers.
///
/// "Left" and "right" are in image coordinates (smaller x is left), not the
/// anatomical left/right of the subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EyePair {
    pub left: EyePoint,
    pub right: EyePoint,
}

/// One entry of a detection result.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    /// The aligned face crop. `None` only for the whole-image fallback entry
    /// returned when the cascade found no candidates — callers must treat
    /// that sentinel distinctly from a genuine detection.
    pub face: Option<RgbImage>,
    /// Bounding region in original-image coordinates, pre-alignment.
    pub region: Region,
    /// Raw cascade reject-level score. Strictly greater than the configured
    /// rejection threshold for genuine detections, but NOT bounded to [0, 1] —
    /// it is not a probability.
    pub confidence: f32,
}

/// Strategy for locating faces in an image.
///
/// The cascade backend is the only implementation in this crate; the trait is
/// the seam downstream embedding pipelines program against.
pub trait Detector {
    /// Detect faces, optionally aligning each crop by its eye line.
    ///
    /// Entries follow the detector's native candidate order — callers that
    /// need a stable ordering must sort explicitly.
    fn detect_faces(&self, image: &RgbImage, align: bool) -> Vec<DetectedFace>;
}
