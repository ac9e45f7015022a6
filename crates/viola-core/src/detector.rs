//! Cascade face detector.
//!
//! Runs the frontal-face cascade over the full image, crops each candidate
//! region, and optionally aligns every crop by its detected eye line before
//! handing the results to downstream embedding pipelines.

use image::imageops;
use image::RgbImage;

use crate::alignment;
use crate::eyes;
use crate::haar::Candidate;
use crate::model::{ModelError, ModelStore};
use crate::types::{DetectedFace, Detector, Region};

/// Multi-scale pyramid step between adjacent levels.
pub(crate) const FACE_SCALE_FACTOR: f32 = 1.1;
/// Minimum cluster size for a window group to count as a face. Tuned for the
/// recall/precision balance of the stock frontal-face cascade.
pub(crate) const FACE_MIN_NEIGHBORS: u32 = 10;
/// Candidates must score strictly above this reject-level threshold.
pub(crate) const REJECTION_THRESHOLD: f32 = 0.0;

/// Haar-cascade face detector. Immutable after construction; share it by
/// reference across threads freely.
pub struct CascadeDetector {
    models: ModelStore,
}

impl CascadeDetector {
    /// Build a detector from the host OpenCV cascade assets.
    pub fn new() -> Result<Self, ModelError> {
        Ok(Self {
            models: ModelStore::build()?,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_models(models: ModelStore) -> Self {
        Self { models }
    }

    /// Detect faces, optionally aligning each crop by its eye line.
    ///
    /// Entries follow the cascade's native candidate order. When the cascade
    /// finds nothing — including on degenerate input the scan refuses to
    /// touch — the result is a single whole-image fallback entry with
    /// `face: None` and confidence 0.0, never an empty list.
    pub fn detect(&self, image: &RgbImage, align: bool) -> Vec<DetectedFace> {
        let (width, height) = image.dimensions();

        let candidates = self.run_face_cascade(image);
        if candidates.is_empty() {
            tracing::debug!(width, height, "no face candidates, returning whole-image fallback");
            return vec![DetectedFace {
                face: None,
                region: Region { x: 0, y: 0, width, height },
                confidence: 0.0,
            }];
        }
        tracing::debug!(faces = candidates.len(), align, "face cascade produced candidates");

        candidates
            .into_iter()
            .map(|candidate| {
                let Region { x, y, width, height } = candidate.region;
                let crop = imageops::crop_imm(image, x, y, width, height).to_image();

                let face = if align {
                    let pair = eyes::find_eyes(&self.models.eyes, &crop);
                    let (left, right) = match pair {
                        Some(pair) => (Some(pair.left), Some(pair.right)),
                        None => (None, None),
                    };
                    alignment::align_face(&crop, left, right)
                } else {
                    crop
                };

                DetectedFace {
                    face: Some(face),
                    region: candidate.region,
                    confidence: candidate.weight,
                }
            })
            .collect()
    }

    /// Best-effort candidate search: every lower-level failure mode
    /// (zero-dimension image, image smaller than the detection window)
    /// degrades to "zero candidates" so one bad image can never abort a
    /// batch. This is deliberate policy — do not surface errors here.
    fn run_face_cascade(&self, image: &RgbImage) -> Vec<Candidate> {
        if image.width() == 0 || image.height() == 0 {
            return Vec::new();
        }
        let gray = imageops::grayscale(image);
        let mut candidates =
            self.models
                .face
                .detect_multi_scale(&gray, FACE_SCALE_FACTOR, FACE_MIN_NEIGHBORS);
        candidates.retain(|c| c.weight > REJECTION_THRESHOLD);
        candidates
    }
}

impl Detector for CascadeDetector {
    fn detect_faces(&self, image: &RgbImage, align: bool) -> Vec<DetectedFace> {
        self.detect(image, align)
    }
}
