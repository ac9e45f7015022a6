//! viola-core — Haar-cascade face detection and eye-line alignment.
//!
//! Locates face regions with the stock OpenCV frontal-face cascade, crops
//! each candidate, and levels every crop by its detected eye line. Results
//! carry the bounding region and raw reject-level confidence that downstream
//! embedding pipelines consume.
//!
//! ```no_run
//! use viola_core::CascadeDetector;
//!
//! # fn main() -> Result<(), viola_core::ModelError> {
//! let detector = CascadeDetector::new()?;
//! let image = image::RgbImage::new(640, 480);
//! for detection in detector.detect(&image, true) {
//!     println!("{:?} @ {}", detection.region, detection.confidence);
//! }
//! # Ok(())
//! # }
//! ```

pub mod alignment;
pub mod detector;
pub mod eyes;
pub mod haar;
pub mod model;
pub mod types;

pub use detector::CascadeDetector;
pub use model::{CascadeKind, ModelError, ModelStore};
pub use types::{DetectedFace, Detector, EyePair, EyePoint, Region};
