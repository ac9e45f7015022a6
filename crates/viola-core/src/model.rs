//! Cascade model store.
//!
//! Resolves the haarcascade data directory of the host's OpenCV
//! installation and eagerly loads the frontal-face and eye cascades.
//! Construction fails fast on a missing or unreadable asset so callers never
//! hold a detector that dies mid-batch on a file that was absent at startup.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::haar::{CascadeParseError, HaarCascade};

/// Conventional install locations of OpenCV's haarcascade data directory,
/// probed in order. `OPENCV_DATA_PATH` (OpenCV's own override) wins when set.
const DATA_DIR_CANDIDATES: &[&str] = &[
    "/usr/share/opencv4/haarcascades",
    "/usr/local/share/opencv4/haarcascades",
    "/opt/homebrew/share/opencv4/haarcascades",
    "/usr/share/opencv/haarcascades",
];

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("cascade asset not found: {} — confirm an OpenCV data directory is installed", .0.display())]
    AssetMissing(PathBuf),
    #[error("unimplemented cascade kind: {0}")]
    UnimplementedKind(String),
    #[error("malformed cascade definition {}: {}", .path.display(), .source)]
    Parse {
        path: PathBuf,
        #[source]
        source: CascadeParseError,
    },
}

/// The two classifier assets this core runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeKind {
    FrontalFace,
    Eye,
}

impl CascadeKind {
    fn asset_name(self) -> &'static str {
        match self {
            CascadeKind::FrontalFace => "haarcascade_frontalface_default.xml",
            CascadeKind::Eye => "haarcascade_eye.xml",
        }
    }
}

/// Both cascades, loaded once at construction and immutable afterwards.
/// Shared read-only across all detection calls.
pub struct ModelStore {
    pub(crate) face: HaarCascade,
    pub(crate) eyes: HaarCascade,
}

impl ModelStore {
    /// Locate the host OpenCV data directory and load both cascades.
    ///
    /// No partial construction: the first missing or malformed asset aborts
    /// with an error naming the offending path.
    pub fn build() -> Result<Self, ModelError> {
        Self::from_data_dir(&resolve_data_dir()?)
    }

    fn from_data_dir(dir: &Path) -> Result<Self, ModelError> {
        Ok(Self {
            face: load_cascade(dir, CascadeKind::FrontalFace)?,
            eyes: load_cascade(dir, CascadeKind::Eye)?,
        })
    }
}

fn load_cascade(dir: &Path, kind: CascadeKind) -> Result<HaarCascade, ModelError> {
    let path = dir.join(kind.asset_name());
    if !path.is_file() {
        return Err(ModelError::AssetMissing(path));
    }
    let xml = fs::read_to_string(&path).map_err(|_| ModelError::AssetMissing(path.clone()))?;

    let cascade = HaarCascade::from_xml(&xml).map_err(|err| match err {
        CascadeParseError::UnsupportedKind(kind) => ModelError::UnimplementedKind(kind),
        source => ModelError::Parse { path: path.clone(), source },
    })?;

    tracing::info!(
        path = %path.display(),
        stages = cascade.stages.len(),
        features = cascade.features.len(),
        window_width = cascade.window_width,
        window_height = cascade.window_height,
        "loaded haar cascade"
    );
    Ok(cascade)
}

fn resolve_data_dir() -> Result<PathBuf, ModelError> {
    if let Some(dir) = env::var_os("OPENCV_DATA_PATH") {
        // Honor the override unconditionally; a bad value surfaces as a
        // missing-asset error naming the full expected path.
        return Ok(PathBuf::from(dir));
    }
    for dir in DATA_DIR_CANDIDATES {
        if Path::new(dir).is_dir() {
            return Ok(PathBuf::from(dir));
        }
    }
    Err(ModelError::AssetMissing(
        Path::new(DATA_DIR_CANDIDATES[0]).join(CascadeKind::FrontalFace.asset_name()),
    ))
}
