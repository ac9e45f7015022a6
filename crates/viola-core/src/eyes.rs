//! Eye location within a detected face crop.
//!
//! The eye cascade is noisy: it can return zero, one, duplicate, or far more
//! than two candidates, and their order is not stable between calls. The
//! resolver below turns that unordered soup into a deterministic left/right
//! pair or nothing.

use image::imageops;
use image::RgbImage;

use crate::haar::HaarCascade;
use crate::types::{EyePair, EyePoint, Region};

pub(crate) const EYE_SCALE_FACTOR: f32 = 1.1;
pub(crate) const EYE_MIN_NEIGHBORS: u32 = 10;

/// Locate the left and right eye centers of a face crop.
///
/// Returns `None` when fewer than two candidate regions survive — callers
/// treat that exactly like "alignment skipped".
pub fn find_eyes(cascade: &HaarCascade, face: &RgbImage) -> Option<EyePair> {
    // Degenerate crops would be undefined behavior for the scan; skip them.
    if face.width() == 0 || face.height() == 0 {
        return None;
    }

    // The eye cascade is trained on luminance.
    let gray = imageops::grayscale(face);
    let candidates = cascade
        .detect_multi_scale(&gray, EYE_SCALE_FACTOR, EYE_MIN_NEIGHBORS)
        .into_iter()
        .map(|c| c.region)
        .collect();

    resolve_eye_pair(candidates)
}

/// Pick the two largest candidate rectangles and order them by x.
///
/// Candidate order is treated as meaningless input; only the area sort and
/// the x comparison decide the outcome. Centers are integer-truncated.
pub(crate) fn resolve_eye_pair(mut candidates: Vec<Region>) -> Option<EyePair> {
    if candidates.len() < 2 {
        return None;
    }
    candidates.sort_by(|a, b| b.area().cmp(&a.area()));

    let (first, second) = (candidates[0], candidates[1]);
    let (left, right) = if first.x < second.x {
        (first, second)
    } else {
        (second, first)
    };

    let center = |r: Region| {
        let (x, y) = r.center();
        EyePoint { x, y }
    };
    Some(EyePair {
        left: center(left),
        right: center(right),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::haar::{FeatureRect, HaarFeature, Stage, TreeNode, WeakClassifier};

    fn region(x: u32, y: u32, width: u32, height: u32) -> Region {
        Region { x, y, width, height }
    }

    /// Cascade passing only uniformly bright windows (any variance inflates
    /// the normalized threshold past the window mean).
    fn bright_window_cascade(window: u32) -> HaarCascade {
        HaarCascade {
            window_width: window,
            window_height: window,
            features: vec![HaarFeature {
                rects: vec![FeatureRect {
                    x: 0,
                    y: 0,
                    width: window,
                    height: window,
                    weight: 1.0,
                }],
            }],
            stages: vec![Stage {
                threshold: 1.0,
                weak: vec![WeakClassifier {
                    nodes: vec![TreeNode {
                        feature: 0,
                        threshold: 100.0,
                        left: 0,
                        right: -1,
                    }],
                    leaves: vec![-1.0, 2.0],
                }],
            }],
        }
    }

    #[test]
    fn test_zero_dimension_crop_is_skipped() {
        let cascade = bright_window_cascade(20);
        assert!(find_eyes(&cascade, &RgbImage::new(0, 24)).is_none());
        assert!(find_eyes(&cascade, &RgbImage::new(24, 0)).is_none());
    }

    #[test]
    fn test_blank_crop_has_no_eyes() {
        let cascade = bright_window_cascade(20);
        let face = RgbImage::new(80, 80);
        assert!(find_eyes(&cascade, &face).is_none());
    }

    #[test]
    fn test_two_bright_patches_resolve_to_a_pair() {
        let cascade = bright_window_cascade(20);

        let mut face = RgbImage::new(120, 60);
        for (x0, y0) in [(10u32, 15u32), (75, 15)] {
            for y in y0..y0 + 30 {
                for x in x0..x0 + 30 {
                    face.put_pixel(x, y, image::Rgb([255, 255, 255]));
                }
            }
        }

        let pair = find_eyes(&cascade, &face).expect("two patches should resolve");
        assert!(pair.left.x < pair.right.x);
        // Centers land inside their patches.
        assert!((10..40).contains(&pair.left.x), "left: {:?}", pair.left);
        assert!((75..105).contains(&pair.right.x), "right: {:?}", pair.right);
        assert!((15..45).contains(&pair.left.y));
    }

    #[test]
    fn test_single_patch_is_not_a_pair() {
        let cascade = bright_window_cascade(20);
        let mut face = RgbImage::new(120, 60);
        for y in 15..45 {
            for x in 10..40 {
                face.put_pixel(x, y, image::Rgb([255, 255, 255]));
            }
        }
        assert!(find_eyes(&cascade, &face).is_none());
    }

    #[test]
    fn test_resolver_needs_two_candidates() {
        assert!(resolve_eye_pair(vec![]).is_none());
        assert!(resolve_eye_pair(vec![region(10, 10, 12, 12)]).is_none());
    }

    #[test]
    fn test_resolver_keeps_two_largest() {
        // Areas 400 and 100 win over the overlapping 64 and 25.
        let candidates = vec![
            region(48, 12, 5, 5),
            region(50, 10, 10, 10),
            region(10, 10, 20, 20),
            region(12, 12, 8, 8),
        ];
        let pair = resolve_eye_pair(candidates).unwrap();
        assert_eq!(pair.left, EyePoint { x: 20, y: 20 });
        assert_eq!(pair.right, EyePoint { x: 55, y: 15 });
    }

    #[test]
    fn test_left_right_invariant_under_detection_order() {
        let a = region(10, 20, 14, 14);
        let b = region(50, 22, 16, 16);
        let forward = resolve_eye_pair(vec![a, b]).unwrap();
        let reversed = resolve_eye_pair(vec![b, a]).unwrap();
        assert_eq!(forward, reversed);
        assert!(forward.left.x < forward.right.x);
    }

    #[test]
    fn test_centers_are_truncated() {
        // 15x15 rect at (10, 20): center is (10 + 7, 20 + 7).
        let pair = resolve_eye_pair(vec![region(10, 20, 15, 15), region(40, 20, 15, 15)]).unwrap();
        assert_eq!(pair.left, EyePoint { x: 17, y: 27 });
    }
}
