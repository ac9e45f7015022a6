//! Boosted Haar-cascade machinery.
//!
//! Parses OpenCV's new-format cascade definitions
//! (`<cascade type_id="opencv-cascade-classifier">`), evaluates windows via
//! integral images with variance normalization, and runs the multi-scale
//! sliding-window scan with rectangle grouping.

use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array2;
use thiserror::Error;

use crate::types::Region;

/// Relative spread below which two raw windows are considered the same
/// detection during grouping.
const GROUP_EPS: f64 = 0.2;

#[derive(Error, Debug)]
pub enum CascadeParseError {
    #[error("invalid cascade xml: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("cascade definition is missing <{0}>")]
    MissingElement(&'static str),
    #[error("malformed number in cascade definition: {0:?}")]
    BadNumber(String),
    #[error("malformed cascade definition: {0}")]
    Malformed(&'static str),
    #[error("unsupported cascade kind: {0}")]
    UnsupportedKind(String),
    #[error("weak classifier references feature {0}, but only {1} are defined")]
    BadFeatureIndex(usize, usize),
}

/// One weighted rectangle of a Haar feature, window-relative at base scale.
#[derive(Debug, Clone)]
pub(crate) struct FeatureRect {
    pub(crate) x: u32,
    pub(crate) y: u32,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) weight: f32,
}

/// A Haar feature: two or three weighted rectangles whose summed response is
/// thresholded by the owning tree node.
#[derive(Debug, Clone)]
pub(crate) struct HaarFeature {
    pub(crate) rects: Vec<FeatureRect>,
}

/// Decision node of a weak classifier. Child values `<= 0` encode leaf index
/// `-value`; positive values index another node of the same classifier.
#[derive(Debug, Clone)]
pub(crate) struct TreeNode {
    pub(crate) feature: usize,
    pub(crate) threshold: f32,
    pub(crate) left: i32,
    pub(crate) right: i32,
}

/// A boosted weak classifier: a stump or small tree voting into a stage sum.
#[derive(Debug, Clone)]
pub(crate) struct WeakClassifier {
    pub(crate) nodes: Vec<TreeNode>,
    pub(crate) leaves: Vec<f32>,
}

#[derive(Debug, Clone)]
pub(crate) struct Stage {
    pub(crate) threshold: f32,
    pub(crate) weak: Vec<WeakClassifier>,
}

/// A parsed boosted Haar cascade, immutable after construction.
#[derive(Debug, Clone)]
pub struct HaarCascade {
    pub(crate) window_width: u32,
    pub(crate) window_height: u32,
    pub(crate) features: Vec<HaarFeature>,
    pub(crate) stages: Vec<Stage>,
}

/// A grouped detection candidate with its reject-level weight.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Candidate {
    pub(crate) region: Region,
    pub(crate) weight: f32,
}

impl HaarCascade {
    /// Parse an OpenCV new-format cascade definition.
    ///
    /// Only BOOST stages over upright HAAR features are implemented; anything
    /// else (LBP/HOG features, tilted rectangles, non-boosted stages) is
    /// rejected as an unsupported kind.
    pub fn from_xml(xml: &str) -> Result<Self, CascadeParseError> {
        let doc = roxmltree::Document::parse(xml)?;
        let cascade = doc
            .root_element()
            .children()
            .find(|n| n.has_tag_name("cascade"))
            .ok_or(CascadeParseError::MissingElement("cascade"))?;

        let stage_type = child_text(cascade, "stageType")?.trim();
        if stage_type != "BOOST" {
            return Err(CascadeParseError::UnsupportedKind(format!(
                "stage type {stage_type}"
            )));
        }
        let feature_type = child_text(cascade, "featureType")?.trim();
        if feature_type != "HAAR" {
            return Err(CascadeParseError::UnsupportedKind(format!(
                "feature type {feature_type}"
            )));
        }

        let window_width: u32 = parse_num(child_text(cascade, "width")?)?;
        let window_height: u32 = parse_num(child_text(cascade, "height")?)?;
        if window_width == 0 || window_height == 0 {
            return Err(CascadeParseError::Malformed("zero detection window"));
        }

        let features = parse_features(child(cascade, "features")?)?;
        let stages = parse_stages(child(cascade, "stages")?, features.len())?;
        if stages.is_empty() {
            return Err(CascadeParseError::Malformed("cascade has no stages"));
        }

        Ok(Self {
            window_width,
            window_height,
            features,
            stages,
        })
    }

    /// Scan `gray` at every pyramid scale and return grouped candidates in
    /// scan order (coarse-to-fine scale, then row-major position).
    ///
    /// Degenerate inputs (image smaller than the detection window) yield an
    /// empty list, never an error. `min_neighbors == 0` skips grouping and
    /// returns every raw window.
    pub(crate) fn detect_multi_scale(
        &self,
        gray: &GrayImage,
        scale_factor: f32,
        min_neighbors: u32,
    ) -> Vec<Candidate> {
        debug_assert!(scale_factor > 1.0);
        let (img_w, img_h) = gray.dimensions();
        if img_w < self.window_width || img_h < self.window_height {
            return Vec::new();
        }

        let mut raw = Vec::new();
        let mut factor = 1.0f64;
        loop {
            let scaled_w = (img_w as f64 / factor).round() as u32;
            let scaled_h = (img_h as f64 / factor).round() as u32;
            if scaled_w < self.window_width || scaled_h < self.window_height {
                break;
            }

            let scaled;
            let level = if factor == 1.0 {
                gray
            } else {
                scaled = imageops::resize(gray, scaled_w, scaled_h, FilterType::Triangle);
                &scaled
            };
            self.scan_level(level, factor, img_w, img_h, &mut raw);

            factor *= scale_factor as f64;
        }

        tracing::trace!(windows = raw.len(), "cascade scan complete");
        let mut grouped = group_candidates(raw, min_neighbors);
        for c in &mut grouped {
            // Averaging and round-back can overshoot by a pixel.
            c.region.width = c.region.width.min(img_w - c.region.x);
            c.region.height = c.region.height.min(img_h - c.region.y);
        }
        grouped
    }

    /// Slide the base window over one pyramid level, pushing passing windows
    /// mapped back to original-image coordinates.
    fn scan_level(
        &self,
        level: &GrayImage,
        factor: f64,
        img_w: u32,
        img_h: u32,
        out: &mut Vec<Candidate>,
    ) {
        let integral = IntegralImage::new(level);
        let (level_w, level_h) = level.dimensions();
        // Finer stride once the level has been shrunk past 2x.
        let step = if factor > 2.0 { 1 } else { 2 };

        let mut y = 0;
        while y + self.window_height <= level_h {
            let mut x = 0;
            while x + self.window_width <= level_w {
                if let Some(weight) = self.eval_window(&integral, x, y) {
                    out.push(Candidate {
                        region: map_back(
                            x,
                            y,
                            self.window_width,
                            self.window_height,
                            factor,
                            img_w,
                            img_h,
                        ),
                        weight,
                    });
                }
                x += step;
            }
            y += step;
        }
    }

    /// Evaluate one window. Returns the final stage sum (the reject-level
    /// weight) if every stage passes, `None` on the first rejecting stage.
    pub(crate) fn eval_window(&self, integral: &IntegralImage, x: u32, y: u32) -> Option<f32> {
        let inv_area = 1.0 / (self.window_width * self.window_height) as f32;
        let total = integral.rect_sum(x, y, self.window_width, self.window_height) as f32;
        let total_sq = integral.sq_rect_sum(x, y, self.window_width, self.window_height) as f32;
        let mean = total * inv_area;
        let variance = total_sq * inv_area - mean * mean;
        // Uniform windows would zero the normalizer; fall back to 1 as the
        // reference implementation does.
        let var_norm = if variance > 0.0 { variance.sqrt() } else { 1.0 };

        let mut stage_sum = 0.0f32;
        for stage in &self.stages {
            stage_sum = 0.0;
            for weak in &stage.weak {
                stage_sum += self.eval_weak(weak, integral, x, y, inv_area, var_norm);
            }
            if stage_sum < stage.threshold {
                return None;
            }
        }
        Some(stage_sum)
    }

    fn eval_weak(
        &self,
        weak: &WeakClassifier,
        integral: &IntegralImage,
        x: u32,
        y: u32,
        inv_area: f32,
        var_norm: f32,
    ) -> f32 {
        let mut idx = 0usize;
        loop {
            let node = &weak.nodes[idx];
            let feature = &self.features[node.feature];
            let mut value = 0.0f32;
            for r in &feature.rects {
                value +=
                    r.weight * integral.rect_sum(x + r.x, y + r.y, r.width, r.height) as f32;
            }
            let next = if value * inv_area < node.threshold * var_norm {
                node.left
            } else {
                node.right
            };
            if next <= 0 {
                return weak.leaves[(-next) as usize];
            }
            idx = next as usize;
        }
    }
}

/// Summed-area tables (plain and squared) with a one-pixel zero border so
/// rect lookups need no edge cases.
pub(crate) struct IntegralImage {
    sum: Array2<u64>,
    sq_sum: Array2<u64>,
}

impl IntegralImage {
    pub(crate) fn new(gray: &GrayImage) -> Self {
        let (width, height) = gray.dimensions();
        let (w, h) = (width as usize, height as usize);
        let mut sum = Array2::<u64>::zeros((h + 1, w + 1));
        let mut sq_sum = Array2::<u64>::zeros((h + 1, w + 1));
        let pixels = gray.as_raw();

        for y in 0..h {
            let mut row = 0u64;
            let mut row_sq = 0u64;
            for x in 0..w {
                let p = pixels[y * w + x] as u64;
                row += p;
                row_sq += p * p;
                sum[[y + 1, x + 1]] = sum[[y, x + 1]] + row;
                sq_sum[[y + 1, x + 1]] = sq_sum[[y, x + 1]] + row_sq;
            }
        }

        Self { sum, sq_sum }
    }

    /// Sum of pixels in the rectangle with top-left `(x, y)`.
    pub(crate) fn rect_sum(&self, x: u32, y: u32, width: u32, height: u32) -> u64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + width as usize, y0 + height as usize);
        (self.sum[[y1, x1]] + self.sum[[y0, x0]]) - (self.sum[[y0, x1]] + self.sum[[y1, x0]])
    }

    /// Sum of squared pixels in the rectangle with top-left `(x, y)`.
    pub(crate) fn sq_rect_sum(&self, x: u32, y: u32, width: u32, height: u32) -> u64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + width as usize, y0 + height as usize);
        (self.sq_sum[[y1, x1]] + self.sq_sum[[y0, x0]])
            - (self.sq_sum[[y0, x1]] + self.sq_sum[[y1, x0]])
    }
}

/// Map a window from pyramid-level coordinates back to the original image,
/// clamped to its bounds.
fn map_back(x: u32, y: u32, win_w: u32, win_h: u32, factor: f64, img_w: u32, img_h: u32) -> Region {
    let rx = ((x as f64 * factor).round() as u32).min(img_w.saturating_sub(1));
    let ry = ((y as f64 * factor).round() as u32).min(img_h.saturating_sub(1));
    let rw = ((win_w as f64 * factor).round() as u32).clamp(1, img_w - rx);
    let rh = ((win_h as f64 * factor).round() as u32).clamp(1, img_h - ry);
    Region {
        x: rx,
        y: ry,
        width: rw,
        height: rh,
    }
}

/// Rectangle grouping in the reference detector's manner: partition raw
/// windows into similarity clusters, drop clusters with `min_neighbors` or
/// fewer members, and emit each survivor as the averaged rectangle carrying
/// the largest member weight. Cluster order follows first appearance in the
/// scan, which keeps the output in the cascade's native candidate order.
pub(crate) fn group_candidates(raw: Vec<Candidate>, min_neighbors: u32) -> Vec<Candidate> {
    if min_neighbors == 0 || raw.is_empty() {
        return raw;
    }

    let n = raw.len();
    let mut parent: Vec<usize> = (0..n).collect();
    for i in 0..n {
        for j in (i + 1)..n {
            if similar(&raw[i].region, &raw[j].region) {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[rj.max(ri)] = rj.min(ri);
                }
            }
        }
    }

    struct Acc {
        count: u64,
        x: u64,
        y: u64,
        width: u64,
        height: u64,
        weight: f32,
    }

    let mut slot_of_root: Vec<Option<usize>> = vec![None; n];
    let mut clusters: Vec<Acc> = Vec::new();
    for (i, candidate) in raw.iter().enumerate() {
        let root = find(&mut parent, i);
        let slot = match slot_of_root[root] {
            Some(slot) => slot,
            None => {
                slot_of_root[root] = Some(clusters.len());
                clusters.push(Acc {
                    count: 0,
                    x: 0,
                    y: 0,
                    width: 0,
                    height: 0,
                    weight: f32::NEG_INFINITY,
                });
                clusters.len() - 1
            }
        };
        let acc = &mut clusters[slot];
        acc.count += 1;
        acc.x += candidate.region.x as u64;
        acc.y += candidate.region.y as u64;
        acc.width += candidate.region.width as u64;
        acc.height += candidate.region.height as u64;
        acc.weight = acc.weight.max(candidate.weight);
    }

    clusters
        .into_iter()
        .filter(|acc| acc.count > min_neighbors as u64)
        .map(|acc| {
            let avg = |v: u64| (v as f64 / acc.count as f64).round() as u32;
            Candidate {
                region: Region {
                    x: avg(acc.x),
                    y: avg(acc.y),
                    width: avg(acc.width),
                    height: avg(acc.height),
                },
                weight: acc.weight,
            }
        })
        .collect()
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

fn similar(a: &Region, b: &Region) -> bool {
    let delta = GROUP_EPS * 0.5 * (a.width.min(b.width) + a.height.min(b.height)) as f64;
    let dist = |p: u32, q: u32| (p as f64 - q as f64).abs();
    dist(a.x, b.x) <= delta
        && dist(a.y, b.y) <= delta
        && dist(a.x + a.width, b.x + b.width) <= delta
        && dist(a.y + a.height, b.y + b.height) <= delta
}

fn child<'a, 'i>(
    node: roxmltree::Node<'a, 'i>,
    name: &'static str,
) -> Result<roxmltree::Node<'a, 'i>, CascadeParseError> {
    node.children()
        .find(|n| n.has_tag_name(name))
        .ok_or(CascadeParseError::MissingElement(name))
}

fn child_text<'a>(
    node: roxmltree::Node<'a, '_>,
    name: &'static str,
) -> Result<&'a str, CascadeParseError> {
    child(node, name)?
        .text()
        .ok_or(CascadeParseError::MissingElement(name))
}

fn parse_num<T: std::str::FromStr>(token: &str) -> Result<T, CascadeParseError> {
    let token = token.trim();
    token
        .parse::<T>()
        .map_err(|_| CascadeParseError::BadNumber(token.to_string()))
}

fn parse_features(node: roxmltree::Node<'_, '_>) -> Result<Vec<HaarFeature>, CascadeParseError> {
    let mut features = Vec::new();
    for feat in node.children().filter(|n| n.is_element()) {
        if let Ok(tilted) = child_text(feat, "tilted") {
            if parse_num::<i32>(tilted)? != 0 {
                return Err(CascadeParseError::UnsupportedKind(
                    "tilted haar features".into(),
                ));
            }
        }

        let mut rects = Vec::new();
        for rect in child(feat, "rects")?.children().filter(|n| n.is_element()) {
            let text = rect.text().ok_or(CascadeParseError::Malformed("empty rect"))?;
            let tokens: Vec<&str> = text.split_whitespace().collect();
            if tokens.len() != 5 {
                return Err(CascadeParseError::Malformed(
                    "rect must be `x y w h weight`",
                ));
            }
            rects.push(FeatureRect {
                x: parse_num(tokens[0])?,
                y: parse_num(tokens[1])?,
                width: parse_num(tokens[2])?,
                height: parse_num(tokens[3])?,
                weight: parse_num(tokens[4])?,
            });
        }
        if rects.is_empty() {
            return Err(CascadeParseError::Malformed("feature has no rects"));
        }
        features.push(HaarFeature { rects });
    }
    Ok(features)
}

fn parse_stages(
    node: roxmltree::Node<'_, '_>,
    feature_count: usize,
) -> Result<Vec<Stage>, CascadeParseError> {
    let mut stages = Vec::new();
    for stage in node.children().filter(|n| n.is_element()) {
        let threshold: f32 = parse_num(child_text(stage, "stageThreshold")?)?;

        let mut weak = Vec::new();
        for classifier in child(stage, "weakClassifiers")?
            .children()
            .filter(|n| n.is_element())
        {
            let internal: Vec<&str> = child_text(classifier, "internalNodes")?
                .split_whitespace()
                .collect();
            if internal.is_empty() || internal.len() % 4 != 0 {
                return Err(CascadeParseError::Malformed(
                    "internalNodes must hold `left right feature threshold` groups",
                ));
            }

            let mut nodes = Vec::with_capacity(internal.len() / 4);
            for chunk in internal.chunks(4) {
                let feature: usize = parse_num(chunk[2])?;
                if feature >= feature_count {
                    return Err(CascadeParseError::BadFeatureIndex(feature, feature_count));
                }
                nodes.push(TreeNode {
                    feature,
                    threshold: parse_num(chunk[3])?,
                    left: parse_num(chunk[0])?,
                    right: parse_num(chunk[1])?,
                });
            }

            let leaves = child_text(classifier, "leafValues")?
                .split_whitespace()
                .map(parse_num::<f32>)
                .collect::<Result<Vec<_>, _>>()?;
            if leaves.len() != nodes.len() + 1 {
                return Err(CascadeParseError::Malformed(
                    "leafValues count must be internal nodes + 1",
                ));
            }
            for node in &nodes {
                for child_ref in [node.left, node.right] {
                    let ok = if child_ref <= 0 {
                        ((-child_ref) as usize) < leaves.len()
                    } else {
                        (child_ref as usize) < nodes.len()
                    };
                    if !ok {
                        return Err(CascadeParseError::Malformed(
                            "tree node child out of range",
                        ));
                    }
                }
            }

            weak.push(WeakClassifier { nodes, leaves });
        }
        stages.push(Stage {
            threshold,
            weak,
        });
    }
    Ok(stages)
}
