//! Viola-Jones face detection with boosted Haar cascades.
//!
//! Stages are stump-based boosted classifiers over upright Haar features.
//! The search builds an image pyramid, slides the cascade window over every
//! level, normalizes each window by its standard deviation and finally
//! clusters the raw hits, keeping clusters with enough neighbours.
//!
//! Cascades are read from OpenCV's XML files (`haarcascade_*.xml`, the
//! `opencv-cascade-classifier` layout) or from an equivalent JSON document:
//!
//! ```json
//! {
//!   "width": 24, "height": 24,
//!   "stages": [ { "threshold": -0.8, "stumps": [
//!       { "feature": 0, "threshold": 0.004, "left": 0.03, "right": -0.8 } ] } ],
//!   "features": [ { "rects": [[6, 4, 12, 9, -1.0], [6, 7, 12, 3, 3.0]] } ]
//! }
//! ```

use std::borrow::Cow;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use image::{imageops::FilterType, GrayImage};
use roxmltree::{Document, Node};
use serde::Deserialize;

use crate::detect::{DetectParams, FaceDetector, FaceRect};
use crate::error::PipelineError;

/// Cluster similarity used when grouping raw hits.
const GROUP_EPS: f64 = 0.2;
/// Largest cascade window accepted.
const MAX_WINDOW: u32 = 1024;

#[derive(Debug, Deserialize)]
struct CascadeFile {
    width: u32,
    height: u32,
    stages: Vec<StageFile>,
    features: Vec<FeatureFile>,
}

#[derive(Debug, Deserialize)]
struct StageFile {
    threshold: f32,
    stumps: Vec<Stump>,
}

#[derive(Debug, Deserialize)]
struct FeatureFile {
    rects: Vec<[f32; 5]>,
    #[serde(default)]
    tilted: bool,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct Stump {
    feature: usize,
    threshold: f32,
    left: f32,
    right: f32,
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f32,
    stumps: Vec<Stump>,
}

#[derive(Debug, Clone, Copy)]
struct WeightedRect {
    x: u32,
    y: u32,
    w: u32,
    h: u32,
    weight: f32,
}

#[derive(Debug, Clone)]
struct HaarFeature {
    rects: Vec<WeightedRect>,
}

/// A loaded, validated cascade. Immutable once built, so a single instance
/// may serve every frame.
#[derive(Debug, Clone)]
pub struct HaarCascade {
    window: (u32, u32),
    stages: Vec<Stage>,
    features: Vec<HaarFeature>,
}

impl HaarCascade {
    /// Load an OpenCV XML cascade, or a JSON one when the file does not
    /// start with markup.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading cascade {}", path.display()))?;
        let cascade = if raw.trim_start().starts_with('<') {
            Self::from_xml_str(&raw)
        } else {
            Self::from_json_str(&raw)
        };
        cascade.with_context(|| format!("parsing cascade {}", path.display()))
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let file: CascadeFile = serde_json::from_str(raw)?;
        Self::from_file(file)
    }

    pub fn from_xml_str(raw: &str) -> Result<Self> {
        let doc = Document::parse(raw)?;
        let root = doc
            .descendants()
            .find(|n| n.has_tag_name("stages"))
            .and_then(|n| n.parent())
            .context("no <stages> element, not an OpenCV cascade")?;

        if let Some(kind) = root.children().find(|n| n.has_tag_name("featureType")) {
            let kind = kind.text().unwrap_or("").trim();
            if kind != "HAAR" {
                anyhow::bail!("{} cascades are not supported", kind);
            }
        }

        let file = CascadeFile {
            width: parse_text(child(root, "width")?)?,
            height: parse_text(child(root, "height")?)?,
            stages: items(child(root, "stages")?)
                .map(xml_stage)
                .collect::<Result<_>>()?,
            features: items(child(root, "features")?)
                .map(xml_feature)
                .collect::<Result<_>>()?,
        };
        Self::from_file(file)
    }

    fn from_file(file: CascadeFile) -> Result<Self> {
        let (win_w, win_h) = (file.width, file.height);
        if win_w < 3 || win_h < 3 || win_w > MAX_WINDOW || win_h > MAX_WINDOW {
            anyhow::bail!("cascade window {}x{} is out of range", win_w, win_h);
        }
        if file.stages.is_empty() {
            anyhow::bail!("cascade has no stages");
        }

        let mut features = Vec::with_capacity(file.features.len());
        for (idx, feature) in file.features.into_iter().enumerate() {
            if feature.tilted {
                anyhow::bail!("feature {} is tilted, only upright features are supported", idx);
            }
            if feature.rects.is_empty() || feature.rects.len() > 3 {
                anyhow::bail!("feature {} has {} rectangles, expected 1-3", idx, feature.rects.len());
            }
            let mut rects = Vec::with_capacity(feature.rects.len());
            for [x, y, w, h, weight] in feature.rects {
                let whole = |v: f32| v.is_finite() && v >= 0.0 && v.fract() == 0.0;
                if ![x, y, w, h].into_iter().all(whole) || !weight.is_finite() {
                    anyhow::bail!("feature {} has a malformed rectangle", idx);
                }
                if w == 0.0 || h == 0.0 {
                    anyhow::bail!("feature {} has a degenerate rectangle", idx);
                }
                if x as f64 + w as f64 > win_w as f64 || y as f64 + h as f64 > win_h as f64 {
                    anyhow::bail!("feature {} leaves the {}x{} window", idx, win_w, win_h);
                }
                // inside the window, so the casts are exact
                rects.push(WeightedRect {
                    x: x as u32,
                    y: y as u32,
                    w: w as u32,
                    h: h as u32,
                    weight,
                });
            }
            features.push(HaarFeature { rects });
        }

        let mut stages = Vec::with_capacity(file.stages.len());
        for (idx, stage) in file.stages.into_iter().enumerate() {
            if stage.stumps.is_empty() {
                anyhow::bail!("stage {} has no classifiers", idx);
            }
            if let Some(bad) = stage.stumps.iter().find(|s| s.feature >= features.len()) {
                anyhow::bail!(
                    "stage {} references feature {} of {}",
                    idx,
                    bad.feature,
                    features.len()
                );
            }
            stages.push(Stage {
                threshold: stage.threshold,
                stumps: stage.stumps,
            });
        }

        log::debug!(
            "cascade loaded: window={}x{} stages={} features={}",
            win_w,
            win_h,
            stages.len(),
            features.len()
        );

        Ok(Self {
            window: (win_w, win_h),
            stages,
            features,
        })
    }

    pub fn window(&self) -> (u32, u32) {
        self.window
    }

    /// Raw window hits over the whole pyramid, in frame coordinates.
    pub fn scan(&self, gray: &GrayImage, params: &DetectParams) -> Vec<FaceRect> {
        let (img_w, img_h) = gray.dimensions();
        let (win_w, win_h) = self.window;
        let mut hits = Vec::new();
        if img_w == 0 || img_h == 0 {
            return hits;
        }

        let mut factor = 1.0f64;
        loop {
            let scaled_w = (img_w as f64 / factor).round() as u32;
            let scaled_h = (img_h as f64 / factor).round() as u32;
            let window_w = (win_w as f64 * factor).round() as u32;
            let window_h = (win_h as f64 * factor).round() as u32;

            // no room to slide the window, as in detectMultiScale
            if scaled_w <= win_w || scaled_h <= win_h {
                break;
            }
            let (max_w, max_h) = params.max_size;
            if (max_w > 0 && window_w > max_w) || (max_h > 0 && window_h > max_h) {
                break;
            }
            let (min_w, min_h) = params.min_size;
            if window_w >= min_w && window_h >= min_h {
                let level: Cow<'_, GrayImage> = if scaled_w == img_w && scaled_h == img_h {
                    Cow::Borrowed(gray)
                } else {
                    Cow::Owned(image::imageops::resize(
                        gray,
                        scaled_w,
                        scaled_h,
                        FilterType::Triangle,
                    ))
                };
                let integral = Integral::new(&level);
                let step = if factor > 2.0 { 1 } else { 2 };

                for y in (0..scaled_h - win_h).step_by(step) {
                    for x in (0..scaled_w - win_w).step_by(step) {
                        if self.accepts(&integral, x, y) {
                            hits.push(FaceRect::new(
                                (x as f64 * factor).round() as i32,
                                (y as f64 * factor).round() as i32,
                                window_w,
                                window_h,
                            ));
                        }
                    }
                }
            }

            factor *= params.scale_factor as f64;
        }

        hits
    }

    fn accepts(&self, integral: &Integral, x: u32, y: u32) -> bool {
        let (win_w, win_h) = self.window;
        let (nx, ny, nw, nh) = (x + 1, y + 1, win_w - 2, win_h - 2);
        let area = nw as f64 * nh as f64;
        let sum = integral.sum(nx, ny, nw, nh) as f64;
        let sqsum = integral.sqsum(nx, ny, nw, nh) as f64;
        let mut nf = area * sqsum - sum * sum;
        nf = if nf > 0.0 { nf.sqrt() } else { 1.0 };
        let inv_norm = 1.0 / nf;

        for stage in &self.stages {
            let mut stage_sum = 0.0f32;
            for stump in &stage.stumps {
                let value = self.features[stump.feature].eval(integral, x, y) * inv_norm;
                stage_sum += if value < stump.threshold as f64 {
                    stump.left
                } else {
                    stump.right
                };
            }
            if stage_sum < stage.threshold {
                return false;
            }
        }
        true
    }
}

impl HaarFeature {
    fn eval(&self, integral: &Integral, ox: u32, oy: u32) -> f64 {
        self.rects
            .iter()
            .map(|r| integral.sum(ox + r.x, oy + r.y, r.w, r.h) as f64 * r.weight as f64)
            .sum()
    }
}

impl FaceDetector for HaarCascade {
    fn detect(
        &mut self,
        gray: &GrayImage,
        params: &DetectParams,
    ) -> Result<Vec<FaceRect>, PipelineError> {
        params.validate()?;
        let hits = self.scan(gray, params);
        let faces = group_rectangles(&hits, params.min_neighbors, GROUP_EPS);
        log::trace!("cascade: {} raw hits, {} faces", hits.len(), faces.len());
        Ok(faces)
    }
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Result<Node<'a, 'input>> {
    node.children()
        .find(|n| n.has_tag_name(name))
        .with_context(|| format!("<{}> has no <{}>", node.tag_name().name(), name))
}

/// Element children, the `<_>` list entries of OpenCV storage.
fn items<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.is_element())
}

fn parse_text<T>(node: Node<'_, '_>) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text = node.text().unwrap_or("").trim();
    text.parse()
        .with_context(|| format!("bad <{}> value {:?}", node.tag_name().name(), text))
}

fn numbers(node: Node<'_, '_>) -> Result<Vec<f64>> {
    node.text()
        .unwrap_or("")
        .split_whitespace()
        .map(|t| t.parse::<f64>().with_context(|| format!("bad number {:?}", t)))
        .collect()
}

fn xml_stage(stage: Node<'_, '_>) -> Result<StageFile> {
    let stumps: Vec<Stump> = items(child(stage, "weakClassifiers")?)
        .map(|weak| -> Result<Stump> {
            let nodes = numbers(child(weak, "internalNodes")?)?;
            let leaves = numbers(child(weak, "leafValues")?)?;
            // "left right feature threshold", then one leaf per side
            if nodes.len() != 4 || leaves.len() != 2 {
                anyhow::bail!("only stump classifiers are supported");
            }
            let feature = nodes[2];
            if !(feature >= 0.0 && feature.fract() == 0.0 && feature <= u32::MAX as f64) {
                anyhow::bail!("bad feature index {}", feature);
            }
            Ok(Stump {
                feature: feature as usize,
                threshold: nodes[3] as f32,
                left: leaves[0] as f32,
                right: leaves[1] as f32,
            })
        })
        .collect::<Result<_>>()?;
    Ok(StageFile {
        threshold: parse_text(child(stage, "stageThreshold")?)?,
        stumps,
    })
}

fn xml_feature(feature: Node<'_, '_>) -> Result<FeatureFile> {
    let rects: Vec<[f32; 5]> = items(child(feature, "rects")?)
        .map(|rect| -> Result<[f32; 5]> {
            let v = numbers(rect)?;
            match v[..] {
                [x, y, w, h, weight] => Ok([x as f32, y as f32, w as f32, h as f32, weight as f32]),
                _ => anyhow::bail!("rectangle has {} values, expected 5", v.len()),
            }
        })
        .collect::<Result<_>>()?;
    let tilted = match feature.children().find(|n| n.has_tag_name("tilted")) {
        Some(node) => parse_text::<u8>(node)? != 0,
        None => false,
    };
    Ok(FeatureFile { rects, tilted })
}

/// Summed-area tables of the pixel values and their squares, one row and
/// column larger than the image.
struct Integral {
    stride: usize,
    sum: Vec<u64>,
    sqsum: Vec<u64>,
}

impl Integral {
    fn new(img: &GrayImage) -> Self {
        let (w, h) = (img.width() as usize, img.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0u64; stride * (h + 1)];
        let mut sqsum = vec![0u64; stride * (h + 1)];
        let raw = img.as_raw();

        for y in 0..h {
            let mut row = 0u64;
            let mut row_sq = 0u64;
            for x in 0..w {
                let v = raw[y * w + x] as u64;
                row += v;
                row_sq += v * v;
                let idx = (y + 1) * stride + x + 1;
                sum[idx] = sum[idx - stride] + row;
                sqsum[idx] = sqsum[idx - stride] + row_sq;
            }
        }

        Self { stride, sum, sqsum }
    }

    fn sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        Self::rect(&self.sum, self.stride, x, y, w, h)
    }

    fn sqsum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        Self::rect(&self.sqsum, self.stride, x, y, w, h)
    }

    fn rect(table: &[u64], stride: usize, x: u32, y: u32, w: u32, h: u32) -> u64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        table[y1 * stride + x1] + table[y0 * stride + x0]
            - table[y0 * stride + x1]
            - table[y1 * stride + x0]
    }
}

fn similar(a: &FaceRect, b: &FaceRect, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) as f64 + a.height.min(b.height) as f64) * 0.5;
    let (ar, br) = (a.x as f64 + a.width as f64, b.x as f64 + b.width as f64);
    let (ab, bb) = (a.y as f64 + a.height as f64, b.y as f64 + b.height as f64);
    (a.x as f64 - b.x as f64).abs() <= delta
        && (a.y as f64 - b.y as f64).abs() <= delta
        && (ar - br).abs() <= delta
        && (ab - bb).abs() <= delta
}

/// Cluster raw hits and keep the clusters holding more than
/// `min_neighbors` members, averaged into one rectangle each. Clusters
/// nested inside a stronger cluster are dropped. With `min_neighbors == 0`
/// the hits are returned untouched.
pub fn group_rectangles(rects: &[FaceRect], min_neighbors: u32, eps: f64) -> Vec<FaceRect> {
    if min_neighbors == 0 || rects.is_empty() {
        return rects.to_vec();
    }

    // union-find over the similarity relation
    let mut parent: Vec<usize> = (0..rects.len()).collect();
    fn root(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }
    for i in 0..rects.len() {
        for j in (i + 1)..rects.len() {
            if similar(&rects[i], &rects[j], eps) {
                let (ri, rj) = (root(&mut parent, i), root(&mut parent, j));
                if ri != rj {
                    parent[rj.max(ri)] = ri.min(rj);
                }
            }
        }
    }

    // classes numbered by first appearance
    let mut class_of_root = vec![usize::MAX; rects.len()];
    let mut totals: Vec<([i64; 4], u32)> = Vec::new();
    for (i, r) in rects.iter().enumerate() {
        let rt = root(&mut parent, i);
        if class_of_root[rt] == usize::MAX {
            class_of_root[rt] = totals.len();
            totals.push(([0; 4], 0));
        }
        let (acc, count) = &mut totals[class_of_root[rt]];
        acc[0] += r.x as i64;
        acc[1] += r.y as i64;
        acc[2] += r.width as i64;
        acc[3] += r.height as i64;
        *count += 1;
    }

    let averaged: Vec<(FaceRect, u32)> = totals
        .iter()
        .map(|(acc, n)| {
            let s = 1.0 / *n as f64;
            let rect = FaceRect::new(
                (acc[0] as f64 * s).round() as i32,
                (acc[1] as f64 * s).round() as i32,
                (acc[2] as f64 * s).round() as u32,
                (acc[3] as f64 * s).round() as u32,
            );
            (rect, *n)
        })
        .collect();

    let mut faces = Vec::new();
    for (i, (r1, n1)) in averaged.iter().enumerate() {
        if *n1 <= min_neighbors {
            continue;
        }
        let nested = averaged.iter().enumerate().any(|(j, (r2, n2))| {
            if i == j || *n2 <= min_neighbors {
                return false;
            }
            let dx = (r2.width as f64 * eps).round() as i32;
            let dy = (r2.height as f64 * eps).round() as i32;
            r1.x >= r2.x - dx
                && r1.y >= r2.y - dy
                && r1.x + r1.width as i32 <= r2.x + r2.width as i32 + dx
                && r1.y + r1.height as i32 <= r2.y + r2.height as i32 + dy
                && (*n2 > (*n1).max(3) || *n1 < 3)
        });
        if !nested {
            faces.push(*r1);
        }
    }
    faces
}
