//! Boosted Haar cascade in the OpenCV `opencv_traincascade` XML format.
//!
//! Windows are evaluated on a downscaled copy of the image for every scale
//! step, with per-window variance normalization, and the raw hits are merged
//! the way OpenCV's `groupRectangles` does.

use image::{GrayImage, ImageBuffer, Luma};
use image::imageops::FilterType;
use imageproc::integral_image::{integral_image, integral_squared_image, sum_image_pixels};
use roxmltree::{Document, Node};
use std::path::Path;
use std::str::FromStr;
use crate::error::ModelLoadError;
use crate::models::Region;

/// Similarity tolerance used when merging raw hits
const GROUP_EPS: f32 = 0.2;

/// Windows whose normalized pixel deviation is below this are skipped
const MIN_WINDOW_STDDEV: f64 = 10.0;

#[derive(Debug, Clone)]
struct WeightedRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    weight: f32,
}

#[derive(Debug, Clone)]
struct HaarFeature {
    rects: Vec<WeightedRect>,
}

#[derive(Debug, Clone)]
struct TreeNode {
    left: i32,
    right: i32,
    feature: usize,
    threshold: f32,
}

#[derive(Debug, Clone)]
struct WeakClassifier {
    nodes: Vec<TreeNode>,
    leaves: Vec<f32>,
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f32,
    classifiers: Vec<WeakClassifier>,
}

#[derive(Debug, Clone)]
pub struct HaarCascade {
    window_width: u32,
    window_height: u32,
    stages: Vec<Stage>,
    features: Vec<HaarFeature>,
}

/// Summed-area table with a zero first row and column
type Integral = ImageBuffer<Luma<u64>, Vec<u64>>;

/// Sum over the `w` x `h` rectangle at `(x, y)`; `w` and `h` are non-zero
fn rect_sum(table: &Integral, x: u32, y: u32, w: u32, h: u32) -> u64 {
    sum_image_pixels(table, x, y, x + w - 1, y + h - 1)[0]
}

impl HaarCascade {
    pub fn from_file(path: &Path) -> Result<Self, ModelLoadError> {
        if !path.exists() {
            return Err(ModelLoadError::Missing(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path).map_err(|e| ModelLoadError::Cascade {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&text).map_err(|message| ModelLoadError::Cascade {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn parse(xml: &str) -> Result<Self, String> {
        let doc = Document::parse(xml).map_err(|e| e.to_string())?;
        let cascade = doc
            .root_element()
            .children()
            .find(|n| n.is_element() && child(*n, "stages").is_some())
            .ok_or("no cascade with <stages> found (old-style cascades are not supported)")?;

        if let Some(kind) = child_text(cascade, "featureType") {
            if !kind.eq_ignore_ascii_case("HAAR") {
                return Err(format!("unsupported feature type {kind}"));
            }
        }
        let window_width: u32 = parse_one(cascade, "width")?;
        let window_height: u32 = parse_one(cascade, "height")?;
        if window_width < 3 || window_height < 3 {
            return Err("detector window must be at least 3x3".to_string());
        }

        let features = elements(child(cascade, "features").ok_or("missing <features>")?)
            .map(|f| parse_feature(f, window_width, window_height))
            .collect::<Result<Vec<_>, _>>()?;

        let stages = elements(child(cascade, "stages").ok_or("missing <stages>")?)
            .map(|s| parse_stage(s, features.len()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            window_width,
            window_height,
            stages,
            features,
        })
    }

    pub fn window_size(&self) -> (u32, u32) {
        (self.window_width, self.window_height)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Detect objects at every scale `scale_factor^k`, then merge hits.
    /// `min_neighbors == 0` returns the raw hits.
    pub fn detect_multi_scale(
        &self,
        gray: &GrayImage,
        scale_factor: f32,
        min_neighbors: u32,
        min_size: (u32, u32),
    ) -> Vec<Region> {
        let (img_w, img_h) = gray.dimensions();
        let mut hits = Vec::new();
        let mut factor = 1.0f32;

        while scale_factor > 1.0 {
            let scaled_w = (img_w as f32 / factor).round() as u32;
            let scaled_h = (img_h as f32 / factor).round() as u32;
            if scaled_w <= self.window_width || scaled_h <= self.window_height {
                break;
            }

            let win_w = (self.window_width as f32 * factor).round() as u32;
            let win_h = (self.window_height as f32 * factor).round() as u32;
            if win_w >= min_size.0 && win_h >= min_size.1 {
                let scaled = if factor == 1.0 {
                    gray.clone()
                } else {
                    image::imageops::resize(gray, scaled_w, scaled_h, FilterType::Triangle)
                };
                let sums: Integral = integral_image(&scaled);
                let squares: Integral = integral_squared_image(&scaled);
                let step = if factor > 2.0 { 1 } else { 2 };

                for y in (0..scaled_h - self.window_height).step_by(step) {
                    for x in (0..scaled_w - self.window_width).step_by(step) {
                        if self.accepts(&sums, &squares, x, y) {
                            let region = Region::new(
                                (x as f32 * factor).round() as u32,
                                (y as f32 * factor).round() as u32,
                                win_w,
                                win_h,
                            );
                            if let Some(region) = region.clamp_to(img_w, img_h) {
                                hits.push(region);
                            }
                        }
                    }
                }
            }

            factor *= scale_factor;
        }

        group_rectangles(&hits, min_neighbors)
    }

    fn accepts(&self, sums: &Integral, squares: &Integral, x: u32, y: u32) -> bool {
        let (nw, nh) = (self.window_width - 2, self.window_height - 2);
        let area = (nw * nh) as f64;
        let sum = rect_sum(sums, x + 1, y + 1, nw, nh) as f64;
        let sq = rect_sum(squares, x + 1, y + 1, nw, nh) as f64;
        let nf = area * sq - sum * sum;
        if nf <= 0.0 {
            return false;
        }
        let nf = nf.sqrt();
        if area / nf >= 1.0 / MIN_WINDOW_STDDEV {
            return false;
        }
        let inv_nf = (1.0 / nf) as f32;

        self.stages.iter().all(|stage| {
            let total: f32 = stage
                .classifiers
                .iter()
                .map(|weak| self.evaluate_tree(weak, sums, x, y, inv_nf))
                .sum();
            total >= stage.threshold
        })
    }

    fn evaluate_tree(
        &self,
        weak: &WeakClassifier,
        sums: &Integral,
        x: u32,
        y: u32,
        inv_nf: f32,
    ) -> f32 {
        let mut idx = 0usize;
        loop {
            let node = &weak.nodes[idx];
            let value = self.feature_value(&self.features[node.feature], sums, x, y) * inv_nf;
            let next = if value < node.threshold { node.left } else { node.right };
            if next <= 0 {
                return weak.leaves[next.unsigned_abs() as usize];
            }
            idx = next as usize;
        }
    }

    fn feature_value(&self, feature: &HaarFeature, sums: &Integral, x: u32, y: u32) -> f32 {
        feature
            .rects
            .iter()
            .map(|r| r.weight * rect_sum(sums, x + r.x, y + r.y, r.width, r.height) as f32)
            .sum()
    }
}

fn parse_feature(node: Node, window_width: u32, window_height: u32) -> Result<HaarFeature, String> {
    if child_text(node, "tilted").is_some_and(|t| t != "0") {
        return Err("tilted Haar features are not supported".to_string());
    }
    let rects = elements(child(node, "rects").ok_or("feature without <rects>")?)
        .map(|r| {
            let values: Vec<f32> = parse_numbers(r.text().unwrap_or_default())?;
            let [x, y, w, h, weight] = values[..] else {
                return Err(format!("malformed feature rect {:?}", r.text()));
            };
            let rect = WeightedRect {
                x: whole_number(x)?,
                y: whole_number(y)?,
                width: whole_number(w)?,
                height: whole_number(h)?,
                weight,
            };
            if rect.width == 0 || rect.height == 0 {
                return Err("feature rect is empty".to_string());
            }
            let fits = |start: u32, len: u32, limit: u32| {
                start.checked_add(len).is_some_and(|end| end <= limit)
            };
            if !fits(rect.x, rect.width, window_width) || !fits(rect.y, rect.height, window_height) {
                return Err("feature rect exceeds the detector window".to_string());
            }
            Ok(rect)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(HaarFeature { rects })
}

fn parse_stage(node: Node, feature_count: usize) -> Result<Stage, String> {
    let threshold: f32 = parse_one(node, "stageThreshold")?;
    let classifiers = elements(child(node, "weakClassifiers").ok_or("stage without classifiers")?)
        .map(|weak| {
            let raw: Vec<f32> = parse_numbers(child_text(weak, "internalNodes").unwrap_or_default())?;
            let leaves: Vec<f32> = parse_numbers(child_text(weak, "leafValues").unwrap_or_default())?;
            if raw.is_empty() || raw.len() % 4 != 0 {
                return Err("internal nodes must come in groups of four".to_string());
            }
            let nodes: Vec<TreeNode> = raw
                .chunks(4)
                .map(|c| {
                    Ok(TreeNode {
                        left: node_link(c[0])?,
                        right: node_link(c[1])?,
                        feature: whole_number(c[2])? as usize,
                        threshold: c[3],
                    })
                })
                .collect::<Result<_, String>>()?;
            for n in &nodes {
                if n.feature >= feature_count {
                    return Err(format!("feature index {} out of range", n.feature));
                }
                for next in [n.left, n.right] {
                    let in_range = if next <= 0 {
                        (next.unsigned_abs() as usize) < leaves.len()
                    } else {
                        (next as usize) < nodes.len()
                    };
                    if !in_range {
                        return Err("tree node points outside the classifier".to_string());
                    }
                }
            }
            Ok(WeakClassifier { nodes, leaves })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Stage { threshold, classifiers })
}

/// Non-negative integer stored as a float in the XML
fn whole_number(value: f32) -> Result<u32, String> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= u32::MAX as f32 {
        Ok(value as u32)
    } else {
        Err(format!("expected a non-negative integer, got {value}"))
    }
}

/// Child index (> 0) or negated leaf index (<= 0) of a tree node
fn node_link(value: f32) -> Result<i32, String> {
    let bound = 1u32 << 24;
    if value.is_finite() && value.fract() == 0.0 && value.abs() <= bound as f32 {
        Ok(value as i32)
    } else {
        Err(format!("invalid tree node link {value}"))
    }
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(name))
}

fn child_text<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    child(node, name).and_then(|n| n.text()).map(str::trim)
}

fn elements<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.is_element())
}

fn parse_numbers<T: FromStr>(text: &str) -> Result<Vec<T>, String> {
    text.split_whitespace()
        .map(|token| token.parse().map_err(|_| format!("invalid number {token:?}")))
        .collect()
}

fn parse_one<T: FromStr>(node: Node, name: &str) -> Result<T, String> {
    let text = child_text(node, name).ok_or_else(|| format!("missing <{name}>"))?;
    text.parse().map_err(|_| format!("invalid <{name}> value {text:?}"))
}

fn similar(a: &Region, b: &Region) -> bool {
    let delta = GROUP_EPS
        * (a.width.min(b.width) as f32 + a.height.min(b.height) as f32)
        * 0.5;
    let close = |p: u32, q: u32| (p as f32 - q as f32).abs() <= delta;
    close(a.x, b.x) && close(a.y, b.y) && close(a.right(), b.right()) && close(a.bottom(), b.bottom())
}

fn find_root(parents: &mut [usize], mut i: usize) -> usize {
    while parents[i] != i {
        parents[i] = parents[parents[i]];
        i = parents[i];
    }
    i
}

/// Cluster similar rectangles, drop clusters with `min_neighbors` or fewer
/// members, average the rest, and drop averages nested in a stronger one.
pub fn group_rectangles(rects: &[Region], min_neighbors: u32) -> Vec<Region> {
    if min_neighbors == 0 || rects.is_empty() {
        return rects.to_vec();
    }

    let mut parents: Vec<usize> = (0..rects.len()).collect();
    for i in 0..rects.len() {
        for j in (i + 1)..rects.len() {
            if similar(&rects[i], &rects[j]) {
                let (a, b) = (find_root(&mut parents, i), find_root(&mut parents, j));
                if a != b {
                    parents[b.max(a)] = a.min(b);
                }
            }
        }
    }

    // Clusters numbered by first member, so output order follows input order
    let mut cluster_of_root = vec![usize::MAX; rects.len()];
    let mut totals: Vec<([f64; 4], u32)> = Vec::new();
    for (i, r) in rects.iter().enumerate() {
        let root = find_root(&mut parents, i);
        if cluster_of_root[root] == usize::MAX {
            cluster_of_root[root] = totals.len();
            totals.push(([0.0; 4], 0));
        }
        let (sum, count) = &mut totals[cluster_of_root[root]];
        sum[0] += r.x as f64;
        sum[1] += r.y as f64;
        sum[2] += r.width as f64;
        sum[3] += r.height as f64;
        *count += 1;
    }

    let averaged: Vec<(Region, u32)> = totals
        .iter()
        .map(|(sum, count)| {
            let n = *count as f64;
            let region = Region::new(
                (sum[0] / n).round() as u32,
                (sum[1] / n).round() as u32,
                (sum[2] / n).round() as u32,
                (sum[3] / n).round() as u32,
            );
            (region, *count)
        })
        .collect();

    averaged
        .iter()
        .enumerate()
        .filter(|(_, (_, n1))| *n1 > min_neighbors)
        .filter(|(i, (r1, n1))| {
            !averaged.iter().enumerate().any(|(j, (r2, n2))| {
                if *i == j || *n2 <= min_neighbors {
                    return false;
                }
                let dx = (r2.width as f32 * GROUP_EPS).round() as i64;
                let dy = (r2.height as f32 * GROUP_EPS).round() as i64;
                let inside = r1.x as i64 >= r2.x as i64 - dx
                    && r1.y as i64 >= r2.y as i64 - dy
                    && r1.right() as i64 <= r2.right() as i64 + dx
                    && r1.bottom() as i64 <= r2.bottom() as i64 + dy;
                inside && (*n2 > (*n1).max(3) || *n1 < 3)
            })
        })
        .map(|(_, (r, _))| *r)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// One stump: fires when the right half of a 4x4 window is brighter
    /// than the left half.
    const EDGE_CASCADE: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade>
  <stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>4</height>
  <width>4</width>
  <stageNum>1</stageNum>
  <stages>
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>0.</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 0 0.</internalNodes>
          <leafValues>
            -1. 1.</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>
          0 0 4 4 -1.</_>
        <_>
          2 0 2 4 2.</_></rects></_></features></cascade>
</opencv_storage>
"#;

    fn split_image(dark_left: bool) -> GrayImage {
        GrayImage::from_fn(40, 20, |x, _| {
            let left = x < 20;
            if left == dark_left { Luma([0]) } else { Luma([255]) }
        })
    }

    #[test]
    fn parses_opencv_cascade() {
        let cascade = HaarCascade::parse(EDGE_CASCADE).unwrap();
        assert_eq!(cascade.window_size(), (4, 4));
        assert_eq!(cascade.stage_count(), 1);
        assert_eq!(cascade.features.len(), 1);
        assert_eq!(cascade.features[0].rects.len(), 2);
    }

    #[test]
    fn rejects_tilted_features() {
        let xml = EDGE_CASCADE.replace("</rects></_>", "</rects><tilted>1</tilted></_>");
        assert!(HaarCascade::parse(&xml).unwrap_err().contains("tilted"));
    }

    #[test]
    fn rejects_lbp_cascades() {
        let xml = EDGE_CASCADE.replace("<featureType>HAAR", "<featureType>LBP");
        assert!(HaarCascade::parse(&xml).is_err());
    }

    #[test]
    fn rejects_dangling_feature_index() {
        let xml = EDGE_CASCADE.replace("0 -1 0 0.", "0 -1 3 0.");
        assert!(HaarCascade::parse(&xml).unwrap_err().contains("out of range"));
    }

    #[test]
    fn rejects_leaf_link_beyond_i32() {
        let xml = EDGE_CASCADE.replace("0 -1 0 0.", "-2147483648 -1 0 0.");
        assert!(HaarCascade::parse(&xml).unwrap_err().contains("link"));
    }

    #[test]
    fn rejects_dangling_leaf_index() {
        let xml = EDGE_CASCADE.replace("0 -1 0 0.", "0 -5 0 0.");
        assert!(HaarCascade::parse(&xml).is_err());
    }

    #[test]
    fn rejects_rect_whose_extent_overflows() {
        let xml = EDGE_CASCADE.replace("2 0 2 4 2.", "4000000000 0 4000000000 4 2.");
        assert!(HaarCascade::parse(&xml).unwrap_err().contains("exceeds"));

        let xml = EDGE_CASCADE.replace("2 0 2 4 2.", "4294967295 0 2 4 2.");
        assert!(HaarCascade::parse(&xml).is_err());
    }

    #[test]
    fn rejects_negative_or_fractional_rect_values() {
        for rect in ["-1 0 2 4 2.", "2 0 1.5 4 2.", "2 0 0 4 2.", "2 0 nan 4 2."] {
            let xml = EDGE_CASCADE.replace("2 0 2 4 2.", rect);
            assert!(HaarCascade::parse(&xml).is_err(), "accepted {rect}");
        }
    }

    #[test]
    fn corrupt_cascade_file_is_a_load_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let xml = EDGE_CASCADE.replace("2 0 2 4 2.", "4000000000 0 4000000000 4 2.");
        std::io::Write::write_all(&mut file, xml.as_bytes()).unwrap();
        let err = HaarCascade::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ModelLoadError::Cascade { .. }));
    }

    #[test]
    fn missing_file_is_reported() {
        let err = HaarCascade::from_file(Path::new("/nonexistent/cascade.xml")).unwrap_err();
        assert!(matches!(err, ModelLoadError::Missing(_)));
    }

    #[test]
    fn uniform_image_has_no_hits() {
        let cascade = HaarCascade::parse(EDGE_CASCADE).unwrap();
        let img = GrayImage::from_pixel(64, 32, Luma([128]));
        assert!(cascade.detect_multi_scale(&img, 1.1, 0, (0, 0)).is_empty());
    }

    #[test]
    fn fires_on_dark_to_bright_edge() {
        let cascade = HaarCascade::parse(EDGE_CASCADE).unwrap();
        // A huge factor restricts detection to the base scale
        let hits = cascade.detect_multi_scale(&split_image(true), 100.0, 0, (0, 0));

        assert_eq!(hits.len(), 8);
        for hit in &hits {
            assert_eq!((hit.x, hit.width, hit.height), (18, 4, 4));
        }
    }

    #[test]
    fn ignores_bright_to_dark_edge() {
        let cascade = HaarCascade::parse(EDGE_CASCADE).unwrap();
        let hits = cascade.detect_multi_scale(&split_image(false), 100.0, 0, (0, 0));
        assert!(hits.is_empty());
    }

    #[test]
    fn grouping_merges_neighbours_and_drops_loners() {
        let rects = vec![
            Region::new(100, 50, 80, 20),
            Region::new(102, 51, 80, 20),
            Region::new(98, 49, 82, 20),
            Region::new(10, 10, 30, 10),
        ];
        let grouped = group_rectangles(&rects, 2);
        assert_eq!(grouped, vec![Region::new(100, 50, 81, 20)]);
    }

    #[test]
    fn grouping_removes_nested_weak_cluster() {
        let mut rects = vec![Region::new(0, 0, 100, 40); 6];
        rects.extend(vec![Region::new(10, 5, 40, 20); 2]);
        let grouped = group_rectangles(&rects, 1);
        assert_eq!(grouped, vec![Region::new(0, 0, 100, 40)]);
    }

    #[test]
    fn isolated_hits_do_not_survive_grouping() {
        let cascade = HaarCascade::parse(EDGE_CASCADE).unwrap();
        let hits = cascade.detect_multi_scale(&split_image(true), 100.0, 3, (0, 0));
        assert!(hits.is_empty());
    }
}
