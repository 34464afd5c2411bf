use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use std::path::Path;
use tracing::debug;
use crate::config::{LocalizerConfig, SelectionMode};
use crate::detection::cascade::HaarCascade;
use crate::detection::preprocessing;
use crate::error::ModelLoadError;
use crate::models::{Localization, PlateCrop, Region};

const CANDIDATE_COLOR: Rgb<u8> = Rgb([155, 181, 51]);
const SELECTED_COLOR: Rgb<u8> = Rgb([220, 40, 40]);

/// Source of raw plate rectangles for one detector scale factor
pub trait PlateProposer: Send + Sync {
    fn propose(&self, gray: &GrayImage, scale_factor: f32) -> Vec<Region>;
}

/// Plate proposals from a trained Haar cascade
pub struct CascadeProposer {
    cascade: HaarCascade,
    min_neighbors: u32,
    min_size: (u32, u32),
}

impl CascadeProposer {
    pub fn new(cascade: HaarCascade, config: &LocalizerConfig) -> Self {
        Self {
            cascade,
            min_neighbors: config.min_neighbors,
            min_size: config.min_size,
        }
    }

    pub fn load(path: &Path, config: &LocalizerConfig) -> Result<Self, ModelLoadError> {
        Ok(Self::new(HaarCascade::from_file(path)?, config))
    }
}

impl PlateProposer for CascadeProposer {
    fn propose(&self, gray: &GrayImage, scale_factor: f32) -> Vec<Region> {
        self.cascade
            .detect_multi_scale(gray, scale_factor, self.min_neighbors, self.min_size)
    }
}

/// Keep rectangles whose width/height lies in `[min_ratio, max_ratio]`
pub fn filter_by_aspect_ratio(candidates: &[Region], min_ratio: f32, max_ratio: f32) -> Vec<Region> {
    candidates
        .iter()
        .filter(|r| {
            let ratio = r.aspect_ratio();
            ratio >= min_ratio && ratio <= max_ratio
        })
        .copied()
        .collect()
}

/// Widest rectangle; the earliest one wins a tie
pub fn widest(candidates: &[Region]) -> Option<Region> {
    candidates.iter().fold(None, |best: Option<Region>, r| match best {
        Some(b) if b.width >= r.width => Some(b),
        _ => Some(*r),
    })
}

/// Widen a region about its center by `expansion` of its width, keeping it
/// inside an image `image_width` pixels wide.
pub fn expand_horizontally(region: Region, expansion: f32, image_width: u32) -> Region {
    let new_width = ((region.width as f32 * (1.0 + expansion)) as u32)
        .max(region.width)
        .min(image_width);
    let grow = new_width.saturating_sub(region.width) / 2;
    let new_x = region
        .x
        .saturating_sub(grow)
        .min(image_width - new_width);
    Region::new(new_x, region.y, new_width, region.height)
}

fn draw_candidate(canvas: &mut RgbImage, region: &Region, color: Rgb<u8>) {
    for inset in 0..3u32 {
        if region.width <= 2 * inset || region.height <= 2 * inset {
            break;
        }
        let inner = Region::new(
            region.x + inset,
            region.y + inset,
            region.width - 2 * inset,
            region.height - 2 * inset,
        );
        draw_hollow_rect_mut(canvas, inner.to_rect(), color);
    }
}

fn crop(working: &RgbImage, region: Region) -> PlateCrop {
    let image = image::imageops::crop_imm(working, region.x, region.y, region.width, region.height)
        .to_image();
    PlateCrop { image, region }
}

/// Find plate candidates in `image` and cut them out.
///
/// An empty crop list means no plate was found; it is not an error here.
pub fn detect_plate(
    image: &DynamicImage,
    proposer: &dyn PlateProposer,
    config: &LocalizerConfig,
) -> Localization {
    let working = match config.canonical_height {
        Some(height) => preprocessing::resize_to_height(image, height).to_rgb8(),
        None => image.to_rgb8(),
    };
    let (width, height) = working.dimensions();
    let gray = image::imageops::grayscale(&working);

    let mut raw = Vec::new();
    for &scale in &config.scale_factors {
        raw.extend(
            proposer
                .propose(&gray, scale)
                .into_iter()
                .filter_map(|r| r.clamp_to(width, height)),
        );
    }

    let accepted = filter_by_aspect_ratio(&raw, config.min_aspect_ratio, config.max_aspect_ratio);
    debug!(
        raw = raw.len(),
        accepted = accepted.len(),
        "plate candidates after aspect-ratio filter"
    );

    let selected: Vec<Region> = match config.selection {
        SelectionMode::Best => widest(&accepted)
            .map(|best| expand_horizontally(best, config.expansion, width))
            .into_iter()
            .collect(),
        SelectionMode::All => accepted,
    };

    let mut annotated = working.clone();
    for region in &raw {
        draw_candidate(&mut annotated, region, CANDIDATE_COLOR);
    }
    for region in &selected {
        draw_candidate(&mut annotated, region, SELECTED_COLOR);
    }

    let crops = selected.into_iter().map(|r| crop(&working, r)).collect();

    Localization {
        annotated,
        raw_candidates: raw.len(),
        crops,
    }
}
