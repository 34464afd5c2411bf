use image::{GrayImage, Luma, RgbImage};
use image::imageops::{self, FilterType};
use tracing::debug;
use crate::config::SegmenterConfig;
use crate::detection::{contours, preprocessing};
use crate::models::{Glyph, Region};

/// Glyphs of one plate crop plus the mask they were cut from
#[derive(Debug, Clone)]
pub struct Segmentation {
    pub binary: GrayImage,
    pub glyphs: Vec<Glyph>,
}

/// Dual size filter: absolute minimum width plus width and height bands
/// proportional to the canonical plate size.
pub fn fits_character_size(width: u32, height: u32, config: &SegmenterConfig) -> bool {
    let (min_w, max_w) = config.width_bounds();
    let (min_h, max_h) = config.height_bounds();
    let (w, h) = (width as f32, height as f32);

    width >= config.min_char_width_px && w >= min_w && w < max_w && h > min_h && h < max_h
}

/// Cut `region` out of the mask and normalize it into a fixed-size glyph:
/// strokes bright, background and border zero.
pub fn normalize_glyph(mask: &GrayImage, region: Region, config: &SegmenterConfig) -> GrayImage {
    let (iw, ih) = (config.interior_width, config.interior_height);
    let character = imageops::crop_imm(mask, region.x, region.y, region.width, region.height)
        .to_image();

    let mut interior = if region.width < iw {
        // Narrow strokes such as "1" keep their width and are centered
        let scaled = imageops::resize(&character, region.width, ih, FilterType::Triangle);
        let mut padded = GrayImage::from_pixel(iw, ih, Luma([preprocessing::BACKGROUND]));
        let offset_x = (iw - region.width) / 2;
        imageops::overlay(&mut padded, &scaled, offset_x.into(), 0);
        padded
    } else {
        imageops::resize(&character, iw, ih, FilterType::Triangle)
    };
    imageops::invert(&mut interior);

    let mut glyph = GrayImage::new(config.glyph_width, config.glyph_height);
    let offset_x = (config.glyph_width - iw) / 2;
    let offset_y = (config.glyph_height - ih) / 2;
    imageops::overlay(&mut glyph, &interior, offset_x.into(), offset_y.into());
    glyph
}

/// Split a plate crop into character glyphs, ordered left to right.
///
/// A crop without plausible characters yields no glyphs.
pub fn segment_characters(plate: &RgbImage, config: &SegmenterConfig) -> Segmentation {
    let resized = imageops::resize(plate, config.plate_width, config.plate_height, FilterType::Triangle);
    let gray = imageops::grayscale(&resized);

    let (mask, level) = preprocessing::binarize(&gray, config.binary_cutoff);
    let mut mask = preprocessing::remove_speckle(&mask, config.morph_radius);
    preprocessing::clear_border(&mut mask, config.border);

    let all_contours = contours::find_character_contours(&mask);
    let total = all_contours.len();
    let ranked = contours::largest_by_area(all_contours, config.max_contours);

    let mut glyphs = Vec::new();
    for contour in ranked {
        let region = contour.bounding_region();
        if !fits_character_size(region.width, region.height, config) {
            continue;
        }
        glyphs.push(Glyph {
            image: normalize_glyph(&mask, region, config),
            x_offset: region.x,
        });
        if glyphs.len() >= config.max_glyphs {
            break;
        }
    }

    // Stable, so glyphs sharing an x keep their area rank
    glyphs.sort_by_key(|g| g.x_offset);

    debug!(threshold = level, contours = total, glyphs = glyphs.len(), "segmented plate");

    Segmentation { binary: mask, glyphs }
}
