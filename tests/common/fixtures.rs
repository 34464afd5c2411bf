use image::{DynamicImage, GrayImage, ImageFormat, Rgb, RgbImage};
use platescan::config::PipelineConfig;
use platescan::detection::{CharacterClassifier, PlateProposer, VehicleFilter};
use platescan::models::{Glyph, CLASS_LABELS};
use platescan::{Models, RecognitionError, Recognizer, Region};
use std::io::Cursor;

pub const SCENE_WIDTH: u32 = 400;
pub const SCENE_HEIGHT: u32 = 300;

/// Plate drawn by `scene_with_plates`: `'1'` is a narrow block, `'8'` a wide one
pub const PLATE_TEXT: &str = "1181888";

const NARROW_BLOCK: u32 = 13;
const WIDE_BLOCK: u32 = 18;

/// Proposer that always returns the same rectangles
pub struct FixedProposer(pub Vec<Region>);

impl PlateProposer for FixedProposer {
    fn propose(&self, _gray: &GrayImage, _scale_factor: f32) -> Vec<Region> {
        self.0.clone()
    }
}

/// Reads the stroke width across the middle row of a glyph: narrow glyphs
/// keep their width inside the canvas, wide ones fill the interior.
pub struct StrokeWidthClassifier;

impl CharacterClassifier for StrokeWidthClassifier {
    fn classify(&self, glyph: &Glyph) -> Result<usize, RecognitionError> {
        let row = glyph.image.height() / 2;
        let lit = (0..glyph.image.width())
            .filter(|&x| glyph.image.get_pixel(x, row)[0] > 127)
            .count();
        let ch = match lit {
            0 => return Err(RecognitionError::Inference("blank glyph".into())),
            1..=17 => '1',
            _ => '8',
        };
        Ok(CLASS_LABELS.iter().position(|&c| c == ch).unwrap())
    }
}

pub struct FixedVehicleScore(pub f32);

impl VehicleFilter for FixedVehicleScore {
    fn score(&self, _image: &DynamicImage) -> Result<f32, RecognitionError> {
        Ok(self.0)
    }
}

/// White scene with one dark block per character of `text` inside each
/// 200x50 plate rectangle. Blocks are 36 tall and start 26 apart.
pub fn scene_with_plates(plates: &[(u32, u32)], text: &str) -> DynamicImage {
    let mut scene = RgbImage::from_pixel(SCENE_WIDTH, SCENE_HEIGHT, Rgb([255, 255, 255]));
    for &(px, py) in plates {
        for (i, ch) in text.chars().enumerate() {
            let width = if ch == '1' { NARROW_BLOCK } else { WIDE_BLOCK };
            let x0 = px + 10 + i as u32 * 26;
            for y in py + 7..py + 43 {
                for x in x0..x0 + width {
                    scene.put_pixel(x, y, Rgb([0, 0, 0]));
                }
            }
        }
    }
    DynamicImage::ImageRgb8(scene)
}

pub fn plate_region(px: u32, py: u32) -> Region {
    Region::new(px, py, 200, 50)
}

/// The crop best mode cuts for `plate_region(px, py)`: half the width added
/// around its center
pub fn expanded_plate_region(px: u32, py: u32) -> Region {
    Region::new(px - 50, py, 300, 50)
}

pub fn encode_png(image: &DynamicImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("Failed to encode test image");
    bytes
}

/// Defaults with the vehicle pre-filter off
pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.vehicle.enabled = false;
    config
}

pub fn recognizer_with(config: PipelineConfig, proposals: Vec<Region>) -> Recognizer {
    let models = Models {
        vehicle: None,
        proposer: Box::new(FixedProposer(proposals)),
        classifier: Box::new(StrokeWidthClassifier),
    };
    Recognizer::new(config, models)
}
