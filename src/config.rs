//! Tunable constants of the recognition pipeline.
//!
//! Every section falls back to its defaults when omitted from the TOML file,
//! so a config only needs to name what it changes:
//!
//! ```toml
//! [models]
//! dir = "/opt/platescan/models"
//!
//! [localizer]
//! selection = "all"
//! scale_factors = [1.05, 1.1, 1.15, 1.2, 1.25, 1.3]
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub models: ModelPaths,
    pub vehicle: VehicleConfig,
    pub localizer: LocalizerConfig,
    pub segmenter: SegmenterConfig,
    pub classifier: ClassifierConfig,
    pub assembler: AssemblerConfig,
}

/// Locations of the three model artifacts. Relative file names are resolved
/// against `dir`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelPaths {
    pub dir: PathBuf,
    /// Vehicle pre-filter model; `None` disables loading it entirely
    pub vehicle: Option<PathBuf>,
    /// OpenCV Haar cascade XML for plate proposals
    pub cascade: PathBuf,
    /// 36-class character model
    pub characters: PathBuf,
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("models"),
            vehicle: Some(PathBuf::from("auto_detect_model.rten")),
            cascade: PathBuf::from("indian_license_plate.xml"),
            characters: PathBuf::from("plate_detect_model.rten"),
        }
    }
}

impl ModelPaths {
    pub fn resolve(&self, file: &Path) -> PathBuf {
        self.dir.join(file)
    }

    pub fn vehicle_path(&self) -> Option<PathBuf> {
        self.vehicle.as_deref().map(|file| self.resolve(file))
    }

    pub fn cascade_path(&self) -> PathBuf {
        self.resolve(&self.cascade)
    }

    pub fn characters_path(&self) -> PathBuf {
        self.resolve(&self.characters)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleConfig {
    pub enabled: bool,
    /// Square input edge expected by the model
    pub input_size: u32,
    pub threshold: f32,
    /// The trained model scores the non-vehicle class, so a vehicle is a
    /// score below the threshold.
    pub vehicle_below_threshold: bool,
    pub layout: TensorLayout,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            input_size: 224,
            threshold: 0.5,
            vehicle_below_threshold: true,
            layout: TensorLayout::Nhwc,
        }
    }
}

/// How surviving plate candidates are turned into crops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    /// Widest accepted rectangle only, widened by `expansion`
    Best,
    /// Every accepted rectangle, segmented independently
    All,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalizerConfig {
    /// Resize the input to this height before detection
    pub canonical_height: Option<u32>,
    pub scale_factors: Vec<f32>,
    pub min_neighbors: u32,
    /// Smallest detector window, in source pixels
    pub min_size: (u32, u32),
    pub min_aspect_ratio: f32,
    pub max_aspect_ratio: f32,
    pub selection: SelectionMode,
    /// Horizontal widening of the best plate, as a fraction of its width
    pub expansion: f32,
}

impl Default for LocalizerConfig {
    fn default() -> Self {
        Self {
            canonical_height: None,
            scale_factors: vec![1.2],
            min_neighbors: 7,
            min_size: (0, 0),
            min_aspect_ratio: 2.0,
            max_aspect_ratio: 8.0,
            selection: SelectionMode::Best,
            expansion: 0.5,
        }
    }
}

impl LocalizerConfig {
    /// Scale factors 1.05 through 1.30 in steps of 0.05
    pub fn multi_scale_factors() -> Vec<f32> {
        (0..6).map(|i| 1.05 + 0.05 * i as f32).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    pub plate_width: u32,
    pub plate_height: u32,
    /// Upper bound applied to the Otsu level
    pub binary_cutoff: u8,
    pub morph_radius: u8,
    /// Strip forced to background on every edge of the plate
    pub border: u32,
    pub max_contours: usize,
    /// Absolute width floor; only binds when `min_width_ratio` is set below
    /// `min_char_width_px / plate_width`
    pub min_char_width_px: u32,
    /// Character width bounds as fractions of `plate_width`
    pub min_width_ratio: f32,
    pub max_width_ratio: f32,
    /// Character height bounds as fractions of `plate_height`
    pub min_height_ratio: f32,
    pub max_height_ratio: f32,
    pub glyph_width: u32,
    pub glyph_height: u32,
    pub interior_width: u32,
    pub interior_height: u32,
    pub max_glyphs: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            plate_width: 333,
            plate_height: 75,
            binary_cutoff: 200,
            morph_radius: 1,
            border: 3,
            max_contours: 15,
            min_char_width_px: 6,
            min_width_ratio: 0.0375,
            max_width_ratio: 0.1125,
            min_height_ratio: 0.444,
            max_height_ratio: 0.95,
            glyph_width: 24,
            glyph_height: 44,
            interior_width: 20,
            interior_height: 40,
            max_glyphs: 10,
        }
    }
}

impl SegmenterConfig {
    /// Accepted `(min, max)` character width in canonical plate pixels
    pub fn width_bounds(&self) -> (f32, f32) {
        let w = self.plate_width as f32;
        (w * self.min_width_ratio, w * self.max_width_ratio)
    }

    /// Accepted `(min, max)` character height in canonical plate pixels
    pub fn height_bounds(&self) -> (f32, f32) {
        let h = self.plate_height as f32;
        (h * self.min_height_ratio, h * self.max_height_ratio)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    Nhwc,
    Nchw,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub input_size: u32,
    /// 1 for grayscale models, 3 for models trained on replicated RGB
    pub channels: u32,
    pub layout: TensorLayout,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            input_size: 28,
            channels: 1,
            layout: TensorLayout::Nhwc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerConfig {
    pub min_length: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self { min_length: 7 }
    }
}

impl PipelineConfig {
    /// Load and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let loc = &self.localizer;
        if loc.scale_factors.is_empty() {
            return invalid("localizer.scale_factors must not be empty");
        }
        if loc.scale_factors.iter().any(|&s| !(s > 1.0)) {
            return invalid("localizer.scale_factors must all be greater than 1.0");
        }
        if !(loc.min_aspect_ratio > 0.0 && loc.min_aspect_ratio <= loc.max_aspect_ratio) {
            return invalid("localizer aspect ratio band must satisfy 0 < min <= max");
        }
        if loc.expansion < 0.0 {
            return invalid("localizer.expansion must not be negative");
        }
        if loc.canonical_height == Some(0) {
            return invalid("localizer.canonical_height must be positive");
        }

        let seg = &self.segmenter;
        if seg.plate_width == 0 || seg.plate_height == 0 {
            return invalid("segmenter plate size must be positive");
        }
        if 2 * seg.border >= seg.plate_width.min(seg.plate_height) {
            return invalid("segmenter.border leaves no plate interior");
        }
        if seg.interior_width == 0 || seg.interior_height == 0 {
            return invalid("segmenter glyph interior must be positive");
        }
        if seg.interior_width > seg.glyph_width || seg.interior_height > seg.glyph_height {
            return invalid("segmenter glyph interior must fit inside the glyph canvas");
        }
        if seg.min_width_ratio > seg.max_width_ratio || seg.min_height_ratio > seg.max_height_ratio {
            return invalid("segmenter size ratios must satisfy min <= max");
        }

        if self.classifier.input_size == 0 {
            return invalid("classifier.input_size must be positive");
        }
        if !matches!(self.classifier.channels, 1 | 3) {
            return invalid("classifier.channels must be 1 or 3");
        }
        if self.vehicle.input_size == 0 {
            return invalid("vehicle.input_size must be positive");
        }

        Ok(())
    }
}

fn invalid(message: &str) -> Result<(), ConfigError> {
    Err(ConfigError::Invalid(message.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = PipelineConfig::from_toml(
            r#"
            [localizer]
            selection = "all"
            min_aspect_ratio = 2.5

            [assembler]
            min_length = 6
            "#,
        )
        .unwrap();

        assert_eq!(config.localizer.selection, SelectionMode::All);
        assert_eq!(config.localizer.min_aspect_ratio, 2.5);
        assert_eq!(config.localizer.max_aspect_ratio, 8.0);
        assert_eq!(config.assembler.min_length, 6);
        assert_eq!(config.segmenter, SegmenterConfig::default());
    }

    #[test]
    fn rejects_inverted_ratio_band() {
        let mut config = PipelineConfig::default();
        config.localizer.min_aspect_ratio = 9.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_interior_larger_than_canvas() {
        let mut config = PipelineConfig::default();
        config.segmenter.interior_width = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unit_scale_factor() {
        let mut config = PipelineConfig::default();
        config.localizer.scale_factors = vec![1.0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn multi_scale_preset() {
        let factors = LocalizerConfig::multi_scale_factors();
        assert_eq!(factors.len(), 6);
        assert!((factors[0] - 1.05).abs() < 1e-6);
        assert!((factors[5] - 1.30).abs() < 1e-6);
    }

    #[test]
    fn model_paths_resolve_against_dir() {
        let paths = ModelPaths {
            dir: PathBuf::from("/opt/models"),
            ..ModelPaths::default()
        };
        assert_eq!(
            paths.cascade_path(),
            PathBuf::from("/opt/models/indian_license_plate.xml")
        );
        assert_eq!(
            paths.vehicle_path(),
            Some(PathBuf::from("/opt/models/auto_detect_model.rten"))
        );
    }

    #[test]
    fn default_height_floor_is_a_tenth_of_plate_width() {
        let (min_h, max_h) = SegmenterConfig::default().height_bounds();
        assert!((min_h - 33.3).abs() < 1e-3);
        assert!((max_h - 71.25).abs() < 1e-3);
    }

    #[test]
    fn default_width_bounds_match_tuned_pixels() {
        let (min_w, max_w) = SegmenterConfig::default().width_bounds();
        assert!((min_w - 12.4875).abs() < 1e-3);
        assert!((max_w - 37.4625).abs() < 1e-3);
    }
}
