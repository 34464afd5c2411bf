use image::{DynamicImage, RgbImage};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use crate::config::PipelineConfig;
use crate::detection::{
    assembler, classifier, localizer, segmenter, vehicle, CascadeProposer, CharacterClassifier,
    PlateProposer, RtenCharacterClassifier, RtenVehicleFilter, VehicleFilter,
};
use crate::error::{ModelLoadError, RecognitionError, Result};
use crate::models::{PlateReading, Region};

/// Model handles shared by every recognition call
pub struct Models {
    pub vehicle: Option<Box<dyn VehicleFilter>>,
    pub proposer: Box<dyn PlateProposer>,
    pub classifier: Box<dyn CharacterClassifier>,
}

impl Models {
    /// Load every artifact named by the config. The vehicle model is skipped
    /// when the pre-filter is disabled or has no path.
    pub fn load(config: &PipelineConfig) -> std::result::Result<Self, ModelLoadError> {
        let vehicle = match config.models.vehicle_path() {
            Some(path) if config.vehicle.enabled => {
                info!(path = %path.display(), "loading vehicle model");
                Some(Box::new(RtenVehicleFilter::load(&path, &config.vehicle)?) as Box<dyn VehicleFilter>)
            }
            _ => None,
        };

        let cascade_path = config.models.cascade_path();
        info!(path = %cascade_path.display(), "loading plate cascade");
        let proposer = CascadeProposer::load(&cascade_path, &config.localizer)?;

        let characters_path = config.models.characters_path();
        info!(path = %characters_path.display(), "loading character model");
        let classifier = RtenCharacterClassifier::load(&characters_path, &config.classifier)?;

        Ok(Self {
            vehicle,
            proposer: Box::new(proposer),
            classifier: Box::new(classifier),
        })
    }
}

/// Where intermediate images are written, one numbered directory per stage
#[derive(Clone, Debug)]
pub struct DebugConfig {
    pub output_dir: PathBuf,
}

impl DebugConfig {
    /// The directory must be empty or non-existent
    pub fn new(output_dir: PathBuf) -> std::io::Result<Self> {
        if output_dir.exists() {
            if std::fs::read_dir(&output_dir)?.next().is_some() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    format!("Debug directory is not empty: {}", output_dir.display()),
                ));
            }
        } else {
            std::fs::create_dir_all(&output_dir)?;
        }
        Ok(Self { output_dir })
    }

    /// Nested dump location for one of several inputs
    pub fn child(&self, name: &str) -> Self {
        Self {
            output_dir: self.output_dir.join(name),
        }
    }

    /// Filename from lineage, e.g. `[1, 3]` gives "01-03.png"
    pub fn lineage_filename(lineage: &[usize], extension: &str) -> String {
        if lineage.is_empty() {
            format!("01.{}", extension)
        } else {
            let ids: Vec<String> = lineage.iter().map(|id| format!("{:02}", id)).collect();
            format!("{}.{}", ids.join("-"), extension)
        }
    }

    /// Write one debug image. Failures are logged, never returned.
    pub fn save(&self, stage: &str, lineage: &[usize], image: &DynamicImage) {
        let stage_dir = self.output_dir.join(stage);
        let filename = Self::lineage_filename(lineage, "png");
        let result = std::fs::create_dir_all(&stage_dir)
            .map_err(|e| e.to_string())
            .and_then(|_| image.save(stage_dir.join(&filename)).map_err(|e| e.to_string()));

        match result {
            Ok(()) => debug!("saved {}/{}", stage, filename),
            Err(e) => warn!(stage, file = %filename, error = %e, "failed to save debug image"),
        }
    }
}

const STAGE_INPUT: &str = "00_input";
const STAGE_LOCALIZATION: &str = "01_localization";
const STAGE_PLATES: &str = "02_plates";
const STAGE_BINARY: &str = "03_binary";
const STAGE_GLYPHS: &str = "04_glyphs";

/// What happened to one plate crop
#[derive(Debug, Clone, Serialize)]
pub struct PlateResult {
    pub region: Region,
    pub glyphs: usize,
    pub reading: PlateReading,
}

#[derive(Debug, Clone)]
pub struct Recognition {
    /// Distinct valid readings, sorted
    pub readings: BTreeSet<String>,
    pub plates: Vec<PlateResult>,
    /// Working image with candidate and selected rectangles drawn in
    pub annotated: RgbImage,
}

/// License plate recognizer: decode, pre-filter, localize, segment, classify.
///
/// Holds only immutable model handles, so one instance can be shared across
/// threads.
pub struct Recognizer {
    config: PipelineConfig,
    models: Models,
    debug: Option<DebugConfig>,
}

impl Recognizer {
    pub fn new(config: PipelineConfig, models: Models) -> Self {
        Self {
            config,
            models,
            debug: None,
        }
    }

    pub fn from_config(config: PipelineConfig) -> std::result::Result<Self, ModelLoadError> {
        config.validate()?;
        let models = Models::load(&config)?;
        Ok(Self::new(config, models))
    }

    /// Enable debug dumps into `output_dir`, which must be empty or absent
    pub fn with_debug(mut self, output_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        self.debug = Some(DebugConfig::new(output_dir.as_ref().to_path_buf())?);
        Ok(self)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn debug(&self) -> Option<&DebugConfig> {
        self.debug.as_ref()
    }

    /// Recognize plates in encoded image bytes; the format is guessed from
    /// the content.
    pub fn recognize_plate(&self, bytes: &[u8]) -> Result<Recognition> {
        let image = image::load_from_memory(bytes)?;
        self.recognize_image(&image)
    }

    pub fn recognize_image(&self, image: &DynamicImage) -> Result<Recognition> {
        self.run(image, self.debug.as_ref())
    }

    /// Like [`Recognizer::recognize_image`] but dumping into `debug`
    /// instead of the recognizer's own debug directory.
    pub fn recognize_image_with_debug(
        &self,
        image: &DynamicImage,
        debug: &DebugConfig,
    ) -> Result<Recognition> {
        self.run(image, Some(debug))
    }

    fn run(&self, image: &DynamicImage, debug: Option<&DebugConfig>) -> Result<Recognition> {
        if let Some(d) = debug {
            d.save(STAGE_INPUT, &[], image);
        }

        if image.width() == 0 || image.height() == 0 {
            return Err(RecognitionError::Decode("image has no pixels".into()));
        }

        if let Some(filter) = self.models.vehicle.as_deref() {
            if self.config.vehicle.enabled {
                let (is_vehicle, score) = vehicle::is_vehicle(filter, image, &self.config.vehicle)?;
                if !is_vehicle {
                    return Err(RecognitionError::NoVehicle { score });
                }
            }
        }

        let localization =
            localizer::detect_plate(image, self.models.proposer.as_ref(), &self.config.localizer);
        if let Some(d) = debug {
            d.save(STAGE_LOCALIZATION, &[], &DynamicImage::ImageRgb8(localization.annotated.clone()));
        }

        if localization.crops.is_empty() {
            info!(candidates = localization.raw_candidates, "no plate found");
            return Err(RecognitionError::NoPlateFound);
        }

        let mut plates = Vec::with_capacity(localization.crops.len());
        for (i, crop) in localization.crops.iter().enumerate() {
            let crop_id = i + 1;
            let segmentation = segmenter::segment_characters(&crop.image, &self.config.segmenter);

            if let Some(d) = debug {
                d.save(STAGE_PLATES, &[crop_id], &DynamicImage::ImageRgb8(crop.image.clone()));
                d.save(STAGE_BINARY, &[crop_id], &DynamicImage::ImageLuma8(segmentation.binary.clone()));
                for (j, glyph) in segmentation.glyphs.iter().enumerate() {
                    d.save(STAGE_GLYPHS, &[crop_id, j + 1], &DynamicImage::ImageLuma8(glyph.image.clone()));
                }
            }

            let chars = segmentation
                .glyphs
                .iter()
                .map(|glyph| classifier::classify_character(self.models.classifier.as_ref(), glyph))
                .collect::<Result<Vec<char>>>()?;

            let reading = assembler::assemble(&chars, self.config.assembler.min_length);
            debug!(
                crop = crop_id,
                glyphs = chars.len(),
                text = %reading.text,
                valid = reading.valid,
                "plate reading"
            );
            plates.push(PlateResult {
                region: crop.region,
                glyphs: chars.len(),
                reading,
            });
        }

        let readings = assembler::collect(plates.iter().map(|p| &p.reading));
        if readings.is_empty() {
            return Err(RecognitionError::NoValidReading {
                crops: localization.crops.len(),
            });
        }
        info!(readings = ?readings, "recognized plate");

        Ok(Recognition {
            readings,
            plates,
            annotated: localization.annotated,
        })
    }
}
