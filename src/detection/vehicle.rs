use image::imageops::FilterType;
use image::DynamicImage;
use rten::Model;
use std::path::Path;
use tracing::debug;
use crate::config::VehicleConfig;
use crate::detection::inference;
use crate::error::{ModelLoadError, RecognitionError};

/// Whole-image binary classifier run before plate localization
pub trait VehicleFilter: Send + Sync {
    /// Raw model score for the image
    fn score(&self, image: &DynamicImage) -> Result<f32, RecognitionError>;
}

/// Apply the configured threshold and polarity to a score
pub fn score_means_vehicle(score: f32, config: &VehicleConfig) -> bool {
    if config.vehicle_below_threshold {
        score < config.threshold
    } else {
        score >= config.threshold
    }
}

/// Score the image and decide whether it shows a vehicle
pub fn is_vehicle(
    filter: &dyn VehicleFilter,
    image: &DynamicImage,
    config: &VehicleConfig,
) -> Result<(bool, f32), RecognitionError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(RecognitionError::Decode("image has no pixels".into()));
    }
    let score = filter.score(image)?;
    let vehicle = score_means_vehicle(score, config);
    debug!(score, vehicle, "vehicle pre-filter");
    Ok((vehicle, score))
}

pub struct RtenVehicleFilter {
    model: Model,
    config: VehicleConfig,
}

impl RtenVehicleFilter {
    pub fn new(model: Model, config: VehicleConfig) -> Self {
        Self { model, config }
    }

    pub fn load(path: &Path, config: &VehicleConfig) -> Result<Self, ModelLoadError> {
        Ok(Self::new(inference::load_model(path)?, config.clone()))
    }
}

/// Square RGB input in `[0, 1]`
pub fn vehicle_tensor(image: &DynamicImage, config: &VehicleConfig) -> rten_tensor::NdTensor<f32, 4> {
    let size = config.input_size;
    let rgb = image.resize_exact(size, size, FilterType::Triangle).to_rgb8();
    inference::image_tensor(size, size, 3, config.layout, |x, y, c| {
        rgb.get_pixel(x, y)[c as usize] as f32 / 255.0
    })
}

impl VehicleFilter for RtenVehicleFilter {
    fn score(&self, image: &DynamicImage) -> Result<f32, RecognitionError> {
        let scores = inference::run_flat(&self.model, vehicle_tensor(image, &self.config))?;
        scores
            .first()
            .copied()
            .ok_or_else(|| RecognitionError::Inference("vehicle model returned no score".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rten_tensor::prelude::*;

    struct FixedScore(f32);

    impl VehicleFilter for FixedScore {
        fn score(&self, _image: &DynamicImage) -> Result<f32, RecognitionError> {
            Ok(self.0)
        }
    }

    #[test]
    fn low_score_is_a_vehicle_by_default() {
        let config = VehicleConfig::default();
        let image = DynamicImage::new_rgb8(10, 10);
        assert!(matches!(is_vehicle(&FixedScore(0.2), &image, &config), Ok((true, _))));
        assert!(matches!(is_vehicle(&FixedScore(0.5), &image, &config), Ok((false, _))));
    }

    #[test]
    fn polarity_can_be_flipped() {
        let config = VehicleConfig {
            vehicle_below_threshold: false,
            ..VehicleConfig::default()
        };
        assert!(score_means_vehicle(0.9, &config));
        assert!(!score_means_vehicle(0.1, &config));
    }

    #[test]
    fn empty_image_is_a_decode_error() {
        let image = DynamicImage::new_rgb8(0, 0);
        let result = is_vehicle(&FixedScore(0.0), &image, &VehicleConfig::default());
        assert!(matches!(result, Err(RecognitionError::Decode(_))));
    }

    #[test]
    fn tensor_has_model_input_shape() {
        let image = DynamicImage::new_rgb8(640, 480);
        let t = vehicle_tensor(&image, &VehicleConfig::default());
        assert_eq!(t.shape(), [1, 224, 224, 3]);
    }
}
