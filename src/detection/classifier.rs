use image::imageops::{self, FilterType};
use rten::Model;
use std::path::Path;
use tracing::trace;
use crate::config::ClassifierConfig;
use crate::detection::inference;
use crate::error::{ModelLoadError, RecognitionError};
use crate::models::{class_label, Glyph, CLASS_LABELS};

/// Maps one normalized glyph to a class index in `0..36`
pub trait CharacterClassifier: Send + Sync {
    fn classify(&self, glyph: &Glyph) -> Result<usize, RecognitionError>;
}

/// Classify and decode to a character in `0-9A-Z`
pub fn classify_character(
    classifier: &dyn CharacterClassifier,
    glyph: &Glyph,
) -> Result<char, RecognitionError> {
    let index = classifier.classify(glyph)?;
    class_label(index)
        .ok_or_else(|| RecognitionError::Inference(format!("class index {index} out of range")))
}

/// Character classifier backed by a 36-way softmax model
pub struct RtenCharacterClassifier {
    model: Model,
    config: ClassifierConfig,
}

impl RtenCharacterClassifier {
    pub fn new(model: Model, config: ClassifierConfig) -> Self {
        Self { model, config }
    }

    pub fn load(path: &Path, config: &ClassifierConfig) -> Result<Self, ModelLoadError> {
        Ok(Self::new(inference::load_model(path)?, config.clone()))
    }
}

/// Resize a glyph to the model input and scale it to `[0, 1]`, replicating
/// the gray value across every channel.
pub fn glyph_tensor(glyph: &Glyph, config: &ClassifierConfig) -> rten_tensor::NdTensor<f32, 4> {
    let size = config.input_size;
    let resized = imageops::resize(&glyph.image, size, size, FilterType::Triangle);
    inference::image_tensor(size, size, config.channels, config.layout, |x, y, _| {
        resized.get_pixel(x, y)[0] as f32 / 255.0
    })
}

impl CharacterClassifier for RtenCharacterClassifier {
    fn classify(&self, glyph: &Glyph) -> Result<usize, RecognitionError> {
        let scores = inference::run_flat(&self.model, glyph_tensor(glyph, &self.config))?;
        if scores.len() != CLASS_LABELS.len() {
            return Err(RecognitionError::Inference(format!(
                "expected {} class scores, got {}",
                CLASS_LABELS.len(),
                scores.len()
            )));
        }
        let index = inference::argmax(&scores)
            .ok_or_else(|| RecognitionError::Inference("no finite class score".into()))?;
        trace!(index, score = scores[index], "classified glyph");
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TensorLayout;
    use image::{GrayImage, Luma};
    use rten_tensor::prelude::*;

    struct Constant(usize);

    impl CharacterClassifier for Constant {
        fn classify(&self, _glyph: &Glyph) -> Result<usize, RecognitionError> {
            Ok(self.0)
        }
    }

    fn glyph(value: u8) -> Glyph {
        Glyph {
            image: GrayImage::from_pixel(24, 44, Luma([value])),
            x_offset: 0,
        }
    }

    #[test]
    fn class_indices_map_to_labels() {
        assert_eq!(classify_character(&Constant(0), &glyph(0)).ok(), Some('0'));
        assert_eq!(classify_character(&Constant(10), &glyph(0)).ok(), Some('A'));
        assert_eq!(classify_character(&Constant(35), &glyph(0)).ok(), Some('Z'));
    }

    #[test]
    fn out_of_range_index_is_an_inference_error() {
        let result = classify_character(&Constant(36), &glyph(0));
        assert!(matches!(result, Err(RecognitionError::Inference(_))));
    }

    #[test]
    fn single_channel_tensor_is_normalized() {
        let t = glyph_tensor(&glyph(255), &ClassifierConfig::default());
        assert_eq!(t.shape(), [1, 28, 28, 1]);
        assert!(t.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn three_channel_nchw_tensor() {
        let config = ClassifierConfig {
            channels: 3,
            layout: TensorLayout::Nchw,
            ..ClassifierConfig::default()
        };
        let t = glyph_tensor(&glyph(0), &config);
        assert_eq!(t.shape(), [1, 3, 28, 28]);
        assert!(t.iter().all(|&v| v == 0.0));
    }
}
