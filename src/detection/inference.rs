//! Glue between images and `.rten` models.

use rten::Model;
use rten_tensor::prelude::*;
use rten_tensor::{NdTensor, Tensor};
use std::path::Path;
use crate::config::TensorLayout;
use crate::error::{ModelLoadError, RecognitionError};

pub fn load_model(path: &Path) -> Result<Model, ModelLoadError> {
    if !path.exists() {
        return Err(ModelLoadError::Missing(path.to_path_buf()));
    }
    Model::load_file(path).map_err(|err| ModelLoadError::Rten {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

/// Build a batch-of-one input tensor. `pixel(x, y, channel)` supplies each
/// value already normalized.
pub fn image_tensor(
    width: u32,
    height: u32,
    channels: u32,
    layout: TensorLayout,
    pixel: impl Fn(u32, u32, u32) -> f32,
) -> NdTensor<f32, 4> {
    let (w, h, c) = (width as usize, height as usize, channels as usize);
    let mut data = Vec::with_capacity(w * h * c);

    let shape = match layout {
        TensorLayout::Nhwc => {
            for y in 0..height {
                for x in 0..width {
                    for ch in 0..channels {
                        data.push(pixel(x, y, ch));
                    }
                }
            }
            [1, h, w, c]
        }
        TensorLayout::Nchw => {
            for ch in 0..channels {
                for y in 0..height {
                    for x in 0..width {
                        data.push(pixel(x, y, ch));
                    }
                }
            }
            [1, c, h, w]
        }
    };

    NdTensor::from_data(shape, data)
}

/// Run a single-input model and flatten its first output
pub fn run_flat(model: &Model, input: NdTensor<f32, 4>) -> Result<Vec<f32>, RecognitionError> {
    let input: Tensor<f32> = input.into();
    let output = model
        .run_one(input.view().into(), None)
        .map_err(|err| RecognitionError::Inference(err.to_string()))?;

    let output: Tensor<f32> = output
        .try_into()
        .map_err(|_| RecognitionError::Inference("model output is not a float tensor".into()))?;
    Ok(output.to_vec())
}

/// Index of the highest score. The first maximum wins a tie; NaN never wins.
pub fn argmax(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if b >= score => {}
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_picks_first_maximum() {
        assert_eq!(argmax(&[0.1, 0.7, 0.2, 0.7]), Some(1));
        assert_eq!(argmax(&[f32::NAN, 0.3, 0.1]), Some(1));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn nhwc_interleaves_channels() {
        let t = image_tensor(2, 1, 3, TensorLayout::Nhwc, |x, _, c| (x * 10 + c) as f32);
        assert_eq!(t.shape(), [1, 1, 2, 3]);
        assert_eq!(t.to_vec(), vec![0.0, 1.0, 2.0, 10.0, 11.0, 12.0]);
    }

    #[test]
    fn nchw_groups_planes() {
        let t = image_tensor(2, 1, 3, TensorLayout::Nchw, |x, _, c| (x * 10 + c) as f32);
        assert_eq!(t.shape(), [1, 3, 1, 2]);
        assert_eq!(t.to_vec(), vec![0.0, 10.0, 1.0, 11.0, 2.0, 12.0]);
    }

    #[test]
    fn missing_model_file_is_reported() {
        let result = load_model(Path::new("/nonexistent/model.rten"));
        assert!(matches!(result, Err(ModelLoadError::Missing(_))));
    }
}
