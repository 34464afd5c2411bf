//! Error types for plate recognition

use std::path::PathBuf;
use thiserror::Error;

/// Per-image failures. None of these are fatal to the process.
#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("No vehicle detected in image (score {score:.3})")]
    NoVehicle { score: f32 },

    #[error("No license plate found in image")]
    NoPlateFound,

    #[error("No valid reading from {crops} plate candidate(s)")]
    NoValidReading { crops: usize },

    #[error("Inference error: {0}")]
    Inference(String),
}

impl RecognitionError {
    /// Negative results the caller should answer with "please retake the photo"
    /// rather than an internal error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NoVehicle { .. } | Self::NoPlateFound | Self::NoValidReading { .. }
        )
    }
}

impl From<image::ImageError> for RecognitionError {
    fn from(err: image::ImageError) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Startup failures while loading model artifacts.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("Model file not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("Failed to load model {}: {message}", path.display())]
    Rten { path: PathBuf, message: String },

    #[error("Invalid cascade {}: {message}", path.display())]
    Cascade { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("{0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, RecognitionError>;
