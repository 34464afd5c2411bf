pub mod config;
pub mod detection;
pub mod error;
pub mod models;
pub mod pipeline;

pub use config::PipelineConfig;
pub use error::{ConfigError, ModelLoadError, RecognitionError};
pub use models::{Glyph, PlateCrop, PlateReading, Region};
pub use pipeline::{DebugConfig, Models, PlateResult, Recognition, Recognizer};
