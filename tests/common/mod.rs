mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from platescan for tests
pub use platescan::config::{PipelineConfig, SelectionMode};
pub use platescan::{Models, RecognitionError, Recognizer, Region};
