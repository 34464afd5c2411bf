//! Image stages of the recognizer: localization, segmentation and
//! character classification.

pub mod preprocessing;
pub mod contours;
pub mod cascade;
pub mod inference;
pub mod localizer;
pub mod segmenter;
pub mod classifier;
pub mod vehicle;
pub mod assembler;

pub use assembler::{assemble, collect};
pub use cascade::HaarCascade;
pub use classifier::{classify_character, CharacterClassifier, RtenCharacterClassifier};
pub use localizer::{detect_plate, CascadeProposer, PlateProposer};
pub use segmenter::{segment_characters, Segmentation};
pub use vehicle::{is_vehicle, RtenVehicleFilter, VehicleFilter};
