use std::collections::BTreeSet;
use crate::models::PlateReading;

/// Join classified characters in glyph order. Readings shorter than
/// `min_length` are kept but flagged invalid.
pub fn assemble(chars: &[char], min_length: usize) -> PlateReading {
    let text: String = chars.iter().collect();
    let valid = text.chars().count() >= min_length;
    PlateReading { text, valid }
}

/// Distinct valid readings, sorted
pub fn collect<'a>(readings: impl IntoIterator<Item = &'a PlateReading>) -> BTreeSet<String> {
    readings
        .into_iter()
        .filter(|r| r.valid)
        .map(|r| r.text.clone())
        .collect()
}
