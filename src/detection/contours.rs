use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use crate::detection::preprocessing;
use crate::models::Contour;

/// Trace the outer contours of foreground (dark) regions in a binary mask
pub fn find_character_contours(mask: &GrayImage) -> Vec<Contour> {
    // imageproc traces non-zero pixels, so strokes must become bright
    let strokes = preprocessing::invert(mask);

    find_contours::<u32>(&strokes)
        .into_iter()
        .filter(|c| matches!(c.border_type, BorderType::Outer))
        .filter_map(|c| Contour::from_points(&c.points))
        .collect()
}

/// Largest `limit` contours by enclosed area. Ties keep trace order.
pub fn largest_by_area(mut contours: Vec<Contour>, limit: usize) -> Vec<Contour> {
    contours.sort_by(|a, b| b.area.total_cmp(&a.area));
    contours.truncate(limit);
    contours
}
