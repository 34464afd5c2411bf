use image::{GrayImage, RgbImage};
use imageproc::point::Point;
use imageproc::rect::Rect;
use serde::Serialize;

/// Classifier output index to character, digits first.
pub const CLASS_LABELS: [char; 36] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H',
    'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z',
];

pub fn class_label(index: usize) -> Option<char> {
    CLASS_LABELS.get(index).copied()
}

/// Axis-aligned candidate rectangle in working-image pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            return 0.0;
        }
        self.width as f32 / self.height as f32
    }

    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    /// Clip to an image of the given size; `None` if nothing is left
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Region> {
        let x = self.x.min(width);
        let y = self.y.min(height);
        let w = self.right().min(width) - x;
        let h = self.bottom().min(height) - y;
        if w == 0 || h == 0 {
            return None;
        }
        Some(Region::new(x, y, w, h))
    }

    pub fn to_rect(&self) -> Rect {
        Rect::at(self.x as i32, self.y as i32).of_size(self.width.max(1), self.height.max(1))
    }
}

/// Bounding box and enclosed area of one traced contour
#[derive(Debug, Clone, PartialEq)]
pub struct Contour {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
    pub area: f32,
}

impl Contour {
    /// Reduce a closed polyline to its bounding box and shoelace area.
    /// Returns `None` for an empty point list.
    pub fn from_points(points: &[Point<u32>]) -> Option<Self> {
        let first = points.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }

        let mut twice_area = 0.0f64;
        for (i, p) in points.iter().enumerate() {
            let q = &points[(i + 1) % points.len()];
            twice_area += p.x as f64 * q.y as f64 - q.x as f64 * p.y as f64;
        }

        Some(Self {
            min_x,
            min_y,
            max_x,
            max_y,
            area: (twice_area.abs() / 2.0) as f32,
        })
    }

    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    pub fn bounding_region(&self) -> Region {
        Region::new(self.min_x, self.min_y, self.width(), self.height())
    }
}

/// One normalized character image: bright stroke on a dark canvas.
#[derive(Debug, Clone)]
pub struct Glyph {
    pub image: GrayImage,
    /// Left edge of the source contour in the canonical plate crop
    pub x_offset: u32,
}

#[derive(Debug, Clone)]
pub struct PlateCrop {
    pub image: RgbImage,
    pub region: Region,
}

/// Output of the plate localizer
#[derive(Debug, Clone)]
pub struct Localization {
    /// Working image with every candidate drawn on it; diagnostics only
    pub annotated: RgbImage,
    pub raw_candidates: usize,
    pub crops: Vec<PlateCrop>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlateReading {
    pub text: String,
    pub valid: bool,
}
