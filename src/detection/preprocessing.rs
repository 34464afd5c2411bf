use image::{DynamicImage, GrayImage, Luma};
use image::imageops::FilterType;
use imageproc::contrast::otsu_level;
use imageproc::distance_transform::Norm;
use imageproc::morphology::{dilate, erode};

pub const FOREGROUND: u8 = 0;
pub const BACKGROUND: u8 = 255;

/// Resize to `target_height`, keeping the aspect ratio
pub fn resize_to_height(img: &DynamicImage, target_height: u32) -> DynamicImage {
    if img.height() == 0 || img.height() == target_height {
        return img.clone();
    }
    let ratio = target_height as f32 / img.height() as f32;
    let target_width = ((img.width() as f32 * ratio) as u32).max(1);
    img.resize_exact(target_width, target_height, FilterType::Triangle)
}

/// Global threshold: the Otsu level, capped at `cutoff`. Pixels brighter than
/// the level become background, the rest foreground.
pub fn binarize(gray: &GrayImage, cutoff: u8) -> (GrayImage, u8) {
    let level = otsu_level(gray).min(cutoff);
    let mask = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        if gray.get_pixel(x, y)[0] > level {
            Luma([BACKGROUND])
        } else {
            Luma([FOREGROUND])
        }
    });
    (mask, level)
}

/// Erode then dilate the background, closing pinholes in strokes and
/// removing isolated background specks.
pub fn remove_speckle(mask: &GrayImage, radius: u8) -> GrayImage {
    if radius == 0 {
        return mask.clone();
    }
    let eroded = erode(mask, Norm::LInf, radius);
    dilate(&eroded, Norm::LInf, radius)
}

/// Force a strip of `border` pixels on every edge to background
pub fn clear_border(mask: &mut GrayImage, border: u32) {
    let (width, height) = mask.dimensions();
    for (x, y, pixel) in mask.enumerate_pixels_mut() {
        if x < border || y < border || x + border >= width || y + border >= height {
            *pixel = Luma([BACKGROUND]);
        }
    }
}

/// Swap foreground and background
pub fn invert(mask: &GrayImage) -> GrayImage {
    let mut inverted = mask.clone();
    image::imageops::invert(&mut inverted);
    inverted
}
