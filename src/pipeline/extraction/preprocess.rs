//! Image preprocessing ahead of OCR.
//!
//! Phone photos and flatbed scans of lab reports share the same problems:
//! rotated EXIF frames, colour noise, text too small for the recogniser, or
//! huge camera frames that only slow it down. Every input goes through the
//! same steps: orientation fix, grayscale, rescale, Otsu binarisation, PNG.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageOutputFormat, Luma, RgbImage};
use tracing::{debug, warn};

use super::ExtractionError;

/// Images narrower than this are upscaled before OCR.
const MIN_OCR_WIDTH: u32 = 1000;

/// Upscale factor for narrow images.
const UPSCALE_FACTOR: f32 = 1.5;

/// Wider images are downscaled to this width.
const MAX_OCR_WIDTH: u32 = 2500;

/// Refuse to decode anything larger than this (decompression bombs).
const MAX_PIXELS: u64 = 60_000_000;

/// Prepare an uploaded image for the OCR engine.
///
/// Returns PNG bytes of the binarised page. Undecodable input is handed to
/// the engine unchanged; only a frame above the pixel cap is an error.
pub fn preprocess_for_ocr(bytes: &[u8]) -> Result<Vec<u8>, ExtractionError> {
    if let Some((w, h)) = probe_dimensions(bytes) {
        check_pixel_budget(w, h)?;
    }

    let img = match image::load_from_memory(bytes) {
        Ok(img) => img,
        Err(e) => {
            warn!(error = %e, "Image decode failed, sending raw bytes to OCR");
            return Ok(bytes.to_vec());
        }
    };

    let img = apply_orientation(img, read_exif_orientation(bytes));
    let gray = rgb_to_gray(&img.to_rgb8());

    let (w, h) = (gray.width(), gray.height());
    // Rotation can turn a wide frame into a narrow one that gets upscaled
    check_pixel_budget(w, h)?;
    let (new_w, new_h) = scaled_dimensions(w, h);
    let gray = if (new_w, new_h) == (w, h) {
        gray
    } else {
        debug!(
            from = format!("{w}x{h}"),
            to = format!("{new_w}x{new_h}"),
            "Rescaling image for OCR"
        );
        image::imageops::resize(&gray, new_w, new_h, FilterType::Triangle)
    };

    let threshold = otsu_threshold(&gray);
    let binary = binarize(&gray, threshold);
    debug!(threshold, width = new_w, height = new_h, "Image binarised");

    encode_png(binary)
}

/// Both the decoded frame and its rescaled size must fit `MAX_PIXELS`.
fn check_pixel_budget(width: u32, height: u32) -> Result<(), ExtractionError> {
    let (new_w, new_h) = scaled_dimensions(width, height);
    let pixels = (u64::from(width) * u64::from(height)).max(u64::from(new_w) * u64::from(new_h));
    if pixels > MAX_PIXELS {
        return Err(ExtractionError::ImageProcessing(format!(
            "image is {width}x{height} ({new_w}x{new_h} for OCR), above the {MAX_PIXELS} pixel limit"
        )));
    }
    Ok(())
}

fn probe_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    image::io::Reader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// Target size for OCR: small images grow by half, very wide ones shrink to
/// the maximum width. Aspect ratio is preserved.
pub fn scaled_dimensions(width: u32, height: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width.max(1), height.max(1));
    }
    let scale = if width < MIN_OCR_WIDTH {
        UPSCALE_FACTOR
    } else if width > MAX_OCR_WIDTH {
        MAX_OCR_WIDTH as f32 / width as f32
    } else {
        return (width, height);
    };
    let new_w = ((width as f32 * scale).round() as u32).max(1);
    let new_h = ((height as f32 * scale).round() as u32).max(1);
    (new_w, new_h)
}

/// Read EXIF orientation tag from raw image bytes.
/// Returns 1 (normal) if no EXIF data or tag not present.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(r) => r,
        Err(_) => return 1,
    };

    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1)
}

/// Apply EXIF orientation transform to a `DynamicImage`.
pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// ITU-R BT.601 luminance.
pub fn rgb_to_gray(rgb: &RgbImage) -> GrayImage {
    let mut gray = GrayImage::new(rgb.width(), rgb.height());
    for (x, y, p) in rgb.enumerate_pixels() {
        let luma = (0.299 * p.0[0] as f32 + 0.587 * p.0[1] as f32 + 0.114 * p.0[2] as f32) as u8;
        gray.put_pixel(x, y, Luma([luma]));
    }
    gray
}

/// Otsu's method: the threshold maximising between-class variance of the
/// grayscale histogram.
pub fn otsu_threshold(img: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for p in img.pixels() {
        histogram[p.0[0] as usize] += 1;
    }

    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return 127;
    }
    let weighted_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(level, &count)| level as f64 * count as f64)
        .sum();

    let mut background_weight = 0u64;
    let mut background_sum = 0f64;
    let mut best_threshold = 0u8;
    let mut best_variance = -1f64;

    for (level, &count) in histogram.iter().enumerate() {
        background_weight += count;
        if background_weight == 0 {
            continue;
        }
        let foreground_weight = total - background_weight;
        if foreground_weight == 0 {
            break;
        }
        background_sum += level as f64 * count as f64;

        let mean_bg = background_sum / background_weight as f64;
        let mean_fg = (weighted_total - background_sum) / foreground_weight as f64;
        let variance =
            background_weight as f64 * foreground_weight as f64 * (mean_bg - mean_fg).powi(2);

        if variance > best_variance {
            best_variance = variance;
            best_threshold = level as u8;
        }
    }
    best_threshold
}

/// Pixels above `threshold` become white, the rest black.
pub fn binarize(img: &GrayImage, threshold: u8) -> GrayImage {
    let mut out = img.clone();
    for p in out.pixels_mut() {
        p.0[0] = if p.0[0] > threshold { 255 } else { 0 };
    }
    out
}

/// Encode a grayscale image as PNG bytes.
pub fn encode_png(img: GrayImage) -> Result<Vec<u8>, ExtractionError> {
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(img)
        .write_to(&mut cursor, ImageOutputFormat::Png)
        .map_err(|e| ExtractionError::ImageProcessing(format!("PNG encoding failed: {e}")))?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{GenericImageView, Rgb};

    /// PNG with a dark block on a light background.
    pub(crate) fn make_test_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            if x < width / 2 && y < height / 2 {
                Rgb([20, 20, 20])
            } else {
                Rgb([230, 230, 230])
            }
        });
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut cursor, ImageOutputFormat::Png)
            .unwrap();
        cursor.into_inner()
    }

    #[test]
    fn narrow_image_upscaled() {
        assert_eq!(scaled_dimensions(800, 600), (1200, 900));
    }

    #[test]
    fn wide_image_downscaled() {
        assert_eq!(scaled_dimensions(5000, 4000), (2500, 2000));
    }

    #[test]
    fn mid_width_unchanged() {
        assert_eq!(scaled_dimensions(1000, 1400), (1000, 1400));
        assert_eq!(scaled_dimensions(2500, 3500), (2500, 3500));
    }

    #[test]
    fn pixel_budget_counts_upscaled_size() {
        // 40M pixels as uploaded, 90M after the narrow-image upscale
        assert!(check_pixel_budget(999, 40_000).is_err());
        assert!(check_pixel_budget(40_000, 999).is_ok());
        assert!(check_pixel_budget(2000, 3000).is_ok());
        assert!(check_pixel_budget(10_000, 10_000).is_err());
    }

    #[test]
    fn zero_dimensions_clamped() {
        assert_eq!(scaled_dimensions(0, 0), (1, 1));
    }

    #[test]
    fn otsu_separates_two_levels() {
        let img = GrayImage::from_fn(10, 10, |x, _| if x < 5 { Luma([30]) } else { Luma([200]) });
        let t = otsu_threshold(&img);
        assert!((30..200).contains(&t), "threshold {t} should split the levels");

        let bin = binarize(&img, t);
        assert_eq!(bin.get_pixel(0, 0).0[0], 0);
        assert_eq!(bin.get_pixel(9, 0).0[0], 255);
    }

    #[test]
    fn otsu_uniform_image() {
        let img = GrayImage::from_pixel(4, 4, Luma([128]));
        let _ = otsu_threshold(&img);
        let empty = GrayImage::new(0, 0);
        assert_eq!(otsu_threshold(&empty), 127);
    }

    #[test]
    fn gray_conversion_weights() {
        let rgb = RgbImage::from_pixel(1, 1, Rgb([255, 255, 255]));
        assert!(rgb_to_gray(&rgb).get_pixel(0, 0).0[0] >= 254);
        let rgb = RgbImage::from_pixel(1, 1, Rgb([0, 0, 0]));
        assert_eq!(rgb_to_gray(&rgb).get_pixel(0, 0).0[0], 0);
    }

    #[test]
    fn preprocess_produces_binary_png() {
        let png = make_test_png(400, 300);
        let out = preprocess_for_ocr(&png).unwrap();

        let decoded = image::load_from_memory(&out).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (600, 450));
        for p in decoded.pixels() {
            assert!(p.0[0] == 0 || p.0[0] == 255, "pixel not binary: {:?}", p);
        }
    }

    #[test]
    fn undecodable_bytes_passed_through() {
        let raw = b"definitely not an image".to_vec();
        assert_eq!(preprocess_for_ocr(&raw).unwrap(), raw);
    }

    #[test]
    fn exif_no_data_returns_identity() {
        let png = make_test_png(10, 10);
        assert_eq!(read_exif_orientation(&png), 1);
    }

    #[test]
    fn apply_orientation_rotate90() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(100, 50));
        let result = apply_orientation(img, 6);
        assert_eq!((result.width(), result.height()), (50, 100));
    }

    #[test]
    fn apply_orientation_unknown_is_identity() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(100, 50));
        let result = apply_orientation(img, 99);
        assert_eq!((result.width(), result.height()), (100, 50));
    }
}
