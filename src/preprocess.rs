//! Image preprocessing for OCR
//!
//! Optional enhancement chain applied to label photographs before
//! recognition: upscaling, contrast work, binarization, and noise filters.
//! Label photos have uneven lighting, so binarization uses a locally
//! adaptive threshold instead of a single global cutoff.
//!
//! Preprocessing is never fatal: any decode or processing error falls back
//! to the original bytes, since the engine applies its own internal
//! preprocessing and can usually cope with the raw image.

use anyhow::Result;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use imageproc::distance_transform::Norm;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tracing::{debug, warn};

use crate::error::ValidationError;
use crate::roi::BoundingBox;

/// Largest accepted upscale factor.
pub const MAX_UPSCALE: f32 = 3.0;

/// Damping applied to the local mean so borderline pixels classify as
/// foreground; dark text on a light label survives the cut.
const FOREGROUND_BIAS: f32 = 0.95;

/// Contrast boost used by the simple contrast flag.
const CONTRAST_BOOST: f32 = 25.0;

/// Enhancement switches for one preprocessing run. Immutable per call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreprocessingOptions {
    /// Correct page skew. Accepted for compatibility; skew handling is
    /// delegated to the engine.
    pub deskew: bool,
    /// Resolution multiplier, bounded to [1, 3].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upscale: Option<f32>,
    /// Binarize with a 5x5 locally adaptive threshold.
    pub adaptive_threshold: bool,
    /// 3x3 median filter for salt-and-pepper noise.
    pub despeckle: bool,
    /// 3x3 unsharp kernel.
    pub sharpen: bool,
    /// Stretch grayscale values to the full 0-255 range.
    pub normalize_contrast: bool,
    /// Thicken strokes to rejoin fragmented characters.
    pub dilate: bool,
    /// Convert to grayscale.
    pub grayscale: bool,
    /// Simple midpoint contrast boost.
    pub contrast: bool,
}

impl PreprocessingOptions {
    /// Whether any transform is actually requested.
    pub fn is_engaged(&self) -> bool {
        self.adaptive_threshold
            || self.despeckle
            || self.sharpen
            || self.normalize_contrast
            || self.dilate
            || self.grayscale
            || self.contrast
            || self.upscale.is_some_and(|f| f > 1.0)
    }

    /// Range-check the numeric options.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(factor) = self.upscale {
            if !(1.0..=MAX_UPSCALE).contains(&factor) {
                return Err(ValidationError::InvalidRetryParam {
                    field: "preprocessing.upscale".to_string(),
                    reason: format!("{factor} is outside the [1, {MAX_UPSCALE}] range"),
                });
            }
        }
        Ok(())
    }
}

/// Apply the requested transforms to encoded image bytes.
///
/// Returns PNG-encoded output, or the input unchanged when no option is
/// engaged or when processing fails.
pub fn preprocess(bytes: &[u8], options: &PreprocessingOptions) -> Vec<u8> {
    if !options.is_engaged() {
        return bytes.to_vec();
    }

    match apply(bytes, options) {
        Ok(processed) => processed,
        Err(e) => {
            warn!("image preprocessing failed, using original image: {e}");
            bytes.to_vec()
        }
    }
}

/// Crop encoded image bytes to a label region.
///
/// When the bytes cannot be decoded, cropping is unavailable and the full
/// image is returned unchanged; field recognition then degrades to
/// whole-image recognition instead of failing.
pub fn extract_roi(bytes: &[u8], region: &BoundingBox) -> Vec<u8> {
    match crop_region(bytes, region) {
        Ok(cropped) => cropped,
        Err(e) => {
            debug!("ROI crop unavailable ({e}), falling back to full image");
            bytes.to_vec()
        }
    }
}

fn apply(bytes: &[u8], options: &PreprocessingOptions) -> Result<Vec<u8>> {
    let mut img = image::load_from_memory(bytes)?;

    if let Some(factor) = options.upscale {
        let factor = factor.clamp(1.0, MAX_UPSCALE);
        if factor > 1.0 {
            let new_width = (img.width() as f32 * factor).round() as u32;
            let new_height = (img.height() as f32 * factor).round() as u32;
            debug!("upscaling {}x{} by {factor}", img.width(), img.height());
            img = img.resize_exact(new_width, new_height, FilterType::CatmullRom);
        }
    }

    if options.contrast {
        img = img.adjust_contrast(CONTRAST_BOOST);
    }

    if options.deskew {
        debug!("deskew requested, relying on engine skew handling");
    }

    let wants_gray = options.grayscale
        || options.normalize_contrast
        || options.adaptive_threshold
        || options.despeckle
        || options.sharpen
        || options.dilate;
    if !wants_gray {
        return encode_png(&img);
    }

    let mut gray = to_grayscale(&img);

    if options.normalize_contrast {
        stretch_contrast(&mut gray);
    }
    if options.sharpen {
        gray = imageproc::filter::sharpen3x3(&gray);
    }
    if options.despeckle {
        gray = imageproc::filter::median_filter(&gray, 1, 1);
    }
    if options.adaptive_threshold {
        gray = binarize_adaptive(&gray);
    }
    if options.dilate {
        // Text is dark on a light label: a min filter thickens the strokes.
        gray = imageproc::morphology::erode(&gray, Norm::LInf, 1);
    }

    encode_png(&DynamicImage::ImageLuma8(gray))
}

/// Convert to grayscale with the standard luminance weights.
fn to_grayscale(img: &DynamicImage) -> GrayImage {
    let rgb = img.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let p = rgb.get_pixel(x, y);
        let gray = 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32;
        Luma([gray.round() as u8])
    })
}

/// Stretch grayscale values so the darkest pixel maps to 0 and the
/// brightest to 255.
fn stretch_contrast(gray: &mut GrayImage) {
    let mut min = u8::MAX;
    let mut max = u8::MIN;
    for pixel in gray.pixels() {
        min = min.min(pixel[0]);
        max = max.max(pixel[0]);
    }

    let range = max.saturating_sub(min);
    if range == 0 {
        return;
    }

    for pixel in gray.pixels_mut() {
        pixel[0] = ((pixel[0] - min) as u32 * 255 / range as u32) as u8;
    }
}

/// Binarize with a locally adaptive threshold: each pixel is compared to
/// the damped average of its 5x5 neighborhood.
fn binarize_adaptive(gray: &GrayImage) -> GrayImage {
    let (width, height) = gray.dimensions();
    let mut out = GrayImage::new(width, height);

    for y in 0..height {
        for x in 0..width {
            let x0 = x.saturating_sub(2);
            let y0 = y.saturating_sub(2);
            let x1 = (x + 2).min(width - 1);
            let y1 = (y + 2).min(height - 1);

            let mut sum = 0u32;
            let mut count = 0u32;
            for ny in y0..=y1 {
                for nx in x0..=x1 {
                    sum += gray.get_pixel(nx, ny)[0] as u32;
                    count += 1;
                }
            }

            let threshold = (sum as f32 / count as f32) * FOREGROUND_BIAS;
            let value = if (gray.get_pixel(x, y)[0] as f32) < threshold {
                0
            } else {
                255
            };
            out.put_pixel(x, y, Luma([value]));
        }
    }

    out
}

fn crop_region(bytes: &[u8], region: &BoundingBox) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes)?;

    // Clamp the box to the image bounds
    let x = region.x.min(img.width().saturating_sub(1));
    let y = region.y.min(img.height().saturating_sub(1));
    let width = region.width.min(img.width() - x);
    let height = region.height.min(img.height() - y);
    if width == 0 || height == 0 {
        anyhow::bail!("region has no overlap with the image");
    }

    encode_png(&img.crop_imm(x, y, width, height))
}

fn encode_png(img: &DynamicImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    /// A small gradient test image, PNG-encoded.
    fn sample_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            let v = ((x * 20 + y * 10) % 256) as u8;
            image::Rgb([v, v, 255 - v])
        });
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_no_options_is_passthrough() {
        let bytes = sample_png(10, 10);
        let out = preprocess(&bytes, &PreprocessingOptions::default());
        assert_eq!(out, bytes);
    }

    #[test]
    fn test_deskew_alone_is_passthrough() {
        // Deskew is delegated to the engine, so on its own it must not
        // re-encode the image.
        let bytes = sample_png(10, 10);
        let options = PreprocessingOptions {
            deskew: true,
            ..Default::default()
        };
        assert_eq!(preprocess(&bytes, &options), bytes);
    }

    #[test]
    fn test_garbage_bytes_fall_back_to_original() {
        let bytes = b"definitely not an image".to_vec();
        let options = PreprocessingOptions {
            grayscale: true,
            adaptive_threshold: true,
            ..Default::default()
        };
        assert_eq!(preprocess(&bytes, &options), bytes);
    }

    #[test]
    fn test_upscale_changes_dimensions() {
        let bytes = sample_png(20, 10);
        let options = PreprocessingOptions {
            upscale: Some(2.0),
            ..Default::default()
        };
        let out = preprocess(&bytes, &options);
        let img = image::load_from_memory(&out).unwrap();
        assert_eq!((img.width(), img.height()), (40, 20));
    }

    #[test]
    fn test_adaptive_threshold_binarizes() {
        let bytes = sample_png(16, 16);
        let options = PreprocessingOptions {
            grayscale: true,
            adaptive_threshold: true,
            ..Default::default()
        };
        let out = preprocess(&bytes, &options);
        let img = image::load_from_memory(&out).unwrap().to_luma8();
        for pixel in img.pixels() {
            assert!(pixel[0] == 0 || pixel[0] == 255);
        }
    }

    #[test]
    fn test_grayscale_uses_luminance_weights() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(1, 1, image::Rgb([255, 0, 0])));
        let gray = to_grayscale(&img);
        // 0.299 * 255 = 76.245
        assert_eq!(gray.get_pixel(0, 0)[0], 76);
    }

    #[test]
    fn test_stretch_contrast_expands_range() {
        let mut gray = GrayImage::from_fn(4, 4, |x, _| Luma([100 + (x as u8) * 10]));
        stretch_contrast(&mut gray);
        let values: Vec<u8> = gray.pixels().map(|p| p[0]).collect();
        assert!(values.contains(&0));
        assert!(values.contains(&255));
    }

    #[test]
    fn test_stretch_contrast_flat_image_unchanged() {
        let mut gray = GrayImage::from_pixel(4, 4, Luma([128]));
        stretch_contrast(&mut gray);
        assert!(gray.pixels().all(|p| p[0] == 128));
    }

    #[test]
    fn test_extract_roi_crops_to_box() {
        let bytes = sample_png(100, 80);
        let region = BoundingBox {
            x: 10,
            y: 20,
            width: 30,
            height: 40,
        };
        let out = extract_roi(&bytes, &region);
        let img = image::load_from_memory(&out).unwrap();
        assert_eq!((img.width(), img.height()), (30, 40));
    }

    #[test]
    fn test_extract_roi_clamps_oversized_box() {
        let bytes = sample_png(50, 50);
        let region = BoundingBox {
            x: 40,
            y: 40,
            width: 100,
            height: 100,
        };
        let out = extract_roi(&bytes, &region);
        let img = image::load_from_memory(&out).unwrap();
        assert_eq!((img.width(), img.height()), (10, 10));
    }

    #[test]
    fn test_extract_roi_fallback_is_byte_identical() {
        // Cropping is unavailable for undecodable bytes; the input buffer
        // must come back untouched.
        let bytes = b"not an image at all".to_vec();
        let region = BoundingBox {
            x: 0,
            y: 0,
            width: 10,
            height: 10,
        };
        assert_eq!(extract_roi(&bytes, &region), bytes);
    }

    #[test]
    fn test_validate_rejects_out_of_range_upscale() {
        let options = PreprocessingOptions {
            upscale: Some(5.0),
            ..Default::default()
        };
        assert!(options.validate().is_err());

        let options = PreprocessingOptions {
            upscale: Some(0.5),
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_range_bounds() {
        for factor in [1.0, 1.5, 3.0] {
            let options = PreprocessingOptions {
                upscale: Some(factor),
                ..Default::default()
            };
            assert!(options.validate().is_ok(), "factor {factor}");
        }
    }
}
