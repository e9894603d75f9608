//! Per-image recompression with transparency-aware format selection.

use crate::codec::{encode_jpeg, encode_png_compact, flatten_on_white, has_alpha};
use crate::error::{Error, Result};
use crate::extract::ExtractedImage;
use image::DynamicImage;
use std::str::FromStr;

/// Target encoding for optimized images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// PNG when the image carries meaningful alpha, JPEG otherwise
    #[default]
    Auto,
    /// Always JPEG; transparent pixels are composited over white
    Jpeg,
    Png,
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(OutputFormat::Auto),
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            "png" => Ok(OutputFormat::Png),
            other => Err(Error::Processing(format!("unknown output format: {}", other))),
        }
    }
}

/// Options for image optimization
#[derive(Debug, Clone)]
pub struct OptimizeOptions {
    /// JPEG quality (1-100, only affects images encoded as JPEG)
    pub quality: u8,
    pub format: OutputFormat,
    /// Downscale so neither side exceeds this many pixels
    pub max_dimension: Option<u32>,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            quality: 75,
            format: OutputFormat::Auto,
            max_dimension: None,
        }
    }
}

impl OptimizeOptions {
    pub fn validate(&self) -> Result<()> {
        if self.quality == 0 || self.quality > 100 {
            return Err(Error::InvalidQuality);
        }
        Ok(())
    }
}

/// Totals over an optimization pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizeSummary {
    pub optimized: usize,
    pub failed: usize,
    pub bytes_before: usize,
    pub bytes_after: usize,
}

/// Encoded payload and the quality that produced it (`None` for lossless)
fn encode(img: &DynamicImage, options: &OptimizeOptions) -> Result<(Vec<u8>, Option<u8>)> {
    let use_png = match options.format {
        OutputFormat::Png => true,
        OutputFormat::Jpeg => false,
        OutputFormat::Auto => has_alpha(img),
    };

    if use_png {
        Ok((encode_png_compact(img)?, None))
    } else {
        let rgb = flatten_on_white(img);
        Ok((encode_jpeg(&rgb, options.quality)?, Some(options.quality)))
    }
}

/// Fit (width, height) inside a square of `max` pixels, keeping aspect ratio
fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max || max == 0 {
        return (width, height);
    }
    let ratio = max as f64 / longest as f64;
    let scaled = |v: u32| ((v as f64 * ratio).round() as u32).max(1);
    (scaled(width), scaled(height))
}

/// Resample an image to target dimensions
fn resample_image(img: &DynamicImage, target_width: u32, target_height: u32) -> DynamicImage {
    img.resize_exact(
        target_width,
        target_height,
        image::imageops::FilterType::Lanczos3,
    )
}

/// Recompress one record from its extracted raster.
///
/// With `max_dimension` set, oversized images are resized and the record's
/// dimensions updated with the payload.
pub fn optimize_image(image: &mut ExtractedImage, options: &OptimizeOptions) -> Result<()> {
    options.validate()?;
    let decoded = image::load_from_memory(&image.raster_data)?;

    let (width, height) = (decoded.width(), decoded.height());
    let (target_width, target_height) = match options.max_dimension {
        Some(max) => fit_within(width, height, max),
        None => (width, height),
    };

    if (target_width, target_height) != (width, height) {
        let resized = resample_image(&decoded, target_width, target_height);
        let (data, quality) = encode(&resized, options)?;
        image.set_resized(data, target_width, target_height, quality);
    } else {
        let (data, quality) = encode(&decoded, options)?;
        // Undo any earlier resize edit
        image.set_resized(data, width, height, quality);
    }

    log::debug!(
        "Optimized #{} {}: {} -> {} bytes",
        image.index,
        image.source_name,
        image.original_byte_size,
        image.optimized_byte_size
    );
    Ok(())
}

/// Resize edit: re-encode at exactly `width` x `height`
pub fn resize_image(
    image: &mut ExtractedImage,
    width: u32,
    height: u32,
    options: &OptimizeOptions,
) -> Result<()> {
    options.validate()?;
    if width == 0 || height == 0 {
        return Err(Error::Processing(format!(
            "invalid target size {}x{}",
            width, height
        )));
    }
    let decoded = image::load_from_memory(&image.raster_data)?;
    let resized = resample_image(&decoded, width, height);
    let (data, quality) = encode(&resized, options)?;
    image.set_resized(data, width, height, quality);
    Ok(())
}

/// Optimize every record independently; failures are logged and counted
pub fn optimize_all(images: &mut [ExtractedImage], options: &OptimizeOptions) -> Result<OptimizeSummary> {
    options.validate()?;

    let outcome = |image: &mut ExtractedImage| match optimize_image(image, options) {
        Ok(()) => true,
        Err(e) => {
            log::warn!(
                "Could not optimize #{} {}: {}",
                image.index,
                image.source_name,
                e
            );
            false
        }
    };

    #[cfg(not(target_arch = "wasm32"))]
    let results: Vec<bool> = {
        use rayon::prelude::*;
        images.par_iter_mut().map(outcome).collect()
    };
    #[cfg(target_arch = "wasm32")]
    let results: Vec<bool> = images.iter_mut().map(outcome).collect();

    let mut summary = OptimizeSummary::default();
    for (image, ok) in images.iter().zip(results) {
        if ok {
            summary.optimized += 1;
            summary.bytes_before += image.original_byte_size;
            summary.bytes_after += image.optimized_byte_size;
        } else {
            summary.failed += 1;
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::extract::ImageKind;
    use image::{ImageFormat, Rgba, RgbaImage};

    fn record(pixel: Rgba<u8>, width: u32, height: u32) -> ExtractedImage {
        let raster = RgbaImage::from_pixel(width, height, pixel);
        let png = codec::encode_png(&raster).unwrap();
        ExtractedImage::new(0, 1, "Im1", ImageKind::BitmapImage, width, height, png)
    }

    #[test]
    fn test_auto_picks_jpeg_for_opaque() {
        let mut image = record(Rgba([200, 100, 50, 255]), 64, 48);
        optimize_image(&mut image, &OptimizeOptions::default()).unwrap();

        assert!(image.is_optimized);
        assert_eq!(image.applied_quality, Some(75));
        let data = image.optimized_data.as_ref().unwrap();
        assert_eq!(codec::sniff_format(data), Some(ImageFormat::Jpeg));
        assert_eq!(image.optimized_byte_size, data.len());
        assert_eq!((image.pixel_width, image.pixel_height), (64, 48));
    }

    #[test]
    fn test_auto_keeps_png_for_transparency() {
        let mut image = record(Rgba([0, 0, 0, 90]), 16, 16);
        optimize_image(&mut image, &OptimizeOptions::default()).unwrap();

        let data = image.optimized_data.as_ref().unwrap();
        assert_eq!(codec::sniff_format(data), Some(ImageFormat::Png));
        assert_eq!(image.applied_quality, None);
        let decoded = image::load_from_memory(data).unwrap().to_rgba8();
        assert_eq!(decoded.get_pixel(3, 3).0[3], 90);
    }

    #[test]
    fn test_max_dimension_resizes_and_updates_dimensions() {
        let mut image = record(Rgba([10, 10, 10, 255]), 400, 100);
        let options = OptimizeOptions {
            max_dimension: Some(200),
            ..OptimizeOptions::default()
        };
        optimize_image(&mut image, &options).unwrap();

        assert_eq!((image.pixel_width, image.pixel_height), (200, 50));
        assert_eq!(image.source_dimensions(), (400, 100));
        let decoded = image::load_from_memory(image.optimized_data.as_ref().unwrap()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (200, 50));
    }

    #[test]
    fn test_resize_edit() {
        let mut image = record(Rgba([10, 200, 10, 255]), 50, 50);
        let options = OptimizeOptions {
            format: OutputFormat::Png,
            ..OptimizeOptions::default()
        };
        resize_image(&mut image, 20, 10, &options).unwrap();
        assert_eq!((image.pixel_width, image.pixel_height), (20, 10));
        assert!(resize_image(&mut image, 0, 10, &options).is_err());
    }

    #[test]
    fn test_invalid_quality_rejected() {
        let mut image = record(Rgba([1, 1, 1, 255]), 4, 4);
        let options = OptimizeOptions {
            quality: 0,
            ..OptimizeOptions::default()
        };
        assert!(matches!(
            optimize_image(&mut image, &options),
            Err(Error::InvalidQuality)
        ));
        assert!(!image.is_optimized);
    }

    #[test]
    fn test_optimize_all_counts_failures() {
        let mut images = vec![
            record(Rgba([1, 2, 3, 255]), 8, 8),
            ExtractedImage::new(1, 1, "Broken", ImageKind::BitmapImage, 8, 8, vec![0, 1, 2]),
        ];
        let summary = optimize_all(&mut images, &OptimizeOptions::default()).unwrap();
        assert_eq!(summary.optimized, 1);
        assert_eq!(summary.failed, 1);
        assert!(images[0].is_optimized);
        assert!(!images[1].is_optimized);
    }

    #[test]
    fn test_fit_within() {
        assert_eq!(fit_within(100, 50, 200), (100, 50));
        assert_eq!(fit_within(1000, 10, 100), (100, 1));
        assert_eq!(fit_within(300, 600, 150), (75, 150));
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("JPG".parse::<OutputFormat>().unwrap(), OutputFormat::Jpeg);
        assert_eq!("auto".parse::<OutputFormat>().unwrap(), OutputFormat::Auto);
        assert!("webp".parse::<OutputFormat>().is_err());
    }
}
