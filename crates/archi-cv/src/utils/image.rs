//! Grayscale image helpers built on the `image` crate

use crate::Result;
use anyhow::Context;
use image::{GrayImage, Luma, imageops::FilterType};
use std::path::Path;

/// Image utility functions
pub struct ImageUtils;

impl ImageUtils {
    /// Load an image file as 8-bit grayscale
    pub fn load_grayscale<P: AsRef<Path>>(path: P) -> Result<GrayImage> {
        let img = image::open(&path)
            .with_context(|| format!("Failed to open image: {:?}", path.as_ref()))?;
        Ok(img.to_luma8())
    }

    pub fn is_empty(image: &GrayImage) -> bool {
        image.width() == 0 || image.height() == 0
    }

    /// Resample to exactly `width` x `height`
    pub fn resize(image: &GrayImage, width: u32, height: u32) -> GrayImage {
        if image.dimensions() == (width, height) {
            return image.clone();
        }
        let filter = if width < image.width() {
            FilterType::Triangle
        } else {
            FilterType::CatmullRom
        };
        image::imageops::resize(image, width, height, filter)
    }

    /// Scale both dimensions by `factor`, never below one pixel
    pub fn scale(image: &GrayImage, factor: f64) -> GrayImage {
        let width = ((f64::from(image.width()) * factor).round() as u32).max(1);
        let height = ((f64::from(image.height()) * factor).round() as u32).max(1);
        Self::resize(image, width, height)
    }

    /// Histogram equalization (normalize brightness)
    pub fn equalize_histogram(image: &GrayImage) -> GrayImage {
        let total = u64::from(image.width()) * u64::from(image.height());
        if total == 0 {
            return image.clone();
        }

        let mut histogram = [0u64; 256];
        for pixel in image.pixels() {
            histogram[usize::from(pixel[0])] += 1;
        }

        let mut cdf = [0u64; 256];
        let mut running = 0;
        for (level, count) in histogram.iter().enumerate() {
            running += count;
            cdf[level] = running;
        }

        let cdf_min = cdf.iter().copied().find(|&c| c > 0).unwrap_or(0);
        if total == cdf_min {
            // Single gray level: nothing to spread
            return image.clone();
        }

        let mut lut = [0u8; 256];
        for (level, value) in lut.iter_mut().enumerate() {
            let scaled = (cdf[level].saturating_sub(cdf_min)) * 255 / (total - cdf_min);
            *value = scaled.min(255) as u8;
        }

        let mut out = image.clone();
        for pixel in out.pixels_mut() {
            pixel[0] = lut[usize::from(pixel[0])];
        }
        out
    }

    /// Absolute 3x3 Laplacian (edge response, robust to lighting)
    pub fn laplacian(image: &GrayImage) -> GrayImage {
        let (width, height) = image.dimensions();
        let mut out = GrayImage::new(width, height);
        if width < 3 || height < 3 {
            return out;
        }

        let at = |x: u32, y: u32| i32::from(image.get_pixel(x, y)[0]);
        for y in 1..height - 1 {
            for x in 1..width - 1 {
                let response =
                    at(x - 1, y) + at(x + 1, y) + at(x, y - 1) + at(x, y + 1) - 4 * at(x, y);
                out.put_pixel(x, y, Luma([response.unsigned_abs().min(255) as u8]));
            }
        }
        out
    }
}
