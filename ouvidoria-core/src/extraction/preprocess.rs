//! Image cleanup before OCR: grayscale, 3x3 median blur, Otsu threshold.

use std::path::Path;

use image::{GrayImage, ImageFormat, Luma};

use crate::error::{ExtractionError, Result};

/// Write a black-and-white PNG of `input` to `output`.
///
/// Blocking; call from `spawn_blocking`.
pub fn binarize(input: &Path, output: &Path) -> Result<()> {
    let gray = image::open(input)
        .map_err(|e| ExtractionError::Decode(e.to_string()))?
        .to_luma8();

    let smoothed = median_blur_3x3(&gray);
    let threshold = otsu_threshold(&smoothed);
    let binary = apply_threshold(&smoothed, threshold);

    binary
        .save_with_format(output, ImageFormat::Png)
        .map_err(|e| ExtractionError::Decode(e.to_string()))
}

fn median_blur_3x3(src: &GrayImage) -> GrayImage {
    let (width, height) = src.dimensions();
    let mut dst = GrayImage::new(width, height);
    if width == 0 || height == 0 {
        return dst;
    }

    let mut window = [0u8; 9];
    for y in 0..height {
        for x in 0..width {
            let mut i = 0;
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    // Edge pixels are replicated.
                    let sx = (x as i64 + dx).clamp(0, width as i64 - 1) as u32;
                    let sy = (y as i64 + dy).clamp(0, height as i64 - 1) as u32;
                    window[i] = src.get_pixel(sx, sy)[0];
                    i += 1;
                }
            }
            window.sort_unstable();
            dst.put_pixel(x, y, Luma([window[4]]));
        }
    }
    dst
}

/// Threshold maximising between-class variance of the histogram.
fn otsu_threshold(src: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for pixel in src.pixels() {
        histogram[pixel[0] as usize] += 1;
    }

    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return 0;
    }
    let weighted_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(level, &count)| level as f64 * count as f64)
        .sum();

    let mut background_weight = 0u64;
    let mut background_sum = 0.0f64;
    let mut best_variance = 0.0f64;
    let mut best_threshold = 0u8;

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
        let background_mean = background_sum / background_weight as f64;
        let foreground_mean = (weighted_total - background_sum) / foreground_weight as f64;
        let diff = background_mean - foreground_mean;
        let variance = background_weight as f64 * foreground_weight as f64 * diff * diff;

        if variance > best_variance {
            best_variance = variance;
            best_threshold = level as u8;
        }
    }

    best_threshold
}

fn apply_threshold(src: &GrayImage, threshold: u8) -> GrayImage {
    let mut dst = src.clone();
    for pixel in dst.pixels_mut() {
        pixel[0] = if pixel[0] > threshold { 255 } else { 0 };
    }
    dst
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_removes_salt_noise() {
        let mut img = GrayImage::from_pixel(5, 5, Luma([10]));
        img.put_pixel(2, 2, Luma([250]));
        let out = median_blur_3x3(&img);
        assert_eq!(out.get_pixel(2, 2)[0], 10);
    }

    #[test]
    fn test_otsu_splits_bimodal_histogram() {
        let mut img = GrayImage::new(10, 1);
        for x in 0..5 {
            img.put_pixel(x, 0, Luma([20]));
        }
        for x in 5..10 {
            img.put_pixel(x, 0, Luma([220]));
        }
        let t = otsu_threshold(&img);
        assert!((20..220).contains(&t));

        let binary = apply_threshold(&img, t);
        assert_eq!(binary.get_pixel(0, 0)[0], 0);
        assert_eq!(binary.get_pixel(9, 0)[0], 255);
    }

    #[test]
    fn test_binarize_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        let output = dir.path().join("out.png");
        GrayImage::from_fn(8, 8, |x, _| Luma([if x < 4 { 30 } else { 200 }]))
            .save(&input)
            .unwrap();

        binarize(&input, &output).unwrap();

        let result = image::open(&output).unwrap().to_luma8();
        assert_eq!(result.dimensions(), (8, 8));
        assert!(result.pixels().all(|p| p[0] == 0 || p[0] == 255));
    }

    #[test]
    fn test_binarize_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("bad.png");
        std::fs::write(&input, b"definitely not an image").unwrap();
        let err = binarize(&input, &dir.path().join("out.png")).unwrap_err();
        assert!(matches!(err, ExtractionError::Decode(_)));
    }
}
