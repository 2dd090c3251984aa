//! Smoothing of the raw probability map before thresholding.
//!
//! With a positive sigma the map is blurred with
//! [`imageproc::filter::gaussian_blur_f32`], directly in `f32`. A sigma
//! of zero selects a fixed-strength denoiser instead: the map is
//! quantized to 8 bits and passed through a 3x3 median filter, which
//! removes isolated speckles without widening the line response.

use image::{GrayImage, Luma};

use crate::types::ProbabilityMap;

/// Radius of the median window used when `sigma == 0`.
const DENOISE_RADIUS: u32 = 1;

/// Smooth a probability map.
///
/// `sigma > 0` applies a Gaussian blur; any other value applies
/// [`denoise`]. Output values stay within `[0, 1]`.
#[must_use = "returns the smoothed map"]
pub fn smooth(probs: &ProbabilityMap, sigma: f32) -> ProbabilityMap {
    if sigma > 0.0 {
        gaussian(probs, sigma)
    } else {
        denoise(probs)
    }
}

/// Gaussian blur of an `f32` map.
///
/// Non-positive sigma values return the map unchanged, since
/// `imageproc` panics on `sigma <= 0.0`.
#[must_use = "returns the blurred map"]
pub fn gaussian(probs: &ProbabilityMap, sigma: f32) -> ProbabilityMap {
    if sigma <= 0.0 {
        return probs.clone();
    }
    imageproc::filter::gaussian_blur_f32(probs, sigma)
}

/// Fixed-strength denoising on the 8-bit quantized map.
#[must_use = "returns the denoised map"]
pub fn denoise(probs: &ProbabilityMap) -> ProbabilityMap {
    let quantized = GrayImage::from_fn(probs.width(), probs.height(), |x, y| {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let v = (probs.get_pixel(x, y).0[0].clamp(0.0, 1.0) * 255.0).round() as u8;
        Luma([v])
    });
    let filtered = imageproc::filter::median_filter(&quantized, DENOISE_RADIUS, DENOISE_RADIUS);
    crate::types::probability_map_from_gray(&filtered)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A horizontal band of probability 1.0 on rows 4..6 of a 10x10 map.
    fn band_map() -> ProbabilityMap {
        ProbabilityMap::from_fn(10, 10, |_x, y| {
            if (4..6).contains(&y) {
                Luma([1.0])
            } else {
                Luma([0.0])
            }
        })
    }

    #[test]
    fn output_dimensions_preserved() {
        let map = ProbabilityMap::new(17, 31);
        let blurred = smooth(&map, 1.4);
        assert_eq!(blurred.dimensions(), (17, 31));
        let denoised = smooth(&map, 0.0);
        assert_eq!(denoised.dimensions(), (17, 31));
    }

    #[test]
    fn gaussian_spreads_band_vertically() {
        let blurred = smooth(&band_map(), 1.5);
        let inside = blurred.get_pixel(5, 4).0[0];
        let outside = blurred.get_pixel(5, 2).0[0];
        assert!(inside < 1.0, "expected blur to lower the band, got {inside}");
        assert!(outside > 0.0, "expected blur to raise neighbours, got {outside}");
        assert!(inside > outside);
    }

    #[test]
    fn gaussian_keeps_uniform_map() {
        let map = ProbabilityMap::from_pixel(12, 12, Luma([0.5]));
        let blurred = gaussian(&map, 2.0);
        for p in blurred.pixels() {
            assert!((p.0[0] - 0.5).abs() < 1e-3, "got {}", p.0[0]);
        }
    }

    #[test]
    fn denoise_removes_isolated_speckle() {
        let mut map = ProbabilityMap::new(9, 9);
        map.put_pixel(4, 4, Luma([1.0]));
        let denoised = smooth(&map, 0.0);
        assert!(denoised.get_pixel(4, 4).0[0].abs() < f32::EPSILON);
    }

    #[test]
    fn denoise_keeps_thick_band() {
        let denoised = denoise(&band_map());
        // The median of a 3x3 window centred inside a 2-row band with
        // ones on 6 of 9 cells is 1.
        assert!((denoised.get_pixel(5, 4).0[0] - 1.0).abs() < f32::EPSILON);
        assert!(denoised.get_pixel(5, 1).0[0].abs() < f32::EPSILON);
    }
}
