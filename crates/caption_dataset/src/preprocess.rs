//! Deterministic image preprocessing: center crop, normalize, resize.

use crate::types::{CaptionDatasetError, DatasetResult};
use image::imageops::FilterType;
use image::{Rgb32FImage, RgbImage};
use ndarray::Array3;
use std::path::Path;

/// Stateless per-image pipeline: crop to the centered square whose side is
/// `min(width, height)`, normalize intensities to [-0.5, 0.5), then resize
/// to the target shape. The crop happens before any resampling, so the
/// resize only ever sees square, normalized data.
#[derive(Debug, Clone, Copy)]
pub struct Preprocessor {
    target: (u32, u32),
}

impl Preprocessor {
    pub fn new(target: (u32, u32)) -> Self {
        Self { target }
    }

    /// Target (width, height).
    pub fn target(&self) -> (u32, u32) {
        self.target
    }

    /// Decode one image from disk, convert to RGB, and run the pipeline.
    /// The file handle is scoped to the decode.
    pub fn load(&self, path: &Path) -> DatasetResult<Array3<f32>> {
        let img = image::open(path)
            .map_err(|e| CaptionDatasetError::Image {
                path: path.to_path_buf(),
                source: e,
            })?
            .to_rgb8();
        Ok(self.apply(&img))
    }

    /// Produce `[target_h, target_w, 3]` values in [-0.5, 0.5).
    pub fn apply(&self, img: &RgbImage) -> Array3<f32> {
        let (w, h) = img.dimensions();
        let side = w.min(h);
        // Integer division biases the window by one pixel when the excess is odd.
        let x0 = w / 2 - side / 2;
        let y0 = h / 2 - side / 2;
        let cropped = image::imageops::crop_imm(img, x0, y0, side, side).to_image();

        let mut scaled = Rgb32FImage::new(side, side);
        for (dst, src) in scaled.pixels_mut().zip(cropped.pixels()) {
            for c in 0..3 {
                dst[c] = f32::from(src[c]) / 255.0;
            }
        }

        let (tw, th) = self.target;
        let resized = image::imageops::resize(&scaled, tw, th, FilterType::Triangle);

        // Triangle weights sum to 1, so the -0.5 shift applied here is exactly
        // the shift applied before the resize; staying in [0, 1] through the
        // resample keeps the float path clamp-free.
        let mut out = Array3::zeros((th as usize, tw as usize, 3));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                out[[y as usize, x as usize, c]] = pixel[c] - 0.5;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn uniform(w: u32, h: u32, v: u8) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([v, v, v]))
    }

    #[test]
    fn output_shape_matches_target() {
        let pre = Preprocessor::new((7, 5));
        let out = pre.apply(&uniform(20, 30, 100));
        assert_eq!(out.shape(), &[5, 7, 3]);
    }

    #[test]
    fn uniform_image_normalizes_exactly() {
        let pre = Preprocessor::new((4, 4));
        let out = pre.apply(&uniform(10, 10, 255));
        for &v in out.iter() {
            assert!((v - 0.5).abs() < 1e-4, "got {v}");
        }
        let out = pre.apply(&uniform(10, 10, 0));
        for &v in out.iter() {
            assert!((v + 0.5).abs() < 1e-4, "got {v}");
        }
    }

    #[test]
    fn margins_outside_center_square_are_discarded() {
        // 9x3 image: center square is columns 3..6; paint the margins white
        // and the center black so any margin leakage shows up.
        let mut img = uniform(9, 3, 255);
        for y in 0..3 {
            for x in 3..6 {
                img.put_pixel(x, y, Rgb([0, 0, 0]));
            }
        }
        let pre = Preprocessor::new((3, 3));
        let out = pre.apply(&img);
        for &v in out.iter() {
            assert!((v + 0.5).abs() < 1e-4, "margin pixels leaked into crop: {v}");
        }
    }

    #[test]
    fn odd_excess_biases_window_by_integer_division() {
        // Width 4, height 3: side 3, x0 = 4/2 - 3/2 = 1, so column 0 is
        // dropped and columns 1..4 survive.
        let mut img = uniform(4, 3, 0);
        for y in 0..3 {
            img.put_pixel(0, y, Rgb([255, 255, 255]));
        }
        let pre = Preprocessor::new((3, 3));
        let out = pre.apply(&img);
        for &v in out.iter() {
            assert!((v + 0.5).abs() < 1e-4, "dropped column leaked: {v}");
        }
    }
}
