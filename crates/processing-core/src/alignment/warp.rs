//! Inverse-mapped RGBA warping.

use image::{Rgba, RgbaImage};
use imageproc::geometric_transformations::{warp_into_with, Interpolation};

use super::homography::Homography;

/// Pixel written where the warp lands outside the source.
pub const OUTSIDE: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Resample `source` into a `size` canvas.
///
/// Each output pixel `(x, y)` takes the bilinear sample of `source` at
/// `warp.map(x, y)`; points without a full 2x2 neighbourhood in the source
/// are transparent black. Runs on the calling thread, so a worker pool
/// bounds warping the same way it bounds the solve.
pub fn apply_warp(source: &RgbaImage, warp: &Homography, size: (u32, u32)) -> RgbaImage {
    let (width, height) = size;
    let mut out = RgbaImage::new(width, height);
    if width == 0 || height == 0 || source.width() == 0 || source.height() == 0 {
        return out;
    }

    let h = *warp;
    warp_into_with(
        source,
        move |x, y| match h.map(x as f64, y as f64) {
            Some((sx, sy)) => (sx as f32, sy as f32),
            None => (-1.0, -1.0),
        },
        Interpolation::Bilinear,
        OUTSIDE,
        &mut out,
    );
    out
}
