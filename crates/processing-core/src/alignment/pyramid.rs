//! Grayscale planes and coarse-to-fine image pyramids.

use image::RgbaImage;

/// Width the coarsest pyramid level should be close to.
pub const PYRAMID_BASE_WIDTH: f64 = 300.0;

/// Default number of downsampled levels for an anchor of `anchor_width`.
///
/// `floor(log2(anchor_width / 300))`, never negative.
pub fn default_level_count(anchor_width: u32) -> u32 {
    let ratio = anchor_width as f64 / PYRAMID_BASE_WIDTH;
    if ratio < 2.0 {
        return 0;
    }
    ratio.log2().floor() as u32
}

/// Single-channel `f32` image used by the correlation solver.
#[derive(Debug, Clone, PartialEq)]
pub struct GrayPlane {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl GrayPlane {
    /// Build a plane from raw row-major samples.
    ///
    /// Returns `None` if `data` does not hold exactly `width * height` samples.
    pub fn from_raw(width: u32, height: u32, data: Vec<f32>) -> Option<Self> {
        (data.len() == width as usize * height as usize).then_some(Self {
            width,
            height,
            data,
        })
    }

    /// Luma (Rec. 601 weights) of an RGBA image. Alpha is ignored.
    pub fn from_rgba(image: &RgbaImage) -> Self {
        let data = image
            .pixels()
            .map(|p| {
                let [r, g, b, _] = p.0;
                0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
            })
            .collect();
        Self {
            width: image.width(),
            height: image.height(),
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.data[y as usize * self.width as usize + x as usize]
    }

    /// Bilinear sample at `(x, y)`.
    ///
    /// `None` outside `[0, w-1] x [0, h-1]`.
    #[inline]
    pub fn sample(&self, x: f64, y: f64) -> Option<f32> {
        if self.data.is_empty() {
            return None;
        }
        let max_x = (self.width - 1) as f64;
        let max_y = (self.height - 1) as f64;
        if !(0.0..=max_x).contains(&x) || !(0.0..=max_y).contains(&y) {
            return None;
        }
        let x0 = x.floor() as u32;
        let y0 = y.floor() as u32;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let fx = (x - x0 as f64) as f32;
        let fy = (y - y0 as f64) as f32;

        let top = self.get(x0, y0) * (1.0 - fx) + self.get(x1, y0) * fx;
        let bottom = self.get(x0, y1) * (1.0 - fx) + self.get(x1, y1) * fx;
        Some(top * (1.0 - fy) + bottom * fy)
    }

    /// Half-size plane by 2x2 area averaging.
    ///
    /// An odd trailing row or column is dropped. A 1-pixel dimension stays 1
    /// and an empty plane stays empty.
    pub fn downsample(&self) -> Self {
        if self.data.is_empty() {
            return self.clone();
        }
        let nw = (self.width / 2).max(1);
        let nh = (self.height / 2).max(1);
        let mut data = Vec::with_capacity(nw as usize * nh as usize);

        for y in 0..nh {
            let ys = [2 * y, (2 * y + 1).min(self.height - 1)];
            for x in 0..nw {
                let xs = [2 * x, (2 * x + 1).min(self.width - 1)];
                let sum = self.get(xs[0], ys[0])
                    + self.get(xs[1], ys[0])
                    + self.get(xs[0], ys[1])
                    + self.get(xs[1], ys[1]);
                data.push(sum * 0.25);
            }
        }

        Self {
            width: nw,
            height: nh,
            data,
        }
    }

    /// Separable `[1, 2, 1] / 4` blur with clamped borders.
    pub fn smoothed(&self) -> Self {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut horizontal = vec![0.0f32; w * h];
        for y in 0..h {
            let row = &self.data[y * w..(y + 1) * w];
            for x in 0..w {
                let l = row[x.saturating_sub(1)];
                let r = row[(x + 1).min(w - 1)];
                horizontal[y * w + x] = 0.25 * l + 0.5 * row[x] + 0.25 * r;
            }
        }

        let mut data = vec![0.0f32; w * h];
        for y in 0..h {
            let up = y.saturating_sub(1);
            let down = (y + 1).min(h - 1);
            for x in 0..w {
                data[y * w + x] = 0.25 * horizontal[up * w + x]
                    + 0.5 * horizontal[y * w + x]
                    + 0.25 * horizontal[down * w + x];
            }
        }

        Self {
            width: self.width,
            height: self.height,
            data,
        }
    }

    /// Central-difference gradients `(d/dx, d/dy)`, one-sided at the borders.
    pub fn gradients(&self) -> (Self, Self) {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut gx = vec![0.0f32; w * h];
        let mut gy = vec![0.0f32; w * h];

        for y in 0..h {
            for x in 0..w {
                let (l, r) = (x.saturating_sub(1), (x + 1).min(w - 1));
                let (u, d) = (y.saturating_sub(1), (y + 1).min(h - 1));
                if r > l {
                    gx[y * w + x] =
                        (self.data[y * w + r] - self.data[y * w + l]) / (r - l) as f32;
                }
                if d > u {
                    gy[y * w + x] =
                        (self.data[d * w + x] - self.data[u * w + x]) / (d - u) as f32;
                }
            }
        }

        let plane = |data| Self {
            width: self.width,
            height: self.height,
            data,
        };
        (plane(gx), plane(gy))
    }
}

/// Grayscale levels ordered coarsest to finest.
#[derive(Debug, Clone)]
pub struct Pyramid {
    levels: Vec<GrayPlane>,
}

impl Pyramid {
    /// Build `level_count + 1` levels from a full-resolution plane.
    pub fn build(base: GrayPlane, level_count: u32) -> Self {
        let mut levels = Vec::with_capacity(level_count as usize + 1);
        levels.push(base);
        for _ in 0..level_count {
            let next = levels[levels.len() - 1].downsample();
            levels.push(next);
        }
        levels.reverse();
        Self { levels }
    }

    /// Number of downsampled levels above full resolution.
    pub fn level_count(&self) -> u32 {
        (self.levels.len() - 1) as u32
    }

    /// Levels from coarsest to finest.
    pub fn levels(&self) -> &[GrayPlane] {
        &self.levels
    }
}
