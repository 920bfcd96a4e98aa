//! 3x3 projective transforms.

/// Row-major 3x3 homography `[h0 h1 h2; h3 h4 h5; h6 h7 h8]`.
///
/// In alignment it maps anchor-plane coordinates to target-plane
/// coordinates, which is the direction the correlation solve estimates and
/// the direction inverse-mapped warping samples in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography(pub [f64; 9]);

impl Default for Homography {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Homography {
    pub const IDENTITY: Self = Self([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self([1.0, 0.0, tx, 0.0, 1.0, ty, 0.0, 0.0, 1.0])
    }

    /// Map a point. `None` when it lands on the line at infinity.
    #[inline]
    pub fn map(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let h = &self.0;
        let den = h[6] * x + h[7] * y + h[8];
        if den.abs() < f64::EPSILON {
            return None;
        }
        Some((
            (h[0] * x + h[1] * y + h[2]) / den,
            (h[3] * x + h[4] * y + h[5]) / den,
        ))
    }

    /// The same transform expressed for coordinates scaled by `factor`.
    ///
    /// Conjugation by `diag(factor, factor, 1)`: translations are multiplied
    /// by `factor`, perspective terms divided by it. A factor of 2 is the
    /// elementwise `[[1,1,2],[1,1,2],[0.5,0.5,1]]` step between pyramid levels.
    pub fn rescaled(&self, factor: f64) -> Self {
        let mut h = self.0;
        h[2] *= factor;
        h[5] *= factor;
        h[6] /= factor;
        h[7] /= factor;
        Self(h)
    }

    /// Divide through so that `h8 == 1`.
    pub fn normalized(&self) -> Option<Self> {
        let s = self.0[8];
        if s.abs() < f64::EPSILON {
            return None;
        }
        let mut h = self.0;
        h.iter_mut().for_each(|v| *v /= s);
        Some(Self(h))
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    /// Largest absolute difference between corresponding entries.
    #[cfg(test)]
    pub fn max_abs_diff(&self, other: &Self) -> f64 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}
