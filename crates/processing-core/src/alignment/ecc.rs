//! Enhanced correlation coefficient (ECC) homography estimation.
//!
//! Maximizes the zero-mean normalized correlation between a template (the
//! anchor) and an input image sampled through a homography, using the
//! Gauss-Newton style update of Evangelidis & Psarakis (2008). The warp maps
//! template coordinates to input coordinates.

use stackfuse_common::cancel::CancelFlag;
use stackfuse_common::error::FocusError;

use super::homography::Homography;
use super::pyramid::{GrayPlane, Pyramid};

/// Free parameters of a homography with `h8` fixed at 1.
const PARAMS: usize = 8;

/// Fraction of the template that must overlap the warped input.
const MIN_OVERLAP_FRACTION: f64 = 0.05;

/// Absolute floor on overlapping pixels.
const MIN_OVERLAP_PIXELS: usize = 32;

/// Termination parameters for one solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EccParams {
    /// Iteration cap per level.
    pub iterations: u32,

    /// Stop once the correlation changes by less than this.
    pub epsilon: f64,

    /// Reject a final correlation below this value.
    pub min_correlation: Option<f64>,
}

impl Default for EccParams {
    fn default() -> Self {
        Self {
            iterations: 50,
            epsilon: 0.001,
            min_correlation: None,
        }
    }
}

/// Result of a single-level solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelSolve {
    pub warp: Homography,
    pub correlation: f64,
    pub iterations: u32,
}

/// Result of the full coarse-to-fine estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct WarpEstimate {
    /// Warp at full resolution.
    pub warp: Homography,

    /// Correlation reached at the finest level.
    pub correlation: f64,

    /// Per-level solves, coarsest first.
    pub levels: Vec<LevelSolve>,
}

/// Why a solve did not produce a usable warp.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EccError {
    #[error("cancelled")]
    Cancelled,

    #[error("only {valid} overlapping pixels, need {required}")]
    InsufficientOverlap { valid: usize, required: usize },

    #[error("image has no texture inside the overlap")]
    Textureless,

    #[error("Hessian is singular")]
    SingularHessian,

    #[error("solve produced non-finite values")]
    NonFinite,

    #[error("correlation cannot be increased further (lambda denominator {0:.3e})")]
    Stalled(f64),

    #[error("final correlation {correlation:.4} is below threshold {threshold:.4}")]
    BelowThreshold { correlation: f64, threshold: f64 },
}

impl EccError {
    /// Attach the stack index of the image being solved.
    pub fn into_focus_error(self, index: usize) -> FocusError {
        match self {
            EccError::Cancelled => FocusError::Cancelled,
            other => FocusError::convergence(index, other.to_string()),
        }
    }
}

/// Coarse-to-fine estimate of the warp taking `template` coordinates to
/// `input` coordinates.
///
/// Both pyramids must have the same number of levels. The starting warp is
/// the identity (its translation rescaled to the coarsest level); each level
/// is refined in turn and the warp is lifted to the next finer level between
/// solves.
pub fn estimate_warp(
    template: &Pyramid,
    input: &Pyramid,
    params: &EccParams,
    cancel: &CancelFlag,
) -> Result<WarpEstimate, EccError> {
    let level_count = template.level_count().min(input.level_count());
    let coarsest_scale = 0.5f64.powi(level_count as i32);
    let mut warp = Homography::IDENTITY.rescaled(coarsest_scale);

    let t_levels = &template.levels()[(template.level_count() - level_count) as usize..];
    let i_levels = &input.levels()[(input.level_count() - level_count) as usize..];

    let level_params = EccParams {
        min_correlation: None,
        ..*params
    };

    let mut levels = Vec::with_capacity(t_levels.len());
    for (level, (t, i)) in t_levels.iter().zip(i_levels).enumerate() {
        if level > 0 {
            warp = warp.rescaled(2.0);
        }
        let solve = find_transform(t, i, warp, &level_params, cancel)?;
        tracing::trace!(
            pyramid_level = level,
            correlation = solve.correlation,
            iterations = solve.iterations,
            "ECC level solved"
        );
        warp = solve.warp;
        levels.push(solve);
    }

    let correlation = levels.last().map(|l| l.correlation).unwrap_or(f64::NAN);
    if let Some(threshold) = params.min_correlation {
        if !(correlation >= threshold) {
            return Err(EccError::BelowThreshold {
                correlation,
                threshold,
            });
        }
    }

    Ok(WarpEstimate {
        warp,
        correlation,
        levels,
    })
}

/// Refine `initial` on a single pair of planes.
///
/// Applies at most `params.iterations` updates and stops early once two
/// consecutive correlations differ by less than `params.epsilon`. Reaching
/// the cap is not an error; the returned correlation is measured on the
/// returned warp. Cancellation is polled before every iteration.
///
/// The overlap is walked twice per iteration (statistics, then the normal
/// equations) instead of being buffered, so memory stays at the planes.
pub fn find_transform(
    template: &GrayPlane,
    input: &GrayPlane,
    initial: Homography,
    params: &EccParams,
    cancel: &CancelFlag,
) -> Result<LevelSolve, EccError> {
    let template = template.smoothed();
    let input = input.smoothed();
    let (grad_x, grad_y) = input.gradients();
    let planes = Planes {
        template: &template,
        input: &input,
        grad_x: &grad_x,
        grad_y: &grad_y,
    };

    let (tw, th) = template.dimensions();
    let required =
        ((tw as f64 * th as f64 * MIN_OVERLAP_FRACTION) as usize).max(MIN_OVERLAP_PIXELS);

    let mut warp = initial.normalized().ok_or(EccError::NonFinite)?;
    let mut last_rho = f64::NEG_INFINITY;
    let mut rho;
    let mut updates = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(EccError::Cancelled);
        }

        let stats = planes.statistics(&warp);
        if stats.count < required {
            return Err(EccError::InsufficientOverlap {
                valid: stats.count,
                required,
            });
        }
        if stats.t_sq <= f64::EPSILON || stats.i_sq <= f64::EPSILON {
            return Err(EccError::Textureless);
        }

        rho = stats.corr / (stats.t_sq.sqrt() * stats.i_sq.sqrt());
        if !rho.is_finite() {
            return Err(EccError::NonFinite);
        }
        if updates >= params.iterations || (rho - last_rho).abs() < params.epsilon {
            break;
        }
        last_rho = rho;

        let (hessian, image_proj, templ_proj) = planes.normal_equations(&warp, &stats);

        let image_proj_h = solve(hessian, image_proj).ok_or(EccError::SingularHessian)?;
        let lambda_n = stats.i_sq - dot(&image_proj, &image_proj_h);
        let lambda_d = stats.corr - dot(&templ_proj, &image_proj_h);
        if lambda_d <= 0.0 {
            return Err(EccError::Stalled(lambda_d));
        }
        let lambda = lambda_n / lambda_d;

        // Jᵀ(λ·t − i) expands to λ·Jᵀt − Jᵀi.
        let mut error_proj = [0.0f64; PARAMS];
        for k in 0..PARAMS {
            error_proj[k] = lambda * templ_proj[k] - image_proj[k];
        }
        let delta = solve(hessian, error_proj).ok_or(EccError::SingularHessian)?;

        for k in 0..PARAMS {
            warp.0[k] += delta[k];
        }
        if !warp.is_finite() {
            return Err(EccError::NonFinite);
        }
        updates += 1;
    }

    Ok(LevelSolve {
        warp,
        correlation: rho,
        iterations: updates,
    })
}

/// Zero-mean overlap statistics for one warp.
#[derive(Debug, Clone, Copy, Default)]
struct OverlapStats {
    count: usize,
    t_mean: f64,
    i_mean: f64,
    t_sq: f64,
    i_sq: f64,
    corr: f64,
}

/// One template pixel whose warped position lands inside the input.
#[derive(Debug, Clone, Copy)]
struct Sample {
    x: f64,
    y: f64,
    t: f64,
    i: f64,
    gx: f64,
    gy: f64,
}

impl Sample {
    /// Derivative of the warped intensity with respect to `h0..h7`.
    #[inline]
    fn jacobian(&self, warp: &Homography) -> [f64; PARAMS] {
        let h = &warp.0;
        let (x, y) = (self.x, self.y);
        let den = h[6] * x + h[7] * y + 1.0;
        let inv = 1.0 / den;
        let xp = (h[0] * x + h[1] * y + h[2]) * inv;
        let yp = (h[3] * x + h[4] * y + h[5]) * inv;
        let gx = self.gx * inv;
        let gy = self.gy * inv;
        let persp = -(gx * xp + gy * yp);
        [
            gx * x,
            gx * y,
            gx,
            gy * x,
            gy * y,
            gy,
            persp * x,
            persp * y,
        ]
    }
}

/// Smoothed planes of one solve.
struct Planes<'a> {
    template: &'a GrayPlane,
    input: &'a GrayPlane,
    grad_x: &'a GrayPlane,
    grad_y: &'a GrayPlane,
}

impl Planes<'_> {
    /// Visit every template pixel whose warped position lands in the input.
    fn for_each_sample(&self, warp: &Homography, mut visit: impl FnMut(Sample)) {
        let (tw, th) = self.template.dimensions();
        for y in 0..th {
            for x in 0..tw {
                let (fx, fy) = (x as f64, y as f64);
                let Some((wx, wy)) = warp.map(fx, fy) else {
                    continue;
                };
                let Some(i) = self.input.sample(wx, wy) else {
                    continue;
                };
                let (Some(gx), Some(gy)) = (self.grad_x.sample(wx, wy), self.grad_y.sample(wx, wy))
                else {
                    continue;
                };
                visit(Sample {
                    x: fx,
                    y: fy,
                    t: self.template.get(x, y) as f64,
                    i: i as f64,
                    gx: gx as f64,
                    gy: gy as f64,
                });
            }
        }
    }

    fn statistics(&self, warp: &Homography) -> OverlapStats {
        let mut n = 0usize;
        let (mut t_sum, mut i_sum) = (0.0, 0.0);
        let (mut tt, mut ii, mut ti) = (0.0, 0.0, 0.0);
        self.for_each_sample(warp, |s| {
            n += 1;
            t_sum += s.t;
            i_sum += s.i;
            tt += s.t * s.t;
            ii += s.i * s.i;
            ti += s.t * s.i;
        });
        if n == 0 {
            return OverlapStats::default();
        }
        let count = n as f64;
        let (t_mean, i_mean) = (t_sum / count, i_sum / count);
        OverlapStats {
            count: n,
            t_mean,
            i_mean,
            t_sq: (tt - count * t_mean * t_mean).max(0.0),
            i_sq: (ii - count * i_mean * i_mean).max(0.0),
            corr: ti - count * t_mean * i_mean,
        }
    }

    /// Gauss-Newton Hessian plus the Jacobian projections of the zero-mean
    /// input and template.
    fn normal_equations(
        &self,
        warp: &Homography,
        stats: &OverlapStats,
    ) -> ([[f64; PARAMS]; PARAMS], [f64; PARAMS], [f64; PARAMS]) {
        let mut hessian = [[0.0f64; PARAMS]; PARAMS];
        let mut image_proj = [0.0f64; PARAMS];
        let mut templ_proj = [0.0f64; PARAMS];
        self.for_each_sample(warp, |s| {
            let jac = s.jacobian(warp);
            let (t, i) = (s.t - stats.t_mean, s.i - stats.i_mean);
            for r in 0..PARAMS {
                image_proj[r] += jac[r] * i;
                templ_proj[r] += jac[r] * t;
                for c in r..PARAMS {
                    hessian[r][c] += jac[r] * jac[c];
                }
            }
        });
        for r in 1..PARAMS {
            for c in 0..r {
                hessian[r][c] = hessian[c][r];
            }
        }
        (hessian, image_proj, templ_proj)
    }
}

fn dot(a: &[f64; PARAMS], b: &[f64; PARAMS]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Solve `a · x = b` by Gaussian elimination with partial pivoting.
fn solve(mut a: [[f64; PARAMS]; PARAMS], mut b: [f64; PARAMS]) -> Option<[f64; PARAMS]> {
    let scale = a
        .iter()
        .flat_map(|row| row.iter())
        .fold(0.0f64, |m, v| m.max(v.abs()));
    if !(scale > 0.0) || !scale.is_finite() {
        return None;
    }
    let tiny = scale * 1e-14;

    for col in 0..PARAMS {
        let pivot = (col..PARAMS).max_by(|&r1, &r2| a[r1][col].abs().total_cmp(&a[r2][col].abs()))?;
        if a[pivot][col].abs() <= tiny {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..PARAMS {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..PARAMS {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = [0.0f64; PARAMS];
    for row in (0..PARAMS).rev() {
        let tail: f64 = (row + 1..PARAMS).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}
