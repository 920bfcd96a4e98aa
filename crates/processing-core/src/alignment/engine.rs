//! Stack alignment against the anchor image.

use std::sync::Arc;
use std::time::Duration;

use image::RgbaImage;

use stackfuse_common::cancel::CancelFlag;
use stackfuse_common::config::AlignmentConfig;
use stackfuse_common::error::{FocusError, FocusResult};

use super::anchor::select_anchor;
use super::ecc::{estimate_warp, EccParams};
use super::pool::{default_pool_size, WorkerPool};
use super::pyramid::{default_level_count, GrayPlane, Pyramid};
use super::warp::apply_warp;

/// How often the collecting thread wakes up to look at the cancel flag.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Alignment tuning knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentOptions {
    /// Iteration cap per pyramid level.
    pub iterations: u32,

    /// Correlation change below which a level stops iterating.
    pub epsilon: f64,

    /// Worker threads; `None` uses [`default_pool_size`].
    pub pool_size: Option<usize>,

    /// Pyramid level override; `None` derives it from the anchor width.
    pub pyramid_levels: Option<u32>,

    /// Reject warps whose final correlation is lower than this.
    pub min_correlation: Option<f64>,
}

impl Default for AlignmentOptions {
    fn default() -> Self {
        Self {
            iterations: 50,
            epsilon: 0.001,
            pool_size: None,
            pyramid_levels: None,
            min_correlation: None,
        }
    }
}

impl From<&AlignmentConfig> for AlignmentOptions {
    fn from(config: &AlignmentConfig) -> Self {
        Self {
            iterations: config.iterations,
            epsilon: config.epsilon,
            pool_size: config.pool_size,
            pyramid_levels: config.pyramid_levels,
            min_correlation: config.min_correlation,
        }
    }
}

impl AlignmentOptions {
    fn ecc_params(&self) -> EccParams {
        EccParams {
            iterations: self.iterations,
            epsilon: self.epsilon,
            min_correlation: self.min_correlation,
        }
    }
}

/// A single image that could not be aligned.
#[derive(Debug)]
pub struct ImageFailure {
    pub index: usize,
    pub error: FocusError,
}

/// Everything one `align` call produced.
#[derive(Debug, Default)]
pub struct AlignmentReport {
    /// Index of the anchor, `None` for an empty stack.
    pub anchor: Option<usize>,

    /// Pyramid levels used for every solve.
    pub levels: u32,

    /// One slot per input, in input order. Empty slots failed, were
    /// cancelled, or never ran.
    pub images: Vec<Option<RgbaImage>>,

    /// Per-image failures, in completion order.
    pub failures: Vec<ImageFailure>,

    /// Human-readable progress lines.
    pub log: Vec<String>,

    /// Whether the run was cut short by cancellation.
    pub cancelled: bool,
}

impl AlignmentReport {
    /// Every input produced an aligned output.
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.failures.is_empty() && self.images.iter().all(Option::is_some)
    }

    /// Indices with an aligned output.
    pub fn completed_indices(&self) -> Vec<usize> {
        self.images
            .iter()
            .enumerate()
            .filter_map(|(i, img)| img.as_ref().map(|_| i))
            .collect()
    }

    /// The aligned stack, only if the run is complete.
    pub fn into_complete_images(self) -> Option<Vec<RgbaImage>> {
        if !self.is_complete() {
            return None;
        }
        self.images.into_iter().collect()
    }
}

/// What a worker sends back for one image.
#[derive(Debug)]
struct JobOutput {
    index: usize,
    result: FocusResult<RgbaImage>,
    log: Vec<String>,
}

/// Aligns every image of a stack onto the anchor's frame.
#[derive(Debug, Clone, Default)]
pub struct AlignmentEngine {
    options: AlignmentOptions,
}

impl AlignmentEngine {
    pub fn new(options: AlignmentOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &AlignmentOptions {
        &self.options
    }

    /// Align `images` against the image at `floor(n / 2)`.
    ///
    /// See [`AlignmentEngine::align_with_progress`].
    pub fn align(
        &self,
        images: Vec<Arc<RgbaImage>>,
        cancel: &CancelFlag,
    ) -> FocusResult<AlignmentReport> {
        self.align_with_progress(images, cancel, |_| {})
    }

    /// Align `images`, forwarding each log line to `progress` as it arrives.
    ///
    /// The anchor's slot holds its unmodified content; every other image is
    /// solved on the worker pool and warped into the anchor's size. A failing
    /// image never stops its siblings. On cancellation the method stops
    /// waiting, joins the pool, and returns the images whose jobs had already
    /// finished.
    ///
    /// Only pool start-up errors are returned as `Err`.
    pub fn align_with_progress(
        &self,
        images: Vec<Arc<RgbaImage>>,
        cancel: &CancelFlag,
        mut progress: impl FnMut(&str),
    ) -> FocusResult<AlignmentReport> {
        let mut report = AlignmentReport {
            images: vec![None; images.len()],
            ..Default::default()
        };
        let mut emit = |report: &mut AlignmentReport, line: String| {
            progress(&line);
            report.log.push(line);
        };

        let Some(anchor) = select_anchor(images.len()) else {
            return Ok(report);
        };
        report.anchor = Some(anchor);

        let anchor_image = Arc::clone(&images[anchor]);
        let levels = self
            .options
            .pyramid_levels
            .unwrap_or_else(|| default_level_count(anchor_image.width()));
        report.levels = levels;
        report.images[anchor] = Some((*anchor_image).clone());
        emit(
            &mut report,
            format!(
                "Aligning {} images against image {anchor} using {levels} pyramid levels",
                images.len()
            ),
        );

        if images.len() == 1 {
            return Ok(report);
        }

        let anchor_pyramid = Arc::new(Pyramid::build(GrayPlane::from_rgba(&anchor_image), levels));
        let anchor_size = anchor_image.dimensions();
        let params = self.options.ecc_params();
        let size = self
            .options
            .pool_size
            .unwrap_or_else(default_pool_size)
            .clamp(1, images.len() - 1);

        let mut pool = WorkerPool::<JobOutput>::new(size, cancel.clone())?;
        tracing::info!(anchor, levels, workers = size, "Alignment started");

        for (index, image) in images.into_iter().enumerate() {
            if index == anchor {
                continue;
            }
            let anchor_pyramid = Arc::clone(&anchor_pyramid);
            let job_cancel = cancel.clone();
            let submitted = pool.submit(move || {
                align_one(index, &image, &anchor_pyramid, anchor_size, &params, &job_cancel)
            });
            if let Err(e) = submitted {
                if !e.is_cancelled() {
                    tracing::warn!(index, error = %e, "Failed to queue alignment job");
                    report.failures.push(ImageFailure { index, error: e });
                }
                break;
            }
        }
        pool.close();

        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            match pool.recv_timeout(POLL_INTERVAL) {
                Ok(output) => collect(&mut report, output, &mut emit),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        if report.cancelled {
            emit(&mut report, "Alignment cancelled, waiting for workers".to_string());
        }
        for output in pool.join() {
            collect(&mut report, output, &mut emit);
        }
        if cancel.is_cancelled() && report.images.iter().any(Option::is_none) {
            report.cancelled = true;
        }

        if !report.cancelled {
            // A slot that is neither filled nor failed lost its worker.
            let reported: Vec<usize> = report.failures.iter().map(|f| f.index).collect();
            for index in 0..report.images.len() {
                if report.images[index].is_none() && !reported.contains(&index) {
                    report.failures.push(ImageFailure {
                        index,
                        error: FocusError::alignment("worker exited without a result"),
                    });
                }
            }
        }

        tracing::info!(
            aligned = report.completed_indices().len(),
            failed = report.failures.len(),
            cancelled = report.cancelled,
            "Alignment finished"
        );
        Ok(report)
    }
}

fn collect(
    report: &mut AlignmentReport,
    output: JobOutput,
    emit: &mut impl FnMut(&mut AlignmentReport, String),
) {
    for line in output.log {
        emit(&mut *report, line);
    }
    match output.result {
        Ok(image) => report.images[output.index] = Some(image),
        Err(e) if e.is_cancelled() => report.cancelled = true,
        Err(e) => {
            emit(&mut *report, format!("Image {} failed: {e}", output.index));
            report.failures.push(ImageFailure {
                index: output.index,
                error: e,
            });
        }
    }
}

fn align_one(
    index: usize,
    target: &RgbaImage,
    anchor: &Pyramid,
    anchor_size: (u32, u32),
    params: &EccParams,
    cancel: &CancelFlag,
) -> JobOutput {
    let mut log = Vec::new();
    let started = std::time::Instant::now();

    let target_pyramid = Pyramid::build(GrayPlane::from_rgba(target), anchor.level_count());
    let result = match estimate_warp(anchor, &target_pyramid, params, cancel) {
        Ok(estimate) => {
            let iterations: u32 = estimate.levels.iter().map(|l| l.iterations).sum();
            log.push(format!(
                "Image {index}: correlation {:.4} after {iterations} iterations ({} ms)",
                estimate.correlation,
                started.elapsed().as_millis()
            ));
            tracing::debug!(index, correlation = estimate.correlation, warp = ?estimate.warp, "Warp estimated");
            cancel
                .check()
                .map(|()| apply_warp(target, &estimate.warp, anchor_size))
        }
        Err(e) => Err(e.into_focus_error(index)),
    };

    JobOutput { index, result, log }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn scene(width: u32, height: u32, dx: f64, dy: f64) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            let (x, y) = (x as f64 - dx, y as f64 - dy);
            let v = 128.0 + 60.0 * (x / 5.0).sin() * (y / 7.0).cos() + 40.0 * ((x + y) / 11.0).sin();
            let v = v.round().clamp(0.0, 255.0) as u8;
            Rgba([v, v / 2 + 20, 255 - v, 255])
        })
    }

    fn options() -> AlignmentOptions {
        AlignmentOptions {
            iterations: 50,
            epsilon: 1e-5,
            pool_size: Some(2),
            pyramid_levels: Some(1),
            min_correlation: None,
        }
    }

    #[test]
    fn empty_stack_produces_empty_report() {
        let report = AlignmentEngine::default()
            .align(vec![], &CancelFlag::new())
            .unwrap();
        assert_eq!(report.anchor, None);
        assert!(report.images.is_empty());
        assert!(report.is_complete());
    }

    #[test]
    fn single_image_is_its_own_anchor() {
        let image = scene(40, 30, 0.0, 0.0);
        let report = AlignmentEngine::new(options())
            .align(vec![Arc::new(image.clone())], &CancelFlag::new())
            .unwrap();
        assert_eq!(report.anchor, Some(0));
        assert_eq!(report.into_complete_images(), Some(vec![image]));
    }

    #[test]
    fn anchor_output_is_unmodified() {
        let stack: Vec<_> = (0..4)
            .map(|i| Arc::new(scene(64, 64, i as f64, 0.0)))
            .collect();
        let anchor = stack[2].as_ref().clone();
        let report = AlignmentEngine::new(options())
            .align(stack, &CancelFlag::new())
            .unwrap();
        assert_eq!(report.anchor, Some(2));
        assert_eq!(report.images[2].as_ref(), Some(&anchor));
    }

    #[test]
    fn failures_do_not_abort_siblings() {
        let flat = RgbaImage::from_pixel(64, 64, Rgba([90, 90, 90, 255]));
        let stack = vec![
            Arc::new(flat),
            Arc::new(scene(64, 64, 0.0, 0.0)),
            Arc::new(scene(64, 64, 1.0, 1.0)),
        ];
        let report = AlignmentEngine::new(options())
            .align(stack, &CancelFlag::new())
            .unwrap();

        assert!(!report.is_complete());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 0);
        assert!(matches!(
            report.failures[0].error,
            FocusError::Convergence { index: 0, .. }
        ));
        assert!(report.images[1].is_some());
        assert!(report.images[2].is_some());
    }

    #[test]
    fn cancelled_before_start_returns_only_anchor() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let stack: Vec<_> = (0..5).map(|_| Arc::new(scene(48, 48, 0.0, 0.0))).collect();
        let report = AlignmentEngine::new(options()).align(stack, &cancel).unwrap();

        assert!(report.cancelled);
        assert!(report.failures.is_empty());
        assert_eq!(report.completed_indices(), vec![2]);
        assert!(report.into_complete_images().is_none());
    }

    #[test]
    fn progress_receives_every_log_line() {
        let stack: Vec<_> = (0..3).map(|i| Arc::new(scene(48, 48, i as f64 * 0.5, 0.0))).collect();
        let mut seen = Vec::new();
        let report = AlignmentEngine::new(options())
            .align_with_progress(stack, &CancelFlag::new(), |line| seen.push(line.to_string()))
            .unwrap();
        assert_eq!(seen, report.log);
        assert!(seen.len() >= 3);
    }
}
