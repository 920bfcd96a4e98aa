//! The stacking pipeline: load → align → mask → fuse.

use std::path::PathBuf;
use std::sync::Arc;

use image::RgbaImage;

use stackfuse_common::cancel::CancelFlag;
use stackfuse_common::config::{AlignmentConfig, AppConfig, ExternalAlignConfig, FusionConfig};
use stackfuse_common::error::{FocusError, FocusResult};
use stackfuse_processing_core::alignment::{AlignmentEngine, AlignmentOptions};
use stackfuse_processing_core::masks::MaskResolver;
use stackfuse_project_model::mask::Mask;
use stackfuse_project_model::project::LoadedProject;

use crate::intake::{load_stack, write_aligned, write_masked};
use crate::stage::run_blocking_stage;
use crate::tools::{EnfuseBackend, ExternalAligner, FusionBackend};

/// A stacking run ready to execute.
#[derive(Debug, Clone)]
pub struct PipelineJob {
    /// Input images in stack order.
    pub inputs: Vec<PathBuf>,

    /// Authored masks, one list per input (missing lists mean no masks).
    pub masks: Vec<Vec<Mask>>,

    /// Directory receiving aligned, masked and fused outputs.
    pub work_dir: PathBuf,

    /// Align before masking. When off, the inputs are masked as loaded.
    pub align: bool,

    /// Last stage to run.
    pub stop_after: PipelineStage,

    pub alignment: AlignmentConfig,
    pub fusion: FusionConfig,
    pub external_align: ExternalAlignConfig,
}

impl PipelineJob {
    pub fn new(inputs: Vec<PathBuf>, work_dir: impl Into<PathBuf>, config: &AppConfig) -> Self {
        Self {
            inputs,
            masks: vec![],
            work_dir: work_dir.into(),
            align: true,
            stop_after: PipelineStage::Fusing,
            alignment: config.alignment.clone(),
            fusion: config.fusion.clone(),
            external_align: config.external_align.clone(),
        }
    }

    /// Job covering every image and mask of a project.
    pub fn from_project(project: &LoadedProject, config: &AppConfig) -> Self {
        let inputs = project
            .project
            .images
            .iter()
            .map(|p| project.resolve(p))
            .collect();
        Self::new(inputs, project.work_dir(), config)
            .with_masks(project.project.masks_in_stack_order())
    }

    pub fn with_masks(mut self, masks: Vec<Vec<Mask>>) -> Self {
        self.masks = masks;
        self
    }

    pub fn with_alignment(mut self, align: bool) -> Self {
        self.align = align;
        self
    }

    pub fn stop_after(mut self, stage: PipelineStage) -> Self {
        self.stop_after = stage;
        self
    }
}

/// Stages of a stacking run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineStage {
    Loading,
    Aligning,
    Masking,
    Fusing,
    Complete,
}

/// A progress line from a running pipeline.
#[derive(Debug, Clone)]
pub struct PipelineProgress {
    pub stage: PipelineStage,
    pub message: String,
}

/// Progress callback for pipeline runs. Called from worker threads.
pub type ProgressCallback = Arc<dyn Fn(PipelineProgress) + Send + Sync>;

/// Files produced by a completed run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineOutput {
    pub aligned: Vec<PathBuf>,
    pub masked: Vec<PathBuf>,
    pub fused: Option<PathBuf>,
}

/// How a run ended.
#[derive(Debug)]
pub enum PipelineOutcome {
    Completed(PipelineOutput),
    Cancelled { stage: PipelineStage },
    Failed { stage: PipelineStage, error: FocusError },
}

impl PipelineOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Outputs, only for a completed run.
    pub fn output(&self) -> Option<&PipelineOutput> {
        match self {
            Self::Completed(output) => Some(output),
            _ => None,
        }
    }
}

#[derive(Clone, Default)]
struct Reporter {
    callback: Option<ProgressCallback>,
}

impl Reporter {
    fn report(&self, stage: PipelineStage, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(?stage, "{message}");
        if let Some(cb) = &self.callback {
            cb(PipelineProgress { stage, message });
        }
    }
}

/// Execute `job`.
///
/// Blocking work runs off the async runtime and is awaited cooperatively.
/// Cancellation is checked between stages and inside alignment and external
/// tools. Nothing produced by a stage is handed to the next one unless the
/// stage succeeded for every image.
pub async fn run_pipeline(
    job: PipelineJob,
    cancel: CancelFlag,
    progress: Option<ProgressCallback>,
) -> PipelineOutcome {
    let reporter = Reporter { callback: progress };
    let mut stage = PipelineStage::Loading;

    match run_stages(&job, &cancel, &reporter, &mut stage).await {
        Ok(output) => {
            reporter.report(PipelineStage::Complete, "Pipeline finished");
            PipelineOutcome::Completed(output)
        }
        Err(e) if e.is_cancelled() => {
            reporter.report(stage, "Pipeline cancelled");
            PipelineOutcome::Cancelled { stage }
        }
        Err(error) => {
            tracing::error!(?stage, error = %error, "Pipeline failed");
            reporter.report(stage, format!("Failed: {error}"));
            PipelineOutcome::Failed { stage, error }
        }
    }
}

async fn run_stages(
    job: &PipelineJob,
    cancel: &CancelFlag,
    reporter: &Reporter,
    stage: &mut PipelineStage,
) -> FocusResult<PipelineOutput> {
    let mut output = PipelineOutput::default();
    if job.inputs.is_empty() {
        return Err(FocusError::project("the stack has no images"));
    }
    cancel.check()?;

    reporter.report(*stage, format!("Loading {} images", job.inputs.len()));
    let inputs = job.inputs.clone();
    let images = run_blocking_stage("load", move || load_stack(&inputs)).await?;
    cancel.check()?;

    let stack: Vec<RgbaImage> = if job.align {
        *stage = PipelineStage::Aligning;
        let (stack, aligned) = if job.external_align.enabled {
            align_externally(job, cancel, reporter).await?
        } else {
            align_internally(job, images, cancel, reporter).await?
        };
        output.aligned = aligned;
        stack
    } else {
        images
            .into_iter()
            .map(|img| Arc::try_unwrap(img).unwrap_or_else(|shared| (*shared).clone()))
            .collect()
    };
    if job.stop_after <= PipelineStage::Aligning {
        return Ok(output);
    }
    cancel.check()?;

    *stage = PipelineStage::Masking;
    reporter.report(*stage, "Resolving masks");
    let resolver = MaskResolver::from(&job.fusion);
    let masks = job.masks.clone();
    let originals = job.inputs.clone();
    let work_dir = job.work_dir.clone();
    output.masked = run_blocking_stage("mask", move || {
        let mut masked = Vec::with_capacity(stack.len());
        let mut errors = Vec::new();
        for result in resolver.resolve(&stack, &masks)? {
            match result {
                Ok(image) => masked.push(image),
                Err(e) => errors.push(e.to_string()),
            }
        }
        if !errors.is_empty() {
            return Err(FocusError::mask(errors.join("; ")));
        }
        write_masked(&masked, &originals, &work_dir)
    })
    .await?;
    reporter.report(*stage, format!("Wrote {} masked images", output.masked.len()));
    if job.stop_after <= PipelineStage::Masking {
        return Ok(output);
    }
    cancel.check()?;

    *stage = PipelineStage::Fusing;
    let backend = EnfuseBackend::new(job.fusion.clone());
    if !backend.is_available() {
        return Err(FocusError::ToolNotFound {
            tool: backend.name().to_string(),
        });
    }
    reporter.report(*stage, format!("Fusing with {}", backend.name()));
    let fused = job.work_dir.join(&job.fusion.output_name);
    let masked = output.masked.clone();
    let target = fused.clone();
    let tool_cancel = cancel.clone();
    run_blocking_stage("fuse", move || backend.fuse(&masked, &target, &tool_cancel)).await?;
    reporter.report(*stage, format!("Fused image written to {}", fused.display()));
    output.fused = Some(fused);

    Ok(output)
}

async fn align_internally(
    job: &PipelineJob,
    images: Vec<Arc<RgbaImage>>,
    cancel: &CancelFlag,
    reporter: &Reporter,
) -> FocusResult<(Vec<RgbaImage>, Vec<PathBuf>)> {
    let engine = AlignmentEngine::new(AlignmentOptions::from(&job.alignment));
    let align_cancel = cancel.clone();
    let align_reporter = reporter.clone();
    let report = run_blocking_stage("align", move || {
        engine.align_with_progress(images, &align_cancel, |line| {
            align_reporter.report(PipelineStage::Aligning, line)
        })
    })
    .await?;

    if report.cancelled {
        return Err(FocusError::Cancelled);
    }
    if !report.failures.is_empty() {
        let total = report.images.len();
        let details: Vec<String> = report
            .failures
            .iter()
            .map(|f| f.error.to_string())
            .collect();
        return Err(FocusError::alignment(format!(
            "{} of {total} images failed to align: {}",
            details.len(),
            details.join("; ")
        )));
    }
    let aligned = report
        .into_complete_images()
        .ok_or_else(|| FocusError::alignment("alignment finished without every image"))?;

    let dir = job.work_dir.clone();
    let prefix = job.alignment.output_prefix.clone();
    let (aligned, written) = run_blocking_stage("write-aligned", move || {
        let written = write_aligned(&aligned, &dir, &prefix)?;
        Ok((aligned, written))
    })
    .await?;
    reporter.report(
        PipelineStage::Aligning,
        format!("Wrote {} aligned images", written.len()),
    );
    Ok((aligned, written))
}

async fn align_externally(
    job: &PipelineJob,
    cancel: &CancelFlag,
    reporter: &Reporter,
) -> FocusResult<(Vec<RgbaImage>, Vec<PathBuf>)> {
    let aligner = ExternalAligner::new(job.external_align.clone());
    if !aligner.is_available() {
        return Err(FocusError::ToolNotFound {
            tool: job.external_align.binary.clone(),
        });
    }
    reporter.report(
        PipelineStage::Aligning,
        format!("Aligning with {}", job.external_align.binary),
    );

    let inputs = job.inputs.clone();
    let work_dir = job.work_dir.clone();
    let prefix = job.work_dir.join(&job.alignment.output_prefix);
    let tool_cancel = cancel.clone();
    let written = run_blocking_stage("external-align", move || {
        std::fs::create_dir_all(&work_dir)?;
        aligner.align(&inputs, &prefix, &tool_cancel)
    })
    .await?;

    let paths = written.clone();
    let images = run_blocking_stage("load-aligned", move || load_stack(&paths)).await?;
    let images = images
        .into_iter()
        .map(|img| Arc::try_unwrap(img).unwrap_or_else(|shared| (*shared).clone()))
        .collect();
    Ok((images, written))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_ordered() {
        assert!(PipelineStage::Loading < PipelineStage::Aligning);
        assert!(PipelineStage::Aligning < PipelineStage::Masking);
        assert!(PipelineStage::Masking < PipelineStage::Fusing);
    }

    #[test]
    fn job_from_project_resolves_paths_and_masks() {
        let dir = std::env::temp_dir().join("stackfuse_test_job_from_project");
        let _ = std::fs::remove_dir_all(&dir);
        let mut loaded = LoadedProject::create(&dir, "Job").unwrap();
        loaded.project.add_images(["a.png", "/abs/b.png"]);
        loaded
            .project
            .add_mask(
                std::path::Path::new("/abs/b.png"),
                Mask::include(vec![0.0, 0.0, 4.0, 0.0, 4.0, 4.0]),
            )
            .unwrap();

        let job = PipelineJob::from_project(&loaded, &AppConfig::default());
        assert_eq!(job.inputs, vec![dir.join("a.png"), PathBuf::from("/abs/b.png")]);
        assert_eq!(job.masks.len(), 2);
        assert!(job.masks[0].is_empty());
        assert_eq!(job.masks[1].len(), 1);
        assert_eq!(job.work_dir, dir.join("work"));
        assert_eq!(job.stop_after, PipelineStage::Fusing);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn empty_stack_fails_while_loading() {
        let job = PipelineJob::new(vec![], std::env::temp_dir(), &AppConfig::default());
        let outcome = run_pipeline(job, CancelFlag::new(), None).await;
        assert!(matches!(
            outcome,
            PipelineOutcome::Failed {
                stage: PipelineStage::Loading,
                error: FocusError::Project { .. }
            }
        ));
    }
}
