//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;

use stackfuse_common::cancel::CancelFlag;
use stackfuse_fusion_engine::{
    run_pipeline, PipelineJob, PipelineOutcome, PipelineOutput, PipelineStage, ProgressCallback,
};
use stackfuse_project_model::LoadedProject;

pub mod add;
pub mod align;
pub mod check;
pub mod fuse;
pub mod info;
pub mod init;
pub mod mask;
pub mod preview;
pub mod remove;
pub mod validate;

pub(crate) fn load_project(path: &Path) -> anyhow::Result<LoadedProject> {
    LoadedProject::load(path).map_err(|e| anyhow::anyhow!("Failed to load project: {e}"))
}

/// Run `job` with progress printed to stdout and Ctrl-C wired to cancellation.
pub(crate) async fn execute(job: PipelineJob) -> anyhow::Result<PipelineOutput> {
    let cancel = CancelFlag::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("\n  Cancelling, waiting for running work to stop...");
                cancel.cancel();
            }
        })
    };

    let progress: ProgressCallback = Arc::new(|p| println!("  [{:?}] {}", p.stage, p.message));
    let outcome = run_pipeline(job, cancel, Some(progress)).await;
    ctrl_c.abort();

    match outcome {
        PipelineOutcome::Completed(output) => Ok(output),
        PipelineOutcome::Cancelled { stage } => Err(anyhow::anyhow!(cancelled_message(stage))),
        PipelineOutcome::Failed { stage, error } => {
            Err(anyhow::anyhow!("{stage:?} failed: {error}"))
        }
    }
}

/// Nothing reaches the work directory while loading; later stages may have
/// written files before the cancel landed, and those are left in place.
fn cancelled_message(stage: PipelineStage) -> String {
    match stage {
        PipelineStage::Loading => "Cancelled while loading; nothing was written".to_string(),
        stage => format!(
            "Cancelled during {stage:?}; files already in the work directory are from an unfinished run"
        ),
    }
}
