//! Align a project's stack.

use std::path::PathBuf;

use stackfuse_common::config::AppConfig;
use stackfuse_fusion_engine::{PipelineJob, PipelineStage};

use super::{execute, load_project};

pub async fn run(path: PathBuf, config: AppConfig) -> anyhow::Result<()> {
    config.validate()?;
    let project = load_project(&path)?;
    println!(
        "Aligning {} image(s) of '{}'",
        project.project.images.len(),
        project.project.name
    );

    let job = PipelineJob::from_project(&project, &config).stop_after(PipelineStage::Aligning);
    let output = execute(job).await?;

    println!("\nAlignment complete:");
    for path in &output.aligned {
        println!("  {}", path.display());
    }

    Ok(())
}
