//! Run the whole stack pipeline on a project.

use std::path::PathBuf;

use stackfuse_common::config::AppConfig;
use stackfuse_fusion_engine::PipelineJob;

use super::{execute, load_project};

pub async fn run(path: PathBuf, config: AppConfig, align: bool) -> anyhow::Result<()> {
    config.validate()?;
    let project = load_project(&path)?;

    let problems = project.validate_sources();
    if !problems.is_empty() {
        for problem in &problems {
            println!("  - {problem}");
        }
        return Err(anyhow::anyhow!("{} source image(s) missing", problems.len()));
    }

    println!(
        "Stacking {} image(s) of '{}' with {}",
        project.project.images.len(),
        project.project.name,
        config.fusion.binary
    );
    if !align {
        println!("  Alignment skipped");
    }

    let job = PipelineJob::from_project(&project, &config).with_alignment(align);
    let output = execute(job).await?;

    println!("\nStack complete:");
    println!("  Masked images: {}", output.masked.len());
    if let Some(fused) = &output.fused {
        println!("  Result: {}", fused.display());
    }

    Ok(())
}
