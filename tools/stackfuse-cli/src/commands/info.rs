//! Show project information.

use std::path::{Path, PathBuf};

use stackfuse_common::config::AppConfig;
use stackfuse_project_model::naming::MASKED_PREFIX;

use super::load_project;

/// Files found in a work directory, by kind.
#[derive(Debug, Default, PartialEq, Eq)]
struct WorkCounts {
    aligned: usize,
    masked: usize,
    other: usize,
}

fn count_work_files(work: &Path, aligned_prefix: &str) -> std::io::Result<WorkCounts> {
    let mut counts = WorkCounts::default();
    for entry in std::fs::read_dir(work)?.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !aligned_prefix.is_empty() && name.starts_with(aligned_prefix) {
            counts.aligned += 1;
        } else if name.starts_with(MASKED_PREFIX) {
            counts.masked += 1;
        } else {
            counts.other += 1;
        }
    }
    Ok(counts)
}

pub fn run(path: PathBuf, config: &AppConfig) -> anyhow::Result<()> {
    let project = load_project(&path)?;

    let p = &project.project;

    println!("Project: {}", p.name);
    println!("  Version: {}", p.version);
    println!("  Created: {}", p.created_at);
    println!("  Modified: {}", p.modified_at);
    if let Some(location) = &p.last_opened_location {
        println!("  Last opened location: {}", location.display());
    }
    println!();

    println!("Stack ({} images):", p.images.len());
    for (i, image) in p.images.iter().enumerate() {
        let masks = p.masks_for(image);
        let includes = masks.iter().filter(|m| m.is_include()).count();
        let excludes = masks.len() - includes;
        let masks = if masks.is_empty() {
            String::new()
        } else {
            format!("  [{includes} include, {excludes} exclude]")
        };
        println!("  {i:>3}: {}{masks}", image.display());
    }
    if let Some(anchor) = stackfuse_processing_core::alignment::select_anchor(p.images.len()) {
        println!("  Anchor: image {anchor}");
    }
    println!();

    let work = project.work_dir();
    println!("Work directory: {}", work.display());
    match count_work_files(&work, &config.alignment.output_prefix) {
        Ok(counts) => println!(
            "  Aligned: {}, masked: {}, other: {}",
            counts.aligned, counts.masked, counts.other
        ),
        Err(_) => println!("  (not created yet)"),
    }

    Ok(())
}
