//! Append images to a project's stack.

use std::path::{Path, PathBuf};

use stackfuse_common::config::AppConfig;

use super::load_project;

pub fn run(
    path: PathBuf,
    images: Vec<PathBuf>,
    config_path: &Path,
) -> anyhow::Result<()> {
    let mut project = load_project(&path)?;

    let mut resolved = Vec::with_capacity(images.len());
    for image in &images {
        let absolute = std::fs::canonicalize(image)
            .map_err(|e| anyhow::anyhow!("Cannot add {}: {e}", image.display()))?;
        resolved.push(absolute);
    }

    let added = project.project.add_images(resolved);
    project
        .save()
        .map_err(|e| anyhow::anyhow!("Failed to save project: {e}"))?;

    println!(
        "Added {added} of {} image(s); the stack now has {}.",
        images.len(),
        project.project.images.len()
    );
    if added < images.len() {
        println!("  Images already in the stack were skipped.");
    }

    // Reload so command-line overrides are not persisted.
    if let Some(location) = project.project.last_opened_location.clone() {
        let mut stored = AppConfig::load_from(config_path);
        stored.prefs.last_opened_location = Some(location);
        if let Err(e) = stored.save_to(config_path) {
            tracing::warn!("Could not store preferences at {:?}: {}", config_path, e);
        }
    }

    Ok(())
}
