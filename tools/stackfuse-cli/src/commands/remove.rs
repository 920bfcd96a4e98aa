//! Remove images from a project's stack.

use std::path::PathBuf;

use super::load_project;

pub fn run(path: PathBuf, indices: Vec<usize>) -> anyhow::Result<()> {
    let mut project = load_project(&path)?;

    let count = project.project.images.len();
    if let Some(bad) = indices.iter().find(|&&i| i >= count) {
        return Err(anyhow::anyhow!(
            "Index {bad} is out of range; the stack has {count} image(s)"
        ));
    }

    let removed = project.project.remove_images(&indices);
    project
        .save()
        .map_err(|e| anyhow::anyhow!("Failed to save project: {e}"))?;

    for path in &removed {
        println!("Removed {}", path.display());
    }
    println!("The stack now has {} image(s).", project.project.images.len());

    Ok(())
}
