//! Validate a Stackfuse project.

use std::path::PathBuf;

use super::load_project;

pub fn run(path: PathBuf) -> anyhow::Result<()> {
    println!("Validating project at: {}", path.display());

    let project = load_project(&path)?;

    println!("  Name: {}", project.project.name);
    println!("  Version: {}", project.project.version);
    println!("  Images: {}", project.project.images.len());

    let mut errors = project.project.validate();
    errors.extend(project.validate_sources());

    if errors.is_empty() {
        println!("  Sources: All present");
        println!("\nProject is valid.");
    } else {
        println!("\nValidation issues:");
        for error in &errors {
            println!("  - {error}");
        }
        println!(
            "\n{} issue(s) found. Project may not be fully usable.",
            errors.len()
        );
    }

    Ok(())
}
