//! Initialize a new Stackfuse project.

use std::path::PathBuf;

use stackfuse_project_model::{LoadedProject, PROJECT_FILE};

pub fn run(name: String, output: PathBuf) -> anyhow::Result<()> {
    let project_dir = output.join(&name);
    println!("Creating project '{}' at {}", name, project_dir.display());

    let project = LoadedProject::create(&project_dir, &name)
        .map_err(|e| anyhow::anyhow!("Failed to create project: {e}"))?;

    println!("Project created successfully:");
    println!("  Directory: {}", project.root.display());
    println!();
    println!("Directory structure:");
    println!("  {}/", name);
    println!("  ├── {PROJECT_FILE}  (image stack and masks)");
    println!("  └── work/          (aligned, masked and fused output)");
    println!();
    println!("Next: stackfuse add {} <images>...", project_dir.display());

    Ok(())
}
