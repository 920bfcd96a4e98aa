//! Render a viewport-sized preview of an input or intermediate image.

use std::path::PathBuf;

use clap::ValueEnum;
use stackfuse_common::config::AppConfig;
use stackfuse_processing_core::preview::{PreviewSurface, PreviewSurfaces, ViewportSize};
use stackfuse_project_model::{aligned_file_name, masked_file_name, LoadedProject};

use super::load_project;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SurfaceArg {
    /// The source image
    Input,
    /// The aligned intermediate
    Aligned,
    /// The masked intermediate
    Masked,
    /// The fused result
    Stacked,
}

impl SurfaceArg {
    fn surface(self) -> PreviewSurface {
        match self {
            SurfaceArg::Input => PreviewSurface::Input,
            SurfaceArg::Aligned | SurfaceArg::Masked => PreviewSurface::Aligned,
            SurfaceArg::Stacked => PreviewSurface::Stacked,
        }
    }
}

pub fn run(
    path: PathBuf,
    index: usize,
    surface: SurfaceArg,
    width: u32,
    height: u32,
    output: PathBuf,
    config: &AppConfig,
) -> anyhow::Result<()> {
    let project = load_project(&path)?;
    let source = surface_path(&project, index, surface, config)?;
    let viewport = ViewportSize::new(width, height);

    let mut surfaces = PreviewSurfaces::new();
    let bitmap = surfaces.preview(surface.surface(), &source, viewport)?;
    bitmap.save(&output)?;

    println!(
        "Preview of {} ({}x{}) written to {}",
        source.display(),
        bitmap.width(),
        bitmap.height(),
        output.display()
    );

    Ok(())
}

fn surface_path(
    project: &LoadedProject,
    index: usize,
    surface: SurfaceArg,
    config: &AppConfig,
) -> anyhow::Result<PathBuf> {
    let work = project.work_dir();
    let image = || {
        project.project.images.get(index).ok_or_else(|| {
            anyhow::anyhow!(
                "Index {index} is out of range; the stack has {} image(s)",
                project.project.images.len()
            )
        })
    };
    Ok(match surface {
        SurfaceArg::Input => project.resolve(image()?),
        SurfaceArg::Aligned => {
            image()?;
            work.join(aligned_file_name(&config.alignment.output_prefix, index))
        }
        SurfaceArg::Masked => work.join(masked_file_name(image()?)),
        SurfaceArg::Stacked => work.join(&config.fusion.output_name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surfaces_resolve_to_work_files() {
        let dir = std::env::temp_dir().join("stackfuse_test_cli_preview_paths");
        let _ = std::fs::remove_dir_all(&dir);
        let mut project = LoadedProject::create(&dir, "Preview").unwrap();
        project.project.add_images(["shots/a.jpg", "shots/b.jpg"]);
        let config = AppConfig::default();

        let path = |index, surface| surface_path(&project, index, surface, &config).unwrap();
        assert_eq!(path(1, SurfaceArg::Input), dir.join("shots/b.jpg"));
        assert_eq!(path(1, SurfaceArg::Aligned), dir.join("work/aligned_0001.png"));
        assert_eq!(path(0, SurfaceArg::Masked), dir.join("work/masked_a.png"));
        assert_eq!(path(7, SurfaceArg::Stacked), dir.join("work/stacked.tif"));
        assert!(surface_path(&project, 2, SurfaceArg::Input, &config).is_err());

        std::fs::remove_dir_all(&dir).ok();
    }
}
