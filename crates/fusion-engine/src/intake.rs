//! Loading the input stack and writing intermediate rasters.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{ImageFormat, RgbaImage};
use rayon::prelude::*;

use stackfuse_common::error::{FocusError, FocusResult};
use stackfuse_project_model::naming::{aligned_file_name, masked_file_name};

/// Decode one image as RGBA.
pub fn load_image(path: &Path) -> FocusResult<RgbaImage> {
    if !path.exists() {
        return Err(FocusError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    Ok(image::open(path)?.to_rgba8())
}

/// Decode every image of the stack, in order.
pub fn load_stack(paths: &[PathBuf]) -> FocusResult<Vec<Arc<RgbaImage>>> {
    let started = std::time::Instant::now();
    let images = paths
        .par_iter()
        .map(|p| load_image(p).map(Arc::new))
        .collect::<FocusResult<Vec<_>>>()?;
    tracing::info!(
        images = images.len(),
        load_ms = started.elapsed().as_millis(),
        "Stack loaded"
    );
    Ok(images)
}

/// Write `image` as PNG, which keeps the alpha channel bit-exact.
pub fn save_png(image: &RgbaImage, path: &Path) -> FocusResult<()> {
    image.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

/// Write aligned images as `{prefix}{index:04}.png` into `dir`.
pub fn write_aligned(images: &[RgbaImage], dir: &Path, prefix: &str) -> FocusResult<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    images
        .par_iter()
        .enumerate()
        .map(|(i, image)| {
            let path = dir.join(aligned_file_name(prefix, i));
            save_png(image, &path)?;
            Ok(path)
        })
        .collect()
}

/// Write masked images as `masked_{stem}.png`, named after `originals`.
pub fn write_masked(
    images: &[RgbaImage],
    originals: &[PathBuf],
    dir: &Path,
) -> FocusResult<Vec<PathBuf>> {
    if images.len() != originals.len() {
        return Err(FocusError::mask(format!(
            "{} masked images for {} inputs",
            images.len(),
            originals.len()
        )));
    }
    std::fs::create_dir_all(dir)?;
    let paths: Vec<PathBuf> = originals
        .iter()
        .map(|p| dir.join(masked_file_name(p)))
        .collect();
    for (i, path) in paths.iter().enumerate() {
        if paths[..i].contains(path) {
            return Err(FocusError::mask(format!(
                "two inputs map to the same masked file {}",
                path.display()
            )));
        }
    }
    images
        .par_iter()
        .zip(paths.par_iter())
        .try_for_each(|(image, path)| save_png(image, path))?;
    Ok(paths)
}
