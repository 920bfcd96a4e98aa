//! File naming for intermediate rasters.
//!
//! Aligned outputs are `{prefix}{index:04}.png`; masked outputs are
//! `masked_{stem}.png` where `stem` is the original input's file stem.
//! Both use PNG so the alpha channel survives untouched.

use std::path::Path;

/// Extension of every intermediate raster.
pub const LOSSLESS_EXTENSION: &str = "png";

/// Fixed prefix of masked outputs.
pub const MASKED_PREFIX: &str = "masked_";

/// Aligned output name for the image at `index` in the stack.
pub fn aligned_file_name(prefix: &str, index: usize) -> String {
    format!("{prefix}{index:04}.{LOSSLESS_EXTENSION}")
}

/// Masked output name derived from the original input path.
pub fn masked_file_name(original: &Path) -> String {
    let stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    format!("{MASKED_PREFIX}{stem}.{LOSSLESS_EXTENSION}")
}
