//! Add or clear masks on one image of a project.

use std::path::PathBuf;

use clap::ValueEnum;
use stackfuse_project_model::{Mask, MaskKind};

use super::load_project;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MaskKindArg {
    /// Keep this region from this image
    Include,
    /// Keep this region out of the result
    Exclude,
}

impl From<MaskKindArg> for MaskKind {
    fn from(arg: MaskKindArg) -> Self {
        match arg {
            MaskKindArg::Include => MaskKind::Include,
            MaskKindArg::Exclude => MaskKind::Exclude,
        }
    }
}

pub fn run(
    path: PathBuf,
    index: usize,
    kind: MaskKindArg,
    rect: Option<String>,
    polygon: Option<String>,
    preview_scale: Option<f64>,
    clear: bool,
) -> anyhow::Result<()> {
    let mut project = load_project(&path)?;

    let image = project
        .project
        .images
        .get(index)
        .cloned()
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Index {index} is out of range; the stack has {} image(s)",
                project.project.images.len()
            )
        })?;

    if clear {
        let removed = project.project.clear_masks(&image);
        project
            .save()
            .map_err(|e| anyhow::anyhow!("Failed to save project: {e}"))?;
        println!("Removed {removed} mask(s) from {}", image.display());
        return Ok(());
    }

    let points = match (rect, polygon) {
        (Some(rect), _) => rect_points(&rect)?,
        (None, Some(polygon)) => parse_points(&polygon)?,
        (None, None) => {
            return Err(anyhow::anyhow!("Give a --rect or --polygon, or use --clear"));
        }
    };

    let kind = MaskKind::from(kind);
    let mask = match preview_scale {
        Some(scale) => Mask::from_preview(kind, &points, scale),
        None => Mask::from_points(kind, &points),
    };
    mask.validate()
        .map_err(|e| anyhow::anyhow!("Invalid mask: {e}"))?;

    project
        .project
        .add_mask(&image, mask)
        .map_err(|e| anyhow::anyhow!("Failed to add mask: {e}"))?;
    project
        .save()
        .map_err(|e| anyhow::anyhow!("Failed to save project: {e}"))?;

    println!(
        "Added {:?} mask to image {index} ({}); it now has {} mask(s).",
        kind,
        image.display(),
        project.project.masks_for(&image).len()
    );
    if kind == MaskKind::Include {
        println!("  Every other image gets this region excluded when fusing.");
    }

    Ok(())
}

/// Corners of an `x0,y0,x1,y1` rectangle, clockwise from the first.
fn rect_points(text: &str) -> anyhow::Result<Vec<(f64, f64)>> {
    let values = parse_numbers(text)?;
    let [x0, y0, x1, y1] = values[..] else {
        return Err(anyhow::anyhow!(
            "A rectangle needs 4 numbers (x0,y0,x1,y1), got {}",
            values.len()
        ));
    };
    Ok(vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1)])
}

/// Parse `"x,y x,y ..."` into points.
fn parse_points(text: &str) -> anyhow::Result<Vec<(f64, f64)>> {
    text.split_whitespace()
        .map(|pair| {
            let values = parse_numbers(pair)?;
            match values[..] {
                [x, y] => Ok((x, y)),
                _ => Err(anyhow::anyhow!("Expected a point as x,y, got '{pair}'")),
            }
        })
        .collect()
}

fn parse_numbers(text: &str) -> anyhow::Result<Vec<f64>> {
    text.split(',')
        .map(|s| {
            s.trim()
                .parse::<f64>()
                .map_err(|e| anyhow::anyhow!("'{}' is not a number: {e}", s.trim()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_expands_to_four_corners() {
        let points = rect_points("10, 20,30,40").unwrap();
        assert_eq!(points, vec![(10.0, 20.0), (30.0, 20.0), (30.0, 40.0), (10.0, 40.0)]);
        assert!(rect_points("1,2,3").is_err());
        assert!(rect_points("1,2,3,x").is_err());
    }

    #[test]
    fn polygon_points_are_space_separated_pairs() {
        let points = parse_points("0,0 12.5,0  6,9.25").unwrap();
        assert_eq!(points, vec![(0.0, 0.0), (12.5, 0.0), (6.0, 9.25)]);
        assert!(parse_points("0,0 1").is_err());
        assert!(parse_points("0,0,0").is_err());
    }

    #[test]
    fn kind_argument_maps_to_mask_kind() {
        assert_eq!(MaskKind::from(MaskKindArg::Include), MaskKind::Include);
        assert_eq!(MaskKind::from(MaskKindArg::Exclude), MaskKind::Exclude);
    }
}
