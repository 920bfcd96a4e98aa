//! Polygon masks authored on individual images.
//!
//! A mask marks a region that must always (`Include`) or never (`Exclude`)
//! be sourced from its owning image during fusion. Vertices are a flat
//! `[x0, y0, x1, y1, ...]` list in the owning image's full-resolution pixel
//! space.

use serde::{Deserialize, Serialize};

/// Whether a polygon forces or forbids its image in the fused result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskKind {
    Include,
    Exclude,
}

/// A single polygon vertex in source pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
}

impl Vertex {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A user-drawn polygon with its include/exclude semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mask {
    /// Flat `x, y` pairs in full-resolution pixel space.
    pub vertices: Vec<f64>,

    /// Include or Exclude.
    #[serde(rename = "type")]
    pub kind: MaskKind,
}

/// Reasons a mask cannot be rasterized.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MaskError {
    #[error("vertex list has an odd number of coordinates ({0})")]
    OddCoordinateCount(usize),

    #[error("polygon needs at least 3 vertices, got {0}")]
    TooFewVertices(usize),

    #[error("vertex {0} is not a finite coordinate")]
    NonFinite(usize),
}

impl Mask {
    pub fn new(kind: MaskKind, vertices: Vec<f64>) -> Self {
        Self { vertices, kind }
    }

    pub fn include(vertices: Vec<f64>) -> Self {
        Self::new(MaskKind::Include, vertices)
    }

    pub fn exclude(vertices: Vec<f64>) -> Self {
        Self::new(MaskKind::Exclude, vertices)
    }

    /// Build a mask from `(x, y)` pairs.
    pub fn from_points(kind: MaskKind, points: &[(f64, f64)]) -> Self {
        let vertices = points.iter().flat_map(|&(x, y)| [x, y]).collect();
        Self::new(kind, vertices)
    }

    /// Axis-aligned rectangle mask, handy for scripted masks.
    pub fn rect(kind: MaskKind, x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self::from_points(kind, &[(x0, y0), (x1, y0), (x1, y1), (x0, y1)])
    }

    pub fn is_include(&self) -> bool {
        self.kind == MaskKind::Include
    }

    /// Number of complete vertices.
    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / 2
    }

    /// Vertices as points. A trailing unpaired coordinate is ignored.
    pub fn points(&self) -> Vec<Vertex> {
        self.vertices
            .chunks_exact(2)
            .map(|c| Vertex::new(c[0], c[1]))
            .collect()
    }

    /// An independent `Exclude` copy with the exact same vertex list.
    pub fn to_exclude(&self) -> Mask {
        Mask::exclude(self.vertices.clone())
    }

    /// Check the polygon is rasterizable.
    pub fn validate(&self) -> Result<(), MaskError> {
        if self.vertices.len() % 2 != 0 {
            return Err(MaskError::OddCoordinateCount(self.vertices.len()));
        }
        if let Some(idx) = self.vertices.iter().position(|v| !v.is_finite()) {
            return Err(MaskError::NonFinite(idx / 2));
        }
        let count = self.vertex_count();
        if count < 3 {
            return Err(MaskError::TooFewVertices(count));
        }
        Ok(())
    }

    /// Scale a polygon drawn on a preview back to source pixel space.
    ///
    /// `scale` is preview pixels per source pixel.
    pub fn from_preview(kind: MaskKind, preview_points: &[(f64, f64)], scale: f64) -> Self {
        let inv = if scale > 0.0 { 1.0 / scale } else { 1.0 };
        let points: Vec<(f64, f64)> = preview_points
            .iter()
            .map(|&(x, y)| (x * inv, y * inv))
            .collect();
        Self::from_points(kind, &points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let mask = Mask::include(vec![0.0, 0.0, 10.0, 0.0, 10.0, 10.0]);
        let json = serde_json::to_string(&mask).unwrap();
        assert!(json.contains(r#""type":"include""#));
        assert!(json.contains(r#""vertices":[0.0,0.0,10.0,0.0,10.0,10.0]"#));

        let parsed: Mask = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, mask);
    }

    #[test]
    fn validate_rejects_malformed_polygons() {
        assert_eq!(
            Mask::exclude(vec![0.0, 0.0, 1.0]).validate(),
            Err(MaskError::OddCoordinateCount(3))
        );
        assert_eq!(
            Mask::exclude(vec![0.0, 0.0, 1.0, 1.0]).validate(),
            Err(MaskError::TooFewVertices(2))
        );
        assert_eq!(
            Mask::exclude(vec![0.0, 0.0, f64::NAN, 1.0, 2.0, 2.0]).validate(),
            Err(MaskError::NonFinite(1))
        );
        assert!(Mask::rect(MaskKind::Include, 0.0, 0.0, 4.0, 4.0)
            .validate()
            .is_ok());
    }

    #[test]
    fn to_exclude_is_a_deep_copy() {
        let mut include = Mask::rect(MaskKind::Include, 1.0, 2.0, 3.0, 4.0);
        let copy = include.to_exclude();
        include.vertices[0] = 99.0;

        assert_eq!(copy.kind, MaskKind::Exclude);
        assert_eq!(copy.vertices[0], 1.0);
    }

    #[test]
    fn preview_points_are_stored_in_source_space() {
        let mask = Mask::from_preview(MaskKind::Include, &[(10.0, 20.0), (30.0, 20.0), (30.0, 40.0)], 0.25);
        assert_eq!(mask.vertices, vec![40.0, 80.0, 120.0, 80.0, 120.0, 160.0]);
    }
}
