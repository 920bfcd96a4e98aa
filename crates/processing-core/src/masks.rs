//! Mask propagation and alpha rasterization.
//!
//! An `Include` polygon on one image means "take this region from here",
//! which implies "do not take it from anywhere else". Before rasterizing,
//! every `Include` is therefore copied as an `Exclude` onto every other image
//! of the stack. Each image then gets an alpha channel: opaque by default,
//! the soft exclude value inside `Exclude` polygons, and opaque again inside
//! its own `Include` polygons, which are painted last.

use image::{GrayImage, Luma, RgbaImage};
use imageproc::drawing::draw_polygon_mut;
use imageproc::point::Point;
use rayon::prelude::*;

use stackfuse_common::config::FusionConfig;
use stackfuse_common::error::{FocusError, FocusResult};
use stackfuse_project_model::mask::{Mask, MaskKind};

/// Alpha written inside exclude regions unless configured otherwise.
pub const DEFAULT_EXCLUDE_ALPHA: u8 = 16;

/// Alpha outside any exclude region and inside include regions.
pub const OPAQUE: u8 = 255;

/// Masks each image is rasterized with.
///
/// For image `i` that is its authored list followed by an `Exclude` copy of
/// every `Include` authored on each other image, in image order then mask
/// order. The input is not modified.
pub fn effective_masks(masks_by_image: &[Vec<Mask>]) -> Vec<Vec<Mask>> {
    (0..masks_by_image.len())
        .map(|i| {
            let mut effective = masks_by_image[i].clone();
            effective.extend(
                masks_by_image
                    .iter()
                    .enumerate()
                    .filter(|&(j, _)| j != i)
                    .flat_map(|(_, masks)| masks.iter().filter(|m| m.is_include()))
                    .map(Mask::to_exclude),
            );
            effective
        })
        .collect()
}

/// Vertex coordinates are clamped to this magnitude before rounding.
const COORD_LIMIT: f64 = (1 << 20) as f64;

/// Fill `mask` with `value`, boundary included.
///
/// Vertices snap to the nearest pixel; parts outside the raster are clipped.
/// A polygon that collapses to fewer than three distinct pixels paints
/// nothing.
pub fn fill_polygon(alpha: &mut GrayImage, mask: &Mask, value: u8) {
    if alpha.width() == 0 || alpha.height() == 0 {
        return;
    }

    let points = mask.points();
    let snap = |v: f64| v.clamp(-COORD_LIMIT, COORD_LIMIT).round() as i32;
    let mut poly: Vec<Point<i32>> = Vec::with_capacity(points.len());
    for p in points {
        let point = Point::new(snap(p.x), snap(p.y));
        if poly.last() != Some(&point) {
            poly.push(point);
        }
    }
    while poly.len() > 1 && poly.first() == poly.last() {
        poly.pop();
    }
    if poly.len() < 3 {
        return;
    }
    draw_polygon_mut(alpha, &poly, Luma([value]));
}

/// Alpha raster for one image from its effective mask list.
///
/// Starts opaque, paints every `Exclude` with `exclude_alpha`, then every
/// `Include` with [`OPAQUE`], so an include always wins where they overlap.
pub fn rasterize_alpha(
    width: u32,
    height: u32,
    masks: &[Mask],
    exclude_alpha: u8,
) -> FocusResult<GrayImage> {
    for (k, mask) in masks.iter().enumerate() {
        mask.validate()
            .map_err(|e| FocusError::mask(format!("mask {k}: {e}")))?;
    }

    let mut alpha = GrayImage::from_pixel(width, height, Luma([OPAQUE]));
    for mask in masks.iter().filter(|m| m.kind == MaskKind::Exclude) {
        fill_polygon(&mut alpha, mask, exclude_alpha);
    }
    for mask in masks.iter().filter(|m| m.kind == MaskKind::Include) {
        fill_polygon(&mut alpha, mask, OPAQUE);
    }
    Ok(alpha)
}

/// Copy of `image` with `alpha` applied.
///
/// Each pixel keeps the lower of its own alpha and the raster's, so areas the
/// warp left transparent stay transparent.
pub fn apply_alpha(image: &RgbaImage, alpha: &GrayImage) -> FocusResult<RgbaImage> {
    if image.dimensions() != alpha.dimensions() {
        return Err(FocusError::mask(format!(
            "alpha raster is {:?} but image is {:?}",
            alpha.dimensions(),
            image.dimensions()
        )));
    }
    let mut out = image.clone();
    for (px, a) in out.pixels_mut().zip(alpha.pixels()) {
        px.0[3] = px.0[3].min(a.0[0]);
    }
    Ok(out)
}

/// Turns a stack plus its authored masks into alpha-masked rasters.
#[derive(Debug, Clone, Copy)]
pub struct MaskResolver {
    exclude_alpha: u8,
}

impl Default for MaskResolver {
    fn default() -> Self {
        Self::new(DEFAULT_EXCLUDE_ALPHA)
    }
}

impl From<&FusionConfig> for MaskResolver {
    fn from(config: &FusionConfig) -> Self {
        Self::new(config.exclude_alpha)
    }
}

impl MaskResolver {
    pub fn new(exclude_alpha: u8) -> Self {
        Self { exclude_alpha }
    }

    pub fn exclude_alpha(&self) -> u8 {
        self.exclude_alpha
    }

    /// Resolve every image of the stack.
    ///
    /// `masks_by_image[i]` holds the masks authored on `images[i]`; a shorter
    /// list means the remaining images have no masks. Output order matches
    /// `images`, and every image goes through the same path, so an image
    /// without masks comes back uniformly opaque.
    ///
    /// An image whose own masks are malformed fails on its own. Its
    /// well-formed `Include` masks still propagate to the other images.
    pub fn resolve(
        &self,
        images: &[RgbaImage],
        masks_by_image: &[Vec<Mask>],
    ) -> FocusResult<Vec<FocusResult<RgbaImage>>> {
        if masks_by_image.len() > images.len() {
            return Err(FocusError::mask(format!(
                "masks supplied for {} images but the stack has {}",
                masks_by_image.len(),
                images.len()
            )));
        }

        let mut authored: Vec<Vec<Mask>> = masks_by_image.to_vec();
        authored.resize_with(images.len(), Vec::new);

        let well_formed: Vec<Vec<Mask>> = authored
            .iter()
            .map(|list| {
                list.iter()
                    .filter(|m| m.validate().is_ok())
                    .cloned()
                    .collect()
            })
            .collect();
        let effective = effective_masks(&well_formed);

        let exclude_alpha = self.exclude_alpha;
        let results = images
            .par_iter()
            .zip(authored.par_iter())
            .zip(effective.par_iter())
            .enumerate()
            .map(|(i, ((image, own), masks))| {
                if let Some((k, e)) = own
                    .iter()
                    .enumerate()
                    .find_map(|(k, m)| m.validate().err().map(|e| (k, e)))
                {
                    tracing::warn!(image = i, mask = k, error = %e, "Malformed mask");
                    return Err(FocusError::mask(format!("image {i}, mask {k}: {e}")));
                }
                let (w, h) = image.dimensions();
                let alpha = rasterize_alpha(w, h, masks, exclude_alpha)?;
                tracing::debug!(
                    image = i,
                    masks = masks.len(),
                    propagated = masks.len() - own.len(),
                    "Alpha rasterized"
                );
                apply_alpha(image, &alpha)
            })
            .collect();

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rect(kind: MaskKind, x0: f64, y0: f64, x1: f64, y1: f64) -> Mask {
        Mask::rect(kind, x0, y0, x1, y1)
    }

    fn alpha_at(alpha: &GrayImage, x: u32, y: u32) -> u8 {
        alpha.get_pixel(x, y).0[0]
    }

    #[test]
    fn include_propagates_as_exclude_to_every_other_image() {
        let include = rect(MaskKind::Include, 1.0, 1.0, 5.0, 5.0);
        let authored = vec![vec![], vec![include.clone()], vec![], vec![]];
        let effective = effective_masks(&authored);

        assert_eq!(effective[1], vec![include.clone()]);
        for i in [0, 2, 3] {
            assert_eq!(effective[i].len(), 1);
            assert_eq!(effective[i][0].kind, MaskKind::Exclude);
            assert_eq!(effective[i][0].vertices, include.vertices);
        }
        assert_eq!(authored[0], Vec::<Mask>::new());
        assert_eq!(authored[1], vec![include]);
    }

    #[test]
    fn propagated_masks_follow_image_then_mask_order() {
        let a0 = rect(MaskKind::Include, 0.0, 0.0, 1.0, 1.0);
        let a1 = rect(MaskKind::Exclude, 2.0, 2.0, 3.0, 3.0);
        let a2 = rect(MaskKind::Include, 4.0, 4.0, 5.0, 5.0);
        let c0 = rect(MaskKind::Include, 6.0, 6.0, 7.0, 7.0);
        let authored = vec![vec![a0.clone(), a1.clone(), a2.clone()], vec![], vec![c0.clone()]];

        let effective = effective_masks(&authored);
        assert_eq!(
            effective[0],
            vec![a0.clone(), a1, a2.clone(), c0.to_exclude()]
        );
        assert_eq!(
            effective[1],
            vec![a0.to_exclude(), a2.to_exclude(), c0.to_exclude()]
        );
        assert_eq!(effective[2], vec![c0, a0.to_exclude(), a2.to_exclude()]);
    }

    #[test]
    fn rectangle_fills_its_interior() {
        let alpha = rasterize_alpha(30, 30, &[rect(MaskKind::Exclude, 10.0, 10.0, 20.0, 20.0)], 0)
            .unwrap();
        assert_eq!(alpha_at(&alpha, 10, 10), 0);
        assert_eq!(alpha_at(&alpha, 15, 15), 0);
        assert_eq!(alpha_at(&alpha, 19, 19), 0);
        assert_eq!(alpha_at(&alpha, 8, 15), OPAQUE);
        assert_eq!(alpha_at(&alpha, 22, 15), OPAQUE);
        assert_eq!(alpha_at(&alpha, 15, 22), OPAQUE);
        let filled = alpha.pixels().filter(|p| p.0[0] == 0).count();
        assert!((100..=121).contains(&filled), "filled = {filled}");
    }

    #[test]
    fn include_wins_over_contained_exclude_in_either_order() {
        let include = rect(MaskKind::Include, 5.0, 5.0, 30.0, 30.0);
        let exclude = rect(MaskKind::Exclude, 10.0, 10.0, 20.0, 20.0);
        for masks in [
            vec![include.clone(), exclude.clone()],
            vec![exclude.clone(), include.clone()],
        ] {
            let alpha = rasterize_alpha(40, 40, &masks, DEFAULT_EXCLUDE_ALPHA).unwrap();
            for y in 5..30 {
                for x in 5..30 {
                    assert_eq!(alpha_at(&alpha, x, y), OPAQUE, "({x}, {y})");
                }
            }
        }
    }

    #[test]
    fn exclude_uses_soft_value() {
        let alpha = rasterize_alpha(
            16,
            16,
            &[rect(MaskKind::Exclude, 0.0, 0.0, 8.0, 8.0)],
            DEFAULT_EXCLUDE_ALPHA,
        )
        .unwrap();
        assert_eq!(alpha_at(&alpha, 3, 3), DEFAULT_EXCLUDE_ALPHA);
        assert_eq!(alpha_at(&alpha, 12, 12), OPAQUE);
    }

    #[test]
    fn polygons_beyond_the_raster_are_clipped() {
        let huge = rect(MaskKind::Exclude, -100.0, -100.0, 500.0, 500.0);
        let alpha = rasterize_alpha(8, 4, &[huge], 0).unwrap();
        assert!(alpha.pixels().all(|p| p.0[0] == 0));

        let outside = rect(MaskKind::Exclude, 50.0, 50.0, 60.0, 60.0);
        let alpha = rasterize_alpha(8, 4, &[outside], 0).unwrap();
        assert!(alpha.pixels().all(|p| p.0[0] == OPAQUE));
    }

    #[test]
    fn fractional_triangle_snaps_to_pixels() {
        let tri = Mask::from_points(MaskKind::Exclude, &[(0.3, 0.2), (19.7, 1.1), (3.1, 18.6)]);
        let alpha = rasterize_alpha(20, 20, &[tri], 0).unwrap();
        assert_eq!(alpha_at(&alpha, 0, 0), 0);
        assert_eq!(alpha_at(&alpha, 5, 5), 0);
        assert_eq!(alpha_at(&alpha, 3, 15), 0);
        assert_eq!(alpha_at(&alpha, 15, 15), OPAQUE);
        assert_eq!(alpha_at(&alpha, 19, 19), OPAQUE);
    }

    #[test]
    fn closed_and_degenerate_polygons_do_not_panic() {
        let closed = Mask::from_points(
            MaskKind::Exclude,
            &[(2.0, 2.0), (12.0, 2.0), (12.0, 12.0), (2.0, 12.0), (2.0, 2.0)],
        );
        let alpha = rasterize_alpha(16, 16, &[closed], 0).unwrap();
        assert_eq!(alpha_at(&alpha, 7, 7), 0);

        let sliver = Mask::from_points(MaskKind::Exclude, &[(1.1, 1.1), (1.2, 1.3), (0.9, 1.0)]);
        let alpha = rasterize_alpha(4, 4, &[sliver], 0).unwrap();
        assert!(alpha.pixels().all(|p| p.0[0] == OPAQUE));

        let far = rect(MaskKind::Exclude, -1e15, -1e15, 1e15, 1e15);
        let alpha = rasterize_alpha(4, 4, &[far], 0).unwrap();
        assert!(alpha.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn empty_mask_list_is_uniformly_opaque() {
        let image = RgbaImage::from_pixel(6, 4, image::Rgba([10, 20, 30, 255]));
        let out = MaskResolver::default()
            .resolve(&[image.clone(), image], &[])
            .unwrap();
        assert_eq!(out.len(), 2);
        for result in out {
            let masked = result.unwrap();
            assert!(masked.pixels().all(|p| p.0 == [10, 20, 30, OPAQUE]));
        }
    }

    #[test]
    fn transparent_warp_border_stays_transparent() {
        let mut image = RgbaImage::from_pixel(8, 8, image::Rgba([90, 90, 90, 255]));
        for y in 0..8 {
            image.put_pixel(7, y, image::Rgba([0, 0, 0, 0]));
        }
        let include = rect(MaskKind::Include, 4.0, 0.0, 8.0, 8.0);
        let out = MaskResolver::new(DEFAULT_EXCLUDE_ALPHA)
            .resolve(&[image], &[vec![include]])
            .unwrap()
            .remove(0)
            .unwrap();
        assert_eq!(out.get_pixel(7, 3).0[3], 0);
        assert_eq!(out.get_pixel(5, 3).0[3], OPAQUE);
    }

    #[test]
    fn resolve_keeps_order_and_applies_propagation() {
        let images: Vec<_> = (0..3)
            .map(|i| RgbaImage::from_pixel(10, 10, image::Rgba([i * 50, 0, 0, 255])))
            .collect();
        let masks = vec![vec![], vec![rect(MaskKind::Include, 0.0, 0.0, 5.0, 10.0)]];

        let out: Vec<_> = MaskResolver::new(0)
            .resolve(&images, &masks)
            .unwrap()
            .into_iter()
            .map(Result::unwrap)
            .collect();

        for (i, img) in out.iter().enumerate() {
            assert_eq!(img.get_pixel(0, 0).0[0], i as u8 * 50);
        }
        assert_eq!(out[0].get_pixel(2, 5).0[3], 0);
        assert_eq!(out[1].get_pixel(2, 5).0[3], OPAQUE);
        assert_eq!(out[2].get_pixel(2, 5).0[3], 0);
        assert_eq!(out[2].get_pixel(7, 5).0[3], OPAQUE);
    }

    #[test]
    fn malformed_mask_fails_only_its_image() {
        let images = vec![RgbaImage::new(4, 4), RgbaImage::new(4, 4)];
        let masks = vec![vec![Mask::include(vec![0.0, 0.0, 1.0])], vec![]];
        let out = MaskResolver::default().resolve(&images, &masks).unwrap();
        assert!(matches!(out[0], Err(FocusError::Mask { .. })));
        assert!(out[1].is_ok());
    }

    #[test]
    fn too_many_mask_lists_is_an_error() {
        let images = vec![RgbaImage::new(4, 4)];
        let masks = vec![vec![], vec![]];
        assert!(MaskResolver::default().resolve(&images, &masks).is_err());
    }

    fn arb_mask() -> impl Strategy<Value = Mask> {
        (prop::bool::ANY, prop::collection::vec(0u8..100, 6..12)).prop_map(|(include, c)| {
            let kind = if include { MaskKind::Include } else { MaskKind::Exclude };
            Mask::new(kind, c.into_iter().map(f64::from).collect())
        })
    }

    proptest! {
        #[test]
        fn propagation_appends_exactly_the_other_includes(
            authored in prop::collection::vec(prop::collection::vec(arb_mask(), 0..4), 1..6)
        ) {
            let before = authored.clone();
            let effective = effective_masks(&authored);
            prop_assert_eq!(&authored, &before);
            prop_assert_eq!(effective.len(), authored.len());

            for (i, list) in effective.iter().enumerate() {
                let own = &authored[i];
                prop_assert_eq!(&list[..own.len()], &own[..]);

                let expected: Vec<Mask> = authored
                    .iter()
                    .enumerate()
                    .filter(|&(j, _)| j != i)
                    .flat_map(|(_, m)| m.iter().filter(|m| m.is_include()).cloned())
                    .map(|m| Mask::exclude(m.vertices))
                    .collect();
                prop_assert_eq!(&list[own.len()..], &expected[..]);
            }
        }
    }
}
