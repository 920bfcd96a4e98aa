//! Stackfuse Processing Core
//!
//! The image-side engines of a focus-stacking run:
//! - **Alignment:** coarse-to-fine ECC homography estimation and warping of
//!   every image onto the anchor's frame, on a bounded worker pool
//! - **Masks:** include/exclude propagation and per-image alpha rasters
//! - **Preview:** bounded FIFO cache of viewport-sized bitmaps
//!
//! Nothing here spawns processes or touches the project file. Image decoding
//! only happens in the preview loader.

pub mod alignment;
pub mod masks;
pub mod preview;

pub use alignment::{AlignmentEngine, AlignmentOptions, AlignmentReport, ImageFailure};
pub use masks::{effective_masks, rasterize_alpha, MaskResolver};
pub use preview::{PreviewCache, PreviewSurface, PreviewSurfaces, ViewportSize};
