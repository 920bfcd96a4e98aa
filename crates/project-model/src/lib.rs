//! Stackfuse Project Model
//!
//! Defines the core data contracts for Stackfuse projects:
//! - **Masks:** Include/Exclude polygons authored per image
//! - **Project:** The ordered image stack and its masks, as persisted on disk
//! - **Naming:** File names of aligned and masked intermediates
//!
//! Mask vertices are always stored in the owning image's full-resolution
//! pixel space, independent of any preview zoom or pan.

pub mod mask;
pub mod naming;
pub mod project;

pub use mask::*;
pub use naming::*;
pub use project::*;
