//! Multi-resolution projective alignment of an image stack.
//!
//! Every image is aligned against the anchor (the middle of the stack):
//!
//! ```text
//! anchor ──► gray ──► pyramid ─────────────┐
//!                                          ▼
//! target ──► gray ──► pyramid ──► ECC solve, coarsest → finest ──► warp
//!                                                                   │
//! target ───────────────────────────────► inverse-mapped resample ◄─┘
//!                                                   │
//!                                                   ▼
//!                                          aligned (anchor size)
//! ```
//!
//! Non-anchor images are solved concurrently on a [`WorkerPool`] owned by
//! the call; cancellation goes through the caller's `CancelFlag`.

pub mod anchor;
pub mod ecc;
pub mod engine;
pub mod homography;
pub mod pool;
pub mod pyramid;
pub mod warp;

pub use anchor::select_anchor;
pub use ecc::{estimate_warp, EccError, EccParams, WarpEstimate};
pub use engine::{AlignmentEngine, AlignmentOptions, AlignmentReport, ImageFailure};
pub use homography::Homography;
pub use pool::{default_pool_size, WorkerPool};
pub use pyramid::{default_level_count, GrayPlane, Pyramid};
pub use warp::apply_warp;
