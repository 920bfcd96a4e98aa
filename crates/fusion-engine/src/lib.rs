//! Stackfuse Fusion Engine
//!
//! Drives a focus stack from source files to a single fused image.
//! Heavy work runs on blocking threads; the async layer only sequences
//! stages and relays progress and cancellation.
//!
//! # Pipeline Architecture
//!
//! ```text
//! inputs (png/jpeg/tiff) ──► Load
//!                              │
//!                              ├── Align (built-in ECC, or align_image_stack)
//!                              │        └─► work/aligned_NNNN.png
//!                              │
//! project masks ───────────────┼── Resolve masks (includes → excludes elsewhere)
//!                              │        └─► work/masked_<stem>.png
//!                              │
//!                              ▼
//!                         Fuse (enfuse)
//!                              │
//!                              ▼
//!                       work/stacked.tif
//! ```

pub mod intake;
pub mod pipeline;
pub mod stage;
pub mod tools;

pub use pipeline::{
    run_pipeline, PipelineJob, PipelineOutcome, PipelineOutput, PipelineProgress,
    PipelineStage, ProgressCallback,
};
pub use tools::{EnfuseBackend, ExternalAligner, FusionBackend};
