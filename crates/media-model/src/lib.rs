//! Recompose Media Model
//!
//! Defines the data contracts shared by every composition stage:
//! - **Formats:** Track types, codec mime types, and the per-track format
//!   negotiated with decoders, encoders, and the muxer
//! - **Samples:** Compressed buffers with presentation time and flags
//! - **Geometry:** Resolutions, rotations, and fill-mode placement math
//! - **Pipeline:** The validated configuration of one run and its resolved plan
//!
//! Every timestamp is a presentation time in microseconds.

pub mod format;
pub mod geometry;
pub mod metadata;
pub mod pipeline;
pub mod sample;

pub use format::*;
pub use geometry::*;
pub use metadata::*;
pub use pipeline::*;
pub use sample::*;
