//! Recompose Composition Engine
//!
//! Drives one source through independently stepped codec stages into a
//! single container, on one worker thread, without ever blocking on a codec.
//!
//! # Pipeline Architecture
//!
//! ```text
//! source.mp4 ── Demuxer ──┬── video samples ── Decoder ── DecoderSurface
//!                         │                                   │
//!                         │                      FrameRenderer + FrameFilter
//!                         │                                   │
//!                         │                    EncoderSurface ── Encoder ──┐
//!                         │                                                │
//!                         └── audio samples ── passthrough ────────────────┤
//!                                         └── Decoder ── AudioChannel ──   │
//!                                                        Encoder ──────────┤
//!                                                                          ▼
//!                                                              MuxRender ── output.mp4
//! ```
//!
//! Still-image sources skip the demuxer and decoder: one pre-converted
//! frame is submitted to the encoder at a fixed rate.
//!
//! Platform codecs, demuxers and muxers plug in through [`MediaBackend`].
//! [`synthetic::SyntheticBackend`] is a deterministic software backend used
//! by the tests and the `simulate` command.

pub mod audio;
pub mod backend;
pub mod composer;
pub mod drain;
pub mod engine;
pub mod mux;
pub mod pixel;
pub mod probe;
pub mod software;
pub mod surface;
pub mod synthetic;
pub mod transform;
pub mod video;

pub use backend::*;
pub use composer::*;
pub use drain::{DrainState, StepContext, TrackComposer};
pub use engine::*;
pub use mux::MuxRender;
