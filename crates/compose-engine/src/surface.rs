//! Frame hand-off between decoder, renderer, and encoder.

use recompose_common::{ComposeError, ComposeResult};
use recompose_media_model::Resolution;

use crate::backend::{FrameFilter, FrameRenderer, FrameSurface, TimedFrame, VideoFrame};
use crate::transform::{PlaneTransform, TransformParams};

/// Receives decoded frames and draws them, placed and filtered, at the
/// output size.
pub struct DecoderSurface {
    surface: FrameSurface,
    renderer: Box<dyn FrameRenderer>,
    filter: Box<dyn FrameFilter>,
    placement: PlaneTransform,
    output: Resolution,
    current: Option<TimedFrame>,
    released: bool,
}

impl DecoderSurface {
    pub fn new(
        renderer: Box<dyn FrameRenderer>,
        mut filter: Box<dyn FrameFilter>,
        params: &TransformParams,
    ) -> ComposeResult<Self> {
        filter.setup(params.output)?;
        tracing::debug!(
            renderer = renderer.name(),
            filter = filter.name(),
            rotation = params.rotation.degrees(),
            fill_mode = ?params.fill_mode,
            input = %params.input,
            output = %params.output,
            "Decoder surface ready"
        );
        Ok(Self {
            surface: FrameSurface::new(),
            renderer,
            filter,
            placement: params.placement(),
            output: params.output,
            current: None,
            released: false,
        })
    }

    /// Surface the decoder renders into.
    pub fn surface(&self) -> FrameSurface {
        self.surface.clone()
    }

    /// Latch the next frame the decoder rendered. A rendered buffer that
    /// did not produce a frame is a decoder fault.
    pub fn await_new_image(&mut self) -> ComposeResult<()> {
        match self.surface.pop() {
            Some(frame) => {
                self.current = Some(frame);
                Ok(())
            }
            None => Err(ComposeError::codec(
                "decoder surface",
                "frame wait timed out: rendered buffer produced no frame",
            )),
        }
    }

    /// Draw the latched frame at the output size.
    pub fn draw_image(&mut self, presentation_time_us: i64) -> ComposeResult<VideoFrame> {
        let latched = self
            .current
            .take()
            .ok_or_else(|| ComposeError::codec("decoder surface", "no frame latched"))?;
        let placed = self.renderer.render(
            &latched.frame,
            &self.placement,
            self.output,
            self.filter.clear_color(),
        )?;
        self.filter.apply(placed, presentation_time_us)
    }

    pub fn release(&mut self) -> ComposeResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.surface.clear();
        self.current = None;
        self.filter.release();
        self.renderer.release()
    }
}

/// Encoder input surface with an explicit presentation time.
pub struct EncoderSurface {
    surface: FrameSurface,
    presentation_time_us: i64,
}

impl EncoderSurface {
    pub fn new(surface: FrameSurface) -> Self {
        Self {
            surface,
            presentation_time_us: 0,
        }
    }

    pub fn set_presentation_time(&mut self, presentation_time_us: i64) {
        self.presentation_time_us = presentation_time_us;
    }

    /// Submit a drawn frame to the encoder.
    pub fn swap_buffers(&mut self, frame: VideoFrame) {
        self.surface.push(TimedFrame {
            frame,
            presentation_time_us: self.presentation_time_us,
        });
    }

    pub fn release(&mut self) {
        self.surface.clear();
    }
}
