//! CPU frame renderer.
//!
//! Nearest-neighbour sampling of RGBA frames through the inverse placement
//! matrix. Output pixels whose centre falls outside the placed quad get the
//! clear colour.

use recompose_common::{ComposeError, ComposeResult};
use recompose_media_model::Resolution;

use crate::backend::{FrameRenderer, PixelFormat, VideoFrame};
use crate::transform::PlaneTransform;

#[derive(Debug, Default)]
pub struct SoftwareRenderer {
    frames_rendered: u64,
}

impl SoftwareRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }
}

impl FrameRenderer for SoftwareRenderer {
    fn name(&self) -> &str {
        "software"
    }

    fn render(
        &mut self,
        source: &VideoFrame,
        placement: &PlaneTransform,
        output: Resolution,
        clear_color: [u8; 4],
    ) -> ComposeResult<VideoFrame> {
        if source.format != PixelFormat::Rgba {
            return Err(ComposeError::unsupported(format!(
                "software renderer only samples RGBA frames, got {:?}",
                source.format
            )));
        }
        if output.is_empty() || source.resolution().is_empty() {
            return Err(ComposeError::unsupported("cannot render an empty frame"));
        }
        let inverse = placement
            .inverse()
            .ok_or_else(|| ComposeError::unsupported("placement matrix is not invertible"))?;

        let (out_w, out_h) = (output.width as usize, output.height as usize);
        let (src_w, src_h) = (source.width as usize, source.height as usize);
        let mut data = Vec::with_capacity(out_w * out_h * 4);

        for oy in 0..out_h {
            let ndc_y = 1.0 - (oy as f64 + 0.5) / out_h as f64 * 2.0;
            for ox in 0..out_w {
                let ndc_x = (ox as f64 + 0.5) / out_w as f64 * 2.0 - 1.0;
                let pixel = inverse
                    .project(ndc_x, ndc_y)
                    .filter(|(sx, sy)| sx.abs() <= 1.0 && sy.abs() <= 1.0)
                    .map(|(sx, sy)| {
                        let u = (((sx + 1.0) / 2.0 * src_w as f64) as usize).min(src_w - 1);
                        let v = (((1.0 - sy) / 2.0 * src_h as f64) as usize).min(src_h - 1);
                        let offset = (v * src_w + u) * 4;
                        [
                            source.data[offset],
                            source.data[offset + 1],
                            source.data[offset + 2],
                            source.data[offset + 3],
                        ]
                    })
                    .unwrap_or(clear_color);
                data.extend_from_slice(&pixel);
            }
        }

        self.frames_rendered += 1;
        Ok(VideoFrame {
            width: output.width,
            height: output.height,
            format: PixelFormat::Rgba,
            data,
        })
    }
}
