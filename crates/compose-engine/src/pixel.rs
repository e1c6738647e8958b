//! Still-image loading and RGBA to YUV 4:2:0 conversion.

use recompose_common::{ComposeError, ComposeResult};
use recompose_media_model::{ColorFormat, RgbaPixels, StillImage};

use crate::backend::{PixelFormat, VideoFrame};

/// Decode a still image into RGBA pixels.
pub fn load_still_image(still: &StillImage) -> ComposeResult<RgbaPixels> {
    match still {
        StillImage::Rgba(pixels) => Ok(pixels.clone()),
        StillImage::File(path) => {
            if !path.exists() {
                return Err(ComposeError::FileNotFound { path: path.clone() });
            }
            let decoded = image::open(path).map_err(|e| {
                ComposeError::unsupported_source(format!(
                    "cannot decode image {}: {e}",
                    path.display()
                ))
            })?;
            let rgba = decoded.to_rgba8();
            let (width, height) = rgba.dimensions();
            tracing::debug!(path = %path.display(), width, height, "Loaded still image");
            RgbaPixels::new(width, height, rgba.into_raw())
        }
    }
}

/// BT.601 studio-swing luma/chroma for one RGB triple.
fn yuv(r: i32, g: i32, b: i32) -> (u8, u8, u8) {
    let y = ((77 * r + 150 * g + 29 * b + 128) >> 8).clamp(0, 255);
    let u = (((-43 * r - 84 * g + 127 * b + 128) >> 8) + 128).clamp(0, 255);
    let v = (((127 * r - 106 * g - 21 * b + 128) >> 8) + 128).clamp(0, 255);
    (y as u8, u as u8, v as u8)
}

fn convert(pixels: &RgbaPixels, interleaved_chroma: bool) -> ComposeResult<Vec<u8>> {
    let (width, height) = (pixels.width as usize, pixels.height as usize);
    if width % 2 != 0 || height % 2 != 0 {
        return Err(ComposeError::configuration(format!(
            "4:2:0 conversion needs even dimensions, got {width}x{height}"
        )));
    }
    let luma_len = width * height;
    let chroma_len = luma_len / 4;
    let mut out = vec![0u8; luma_len + 2 * chroma_len];
    let (luma, chroma) = out.split_at_mut(luma_len);

    for row in 0..height {
        for col in 0..width {
            let p = (row * width + col) * 4;
            let (r, g, b) = (
                pixels.data[p] as i32,
                pixels.data[p + 1] as i32,
                pixels.data[p + 2] as i32,
            );
            let (y, u, v) = yuv(r, g, b);
            luma[row * width + col] = y;

            if row % 2 == 0 && col % 2 == 0 {
                let c = (row / 2) * (width / 2) + col / 2;
                if interleaved_chroma {
                    chroma[2 * c] = u;
                    chroma[2 * c + 1] = v;
                } else {
                    chroma[c] = u;
                    chroma[chroma_len + c] = v;
                }
            }
        }
    }
    Ok(out)
}

/// Y plane followed by interleaved U/V.
pub fn rgba_to_nv12(pixels: &RgbaPixels) -> ComposeResult<Vec<u8>> {
    convert(pixels, true)
}

/// Y plane followed by the U plane and the V plane.
pub fn rgba_to_i420(pixels: &RgbaPixels) -> ComposeResult<Vec<u8>> {
    convert(pixels, false)
}

/// Convert to the layout an encoder declared for buffer input.
pub fn frame_for_color_format(
    pixels: &RgbaPixels,
    color_format: ColorFormat,
) -> ComposeResult<VideoFrame> {
    let (format, data) = match color_format {
        ColorFormat::Yuv420SemiPlanar => (PixelFormat::Nv12, rgba_to_nv12(pixels)?),
        ColorFormat::Yuv420Planar => (PixelFormat::I420, rgba_to_i420(pixels)?),
        ColorFormat::Rgba => (PixelFormat::Rgba, pixels.data.clone()),
        ColorFormat::Surface => {
            return Err(ComposeError::codec_configuration(
                "still-image frames need a buffer-input color format, not a surface",
            ))
        }
    };
    Ok(VideoFrame {
        width: pixels.width,
        height: pixels.height,
        format,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_colours() {
        assert_eq!(yuv(0, 0, 0), (0, 128, 128));
        assert_eq!(yuv(255, 255, 255), (255, 128, 128));
        let (y, u, v) = yuv(255, 0, 0);
        assert_eq!(y, 77);
        assert!(u < 128);
        assert_eq!(v, 255);
    }

    #[test]
    fn test_nv12_layout() {
        let pixels = RgbaPixels::solid(4, 2, [255, 0, 0, 255]);
        let nv12 = rgba_to_nv12(&pixels).unwrap();
        assert_eq!(nv12.len(), 12);
        assert!(nv12[..8].iter().all(|&y| y == 77));
        let (_, u, v) = yuv(255, 0, 0);
        assert_eq!(&nv12[8..], &[u, v, u, v]);
    }

    #[test]
    fn test_i420_layout() {
        let pixels = RgbaPixels::solid(4, 2, [0, 0, 255, 255]);
        let i420 = rgba_to_i420(&pixels).unwrap();
        let (_, u, v) = yuv(0, 0, 255);
        assert_eq!(&i420[8..], &[u, u, v, v]);
    }

    #[test]
    fn test_odd_dimensions_rejected() {
        let pixels = RgbaPixels::solid(3, 2, [0, 0, 0, 255]);
        assert!(rgba_to_nv12(&pixels).is_err());
    }

    #[test]
    fn test_missing_file_reported() {
        let err = load_still_image(&StillImage::File("/nonexistent/bg.png".into())).unwrap_err();
        assert!(matches!(err, ComposeError::FileNotFound { .. }));
    }

    #[test]
    fn test_surface_format_rejected_for_still_frames() {
        let pixels = RgbaPixels::solid(2, 2, [0, 0, 0, 255]);
        assert!(frame_for_color_format(&pixels, ColorFormat::Surface).is_err());
    }
}
