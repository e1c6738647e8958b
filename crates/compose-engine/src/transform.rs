//! Placement of the source quad inside the output frame.
//!
//! The source frame is a quad spanning `[-1, 1]` on both axes of normalized
//! device space, `+y` up. Its placement is `translate * scale * rotate`:
//! rotation is applied first, then the fill-mode scale (with flips folded
//! in as negative scale), then the custom translation.

use recompose_media_model::{
    aspect_crop_scale, aspect_fit_scale, FillMode, FillModeCustomItem, Flip, Resolution, Rotation,
};

/// 2D homogeneous transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneTransform {
    m: [[f64; 3]; 3],
}

impl PlaneTransform {
    pub fn identity() -> Self {
        Self {
            m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    pub fn scale(sx: f64, sy: f64) -> Self {
        Self {
            m: [[sx, 0.0, 0.0], [0.0, sy, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    pub fn translate(tx: f64, ty: f64) -> Self {
        Self {
            m: [[1.0, 0.0, tx], [0.0, 1.0, ty], [0.0, 0.0, 1.0]],
        }
    }

    /// Counter-clockwise rotation by `degrees`.
    pub fn rotate_degrees(degrees: f64) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        Self {
            m: [[cos, -sin, 0.0], [sin, cos, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    /// `self * rhs`: `rhs` is applied first.
    pub fn then_apply(self, rhs: PlaneTransform) -> Self {
        let mut m = [[0.0; 3]; 3];
        for (r, row) in m.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                *cell = (0..3).map(|k| self.m[r][k] * rhs.m[k][c]).sum();
            }
        }
        Self { m }
    }

    pub fn inverse(self) -> Option<Self> {
        let m = self.m;
        let cofactor = |r0: usize, r1: usize, c0: usize, c1: usize| {
            m[r0][c0] * m[r1][c1] - m[r0][c1] * m[r1][c0]
        };
        let det = m[0][0] * cofactor(1, 2, 1, 2) - m[0][1] * cofactor(1, 2, 0, 2)
            + m[0][2] * cofactor(1, 2, 0, 1);
        if det.abs() < 1e-12 {
            return None;
        }
        let inv_det = 1.0 / det;
        let adj = [
            [
                cofactor(1, 2, 1, 2),
                -cofactor(0, 2, 1, 2),
                cofactor(0, 1, 1, 2),
            ],
            [
                -cofactor(1, 2, 0, 2),
                cofactor(0, 2, 0, 2),
                -cofactor(0, 1, 0, 2),
            ],
            [
                cofactor(1, 2, 0, 1),
                -cofactor(0, 2, 0, 1),
                cofactor(0, 1, 0, 1),
            ],
        ];
        let mut out = [[0.0; 3]; 3];
        for r in 0..3 {
            for c in 0..3 {
                out[r][c] = adj[r][c] * inv_det;
            }
        }
        Some(Self { m: out })
    }

    pub fn project(self, x: f64, y: f64) -> Option<(f64, f64)> {
        let xh = self.m[0][0] * x + self.m[0][1] * y + self.m[0][2];
        let yh = self.m[1][0] * x + self.m[1][1] * y + self.m[1][2];
        let wh = self.m[2][0] * x + self.m[2][1] * y + self.m[2][2];
        if wh.abs() < 1e-9 {
            return None;
        }
        Some((xh / wh, yh / wh))
    }
}

impl Default for PlaneTransform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Geometry inputs of the frame transform for one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformParams {
    pub rotation: Rotation,
    pub input: Resolution,
    pub output: Resolution,
    pub fill_mode: FillMode,
    pub custom: Option<FillModeCustomItem>,
    pub flip: Flip,
}

impl TransformParams {
    /// Placement matrix for the source quad.
    pub fn placement(&self) -> PlaneTransform {
        let direction_x = if self.flip.horizontal { -1.0 } else { 1.0 };
        let direction_y = if self.flip.vertical { -1.0 } else { 1.0 };
        let rotation = self.rotation.degrees() as f64;

        match (self.fill_mode, self.custom) {
            (FillMode::Custom, Some(item)) => {
                let base = aspect_crop_scale(self.rotation, self.input, self.output);
                let (aspect_x, aspect_y) = if item.rotate == 0.0 || item.rotate == 180.0 {
                    (1.0, 1.0)
                } else {
                    (
                        item.video_height / item.video_width,
                        item.video_width / item.video_height,
                    )
                };
                PlaneTransform::translate(item.translate_x, -item.translate_y)
                    .then_apply(PlaneTransform::scale(
                        item.scale * base[0] * aspect_x * direction_x,
                        item.scale * base[1] * aspect_y * direction_y,
                    ))
                    .then_apply(PlaneTransform::rotate_degrees(-(rotation + item.rotate)))
            }
            (fill_mode, _) => {
                let scale = if fill_mode == FillMode::PreserveAspectCrop {
                    aspect_crop_scale(self.rotation, self.input, self.output)
                } else {
                    aspect_fit_scale(self.rotation, self.input, self.output)
                };
                PlaneTransform::scale(scale[0] * direction_x, scale[1] * direction_y)
                    .then_apply(PlaneTransform::rotate_degrees(-rotation))
            }
        }
    }
}
