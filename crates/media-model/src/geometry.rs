//! Output geometry: resolutions, rotations, and fill-mode placement.
//!
//! Placement scales are expressed in normalized device coordinates: a scale
//! of `1.0` on an axis means the source quad spans the full output on that
//! axis. Scales below `1.0` leave bars, scales above `1.0` crop.

use serde::{Deserialize, Serialize};

/// Frame size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width and height exchanged.
    pub fn swapped(self) -> Self {
        Self::new(self.height, self.width)
    }

    pub fn aspect_ratio(self) -> f64 {
        self.width as f64 / self.height.max(1) as f64
    }

    pub fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Round both dimensions down to even values (4:2:0 chroma needs them),
    /// never below 2.
    pub fn even_aligned(self) -> Self {
        Self::new((self.width & !1).max(2), (self.height & !1).max(2))
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Clockwise rotation in quarter turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum Rotation {
    #[default]
    Normal,
    Rotation90,
    Rotation180,
    Rotation270,
}

impl Rotation {
    /// Normalize arbitrary degrees. Values that are not a multiple of 90
    /// fall back to `Normal`.
    pub fn from_degrees(degrees: i32) -> Self {
        match degrees.rem_euclid(360) {
            90 => Self::Rotation90,
            180 => Self::Rotation180,
            270 => Self::Rotation270,
            _ => Self::Normal,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Self::Normal => 0,
            Self::Rotation90 => 90,
            Self::Rotation180 => 180,
            Self::Rotation270 => 270,
        }
    }

    /// Rotation applied after `self`.
    pub fn combine(self, other: Rotation) -> Rotation {
        Self::from_degrees((self.degrees() + other.degrees()) as i32)
    }

    /// Whether width and height trade places under this rotation.
    pub fn swaps_axes(self) -> bool {
        matches!(self, Self::Rotation90 | Self::Rotation270)
    }
}

impl From<Rotation> for u32 {
    fn from(rotation: Rotation) -> Self {
        rotation.degrees()
    }
}

impl TryFrom<u32> for Rotation {
    type Error = String;

    fn try_from(degrees: u32) -> Result<Self, Self::Error> {
        match degrees {
            0 => Ok(Self::Normal),
            90 => Ok(Self::Rotation90),
            180 => Ok(Self::Rotation180),
            270 => Ok(Self::Rotation270),
            other => Err(format!("rotation must be 0, 90, 180 or 270, got {other}")),
        }
    }
}

/// How the source frame is placed inside the output frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillMode {
    /// Whole source visible, bars on the short axis.
    #[default]
    PreserveAspectFit,
    /// Output fully covered, source cropped on the long axis.
    PreserveAspectCrop,
    /// Placement driven by a [`FillModeCustomItem`].
    Custom,
}

/// User placement for [`FillMode::Custom`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FillModeCustomItem {
    /// Uniform scale on top of the crop fit.
    pub scale: f64,
    /// Extra clockwise rotation in degrees.
    pub rotate: f64,
    /// Horizontal offset in normalized device units.
    pub translate_x: f64,
    /// Vertical offset in normalized device units (positive = down).
    pub translate_y: f64,
    /// Source video width as seen by the placement UI.
    pub video_width: f64,
    /// Source video height as seen by the placement UI.
    pub video_height: f64,
}

impl FillModeCustomItem {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(format!("custom scale must be positive, got {}", self.scale));
        }
        if !(self.video_width > 0.0 && self.video_height > 0.0) {
            return Err(format!(
                "custom video size must be positive, got {}x{}",
                self.video_width, self.video_height
            ));
        }
        if !(self.rotate.is_finite() && self.translate_x.is_finite() && self.translate_y.is_finite())
        {
            return Err("custom rotate/translate must be finite".to_string());
        }
        Ok(())
    }
}

/// Mirror flags applied after placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Flip {
    pub horizontal: bool,
    pub vertical: bool,
}

fn oriented_input(rotation: Rotation, input: Resolution) -> Resolution {
    if rotation.swaps_axes() {
        input.swapped()
    } else {
        input
    }
}

/// Per-axis scale that fits the whole (rotated) input inside the output.
pub fn aspect_fit_scale(rotation: Rotation, input: Resolution, output: Resolution) -> [f64; 2] {
    let input = oriented_input(rotation, input);
    let aspect_in = input.aspect_ratio();
    let height_out_calc = output.width as f64 / aspect_in;

    let mut scale = [1.0, 1.0];
    if height_out_calc < output.height as f64 {
        scale[1] = height_out_calc / output.height as f64;
    } else {
        scale[0] = output.height as f64 * aspect_in / output.width as f64;
    }
    scale
}

/// Per-axis scale that covers the whole output with the (rotated) input.
pub fn aspect_crop_scale(rotation: Rotation, input: Resolution, output: Resolution) -> [f64; 2] {
    let input = oriented_input(rotation, input);
    let aspect_in = input.aspect_ratio();
    let aspect_out = output.aspect_ratio();

    let mut scale = [1.0, 1.0];
    if aspect_in > aspect_out {
        let width_out_calc = output.height as f64 * aspect_in;
        scale[0] = width_out_calc / output.width as f64;
    } else {
        let height_out_calc = output.width as f64 / aspect_in;
        scale[1] = height_out_calc / output.height as f64;
    }
    scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fit_portrait_into_landscape_letterboxes() {
        let scale = aspect_fit_scale(
            Rotation::Normal,
            Resolution::new(1080, 1920),
            Resolution::new(1920, 1080),
        );
        assert!((scale[1] - 1.0).abs() < 1e-9);
        assert!(scale[0] < 1.0);
        assert!((scale[0] - 0.31640625).abs() < 1e-9);
    }

    #[test]
    fn test_fit_rotated_portrait_fills_landscape() {
        let scale = aspect_fit_scale(
            Rotation::Rotation90,
            Resolution::new(1080, 1920),
            Resolution::new(1920, 1080),
        );
        assert!((scale[0] - 1.0).abs() < 1e-9);
        assert!((scale[1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_crop_covers_output() {
        let scale = aspect_crop_scale(
            Rotation::Normal,
            Resolution::new(1080, 1920),
            Resolution::new(1920, 1080),
        );
        assert!((scale[0] - 1.0).abs() < 1e-9);
        assert!(scale[1] > 1.0);
    }

    #[test]
    fn test_rotation_normalization() {
        assert_eq!(Rotation::from_degrees(-90), Rotation::Rotation270);
        assert_eq!(Rotation::from_degrees(450), Rotation::Rotation90);
        assert_eq!(Rotation::from_degrees(45), Rotation::Normal);
        assert_eq!(
            Rotation::Rotation270.combine(Rotation::Rotation180),
            Rotation::Rotation90
        );
    }

    #[test]
    fn test_rotation_serde_uses_degrees() {
        assert_eq!(serde_json::to_string(&Rotation::Rotation90).unwrap(), "90");
        let parsed: Rotation = serde_json::from_str("270").unwrap();
        assert_eq!(parsed, Rotation::Rotation270);
        assert!(serde_json::from_str::<Rotation>("45").is_err());
    }

    #[test]
    fn test_even_alignment() {
        assert_eq!(Resolution::new(641, 479).even_aligned(), Resolution::new(640, 478));
        assert_eq!(Resolution::new(1, 1).even_aligned(), Resolution::new(2, 2));
    }

    #[test]
    fn test_custom_item_validation() {
        let mut item = FillModeCustomItem {
            scale: 1.0,
            rotate: 0.0,
            translate_x: 0.0,
            translate_y: 0.0,
            video_width: 1080.0,
            video_height: 1920.0,
        };
        assert!(item.validate().is_ok());
        item.scale = 0.0;
        assert!(item.validate().is_err());
    }

    fn rotation_strategy() -> impl Strategy<Value = Rotation> {
        prop_oneof![
            Just(Rotation::Normal),
            Just(Rotation::Rotation90),
            Just(Rotation::Rotation180),
            Just(Rotation::Rotation270),
        ]
    }

    proptest! {
        #[test]
        fn prop_fit_never_crops(
            rotation in rotation_strategy(),
            iw in 16u32..4096, ih in 16u32..4096,
            ow in 16u32..4096, oh in 16u32..4096,
        ) {
            let scale = aspect_fit_scale(rotation, Resolution::new(iw, ih), Resolution::new(ow, oh));
            prop_assert!(scale[0] <= 1.0 + 1e-9);
            prop_assert!(scale[1] <= 1.0 + 1e-9);
            prop_assert!((scale[0] - 1.0).abs() < 1e-9 || (scale[1] - 1.0).abs() < 1e-9);
        }

        #[test]
        fn prop_crop_never_leaves_bars(
            rotation in rotation_strategy(),
            iw in 16u32..4096, ih in 16u32..4096,
            ow in 16u32..4096, oh in 16u32..4096,
        ) {
            let scale = aspect_crop_scale(rotation, Resolution::new(iw, ih), Resolution::new(ow, oh));
            prop_assert!(scale[0] >= 1.0 - 1e-9);
            prop_assert!(scale[1] >= 1.0 - 1e-9);
        }
    }
}
