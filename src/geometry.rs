//! Mapping of a detector proposal onto a pixel rectangle in the target image.
//!
//! Detectors often capture only part of a watermark, so the box is padded
//! and, depending on [`PaddingPolicy`], widened before use. The rectangle
//! returned here is unclamped; clamping happens in
//! [`compositing::clamp_rect`](crate::compositing::clamp_rect).

use crate::detection::Proposal;
use crate::error::{Error, Result};

/// Default square model input size.
pub const DEFAULT_INPUT_SIZE: u32 = 640;
/// Default fractional padding applied to the detected box.
pub const DEFAULT_PADDING_RATIO: f32 = 0.1;
/// Default widening factor for boxes detected in the left half.
pub const DEFAULT_WIDEN_FACTOR: f32 = 3.5;

/// An axis-aligned rectangle in target image pixels.
///
/// May extend past the image on any side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width in pixels.
    pub width: i32,
    /// Height in pixels.
    pub height: i32,
}

impl Rect {
    /// Exclusive right edge.
    #[must_use]
    pub fn right(&self) -> i64 {
        i64::from(self.x) + i64::from(self.width)
    }

    /// Exclusive bottom edge.
    #[must_use]
    pub fn bottom(&self) -> i64 {
        i64::from(self.y) + i64::from(self.height)
    }
}

/// How the detected box is grown before compositing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PaddingPolicy {
    /// Pad every side by `padding_ratio` of the box size.
    Symmetric,
    /// Pad left, top and bottom. Boxes centered in the right half of the
    /// model input are stretched to the image's right edge; all others have
    /// their padded width multiplied by `widen_factor`.
    ExtendRight {
        /// Width multiplier for boxes in the left half.
        widen_factor: f32,
    },
}

impl Default for PaddingPolicy {
    fn default() -> Self {
        Self::ExtendRight {
            widen_factor: DEFAULT_WIDEN_FACTOR,
        }
    }
}

/// Tunables for [`map_to_rect`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryConfig {
    /// Side length of the square model input.
    pub input_size: u32,
    /// Fraction of the box size added as padding.
    pub padding_ratio: f32,
    /// Padding and widening policy.
    pub policy: PaddingPolicy,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            padding_ratio: DEFAULT_PADDING_RATIO,
            policy: PaddingPolicy::default(),
        }
    }
}

impl GeometryConfig {
    /// Check that every field is in range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] for a zero input size, a negative or
    /// non-finite padding ratio, or a non-positive widen factor.
    pub fn validate(&self) -> Result<()> {
        if self.input_size == 0 {
            return Err(Error::InvalidOption("input size must be positive".into()));
        }
        if !self.padding_ratio.is_finite() || self.padding_ratio < 0.0 {
            return Err(Error::InvalidOption(format!(
                "padding ratio must be a non-negative number, got {}",
                self.padding_ratio
            )));
        }
        if let PaddingPolicy::ExtendRight { widen_factor } = self.policy {
            if !widen_factor.is_finite() || widen_factor <= 0.0 {
                return Err(Error::InvalidOption(format!(
                    "widen factor must be positive, got {widen_factor}"
                )));
            }
        }
        Ok(())
    }
}

#[allow(clippy::cast_possible_truncation)]
fn round_px(v: f32) -> i32 {
    // `as` saturates on overflow and maps NaN to 0.
    v.round() as i32
}

/// Convert a proposal into an unclamped rectangle in target image space.
///
/// Box values below one pixel of width are taken as fractions of
/// `config.input_size` and scaled up first. All edges are rounded to the
/// nearest pixel.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn map_to_rect(
    proposal: &Proposal,
    image_width: u32,
    image_height: u32,
    config: &GeometryConfig,
) -> Rect {
    let input = config.input_size as f32;

    let normalized = proposal.width < 1.0;
    let unit = if normalized { input } else { 1.0 };
    let cx = proposal.center_x * unit;
    let cy = proposal.center_y * unit;
    let w = proposal.width * unit;
    let h = proposal.height * unit;

    let scale_x = image_width as f32 / input;
    let scale_y = image_height as f32 / input;

    let box_w = w * scale_x;
    let box_h = h * scale_y;
    let x = cx * scale_x - box_w / 2.0;
    let y = cy * scale_y - box_h / 2.0;

    let pad_w = box_w * config.padding_ratio;
    let pad_h = box_h * config.padding_ratio;

    let left = x - pad_w;
    let top = y - pad_h;
    let padded_w = box_w + 2.0 * pad_w;
    let padded_h = box_h + 2.0 * pad_h;

    let rect_x = round_px(left);
    let rect_y = round_px(top);
    let rect_h = round_px(padded_h);

    let rect_w = match config.policy {
        PaddingPolicy::Symmetric => round_px(padded_w),
        PaddingPolicy::ExtendRight { widen_factor } => {
            if cx > input / 2.0 {
                let right = i64::from(image_width) - i64::from(rect_x);
                i32::try_from(right).unwrap_or(i32::MAX)
            } else {
                round_px(padded_w * widen_factor)
            }
        }
    };

    Rect {
        x: rect_x,
        y: rect_y,
        width: rect_w,
        height: rect_h,
    }
}
