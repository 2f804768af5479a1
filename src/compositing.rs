//! Hard region replacement from a clean reference image.
//!
//! The reference is resampled to the target's dimensions, then every pixel
//! of the clamped region is overwritten with the reference pixel at the
//! same coordinates. There is no blending or feathering.

use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::error::{Error, Result};
use crate::geometry::Rect;

/// A rectangle clamped inside an image, guaranteed non-empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels, at least 1.
    pub width: u32,
    /// Height in pixels, at least 1.
    pub height: u32,
}

impl Region {
    /// Whether `(px, py)` lies inside the region.
    #[must_use]
    pub fn contains(&self, px: u32, py: u32) -> bool {
        px >= self.x && px < self.x + self.width && py >= self.y && py < self.y + self.height
    }
}

impl From<Region> for Rect {
    #[allow(clippy::cast_possible_wrap)]
    fn from(region: Region) -> Self {
        Self {
            x: region.x as i32,
            y: region.y as i32,
            width: region.width as i32,
            height: region.height as i32,
        }
    }
}

/// Output of [`composite`].
#[derive(Debug, Clone)]
pub struct Composited {
    /// The target image with the region replaced.
    pub image: RgbImage,
    /// The region that was replaced.
    pub region: Region,
}

/// Clamp `rect` into a `width` x `height` image.
///
/// The top-left corner is clamped to `[0, width-1] x [0, height-1]` and the
/// bottom-right corner to `[x1+1, width] x [y1+1, height]`. Rectangles that
/// do not overlap the image are rejected instead of being squeezed into a
/// one-pixel strip at the border.
///
/// # Errors
///
/// Returns [`Error::EmptyRegion`] if the image is empty, the rectangle has
/// no area, or it lies entirely outside the image.
pub fn clamp_rect(rect: Rect, width: u32, height: u32) -> Result<Region> {
    let empty = || Error::EmptyRegion {
        x: rect.x,
        y: rect.y,
        width: rect.width,
        height: rect.height,
        image_width: width,
        image_height: height,
    };

    let (w, h) = (i64::from(width), i64::from(height));
    let (x, y) = (i64::from(rect.x), i64::from(rect.y));
    let (right, bottom) = (rect.right(), rect.bottom());

    if w == 0 || h == 0 || rect.width <= 0 || rect.height <= 0 {
        return Err(empty());
    }
    if x >= w || y >= h || right <= 0 || bottom <= 0 {
        return Err(empty());
    }

    let x1 = x.clamp(0, w - 1);
    let y1 = y.clamp(0, h - 1);
    let x2 = right.clamp(x1 + 1, w);
    let y2 = bottom.clamp(y1 + 1, h);

    let to_u32 = |v: i64| u32::try_from(v).map_err(|_| empty());
    Ok(Region {
        x: to_u32(x1)?,
        y: to_u32(y1)?,
        width: to_u32(x2 - x1)?,
        height: to_u32(y2 - y1)?,
    })
}

/// Resample `reference` to exactly `width` x `height` with bilinear filtering.
///
/// Returns a plain copy when the sizes already match.
#[must_use]
pub fn resample_to_match(reference: &RgbImage, width: u32, height: u32) -> RgbImage {
    if reference.dimensions() == (width, height) {
        return reference.clone();
    }
    imageops::resize(reference, width, height, FilterType::Triangle)
}

/// Replace `rect` in `target` with the same pixels from `reference`.
///
/// `reference` may differ slightly in resolution and is resampled first.
///
/// # Errors
///
/// Returns [`Error::EmptyRegion`] if `rect` has no area inside `target`.
pub fn composite(target: &RgbImage, reference: &RgbImage, rect: Rect) -> Result<Composited> {
    let (width, height) = target.dimensions();
    let region = clamp_rect(rect, width, height)?;
    let reference = resample_to_match(reference, width, height);

    let mut image = target.clone();
    copy_region(&mut image, &reference, region);

    Ok(Composited { image, region })
}

/// Overwrite `region` of `dst` with `src`. Both images must share dimensions.
fn copy_region(dst: &mut RgbImage, src: &RgbImage, region: Region) {
    debug_assert_eq!(dst.dimensions(), src.dimensions());
    for dy in 0..region.height {
        for dx in 0..region.width {
            let (px, py) = (region.x + dx, region.y + dy);
            dst.put_pixel(px, py, *src.get_pixel(px, py));
        }
    }
}
