//! Inference adapter seam and the shared, lazily loaded adapter cell.
//!
//! The detector itself is a black box: given an image it returns a
//! [`DetectionTensor`]. Loading a model is expensive, so the adapter is held
//! in a [`SharedAdapter`] that loads at most once per process and is then
//! shared read-only between workers.

use std::fmt;

use image::imageops::{self, FilterType};
use image::RgbImage;
use once_cell::sync::OnceCell;
use tracing::info;

use crate::error::{Error, Result};
use crate::tensor::DetectionTensor;

/// A watermark detector that maps an image to a raw output tensor.
pub trait InferenceAdapter: Send + Sync {
    /// Side length of the square model input, in pixels.
    fn input_size(&self) -> u32;

    /// Run the model on `image`.
    ///
    /// Implementations resize and normalize the image themselves, usually
    /// through [`to_input_tensor`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Inference`] or [`Error::MalformedTensor`] when the
    /// backend fails or produces an unusable tensor.
    fn infer(&self, image: &RgbImage) -> Result<DetectionTensor>;
}

/// Memory order of the model input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
    /// `[1, 3, H, W]`, the usual ONNX export layout.
    #[default]
    Nchw,
    /// `[1, H, W, 3]`, the usual TFLite layout.
    Nhwc,
}

/// Resize `image` to `size` x `size` and scale channels into `[0, 1]`.
///
/// Resizing is bilinear and does not preserve aspect ratio; detection boxes
/// are mapped back with independent horizontal and vertical scales.
#[must_use]
pub fn to_input_tensor(image: &RgbImage, size: u32, order: ChannelOrder) -> Vec<f32> {
    let resized = if image.dimensions() == (size, size) {
        image.clone()
    } else {
        imageops::resize(image, size, size, FilterType::Triangle)
    };

    let plane = (size as usize) * (size as usize);
    let mut data = vec![0.0_f32; plane * 3];

    for (x, y, px) in resized.enumerate_pixels() {
        let offset = (y as usize) * (size as usize) + x as usize;
        for ch in 0..3 {
            let value = f32::from(px[ch]) / 255.0;
            let idx = match order {
                ChannelOrder::Nchw => ch * plane + offset,
                ChannelOrder::Nhwc => offset * 3 + ch,
            };
            data[idx] = value;
        }
    }

    data
}

type Loader<A> = Box<dyn Fn() -> Result<A> + Send + Sync>;

/// Initialize-once holder for an [`InferenceAdapter`].
///
/// The cell is either uninitialized or ready. The first [`get`](Self::get)
/// runs the loader while concurrent callers block on that same load. A failed
/// load leaves the cell uninitialized, so a later call retries.
pub struct SharedAdapter<A> {
    cell: OnceCell<A>,
    loader: Option<Loader<A>>,
}

impl<A: InferenceAdapter> SharedAdapter<A> {
    /// Defer loading until the adapter is first needed.
    pub fn lazy<F>(loader: F) -> Self
    where
        F: Fn() -> Result<A> + Send + Sync + 'static,
    {
        Self {
            cell: OnceCell::new(),
            loader: Some(Box::new(loader)),
        }
    }

    /// Wrap an adapter that is already loaded.
    pub fn ready(adapter: A) -> Self {
        Self {
            cell: OnceCell::with_value(adapter),
            loader: None,
        }
    }

    /// Whether the adapter has been loaded.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Return the adapter, loading it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdapterInit`] wrapping the loader's error.
    pub fn get(&self) -> Result<&A> {
        self.cell.get_or_try_init(|| {
            let loader = self.loader.as_ref().ok_or_else(|| {
                Error::AdapterInit(Box::new(Error::ModelLoad("no loader configured".into())))
            })?;
            info!("loading inference adapter");
            let adapter = loader().map_err(|e| match e {
                Error::AdapterInit(_) => e,
                other => Error::AdapterInit(Box::new(other)),
            })?;
            info!(input_size = adapter.input_size(), "inference adapter ready");
            Ok(adapter)
        })
    }
}

impl<A> fmt::Debug for SharedAdapter<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedAdapter")
            .field("ready", &self.cell.get().is_some())
            .finish_non_exhaustive()
    }
}
