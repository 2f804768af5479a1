//! Raw detection output tensor and its layout.
//!
//! Single-class YOLO-style exports emit a `[1, D1, D2]` tensor where one
//! trailing dimension holds the box parameters `(cx, cy, w, h, conf)` and the
//! other enumerates proposals. Which is which depends on the export pipeline.

use crate::error::{Error, Result};

/// Number of parameters read per proposal: four box values and a confidence.
pub const PARAMS_PER_PROPOSAL: usize = 5;

/// Ordering of the two trailing tensor dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `[1, params, N]`: parameter `p` of proposal `i` lives at `p * N + i`.
    Standard,
    /// `[1, N, params]`: parameter `p` of proposal `i` lives at `i * params + p`.
    Transposed,
}

impl Layout {
    /// Infer the layout from the two trailing dimensions.
    ///
    /// The proposal dimension is the larger one, so `d1 > d2` means the
    /// proposals run along dimension 1.
    #[must_use]
    pub fn infer(d1: usize, d2: usize) -> Self {
        if d1 > d2 {
            Self::Transposed
        } else {
            Self::Standard
        }
    }
}

/// An immutable `[1, D1, D2]` float tensor produced by the detector.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionTensor {
    shape: [usize; 3],
    data: Vec<f32>,
}

impl DetectionTensor {
    /// Build a tensor from a shape slice and row-major data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedTensor`] if the shape is not rank 3, the
    /// leading dimension is not 1, or `data` does not match the shape.
    pub fn new(shape: &[usize], data: Vec<f32>) -> Result<Self> {
        let [batch, d1, d2] = <[usize; 3]>::try_from(shape).map_err(|_| {
            Error::MalformedTensor(format!("expected rank 3, got shape {shape:?}"))
        })?;

        if batch != 1 {
            return Err(Error::MalformedTensor(format!(
                "expected batch dimension 1, got shape {shape:?}"
            )));
        }

        let expected = d1.checked_mul(d2).ok_or_else(|| {
            Error::MalformedTensor(format!("shape {shape:?} overflows element count"))
        })?;
        if data.len() != expected {
            return Err(Error::MalformedTensor(format!(
                "shape {shape:?} needs {expected} values, got {}",
                data.len()
            )));
        }

        Ok(Self {
            shape: [batch, d1, d2],
            data,
        })
    }

    /// Tensor shape as `[1, D1, D2]`.
    #[must_use]
    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    /// Flat row-major values.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Layout inferred from the trailing dimensions.
    #[must_use]
    pub fn layout(&self) -> Layout {
        Layout::infer(self.shape[1], self.shape[2])
    }

    /// Number of proposals and parameters per proposal under [`Self::layout`].
    #[must_use]
    pub fn dims(&self) -> (usize, usize) {
        match self.layout() {
            Layout::Standard => (self.shape[2], self.shape[1]),
            Layout::Transposed => (self.shape[1], self.shape[2]),
        }
    }

    /// Value of parameter `param` for proposal `proposal`.
    ///
    /// Callers must keep `proposal` below the proposal count and `param`
    /// below the parameter count reported by [`Self::dims`].
    #[must_use]
    pub(crate) fn value(&self, proposal: usize, param: usize) -> f32 {
        let (count, params) = self.dims();
        let idx = match self.layout() {
            Layout::Standard => param * count + proposal,
            Layout::Transposed => proposal * params + param,
        };
        self.data[idx]
    }

    /// Return the same proposals in the opposite layout.
    #[must_use]
    pub fn transposed(&self) -> Self {
        let [batch, d1, d2] = self.shape;
        let mut data = Vec::with_capacity(self.data.len());
        for j in 0..d2 {
            for i in 0..d1 {
                data.push(self.data[i * d2 + j]);
            }
        }
        Self {
            shape: [batch, d2, d1],
            data,
        }
    }
}
