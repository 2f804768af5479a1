//! Decoding of raw detector output into a single best proposal.
//!
//! Exactly one watermark is expected per image, so the decoder performs a
//! single linear scan for the highest-confidence proposal. There is no
//! sorting and no non-max suppression.

use tracing::debug;

use crate::error::{Error, Result};
use crate::tensor::{DetectionTensor, PARAMS_PER_PROPOSAL};

/// Parameter index of the confidence score.
const CONFIDENCE_PARAM: usize = 4;

/// One candidate region emitted by the detector.
///
/// Box values are in whatever units the model emitted: either fractions of
/// the model input size or model-input pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Proposal {
    /// Index of this proposal inside the tensor.
    pub index: usize,
    /// Box center, horizontal.
    pub center_x: f32,
    /// Box center, vertical.
    pub center_y: f32,
    /// Box width.
    pub width: f32,
    /// Box height.
    pub height: f32,
    /// Detection confidence.
    pub confidence: f32,
}

impl Proposal {
    fn read(tensor: &DetectionTensor, index: usize) -> Self {
        Self {
            index,
            center_x: tensor.value(index, 0),
            center_y: tensor.value(index, 1),
            width: tensor.value(index, 2),
            height: tensor.value(index, 3),
            confidence: tensor.value(index, CONFIDENCE_PARAM),
        }
    }
}

/// Find the highest-confidence proposal regardless of any threshold.
///
/// Ties keep the earliest proposal. NaN confidences are never selected, so
/// `Ok(None)` is returned only when every confidence is NaN.
///
/// # Errors
///
/// Returns [`Error::MalformedTensor`] if the tensor holds no proposals or
/// fewer than five parameters per proposal.
pub fn best_proposal(tensor: &DetectionTensor) -> Result<Option<Proposal>> {
    let (count, params) = tensor.dims();
    let shape = tensor.shape();

    if count == 0 {
        return Err(Error::MalformedTensor(format!(
            "shape {shape:?} holds no proposals"
        )));
    }
    if params < PARAMS_PER_PROPOSAL {
        return Err(Error::MalformedTensor(format!(
            "shape {shape:?} has {params} parameters per proposal, need {PARAMS_PER_PROPOSAL}"
        )));
    }

    debug!(
        layout = ?tensor.layout(),
        proposals = count,
        params,
        "scanning detection tensor"
    );

    let mut best: Option<(usize, f32)> = None;
    for i in 0..count {
        let conf = tensor.value(i, CONFIDENCE_PARAM);
        if conf.is_nan() {
            continue;
        }
        if best.is_none_or(|(_, max)| conf > max) {
            best = Some((i, conf));
        }
    }

    Ok(best.map(|(i, _)| Proposal::read(tensor, i)))
}

/// Select the best proposal if its confidence reaches `confidence_threshold`.
///
/// `Ok(None)` means no watermark was found, which is a valid outcome rather
/// than an error.
///
/// # Errors
///
/// Returns [`Error::MalformedTensor`] for degenerate tensor shapes.
pub fn decode(tensor: &DetectionTensor, confidence_threshold: f32) -> Result<Option<Proposal>> {
    let best = best_proposal(tensor)?;
    Ok(best.filter(|p| p.confidence >= confidence_threshold))
}
