//! Remove photo watermarks by transplanting pixels from a clean reference.
//!
//! A single-class object detector locates the watermark. Its raw output
//! tensor is decoded into the single best proposal, which is mapped onto the
//! photo's pixel grid, padded and widened to cover the whole mark. The
//! region is then overwritten with the same pixels from a visually matching
//! image that does not carry the watermark.
//!
//! # Quick Start
//!
//! ```no_run
//! # #[cfg(feature = "onnx")]
//! # fn main() -> watermark_transplant::Result<()> {
//! use std::path::Path;
//! use watermark_transplant::onnx::{OnnxAdapter, OnnxConfig};
//! use watermark_transplant::{ImagePair, ProcessOptions, SharedAdapter, TransplantEngine};
//!
//! let config = OnnxConfig::new("yolov8_wm.onnx");
//! let engine = TransplantEngine::new(SharedAdapter::lazy(move || OnnxAdapter::load(&config)));
//!
//! let pairs = [ImagePair::new("photo.jpg", "photo_clean.jpg")];
//! let report = engine.process_batch(&pairs, Path::new("out"), &ProcessOptions::default())?;
//! print!("{}", report.log());
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "onnx"))]
//! # fn main() {}
//! ```
//!
//! # Custom detectors
//!
//! Any backend can be plugged in by implementing [`InferenceAdapter`]; it
//! only has to turn an image into a `[1, 5, N]` or `[1, N, 5]` tensor.

#![deny(missing_docs)]

pub mod compositing;
pub mod detection;
mod engine;
pub mod error;
pub mod geometry;
pub mod inference;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod tensor;

pub use compositing::{composite, Region};
pub use detection::{decode, Proposal};
pub use engine::{
    is_supported_image, output_path_for, pair_directories, save_image, BatchReport, ImagePair,
    Located, Outcome, ProcessOptions, ProcessResult, Repair, TransplantEngine,
    DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_JPEG_QUALITY, DEFAULT_OUTPUT_PREFIX,
};
pub use error::{Error, FailureKind, Result};
pub use geometry::{map_to_rect, GeometryConfig, PaddingPolicy, Rect};
pub use inference::{InferenceAdapter, SharedAdapter};
pub use tensor::{DetectionTensor, Layout};
