//! Error types for the watermark-transplant crate.

use std::fmt;
use std::path::PathBuf;

/// Errors that can occur while locating and transplanting a watermark region.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An input image could not be read or decoded into a pixel buffer.
    #[error("failed to decode {}: {source}", .path.display())]
    ImageDecode {
        /// Path of the offending file.
        path: PathBuf,
        /// Underlying decoder error.
        source: image::ImageError,
    },

    /// The inference backend failed while running the model.
    #[error("inference failed: {0}")]
    Inference(String),

    /// The model returned a tensor whose shape cannot hold detection proposals.
    #[error("malformed detection tensor: {0}")]
    MalformedTensor(String),

    /// The detected rectangle does not overlap the image at all.
    #[error(
        "region ({x}, {y}, {width}x{height}) is empty inside {image_width}x{image_height} image"
    )]
    EmptyRegion {
        /// Left edge of the unclamped rectangle.
        x: i32,
        /// Top edge of the unclamped rectangle.
        y: i32,
        /// Width of the unclamped rectangle.
        width: i32,
        /// Height of the unclamped rectangle.
        height: i32,
        /// Target image width in pixels.
        image_width: u32,
        /// Target image height in pixels.
        image_height: u32,
    },

    /// The model file could not be loaded by the inference backend.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// One-time initialization of the shared inference adapter failed.
    #[error("failed to initialize inference adapter: {0}")]
    AdapterInit(Box<Error>),

    /// A processing option is outside its accepted range.
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// Another pair in the same batch already writes to this output path.
    #[error("output {} is already written by an earlier pair", .0.display())]
    OutputCollision(PathBuf),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The output image format is not supported.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// An error occurred while encoding an output image.
    #[error("image processing error: {0}")]
    Image(#[from] image::ImageError),
}

/// Coarse classification of a failure, used in batch logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Image bytes could not be parsed.
    Decode,
    /// The model failed or returned an unusable tensor.
    Inference,
    /// The detected region has no area inside the image.
    Geometry,
    /// The composited image could not be written out.
    Persistence,
    /// Batch-level setup failed (adapter initialization, options).
    Setup,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Decode => "decode",
            Self::Inference => "inference",
            Self::Geometry => "geometry",
            Self::Persistence => "persistence",
            Self::Setup => "setup",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Classify this error for per-image reporting.
    #[must_use]
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::ImageDecode { .. } => FailureKind::Decode,
            Self::Inference(_) | Self::MalformedTensor(_) => FailureKind::Inference,
            Self::EmptyRegion { .. } => FailureKind::Geometry,
            Self::Io(_)
            | Self::Image(_)
            | Self::UnsupportedFormat(_)
            | Self::OutputCollision(_) => FailureKind::Persistence,
            Self::ModelLoad(_) | Self::AdapterInit(_) | Self::InvalidOption(_) => {
                FailureKind::Setup
            }
        }
    }
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let io_err = Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(io_err.to_string().contains("gone"));

        let unsupported = Error::UnsupportedFormat("tiff".to_string());
        assert!(unsupported.to_string().contains("tiff"));

        let empty = Error::EmptyRegion {
            x: 2000,
            y: 10,
            width: 40,
            height: 20,
            image_width: 1080,
            image_height: 1920,
        };
        let msg = empty.to_string();
        assert!(msg.contains("40x20"));
        assert!(msg.contains("1080x1920"));

        let init = Error::AdapterInit(Box::new(Error::ModelLoad("no such file".into())));
        assert!(init.to_string().contains("no such file"));
    }

    #[test]
    fn failure_kinds_follow_taxonomy() {
        let decode = Error::ImageDecode {
            path: PathBuf::from("a.jpg"),
            source: image::ImageError::IoError(std::io::Error::other("truncated")),
        };
        assert_eq!(decode.failure_kind(), FailureKind::Decode);
        assert_eq!(
            Error::MalformedTensor("rank 2".into()).failure_kind(),
            FailureKind::Inference
        );
        assert_eq!(
            Error::Inference("boom".into()).failure_kind(),
            FailureKind::Inference
        );
        assert_eq!(
            Error::UnsupportedFormat("Gif".into()).failure_kind(),
            FailureKind::Persistence
        );
        assert_eq!(
            Error::AdapterInit(Box::new(Error::ModelLoad("x".into()))).failure_kind(),
            FailureKind::Setup
        );
        assert_eq!(
            Error::OutputCollision(PathBuf::from("out/Fixed_x.png")).failure_kind(),
            FailureKind::Persistence
        );
        assert_eq!(FailureKind::Geometry.to_string(), "geometry");
    }
}
