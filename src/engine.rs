//! Per-image pipeline and batch driver.
//!
//! Each image runs decode → infer → map → composite → save in sequence.
//! Per-image failures are recorded in the batch log and never abort the
//! remaining pairs; only adapter initialization and invalid options are
//! fatal to a batch.

use std::collections::HashSet;
use std::fmt;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat, RgbImage};
use tracing::{debug, info, warn};

use crate::compositing::{self, Region};
use crate::detection::{self, Proposal};
use crate::error::{Error, FailureKind, Result};
use crate::geometry::{self, GeometryConfig, PaddingPolicy, Rect};
use crate::inference::{InferenceAdapter, SharedAdapter};

/// Default minimum confidence for a detection.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.4;
/// Default prefix for output file names.
pub const DEFAULT_OUTPUT_PREFIX: &str = "Fixed_";
/// Default JPEG encoder quality.
pub const DEFAULT_JPEG_QUALITY: u8 = 98;

/// Options controlling watermark processing behavior.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Minimum confidence for the best proposal (0.0-1.0).
    pub confidence_threshold: f32,
    /// Fraction of the detected box size added as padding.
    pub padding_ratio: f32,
    /// How the padded box is widened.
    pub policy: PaddingPolicy,
    /// Prefix prepended to the watermarked file name for the output.
    pub output_prefix: String,
    /// Quality used when the output is JPEG (1-100).
    pub jpeg_quality: u8,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            padding_ratio: geometry::DEFAULT_PADDING_RATIO,
            policy: PaddingPolicy::default(),
            output_prefix: DEFAULT_OUTPUT_PREFIX.to_string(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl ProcessOptions {
    /// Geometry settings for a model with the given input size.
    #[must_use]
    pub fn geometry(&self, input_size: u32) -> GeometryConfig {
        GeometryConfig {
            input_size,
            padding_ratio: self.padding_ratio,
            policy: self.policy,
        }
    }

    /// Check that the batch-level options are in range.
    ///
    /// Geometry options depend on the model input size and are checked by
    /// [`GeometryConfig::validate`] once the adapter is loaded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] describing the first bad value.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(Error::InvalidOption(format!(
                "confidence threshold must be between 0.0 and 1.0, got {}",
                self.confidence_threshold
            )));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(Error::InvalidOption(format!(
                "JPEG quality must be between 1 and 100, got {}",
                self.jpeg_quality
            )));
        }
        if self.output_prefix.contains(['/', '\\']) {
            return Err(Error::InvalidOption(format!(
                "output prefix must not contain path separators: {:?}",
                self.output_prefix
            )));
        }
        Ok(())
    }
}

/// A watermarked image and the clean reference used to repair it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePair {
    /// Image carrying the watermark.
    pub watermarked: PathBuf,
    /// Visually matching image without the watermark.
    pub reference: PathBuf,
}

impl ImagePair {
    /// Pair two paths.
    pub fn new(watermarked: impl Into<PathBuf>, reference: impl Into<PathBuf>) -> Self {
        Self {
            watermarked: watermarked.into(),
            reference: reference.into(),
        }
    }
}

/// The selected proposal and where it lands in the target image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Located {
    /// Best proposal above the threshold.
    pub proposal: Proposal,
    /// Unclamped rectangle in target pixels.
    pub rect: Rect,
}

/// Result of an in-memory [`TransplantEngine::repair`].
#[derive(Debug, Clone)]
pub enum Repair {
    /// The region was found and replaced.
    Repaired {
        /// The composited image.
        image: RgbImage,
        /// Region that was replaced.
        region: Region,
        /// Confidence of the detection.
        confidence: f32,
    },
    /// No proposal reached the threshold.
    NotFound {
        /// Highest confidence seen, if any proposal had a number.
        max_confidence: Option<f32>,
    },
}

/// Outcome of processing one image pair.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Watermark located, replaced and saved.
    Repaired {
        /// Region that was replaced.
        region: Region,
        /// Confidence of the detection.
        confidence: f32,
        /// Where the result was written.
        output: PathBuf,
    },
    /// No watermark found; nothing was written.
    NotFound {
        /// Highest confidence seen, if any.
        max_confidence: Option<f32>,
    },
    /// Processing failed.
    Failed {
        /// Failure classification.
        kind: FailureKind,
        /// Human-readable detail.
        message: String,
    },
}

/// Result of processing a single image pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessResult {
    /// The pair that was processed.
    pub pair: ImagePair,
    /// What happened.
    pub outcome: Outcome,
}

impl ProcessResult {
    /// Whether the watermark was removed and saved.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Repaired { .. })
    }

    fn file_name(&self) -> String {
        let path = &self.pair.watermarked;
        path.file_name().map_or_else(
            || path.display().to_string(),
            |f| f.to_string_lossy().to_string(),
        )
    }
}

impl fmt::Display for ProcessResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.file_name();
        match &self.outcome {
            Outcome::Repaired {
                region, confidence, ..
            } => write!(
                f,
                "[OK] {name}: replaced {}x{} at ({}, {}) ({:.0}% confidence)",
                region.width,
                region.height,
                region.x,
                region.y,
                confidence * 100.0
            ),
            Outcome::NotFound {
                max_confidence: Some(conf),
            } => write!(
                f,
                "[MISS] {name}: no watermark found (max confidence {:.0}%)",
                conf * 100.0
            ),
            Outcome::NotFound {
                max_confidence: None,
            } => write!(f, "[MISS] {name}: no watermark found"),
            Outcome::Failed { kind, message } => write!(f, "[FAIL] {name}: {kind}: {message}"),
        }
    }
}

/// Aggregate of a batch run.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Per-pair results, in input order.
    pub results: Vec<ProcessResult>,
}

impl BatchReport {
    /// Number of images repaired and saved.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    /// Number of images where no watermark was found.
    #[must_use]
    pub fn not_found_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::NotFound { .. }))
            .count()
    }

    /// Number of images that failed.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Failed { .. }))
            .count()
    }

    /// Human-readable log with one line per image.
    #[must_use]
    pub fn log(&self) -> String {
        self.results.iter().map(|r| format!("{r}\n")).collect()
    }
}

/// Watermark locator and repairer.
///
/// Holds the shared inference adapter; create once and reuse for every
/// batch so the model is loaded a single time.
#[derive(Debug)]
pub struct TransplantEngine<A> {
    adapter: SharedAdapter<A>,
}

impl<A: InferenceAdapter> TransplantEngine<A> {
    /// Create an engine around a shared adapter.
    pub fn new(adapter: SharedAdapter<A>) -> Self {
        Self { adapter }
    }

    /// The shared adapter.
    pub fn adapter(&self) -> &SharedAdapter<A> {
        &self.adapter
    }

    /// Run the detector and return the best proposal above the threshold.
    ///
    /// # Errors
    ///
    /// Returns adapter initialization, inference, or tensor errors.
    pub fn detect(&self, image: &RgbImage, opts: &ProcessOptions) -> Result<Option<Proposal>> {
        let tensor = self.adapter.get()?.infer(image)?;
        detection::decode(&tensor, opts.confidence_threshold)
    }

    /// Detect the watermark and map it onto `image`'s pixel grid.
    ///
    /// # Errors
    ///
    /// Returns adapter initialization, inference, or tensor errors.
    pub fn locate(&self, image: &RgbImage, opts: &ProcessOptions) -> Result<Option<Located>> {
        let adapter = self.adapter.get()?;
        let tensor = adapter.infer(image)?;
        let Some(proposal) = detection::decode(&tensor, opts.confidence_threshold)? else {
            return Ok(None);
        };
        let config = opts.geometry(adapter.input_size());
        let rect = geometry::map_to_rect(&proposal, image.width(), image.height(), &config);
        Ok(Some(Located { proposal, rect }))
    }

    /// Locate the watermark in `target` and replace it from `reference`.
    ///
    /// # Errors
    ///
    /// Returns inference errors, or [`Error::EmptyRegion`] if the detected
    /// rectangle falls outside the image.
    pub fn repair(
        &self,
        target: &RgbImage,
        reference: &RgbImage,
        opts: &ProcessOptions,
    ) -> Result<Repair> {
        let adapter = self.adapter.get()?;
        let tensor = adapter.infer(target)?;
        let best = detection::best_proposal(&tensor)?;

        let proposal = match best {
            Some(p) if p.confidence >= opts.confidence_threshold => p,
            other => {
                return Ok(Repair::NotFound {
                    max_confidence: other.map(|p| p.confidence),
                })
            }
        };

        let config = opts.geometry(adapter.input_size());
        let rect = geometry::map_to_rect(&proposal, target.width(), target.height(), &config);
        debug!(?proposal, ?rect, "mapped detection");

        let composited = compositing::composite(target, reference, rect)?;
        Ok(Repair::Repaired {
            image: composited.image,
            region: composited.region,
            confidence: proposal.confidence,
        })
    }

    fn try_process_pair(
        &self,
        pair: &ImagePair,
        output_dir: &Path,
        opts: &ProcessOptions,
    ) -> Result<Outcome> {
        let target = load_rgb(&pair.watermarked)?;
        let reference = load_rgb(&pair.reference)?;

        match self.repair(&target, &reference, opts)? {
            Repair::NotFound { max_confidence } => Ok(Outcome::NotFound { max_confidence }),
            Repair::Repaired {
                image,
                region,
                confidence,
            } => {
                let output = output_path_for(&pair.watermarked, output_dir, &opts.output_prefix);
                if !output_dir.exists() {
                    std::fs::create_dir_all(output_dir)?;
                }
                save_image(&image, &output, opts.jpeg_quality)?;
                Ok(Outcome::Repaired {
                    region,
                    confidence,
                    output,
                })
            }
        }
    }

    /// Process a single pair: load both images, repair, save.
    ///
    /// The output is written to `output_dir` under
    /// [`output_path_for`]'s name. Errors are captured in the returned
    /// [`ProcessResult`] rather than propagated.
    #[must_use]
    pub fn process_pair(
        &self,
        pair: &ImagePair,
        output_dir: &Path,
        opts: &ProcessOptions,
    ) -> ProcessResult {
        let outcome = match self.try_process_pair(pair, output_dir, opts) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(file = %pair.watermarked.display(), error = %e, "processing failed");
                Outcome::Failed {
                    kind: e.failure_kind(),
                    message: e.to_string(),
                }
            }
        };

        let result = ProcessResult {
            pair: pair.clone(),
            outcome,
        };
        debug!("{result}");
        result
    }

    /// Process every pair, writing outputs into `output_dir`.
    ///
    /// Uses parallel iteration when the `cli` feature is enabled (via rayon).
    /// Results keep the order of `pairs`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] for bad options and
    /// [`Error::AdapterInit`] if the adapter cannot be loaded. Both are
    /// raised before any image is touched.
    pub fn process_batch(
        &self,
        pairs: &[ImagePair],
        output_dir: &Path,
        opts: &ProcessOptions,
    ) -> Result<BatchReport> {
        opts.validate()?;
        let adapter = self.adapter.get()?;
        opts.geometry(adapter.input_size()).validate()?;

        info!(pairs = pairs.len(), "starting batch");
        let collisions = output_collisions(pairs, output_dir, &opts.output_prefix);

        let run = |(pair, collision): (&ImagePair, &Option<PathBuf>)| match collision {
            Some(output) => {
                let e = Error::OutputCollision(output.clone());
                warn!(file = %pair.watermarked.display(), error = %e, "skipping pair");
                ProcessResult {
                    pair: pair.clone(),
                    outcome: Outcome::Failed {
                        kind: e.failure_kind(),
                        message: e.to_string(),
                    },
                }
            }
            None => self.process_pair(pair, output_dir, opts),
        };

        #[cfg(feature = "cli")]
        let results: Vec<ProcessResult> = {
            use rayon::prelude::*;
            pairs.par_iter().zip(collisions.par_iter()).map(run).collect()
        };

        #[cfg(not(feature = "cli"))]
        let results: Vec<ProcessResult> = pairs.iter().zip(collisions.iter()).map(run).collect();

        let report = BatchReport { results };
        info!(
            repaired = report.success_count(),
            not_found = report.not_found_count(),
            failed = report.failed_count(),
            "batch finished"
        );
        Ok(report)
    }
}

/// For each pair, the output path it would share with an earlier pair.
fn output_collisions(
    pairs: &[ImagePair],
    output_dir: &Path,
    prefix: &str,
) -> Vec<Option<PathBuf>> {
    let mut seen = HashSet::new();
    pairs
        .iter()
        .map(|pair| {
            let output = output_path_for(&pair.watermarked, output_dir, prefix);
            if seen.insert(output.clone()) {
                None
            } else {
                Some(output)
            }
        })
        .collect()
}

fn load_rgb(path: &Path) -> Result<RgbImage> {
    image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|source| Error::ImageDecode {
            path: path.to_path_buf(),
            source,
        })
}

/// Check if a file has a supported image extension.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => matches!(
            ext.to_lowercase().as_str(),
            "jpg" | "jpeg" | "png" | "webp" | "bmp"
        ),
        None => false,
    }
}

/// Save an RGB image, choosing the encoder from the file extension.
///
/// # Errors
///
/// Returns an error if the format is unsupported or writing fails.
pub fn save_image(img: &RgbImage, path: &Path, jpeg_quality: u8) -> Result<()> {
    let format =
        ImageFormat::from_path(path).map_err(|e| Error::UnsupportedFormat(e.to_string()))?;

    match format {
        ImageFormat::Jpeg => {
            let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut file, jpeg_quality)
                .encode_image(img)?;
            file.flush()?;
        }
        ImageFormat::Png | ImageFormat::WebP | ImageFormat::Bmp => {
            DynamicImage::ImageRgb8(img.clone()).save_with_format(path, format)?;
        }
        _ => {
            return Err(Error::UnsupportedFormat(format!("{format:?}")));
        }
    }

    Ok(())
}

/// Derive the output path for a watermarked input.
///
/// Example: `"in/photo.jpg"` with prefix `"Fixed_"` and output directory
/// `"out"` becomes `"out/Fixed_photo.jpg"`.
#[must_use]
pub fn output_path_for(watermarked: &Path, output_dir: &Path, prefix: &str) -> PathBuf {
    let name = watermarked.file_name().unwrap_or_default().to_string_lossy();
    output_dir.join(format!("{prefix}{name}"))
}

/// Pair images from two directories by file stem.
///
/// Every supported image in `watermarked_dir` is matched with the supported
/// image in `reference_dir` sharing its stem. Unmatched files are skipped
/// with a warning. Pairs are sorted by watermarked file name.
///
/// # Errors
///
/// Returns [`Error::Io`] if either directory cannot be read.
pub fn pair_directories(watermarked_dir: &Path, reference_dir: &Path) -> Result<Vec<ImagePair>> {
    let references = list_images(reference_dir)?;
    let mut pairs = Vec::new();

    for watermarked in list_images(watermarked_dir)? {
        let stem = watermarked.file_stem();
        match references.iter().find(|r| r.file_stem() == stem) {
            Some(reference) => pairs.push(ImagePair::new(watermarked, reference.clone())),
            None => warn!(file = %watermarked.display(), "no reference image with matching name"),
        }
    }

    Ok(pairs)
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().map(|ft| ft.is_file()).unwrap_or(false))
        .map(|e| e.path())
        .filter(|p| is_supported_image(p))
        .collect();
    files.sort();
    Ok(files)
}
