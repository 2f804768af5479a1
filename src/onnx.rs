//! ONNX Runtime backed [`InferenceAdapter`].
//!
//! Available with the `onnx` feature. `ort` sessions need exclusive access
//! to run, so the session sits behind a mutex and concurrent workers take
//! turns on the model while the rest of their pipeline runs in parallel.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::RgbImage;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::geometry::DEFAULT_INPUT_SIZE;
use crate::inference::{to_input_tensor, ChannelOrder, InferenceAdapter};
use crate::tensor::DetectionTensor;

/// Settings for loading an [`OnnxAdapter`].
#[derive(Debug, Clone)]
pub struct OnnxConfig {
    /// Path to the `.onnx` model file.
    pub model_path: PathBuf,
    /// Side length of the square model input.
    pub input_size: u32,
    /// Memory order the model expects its input in.
    pub channel_order: ChannelOrder,
    /// Intra-op thread count; `None` keeps the runtime default.
    pub intra_threads: Option<usize>,
}

impl OnnxConfig {
    /// Default settings for the model at `model_path`.
    pub fn new(model_path: impl AsRef<Path>) -> Self {
        Self {
            model_path: model_path.as_ref().to_path_buf(),
            input_size: DEFAULT_INPUT_SIZE,
            channel_order: ChannelOrder::default(),
            intra_threads: None,
        }
    }
}

/// A single-output detector running on ONNX Runtime.
pub struct OnnxAdapter {
    session: Mutex<Session>,
    input_name: String,
    input_size: u32,
    channel_order: ChannelOrder,
}

impl OnnxAdapter {
    /// Load the model described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModelLoad`] if the file is missing or the runtime
    /// rejects it.
    pub fn load(config: &OnnxConfig) -> Result<Self> {
        let path = &config.model_path;
        if !path.is_file() {
            return Err(Error::ModelLoad(format!(
                "model file not found: {}",
                path.display()
            )));
        }
        if config.input_size == 0 {
            return Err(Error::InvalidOption("input size must be positive".into()));
        }

        info!(model = %path.display(), "creating ONNX Runtime session");
        let load_err = |e: &dyn std::fmt::Display| {
            Error::ModelLoad(format!("{}: {e}", path.display()))
        };

        let mut builder = Session::builder()
            .map_err(|e| load_err(&e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| load_err(&e))?;
        if let Some(threads) = config.intra_threads {
            builder = builder
                .with_intra_threads(threads)
                .map_err(|e| load_err(&e))?;
        }
        let session = builder.commit_from_file(path).map_err(|e| load_err(&e))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| Error::ModelLoad("model declares no inputs".into()))?;
        if session.outputs.is_empty() {
            return Err(Error::ModelLoad("model declares no outputs".into()));
        }
        debug!(input = %input_name, outputs = session.outputs.len(), "session ready");

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            input_size: config.input_size,
            channel_order: config.channel_order,
        })
    }

    fn input_shape(&self) -> Vec<usize> {
        let size = self.input_size as usize;
        match self.channel_order {
            ChannelOrder::Nchw => vec![1, 3, size, size],
            ChannelOrder::Nhwc => vec![1, size, size, 3],
        }
    }
}

impl std::fmt::Debug for OnnxAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxAdapter")
            .field("input_name", &self.input_name)
            .field("input_size", &self.input_size)
            .field("channel_order", &self.channel_order)
            .finish_non_exhaustive()
    }
}

impl InferenceAdapter for OnnxAdapter {
    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn infer(&self, image: &RgbImage) -> Result<DetectionTensor> {
        let data = to_input_tensor(image, self.input_size, self.channel_order);
        let shape = self.input_shape();
        let input = Tensor::from_array((shape.as_slice(), data))
            .map_err(|e| Error::Inference(format!("failed to build input tensor: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| Error::Inference("session mutex poisoned".into()))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(|e| Error::Inference(e.to_string()))?;

        let (out_shape, out_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::Inference(format!("failed to read output: {e}")))?;

        let dims = out_shape
            .iter()
            .map(|&d| usize::try_from(d))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| Error::MalformedTensor(format!("dynamic output shape {out_shape:?}")))?;

        DetectionTensor::new(&dims, out_data.to_vec())
    }
}
