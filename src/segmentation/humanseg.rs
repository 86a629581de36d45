use super::preprocess::Preprocessor;
use super::types::{Matte, SegmentationModel};
use anyhow::{anyhow, ensure, Context, Result};
use image::RgbImage;
use ndarray::{s, ArrayView4};
use ort::execution_providers::CUDAExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

fn ort_error(err: impl std::fmt::Display) -> anyhow::Error {
    anyhow!("{err}")
}

/// PP-HumanSeg style portrait segmentation model
///
/// The network takes one normalized NCHW frame and returns per-class scores
/// with shape [1, 2, H, W]; channel 1 is the person score.
pub struct HumanSeg {
    session: Session,
    preprocessor: Preprocessor,
}

impl HumanSeg {
    /// Create a new model from an ONNX file
    ///
    /// # Arguments
    /// * `model_path` - Path to the ONNX model file
    /// * `input_size` - Model input (width, height)
    /// * `use_gpu` - Register the CUDA execution provider
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: (u32, u32), use_gpu: bool) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading segmentation model from {}", path.display());

        let mut builder = Session::builder()
            .map_err(ort_error)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(ort_error)?
            .with_intra_threads(4)
            .map_err(ort_error)?;

        if use_gpu {
            tracing::info!("Requesting CUDA execution provider");
            builder = builder
                .with_execution_providers([CUDAExecutionProvider::default().build()])
                .map_err(ort_error)?;
        }

        let session = builder
            .commit_from_file(path)
            .map_err(ort_error)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        let (width, height) = input_size;
        tracing::info!("Segmentation model loaded, input {}x{}", width, height);

        Ok(Self {
            session,
            preprocessor: Preprocessor::new(width, height),
        })
    }
}

impl SegmentationModel for HumanSeg {
    fn segment(&mut self, frame: &RgbImage) -> Result<Matte> {
        let _span = tracing::debug_span!("humanseg_segment").entered();

        let input = self.preprocessor.preprocess(frame)?;
        let (width, height) = self.preprocessor.target_size();
        let shape = [1usize, 3, height as usize, width as usize];
        let tensor = Tensor::from_array((shape, input.into_raw_vec())).map_err(ort_error)?;

        let _infer_span = tracing::debug_span!("inference").entered();
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(ort_error)
            .context("Failed to run inference")?;
        drop(_infer_span);

        let (out_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(ort_error)?;
        let dims: Vec<usize> = out_shape.iter().map(|&d| d as usize).collect();
        ensure!(dims.len() == 4, "unexpected model output shape {:?}", dims);

        let scores = ArrayView4::from_shape((dims[0], dims[1], dims[2], dims[3]), data)?;
        // single-channel models emit the person score directly
        let channel = if dims[1] >= 2 { 1 } else { 0 };
        let matte_height = dims[2] as u32;
        let matte_width = dims[3] as u32;

        let matte_flat: Vec<f32> = scores.slice(s![0, channel, .., ..]).iter().copied().collect();

        let (frame_width, frame_height) = frame.dimensions();
        Preprocessor::postprocess_matte(
            &matte_flat,
            matte_width,
            matte_height,
            frame_width,
            frame_height,
        )
    }
}
