mod humanseg;
mod preprocess;
mod refine;
pub mod types;

pub use humanseg::HumanSeg;
pub use refine::{threshold_mask, TemporalFusion};
pub use types::{Matte, Passthrough, SegmentationModel};

use anyhow::Result;
use std::path::Path;

/// Portrait model input size (width, height) for landscape frames
pub const DEFAULT_INPUT_SIZE: (u32, u32) = (398, 224);

/// Create the segmentation backend: ONNX when a model is given, passthrough otherwise
pub fn create_model(
    model_path: Option<&Path>,
    vertical_screen: bool,
    use_gpu: bool,
) -> Result<Box<dyn SegmentationModel>> {
    let Some(model_path) = model_path else {
        tracing::info!("Running in passthrough mode (no segmentation)");
        return Ok(Box::new(Passthrough));
    };

    let (width, height) = DEFAULT_INPUT_SIZE;
    let input_size = if vertical_screen {
        (height, width)
    } else {
        (width, height)
    };

    let model = HumanSeg::new(model_path, input_size, use_gpu)?;
    Ok(Box::new(model))
}
