use anyhow::Result;
use image::RgbImage;

/// Alpha matte: grayscale values where 0.0 = background, 1.0 = foreground
/// Dimensions match the input frame dimensions
pub type Matte = Vec<f32>;

/// Trait for segmentation models
/// Allows swapping the ONNX backend for the passthrough one (or a fake in tests)
pub trait SegmentationModel {
    /// Process a frame and return a foreground score map
    ///
    /// # Arguments
    /// * `frame` - Input RGB frame
    ///
    /// # Returns
    /// * Scores in 0.0-1.0, flattened in row-major order at frame size
    fn segment(&mut self, frame: &RgbImage) -> Result<Matte>;

    /// Reset internal state
    ///
    /// Called at the start of every stream and every patient device
    fn reset_state(&mut self) {
        // Default implementation: no-op for stateless models
    }
}

/// Treats every pixel as foreground. Used when no model is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl SegmentationModel for Passthrough {
    fn segment(&mut self, frame: &RgbImage) -> Result<Matte> {
        let (width, height) = frame.dimensions();
        Ok(vec![1.0; width as usize * height as usize])
    }
}
