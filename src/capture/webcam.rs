use super::CaptureSource;
use anyhow::{Context, Result};
use image::RgbImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;

use crate::error::PipelineError;

/// Live camera. Frames keep coming until a read fails.
pub struct WebcamCapture {
    camera: Camera,
    width: u32,
    height: u32,
}

impl WebcamCapture {
    pub fn new(device_index: u32) -> Result<Self> {
        tracing::info!("Initializing webcam {}", device_index);

        let index = CameraIndex::Index(device_index);
        let requested =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestResolution);

        let mut camera = Camera::new(index, requested)
            .context("Failed to open camera")
            .context(PipelineError::open("camera", device_index.to_string()))?;

        camera
            .open_stream()
            .context("Failed to open camera stream")
            .context(PipelineError::open("camera", device_index.to_string()))?;

        let resolution = camera.resolution();
        let (width, height) = (resolution.width(), resolution.height());
        tracing::info!("Webcam initialized at {}x{}", width, height);

        Ok(Self {
            camera,
            width,
            height,
        })
    }
}

impl CaptureSource for WebcamCapture {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let decoded = self
            .camera
            .frame()
            .and_then(|frame| frame.decode_image::<RgbFormat>());

        match decoded {
            Ok(frame) => Ok(Some(frame)),
            Err(err) => {
                tracing::warn!("Camera read failed, stopping: {}", err);
                Ok(None)
            }
        }
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for WebcamCapture {
    fn drop(&mut self) {
        if let Err(err) = self.camera.stop_stream() {
            tracing::debug!("Failed to stop camera stream: {}", err);
        }
    }
}
