mod display;
mod image_file;
mod video;

pub use display::WindowDisplay;
pub use image_file::{resolve_image_output, save_image, MirroredDirectory, SingleFile};
pub use video::FfmpegWriter;

use anyhow::Result;
use image::RgbImage;

/// Trait for output destinations
pub trait OutputSink {
    /// Write a frame to the output
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    /// Frames accepted so far
    fn frames_written(&self) -> u64;

    /// Polled once per frame; `true` asks the driver to stop.
    fn cancelled(&mut self) -> bool {
        false
    }

    /// Flush and release the underlying resource.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}
