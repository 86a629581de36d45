mod images;
mod video;
mod webcam;

pub use images::{is_image, patient_batches, DeviceBatch, ImageSequence};
pub use video::FfmpegReader;
pub use webcam::WebcamCapture;

use anyhow::Result;
use image::RgbImage;

/// Trait for sources that hand out frames one at a time
pub trait CaptureSource {
    /// Read the next frame. `None` means the source is exhausted, which is
    /// the normal end of a run rather than an error.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;

    /// Get the resolution of captured frames
    fn resolution(&self) -> (u32, u32);
}

/// A finite, seekable frame stream (a video file)
pub trait VideoStream: CaptureSource {
    /// Seek back to the first frame
    fn rewind(&mut self) -> Result<()>;

    /// Frame count reported by the container, 0 when unknown. Reads may
    /// end before this count is reached.
    fn frame_count(&self) -> u64;

    fn fps(&self) -> f64;
}

#[cfg(test)]
pub mod testing {
    use super::{CaptureSource, VideoStream};
    use anyhow::Result;
    use image::{Rgb, RgbImage};

    /// Whether `ffmpeg` and `ffprobe` can be run. Tests that need real
    /// encoding return early without them.
    pub fn ffmpeg_available() -> bool {
        ["ffmpeg", "ffprobe"].iter().all(|tool| {
            std::process::Command::new(tool)
                .arg("-version")
                .output()
                .is_ok_and(|out| out.status.success())
        })
    }

    /// Solid frame whose red channel encodes `index`.
    pub fn numbered_frame(index: u8, width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([index, 0, 0]))
    }

    /// In-memory video: frame `i` is `numbered_frame(i)`.
    pub struct FrameList {
        frames: Vec<RgbImage>,
        cursor: usize,
        reported_count: u64,
        pub reads: usize,
        pub rewinds: usize,
    }

    impl FrameList {
        pub fn numbered(count: u8, width: u32, height: u32) -> Self {
            let frames: Vec<_> = (0..count).map(|i| numbered_frame(i, width, height)).collect();
            Self {
                reported_count: frames.len() as u64,
                frames,
                cursor: 0,
                reads: 0,
                rewinds: 0,
            }
        }

        /// Pretend the container header reports `count` frames.
        pub fn with_reported_count(mut self, count: u64) -> Self {
            self.reported_count = count;
            self
        }
    }

    impl CaptureSource for FrameList {
        fn next_frame(&mut self) -> Result<Option<RgbImage>> {
            self.reads += 1;
            let frame = self.frames.get(self.cursor).cloned();
            if frame.is_some() {
                self.cursor += 1;
            }
            Ok(frame)
        }

        fn resolution(&self) -> (u32, u32) {
            self.frames.first().map(|f| f.dimensions()).unwrap_or((0, 0))
        }
    }

    impl VideoStream for FrameList {
        fn rewind(&mut self) -> Result<()> {
            self.rewinds += 1;
            self.cursor = 0;
            Ok(())
        }

        fn frame_count(&self) -> u64 {
            self.reported_count
        }

        fn fps(&self) -> f64 {
            25.0
        }
    }
}
