//! Background frames to composite behind the segmented foreground.
//!
//! A background is asked for exactly one frame per foreground frame. Static
//! backgrounds hand back the same pixels every time; a looping video
//! advances its own cursor and wraps to the first frame when it runs out,
//! so it never ends the run.
//!
//! Backgrounds whose size differs from the frame are resized to the frame
//! on every request. This makes mixed-size image directories work against a
//! single background image.

use anyhow::Result;
use image::{imageops, Rgb, RgbImage};
use std::borrow::Cow;
use std::path::Path;

use crate::capture::VideoStream;
use crate::error::{require_exists, PipelineError};

pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
pub const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

/// Anything that can supply the background for the next frame.
pub trait BackgroundProvider {
    /// Background for a frame of `width` x `height`.
    fn next_background(&mut self, width: u32, height: u32) -> Result<Cow<'_, RgbImage>>;
}

fn fit(image: &RgbImage, width: u32, height: u32) -> Cow<'_, RgbImage> {
    if image.dimensions() == (width, height) {
        Cow::Borrowed(image)
    } else {
        Cow::Owned(imageops::resize(
            image,
            width,
            height,
            imageops::FilterType::Triangle,
        ))
    }
}

/// A background that does not change between frames.
#[derive(Debug, Clone)]
pub enum StaticBackground {
    /// Uniform colour, generated at each frame's size.
    Solid(Rgb<u8>),
    Image(RgbImage),
}

impl StaticBackground {
    /// Load `path`, or fall back to `fill` when no path is given.
    pub fn load(path: Option<&Path>, fill: Rgb<u8>) -> Result<Self, PipelineError> {
        let Some(path) = path else {
            return Ok(StaticBackground::Solid(fill));
        };
        require_exists(path)?;

        let image = image::open(path).map_err(|source| PipelineError::InvalidBackground {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(
            "Loaded background {} ({}x{})",
            path.display(),
            image.width(),
            image.height()
        );
        Ok(StaticBackground::Image(image.to_rgb8()))
    }
}

impl BackgroundProvider for StaticBackground {
    fn next_background(&mut self, width: u32, height: u32) -> Result<Cow<'_, RgbImage>> {
        Ok(match self {
            StaticBackground::Solid(fill) => Cow::Owned(RgbImage::from_pixel(width, height, *fill)),
            StaticBackground::Image(image) => fit(image, width, height),
        })
    }
}

/// A background video that restarts from its first frame when exhausted.
pub struct BackgroundLoop<S> {
    stream: S,
    index: u64,
    total: u64,
}

impl<S: VideoStream> BackgroundLoop<S> {
    pub fn new(stream: S) -> Self {
        let total = stream.frame_count();
        Self {
            stream,
            index: 0,
            total,
        }
    }

    /// Read exactly one frame, rewinding first if the stream has ended.
    pub fn next_frame(&mut self) -> Result<RgbImage> {
        let frame = match self.stream.next_frame()? {
            Some(frame) => frame,
            None => {
                // Fewer frames than the header claimed.
                tracing::debug!("Background ended at frame {}, rewinding", self.index);
                self.stream.rewind()?;
                self.index = 0;
                self.stream
                    .next_frame()?
                    .ok_or_else(|| PipelineError::open("background video", "<empty stream>"))?
            }
        };

        self.index += 1;
        if self.total > 0 && self.index >= self.total {
            self.stream.rewind()?;
            self.index = 0;
        }
        Ok(frame)
    }
}

impl<S: VideoStream> BackgroundProvider for BackgroundLoop<S> {
    fn next_background(&mut self, width: u32, height: u32) -> Result<Cow<'_, RgbImage>> {
        let mut frame = self.next_frame()?;
        if frame.dimensions() != (width, height) {
            frame = imageops::resize(&frame, width, height, imageops::FilterType::Triangle);
        }
        Ok(Cow::Owned(frame))
    }
}

/// Background selected for a streaming run.
pub enum Background<S> {
    Static(StaticBackground),
    Video(BackgroundLoop<S>),
}

impl<S: VideoStream> BackgroundProvider for Background<S> {
    fn next_background(&mut self, width: u32, height: u32) -> Result<Cow<'_, RgbImage>> {
        match self {
            Background::Static(bg) => bg.next_background(width, height),
            Background::Video(bg) => bg.next_background(width, height),
        }
    }
}
