use super::OutputSink;
use anyhow::{anyhow, Result};
use image::RgbImage;
use minifb::{Key, Window, WindowOptions};

/// Key that ends a live session.
pub const EXIT_KEY: Key = Key::Q;

/// Live preview window. Pressing `q` or closing the window cancels the run.
pub struct WindowDisplay {
    window: Window,
    buffer: Vec<u32>,
    written: u64,
}

impl WindowDisplay {
    pub fn new(title: &str, width: u32, height: u32) -> Result<Self> {
        let window = Window::new(
            title,
            width as usize,
            height as usize,
            WindowOptions {
                resize: true,
                ..WindowOptions::default()
            },
        )
        .map_err(|e| anyhow!("Failed to create window: {}", e))?;

        tracing::info!("Press q in the preview window to stop");

        Ok(Self {
            window,
            buffer: Vec::new(),
            written: 0,
        })
    }
}

/// Pack RGB8 pixels into minifb's 0RGB words.
fn to_argb(frame: &RgbImage, buffer: &mut Vec<u32>) {
    buffer.clear();
    buffer.extend(
        frame
            .pixels()
            .map(|p| ((p[0] as u32) << 16) | ((p[1] as u32) << 8) | p[2] as u32),
    );
}

impl OutputSink for WindowDisplay {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        to_argb(frame, &mut self.buffer);
        let (width, height) = frame.dimensions();
        self.window
            .update_with_buffer(&self.buffer, width as usize, height as usize)
            .map_err(|e| anyhow!("Window update failed: {}", e))?;
        self.written += 1;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.written
    }

    fn cancelled(&mut self) -> bool {
        !self.window.is_open() || self.window.is_key_down(EXIT_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn pixels_pack_as_0rgb() {
        let mut frame = RgbImage::new(2, 1);
        frame.put_pixel(0, 0, Rgb([0x12, 0x34, 0x56]));
        frame.put_pixel(1, 0, Rgb([0xff, 0x00, 0x01]));

        let mut buffer = vec![7; 9];
        to_argb(&frame, &mut buffer);
        assert_eq!(buffer, [0x123456, 0xff0001]);
    }
}
