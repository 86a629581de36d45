use super::OutputSink;
use anyhow::{bail, Context, Result};
use image::RgbImage;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use crate::error::PipelineError;

/// Container every video result is written to.
pub const VIDEO_EXTENSION: &str = "avi";
/// Codec tag of the written stream.
pub const VIDEO_FOURCC: &str = "MJPG";

/// Motion-JPEG AVI encoded by an `ffmpeg` child process fed raw RGB24.
///
/// The encoder is finalized on `finish` or on drop, so a run that fails
/// half way still leaves a playable file behind.
pub struct FfmpegWriter {
    path: PathBuf,
    width: u32,
    height: u32,
    child: Child,
    stdin: Option<ChildStdin>,
    written: u64,
}

impl FfmpegWriter {
    /// Reject destinations that do not carry the container extension.
    pub fn check_path(path: &Path) -> Result<(), PipelineError> {
        let is_avi = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(VIDEO_EXTENSION));
        if is_avi {
            Ok(())
        } else {
            Err(PipelineError::InvalidSaveDir {
                path: path.to_path_buf(),
                expected: VIDEO_EXTENSION,
            })
        }
    }

    pub fn create(path: &Path, width: u32, height: u32, fps: f64) -> Result<Self> {
        Self::check_path(path)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        tracing::info!(
            "Opening {} writer at {} ({}x{} @ {:.2} fps)",
            VIDEO_FOURCC,
            path.display(),
            width,
            height,
            fps
        );

        let mut child = Command::new("ffmpeg")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-y")
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-s")
            .arg(format!("{width}x{height}"))
            .arg("-r")
            .arg(format!("{fps}"))
            .arg("-i")
            .arg("-")
            .arg("-an")
            .arg("-c:v")
            .arg("mjpeg")
            .arg("-q:v")
            .arg("3")
            .arg("-vtag")
            .arg(VIDEO_FOURCC)
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .context("Failed to spawn ffmpeg encoder")
            .context(PipelineError::open("video writer", path.display().to_string()))?;

        let stdin = child.stdin.take();
        Ok(Self {
            path: path.to_path_buf(),
            width,
            height,
            child,
            stdin,
            written: 0,
        })
    }
}

impl OutputSink for FfmpegWriter {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        if frame.dimensions() != (self.width, self.height) {
            bail!(
                "frame is {:?} but {} was opened at {}x{}",
                frame.dimensions(),
                self.path.display(),
                self.width,
                self.height
            );
        }

        let Some(stdin) = self.stdin.as_mut() else {
            bail!("{} is already finalized", self.path.display());
        };
        stdin
            .write_all(frame.as_raw())
            .map_err(|source| PipelineError::Io {
                path: self.path.clone(),
                source,
            })?;
        self.written += 1;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.written
    }

    fn finish(&mut self) -> Result<()> {
        // Closing stdin lets ffmpeg write the container index.
        let Some(stdin) = self.stdin.take() else {
            return Ok(());
        };
        drop(stdin);

        let status = self
            .child
            .wait()
            .with_context(|| format!("Failed to wait for encoder of {}", self.path.display()))?;
        if !status.success() {
            bail!("ffmpeg encoder for {} exited with {}", self.path.display(), status);
        }
        tracing::info!("Wrote {} frames to {}", self.written, self.path.display());
        Ok(())
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        if let Err(err) = self.finish() {
            tracing::warn!("{:#}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::testing::{ffmpeg_available, numbered_frame};
    use crate::capture::{CaptureSource, FfmpegReader, VideoStream};

    #[test]
    fn only_avi_destinations_are_accepted() {
        assert!(FfmpegWriter::check_path(Path::new("out/result.avi")).is_ok());
        assert!(FfmpegWriter::check_path(Path::new("out/result.AVI")).is_ok());

        for bad in ["out/result.mp4", "out/result", "./output"] {
            let err = FfmpegWriter::check_path(Path::new(bad)).unwrap_err();
            assert!(matches!(err, PipelineError::InvalidSaveDir { expected: "avi", .. }));
        }
    }

    #[test]
    fn create_rejects_wrong_extension_before_spawning() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("clip.mp4");
        let err = FfmpegWriter::create(&path, 4, 4, 25.0).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::InvalidSaveDir { .. })
        ));
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn finish_after_failed_write_leaves_playable_file() -> Result<()> {
        if !ffmpeg_available() {
            return Ok(());
        }
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("partial.avi");

        let mut writer = FfmpegWriter::create(&path, 16, 8, 25.0)?;
        for i in 0..3 {
            writer.write_frame(&numbered_frame(i * 60, 16, 8))?;
        }
        assert!(writer.write_frame(&numbered_frame(0, 8, 8)).is_err());
        writer.finish()?;
        assert_eq!(writer.frames_written(), 3);

        let mut reader = FfmpegReader::open(&path)?;
        assert_eq!(reader.resolution(), (16, 8));
        assert!(reader.frame_count() <= 3);
        let mut read = 0;
        while reader.next_frame()?.is_some() {
            read += 1;
        }
        assert_eq!(read, 3);
        Ok(())
    }
}
