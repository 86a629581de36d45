use super::{CaptureSource, VideoStream};
use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use serde::Deserialize;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};

use crate::error::{require_exists, PipelineError};

/// Stream parameters needed to size an output writer.
#[derive(Debug, Clone, Copy, PartialEq)]
struct VideoInfo {
    width: u32,
    height: u32,
    fps: f64,
    /// 0 when the container does not say
    frame_count: u64,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: u32,
    height: u32,
    #[serde(default)]
    avg_frame_rate: Option<String>,
    #[serde(default)]
    r_frame_rate: Option<String>,
    #[serde(default)]
    nb_frames: Option<String>,
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    tags: Option<ProbeTags>,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
}

#[derive(Debug, Deserialize)]
struct ProbeTags {
    #[serde(default)]
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    /// Integer in current ffprobe, a string in some older builds
    #[serde(default)]
    rotation: Option<serde_json::Value>,
}

/// Parse an ffprobe rate such as `30000/1001`.
fn parse_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num.trim().parse::<f64>().ok()? / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

impl ProbeStream {
    /// Display rotation in degrees, from the display matrix or the legacy
    /// `rotate` tag.
    fn rotation(&self) -> Option<f64> {
        let from_side_data = self.side_data_list.iter().find_map(|side| match &side.rotation {
            Some(serde_json::Value::Number(n)) => n.as_f64(),
            Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        });
        from_side_data.or_else(|| {
            self.tags
                .as_ref()
                .and_then(|tags| tags.rotate.as_deref())
                .and_then(|r| r.trim().parse().ok())
        })
    }

    /// ffmpeg autorotates on decode, so a quarter turn swaps the frame axes.
    fn is_quarter_turn(&self) -> bool {
        self.rotation()
            .is_some_and(|degrees| (degrees.round() as i64).rem_euclid(180) == 90)
    }

    fn into_info(self) -> VideoInfo {
        let (width, height) = if self.is_quarter_turn() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        };

        let fps = self
            .avg_frame_rate
            .as_deref()
            .and_then(parse_rate)
            .or_else(|| self.r_frame_rate.as_deref().and_then(parse_rate))
            .unwrap_or(25.0);

        let frame_count = self
            .nb_frames
            .as_deref()
            .and_then(|n| n.parse::<u64>().ok())
            .or_else(|| {
                let duration: f64 = self.duration.as_deref()?.parse().ok()?;
                Some((duration * fps).round() as u64)
            })
            .unwrap_or(0);

        VideoInfo {
            width,
            height,
            fps,
            frame_count,
        }
    }
}

fn parse_probe(json: &[u8]) -> Result<VideoInfo> {
    let probe: ProbeOutput = serde_json::from_slice(json).context("Failed to parse ffprobe output")?;
    probe
        .streams
        .into_iter()
        .next()
        .map(ProbeStream::into_info)
        .ok_or_else(|| anyhow!("no video stream"))
}

/// Read stream parameters with `ffprobe`.
fn probe(path: &Path) -> Result<VideoInfo> {
    require_exists(path)?;

    let output = Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-select_streams")
        .arg("v:0")
        .arg("-show_entries")
        .arg(concat!(
            "stream=width,height,avg_frame_rate,r_frame_rate,nb_frames,duration",
            ":stream_tags=rotate:stream_side_data=rotation"
        ))
        .arg("-of")
        .arg("json")
        .arg(path)
        .stdin(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .context("Failed to run ffprobe")
        .context(PipelineError::open("video", path.display().to_string()))?;

    if !output.status.success() {
        tracing::debug!(
            "ffprobe stderr: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
        return Err(PipelineError::open("video", path.display().to_string()).into());
    }

    let info = parse_probe(&output.stdout)
        .context(PipelineError::open("video", path.display().to_string()))?;
    if info.width == 0 || info.height == 0 {
        return Err(PipelineError::open("video", path.display().to_string()).into());
    }
    Ok(info)
}

/// Video file decoded by an `ffmpeg` child process writing raw RGB24.
pub struct FfmpegReader {
    path: PathBuf,
    info: VideoInfo,
    child: Child,
    stdout: ChildStdout,
    frames_read: u64,
    /// Decoder exit status, once its output has ended
    exit_status: Option<ExitStatus>,
}

impl FfmpegReader {
    pub fn open(path: &Path) -> Result<Self> {
        let info = probe(path)?;

        tracing::info!(
            "Opened video {} ({}x{} @ {:.2} fps, {} frames)",
            path.display(),
            info.width,
            info.height,
            info.fps,
            info.frame_count
        );

        let (child, stdout) = spawn_decoder(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            info,
            child,
            stdout,
            frames_read: 0,
            exit_status: None,
        })
    }

    fn frame_len(&self) -> usize {
        self.info.width as usize * self.info.height as usize * 3
    }

    /// Reap the decoder after its output ended. A failed exit means the
    /// stream stopped early (corrupt input, decoder crash), which is logged
    /// but still ends the stream.
    fn reap_decoder(&mut self) {
        if self.exit_status.is_some() {
            return;
        }
        match self.child.wait() {
            Ok(status) => {
                if !status.success() {
                    tracing::warn!(
                        "ffmpeg decoder for {} exited with {} after {} frames",
                        self.path.display(),
                        status,
                        self.frames_read
                    );
                }
                self.exit_status = Some(status);
            }
            Err(err) => tracing::warn!(
                "Failed to wait for decoder of {}: {}",
                self.path.display(),
                err
            ),
        }
    }

    fn stop_child(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn spawn_decoder(path: &Path) -> Result<(Child, ChildStdout)> {
    let mut child = Command::new("ffmpeg")
        .arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-nostdin")
        .arg("-i")
        .arg(path)
        .arg("-map")
        .arg("0:v:0")
        .arg("-pix_fmt")
        .arg("rgb24")
        .arg("-f")
        .arg("rawvideo")
        .arg("-")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .context("Failed to spawn ffmpeg decoder")
        .context(PipelineError::open("video", path.display().to_string()))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("ffmpeg decoder has no stdout"))?;
    Ok((child, stdout))
}

impl CaptureSource for FfmpegReader {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let mut buffer = vec![0u8; self.frame_len()];
        match self.stdout.read_exact(&mut buffer) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                self.reap_decoder();
                tracing::debug!(
                    "{} ended after {} frames",
                    self.path.display(),
                    self.frames_read
                );
                return Ok(None);
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read frame from {}", self.path.display()))
            }
        }

        self.frames_read += 1;
        let frame = RgbImage::from_raw(self.info.width, self.info.height, buffer)
            .ok_or_else(|| anyhow!("decoded frame has the wrong size"))?;
        Ok(Some(frame))
    }

    fn resolution(&self) -> (u32, u32) {
        (self.info.width, self.info.height)
    }
}

impl VideoStream for FfmpegReader {
    fn rewind(&mut self) -> Result<()> {
        tracing::debug!("Rewinding {}", self.path.display());
        self.stop_child();
        let (child, stdout) = spawn_decoder(&self.path)?;
        self.child = child;
        self.stdout = stdout;
        self.frames_read = 0;
        self.exit_status = None;
        Ok(())
    }

    fn frame_count(&self) -> u64 {
        self.info.frame_count
    }

    fn fps(&self) -> f64 {
        self.info.fps
    }
}

impl Drop for FfmpegReader {
    fn drop(&mut self) {
        self.stop_child();
    }
}
