//! Per-mode drivers wiring source -> background -> predictor -> sink.
//!
//! Everything runs on the calling thread, one frame at a time: read,
//! fetch the matching background, composite, write. Output order is input
//! order and a video background advances exactly once per frame read.

use anyhow::Result;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::ops::AddAssign;
use std::path::{Path, PathBuf};

use crate::background::{
    Background, BackgroundLoop, BackgroundProvider, StaticBackground, BLACK, WHITE,
};
use crate::calibration::DeviceGroup;
use crate::capture::{
    patient_batches, CaptureSource, DeviceBatch, FfmpegReader, ImageSequence, VideoStream,
    WebcamCapture,
};
use crate::compositor::Predictor;
use crate::error::{require_exists, PipelineError};
use crate::output::{
    resolve_image_output, FfmpegWriter, MirroredDirectory, OutputSink, SingleFile, WindowDisplay,
};

/// Camera opened in live mode.
const CAMERA_INDEX: u32 = 0;
const WINDOW_TITLE: &str = "humanseg-compose";

/// What to read, chosen once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Image(PathBuf),
    ImageDir(PathBuf),
    PatientDir(PathBuf),
    Video(PathBuf),
    Camera,
}

impl Mode {
    /// First source given wins; none at all means the live camera.
    pub fn select(
        img_path: Option<PathBuf>,
        img_dir: Option<PathBuf>,
        patient_dir: Option<PathBuf>,
        video_path: Option<PathBuf>,
    ) -> Self {
        img_path
            .map(Mode::Image)
            .or_else(|| img_dir.map(Mode::ImageDir))
            .or_else(|| patient_dir.map(Mode::PatientDir))
            .or_else(|| video_path.map(Mode::Video))
            .unwrap_or(Mode::Camera)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Mode::Image(_) => "image",
            Mode::ImageDir(_) => "image dir",
            Mode::PatientDir(_) => "patient dir",
            Mode::Video(_) => "video",
            Mode::Camera => "camera",
        }
    }

    /// Fail early, before a model is loaded, on a missing input or
    /// background or on a video destination that is not an `.avi`.
    pub fn validate(&self, options: &RunOptions) -> Result<(), PipelineError> {
        match self {
            Mode::Image(path) | Mode::ImageDir(path) | Mode::PatientDir(path) => {
                require_exists(path)?
            }
            Mode::Video(path) => {
                require_exists(path)?;
                FfmpegWriter::check_path(&options.save)?;
            }
            Mode::Camera => {}
        }

        if let Some(bg_img) = &options.bg_img {
            require_exists(bg_img)?;
        }
        if let (Some(bg_video), Mode::Video(_) | Mode::Camera) = (&options.bg_video, self) {
            require_exists(bg_video)?;
        }
        Ok(())
    }
}

/// Background and destination settings shared by all modes.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub bg_img: Option<PathBuf>,
    pub bg_video: Option<PathBuf>,
    /// Output file (image, video) or directory (batch modes)
    pub save: PathBuf,
    /// Restrict a patient tree run to one device
    pub device: Option<(DeviceGroup, String)>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub frames_read: u64,
    pub frames_written: u64,
}

impl AddAssign for RunStats {
    fn add_assign(&mut self, rhs: Self) {
        self.frames_read += rhs.frames_read;
        self.frames_written += rhs.frames_written;
    }
}

fn progress_bar(len: u64) -> ProgressBar {
    let bar = if len == 0 {
        ProgressBar::new_spinner()
    } else {
        ProgressBar::new(len)
    };
    bar.set_draw_target(ProgressDrawTarget::stderr());
    let style = ProgressStyle::with_template("{bar:40} {pos}/{len} [{elapsed_precise}] {per_sec}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar
}

/// Run `mode` to completion.
pub fn run<P: Predictor + ?Sized>(
    mode: &Mode,
    options: &RunOptions,
    predictor: &mut P,
) -> Result<RunStats> {
    tracing::info!("Input: {}", mode.name());

    if options.bg_video.is_some() && !matches!(mode, Mode::Video(_) | Mode::Camera) {
        tracing::warn!("--bg_video_path only applies to video and camera input, ignoring it");
    }
    if options.device.is_some() && !matches!(mode, Mode::PatientDir(_)) {
        tracing::warn!("--device only applies to --patient_dir, ignoring it");
    }

    match mode {
        Mode::Image(path) => {
            let mut background = StaticBackground::load(options.bg_img.as_deref(), WHITE)?;
            composite_image(predictor, path, &mut background, &options.save)
        }
        Mode::ImageDir(dir) => {
            let mut background = StaticBackground::load(options.bg_img.as_deref(), WHITE)?;
            composite_dir(predictor, dir, &mut background, &options.save)
        }
        Mode::PatientDir(dir) => {
            let mut background = StaticBackground::load(options.bg_img.as_deref(), BLACK)?;
            match &options.device {
                Some((group, device_id)) => composite_device(
                    predictor,
                    dir,
                    &options.save,
                    *group,
                    device_id,
                    &mut background,
                ),
                None => composite_patient_tree(predictor, dir, &mut background, &options.save),
            }
        }
        Mode::Video(path) => composite_video(predictor, path, options),
        Mode::Camera => composite_camera(predictor, options),
    }
}

/// Composite one image into `save` (a file, or a directory to put it in).
pub fn composite_image<P: Predictor + ?Sized>(
    predictor: &mut P,
    input: &Path,
    background: &mut StaticBackground,
    save: &Path,
) -> Result<RunStats> {
    let images = ImageSequence::single(input)?;
    let mut sink = SingleFile::create(&resolve_image_output(save, input))?;
    let mut stats = RunStats::default();

    for item in images {
        let (_, frame) = item?;
        stats.frames_read += 1;
        let bg = background.next_background(frame.width(), frame.height())?;
        let out = predictor.run(&frame, &bg)?;
        sink.write_frame(&out)?;
    }

    stats.frames_written = sink.frames_written();
    Ok(stats)
}

/// Composite every image of `dir` into `save_dir` under the same names.
pub fn composite_dir<P: Predictor + ?Sized>(
    predictor: &mut P,
    dir: &Path,
    background: &mut StaticBackground,
    save_dir: &Path,
) -> Result<RunStats> {
    let images = ImageSequence::directory(dir)?;
    if images.is_empty() {
        tracing::warn!("No images found in {}", dir.display());
    } else {
        tracing::info!("{} images in {}", images.len(), dir.display());
    }

    let mut sink = MirroredDirectory::create(save_dir)?;
    let progress = progress_bar(images.len() as u64);
    let mut stats = RunStats::default();

    for item in images {
        let (path, frame) = item?;
        stats.frames_read += 1;
        let bg = background.next_background(frame.width(), frame.height())?;
        let out = predictor.run(&frame, &bg)?;
        sink.write(&path, &out)?;
        progress.inc(1);
    }
    progress.finish();

    stats.frames_written = sink.frames_written();
    tracing::info!("End predicting.");
    Ok(stats)
}

/// Lumo-composite every calibrated device directory of a patient tree.
///
/// Destination directories for all devices are created before the first
/// frame is read.
pub fn composite_patient_tree<P: Predictor + ?Sized>(
    predictor: &mut P,
    patient_dir: &Path,
    background: &mut StaticBackground,
    save_dir: &Path,
) -> Result<RunStats> {
    let batches = patient_batches(patient_dir, save_dir)?;
    let mut stats = RunStats::default();
    for batch in &batches {
        let progress = progress_bar(batch.files.len() as u64);
        stats += composite_batch(predictor, batch, background, &progress)?;
    }
    tracing::info!("End predicting.");
    Ok(stats)
}

/// Lumo-composite a single device of a patient tree.
pub fn composite_device<P: Predictor + ?Sized>(
    predictor: &mut P,
    patient_dir: &Path,
    save_dir: &Path,
    group: DeviceGroup,
    device_id: &str,
    background: &mut StaticBackground,
) -> Result<RunStats> {
    let batch = DeviceBatch::open(patient_dir, save_dir, group, device_id)?;
    let progress = progress_bar(batch.files.len() as u64);
    composite_batch(predictor, &batch, background, &progress)
}

fn composite_batch<P: Predictor + ?Sized>(
    predictor: &mut P,
    batch: &DeviceBatch,
    background: &mut StaticBackground,
    progress: &ProgressBar,
) -> Result<RunStats> {
    tracing::info!(
        "{}/{}: {} images in {}, y_limit={}",
        batch.group,
        batch.device_id,
        batch.files.len(),
        batch.source_dir.display(),
        batch.y_limit
    );
    if !batch.source_dir.is_dir() {
        tracing::debug!("Skipping missing {}", batch.source_dir.display());
    }

    predictor.reset();
    let mut sink = MirroredDirectory::create(&batch.dest_dir)?;
    let mut stats = RunStats::default();

    for item in batch.images() {
        let (path, frame) = item?;
        stats.frames_read += 1;
        let bg = background.next_background(frame.width(), frame.height())?;
        let out = predictor.run_lumo(batch.y_limit, &frame, &bg)?;
        sink.write(&path, &out)?;
        progress.inc(1);
    }
    progress.finish();

    stats.frames_written = sink.frames_written();
    Ok(stats)
}

/// Background for a streaming run: looping video if requested, else static.
fn open_background(options: &RunOptions) -> Result<Background<FfmpegReader>> {
    match &options.bg_video {
        Some(path) => {
            let stream = FfmpegReader::open(path)?;
            Ok(Background::Video(BackgroundLoop::new(stream)))
        }
        None => Ok(Background::Static(StaticBackground::load(
            options.bg_img.as_deref(),
            WHITE,
        )?)),
    }
}

fn composite_video<P: Predictor + ?Sized>(
    predictor: &mut P,
    path: &Path,
    options: &RunOptions,
) -> Result<RunStats> {
    require_exists(path)?;
    FfmpegWriter::check_path(&options.save)?;

    let mut capture = FfmpegReader::open(path)?;
    let (width, height) = capture.resolution();
    let mut background = open_background(options)?;
    let mut sink = FfmpegWriter::create(&options.save, width, height, capture.fps())?;

    let progress = progress_bar(capture.frame_count());
    composite_stream(&mut capture, &mut background, predictor, &mut sink, &progress)
}

fn composite_camera<P: Predictor + ?Sized>(
    predictor: &mut P,
    options: &RunOptions,
) -> Result<RunStats> {
    let mut capture = WebcamCapture::new(CAMERA_INDEX)?;
    let (width, height) = capture.resolution();
    let mut background = open_background(options)?;
    let mut sink = WindowDisplay::new(WINDOW_TITLE, width, height)?;

    composite_stream(
        &mut capture,
        &mut background,
        predictor,
        &mut sink,
        &ProgressBar::hidden(),
    )
}

/// Pull frames from `capture` until it ends, the sink cancels, or a step
/// fails. The sink is finalized on every exit path.
pub fn composite_stream<C, B, P, O>(
    capture: &mut C,
    background: &mut B,
    predictor: &mut P,
    sink: &mut O,
    progress: &ProgressBar,
) -> Result<RunStats>
where
    C: CaptureSource + ?Sized,
    B: BackgroundProvider + ?Sized,
    P: Predictor + ?Sized,
    O: OutputSink + ?Sized,
{
    predictor.reset();
    let mut stats = RunStats::default();

    let outcome = drive(capture, background, predictor, sink, progress, &mut stats);
    let finished = sink.finish();
    progress.finish();
    stats.frames_written = sink.frames_written();

    outcome?;
    finished?;
    tracing::info!(
        "Processed {} frames, wrote {}",
        stats.frames_read,
        stats.frames_written
    );
    Ok(stats)
}

fn drive<C, B, P, O>(
    capture: &mut C,
    background: &mut B,
    predictor: &mut P,
    sink: &mut O,
    progress: &ProgressBar,
    stats: &mut RunStats,
) -> Result<()>
where
    C: CaptureSource + ?Sized,
    B: BackgroundProvider + ?Sized,
    P: Predictor + ?Sized,
    O: OutputSink + ?Sized,
{
    while let Some(frame) = capture.next_frame()? {
        stats.frames_read += 1;

        let bg = background.next_background(frame.width(), frame.height())?;
        let out = predictor.run(&frame, &bg)?;
        sink.write_frame(&out)?;
        progress.inc(1);

        if sink.cancelled() {
            tracing::info!("Stop requested after {} frames", stats.frames_read);
            break;
        }
    }
    Ok(())
}
