mod background;
mod calibration;
mod capture;
mod compositor;
mod error;
mod output;
mod pipeline;
mod segmentation;

use anyhow::{Context, Result};
use calibration::{parse_device_selector, DeviceGroup};
use clap::{ArgGroup, Parser};
use compositor::{Compositor, PredictorConfig};
use pipeline::{Mode, RunOptions};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Portrait segmentation compositing for images, videos and camera", long_about = None)]
#[command(group(ArgGroup::new("source").multiple(false)))]
#[command(group(ArgGroup::new("background").multiple(false)))]
struct Args {
    /// Path to segmentation model (ONNX file)
    /// If not provided, runs in passthrough mode without segmentation
    #[arg(long, alias = "config")]
    model: Option<PathBuf>,

    /// The image to composite
    #[arg(long = "img_path", group = "source")]
    img_path: Option<PathBuf>,

    /// Directory of images to composite
    #[arg(long = "img_dir", group = "source")]
    img_dir: Option<PathBuf>,

    /// Patient directory (<group>/camera_<id>/*.jpg) to composite with calibrated row limits
    #[arg(long = "patient_dir", group = "source")]
    patient_dir: Option<PathBuf>,

    /// Video to composite; without any source the camera is used
    #[arg(long = "video_path", group = "source")]
    video_path: Option<PathBuf>,

    /// Background image. If not specified, a white background is used
    #[arg(long = "bg_img_path", group = "background")]
    bg_img_path: Option<PathBuf>,

    /// Background video, looped as long as the input lasts
    #[arg(long = "bg_video_path", group = "background")]
    bg_video_path: Option<PathBuf>,

    /// Where results go: an image or .avi file, or a directory for batch input
    #[arg(long = "save_dir", default_value = "./output")]
    save_dir: PathBuf,

    /// Only process one patient device, as <group>/<device_id>
    #[arg(long, value_parser = parse_device_selector)]
    device: Option<(DeviceGroup, String)>,

    /// Input is portrait (height bigger than width)
    #[arg(long = "vertical_screen")]
    vertical_screen: bool,

    /// Sharpen the matte with a foreground/background threshold
    #[arg(long = "use_post_process")]
    use_post_process: bool,

    /// Smooth the matte over consecutive frames
    #[arg(long = "use_optic_flow")]
    use_optic_flow: bool,

    /// Log segmentation timing
    #[arg(long = "test_speed")]
    test_speed: bool,

    /// Run the model on the GPU (CUDA)
    #[arg(long = "use_gpu")]
    use_gpu: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn predictor_config(&self) -> PredictorConfig {
        PredictorConfig {
            model: self.model.clone(),
            use_gpu: self.use_gpu,
            vertical_screen: self.vertical_screen,
            use_post_process: self.use_post_process,
            use_optic_flow: self.use_optic_flow,
            test_speed: self.test_speed,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let config = args.predictor_config();
    let mode = Mode::select(
        args.img_path,
        args.img_dir,
        args.patient_dir,
        args.video_path,
    );
    let options = RunOptions {
        bg_img: args.bg_img_path,
        bg_video: args.bg_video_path,
        save: args.save_dir,
        device: args.device,
    };

    // Bad paths must fail before the model is loaded
    mode.validate(&options)?;

    tracing::info!("Create predictor...");
    tracing::info!("GPU: {}", config.use_gpu);
    let mut predictor = Compositor::new(&config).context("Failed to create predictor")?;

    tracing::info!("Start predicting...");
    let stats = pipeline::run(&mode, &options, &mut predictor)
        .with_context(|| format!("{} run failed", mode.name()))?;
    predictor.log_speed_summary();

    tracing::info!(
        "Done: {} frames read, {} written",
        stats.frames_read,
        stats.frames_written
    );

    Ok(())
}
