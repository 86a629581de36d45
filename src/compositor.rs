//! Foreground/background compositing on top of a segmentation model.

use anyhow::Result;
use image::{Rgb, RgbImage};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::error::PipelineError;
use crate::segmentation::{self, threshold_mask, Matte, SegmentationModel, TemporalFusion};

/// Settings handed through to the segmentation backend.
#[derive(Debug, Clone, Default)]
pub struct PredictorConfig {
    /// ONNX model; passthrough segmentation when absent
    pub model: Option<PathBuf>,
    pub use_gpu: bool,
    pub vertical_screen: bool,
    pub use_post_process: bool,
    pub use_optic_flow: bool,
    pub test_speed: bool,
}

/// Produces a composited frame from a foreground frame and a background.
pub trait Predictor {
    fn run(&mut self, frame: &RgbImage, background: &RgbImage) -> Result<RgbImage>;

    /// Like `run`, but rows at or below `y_limit` always show the background.
    fn run_lumo(&mut self, y_limit: u32, frame: &RgbImage, background: &RgbImage)
        -> Result<RgbImage>;

    /// Forget per-stream state before a new, unrelated sequence of frames.
    fn reset(&mut self) {}
}

#[derive(Debug, Default)]
struct SpeedStats {
    frames: u64,
    total: Duration,
}

impl SpeedStats {
    fn record(&mut self, elapsed: Duration) {
        self.frames += 1;
        self.total += elapsed;

        // Log stats every 30 frames
        if self.frames % 30 == 0 {
            self.log();
        }
    }

    fn log(&self) {
        if self.frames == 0 {
            return;
        }
        let avg_ms = self.total.as_secs_f64() * 1000.0 / self.frames as f64;
        tracing::info!(
            "Frame {}: segment={:.1}ms, fps={:.1}",
            self.frames,
            avg_ms,
            1000.0 / avg_ms.max(f64::EPSILON)
        );
    }
}

/// [`Predictor`] that segments with a [`SegmentationModel`] and alpha blends.
pub struct Compositor {
    model: Box<dyn SegmentationModel>,
    post_process: bool,
    fusion: Option<TemporalFusion>,
    speed: Option<SpeedStats>,
}

impl Compositor {
    pub fn new(config: &PredictorConfig) -> Result<Self> {
        let model = segmentation::create_model(
            config.model.as_deref(),
            config.vertical_screen,
            config.use_gpu,
        )?;
        Ok(Self::with_model(model, config))
    }

    pub fn with_model(model: Box<dyn SegmentationModel>, config: &PredictorConfig) -> Self {
        tracing::debug!(
            "Compositor: post_process={}, optic_flow={}, test_speed={}",
            config.use_post_process,
            config.use_optic_flow,
            config.test_speed
        );
        Self {
            model,
            post_process: config.use_post_process,
            fusion: config.use_optic_flow.then(TemporalFusion::new),
            speed: config.test_speed.then(SpeedStats::default),
        }
    }

    fn matte(&mut self, frame: &RgbImage) -> Result<Matte> {
        let start = Instant::now();
        let mut matte = self.model.segment(frame)?;
        if let Some(speed) = self.speed.as_mut() {
            speed.record(start.elapsed());
        }

        if let Some(fusion) = self.fusion.as_mut() {
            matte = fusion.fuse(matte);
        }
        if self.post_process {
            threshold_mask(&mut matte);
        }
        Ok(matte)
    }

    /// Log the average segmentation time when speed testing is on.
    pub fn log_speed_summary(&self) {
        if let Some(speed) = &self.speed {
            speed.log();
        }
    }
}

impl Predictor for Compositor {
    fn run(&mut self, frame: &RgbImage, background: &RgbImage) -> Result<RgbImage> {
        let matte = self.matte(frame)?;
        blend(frame, background, &matte)
    }

    fn run_lumo(
        &mut self,
        y_limit: u32,
        frame: &RgbImage,
        background: &RgbImage,
    ) -> Result<RgbImage> {
        let mut matte = self.matte(frame)?;
        clear_rows_from(&mut matte, frame.width(), y_limit);
        blend(frame, background, &matte)
    }

    fn reset(&mut self) {
        self.model.reset_state();
        if let Some(fusion) = self.fusion.as_mut() {
            fusion.reset();
        }
    }
}

fn check_shape(frame: &RgbImage, background: &RgbImage) -> Result<(), PipelineError> {
    if frame.dimensions() == background.dimensions() {
        Ok(())
    } else {
        Err(PipelineError::ShapeMismatch {
            frame: frame.dimensions(),
            background: background.dimensions(),
        })
    }
}

/// Zero the matte on every row `y >= y_limit`.
pub fn clear_rows_from(matte: &mut [f32], width: u32, y_limit: u32) {
    let start = (y_limit as usize).saturating_mul(width as usize);
    if let Some(rows) = matte.get_mut(start..) {
        rows.fill(0.0);
    }
}

/// `alpha * frame + (1 - alpha) * background`, per pixel.
pub fn blend(frame: &RgbImage, background: &RgbImage, matte: &[f32]) -> Result<RgbImage> {
    check_shape(frame, background)?;
    let (width, height) = frame.dimensions();
    anyhow::ensure!(
        matte.len() == width as usize * height as usize,
        "matte has {} values for a {}x{} frame",
        matte.len(),
        width,
        height
    );

    let mut out = RgbImage::new(width, height);
    for ((dst, (fg, bg)), alpha) in out
        .pixels_mut()
        .zip(frame.pixels().zip(background.pixels()))
        .zip(matte)
    {
        let alpha = alpha.clamp(0.0, 1.0);
        let mix = |c: usize| {
            (alpha * fg[c] as f32 + (1.0 - alpha) * bg[c] as f32)
                .round()
                .clamp(0.0, 255.0) as u8
        };
        *dst = Rgb([mix(0), mix(1), mix(2)]);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmentation::Passthrough;

    /// Constant score everywhere.
    struct Flat(f32);

    impl SegmentationModel for Flat {
        fn segment(&mut self, frame: &RgbImage) -> Result<Matte> {
            Ok(vec![self.0; (frame.width() * frame.height()) as usize])
        }
    }

    fn compositor(model: impl SegmentationModel + 'static) -> Compositor {
        Compositor::with_model(Box::new(model), &PredictorConfig::default())
    }

    #[test]
    fn full_foreground_keeps_frame() -> Result<()> {
        let frame = RgbImage::from_pixel(5, 4, Rgb([12, 34, 56]));
        let background = RgbImage::from_pixel(5, 4, Rgb([255, 255, 255]));
        let out = compositor(Passthrough).run(&frame, &background)?;
        assert_eq!(out, frame);
        Ok(())
    }

    #[test]
    fn half_alpha_mixes_evenly() -> Result<()> {
        let frame = RgbImage::from_pixel(2, 2, Rgb([200, 0, 100]));
        let background = RgbImage::from_pixel(2, 2, Rgb([0, 200, 100]));
        let out = compositor(Flat(0.5)).run(&frame, &background)?;
        assert!(out.pixels().all(|p| *p == Rgb([100, 100, 100])));
        Ok(())
    }

    #[test]
    fn lumo_rows_below_limit_show_background() -> Result<()> {
        let frame = RgbImage::from_pixel(3, 6, Rgb([10, 10, 10]));
        let background = RgbImage::from_pixel(3, 6, Rgb([0, 0, 0]));
        let out = compositor(Passthrough).run_lumo(4, &frame, &background)?;

        for (_, y, pixel) in out.enumerate_pixels() {
            let expected = if y < 4 { Rgb([10, 10, 10]) } else { Rgb([0, 0, 0]) };
            assert_eq!(*pixel, expected, "row {y}");
        }
        Ok(())
    }

    #[test]
    fn lumo_limit_past_frame_changes_nothing() -> Result<()> {
        let frame = RgbImage::from_pixel(3, 3, Rgb([10, 10, 10]));
        let background = RgbImage::new(3, 3);
        let out = compositor(Passthrough).run_lumo(430, &frame, &background)?;
        assert_eq!(out, frame);
        Ok(())
    }

    #[test]
    fn mismatched_background_is_rejected() {
        let frame = RgbImage::new(4, 4);
        let background = RgbImage::new(4, 5);
        let mut predictor = compositor(Passthrough);

        let err = predictor.run(&frame, &background).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::ShapeMismatch { .. })
        ));
        let err = predictor.run_lumo(2, &frame, &background).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn post_process_sharpens_scores() -> Result<()> {
        let config = PredictorConfig {
            use_post_process: true,
            ..PredictorConfig::default()
        };
        let mut compositor = Compositor::with_model(Box::new(Flat(0.9)), &config);
        let frame = RgbImage::from_pixel(2, 2, Rgb([40, 40, 40]));
        let background = RgbImage::from_pixel(2, 2, Rgb([0, 0, 0]));
        let out = compositor.run(&frame, &background)?;
        assert_eq!(out, frame);
        Ok(())
    }

    #[test]
    fn clear_rows_handles_limits_outside_frame() {
        let mut matte = vec![1.0; 6];
        clear_rows_from(&mut matte, 2, 10);
        assert_eq!(matte, vec![1.0; 6]);
        clear_rows_from(&mut matte, 2, 0);
        assert_eq!(matte, vec![0.0; 6]);
    }
}
