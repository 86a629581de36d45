use std::path::PathBuf;
use thiserror::Error;

use crate::calibration::DeviceGroup;

/// Failures the compositing pipeline reports to its caller.
///
/// End-of-stream is not an error anywhere in the pipeline, so it has no
/// variant here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("required path does not exist: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to open {what} {target:?}")]
    Open { what: &'static str, target: String },

    #[error("device {device_id:?} is not calibrated for group {group}")]
    UnknownDevice {
        group: DeviceGroup,
        device_id: String,
    },

    #[error("background image {} cannot be read", path.display())]
    InvalidBackground {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("video output {} must end with .{expected}", path.display())]
    InvalidSaveDir {
        path: PathBuf,
        expected: &'static str,
    },

    #[error("background is {background:?} but frame is {frame:?}")]
    ShapeMismatch {
        frame: (u32, u32),
        background: (u32, u32),
    },

    #[error("failed to write {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub fn open(what: &'static str, target: impl Into<String>) -> Self {
        Self::Open {
            what,
            target: target.into(),
        }
    }
}

/// Fails with [`PipelineError::NotFound`] unless `path` exists.
pub fn require_exists(path: &std::path::Path) -> Result<(), PipelineError> {
    if path.exists() {
        Ok(())
    } else {
        Err(PipelineError::NotFound {
            path: path.to_path_buf(),
        })
    }
}
