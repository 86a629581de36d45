use super::OutputSink;
use anyhow::{Context, Result};
use image::RgbImage;
use std::fs;
use std::path::{Path, PathBuf};

use crate::capture::is_image;
use crate::error::PipelineError;

/// Encode `frame` to `path`, format chosen by extension. Overwrites.
pub fn save_image(frame: &RgbImage, path: &Path) -> Result<()> {
    frame.save(path).map_err(|err| match err {
        image::ImageError::IoError(source) => anyhow::Error::from(PipelineError::Io {
            path: path.to_path_buf(),
            source,
        }),
        other => anyhow::Error::new(other).context(format!("Failed to encode {}", path.display())),
    })
}

/// Where a single composited image goes: `save` itself when it names an
/// image file, otherwise the input's file name inside `save`.
pub fn resolve_image_output(save: &Path, input: &Path) -> PathBuf {
    if is_image(save) {
        return save.to_path_buf();
    }
    match input.file_name() {
        Some(name) => save.join(name),
        None => save.join("output.jpg"),
    }
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}

/// Exactly one output image.
pub struct SingleFile {
    path: PathBuf,
    written: u64,
}

impl SingleFile {
    pub fn create(path: &Path) -> Result<Self> {
        create_parent(path)?;
        tracing::info!("Writing result to {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            written: 0,
        })
    }
}

impl OutputSink for SingleFile {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        save_image(frame, &self.path)?;
        self.written += 1;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.written
    }
}

/// One output file per input file, named after the input.
pub struct MirroredDirectory {
    root: PathBuf,
    written: u64,
}

impl MirroredDirectory {
    pub fn create(root: &Path) -> Result<Self> {
        fs::create_dir_all(root).with_context(|| format!("Failed to create {}", root.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
            written: 0,
        })
    }

    /// Write the result for `source`; returns the path written.
    pub fn write(&mut self, source: &Path, frame: &RgbImage) -> Result<PathBuf> {
        let name = source
            .file_name()
            .with_context(|| format!("{} has no file name", source.display()))?;
        let path = self.root.join(name);
        save_image(frame, &path)?;
        self.written += 1;
        Ok(path)
    }

    pub fn frames_written(&self) -> u64 {
        self.written
    }
}
