use anyhow::{Context, Result};
use image::RgbImage;
use std::fs;
use std::path::{Path, PathBuf};

use crate::calibration::{self, CalibrationEntry, DeviceGroup};
use crate::error::{require_exists, PipelineError};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

/// Image files directly inside `dir`, sorted by path.
///
/// A missing directory yields an empty list; callers that require the
/// directory check for it first.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && is_image(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Ordered list of image files decoded lazily, one per `next` call.
#[derive(Debug, Clone)]
pub struct ImageSequence {
    files: Vec<PathBuf>,
    cursor: usize,
}

impl ImageSequence {
    /// A sequence holding exactly one image.
    pub fn single(path: &Path) -> Result<Self, PipelineError> {
        require_exists(path)?;
        Ok(Self::from_files(vec![path.to_path_buf()]))
    }

    pub fn directory(dir: &Path) -> Result<Self> {
        require_exists(dir)?;
        Ok(Self::from_files(list_images(dir)?))
    }

    pub fn from_files(files: Vec<PathBuf>) -> Self {
        Self { files, cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl Iterator for ImageSequence {
    type Item = Result<(PathBuf, RgbImage)>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.files.get(self.cursor)?.clone();
        self.cursor += 1;
        let decoded = image::open(&path)
            .with_context(|| format!("Failed to decode {}", path.display()))
            .map(|img| (path, img.to_rgb8()));
        Some(decoded)
    }
}

/// One calibrated device directory of a patient tree.
#[derive(Debug, Clone)]
pub struct DeviceBatch {
    pub group: DeviceGroup,
    pub device_id: String,
    pub y_limit: u32,
    pub source_dir: PathBuf,
    pub dest_dir: PathBuf,
    pub files: Vec<PathBuf>,
}

impl DeviceBatch {
    /// Resolve `device_id` in the calibration table and list its images.
    /// The destination directory is created even when there is nothing
    /// to read.
    pub fn open(
        patient_dir: &Path,
        save_dir: &Path,
        group: DeviceGroup,
        device_id: &str,
    ) -> Result<Self> {
        let y_limit = calibration::lookup(group, device_id)?;
        let relative = Path::new(group.name()).join(calibration::device_dir_name(device_id));

        let dest_dir = save_dir.join(&relative);
        fs::create_dir_all(&dest_dir)
            .with_context(|| format!("Failed to create {}", dest_dir.display()))?;

        let source_dir = patient_dir.join(&relative);
        let files = list_images(&source_dir)?;

        Ok(Self {
            group,
            device_id: device_id.to_string(),
            y_limit,
            source_dir,
            dest_dir,
            files,
        })
    }

    pub fn images(&self) -> ImageSequence {
        ImageSequence::from_files(self.files.clone())
    }
}

/// Every calibrated device of every group, in table order.
///
/// All destination directories exist once this returns, whether or not the
/// matching source directory does.
pub fn patient_batches(patient_dir: &Path, save_dir: &Path) -> Result<Vec<DeviceBatch>> {
    require_exists(patient_dir)?;

    let entries: Vec<&CalibrationEntry> = DeviceGroup::ALL
        .into_iter()
        .flat_map(DeviceGroup::devices)
        .collect();

    entries
        .into_iter()
        .map(|entry| DeviceBatch::open(patient_dir, save_dir, entry.group, entry.device_id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn write_image(path: &Path, width: u32, height: u32) -> Result<()> {
        RgbImage::from_pixel(width, height, Rgb([10, 20, 30])).save(path)?;
        Ok(())
    }

    #[test]
    fn directory_listing_is_sorted_and_filtered() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        for name in ["c.jpg", "a.png", "b.JPG"] {
            write_image(&temp_dir.path().join(name), 4, 4)?;
        }
        fs::write(temp_dir.path().join("notes.txt"), "skip me")?;
        fs::create_dir(temp_dir.path().join("nested.jpg"))?;

        let names: Vec<_> = list_images(temp_dir.path())?
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.png", "b.JPG", "c.jpg"]);
        Ok(())
    }

    #[test]
    fn repeated_enumeration_is_identical() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        for i in (0..6).rev() {
            write_image(&temp_dir.path().join(format!("frame_{i:03}.png")), 3, 2)?;
        }

        let first: Vec<_> = ImageSequence::directory(temp_dir.path())?
            .collect::<Result<Vec<_>>>()?;
        let second: Vec<_> = ImageSequence::directory(temp_dir.path())?
            .collect::<Result<Vec<_>>>()?;

        assert_eq!(first.len(), 6);
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn empty_directory_is_empty_sequence() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let seq = ImageSequence::directory(temp_dir.path())?;
        assert!(seq.is_empty());
        Ok(())
    }

    #[test]
    fn missing_single_image_is_not_found() {
        let err = ImageSequence::single(Path::new("/definitely/not/here.jpg")).unwrap_err();
        assert!(matches!(err, PipelineError::NotFound { .. }));
    }

    #[test]
    fn patient_destinations_exist_for_every_device() -> Result<()> {
        let patient = tempfile::tempdir()?;
        let save = tempfile::tempdir()?;

        // only one device has data
        let huawei = patient.path().join("huawei").join("camera_SED0221715004838");
        fs::create_dir_all(&huawei)?;
        write_image(&huawei.join("0001.png"), 8, 8)?;
        write_image(&huawei.join("0000.png"), 8, 8)?;
        // and one exists but is empty
        fs::create_dir_all(patient.path().join("vivo").join("camera_9a11d441"))?;

        let batches = patient_batches(patient.path(), save.path())?;
        assert_eq!(batches.len(), 4);

        for group in DeviceGroup::ALL {
            for entry in group.devices() {
                let dest = save
                    .path()
                    .join(group.name())
                    .join(calibration::device_dir_name(entry.device_id));
                assert!(dest.is_dir(), "missing {}", dest.display());
            }
        }

        let first = &batches[0];
        assert_eq!(first.group, DeviceGroup::Huawei);
        assert_eq!(first.y_limit, 255);
        assert_eq!(first.files, [huawei.join("0000.png"), huawei.join("0001.png")]);
        assert!(batches[1..].iter().all(|b| b.files.is_empty()));
        Ok(())
    }

    #[test]
    fn unknown_device_creates_nothing() -> Result<()> {
        let patient = tempfile::tempdir()?;
        let save = tempfile::tempdir()?;

        let err = DeviceBatch::open(patient.path(), save.path(), DeviceGroup::Huawei, "deadbeef")
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::UnknownDevice { .. })
        ));
        assert!(!save.path().join("huawei").exists());
        Ok(())
    }
}
