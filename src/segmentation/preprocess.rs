use anyhow::{ensure, Result};
use image::{imageops, RgbImage};
use ndarray::Array4;

/// Preprocessor for converting RGB images to model input tensors
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
        }
    }

    pub fn target_size(&self) -> (u32, u32) {
        (self.target_width, self.target_height)
    }

    /// Preprocess an RGB image into a normalized NCHW tensor
    ///
    /// Steps:
    /// 1. Resize to target dimensions
    /// 2. Scale to [0, 1], then normalize with mean 0.5 and std 0.5 into [-1, 1]
    /// 3. Transpose from HWC to NCHW format
    ///
    /// Returns: Array4<f32> with shape [1, 3, height, width]
    pub fn preprocess(&self, image: &RgbImage) -> Result<Array4<f32>> {
        let _span = tracing::debug_span!("preprocess").entered();

        let resized;
        let source = if image.dimensions() != (self.target_width, self.target_height) {
            resized = imageops::resize(
                image,
                self.target_width,
                self.target_height,
                imageops::FilterType::Triangle,
            );
            &resized
        } else {
            image
        };

        let (width, height) = source.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        for (x, y, pixel) in source.enumerate_pixels() {
            for c in 0..3 {
                let value = pixel[c] as f32 / 255.0;
                tensor[[0, c, y as usize, x as usize]] = (value - 0.5) / 0.5;
            }
        }

        Ok(tensor)
    }

    /// Postprocess model output matte back to original frame dimensions
    ///
    /// # Arguments
    /// * `matte` - Flattened matte at model resolution
    /// * `matte_width` - Width of the matte
    /// * `matte_height` - Height of the matte
    /// * `target_width` - Desired output width
    /// * `target_height` - Desired output height
    ///
    /// Returns: Resized matte flattened in row-major order
    pub fn postprocess_matte(
        matte: &[f32],
        matte_width: u32,
        matte_height: u32,
        target_width: u32,
        target_height: u32,
    ) -> Result<Vec<f32>> {
        let _span = tracing::debug_span!("postprocess").entered();

        ensure!(
            matte.len() == matte_width as usize * matte_height as usize,
            "matte has {} values, expected {}x{}",
            matte.len(),
            matte_width,
            matte_height
        );

        // If dimensions match, no resize needed
        if matte_width == target_width && matte_height == target_height {
            return Ok(matte.to_vec());
        }

        // Resize as a single-channel float image to keep soft edges
        let gray = image::ImageBuffer::<image::Luma<f32>, Vec<f32>>::from_raw(
            matte_width,
            matte_height,
            matte.to_vec(),
        )
        .ok_or_else(|| anyhow::anyhow!("matte buffer does not match its dimensions"))?;

        let resized = imageops::resize(
            &gray,
            target_width,
            target_height,
            imageops::FilterType::Triangle,
        );

        Ok(resized
            .into_raw()
            .into_iter()
            .map(|v| v.clamp(0.0, 1.0))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn tensor_is_nchw_in_unit_range() -> Result<()> {
        let mut image = RgbImage::from_pixel(4, 2, Rgb([0, 255, 0]));
        image.put_pixel(3, 1, Rgb([255, 0, 0]));

        let tensor = Preprocessor::new(4, 2).preprocess(&image)?;
        assert_eq!(tensor.shape(), &[1, 3, 2, 4]);
        assert_eq!(tensor[[0, 0, 0, 0]], -1.0);
        assert_eq!(tensor[[0, 1, 0, 0]], 1.0);
        assert_eq!(tensor[[0, 0, 1, 3]], 1.0);
        assert_eq!(tensor[[0, 1, 1, 3]], -1.0);
        Ok(())
    }

    #[test]
    fn tensor_takes_model_size() -> Result<()> {
        let image = RgbImage::new(50, 30);
        let tensor = Preprocessor::new(16, 8).preprocess(&image)?;
        assert_eq!(tensor.shape(), &[1, 3, 8, 16]);
        Ok(())
    }

    #[test]
    fn matte_is_resized_to_frame() -> Result<()> {
        let matte = vec![1.0; 4 * 2];
        let resized = Preprocessor::postprocess_matte(&matte, 4, 2, 8, 6)?;
        assert_eq!(resized.len(), 48);
        assert!(resized.iter().all(|v| (v - 1.0).abs() < 1e-4));

        let same = Preprocessor::postprocess_matte(&matte, 4, 2, 4, 2)?;
        assert_eq!(same, matte);
        Ok(())
    }

    #[test]
    fn matte_length_is_checked() {
        assert!(Preprocessor::postprocess_matte(&[0.5; 3], 2, 2, 4, 4).is_err());
    }
}
