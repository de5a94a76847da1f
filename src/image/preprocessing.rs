//! Turns a decoded document image into the classifier's input tensor.

use crate::image::loader::DocumentImage;
use crate::utils::error::ForgeryError;
use crate::Result;
use image::imageops::{self, FilterType};
use ndarray::Array3;

/// Side length the classifier expects.
pub const INPUT_SIZE: u32 = 224;

/// Channels the classifier expects.
pub const INPUT_CHANNELS: usize = 3;

/// ImageNet channel means.
pub const MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet channel standard deviations.
pub const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Resize, scale to [0,1] and normalize with fixed per-channel statistics.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    size: u32,
    filter: FilterType,
    mean: [f32; 3],
    std: [f32; 3],
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self {
            size: INPUT_SIZE,
            filter: FilterType::Triangle,
            mean: MEAN,
            std: STD,
        }
    }
}

impl Preprocessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expected tensor shape, channel first.
    pub fn output_shape(&self) -> [usize; 3] {
        [INPUT_CHANNELS, self.size as usize, self.size as usize]
    }

    pub fn transform(&self, image: &DocumentImage) -> Result<Array3<f32>> {
        // Bilinear resize straight to the square input, ignoring aspect ratio.
        let resized = imageops::resize(image.pixels(), self.size, self.size, self.filter);

        let (width, height) = resized.dimensions();
        let mut tensor = Array3::<f32>::zeros((INPUT_CHANNELS, height as usize, width as usize));

        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..INPUT_CHANNELS {
                let scaled = pixel[c] as f32 / 255.0;
                tensor[[c, y as usize, x as usize]] = (scaled - self.mean[c]) / self.std[c];
            }
        }

        self.validate_shape(&tensor)?;
        Ok(tensor)
    }

    /// Rejects anything that is not exactly (3, size, size).
    pub fn validate_shape(&self, tensor: &Array3<f32>) -> Result<()> {
        let expected = self.output_shape();
        if tensor.shape() != &expected[..] {
            return Err(ForgeryError::Shape {
                expected: expected.to_vec(),
                actual: tensor.shape().to_vec(),
            });
        }
        Ok(())
    }
}
