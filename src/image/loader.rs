use crate::utils::error::ForgeryError;
use crate::Result;
use base64::Engine;
use image::{ColorType, DynamicImage, ImageFormat, RgbImage};
use std::path::{Path, PathBuf};

/// Default cap on encoded image size (50MB).
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 50 * 1024 * 1024;

/// Where an input image comes from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
    Base64(String),
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        ImageSource::Path(path)
    }
}

impl From<Vec<u8>> for ImageSource {
    fn from(bytes: Vec<u8>) -> Self {
        ImageSource::Bytes(bytes)
    }
}

/// A decoded document image, always 8-bit RGB.
#[derive(Debug, Clone)]
pub struct DocumentImage {
    pixels: RgbImage,
    source_color: ColorType,
}

impl DocumentImage {
    /// Converts any decoded image to RGB, remembering the original color type.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        let source_color = image.color();
        let pixels = match image {
            DynamicImage::ImageRgb8(rgb) => rgb,
            other => other.to_rgb8(),
        };
        Self { pixels, source_color }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn channels(&self) -> usize {
        3
    }

    /// Color type the source decoded to before RGB conversion.
    pub fn source_color(&self) -> ColorType {
        self.source_color
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }
}

#[derive(Debug, Clone)]
pub struct ImageLoader {
    max_bytes: usize,
}

impl Default for ImageLoader {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IMAGE_BYTES)
    }
}

impl ImageLoader {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    /// Loads and RGB-normalizes an image from any supported source.
    pub fn load(&self, source: &ImageSource) -> Result<DocumentImage> {
        match source {
            ImageSource::Path(path) => self.from_path(path),
            ImageSource::Bytes(bytes) => self.from_bytes(bytes),
            ImageSource::Base64(data) => self.from_base64(data),
        }
    }

    /// Load from a base64 string, with or without a `data:image/...;base64,` prefix
    pub fn from_base64(&self, base64_data: &str) -> Result<DocumentImage> {
        let base64_clean = if base64_data.starts_with("data:") {
            base64_data.split(',').nth(1).unwrap_or(base64_data)
        } else {
            base64_data
        };

        let image_bytes = base64::engine::general_purpose::STANDARD.decode(base64_clean.trim())?;

        self.from_bytes(&image_bytes)
    }

    pub fn from_bytes(&self, bytes: &[u8]) -> Result<DocumentImage> {
        if bytes.len() > self.max_bytes {
            return Err(ForgeryError::FileTooLarge(bytes.len(), self.max_bytes));
        }

        let format = Self::detect_format(bytes).ok_or_else(|| {
            ForgeryError::UnsupportedFormat("unrecognized image data".to_string())
        })?;

        if !Self::is_supported_format(format) {
            return Err(ForgeryError::UnsupportedFormat(format!("{:?}", format)));
        }

        let image = image::load_from_memory_with_format(bytes, format)?;

        Ok(DocumentImage::from_dynamic(image))
    }

    pub fn from_path(&self, path: &Path) -> Result<DocumentImage> {
        let metadata = std::fs::metadata(path)?;
        if metadata.len() > self.max_bytes as u64 {
            let size = usize::try_from(metadata.len()).unwrap_or(usize::MAX);
            return Err(ForgeryError::FileTooLarge(size, self.max_bytes));
        }

        let bytes = std::fs::read(path)?;
        self.from_bytes(&bytes)
    }

    pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
        image::guess_format(bytes).ok()
    }

    pub fn is_supported_format(format: ImageFormat) -> bool {
        matches!(format, ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Tiff)
    }
}
