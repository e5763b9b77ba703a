use image::imageops::FilterType;
use image::{ImageFormat, ImageReader};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("cannot read image: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error("image has no width")]
    Empty,
    #[error("{width}x{height} image cannot be scaled to width {target}")]
    OutOfRange { width: u32, height: u32, target: u32 },
}

/// In-place transform applied to every staged upload before it is promoted.
///
/// Implementations are blocking; the ingest worker runs them on the blocking
/// pool.
pub trait Normalizer: Send + Sync {
    fn normalize(&self, path: &Path) -> Result<(), NormalizeError>;
}

/// Shifts brightness, then resizes to a fixed width keeping the aspect ratio.
/// The file is rewritten in its detected format.
#[derive(Debug, Clone)]
pub struct ImageNormalizer {
    target_width: u32,
    brightness: i32,
}

impl ImageNormalizer {
    pub fn new(target_width: u32, brightness: i32) -> Self {
        Self {
            target_width: target_width.max(1),
            brightness,
        }
    }

    fn target_height(&self, width: u32, height: u32) -> Result<u32, NormalizeError> {
        let scaled = (height as u64 * self.target_width as u64 + width as u64 / 2) / width as u64;
        u32::try_from(scaled.max(1)).map_err(|_| NormalizeError::OutOfRange {
            width,
            height,
            target: self.target_width,
        })
    }
}

impl Normalizer for ImageNormalizer {
    fn normalize(&self, path: &Path) -> Result<(), NormalizeError> {
        let reader = ImageReader::open(path)?.with_guessed_format()?;
        let format = match reader.format() {
            Some(format) => format,
            None => ImageFormat::from_path(path)?,
        };
        let img = reader.decode()?;
        if img.width() == 0 {
            return Err(NormalizeError::Empty);
        }

        let height = self.target_height(img.width(), img.height())?;
        let normalized = img
            .brighten(self.brightness)
            .resize_exact(self.target_width, height, FilterType::Lanczos3);

        tracing::debug!(
            path = %path.display(),
            from = ?(img.width(), img.height()),
            to = ?(self.target_width, height),
            "image normalized"
        );
        normalized.save_with_format(path, format)?;
        Ok(())
    }
}
