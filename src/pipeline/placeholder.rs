use anyhow::{Context, Result};
use image::{DynamicImage, Rgb, RgbImage};
use std::sync::Arc;

use super::thumbnails::encode_jpeg;
use crate::config::ThumbnailConfig;

const PLACEHOLDER_GREY: Rgb<u8> = Rgb([96, 96, 96]);

/// The "no photo yet" image. Written as a site's thumbnail before its first
/// shot of the day and served instead of images a caller may not see.
#[derive(Debug, Clone)]
pub struct Placeholder {
    jpeg: Arc<[u8]>,
}

impl Placeholder {
    /// Use the configured image (fitted into the thumbnail box), or a flat
    /// grey frame of thumbnail size.
    pub fn from_config(config: &ThumbnailConfig) -> Result<Self> {
        let image = match &config.placeholder {
            Some(path) => image::open(path)
                .with_context(|| format!("Failed to open placeholder image {}", path.display()))?
                .thumbnail(config.width, config.height),
            None => DynamicImage::ImageRgb8(RgbImage::from_pixel(
                config.width.max(1),
                config.height.max(1),
                PLACEHOLDER_GREY,
            )),
        };

        Ok(Self {
            jpeg: encode_jpeg(&image)?.into(),
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.jpeg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_placeholder_is_a_jpeg_of_thumbnail_size() {
        let config = ThumbnailConfig::default();
        let placeholder = Placeholder::from_config(&config).unwrap();

        let decoded = image::load_from_memory(placeholder.bytes()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (300, 200));
        assert_eq!(
            image::guess_format(placeholder.bytes()).unwrap(),
            image::ImageFormat::Jpeg
        );
    }

    #[test]
    fn test_configured_placeholder_is_fitted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nophoto.png");
        RgbImage::from_pixel(1200, 400, Rgb([255, 0, 0])).save(&path).unwrap();

        let config = ThumbnailConfig {
            placeholder: Some(path),
            ..ThumbnailConfig::default()
        };
        let placeholder = Placeholder::from_config(&config).unwrap();

        let decoded = image::load_from_memory(placeholder.bytes()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (300, 100));
    }
}
