use crate::render::PosterError;
use anyhow::{Result, anyhow};
use bytes::Bytes;
use image::{ImageReader, RgbaImage};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub enum ImageSource {
    Bytes(Bytes),
    File(PathBuf),
}

#[derive(Debug, Clone, Copy)]
pub struct DecodeLimits {
    pub max_pixels: u64,
    pub max_bytes: usize,
}

impl ImageSource {
    pub fn describe(&self) -> String {
        match self {
            ImageSource::Bytes(bytes) => format!("{} bytes", bytes.len()),
            ImageSource::File(path) => path.display().to_string(),
        }
    }
}

pub fn load(source: &ImageSource, limits: DecodeLimits) -> Result<RgbaImage, PosterError> {
    let bytes = read_source(source, limits.max_bytes)?;
    decode_raster(&bytes, limits.max_pixels)
        .map_err(|err| PosterError::InvalidImage(format!("{}: {err:#}", source.describe())))
}

fn read_source(source: &ImageSource, max_bytes: usize) -> Result<Bytes, PosterError> {
    match source {
        ImageSource::Bytes(bytes) => {
            if bytes.len() > max_bytes {
                return Err(PosterError::InvalidImage(format!(
                    "image is {} bytes, limit is {max_bytes}",
                    bytes.len()
                )));
            }
            Ok(bytes.clone())
        }
        ImageSource::File(path) => {
            let metadata = std::fs::metadata(path).map_err(|err| {
                PosterError::AssetUnavailable(format!("{}: {err}", path.display()))
            })?;
            if metadata.len() > max_bytes as u64 {
                return Err(PosterError::InvalidImage(format!(
                    "{} is {} bytes, limit is {max_bytes}",
                    path.display(),
                    metadata.len()
                )));
            }
            std::fs::read(path)
                .map(Bytes::from)
                .map_err(|err| PosterError::AssetUnavailable(format!("{}: {err}", path.display())))
        }
    }
}

pub fn raster_dimensions(bytes: &[u8], max_pixels: u64) -> Result<(u32, u32)> {
    let mut reader = ImageReader::new(std::io::Cursor::new(bytes)).with_guessed_format()?;
    reader.limits(raster_limits(max_pixels));
    let (width, height) = reader.into_dimensions()?;
    let pixels = (width as u64).saturating_mul(height as u64);
    if pixels > max_pixels {
        return Err(anyhow!(
            "raster {width}x{height} exceeds max decoded pixels {max_pixels}"
        ));
    }
    Ok((width, height))
}

// dimensions are probed before any pixel buffer is allocated
pub fn decode_raster(bytes: &[u8], max_pixels: u64) -> Result<RgbaImage> {
    let (width, height) = raster_dimensions(bytes, max_pixels)?;
    if width == 0 || height == 0 {
        return Err(anyhow!("raster has invalid dimensions"));
    }
    let mut reader = ImageReader::new(std::io::Cursor::new(bytes)).with_guessed_format()?;
    reader.limits(raster_limits(max_pixels));
    let image = reader.decode()?;
    Ok(image.to_rgba8())
}

fn raster_limits(max_pixels: u64) -> image::Limits {
    let max_dim = max_pixels.min(u32::MAX as u64) as u32;
    let mut limits = image::Limits::default();
    limits.max_image_width = Some(max_dim);
    limits.max_image_height = Some(max_dim);
    limits.max_alloc = Some(max_pixels.saturating_mul(4));
    limits
}

#[cfg(test)]
pub(crate) fn png_bytes(image: &RgbaImage) -> Bytes {
    let mut out = Vec::new();
    image
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    Bytes::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    const LIMITS: DecodeLimits = DecodeLimits {
        max_pixels: 1_000_000,
        max_bytes: 10 * 1024 * 1024,
    };

    #[test]
    fn decodes_png_bytes() {
        let image = RgbaImage::from_pixel(4, 6, Rgba([10, 20, 30, 255]));
        let loaded = load(&ImageSource::Bytes(png_bytes(&image)), LIMITS).unwrap();
        assert_eq!(loaded.dimensions(), (4, 6));
        assert_eq!(loaded.get_pixel(0, 0), &Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn corrupt_bytes_are_invalid_image() {
        let err = load(
            &ImageSource::Bytes(Bytes::from_static(b"not an image")),
            LIMITS,
        )
        .unwrap_err();
        assert!(matches!(err, PosterError::InvalidImage(_)));
    }

    #[test]
    fn oversized_raster_rejected_before_decode() {
        let image = RgbaImage::from_pixel(200, 200, Rgba([0, 0, 0, 255]));
        let limits = DecodeLimits {
            max_pixels: 100,
            ..LIMITS
        };
        let err = load(&ImageSource::Bytes(png_bytes(&image)), limits).unwrap_err();
        assert!(matches!(err, PosterError::InvalidImage(_)));
    }

    #[test]
    fn missing_file_is_asset_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&ImageSource::File(dir.path().join("missing.png")), LIMITS).unwrap_err();
        assert!(matches!(err, PosterError::AssetUnavailable(_)));
    }
}
