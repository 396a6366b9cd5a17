use crate::effects::MATTE_COLOR;
use crate::render::PosterError;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::{ImageEncoder, Rgba, RgbImage, RgbaImage};
use mime::Mime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[serde(alias = "jpeg")]
    Jpg,
    Png,
    Webp,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(OutputFormat::Jpg),
            "png" => Some(OutputFormat::Png),
            "webp" => Some(OutputFormat::Webp),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::Webp => "webp",
        }
    }

    pub fn content_type(self) -> Mime {
        match self {
            OutputFormat::Jpg => mime::IMAGE_JPEG,
            OutputFormat::Png => mime::IMAGE_PNG,
            OutputFormat::Webp => "image/webp".parse().unwrap_or(mime::APPLICATION_OCTET_STREAM),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEncoding {
    pub format: OutputFormat,
    pub quality: u8,
}

impl OutputEncoding {
    pub fn jpg(quality: u8) -> Self {
        Self {
            format: OutputFormat::Jpg,
            quality: quality.clamp(1, 100),
        }
    }

    pub fn png(compression: u8) -> Self {
        Self {
            format: OutputFormat::Png,
            quality: compression.min(9),
        }
    }

    pub fn webp(quality: u8) -> Self {
        Self {
            format: OutputFormat::Webp,
            quality: quality.clamp(1, 100),
        }
    }
}

pub fn encode_image(image: &RgbaImage, encoding: OutputEncoding) -> Result<Vec<u8>, PosterError> {
    let mut bytes = Vec::new();
    let (width, height) = image.dimensions();
    let result = match encoding.format {
        OutputFormat::Webp => {
            let mut flat = flatten(image, MATTE_COLOR);
            quantize_for_webp(&mut flat, encoding.quality);
            let encoder = image::codecs::webp::WebPEncoder::new_lossless(&mut bytes);
            encoder.encode(flat.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        }
        OutputFormat::Png => {
            let encoder = PngEncoder::new_with_quality(
                &mut bytes,
                png_compression(encoding.quality),
                PngFilter::Adaptive,
            );
            encoder.write_image(image.as_raw(), width, height, image::ExtendedColorType::Rgba8)
        }
        OutputFormat::Jpg => {
            let flat = flatten(image, MATTE_COLOR);
            let mut encoder =
                image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, encoding.quality.clamp(1, 100));
            encoder.encode(flat.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        }
    };
    result.map_err(|err| PosterError::InvalidImage(format!("encode failed: {err}")))?;
    Ok(bytes)
}

fn png_compression(level: u8) -> CompressionType {
    match level {
        0..=3 => CompressionType::Fast,
        4..=6 => CompressionType::Default,
        _ => CompressionType::Best,
    }
}

// The only WebP encoder available is lossless, so quality is applied by
// posterizing the channels before encoding.
fn quantize_for_webp(image: &mut RgbImage, quality: u8) {
    if quality >= 100 {
        return;
    }
    let levels = webp_levels(quality);
    let step = 255.0 / (levels as f32 - 1.0);
    for channel in image.iter_mut() {
        let bucket = (f32::from(*channel) / step).round();
        *channel = (bucket * step).round().clamp(0.0, 255.0) as u8;
    }
}

fn webp_levels(quality: u8) -> u16 {
    if quality >= 100 {
        return 256;
    }
    let normalized = f32::from(quality.clamp(1, 100)) / 100.0;
    (2.0 + normalized * normalized * 254.0).round().clamp(2.0, 256.0) as u16
}

pub fn flatten(image: &RgbaImage, background: Rgba<u8>) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let pixel = image.get_pixel(x, y);
        let alpha = pixel.0[3] as u32;
        let mut out = [0u8; 3];
        for channel in 0..3 {
            let fg = pixel.0[channel] as u32 * alpha;
            let bg = background.0[channel] as u32 * (255 - alpha);
            out[channel] = ((fg + bg + 127) / 255) as u8;
        }
        image::Rgb(out)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::decode_raster;

    fn sample() -> RgbaImage {
        RgbaImage::from_fn(8, 12, |x, y| Rgba([x as u8 * 30, y as u8 * 20, 77, 255]))
    }

    #[test]
    fn png_is_lossless() {
        let image = sample();
        let bytes = encode_image(&image, OutputEncoding::png(9)).unwrap();
        assert!(bytes.starts_with(b"\x89PNG"));
        assert_eq!(decode_raster(&bytes, 1_000).unwrap(), image);
    }

    #[test]
    fn jpeg_and_webp_have_expected_signatures() {
        let jpeg = encode_image(&sample(), OutputEncoding::jpg(95)).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let webp = encode_image(&sample(), OutputEncoding::webp(90)).unwrap();
        assert_eq!(&webp[..4], b"RIFF");
        assert_eq!(&webp[8..12], b"WEBP");
    }

    #[test]
    fn webp_quality_changes_output() {
        let image = RgbaImage::from_fn(64, 64, |x, y| {
            Rgba([(x * 4) as u8, (y * 4) as u8, ((x * y) % 256) as u8, 255])
        });
        let low = encode_image(&image, OutputEncoding::webp(5)).unwrap();
        let high = encode_image(&image, OutputEncoding::webp(100)).unwrap();
        assert_ne!(low, high);
        assert!(low.len() < high.len(), "{} vs {}", low.len(), high.len());

        let lossless = decode_raster(&high, 10_000).unwrap();
        assert_eq!(lossless, image);
    }

    #[test]
    fn webp_levels_grow_with_quality() {
        assert_eq!(webp_levels(1), 2);
        assert!(webp_levels(50) < webp_levels(90));
        assert_eq!(webp_levels(100), 256);
    }

    #[test]
    fn flatten_uses_background_for_transparency() {
        let image = RgbaImage::from_pixel(1, 1, Rgba([255, 255, 255, 0]));
        let flat = flatten(&image, Rgba([0, 0, 0, 255]));
        assert_eq!(flat.get_pixel(0, 0), &image::Rgb([0, 0, 0]));
    }

    #[test]
    fn content_types() {
        assert_eq!(OutputFormat::Jpg.content_type().as_ref(), "image/jpeg");
        assert_eq!(OutputFormat::Webp.content_type().as_ref(), "image/webp");
        assert_eq!(OutputFormat::parse("JPEG"), Some(OutputFormat::Jpg));
        assert_eq!(OutputFormat::parse("gif"), None);
    }
}
