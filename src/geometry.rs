use crate::render::{CanvasSize, PosterError};
use image::RgbaImage;
use image::imageops::{self, FilterType};
use tracing::debug;

pub fn fit_to_canvas(
    source: &RgbaImage,
    canvas: CanvasSize,
    zoom: f64,
    shift_y: f64,
    max_pixels: u64,
) -> Result<RgbaImage, PosterError> {
    let (source_w, source_h) = source.dimensions();
    if source_w == 0 || source_h == 0 {
        return Err(PosterError::InvalidImage("artwork has no pixels".to_string()));
    }
    let (canvas_w, canvas_h) = (canvas.width, canvas.height);
    let scale = effective_scale(source_w, source_h, canvas, zoom);
    let scaled_w = ((source_w as f64 * scale).round() as u32).max(canvas_w);
    let scaled_h = ((source_h as f64 * scale).round() as u32).max(canvas_h);
    let ceiling = scaled_ceiling(canvas, max_pixels);
    if scaled_w as u64 * scaled_h as u64 > ceiling {
        return Err(PosterError::InvalidImage(format!(
            "artwork {source_w}x{source_h} would scale to {scaled_w}x{scaled_h}, above the {ceiling} pixel ceiling"
        )));
    }

    if scaled_w == canvas_w && scaled_h == canvas_h {
        return Ok(imageops::resize(source, canvas_w, canvas_h, FilterType::Lanczos3));
    }

    let scaled = imageops::resize(source, scaled_w, scaled_h, FilterType::Lanczos3);
    let crop = crop_origin(scaled_w, scaled_h, canvas, shift_y);
    if crop.shift_clamped {
        debug!(shift_y, slack = scaled_h - canvas_h, top = crop.top, "poster shift clamped to artwork");
    }
    Ok(imageops::crop_imm(&scaled, crop.left, crop.top, canvas_w, canvas_h).to_image())
}

// Zoomed 2:3 artwork needs up to 1.4^2 canvases; extreme aspect ratios beyond
// that are bounded by the decode ceiling.
fn scaled_ceiling(canvas: CanvasSize, max_pixels: u64) -> u64 {
    let canvas_pixels = canvas.width as u64 * canvas.height as u64;
    max_pixels.max(canvas_pixels.saturating_mul(2))
}

pub fn effective_scale(source_w: u32, source_h: u32, canvas: CanvasSize, zoom: f64) -> f64 {
    let width_scale = canvas.width as f64 * zoom / source_w as f64;
    let cover_scale =
        (canvas.width as f64 / source_w as f64).max(canvas.height as f64 / source_h as f64);
    width_scale.max(cover_scale)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropOrigin {
    pub left: u32,
    pub top: u32,
    pub shift_clamped: bool,
}

// the window never leaves the artwork
pub fn crop_origin(scaled_w: u32, scaled_h: u32, canvas: CanvasSize, shift_y: f64) -> CropOrigin {
    let left = (scaled_w - canvas.width) / 2;
    let slack = (scaled_h - canvas.height) as f64;
    let requested = (slack / 2.0 - shift_y * canvas.height as f64).round();
    let top = requested.clamp(0.0, slack);
    CropOrigin {
        left,
        top: top as u32,
        shift_clamped: requested != top,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    const CANVAS: CanvasSize = CanvasSize {
        width: 40,
        height: 60,
    };
    const LIMIT: u64 = 100_000;

    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x * 255 / width) as u8, (y * 255 / height) as u8, 90, 255])
        })
    }

    #[test]
    fn unit_zoom_on_matching_aspect_is_plain_resize() {
        let source = gradient(20, 30);
        let fitted = fit_to_canvas(&source, CANVAS, 1.0, 0.0, LIMIT).unwrap();
        let expected = imageops::resize(&source, 40, 60, FilterType::Lanczos3);
        assert_eq!(fitted, expected);
    }

    #[test]
    fn output_always_matches_canvas() {
        for (w, h) in [(10, 10), (100, 30), (30, 100), (7, 61)] {
            for zoom in [0.8, 1.0, 1.4] {
                let fitted = fit_to_canvas(&gradient(w, h), CANVAS, zoom, 0.3, LIMIT).unwrap();
                assert_eq!(fitted.dimensions(), (40, 60));
            }
        }
    }

    #[test]
    fn zoom_below_cover_is_raised() {
        let scale = effective_scale(20, 30, CANVAS, 0.8);
        assert_eq!(scale, 2.0);
    }

    #[test]
    fn shift_is_clamped_inside_artwork() {
        let origin = |shift| {
            let crop = crop_origin(48, 72, CANVAS, shift);
            (crop.left, crop.top, crop.shift_clamped)
        };
        assert_eq!(origin(0.0), (4, 6, false));
        assert_eq!(origin(0.5), (4, 0, true));
        assert_eq!(origin(-0.5), (4, 12, true));
        assert_eq!(origin(0.05), (4, 3, false));
    }

    #[test]
    fn shift_without_slack_is_reported_as_clamped() {
        let crop = crop_origin(40, 60, CANVAS, 0.2);
        assert_eq!((crop.top, crop.shift_clamped), (0, true));
        assert!(!crop_origin(40, 60, CANVAS, 0.0).shift_clamped);
    }

    #[test]
    fn extreme_aspect_ratio_is_rejected_before_scaling() {
        let poster = CanvasSize::poster(2000);
        assert_eq!(effective_scale(4000, 40, poster, 1.0), 75.0);
        let wide = RgbaImage::new(4000, 40);
        let err = fit_to_canvas(&wide, poster, 1.0, 0.0, 67_000_000).unwrap_err();
        assert!(matches!(err, PosterError::InvalidImage(_)));

        let tall = RgbaImage::new(1, 3000);
        let err = fit_to_canvas(&tall, CANVAS, 1.0, 0.0, LIMIT).unwrap_err();
        assert!(matches!(err, PosterError::InvalidImage(_)));
    }

    #[test]
    fn zoomed_poster_fits_under_small_ceiling() {
        let fitted = fit_to_canvas(&gradient(20, 30), CANVAS, 1.4, 0.0, 0).unwrap();
        assert_eq!(fitted.dimensions(), (40, 60));
    }
}
