use crate::options::{BlendMode, BorderOptions, OverlayOptions};
use crate::render::CanvasSize;
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use std::path::{Component, Path, PathBuf};

const MAX_OVERLAY_NAME: usize = 255;

// single plain file names only
pub fn overlay_path(overlays_dir: &Path, file: &str) -> Option<PathBuf> {
    if file.is_empty() || file.len() > MAX_OVERLAY_NAME {
        return None;
    }
    if file.contains('\0') || file.contains('\\') || file.contains('/') || file.contains("..") {
        return None;
    }
    let mut components = Path::new(file).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Some(overlays_dir.join(file)),
        _ => None,
    }
}

pub fn blend_overlay(canvas: &mut RgbaImage, overlay: &RgbaImage, options: &OverlayOptions, size: CanvasSize) {
    let resized;
    let overlay = if overlay.dimensions() == (size.width, size.height) {
        overlay
    } else {
        resized = imageops::resize(overlay, size.width, size.height, FilterType::Lanczos3);
        &resized
    };
    let opacity = options.opacity as f32;
    for (base, top) in canvas.pixels_mut().zip(overlay.pixels()) {
        let weight = top.0[3] as f32 / 255.0 * opacity;
        if weight <= 0.0 {
            continue;
        }
        for channel in 0..3 {
            let b = base.0[channel] as f32 / 255.0;
            let o = top.0[channel] as f32 / 255.0;
            let blended = match options.blend {
                BlendMode::Screen => 1.0 - (1.0 - b) * (1.0 - o),
                BlendMode::Multiply => b * o,
                BlendMode::Alpha => o,
            };
            let mixed = b + (blended - b) * weight;
            base.0[channel] = (mixed * 255.0).round().clamp(0.0, 255.0) as u8;
        }
        let base_alpha = base.0[3] as f32 / 255.0;
        let alpha = weight + base_alpha * (1.0 - weight);
        base.0[3] = (alpha * 255.0).round().clamp(0.0, 255.0) as u8;
    }
}

pub fn draw_border(canvas: &mut RgbaImage, border: BorderOptions) {
    let (width, height) = canvas.dimensions();
    let px = border.px.min(width / 2 + 1).min(height / 2 + 1);
    let color: Rgba<u8> = border.color;
    for (x, y, pixel) in canvas.enumerate_pixels_mut() {
        if x < px || y < px || x >= width.saturating_sub(px) || y >= height.saturating_sub(px) {
            *pixel = color;
        }
    }
}
