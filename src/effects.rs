use crate::options::RenderOptions;
use crate::render::PosterError;
use image::{Rgba, RgbaImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const MATTE_COLOR: Rgba<u8> = Rgba([0, 0, 0, 255]);
const WASH_COLOR: [f32; 3] = [32.0, 32.0, 32.0];

// fixed order: matte, fade, vignette, grain, wash
pub fn apply_effects(
    image: &mut RgbaImage,
    options: &RenderOptions,
    grain_seed: u64,
) -> Result<(), PosterError> {
    ensure_raster(image)?;
    let (matte_rows, fade_rows) = band_rows(image.height(), options.matte_ratio, options.fade_ratio);
    let fade_target = if matte_rows > 0 {
        MATTE_COLOR
    } else {
        bottom_edge_color(image)
    };
    if matte_rows > 0 {
        apply_matte(image, matte_rows);
    }
    if fade_rows > 0 {
        apply_fade(image, matte_rows, fade_rows, fade_target);
    }
    if options.vignette > 0.0 {
        apply_vignette(image, options.vignette);
    }
    if options.grain > 0.0 {
        apply_grain(image, options.grain, grain_seed);
    }
    if options.wash > 0.0 {
        apply_wash(image, options.wash);
    }
    Ok(())
}

pub fn ensure_raster(image: &RgbaImage) -> Result<(), PosterError> {
    let (width, height) = image.dimensions();
    let expected = (width as usize) * (height as usize) * 4;
    if width == 0 || height == 0 || image.as_raw().len() != expected {
        return Err(PosterError::InvalidImage(format!(
            "raster {width}x{height} does not hold {expected} rgba bytes"
        )));
    }
    Ok(())
}

pub fn band_rows(height: u32, matte_ratio: f64, fade_ratio: f64) -> (u32, u32) {
    let matte = ((height as f64 * matte_ratio).round() as u32).min(height);
    let fade = ((height as f64 * fade_ratio).round() as u32).min(height - matte);
    (matte, fade)
}

fn apply_matte(image: &mut RgbaImage, matte_rows: u32) {
    let height = image.height();
    for y in height - matte_rows..height {
        for x in 0..image.width() {
            image.put_pixel(x, y, MATTE_COLOR);
        }
    }
}

fn apply_fade(image: &mut RgbaImage, matte_rows: u32, fade_rows: u32, target: Rgba<u8>) {
    let start = image.height() - matte_rows - fade_rows;
    for row in 0..fade_rows {
        let t = row as f32 / fade_rows as f32;
        let y = start + row;
        for x in 0..image.width() {
            let pixel = image.get_pixel_mut(x, y);
            for channel in 0..4 {
                let from = pixel.0[channel] as f32;
                let to = target.0[channel] as f32;
                pixel.0[channel] = (from + (to - from) * t).round() as u8;
            }
        }
    }
}

fn bottom_edge_color(image: &RgbaImage) -> Rgba<u8> {
    let y = image.height() - 1;
    let mut sums = [0u64; 3];
    for x in 0..image.width() {
        let pixel = image.get_pixel(x, y);
        for channel in 0..3 {
            sums[channel] += pixel.0[channel] as u64;
        }
    }
    let count = image.width() as u64;
    Rgba([
        (sums[0] / count) as u8,
        (sums[1] / count) as u8,
        (sums[2] / count) as u8,
        255,
    ])
}

fn apply_vignette(image: &mut RgbaImage, strength: f64) {
    let (width, height) = image.dimensions();
    let cx = width as f64 / 2.0;
    let cy = height as f64 / 2.0;
    let max_distance_sq = cx * cx + cy * cy;
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let dx = x as f64 + 0.5 - cx;
        let dy = y as f64 + 0.5 - cy;
        let falloff = ((dx * dx + dy * dy) / max_distance_sq).min(1.0);
        let factor = (1.0 - strength * falloff).max(0.0);
        for channel in 0..3 {
            pixel.0[channel] = (pixel.0[channel] as f64 * factor).round() as u8;
        }
    }
}

fn apply_grain(image: &mut RgbaImage, amount: f64, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let spread = (128.0 * amount) as f32;
    for pixel in image.pixels_mut() {
        let noise = rng.random_range(-1.0f32..=1.0) * spread;
        for channel in 0..3 {
            pixel.0[channel] = (pixel.0[channel] as f32 + noise).round().clamp(0.0, 255.0) as u8;
        }
    }
}

fn apply_wash(image: &mut RgbaImage, strength: f64) {
    let strength = strength as f32;
    for pixel in image.pixels_mut() {
        for channel in 0..3 {
            let from = pixel.0[channel] as f32;
            pixel.0[channel] = (from + (WASH_COLOR[channel] - from) * strength).round() as u8;
        }
    }
}
