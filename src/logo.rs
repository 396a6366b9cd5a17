use crate::options::{LogoLayout, LogoMode, LogoOptions};
use crate::render::{CanvasSize, PosterError};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogoPlacement {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl LogoPlacement {
    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }
}

pub fn placement(logo_w: u32, logo_h: u32, layout: LogoLayout, canvas: CanvasSize) -> LogoPlacement {
    let (logo_w, logo_h) = (logo_w.max(1) as f64, logo_h.max(1) as f64);
    match layout {
        LogoLayout::FreeForm { scale, offset } => {
            let box_w = (canvas.width as f64 * scale).round().max(1.0);
            let box_h = canvas.height as f64;
            let fit = (box_w / logo_w).min(box_h / logo_h);
            let width = (logo_w * fit).round().clamp(1.0, box_w);
            let height = (logo_h * fit).round().clamp(1.0, box_h);
            let center_y = offset * canvas.height as f64;
            LogoPlacement {
                x: ((canvas.width as f64 - width) / 2.0).round() as i64,
                y: (center_y - height / 2.0).round() as i64,
                width: width as u32,
                height: height as u32,
            }
        }
        LogoLayout::Uniform {
            max_w,
            max_h,
            offset_x,
            offset_y,
            override_scale,
        } => {
            let (width, height) = match override_scale {
                None => {
                    let scale = (max_w as f64 / logo_w)
                        .min(max_h as f64 / logo_h)
                        .min(1.0);
                    (
                        (logo_w * scale).floor().clamp(1.0, max_w as f64),
                        (logo_h * scale).floor().clamp(1.0, max_h as f64),
                    )
                }
                Some(scale) => {
                    // never larger than the canvas
                    let (canvas_w, canvas_h) = (canvas.width as f64, canvas.height as f64);
                    let scale = scale.min(canvas_w / logo_w).min(canvas_h / logo_h);
                    (
                        (logo_w * scale).floor().clamp(1.0, canvas_w),
                        (logo_h * scale).floor().clamp(1.0, canvas_h),
                    )
                }
            };
            let center_x = offset_x * canvas.width as f64;
            let center_y = offset_y * canvas.height as f64;
            LogoPlacement {
                x: (center_x - width / 2.0).round() as i64,
                y: (center_y - height / 2.0).round() as i64,
                width: width as u32,
                height: height as u32,
            }
        }
    }
}

// not called for LogoMode::None
pub fn composite_logo(
    canvas: &mut RgbaImage,
    logo: &RgbaImage,
    options: &LogoOptions,
    size: CanvasSize,
) -> Result<LogoPlacement, PosterError> {
    if logo.width() == 0 || logo.height() == 0 {
        return Err(PosterError::InvalidImage("logo has no pixels".to_string()));
    }
    let spot = placement(logo.width(), logo.height(), options.layout, size);
    let mut scaled = imageops::resize(logo, spot.width, spot.height, FilterType::Lanczos3);
    match options.mode {
        LogoMode::Stock | LogoMode::None => {}
        LogoMode::Match => {
            let target = region_average(canvas, spot);
            recolor(&mut scaled, target);
        }
        LogoMode::Hex => recolor(&mut scaled, options.hex),
    }
    imageops::overlay(canvas, &scaled, spot.x, spot.y);
    Ok(spot)
}

pub fn region_average(canvas: &RgbaImage, spot: LogoPlacement) -> Rgba<u8> {
    let x0 = spot.x.clamp(0, canvas.width() as i64) as u32;
    let y0 = spot.y.clamp(0, canvas.height() as i64) as u32;
    let x1 = (spot.x + spot.width as i64).clamp(0, canvas.width() as i64) as u32;
    let y1 = (spot.y + spot.height as i64).clamp(0, canvas.height() as i64) as u32;
    let (x0, y0, x1, y1) = if x1 > x0 && y1 > y0 {
        (x0, y0, x1, y1)
    } else {
        (0, 0, canvas.width(), canvas.height())
    };
    let mut sums = [0u64; 3];
    for y in y0..y1 {
        for x in x0..x1 {
            let pixel = canvas.get_pixel(x, y);
            for channel in 0..3 {
                sums[channel] += pixel.0[channel] as u64;
            }
        }
    }
    let count = ((x1 - x0) as u64 * (y1 - y0) as u64).max(1);
    Rgba([
        (sums[0] / count) as u8,
        (sums[1] / count) as u8,
        (sums[2] / count) as u8,
        255,
    ])
}

pub fn recolor(logo: &mut RgbaImage, target: Rgba<u8>) {
    let max_luma = logo
        .pixels()
        .filter(|pixel| pixel.0[3] > 0)
        .map(luminance)
        .fold(0.0f64, f64::max);
    for pixel in logo.pixels_mut() {
        let ratio = if max_luma > 0.0 {
            luminance(pixel) / max_luma
        } else {
            1.0
        };
        for channel in 0..3 {
            pixel.0[channel] = (target.0[channel] as f64 * ratio).round().clamp(0.0, 255.0) as u8;
        }
    }
}

fn luminance(pixel: &Rgba<u8>) -> f64 {
    0.2126 * pixel.0[0] as f64 + 0.7152 * pixel.0[1] as f64 + 0.0722 * pixel.0[2] as f64
}
