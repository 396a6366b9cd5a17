use crate::render::PosterError;
use image::Rgba;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_TEMPLATE: &str = "default";
pub const UNIFORM_LOGO_TEMPLATE: &str = "uniformlogo";
pub const TEMPLATES: [&str; 2] = [DEFAULT_TEMPLATE, UNIFORM_LOGO_TEMPLATE];

macro_rules! raw_options {
    ($($field:ident: $ty:ty),* $(,)?) => {
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        #[serde(default)]
        pub struct RawRenderOptions {
            $(
                #[serde(skip_serializing_if = "Option::is_none")]
                pub $field: Option<$ty>,
            )*
        }

        impl RawRenderOptions {
            pub fn merged_over(&self, base: &RawRenderOptions) -> RawRenderOptions {
                RawRenderOptions {
                    $($field: self.$field.clone().or_else(|| base.$field.clone()),)*
                }
            }
        }
    };
}

raw_options! {
    poster_zoom: f64,
    poster_shift_y: f64,
    matte_height_ratio: f64,
    fade_height_ratio: f64,
    vignette_strength: f64,
    grain_amount: f64,
    wash_strength: f64,
    logo_scale: f64,
    logo_offset: f64,
    logo_mode: String,
    logo_hex: String,
    logo_preference: String,
    uniform_logo_max_w: f64,
    uniform_logo_max_h: f64,
    uniform_logo_offset_x: f64,
    uniform_logo_offset_y: f64,
    uniform_logo_override_enabled: bool,
    uniform_logo_override_scale: f64,
    uniform_logo_override_offset_y: f64,
    border_enabled: bool,
    border_px: f64,
    border_color: String,
    overlay_file: String,
    overlay_opacity: f64,
    overlay_blend_mode: String,
    text_overlay_enabled: bool,
    custom_text: String,
    font_family: String,
    font_size: f64,
    font_weight: FontWeightValue,
    text_color: String,
    text_align: String,
    text_transform: String,
    letter_spacing: f64,
    line_height: f64,
    position_y: f64,
    shadow_enabled: bool,
    shadow_blur: f64,
    shadow_offset_x: f64,
    shadow_offset_y: f64,
    shadow_color: String,
    shadow_opacity: f64,
    stroke_enabled: bool,
    stroke_width: f64,
    stroke_color: String,
    poster_filter: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FontWeightValue {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogoMode {
    Stock,
    Match,
    Hex,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogoPreference {
    #[default]
    First,
    Neutral,
    Widest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendMode {
    Screen,
    Multiply,
    Alpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TextTransform {
    None,
    Uppercase,
    Lowercase,
    Capitalize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArtworkFilter {
    #[default]
    All,
    Textless,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogoLayout {
    FreeForm {
        scale: f64,
        offset: f64,
    },
    Uniform {
        max_w: u32,
        max_h: u32,
        offset_x: f64,
        offset_y: f64,
        // replaces the fit-to-box scale, and may upscale
        override_scale: Option<f64>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogoOptions {
    pub mode: LogoMode,
    pub hex: Rgba<u8>,
    pub preference: LogoPreference,
    pub layout: LogoLayout,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BorderOptions {
    pub px: u32,
    pub color: Rgba<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayOptions {
    pub file: String,
    pub opacity: f64,
    pub blend: BlendMode,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowOptions {
    pub blur: f64,
    pub offset_x: f64,
    pub offset_y: f64,
    pub color: Rgba<u8>,
    pub opacity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrokeOptions {
    pub width: f64,
    pub color: Rgba<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextOptions {
    pub text: String,
    pub font_family: String,
    pub font_size: f64,
    pub font_weight: u16,
    pub color: Rgba<u8>,
    pub align: TextAlign,
    pub transform: TextTransform,
    pub letter_spacing: f64,
    pub line_height: f64,
    pub position_y: f64,
    pub shadow: Option<ShadowOptions>,
    pub stroke: Option<StrokeOptions>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    pub template: &'static str,
    pub zoom: f64,
    pub shift_y: f64,
    pub matte_ratio: f64,
    pub fade_ratio: f64,
    pub vignette: f64,
    pub grain: f64,
    pub wash: f64,
    pub logo: LogoOptions,
    pub border: Option<BorderOptions>,
    pub overlay: Option<OverlayOptions>,
    pub text: Option<TextOptions>,
    pub artwork_filter: ArtworkFilter,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Adjustment {
    pub field: &'static str,
    pub detail: String,
}

pub fn resolve_template(template_id: &str) -> Result<&'static str, PosterError> {
    let normalized = template_id.trim().to_ascii_lowercase();
    TEMPLATES
        .iter()
        .copied()
        .find(|known| *known == normalized)
        .ok_or_else(|| PosterError::InvalidRequest(format!("unknown template {template_id}")))
}

impl RenderOptions {
    pub fn validate(
        raw: &RawRenderOptions,
        template_id: &str,
    ) -> Result<(RenderOptions, Vec<Adjustment>), PosterError> {
        let template = resolve_template(template_id)?;
        let mut v = Validator::default();

        let zoom = v.clamp("poster_zoom", raw.poster_zoom, 1.0, 0.8, 1.4);
        let shift_y = v.clamp("poster_shift_y", raw.poster_shift_y, 0.0, -0.5, 0.5);
        let matte_ratio = v.clamp("matte_height_ratio", raw.matte_height_ratio, 0.0, 0.0, 0.5);
        let fade_ratio = v.clamp("fade_height_ratio", raw.fade_height_ratio, 0.0, 0.0, 0.5);
        let vignette = v.clamp("vignette_strength", raw.vignette_strength, 0.0, 0.0, 1.0);
        let grain = v.clamp("grain_amount", raw.grain_amount, 0.0, 0.0, 0.6);
        let wash = v.clamp("wash_strength", raw.wash_strength, 0.0, 0.0, 1.0);

        let mode = v.choice("logo_mode", raw.logo_mode.as_deref(), LogoMode::Stock, |value| {
            match value {
                "stock" => Some(LogoMode::Stock),
                "match" => Some(LogoMode::Match),
                "hex" => Some(LogoMode::Hex),
                "none" => Some(LogoMode::None),
                _ => None,
            }
        });
        let hex = v.color("logo_hex", raw.logo_hex.as_deref(), WHITE);
        let preference = v.choice(
            "logo_preference",
            raw.logo_preference.as_deref(),
            LogoPreference::First,
            |value| match value {
                "first" => Some(LogoPreference::First),
                "neutral" | "textless" => Some(LogoPreference::Neutral),
                "widest" => Some(LogoPreference::Widest),
                _ => None,
            },
        );
        let uniform_populated = raw.uniform_logo_max_w.is_some()
            || raw.uniform_logo_max_h.is_some()
            || raw.uniform_logo_offset_x.is_some()
            || raw.uniform_logo_offset_y.is_some()
            || raw.uniform_logo_override_enabled.unwrap_or(false);
        let layout = if template == UNIFORM_LOGO_TEMPLATE || uniform_populated {
            let max_w = v.clamp("uniform_logo_max_w", raw.uniform_logo_max_w, 600.0, 1.0, 10_000.0)
                .round() as u32;
            let max_h = v.clamp("uniform_logo_max_h", raw.uniform_logo_max_h, 240.0, 1.0, 10_000.0)
                .round() as u32;
            let offset_x = v.clamp("uniform_logo_offset_x", raw.uniform_logo_offset_x, 0.5, 0.0, 1.0);
            let offset_y = v.clamp("uniform_logo_offset_y", raw.uniform_logo_offset_y, 0.78, 0.0, 1.0);
            if raw.uniform_logo_override_enabled.unwrap_or(false) {
                LogoLayout::Uniform {
                    max_w,
                    max_h,
                    offset_x,
                    offset_y: v.clamp(
                        "uniform_logo_override_offset_y",
                        raw.uniform_logo_override_offset_y,
                        offset_y,
                        0.0,
                        1.0,
                    ),
                    override_scale: Some(v.clamp(
                        "uniform_logo_override_scale",
                        raw.uniform_logo_override_scale,
                        1.0,
                        0.05,
                        4.0,
                    )),
                }
            } else {
                LogoLayout::Uniform {
                    max_w,
                    max_h,
                    offset_x,
                    offset_y,
                    override_scale: None,
                }
            }
        } else {
            LogoLayout::FreeForm {
                scale: v.clamp("logo_scale", raw.logo_scale, 0.5, 0.1, 1.0),
                offset: v.clamp("logo_offset", raw.logo_offset, 0.75, 0.0, 1.0),
            }
        };

        let border = if raw.border_enabled.unwrap_or(false) {
            let px = v.clamp("border_px", raw.border_px, 0.0, 0.0, 500.0).round() as u32;
            let color = v.color("border_color", raw.border_color.as_deref(), WHITE);
            (px > 0).then_some(BorderOptions { px, color })
        } else {
            None
        };

        let overlay = match raw.overlay_file.as_deref().map(str::trim) {
            Some(file) if !file.is_empty() => Some(OverlayOptions {
                file: file.to_string(),
                opacity: v.clamp("overlay_opacity", raw.overlay_opacity, 1.0, 0.0, 1.0),
                blend: v.choice(
                    "overlay_blend_mode",
                    raw.overlay_blend_mode.as_deref(),
                    BlendMode::Alpha,
                    |value| match value {
                        "screen" => Some(BlendMode::Screen),
                        "multiply" => Some(BlendMode::Multiply),
                        "alpha" | "normal" => Some(BlendMode::Alpha),
                        _ => None,
                    },
                ),
            }),
            _ => None,
        };

        let text = if raw.text_overlay_enabled.unwrap_or(false) {
            Some(validate_text(raw, &mut v))
        } else {
            None
        };

        let artwork_filter = v.choice(
            "poster_filter",
            raw.poster_filter.as_deref(),
            ArtworkFilter::All,
            |value| match value {
                "all" => Some(ArtworkFilter::All),
                "textless" => Some(ArtworkFilter::Textless),
                "text" => Some(ArtworkFilter::Text),
                _ => None,
            },
        );

        for adjustment in &v.adjustments {
            warn!(
                field = adjustment.field,
                detail = %adjustment.detail,
                "render option adjusted"
            );
        }

        Ok((
            RenderOptions {
                template,
                zoom,
                shift_y,
                matte_ratio,
                fade_ratio,
                vignette,
                grain,
                wash,
                logo: LogoOptions {
                    mode,
                    hex,
                    preference,
                    layout,
                },
                border,
                overlay,
                text,
                artwork_filter,
            },
            v.adjustments,
        ))
    }
}

fn validate_text(raw: &RawRenderOptions, v: &mut Validator) -> TextOptions {
    let font_weight = match raw.font_weight.as_ref() {
        None => 700,
        Some(FontWeightValue::Number(value)) => {
            let clamped = v.clamp("font_weight", Some(*value), 700.0, 100.0, 900.0);
            ((clamped / 100.0).round() * 100.0) as u16
        }
        Some(FontWeightValue::Text(value)) => {
            match value.trim().to_ascii_lowercase().as_str() {
                "normal" | "regular" => 400,
                "bold" => 700,
                other => match other.parse::<f64>() {
                    Ok(number) => {
                        let clamped = v.clamp("font_weight", Some(number), 700.0, 100.0, 900.0);
                        ((clamped / 100.0).round() * 100.0) as u16
                    }
                    Err(_) => {
                        v.record("font_weight", format!("unrecognized value {other:?}, using 700"));
                        700
                    }
                },
            }
        }
    };
    let shadow = if raw.shadow_enabled.unwrap_or(true) {
        Some(ShadowOptions {
            blur: v.clamp("shadow_blur", raw.shadow_blur, 10.0, 0.0, 100.0),
            offset_x: v.clamp("shadow_offset_x", raw.shadow_offset_x, 0.0, -200.0, 200.0),
            offset_y: v.clamp("shadow_offset_y", raw.shadow_offset_y, 4.0, -200.0, 200.0),
            color: v.color("shadow_color", raw.shadow_color.as_deref(), BLACK),
            opacity: v.clamp("shadow_opacity", raw.shadow_opacity, 0.8, 0.0, 1.0),
        })
    } else {
        None
    };
    let stroke = if raw.stroke_enabled.unwrap_or(false) {
        let width = v.clamp("stroke_width", raw.stroke_width, 4.0, 0.0, 50.0);
        let color = v.color("stroke_color", raw.stroke_color.as_deref(), BLACK);
        (width > 0.0).then_some(StrokeOptions { width, color })
    } else {
        None
    };
    TextOptions {
        text: raw.custom_text.clone().unwrap_or_default(),
        font_family: raw
            .font_family
            .as_deref()
            .map(str::trim)
            .filter(|family| !family.is_empty())
            .unwrap_or("Arial")
            .to_string(),
        font_size: v.clamp("font_size", raw.font_size, 120.0, 8.0, 1000.0),
        font_weight,
        color: v.color("text_color", raw.text_color.as_deref(), WHITE),
        align: v.choice("text_align", raw.text_align.as_deref(), TextAlign::Center, |value| {
            match value {
                "left" => Some(TextAlign::Left),
                "center" => Some(TextAlign::Center),
                "right" => Some(TextAlign::Right),
                _ => None,
            }
        }),
        transform: v.choice(
            "text_transform",
            raw.text_transform.as_deref(),
            TextTransform::Uppercase,
            |value| match value {
                "none" => Some(TextTransform::None),
                "uppercase" => Some(TextTransform::Uppercase),
                "lowercase" => Some(TextTransform::Lowercase),
                "capitalize" => Some(TextTransform::Capitalize),
                _ => None,
            },
        ),
        letter_spacing: v.clamp("letter_spacing", raw.letter_spacing, 2.0, 0.0, 200.0),
        line_height: v.clamp("line_height", raw.line_height, 1.2, 0.5, 3.0),
        position_y: v.clamp("position_y", raw.position_y, 0.75, 0.0, 1.0),
        shadow,
        stroke,
    }
}

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

#[derive(Default)]
struct Validator {
    adjustments: Vec<Adjustment>,
}

impl Validator {
    fn record(&mut self, field: &'static str, detail: String) {
        self.adjustments.push(Adjustment { field, detail });
    }

    fn clamp(&mut self, field: &'static str, value: Option<f64>, default: f64, min: f64, max: f64) -> f64 {
        let Some(value) = value else {
            return default;
        };
        if !value.is_finite() {
            self.record(field, format!("non-finite value, using {default}"));
            return default;
        }
        if value < min || value > max {
            let clamped = value.clamp(min, max);
            self.record(field, format!("{value} clamped to {clamped}"));
            return clamped;
        }
        value
    }

    fn color(&mut self, field: &'static str, value: Option<&str>, default: Rgba<u8>) -> Rgba<u8> {
        let Some(value) = value else {
            return default;
        };
        match parse_color(value) {
            Some(color) => color,
            None => {
                self.record(field, format!("invalid color {value:?}, using {}", to_hex(default)));
                default
            }
        }
    }

    fn choice<T: Copy + std::fmt::Debug>(
        &mut self,
        field: &'static str,
        value: Option<&str>,
        default: T,
        parse: impl Fn(&str) -> Option<T>,
    ) -> T {
        let Some(value) = value else {
            return default;
        };
        let normalized = value.trim().to_ascii_lowercase();
        match parse(&normalized) {
            Some(choice) => choice,
            None => {
                self.record(field, format!("unrecognized value {value:?}, using {default:?}"));
                default
            }
        }
    }
}

pub fn parse_color(value: &str) -> Option<Rgba<u8>> {
    let value = value.trim().trim_start_matches('#');
    if value.len() == 6 && value.is_ascii() {
        let r = u8::from_str_radix(&value[0..2], 16).ok()?;
        let g = u8::from_str_radix(&value[2..4], 16).ok()?;
        let b = u8::from_str_radix(&value[4..6], 16).ok()?;
        return Some(Rgba([r, g, b, 255]));
    }
    None
}

pub fn to_hex(color: Rgba<u8>) -> String {
    format!("#{:02x}{:02x}{:02x}", color.0[0], color.0[1], color.0[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_without_adjustments() {
        let (options, adjustments) =
            RenderOptions::validate(&RawRenderOptions::default(), "default").unwrap();
        assert!(adjustments.is_empty());
        assert_eq!(options.zoom, 1.0);
        assert_eq!(options.logo.mode, LogoMode::Stock);
        assert_eq!(
            options.logo.layout,
            LogoLayout::FreeForm {
                scale: 0.5,
                offset: 0.75
            }
        );
        assert!(options.text.is_none());
        assert!(options.border.is_none());
    }

    #[test]
    fn out_of_range_values_are_clamped_and_recorded() {
        let raw = RawRenderOptions {
            poster_zoom: Some(3.0),
            grain_amount: Some(-1.0),
            logo_mode: Some("sparkle".to_string()),
            logo_hex: Some("#zzz".to_string()),
            ..Default::default()
        };
        let (options, adjustments) = RenderOptions::validate(&raw, "default").unwrap();
        assert_eq!(options.zoom, 1.4);
        assert_eq!(options.grain, 0.0);
        assert_eq!(options.logo.mode, LogoMode::Stock);
        assert_eq!(options.logo.hex, WHITE);
        let fields: Vec<_> = adjustments.iter().map(|a| a.field).collect();
        assert_eq!(fields, vec!["poster_zoom", "grain_amount", "logo_mode", "logo_hex"]);
    }

    #[test]
    fn uniform_template_ignores_free_form_fields() {
        let raw = RawRenderOptions {
            logo_scale: Some(0.9),
            ..Default::default()
        };
        let (options, _) = RenderOptions::validate(&raw, "UniformLogo").unwrap();
        assert_eq!(
            options.logo.layout,
            LogoLayout::Uniform {
                max_w: 600,
                max_h: 240,
                offset_x: 0.5,
                offset_y: 0.78,
                override_scale: None,
            }
        );
    }

    #[test]
    fn uniform_override_replaces_scale_and_vertical_offset() {
        let raw = RawRenderOptions {
            uniform_logo_offset_y: Some(0.6),
            uniform_logo_override_enabled: Some(true),
            uniform_logo_override_scale: Some(9.0),
            ..Default::default()
        };
        let (options, adjustments) = RenderOptions::validate(&raw, "uniformlogo").unwrap();
        assert_eq!(
            options.logo.layout,
            LogoLayout::Uniform {
                max_w: 600,
                max_h: 240,
                offset_x: 0.5,
                offset_y: 0.6,
                override_scale: Some(4.0),
            }
        );
        assert_eq!(adjustments[0].field, "uniform_logo_override_scale");

        let raw = RawRenderOptions {
            uniform_logo_override_scale: Some(2.0),
            uniform_logo_override_offset_y: Some(0.3),
            ..Default::default()
        };
        let (options, _) = RenderOptions::validate(&raw, "uniformlogo").unwrap();
        assert!(matches!(
            options.logo.layout,
            LogoLayout::Uniform { override_scale: None, offset_y, .. } if offset_y == 0.78
        ));
    }

    #[test]
    fn logo_preference_defaults_to_first() {
        let (options, _) = RenderOptions::validate(&RawRenderOptions::default(), "default").unwrap();
        assert_eq!(options.logo.preference, LogoPreference::First);
        let raw = RawRenderOptions {
            logo_preference: Some("Widest".to_string()),
            ..Default::default()
        };
        let (options, _) = RenderOptions::validate(&raw, "default").unwrap();
        assert_eq!(options.logo.preference, LogoPreference::Widest);
        let raw = RawRenderOptions {
            logo_preference: Some("shiniest".to_string()),
            ..Default::default()
        };
        let (options, adjustments) = RenderOptions::validate(&raw, "default").unwrap();
        assert_eq!(options.logo.preference, LogoPreference::First);
        assert_eq!(adjustments[0].field, "logo_preference");
    }

    #[test]
    fn uniform_fields_select_bounding_box_layout() {
        let raw = RawRenderOptions {
            uniform_logo_max_w: Some(400.0),
            ..Default::default()
        };
        let (options, _) = RenderOptions::validate(&raw, "default").unwrap();
        assert!(matches!(
            options.logo.layout,
            LogoLayout::Uniform { max_w: 400, .. }
        ));
    }

    #[test]
    fn unknown_template_is_rejected() {
        let err = RenderOptions::validate(&RawRenderOptions::default(), "mystery").unwrap_err();
        assert!(matches!(err, PosterError::InvalidRequest(_)));
    }

    #[test]
    fn override_wins_over_preset_and_defaults() {
        let defaults = RawRenderOptions {
            poster_zoom: Some(1.0),
            matte_height_ratio: Some(0.1),
            ..Default::default()
        };
        let preset = RawRenderOptions {
            poster_zoom: Some(1.2),
            fade_height_ratio: Some(0.2),
            ..Default::default()
        };
        let job = RawRenderOptions {
            poster_zoom: Some(1.1),
            ..Default::default()
        };
        let merged = job.merged_over(&preset.merged_over(&defaults));
        assert_eq!(merged.poster_zoom, Some(1.1));
        assert_eq!(merged.fade_height_ratio, Some(0.2));
        assert_eq!(merged.matte_height_ratio, Some(0.1));
    }

    #[test]
    fn text_block_parses_weight_and_shadow_defaults() {
        let raw: RawRenderOptions = serde_json::from_str(
            r##"{"text_overlay_enabled":true,"custom_text":"{title}","font_weight":"bold","text_color":"#ff0000"}"##,
        )
        .unwrap();
        let (options, adjustments) = RenderOptions::validate(&raw, "default").unwrap();
        assert!(adjustments.is_empty());
        let text = options.text.unwrap();
        assert_eq!(text.font_weight, 700);
        assert_eq!(text.color, Rgba([255, 0, 0, 255]));
        assert_eq!(text.transform, TextTransform::Uppercase);
        let shadow = text.shadow.unwrap();
        assert_eq!(shadow.blur, 10.0);
        assert_eq!(shadow.offset_y, 4.0);
        assert!(text.stroke.is_none());
    }

    #[test]
    fn serialization_skips_unset_fields() {
        let raw = RawRenderOptions {
            vignette_strength: Some(0.3),
            ..Default::default()
        };
        let value = serde_json::to_value(&raw).unwrap();
        assert_eq!(value, serde_json::json!({"vignette_strength": 0.3}));
    }
}
