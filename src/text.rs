use crate::options::{TextAlign, TextOptions, TextTransform, to_hex};
use crate::render::{CanvasSize, ErrorKind, ItemIdentity, PosterError, RenderWarning};
use image::{Rgba, RgbaImage};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

pub const TEXT_MARGIN: f64 = 100.0;

pub struct FontCatalog {
    db: Arc<usvg::fontdb::Database>,
    families: BTreeMap<String, String>,
    fallback: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontResolution {
    pub family: String,
    pub exact: bool,
}

impl FontCatalog {
    pub fn load(fonts_dir: &Path, load_system_fonts: bool, fallback: &str) -> Self {
        let mut db = usvg::fontdb::Database::new();
        if load_system_fonts {
            db.load_system_fonts();
        }
        load_fonts_from_dir(&mut db, fonts_dir);
        let families = db
            .faces()
            .flat_map(|face| face.families.iter())
            .map(|(name, _)| (name.to_lowercase(), name.clone()))
            .collect::<BTreeMap<_, _>>();
        info!(
            fonts_dir = %fonts_dir.display(),
            faces = db.len(),
            families = families.len(),
            "font catalog loaded"
        );
        Self {
            db: Arc::new(db),
            families,
            fallback: fallback.to_string(),
        }
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    pub fn families(&self) -> impl Iterator<Item = &str> {
        self.families.values().map(String::as_str)
    }

    pub fn resolve(&self, requested: &str) -> FontResolution {
        if let Some(family) = self.families.get(&requested.trim().to_lowercase()) {
            return FontResolution {
                family: family.clone(),
                exact: true,
            };
        }
        FontResolution {
            family: self.fallback.clone(),
            exact: false,
        }
    }

    fn svg_options(&self) -> usvg::Options<'static> {
        usvg::Options {
            font_family: self.fallback.clone(),
            fontdb: self.db.clone(),
            font_resolver: font_resolver(),
            ..Default::default()
        }
    }
}

fn load_fonts_from_dir(db: &mut usvg::fontdb::Database, dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        debug!(dir = %dir.display(), "font directory not readable");
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(ext) = path.extension().and_then(|s| s.to_str()) else {
            continue;
        };
        let ext = ext.to_ascii_lowercase();
        if ext != "ttf" && ext != "otf" && ext != "ttc" {
            continue;
        }
        if let Err(err) = db.load_font_file(&path) {
            debug!(error = ?err, path = %path.display(), "failed to load font file");
        }
    }
}

fn font_resolver() -> usvg::FontResolver<'static> {
    usvg::FontResolver {
        select_font: Box::new(|font, fontdb| {
            let mut families = Vec::<usvg::fontdb::Family<'_>>::new();
            for family in font.families() {
                families.push(match family {
                    usvg::FontFamily::Serif => usvg::fontdb::Family::Serif,
                    usvg::FontFamily::SansSerif => usvg::fontdb::Family::SansSerif,
                    usvg::FontFamily::Cursive => usvg::fontdb::Family::Cursive,
                    usvg::FontFamily::Fantasy => usvg::fontdb::Family::Fantasy,
                    usvg::FontFamily::Monospace => usvg::fontdb::Family::Monospace,
                    usvg::FontFamily::Named(name) => usvg::fontdb::Family::Name(name),
                });
            }
            families.push(usvg::fontdb::Family::SansSerif);
            let style = match font.style() {
                usvg::FontStyle::Normal => usvg::fontdb::Style::Normal,
                usvg::FontStyle::Italic => usvg::fontdb::Style::Italic,
                usvg::FontStyle::Oblique => usvg::fontdb::Style::Oblique,
            };
            let query = usvg::fontdb::Query {
                families: &families,
                weight: usvg::fontdb::Weight(font.weight()),
                stretch: usvg::fontdb::Stretch::Normal,
                style,
            };
            if let Some(id) = fontdb.query(&query) {
                return Some(id);
            }
            fontdb.faces().next().map(|face| face.id)
        }),
        select_fallback: usvg::FontResolver::default_fallback_selector(),
    }
}

pub fn prepare_text(raw: &str, item: &ItemIdentity, transform: TextTransform) -> String {
    let year = item.year.map(|year| year.to_string()).unwrap_or_default();
    let text = raw.replace("{title}", &item.title).replace("{year}", &year);
    match transform {
        TextTransform::None => text,
        TextTransform::Uppercase => text.to_uppercase(),
        TextTransform::Lowercase => text.to_lowercase(),
        TextTransform::Capitalize => title_case(&text),
    }
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous_alpha = false;
    for ch in text.chars() {
        if ch.is_alphabetic() {
            if previous_alpha {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            previous_alpha = true;
        } else {
            out.push(ch);
            previous_alpha = false;
        }
    }
    out
}

// words wider than max_width break by character
pub fn wrap_line(line: &str, max_width: f64, measure: &dyn Fn(&str) -> f64) -> Vec<String> {
    if line.is_empty() || measure(line) <= max_width {
        return vec![line.to_string()];
    }
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in line.split(' ') {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{current} {word}")
        };
        if measure(&candidate) <= max_width {
            current = candidate;
            continue;
        }
        if !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if measure(word) <= max_width {
            current = word.to_string();
            continue;
        }
        for ch in word.chars() {
            current.push(ch);
            if measure(&current) > max_width && current.chars().count() > 1 {
                current.pop();
                lines.push(std::mem::take(&mut current));
                current.push(ch);
            }
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

pub fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

struct TextLayout<'a> {
    options: &'a TextOptions,
    family: String,
    lines: Vec<String>,
    width: u32,
}

impl TextLayout<'_> {
    fn anchor(&self) -> (&'static str, f64) {
        match self.options.align {
            TextAlign::Left => ("start", TEXT_MARGIN),
            TextAlign::Center => ("middle", self.width as f64 / 2.0),
            TextAlign::Right => ("end", self.width as f64 - TEXT_MARGIN),
        }
    }

    fn advance(&self) -> f64 {
        self.options.font_size * self.options.line_height
    }

    fn text_elements(&self, first_baseline: f64) -> String {
        let (anchor, x) = self.anchor();
        let mut out = String::new();
        for (index, line) in self.lines.iter().enumerate() {
            let y = first_baseline + index as f64 * self.advance();
            let _ = write!(
                out,
                r#"<text x="{x:.2}" y="{y:.2}" text-anchor="{anchor}" xml:space="preserve">{}</text>"#,
                escape_xml(line)
            );
        }
        out
    }

    fn svg(&self, height: u32, first_baseline: f64, with_shadow: bool) -> String {
        let options = self.options;
        let texts = self.text_elements(first_baseline);
        let mut svg = String::new();
        let _ = write!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            w = self.width,
            h = height
        );
        let _ = write!(
            svg,
            r#"<g font-family="'{}'" font-size="{:.2}" font-weight="{}" letter-spacing="{:.2}">"#,
            escape_xml(&self.family),
            options.font_size,
            options.font_weight,
            options.letter_spacing
        );
        if let (true, Some(shadow)) = (with_shadow, options.shadow) {
            let spread = options.stroke.map(|stroke| stroke.width * 2.0).unwrap_or(0.0);
            let _ = write!(
                svg,
                r#"<defs><filter id="shadow" x="-50%" y="-50%" width="200%" height="200%"><feGaussianBlur stdDeviation="{:.2}"/></filter></defs>"#,
                shadow.blur / 2.0
            );
            let color = to_hex(shadow.color);
            let _ = write!(
                svg,
                r#"<g transform="translate({:.2} {:.2})" opacity="{:.3}" filter="url(#shadow)" fill="{color}" stroke="{color}" stroke-width="{spread:.2}" stroke-linejoin="round">{texts}</g>"#,
                shadow.offset_x, shadow.offset_y, shadow.opacity
            );
        }
        if let Some(stroke) = options.stroke {
            let color = to_hex(stroke.color);
            let _ = write!(
                svg,
                r#"<g fill="{color}" stroke="{color}" stroke-width="{:.2}" stroke-linejoin="round">{texts}</g>"#,
                stroke.width * 2.0
            );
        }
        let _ = write!(svg, r#"<g fill="{}">{texts}</g>"#, to_hex(options.color));
        svg.push_str("</g></svg>");
        svg
    }
}

pub fn render_text(
    canvas: &mut RgbaImage,
    options: &TextOptions,
    item: &ItemIdentity,
    fonts: &FontCatalog,
    size: CanvasSize,
) -> Result<Vec<RenderWarning>, PosterError> {
    let mut warnings = Vec::new();
    let text = prepare_text(&options.text, item, options.transform);
    if text.trim().is_empty() {
        return Ok(warnings);
    }
    let resolution = fonts.resolve(&options.font_family);
    if !resolution.exact {
        debug!(
            requested = %options.font_family,
            fallback = %resolution.family,
            "font not found, using fallback"
        );
        warnings.push(RenderWarning::new(
            ErrorKind::FontUnresolved,
            "text",
            format!(
                "font {:?} not found, used {:?}",
                options.font_family, resolution.family
            ),
        ));
    }
    let svg_options = fonts.svg_options();
    let mut layout = TextLayout {
        options,
        family: resolution.family,
        lines: Vec::new(),
        width: size.width,
    };

    let max_width = (size.width as f64 - 2.0 * TEXT_MARGIN).max(1.0);
    let measure = |line: &str| measure_line_width(&layout_for(&layout, line), &svg_options);
    let mut lines = Vec::new();
    for line in text.split('\n') {
        lines.extend(wrap_line(line, max_width, &measure));
    }
    layout.lines = lines;

    // Measure on a canvas tall enough for the whole block, then move the
    // block so its visible centre sits at position_y * H.
    let pad = options.font_size * 2.0;
    let measure_height =
        (layout.advance() * layout.lines.len() as f64 + pad * 2.0).ceil() as u32;
    let probe = rasterize(&layout.svg(measure_height, pad, false), &svg_options)?;
    let Some((top, bottom)) = probe.as_ref().and_then(vertical_coverage) else {
        warnings.push(RenderWarning::new(
            ErrorKind::FontUnresolved,
            "text",
            "no glyphs could be drawn".to_string(),
        ));
        return Ok(warnings);
    };
    let measured_center = (top + bottom) as f64 / 2.0;
    let target_center = options.position_y * size.height as f64;
    let first_baseline = target_center - (measured_center - pad);

    if let Some(layer) = rasterize(&layout.svg(size.height, first_baseline, true), &svg_options)? {
        image::imageops::overlay(canvas, &layer, 0, 0);
    }
    Ok(warnings)
}

fn layout_for<'a>(layout: &TextLayout<'a>, line: &str) -> TextLayout<'a> {
    TextLayout {
        options: layout.options,
        family: layout.family.clone(),
        lines: vec![line.to_string()],
        width: layout.width,
    }
}

fn measure_line_width(layout: &TextLayout<'_>, svg_options: &usvg::Options<'_>) -> f64 {
    let options = TextOptions {
        align: TextAlign::Center,
        shadow: None,
        stroke: None,
        ..layout.options.clone()
    };
    let probe = TextLayout {
        options: &options,
        family: layout.family.clone(),
        lines: layout.lines.clone(),
        width: layout.width.saturating_mul(3),
    };
    let height = (layout.options.font_size * 3.0).ceil() as u32;
    let svg = probe.svg(height, layout.options.font_size * 2.0, false);
    match rasterize(&svg, svg_options) {
        Ok(Some(image)) => horizontal_coverage(&image)
            .map(|(left, right)| (right - left + 1) as f64)
            .unwrap_or(0.0),
        _ => 0.0,
    }
}

fn rasterize(svg: &str, svg_options: &usvg::Options<'_>) -> Result<Option<RgbaImage>, PosterError> {
    let tree = usvg::Tree::from_str(svg, svg_options)
        .map_err(|err| PosterError::InvalidRequest(format!("text layout failed: {err}")))?;
    let size = tree.size().to_int_size();
    let Some(mut pixmap) = tiny_skia::Pixmap::new(size.width(), size.height()) else {
        return Ok(None);
    };
    resvg::render(&tree, tiny_skia::Transform::identity(), &mut pixmap.as_mut());
    let mut image = RgbaImage::new(size.width(), size.height());
    for (pixel, source) in image.pixels_mut().zip(pixmap.pixels()) {
        let color = source.demultiply();
        *pixel = Rgba([color.red(), color.green(), color.blue(), color.alpha()]);
    }
    Ok(Some(image))
}

fn vertical_coverage(image: &RgbaImage) -> Option<(u32, u32)> {
    let rows = (0..image.height())
        .filter(|&y| (0..image.width()).any(|x| image.get_pixel(x, y).0[3] > 0));
    bounds(rows)
}

fn horizontal_coverage(image: &RgbaImage) -> Option<(u32, u32)> {
    let columns = (0..image.width())
        .filter(|&x| (0..image.height()).any(|y| image.get_pixel(x, y).0[3] > 0));
    bounds(columns)
}

fn bounds(mut positions: impl Iterator<Item = u32>) -> Option<(u32, u32)> {
    let first = positions.next()?;
    let last = positions.last().unwrap_or(first);
    Some((first, last))
}
