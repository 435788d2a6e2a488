//! Render Engine - text onto a template background
//!
//! Per field, in layout order: skip blanks, fit the font size, wrap,
//! shape each line, align, draw. Every measurement is taken on shaped
//! glyphs. The background is copied; inputs are never mutated.

use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, ImageError, Rgba, RgbaImage};
use imageproc::pixelops::weighted_sum;
use log::{debug, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use thiserror::Error;

use crate::fonts::{FontLoadError, FontResolver, LoadedFont};
use crate::layout::{DataRow, FieldSpec, Layout, LayoutError};
use crate::shaping::{shape_or_plain, BidiShaper, GlyphRun, Shaper};
use crate::templates::{self, TemplateStore};

/// Smallest size auto-fit settles on, overflow or not.
pub const FIT_FLOOR: u32 = 10;
pub const FIT_STEP: u32 = 2;
/// Extra pixels between wrapped lines.
pub const LINE_GUTTER: i32 = 5;

#[derive(Debug, Error)]
pub enum RenderError {
    /// No template folder for the id, or a folder without a background.
    #[error("Template not found: {0}")]
    TemplateMissing(String),

    #[error("Template '{id}' could not be opened: {source}")]
    TemplateUnreadable {
        id: String,
        source: ImageError,
    },

    #[error("Fallback font missing at {}: {source}", .path.display())]
    FallbackFontMissing {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Fallback font at {} is not a usable font", .0.display())]
    FallbackFontInvalid(PathBuf),

    #[error(transparent)]
    InvalidLayout(#[from] LayoutError),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PlacedLine {
    pub text: String,
    pub x: i32,
    pub y: i32,
    pub width: i32,
}

/// What the engine decided for one drawn field.
#[derive(Debug, Clone, Serialize)]
pub struct FieldPlacement {
    pub field: String,
    pub font: PathBuf,
    pub fallback_font: bool,
    pub font_size: u32,
    pub lines: Vec<PlacedLine>,
}

pub struct RenderedImage {
    pub image: RgbaImage,
    pub placements: Vec<FieldPlacement>,
}

impl RenderedImage {
    pub fn placement(&self, field: &str) -> Option<&FieldPlacement> {
        self.placements.iter().find(|p| p.field == field)
    }

    pub fn to_png(&self) -> Result<Vec<u8>, ImageError> {
        encode_png(&self.image)
    }
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, ImageError> {
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ColorType::Rgba8,
    )?;
    Ok(buf)
}

/// Measures and lays out text in one font through a shaper.
pub struct Typesetter<'a> {
    shaper: &'a dyn Shaper,
    font: &'a LoadedFont,
}

impl<'a> Typesetter<'a> {
    pub fn new(shaper: &'a dyn Shaper, font: &'a LoadedFont) -> Self {
        Self { shaper, font }
    }

    pub fn font(&self) -> &LoadedFont {
        self.font
    }

    pub fn run(&self, px: u32, text: &str) -> GlyphRun {
        shape_or_plain(self.shaper, self.font, px, text)
    }

    /// Pen advance of the shaped `text` at `px`.
    pub fn advance(&self, px: u32, text: &str) -> f32 {
        self.run(px, text).advance
    }
}

/// Largest size from `base` down in steps of [`FIT_STEP`] whose advance
/// fits `max_width`, else [`FIT_FLOOR`].
pub fn fit_font_size(set: &Typesetter<'_>, text: &str, base: u32, max_width: u32) -> u32 {
    let mut size = base;
    while size > FIT_FLOOR {
        if set.advance(size, text) <= max_width as f32 {
            return size;
        }
        size -= FIT_STEP;
    }
    FIT_FLOOR
}

/// Greedy word packing in logical order. Words are never split; a word
/// wider than `max_width` gets a line of its own.
pub fn wrap_lines(set: &Typesetter<'_>, size: u32, text: &str, max_width: u32) -> Vec<String> {
    let mut lines = vec![];
    let mut current = String::new();
    for word in text.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
            continue;
        }
        let candidate = format!("{} {}", current, word);
        if set.advance(size, &candidate) <= max_width as f32 {
            current = candidate;
        } else {
            lines.push(std::mem::replace(&mut current, word.to_string()));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

pub struct Renderer {
    fonts: Arc<dyn FontResolver>,
    fallback_font: PathBuf,
    shaper: Box<dyn Shaper>,
}

impl Renderer {
    pub fn new(fonts: Arc<dyn FontResolver>, fallback_font: impl Into<PathBuf>) -> Self {
        Self {
            fonts,
            fallback_font: fallback_font.into(),
            shaper: Box::new(BidiShaper),
        }
    }

    pub fn with_shaper(mut self, shaper: impl Shaper + 'static) -> Self {
        self.shaper = Box::new(shaper);
        self
    }

    /// Render onto a copy of `background`.
    pub fn render(
        &self,
        background: &RgbaImage,
        layout: &Layout,
        data: &DataRow,
    ) -> Result<RenderedImage, RenderError> {
        self.compose(background.clone(), layout, data)
    }

    /// Decode the template's background and render onto it.
    pub fn render_template(
        &self,
        store: &dyn TemplateStore,
        template_id: &str,
        layout: &Layout,
        data: &DataRow,
    ) -> Result<RenderedImage, RenderError> {
        let background = templates::load_background(store, template_id)?;
        self.compose(background, layout, data)
    }

    fn compose(
        &self,
        mut canvas: RgbaImage,
        layout: &Layout,
        data: &DataRow,
    ) -> Result<RenderedImage, RenderError> {
        let mut fonts = FontCache::new(self);
        let mut placements = vec![];

        for (name, spec) in &layout.fields {
            let Some(raw) = data.get(name) else { continue };
            let text = raw.trim();
            if text.is_empty() {
                debug!("field '{}' is blank, skipping", name);
                continue;
            }

            let font = fonts.get(&spec.font)?;
            let set = Typesetter::new(self.shaper.as_ref(), &font);
            let placement = draw_field(&mut canvas, name, spec, &set, text);
            debug!(
                "field '{}': size {} ({} line(s)) with {}",
                name,
                placement.font_size,
                placement.lines.len(),
                font.path().display()
            );
            placements.push(placement);
        }

        Ok(RenderedImage {
            image: canvas,
            placements,
        })
    }
}

fn draw_field(
    canvas: &mut RgbaImage,
    name: &str,
    spec: &FieldSpec,
    set: &Typesetter<'_>,
    text: &str,
) -> FieldPlacement {
    let size = match spec.fit_width() {
        Some(max_width) => fit_font_size(set, text, spec.size, max_width),
        None => spec.size,
    };
    let lines = match spec.wrap_width() {
        Some(max_width) => wrap_lines(set, size, text, max_width),
        None => vec![text.to_string()],
    };

    let font = set.font();
    let color = spec.color.to_rgba();
    let line_step = font.line_height(size).saturating_add(LINE_GUTTER);
    let mut placed = Vec::with_capacity(lines.len());

    for (i, line) in lines.into_iter().enumerate() {
        let run = set.run(size, &line);
        let width = font.ink_width(size, &run);
        let x = spec.align.origin_x(spec.x, width);
        let offset = i32::try_from(i).map_or(i32::MAX, |i| i.saturating_mul(line_step));
        let y = spec.y.saturating_add(offset);
        draw_run(canvas, font, size, &run, (x, y), color);
        placed.push(PlacedLine {
            text: line,
            x,
            y,
            width,
        });
    }

    FieldPlacement {
        field: name.to_string(),
        font: font.path().to_path_buf(),
        fallback_font: font.is_fallback(),
        font_size: size,
        lines: placed,
    }
}

/// Alpha-blend the glyph coverage of `run` onto `canvas` with the line's
/// top-left corner at `origin`. Pixels off the canvas are dropped.
fn draw_run(
    canvas: &mut RgbaImage,
    font: &LoadedFont,
    px: u32,
    run: &GlyphRun,
    origin: (i32, i32),
    color: Rgba<u8>,
) {
    let (width, height) = canvas.dimensions();
    for glyph in font.positioned(px, run) {
        let Some(bb) = glyph.pixel_bounding_box() else { continue };
        let left = i64::from(origin.0) + i64::from(bb.min.x);
        let top = i64::from(origin.1) + i64::from(bb.min.y);
        glyph.draw(|gx, gy, coverage| {
            let cx = u32::try_from(left + i64::from(gx));
            let cy = u32::try_from(top + i64::from(gy));
            if let (Ok(cx), Ok(cy)) = (cx, cy) {
                if cx < width && cy < height {
                    let pixel = canvas.get_pixel_mut(cx, cy);
                    *pixel = weighted_sum(*pixel, color, 1.0 - coverage, coverage);
                }
            }
        });
    }
}

/// Fonts loaded during one render. Never shared across renders.
struct FontCache<'r> {
    renderer: &'r Renderer,
    loaded: HashMap<String, Rc<LoadedFont>>,
    fallback: Option<Rc<LoadedFont>>,
}

impl<'r> FontCache<'r> {
    fn new(renderer: &'r Renderer) -> Self {
        Self {
            renderer,
            loaded: HashMap::new(),
            fallback: None,
        }
    }

    fn get(&mut self, name: &str) -> Result<Rc<LoadedFont>, RenderError> {
        if let Some(font) = self.loaded.get(name) {
            return Ok(Rc::clone(font));
        }

        let resolved = match self.renderer.fonts.resolve(name) {
            Some(path) => LoadedFont::open(&path)
                .map_err(|e| warn!("{}; using fallback font for '{}'", e, name))
                .ok(),
            None => {
                warn!("font '{}' not found; using fallback font", name);
                None
            }
        };
        let font = match resolved {
            Some(font) => Rc::new(font),
            None => self.fallback()?,
        };
        self.loaded.insert(name.to_string(), Rc::clone(&font));
        Ok(font)
    }

    fn fallback(&mut self) -> Result<Rc<LoadedFont>, RenderError> {
        if let Some(font) = &self.fallback {
            return Ok(Rc::clone(font));
        }
        let path = &self.renderer.fallback_font;
        let font = LoadedFont::open(path).map_err(|e| match e {
            FontLoadError::Read { path, source } => RenderError::FallbackFontMissing { path, source },
            FontLoadError::Parse(path) => RenderError::FallbackFontInvalid(path),
        })?;
        let font = Rc::new(font.into_fallback());
        self.fallback = Some(Rc::clone(&font));
        Ok(font)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fonts::DirFontResolver;
    use image::Rgba;
    use serde_json::json;

    fn bundled_fonts() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fonts")
    }

    fn dejavu() -> LoadedFont {
        LoadedFont::open(&bundled_fonts().join("DejaVuSans.ttf")).unwrap()
    }

    fn renderer() -> Renderer {
        let fonts = Arc::new(DirFontResolver::new("/nonexistent", bundled_fonts()));
        Renderer::new(fonts, bundled_fonts().join("DejaVuSans.ttf"))
    }

    fn row(pairs: &[(&str, &str)]) -> DataRow {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn white(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 255]))
    }

    #[test]
    fn test_fit_keeps_base_when_it_fits() {
        let font = dejavu();
        let set = Typesetter::new(&BidiShaper, &font);
        assert_eq!(fit_font_size(&set, "Al", 48, 1000), 48);
    }

    #[test]
    fn test_fit_is_largest_fitting_step() {
        let font = dejavu();
        let set = Typesetter::new(&BidiShaper, &font);
        let text = "Certificate of Completion";
        let size = fit_font_size(&set, text, 64, 300);
        assert!(size < 64 && size > FIT_FLOOR);
        assert_eq!((64 - size) % FIT_STEP, 0);
        assert!(set.advance(size, text) <= 300.0);
        assert!(set.advance(size + FIT_STEP, text) > 300.0);
    }

    #[test]
    fn test_fit_stops_at_floor() {
        let font = dejavu();
        let set = Typesetter::new(&BidiShaper, &font);
        let text = "An extraordinarily long honorific that cannot possibly fit";
        assert_eq!(fit_font_size(&set, text, 48, 20), FIT_FLOOR);
        assert_eq!(fit_font_size(&set, text, 11, 20), FIT_FLOOR);
    }

    #[test]
    fn test_fit_measures_shaped_arabic() {
        let font = dejavu();
        let set = Typesetter::new(&BidiShaper, &font);
        // lam-alef ligates, so the shaped width is not the sum of the letters
        let text = "\u{0644}\u{0627}\u{0644}\u{0627}";
        let plain = crate::shaping::plain_run(&font, 40, text).advance;
        assert!((set.advance(40, text) - plain).abs() > 1.0);
    }

    #[test]
    fn test_wrap_puts_wide_word_alone() {
        let font = dejavu();
        let set = Typesetter::new(&BidiShaper, &font);
        let lines = wrap_lines(&set, 40, "a Supercalifragilistic b", 120);
        assert_eq!(lines, ["a", "Supercalifragilistic", "b"]);
    }

    #[test]
    fn test_wrap_collapses_whitespace() {
        let font = dejavu();
        let set = Typesetter::new(&BidiShaper, &font);
        let lines = wrap_lines(&set, 12, "  one \t two  ", 1000);
        assert_eq!(lines, ["one two"]);
    }

    #[test]
    fn test_wrapped_arabic_keeps_logical_word_order() {
        let font = dejavu();
        let set = Typesetter::new(&BidiShaper, &font);
        let words = ["\u{0633}\u{0644}\u{0627}\u{0645}", "\u{0628}\u{064A}\u{062A}"];
        let lines = wrap_lines(&set, 40, &words.join(" "), 10);
        assert_eq!(lines, words);
    }

    #[test]
    fn test_glyphs_off_canvas_are_dropped() {
        let layout = Layout::from_value(&json!({"fields": {
            "name": {"x": i32::MAX, "y": i32::MAX, "size": 40, "font": "DejaVuSans.ttf", "color": "#000", "align": "left",
                     "max_width": 50, "wrap": true, "auto_scale": false}
        }}))
        .unwrap();
        let bg = white(40, 40);
        let out = renderer()
            .render(&bg, &layout, &row(&[("name", "far away text")]))
            .unwrap();
        let lines = &out.placement("name").unwrap().lines;
        assert!(lines.len() > 1);
        assert!(lines.iter().all(|l| l.x == i32::MAX && l.y == i32::MAX));
        assert_eq!(out.image, bg);
    }

    #[test]
    fn test_later_fields_draw_on_top() {
        let layout = Layout::from_value(&json!({"fields": {
            "under": {"x": 10, "y": 10, "size": 60, "font": "DejaVuSans.ttf", "color": "#ff0000", "align": "left"},
            "over": {"x": 10, "y": 10, "size": 60, "font": "DejaVuSans.ttf", "color": "#0000ff", "align": "left"}
        }}))
        .unwrap();
        let out = renderer()
            .render(&white(200, 120), &layout, &row(&[("under", "M"), ("over", "M")]))
            .unwrap();
        let pixels: Vec<_> = out.image.pixels().collect();
        assert!(pixels.iter().any(|p| p.0[2] > 200 && p.0[0] < 50));
        assert!(!pixels.iter().any(|p| p.0[0] > 200 && p.0[2] < 50));
    }

    #[test]
    fn test_unknown_font_uses_fallback() {
        let layout = Layout::from_value(&json!({"fields": {
            "name": {"x": 5, "y": 5, "size": 20, "font": "Gone.ttf", "color": "#000", "align": "left"}
        }}))
        .unwrap();
        let out = renderer().render(&white(200, 60), &layout, &row(&[("name", "Zed")])).unwrap();
        let placement = out.placement("name").unwrap();
        assert!(placement.fallback_font);
        assert_eq!(placement.font, bundled_fonts().join("DejaVuSans.ttf"));
    }

    #[test]
    fn test_missing_fallback_is_fatal() {
        let fonts = Arc::new(DirFontResolver::new("/nonexistent", "/nonexistent"));
        let renderer = Renderer::new(fonts, "/nonexistent/Fallback.ttf");
        let layout = Layout::from_value(&json!({"fields": {
            "name": {"x": 5, "y": 5, "size": 20, "font": "Gone.ttf", "color": "#000", "align": "left"}
        }}))
        .unwrap();
        let result = renderer.render(&white(50, 50), &layout, &row(&[("name", "Zed")]));
        assert!(matches!(result, Err(RenderError::FallbackFontMissing { .. })));
    }

    #[test]
    fn test_png_encoding() {
        let png = encode_png(&white(4, 3)).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
    }
}
