//! Font resolution and metrics

use rusttype::{point, Font, GlyphId, PositionedGlyph, Scale};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::{AssetConfig, AssetSource};
use crate::shaping::GlyphRun;

const FONT_EXTENSIONS: [&str; 2] = ["ttf", "otf"];

/// Maps a logical font name to a font file.
pub trait FontResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<PathBuf>;

    fn exists(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }
}

/// Resolver over two font directories, user tier first.
#[derive(Debug, Clone)]
pub struct DirFontResolver {
    user_dir: PathBuf,
    builtin_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct FontEntry {
    pub name: String,
    pub source: AssetSource,
    pub path: PathBuf,
}

impl DirFontResolver {
    pub fn new(user_dir: impl Into<PathBuf>, builtin_dir: impl Into<PathBuf>) -> Self {
        Self {
            user_dir: user_dir.into(),
            builtin_dir: builtin_dir.into(),
        }
    }

    pub fn from_config(config: &AssetConfig) -> Self {
        Self::new(&config.user_fonts_dir, &config.builtin_fonts_dir)
    }

    /// All font files in both tiers, built-in first.
    pub fn list(&self) -> io::Result<Vec<FontEntry>> {
        let mut fonts = scan_fonts(&self.builtin_dir, AssetSource::BuiltIn)?;
        fonts.extend(scan_fonts(&self.user_dir, AssetSource::User)?);
        Ok(fonts)
    }
}

impl FontResolver for DirFontResolver {
    fn resolve(&self, name: &str) -> Option<PathBuf> {
        if !is_plain_file_name(name) {
            return None;
        }
        [&self.user_dir, &self.builtin_dir]
            .into_iter()
            .map(|dir| dir.join(name))
            .find(|path| path.is_file())
    }
}

/// Asset names are bare file names; anything that could walk out of the
/// asset directory never resolves.
pub(crate) fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(|c: char| c == '/' || c == '\\')
}

fn scan_fonts(dir: &Path, source: AssetSource) -> io::Result<Vec<FontEntry>> {
    if !dir.is_dir() {
        return Ok(vec![]);
    }
    let mut fonts = vec![];
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_font = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| FONT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if !is_font || !path.is_file() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            fonts.push(FontEntry {
                name: name.to_string(),
                source,
                path: path.clone(),
            });
        }
    }
    fonts.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(fonts)
}

#[derive(Debug, Error)]
pub enum FontLoadError {
    #[error("Failed to read font {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("Not a usable font file: {}", .0.display())]
    Parse(PathBuf),
}

/// A parsed font plus the file it came from.
///
/// The raw bytes are kept for the shaper; rusttype rasterizes glyphs.
pub struct LoadedFont {
    font: Font<'static>,
    data: Vec<u8>,
    path: PathBuf,
    fallback: bool,
}

impl LoadedFont {
    pub fn open(path: &Path) -> Result<Self, FontLoadError> {
        let data = fs::read(path).map_err(|source| FontLoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let font = Font::try_from_vec(data.clone())
            .ok_or_else(|| FontLoadError::Parse(path.to_path_buf()))?;
        Ok(Self {
            font,
            data,
            path: path.to_path_buf(),
            fallback: false,
        })
    }

    pub(crate) fn into_fallback(mut self) -> Self {
        self.fallback = true;
        self
    }

    pub fn font(&self) -> &Font<'static> {
        &self.font
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    /// Pixels per font unit at `px`, matching rusttype's `Scale::uniform`.
    pub fn unit_scale(&self, px: u32) -> f32 {
        let v = self.font.v_metrics_unscaled();
        let span = v.ascent - v.descent;
        if span > 0.0 {
            px as f32 / span
        } else {
            0.0
        }
    }

    /// rusttype's own per-character layout from a zero baseline.
    pub(crate) fn layout<'a>(
        &'a self,
        px: u32,
        text: &'a str,
    ) -> impl Iterator<Item = PositionedGlyph<'static>> + 'a {
        self.font.layout(text, Scale::uniform(px as f32), point(0.0, 0.0))
    }

    /// Glyphs of `run` positioned with the line's top edge at `y = 0`.
    pub fn positioned<'a>(
        &'a self,
        px: u32,
        run: &'a GlyphRun,
    ) -> impl Iterator<Item = PositionedGlyph<'static>> + 'a {
        let scale = Scale::uniform(px as f32);
        let ascent = self.font.v_metrics(scale).ascent;
        run.glyphs.iter().map(move |g| {
            self.font
                .glyph(GlyphId(g.id))
                .scaled(scale)
                .positioned(point(g.x, ascent + g.y))
        })
    }

    /// Horizontal ink extent `(min_x, max_x)` of `run`.
    /// `None` when no glyph has visible pixels.
    pub fn ink_bounds(&self, px: u32, run: &GlyphRun) -> Option<(i32, i32)> {
        self.positioned(px, run)
            .filter_map(|g| g.pixel_bounding_box())
            .fold(None, |acc, bb| match acc {
                None => Some((bb.min.x, bb.max.x)),
                Some((lo, hi)) => Some((lo.min(bb.min.x), hi.max(bb.max.x))),
            })
    }

    /// Ink bounding-box width; 0 for unmeasurable text.
    pub fn ink_width(&self, px: u32, run: &GlyphRun) -> i32 {
        self.ink_bounds(px, run).map_or(0, |(lo, hi)| hi - lo)
    }

    /// Ascent to descent span at `px`.
    pub fn line_height(&self, px: u32) -> i32 {
        let v = self.font.v_metrics(Scale::uniform(px as f32));
        (v.ascent - v.descent).ceil() as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaping::{plain_run, BidiShaper, Shaper};

    fn bundled_fonts() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fonts")
    }

    #[test]
    fn test_user_font_shadows_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let user = dir.path().join("user");
        let builtin = dir.path().join("builtin");
        fs::create_dir_all(&user).unwrap();
        fs::create_dir_all(&builtin).unwrap();
        fs::write(builtin.join("Brand.ttf"), b"builtin").unwrap();
        fs::write(builtin.join("Serif.otf"), b"builtin").unwrap();
        fs::write(user.join("Brand.ttf"), b"user").unwrap();

        let resolver = DirFontResolver::new(&user, &builtin);
        assert_eq!(resolver.resolve("Brand.ttf"), Some(user.join("Brand.ttf")));
        assert_eq!(resolver.resolve("Serif.otf"), Some(builtin.join("Serif.otf")));
        assert_eq!(resolver.resolve("Missing.ttf"), None);
    }

    #[test]
    fn test_path_like_names_never_resolve() {
        let resolver = DirFontResolver::new("/nonexistent", bundled_fonts());
        assert!(resolver.exists("DejaVuSans.ttf"));
        assert!(!resolver.exists("../fonts/DejaVuSans.ttf"));
        assert!(!resolver.exists(".."));
        assert!(!resolver.exists(""));
    }

    #[test]
    fn test_list_filters_extensions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("A.TTF"), b"x").unwrap();
        fs::write(dir.path().join("b.otf"), b"x").unwrap();
        fs::write(dir.path().join("readme.txt"), b"x").unwrap();

        let resolver = DirFontResolver::new(dir.path().join("absent"), dir.path());
        let names: Vec<_> = resolver.list().unwrap().into_iter().map(|f| f.name).collect();
        assert_eq!(names, ["A.TTF", "b.otf"]);
    }

    #[test]
    fn test_metrics_scale_with_size() {
        let font = LoadedFont::open(&bundled_fonts().join("DejaVuSans.ttf")).unwrap();
        let small = plain_run(&font, 12, "Certificate").advance;
        let large = plain_run(&font, 48, "Certificate").advance;
        assert!(small > 0.0);
        assert!(large > small * 3.5);
        assert!(font.ink_width(48, &plain_run(&font, 48, "Certificate")) > 0);
        assert_eq!(font.ink_bounds(48, &plain_run(&font, 48, "   ")), None);
        assert!(font.line_height(48) >= 48);
    }

    #[test]
    fn test_shaped_advance_uses_rasterizer_scale() {
        let font = LoadedFont::open(&bundled_fonts().join("DejaVuSans.ttf")).unwrap();
        let shaped = BidiShaper.shape(&font, 40, "M").unwrap();
        assert!((shaped.advance - plain_run(&font, 40, "M").advance).abs() < 0.01);
    }

    #[test]
    fn test_garbage_font_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.ttf");
        fs::write(&path, b"not a font").unwrap();
        assert!(matches!(LoadedFont::open(&path), Err(FontLoadError::Parse(_))));
    }
}
