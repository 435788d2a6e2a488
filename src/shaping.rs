//! Text shaping - bidi runs shaped with rustybuzz
//!
//! Text is split into directional runs by the Unicode bidi algorithm and
//! each run is shaped against the field's own font, so joining forms and
//! ligatures come from the font's GSUB tables. Glyphs come out in visual
//! order, ready to draw left to right.

use log::warn;
use rustybuzz::{Direction, Face, Feature, UnicodeBuffer};
use std::ops::Range;
use std::sync::OnceLock;
use thiserror::Error;
use ttf_parser::Tag;
use unicode_bidi::BidiInfo;

use crate::fonts::LoadedFont;

#[derive(Debug, Error)]
#[error("text shaping failed: {0}")]
pub struct ShapeError(pub String);

/// One glyph, placed relative to the pen start of its line, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapedGlyph {
    pub id: u16,
    /// Byte offset of the source cluster in the shaped text.
    pub cluster: usize,
    pub x: f32,
    pub y: f32,
}

/// Glyphs in drawing order plus the total pen advance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlyphRun {
    pub glyphs: Vec<ShapedGlyph>,
    pub advance: f32,
}

impl GlyphRun {
    fn push(&mut self, id: u16, cluster: usize, offset: (f32, f32), advance: f32) {
        self.glyphs.push(ShapedGlyph {
            id,
            cluster,
            x: self.advance + offset.0,
            y: offset.1,
        });
        self.advance += advance;
    }
}

/// Logical text in, positioned glyphs out.
pub trait Shaper: Send + Sync {
    fn shape(&self, font: &LoadedFont, px: u32, text: &str) -> Result<GlyphRun, ShapeError>;
}

/// Bidi run splitting followed by OpenType shaping of each run.
#[derive(Debug, Clone, Copy, Default)]
pub struct BidiShaper;

fn features() -> &'static [Feature] {
    static FEATURES: OnceLock<Vec<Feature>> = OnceLock::new();
    FEATURES.get_or_init(|| {
        vec![
            Feature::new(Tag::from_bytes(b"liga"), 1, ..),
            Feature::new(Tag::from_bytes(b"kern"), 1, ..),
        ]
    })
}

impl Shaper for BidiShaper {
    fn shape(&self, font: &LoadedFont, px: u32, text: &str) -> Result<GlyphRun, ShapeError> {
        let face = Face::from_slice(font.data(), 0).ok_or_else(|| {
            ShapeError(format!("{} has no usable font tables", font.path().display()))
        })?;
        let scale = font.unit_scale(px);

        let mut run = GlyphRun::default();
        for (range, rtl) in visual_runs(text) {
            let mut buffer = UnicodeBuffer::new();
            buffer.push_str(&text[range.clone()]);
            buffer.set_direction(if rtl {
                Direction::RightToLeft
            } else {
                Direction::LeftToRight
            });
            buffer.guess_segment_properties();

            let shaped = rustybuzz::shape(&face, features(), buffer);
            for (info, pos) in shaped.glyph_infos().iter().zip(shaped.glyph_positions()) {
                let id = u16::try_from(info.glyph_id)
                    .map_err(|_| ShapeError(format!("glyph id {} out of range", info.glyph_id)))?;
                run.push(
                    id,
                    range.start + info.cluster as usize,
                    (pos.x_offset as f32 * scale, -(pos.y_offset as f32) * scale),
                    pos.x_advance as f32 * scale,
                );
            }
        }
        Ok(run)
    }
}

/// Directional runs of `text` as byte ranges in visual order, each
/// flagged right-to-left or not.
pub fn visual_runs(text: &str) -> Vec<(Range<usize>, bool)> {
    let info = BidiInfo::new(text, None);
    if !info.has_rtl() {
        return vec![(0..text.len(), false)];
    }
    let mut runs = vec![];
    for para in &info.paragraphs {
        let (levels, line_runs) = info.visual_runs(para, para.range.clone());
        for range in line_runs {
            let rtl = levels[range.start].is_rtl();
            runs.push((range, rtl));
        }
    }
    runs
}

/// Shape `text`, laying it out one glyph per character from the font's
/// character map when the shaper gives up.
pub fn shape_or_plain(shaper: &dyn Shaper, font: &LoadedFont, px: u32, text: &str) -> GlyphRun {
    match shaper.shape(font, px, text) {
        Ok(run) => run,
        Err(e) => {
            warn!("{e}; drawing '{text}' unshaped");
            plain_run(font, px, text)
        }
    }
}

/// Character-map layout with pair kerning, no contextual forms.
pub fn plain_run(font: &LoadedFont, px: u32, text: &str) -> GlyphRun {
    let mut run = GlyphRun::default();
    let mut clusters = text.char_indices().map(|(i, _)| i);
    for glyph in font.layout(px, text) {
        let cluster = clusters.next().unwrap_or(text.len());
        let x = glyph.position().x;
        run.glyphs.push(ShapedGlyph {
            id: glyph.id().0,
            cluster,
            x,
            y: 0.0,
        });
        run.advance = x + glyph.unpositioned().h_metrics().advance_width;
    }
    run
}
