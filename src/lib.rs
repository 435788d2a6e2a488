//! CertiForge Core - certificate rendering engine
//!
//! A layout places named text fields on a template background. The
//! validator reports every problem with a layout and data row at once;
//! the renderer fits, wraps, shapes and draws each field onto a fresh
//! copy of the background.

pub mod config;
pub mod data;
pub mod fonts;
pub mod hashing;
pub mod layout;
pub mod pipeline;
pub mod render;
pub mod shaping;
pub mod templates;
pub mod validation;

pub use config::{AssetConfig, AssetSource, ConfigError};
pub use fonts::{DirFontResolver, FontEntry, FontResolver, LoadedFont};
pub use layout::{Align, Color, DataRow, FieldSpec, Layout, LayoutError};
pub use pipeline::{BulkReport, Generator, PipelineError, RowOutcome};
pub use render::{FieldPlacement, PlacedLine, RenderError, RenderedImage, Renderer, Typesetter};
pub use shaping::{BidiShaper, GlyphRun, ShapeError, ShapedGlyph, Shaper};
pub use templates::{DirTemplateStore, TemplateEntry, TemplateId, TemplateStore};
pub use validation::{ValidationReport, Validator};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
