//! Template Store - backgrounds, layouts and metadata
//!
//! A template is a folder `<tier>/<id>/` holding `template.png`, and
//! optionally `default_layout.json` and `metadata.json`.

use image::RgbaImage;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::{AssetConfig, AssetSource};
use crate::fonts::is_plain_file_name;
use crate::layout::Layout;
use crate::render::RenderError;

pub type TemplateId = String;

pub const BACKGROUND_FILE: &str = "template.png";
pub const LAYOUT_FILE: &str = "default_layout.json";
pub const METADATA_FILE: &str = "metadata.json";

/// Locates template folders by id.
pub trait TemplateStore: Send + Sync {
    fn locate(&self, id: &str) -> Option<PathBuf>;
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Landscape,
    Portrait,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_author")]
    pub author: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub orientation: Orientation,
}

fn default_category() -> String { "general".to_string() }
fn default_author() -> String { "unknown".to_string() }
fn default_version() -> String { "1.0".to_string() }

impl Default for TemplateMetadata {
    fn default() -> Self {
        Self {
            name: None,
            description: String::new(),
            tags: vec![],
            category: default_category(),
            author: default_author(),
            version: default_version(),
            created_at: None,
            orientation: Orientation::default(),
        }
    }
}

impl TemplateMetadata {
    /// Stored name, or one derived from the id when unset or placeholder.
    pub fn display_name(&self, id: &str) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() && name != "Untitled Template" => name.to_string(),
            _ => title_case(&id.replace('_', " ")),
        }
    }
}

/// "gold award" -> "Gold Award"
fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_alpha = false;
    for c in text.chars() {
        if prev_alpha {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        prev_alpha = c.is_alphabetic();
    }
    out
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateEntry {
    pub id: TemplateId,
    pub name: String,
    pub source: AssetSource,
    pub category: String,
    pub tags: Vec<String>,
    pub orientation: Orientation,
}

/// Two-tier directory store, user tier first.
#[derive(Debug, Clone)]
pub struct DirTemplateStore {
    user_dir: PathBuf,
    builtin_dir: PathBuf,
}

impl DirTemplateStore {
    pub fn new(user_dir: impl Into<PathBuf>, builtin_dir: impl Into<PathBuf>) -> Self {
        Self {
            user_dir: user_dir.into(),
            builtin_dir: builtin_dir.into(),
        }
    }

    pub fn from_config(config: &AssetConfig) -> Self {
        Self::new(&config.user_templates_dir, &config.builtin_templates_dir)
    }

    /// Every template folder in both tiers, built-in first.
    pub fn list(&self) -> io::Result<Vec<TemplateEntry>> {
        let mut entries = scan_templates(&self.builtin_dir, AssetSource::BuiltIn)?;
        entries.extend(scan_templates(&self.user_dir, AssetSource::User)?);
        Ok(entries)
    }
}

impl TemplateStore for DirTemplateStore {
    fn locate(&self, id: &str) -> Option<PathBuf> {
        if !is_plain_file_name(id) {
            return None;
        }
        [&self.user_dir, &self.builtin_dir]
            .into_iter()
            .map(|dir| dir.join(id))
            .find(|folder| folder.is_dir())
    }
}

fn scan_templates(dir: &Path, source: AssetSource) -> io::Result<Vec<TemplateEntry>> {
    if !dir.is_dir() {
        return Ok(vec![]);
    }
    let mut entries = vec![];
    for entry in fs::read_dir(dir)? {
        let folder = entry?.path();
        if !folder.is_dir() {
            continue;
        }
        let Some(id) = folder.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        let meta = load_metadata(&folder);
        entries.push(TemplateEntry {
            name: meta.display_name(&id),
            id,
            source,
            category: meta.category,
            tags: meta.tags,
            orientation: meta.orientation,
        });
    }
    entries.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(entries)
}

/// Decode a template's background, fresh on every call.
pub fn load_background(store: &dyn TemplateStore, id: &str) -> Result<RgbaImage, RenderError> {
    let path = store
        .locate(id)
        .map(|folder| folder.join(BACKGROUND_FILE))
        .filter(|path| path.is_file())
        .ok_or_else(|| RenderError::TemplateMissing(id.to_string()))?;
    let image = image::open(&path).map_err(|source| RenderError::TemplateUnreadable {
        id: id.to_string(),
        source,
    })?;
    Ok(image.to_rgba8())
}

/// The template's stored layout document. Missing or unreadable documents
/// read as the blank layout.
pub fn load_layout(folder: &Path) -> Value {
    let path = folder.join(LAYOUT_FILE);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Layout::blank_value(),
        Err(e) => {
            warn!("cannot read {}: {}", path.display(), e);
            return Layout::blank_value();
        }
    };
    match serde_json::from_str::<Value>(&content) {
        Ok(layout) if layout.is_object() => layout,
        Ok(_) => {
            warn!("{} is not a JSON object; using a blank layout", path.display());
            Layout::blank_value()
        }
        Err(e) => {
            warn!("corrupt layout {}: {}; using a blank layout", path.display(), e);
            Layout::blank_value()
        }
    }
}

/// Metadata with defaults for anything missing or unparseable.
pub fn load_metadata(folder: &Path) -> TemplateMetadata {
    let path = folder.join(METADATA_FILE);
    let Ok(content) = fs::read_to_string(&path) else {
        return TemplateMetadata::default();
    };
    serde_json::from_str(&content).unwrap_or_else(|e| {
        warn!("corrupt metadata {}: {}", path.display(), e);
        TemplateMetadata::default()
    })
}
