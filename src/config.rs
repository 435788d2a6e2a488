//! Asset configuration
//!
//! Every directory the engine reads from is named here. Relative entries
//! are resolved against the asset root (or the config file's directory).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Resolution tier of a font or template. User assets shadow built-in ones.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssetSource {
    BuiltIn,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetConfig {
    #[serde(default = "default_builtin_fonts_dir")]
    pub builtin_fonts_dir: PathBuf,
    #[serde(default = "default_user_fonts_dir")]
    pub user_fonts_dir: PathBuf,
    #[serde(default = "default_builtin_templates_dir")]
    pub builtin_templates_dir: PathBuf,
    #[serde(default = "default_user_templates_dir")]
    pub user_templates_dir: PathBuf,
    #[serde(default = "default_fallback_font")]
    pub fallback_font: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_builtin_fonts_dir() -> PathBuf { PathBuf::from("fonts") }
fn default_user_fonts_dir() -> PathBuf { PathBuf::from("uploads/fonts") }
fn default_builtin_templates_dir() -> PathBuf { PathBuf::from("templates_store") }
fn default_user_templates_dir() -> PathBuf { PathBuf::from("uploads/templates") }
fn default_fallback_font() -> PathBuf { PathBuf::from("fonts/DejaVuSans.ttf") }
fn default_output_dir() -> PathBuf { PathBuf::from("output") }

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            builtin_fonts_dir: default_builtin_fonts_dir(),
            user_fonts_dir: default_user_fonts_dir(),
            builtin_templates_dir: default_builtin_templates_dir(),
            user_templates_dir: default_user_templates_dir(),
            fallback_font: default_fallback_font(),
            output_dir: default_output_dir(),
        }
    }
}

impl AssetConfig {
    /// Default layout under `root`.
    pub fn from_root(root: &Path) -> Self {
        Self::default().rooted_at(root)
    }

    /// Load a JSON config; missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(config.rooted_at(base))
    }

    pub fn rooted_at(self, root: &Path) -> Self {
        let join = |p: PathBuf| if p.is_absolute() { p } else { root.join(p) };
        Self {
            builtin_fonts_dir: join(self.builtin_fonts_dir),
            user_fonts_dir: join(self.user_fonts_dir),
            builtin_templates_dir: join(self.builtin_templates_dir),
            user_templates_dir: join(self.user_templates_dir),
            fallback_font: join(self.fallback_font),
            output_dir: join(self.output_dir),
        }
    }
}
