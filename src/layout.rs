//! Layout Model - Field Specs and Data Rows
//!
//! Raw layouts arrive as JSON and are checked by the validator first.
//! [`Layout::from_value`] then turns them into closed records that the
//! render engine consumes without re-inspecting raw keys.

use image::Rgba;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// One row of certificate data: field name to raw value.
pub type DataRow = HashMap<String, String>;

/// Keys every field spec must carry.
pub const REQUIRED_KEYS: [&str; 6] = ["x", "y", "size", "font", "color", "align"];

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("Layout does not match the field schema: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid color '{0}'")]
pub struct ColorError(pub String);

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    #[default]
    Left,
    Center,
    Right,
}

impl Align {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "left" => Some(Self::Left),
            "center" => Some(Self::Center),
            "right" => Some(Self::Right),
            _ => None,
        }
    }

    /// Left edge of a run of `width` pixels anchored at `x`.
    pub fn origin_x(self, x: i32, width: i32) -> i32 {
        match self {
            Self::Left => x,
            Self::Center => x.saturating_sub(width / 2),
            Self::Right => x.saturating_sub(width),
        }
    }
}

/// Opaque fill color parsed from `#RGB` or `#RRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color(pub [u8; 3]);

impl Color {
    pub const BLACK: Color = Color([0, 0, 0]);

    pub fn parse(value: &str) -> Result<Self, ColorError> {
        let invalid = || ColorError(value.to_string());
        let digits = value.strip_prefix('#').ok_or_else(invalid)?;
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        let channel = |s: &str| u8::from_str_radix(s, 16).map_err(|_| invalid());
        match digits.len() {
            3 => {
                let mut rgb = [0u8; 3];
                for (slot, i) in rgb.iter_mut().zip(0..3) {
                    *slot = channel(&digits[i..i + 1])? * 17;
                }
                Ok(Self(rgb))
            }
            6 => Ok(Self([
                channel(&digits[0..2])?,
                channel(&digits[2..4])?,
                channel(&digits[4..6])?,
            ])),
            _ => Err(invalid()),
        }
    }

    pub fn to_rgba(self) -> Rgba<u8> {
        let [r, g, b] = self.0;
        Rgba([r, g, b, 255])
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.0;
        write!(f, "#{:02x}{:02x}{:02x}", r, g, b)
    }
}

impl TryFrom<String> for Color {
    type Error = ColorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_string()
    }
}

fn default_true() -> bool {
    true
}

/// `null` reads as the key's default, same as an absent key.
fn null_as_true<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(true))
}

fn null_as_false<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

/// Positioning and styling rule for one named text slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldSpec {
    pub x: i32,
    pub y: i32,
    pub size: u32,
    pub font: String,
    pub color: Color,
    pub align: Align,
    #[serde(default)]
    pub max_width: Option<u32>,
    #[serde(default = "default_true", deserialize_with = "null_as_true")]
    pub auto_scale: bool,
    #[serde(default, deserialize_with = "null_as_false")]
    pub wrap: bool,
}

impl FieldSpec {
    /// Pixel budget the font size must be shrunk to, if any.
    pub fn fit_width(&self) -> Option<u32> {
        self.max_width.filter(|_| self.auto_scale)
    }

    /// Pixel budget lines are wrapped to, if any.
    pub fn wrap_width(&self) -> Option<u32> {
        self.max_width.filter(|_| self.wrap)
    }
}

/// Ordered field specs; draw order is document order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Layout {
    #[serde(default)]
    pub fields: IndexMap<String, FieldSpec>,
}

impl Layout {
    /// The layout a template gets when it has none on disk.
    pub fn blank_value() -> Value {
        serde_json::json!({ "fields": {} })
    }

    pub fn from_value(value: &Value) -> Result<Self, LayoutError> {
        Ok(Layout::deserialize(value)?)
    }
}
