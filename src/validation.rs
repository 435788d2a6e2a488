//! Validation System - Field Rules
//!
//! Rules inspect one raw field spec and produce error messages.
//! The validator walks fields in layout order, applies every rule,
//! then checks the data row. Nothing short-circuits except a layout
//! without a usable `fields` object.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::fonts::FontResolver;
use crate::layout::{Align, Color, DataRow, REQUIRED_KEYS};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Field rule trait - produces error messages for one field
pub trait FieldRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, field: &str, spec: &Map<String, Value>) -> Vec<String>;
}

/// How an offending value appears in messages.
fn shown(value: Option<&Value>) -> String {
    match value {
        None => "<missing>".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn as_u32(value: &Value) -> Option<u32> {
    value.as_u64().and_then(|v| u32::try_from(v).ok())
}

// --- Concrete Rules ---

pub struct RequiredKeysRule;

impl FieldRule for RequiredKeysRule {
    fn name(&self) -> &'static str {
        "required_keys"
    }

    fn check(&self, field: &str, spec: &Map<String, Value>) -> Vec<String> {
        REQUIRED_KEYS
            .iter()
            .filter(|key| !spec.contains_key(**key))
            .map(|key| format!("Field '{}' missing required key '{}'", field, key))
            .collect()
    }
}

pub struct CoordinatesRule;

impl FieldRule for CoordinatesRule {
    fn name(&self) -> &'static str {
        "coordinates"
    }

    fn check(&self, field: &str, spec: &Map<String, Value>) -> Vec<String> {
        let mut errors = vec![];
        for axis in ["x", "y"] {
            let Some(value) = spec.get(axis) else { continue };
            match value.as_i64() {
                Some(v) if v < 0 => {
                    errors.push(format!("Field '{}' has negative {} coordinate", field, axis))
                }
                Some(v) if i32::try_from(v).is_ok() => {}
                _ => errors.push(format!(
                    "Field '{}' has invalid '{}' value '{}'",
                    field, axis, shown(Some(value))
                )),
            }
        }
        errors
    }
}

pub struct SizeRule;

impl FieldRule for SizeRule {
    fn name(&self) -> &'static str {
        "size"
    }

    fn check(&self, field: &str, spec: &Map<String, Value>) -> Vec<String> {
        match spec.get("size") {
            Some(value) if !as_u32(value).map_or(false, |s| s > 0) => vec![format!(
                "Field '{}' has invalid size '{}'",
                field, shown(Some(value))
            )],
            _ => vec![],
        }
    }
}

pub struct FontExistsRule {
    fonts: Arc<dyn FontResolver>,
}

impl FontExistsRule {
    pub fn new(fonts: Arc<dyn FontResolver>) -> Self {
        Self { fonts }
    }
}

impl FieldRule for FontExistsRule {
    fn name(&self) -> &'static str {
        "font"
    }

    fn check(&self, field: &str, spec: &Map<String, Value>) -> Vec<String> {
        match spec.get("font") {
            None => vec![],
            Some(Value::String(font)) if self.fonts.exists(font) => vec![],
            Some(Value::String(font)) => {
                vec![format!("Font '{}' for field '{}' does not exist", font, field)]
            }
            Some(other) => vec![format!(
                "Field '{}' has invalid font '{}'",
                field, shown(Some(other))
            )],
        }
    }
}

pub struct AlignmentRule;

impl FieldRule for AlignmentRule {
    fn name(&self) -> &'static str {
        "alignment"
    }

    fn check(&self, field: &str, spec: &Map<String, Value>) -> Vec<String> {
        let value = spec.get("align");
        if value.and_then(Value::as_str).and_then(Align::parse).is_some() {
            return vec![];
        }
        vec![format!("Field '{}' has invalid alignment '{}'", field, shown(value))]
    }
}

pub struct ColorRule;

impl FieldRule for ColorRule {
    fn name(&self) -> &'static str {
        "color"
    }

    fn check(&self, field: &str, spec: &Map<String, Value>) -> Vec<String> {
        // Absence is reported by RequiredKeysRule.
        let Some(value) = spec.get("color") else { return vec![] };
        if value.as_str().map_or(false, |c| Color::parse(c).is_ok()) {
            return vec![];
        }
        vec![format!("Field '{}' has invalid color '{}'", field, shown(Some(value)))]
    }
}

/// `max_width`, `auto_scale` and `wrap`; `null` counts as absent.
pub struct OptionalKeysRule;

impl FieldRule for OptionalKeysRule {
    fn name(&self) -> &'static str {
        "optional_keys"
    }

    fn check(&self, field: &str, spec: &Map<String, Value>) -> Vec<String> {
        let mut errors = vec![];
        match spec.get("max_width") {
            None | Some(Value::Null) => {}
            Some(value) if as_u32(value).map_or(false, |w| w > 0) => {}
            Some(value) => errors.push(format!(
                "Field '{}' has invalid max_width '{}'",
                field, shown(Some(value))
            )),
        }
        for flag in ["auto_scale", "wrap"] {
            match spec.get(flag) {
                None | Some(Value::Null) | Some(Value::Bool(_)) => {}
                Some(value) => errors.push(format!(
                    "Field '{}' has invalid {} '{}'",
                    field, flag, shown(Some(value))
                )),
            }
        }
        errors
    }
}

/// Validator orchestrates field rules and the data-row check
pub struct Validator {
    rules: Vec<Box<dyn FieldRule>>,
}

impl Validator {
    pub fn new(fonts: Arc<dyn FontResolver>) -> Self {
        Self {
            rules: vec![
                Box::new(RequiredKeysRule),
                Box::new(CoordinatesRule),
                Box::new(SizeRule),
                Box::new(FontExistsRule::new(fonts)),
                Box::new(AlignmentRule),
                Box::new(ColorRule),
                Box::new(OptionalKeysRule),
            ],
        }
    }

    /// Every problem with `layout` and `data`, layout problems first.
    pub fn validate(&self, layout: &Value, data: &DataRow) -> Vec<String> {
        let mut errors = self.validate_layout(layout);
        errors.extend(self.validate_data(layout, data));
        errors
    }

    /// Checks that depend on the layout alone.
    pub fn validate_layout(&self, layout: &Value) -> Vec<String> {
        let fields = match layout.get("fields") {
            None => return vec!["Layout missing 'fields' section".to_string()],
            Some(Value::Object(fields)) => fields,
            Some(_) => return vec!["Layout 'fields' must be an object".to_string()],
        };

        let mut errors = vec![];
        for (name, spec) in fields {
            let Value::Object(spec) = spec else {
                errors.push(format!("Field '{}' is not a valid object", name));
                continue;
            };
            for rule in &self.rules {
                errors.extend(rule.check(name, spec));
            }
        }
        errors
    }

    /// Every declared field needs a non-blank value; extra row keys are ignored.
    pub fn validate_data(&self, layout: &Value, data: &DataRow) -> Vec<String> {
        let Some(Value::Object(fields)) = layout.get("fields") else {
            return vec![];
        };

        fields
            .keys()
            .filter_map(|name| match data.get(name) {
                None => Some(format!("Missing field '{}' in data row", name)),
                Some(value) if value.trim().is_empty() => {
                    Some(format!("Field '{}' is empty", name))
                }
                Some(_) => None,
            })
            .collect()
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }
}
