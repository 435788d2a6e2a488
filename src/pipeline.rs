//! Generation Pipeline - Single Entry Point
//!
//! Every render goes through the validator first. Content problems come
//! back as `PipelineError::Validation`; missing assets as render errors.

use chrono::{DateTime, Utc};
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::AssetConfig;
use crate::fonts::{DirFontResolver, FontResolver};
use crate::hashing::{job_hash, sha256_hex};
use crate::layout::{DataRow, Layout};
use crate::render::{RenderError, RenderedImage, Renderer};
use crate::shaping::Shaper;
use crate::templates::{self, DirTemplateStore, TemplateStore};
use crate::validation::Validator;
use crate::ENGINE_VERSION;

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static LAYOUT_VALIDATION_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_layout_validation_count() -> u32 {
    LAYOUT_VALIDATION_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_layout_validation_count() {
    LAYOUT_VALIDATION_COUNT.store(0, Ordering::SeqCst);
}

pub const RESULTS_FILE: &str = "results.json";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// True for problems the submitter can fix in their layout or data.
    pub fn is_content_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RowOutcome {
    Rendered {
        row: usize,
        file: String,
        sha256: String,
        job_hash: String,
    },
    Rejected {
        row: usize,
        errors: Vec<String>,
    },
}

impl RowOutcome {
    pub fn row(&self) -> usize {
        match self {
            Self::Rendered { row, .. } | Self::Rejected { row, .. } => *row,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkReport {
    pub batch_id: String,
    pub template_id: String,
    pub engine_version: String,
    pub created_at: DateTime<Utc>,
    pub rendered: usize,
    pub rejected: usize,
    pub rows: Vec<RowOutcome>,
    pub manifest_hash: String,
}

impl BulkReport {
    /// SHA-256 of the report serialized with a blank `manifest_hash`.
    /// Field order and row order are fixed, so the bytes are stable.
    fn digest(&self) -> Result<String, serde_json::Error> {
        let unsealed = BulkReport {
            manifest_hash: String::new(),
            ..self.clone()
        };
        Ok(sha256_hex(&serde_json::to_vec(&unsealed)?))
    }

    fn seal(mut self) -> Result<Self, serde_json::Error> {
        self.manifest_hash = self.digest()?;
        Ok(self)
    }

    /// True when `manifest_hash` still matches the rest of the report.
    pub fn verify(&self) -> bool {
        self.digest().map_or(false, |hash| hash == self.manifest_hash)
    }
}

/// The generation pipeline - validate, then render
pub struct Generator {
    store: Arc<dyn TemplateStore>,
    validator: Validator,
    renderer: Renderer,
}

impl Generator {
    pub fn new(
        store: Arc<dyn TemplateStore>,
        fonts: Arc<dyn FontResolver>,
        fallback_font: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            validator: Validator::new(Arc::clone(&fonts)),
            renderer: Renderer::new(fonts, fallback_font),
        }
    }

    pub fn from_config(config: &AssetConfig) -> Self {
        Self::new(
            Arc::new(DirTemplateStore::from_config(config)),
            Arc::new(DirFontResolver::from_config(config)),
            &config.fallback_font,
        )
    }

    pub fn with_shaper(mut self, shaper: impl Shaper + 'static) -> Self {
        self.renderer = self.renderer.with_shaper(shaper);
        self
    }

    fn template_folder(&self, template_id: &str) -> Result<PathBuf, PipelineError> {
        self.store
            .locate(template_id)
            .ok_or_else(|| RenderError::TemplateMissing(template_id.to_string()).into())
    }

    /// The raw layout document stored with a template.
    pub fn layout(&self, template_id: &str) -> Result<Value, PipelineError> {
        Ok(templates::load_layout(&self.template_folder(template_id)?))
    }

    /// Every content problem with `data` against the template's layout.
    pub fn validate(&self, template_id: &str, data: &DataRow) -> Result<Vec<String>, PipelineError> {
        let layout = self.layout(template_id)?;
        Ok(self.validate_layout_and_row(&layout, data))
    }

    fn validate_layout_and_row(&self, layout: &Value, data: &DataRow) -> Vec<String> {
        #[cfg(feature = "test-hooks")]
        LAYOUT_VALIDATION_COUNT.fetch_add(1, Ordering::SeqCst);

        self.validator.validate(layout, data)
    }

    /// Render one certificate.
    ///
    /// Validation always runs first; there is no way around it.
    pub fn generate_single(
        &self,
        template_id: &str,
        data: &DataRow,
    ) -> Result<RenderedImage, PipelineError> {
        let raw = self.layout(template_id)?;
        let errors = self.validate_layout_and_row(&raw, data);
        if !errors.is_empty() {
            debug!("template '{}': {} validation error(s)", template_id, errors.len());
            return Err(PipelineError::Validation(errors));
        }

        let layout = Layout::from_value(&raw).map_err(RenderError::from)?;
        Ok(self
            .renderer
            .render_template(self.store.as_ref(), template_id, &layout, data)?)
    }

    /// Render many rows against one template into `output_dir`.
    ///
    /// Layout checks run once for the batch; each row adds its own data
    /// checks, so every row sees the same errors a single render would.
    /// Infrastructure failures abort the batch.
    pub fn generate_bulk(
        &self,
        template_id: &str,
        rows: &[DataRow],
        output_dir: &Path,
    ) -> Result<BulkReport, PipelineError> {
        let raw = self.layout(template_id)?;
        let background = templates::load_background(self.store.as_ref(), template_id)?;

        #[cfg(feature = "test-hooks")]
        LAYOUT_VALIDATION_COUNT.fetch_add(1, Ordering::SeqCst);
        let layout_errors = self.validator.validate_layout(&raw);
        let layout = if layout_errors.is_empty() {
            Some(Layout::from_value(&raw).map_err(RenderError::from)?)
        } else {
            None
        };

        fs::create_dir_all(output_dir)?;
        info!(
            "rendering {} row(s) of '{}' into {}",
            rows.len(),
            template_id,
            output_dir.display()
        );

        let outcomes = rows
            .par_iter()
            .enumerate()
            .map(|(i, row)| {
                let number = i + 1;
                let mut errors = layout_errors.clone();
                errors.extend(self.validator.validate_data(&raw, row));
                match &layout {
                    Some(layout) if errors.is_empty() => {
                        self.write_row(template_id, layout, &background, row, number, output_dir)
                    }
                    _ => Ok(RowOutcome::Rejected { row: number, errors }),
                }
            })
            .collect::<Result<Vec<_>, PipelineError>>()?;

        let rendered = outcomes
            .iter()
            .filter(|o| matches!(o, RowOutcome::Rendered { .. }))
            .count();
        let report = BulkReport {
            batch_id: Uuid::new_v4().to_string(),
            template_id: template_id.to_string(),
            engine_version: ENGINE_VERSION.to_string(),
            created_at: Utc::now(),
            rendered,
            rejected: outcomes.len() - rendered,
            rows: outcomes,
            manifest_hash: String::new(),
        }
        .seal()?;

        fs::write(
            output_dir.join(RESULTS_FILE),
            serde_json::to_string_pretty(&report)?,
        )?;
        info!(
            "batch {}: {} rendered, {} rejected",
            report.batch_id, report.rendered, report.rejected
        );
        Ok(report)
    }

    fn write_row(
        &self,
        template_id: &str,
        layout: &Layout,
        background: &image::RgbaImage,
        row: &DataRow,
        number: usize,
        output_dir: &Path,
    ) -> Result<RowOutcome, PipelineError> {
        let rendered = self.renderer.render(background, layout, row)?;
        let png = rendered.to_png()?;
        let file = format!("certificate_{}.png", number);
        fs::write(output_dir.join(&file), &png)?;
        Ok(RowOutcome::Rendered {
            row: number,
            file,
            sha256: sha256_hex(&png),
            job_hash: job_hash(template_id, layout, row, ENGINE_VERSION)?,
        })
    }
}
