//! CertiForge CLI
//!
//! Commands: templates, fonts, validate, render, bulk
//! Outputs JSON to stdout
//! Exit codes: 0 success, 1 infrastructure failure, 2 validation failure

use base64::Engine;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use certiforge_core::{
    data::{row_from_json, rows_from_file, rows_from_json},
    AssetConfig, DataRow, DirFontResolver, DirTemplateStore, Generator, PipelineError,
    ValidationReport,
};

#[derive(Parser)]
#[command(name = "certiforge-cli")]
#[command(about = "CertiForge CLI - certificate rendering engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Asset root holding fonts/, templates_store/ and uploads/
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// JSON config file; overrides --root
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List available templates
    Templates,

    /// List available fonts
    Fonts,

    /// Validate a data row against a template's layout
    Validate {
        /// Template ID
        #[arg(short, long)]
        template: String,

        /// JSON object, or @path to a file holding one
        #[arg(short, long)]
        data: String,
    },

    /// Render one certificate
    Render {
        /// Template ID
        #[arg(short, long)]
        template: String,

        /// JSON object, or @path to a file holding one
        #[arg(short, long)]
        data: String,

        /// PNG destination; without it the image is inlined as base64
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Render every row of a JSON array
    Bulk {
        /// Template ID
        #[arg(short, long)]
        template: String,

        /// JSON array of objects, or @path to a .json, .csv or .tsv file
        #[arg(long)]
        rows: String,

        /// Destination directory; defaults to the configured output dir
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

fn emit(value: &impl Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => println!(r#"{{"error": "Failed to encode output: {}"}}"#, e),
    }
}

fn fail(message: impl std::fmt::Display) -> ExitCode {
    emit(&json!({"success": false, "error": message.to_string()}));
    ExitCode::FAILURE
}

/// Inline JSON, or `@path` to read it from a file.
fn read_json_arg(arg: &str) -> Result<Value, String> {
    let text = match arg.strip_prefix('@') {
        Some(path) => fs::read_to_string(path).map_err(|e| format!("Cannot read {}: {}", path, e))?,
        None => arg.to_string(),
    };
    serde_json::from_str(&text).map_err(|e| format!("Invalid payload: {}", e))
}

fn read_row(arg: &str) -> Result<DataRow, String> {
    let value = read_json_arg(arg)?;
    row_from_json(&value).map_err(|e| e.to_string())
}

/// Inline JSON rows, or `@path` to a JSON, CSV or TSV file.
fn read_rows(arg: &str) -> Result<Vec<DataRow>, String> {
    match arg.strip_prefix('@') {
        Some(path) => rows_from_file(Path::new(path)).map_err(|e| e.to_string()),
        None => {
            let value = read_json_arg(arg)?;
            rows_from_json(&value).map_err(|e| e.to_string())
        }
    }
}

fn pipeline_failure(e: PipelineError) -> ExitCode {
    match e {
        PipelineError::Validation(errors) => {
            emit(&json!({"success": false, "valid": false, "errors": errors}));
            ExitCode::from(2)
        }
        other => {
            log::error!("{}", other);
            fail(other)
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match AssetConfig::load(path) {
            Ok(c) => c,
            Err(e) => return fail(e),
        },
        None => AssetConfig::from_root(&cli.root),
    };

    let generator = Generator::from_config(&config);

    match cli.command {
        Commands::Templates => match DirTemplateStore::from_config(&config).list() {
            Ok(templates) => {
                emit(&json!({ "templates": templates }));
                ExitCode::SUCCESS
            }
            Err(e) => fail(format!("Failed to list templates: {}", e)),
        },

        Commands::Fonts => match DirFontResolver::from_config(&config).list() {
            Ok(fonts) => {
                emit(&json!({ "fonts": fonts }));
                ExitCode::SUCCESS
            }
            Err(e) => fail(format!("Failed to list fonts: {}", e)),
        },

        Commands::Validate { template, data } => {
            let row = match read_row(&data) {
                Ok(r) => r,
                Err(e) => return fail(e),
            };
            match generator.validate(&template, &row) {
                Ok(errors) => {
                    let report = ValidationReport::from_errors(errors);
                    emit(&report);
                    if report.valid {
                        ExitCode::SUCCESS
                    } else {
                        ExitCode::from(2) // Validation failure
                    }
                }
                Err(e) => pipeline_failure(e),
            }
        }

        Commands::Render { template, data, output } => {
            let row = match read_row(&data) {
                Ok(r) => r,
                Err(e) => return fail(e),
            };
            let rendered = match generator.generate_single(&template, &row) {
                Ok(r) => r,
                Err(e) => return pipeline_failure(e),
            };
            let png = match rendered.to_png() {
                Ok(bytes) => bytes,
                Err(e) => return fail(e),
            };

            let mut output_json = json!({
                "success": true,
                "width": rendered.image.width(),
                "height": rendered.image.height(),
                "placements": rendered.placements,
            });
            match output {
                Some(path) => {
                    if let Err(e) = fs::write(&path, &png) {
                        return fail(format!("Failed to write {}: {}", path.display(), e));
                    }
                    output_json["file"] = json!(path);
                }
                None => {
                    output_json["data_base64"] =
                        json!(base64::engine::general_purpose::STANDARD.encode(&png));
                }
            }
            emit(&output_json);
            ExitCode::SUCCESS
        }

        Commands::Bulk { template, rows, output_dir } => {
            let rows = match read_rows(&rows) {
                Ok(r) => r,
                Err(e) => return fail(e),
            };
            let output_dir = output_dir.unwrap_or_else(|| config.output_dir.clone());
            match generator.generate_bulk(&template, &rows, &output_dir) {
                Ok(report) => {
                    emit(&json!({"success": true, "report": report}));
                    ExitCode::SUCCESS
                }
                Err(e) => pipeline_failure(e),
            }
        }
    }
}
