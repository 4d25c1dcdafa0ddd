//! Conversion of CLI arguments into service configuration and requests

use crate::cli::main_impl::CreateArgs;
use crate::{
    color::Color,
    config::ServiceConfig,
    pipeline::{BorderOptions, PhotoRequest, SheetOptions},
    sizes::PixelDimensions,
};
use anyhow::{Context, Result};
use std::path::Path;

/// Builds library types from parsed CLI arguments
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Config file (or defaults), then environment, then flags
    pub(crate) fn service_config(args: &CreateArgs) -> Result<ServiceConfig> {
        let base = match &args.config {
            Some(path) => ServiceConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config file {}", path.display()))?,
            None => ServiceConfig::default(),
        };
        let mut config = base.with_env_overrides();

        if let Some(dir) = &args.output {
            config.storage_dir.clone_from(dir);
        }
        if let Some(backend) = args.backend {
            config.segmentation.backend = backend;
        }
        if let Some(provider) = args.execution_provider {
            config.segmentation.execution_provider = provider;
        }
        if let Some(model) = &args.model {
            config.segmentation.model_path = Some(model.clone());
        }
        if let Some(threads) = args.threads {
            config.segmentation.intra_threads = threads;
            config.segmentation.inter_threads = if threads == 0 { 0 } else { (threads / 2).max(1) };
        }
        if let Some(face_model) = &args.face_model {
            config.face_model_path = Some(face_model.clone());
        }

        config.validate()?;
        Ok(config)
    }

    /// Request for one input file
    pub(crate) fn photo_request(args: &CreateArgs, path: &Path, bytes: Vec<u8>) -> Result<PhotoRequest> {
        let content_type = content_type_for(path)
            .with_context(|| format!("Unsupported file type: {}", path.display()))?;
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("photo")
            .to_string();

        let mut request = PhotoRequest::new(bytes, content_type, filename)
            .with_border(BorderOptions {
                enabled: args.border,
                width_px: args.border_width,
                color: Color::parse_or(&args.border_color, Color::BLACK),
            })
            .with_sheet(SheetOptions {
                enabled: args.sheet,
                rows: args.rows,
                cols: args.cols,
                spacing_px: args.spacing,
                ..SheetOptions::default()
            });

        request = match (args.width_px, args.height_px, &args.size) {
            (Some(width), Some(height), _) => request.with_pixels(PixelDimensions::new(width, height)?),
            (_, _, Some(size)) => request.with_size(size.clone()),
            _ => request,
        };
        if let Some(bg) = &args.bg_color {
            request = request.with_bg_color(bg.clone());
        }
        Ok(request)
    }
}

fn content_type_for(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        _ => None,
    }
}
