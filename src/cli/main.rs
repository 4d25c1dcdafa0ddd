//! ID photo CLI tool
//!
//! Command-line front end for the ID photo service: builds photos from local
//! files, lists sizes, and manages the segmentation model cache.

use super::config::CliConfigBuilder;
use crate::{
    backends,
    cache::{format_size, ModelCache, DEFAULT_MODEL_URL},
    color::Color,
    config::BackendKind,
    decorate::{self, BorderOutcome, DEFAULT_BORDER_WIDTH},
    download::{verify_file_integrity, ModelDownloader},
    pipeline::IdPhotoService,
    sheet::{DEFAULT_COLS, DEFAULT_ROWS, DEFAULT_SPACING},
    sizes::{self, PhotoSize, DEFAULT_DPI},
    tracing_config::{init_cli_tracing, spans},
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// File extensions accepted as photo inputs
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// ID and passport photo maker
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "idphoto")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create ID photos from image files or directories
    Create(CreateArgs),
    /// List the supported photo sizes
    Sizes {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
        /// Resolution used for the pixel columns
        #[arg(long, default_value_t = DEFAULT_DPI)]
        dpi: u32,
    },
    /// Download a segmentation model into the cache
    Download {
        /// Model URL [default: RMBG-1.4 ONNX export]
        url: Option<String>,
        /// Expected SHA-256 of the downloaded file
        #[arg(long)]
        sha256: Option<String>,
    },
    /// Show the model cache, optionally clearing it
    Cache {
        /// Delete every cached model
        #[arg(long)]
        clear: bool,
    },
    /// Show backends and execution providers
    Providers,
    /// Add a border to an existing photo
    Border {
        input: PathBuf,
        output: PathBuf,
        #[arg(long, default_value_t = DEFAULT_BORDER_WIDTH)]
        width: u32,
        /// Border color as "r,g,b" or "#rrggbb"
        #[arg(long, default_value = "0,0,0")]
        color: String,
    },
}

#[derive(Args, Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct CreateArgs {
    /// Input photos (JPEG or PNG) or directories
    #[arg(value_name = "INPUT", required = true)]
    pub input: Vec<PathBuf>,

    /// Storage directory for uploads/ and results/ [default: from config]
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Catalog size name (see `idphoto sizes`)
    #[arg(short, long, conflicts_with_all = ["width_px", "height_px"])]
    pub size: Option<String>,

    /// Explicit canvas width in pixels
    #[arg(long, requires = "height_px")]
    pub width_px: Option<u32>,

    /// Explicit canvas height in pixels
    #[arg(long, requires = "width_px")]
    pub height_px: Option<u32>,

    /// Background color as "r,g,b" or "#rrggbb"
    #[arg(short, long)]
    pub bg_color: Option<String>,

    /// Also produce a bordered photo
    #[arg(long)]
    pub border: bool,

    #[arg(long, default_value_t = DEFAULT_BORDER_WIDTH)]
    pub border_width: u32,

    #[arg(long, default_value = "0,0,0")]
    pub border_color: String,

    /// Also produce a print sheet
    #[arg(long)]
    pub sheet: bool,

    #[arg(long, default_value_t = DEFAULT_ROWS)]
    pub rows: u32,

    #[arg(long, default_value_t = DEFAULT_COLS)]
    pub cols: u32,

    /// Spacing between sheet tiles in pixels
    #[arg(long, default_value_t = DEFAULT_SPACING)]
    pub spacing: u32,

    /// Segmentation backend: onnx, tract or mock
    #[arg(long)]
    pub backend: Option<BackendKind>,

    /// Execution provider: auto, cpu, cuda or coreml
    #[arg(short, long)]
    pub execution_provider: Option<crate::config::ExecutionProvider>,

    /// Segmentation model file [default: cached RMBG-1.4, downloaded if missing]
    #[arg(short, long, value_name = "PATH")]
    pub model: Option<PathBuf>,

    /// SeetaFace detection model; without it photos are centred
    #[arg(long, value_name = "PATH")]
    pub face_model: Option<PathBuf>,

    /// JSON service configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Number of inference threads (0 = auto-detect)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Process directories recursively
    #[arg(short, long)]
    pub recursive: bool,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_cli_tracing(cli.verbose).context("Failed to initialize tracing")?;

    match cli.command {
        Command::Create(args) => run_create(&args).await,
        Command::Sizes { json, dpi } => show_sizes(json, dpi),
        Command::Download { url, sha256 } => download_model(url.as_deref(), sha256.as_deref()).await,
        Command::Cache { clear } => show_cache(clear),
        Command::Providers => {
            show_provider_diagnostics();
            Ok(())
        },
        Command::Border {
            input,
            output,
            width,
            color,
        } => add_border(&input, &output, width, &color),
    }
}

async fn run_create(args: &CreateArgs) -> Result<()> {
    let mut config = CliConfigBuilder::service_config(args).context("Invalid configuration")?;

    if config.segmentation.backend != BackendKind::Mock && config.segmentation.model_path.is_none() {
        let downloader = ModelDownloader::new().context("Failed to open model cache")?;
        let model = downloader
            .download_default(true)
            .instrument(spans::download(DEFAULT_MODEL_URL))
            .await
            .context("Failed to obtain the default segmentation model")?;
        config.segmentation.model_path = Some(model.path);
    }

    let files = collect_input_files(&args.input, args.recursive)?;
    if files.is_empty() {
        warn!("No JPEG or PNG files found in the provided inputs");
        return Ok(());
    }

    let session = spans::session(
        &uuid::Uuid::new_v4().to_string(),
        &config.segmentation.backend.to_string(),
        &config.segmentation.execution_provider.to_string(),
    );
    let service = Arc::new(IdPhotoService::from_config(config).context("Failed to create service")?);
    process_files(args, &service, &files).instrument(session).await
}

async fn process_files(args: &CreateArgs, service: &Arc<IdPhotoService>, files: &[PathBuf]) -> Result<()> {
    let batch_start = Instant::now();
    let progress = (files.len() > 1).then(|| {
        let pb = ProgressBar::new(files.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    });

    let mut processed = 0usize;
    let mut failed = 0usize;
    let batch_span = spans::batch_processing(files.len());
    for file in files {
        if let Some(pb) = &progress {
            pb.set_message(file.display().to_string());
        }

        let outcome = async {
            let bytes = tokio::fs::read(file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let request = CliConfigBuilder::photo_request(args, file, bytes)?;
            let response = Arc::clone(service)
                .process_async(request)
                .await
                .with_context(|| format!("Failed to process {}", file.display()))?;
            Ok::<_, anyhow::Error>(response)
        }
        .instrument(spans::file_processing(file))
        .instrument(batch_span.clone())
        .await;

        match outcome {
            Ok(response) => {
                processed += 1;
                for warning in &response.warnings {
                    warn!("{}: {warning}", file.display());
                }
                println!("{}", serde_json::to_string_pretty(&response)?);
            },
            Err(e) => {
                failed += 1;
                error!("{e:#}");
            },
        }
        if let Some(pb) = &progress {
            pb.inc(1);
        }
    }

    if let Some(pb) = &progress {
        pb.finish_with_message("done");
    }
    info!(
        "Processed {processed} photo(s), {failed} failed in {:.2}s",
        batch_start.elapsed().as_secs_f64()
    );
    if processed == 0 && failed > 0 {
        anyhow::bail!("All {failed} input(s) failed");
    }
    Ok(())
}

fn show_sizes(json: bool, dpi: u32) -> Result<()> {
    if json {
        let entries: Vec<_> = sizes::catalog()
            .iter()
            .map(|size| {
                let pixels = size.pixel_dimensions_at(dpi);
                serde_json::json!({
                    "name": size.name,
                    "width_mm": size.width_mm,
                    "height_mm": size.height_mm,
                    "width_px": pixels.width_px,
                    "height_px": pixels.height_px,
                    "description": size.description,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "sizes": entries }))?);
        return Ok(());
    }

    println!("{:<8} {:>12} {:>12}  Description", "Name", "mm", format!("px @{dpi}"));
    for size in sizes::catalog() {
        println!("{}", size_row(size, dpi));
    }
    Ok(())
}

fn size_row(size: &PhotoSize, dpi: u32) -> String {
    format!(
        "{:<8} {:>12} {:>12}  {}",
        size.name,
        format!("{}x{}", size.width_mm, size.height_mm),
        size.pixel_dimensions_at(dpi).to_string(),
        size.description.unwrap_or("")
    )
}

async fn download_model(url: Option<&str>, sha256: Option<&str>) -> Result<()> {
    let url = url.unwrap_or(DEFAULT_MODEL_URL);
    let downloader = ModelDownloader::new().context("Failed to open model cache")?;
    let model = downloader
        .download_model(url, true)
        .instrument(spans::download(url))
        .await
        .with_context(|| format!("Failed to download {url}"))?;

    if sha256.is_some() && !verify_file_integrity(&model.path, sha256)? {
        anyhow::bail!("Checksum mismatch for {}", model.path.display());
    }
    println!("{}", model.path.display());
    if let Some(digest) = &model.sha256 {
        info!("sha256 {digest} ({})", format_size(model.size_bytes));
    }
    Ok(())
}

fn show_cache(clear: bool) -> Result<()> {
    let cache = ModelCache::new().context("Failed to open model cache")?;
    println!("Cache directory: {}", cache.cache_dir().display());
    if clear {
        let removed = cache.clear_all_models()?;
        println!("Removed {} model(s)", removed.len());
        return Ok(());
    }
    let models = cache.scan_cached_models()?;
    if models.is_empty() {
        println!("No cached models. Run `idphoto download` to fetch the default model.");
    }
    for model in models {
        println!("  {:<40} {:>10}", model.file_name, format_size(model.size_bytes));
    }
    Ok(())
}

fn show_provider_diagnostics() {
    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(1);
    println!("System: {cpu_count} CPU cores detected");

    println!("\nSegmentation backends:");
    for backend in backends::available_backends() {
        let note = match backend {
            BackendKind::Onnx => "ONNX Runtime with hardware acceleration (default)",
            BackendKind::Tract => "Pure Rust, CPU only",
            BackendKind::Mock => "Placeholder mask, no model needed",
        };
        println!("  {backend:<6} {note}");
    }

    #[cfg(feature = "onnx")]
    {
        println!("\nONNX Runtime execution providers:");
        for (name, available, description) in backends::OnnxBackend::list_providers() {
            let status = if available { "available" } else { "not available" };
            println!("  {name:<7} {status:<14} {description}");
        }
    }

    println!("\nFace detection:");
    if cfg!(feature = "rustface") {
        println!("  rustface (SeetaFace), enable with --face-model <PATH>");
    } else {
        println!("  not compiled in, photos are centred");
    }
}

fn add_border(input: &Path, output: &Path, width: u32, color: &str) -> Result<()> {
    let color = Color::parse_or(color, Color::BLACK);
    match decorate::add_border_to_file(input, output, width, color)? {
        BorderOutcome::Bordered { width, height } => {
            println!("{} ({width}x{height})", output.display());
        },
        BorderOutcome::CopiedOriginal => {
            warn!("Could not decode {}, copied it unchanged", input.display());
            println!("{}", output.display());
        },
    }
    Ok(())
}

/// Expand files and directories into a sorted list of photos
fn collect_input_files(inputs: &[PathBuf], recursive: bool) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in inputs {
        if path.is_file() {
            if is_image_file(path) {
                files.push(path.clone());
            } else {
                warn!("Skipping unsupported file: {}", path.display());
            }
        } else if path.is_dir() {
            let depth = if recursive { usize::MAX } else { 1 };
            for entry in walkdir::WalkDir::new(path).max_depth(depth) {
                let entry = entry?;
                if entry.file_type().is_file() && is_image_file(entry.path()) {
                    files.push(entry.path().to_path_buf());
                }
            }
        } else {
            anyhow::bail!(
                "Input path does not exist or is not accessible: {}",
                path.display()
            );
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}
