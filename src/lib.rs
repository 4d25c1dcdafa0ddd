#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # ID Photo Studio
//!
//! Builds ID and passport photos from ordinary portraits: the background is
//! removed with a segmentation model, the subject is framed around the
//! detected face on a solid-color canvas of a standard size, and an optional
//! border and printable sheet are produced.
//!
//! ## Features
//!
//! - **Size Catalog**: standard ID photo sizes in millimetres, converted at 300 DPI
//! - **Segmentation Backends**: ONNX Runtime (GPU acceleration) and Tract (Pure Rust)
//! - **Face-Anchored Framing**: the largest detected face fills 45% of the
//!   canvas height with a 25% top margin
//! - **Graceful Degradation**: no face falls back to a centred crop; a
//!   failing compositor produces a blank canvas with an explicit status
//! - **Borders and Sheets**: solid borders and tiled print sheets
//! - **Model Management**: downloading and caching of the segmentation model
//! - **CLI Integration**: optional command-line interface (enable with `cli` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use idphoto_studio::{IdPhotoService, PhotoRequest, ServiceConfig};
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = ServiceConfig::builder()
//!     .storage_dir("./photos")
//!     .model_path("models/rmbg-1.4.onnx")
//!     .build()?;
//! let service = IdPhotoService::from_config(config)?;
//!
//! let bytes = std::fs::read("portrait.jpg")?;
//! let request = PhotoRequest::new(bytes, "image/jpeg", "portrait.jpg")
//!     .with_size("3.5x4.5")
//!     .with_bg_color("255,255,255");
//! let response = service.process(request)?;
//! println!("{} ({})", response.id_photo_url, response.composition_status.label());
//! # Ok(())
//! # }
//! ```
//!
//! ## Compositing Only
//!
//! The compositor works on any cutout and never fails; check the status to
//! see which path produced the canvas.
//!
//! ```rust,no_run
//! use idphoto_studio::{Color, Compositor, FaceLocator, PixelDimensions};
//!
//! # fn example(cutout: image::DynamicImage) -> idphoto_studio::Result<()> {
//! let compositor = Compositor::new(FaceLocator::disabled());
//! let composition = compositor.compose(&cutout, PixelDimensions::new(354, 472)?, Color::WHITE);
//! if composition.is_degraded() {
//!     eprintln!("{:?}", composition.status.warning());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime segmentation backend
//! - `tract` (default): Pure Rust segmentation backend
//! - `rustface` (default): SeetaFace frontal face detector
//! - `cli` (default): command-line interface and progress reporting
//! - `tracing-json`, `tracing-files`: extra log outputs for the CLI

pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod color;
pub mod compositor;
pub mod config;
pub mod decorate;
pub mod download;
pub mod error;
pub mod face;
pub mod pipeline;
pub mod segmentation;
pub mod services;
pub mod session;
pub mod sheet;
pub mod sizes;
#[cfg(feature = "cli")]
pub mod tracing_config;

// Public API exports
pub use backends::{available_backends, create_backend, MockBackend};
pub use cache::{format_size, CachedModelInfo, ModelCache};
pub use color::Color;
pub use compositor::{Composition, CompositionStatus, Compositor, NoFaceReason};
pub use config::{BackendKind, ExecutionProvider, SegmentationConfig, ServiceConfig};
pub use decorate::{add_border, add_border_to_file, BorderOutcome};
pub use download::{validate_model_url, ModelDownloader};
pub use error::{IdPhotoError, Result};
pub use face::{FaceBox, FaceDetector, FaceLocator};
pub use pipeline::{BorderOptions, IdPhotoService, PhotoRequest, PhotoResponse, SheetOptions};
pub use segmentation::{Cutout, SegmentationBackend, Segmenter};
pub use services::{ResultKind, ResultStore, UploadValidator};
pub use session::SharedSegmenter;
pub use sheet::{tile, SheetLayout};
pub use sizes::{find_size, mm_to_pixels, PhotoSize, PixelDimensions, TargetSize};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, TracingConfig, TracingFormat, TracingOutput};
