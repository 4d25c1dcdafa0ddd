//! ID photo request pipeline
//!
//! [`IdPhotoService`] runs one upload through every stage: validation,
//! storage of the original, background removal, compositing, optional border
//! and optional print sheet. The service is `Send + Sync` and shares a single
//! [`SharedSegmenter`] across requests; everything else is per request.

use crate::backends;
use crate::cache::ModelCache;
use crate::color::Color;
use crate::compositor::{CompositionStatus, Compositor};
use crate::config::ServiceConfig;
use crate::decorate::{self, DEFAULT_BORDER_WIDTH};
use crate::error::{IdPhotoError, Result};
use crate::face::FaceLocator;
use crate::segmentation::Cutout;
use crate::services::{ResultKind, ResultStore, UploadValidator};
use crate::session::SharedSegmenter;
use crate::sheet::{self, DEFAULT_COLS, DEFAULT_ROWS, DEFAULT_SPACING};
use crate::sizes::{self, PhotoSize, PixelDimensions, TargetSize};
use image::DynamicImage;
use instant::Instant;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, span, warn, Level};

/// Border stage options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BorderOptions {
    pub enabled: bool,
    pub width_px: u32,
    pub color: Color,
}

impl Default for BorderOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            width_px: DEFAULT_BORDER_WIDTH,
            color: Color::BLACK,
        }
    }
}

/// Print sheet options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetOptions {
    pub enabled: bool,
    pub rows: u32,
    pub cols: u32,
    pub spacing_px: u32,
    /// Paper color between tiles
    pub background: Color,
}

impl Default for SheetOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            rows: DEFAULT_ROWS,
            cols: DEFAULT_COLS,
            spacing_px: DEFAULT_SPACING,
            background: Color::WHITE,
        }
    }
}

/// One photo to process
#[derive(Debug, Clone, Default)]
pub struct PhotoRequest {
    pub bytes: Vec<u8>,
    /// Declared MIME type of `bytes`
    pub content_type: String,
    /// Client-side file name, only used to name outputs
    pub filename: String,
    /// `None` uses the configured default size
    pub target: Option<TargetSize>,
    /// `"r,g,b"` or hex; malformed values fall back to the configured default
    pub bg_color: Option<String>,
    pub border: BorderOptions,
    pub sheet: SheetOptions,
}

impl PhotoRequest {
    pub fn new<B, C, N>(bytes: B, content_type: C, filename: N) -> Self
    where
        B: Into<Vec<u8>>,
        C: Into<String>,
        N: Into<String>,
    {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
            filename: filename.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_size<S: Into<String>>(mut self, name: S) -> Self {
        self.target = Some(TargetSize::Named(name.into()));
        self
    }

    #[must_use]
    pub fn with_pixels(mut self, dimensions: PixelDimensions) -> Self {
        self.target = Some(TargetSize::Explicit(dimensions));
        self
    }

    #[must_use]
    pub fn with_bg_color<S: Into<String>>(mut self, color: S) -> Self {
        self.bg_color = Some(color.into());
        self
    }

    #[must_use]
    pub fn with_border(mut self, border: BorderOptions) -> Self {
        self.border = border;
        self
    }

    #[must_use]
    pub fn with_sheet(mut self, sheet: SheetOptions) -> Self {
        self.sheet = sheet;
        self
    }
}

/// URLs of everything produced for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoResponse {
    pub original_url: String,
    pub removed_bg_url: String,
    pub id_photo_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_photo_with_border_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_sheet_url: Option<String>,
    pub size: String,
    pub dimensions: PixelDimensions,
    pub composition_status: CompositionStatus,
    pub warnings: Vec<String>,
    pub message: String,
    pub elapsed_ms: u64,
}

/// The ID photo service
#[derive(Debug)]
pub struct IdPhotoService {
    config: ServiceConfig,
    segmenter: Arc<SharedSegmenter>,
    compositor: Compositor,
    validator: UploadValidator,
    store: ResultStore,
}

impl IdPhotoService {
    /// Service around an existing model handle and face locator
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn new(config: ServiceConfig, segmenter: Arc<SharedSegmenter>, locator: FaceLocator) -> Result<Self> {
        config.validate()?;
        info!(
            storage = %config.storage_dir.display(),
            detector = locator.detector_name(),
            "ID photo service configured"
        );
        Ok(Self {
            validator: UploadValidator::new(config.max_upload_bytes),
            store: ResultStore::from_config(&config),
            compositor: Compositor::new(locator),
            segmenter,
            config,
        })
    }

    /// Service with backend and face detector taken from `config`
    ///
    /// The segmentation model is not loaded until the first request (or
    /// [`SharedSegmenter::warm_up`]).
    ///
    /// # Errors
    /// - Invalid configuration
    /// - No model path configured and no cache directory available
    /// - Face model configured but unreadable
    pub fn from_config(config: ServiceConfig) -> Result<Self> {
        config.validate()?;
        let model_path = match &config.segmentation.model_path {
            Some(path) => path.clone(),
            None => ModelCache::new()?.default_model_path(),
        };
        let segmentation = config.segmentation.clone();
        let segmenter = Arc::new(SharedSegmenter::new(move || {
            backends::create_backend(&segmentation, &model_path)
        }));
        let locator = face_locator_from_config(&config)?;
        Self::new(config, segmenter, locator)
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    #[must_use]
    pub fn segmenter(&self) -> &Arc<SharedSegmenter> {
        &self.segmenter
    }

    #[must_use]
    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// The size catalog
    #[must_use]
    pub fn sizes(&self) -> &'static [PhotoSize] {
        sizes::catalog()
    }

    /// Process one upload end to end
    ///
    /// Recoverable compositing problems (no face, detector failure, blank
    /// fallback) are reported through `composition_status` and `warnings`.
    ///
    /// # Errors
    /// - Rejected upload or invalid options, see [`IdPhotoError::is_input_error`]
    /// - Background removal failed
    /// - Storage failures
    /// - Sheet layout that cannot be built
    #[instrument(skip_all, fields(filename = %request.filename, bytes = request.bytes.len()))]
    pub fn process(&self, request: PhotoRequest) -> Result<PhotoResponse> {
        let start = Instant::now();
        let mut warnings = Vec::new();

        let format = self.validator.check_content_type(&request.content_type)?;
        let original = self.validator.validate(&request.bytes, &request.content_type)?;
        if request.border.enabled {
            decorate::validate_border_width(request.border.width_px)
                .map_err(|e| IdPhotoError::invalid_input(e.to_string()))?;
        }

        let target = request
            .target
            .clone()
            .unwrap_or_else(|| TargetSize::Named(self.config.default_size.clone()));
        if let TargetSize::Named(name) = &target {
            if sizes::lookup(name).is_none() {
                warnings.push(format!(
                    "Unknown size '{name}', using {}",
                    sizes::default_size().name
                ));
            }
        }
        let dimensions = target.resolve(self.config.dpi);
        let bg = self.resolve_bg_color(request.bg_color.as_deref(), &mut warnings);

        self.store.ensure_dirs()?;
        let stem = ResultStore::unique_stem(&request.filename);
        let upload = self.store.store_upload(&stem, format, &request.bytes)?;

        let cutout = {
            let _span = span!(Level::INFO, "segmentation", width = original.width(), height = original.height()).entered();
            self.segmenter.segment(&original)?
        };
        let cutout_image = cutout.to_dynamic();
        let removed = self.store.save_result(ResultKind::Cutout, &stem, &cutout_image)?;

        let composition = {
            let _span = span!(Level::INFO, "compositing", target = %dimensions).entered();
            self.compositor.compose(&cutout_image, dimensions, bg)
        };
        if let Some(warning) = composition.status.warning() {
            warn!(status = composition.status.label(), "{warning}");
            warnings.push(warning);
        }
        let status = composition.status.clone();
        let id_photo = composition.into_dynamic();
        let id_saved = self.store.save_result(ResultKind::IdPhoto, &stem, &id_photo)?;

        let bordered = if request.border.enabled {
            let _span = span!(Level::DEBUG, "border", width_px = request.border.width_px).entered();
            let path = self
                .store
                .results_dir()
                .join(ResultStore::result_file_name(ResultKind::Bordered, &stem));
            match decorate::add_border_to_file(&id_saved.path, &path, request.border.width_px, request.border.color)? {
                decorate::BorderOutcome::Bordered { .. } => {},
                decorate::BorderOutcome::CopiedOriginal => {
                    warnings.push("Border could not be applied; the plain photo was used".to_string());
                },
            }
            Some(path)
        } else {
            None
        };
        let bordered_url = bordered.as_ref().and_then(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(|name| self.store.result_url(name))
        });

        let sheet_url = if request.sheet.enabled {
            let _span = span!(Level::DEBUG, "sheet", rows = request.sheet.rows, cols = request.sheet.cols).entered();
            let unit = match &bordered {
                Some(path) => image::open(path)?,
                None => id_photo,
            };
            let options = request.sheet;
            let tiled = sheet::tile(&unit, options.rows, options.cols, options.spacing_px, options.background)?;
            let saved = self.store.save_result(ResultKind::Sheet, &stem, &DynamicImage::ImageRgb8(tiled))?;
            Some(saved.url)
        } else {
            None
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        info!(status = status.label(), elapsed_ms, "Photo processed");
        Ok(PhotoResponse {
            original_url: upload.url,
            removed_bg_url: removed.url,
            id_photo_url: id_saved.url,
            id_photo_with_border_url: bordered_url,
            photo_sheet_url: sheet_url,
            size: target.label(),
            dimensions,
            message: if status.is_degraded() {
                "Photo processed with a blank fallback canvas".to_string()
            } else {
                "Photo processed successfully".to_string()
            },
            composition_status: status,
            warnings,
            elapsed_ms,
        })
    }

    /// [`IdPhotoService::process`] on the blocking thread pool
    ///
    /// # Errors
    /// Same as [`IdPhotoService::process`], plus a panicked worker
    pub async fn process_async(self: Arc<Self>, request: PhotoRequest) -> Result<PhotoResponse> {
        tokio::task::spawn_blocking(move || self.process(request))
            .await
            .map_err(|e| IdPhotoError::internal(format!("Processing task failed: {e}")))?
    }

    /// Remove the background and return the cutout as PNG bytes
    ///
    /// # Errors
    /// - Rejected upload
    /// - Background removal failed
    #[instrument(skip_all, fields(bytes = bytes.len()))]
    pub fn remove_background(&self, bytes: &[u8], content_type: &str) -> Result<Vec<u8>> {
        let image = self.validator.validate(bytes, content_type)?;
        let cutout: Cutout = self.segmenter.segment(&image)?;
        cutout.to_png_bytes()
    }

    /// URL of a stored result
    ///
    /// # Errors
    /// - Not a plain file name
    /// - No such result
    pub fn preview(&self, file_name: &str) -> Result<String> {
        self.store.preview(file_name)
    }

    fn resolve_bg_color(&self, requested: Option<&str>, warnings: &mut Vec<String>) -> Color {
        let default = self.config.default_bg_color;
        match requested {
            None => default,
            Some(value) => Color::parse(value).unwrap_or_else(|e| {
                warnings.push(format!("{e}; using background {default}"));
                default
            }),
        }
    }
}

/// Face locator for `config`, disabled when no face model is set
///
/// # Errors
/// - Face model configured but unreadable or not compiled in
pub fn face_locator_from_config(config: &ServiceConfig) -> Result<FaceLocator> {
    match &config.face_model_path {
        #[cfg(feature = "rustface")]
        Some(path) => Ok(FaceLocator::new(backends::RustfaceDetector::from_file(path)?)),
        #[cfg(not(feature = "rustface"))]
        Some(path) => Err(IdPhotoError::invalid_config(format!(
            "Face model '{}' configured but the 'rustface' feature is disabled",
            path.display()
        ))),
        None => {
            warn!("No face model configured; photos will be centred without face alignment");
            Ok(FaceLocator::disabled())
        },
    }
}
