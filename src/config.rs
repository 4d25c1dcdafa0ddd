//! Configuration types for the ID photo service

use crate::color::Color;
use crate::error::{IdPhotoError, Result};
use crate::sizes::{self, DEFAULT_DPI};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding [`ServiceConfig::storage_dir`]
pub const ENV_STORAGE_DIR: &str = "IDPHOTO_STORAGE_DIR";
/// Environment variable overriding [`SegmentationConfig::model_path`]
pub const ENV_MODEL_PATH: &str = "IDPHOTO_MODEL_PATH";
/// Environment variable overriding [`ServiceConfig::face_model_path`]
pub const ENV_FACE_MODEL: &str = "IDPHOTO_FACE_MODEL";

/// Default upload limit: 10 MiB
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

impl std::str::FromStr for ExecutionProvider {
    type Err = IdPhotoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            "coreml" => Ok(Self::CoreMl),
            other => Err(IdPhotoError::invalid_config(format!(
                "Unknown execution provider '{other}' (expected auto, cpu, cuda or coreml)"
            ))),
        }
    }
}

/// Inference engine used for background removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// ONNX Runtime (supports GPU acceleration)
    #[default]
    Onnx,
    /// Tract (pure Rust)
    Tract,
    /// Deterministic placeholder mask, no model required
    Mock,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
            Self::Mock => write!(f, "mock"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = IdPhotoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "onnx" => Ok(Self::Onnx),
            "tract" => Ok(Self::Tract),
            "mock" => Ok(Self::Mock),
            other => Err(IdPhotoError::invalid_config(format!(
                "Unknown backend '{other}' (expected onnx, tract or mock)"
            ))),
        }
    }
}

/// Segmentation model settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    pub backend: BackendKind,
    pub execution_provider: ExecutionProvider,
    /// ONNX model file; `None` uses the download cache
    pub model_path: Option<PathBuf>,
    /// Threads within operations (0 = auto-detect)
    pub intra_threads: usize,
    /// Threads between operations (0 = auto-detect)
    pub inter_threads: usize,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            execution_provider: ExecutionProvider::default(),
            model_path: None,
            intra_threads: 0,
            inter_threads: 0,
        }
    }
}

/// Service-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Root for `uploads/` and `results/`
    pub storage_dir: PathBuf,
    /// Public URL prefix mapped to `storage_dir`
    pub url_prefix: String,
    pub max_upload_bytes: u64,
    pub dpi: u32,
    /// Catalog size used when a request names none
    pub default_size: String,
    pub default_bg_color: Color,
    pub segmentation: SegmentationConfig,
    /// SeetaFace model; without one every photo takes the no-face path
    pub face_model_path: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("static"),
            url_prefix: "/static".to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            dpi: DEFAULT_DPI,
            default_size: sizes::default_size().name.to_string(),
            default_bg_color: Color::WHITE,
            segmentation: SegmentationConfig::default(),
            face_model_path: None,
        }
    }
}

impl ServiceConfig {
    #[must_use]
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }

    /// Load from a JSON file; missing fields take their defaults
    ///
    /// # Errors
    /// - File unreadable or not valid JSON
    /// - Validation failure
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| IdPhotoError::file_io_error("read config", path, &e))?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            IdPhotoError::invalid_config(format!("Invalid config '{}': {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `IDPHOTO_*` environment overrides
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var_os(key))
    }

    fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<std::ffi::OsString>,
    {
        if let Some(dir) = lookup(ENV_STORAGE_DIR) {
            self.storage_dir = PathBuf::from(dir);
        }
        if let Some(model) = lookup(ENV_MODEL_PATH) {
            self.segmentation.model_path = Some(PathBuf::from(model));
        }
        if let Some(face) = lookup(ENV_FACE_MODEL) {
            self.face_model_path = Some(PathBuf::from(face));
        }
        self
    }

    #[must_use]
    pub fn uploads_dir(&self) -> PathBuf {
        self.storage_dir.join("uploads")
    }

    #[must_use]
    pub fn results_dir(&self) -> PathBuf {
        self.storage_dir.join("results")
    }

    /// # Errors
    /// - Zero upload limit or DPI
    /// - Unknown default size
    pub fn validate(&self) -> Result<()> {
        if self.max_upload_bytes == 0 {
            return Err(IdPhotoError::config_value_error(
                "max upload bytes",
                self.max_upload_bytes,
                "1 or more",
                Some(DEFAULT_MAX_UPLOAD_BYTES),
            ));
        }
        if !(72..=2400).contains(&self.dpi) {
            return Err(IdPhotoError::config_value_error(
                "dpi",
                self.dpi,
                "72-2400",
                Some(DEFAULT_DPI),
            ));
        }
        if sizes::lookup(&self.default_size).is_none() {
            return Err(IdPhotoError::invalid_config(format!(
                "Unknown default size '{}'",
                self.default_size
            )));
        }
        if self.storage_dir.as_os_str().is_empty() {
            return Err(IdPhotoError::invalid_config("Storage directory is empty"));
        }
        Ok(())
    }
}

/// Builder for [`ServiceConfig`]
#[derive(Debug, Default)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    #[must_use]
    pub fn storage_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.storage_dir = dir.into();
        self
    }

    #[must_use]
    pub fn url_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.url_prefix = prefix.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn max_upload_bytes(mut self, bytes: u64) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    #[must_use]
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    #[must_use]
    pub fn default_size<S: Into<String>>(mut self, size: S) -> Self {
        self.config.default_size = size.into();
        self
    }

    #[must_use]
    pub fn default_bg_color(mut self, color: Color) -> Self {
        self.config.default_bg_color = color;
        self
    }

    #[must_use]
    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.config.segmentation.backend = backend;
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.segmentation.execution_provider = provider;
        self
    }

    #[must_use]
    pub fn model_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.segmentation.model_path = Some(path.into());
        self
    }

    /// Intra-op threads set to `threads`, inter-op to half of it (0 = auto)
    #[must_use]
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.segmentation.intra_threads = threads;
        self.config.segmentation.inter_threads = if threads > 0 { (threads / 2).max(1) } else { 0 };
        self
    }

    #[must_use]
    pub fn face_model_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.face_model_path = Some(path.into());
        self
    }

    /// # Errors
    /// - See [`ServiceConfig::validate`]
    pub fn build(self) -> Result<ServiceConfig> {
        let config = self.config;
        config.validate()?;
        Ok(config)
    }
}
