//! Segmentation model cache management
//!
//! Downloaded models live as single ONNX files in a per-user cache directory:
//! - Linux/macOS: `~/.cache/idphoto-studio/models/`
//! - Windows: `%LOCALAPPDATA%/idphoto-studio/models/`
//!
//! `IDPHOTO_CACHE_DIR` overrides the location.

use crate::error::{IdPhotoError, Result};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the cache root
pub const ENV_CACHE_DIR: &str = "IDPHOTO_CACHE_DIR";

/// RMBG-1.4 ONNX export used when no model is configured
pub const DEFAULT_MODEL_URL: &str = "https://huggingface.co/briaai/RMBG-1.4/resolve/main/onnx/model.onnx";

/// A model file found in the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedModelInfo {
    pub file_name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Model cache manager
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Cache in the default location, created if missing
    ///
    /// # Errors
    /// - No user cache directory and no override
    /// - Directory creation failed
    pub fn new() -> Result<Self> {
        let cache_dir = Self::resolve_cache_dir(|key| std::env::var_os(key))?;
        Self::with_custom_cache_dir(&cache_dir)
    }

    /// Cache rooted at `cache_dir`, created if missing
    ///
    /// # Errors
    /// - Directory creation failed
    pub fn with_custom_cache_dir(cache_dir: &Path) -> Result<Self> {
        if !cache_dir.exists() {
            fs::create_dir_all(cache_dir).map_err(|e| {
                IdPhotoError::file_io_error("create cache directory", cache_dir, &e)
            })?;
        }
        Ok(Self {
            cache_dir: cache_dir.to_path_buf(),
        })
    }

    fn resolve_cache_dir<F>(lookup: F) -> Result<PathBuf>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|dir| !dir.is_empty()) {
            return Ok(PathBuf::from(dir).join("models"));
        }
        Ok(dirs::cache_dir()
            .ok_or_else(|| {
                IdPhotoError::invalid_config(format!(
                    "Failed to determine cache directory. Set {ENV_CACHE_DIR} environment variable."
                ))
            })?
            .join("idphoto-studio")
            .join("models"))
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Cache-safe file name for a model URL
    ///
    /// `https://huggingface.co/briaai/RMBG-1.4/resolve/main/onnx/model.onnx`
    /// becomes `briaai--RMBG-1.4--model.onnx`.
    #[must_use]
    pub fn url_to_file_name(url: &str) -> String {
        let trimmed = url
            .trim_end_matches('/')
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        let mut segments = trimmed.split('/').skip(1).filter(|s| !s.is_empty());
        let owner = segments.next();
        let repo = segments.next();
        let file = trimmed.rsplit('/').next().filter(|f| f.ends_with(".onnx"));

        let name = match (owner, repo, file) {
            (Some(owner), Some(repo), Some(file)) => format!("{owner}--{repo}--{file}"),
            (Some(owner), Some(repo), None) => format!("{owner}--{repo}.onnx"),
            _ => format!("{}.onnx", trimmed.replace('/', "--")),
        };
        name.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    #[must_use]
    pub fn model_path(&self, url: &str) -> PathBuf {
        self.cache_dir.join(Self::url_to_file_name(url))
    }

    /// Where the default model is (or would be) cached
    #[must_use]
    pub fn default_model_path(&self) -> PathBuf {
        self.model_path(DEFAULT_MODEL_URL)
    }

    #[must_use]
    pub fn is_model_cached(&self, url: &str) -> bool {
        self.model_path(url).is_file()
    }

    /// Every `.onnx` file in the cache, sorted by name
    ///
    /// # Errors
    /// - Cache directory unreadable
    pub fn scan_cached_models(&self) -> Result<Vec<CachedModelInfo>> {
        if !self.cache_dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.cache_dir)
            .map_err(|e| IdPhotoError::file_io_error("read cache directory", &self.cache_dir, &e))?;

        let mut models = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("onnx") || !path.is_file() {
                continue;
            }
            let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            models.push(CachedModelInfo {
                file_name: entry.file_name().to_string_lossy().into_owned(),
                path,
                size_bytes,
            });
        }
        models.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(models)
    }

    /// Delete every cached model, returning the removed file names
    ///
    /// # Errors
    /// - A file could not be removed
    pub fn clear_all_models(&self) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for model in self.scan_cached_models()? {
            fs::remove_file(&model.path)
                .map_err(|e| IdPhotoError::file_io_error("remove cached model", &model.path, &e))?;
            log::info!("Removed cached model {}", model.file_name);
            removed.push(model.file_name);
        }
        Ok(removed)
    }
}

/// Format file size in human-readable format
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS.get(unit_index).unwrap_or(&"B"))
    } else {
        format!("{:.1} {}", size, UNITS.get(unit_index).unwrap_or(&"B"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_url_to_file_name() {
        assert_eq!(
            ModelCache::url_to_file_name(DEFAULT_MODEL_URL),
            "briaai--RMBG-1.4--model.onnx"
        );
        assert_eq!(
            ModelCache::url_to_file_name("https://huggingface.co/owner/repo/"),
            "owner--repo.onnx"
        );
        assert!(!ModelCache::url_to_file_name("https://x.org/a b/c?d/m.onnx").contains(' '));
    }

    #[test]
    fn test_cache_dir_override() {
        let dir = ModelCache::resolve_cache_dir(|key| {
            (key == ENV_CACHE_DIR).then(|| OsString::from("/tmp/idphoto-cache"))
        })
        .unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/idphoto-cache/models"));

        let empty = ModelCache::resolve_cache_dir(|_| Some(OsString::new()));
        if let Ok(dir) = empty {
            assert!(dir.ends_with("idphoto-studio/models"));
        }
    }

    #[test]
    fn test_scan_and_clear() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(&temp.path().join("models")).unwrap();
        assert!(cache.scan_cached_models().unwrap().is_empty());
        assert!(!cache.is_model_cached(DEFAULT_MODEL_URL));

        fs::write(cache.default_model_path(), [0u8; 2048]).unwrap();
        fs::write(cache.cache_dir().join("notes.txt"), "ignored").unwrap();
        fs::write(cache.cache_dir().join("a.onnx"), [0u8; 10]).unwrap();

        let models = cache.scan_cached_models().unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].file_name, "a.onnx");
        assert_eq!(models[1].size_bytes, 2048);
        assert!(cache.is_model_cached(DEFAULT_MODEL_URL));

        let removed = cache.clear_all_models().unwrap();
        assert_eq!(removed.len(), 2);
        assert!(cache.scan_cached_models().unwrap().is_empty());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(176 * 1024 * 1024), "176.0 MB");
    }
}
