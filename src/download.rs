//! Segmentation model downloading
//!
//! Streams a single ONNX file into the model cache with progress reporting.
//! Data is written to a `.part` file and renamed into place only after the
//! stream completes, so an interrupted download never looks like a cached
//! model. The SHA-256 digest is computed while streaming.

use crate::cache::{ModelCache, DEFAULT_MODEL_URL};
use crate::error::{IdPhotoError, Result};
use futures_util::stream::TryStreamExt;
#[cfg(feature = "cli")]
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

/// Model downloader with progress reporting
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
}

/// A model file that is present in the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedModel {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Hex SHA-256; `None` when the file was already cached
    pub sha256: Option<String>,
    pub from_cache: bool,
}

/// Progress bar abstraction that works with and without CLI features
#[derive(Debug)]
pub enum ProgressIndicator {
    #[cfg(feature = "cli")]
    Indicatif(ProgressBar),
    NoOp,
}

impl ProgressIndicator {
    pub fn set_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_message(msg),
            Self::NoOp => {},
        }
    }

    pub fn set_length(&self, len: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_length(len),
            Self::NoOp => {},
        }
    }

    pub fn set_position(&self, pos: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_position(pos),
            Self::NoOp => {},
        }
    }

    pub fn finish_with_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.finish_with_message(msg),
            Self::NoOp => {
                let _ = msg;
            },
        }
    }
}

impl ModelDownloader {
    /// Downloader writing into the default cache
    ///
    /// # Errors
    /// - Failed to create HTTP client
    /// - Failed to initialize model cache
    pub fn new() -> Result<Self> {
        Self::with_cache(ModelCache::new()?)
    }

    /// Downloader writing into `cache`
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn with_cache(cache: ModelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| IdPhotoError::download_error("Failed to create HTTP client", e))?;
        Ok(Self { client, cache })
    }

    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Download the default RMBG-1.4 model
    ///
    /// # Errors
    /// See [`ModelDownloader::download_model`]
    pub async fn download_default(&self, show_progress: bool) -> Result<DownloadedModel> {
        self.download_model(DEFAULT_MODEL_URL, show_progress).await
    }

    /// Download `url` into the cache unless it is already there
    ///
    /// # Errors
    /// - Invalid URL
    /// - Network errors or a non-success HTTP status
    /// - File system errors while writing or renaming
    pub async fn download_model(&self, url: &str, show_progress: bool) -> Result<DownloadedModel> {
        validate_model_url(url)?;
        let destination = self.cache.model_path(url);

        if destination.is_file() {
            let size_bytes = fs::metadata(&destination).map(|m| m.len()).unwrap_or(0);
            log::info!("Model already cached at {}", destination.display());
            return Ok(DownloadedModel {
                path: destination,
                size_bytes,
                sha256: None,
                from_cache: true,
            });
        }

        let progress = show_progress.then(Self::create_progress_indicator);
        if let Some(pb) = &progress {
            pb.set_message(format!("Downloading {}", ModelCache::url_to_file_name(url)));
        }

        match self.download_file(url, &destination, progress.as_ref()).await {
            Ok((size_bytes, sha256)) => {
                if let Some(pb) = &progress {
                    pb.finish_with_message("Download complete".to_string());
                }
                log::info!(
                    "Downloaded {} ({} bytes, sha256 {sha256})",
                    destination.display(),
                    size_bytes
                );
                Ok(DownloadedModel {
                    path: destination,
                    size_bytes,
                    sha256: Some(sha256),
                    from_cache: false,
                })
            },
            Err(e) => {
                if let Some(pb) = &progress {
                    pb.finish_with_message("Download failed".to_string());
                }
                Err(e)
            },
        }
    }

    fn create_progress_indicator() -> ProgressIndicator {
        #[cfg(feature = "cli")]
        {
            let pb = ProgressBar::new(100);
            if let Ok(style) = ProgressStyle::default_bar().template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
            ) {
                pb.set_style(style.progress_chars("#>-"));
            }
            ProgressIndicator::Indicatif(pb)
        }
        #[cfg(not(feature = "cli"))]
        {
            ProgressIndicator::NoOp
        }
    }

    /// Stream `url` to `destination`, returning size and SHA-256
    async fn download_file(
        &self,
        url: &str,
        destination: &Path,
        progress: Option<&ProgressIndicator>,
    ) -> Result<(u64, String)> {
        log::debug!("Downloading: {} -> {}", url, destination.display());

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| IdPhotoError::file_io_error("create directory", parent, &e))?;
        }
        let partial = partial_path(destination);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| IdPhotoError::download_error(format!("Failed to download {url}"), e))?;
        if !response.status().is_success() {
            return Err(IdPhotoError::download_error(
                format!("Failed to download {url}"),
                format!("HTTP status {}", response.status()),
            ));
        }
        let total_size = response.content_length();
        if let (Some(pb), Some(total)) = (progress, total_size) {
            pb.set_length(total);
        }

        let mut file = tokio::fs::File::create(&partial)
            .await
            .map_err(|e| IdPhotoError::file_io_error("create file", &partial, &e))?;
        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut hasher = Sha256::new();
        let mut downloaded = 0u64;
        let mut buffer = vec![0; 64 * 1024];
        let streamed: Result<()> = async {
            loop {
                let bytes_read = stream
                    .read(&mut buffer)
                    .await
                    .map_err(|e| IdPhotoError::download_error("Failed to read download stream", e))?;
                if bytes_read == 0 {
                    break;
                }
                let chunk = buffer.get(..bytes_read).unwrap_or(&[]);
                hasher.update(chunk);
                file.write_all(chunk)
                    .await
                    .map_err(|e| IdPhotoError::file_io_error("write to file", &partial, &e))?;
                downloaded += bytes_read as u64;
                if let Some(pb) = progress {
                    pb.set_position(downloaded);
                }
            }
            file.flush()
                .await
                .map_err(|e| IdPhotoError::file_io_error("flush file", &partial, &e))
        }
        .await;

        if let Err(e) = streamed {
            if let Err(cleanup) = fs::remove_file(&partial) {
                log::warn!("Failed to remove partial download {}: {cleanup}", partial.display());
            }
            return Err(e);
        }
        drop(file);

        fs::rename(&partial, destination)
            .map_err(|e| IdPhotoError::file_io_error("move downloaded model", destination, &e))?;
        Ok((downloaded, format!("{:x}", hasher.finalize())))
    }
}

/// Compare a file's SHA-256 with `expected_hash`; `None` skips the check
///
/// # Errors
/// - The file cannot be read
pub fn verify_file_integrity(file_path: &Path, expected_hash: Option<&str>) -> Result<bool> {
    let Some(expected) = expected_hash else {
        return Ok(true);
    };
    let contents = fs::read(file_path)
        .map_err(|e| IdPhotoError::file_io_error("read file for verification", file_path, &e))?;
    let actual = format!("{:x}", Sha256::digest(&contents));
    if actual.eq_ignore_ascii_case(expected) {
        Ok(true)
    } else {
        log::warn!(
            "File integrity check failed for {}: expected {expected}, got {actual}",
            file_path.display()
        );
        Ok(false)
    }
}

/// Only HTTPS URLs are accepted
///
/// # Errors
/// - Empty, non-HTTPS or host-less URL
pub fn validate_model_url(url: &str) -> Result<()> {
    if url.trim().is_empty() {
        return Err(IdPhotoError::invalid_config("Model URL cannot be empty"));
    }
    let Some(rest) = url.strip_prefix("https://") else {
        return Err(IdPhotoError::invalid_config(format!(
            "Model URL must use HTTPS: {url}"
        )));
    };
    let host = rest.split('/').next().unwrap_or_default();
    if host.is_empty() || !host.contains('.') {
        return Err(IdPhotoError::invalid_config(format!(
            "Model URL has no valid host: {url}"
        )));
    }
    Ok(())
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_model_url() {
        assert!(validate_model_url(DEFAULT_MODEL_URL).is_ok());
        assert!(validate_model_url("").is_err());
        assert!(validate_model_url("http://huggingface.co/x").is_err());
        assert!(validate_model_url("https:///model.onnx").is_err());
        assert!(validate_model_url("ftp://example.com/model.onnx").is_err());
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/cache/models/m.onnx")),
            PathBuf::from("/cache/models/m.onnx.part")
        );
    }

    #[test]
    fn test_verify_file_integrity() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("data.bin");
        fs::write(&file, b"hello").unwrap();

        let digest = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        assert!(verify_file_integrity(&file, None).unwrap());
        assert!(verify_file_integrity(&file, Some(digest)).unwrap());
        assert!(!verify_file_integrity(&file, Some("00")).unwrap());
        assert!(verify_file_integrity(&temp.path().join("missing"), Some(digest)).is_err());
    }

    #[tokio::test]
    async fn test_cached_model_skips_network() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp.path()).unwrap();
        fs::write(cache.default_model_path(), b"onnx").unwrap();

        let downloader = ModelDownloader::with_cache(cache).unwrap();
        let model = downloader.download_default(false).await.unwrap();
        assert!(model.from_cache);
        assert_eq!(model.size_bytes, 4);
        assert!(model.sha256.is_none());
    }

    #[tokio::test]
    async fn test_invalid_url_rejected_before_request() {
        let temp = TempDir::new().unwrap();
        let downloader =
            ModelDownloader::with_cache(ModelCache::with_custom_cache_dir(temp.path()).unwrap())
                .unwrap();
        let err = downloader.download_model("http://insecure.example/m.onnx", false).await;
        assert!(matches!(err, Err(IdPhotoError::InvalidConfig(_))));
    }
}
