//! Upload validation and result storage
//!
//! Keeps file naming and filesystem access out of the request pipeline.
//! Originals land in `<storage>/uploads/`, generated images in
//! `<storage>/results/`, and both are exposed under the configured URL prefix.

use crate::config::ServiceConfig;
use crate::error::{IdPhotoError, Result};
use image::{DynamicImage, ImageFormat, ImageReader, Limits};
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};

/// Content types accepted for uploads
pub const SUPPORTED_CONTENT_TYPES: [&str; 2] = ["image/jpeg", "image/png"];

/// Largest accepted width or height of a decoded upload, in pixels
pub const MAX_UPLOAD_DIMENSION: u32 = 12_000;

/// Checks uploads before any processing happens
#[derive(Debug, Clone, Copy)]
pub struct UploadValidator {
    max_bytes: u64,
    max_dimension: u32,
}

impl UploadValidator {
    #[must_use]
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            max_dimension: MAX_UPLOAD_DIMENSION,
        }
    }

    /// Cap on decoded width and height
    #[must_use]
    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension;
        self
    }

    #[must_use]
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    #[must_use]
    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    /// Image format for an accepted content type
    ///
    /// Parameters such as `; charset=...` are ignored.
    ///
    /// # Errors
    /// - Content type other than JPEG or PNG
    pub fn check_content_type(&self, content_type: &str) -> Result<ImageFormat> {
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match media_type.as_str() {
            "image/jpeg" => Ok(ImageFormat::Jpeg),
            "image/png" => Ok(ImageFormat::Png),
            _ => Err(IdPhotoError::invalid_input(format!(
                "Unsupported file type '{content_type}', please upload JPEG or PNG images"
            ))),
        }
    }

    /// # Errors
    /// - Empty upload or more than `max_bytes`
    pub fn check_size(&self, len: usize) -> Result<()> {
        if len == 0 {
            return Err(IdPhotoError::invalid_input("Uploaded file is empty"));
        }
        if len as u64 > self.max_bytes {
            return Err(IdPhotoError::invalid_input(format!(
                "File size too large: {len} bytes, maximum is {} bytes",
                self.max_bytes
            )));
        }
        Ok(())
    }

    /// Run every check and decode the upload
    ///
    /// Decoding is bounded by [`UploadValidator::max_dimension`], so a small
    /// file cannot expand into an oversized image.
    ///
    /// # Errors
    /// - Unsupported content type, bad size, or bytes that do not decode
    /// - Width or height above the dimension cap
    pub fn validate(&self, bytes: &[u8], content_type: &str) -> Result<DynamicImage> {
        let format = self.check_content_type(content_type)?;
        self.check_size(bytes.len())?;
        self.decode(bytes, Some(format))
            .or_else(|declared| match declared {
                image::ImageError::Limits(_) => Err(declared),
                _ => self.decode(bytes, None),
            })
            .map_err(|e| match e {
                image::ImageError::Limits(_) => IdPhotoError::invalid_input(format!(
                    "Image dimensions exceed {max}x{max} pixels",
                    max = self.max_dimension
                )),
                other => IdPhotoError::invalid_input(format!(
                    "Uploaded file is not a valid image: {other}"
                )),
            })
    }

    /// Decode with the declared format, or sniff it when `None`
    fn decode(&self, bytes: &[u8], format: Option<ImageFormat>) -> image::ImageResult<DynamicImage> {
        let mut reader = match format {
            Some(format) => ImageReader::with_format(Cursor::new(bytes), format),
            None => ImageReader::new(Cursor::new(bytes)).with_guessed_format()?,
        };
        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_dimension);
        limits.max_image_height = Some(self.max_dimension);
        reader.limits(limits);
        reader.decode()
    }
}

impl Default for UploadValidator {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_UPLOAD_BYTES)
    }
}

/// Generated image kinds and their file name prefixes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Cutout,
    IdPhoto,
    Bordered,
    Sheet,
}

impl ResultKind {
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Cutout => "nobg_",
            Self::IdPhoto => "idphoto_",
            Self::Bordered => "idphoto_border_",
            Self::Sheet => "sheet_",
        }
    }
}

/// A file written by [`ResultStore`] and its public URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub path: PathBuf,
    pub url: String,
}

/// Filesystem layout for uploads and results
#[derive(Debug, Clone)]
pub struct ResultStore {
    root: PathBuf,
    url_prefix: String,
}

impl ResultStore {
    pub fn new<P: Into<PathBuf>, S: Into<String>>(root: P, url_prefix: S) -> Self {
        Self {
            root: root.into(),
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(config.storage_dir.clone(), config.url_prefix.clone())
    }

    #[must_use]
    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join("uploads")
    }

    #[must_use]
    pub fn results_dir(&self) -> PathBuf {
        self.root.join("results")
    }

    /// Create `uploads/` and `results/` if missing
    ///
    /// # Errors
    /// - Directory creation failed
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.uploads_dir(), self.results_dir()] {
            std::fs::create_dir_all(&dir)
                .map_err(|e| IdPhotoError::file_io_error("create storage directory", &dir, &e))?;
        }
        Ok(())
    }

    /// Unique stem for an upload: `<uuid>_<sanitized original stem>`
    #[must_use]
    pub fn unique_stem(original_name: &str) -> String {
        let stem = Path::new(original_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .map(sanitize)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "photo".to_string());
        format!("{}_{stem}", uuid::Uuid::new_v4().simple())
    }

    /// Write the original upload as `uploads/<stem>.<ext>`
    ///
    /// # Errors
    /// - Write failure
    pub fn store_upload(&self, stem: &str, format: ImageFormat, bytes: &[u8]) -> Result<StoredFile> {
        let extension = format.extensions_str().first().copied().unwrap_or("img");
        let file_name = format!("{stem}.{extension}");
        let path = self.uploads_dir().join(&file_name);
        write_file(&path, bytes)?;
        Ok(StoredFile {
            url: format!("{}/uploads/{file_name}", self.url_prefix),
            path,
        })
    }

    #[must_use]
    pub fn result_file_name(kind: ResultKind, stem: &str) -> String {
        format!("{}{stem}.png", kind.prefix())
    }

    #[must_use]
    pub fn result_url(&self, file_name: &str) -> String {
        format!("{}/results/{file_name}", self.url_prefix)
    }

    /// Save a generated image as PNG under `results/`
    ///
    /// # Errors
    /// - Encoding or write failure
    pub fn save_result(&self, kind: ResultKind, stem: &str, image: &DynamicImage) -> Result<StoredFile> {
        let file_name = Self::result_file_name(kind, stem);
        let path = self.results_dir().join(&file_name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| IdPhotoError::file_io_error("create results directory", parent, &e))?;
        }
        image.save_with_format(&path, ImageFormat::Png)?;
        log::debug!("Saved {:?} result to {}", kind, path.display());
        Ok(StoredFile {
            url: self.result_url(&file_name),
            path,
        })
    }

    /// URL of an existing result file
    ///
    /// # Errors
    /// - Name that is not a single plain file name, as `InvalidInput`
    /// - No such result, as `NotFound`
    pub fn preview(&self, file_name: &str) -> Result<String> {
        let mut components = Path::new(file_name).components();
        let is_plain = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !is_plain {
            return Err(IdPhotoError::invalid_input(format!(
                "Invalid result file name '{file_name}'"
            )));
        }
        if !self.results_dir().join(file_name).is_file() {
            return Err(IdPhotoError::not_found(format!("Image '{file_name}' does not exist")));
        }
        Ok(self.result_url(file_name))
    }
}

fn sanitize(stem: &str) -> String {
    stem.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(64)
        .collect()
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| IdPhotoError::file_io_error("create directory", parent, &e))?;
    }
    std::fs::write(path, bytes).map_err(|e| IdPhotoError::file_io_error("write file", path, &e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::new_rgb8(width, height)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_content_types() {
        let validator = UploadValidator::default();
        assert_eq!(validator.check_content_type("image/jpeg").unwrap(), ImageFormat::Jpeg);
        assert_eq!(validator.check_content_type("IMAGE/PNG; q=1").unwrap(), ImageFormat::Png);
        assert!(validator.check_content_type("image/gif").unwrap_err().is_input_error());
        assert!(validator.check_content_type("text/plain").is_err());
    }

    #[test]
    fn test_size_limit() {
        let validator = UploadValidator::new(100);
        assert!(validator.check_size(100).is_ok());
        assert!(validator.check_size(101).is_err());
        assert!(validator.check_size(0).is_err());
    }

    #[test]
    fn test_validate_decodes() {
        let validator = UploadValidator::default();
        let image = validator.validate(&png_bytes(12, 8), "image/png").unwrap();
        assert_eq!((image.width(), image.height()), (12, 8));

        let err = validator.validate(b"not an image", "image/png").unwrap_err();
        assert!(matches!(err, IdPhotoError::InvalidInput(_)));
    }

    #[test]
    fn test_extreme_dimensions_rejected_before_decode() {
        let strip = png_bytes(20_000, 1);
        assert!(strip.len() < 4096);

        let err = UploadValidator::default().validate(&strip, "image/png").unwrap_err();
        assert!(err.is_input_error());
        assert!(err.to_string().contains("12000x12000"));

        let small_cap = UploadValidator::default().with_max_dimension(10);
        assert!(small_cap.validate(&png_bytes(11, 4), "image/png").is_err());
        assert!(small_cap.validate(&png_bytes(10, 10), "image/png").is_ok());
    }

    #[test]
    fn test_unique_stem() {
        let a = ResultStore::unique_stem("my photo (1).jpg");
        let b = ResultStore::unique_stem("my photo (1).jpg");
        assert_ne!(a, b);
        assert!(a.ends_with("_my_photo__1_"));
        assert!(ResultStore::unique_stem("").ends_with("_photo"));
        assert!(!ResultStore::unique_stem("../../etc/passwd").contains('/'));
    }

    #[test]
    fn test_store_and_preview() {
        let dir = TempDir::new().unwrap();
        let store = ResultStore::new(dir.path(), "/static/");
        store.ensure_dirs().unwrap();

        let upload = store.store_upload("abc_face", ImageFormat::Png, &png_bytes(4, 4)).unwrap();
        assert_eq!(upload.url, "/static/uploads/abc_face.png");
        assert!(upload.path.is_file());

        let saved = store
            .save_result(ResultKind::IdPhoto, "abc_face", &DynamicImage::new_rgb8(4, 4))
            .unwrap();
        assert_eq!(saved.url, "/static/results/idphoto_abc_face.png");
        assert_eq!(store.preview("idphoto_abc_face.png").unwrap(), saved.url);

        assert!(matches!(store.preview("missing.png"), Err(IdPhotoError::NotFound(_))));
        assert!(matches!(store.preview("../uploads/abc_face.png"), Err(IdPhotoError::InvalidInput(_))));
        assert!(matches!(store.preview("/etc/passwd"), Err(IdPhotoError::InvalidInput(_))));
    }

    #[test]
    fn test_result_prefixes() {
        assert_eq!(ResultStore::result_file_name(ResultKind::Cutout, "x"), "nobg_x.png");
        assert_eq!(ResultStore::result_file_name(ResultKind::Bordered, "x"), "idphoto_border_x.png");
        assert_eq!(ResultStore::result_file_name(ResultKind::Sheet, "x"), "sheet_x.png");
    }
}
