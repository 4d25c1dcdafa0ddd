//! End-to-end workflows through the ID photo service
//!
//! These tests run the full request pipeline against the deterministic mock
//! segmentation backend, so no model files or network access are needed.

use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};
use idphoto_studio::{
    face::StaticFaceDetector, BackendKind, Color, FaceBox, FaceLocator, IdPhotoError,
    IdPhotoService, MockBackend, PhotoRequest, PixelDimensions, ServiceConfig, SharedSegmenter,
};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 200) as u8 + 30, (y % 200) as u8 + 30, 140])
    }));
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), format).unwrap();
    bytes
}

fn mock_service(dir: &TempDir, segmenter: Arc<SharedSegmenter>, locator: FaceLocator) -> IdPhotoService {
    let config = ServiceConfig::builder()
        .storage_dir(dir.path())
        .url_prefix("https://photos.example.com/static/")
        .build()
        .unwrap();
    IdPhotoService::new(config, segmenter, locator).unwrap()
}

fn mock_segmenter() -> Arc<SharedSegmenter> {
    Arc::new(SharedSegmenter::from_backend(MockBackend::new().with_target_size(32)))
}

fn result_path(dir: &Path, url: &str) -> std::path::PathBuf {
    dir.join("results").join(url.rsplit('/').next().unwrap())
}

#[test]
fn from_config_builds_lazily_and_serves_requests() {
    let dir = TempDir::new().unwrap();
    let config = ServiceConfig::builder()
        .storage_dir(dir.path())
        .backend(BackendKind::Mock)
        .model_path(dir.path().join("unused.onnx"))
        .default_size("2x3")
        .default_bg_color(Color::new(0, 0, 255))
        .build()
        .unwrap();
    let service = IdPhotoService::from_config(config).unwrap();
    assert!(!service.segmenter().is_loaded());

    let response = service
        .process(PhotoRequest::new(encode(90, 120, ImageFormat::Png), "image/png", "scan.png"))
        .unwrap();
    assert!(service.segmenter().is_loaded());
    assert_eq!(response.size, "2x3");
    assert_eq!(response.dimensions.as_tuple(), (236, 354));
    assert!(response.original_url.ends_with("_scan.png"));

    let photo = image::open(result_path(dir.path(), &response.id_photo_url)).unwrap();
    assert_eq!(photo.dimensions(), (236, 354));
    // The mock cutout leaves the corners transparent, so they show the default background
    assert_eq!(photo.to_rgb8().get_pixel(0, 0), &Rgb([0, 0, 255]));
}

#[test]
fn explicit_pixels_override_named_sizes() {
    let dir = TempDir::new().unwrap();
    let service = mock_service(&dir, mock_segmenter(), FaceLocator::disabled());
    let response = service
        .process(
            PhotoRequest::new(encode(100, 100, ImageFormat::Jpeg), "image/jpeg", "a.jpg")
                .with_size("5x5")
                .with_pixels(PixelDimensions::new(300, 400).unwrap()),
        )
        .unwrap();

    assert_eq!(response.size, "300x400");
    assert_eq!(response.dimensions.as_tuple(), (300, 400));
    assert!(response.id_photo_url.starts_with("https://photos.example.com/static/results/idphoto_"));
}

#[test]
fn concurrent_requests_share_one_model_load() {
    let dir = TempDir::new().unwrap();
    let segmenter = mock_segmenter();
    let face = FaceBox::new(20, 15, 30, 30);
    let service = mock_service(
        &dir,
        Arc::clone(&segmenter),
        FaceLocator::new(StaticFaceDetector::single(face)),
    );
    let upload = encode(80, 100, ImageFormat::Jpeg);

    let responses: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let service = &service;
                let bytes = upload.clone();
                scope.spawn(move || {
                    service.process(PhotoRequest::new(bytes, "image/jpeg", format!("user{i}.jpg")))
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(segmenter.init_count(), 1);
    let mut urls = Vec::new();
    for response in responses {
        let response = response.unwrap();
        assert_eq!(response.composition_status.label(), "face_anchored");
        assert!(response.warnings.is_empty());
        urls.push(response.id_photo_url);
    }
    urls.sort();
    urls.dedup();
    assert_eq!(urls.len(), 4, "every request gets its own result files");
}

#[test]
fn failed_model_load_is_reported_on_every_request() {
    let dir = TempDir::new().unwrap();
    let segmenter = Arc::new(SharedSegmenter::from_backend(MockBackend::failing_init()));
    let service = mock_service(&dir, Arc::clone(&segmenter), FaceLocator::disabled());

    for _ in 0..2 {
        let err = service
            .process(PhotoRequest::new(encode(20, 20, ImageFormat::Jpeg), "image/jpeg", "a.jpg"))
            .unwrap_err();
        assert!(matches!(err, IdPhotoError::Segmentation(_)));
        assert!(!err.is_input_error());
    }
    assert_eq!(segmenter.init_count(), 1);
    assert!(!segmenter.is_loaded());
}

#[test]
fn oversized_uploads_are_rejected_before_storage() {
    let dir = TempDir::new().unwrap();
    let config = ServiceConfig::builder()
        .storage_dir(dir.path())
        .max_upload_bytes(64)
        .build()
        .unwrap();
    let service = IdPhotoService::new(config, mock_segmenter(), FaceLocator::disabled()).unwrap();

    let err = service
        .process(PhotoRequest::new(encode(50, 50, ImageFormat::Png), "image/png", "big.png"))
        .unwrap_err();
    assert!(err.is_input_error());
    assert!(!dir.path().join("uploads").exists());
}

#[test]
fn preview_only_serves_existing_results() {
    let dir = TempDir::new().unwrap();
    let service = mock_service(&dir, mock_segmenter(), FaceLocator::disabled());
    let response = service
        .process(PhotoRequest::new(encode(40, 60, ImageFormat::Jpeg), "image/jpeg", "p.jpg"))
        .unwrap();

    let cutout_name = response.removed_bg_url.rsplit('/').next().unwrap();
    assert_eq!(service.preview(cutout_name).unwrap(), response.removed_bg_url);
    assert!(matches!(service.preview("missing.png"), Err(IdPhotoError::NotFound(_))));
    assert!(service.preview("../uploads/p.jpg").unwrap_err().is_input_error());
}

#[test]
fn response_serializes_with_tagged_status() {
    let dir = TempDir::new().unwrap();
    let service = mock_service(&dir, mock_segmenter(), FaceLocator::disabled());
    let response = service
        .process(PhotoRequest::new(encode(40, 60, ImageFormat::Jpeg), "image/jpeg", "p.jpg"))
        .unwrap();

    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["composition_status"]["status"], "centered");
    assert!(json.get("photo_sheet_url").is_none());
    assert_eq!(json["dimensions"]["width_px"], 354);
}
