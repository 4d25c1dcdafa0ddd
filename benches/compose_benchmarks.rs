use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{DynamicImage, Rgba, RgbaImage};
use idphoto_studio::{
    face::StaticFaceDetector, sheet, sizes, Color, Compositor, FaceBox, FaceLocator,
    SharedSegmenter, MockBackend,
};

/// Opaque subject in the middle of a transparent frame
fn cutout(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, y| {
        let inside = x > width / 4 && x < width * 3 / 4 && y > height / 6;
        if inside {
            Rgba([180, 140, 120, 255])
        } else {
            Rgba([0, 0, 0, 0])
        }
    }))
}

fn benchmark_compose_paths(c: &mut Criterion) {
    let source = cutout(1200, 1600);
    let face = FaceBox::new(450, 300, 300, 360);
    let with_face = Compositor::new(FaceLocator::new(StaticFaceDetector::single(face)));
    let without_face = Compositor::new(FaceLocator::disabled());

    let mut group = c.benchmark_group("compose");
    group.sample_size(10);
    for size in sizes::catalog() {
        let target = size.pixel_dimensions();
        group.bench_with_input(BenchmarkId::new("face_anchored", size.name), &target, |b, &target| {
            b.iter(|| with_face.compose(black_box(&source), target, Color::WHITE));
        });
        group.bench_with_input(BenchmarkId::new("centered", size.name), &target, |b, &target| {
            b.iter(|| without_face.compose(black_box(&source), target, Color::WHITE));
        });
    }
    group.finish();
}

fn benchmark_sheet_tiling(c: &mut Criterion) {
    let unit = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(354, 472, image::Rgb([200, 200, 255])));
    c.bench_function("sheet_4x6", |b| {
        b.iter(|| {
            sheet::tile(
                black_box(&unit),
                sheet::DEFAULT_ROWS,
                sheet::DEFAULT_COLS,
                sheet::DEFAULT_SPACING,
                Color::WHITE,
            )
        });
    });
}

fn benchmark_mock_segmentation(c: &mut Criterion) {
    let segmenter = SharedSegmenter::from_backend(MockBackend::new());
    let photo = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(800, 1000, image::Rgb([90, 110, 130])));
    let mut group = c.benchmark_group("segmentation");
    group.sample_size(10);
    group.bench_function("mock_800x1000", |b| {
        b.iter(|| segmenter.segment(black_box(&photo)));
    });
    group.finish();
}

criterion_group!(
    benches,
    benchmark_compose_paths,
    benchmark_sheet_tiling,
    benchmark_mock_segmentation
);
criterion_main!(benches);
