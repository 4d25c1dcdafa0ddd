//! Process-wide segmentation model handle
//!
//! Loading a segmentation model is expensive, so the service owns a single
//! [`SharedSegmenter`] and hands out references to it. The model is built from
//! a factory the first time it is needed and at most once per handle. A failed
//! build is remembered and reported to every later caller.

use crate::error::{IdPhotoError, Result};
use crate::segmentation::{Cutout, SegmentationBackend, Segmenter};
use image::DynamicImage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};
use tracing::{info, warn};

type BackendFactory = Box<dyn FnOnce() -> Result<Box<dyn SegmentationBackend>> + Send>;

/// Lazily initialized, thread-safe segmentation model
pub struct SharedSegmenter {
    cell: OnceLock<std::result::Result<Mutex<Segmenter>, String>>,
    factory: Mutex<Option<BackendFactory>>,
    init_count: AtomicUsize,
}

impl SharedSegmenter {
    /// Handle that builds its backend on first use
    pub fn new<F>(factory: F) -> Self
    where
        F: FnOnce() -> Result<Box<dyn SegmentationBackend>> + Send + 'static,
    {
        Self {
            cell: OnceLock::new(),
            factory: Mutex::new(Some(Box::new(factory))),
            init_count: AtomicUsize::new(0),
        }
    }

    /// Handle around an already constructed backend
    pub fn from_backend<B: SegmentationBackend + 'static>(backend: B) -> Self {
        Self::new(move || Ok(Box::new(backend) as Box<dyn SegmentationBackend>))
    }

    /// Whether the model has been loaded successfully
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        matches!(self.cell.get(), Some(Ok(_)))
    }

    /// How many times the factory ran (0 or 1)
    #[must_use]
    pub fn init_count(&self) -> usize {
        self.init_count.load(Ordering::SeqCst)
    }

    fn segmenter(&self) -> Result<&Mutex<Segmenter>> {
        let state = self.cell.get_or_init(|| {
            self.init_count.fetch_add(1, Ordering::SeqCst);
            let factory = self
                .factory
                .lock()
                .map_err(|_| "segmentation factory lock poisoned".to_string())
                .and_then(|mut slot| {
                    slot.take()
                        .ok_or_else(|| "segmentation factory already consumed".to_string())
                });
            let built = factory.and_then(|factory| {
                let mut segmenter = Segmenter::from_boxed(factory().map_err(|e| e.to_string())?);
                segmenter.initialize().map_err(|e| e.to_string())?;
                Ok(segmenter)
            });
            match built {
                Ok(segmenter) => {
                    info!(backend = segmenter.backend_name(), "Segmentation model ready");
                    Ok(Mutex::new(segmenter))
                },
                Err(e) => {
                    warn!(error = %e, "Segmentation model failed to load");
                    Err(e)
                },
            }
        });

        state
            .as_ref()
            .map_err(|e| IdPhotoError::segmentation(format!("Model unavailable: {e}")))
    }

    /// Load the model now instead of on the first request
    ///
    /// # Errors
    /// - The model failed to load (now or earlier)
    pub fn warm_up(&self) -> Result<()> {
        self.segmenter().map(|_| ())
    }

    /// Remove the background from `image`
    ///
    /// Inference is serialized; concurrent callers wait for the model.
    ///
    /// # Errors
    /// - Model unavailable or inference failure, as [`IdPhotoError::Segmentation`]
    pub fn segment(&self, image: &DynamicImage) -> Result<Cutout> {
        let segmenter = self.segmenter()?;
        let mut guard = segmenter
            .lock()
            .map_err(|_| IdPhotoError::segmentation("Segmentation model lock poisoned"))?;
        guard.segment(image)
    }
}

impl std::fmt::Debug for SharedSegmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSegmenter")
            .field("loaded", &self.is_loaded())
            .field("init_count", &self.init_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::MockBackend;
    use std::sync::Arc;
    use std::thread;

    fn photo() -> DynamicImage {
        DynamicImage::new_rgb8(40, 60)
    }

    #[test]
    fn test_lazy_initialization() {
        let shared = SharedSegmenter::from_backend(MockBackend::new().with_target_size(32));
        assert!(!shared.is_loaded());
        assert_eq!(shared.init_count(), 0);

        shared.segment(&photo()).unwrap();
        shared.segment(&photo()).unwrap();
        assert!(shared.is_loaded());
        assert_eq!(shared.init_count(), 1);
    }

    #[test]
    fn test_concurrent_first_use_initializes_once() {
        let shared = Arc::new(SharedSegmenter::from_backend(
            MockBackend::new().with_target_size(32),
        ));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || shared.segment(&photo()).map(|c| c.dimensions()))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap(), (40, 60));
        }
        assert_eq!(shared.init_count(), 1);
    }

    #[test]
    fn test_failed_initialization_is_cached() {
        let shared = SharedSegmenter::from_backend(MockBackend::failing_init());
        for _ in 0..3 {
            assert!(matches!(
                shared.segment(&photo()),
                Err(IdPhotoError::Segmentation(_))
            ));
        }
        assert!(!shared.is_loaded());
        assert_eq!(shared.init_count(), 1);
        assert!(shared.warm_up().is_err());
    }

    #[test]
    fn test_factory_error_is_reported() {
        let shared = SharedSegmenter::new(|| Err(IdPhotoError::model("no model.onnx")));
        let err = shared.warm_up().unwrap_err();
        assert!(err.to_string().contains("no model.onnx"));
    }
}
