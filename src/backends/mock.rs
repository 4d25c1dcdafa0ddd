//! Deterministic segmentation backend for tests and offline runs
//!
//! Produces an upright ellipse covering the centre of the model input, roughly
//! where a head-and-shoulders subject sits in a portrait photo.

use crate::error::{IdPhotoError, Result};
use crate::segmentation::{PreprocessingConfig, SegmentationBackend};
use instant::Duration;
use ndarray::Array4;
use std::sync::{Arc, Mutex};

/// Mock backend with call recording and optional failures
#[derive(Debug, Clone)]
pub struct MockBackend {
    initialized: bool,
    preprocessing_config: PreprocessingConfig,
    call_history: Arc<Mutex<Vec<String>>>,
    should_fail_init: bool,
    should_fail_inference: bool,
}

impl MockBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            initialized: false,
            preprocessing_config: PreprocessingConfig::rmbg().with_target_size(256),
            call_history: Arc::new(Mutex::new(Vec::new())),
            should_fail_init: false,
            should_fail_inference: false,
        }
    }

    #[must_use]
    pub fn failing_init() -> Self {
        let mut backend = Self::new();
        backend.should_fail_init = true;
        backend
    }

    #[must_use]
    pub fn failing_inference() -> Self {
        let mut backend = Self::new();
        backend.should_fail_inference = true;
        backend
    }

    /// Model input side; small sizes keep tests fast
    #[must_use]
    pub fn with_target_size(mut self, target_size: u32) -> Self {
        self.preprocessing_config = self.preprocessing_config.with_target_size(target_size);
        self
    }

    #[must_use]
    pub fn call_history(&self) -> Vec<String> {
        self.call_history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }

    /// Shared handle, still readable after the backend is moved
    #[must_use]
    pub fn call_history_handle(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.call_history)
    }

    fn record_call(&self, method: &str) {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(method.to_string());
        }
    }

    fn ellipse_mask(size: usize) -> Array4<f32> {
        let s = size as f32;
        let (center_x, center_y) = (s / 2.0, s * 0.55);
        let (radius_x, radius_y) = (s * 0.3, s * 0.4);
        Array4::from_shape_fn((1, 1, size, size), |(_, _, y, x)| {
            let dx = (x as f32 + 0.5 - center_x) / radius_x;
            let dy = (y as f32 + 0.5 - center_y) / radius_y;
            if dx * dx + dy * dy <= 1.0 {
                1.0
            } else {
                0.0
            }
        })
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentationBackend for MockBackend {
    fn initialize(&mut self) -> Result<Option<Duration>> {
        self.record_call("initialize");
        if self.should_fail_init {
            return Err(IdPhotoError::model("Mock segmentation model failed to load"));
        }
        self.initialized = true;
        Ok(Some(Duration::from_millis(1)))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.record_call("infer");
        if !self.initialized {
            return Err(IdPhotoError::model("Mock backend not initialized"));
        }
        if self.should_fail_inference {
            return Err(IdPhotoError::segmentation("Mock inference failed"));
        }
        let size = self.preprocessing_config.target_size as usize;
        if input.shape() != [1, 3, size, size] {
            return Err(IdPhotoError::segmentation(format!(
                "Mock backend expected [1, 3, {size}, {size}], got {:?}",
                input.shape()
            )));
        }
        Ok(Self::ellipse_mask(size))
    }

    fn preprocessing_config(&self) -> PreprocessingConfig {
        self.preprocessing_config.clone()
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn release_cached_memory(&mut self) {
        self.record_call("release_cached_memory");
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
