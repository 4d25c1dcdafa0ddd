//! Tract segmentation backend
//!
//! Pure Rust inference with no native runtime. Slower than ONNX Runtime but
//! works anywhere the crate compiles.

use crate::error::{IdPhotoError, Result};
use crate::segmentation::{PreprocessingConfig, SegmentationBackend};
use instant::{Duration, Instant};
use ndarray::Array4;
use std::path::{Path, PathBuf};
use tract_onnx::prelude::*;

type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Tract backend for ONNX segmentation models
#[derive(Debug)]
pub struct TractBackend {
    model: Option<TractModel>,
    model_path: PathBuf,
    preprocessing: PreprocessingConfig,
}

impl TractBackend {
    /// Tract only runs on the CPU
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        vec![(
            "CPU".to_string(),
            true,
            "Pure Rust CPU inference with no external dependencies".to_string(),
        )]
    }

    pub fn new<P: Into<PathBuf>>(model_path: P) -> Self {
        Self {
            model: None,
            model_path: model_path.into(),
            preprocessing: PreprocessingConfig::rmbg(),
        }
    }

    #[must_use]
    pub fn with_preprocessing(mut self, preprocessing: PreprocessingConfig) -> Self {
        self.preprocessing = preprocessing;
        self
    }

    #[must_use]
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    fn load_model(&mut self) -> Result<Duration> {
        let start = Instant::now();
        let model_data = std::fs::read(&self.model_path).map_err(|e| {
            IdPhotoError::model(format!(
                "Failed to read model '{}': {e}",
                self.model_path.display()
            ))
        })?;
        log::info!(
            "Loading Tract model {} ({:.2} MB)",
            self.model_path.display(),
            model_data.len() as f64 / (1024.0 * 1024.0)
        );

        let size = self.preprocessing.target_size as usize;
        let model = onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| IdPhotoError::model(format!("Failed to load ONNX model: {e}")))?
            .with_input_fact(0, f32::fact([1, 3, size, size]).into())
            .map_err(|e| IdPhotoError::model(format!("Failed to set input shape: {e}")))?
            .into_optimized()
            .map_err(|e| IdPhotoError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| IdPhotoError::model(format!("Failed to create runnable model: {e}")))?;

        self.model = Some(model);
        Ok(start.elapsed())
    }
}

impl SegmentationBackend for TractBackend {
    fn initialize(&mut self) -> Result<Option<Duration>> {
        if self.model.is_some() {
            return Ok(None);
        }
        self.load_model().map(Some)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| IdPhotoError::internal("Tract model not initialized"))?;

        let start = Instant::now();
        let outputs = model
            .run(tvec![Tensor::from(input.clone()).into()])
            .map_err(|e| IdPhotoError::segmentation(format!("Tract inference failed: {e}")))?;

        let output = outputs
            .into_iter()
            .next()
            .ok_or_else(|| IdPhotoError::segmentation("No output tensor found"))?
            .into_arc_tensor();
        let view = output.to_array_view::<f32>().map_err(|e| {
            IdPhotoError::segmentation(format!("Failed to convert output tensor: {e}"))
        })?;

        let shape = view.shape().to_vec();
        let [batch, channels, height, width] = shape[..] else {
            return Err(IdPhotoError::segmentation(format!(
                "Expected 4D output tensor, got {}D",
                shape.len()
            )));
        };
        let result = Array4::from_shape_vec(
            (batch, channels, height, width),
            view.iter().copied().collect(),
        )
        .map_err(|e| IdPhotoError::segmentation(format!("Failed to reshape output tensor: {e}")))?;

        log::debug!("Tract inference finished in {}ms", start.elapsed().as_millis());
        Ok(result)
    }

    fn preprocessing_config(&self) -> PreprocessingConfig {
        self.preprocessing.clone()
    }

    fn is_initialized(&self) -> bool {
        self.model.is_some()
    }

    fn name(&self) -> &'static str {
        "tract"
    }
}
