//! ONNX Runtime segmentation backend
//!
//! Runs RMBG-style salient object models through ONNX Runtime with CPU, CUDA
//! or `CoreML` execution providers.

use crate::config::{ExecutionProvider, SegmentationConfig};
use crate::error::{IdPhotoError, Result};
use crate::segmentation::{PreprocessingConfig, SegmentationBackend};
use instant::{Duration, Instant};
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
    ExecutionProviderDispatch,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use std::path::{Path, PathBuf};

/// ONNX Runtime backend
#[derive(Debug)]
pub struct OnnxBackend {
    session: Option<Session>,
    model_path: PathBuf,
    execution_provider: ExecutionProvider,
    intra_threads: usize,
    inter_threads: usize,
    preprocessing: PreprocessingConfig,
}

impl OnnxBackend {
    /// Execution providers with availability and description
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        log::debug!(
            "Checking ONNX Runtime providers on {}/{}",
            std::env::consts::OS,
            std::env::consts::ARCH
        );

        let cuda_available =
            OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false);
        let coreml_available =
            OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
                .unwrap_or(false);

        vec![
            (
                "CPU".to_string(),
                true,
                "Always available, uses CPU for inference".to_string(),
            ),
            (
                "CUDA".to_string(),
                cuda_available,
                "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
            ),
            (
                "CoreML".to_string(),
                coreml_available,
                "Apple Silicon acceleration (macOS only)".to_string(),
            ),
        ]
    }

    pub fn new<P: Into<PathBuf>>(model_path: P, execution_provider: ExecutionProvider) -> Self {
        Self {
            session: None,
            model_path: model_path.into(),
            execution_provider,
            intra_threads: 0,
            inter_threads: 0,
            preprocessing: PreprocessingConfig::rmbg(),
        }
    }

    /// Backend for `model_path` with provider and thread settings from `config`
    pub fn from_config<P: Into<PathBuf>>(model_path: P, config: &SegmentationConfig) -> Self {
        Self::new(model_path, config.execution_provider)
            .with_threads(config.intra_threads, config.inter_threads)
    }

    /// Thread counts, 0 = auto-detect
    #[must_use]
    pub fn with_threads(mut self, intra_threads: usize, inter_threads: usize) -> Self {
        self.intra_threads = intra_threads;
        self.inter_threads = inter_threads;
        self
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

    fn providers(&self) -> Vec<ExecutionProviderDispatch> {
        let cuda = || {
            let provider = CUDAExecutionProvider::default();
            OrtExecutionProvider::is_available(&provider)
                .unwrap_or(false)
                .then(|| provider.build())
        };
        let coreml = || {
            let provider = CoreMLExecutionProvider::default();
            OrtExecutionProvider::is_available(&provider)
                .unwrap_or(false)
                .then(|| CoreMLExecutionProvider::default().with_subgraphs(true).build())
        };

        match self.execution_provider {
            ExecutionProvider::Auto => cuda().into_iter().chain(coreml()).collect(),
            ExecutionProvider::Cpu => Vec::new(),
            ExecutionProvider::Cuda => {
                let providers: Vec<_> = cuda().into_iter().collect();
                if providers.is_empty() {
                    log::warn!("CUDA execution provider requested but not available, falling back to CPU");
                }
                providers
            },
            ExecutionProvider::CoreMl => {
                let providers: Vec<_> = coreml().into_iter().collect();
                if providers.is_empty() {
                    log::warn!("CoreML execution provider requested but not available, falling back to CPU");
                }
                providers
            },
        }
    }

    fn thread_counts(&self) -> (usize, usize) {
        let cores = std::thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(8);
        let intra = if self.intra_threads > 0 {
            self.intra_threads
        } else {
            cores
        };
        let inter = if self.inter_threads > 0 {
            self.inter_threads
        } else {
            (cores / 4).max(1)
        };
        (intra, inter)
    }

    fn load_model(&mut self) -> Result<Duration> {
        let start = Instant::now();
        if !self.model_path.exists() {
            return Err(IdPhotoError::model(format!(
                "Segmentation model not found at '{}'",
                self.model_path.display()
            )));
        }

        let providers = self.providers();
        let (intra_threads, inter_threads) = self.thread_counts();
        let mut builder = Session::builder()
            .map_err(ort_error("Failed to create session builder"))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(ort_error("Failed to set optimization level"))?;
        if !providers.is_empty() {
            log::info!("Hardware acceleration enabled with {} provider(s)", providers.len());
            builder = builder
                .with_execution_providers(providers)
                .map_err(ort_error("Failed to set execution providers"))?;
        }

        let session = builder
            .with_parallel_execution(true)
            .map_err(ort_error("Failed to enable parallel execution"))?
            .with_intra_threads(intra_threads)
            .map_err(ort_error("Failed to set intra threads"))?
            .with_inter_threads(inter_threads)
            .map_err(ort_error("Failed to set inter threads"))?
            .commit_from_file(&self.model_path)
            .map_err(ort_error("Failed to create session from model file"))?;

        log::debug!(
            "ONNX session ready: provider {}, {intra_threads} intra / {inter_threads} inter threads",
            self.execution_provider
        );
        self.session = Some(session);
        Ok(start.elapsed())
    }
}

fn ort_error<E: std::fmt::Display>(context: &'static str) -> impl FnOnce(E) -> IdPhotoError {
    move |e| IdPhotoError::model(format!("{context}: {e}"))
}

impl SegmentationBackend for OnnxBackend {
    fn initialize(&mut self) -> Result<Option<Duration>> {
        if self.session.is_some() {
            return Ok(None);
        }
        self.load_model().map(Some)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| IdPhotoError::internal("ONNX session not initialized"))?;

        let start = Instant::now();
        let input_value = Value::from_array(input.clone()).map_err(|e| {
            IdPhotoError::segmentation(format!("Failed to convert input tensor: {e}"))
        })?;
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| IdPhotoError::segmentation(format!("ONNX inference failed: {e}")))?;

        // RMBG exports several side outputs; the first is the full-resolution mask
        let first_key = outputs
            .keys()
            .next()
            .ok_or_else(|| IdPhotoError::segmentation("No output tensors found"))?;
        let output = outputs
            .get(first_key)
            .ok_or_else(|| IdPhotoError::segmentation("First output tensor not found"))?
            .try_extract_array::<f32>()
            .map_err(|e| {
                IdPhotoError::segmentation(format!("Failed to extract output tensor: {e}"))
            })?;

        let shape = output.shape().to_vec();
        let [batch, channels, height, width] = shape[..] else {
            return Err(IdPhotoError::segmentation(format!(
                "Expected 4D output tensor, got {}D",
                shape.len()
            )));
        };
        let result = Array4::from_shape_vec(
            (batch, channels, height, width),
            output.iter().copied().collect(),
        )
        .map_err(|e| IdPhotoError::segmentation(format!("Failed to reshape output tensor: {e}")))?;

        log::debug!(
            "ONNX inference {:?} -> {:?} in {}ms",
            input.shape(),
            result.shape(),
            start.elapsed().as_millis()
        );
        Ok(result)
    }

    fn preprocessing_config(&self) -> PreprocessingConfig {
        self.preprocessing.clone()
    }

    fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    fn release_cached_memory(&mut self) {
        // ONNX Runtime keeps its arena per session; nothing to release between runs
        log::trace!("ONNX backend holds no per-request device cache");
    }

    fn name(&self) -> &'static str {
        "onnx"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_always_listed() {
        let providers = OnnxBackend::list_providers();
        assert_eq!(providers.len(), 3);
        assert!(providers.iter().any(|(name, available, _)| name == "CPU" && *available));
    }

    #[test]
    fn test_missing_model_fails_initialization() {
        let mut backend = OnnxBackend::new("/nonexistent/model.onnx", ExecutionProvider::Cpu);
        assert!(!backend.is_initialized());
        assert!(matches!(backend.initialize(), Err(IdPhotoError::Model(_))));
        assert!(backend.infer(&Array4::zeros((1, 3, 8, 8))).is_err());
    }

    #[test]
    fn test_thread_settings() {
        let config = SegmentationConfig {
            intra_threads: 6,
            inter_threads: 2,
            ..SegmentationConfig::default()
        };
        let backend = OnnxBackend::from_config("model.onnx", &config);
        assert_eq!(backend.thread_counts(), (6, 2));

        let auto = OnnxBackend::new("model.onnx", ExecutionProvider::Cpu);
        let (intra, inter) = auto.thread_counts();
        assert!(intra >= 1 && inter >= 1);
    }
}
