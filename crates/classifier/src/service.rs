use crate::{
    backend::ClassifierBackend,
    config::ClassifierConfig,
    device::select_device,
    error::ClassifierError,
    labels::Labels,
    postprocessing::{self, Prediction},
};
use candle_core::Device;
use common::span;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use preprocess::Transform;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Everything a prediction needs, published as one value.
///
/// Model, labels and transform are either all present or all absent; there
/// is no way to observe one without the others.
pub struct LoadedModel<B> {
    backend: B,
    labels: Labels,
    transform: Transform,
    model_path: PathBuf,
}

impl<B> LoadedModel<B> {
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }
}

struct ClassifierMetrics {
    predict_duration: Histogram<f64>,
    predictions: Counter<u64>,
    failures: Counter<u64>,
    loads: Counter<u64>,
    recognized: AtomicU64,
    failed: AtomicU64,
}

/// In-process prediction tally, kept alongside the exported metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PredictionStats {
    pub recognized: u64,
    pub failed: u64,
}

fn init_metrics(meter_name: &'static str) -> ClassifierMetrics {
    let meter = global::meter(meter_name);
    let latency_buckets = [
        0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.15, 0.2, 0.3, 0.5, 0.75, 1.0, 2.0, 5.0,
    ];

    ClassifierMetrics {
        predict_duration: meter
            .f64_histogram("classifier_predict_duration_seconds")
            .with_description("Time to classify one image (decode + preprocess + infer)")
            .with_unit("s")
            .with_boundaries(latency_buckets.to_vec())
            .build(),
        predictions: meter
            .u64_counter("classifier_predictions_total")
            .with_description("Total images recognized")
            .build(),
        failures: meter
            .u64_counter("classifier_prediction_failures_total")
            .with_description("Total predictions that degraded to the unrecognized sentinel")
            .build(),
        loads: meter
            .u64_counter("classifier_model_loads_total")
            .with_description("Model load attempts that read the checkpoint")
            .build(),
        recognized: AtomicU64::new(0),
        failed: AtomicU64::new(0),
    }
}

/// Food image classifier.
///
/// One instance is built by the composition root and shared by reference (or
/// `Arc`) with every request handler. The compute device is chosen once at
/// construction. Loading is serialized and publishes the model atomically;
/// predictions run concurrently against the published model without holding
/// any lock.
///
/// `predict` loads the model from the configured paths on first use if
/// nobody called `load` before. Callers that want a predictable first request
/// should load eagerly at startup.
pub struct ClassifierService<B: ClassifierBackend> {
    model_path: PathBuf,
    labels_path: PathBuf,
    device: Device,
    state: RwLock<Option<Arc<LoadedModel<B>>>>,
    load_lock: Mutex<()>,
    metrics: ClassifierMetrics,
}

impl<B: ClassifierBackend> ClassifierService<B> {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self::with_device(config, select_device(config.device))
    }

    pub fn with_device(config: &ClassifierConfig, device: Device) -> Self {
        Self {
            model_path: config.model_path.clone(),
            labels_path: config.labels_path.clone(),
            device,
            state: RwLock::new(None),
            load_lock: Mutex::new(()),
            metrics: init_metrics("classifier"),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Snapshot of the published model, `None` until a load succeeds.
    pub fn loaded(&self) -> Option<Arc<LoadedModel<B>>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded().is_some()
    }

    pub fn stats(&self) -> PredictionStats {
        PredictionStats {
            recognized: self.metrics.recognized.load(Ordering::Relaxed),
            failed: self.metrics.failed.load(Ordering::Relaxed),
        }
    }

    /// Load model and labels. Returns `true` when a model is ready.
    ///
    /// A no-op returning `true` if a model is already loaded. On failure the
    /// service stays empty so a later call can retry.
    pub fn load(&self, model_path: impl AsRef<Path>, labels_path: impl AsRef<Path>) -> bool {
        let model_path = model_path.as_ref();
        let labels_path = labels_path.as_ref();

        match self.try_load(model_path, labels_path) {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    kind = e.kind(),
                    model_path = %model_path.display(),
                    labels_path = %labels_path.display(),
                    "Failed to load classifier model"
                );
                false
            }
        }
    }

    /// [`Self::load`] with the configured paths.
    pub fn load_default(&self) -> bool {
        self.load(&self.model_path, &self.labels_path)
    }

    pub fn try_load(
        &self,
        model_path: &Path,
        labels_path: &Path,
    ) -> Result<Arc<LoadedModel<B>>, ClassifierError> {
        if let Some(model) = self.loaded() {
            return Ok(model);
        }

        let _guard = self.load_lock.lock().unwrap_or_else(PoisonError::into_inner);

        // Another caller may have finished loading while we waited
        if let Some(model) = self.loaded() {
            return Ok(model);
        }

        let _s = span!("load_model");
        let start = Instant::now();

        match self.build(model_path, labels_path) {
            Ok(model) => {
                let model = Arc::new(model);
                *self.state.write().unwrap_or_else(PoisonError::into_inner) =
                    Some(Arc::clone(&model));
                self.metrics
                    .loads
                    .add(1, &[KeyValue::new("outcome", "success")]);

                tracing::info!(
                    path = %model_path.display(),
                    num_classes = model.labels.len(),
                    device = ?self.device.location(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Classifier model loaded"
                );
                Ok(model)
            }
            Err(e) => {
                *self.state.write().unwrap_or_else(PoisonError::into_inner) = None;
                self.metrics
                    .loads
                    .add(1, &[KeyValue::new("outcome", "failure")]);
                Err(e)
            }
        }
    }

    fn build(
        &self,
        model_path: &Path,
        labels_path: &Path,
    ) -> Result<LoadedModel<B>, ClassifierError> {
        // Labels first: their count sizes the classifier head
        let labels = Labels::from_file(labels_path)?;
        tracing::info!(
            count = labels.len(),
            path = %labels_path.display(),
            "Loaded class labels"
        );

        if !model_path.is_file() {
            return Err(ClassifierError::Configuration(format!(
                "model file not found: {}",
                model_path.display()
            )));
        }

        let backend = B::load_model(model_path, labels.len(), &self.device)?;
        if backend.num_classes() != labels.len() {
            return Err(ClassifierError::Format(format!(
                "model head has {} outputs but {} labels were loaded",
                backend.num_classes(),
                labels.len()
            )));
        }

        Ok(LoadedModel {
            backend,
            labels,
            transform: Transform::default(),
            model_path: model_path.to_path_buf(),
        })
    }

    /// Classify encoded image bytes.
    ///
    /// Never fails: any error is logged and yields
    /// [`Prediction::unrecognized`]. Cached model state is not affected by a
    /// failed prediction.
    pub fn predict(&self, image_bytes: &[u8]) -> Prediction {
        let start = Instant::now();
        let result = self.try_predict(image_bytes);
        self.record_prediction(&result, start, image_bytes.len());
        result.unwrap_or_else(|_| Prediction::unrecognized())
    }

    /// Shared accounting for every prediction entry point.
    fn record_prediction(
        &self,
        result: &Result<Prediction, ClassifierError>,
        start: Instant,
        image_bytes: usize,
    ) {
        match result {
            Ok(_) => {
                self.metrics
                    .predict_duration
                    .record(start.elapsed().as_secs_f64(), &[]);
                self.metrics.predictions.add(1, &[]);
                self.metrics.recognized.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.metrics
                    .failures
                    .add(1, &[KeyValue::new("kind", e.kind())]);
                self.metrics.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    error = %e,
                    kind = e.kind(),
                    image_bytes,
                    "Prediction error"
                );
            }
        }
    }

    pub fn try_predict(&self, image_bytes: &[u8]) -> Result<Prediction, ClassifierError> {
        let model = match self.loaded() {
            Some(model) => model,
            None => self.try_load(&self.model_path, &self.labels_path)?,
        };

        let _s = span!("predict");

        let input = model.transform.apply(image_bytes)?;

        let logits = {
            let _infer_span = tracing::info_span!("model_inference").entered();
            model.backend.infer(&input)?
        };

        if logits.len() != model.labels.len() {
            return Err(ClassifierError::Inference(format!(
                "model returned {} scores for {} labels",
                logits.len(),
                model.labels.len()
            )));
        }

        let score = postprocessing::top_class(logits.view())?;
        let prediction = postprocessing::decode(score, &model.labels)?;

        tracing::debug!(
            label = prediction.label.as_deref(),
            confidence = prediction.confidence,
            index = score.index,
            "Image classified"
        );

        Ok(prediction)
    }

    /// Read an image file and classify it. A missing or unreadable file
    /// yields [`Prediction::unrecognized`].
    pub fn predict_from_path(&self, path: impl AsRef<Path>) -> Prediction {
        let path = path.as_ref();

        match fs::read(path) {
            Ok(bytes) => self.predict(&bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Image file not found");
                Prediction::unrecognized()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Error reading image file");
                Prediction::unrecognized()
            }
        }
    }
}

impl<B: ClassifierBackend + 'static> ClassifierService<B> {
    /// Load from the configured paths on the blocking pool, giving up after
    /// `timeout`.
    ///
    /// A timed-out load keeps running in the background and still publishes
    /// its result atomically; a later call sees either nothing or the whole
    /// model.
    pub async fn load_with_timeout(
        self: &Arc<Self>,
        timeout: Duration,
    ) -> Result<(), ClassifierError> {
        let service = Arc::clone(self);
        let task = tokio::task::spawn_blocking(move || {
            service
                .try_load(&service.model_path, &service.labels_path)
                .map(|_| ())
        });

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(ClassifierError::Inference(format!(
                "load task failed: {}",
                e
            ))),
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Model load timed out");
                Err(ClassifierError::Timeout(timeout))
            }
        }
    }

    /// [`Self::try_predict`] on the blocking pool with a deadline. Expiry is
    /// reported as [`ClassifierError::Timeout`]. Metrics and logging match
    /// [`Self::predict`].
    pub async fn predict_with_timeout(
        self: &Arc<Self>,
        image_bytes: Vec<u8>,
        timeout: Duration,
    ) -> Result<Prediction, ClassifierError> {
        let start = Instant::now();
        let image_len = image_bytes.len();
        let service = Arc::clone(self);
        let task = tokio::task::spawn_blocking(move || service.try_predict(&image_bytes));

        let result = match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(ClassifierError::Inference(format!(
                "prediction task failed: {}",
                e
            ))),
            Err(_) => Err(ClassifierError::Timeout(timeout)),
        };

        self.record_prediction(&result, start, image_len);
        result
    }
}
