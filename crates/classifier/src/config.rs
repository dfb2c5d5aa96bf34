use crate::device::DevicePreference;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub use common::Environment;

pub const DEFAULT_MODEL_PATH: &str = "food_model.pth";
pub const DEFAULT_LABELS_PATH: &str = "labels.txt";

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub environment: Environment,
    pub model_path: PathBuf,
    pub labels_path: PathBuf,
    pub device: DevicePreference,
    pub load_timeout_ms: u64,
    pub inference_timeout_ms: u64,
    pub otel_endpoint: Option<String>,
}

impl ClassifierConfig {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = Environment::from_env();

        let model_path = env::var("MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_MODEL_PATH));

        let labels_path = env::var("LABELS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_LABELS_PATH));

        let device = match env::var("DEVICE") {
            Ok(value) => value.parse()?,
            Err(_) => DevicePreference::Auto,
        };

        let load_timeout_ms = env::var("LOAD_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(120_000);

        let inference_timeout_ms = env::var("INFERENCE_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10_000);

        let otel_endpoint = env::var("OTEL_ENDPOINT").ok().filter(|s| !s.is_empty());

        Ok(Self {
            environment,
            model_path,
            labels_path,
            device,
            load_timeout_ms,
            inference_timeout_ms,
            otel_endpoint,
        })
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.inference_timeout_ms)
    }

    pub fn with_paths(
        mut self,
        model_path: impl Into<PathBuf>,
        labels_path: impl Into<PathBuf>,
    ) -> Self {
        self.model_path = model_path.into();
        self.labels_path = labels_path.into();
        self
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            labels_path: PathBuf::from(DEFAULT_LABELS_PATH),
            device: DevicePreference::Cpu,
            load_timeout_ms: 120_000,
            inference_timeout_ms: 10_000,
            otel_endpoint: None,
        }
    }
}
