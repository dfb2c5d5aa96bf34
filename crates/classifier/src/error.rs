use preprocess::PreprocessError;
use std::time::Duration;
use thiserror::Error;

/// Failure kinds of the classifier.
///
/// `Configuration` and `Format` are fatal to a load, `Decode` and `Inference`
/// only to the prediction that raised them. None of them escape the boolean /
/// sentinel boundary of [`crate::ClassifierService::load`] and
/// [`crate::ClassifierService::predict`].
#[derive(Error, Debug)]
pub enum ClassifierError {
    /// Labels file missing or empty, model file missing.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Checkpoint layout not recognized, or weights do not fit the network.
    #[error("Checkpoint format error: {0}")]
    Format(String),

    #[error("Image decode error: {0}")]
    Decode(#[source] PreprocessError),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Inference timed out after {0:?}")]
    Timeout(Duration),
}

impl ClassifierError {
    /// Stable name used in logs and as a metric attribute.
    pub fn kind(&self) -> &'static str {
        match self {
            ClassifierError::Configuration(_) => "configuration",
            ClassifierError::Format(_) => "format",
            ClassifierError::Decode(_) => "decode",
            ClassifierError::Inference(_) => "inference",
            ClassifierError::Timeout(_) => "timeout",
        }
    }
}

impl From<PreprocessError> for ClassifierError {
    fn from(e: PreprocessError) -> Self {
        match e {
            PreprocessError::EmptyInput
            | PreprocessError::Decode(_)
            | PreprocessError::InvalidDimensions { .. } => ClassifierError::Decode(e),
            other => ClassifierError::Inference(other.to_string()),
        }
    }
}

impl From<candle_core::Error> for ClassifierError {
    fn from(e: candle_core::Error) -> Self {
        ClassifierError::Inference(e.to_string())
    }
}
