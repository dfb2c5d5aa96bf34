//! Food image classifier.
//!
//! Loads an EfficientNet-B3 checkpoint and its label table, and turns raw
//! image bytes into a `(label, confidence)` [`Prediction`]. Failures never
//! escape [`ClassifierService::load`] or [`ClassifierService::predict`]; they
//! are logged and reported as `false` or [`Prediction::unrecognized`].

pub mod backend;
pub mod checkpoint;
pub mod config;
pub mod device;
pub mod error;
pub mod labels;
pub mod logging;
pub mod postprocessing;
pub mod recognition;
pub mod service;

pub use backend::{ClassifierBackend, efficientnet::EfficientNetBackend};
pub use config::ClassifierConfig;
pub use device::DevicePreference;
pub use error::ClassifierError;
pub use labels::Labels;
pub use postprocessing::Prediction;
pub use recognition::{FoodLookup, MealRecognition, recognize};
pub use service::{ClassifierService, LoadedModel, PredictionStats};
