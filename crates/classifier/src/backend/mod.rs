use crate::error::ClassifierError;
use candle_core::Device;
use ndarray::{Array1, Array4};
use std::path::Path;

pub mod efficientnet;

/// A network that maps a normalised image tensor to raw class scores.
///
/// Implementations must be safe to call concurrently once loaded: `infer`
/// takes `&self` and must not mutate shared buffers.
pub trait ClassifierBackend: Send + Sync + Sized {
    /// Build the network with a head of exactly `num_classes` outputs and load
    /// the checkpoint onto `device`. Any mismatch between checkpoint and
    /// architecture is an error, never a partial load.
    fn load_model(
        checkpoint: &Path,
        num_classes: usize,
        device: &Device,
    ) -> Result<Self, ClassifierError>;

    /// Output width of the classifier head.
    fn num_classes(&self) -> usize;

    /// Raw scores (logits) for a `[1, 3, H, W]` input.
    fn infer(&self, input: &Array4<f32>) -> Result<Array1<f32>, ClassifierError>;
}
