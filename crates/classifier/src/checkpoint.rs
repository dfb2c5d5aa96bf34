//! Checkpoint layout resolution.
//!
//! Training scripts save weights in one of three shapes: a wrapper dict with
//! a `model_state_dict` entry, a wrapper dict with a `state_dict` entry, or
//! the bare name → tensor mapping. Layouts are tried in [`CheckpointLayout::PRIORITY`]
//! order and the first one whose mapping contains a known probe tensor wins.

use crate::error::ClassifierError;
use candle_core::pickle::PthTensors;
use std::collections::HashSet;
use std::fmt;
use std::hash::BuildHasher;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointLayout {
    ModelStateDict,
    StateDict,
    Raw,
}

impl CheckpointLayout {
    pub const PRIORITY: [CheckpointLayout; 3] = [
        CheckpointLayout::ModelStateDict,
        CheckpointLayout::StateDict,
        CheckpointLayout::Raw,
    ];

    /// Top-level key holding the weights, `None` for a bare mapping.
    pub fn key(self) -> Option<&'static str> {
        match self {
            CheckpointLayout::ModelStateDict => Some("model_state_dict"),
            CheckpointLayout::StateDict => Some("state_dict"),
            CheckpointLayout::Raw => None,
        }
    }
}

impl fmt::Display for CheckpointLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key() {
            Some(key) => write!(f, "'{}' wrapper", key),
            None => write!(f, "bare state dict"),
        }
    }
}

/// Name → tensor mapping extracted from a checkpoint.
pub trait WeightMap {
    fn contains(&self, name: &str) -> bool;
}

impl WeightMap for PthTensors {
    fn contains(&self, name: &str) -> bool {
        self.tensor_infos().contains_key(name)
    }
}

impl<S: BuildHasher> WeightMap for HashSet<String, S> {
    fn contains(&self, name: &str) -> bool {
        HashSet::contains(self, name)
    }
}

pub trait CheckpointSource {
    type Weights: WeightMap;

    /// Mapping stored under `key`, or the top-level object when `key` is
    /// `None`. `None` when that object cannot be read as a weight mapping.
    fn extract(&self, key: Option<&str>) -> Option<Self::Weights>;

    fn describe(&self) -> String;
}

/// Return the first layout, in priority order, whose mapping contains `probe`.
pub fn resolve<S: CheckpointSource>(
    source: &S,
    probe: &str,
) -> Result<(CheckpointLayout, S::Weights), ClassifierError> {
    for layout in CheckpointLayout::PRIORITY {
        match source.extract(layout.key()) {
            Some(weights) if weights.contains(probe) => {
                tracing::debug!(%layout, checkpoint = %source.describe(), "Checkpoint layout resolved");
                return Ok((layout, weights));
            }
            Some(_) => {
                tracing::trace!(%layout, probe, "Mapping does not contain probe tensor");
            }
            None => {
                tracing::trace!(%layout, "Layout not applicable");
            }
        }
    }

    Err(ClassifierError::Format(format!(
        "unrecognized checkpoint format in {}: expected a state dict, optionally wrapped under 'model_state_dict' or 'state_dict', containing '{}'",
        source.describe(),
        probe
    )))
}

/// PyTorch `torch.save` archive on disk.
pub struct PthCheckpoint {
    path: PathBuf,
}

impl PthCheckpoint {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl CheckpointSource for PthCheckpoint {
    type Weights = PthTensors;

    fn extract(&self, key: Option<&str>) -> Option<PthTensors> {
        match PthTensors::new(&self.path, key) {
            Ok(tensors) => Some(tensors),
            Err(e) => {
                tracing::debug!(path = %self.path.display(), key, error = %e, "Checkpoint read failed");
                None
            }
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
