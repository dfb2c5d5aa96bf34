use crate::error::ClassifierError;
use std::fs;
use std::io;
use std::path::Path;

/// Ordered class names; position `i` names output `i` of the network head.
///
/// Never empty. The label count fixes the width of the classifier head, so
/// labels are always read before the network is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels(Vec<String>);

impl Labels {
    /// Parse newline-delimited labels, trimming whitespace and skipping blank
    /// lines. Returns `None` when nothing is left.
    pub fn parse(contents: &str) -> Option<Self> {
        let labels: Vec<String> = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect();

        if labels.is_empty() {
            None
        } else {
            Some(Self(labels))
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ClassifierError> {
        let contents = fs::read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                ClassifierError::Configuration(format!("labels file not found: {}", path.display()))
            }
            _ => ClassifierError::Configuration(format!(
                "failed to read labels file {}: {}",
                path.display(),
                e
            )),
        })?;

        Self::parse(&contents).ok_or_else(|| {
            ClassifierError::Configuration(format!("labels file is empty: {}", path.display()))
        })
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.0.iter().any(|l| l == label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}
