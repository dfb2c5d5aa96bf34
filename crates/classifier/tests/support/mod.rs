#![allow(dead_code)]

//! Deterministic backends and fixtures for service tests.
//!
//! The fake "checkpoint" is a text file of whitespace-separated numbers, one
//! per head output, so a test controls the head width and the raw scores.

use candle_core::Device;
use classifier::{ClassifierBackend, ClassifierConfig, ClassifierError, ClassifierService};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use ndarray::{Array1, Array4, Axis};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

fn read_checkpoint(path: &Path, num_classes: usize) -> Result<Vec<f32>, ClassifierError> {
    let text = fs::read_to_string(path)
        .map_err(|e| ClassifierError::Format(format!("unreadable checkpoint: {}", e)))?;

    let values = text
        .split_whitespace()
        .map(str::parse::<f32>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ClassifierError::Format(format!("unrecognized checkpoint format: {}", e)))?;

    if values.len() != num_classes {
        return Err(ClassifierError::Format(format!(
            "head has {} outputs, checkpoint has {}",
            num_classes,
            values.len()
        )));
    }

    Ok(values)
}

fn check_input(input: &Array4<f32>) -> Result<(), ClassifierError> {
    if input.shape() != [1, 3, 300, 300] {
        return Err(ClassifierError::Inference(format!(
            "unexpected input shape {:?}",
            input.shape()
        )));
    }
    Ok(())
}

/// Returns the checkpoint's scores regardless of the image.
pub struct FixedLogitsBackend {
    logits: Vec<f32>,
}

impl ClassifierBackend for FixedLogitsBackend {
    fn load_model(
        checkpoint: &Path,
        num_classes: usize,
        _device: &Device,
    ) -> Result<Self, ClassifierError> {
        Ok(Self {
            logits: read_checkpoint(checkpoint, num_classes)?,
        })
    }

    fn num_classes(&self) -> usize {
        self.logits.len()
    }

    fn infer(&self, input: &Array4<f32>) -> Result<Array1<f32>, ClassifierError> {
        check_input(input)?;
        Ok(Array1::from_vec(self.logits.clone()))
    }
}

/// Score `i` is weight `i` times the mean of channel `i % 3`.
pub struct IntensityBackend {
    weights: Vec<f32>,
}

impl ClassifierBackend for IntensityBackend {
    fn load_model(
        checkpoint: &Path,
        num_classes: usize,
        _device: &Device,
    ) -> Result<Self, ClassifierError> {
        Ok(Self {
            weights: read_checkpoint(checkpoint, num_classes)?,
        })
    }

    fn num_classes(&self) -> usize {
        self.weights.len()
    }

    fn infer(&self, input: &Array4<f32>) -> Result<Array1<f32>, ClassifierError> {
        check_input(input)?;
        let channel_means: Vec<f32> = (0..3)
            .map(|c| input.index_axis(Axis(1), c).mean().unwrap_or(0.0))
            .collect();

        Ok(self
            .weights
            .iter()
            .enumerate()
            .map(|(i, w)| w * channel_means[i % 3])
            .collect())
    }
}

pub const SLOW_INFER: Duration = Duration::from_millis(300);

/// Fixed scores, but every forward pass takes [`SLOW_INFER`].
pub struct SlowBackend {
    inner: FixedLogitsBackend,
}

impl ClassifierBackend for SlowBackend {
    fn load_model(
        checkpoint: &Path,
        num_classes: usize,
        device: &Device,
    ) -> Result<Self, ClassifierError> {
        Ok(Self {
            inner: FixedLogitsBackend::load_model(checkpoint, num_classes, device)?,
        })
    }

    fn num_classes(&self) -> usize {
        self.inner.num_classes()
    }

    fn infer(&self, input: &Array4<f32>) -> Result<Array1<f32>, ClassifierError> {
        thread::sleep(SLOW_INFER);
        self.inner.infer(input)
    }
}

/// Counts how many times a checkpoint was actually read.
pub static COUNTING_LOADS: AtomicUsize = AtomicUsize::new(0);

pub struct CountingBackend {
    inner: FixedLogitsBackend,
}

impl ClassifierBackend for CountingBackend {
    fn load_model(
        checkpoint: &Path,
        num_classes: usize,
        device: &Device,
    ) -> Result<Self, ClassifierError> {
        COUNTING_LOADS.fetch_add(1, Ordering::SeqCst);
        // Widen the window for racing loaders
        thread::sleep(Duration::from_millis(50));
        Ok(Self {
            inner: FixedLogitsBackend::load_model(checkpoint, num_classes, device)?,
        })
    }

    fn num_classes(&self) -> usize {
        self.inner.num_classes()
    }

    fn infer(&self, input: &Array4<f32>) -> Result<Array1<f32>, ClassifierError> {
        self.inner.infer(input)
    }
}

pub const VN_LABELS: [&str; 3] = ["pho", "banh_mi", "goi_cuon"];
pub const VN_LOGITS: [f32; 3] = [0.1, 5.2, 0.3];

/// Write `labels.txt` and `food_model.pth` into `dir`.
pub fn write_fixture(dir: &Path, labels: &[&str], scores: &[f32]) -> (PathBuf, PathBuf) {
    let model_path = dir.join("food_model.pth");
    let labels_path = dir.join("labels.txt");

    fs::write(&labels_path, labels.join("\n")).unwrap();
    write_checkpoint(&model_path, scores);

    (model_path, labels_path)
}

pub fn write_checkpoint(path: &Path, scores: &[f32]) {
    let text = scores
        .iter()
        .map(f32::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    fs::write(path, text).unwrap();
}

pub fn service<B: ClassifierBackend>(
    model_path: &Path,
    labels_path: &Path,
) -> ClassifierService<B> {
    let config = ClassifierConfig::default().with_paths(model_path, labels_path);
    ClassifierService::with_device(&config, Device::Cpu)
}

pub fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    encode(width, height, color, ImageFormat::Png)
}

pub fn jpeg_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    encode(width, height, color, ImageFormat::Jpeg)
}

fn encode(width: u32, height: u32, color: [u8; 3], format: ImageFormat) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb(color));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), format)
        .unwrap();
    bytes
}

pub fn expected_softmax(scores: &[f32], index: usize) -> f32 {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let sum: f32 = scores.iter().map(|s| (s - max).exp()).sum();
    (scores[index] - max).exp() / sum
}
