//! EfficientNet-B3 food classifier on candle.
//!
//! The network mirrors torchvision's `efficientnet_b3` so that its state dict
//! loads by name: symmetric `(k - 1) / 2` convolution padding, batch norm with
//! `eps = 1e-5`, SiLU activations and squeeze-excitation inside every MBConv
//! block. Tensor names follow the torchvision module tree (`features.*`,
//! `features.N.M.block.*`, `classifier.1.*`).
//!
//! The head follows the training script: `Dropout(p=0.3)` then
//! `Linear(1536, num_classes)`, i.e. a `Sequential` whose linear layer lives
//! at index 1. Dropout holds no weights and is an identity at inference, but
//! its slot is why the head tensors are named `classifier.1.*`.

use super::ClassifierBackend;
use crate::checkpoint::{self, PthCheckpoint};
use crate::error::ClassifierError;
use candle_core::pickle::PthTensors;
use candle_core::{D, DType, Device, Tensor};
use candle_nn::{
    BatchNorm, Conv2d, Conv2dConfig, Linear, Module, VarBuilder, batch_norm, conv2d,
    conv2d_no_bias, linear,
};
use common::span;
use ndarray::{Array1, Array4};
use std::path::Path;

/// Width of the pooled EfficientNet-B3 features.
pub const FEATURE_DIM: usize = 1536;
/// Training-time dropout in front of the head linear layer.
pub const HEAD_DROPOUT: f32 = 0.3;
/// Head weight, used to recognize a usable state dict.
pub const HEAD_WEIGHT: &str = "classifier.1.weight";
/// `nn.BatchNorm2d` default.
pub const BN_EPS: f64 = 1e-5;

const WIDTH_MULT: f64 = 1.2;
const DEPTH_MULT: f64 = 1.4;
const STEM_CHANNELS: usize = 32;

// B0 stages: expand ratio, kernel, stride, in channels, out channels, layers
const B0_STAGES: [(usize, usize, usize, usize, usize, usize); 7] = [
    (1, 3, 1, 32, 16, 1),
    (6, 3, 2, 16, 24, 2),
    (6, 5, 2, 24, 40, 2),
    (6, 3, 2, 40, 80, 3),
    (6, 5, 1, 80, 112, 3),
    (6, 5, 2, 112, 192, 4),
    (6, 3, 1, 192, 320, 1),
];

/// One stage of MBConv blocks after width and depth scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageConfig {
    pub expand_ratio: usize,
    pub kernel: usize,
    pub stride: usize,
    pub in_channels: usize,
    pub out_channels: usize,
    pub num_layers: usize,
}

/// Round `value` to the nearest multiple of `divisor`, never going more than
/// 10% below it.
fn make_divisible(value: f64, divisor: usize) -> usize {
    let divisor = divisor as f64;
    let steps = ((value + divisor / 2.0) / divisor).floor();
    let rounded = (steps * divisor).max(divisor);
    if rounded < 0.9 * value {
        (rounded + divisor) as usize
    } else {
        rounded as usize
    }
}

fn scale_channels(channels: usize) -> usize {
    make_divisible(channels as f64 * WIDTH_MULT, 8)
}

fn scale_depth(layers: usize) -> usize {
    (layers as f64 * DEPTH_MULT).ceil() as usize
}

pub fn b3_stages() -> Vec<StageConfig> {
    B0_STAGES
        .iter()
        .map(|&(expand_ratio, kernel, stride, in_c, out_c, layers)| StageConfig {
            expand_ratio,
            kernel,
            stride,
            in_channels: scale_channels(in_c),
            out_channels: scale_channels(out_c),
            num_layers: scale_depth(layers),
        })
        .collect()
}

/// Conv (no bias) → BatchNorm → optional SiLU, stored as `{0, 1}` children.
struct ConvNormActivation {
    conv: Conv2d,
    bn: BatchNorm,
    activation: bool,
}

impl ConvNormActivation {
    fn new(
        vb: VarBuilder,
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        groups: usize,
        activation: bool,
    ) -> candle_core::Result<Self> {
        let config = Conv2dConfig {
            padding: (kernel - 1) / 2,
            stride,
            groups,
            ..Default::default()
        };
        let conv = conv2d_no_bias(in_channels, out_channels, kernel, config, vb.pp("0"))?;
        let bn = batch_norm(out_channels, BN_EPS, vb.pp("1"))?;
        Ok(Self {
            conv,
            bn,
            activation,
        })
    }
}

impl Module for ConvNormActivation {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let xs = xs.apply(&self.conv)?.apply_t(&self.bn, false)?;
        if self.activation { xs.silu() } else { Ok(xs) }
    }
}

struct SqueezeExcitation {
    fc1: Conv2d,
    fc2: Conv2d,
}

impl SqueezeExcitation {
    fn new(vb: VarBuilder, channels: usize, squeeze: usize) -> candle_core::Result<Self> {
        let config = Conv2dConfig::default();
        Ok(Self {
            fc1: conv2d(channels, squeeze, 1, config, vb.pp("fc1"))?,
            fc2: conv2d(squeeze, channels, 1, config, vb.pp("fc2"))?,
        })
    }
}

impl Module for SqueezeExcitation {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let scale = xs
            .mean_keepdim(D::Minus1)?
            .mean_keepdim(D::Minus2)?
            .apply(&self.fc1)?
            .silu()?
            .apply(&self.fc2)?;
        xs.broadcast_mul(&candle_nn::ops::sigmoid(&scale)?)
    }
}

/// Inverted residual block. Stochastic depth is an identity at inference.
struct MBConv {
    expand: Option<ConvNormActivation>,
    depthwise: ConvNormActivation,
    squeeze_excitation: SqueezeExcitation,
    project: ConvNormActivation,
    residual: bool,
}

impl MBConv {
    fn new(
        vb: VarBuilder,
        stage: &StageConfig,
        in_channels: usize,
        stride: usize,
    ) -> candle_core::Result<Self> {
        let vb = vb.pp("block");
        let expanded = make_divisible((in_channels * stage.expand_ratio) as f64, 8);

        let mut index = 0;
        let expand = if expanded != in_channels {
            index += 1;
            Some(ConvNormActivation::new(
                vb.pp(0),
                in_channels,
                expanded,
                1,
                1,
                1,
                true,
            )?)
        } else {
            None
        };
        let depthwise = ConvNormActivation::new(
            vb.pp(index),
            expanded,
            expanded,
            stage.kernel,
            stride,
            expanded,
            true,
        )?;
        let squeeze_excitation =
            SqueezeExcitation::new(vb.pp(index + 1), expanded, (in_channels / 4).max(1))?;
        let project = ConvNormActivation::new(
            vb.pp(index + 2),
            expanded,
            stage.out_channels,
            1,
            1,
            1,
            false,
        )?;

        Ok(Self {
            expand,
            depthwise,
            squeeze_excitation,
            project,
            residual: stride == 1 && in_channels == stage.out_channels,
        })
    }
}

impl Module for MBConv {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let ys = match &self.expand {
            Some(expand) => xs.apply(expand)?,
            None => xs.clone(),
        };
        let ys = ys
            .apply(&self.depthwise)?
            .apply(&self.squeeze_excitation)?
            .apply(&self.project)?;
        if self.residual { ys + xs } else { Ok(ys) }
    }
}

pub struct EfficientNetB3 {
    stem: ConvNormActivation,
    blocks: Vec<MBConv>,
    head_conv: ConvNormActivation,
    classifier: Linear,
}

impl EfficientNetB3 {
    /// Every tensor is fetched and shape-checked here, so a missing or
    /// mis-shaped weight fails the build rather than a later forward pass.
    pub fn new(vb: VarBuilder, num_classes: usize) -> candle_core::Result<Self> {
        let features = vb.pp("features");
        let stages = b3_stages();

        let stem_channels = scale_channels(STEM_CHANNELS);
        let stem = ConvNormActivation::new(features.pp(0), 3, stem_channels, 3, 2, 1, true)?;

        let mut blocks = Vec::new();
        for (s, stage) in stages.iter().enumerate() {
            let stage_vb = features.pp(s + 1);
            for i in 0..stage.num_layers {
                let (in_channels, stride) = if i == 0 {
                    (stage.in_channels, stage.stride)
                } else {
                    (stage.out_channels, 1)
                };
                blocks.push(MBConv::new(stage_vb.pp(i), stage, in_channels, stride)?);
            }
        }

        let last_channels = stages.last().map_or(stem_channels, |s| s.out_channels);
        let head_conv = ConvNormActivation::new(
            features.pp(stages.len() + 1),
            last_channels,
            4 * last_channels,
            1,
            1,
            1,
            true,
        )?;
        let classifier = linear(4 * last_channels, num_classes, vb.pp("classifier.1"))?;

        Ok(Self {
            stem,
            blocks,
            head_conv,
            classifier,
        })
    }
}

impl Module for EfficientNetB3 {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let mut xs = xs.apply(&self.stem)?;
        for block in &self.blocks {
            xs = xs.apply(block)?;
        }
        xs.apply(&self.head_conv)?
            .mean(D::Minus1)?
            .mean(D::Minus1)?
            .apply(&self.classifier)
    }
}

pub struct EfficientNetBackend {
    model: EfficientNetB3,
    device: Device,
    num_classes: usize,
}

impl EfficientNetBackend {
    /// Build from any weight source, e.g. an in-memory tensor map.
    pub fn from_var_builder(
        vb: VarBuilder,
        num_classes: usize,
        device: &Device,
    ) -> Result<Self, ClassifierError> {
        let model = EfficientNetB3::new(vb, num_classes).map_err(|e| {
            ClassifierError::Format(format!("weights do not match EfficientNet-B3: {}", e))
        })?;

        tracing::debug!(
            num_classes,
            feature_dim = FEATURE_DIM,
            head_dropout = HEAD_DROPOUT,
            "EfficientNet-B3 built"
        );

        Ok(Self {
            model,
            device: device.clone(),
            num_classes,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

/// Reject a head that was trained for a different label count before
/// building the rest of the network.
pub fn validate_head_dims(dims: &[usize], num_classes: usize) -> Result<(), ClassifierError> {
    if dims == [num_classes, FEATURE_DIM] {
        return Ok(());
    }
    Err(ClassifierError::Format(format!(
        "'{}' has shape {:?}, expected [{}, {}] for {} labels",
        HEAD_WEIGHT, dims, num_classes, FEATURE_DIM, num_classes
    )))
}

fn head_dims(tensors: &PthTensors) -> Vec<usize> {
    tensors
        .tensor_infos()
        .get(HEAD_WEIGHT)
        .map(|info| info.layout.shape().dims().to_vec())
        .unwrap_or_default()
}

impl ClassifierBackend for EfficientNetBackend {
    fn load_model(
        checkpoint: &Path,
        num_classes: usize,
        device: &Device,
    ) -> Result<Self, ClassifierError> {
        let _s = span!("load_efficientnet");

        let (layout, tensors) =
            checkpoint::resolve(&PthCheckpoint::new(checkpoint), HEAD_WEIGHT)?;
        tracing::info!(%layout, path = %checkpoint.display(), "Loading weights from checkpoint");

        validate_head_dims(&head_dims(&tensors), num_classes)?;

        let vb = VarBuilder::from_backend(Box::new(tensors), DType::F32, device.clone());
        Self::from_var_builder(vb, num_classes, device).map_err(|e| match e {
            ClassifierError::Format(msg) => {
                ClassifierError::Format(format!("checkpoint {}: {}", checkpoint.display(), msg))
            }
            other => other,
        })
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    // Weights are plain constant tensors, not `Var`s, so the forward pass
    // records no gradient graph and memory stays flat across calls.
    fn infer(&self, input: &Array4<f32>) -> Result<Array1<f32>, ClassifierError> {
        let (batch, channels, height, width) = input.dim();
        if batch != 1 || channels != 3 {
            return Err(ClassifierError::Inference(format!(
                "expected a [1, 3, H, W] input, got {:?}",
                input.shape()
            )));
        }

        let contiguous = input.as_standard_layout();
        let data = contiguous
            .as_slice()
            .ok_or_else(|| ClassifierError::Inference("input tensor is not contiguous".into()))?;

        let pixels = Tensor::from_slice(data, (batch, channels, height, width), &self.device)?;
        let logits = self
            .model
            .forward(&pixels)?
            .squeeze(0)?
            .to_dtype(DType::F32)?
            .to_vec1::<f32>()?;

        Ok(Array1::from_vec(logits))
    }
}
