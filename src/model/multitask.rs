//! Multi-Task Leaf Classifier
//!
//! One shared convolutional backbone feeds two classification heads: disease
//! type (N classes) and severity (4 ordinal classes). Both outputs come from a
//! single feature extraction pass.
//!
//! ```text
//! image [B,3,S,S]
//!   -> block1..block4   conv3x3 + GroupNorm + ReLU + maxpool 2x2
//!   -> top_conv         conv1x1 + GroupNorm + ReLU        [B,C,S/16,S/16]
//!   -> global average pool -> dropout
//!   -> disease_head [B,N]   severity_head [B,4]
//! ```
//!
//! GroupNorm carries no batch statistics, so the only difference between a
//! training pass and an inference pass is dropout, which is selected
//! explicitly with [`ForwardMode`] rather than inferred from the backend.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        GroupNorm, GroupNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Distribution, Tensor},
};

use crate::utils::error::{DiagnosisError, ResultExt};
use crate::SEVERITY_CLASSES;

/// Tap points usable by [`MultiTaskClassifier::forward_until`], in network order
pub const LAYER_NAMES: [&str; 5] = ["block1", "block2", "block3", "block4", "top_conv"];

/// Number of 2x2 pooling stages in the backbone
const DOWNSAMPLE_STAGES: u32 = 4;

/// Architecture of the multi-task classifier, persisted with the weights
#[derive(Config, Debug, PartialEq)]
pub struct MultiTaskClassifierConfig {
    /// Number of disease classes (from the label vocabulary)
    pub num_diseases: usize,

    /// Number of severity classes
    #[config(default = "4")]
    pub num_severities: usize,

    /// Input image size (square)
    #[config(default = "256")]
    pub input_size: usize,

    /// Number of input channels (3 for RGB)
    #[config(default = "3")]
    pub in_channels: usize,

    /// Base number of convolutional filters
    #[config(default = "32")]
    pub base_filters: usize,

    /// Dropout rate after global pooling
    #[config(default = "0.3")]
    pub dropout_rate: f64,
}

impl MultiTaskClassifierConfig {
    /// Reject impossible architectures before any weights are allocated
    pub fn validate(&self) -> crate::Result<()> {
        if self.num_diseases == 0 {
            return Err(DiagnosisError::Config(
                "model needs at least one disease class".to_string(),
            ));
        }
        if self.num_severities != SEVERITY_CLASSES {
            return Err(DiagnosisError::Config(format!(
                "severity head must have {} classes, got {}",
                SEVERITY_CLASSES, self.num_severities
            )));
        }
        let stride = 1usize << DOWNSAMPLE_STAGES;
        if self.input_size == 0 || self.input_size % stride != 0 {
            return Err(DiagnosisError::Config(format!(
                "input size {} must be a positive multiple of {}",
                self.input_size, stride
            )));
        }
        if self.in_channels == 0 || self.base_filters == 0 {
            return Err(DiagnosisError::Config(
                "channel counts must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(DiagnosisError::Config(format!(
                "dropout rate must be in [0, 1), got {}",
                self.dropout_rate
            )));
        }
        Ok(())
    }

    /// Validate and build the model
    pub fn init<B: Backend>(&self, device: &B::Device) -> crate::Result<MultiTaskClassifier<B>> {
        self.validate()?;
        Ok(MultiTaskClassifier::new(self, device))
    }

    /// Channels produced by the backbone
    pub fn feature_channels(&self) -> usize {
        self.base_filters * 8
    }

    /// Spatial size of the `top_conv` feature map
    pub fn feature_size(&self) -> usize {
        self.input_size >> DOWNSAMPLE_STAGES
    }
}

/// Whether dropout is active in the heads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardMode {
    /// Dropout disabled (evaluation, Grad-CAM)
    Deterministic,
    /// Dropout sampled (training, MC-dropout)
    Stochastic,
}

/// Raw head outputs, before softmax
#[derive(Debug, Clone)]
pub struct MultiTaskLogits<B: Backend> {
    /// [batch, num_diseases]
    pub disease: Tensor<B, 2>,
    /// [batch, 4]
    pub severity: Tensor<B, 2>,
}

/// Head probability distributions
#[derive(Debug, Clone)]
pub struct MultiTaskOutput<B: Backend> {
    /// [batch, num_diseases], rows sum to 1
    pub disease: Tensor<B, 2>,
    /// [batch, 4], rows sum to 1
    pub severity: Tensor<B, 2>,
}

impl<B: Backend> MultiTaskLogits<B> {
    /// The single place logits become probabilities
    pub fn into_probabilities(self) -> MultiTaskOutput<B> {
        MultiTaskOutput {
            disease: softmax(self.disease, 1),
            severity: softmax(self.severity, 1),
        }
    }
}

/// Conv + GroupNorm + ReLU with optional 2x2 max-pool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub norm: GroupNorm<B>,
    pub relu: Relu,
    pub pool: Option<MaxPool2d>,
}

/// Largest group count in {8, 4, 2, 1} that divides `channels`
fn group_count(channels: usize) -> usize {
    [8, 4, 2, 1]
        .into_iter()
        .find(|g| channels % g == 0)
        .unwrap_or(1)
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        with_pool: bool,
        device: &B::Device,
    ) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        let norm = GroupNormConfig::new(group_count(out_channels), out_channels).init(device);
        let pool = with_pool.then(|| MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init());

        Self {
            conv,
            norm,
            relu: Relu::new(),
            pool,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.norm.forward(x);
        let x = self.relu.forward(x);

        match &self.pool {
            Some(pool) => pool.forward(x),
            None => x,
        }
    }
}

/// Shared-backbone classifier with a disease head and a severity head
#[derive(Module, Debug)]
pub struct MultiTaskClassifier<B: Backend> {
    pub block1: ConvBlock<B>,
    pub block2: ConvBlock<B>,
    pub block3: ConvBlock<B>,
    pub block4: ConvBlock<B>,
    pub top_conv: ConvBlock<B>,

    pub global_pool: AdaptiveAvgPool2d,

    pub disease_head: Linear<B>,
    pub severity_head: Linear<B>,

    dropout_rate: f64,
    num_diseases: usize,
}

impl<B: Backend> MultiTaskClassifier<B> {
    /// Build from an already validated config; prefer [`MultiTaskClassifierConfig::init`]
    pub fn new(config: &MultiTaskClassifierConfig, device: &B::Device) -> Self {
        let base = config.base_filters;

        Self {
            block1: ConvBlock::new(config.in_channels, base, 3, true, device),
            block2: ConvBlock::new(base, base * 2, 3, true, device),
            block3: ConvBlock::new(base * 2, base * 4, 3, true, device),
            block4: ConvBlock::new(base * 4, base * 8, 3, true, device),
            top_conv: ConvBlock::new(base * 8, config.feature_channels(), 1, false, device),
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            disease_head: LinearConfig::new(config.feature_channels(), config.num_diseases)
                .init(device),
            severity_head: LinearConfig::new(config.feature_channels(), config.num_severities)
                .init(device),
            dropout_rate: config.dropout_rate,
            num_diseases: config.num_diseases,
        }
    }

    pub fn num_diseases(&self) -> usize {
        self.num_diseases
    }

    pub fn dropout_rate(&self) -> f64 {
        self.dropout_rate
    }

    /// Same weights, different dropout rate for the stochastic mode
    pub fn with_dropout_rate(mut self, rate: f64) -> Self {
        self.dropout_rate = rate;
        self
    }

    fn stage(&self, index: usize) -> &ConvBlock<B> {
        match index {
            0 => &self.block1,
            1 => &self.block2,
            2 => &self.block3,
            3 => &self.block4,
            _ => &self.top_conv,
        }
    }

    /// Position of a named tap point
    pub fn layer_index(layer: &str) -> crate::Result<usize> {
        LAYER_NAMES.iter().position(|&name| name == layer).with_context(|| {
            format!("unknown layer '{}', expected one of: {}", layer, LAYER_NAMES.join(", "))
        })
    }

    /// Run the backbone up to and including `layer`
    pub fn forward_until(&self, x: Tensor<B, 4>, layer: &str) -> crate::Result<Tensor<B, 4>> {
        let end = Self::layer_index(layer)?;
        Ok((0..=end).fold(x, |x, i| self.stage(i).forward(x)))
    }

    /// Continue the backbone from the output of `layer`
    pub fn forward_from(&self, x: Tensor<B, 4>, layer: &str) -> crate::Result<Tensor<B, 4>> {
        let start = Self::layer_index(layer)? + 1;
        Ok((start..LAYER_NAMES.len()).fold(x, |x, i| self.stage(i).forward(x)))
    }

    /// Backbone feature maps `[B, C, S/16, S/16]`
    pub fn forward_features(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        (0..LAYER_NAMES.len()).fold(x, |x, i| self.stage(i).forward(x))
    }

    /// Pool, (maybe) drop out, and run both heads
    pub fn forward_heads(&self, features: Tensor<B, 4>, mode: ForwardMode) -> MultiTaskLogits<B> {
        let pooled = self.global_pool.forward(features);
        let [batch_size, channels, _, _] = pooled.dims();
        let pooled = pooled.reshape([batch_size, channels]);
        let pooled = self.dropout(pooled, mode);

        MultiTaskLogits {
            disease: self.disease_head.forward(pooled.clone()),
            severity: self.severity_head.forward(pooled),
        }
    }

    /// Full pass to logits
    pub fn forward_logits(&self, x: Tensor<B, 4>, mode: ForwardMode) -> MultiTaskLogits<B> {
        self.forward_heads(self.forward_features(x), mode)
    }

    /// Deterministic probabilities for both tasks
    pub fn predict(&self, x: Tensor<B, 4>) -> MultiTaskOutput<B> {
        self.forward_logits(x, ForwardMode::Deterministic)
            .into_probabilities()
    }

    /// Inverted dropout with an explicit mode
    fn dropout(&self, x: Tensor<B, 2>, mode: ForwardMode) -> Tensor<B, 2> {
        if mode == ForwardMode::Deterministic || self.dropout_rate <= 0.0 {
            return x;
        }
        let keep = 1.0 - self.dropout_rate;
        let mask = x.random_like(Distribution::Bernoulli(keep));
        x.mul(mask).div_scalar(keep)
    }
}
