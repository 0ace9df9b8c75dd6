use burn::{
    nn::{
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Initializer, LeakyRelu,
        LeakyReluConfig, PaddingConfig2d, Relu, Tanh,
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
    },
    prelude::*,
};

use crate::model::constants::{CHANNELS, DOWN_STAGES, DROPOUT, INIT_STD, LEAKY_RELU_SLOPE};

// Keras-style batch norm: running stats keep 99% of their previous value.
const BN_MOMENTUM: f64 = 0.01;
const BN_EPSILON: f64 = 1e-3;

fn batch_norm<B: Backend>(features: usize, device: &B::Device) -> BatchNorm<B, 2> {
    BatchNormConfig::new(features)
        .with_momentum(BN_MOMENTUM)
        .with_epsilon(BN_EPSILON)
        .init(device)
}

/// Glorot-uniform for a 4x4 transposed convolution. burn's Xavier initializer
/// needs a fan-out that transposed convolutions do not supply.
fn glorot_uniform(channels: [usize; 2]) -> Initializer {
    let bound = (6.0 / (16 * (channels[0] + channels[1])) as f64).sqrt();
    Initializer::Uniform {
        min: -bound,
        max: bound,
    }
}

fn normal_init() -> Initializer {
    Initializer::Normal {
        mean: 0.0,
        std: INIT_STD,
    }
}

/// Strided 4x4 convolution that halves the spatial size.
#[derive(Module, Debug)]
pub struct DownBlock<B: Backend> {
    pub(crate) conv: Conv2d<B>,
    norm: Option<BatchNorm<B, 2>>,
    activation: LeakyRelu,
}

impl<B: Backend> DownBlock<B> {
    pub fn new(channels: [usize; 2], normalize: bool, slope: f64, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new(channels, [4, 4])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .with_initializer(Initializer::XavierUniform { gain: 1.0 })
                .init(device),
            norm: normalize.then(|| batch_norm(channels[1], device)),
            activation: LeakyReluConfig::new().with_negative_slope(slope).init(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(input);
        let x = match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        };
        self.activation.forward(x)
    }
}

/// Strided 4x4 transposed convolution that doubles the spatial size.
#[derive(Module, Debug)]
pub struct UpBlock<B: Backend> {
    conv: ConvTranspose2d<B>,
    norm: BatchNorm<B, 2>,
    dropout: Option<Dropout>,
    activation: Relu,
}

impl<B: Backend> UpBlock<B> {
    pub fn new(channels: [usize; 2], dropout: Option<f64>, device: &B::Device) -> Self {
        Self {
            conv: ConvTranspose2dConfig::new(channels, [4, 4])
                .with_stride([2, 2])
                .with_padding([1, 1])
                .with_bias(false)
                .with_initializer(glorot_uniform(channels))
                .init(device),
            norm: batch_norm(channels[1], device),
            dropout: dropout.map(|prob| DropoutConfig::new(prob).init()),
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(input);
        let x = self.norm.forward(x);
        let x = match &self.dropout {
            Some(dropout) => dropout.forward(x),
            None => x,
        };
        self.activation.forward(x)
    }
}

/// U-Net generator: noisy image in, dehazed image of the same shape out, values in [-1, 1].
#[derive(Module, Debug)]
pub struct GeneratorModel<B: Backend> {
    pub(crate) down: Vec<DownBlock<B>>,
    up: Vec<UpBlock<B>>,
    pub final_conv: ConvTranspose2d<B>,
    activation: Tanh,
}

#[derive(Config, Debug)]
pub struct GeneratorModelConfig {
    #[config(default = 64)]
    pub base_filters: usize,
    #[config(default = 512)]
    pub max_filters: usize,
    /// Number of decoder stages, counted from the innermost, that apply dropout.
    #[config(default = 3)]
    pub dropout_stages: usize,
    #[config(default = "DROPOUT")]
    pub dropout: f64,
    #[config(default = "LEAKY_RELU_SLOPE")]
    pub leaky_relu_slope: f64,
}

impl GeneratorModelConfig {
    /// Output channels of each encoder stage; doubles from `base_filters` up to `max_filters`.
    fn stage_filters(&self) -> Vec<usize> {
        (0..DOWN_STAGES)
            .map(|stage| (self.base_filters << stage).min(self.max_filters))
            .collect()
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> GeneratorModel<B> {
        let filters = self.stage_filters();

        let mut down = Vec::with_capacity(DOWN_STAGES);
        let mut channels = CHANNELS;
        for (stage, &out) in filters.iter().enumerate() {
            down.push(DownBlock::new(
                [channels, out],
                stage > 0,
                self.leaky_relu_slope,
                device,
            ));
            channels = out;
        }

        // Each decoder stage mirrors an encoder stage except the innermost one.
        let mut up = Vec::with_capacity(DOWN_STAGES - 1);
        for (stage, &out) in filters[..DOWN_STAGES - 1].iter().rev().enumerate() {
            let dropout = (stage < self.dropout_stages).then_some(self.dropout);
            up.push(UpBlock::new([channels, out], dropout, device));
            channels = out * 2; // skip concatenation
        }

        GeneratorModel {
            down,
            up,
            final_conv: ConvTranspose2dConfig::new([channels, CHANNELS], [4, 4])
                .with_stride([2, 2])
                .with_padding([1, 1])
                .with_initializer(normal_init())
                .init(device),
            activation: Tanh::new(),
        }
    }
}

impl<B: Backend> GeneratorModel<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = input;
        let mut skips = Vec::with_capacity(self.down.len());
        for block in &self.down {
            x = block.forward(x);
            skips.push(x.clone());
        }
        // The bottleneck output is already `x`.
        skips.pop();

        for (block, skip) in self.up.iter().zip(skips.into_iter().rev()) {
            x = block.forward(x);
            x = Tensor::cat(vec![x, skip], 1);
        }

        self.activation.forward(self.final_conv.forward(x))
    }
}

/// PatchGAN discriminator: scores every receptive-field patch of an (input, candidate) pair.
/// The output is raw logits.
#[derive(Module, Debug)]
pub struct DiscriminatorModel<B: Backend> {
    down: Vec<DownBlock<B>>,
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
    activation: LeakyRelu,
    pub score: Conv2d<B>,
}

#[derive(Config, Debug)]
pub struct DiscriminatorModelConfig {
    #[config(default = 64)]
    pub base_filters: usize,
    #[config(default = "LEAKY_RELU_SLOPE")]
    pub leaky_relu_slope: f64,
}

impl DiscriminatorModelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> DiscriminatorModel<B> {
        let base = self.base_filters;
        let down = vec![
            DownBlock::new([2 * CHANNELS, base], false, self.leaky_relu_slope, device), // 256 -> 128
            DownBlock::new([base, base * 2], true, self.leaky_relu_slope, device), // 128 -> 64
            DownBlock::new([base * 2, base * 4], true, self.leaky_relu_slope, device), // 64 -> 32
        ];

        DiscriminatorModel {
            down,
            // zero pad + valid conv: 32 -> 31
            conv: Conv2dConfig::new([base * 4, base * 8], [4, 4])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .with_initializer(normal_init())
                .init(device),
            norm: batch_norm(base * 8, device),
            activation: LeakyReluConfig::new()
                .with_negative_slope(self.leaky_relu_slope)
                .init(),
            // 31 -> 30
            score: Conv2dConfig::new([base * 8, 1], [4, 4])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_initializer(normal_init())
                .init(device),
        }
    }
}

impl<B: Backend> DiscriminatorModel<B> {
    pub fn forward(&self, input: Tensor<B, 4>, candidate: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = Tensor::cat(vec![input, candidate], 1);
        for block in &self.down {
            x = block.forward(x);
        }
        let x = self.conv.forward(x);
        let x = self.norm.forward(x);
        let x = self.activation.forward(x);
        self.score.forward(x)
    }
}

#[derive(Config, Debug)]
pub struct ModelConfig {
    pub generator: GeneratorModelConfig,
    pub discriminator: DiscriminatorModelConfig,
}

impl ModelConfig {
    pub fn init_generator<B: Backend>(&self, device: &B::Device) -> GeneratorModel<B> {
        self.generator.init(device)
    }

    pub fn init_discriminator<B: Backend>(&self, device: &B::Device) -> DiscriminatorModel<B> {
        self.discriminator.init(device)
    }
}
