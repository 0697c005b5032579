use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, LeakyRelu, LeakyReluConfig,
        PaddingConfig2d, Relu,
    },
    module::Param,
    prelude::*,
    tensor::activation,
};

use crate::model::stage::{same_padding, Activation, NormSpec, Stage};

fn numel<B: Backend, const D: usize>(param: &Param<Tensor<B, D>>) -> usize {
    param.val().shape().num_elements()
}

/// Gamma and beta only; the running statistics are not trained.
fn batch_norm_params<B: Backend>(bn: &Option<BatchNorm<B, 2>>) -> usize {
    bn.as_ref()
        .map_or(0, |bn| numel(&bn.gamma) + numel(&bn.beta))
}

fn batch_norm<B: Backend>(
    channels: usize,
    norm: Option<NormSpec>,
    device: &B::Device,
) -> Option<BatchNorm<B, 2>> {
    norm.map(|norm| {
        BatchNormConfig::new(channels)
            .with_momentum(norm.momentum)
            .with_epsilon(norm.epsilon)
            .init(device)
    })
}

/// Convolution with "same" padding, where the odd padding pixel lands on the
/// bottom and right edges.
#[derive(Module, Debug)]
pub struct SameConv2d<B: Backend> {
    conv: Conv2d<B>,
    kernel_size: usize,
    stride: usize,
}
impl<B: Backend> SameConv2d<B> {
    pub fn new(channels: [usize; 2], kernel_size: usize, stride: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new(channels, [kernel_size, kernel_size])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Valid)
            .init(device);

        Self {
            conv,
            kernel_size,
            stride,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, height, width] = input.dims();
        let (top, bottom) = same_padding(height, self.kernel_size, self.stride);
        let (left, right) = same_padding(width, self.kernel_size, self.stride);

        let input = if top + bottom + left + right > 0 {
            input.pad((left, right, top, bottom), 0.0)
        } else {
            input
        };

        self.conv.forward(input)
    }

    pub fn trainable_params(&self) -> usize {
        numel(&self.conv.weight) + self.conv.bias.as_ref().map_or(0, numel)
    }
}

/// Nearest-neighbour upsampling by an integer factor.
#[derive(Module, Debug, Clone)]
pub struct Upsample {
    factor: usize,
}
impl Upsample {
    pub fn new(factor: usize) -> Self {
        Self { factor }
    }

    pub fn forward<B: Backend>(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        if self.factor == 1 {
            return input;
        }
        let [batch_size, channels, height, width] = input.dims();
        let factor = self.factor;

        // [B, C, H, W] -> [B, C, H, 1, W, 1] -> [B, C, H, f, W, f]
        let expanded = input
            .reshape([batch_size, channels, height, 1, width, 1])
            .repeat_dim(3, factor)
            .repeat_dim(5, factor);

        expanded.reshape([batch_size, channels, height * factor, width * factor])
    }
}

/// Conv - [BN] - LeakyReLU
#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    conv: SameConv2d<B>,
    bn: Option<BatchNorm<B, 2>>,
    lrelu: LeakyRelu,
}
impl<B: Backend> EncoderBlock<B> {
    pub fn new(stage: &Stage, device: &B::Device) -> Self {
        let slope = match stage.activation {
            Activation::LeakyRelu { slope } => slope,
            _ => 0.0,
        };
        let conv = SameConv2d::new(
            [stage.in_channels, stage.filters],
            stage.kernel_size,
            stage.stride,
            device,
        );
        let bn = batch_norm(stage.filters, stage.norm, device);
        let lrelu = LeakyReluConfig::new().with_negative_slope(slope).init();

        Self { conv, bn, lrelu }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self.conv.forward(input);
        let output = match &self.bn {
            Some(bn) => bn.forward(output),
            None => output,
        };
        self.lrelu.forward(output)
    }

    pub fn trainable_params(&self) -> usize {
        self.conv.trainable_params() + batch_norm_params(&self.bn)
    }
}

/// Upsample - Conv - BN - [Dropout] - [Concat skip] - ReLU
#[derive(Module, Debug)]
pub struct DecoderBlock<B: Backend> {
    upsample: Upsample,
    conv: SameConv2d<B>,
    bn: Option<BatchNorm<B, 2>>,
    dropout: Option<Dropout>,
    relu: Relu,
}
impl<B: Backend> DecoderBlock<B> {
    pub fn new(stage: &Stage, device: &B::Device) -> Self {
        let upsample = Upsample::new(stage.upsample);
        let conv = SameConv2d::new(
            [stage.in_channels, stage.filters],
            stage.kernel_size,
            stage.stride,
            device,
        );
        let bn = batch_norm(stage.filters, stage.norm, device);
        let dropout = stage.dropout.map(|prob| DropoutConfig::new(prob).init());
        let relu = Relu::new();

        Self {
            upsample,
            conv,
            bn,
            dropout,
            relu,
        }
    }

    fn pre_activation(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self.upsample.forward(input);
        let output = self.conv.forward(output);
        let output = match &self.bn {
            Some(bn) => bn.forward(output),
            None => output,
        };
        match &self.dropout {
            Some(dropout) => dropout.forward(output),
            None => output,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.relu.forward(self.pre_activation(input))
    }

    /// Concatenates `skip` after the block's own channels, before the ReLU.
    pub fn forward_with_skip(&self, input: Tensor<B, 4>, skip: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = Tensor::cat(vec![self.pre_activation(input), skip], 1);
        self.relu.forward(output)
    }

    pub fn trainable_params(&self) -> usize {
        self.conv.trainable_params() + batch_norm_params(&self.bn)
    }
}

/// [Upsample] - Conv - tanh
#[derive(Module, Debug)]
pub struct OutputBlock<B: Backend> {
    upsample: Option<Upsample>,
    conv: SameConv2d<B>,
}
impl<B: Backend> OutputBlock<B> {
    pub fn new(stage: &Stage, device: &B::Device) -> Self {
        let upsample = (stage.upsample > 1).then(|| Upsample::new(stage.upsample));
        let conv = SameConv2d::new(
            [stage.in_channels, stage.filters],
            stage.kernel_size,
            stage.stride,
            device,
        );

        Self { upsample, conv }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = match &self.upsample {
            Some(upsample) => upsample.forward(input),
            None => input,
        };
        let output = self.conv.forward(output);

        activation::tanh(output)
    }

    pub fn trainable_params(&self) -> usize {
        self.conv.trainable_params()
    }
}
