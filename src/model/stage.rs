//! Data-driven description of a generator.
//!
//! A generator is an ordered table of [`Stage`]s. The network modules are built
//! from the table and the same table answers shape and parameter questions
//! without allocating any tensors.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::GeneratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageKind {
    /// Strided convolution that halves the resolution.
    Down,
    /// Nearest upsample by the encoder stride, then a stride 1 convolution.
    Up,
    /// Final projection to image channels.
    Output,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Down => write!(f, "down"),
            StageKind::Up => write!(f, "up"),
            StageKind::Output => write!(f, "output"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    LeakyRelu { slope: f64 },
    Relu,
    Tanh,
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Activation::LeakyRelu { slope } => write!(f, "leaky_relu({slope})"),
            Activation::Relu => write!(f, "relu"),
            Activation::Tanh => write!(f, "tanh"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormSpec {
    pub momentum: f64,
    pub epsilon: f64,
}

/// Encoder output concatenated onto a decoder stage before its activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Skip {
    /// Index of the source stage in the plan.
    pub source: usize,
    pub channels: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub name: String,
    pub kind: StageKind,
    pub in_channels: usize,
    pub filters: usize,
    pub kernel_size: usize,
    pub stride: usize,
    /// Nearest upsampling factor applied before the convolution. 1 is a no-op.
    pub upsample: usize,
    pub norm: Option<NormSpec>,
    pub dropout: Option<f64>,
    pub activation: Activation,
    pub skip: Option<Skip>,
}

impl Stage {
    /// Channels leaving the stage, skip concatenation included.
    pub fn out_channels(&self) -> usize {
        self.filters + self.skip.map_or(0, |skip| skip.channels)
    }

    /// Trainable parameters: conv weight and bias, batch norm gamma and beta.
    pub fn num_params(&self) -> usize {
        let conv = self.kernel_size * self.kernel_size * self.in_channels * self.filters
            + self.filters;
        let norm = if self.norm.is_some() {
            2 * self.filters
        } else {
            0
        };

        conv + norm
    }

    pub fn output_size(&self, height: usize, width: usize) -> [usize; 2] {
        let (height, width) = (height * self.upsample, width * self.upsample);

        [height.div_ceil(self.stride), width.div_ceil(self.stride)]
    }
}

/// Padding `(before, after)` that makes a convolution keep `ceil(size / stride)`
/// outputs. The odd pixel, if any, goes after.
pub fn same_padding(size: usize, kernel: usize, stride: usize) -> (usize, usize) {
    let out = size.div_ceil(stride);
    let total = ((out.saturating_sub(1)) * stride + kernel).saturating_sub(size);
    let before = total / 2;

    (before, total - before)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageShape {
    pub name: String,
    pub kind: StageKind,
    pub output: [usize; 4],
    pub params: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StagePlan {
    input_channels: usize,
    stages: Vec<Stage>,
}

impl StagePlan {
    pub fn new(input_channels: usize) -> Self {
        Self {
            input_channels,
            stages: Vec::new(),
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn input_channels(&self) -> usize {
        self.input_channels
    }

    pub fn output_channels(&self) -> usize {
        self.stages
            .last()
            .map_or(self.input_channels, Stage::out_channels)
    }

    pub fn encoder(&self) -> impl Iterator<Item = &Stage> {
        self.stages.iter().filter(|s| s.kind == StageKind::Down)
    }

    pub fn decoder(&self) -> impl Iterator<Item = &Stage> {
        self.stages.iter().filter(|s| s.kind == StageKind::Up)
    }

    pub fn output(&self) -> Option<&Stage> {
        self.stages.iter().find(|s| s.kind == StageKind::Output)
    }

    /// Product of the encoder strides. Input height and width must be
    /// multiples of it.
    pub fn downsampling_factor(&self) -> usize {
        self.encoder().map(|s| s.stride).product()
    }

    /// Product of the upsampling factors and the inverse of the non-encoder
    /// strides. Must equal [`Self::downsampling_factor`] for the output to
    /// come back at the input resolution.
    pub fn upsampling_factor(&self) -> usize {
        self.stages
            .iter()
            .filter(|s| s.kind != StageKind::Down)
            .map(|s| s.upsample / s.stride)
            .product()
    }

    pub fn num_params(&self) -> usize {
        self.stages.iter().map(Stage::num_params).sum()
    }

    /// Appends a strided convolution stage and returns its index.
    pub fn down(
        &mut self,
        name: impl Into<String>,
        filters: usize,
        kernel_size: usize,
        stride: usize,
        norm: Option<NormSpec>,
        slope: f64,
    ) -> Result<usize, GeneratorError> {
        self.push(Stage {
            name: name.into(),
            kind: StageKind::Down,
            in_channels: self.output_channels(),
            filters,
            kernel_size,
            stride,
            upsample: 1,
            norm,
            dropout: None,
            activation: Activation::LeakyRelu { slope },
            skip: None,
        })
    }

    /// Appends an upsampling stage. `skip_from` names the plan index whose
    /// output is concatenated on the channel axis before the activation.
    #[allow(clippy::too_many_arguments)]
    pub fn up(
        &mut self,
        name: impl Into<String>,
        filters: usize,
        kernel_size: usize,
        upsample: usize,
        norm: Option<NormSpec>,
        dropout: Option<f64>,
        skip_from: Option<usize>,
    ) -> Result<usize, GeneratorError> {
        let skip = skip_from
            .map(|source| match self.stages.get(source) {
                Some(stage) if stage.kind == StageKind::Down => Ok(Skip {
                    source,
                    channels: stage.out_channels(),
                }),
                _ => Err(GeneratorError::InvalidSkip { index: source }),
            })
            .transpose()?;

        self.push(Stage {
            name: name.into(),
            kind: StageKind::Up,
            in_channels: self.output_channels(),
            filters,
            kernel_size,
            stride: 1,
            upsample,
            norm,
            dropout,
            activation: Activation::Relu,
            skip,
        })
    }

    pub fn output_stage(
        &mut self,
        name: impl Into<String>,
        filters: usize,
        kernel_size: usize,
        upsample: usize,
    ) -> Result<usize, GeneratorError> {
        self.push(Stage {
            name: name.into(),
            kind: StageKind::Output,
            in_channels: self.output_channels(),
            filters,
            kernel_size,
            stride: 1,
            upsample,
            norm: None,
            dropout: None,
            activation: Activation::Tanh,
            skip: None,
        })
    }

    fn push(&mut self, stage: Stage) -> Result<usize, GeneratorError> {
        if stage.filters == 0 {
            return Err(GeneratorError::ZeroFilters { stage: stage.name });
        }
        if stage.kernel_size == 0 || stage.stride == 0 || stage.upsample == 0 {
            return Err(GeneratorError::InvalidGeometry {
                kernel: stage.kernel_size,
                stride: stage.stride,
                upsample: stage.upsample,
            });
        }
        if let Some(prob) = stage.dropout {
            if !(0.0..1.0).contains(&prob) {
                return Err(GeneratorError::InvalidDropout(prob));
            }
        }

        tracing::trace!(stage = %stage.name, kind = %stage.kind, "planned stage");
        self.stages.push(stage);
        Ok(self.stages.len() - 1)
    }

    pub fn check_input(&self, dims: [usize; 4]) -> Result<(), GeneratorError> {
        let [_, channels, height, width] = dims;

        if channels != self.input_channels {
            return Err(GeneratorError::ChannelMismatch {
                expected: self.input_channels,
                actual: channels,
            });
        }

        let factor = self.downsampling_factor();
        let upsampling = self.upsampling_factor();
        if upsampling != factor {
            return Err(GeneratorError::ResolutionMismatch {
                down: factor,
                up: upsampling,
            });
        }
        if height == 0 || width == 0 || height % factor != 0 || width % factor != 0 {
            return Err(GeneratorError::IndivisibleInput {
                height,
                width,
                factor,
            });
        }

        Ok(())
    }

    /// Output shape and parameter count of every stage for an input of `dims`.
    pub fn trace(&self, dims: [usize; 4]) -> Result<Vec<StageShape>, GeneratorError> {
        self.check_input(dims)?;

        let [batch, _, mut height, mut width] = dims;
        let mut shapes: Vec<StageShape> = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            [height, width] = stage.output_size(height, width);
            if let Some(skip) = stage.skip {
                let [_, _, skip_height, skip_width] = shapes[skip.source].output;
                if [skip_height, skip_width] != [height, width] {
                    return Err(GeneratorError::SkipMismatch {
                        stage: stage.name.clone(),
                        output: [height, width],
                        skip: [skip_height, skip_width],
                    });
                }
            }
            shapes.push(StageShape {
                name: stage.name.clone(),
                kind: stage.kind,
                output: [batch, stage.out_channels(), height, width],
                params: stage.num_params(),
            });
        }

        Ok(shapes)
    }
}
