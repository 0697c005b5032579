use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeneratorError {
    #[error("generator needs at least one encoder stage")]
    EmptyEncoder,

    #[error("stage plan has no output stage")]
    MissingOutputStage,

    #[error("encoder has {encoder} stages but decoder has {decoder}")]
    StageCountMismatch { encoder: usize, decoder: usize },

    #[error("stage {stage} has zero filters")]
    ZeroFilters { stage: String },

    #[error(
        "kernel size, stride and upsampling must be non-zero \
         (kernel {kernel}, stride {stride}, upsample {upsample})"
    )]
    InvalidGeometry {
        kernel: usize,
        stride: usize,
        upsample: usize,
    },

    #[error("dropout probability {0} is outside [0, 1)")]
    InvalidDropout(f64),

    #[error("{requested} dropout stages requested but the decoder only has {available}")]
    TooManyDropoutStages { requested: usize, available: usize },

    #[error("skip source {index} is not an encoder stage")]
    InvalidSkip { index: usize },

    #[error("decoder upsamples by {up} but the encoder downsamples by {down}")]
    ResolutionMismatch { down: usize, up: usize },

    #[error("stage {stage} outputs {output:?} but its skip is {skip:?}")]
    SkipMismatch {
        stage: String,
        output: [usize; 2],
        skip: [usize; 2],
    },

    #[error("input has {actual} channels, generator expects {expected}")]
    ChannelMismatch { expected: usize, actual: usize },

    #[error("input {height}x{width} is not divisible by the downsampling factor {factor}")]
    IndivisibleInput {
        height: usize,
        width: usize,
        factor: usize,
    },
}
