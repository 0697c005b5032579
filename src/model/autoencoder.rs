use burn::{module::Module, prelude::*};

use crate::{
    error::GeneratorError,
    model::{
        layers::{DecoderBlock, EncoderBlock, OutputBlock},
        log_plan,
        stage::{NormSpec, StagePlan},
    },
};

/// Encoder-decoder generator without skip connections.
#[derive(Module, Debug)]
pub struct AutoencoderGenerator<B: Backend> {
    encoder: Vec<EncoderBlock<B>>,
    decoder: Vec<DecoderBlock<B>>,
    out_layer: OutputBlock<B>,
}
impl<B: Backend> AutoencoderGenerator<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let encoded = self
            .encoder
            .iter()
            .fold(input, |output, block| block.forward(output));
        let decoded = self
            .decoder
            .iter()
            .fold(encoded, |output, block| block.forward(output));

        self.out_layer.forward(decoded)
    }

    /// Weights, biases and batch norm scales; running statistics are excluded.
    pub fn trainable_params(&self) -> usize {
        let encoder: usize = self.encoder.iter().map(EncoderBlock::trainable_params).sum();
        let decoder: usize = self.decoder.iter().map(DecoderBlock::trainable_params).sum();

        encoder + decoder + self.out_layer.trainable_params()
    }
}

#[derive(Config, Debug)]
pub struct AutoencoderGeneratorConfig {
    #[config(default = 3)]
    pub input_channels: usize,
    #[config(default = 3)]
    pub output_channels: usize,
    /// C64-C128-C256-C512-C512-C512-C512-C512
    #[config(default = "vec![64, 128, 256, 512, 512, 512, 512, 512]")]
    pub encoder_filters: Vec<usize>,
    /// CD512-CD512-CD512-C512-C512-C256-C128-C64
    #[config(default = "vec![512, 512, 512, 512, 512, 256, 128, 64]")]
    pub decoder_filters: Vec<usize>,
    #[config(default = 4)]
    pub kernel_size: usize,
    #[config(default = 2)]
    pub stride: usize,
    #[config(default = 0.2)]
    pub leaky_slope: f64,
    #[config(default = 0.5)]
    pub dropout: f64,
    /// Leading decoder stages that apply dropout.
    #[config(default = 8)]
    pub dropout_stages: usize,
    #[config(default = 0.01)]
    pub bn_momentum: f64,
    #[config(default = 1e-3)]
    pub bn_epsilon: f64,
}
impl AutoencoderGeneratorConfig {
    pub fn plan(&self) -> Result<StagePlan, GeneratorError> {
        if self.encoder_filters.is_empty() {
            return Err(GeneratorError::EmptyEncoder);
        }
        if self.encoder_filters.len() != self.decoder_filters.len() {
            return Err(GeneratorError::StageCountMismatch {
                encoder: self.encoder_filters.len(),
                decoder: self.decoder_filters.len(),
            });
        }
        if self.dropout_stages > self.decoder_filters.len() {
            return Err(GeneratorError::TooManyDropoutStages {
                requested: self.dropout_stages,
                available: self.decoder_filters.len(),
            });
        }

        let norm = NormSpec {
            momentum: self.bn_momentum,
            epsilon: self.bn_epsilon,
        };
        let mut plan = StagePlan::new(self.input_channels);

        for (i, &filters) in self.encoder_filters.iter().enumerate() {
            // no batch norm on the first layer
            let norm = (i > 0).then_some(norm);
            plan.down(
                format!("encoder.{i}"),
                filters,
                self.kernel_size,
                self.stride,
                norm,
                self.leaky_slope,
            )?;
        }
        // each decoder stage undoes one encoder stride
        for (i, &filters) in self.decoder_filters.iter().enumerate() {
            let dropout = (i < self.dropout_stages).then_some(self.dropout);
            plan.up(
                format!("decoder.{i}"),
                filters,
                self.kernel_size,
                self.stride,
                Some(norm),
                dropout,
                None,
            )?;
        }
        plan.output_stage("out_layer", self.output_channels, self.kernel_size, 1)?;

        Ok(plan)
    }

    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<AutoencoderGenerator<B>, GeneratorError> {
        let plan = self.plan()?;
        let output = plan.output().ok_or(GeneratorError::MissingOutputStage)?;
        log_plan(&plan);

        let encoder = plan
            .encoder()
            .map(|stage| EncoderBlock::new(stage, device))
            .collect();
        let decoder = plan
            .decoder()
            .map(|stage| DecoderBlock::new(stage, device))
            .collect();
        let out_layer = OutputBlock::new(output, device);

        Ok(AutoencoderGenerator {
            encoder,
            decoder,
            out_layer,
        })
    }

    /// Divides every filter count by `divisor`, keeping at least one filter.
    pub fn scaled(&self, divisor: usize) -> Self {
        let divisor = divisor.max(1);
        let scale = |filters: &Vec<usize>| {
            filters
                .iter()
                .map(|f| (f / divisor).max(1))
                .collect::<Vec<_>>()
        };

        self.clone()
            .with_encoder_filters(scale(&self.encoder_filters))
            .with_decoder_filters(scale(&self.decoder_filters))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CpuBackend;
    use burn::tensor::Distribution;

    fn narrow() -> AutoencoderGeneratorConfig {
        AutoencoderGeneratorConfig::new().scaled(64)
    }

    #[test]
    fn default_plan_matches_paper_layout() {
        let plan = AutoencoderGeneratorConfig::new().plan().unwrap();
        let encoder: Vec<_> = plan.encoder().collect();
        let decoder: Vec<_> = plan.decoder().collect();

        assert_eq!(encoder.len(), 8);
        assert_eq!(decoder.len(), 8);
        assert!(encoder[0].norm.is_none());
        assert!(encoder[1..].iter().all(|s| s.norm.is_some()));
        assert!(decoder.iter().all(|s| s.dropout == Some(0.5)));
        assert!(decoder.iter().all(|s| s.skip.is_none()));
        assert_eq!(
            decoder.iter().map(|s| s.filters).collect::<Vec<_>>(),
            vec![512, 512, 512, 512, 512, 256, 128, 64]
        );

        let out = plan.output().unwrap();
        assert_eq!(out.upsample, 1);
        assert!(decoder.iter().all(|s| s.upsample == 2));
        assert_eq!(out.in_channels, 64);
        assert_eq!(plan.downsampling_factor(), 256);
    }

    #[test]
    fn default_trace_returns_to_input_resolution() {
        let plan = AutoencoderGeneratorConfig::new().plan().unwrap();
        let shapes = plan.trace([1, 3, 256, 256]).unwrap();

        assert_eq!(shapes[7].output, [1, 512, 1, 1]);
        assert_eq!(shapes.last().unwrap().output, [1, 3, 256, 256]);
    }

    #[test]
    fn dropout_stages_limit_dropout() {
        let plan = AutoencoderGeneratorConfig::new()
            .with_dropout_stages(3)
            .plan()
            .unwrap();
        let dropped = plan.decoder().filter(|s| s.dropout.is_some()).count();

        assert_eq!(dropped, 3);
    }

    #[test]
    fn rejects_mismatched_depths() {
        let config = AutoencoderGeneratorConfig::new().with_decoder_filters(vec![64]);

        assert_eq!(
            config.plan(),
            Err(GeneratorError::StageCountMismatch {
                encoder: 8,
                decoder: 1
            })
        );
        assert_eq!(
            AutoencoderGeneratorConfig::new()
                .with_encoder_filters(vec![])
                .plan(),
            Err(GeneratorError::EmptyEncoder)
        );
        assert!(matches!(
            AutoencoderGeneratorConfig::new()
                .with_dropout_stages(9)
                .plan(),
            Err(GeneratorError::TooManyDropoutStages { .. })
        ));
    }

    #[test]
    fn forward_maps_image_to_image() {
        let device = Default::default();
        let config = narrow();
        let generator = config.init::<CpuBackend>(&device).unwrap();

        let input = Tensor::<CpuBackend, 4>::random(
            [2, 3, 256, 256],
            Distribution::Uniform(-1.0, 1.0),
            &device,
        );
        let output = generator.forward(input);

        assert_eq!(output.dims(), [2, 3, 256, 256]);
    }

    #[test]
    fn output_channels_follow_config() {
        let device = Default::default();
        let generator = narrow()
            .with_output_channels(2)
            .init::<CpuBackend>(&device)
            .unwrap();

        let input = Tensor::<CpuBackend, 4>::zeros([1, 3, 256, 256], &device);
        assert_eq!(generator.forward(input).dims(), [1, 2, 256, 256]);
    }

    #[test]
    fn shallow_generator_accepts_small_images() {
        let device = Default::default();
        let config = AutoencoderGeneratorConfig::new()
            .with_input_channels(1)
            .with_encoder_filters(vec![4, 8])
            .with_decoder_filters(vec![8, 4])
            .with_dropout_stages(2);
        let generator = config.init::<CpuBackend>(&device).unwrap();

        let input = Tensor::<CpuBackend, 4>::zeros([1, 1, 12, 8], &device);
        assert_eq!(generator.forward(input).dims(), [1, 3, 12, 8]);
    }

    #[test]
    fn param_count_matches_plan() {
        let device = Default::default();
        let config = AutoencoderGeneratorConfig::new().scaled(16);
        let generator = config.init::<CpuBackend>(&device).unwrap();

        assert_eq!(generator.trainable_params(), config.plan().unwrap().num_params());
    }

    #[test]
    fn stride_three_generator_restores_resolution() {
        let device = Default::default();
        let config = AutoencoderGeneratorConfig::new()
            .with_encoder_filters(vec![2, 4])
            .with_decoder_filters(vec![4, 2])
            .with_kernel_size(3)
            .with_stride(3)
            .with_dropout_stages(2);
        let plan = config.plan().unwrap();
        assert_eq!(plan.downsampling_factor(), 9);
        assert!(plan.decoder().all(|s| s.upsample == 3));

        let shapes = plan.trace([1, 3, 9, 18]).unwrap();
        assert_eq!(shapes[1].output, [1, 4, 1, 2]);
        assert_eq!(shapes.last().unwrap().output, [1, 3, 9, 18]);

        let generator = config.init::<CpuBackend>(&device).unwrap();
        let input = Tensor::<CpuBackend, 4>::random(
            [1, 3, 9, 18],
            Distribution::Uniform(-1.0, 1.0),
            &device,
        );
        assert_eq!(generator.forward(input).dims(), [1, 3, 9, 18]);
        assert_eq!(generator.trainable_params(), plan.num_params());
    }

    #[test]
    fn stride_one_generator_keeps_resolution() {
        let device = Default::default();
        let config = AutoencoderGeneratorConfig::new()
            .with_encoder_filters(vec![4, 4])
            .with_decoder_filters(vec![4, 4])
            .with_stride(1)
            .with_dropout_stages(0);
        let plan = config.plan().unwrap();

        let shapes = plan.trace([1, 3, 5, 7]).unwrap();
        assert!(shapes.iter().all(|s| s.output[2..] == [5, 7]));

        let generator = config.init::<CpuBackend>(&device).unwrap();
        let input = Tensor::<CpuBackend, 4>::zeros([1, 3, 5, 7], &device);
        assert_eq!(generator.forward(input).dims(), [1, 3, 5, 7]);
    }
}
