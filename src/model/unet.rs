use burn::{module::Module, prelude::*};

use crate::{
    error::GeneratorError,
    model::{
        layers::{DecoderBlock, EncoderBlock, OutputBlock},
        log_plan,
        stage::{NormSpec, StagePlan},
    },
};

/// Skip-connected encoder-decoder. Decoder stage `de_k` concatenates the
/// output of `en_(8-k)` on the channel axis before its ReLU.
#[derive(Module, Debug)]
pub struct UNetGenerator<B: Backend> {
    en_1: EncoderBlock<B>,
    en_2: EncoderBlock<B>,
    en_3: EncoderBlock<B>,
    en_4: EncoderBlock<B>,
    en_5: EncoderBlock<B>,
    en_6: EncoderBlock<B>,
    en_7: EncoderBlock<B>,
    en_8: EncoderBlock<B>,
    de_1: DecoderBlock<B>,
    de_2: DecoderBlock<B>,
    de_3: DecoderBlock<B>,
    de_4: DecoderBlock<B>,
    de_5: DecoderBlock<B>,
    de_6: DecoderBlock<B>,
    de_7: DecoderBlock<B>,
    de_8: OutputBlock<B>,
}
impl<B: Backend> UNetGenerator<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let en_1 = self.en_1.forward(input);
        let en_2 = self.en_2.forward(en_1.clone());
        let en_3 = self.en_3.forward(en_2.clone());
        let en_4 = self.en_4.forward(en_3.clone());
        let en_5 = self.en_5.forward(en_4.clone());
        let en_6 = self.en_6.forward(en_5.clone());
        let en_7 = self.en_7.forward(en_6.clone());
        let en_8 = self.en_8.forward(en_7.clone());

        let de_1 = self.de_1.forward_with_skip(en_8, en_7);
        let de_2 = self.de_2.forward_with_skip(de_1, en_6);
        let de_3 = self.de_3.forward_with_skip(de_2, en_5);
        let de_4 = self.de_4.forward_with_skip(de_3, en_4);
        let de_5 = self.de_5.forward_with_skip(de_4, en_3);
        let de_6 = self.de_6.forward_with_skip(de_5, en_2);
        let de_7 = self.de_7.forward_with_skip(de_6, en_1);

        self.de_8.forward(de_7)
    }

    /// Weights, biases and batch norm scales; running statistics are excluded.
    pub fn trainable_params(&self) -> usize {
        let encoder = [
            &self.en_1, &self.en_2, &self.en_3, &self.en_4, &self.en_5, &self.en_6, &self.en_7,
            &self.en_8,
        ];
        let decoder = [
            &self.de_1, &self.de_2, &self.de_3, &self.de_4, &self.de_5, &self.de_6, &self.de_7,
        ];

        encoder.iter().map(|block| block.trainable_params()).sum::<usize>()
            + decoder.iter().map(|block| block.trainable_params()).sum::<usize>()
            + self.de_8.trainable_params()
    }
}

#[derive(Config, Debug)]
pub struct UNetGeneratorConfig {
    #[config(default = 3)]
    pub input_channels: usize,
    #[config(default = 3)]
    pub output_channels: usize,
    #[config(default = "[64, 128, 256, 512, 1024, 512, 512, 512]")]
    pub encoder_filters: [usize; 8],
    /// Widths of `de_1..de_7` before the skip is appended.
    #[config(default = "[512, 512, 1024, 512, 256, 128, 64]")]
    pub decoder_filters: [usize; 7],
    #[config(default = 4)]
    pub kernel_size: usize,
    #[config(default = 2)]
    pub stride: usize,
    #[config(default = 0.2)]
    pub leaky_slope: f64,
    #[config(default = 0.5)]
    pub dropout: f64,
    /// Leading decoder stages that apply dropout.
    #[config(default = 7)]
    pub dropout_stages: usize,
    #[config(default = 0.01)]
    pub bn_momentum: f64,
    #[config(default = 1e-3)]
    pub bn_epsilon: f64,
}
impl UNetGeneratorConfig {
    pub fn plan(&self) -> Result<StagePlan, GeneratorError> {
        let decoder_stages = self.decoder_filters.len();
        if self.dropout_stages > decoder_stages {
            return Err(GeneratorError::TooManyDropoutStages {
                requested: self.dropout_stages,
                available: decoder_stages,
            });
        }

        let norm = NormSpec {
            momentum: self.bn_momentum,
            epsilon: self.bn_epsilon,
        };
        let mut plan = StagePlan::new(self.input_channels);

        let mut encoder = Vec::with_capacity(self.encoder_filters.len());
        for (i, &filters) in self.encoder_filters.iter().enumerate() {
            // en_1 skips batch norm
            let norm = (i > 0).then_some(norm);
            encoder.push(plan.down(
                format!("en_{}", i + 1),
                filters,
                self.kernel_size,
                self.stride,
                norm,
                self.leaky_slope,
            )?);
        }

        // de_1 takes en_7, de_7 takes en_1; each upsamples by one encoder stride
        let skips = encoder.iter().rev().skip(1);
        for (i, (&filters, &skip)) in self.decoder_filters.iter().zip(skips).enumerate() {
            let dropout = (i < self.dropout_stages).then_some(self.dropout);
            plan.up(
                format!("de_{}", i + 1),
                filters,
                self.kernel_size,
                self.stride,
                Some(norm),
                dropout,
                Some(skip),
            )?;
        }
        plan.output_stage(
            format!("de_{}", decoder_stages + 1),
            self.output_channels,
            self.kernel_size,
            self.stride,
        )?;

        Ok(plan)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<UNetGenerator<B>, GeneratorError> {
        let plan = self.plan()?;
        log_plan(&plan);

        let stages = plan.stages();
        let en = |i: usize| EncoderBlock::new(&stages[i], device);
        let de = |i: usize| DecoderBlock::new(&stages[8 + i], device);
        let output = plan.output().ok_or(GeneratorError::MissingOutputStage)?;

        Ok(UNetGenerator {
            en_1: en(0),
            en_2: en(1),
            en_3: en(2),
            en_4: en(3),
            en_5: en(4),
            en_6: en(5),
            en_7: en(6),
            en_8: en(7),
            de_1: de(0),
            de_2: de(1),
            de_3: de(2),
            de_4: de(3),
            de_5: de(4),
            de_6: de(5),
            de_7: de(6),
            de_8: OutputBlock::new(output, device),
        })
    }

    /// Divides every filter count by `divisor`, keeping at least one filter.
    pub fn scaled(&self, divisor: usize) -> Self {
        let divisor = divisor.max(1);

        self.clone()
            .with_encoder_filters(self.encoder_filters.map(|f| (f / divisor).max(1)))
            .with_decoder_filters(self.decoder_filters.map(|f| (f / divisor).max(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::stage::StageKind, CpuBackend};
    use burn::tensor::{Distribution, TensorData};

    #[test]
    fn default_plan_wires_skips_in_reverse() {
        let plan = UNetGeneratorConfig::new().plan().unwrap();
        let stages = plan.stages();

        assert_eq!(stages.len(), 16);
        assert!(stages[0].norm.is_none());
        assert_eq!(stages[4].filters, 1024);

        let skips: Vec<_> = plan
            .decoder()
            .map(|s| s.skip.map(|skip| stages[skip.source].name.as_str()))
            .collect();
        assert_eq!(
            skips,
            vec![
                Some("en_7"),
                Some("en_6"),
                Some("en_5"),
                Some("en_4"),
                Some("en_3"),
                Some("en_2"),
                Some("en_1"),
            ]
        );

        let out = plan.output().unwrap();
        assert_eq!(out.name, "de_8");
        assert_eq!(out.upsample, 2);
        assert_eq!(out.in_channels, 64 + 64);
    }

    #[test]
    fn default_trace_concatenates_channels() {
        let plan = UNetGeneratorConfig::new().plan().unwrap();
        let shapes = plan.trace([1, 3, 256, 256]).unwrap();
        let decoder: Vec<_> = shapes
            .iter()
            .filter(|s| s.kind == StageKind::Up)
            .map(|s| s.output)
            .collect();

        assert_eq!(shapes[7].output, [1, 512, 1, 1]);
        assert_eq!(
            decoder,
            vec![
                [1, 1024, 2, 2],
                [1, 1024, 4, 4],
                [1, 2048, 8, 8],
                [1, 1024, 16, 16],
                [1, 512, 32, 32],
                [1, 256, 64, 64],
                [1, 128, 128, 128],
            ]
        );
        assert_eq!(shapes[15].output, [1, 3, 256, 256]);
    }

    #[test]
    fn rejects_small_inputs() {
        let plan = UNetGeneratorConfig::new().plan().unwrap();

        assert_eq!(
            plan.check_input([1, 3, 128, 128]),
            Err(GeneratorError::IndivisibleInput {
                height: 128,
                width: 128,
                factor: 256
            })
        );
    }

    #[test]
    fn forward_maps_image_to_image() {
        let device = Default::default();
        let config = UNetGeneratorConfig::new()
            .with_output_channels(2)
            .scaled(64);
        let generator = config.init::<CpuBackend>(&device).unwrap();

        let input = Tensor::<CpuBackend, 4>::random(
            [1, 3, 256, 512],
            Distribution::Uniform(-1.0, 1.0),
            &device,
        );
        let output = generator.forward(input);

        assert_eq!(output.dims(), [1, 2, 256, 512]);
        let values = output.to_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn forward_is_deterministic_without_autodiff() {
        let device = Default::default();
        let generator = UNetGeneratorConfig::new()
            .scaled(128)
            .init::<CpuBackend>(&device)
            .unwrap();
        let input = Tensor::<CpuBackend, 4>::random(
            [1, 3, 256, 256],
            Distribution::Uniform(-1.0, 1.0),
            &device,
        );

        // dropout only fires on autodiff backends
        let first: TensorData = generator.forward(input.clone()).into_data();
        let second: TensorData = generator.forward(input).into_data();
        first.assert_eq(&second, true);
    }

    #[test]
    fn param_count_matches_plan() {
        let device = Default::default();
        let config = UNetGeneratorConfig::new().scaled(16);
        let generator = config.init::<CpuBackend>(&device).unwrap();

        assert_eq!(generator.trainable_params(), config.plan().unwrap().num_params());
    }

    #[test]
    fn stride_one_generator_keeps_resolution() {
        let device = Default::default();
        let config = UNetGeneratorConfig::new()
            .with_kernel_size(3)
            .with_stride(1)
            .scaled(64);
        let plan = config.plan().unwrap();
        assert!(plan.decoder().all(|s| s.upsample == 1));

        let shapes = plan.trace([1, 3, 4, 4]).unwrap();
        assert!(shapes.iter().all(|s| s.output[2..] == [4, 4]));
        assert_eq!(shapes[15].output, [1, 3, 4, 4]);

        let generator = config.init::<CpuBackend>(&device).unwrap();
        let input = Tensor::<CpuBackend, 4>::random(
            [1, 3, 4, 4],
            Distribution::Uniform(-1.0, 1.0),
            &device,
        );
        assert_eq!(generator.forward(input).dims(), [1, 3, 4, 4]);
        assert_eq!(generator.trainable_params(), plan.num_params());
    }

    #[test]
    fn stride_three_generator_restores_resolution() {
        let config = UNetGeneratorConfig::new()
            .with_kernel_size(3)
            .with_stride(3)
            .scaled(64);
        let plan = config.plan().unwrap();
        let factor = 3usize.pow(8);

        assert_eq!(plan.downsampling_factor(), factor);
        let shapes = plan.trace([1, 3, factor, factor]).unwrap();
        assert_eq!(shapes[7].output[2..], [1, 1]);
        assert_eq!(shapes[15].output, [1, 3, factor, factor]);
    }
}
