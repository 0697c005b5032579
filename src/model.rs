pub mod autoencoder;
mod layers;
pub mod stage;
pub mod unet;

use burn::prelude::*;

use crate::model::{
    autoencoder::AutoencoderGenerator, stage::StagePlan, unet::UNetGenerator,
};

/// Either generator architecture behind one forward call.
#[derive(Debug)]
pub enum Generator<B: Backend> {
    Autoencoder(AutoencoderGenerator<B>),
    UNet(UNetGenerator<B>),
}
impl<B: Backend> Generator<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Generator::Autoencoder(generator) => generator.forward(input),
            Generator::UNet(generator) => generator.forward(input),
        }
    }

    /// Trainable parameters, matching [`StagePlan::num_params`].
    pub fn num_params(&self) -> usize {
        match self {
            Generator::Autoencoder(generator) => generator.trainable_params(),
            Generator::UNet(generator) => generator.trainable_params(),
        }
    }
}

fn log_plan(plan: &StagePlan) {
    tracing::info!(
        stages = plan.stages().len(),
        params = plan.num_params(),
        "building generator"
    );
    for stage in plan.stages() {
        tracing::debug!(
            stage = %stage.name,
            kind = %stage.kind,
            in_channels = stage.in_channels,
            out_channels = stage.out_channels(),
            activation = %stage.activation,
            "building stage"
        );
    }
}
