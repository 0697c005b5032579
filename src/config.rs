use burn::prelude::*;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{
    error::GeneratorError,
    model::{
        autoencoder::AutoencoderGeneratorConfig, stage::StagePlan, unet::UNetGeneratorConfig,
        Generator,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    Autoencoder,
    Unet,
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::Autoencoder => write!(f, "autoencoder"),
            Architecture::Unet => write!(f, "unet"),
        }
    }
}

#[derive(Config, Debug)]
pub struct GeneratorConfig {
    #[config(default = "Architecture::Unet")]
    pub architecture: Architecture,
    #[config(default = "AutoencoderGeneratorConfig::new()")]
    pub autoencoder: AutoencoderGeneratorConfig,
    #[config(default = "UNetGeneratorConfig::new()")]
    pub unet: UNetGeneratorConfig,
    /// Side of the square images fed to the generator.
    #[config(default = 256)]
    pub image_size: usize,
}
impl GeneratorConfig {
    pub fn plan(&self) -> Result<StagePlan, GeneratorError> {
        match self.architecture {
            Architecture::Autoencoder => self.autoencoder.plan(),
            Architecture::Unet => self.unet.plan(),
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Generator<B>, GeneratorError> {
        let generator = match self.architecture {
            Architecture::Autoencoder => Generator::Autoencoder(self.autoencoder.init(device)?),
            Architecture::Unet => Generator::UNet(self.unet.init(device)?),
        };

        Ok(generator)
    }

    pub fn input_channels(&self) -> usize {
        match self.architecture {
            Architecture::Autoencoder => self.autoencoder.input_channels,
            Architecture::Unet => self.unet.input_channels,
        }
    }

    pub fn input_dims(&self, batch_size: usize) -> [usize; 4] {
        [
            batch_size,
            self.input_channels(),
            self.image_size,
            self.image_size,
        ]
    }

    pub fn scaled(&self, divisor: usize) -> Self {
        self.clone()
            .with_autoencoder(self.autoencoder.scaled(divisor))
            .with_unet(self.unet.scaled(divisor))
    }
}
