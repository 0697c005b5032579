//! Generator networks for pix2pix-style image-to-image translation, built on
//! burn: an encoder-decoder (autoencoder) and a skip-connected U-Net.

pub mod config;
pub mod error;
pub mod model;
pub mod summary;

pub use crate::{
    config::{Architecture, GeneratorConfig},
    error::GeneratorError,
    model::{
        autoencoder::{AutoencoderGenerator, AutoencoderGeneratorConfig},
        unet::{UNetGenerator, UNetGeneratorConfig},
        Generator,
    },
    summary::Summary,
};

#[cfg(test)]
pub(crate) type CpuBackend = burn::backend::NdArray<f32>;
