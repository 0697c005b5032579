use anyhow::{ensure, Context, Result};
use burn::{
    prelude::*,
    tensor::{cast::ToElement, Distribution},
};
use clap::{Args, Parser, Subcommand};
use pix2pix_generators::{Architecture, GeneratorConfig, Summary};
use std::{path::PathBuf, time::Instant};

#[cfg(feature = "wgpu")]
type ProbeBackend = burn::backend::Wgpu<f32>;
#[cfg(not(feature = "wgpu"))]
type ProbeBackend = burn::backend::NdArray<f32>;

#[derive(Parser, Debug)]
#[command(
    name = "pix2pix-gen",
    version,
    about = "Inspect and probe pix2pix generator networks."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print per-stage output shapes and parameter counts
    Summary(ModelArgs),

    /// Build the generator and push a random batch through it
    Probe(ProbeArgs),

    /// Write a default generator config as JSON
    InitConfig(InitConfigArgs),
}

#[derive(Args, Debug)]
pub struct ModelArgs {
    /// Generator architecture; overrides the config file
    #[arg(long, value_enum)]
    pub arch: Option<Architecture>,

    /// JSON config written by `init-config`
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Side of the square input images; overrides the config file
    #[arg(long)]
    pub image_size: Option<usize>,

    #[arg(long, default_value_t = 1)]
    pub batch_size: usize,

    /// Divide every filter count by this factor
    #[arg(long, default_value_t = 1)]
    pub width_divisor: usize,
}

impl ModelArgs {
    fn resolve(&self) -> Result<GeneratorConfig> {
        let mut config = match &self.config {
            Some(path) => GeneratorConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => GeneratorConfig::new(),
        };

        if let Some(arch) = self.arch {
            config.architecture = arch;
        }
        if let Some(image_size) = self.image_size {
            config.image_size = image_size;
        }
        if self.width_divisor > 1 {
            config = config.scaled(self.width_divisor);
        }

        Ok(config)
    }
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// Seed for weight init and the random input batch
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Args, Debug)]
pub struct InitConfigArgs {
    #[arg(long, value_enum, default_value_t = Architecture::Unet)]
    pub arch: Architecture,

    #[arg(long, default_value = "generator.json")]
    pub out: PathBuf,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Summary(args) => run_summary(args),
            Commands::Probe(args) => run_probe(args),
            Commands::InitConfig(args) => run_init_config(args),
        }
    }
}

fn run_summary(args: ModelArgs) -> Result<()> {
    let config = args.resolve()?;
    let summary = Summary::new(&config, args.batch_size)?;

    println!("{summary}");
    Ok(())
}

fn run_probe(args: ProbeArgs) -> Result<()> {
    let config = args.model.resolve()?;
    let summary = Summary::new(&config, args.model.batch_size)?;
    let device = Default::default();

    if let Some(seed) = args.seed {
        ProbeBackend::seed(seed);
    }

    let start = Instant::now();
    let generator = config.init::<ProbeBackend>(&device)?;
    tracing::info!(
        architecture = %config.architecture,
        params = generator.num_params(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "generator initialized"
    );

    let input = Tensor::<ProbeBackend, 4>::random(
        summary.input,
        Distribution::Uniform(-1.0, 1.0),
        &device,
    );
    let start = Instant::now();
    let output = generator.forward(input);
    let dims = output.dims();
    let peak = output.abs().max().into_scalar().to_f32();
    tracing::info!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        ?dims,
        peak,
        "forward pass done"
    );

    ensure!(
        dims == summary.output(),
        "output shape {dims:?} differs from traced shape {:?}",
        summary.output()
    );
    ensure!(peak <= 1.0, "output magnitude {peak} escapes tanh range");

    println!(
        "{} generator: {:?} -> {:?}, peak |y| = {peak:.4}",
        config.architecture, summary.input, dims
    );
    Ok(())
}

fn run_init_config(args: InitConfigArgs) -> Result<()> {
    let config = GeneratorConfig::new().with_architecture(args.arch);
    config
        .save(&args.out)
        .with_context(|| format!("failed to write {}", args.out.display()))?;

    tracing::info!(path = %args.out.display(), "config written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "pix2pix-gen",
            "summary",
            "--arch",
            "autoencoder",
            "--image-size",
            "512",
            "--width-divisor",
            "4",
        ]);
        let Commands::Summary(args) = cli.command else {
            panic!("expected summary command");
        };
        let config = args.resolve().unwrap();

        assert_eq!(config.architecture, Architecture::Autoencoder);
        assert_eq!(config.image_size, 512);
        assert_eq!(config.autoencoder.encoder_filters[0], 16);
    }

    #[test]
    fn init_config_then_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ae.json");

        run_init_config(InitConfigArgs {
            arch: Architecture::Autoencoder,
            out: path.clone(),
        })
        .unwrap();

        let args = ModelArgs {
            arch: None,
            config: Some(path),
            image_size: None,
            batch_size: 1,
            width_divisor: 1,
        };
        assert_eq!(args.resolve().unwrap().architecture, Architecture::Autoencoder);
        run_summary(args).unwrap();
    }

    #[test]
    fn probe_runs_narrow_unet() {
        let args = ProbeArgs {
            model: ModelArgs {
                arch: Some(Architecture::Unet),
                config: None,
                image_size: None,
                batch_size: 1,
                width_divisor: 128,
            },
            seed: Some(7),
        };

        run_probe(args).unwrap();
    }
}
