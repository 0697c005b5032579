use std::fmt;

use crate::{
    config::{Architecture, GeneratorConfig},
    error::GeneratorError,
    model::stage::StageShape,
};

/// Per-stage output shapes of a generator for a given batch size.
#[derive(Debug, Clone)]
pub struct Summary {
    pub architecture: Architecture,
    pub input: [usize; 4],
    pub stages: Vec<StageShape>,
}

impl Summary {
    pub fn new(config: &GeneratorConfig, batch_size: usize) -> Result<Self, GeneratorError> {
        let input = config.input_dims(batch_size);
        let stages = config.plan()?.trace(input)?;

        Ok(Self {
            architecture: config.architecture,
            input,
            stages,
        })
    }

    pub fn output(&self) -> [usize; 4] {
        self.stages.last().map_or(self.input, |stage| stage.output)
    }

    pub fn total_params(&self) -> usize {
        self.stages.iter().map(|stage| stage.params).sum()
    }
}

fn shape(dims: &[usize; 4]) -> String {
    format!("[{}, {}, {}, {}]", dims[0], dims[1], dims[2], dims[3])
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} generator, input {}", self.architecture, shape(&self.input))?;
        writeln!(f, "{:<12} {:<7} {:<24} {:>12}", "stage", "kind", "output", "params")?;
        for stage in &self.stages {
            writeln!(
                f,
                "{:<12} {:<7} {:<24} {:>12}",
                stage.name,
                stage.kind.to_string(),
                shape(&stage.output),
                stage.params
            )?;
        }
        write!(f, "total params: {}", self.total_params())
    }
}
