mod builder;
mod session;

use std::{
    error::Error,
    fmt::{self, Display},
};

use serde::{Deserialize, Serialize};

use crate::{
    desc::{Dim, ModelDescription},
    tensor::Tensor,
};

pub use builder::SessionBuilder;
pub use session::TrainingSession;

/// Whether stochastic ops (dropout) are active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Train,
    Eval,
}

/// Session wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Seeds the dropout masks, the mask of step `n` derives from `(seed, n)`.
    pub seed: u64,
    /// Skip the optimizer update, but still count the step, when a gradient isn't finite.
    pub skip_nonfinite_updates: bool,
    /// Restore the step counter from snapshots that carry one.
    pub restore_step_on_load: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            seed: 0,
            skip_nonfinite_updates: true,
            restore_step_on_load: true,
        }
    }
}

/// Metadata about a finished train step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepInfo {
    /// The step counter after the step.
    pub step: u64,
    /// Whether every gradient was finite.
    pub all_finite: bool,
    /// Whether the optimizer update was skipped.
    pub skipped: bool,
}

/// The result of a train step.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// The outputs, ordered as declared in the model description.
    pub outputs: Vec<Tensor>,
    pub info: StepInfo,
}

/// Engine outputs that don't agree with the model description.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputMismatch {
    Count {
        got: usize,
        expected: usize,
    },
    Shape {
        name: String,
        got: Vec<usize>,
        expected: Vec<Dim>,
    },
}

impl Display for OutputMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputMismatch::Count { got, expected } => {
                write!(f, "the engine returned {got} outputs, expected {expected}")
            }
            OutputMismatch::Shape {
                name,
                got,
                expected,
            } => {
                let expected: Vec<_> = expected.iter().map(Dim::to_string).collect();
                write!(f, "output {name} has shape {got:?}, declared {expected:?}")
            }
        }
    }
}

impl Error for OutputMismatch {}

/// Checks the engine's outputs against the declared ones: same count, rank and static dims.
fn check_outputs(desc: &ModelDescription, outputs: &[Tensor]) -> Result<(), OutputMismatch> {
    if outputs.len() != desc.outputs.len() {
        return Err(OutputMismatch::Count {
            got: outputs.len(),
            expected: desc.outputs.len(),
        });
    }

    for (spec, output) in desc.outputs.iter().zip(outputs) {
        let admits = output.ndim() == spec.shape.len()
            && spec.shape.iter().zip(output.shape()).all(|(d, &s)| d.admits(s));

        if !admits {
            return Err(OutputMismatch::Shape {
                name: spec.name.clone(),
                got: output.shape().to_vec(),
                expected: spec.shape.clone(),
            });
        }
    }

    Ok(())
}

/// Derives the seed of a single step, so consecutive steps draw different dropout masks.
fn step_seed(seed: u64, step: u64) -> u64 {
    seed ^ step.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}
