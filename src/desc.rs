use std::{collections::HashSet, fmt};

use serde::{Deserialize, Serialize};

use crate::error::ConfigErr;

/// A single dimension of a declared shape.
///
/// Deserializes from either a string (a dynamic dimension named by a symbol) or a
/// non-negative integer (a static dimension).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Dim {
    Static(usize),
    Symbolic(String),
}

impl Dim {
    /// Returns whether a concrete dimension size is allowed by this declaration.
    pub fn admits(&self, size: usize) -> bool {
        match self {
            Dim::Static(dim) => *dim == size,
            Dim::Symbolic(_) => true,
        }
    }
}

impl From<usize> for Dim {
    fn from(value: usize) -> Self {
        Self::Static(value)
    }
}

impl From<&str> for Dim {
    fn from(value: &str) -> Self {
        Self::Symbolic(value.to_string())
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Static(dim) => write!(f, "{dim}"),
            Dim::Symbolic(sym) => f.write_str(sym),
        }
    }
}

/// A declared model input. An empty shape denotes a scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
    pub shape: Vec<Dim>,
}

impl InputSpec {
    pub fn new<I, D>(name: &str, shape: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<Dim>,
    {
        Self {
            name: name.to_string(),
            shape: shape.into_iter().map(Into::into).collect(),
        }
    }
}

/// A declared model output, `is_loss` flags the output the backward pass starts from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    pub shape: Vec<Dim>,
    #[serde(default)]
    pub is_loss: bool,
}

impl OutputSpec {
    pub fn new<I, D>(name: &str, shape: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<Dim>,
    {
        Self {
            name: name.to_string(),
            shape: shape.into_iter().map(Into::into).collect(),
            is_loss: false,
        }
    }

    /// A scalar output flagged as loss.
    pub fn loss(name: &str) -> Self {
        Self {
            name: name.to_string(),
            shape: Vec::new(),
            is_loss: true,
        }
    }
}

/// The description of the inputs and outputs of the model being trained.
///
/// Input order defines positional binding, output order defines the order of every step's
/// returned outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescription {
    pub inputs: Vec<InputSpec>,
    pub outputs: Vec<OutputSpec>,
}

impl ModelDescription {
    pub fn new(inputs: Vec<InputSpec>, outputs: Vec<OutputSpec>) -> Self {
        Self { inputs, outputs }
    }

    /// Checks the description on its own: unique names and exactly one loss output.
    ///
    /// # Returns
    /// The index of the loss output or the first violation found.
    pub fn validate(&self) -> Result<usize, ConfigErr> {
        let mut seen = HashSet::new();
        for input in &self.inputs {
            if !seen.insert(input.name.as_str()) {
                return Err(ConfigErr::DuplicateInput(input.name.clone()));
            }
        }

        let mut seen = HashSet::new();
        for output in &self.outputs {
            if !seen.insert(output.name.as_str()) {
                return Err(ConfigErr::DuplicateOutput(output.name.clone()));
            }
        }

        let mut loss: Option<usize> = None;
        for (i, output) in self.outputs.iter().enumerate() {
            if !output.is_loss {
                continue;
            }

            if let Some(first) = loss {
                return Err(ConfigErr::DuplicateLoss {
                    first: self.outputs[first].name.clone(),
                    second: output.name.clone(),
                });
            }

            loss = Some(i);
        }

        loss.ok_or(ConfigErr::MissingLoss)
    }

    /// Returns the names of the declared inputs, in declaration order.
    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(|input| input.name.as_str())
    }

    /// Returns the names of the declared outputs, in declaration order.
    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|output| output.name.as_str())
    }
}
