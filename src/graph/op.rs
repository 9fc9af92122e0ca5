use serde::{Deserialize, Serialize};

/// The operations a graph node can apply.
///
/// Binary elementwise operations broadcast their operands, `MatMul` takes a vector or a
/// matrix on the left and a matrix on the right.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    MatMul,
    Add,
    Sub,
    Mul,
    Sigmoid,
    Relu,
    Tanh,
    Dropout { ratio: f32 },
    ReduceMean,
    Mse,
    Identity,
}

impl Op {
    /// Returns the amount of inputs this operation consumes.
    pub fn arity(&self) -> usize {
        match self {
            Op::MatMul | Op::Add | Op::Sub | Op::Mul | Op::Mse => 2,
            Op::Sigmoid
            | Op::Relu
            | Op::Tanh
            | Op::Dropout { .. }
            | Op::ReduceMean
            | Op::Identity => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Op::MatMul => "MatMul",
            Op::Add => "Add",
            Op::Sub => "Sub",
            Op::Mul => "Mul",
            Op::Sigmoid => "Sigmoid",
            Op::Relu => "Relu",
            Op::Tanh => "Tanh",
            Op::Dropout { .. } => "Dropout",
            Op::ReduceMean => "ReduceMean",
            Op::Mse => "Mse",
            Op::Identity => "Identity",
        }
    }
}

/// A single step of the graph: applies `op` to `inputs` and defines `output`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(flatten)]
    pub op: Op,
    pub inputs: Vec<String>,
    pub output: String,
}

impl Node {
    pub fn new<I, S>(op: Op, inputs: I, output: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            op,
            inputs: inputs.into_iter().map(Into::into).collect(),
            output: output.to_string(),
        }
    }
}
