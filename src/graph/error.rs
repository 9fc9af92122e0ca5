use std::{
    error::Error,
    fmt::{self, Display},
};

/// Structural problems of a computation graph.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphErr {
    DuplicateValue(String),
    UndefinedValue {
        node: String,
        name: String,
    },
    Arity {
        node: String,
        op: &'static str,
        got: usize,
        expected: usize,
    },
    UnknownOutput(String),
    NoOutputs,
    LossSignature {
        inputs: usize,
        outputs: usize,
    },
    InvalidDropout {
        node: String,
        ratio: f32,
    },
}

impl Display for GraphErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphErr::DuplicateValue(name) => write!(f, "value {name} is defined more than once"),
            GraphErr::UndefinedValue { node, name } => {
                write!(f, "node {node} reads {name} before it's defined")
            }
            GraphErr::Arity {
                node,
                op,
                got,
                expected,
            } => write!(
                f,
                "node {node} ({op}) has {got} inputs, expected {expected}"
            ),
            GraphErr::UnknownOutput(name) => write!(f, "output {name} is never produced"),
            GraphErr::NoOutputs => f.write_str("the graph has no outputs"),
            GraphErr::LossSignature { inputs, outputs } => write!(
                f,
                "a loss graph takes [prediction, label] and yields one output, got {inputs} inputs and {outputs} outputs"
            ),
            GraphErr::InvalidDropout { node, ratio } => {
                write!(f, "node {node} has dropout ratio {ratio} outside of [0, 1)")
            }
        }
    }
}

impl Error for GraphErr {}
