use std::{
    error::Error,
    fmt::{self, Display},
};

/// Failures applying an optimizer update to a parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateErr {
    MissingParam(String),
    MissingGradient(String),
    MissingSlot {
        param: String,
        slot: &'static str,
    },
    SizeMismatch {
        param: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    InvalidStep {
        param: String,
        step: f32,
    },
}

impl Display for UpdateErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateErr::MissingParam(param) => write!(f, "parameter {param} has no value"),
            UpdateErr::MissingGradient(param) => write!(f, "no gradient was computed for {param}"),
            UpdateErr::MissingSlot { param, slot } => {
                write!(f, "optimizer state {slot} of {param} is missing")
            }
            UpdateErr::SizeMismatch {
                param,
                got,
                expected,
            } => write!(f, "{param} got shape {got:?} but has shape {expected:?}"),
            UpdateErr::InvalidStep { param, step } => {
                write!(f, "optimizer step count {step} of {param} is out of range")
            }
        }
    }
}

impl Error for UpdateErr {}

pub type Result<T> = std::result::Result<T, UpdateErr>;
