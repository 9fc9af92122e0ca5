use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use crate::{binding::BindErr, graph::GraphErr, initialization::RandErr};

/// The result type used in the entire session crate.
pub type Result<T> = std::result::Result<T, SessionErr>;

/// The session's error type.
///
/// `Configuration` is fatal to the session being built, `Lifecycle` is a programmer error,
/// every other variant is recoverable and leaves the session state untouched.
#[derive(Debug)]
pub enum SessionErr {
    Configuration(ConfigErr),
    InputBinding(BindErr),
    Execution(Box<dyn Error + Send + Sync>),
    StateMismatch(StateMismatch),
    Serialization(SerializeErr),
    Lifecycle,
}

impl Display for SessionErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionErr::Configuration(e) => write!(f, "configuration error: {e}"),
            SessionErr::InputBinding(e) => write!(f, "input binding error: {e}"),
            SessionErr::Execution(e) => write!(f, "execution error: {e}"),
            SessionErr::StateMismatch(e) => write!(f, "state mismatch: {e}"),
            SessionErr::Serialization(e) => write!(f, "serialization error: {e}"),
            SessionErr::Lifecycle => f.write_str("the session has already been torn down"),
        }
    }
}

impl Error for SessionErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SessionErr::Configuration(e) => Some(e),
            SessionErr::InputBinding(e) => Some(e),
            SessionErr::Execution(e) => Some(e.as_ref()),
            SessionErr::StateMismatch(e) => Some(e),
            SessionErr::Serialization(e) => Some(e),
            SessionErr::Lifecycle => None,
        }
    }
}

impl From<ConfigErr> for SessionErr {
    fn from(value: ConfigErr) -> Self {
        Self::Configuration(value)
    }
}

impl From<BindErr> for SessionErr {
    fn from(value: BindErr) -> Self {
        Self::InputBinding(value)
    }
}

impl From<StateMismatch> for SessionErr {
    fn from(value: StateMismatch) -> Self {
        Self::StateMismatch(value)
    }
}

impl From<SerializeErr> for SessionErr {
    fn from(value: SerializeErr) -> Self {
        Self::Serialization(value)
    }
}

/// Invalid model, loss or optimizer descriptions, surfaced while building a session.
#[derive(Debug)]
pub enum ConfigErr {
    DuplicateLoss {
        first: String,
        second: String,
    },
    MissingLoss,
    DuplicateInput(String),
    DuplicateOutput(String),
    InputMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
    OutputArity {
        got: usize,
        expected: usize,
    },
    Graph(GraphErr),
    Init(RandErr),
    LayerDimMismatch {
        layer: usize,
        got: usize,
        expected: usize,
    },
    InvalidDropout {
        layer: usize,
        ratio: f32,
    },
    EmptyGroup {
        group: usize,
    },
    OverlappingGroups {
        param: String,
        first: usize,
        second: usize,
    },
    UnknownParam {
        group: usize,
        param: String,
    },
    UnknownHyperparam {
        rule: &'static str,
        name: String,
    },
    InvalidHyperparam {
        name: String,
        value: f32,
    },
    EnginePrepare(Box<dyn Error + Send + Sync>),
    MalformedSample {
        sample: usize,
        name: String,
    },
}

impl Display for ConfigErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErr::DuplicateLoss { first, second } => write!(
                f,
                "only one output may be flagged as loss, got {first} and {second}"
            ),
            ConfigErr::MissingLoss => f.write_str("no output is flagged as loss"),
            ConfigErr::DuplicateInput(name) => write!(f, "input {name} is declared twice"),
            ConfigErr::DuplicateOutput(name) => write!(f, "output {name} is declared twice"),
            ConfigErr::InputMismatch {
                missing,
                unexpected,
            } => write!(
                f,
                "declared inputs don't match the model inputs, missing {missing:?}, unexpected {unexpected:?}"
            ),
            ConfigErr::OutputArity { got, expected } => write!(
                f,
                "the model produces {got} outputs but {expected} are declared"
            ),
            ConfigErr::Graph(e) => write!(f, "invalid graph: {e}"),
            ConfigErr::Init(e) => write!(f, "parameter initialization failed: {e}"),
            ConfigErr::LayerDimMismatch {
                layer,
                got,
                expected,
            } => write!(
                f,
                "layer {layer} expects {got} inputs but the previous layer yields {expected}"
            ),
            ConfigErr::InvalidDropout { layer, ratio } => {
                write!(f, "layer {layer} has an invalid dropout ratio {ratio}")
            }
            ConfigErr::EmptyGroup { group } => write!(f, "parameter group {group} is empty"),
            ConfigErr::OverlappingGroups {
                param,
                first,
                second,
            } => write!(
                f,
                "parameter {param} belongs to both group {first} and group {second}"
            ),
            ConfigErr::UnknownParam { group, param } => write!(
                f,
                "parameter group {group} references unknown parameter {param}"
            ),
            ConfigErr::UnknownHyperparam { rule, name } => {
                write!(f, "{rule} has no hyperparameter named {name}")
            }
            ConfigErr::InvalidHyperparam { name, value } => {
                write!(f, "hyperparameter {name} has an invalid value {value}")
            }
            ConfigErr::EnginePrepare(e) => write!(f, "the engine rejected the graph: {e}"),
            ConfigErr::MalformedSample { sample, name } => write!(
                f,
                "tensor {name} of sample {sample} doesn't have as many values as its shape needs"
            ),
        }
    }
}

impl Error for ConfigErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigErr::Graph(e) => Some(e),
            ConfigErr::Init(e) => Some(e),
            ConfigErr::EnginePrepare(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<GraphErr> for ConfigErr {
    fn from(value: GraphErr) -> Self {
        Self::Graph(value)
    }
}

impl From<RandErr> for ConfigErr {
    fn from(value: RandErr) -> Self {
        Self::Init(value)
    }
}

/// A snapshot that doesn't fit the session it's being loaded into.
#[derive(Debug, PartialEq)]
pub enum StateMismatch {
    Keys {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
    Shape {
        key: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
}

impl Display for StateMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateMismatch::Keys {
                missing,
                unexpected,
            } => write!(f, "missing keys {missing:?}, unexpected keys {unexpected:?}"),
            StateMismatch::Shape { key, got, expected } => {
                write!(f, "{key} has shape {got:?}, expected {expected:?}")
            }
        }
    }
}

impl Error for StateMismatch {}

/// Failures writing or reading the external formats (ONNX exports and checkpoint files).
#[derive(Debug)]
pub enum SerializeErr {
    Io(io::Error),
    Json(serde_json::Error),
    MissingParam(String),
    Graph(GraphErr),
}

impl Display for SerializeErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializeErr::Io(e) => write!(f, "io error: {e}"),
            SerializeErr::Json(e) => write!(f, "json error: {e}"),
            SerializeErr::MissingParam(name) => write!(f, "parameter {name} has no value"),
            SerializeErr::Graph(e) => write!(f, "graph can't be exported: {e}"),
        }
    }
}

impl Error for SerializeErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SerializeErr::Io(e) => Some(e),
            SerializeErr::Json(e) => Some(e),
            SerializeErr::Graph(e) => Some(e),
            SerializeErr::MissingParam(_) => None,
        }
    }
}

impl From<io::Error> for SerializeErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for SerializeErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<GraphErr> for SerializeErr {
    fn from(value: GraphErr) -> Self {
        Self::Graph(value)
    }
}
