//! The orchestration core of a training frontend.
//!
//! A `TrainingSession` binds user tensors to a computation graph, runs forward and backward
//! passes on an `ExecutionEngine`, applies the configured optimizer and keeps parameters,
//! optimizer state and step counter consistent across steps, snapshots and exports.

pub mod binding;
pub mod config;
pub mod desc;
pub mod engine;
pub mod error;
pub mod export;
pub mod graph;
pub mod initialization;
pub mod model;
pub mod optimization;
pub mod provider;
pub mod session;
pub mod state;
pub mod tensor;

pub use binding::Inputs;
pub use desc::{Dim, InputSpec, ModelDescription, OutputSpec};
pub use engine::{CpuEngine, ExecutionEngine};
pub use error::{Result, SessionErr};
pub use model::{LossFn, ModelSource, Sequential};
pub use optimization::{OptimizerConfig, ParamGroup, UpdateRule};
pub use session::{Mode, SessionBuilder, SessionOptions, StepInfo, StepResult, TrainingSession};
pub use state::StateDict;
pub use tensor::Tensor;
