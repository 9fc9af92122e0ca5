mod cpu;
mod kernels;

use std::{
    error::Error,
    ops::{Deref, DerefMut},
};

use crate::{
    graph::Graph,
    session::Mode,
    tensor::{Tensor, TensorMap},
};

pub use cpu::{CpuEngine, CpuErr};

/// Per call execution settings handed to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunContext {
    /// `Train` enables stochastic ops such as dropout.
    pub mode: Mode,
    /// Seeds every random draw of the call.
    pub seed: u64,
}

/// The result of a forward and backward pass.
#[derive(Debug, Clone)]
pub struct ForwardBackward {
    /// The graph outputs, in graph order.
    pub outputs: Vec<Tensor>,
    /// The gradient of the loss with respect to every parameter.
    pub gradients: TensorMap,
}

/// The backend that runs a computation graph.
///
/// Engines hold no session state: parameters are passed on every call and gradients are
/// returned, never applied.
pub trait ExecutionEngine: Send {
    type Err: Error + Send + Sync + 'static;

    /// Acquires whatever the engine needs to run `graph`.
    fn prepare(&mut self, graph: &Graph) -> Result<(), Self::Err>;

    /// Runs the forward pass.
    ///
    /// # Arguments
    /// * `graph` - The prepared graph.
    /// * `params` - The current value of every parameter.
    /// * `inputs` - The bound graph inputs.
    /// * `ctx` - The call settings.
    ///
    /// # Returns
    /// The graph outputs, in graph order.
    fn run_forward(
        &mut self,
        graph: &Graph,
        params: &TensorMap,
        inputs: &TensorMap,
        ctx: &RunContext,
    ) -> Result<Vec<Tensor>, Self::Err>;

    /// Runs the forward pass and backpropagates from the graph's loss output.
    ///
    /// # Arguments
    /// * `graph` - The prepared graph.
    /// * `params` - The current value of every parameter.
    /// * `inputs` - The bound graph inputs.
    /// * `ctx` - The call settings.
    ///
    /// # Returns
    /// The graph outputs and a gradient for every parameter.
    fn run_forward_backward(
        &mut self,
        graph: &Graph,
        params: &TensorMap,
        inputs: &TensorMap,
        ctx: &RunContext,
    ) -> Result<ForwardBackward, Self::Err>;

    /// Gives back everything acquired by `prepare`.
    fn release(&mut self);
}

/// Owns a prepared engine and releases it exactly once, when dropped or on `release`.
pub struct EngineGuard<E: ExecutionEngine> {
    engine: E,
    released: bool,
}

impl<E: ExecutionEngine> EngineGuard<E> {
    /// Prepares `engine` for `graph`.
    ///
    /// # Returns
    /// The guard, or the preparation error once the engine has been released.
    pub fn acquire(mut engine: E, graph: &Graph) -> Result<Self, E::Err> {
        if let Err(e) = engine.prepare(graph) {
            engine.release();
            return Err(e);
        }

        Ok(Self {
            engine,
            released: false,
        })
    }

    /// Releases the engine now instead of on drop.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.engine.release();
        }
    }
}

impl<E: ExecutionEngine> Deref for EngineGuard<E> {
    type Target = E;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

impl<E: ExecutionEngine> DerefMut for EngineGuard<E> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.engine
    }
}

impl<E: ExecutionEngine> Drop for EngineGuard<E> {
    fn drop(&mut self) {
        self.release_once();
    }
}
