mod onnx;
mod proto;

use std::{fs, path::Path};

use crate::{desc::ModelDescription, error::SerializeErr, graph::Graph, tensor::TensorMap};

pub use onnx::OnnxSerializer;
pub use proto::*;

/// Turns a graph and the current parameter values into an interchange format.
pub trait GraphSerializer: Send {
    /// Serializes the graph.
    ///
    /// # Arguments
    /// * `graph` - The graph the session runs.
    /// * `desc` - The model description, it types the graph inputs and outputs.
    /// * `params` - The current value of every parameter.
    ///
    /// # Returns
    /// The encoded model or an error if some construct can't be represented.
    fn serialize(
        &self,
        graph: &Graph,
        desc: &ModelDescription,
        params: &TensorMap,
    ) -> Result<Vec<u8>, SerializeErr>;

    /// Serializes the graph and writes it to `path`.
    fn write(
        &self,
        graph: &Graph,
        desc: &ModelDescription,
        params: &TensorMap,
        path: &Path,
    ) -> Result<(), SerializeErr> {
        let bytes = self.serialize(graph, desc, params)?;
        fs::write(path, bytes)?;
        Ok(())
    }
}
