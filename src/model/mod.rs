mod loss;
mod sequential;

use serde::{Deserialize, Serialize};

use crate::{error::ConfigErr, graph::Graph};

pub use loss::LossFn;
pub use sequential::{ActFn, LayerSpec, Sequential};

/// Anything that can be lowered to a computation graph.
pub trait ExportGraph {
    /// Builds the graph, including the initial value of every trainable parameter.
    ///
    /// # Returns
    /// The graph or the configuration problem that prevents building it.
    fn export_graph(&self) -> Result<Graph, ConfigErr>;
}

/// The model handed to a session: either a native module or an already built graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSource {
    NativeModule(Sequential),
    GraphDescription(Graph),
}

impl ExportGraph for ModelSource {
    fn export_graph(&self) -> Result<Graph, ConfigErr> {
        match self {
            ModelSource::NativeModule(module) => module.export_graph(),
            ModelSource::GraphDescription(graph) => graph.export_graph(),
        }
    }
}

impl ExportGraph for Graph {
    fn export_graph(&self) -> Result<Graph, ConfigErr> {
        self.validate()?;
        Ok(self.clone())
    }
}

impl From<Sequential> for ModelSource {
    fn from(value: Sequential) -> Self {
        Self::NativeModule(value)
    }
}

impl From<Graph> for ModelSource {
    fn from(value: Graph) -> Self {
        Self::GraphDescription(value)
    }
}
