use serde::{Deserialize, Serialize};

use super::ExportGraph;
use crate::{
    error::ConfigErr,
    graph::{Graph, Op},
};

/// A loss function combined with the model at construction time.
///
/// It takes `[prediction, label]` and yields the loss. The label becomes an extra input of
/// the combined model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossFn {
    Mse { label: String },
    Graph(Graph),
}

impl LossFn {
    /// Mean squared error against the input named `label`.
    pub fn mse(label: &str) -> Self {
        Self::Mse {
            label: label.to_string(),
        }
    }

    /// Returns the name of the label input this loss adds to the model.
    pub fn label(&self) -> Option<&str> {
        match self {
            LossFn::Mse { label } => Some(label),
            LossFn::Graph(graph) => graph.inputs.get(1).map(String::as_str),
        }
    }
}

impl ExportGraph for LossFn {
    fn export_graph(&self) -> Result<Graph, ConfigErr> {
        match self {
            LossFn::Mse { label } => {
                let graph = Graph::new(["prediction", label.as_str()])
                    .with_node(Op::Mse, ["prediction", label.as_str()], "loss")
                    .with_output("loss");

                graph.validate()?;
                Ok(graph)
            }
            LossFn::Graph(graph) => graph.export_graph(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphErr;

    #[test]
    fn mse_exposes_its_label() {
        let loss = LossFn::mse("y");
        assert_eq!(loss.label(), Some("y"));

        let graph = loss.export_graph().unwrap();
        assert_eq!(graph.inputs, ["prediction", "y"]);
        assert_eq!(graph.outputs, ["loss"]);
    }

    #[test]
    fn label_clashing_with_prediction_is_rejected() {
        let loss = LossFn::mse("prediction");
        assert!(matches!(
            loss.export_graph(),
            Err(ConfigErr::Graph(GraphErr::DuplicateValue(_)))
        ));
    }

    #[test]
    fn custom_loss_graph_label() {
        let graph = Graph::new(["p", "t"])
            .with_node(Op::Sub, ["p", "t"], "d")
            .with_node(Op::ReduceMean, ["d"], "loss")
            .with_output("loss");

        assert_eq!(LossFn::Graph(graph).label(), Some("t"));
    }
}
