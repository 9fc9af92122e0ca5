mod error;
mod op;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::tensor::Tensor;

pub use error::GraphErr;
pub use op::{Node, Op};

/// Prefix applied to the internal values of a loss graph when it's combined with a model.
const LOSS_PREFIX: &str = "loss_fn/";

/// A trainable parameter of the graph together with its initial value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Initializer {
    pub name: String,
    pub value: Tensor,
}

/// The computation plan the execution engine runs.
///
/// Nodes are kept in topological order: every node only reads graph inputs, initializers or
/// outputs of previous nodes. Backward counterparts are derived by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub inputs: Vec<String>,
    #[serde(default)]
    pub initializers: Vec<Initializer>,
    pub nodes: Vec<Node>,
    pub outputs: Vec<String>,
    #[serde(default)]
    pub loss: Option<String>,
}

impl Graph {
    /// Creates a new empty `Graph` reading the given inputs.
    pub fn new<I, S>(inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inputs: inputs.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Adds a trainable parameter.
    pub fn with_param(mut self, name: &str, value: Tensor) -> Self {
        self.initializers.push(Initializer {
            name: name.to_string(),
            value,
        });
        self
    }

    /// Appends a node, it may only read values defined before it.
    pub fn with_node<I, S>(mut self, op: Op, inputs: I, output: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.nodes.push(Node::new(op, inputs, output));
        self
    }

    /// Declares `name` as the next graph output.
    pub fn with_output(mut self, name: &str) -> Self {
        self.outputs.push(name.to_string());
        self
    }

    /// Flags the output the backward pass starts from.
    pub fn with_loss(mut self, name: &str) -> Self {
        self.loss = Some(name.to_string());
        self
    }

    /// Returns the names of the trainable parameters, in declaration order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.initializers.iter().map(|init| init.name.as_str())
    }

    /// Returns whether `name` is an input, a parameter or a node output.
    pub fn defines(&self, name: &str) -> bool {
        self.inputs.iter().any(|input| input == name)
            || self.initializers.iter().any(|init| init.name == name)
            || self.nodes.iter().any(|node| node.output == name)
    }

    /// Checks the structural invariants of the graph.
    ///
    /// # Returns
    /// The first violation found, if any.
    pub fn validate(&self) -> Result<(), GraphErr> {
        let mut defined = HashSet::new();

        let sources = self
            .inputs
            .iter()
            .chain(self.initializers.iter().map(|init| &init.name));

        for name in sources {
            if !defined.insert(name.as_str()) {
                return Err(GraphErr::DuplicateValue(name.clone()));
            }
        }

        for node in &self.nodes {
            let expected = node.op.arity();
            if node.inputs.len() != expected {
                return Err(GraphErr::Arity {
                    node: node.output.clone(),
                    op: node.op.name(),
                    got: node.inputs.len(),
                    expected,
                });
            }

            if let Op::Dropout { ratio } = node.op {
                if !(0. ..1.).contains(&ratio) {
                    return Err(GraphErr::InvalidDropout {
                        node: node.output.clone(),
                        ratio,
                    });
                }
            }

            if let Some(name) = node.inputs.iter().find(|i| !defined.contains(i.as_str())) {
                return Err(GraphErr::UndefinedValue {
                    node: node.output.clone(),
                    name: name.clone(),
                });
            }

            if !defined.insert(node.output.as_str()) {
                return Err(GraphErr::DuplicateValue(node.output.clone()));
            }
        }

        if self.outputs.is_empty() {
            return Err(GraphErr::NoOutputs);
        }

        let produced = self.outputs.iter().chain(self.loss.iter());
        if let Some(name) = produced.into_iter().find(|o| !defined.contains(o.as_str())) {
            return Err(GraphErr::UnknownOutput(name.clone()));
        }

        if let Some(loss) = &self.loss {
            if !self.outputs.contains(loss) {
                return Err(GraphErr::UnknownOutput(loss.clone()));
            }
        }

        Ok(())
    }

    /// Combines a model graph with a loss graph.
    ///
    /// The loss graph takes `[prediction, label]`, the prediction is bound to the model's first
    /// output and the label becomes a new graph input. The outputs of the combined graph are
    /// the loss followed by the model's outputs.
    ///
    /// # Arguments
    /// * `model` - The model graph.
    /// * `loss` - The loss graph.
    ///
    /// # Returns
    /// The combined graph or the structural error found.
    pub fn combine(model: Graph, loss: Graph) -> Result<Graph, GraphErr> {
        if loss.inputs.len() != 2 || loss.outputs.len() != 1 {
            return Err(GraphErr::LossSignature {
                inputs: loss.inputs.len(),
                outputs: loss.outputs.len(),
            });
        }

        let prediction = model.outputs.first().ok_or(GraphErr::NoOutputs)?.clone();
        let label = loss.inputs[1].clone();
        if model.defines(&label) {
            return Err(GraphErr::DuplicateValue(label));
        }

        let mut renames = HashMap::new();
        renames.insert(loss.inputs[0].clone(), prediction);
        renames.insert(label.clone(), label.clone());
        let rename = |name: &String| {
            renames
                .get(name)
                .cloned()
                .unwrap_or_else(|| format!("{LOSS_PREFIX}{name}"))
        };

        let loss_output = rename(&loss.outputs[0]);

        let Graph {
            mut inputs,
            mut initializers,
            mut nodes,
            outputs: model_outputs,
            ..
        } = model;

        inputs.push(label);
        initializers.extend(loss.initializers.iter().map(|init| Initializer {
            name: rename(&init.name),
            value: init.value.clone(),
        }));
        nodes.extend(loss.nodes.iter().map(|node| Node {
            op: node.op,
            inputs: node.inputs.iter().map(rename).collect(),
            output: rename(&node.output),
        }));

        let mut outputs = Vec::with_capacity(model_outputs.len() + 1);
        outputs.push(loss_output.clone());
        outputs.extend(model_outputs);

        let combined = Graph {
            inputs,
            initializers,
            nodes,
            outputs,
            loss: Some(loss_output),
        };

        combined.validate()?;
        Ok(combined)
    }

    /// Renames the graph outputs, aliasing every `(name, source)` pair through an `Identity`
    /// node when the names differ, and flags `loss` as the loss output.
    ///
    /// A node output already named like a new output is renamed first, together with every
    /// node reading it. Inputs and parameters keep their names.
    ///
    /// # Arguments
    /// * `bindings` - The new outputs, in order, with the value each one exposes.
    /// * `loss` - The name of the new loss output.
    ///
    /// # Returns
    /// The structural error found after rewiring, if any.
    pub fn bind_outputs(
        &mut self,
        bindings: &[(String, String)],
        loss: &str,
    ) -> Result<(), GraphErr> {
        let mut sources: Vec<String> = bindings.iter().map(|(_, src)| src.clone()).collect();

        for (i, (name, _)) in bindings.iter().enumerate() {
            if *name == sources[i] {
                continue;
            }

            if self.defines(name) {
                if !self.nodes.iter().any(|node| node.output == *name) {
                    return Err(GraphErr::DuplicateValue(name.clone()));
                }

                let renamed = self.fresh_name(name);
                self.rename_value(name, &renamed);
                for source in sources.iter_mut().filter(|source| source.as_str() == name.as_str()) {
                    *source = renamed.clone();
                }
            }

            self.nodes
                .push(Node::new(Op::Identity, [sources[i].as_str()], name));
        }

        self.outputs = bindings.iter().map(|(name, _)| name.clone()).collect();
        self.loss = Some(loss.to_string());
        self.validate()
    }

    /// Returns the first `{name}_{n}` the graph doesn't define.
    fn fresh_name(&self, name: &str) -> String {
        let mut n = 1;
        loop {
            let candidate = format!("{name}_{n}");
            if !self.defines(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Renames the node output `from`, rewiring every reader.
    fn rename_value(&mut self, from: &str, to: &str) {
        let rename = |name: &mut String| {
            if *name == from {
                *name = to.to_string();
            }
        };

        for node in &mut self.nodes {
            node.inputs.iter_mut().for_each(rename);
            rename(&mut node.output);
        }

        self.outputs.iter_mut().for_each(rename);
        self.loss.iter_mut().for_each(rename);
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn};

    use super::*;

    fn linear() -> Graph {
        Graph::new(["x"])
            .with_param("w", ArrayD::zeros(IxDyn(&[2, 1])))
            .with_param("b", ArrayD::zeros(IxDyn(&[1])))
            .with_node(Op::MatMul, ["x", "w"], "z")
            .with_node(Op::Add, ["z", "b"], "pred")
            .with_output("pred")
    }

    fn mse() -> Graph {
        Graph::new(["prediction", "target"])
            .with_node(Op::Mse, ["prediction", "target"], "loss")
            .with_output("loss")
    }

    #[test]
    fn linear_graph_is_valid() {
        linear().validate().unwrap();
    }

    #[test]
    fn reading_before_definition_is_rejected() {
        let graph = Graph::new(["x"])
            .with_node(Op::Sigmoid, ["h"], "y")
            .with_node(Op::Relu, ["x"], "h")
            .with_output("y");

        assert_eq!(
            graph.validate(),
            Err(GraphErr::UndefinedValue {
                node: "y".into(),
                name: "h".into()
            })
        );
    }

    #[test]
    fn wrong_arity_is_rejected() {
        let graph = Graph::new(["x"])
            .with_node(Op::Add, ["x"], "y")
            .with_output("y");

        assert!(matches!(graph.validate(), Err(GraphErr::Arity { expected: 2, got: 1, .. })));
    }

    #[test]
    fn dropout_ratio_must_be_a_probability() {
        let graph = Graph::new(["x"])
            .with_node(Op::Dropout { ratio: 1. }, ["x"], "y")
            .with_output("y");

        assert!(matches!(graph.validate(), Err(GraphErr::InvalidDropout { .. })));
    }

    #[test]
    fn combine_prepends_the_loss() {
        let combined = Graph::combine(linear(), mse()).unwrap();

        assert_eq!(combined.inputs, ["x", "target"]);
        assert_eq!(combined.outputs, ["loss_fn/loss", "pred"]);
        assert_eq!(combined.loss.as_deref(), Some("loss_fn/loss"));

        let loss_node = combined.nodes.last().unwrap();
        assert_eq!(loss_node.inputs, ["pred", "target"]);
    }

    #[test]
    fn combine_rejects_a_label_clashing_with_the_model() {
        let loss = Graph::new(["prediction", "z"])
            .with_node(Op::Mse, ["prediction", "z"], "loss")
            .with_output("loss");

        assert_eq!(
            Graph::combine(linear(), loss),
            Err(GraphErr::DuplicateValue("z".into()))
        );
    }

    #[test]
    fn combine_rejects_malformed_loss_graphs() {
        let loss = Graph::new(["prediction"])
            .with_node(Op::ReduceMean, ["prediction"], "loss")
            .with_output("loss");

        assert_eq!(
            Graph::combine(linear(), loss),
            Err(GraphErr::LossSignature {
                inputs: 1,
                outputs: 1
            })
        );
    }

    #[test]
    fn bind_outputs_aliases_renamed_values() {
        let mut graph = Graph::combine(linear(), mse()).unwrap();
        let bindings = [
            ("loss".to_string(), "loss_fn/loss".to_string()),
            ("pred".to_string(), "pred".to_string()),
        ];

        graph.bind_outputs(&bindings, "loss").unwrap();

        assert_eq!(graph.outputs, ["loss", "pred"]);
        assert_eq!(graph.loss.as_deref(), Some("loss"));
        let alias = graph.nodes.last().unwrap();
        assert_eq!(alias.op, Op::Identity);
        assert_eq!(alias.inputs, ["loss_fn/loss"]);
    }

    fn producer<'a>(graph: &'a Graph, name: &str) -> &'a Node {
        graph.nodes.iter().find(|node| node.output == name).unwrap()
    }

    #[test]
    fn bind_outputs_can_swap_names() {
        let mut graph = linear().with_output("z");
        let bindings = [
            ("z".to_string(), "pred".to_string()),
            ("pred".to_string(), "z".to_string()),
        ];

        graph.bind_outputs(&bindings, "z").unwrap();

        assert_eq!(graph.outputs, ["z", "pred"]);
        assert_eq!(producer(&graph, "z").inputs, ["pred_1"]);
        assert_eq!(producer(&graph, "pred").inputs, ["z_1"]);
        assert_eq!(producer(&graph, "pred_1").inputs, ["z_1", "b"]);
    }

    #[test]
    fn bind_outputs_keeps_parameter_names() {
        let mut graph = linear();
        let bindings = [("w".to_string(), "pred".to_string())];

        assert_eq!(
            graph.bind_outputs(&bindings, "w"),
            Err(GraphErr::DuplicateValue("w".into()))
        );
    }

    #[test]
    fn graph_round_trips_through_json() {
        let graph = linear().with_node(Op::Dropout { ratio: 0.5 }, ["pred"], "dropped");
        let json = serde_json::to_string(&graph).unwrap();
        assert!(json.contains(r#""op":"dropout""#));
        let parsed: Graph = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, graph);
    }
}
