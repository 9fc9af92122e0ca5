use std::{cell::RefCell, rc::Rc};

use ndarray::{ArrayD, IxDyn};
use rand::{SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use super::ExportGraph;
use crate::{
    error::ConfigErr,
    graph::{Graph, Op},
    initialization::InitSpec,
};

/// The activation applied after a dense layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActFn {
    Sigmoid,
    Relu,
    Tanh,
}

impl ActFn {
    fn op(self) -> Op {
        match self {
            ActFn::Sigmoid => Op::Sigmoid,
            ActFn::Relu => Op::Relu,
            ActFn::Tanh => Op::Tanh,
        }
    }
}

/// A layer of a `Sequential` module.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerSpec {
    Dense {
        dim: (usize, usize),
        #[serde(default)]
        act_fn: Option<ActFn>,
        #[serde(default)]
        init: Option<InitSpec>,
    },
    Dropout {
        ratio: f32,
    },
}

impl LayerSpec {
    /// A dense layer mapping `dim.0` features to `dim.1`, with xavier uniform weights.
    pub fn dense(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Self::Dense {
            dim,
            act_fn,
            init: None,
        }
    }

    pub fn dropout(ratio: f32) -> Self {
        Self::Dropout { ratio }
    }
}

/// A native module: information flows forward through its layers, one after the other.
///
/// Parameters are named `layers.{i}.weight` and `layers.{i}.bias` and initialized from a
/// single rng seeded with `seed`, so exporting twice yields identical graphs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequential {
    pub input: String,
    #[serde(default = "default_output")]
    pub output: String,
    pub layers: Vec<LayerSpec>,
    #[serde(default)]
    pub seed: u64,
}

fn default_output() -> String {
    "output".to_string()
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `input` - The name of the module's single formal input.
    /// * `layers` - The layers the module is composed of.
    pub fn new<I>(input: &str, layers: I) -> Self
    where
        I: IntoIterator<Item = LayerSpec>,
    {
        Self {
            input: input.to_string(),
            output: default_output(),
            layers: layers.into_iter().collect(),
            seed: 0,
        }
    }

    pub fn with_output(mut self, output: &str) -> Self {
        self.output = output.to_string();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

impl ExportGraph for Sequential {
    fn export_graph(&self) -> Result<Graph, ConfigErr> {
        let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(self.seed)));
        let mut graph = Graph::new([self.input.as_str()]);
        let mut last = self.input.clone();
        let mut width = None;

        for (i, layer) in self.layers.iter().enumerate() {
            match *layer {
                LayerSpec::Dense {
                    dim: (fan_in, fan_out),
                    act_fn,
                    init,
                } => {
                    if let Some(expected) = width.filter(|&w| w != fan_in) {
                        return Err(ConfigErr::LayerDimMismatch {
                            layer: i,
                            got: fan_in,
                            expected,
                        });
                    }
                    width = Some(fan_out);

                    let init = init.unwrap_or(InitSpec::XavierUniform);
                    let weight = init.tensor(&rng, (fan_in, fan_out), &[fan_in, fan_out])?;
                    let bias = ArrayD::zeros(IxDyn(&[fan_out]));

                    let weight_name = format!("layers.{i}.weight");
                    let bias_name = format!("layers.{i}.bias");
                    let matmul = format!("layers.{i}.matmul");
                    let linear = format!("layers.{i}.linear");

                    graph = graph
                        .with_param(&weight_name, weight)
                        .with_param(&bias_name, bias)
                        .with_node(Op::MatMul, [last, weight_name], &matmul)
                        .with_node(Op::Add, [matmul, bias_name], &linear);
                    last = linear;

                    if let Some(act_fn) = act_fn {
                        let activation = format!("layers.{i}.act");
                        graph = graph.with_node(act_fn.op(), [last], &activation);
                        last = activation;
                    }
                }
                LayerSpec::Dropout { ratio } => {
                    if !(0. ..1.).contains(&ratio) {
                        return Err(ConfigErr::InvalidDropout { layer: i, ratio });
                    }

                    let dropout = format!("layers.{i}.dropout");
                    graph = graph.with_node(Op::Dropout { ratio }, [last], &dropout);
                    last = dropout;
                }
            }
        }

        let graph = graph
            .with_node(Op::Identity, [last], &self.output)
            .with_output(&self.output);

        graph.validate()?;
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mlp() -> Sequential {
        Sequential::new(
            "x",
            [
                LayerSpec::dense((2, 3), Some(ActFn::Sigmoid)),
                LayerSpec::dropout(0.1),
                LayerSpec::dense((3, 1), None),
            ],
        )
        .with_seed(3)
    }

    #[test]
    fn exports_named_parameters() {
        let graph = mlp().export_graph().unwrap();

        let names: Vec<_> = graph.param_names().collect();
        assert_eq!(
            names,
            ["layers.0.weight", "layers.0.bias", "layers.2.weight", "layers.2.bias"]
        );
        assert_eq!(graph.initializers[0].value.shape(), &[2, 3]);
        assert_eq!(graph.initializers[3].value.shape(), &[1]);
        assert_eq!(graph.inputs, ["x"]);
        assert_eq!(graph.outputs, ["output"]);
    }

    #[test]
    fn export_is_deterministic_for_a_seed() {
        assert_eq!(mlp().export_graph().unwrap(), mlp().export_graph().unwrap());
        assert_ne!(
            mlp().export_graph().unwrap(),
            mlp().with_seed(4).export_graph().unwrap()
        );
    }

    #[test]
    fn mismatched_layers_are_rejected() {
        let module = Sequential::new(
            "x",
            [
                LayerSpec::dense((2, 3), None),
                LayerSpec::dense((4, 1), None),
            ],
        );

        assert!(matches!(
            module.export_graph(),
            Err(ConfigErr::LayerDimMismatch {
                layer: 1,
                got: 4,
                expected: 3
            })
        ));
    }

    #[test]
    fn invalid_dropout_is_rejected() {
        let module = Sequential::new("x", [LayerSpec::dropout(1.5)]);
        assert!(matches!(
            module.export_graph(),
            Err(ConfigErr::InvalidDropout { layer: 0, .. })
        ));
    }

    #[test]
    fn layers_deserialize_from_json() {
        let json = r#"{
            "input": "x",
            "layers": [
                { "dense": { "dim": [2, 4], "act_fn": "relu", "init": { "kind": "kaiming" } } },
                { "dropout": { "ratio": 0.2 } }
            ]
        }"#;

        let module: Sequential = serde_json::from_str(json).unwrap();
        assert_eq!(module.output, "output");
        assert_eq!(
            module.layers[0],
            LayerSpec::Dense {
                dim: (2, 4),
                act_fn: Some(ActFn::Relu),
                init: Some(InitSpec::Kaiming)
            }
        );
    }
}
