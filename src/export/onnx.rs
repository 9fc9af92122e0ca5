use prost::Message;

use super::{
    GraphSerializer,
    proto::{
        AttributeProto, Dimension, DimensionValue, ELEM_FLOAT, GraphProto, ModelProto, NodeProto,
        OperatorSetIdProto, TensorProto, TensorShapeProto, TensorTypeProto, TypeProto,
        ValueInfoProto,
    },
};
use crate::{
    desc::{Dim, ModelDescription},
    error::SerializeErr,
    graph::{Graph, Node, Op},
    tensor::{Tensor, TensorMap},
};

const IR_VERSION: i64 = 6;
const OPSET_VERSION: i64 = 11;
const PRODUCER: &str = env!("CARGO_PKG_NAME");

/// Writes ONNX `ModelProto`s, with the current parameter values as initializers.
#[derive(Debug, Clone, Default)]
pub struct OnnxSerializer {
    graph_name: Option<String>,
}

impl OnnxSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_graph_name(mut self, name: &str) -> Self {
        self.graph_name = Some(name.to_string());
        self
    }

    /// Builds the model proto without encoding it.
    pub fn to_proto(
        &self,
        graph: &Graph,
        desc: &ModelDescription,
        params: &TensorMap,
    ) -> Result<ModelProto, SerializeErr> {
        graph.validate()?;

        let initializer: Vec<_> = graph
            .param_names()
            .map(|name| {
                params
                    .get(name)
                    .map(|value| tensor_proto(name, value))
                    .ok_or_else(|| SerializeErr::MissingParam(name.to_string()))
            })
            .collect::<Result<_, _>>()?;

        let input = desc
            .inputs
            .iter()
            .map(|spec| value_info(&spec.name, &spec.shape))
            .collect();
        let output = desc
            .outputs
            .iter()
            .map(|spec| value_info(&spec.name, &spec.shape))
            .collect();

        let node = graph.nodes.iter().flat_map(lower).collect();

        Ok(ModelProto {
            ir_version: IR_VERSION,
            producer_name: PRODUCER.to_string(),
            producer_version: env!("CARGO_PKG_VERSION").to_string(),
            graph: Some(GraphProto {
                node,
                name: self.graph_name.clone().unwrap_or_else(|| "training_graph".into()),
                initializer,
                input,
                output,
            }),
            opset_import: vec![OperatorSetIdProto {
                domain: String::new(),
                version: OPSET_VERSION,
            }],
        })
    }
}

impl GraphSerializer for OnnxSerializer {
    fn serialize(
        &self,
        graph: &Graph,
        desc: &ModelDescription,
        params: &TensorMap,
    ) -> Result<Vec<u8>, SerializeErr> {
        Ok(self.to_proto(graph, desc, params)?.encode_to_vec())
    }
}

fn tensor_proto(name: &str, value: &Tensor) -> TensorProto {
    TensorProto {
        dims: value.shape().iter().map(|&d| d as i64).collect(),
        data_type: ELEM_FLOAT,
        float_data: value.iter().copied().collect(),
        name: name.to_string(),
    }
}

fn value_info(name: &str, shape: &[Dim]) -> ValueInfoProto {
    let dim = shape
        .iter()
        .map(|d| Dimension {
            value: Some(match d {
                Dim::Static(size) => DimensionValue::DimValue(*size as i64),
                Dim::Symbolic(symbol) => DimensionValue::DimParam(symbol.clone()),
            }),
        })
        .collect();

    ValueInfoProto {
        name: name.to_string(),
        r#type: Some(TypeProto {
            tensor_type: Some(TensorTypeProto {
                elem_type: ELEM_FLOAT,
                shape: Some(TensorShapeProto { dim }),
            }),
        }),
    }
}

fn node_proto(op_type: &str, inputs: &[&str], output: &str, attribute: Vec<AttributeProto>) -> NodeProto {
    NodeProto {
        input: inputs.iter().map(|i| i.to_string()).collect(),
        output: vec![output.to_string()],
        name: output.to_string(),
        op_type: op_type.to_string(),
        attribute,
    }
}

/// Maps a node to the ONNX nodes computing it.
fn lower(node: &Node) -> Vec<NodeProto> {
    let inputs: Vec<_> = node.inputs.iter().map(String::as_str).collect();
    let out = node.output.as_str();

    match node.op {
        Op::Dropout { ratio } => vec![node_proto(
            "Dropout",
            &inputs,
            out,
            vec![AttributeProto::float("ratio", ratio)],
        )],
        Op::ReduceMean => vec![node_proto(
            "ReduceMean",
            &inputs,
            out,
            vec![AttributeProto::int("keepdims", 0)],
        )],
        Op::Mse => {
            let diff = format!("{out}/diff");
            let squared = format!("{out}/squared");
            vec![
                node_proto("Sub", &inputs, &diff, Vec::new()),
                node_proto("Mul", &[diff.as_str(), diff.as_str()], &squared, Vec::new()),
                node_proto(
                    "ReduceMean",
                    &[squared.as_str()],
                    out,
                    vec![AttributeProto::int("keepdims", 0)],
                ),
            ]
        }
        op => vec![node_proto(op.name(), &inputs, out, Vec::new())],
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn, arr2};

    use super::*;
    use crate::desc::{Dim, InputSpec, OutputSpec};

    fn graph() -> Graph {
        Graph::new(["x", "y"])
            .with_param("w", ArrayD::zeros(IxDyn(&[2, 1])))
            .with_node(Op::MatMul, ["x", "w"], "pred")
            .with_node(Op::Dropout { ratio: 0.25 }, ["pred"], "dropped")
            .with_node(Op::Mse, ["dropped", "y"], "loss")
            .with_output("loss")
            .with_loss("loss")
    }

    fn desc() -> ModelDescription {
        ModelDescription::new(
            vec![
                InputSpec::new("x", [Dim::from("batch"), Dim::from(2)]),
                InputSpec::new("y", [Dim::from("batch"), Dim::from(1)]),
            ],
            vec![OutputSpec::loss("loss")],
        )
    }

    fn params() -> TensorMap {
        TensorMap::from([("w".to_string(), arr2(&[[0.5], [-1.]]).into_dyn())])
    }

    #[test]
    fn initializers_hold_the_given_values() {
        let model = OnnxSerializer::new().to_proto(&graph(), &desc(), &params()).unwrap();
        let graph = model.graph.unwrap();

        assert_eq!(model.ir_version, IR_VERSION);
        assert_eq!(model.opset_import[0].version, OPSET_VERSION);
        assert_eq!(graph.initializer.len(), 1);
        assert_eq!(graph.initializer[0].name, "w");
        assert_eq!(graph.initializer[0].dims, [2, 1]);
        assert_eq!(graph.initializer[0].float_data, [0.5, -1.]);
    }

    #[test]
    fn mse_is_lowered_to_standard_ops() {
        let model = OnnxSerializer::new().to_proto(&graph(), &desc(), &params()).unwrap();
        let ops: Vec<_> = model
            .graph
            .unwrap()
            .node
            .into_iter()
            .map(|n| n.op_type)
            .collect();

        assert_eq!(ops, ["MatMul", "Dropout", "Sub", "Mul", "ReduceMean"]);
    }

    #[test]
    fn io_types_follow_the_description() {
        let model = OnnxSerializer::new().to_proto(&graph(), &desc(), &params()).unwrap();
        let graph = model.graph.unwrap();

        let x_dims = graph.input[0]
            .r#type
            .as_ref()
            .and_then(|t| t.tensor_type.as_ref())
            .and_then(|t| t.shape.as_ref())
            .map(|s| s.dim.clone())
            .unwrap();

        assert_eq!(
            x_dims,
            [
                Dimension {
                    value: Some(DimensionValue::DimParam("batch".into()))
                },
                Dimension {
                    value: Some(DimensionValue::DimValue(2))
                },
            ]
        );
        assert_eq!(graph.output[0].name, "loss");
    }

    #[test]
    fn encoded_model_decodes_back() {
        let bytes = OnnxSerializer::new()
            .serialize(&graph(), &desc(), &params())
            .unwrap();
        let model = ModelProto::decode(bytes.as_slice()).unwrap();
        assert_eq!(model.graph.unwrap().node.len(), 5);
    }

    #[test]
    fn missing_param_is_reported() {
        assert!(matches!(
            OnnxSerializer::new().to_proto(&graph(), &desc(), &TensorMap::new()),
            Err(SerializeErr::MissingParam(name)) if name == "w"
        ));
    }
}
