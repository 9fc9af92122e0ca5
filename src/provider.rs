use std::collections::BTreeSet;

use crate::{
    desc::ModelDescription,
    error::ConfigErr,
    graph::Graph,
    model::{ExportGraph, LossFn, ModelSource},
};

/// Supplies the computation graph a session trains.
pub trait GraphProvider {
    /// Builds the graph described by `desc`, combining it with `loss` if one is given.
    ///
    /// The returned graph exposes outputs named and ordered exactly as `desc.outputs`, has
    /// its loss output flagged, and reads exactly the inputs declared in `desc.inputs`.
    ///
    /// # Arguments
    /// * `desc` - The model description.
    /// * `loss` - An optional loss function to combine with the model.
    ///
    /// # Returns
    /// The graph or the configuration error found.
    fn build(&self, desc: &ModelDescription, loss: Option<&LossFn>) -> Result<Graph, ConfigErr>;
}

/// The default `GraphProvider`: exports a `ModelSource` and binds it to the description.
pub struct ModelGraphProvider {
    model: ModelSource,
}

impl ModelGraphProvider {
    pub fn new(model: impl Into<ModelSource>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

impl GraphProvider for ModelGraphProvider {
    fn build(&self, desc: &ModelDescription, loss: Option<&LossFn>) -> Result<Graph, ConfigErr> {
        let loss_idx = desc.validate()?;
        let model = self.model.export_graph()?;

        let (mut graph, sources) = match loss {
            Some(loss_fn) => {
                check_label(desc, loss_fn)?;
                let combined = Graph::combine(model, loss_fn.export_graph()?)?;
                let sources = combined_sources(desc, loss_idx, &combined)?;
                (combined, sources)
            }
            None => {
                check_arity(desc, &model)?;
                let sources = model.outputs.clone();
                (model, sources)
            }
        };

        check_inputs(desc, &graph)?;

        let bindings: Vec<_> = desc
            .output_names()
            .map(String::from)
            .zip(sources)
            .collect();

        graph.bind_outputs(&bindings, &desc.outputs[loss_idx].name)?;
        Ok(graph)
    }
}

/// Maps each declared output to the value it exposes in a combined graph: the loss entry to
/// the loss output, the rest positionally to the model outputs that follow it.
fn combined_sources(
    desc: &ModelDescription,
    loss_idx: usize,
    graph: &Graph,
) -> Result<Vec<String>, ConfigErr> {
    check_arity(desc, graph)?;

    let mut model_outputs = graph.outputs.iter().skip(1);
    let sources = (0..desc.outputs.len())
        .map(|i| {
            if i == loss_idx {
                graph.outputs[0].clone()
            } else {
                model_outputs.next().cloned().unwrap_or_default()
            }
        })
        .collect();

    Ok(sources)
}

/// The label a loss function reads must be a declared input.
fn check_label(desc: &ModelDescription, loss_fn: &LossFn) -> Result<(), ConfigErr> {
    match loss_fn.label() {
        Some(label) if !desc.input_names().any(|name| name == label) => {
            Err(ConfigErr::InputMismatch {
                missing: vec![label.to_string()],
                unexpected: Vec::new(),
            })
        }
        _ => Ok(()),
    }
}

fn check_arity(desc: &ModelDescription, graph: &Graph) -> Result<(), ConfigErr> {
    if desc.outputs.len() != graph.outputs.len() {
        return Err(ConfigErr::OutputArity {
            got: graph.outputs.len(),
            expected: desc.outputs.len(),
        });
    }

    Ok(())
}

/// Declared inputs must match the graph inputs one to one.
fn check_inputs(desc: &ModelDescription, graph: &Graph) -> Result<(), ConfigErr> {
    let declared: BTreeSet<_> = desc.input_names().collect();
    let actual: BTreeSet<_> = graph.inputs.iter().map(String::as_str).collect();

    if declared == actual && declared.len() == graph.inputs.len() {
        return Ok(());
    }

    Err(ConfigErr::InputMismatch {
        missing: actual.difference(&declared).map(|s| s.to_string()).collect(),
        unexpected: declared.difference(&actual).map(|s| s.to_string()).collect(),
    })
}
