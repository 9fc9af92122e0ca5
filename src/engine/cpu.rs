use std::{
    collections::HashMap,
    error::Error,
    fmt::{self, Display},
};

use log::debug;
use ndarray::{ArrayD, IxDyn};
use rand::{SeedableRng, rngs::StdRng};

use super::{
    ExecutionEngine, ForwardBackward, RunContext,
    kernels::{self, Incompatible},
};
use crate::{
    graph::{Graph, GraphErr, Op},
    session::Mode,
    tensor::{Tensor, TensorMap},
};

/// Failures of the cpu engine.
#[derive(Debug, Clone, PartialEq)]
pub enum CpuErr {
    NotPrepared,
    PlanMismatch,
    Graph(GraphErr),
    MissingValue(String),
    ShapeMismatch {
        node: String,
        op: &'static str,
        lhs: Vec<usize>,
        rhs: Vec<usize>,
    },
    NoLoss,
    NonScalarLoss {
        name: String,
        len: usize,
    },
}

impl Display for CpuErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuErr::NotPrepared => f.write_str("the engine wasn't prepared"),
            CpuErr::PlanMismatch => f.write_str("the graph differs from the prepared one"),
            CpuErr::Graph(e) => write!(f, "invalid graph: {e}"),
            CpuErr::MissingValue(name) => write!(f, "no value was given for {name}"),
            CpuErr::ShapeMismatch { node, op, lhs, rhs } => write!(
                f,
                "node {node} can't apply {op} to shapes {lhs:?} and {rhs:?}"
            ),
            CpuErr::NoLoss => f.write_str("the graph has no loss output to backpropagate"),
            CpuErr::NonScalarLoss { name, len } => {
                write!(f, "loss {name} holds {len} elements, expected a single one")
            }
        }
    }
}

impl Error for CpuErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CpuErr::Graph(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GraphErr> for CpuErr {
    fn from(value: GraphErr) -> Self {
        Self::Graph(value)
    }
}

/// A node with its operands resolved to value slots.
struct Step {
    op: Op,
    name: String,
    args: Vec<usize>,
    out: usize,
}

/// The graph compiled to slot indices by `prepare`.
struct Plan {
    inputs: Vec<(String, usize)>,
    params: Vec<(String, usize)>,
    steps: Vec<Step>,
    outputs: Vec<usize>,
    loss: Option<(String, usize)>,
    slots: usize,
}

impl Plan {
    fn compile(graph: &Graph) -> Result<Self, GraphErr> {
        graph.validate()?;

        let mut slots = HashMap::new();

        let inputs = graph
            .inputs
            .iter()
            .map(|name| (name.clone(), slot_of(&mut slots, name)))
            .collect();

        let params = graph
            .param_names()
            .map(|name| (name.to_string(), slot_of(&mut slots, name)))
            .collect();

        let steps = graph
            .nodes
            .iter()
            .map(|node| Step {
                op: node.op,
                name: node.output.clone(),
                args: node.inputs.iter().map(|i| slot_of(&mut slots, i)).collect(),
                out: slot_of(&mut slots, &node.output),
            })
            .collect();

        let outputs = graph
            .outputs
            .iter()
            .map(|o| slot_of(&mut slots, o))
            .collect();
        let loss = graph
            .loss
            .as_ref()
            .map(|name| (name.clone(), slot_of(&mut slots, name)));

        Ok(Self {
            inputs,
            params,
            steps,
            outputs,
            loss,
            slots: slots.len(),
        })
    }

    fn matches(&self, graph: &Graph) -> bool {
        self.inputs.len() == graph.inputs.len()
            && self.params.len() == graph.initializers.len()
            && self.steps.len() == graph.nodes.len()
            && self.outputs.len() == graph.outputs.len()
    }
}

fn slot_of(slots: &mut HashMap<String, usize>, name: &str) -> usize {
    let next = slots.len();
    *slots.entry(name.to_string()).or_insert(next)
}

/// Values computed by a forward pass, kept around for the backward one.
struct Tape {
    values: Vec<Option<Tensor>>,
    masks: Vec<Option<Tensor>>,
}

impl Tape {
    fn get(&self, slot: usize) -> Result<&Tensor, CpuErr> {
        self.values[slot].as_ref().ok_or(CpuErr::PlanMismatch)
    }

    fn get_all(&self, slots: &[usize]) -> Result<Vec<&Tensor>, CpuErr> {
        slots.iter().map(|&slot| self.get(slot)).collect()
    }
}

/// The reference engine: interprets the graph on the cpu with `ndarray` and differentiates it
/// in reverse mode over the recorded tape.
#[derive(Default)]
pub struct CpuEngine {
    plan: Option<Plan>,
}

impl CpuEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn plan_for(&self, graph: &Graph) -> Result<&Plan, CpuErr> {
        let plan = self.plan.as_ref().ok_or(CpuErr::NotPrepared)?;
        if !plan.matches(graph) {
            return Err(CpuErr::PlanMismatch);
        }

        Ok(plan)
    }

    fn forward(
        plan: &Plan,
        params: &TensorMap,
        inputs: &TensorMap,
        ctx: &RunContext,
    ) -> Result<Tape, CpuErr> {
        let mut tape = Tape {
            values: vec![None; plan.slots],
            masks: vec![None; plan.steps.len()],
        };

        let sources = plan
            .inputs
            .iter()
            .map(|(name, slot)| (name, slot, inputs.get(name)))
            .chain(
                plan.params
                    .iter()
                    .map(|(name, slot)| (name, slot, params.get(name))),
            );

        for (name, &slot, value) in sources {
            let value = value.ok_or_else(|| CpuErr::MissingValue(name.clone()))?;
            tape.values[slot] = Some(value.clone());
        }

        let mut rng = match ctx.mode {
            Mode::Train => Some(StdRng::seed_from_u64(ctx.seed)),
            Mode::Eval => None,
        };

        for (i, step) in plan.steps.iter().enumerate() {
            let args = tape.get_all(&step.args)?;
            let (out, mask) = kernels::forward(step.op, &args, rng.as_mut())
                .map_err(|e| shape_mismatch(step, e))?;

            tape.masks[i] = mask;
            tape.values[step.out] = Some(out);
        }

        Ok(tape)
    }

    fn collect_outputs(plan: &Plan, tape: &Tape) -> Result<Vec<Tensor>, CpuErr> {
        let outputs = tape.get_all(&plan.outputs)?;
        Ok(outputs.into_iter().cloned().collect())
    }
}

fn shape_mismatch(step: &Step, Incompatible { lhs, rhs }: Incompatible) -> CpuErr {
    CpuErr::ShapeMismatch {
        node: step.name.clone(),
        op: step.op.name(),
        lhs,
        rhs,
    }
}

fn accumulate(grads: &mut [Option<Tensor>], slot: usize, grad: Tensor) {
    grads[slot] = Some(match grads[slot].take() {
        Some(acc) => acc + grad,
        None => grad,
    });
}

impl ExecutionEngine for CpuEngine {
    type Err = CpuErr;

    fn prepare(&mut self, graph: &Graph) -> Result<(), CpuErr> {
        let plan = Plan::compile(graph)?;
        debug!(steps = plan.steps.len(), slots = plan.slots; "cpu engine prepared");
        self.plan = Some(plan);
        Ok(())
    }

    fn run_forward(
        &mut self,
        graph: &Graph,
        params: &TensorMap,
        inputs: &TensorMap,
        ctx: &RunContext,
    ) -> Result<Vec<Tensor>, CpuErr> {
        let plan = self.plan_for(graph)?;
        let tape = Self::forward(plan, params, inputs, ctx)?;
        Self::collect_outputs(plan, &tape)
    }

    fn run_forward_backward(
        &mut self,
        graph: &Graph,
        params: &TensorMap,
        inputs: &TensorMap,
        ctx: &RunContext,
    ) -> Result<ForwardBackward, CpuErr> {
        let plan = self.plan_for(graph)?;
        let (loss_name, loss_slot) = plan.loss.as_ref().ok_or(CpuErr::NoLoss)?;

        let tape = Self::forward(plan, params, inputs, ctx)?;

        let loss = tape.get(*loss_slot)?;
        if loss.len() != 1 {
            return Err(CpuErr::NonScalarLoss {
                name: loss_name.clone(),
                len: loss.len(),
            });
        }

        let mut grads: Vec<Option<Tensor>> = vec![None; plan.slots];
        grads[*loss_slot] = Some(ArrayD::ones(loss.raw_dim()));

        for (i, step) in plan.steps.iter().enumerate().rev() {
            let Some(grad) = grads[step.out].take() else {
                continue;
            };

            let args = tape.get_all(&step.args)?;
            let arg_grads = kernels::backward(
                step.op,
                &args,
                tape.get(step.out)?,
                &grad,
                tape.masks[i].as_ref(),
            )
            .map_err(|e| shape_mismatch(step, e))?;

            for (&slot, arg_grad) in step.args.iter().zip(arg_grads) {
                accumulate(&mut grads, slot, arg_grad);
            }
        }

        let mut gradients = TensorMap::new();
        for (name, slot) in &plan.params {
            let grad = match grads[*slot].take() {
                Some(grad) => grad,
                None => ArrayD::zeros(IxDyn(tape.get(*slot)?.shape())),
            };
            gradients.insert(name.clone(), grad);
        }

        Ok(ForwardBackward {
            outputs: Self::collect_outputs(plan, &tape)?,
            gradients,
        })
    }

    fn release(&mut self) {
        if self.plan.take().is_some() {
            debug!("cpu engine released");
        }
    }
}
