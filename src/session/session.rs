use std::{error::Error, path::Path};

use log::{debug, info, warn};
use parking_lot::Mutex;

use super::{Mode, SessionOptions, StepInfo, StepResult, check_outputs, step_seed};
use crate::{
    binding::{Inputs, bind},
    desc::ModelDescription,
    engine::{CpuEngine, EngineGuard, ExecutionEngine, ForwardBackward, RunContext},
    error::{Result, SessionErr},
    export::GraphSerializer,
    graph::Graph,
    model::{LossFn, ModelSource},
    optimization::{GroupPlan, OptimizerConfig},
    state::{SessionState, StateDict},
    tensor::{Tensor, is_finite},
};

fn execution<E: Error + Send + Sync + 'static>(e: E) -> SessionErr {
    SessionErr::Execution(Box::new(e))
}

/// Everything a session holds between construction and teardown.
pub(super) struct Live<E: ExecutionEngine> {
    pub(super) graph: Graph,
    pub(super) engine: EngineGuard<E>,
    pub(super) groups: Vec<GroupPlan>,
    pub(super) serializer: Box<dyn GraphSerializer>,
    pub(super) state: SessionState,
    pub(super) mode: Mode,
    pub(super) last_info: Option<StepInfo>,
}

/// Drives the training of a model: binds inputs, runs the engine and applies the optimizer.
///
/// Steps are serialized: concurrent calls on the same session wait for each other, calls on
/// different sessions are independent. Every step either succeeds entirely or leaves the
/// session state as it was.
pub struct TrainingSession<E: ExecutionEngine = CpuEngine> {
    desc: ModelDescription,
    options: SessionOptions,
    loss_idx: usize,
    inner: Mutex<Option<Live<E>>>,
}

impl TrainingSession<CpuEngine> {
    /// Creates a new `TrainingSession` running on the cpu engine.
    ///
    /// # Arguments
    /// * `model` - The model to train.
    /// * `desc` - The description of the model's inputs and outputs.
    /// * `optim` - The optimizer configuration.
    /// * `loss_fn` - An optional loss function combined with the model.
    /// * `options` - Optional session settings.
    ///
    /// # Returns
    /// The session in train mode, or a configuration error.
    pub fn new(
        model: impl Into<ModelSource>,
        desc: ModelDescription,
        optim: OptimizerConfig,
        loss_fn: Option<LossFn>,
        options: Option<SessionOptions>,
    ) -> Result<Self> {
        let mut builder = super::SessionBuilder::from_model(model, desc, optim)
            .options(options.unwrap_or_default());

        if let Some(loss_fn) = loss_fn {
            builder = builder.loss_fn(loss_fn);
        }

        builder.build()
    }
}

impl<E: ExecutionEngine> TrainingSession<E> {
    pub(super) fn from_parts(
        desc: ModelDescription,
        options: SessionOptions,
        loss_idx: usize,
        live: Live<E>,
    ) -> Self {
        Self {
            desc,
            options,
            loss_idx,
            inner: Mutex::new(Some(live)),
        }
    }

    /// Runs `f` on the live session, or fails if it was torn down.
    fn with_live<T>(&self, f: impl FnOnce(&mut Live<E>) -> Result<T>) -> Result<T> {
        let mut inner = self.inner.lock();
        let live = inner.as_mut().ok_or(SessionErr::Lifecycle)?;
        f(live)
    }

    pub fn model_desc(&self) -> &ModelDescription {
        &self.desc
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Switches to train mode, dropout becomes active for `step`.
    pub fn train(&self) -> Result<()> {
        self.with_live(|live| {
            live.mode = Mode::Train;
            Ok(())
        })
    }

    /// Switches to eval mode, dropout becomes inactive for `step`.
    pub fn eval(&self) -> Result<()> {
        self.with_live(|live| {
            live.mode = Mode::Eval;
            Ok(())
        })
    }

    pub fn mode(&self) -> Result<Mode> {
        self.with_live(|live| Ok(live.mode))
    }

    /// Runs a forward and backward pass and updates the parameters once.
    ///
    /// Dropout is active regardless of the current mode. The step counter advances by one on
    /// success, any error leaves parameters, optimizer state and counter untouched.
    ///
    /// # Arguments
    /// * `inputs` - The step's arguments, bound to the declared inputs.
    ///
    /// # Returns
    /// The outputs, ordered as declared, together with the step's metadata.
    pub fn train_step(&self, inputs: impl Into<Inputs>) -> Result<StepResult> {
        let inputs = inputs.into();
        self.with_live(|live| self.run_train_step(live, inputs))
    }

    /// Runs a forward pass without touching the session state.
    ///
    /// Dropout is inactive regardless of the current mode.
    ///
    /// # Arguments
    /// * `inputs` - The step's arguments, bound to the declared inputs.
    ///
    /// # Returns
    /// The outputs, ordered as declared.
    pub fn eval_step(&self, inputs: impl Into<Inputs>) -> Result<Vec<Tensor>> {
        let inputs = inputs.into();
        self.with_live(|live| self.run_eval_step(live, inputs))
    }

    /// Runs `train_step` in train mode and `eval_step` in eval mode.
    pub fn step(&self, inputs: impl Into<Inputs>) -> Result<Vec<Tensor>> {
        let inputs = inputs.into();
        self.with_live(|live| match live.mode {
            Mode::Train => self.run_train_step(live, inputs).map(|r| r.outputs),
            Mode::Eval => self.run_eval_step(live, inputs),
        })
    }

    fn run_train_step(&self, live: &mut Live<E>, inputs: Inputs) -> Result<StepResult> {
        let bound = bind(&self.desc, inputs)?;
        let ctx = RunContext {
            mode: Mode::Train,
            seed: step_seed(self.options.seed, live.state.step),
        };

        let ForwardBackward { outputs, gradients } = live
            .engine
            .run_forward_backward(&live.graph, &live.state.params, &bound, &ctx)
            .map_err(execution)?;
        check_outputs(&self.desc, &outputs).map_err(execution)?;

        let all_finite = gradients.values().all(is_finite);
        let skipped = !all_finite && self.options.skip_nonfinite_updates;

        if skipped {
            warn!(step = live.state.step; "non finite gradients, skipping the update");
        } else {
            let mut params = live.state.params.clone();
            let mut optim = live.state.optim.clone();

            for group in &live.groups {
                group
                    .apply(&mut params, &gradients, &mut optim)
                    .map_err(execution)?;
            }

            live.state.params = params;
            live.state.optim = optim;
        }

        live.state.step += 1;
        let info = StepInfo {
            step: live.state.step,
            all_finite,
            skipped,
        };
        live.last_info = Some(info);

        let loss = outputs[self.loss_idx].iter().next().copied().unwrap_or(f32::NAN);
        debug!(step = info.step, loss = loss, skipped = skipped; "train step finished");

        Ok(StepResult { outputs, info })
    }

    fn run_eval_step(&self, live: &mut Live<E>, inputs: Inputs) -> Result<Vec<Tensor>> {
        let bound = bind(&self.desc, inputs)?;
        let ctx = RunContext {
            mode: Mode::Eval,
            seed: step_seed(self.options.seed, live.state.step),
        };

        let outputs = live
            .engine
            .run_forward(&live.graph, &live.state.params, &bound, &ctx)
            .map_err(execution)?;
        check_outputs(&self.desc, &outputs).map_err(execution)?;

        debug!(step = live.state.step; "eval step finished");
        Ok(outputs)
    }

    /// Returns a snapshot of the parameters, the optimizer state and the step counter.
    pub fn state_dict(&self) -> Result<StateDict> {
        self.with_live(|live| Ok(live.state.snapshot()))
    }

    /// Loads a snapshot, atomically: either every applied key is written or none is.
    ///
    /// The step counter is restored only if the snapshot carries one and
    /// `SessionOptions::restore_step_on_load` is set.
    ///
    /// # Arguments
    /// * `state` - The snapshot to load.
    /// * `strict` - Whether the snapshot's keys must match the session's exactly, otherwise
    ///   only the keys both sides have are applied.
    pub fn load_state_dict(&self, state: &StateDict, strict: bool) -> Result<()> {
        self.with_live(|live| {
            live.state = live
                .state
                .loaded(state, strict, self.options.restore_step_on_load)?;

            info!(strict = strict, step = live.state.step; "state loaded");
            Ok(())
        })
    }

    /// Exports the graph with the current parameter values to `path`.
    pub fn save_as_onnx(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.with_live(|live| {
            live.serializer
                .write(&live.graph, &self.desc, &live.state.params, path)?;

            info!("model exported to {}", path.display());
            Ok(())
        })
    }

    /// Returns the amount of train steps taken.
    pub fn step_count(&self) -> Result<u64> {
        self.with_live(|live| Ok(live.state.step))
    }

    /// Returns the metadata of the latest train step, if any.
    pub fn last_step_info(&self) -> Result<Option<StepInfo>> {
        self.with_live(|live| Ok(live.last_info))
    }

    /// Releases the engine. Every later call fails with `SessionErr::Lifecycle`.
    pub fn close(&self) -> Result<()> {
        let live = self.inner.lock().take().ok_or(SessionErr::Lifecycle)?;
        let step = live.state.step;
        live.engine.release();

        info!(step = step; "training session closed");
        Ok(())
    }

    /// Returns whether `close` was called.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().is_none()
    }
}
