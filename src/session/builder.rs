use log::info;

use super::{Mode, SessionOptions, TrainingSession, session::Live};
use crate::{
    desc::ModelDescription,
    engine::{CpuEngine, EngineGuard, ExecutionEngine},
    error::{ConfigErr, Result},
    export::{GraphSerializer, OnnxSerializer},
    model::{LossFn, ModelSource},
    optimization::OptimizerConfig,
    provider::{GraphProvider, ModelGraphProvider},
    state::SessionState,
    tensor::TensorMap,
};

/// Builds new `TrainingSession`s.
///
/// Only the model, its description and the optimizer are required, the cpu engine and the
/// onnx serializer are used unless others are given.
pub struct SessionBuilder<E: ExecutionEngine = CpuEngine> {
    provider: Box<dyn GraphProvider>,
    desc: ModelDescription,
    optim: OptimizerConfig,
    loss_fn: Option<LossFn>,
    options: SessionOptions,
    engine: E,
    serializer: Box<dyn GraphSerializer>,
}

impl SessionBuilder<CpuEngine> {
    /// Creates a new `SessionBuilder`.
    ///
    /// # Arguments
    /// * `provider` - Supplies the graph to train.
    /// * `desc` - The description of the model's inputs and outputs.
    /// * `optim` - The optimizer configuration.
    pub fn new(
        provider: impl GraphProvider + 'static,
        desc: ModelDescription,
        optim: OptimizerConfig,
    ) -> Self {
        Self {
            provider: Box::new(provider),
            desc,
            optim,
            loss_fn: None,
            options: SessionOptions::default(),
            engine: CpuEngine::new(),
            serializer: Box::new(OnnxSerializer::new()),
        }
    }

    /// Creates a new `SessionBuilder` whose graph is exported from `model`.
    pub fn from_model(
        model: impl Into<ModelSource>,
        desc: ModelDescription,
        optim: OptimizerConfig,
    ) -> Self {
        Self::new(ModelGraphProvider::new(model), desc, optim)
    }
}

impl<E: ExecutionEngine> SessionBuilder<E> {
    /// Combines `loss_fn` with the model, its label becomes an extra input.
    pub fn loss_fn(mut self, loss_fn: LossFn) -> Self {
        self.loss_fn = Some(loss_fn);
        self
    }

    pub fn options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn serializer(mut self, serializer: impl GraphSerializer + 'static) -> Self {
        self.serializer = Box::new(serializer);
        self
    }

    /// Replaces the execution engine.
    pub fn engine<F: ExecutionEngine>(self, engine: F) -> SessionBuilder<F> {
        SessionBuilder {
            provider: self.provider,
            desc: self.desc,
            optim: self.optim,
            loss_fn: self.loss_fn,
            options: self.options,
            engine,
            serializer: self.serializer,
        }
    }

    /// Builds the session.
    ///
    /// The engine is prepared right after the graph is built, if anything fails afterwards it's
    /// released before returning.
    ///
    /// # Returns
    /// The session in train mode, or a configuration error.
    pub fn build(self) -> Result<TrainingSession<E>> {
        let Self {
            provider,
            desc,
            optim,
            loss_fn,
            options,
            engine,
            serializer,
        } = self;

        let loss_idx = desc.validate()?;
        let graph = provider.build(&desc, loss_fn.as_ref())?;

        let engine = EngineGuard::acquire(engine, &graph)
            .map_err(|e| ConfigErr::EnginePrepare(Box::new(e)))?;

        let groups = optim.resolve(graph.param_names())?;

        let params: TensorMap = graph
            .initializers
            .iter()
            .map(|init| (init.name.clone(), init.value.clone()))
            .collect();
        let state = SessionState::new(params, &groups);

        info!(
            inputs = desc.inputs.len(),
            outputs = desc.outputs.len(),
            params = state.params.len(),
            groups = groups.len();
            "training session ready with {} optimizer", optim.rule.name()
        );

        let live = Live {
            graph,
            engine,
            groups,
            serializer,
            state,
            mode: Mode::Train,
            last_info: None,
        };

        Ok(TrainingSession::from_parts(desc, options, loss_idx, live))
    }
}
