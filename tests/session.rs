use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
};

use ndarray::{arr1, arr2};
use training_session::{
    CpuEngine, ExecutionEngine, InputSpec, Inputs, LossFn, Mode, ModelDescription,
    OptimizerConfig, OutputSpec, ParamGroup, SessionBuilder, SessionErr, SessionOptions,
    Tensor, TrainingSession,
    engine::{ForwardBackward, RunContext},
    error::{ConfigErr, StateMismatch},
    graph::{Graph, Op},
    tensor::TensorMap,
};

/// `pred = x · w + b` with `w = [[0.5], [0.5]]` and `b = [0]`.
fn linear() -> Graph {
    Graph::new(["x"])
        .with_param("w", arr2(&[[0.5], [0.5]]).into_dyn())
        .with_param("b", arr1(&[0.]).into_dyn())
        .with_node(Op::MatMul, ["x", "w"], "xw")
        .with_node(Op::Add, ["xw", "b"], "pred")
        .with_output("pred")
}

fn linear_desc() -> ModelDescription {
    ModelDescription::new(
        vec![InputSpec::new("x", [2]), InputSpec::new("y", [1])],
        vec![OutputSpec::loss("loss"), OutputSpec::new("pred", [1])],
    )
}

fn linear_session(optim: OptimizerConfig) -> TrainingSession {
    TrainingSession::new(linear(), linear_desc(), optim, Some(LossFn::mse("y")), None).unwrap()
}

fn sample() -> Vec<Tensor> {
    vec![arr1(&[1., 2.]).into_dyn(), arr1(&[0.]).into_dyn()]
}

fn assert_close(got: &Tensor, expected: &Tensor) {
    assert_eq!(got.shape(), expected.shape());
    for (g, e) in got.iter().zip(expected) {
        assert!((g - e).abs() < 1e-6, "got {got}, expected {expected}");
    }
}

#[derive(Debug)]
struct Injected;

impl fmt::Display for Injected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("injected failure")
    }
}

impl std::error::Error for Injected {}

#[derive(Debug)]
enum ProbeErr {
    Cpu(training_session::engine::CpuErr),
    Injected(Injected),
}

impl fmt::Display for ProbeErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeErr::Cpu(e) => write!(f, "{e}"),
            ProbeErr::Injected(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ProbeErr {}

/// Runs on the cpu engine while counting releases and failing on demand.
#[derive(Default)]
struct Probe {
    inner: CpuEngine,
    releases: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
}

impl Probe {
    fn check(&self) -> Result<(), ProbeErr> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProbeErr::Injected(Injected));
        }
        Ok(())
    }
}

impl ExecutionEngine for Probe {
    type Err = ProbeErr;

    fn prepare(&mut self, graph: &Graph) -> Result<(), ProbeErr> {
        self.inner.prepare(graph).map_err(ProbeErr::Cpu)
    }

    fn run_forward(
        &mut self,
        graph: &Graph,
        params: &TensorMap,
        inputs: &TensorMap,
        ctx: &RunContext,
    ) -> Result<Vec<Tensor>, ProbeErr> {
        self.check()?;
        self.inner
            .run_forward(graph, params, inputs, ctx)
            .map_err(ProbeErr::Cpu)
    }

    fn run_forward_backward(
        &mut self,
        graph: &Graph,
        params: &TensorMap,
        inputs: &TensorMap,
        ctx: &RunContext,
    ) -> Result<ForwardBackward, ProbeErr> {
        self.check()?;
        self.inner
            .run_forward_backward(graph, params, inputs, ctx)
            .map_err(ProbeErr::Cpu)
    }

    fn release(&mut self) {
        self.inner.release();
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// The shared counters of a `Probe` handed to a session.
struct Handle {
    releases: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
}

fn probed(optim: OptimizerConfig) -> (Result<TrainingSession<Probe>, SessionErr>, Handle) {
    let probe = Probe::default();
    let handle = Handle {
        releases: probe.releases.clone(),
        fail: probe.fail.clone(),
    };

    let session = SessionBuilder::from_model(linear(), linear_desc(), optim)
        .loss_fn(LossFn::mse("y"))
        .engine(probe)
        .build();

    (session, handle)
}

#[test]
fn worked_example_single_sgd_step() {
    let session = linear_session(OptimizerConfig::sgd(0.1));
    assert_eq!(session.step_count().unwrap(), 0);

    let result = session.train_step(sample()).unwrap();
    assert_close(&result.outputs[0], &training_session::tensor::scalar(2.25));
    assert_close(&result.outputs[1], &arr1(&[1.5]).into_dyn());
    assert_eq!(result.info.step, 1);
    assert!(result.info.all_finite);
    assert!(!result.info.skipped);

    let state = session.state_dict().unwrap();
    assert_eq!(state.step, Some(1));
    assert_close(&state.params["w"], &arr2(&[[0.2], [-0.1]]).into_dyn());
    assert_close(&state.params["b"], &arr1(&[-0.3]).into_dyn());
}

#[test]
fn identical_construction_yields_identical_state_layout() {
    let optim = OptimizerConfig::adam(1e-3);
    let a = linear_session(optim.clone()).state_dict().unwrap();
    let b = linear_session(optim).state_dict().unwrap();

    assert_eq!(a.keys(), b.keys());
    for (name, tensor) in &a.params {
        assert_eq!(tensor.shape(), b.params[name].shape());
    }
    assert_eq!(a, b);
}

#[test]
fn mode_transitions_are_pure() {
    let session = linear_session(OptimizerConfig::sgd(0.1));
    let before = session.state_dict().unwrap();
    assert_eq!(session.mode().unwrap(), Mode::Train);

    session.eval().unwrap();
    assert_eq!(session.mode().unwrap(), Mode::Eval);
    session.train().unwrap();
    session.train().unwrap();
    assert_eq!(session.mode().unwrap(), Mode::Train);

    assert_eq!(session.state_dict().unwrap(), before);
}

#[test]
fn every_train_step_advances_the_counter() {
    let session = linear_session(OptimizerConfig::adam(1e-2));
    for _ in 0..5 {
        session.train_step(sample()).unwrap();
    }

    assert_eq!(session.step_count().unwrap(), 5);
    assert_eq!(session.last_step_info().unwrap().map(|info| info.step), Some(5));
}

#[test]
fn eval_step_leaves_the_state_untouched() {
    let session = linear_session(OptimizerConfig::sgd(0.1));
    session.train_step(sample()).unwrap();
    let before = session.state_dict().unwrap();

    let outputs = session.eval_step(sample()).unwrap();
    assert_eq!(outputs.len(), 2);
    assert_eq!(session.state_dict().unwrap(), before);
}

#[test]
fn named_and_positional_inputs_bind_the_same() {
    let a = linear_session(OptimizerConfig::sgd(0.1));
    let b = linear_session(OptimizerConfig::sgd(0.1));

    let positional = a.eval_step(sample()).unwrap();
    let named = b
        .eval_step(Inputs::new().arg(arr1(&[1., 2.]).into_dyn()).kwarg("y", arr1(&[0.]).into_dyn()))
        .unwrap();

    assert_eq!(positional, named);
}

#[test]
fn step_follows_the_mode() {
    let session = linear_session(OptimizerConfig::sgd(0.1));

    session.step(sample()).unwrap();
    assert_eq!(session.step_count().unwrap(), 1);

    session.eval().unwrap();
    let before = session.state_dict().unwrap();
    session.step(sample()).unwrap();
    assert_eq!(session.state_dict().unwrap(), before);
}

#[test]
fn strict_load_of_own_snapshot_is_a_no_op() {
    let session = linear_session(OptimizerConfig::adam(1e-2));
    session.train_step(sample()).unwrap();

    let snapshot = session.state_dict().unwrap();
    session.load_state_dict(&snapshot, true).unwrap();
    assert_eq!(session.state_dict().unwrap(), snapshot);
}

#[test]
fn strict_load_with_missing_key_fails_without_changes() {
    let session = linear_session(OptimizerConfig::sgd(0.1));
    let before = session.state_dict().unwrap();

    let mut snapshot = before.clone();
    snapshot.params.remove("b");
    snapshot.params.insert("w".into(), arr2(&[[9.], [9.]]).into_dyn());

    match session.load_state_dict(&snapshot, true) {
        Err(SessionErr::StateMismatch(StateMismatch::Keys { missing, .. })) => {
            assert_eq!(missing, ["b"]);
        }
        other => panic!("expected a key mismatch, got {other:?}"),
    }
    assert_eq!(session.state_dict().unwrap(), before);
}

#[test]
fn snapshot_moves_training_between_sessions() {
    let trained = linear_session(OptimizerConfig::adam(1e-2));
    for _ in 0..3 {
        trained.train_step(sample()).unwrap();
    }

    let fresh = linear_session(OptimizerConfig::adam(1e-2));
    fresh.load_state_dict(&trained.state_dict().unwrap(), true).unwrap();
    assert_eq!(fresh.state_dict().unwrap(), trained.state_dict().unwrap());

    let a = trained.train_step(sample()).unwrap();
    let b = fresh.train_step(sample()).unwrap();
    assert_eq!(a.outputs, b.outputs);
}

#[test]
fn arity_error_is_reported_before_execution() {
    let session = linear_session(OptimizerConfig::sgd(0.1));
    let before = session.state_dict().unwrap();

    let err = session
        .train_step(vec![arr1(&[1., 2.]).into_dyn()])
        .unwrap_err();

    assert!(matches!(err, SessionErr::InputBinding(_)));
    assert_eq!(session.step_count().unwrap(), 0);
    assert_eq!(session.state_dict().unwrap(), before);
}

#[test]
fn shape_error_is_reported_before_execution() {
    let session = linear_session(OptimizerConfig::sgd(0.1));
    let err = session
        .train_step(vec![arr1(&[1., 2., 3.]).into_dyn(), arr1(&[0.]).into_dyn()])
        .unwrap_err();

    assert!(matches!(err, SessionErr::InputBinding(_)));
    assert_eq!(session.step_count().unwrap(), 0);
}

#[test]
fn execution_error_leaves_the_state_untouched() {
    let (session, probe) = probed(OptimizerConfig::sgd(0.1));
    let session = session.unwrap();
    session.train_step(sample()).unwrap();
    let before = session.state_dict().unwrap();

    probe.fail.store(true, Ordering::SeqCst);
    assert!(matches!(
        session.train_step(sample()),
        Err(SessionErr::Execution(_))
    ));
    assert!(matches!(
        session.eval_step(sample()),
        Err(SessionErr::Execution(_))
    ));
    assert_eq!(session.state_dict().unwrap(), before);

    probe.fail.store(false, Ordering::SeqCst);
    session.train_step(sample()).unwrap();
    assert_eq!(session.step_count().unwrap(), 2);
}

#[test]
fn non_finite_gradients_skip_the_update() {
    let session = linear_session(OptimizerConfig::sgd(0.1));
    let before = session.state_dict().unwrap();

    let result = session
        .train_step(vec![arr1(&[f32::NAN, 1.]).into_dyn(), arr1(&[0.]).into_dyn()])
        .unwrap();

    assert!(!result.info.all_finite);
    assert!(result.info.skipped);

    let after = session.state_dict().unwrap();
    assert_eq!(after.step, Some(1));
    assert_eq!(after.params, before.params);
}

#[test]
fn non_finite_gradients_apply_when_not_skipping() {
    let options = SessionOptions {
        skip_nonfinite_updates: false,
        ..Default::default()
    };
    let session = TrainingSession::new(
        linear(),
        linear_desc(),
        OptimizerConfig::sgd(0.1),
        Some(LossFn::mse("y")),
        Some(options),
    )
    .unwrap();

    let result = session
        .train_step(vec![arr1(&[f32::NAN, 1.]).into_dyn(), arr1(&[0.]).into_dyn()])
        .unwrap();

    assert!(!result.info.skipped);
    assert!(session.state_dict().unwrap().params["w"].iter().any(|v| v.is_nan()));
}

#[test]
fn close_releases_the_engine_once() {
    let (session, probe) = probed(OptimizerConfig::sgd(0.1));
    let session = session.unwrap();

    session.close().unwrap();
    assert!(session.is_closed());
    assert_eq!(probe.releases.load(Ordering::SeqCst), 1);

    assert!(matches!(session.close(), Err(SessionErr::Lifecycle)));
    drop(session);
    assert_eq!(probe.releases.load(Ordering::SeqCst), 1);
}

#[test]
fn drop_releases_the_engine() {
    let (session, probe) = probed(OptimizerConfig::sgd(0.1));
    drop(session.unwrap());
    assert_eq!(probe.releases.load(Ordering::SeqCst), 1);
}

#[test]
fn optimizer_config_failure_releases_the_engine() {
    let optim = OptimizerConfig::sgd(0.1).with_group(ParamGroup::new(["missing"]));
    let (session, probe) = probed(optim);

    assert!(matches!(
        session,
        Err(SessionErr::Configuration(ConfigErr::UnknownParam { .. }))
    ));
    assert_eq!(probe.releases.load(Ordering::SeqCst), 1);
}

#[test]
fn every_operation_fails_after_close() {
    let session = linear_session(OptimizerConfig::sgd(0.1));
    session.close().unwrap();

    assert!(matches!(session.train_step(sample()), Err(SessionErr::Lifecycle)));
    assert!(matches!(session.eval_step(sample()), Err(SessionErr::Lifecycle)));
    assert!(matches!(session.state_dict(), Err(SessionErr::Lifecycle)));
    assert!(matches!(session.train(), Err(SessionErr::Lifecycle)));
    assert!(matches!(session.save_as_onnx("unused.onnx"), Err(SessionErr::Lifecycle)));
}

#[test]
fn concurrent_train_steps_are_serialized() {
    let session = Arc::new(linear_session(OptimizerConfig::sgd(0.01)));
    let threads = 4;
    let steps = 10;

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let session = session.clone();
            thread::spawn(move || {
                for _ in 0..steps {
                    session.train_step(sample()).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(session.step_count().unwrap(), (threads * steps) as u64);

    let sequential = linear_session(OptimizerConfig::sgd(0.01));
    for _ in 0..threads * steps {
        sequential.train_step(sample()).unwrap();
    }
    let expected = sequential.state_dict().unwrap();
    let got = session.state_dict().unwrap();
    for (name, tensor) in &expected.params {
        assert_close(&got.params[name], tensor);
    }
}

#[test]
fn onnx_export_writes_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("linear.onnx");

    let session = linear_session(OptimizerConfig::sgd(0.1));
    session.train_step(sample()).unwrap();
    session.save_as_onnx(&path).unwrap();

    assert!(std::fs::metadata(&path).unwrap().len() > 0);
}

#[test]
fn onnx_export_to_a_missing_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("linear.onnx");

    let session = linear_session(OptimizerConfig::sgd(0.1));
    assert!(matches!(
        session.save_as_onnx(&path),
        Err(SessionErr::Serialization(_))
    ));
}

#[test]
fn group_overrides_drive_their_parameters() {
    let optim = OptimizerConfig::sgd(0.1).with_group(ParamGroup::new(["b"]).with("lr", 1.0));
    let session = linear_session(optim);

    session.train_step(sample()).unwrap();

    let state = session.state_dict().unwrap();
    assert_close(&state.params["w"], &arr2(&[[0.2], [-0.1]]).into_dyn());
    assert_close(&state.params["b"], &arr1(&[-3.]).into_dyn());
}

#[test]
fn embedded_loss_with_a_single_output() {
    let model = Graph::new(["x", "y"])
        .with_param("w", arr2(&[[0.5], [0.5]]).into_dyn())
        .with_param("b", arr1(&[0.]).into_dyn())
        .with_node(Op::MatMul, ["x", "w"], "xw")
        .with_node(Op::Add, ["xw", "b"], "pred")
        .with_node(Op::Mse, ["pred", "y"], "loss")
        .with_output("loss");
    let desc = ModelDescription::new(
        vec![InputSpec::new("x", [2]), InputSpec::new("y", [1])],
        vec![OutputSpec::loss("loss")],
    );
    let session =
        TrainingSession::new(model, desc, OptimizerConfig::sgd(0.1), None, None).unwrap();

    let result = session
        .train_step(Inputs::named([
            ("x", arr1(&[1., 2.]).into_dyn()),
            ("y", arr1(&[0.]).into_dyn()),
        ]))
        .unwrap();

    assert_eq!(result.outputs.len(), 1);
    assert_close(&result.outputs[0], &training_session::tensor::scalar(2.25));
    assert_eq!(session.step_count().unwrap(), 1);

    let err = session
        .train_step(vec![arr1(&[1., 2.]).into_dyn()])
        .unwrap_err();
    assert!(matches!(err, SessionErr::InputBinding(_)));
    assert_eq!(session.step_count().unwrap(), 1);
}

#[test]
fn corrupt_optimizer_step_fails_the_update_atomically() {
    let session = linear_session(OptimizerConfig::adam(1e-2));
    let mut snapshot = session.state_dict().unwrap();
    for slots in snapshot.optimizer.values_mut() {
        slots.insert("step".into(), training_session::tensor::scalar(-1.));
    }
    session.load_state_dict(&snapshot, true).unwrap();

    assert!(matches!(
        session.train_step(sample()),
        Err(SessionErr::Execution(_))
    ));
    assert_eq!(session.state_dict().unwrap(), snapshot);
}
