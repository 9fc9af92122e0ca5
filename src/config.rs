use std::{
    collections::BTreeMap,
    fs::File,
    io::BufReader,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    desc::ModelDescription,
    error::{ConfigErr, Result, SerializeErr},
    model::{LossFn, ModelSource},
    optimization::OptimizerConfig,
    session::{SessionBuilder, SessionOptions, TrainingSession},
    tensor::{RawTensor, TensorMap},
};

/// Everything needed to build a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSpec {
    pub model: ModelSource,
    pub model_desc: ModelDescription,
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub loss: Option<LossFn>,
    #[serde(default)]
    pub options: SessionOptions,
}

impl SessionSpec {
    /// Builds a session on the cpu engine.
    pub fn build(self) -> Result<TrainingSession> {
        let mut builder = SessionBuilder::from_model(self.model, self.model_desc, self.optimizer)
            .options(self.options);

        if let Some(loss) = self.loss {
            builder = builder.loss_fn(loss);
        }

        builder.build()
    }
}

/// A training run: a session, the samples it's fed and where its results go.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainSpec {
    pub session: SessionSpec,
    pub epochs: NonZeroUsize,
    /// Every sample binds its tensors to the declared inputs by name.
    pub samples: Vec<BTreeMap<String, RawTensor>>,
    /// A snapshot to load non strictly before training.
    #[serde(default)]
    pub resume: Option<PathBuf>,
    #[serde(default)]
    pub checkpoint: Option<PathBuf>,
    #[serde(default)]
    pub onnx: Option<PathBuf>,
}

impl TrainSpec {
    /// Reads a `TrainSpec` from a json file.
    pub fn from_file(path: impl AsRef<Path>) -> std::result::Result<Self, SerializeErr> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Converts the samples to tensors.
    ///
    /// # Returns
    /// The samples or an error naming the first tensor whose data doesn't fit its shape.
    pub fn tensors(&self) -> std::result::Result<Vec<TensorMap>, ConfigErr> {
        self.samples
            .iter()
            .enumerate()
            .map(|(i, sample)| {
                sample
                    .iter()
                    .map(|(name, raw)| {
                        let tensor = raw.clone().into_tensor().ok_or_else(|| {
                            ConfigErr::MalformedSample {
                                sample: i,
                                name: name.clone(),
                            }
                        })?;
                        Ok::<_, ConfigErr>((name.clone(), tensor))
                    })
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: &str = r#"{
        "session": {
            "model": {
                "native_module": {
                    "input": "x",
                    "layers": [{ "dense": { "dim": [2, 1] } }]
                }
            },
            "model_desc": {
                "inputs": [
                    { "name": "x", "shape": ["batch", 2] },
                    { "name": "y", "shape": ["batch", 1] }
                ],
                "outputs": [
                    { "name": "loss", "shape": [], "is_loss": true },
                    { "name": "pred", "shape": ["batch", 1] }
                ]
            },
            "optimizer": { "rule": "sgd", "defaults": { "lr": 0.1 } },
            "loss": { "mse": { "label": "y" } }
        },
        "epochs": 2,
        "samples": [
            {
                "x": { "shape": [1, 2], "data": [1.0, 2.0] },
                "y": { "shape": [1, 1], "data": [0.5] }
            }
        ]
    }"#;

    #[test]
    fn spec_builds_a_session() {
        let spec: TrainSpec = serde_json::from_str(SPEC).unwrap();
        assert_eq!(spec.epochs.get(), 2);
        assert!(spec.checkpoint.is_none());

        let samples = spec.tensors().unwrap();
        assert_eq!(samples[0]["x"].shape(), &[1, 2]);

        let session = spec.session.build().unwrap();
        let result = session.train_step(samples[0].clone()).unwrap();
        assert_eq!(result.outputs.len(), 2);
        assert_eq!(session.step_count().unwrap(), 1);
    }

    #[test]
    fn malformed_samples_are_rejected() {
        let mut spec: TrainSpec = serde_json::from_str(SPEC).unwrap();
        spec.samples[0].insert(
            "y".into(),
            RawTensor {
                shape: vec![1, 1],
                data: vec![],
            },
        );

        assert!(matches!(
            spec.tensors(),
            Err(ConfigErr::MalformedSample { sample: 0, name }) if name == "y"
        ));
    }

    #[test]
    fn zero_epochs_are_rejected() {
        let json = SPEC.replace(r#""epochs": 2"#, r#""epochs": 0"#);
        assert!(serde_json::from_str::<TrainSpec>(&json).is_err());
    }
}
