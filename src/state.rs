use std::{
    collections::{BTreeMap, BTreeSet},
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{SerializeErr, StateMismatch},
    optimization::{GroupPlan, Slots},
    tensor::{Tensor, TensorMap},
};

/// Separates a parameter name from one of its optimizer slots in flattened keys.
pub const SLOT_SEPARATOR: &str = "::";

/// The mutable state of a session: parameters, optimizer state and step counter.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub params: TensorMap,
    pub optim: BTreeMap<String, Slots>,
    pub step: u64,
}

impl SessionState {
    /// Creates the initial state, with fresh optimizer slots for every parameter.
    ///
    /// # Arguments
    /// * `params` - The initial value of every parameter.
    /// * `groups` - The resolved parameter groups, covering every parameter.
    pub fn new(params: TensorMap, groups: &[GroupPlan]) -> Self {
        let mut optim = BTreeMap::new();
        for group in groups {
            for name in &group.params {
                if let Some(param) = params.get(name) {
                    optim.insert(name.clone(), group.optimizer.init_slots(param));
                }
            }
        }

        Self {
            params,
            optim,
            step: 0,
        }
    }

    /// Returns an owned copy of the state.
    pub fn snapshot(&self) -> StateDict {
        StateDict {
            params: self.params.clone(),
            optimizer: self.optim.clone(),
            step: Some(self.step),
        }
    }

    /// Computes the state that results from loading `dict` on top of this one.
    ///
    /// Non strict loads apply only the keys both sides have. Either way the shape of every
    /// applied tensor must match the current one.
    ///
    /// # Arguments
    /// * `dict` - The snapshot to load.
    /// * `strict` - Whether the snapshot's keys must match this state's exactly.
    /// * `restore_step` - Whether the snapshot's step counter, if any, replaces the current one.
    ///
    /// # Returns
    /// The new state or the first mismatch found, `self` is never modified.
    pub fn loaded(
        &self,
        dict: &StateDict,
        strict: bool,
        restore_step: bool,
    ) -> Result<SessionState, StateMismatch> {
        if strict {
            let current = self.snapshot().keys();
            let incoming = dict.keys();

            if current != incoming {
                return Err(StateMismatch::Keys {
                    missing: current.difference(&incoming).cloned().collect(),
                    unexpected: incoming.difference(&current).cloned().collect(),
                });
            }
        }

        let mut next = self.clone();

        for (name, value) in &dict.params {
            if let Some(param) = next.params.get_mut(name) {
                overwrite(name, param, value)?;
            }
        }

        for (name, slots) in &dict.optimizer {
            let Some(current) = next.optim.get_mut(name) else {
                continue;
            };

            for (slot, value) in slots {
                if let Some(tensor) = current.get_mut(slot) {
                    overwrite(&slot_key(name, slot), tensor, value)?;
                }
            }
        }

        if let Some(step) = dict.step.filter(|_| restore_step) {
            next.step = step;
        }

        Ok(next)
    }
}

fn slot_key(param: &str, slot: &str) -> String {
    format!("{param}{SLOT_SEPARATOR}{slot}")
}

fn overwrite(key: &str, current: &mut Tensor, value: &Tensor) -> Result<(), StateMismatch> {
    if current.shape() != value.shape() {
        return Err(StateMismatch::Shape {
            key: key.to_string(),
            got: value.shape().to_vec(),
            expected: current.shape().to_vec(),
        });
    }

    current.assign(value);
    Ok(())
}

/// An immutable point in time copy of a session's parameters and optimizer state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDict {
    pub params: TensorMap,
    #[serde(default)]
    pub optimizer: BTreeMap<String, Slots>,
    /// The step counter, a snapshot without it leaves the session's counter untouched.
    #[serde(default)]
    pub step: Option<u64>,
}

impl StateDict {
    /// Returns every fully qualified key: parameter names and `param::slot` optimizer keys.
    pub fn keys(&self) -> BTreeSet<String> {
        let params = self.params.keys().cloned();
        let slots = self
            .optimizer
            .iter()
            .flat_map(|(param, slots)| slots.keys().map(move |slot| slot_key(param, slot)));

        params.chain(slots).collect()
    }

    /// Writes the snapshot to `path` as json.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SerializeErr> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Reads a snapshot written by `save`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SerializeErr> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}
