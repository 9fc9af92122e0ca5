mod adam;
mod error;
mod lamb;
mod optimizer;
mod sgd;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::{error::ConfigErr, tensor::TensorMap};

pub use adam::Adam;
pub use error::{Result, UpdateErr};
pub use lamb::Lamb;
pub use optimizer::{Optimizer, Slots};
pub use sgd::Sgd;

/// The update rules a session can train with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateRule {
    Sgd,
    Adam,
    Lamb,
}

impl UpdateRule {
    pub fn name(&self) -> &'static str {
        match self {
            UpdateRule::Sgd => "sgd",
            UpdateRule::Adam => "adam",
            UpdateRule::Lamb => "lamb",
        }
    }

    /// Returns every hyperparameter the rule accepts together with its default value.
    pub fn defaults(&self) -> &'static [(&'static str, f32)] {
        match self {
            UpdateRule::Sgd => &[("lr", 1e-3), ("momentum", 0.), ("weight_decay", 0.)],
            UpdateRule::Adam => &[
                ("lr", 1e-3),
                ("beta1", 0.9),
                ("beta2", 0.999),
                ("epsilon", 1e-8),
                ("weight_decay", 0.),
            ],
            UpdateRule::Lamb => &[
                ("lr", 1e-3),
                ("beta1", 0.9),
                ("beta2", 0.999),
                ("epsilon", 1e-6),
                ("weight_decay", 0.),
                ("ratio_min", f32::NEG_INFINITY),
                ("ratio_max", f32::INFINITY),
            ],
        }
    }

    fn check_names(&self, hyperparams: &Hyperparams) -> std::result::Result<(), ConfigErr> {
        let known = self.defaults();
        let unknown = hyperparams
            .0
            .keys()
            .find(|k| !known.iter().any(|(n, _)| *n == k.as_str()));

        match unknown {
            Some(name) => Err(ConfigErr::UnknownHyperparam {
                rule: self.name(),
                name: name.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Builds the optimizer for a group out of its resolved hyperparameters.
    fn build(&self, hyperparams: &Hyperparams) -> std::result::Result<Box<dyn Optimizer>, ConfigErr> {
        let get = |name: &str| -> std::result::Result<f32, ConfigErr> {
            let value = hyperparams
                .get(name)
                .or_else(|| self.defaults().iter().find(|(n, _)| *n == name).map(|(_, v)| *v))
                .unwrap_or(0.);

            let valid = match name {
                "lr" | "weight_decay" => value.is_finite() && value >= 0.,
                "momentum" | "beta1" | "beta2" => (0. ..1.).contains(&value),
                "epsilon" => value.is_finite() && value > 0.,
                _ => !value.is_nan(),
            };

            if !valid {
                return Err(ConfigErr::InvalidHyperparam {
                    name: name.to_string(),
                    value,
                });
            }

            Ok(value)
        };

        let optimizer: Box<dyn Optimizer> = match self {
            UpdateRule::Sgd => Box::new(Sgd::new(get("lr")?, get("momentum")?, get("weight_decay")?)),
            UpdateRule::Adam => Box::new(Adam::new(
                get("lr")?,
                get("beta1")?,
                get("beta2")?,
                get("epsilon")?,
                get("weight_decay")?,
            )),
            UpdateRule::Lamb => {
                let (ratio_min, ratio_max) = (get("ratio_min")?, get("ratio_max")?);
                if ratio_min > ratio_max || ratio_max < 0. {
                    return Err(ConfigErr::InvalidHyperparam {
                        name: "ratio_max".to_string(),
                        value: ratio_max,
                    });
                }

                Box::new(Lamb::new(
                    get("lr")?,
                    (get("beta1")?, get("beta2")?, get("epsilon")?),
                    get("weight_decay")?,
                    (ratio_min, ratio_max),
                ))
            }
        };

        Ok(optimizer)
    }
}

/// Hyperparameter values keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hyperparams(BTreeMap<String, f32>);

impl Hyperparams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: f32) -> Self {
        self.0.insert(name.to_string(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.0.get(name).copied()
    }

    /// Returns these values with `overrides` applied on top.
    fn merged(&self, overrides: &Hyperparams) -> Self {
        let mut merged = self.clone();
        merged
            .0
            .extend(overrides.0.iter().map(|(k, v)| (k.clone(), *v)));
        merged
    }
}

/// A partition of the trainable parameters sharing hyperparameter overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamGroup {
    pub params: Vec<String>,
    #[serde(default)]
    pub overrides: Hyperparams,
}

impl ParamGroup {
    pub fn new<I, S>(params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            params: params.into_iter().map(Into::into).collect(),
            overrides: Hyperparams::new(),
        }
    }

    pub fn with(mut self, name: &str, value: f32) -> Self {
        self.overrides = self.overrides.with(name, value);
        self
    }
}

/// The user supplied description of how parameters are updated.
///
/// Parameters not listed in any group form an implicit trailing group that uses `defaults`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub rule: UpdateRule,
    #[serde(default)]
    pub defaults: Hyperparams,
    #[serde(default)]
    pub param_groups: Vec<ParamGroup>,
}

impl OptimizerConfig {
    pub fn new(rule: UpdateRule) -> Self {
        Self {
            rule,
            defaults: Hyperparams::new(),
            param_groups: Vec::new(),
        }
    }

    pub fn sgd(lr: f32) -> Self {
        Self::new(UpdateRule::Sgd).with_default("lr", lr)
    }

    pub fn adam(lr: f32) -> Self {
        Self::new(UpdateRule::Adam).with_default("lr", lr)
    }

    pub fn lamb(lr: f32) -> Self {
        Self::new(UpdateRule::Lamb).with_default("lr", lr)
    }

    pub fn with_default(mut self, name: &str, value: f32) -> Self {
        self.defaults = self.defaults.with(name, value);
        self
    }

    pub fn with_group(mut self, group: ParamGroup) -> Self {
        self.param_groups.push(group);
        self
    }

    /// Checks the configuration against the model's parameters and builds every group.
    ///
    /// # Arguments
    /// * `params` - The names of the model's trainable parameters, in model order.
    ///
    /// # Returns
    /// The groups in update order, the implicit one last, or the first violation found.
    pub fn resolve<'a, I>(&self, params: I) -> std::result::Result<Vec<GroupPlan>, ConfigErr>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let params: Vec<_> = params.into_iter().collect();

        self.rule.check_names(&self.defaults)?;
        let mut owner: HashMap<&str, usize> = HashMap::new();
        let mut groups = Vec::with_capacity(self.param_groups.len() + 1);

        for (i, group) in self.param_groups.iter().enumerate() {
            if group.params.is_empty() {
                return Err(ConfigErr::EmptyGroup { group: i });
            }

            self.rule.check_names(&group.overrides)?;

            for param in &group.params {
                if !params.contains(&param.as_str()) {
                    return Err(ConfigErr::UnknownParam {
                        group: i,
                        param: param.clone(),
                    });
                }

                if let Some(&first) = owner.get(param.as_str()) {
                    return Err(ConfigErr::OverlappingGroups {
                        param: param.clone(),
                        first,
                        second: i,
                    });
                }

                owner.insert(param.as_str(), i);
            }

            let hyperparams = self.defaults.merged(&group.overrides);
            groups.push(GroupPlan {
                params: group.params.clone(),
                optimizer: self.rule.build(&hyperparams)?,
            });
        }

        let rest: Vec<_> = params
            .iter()
            .filter(|p| !owner.contains_key(*p))
            .map(|p| p.to_string())
            .collect();

        if !rest.is_empty() || groups.is_empty() {
            groups.push(GroupPlan {
                params: rest,
                optimizer: self.rule.build(&self.defaults)?,
            });
        }

        Ok(groups)
    }
}

/// A resolved parameter group: the parameters it owns and the optimizer that updates them.
#[derive(Debug)]
pub struct GroupPlan {
    pub params: Vec<String>,
    pub optimizer: Box<dyn Optimizer>,
}

impl GroupPlan {
    /// Applies one update to every parameter of the group, in group order.
    ///
    /// # Arguments
    /// * `params` - Every parameter of the model.
    /// * `grads` - The gradient of every parameter.
    /// * `slots` - The optimizer state of every parameter.
    ///
    /// # Returns
    /// The first error found. Parameters updated before it stay updated.
    pub fn apply(
        &self,
        params: &mut TensorMap,
        grads: &TensorMap,
        slots: &mut BTreeMap<String, Slots>,
    ) -> Result<()> {
        for name in &self.params {
            let grad = grads
                .get(name)
                .ok_or_else(|| UpdateErr::MissingGradient(name.clone()))?;
            let param = params
                .get_mut(name)
                .ok_or_else(|| UpdateErr::MissingParam(name.clone()))?;

            if grad.shape() != param.shape() {
                return Err(UpdateErr::SizeMismatch {
                    param: name.clone(),
                    got: grad.shape().to_vec(),
                    expected: param.shape().to_vec(),
                });
            }

            let param_slots = slots.entry(name.clone()).or_default();
            self.optimizer.update_param(name, param, grad, param_slots)?;
        }

        Ok(())
    }
}
