use ndarray::Zip;

use super::{
    Result,
    optimizer::{Optimizer, Slots, bump_step, take_slot},
};
use crate::tensor::{Tensor, scalar};

pub(super) const EXP_AVG: &str = "exp_avg";
pub(super) const EXP_AVG_SQ: &str = "exp_avg_sq";
pub(super) const STEP: &str = "step";

#[derive(Debug)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    weight_decay: f32,
}

impl Adam {
    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `beta1`, `beta2`, `epsilon` - Hyperparameters to the optimization algorithm.
    /// * `weight_decay` - The L2 penalty added to the gradient.
    ///
    /// # Returns
    /// A new `Adam` instance.
    pub fn new(learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32, weight_decay: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            weight_decay,
        }
    }
}

/// The first and second moment slots plus the step counter, shared with `Lamb`.
pub(super) fn moment_slots(param: &Tensor) -> Slots {
    Slots::from([
        (EXP_AVG.to_string(), Tensor::zeros(param.raw_dim())),
        (EXP_AVG_SQ.to_string(), Tensor::zeros(param.raw_dim())),
        (STEP.to_string(), scalar(0.)),
    ])
}

impl Optimizer for Adam {
    fn name(&self) -> &'static str {
        "adam"
    }

    fn init_slots(&self, param: &Tensor) -> Slots {
        moment_slots(param)
    }

    fn update_param(
        &self,
        name: &str,
        param: &mut Tensor,
        grad: &Tensor,
        slots: &mut Slots,
    ) -> Result<()> {
        let Self {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            weight_decay: wd,
        } = *self;

        let mut v = take_slot(slots, name, EXP_AVG, param.shape())?;
        let mut s = take_slot(slots, name, EXP_AVG_SQ, param.shape())?;
        let t = bump_step(slots, name)?;

        let bc1 = 1. - b1.powi(t);
        let bc2 = 1. - b2.powi(t);
        let step_size = lr * (bc2.sqrt() / bc1);

        Zip::from(&mut *param)
            .and(grad)
            .and(&mut v)
            .and(&mut s)
            .par_for_each(|p, &g, v, s| {
                let g = g + wd * *p;
                *v = b1 * *v + (1. - b1) * g;
                *s = b2 * *s + (1. - b2) * g.powi(2);
                *p -= step_size * *v / (s.sqrt() + eps);
            });

        slots.insert(EXP_AVG.to_string(), v);
        slots.insert(EXP_AVG_SQ.to_string(), s);
        Ok(())
    }
}
