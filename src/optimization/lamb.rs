use ndarray::Zip;

use super::{
    Result,
    adam::{EXP_AVG, EXP_AVG_SQ, moment_slots},
    optimizer::{Optimizer, Slots, bump_step, take_slot},
};
use crate::tensor::Tensor;

/// Layer-wise adaptive moments: an Adam direction rescaled by the trust ratio
/// `‖param‖ / ‖update‖`, clamped to `[ratio_min, ratio_max]`.
#[derive(Debug)]
pub struct Lamb {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    weight_decay: f32,
    ratio_min: f32,
    ratio_max: f32,
}

impl Lamb {
    /// Creates a new `Lamb` optimizer.
    ///
    /// # Arguments
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `(beta1, beta2, epsilon)` - The moment estimation hyperparameters.
    /// * `weight_decay` - The decoupled weight decay added to the update direction.
    /// * `(ratio_min, ratio_max)` - The bounds of the trust ratio.
    ///
    /// # Returns
    /// A new `Lamb` instance.
    pub fn new(
        learning_rate: f32,
        (beta1, beta2, epsilon): (f32, f32, f32),
        weight_decay: f32,
        (ratio_min, ratio_max): (f32, f32),
    ) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            weight_decay,
            ratio_min,
            ratio_max,
        }
    }
}

fn norm(x: &Tensor) -> f32 {
    x.iter().map(|v| v * v).sum::<f32>().sqrt()
}

impl Optimizer for Lamb {
    fn name(&self) -> &'static str {
        "lamb"
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
            ratio_min,
            ratio_max,
        } = *self;

        let mut v = take_slot(slots, name, EXP_AVG, param.shape())?;
        let mut s = take_slot(slots, name, EXP_AVG_SQ, param.shape())?;
        let t = bump_step(slots, name)?;

        let bc1 = 1. - b1.powi(t);
        let bc2 = 1. - b2.powi(t);

        let mut update = Tensor::zeros(param.raw_dim());
        Zip::from(&mut update)
            .and(&*param)
            .and(grad)
            .and(&mut v)
            .and(&mut s)
            .par_for_each(|u, &p, &g, v, s| {
                *v = b1 * *v + (1. - b1) * g;
                *s = b2 * *s + (1. - b2) * g.powi(2);
                *u = (*v / bc1) / ((*s / bc2).sqrt() + eps) + wd * p;
            });

        let param_norm = norm(param);
        let update_norm = norm(&update);
        let ratio = if param_norm > 0. && update_norm > 0. {
            param_norm / update_norm
        } else {
            1.
        };
        let step_size = lr * ratio.clamp(ratio_min, ratio_max);

        Zip::from(&mut *param)
            .and(&update)
            .par_for_each(|p, &u| *p -= step_size * u);

        slots.insert(EXP_AVG.to_string(), v);
        slots.insert(EXP_AVG_SQ.to_string(), s);
        Ok(())
    }
}
