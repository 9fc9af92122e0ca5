use ndarray::Zip;

use super::{
    Result,
    optimizer::{Optimizer, Slots, take_slot},
};
use crate::tensor::Tensor;

const MOMENTUM_BUFFER: &str = "momentum_buffer";

#[derive(Debug)]
pub struct Sgd {
    learning_rate: f32,
    momentum: f32,
    weight_decay: f32,
}

impl Sgd {
    /// Creates a new `Sgd` optimizer.
    ///
    /// # Arguments
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `momentum` - The decay of the velocity, `0` disables it.
    /// * `weight_decay` - The L2 penalty added to the gradient.
    ///
    /// # Returns
    /// A new `Sgd` instance.
    pub fn new(learning_rate: f32, momentum: f32, weight_decay: f32) -> Self {
        Self {
            learning_rate,
            momentum,
            weight_decay,
        }
    }
}

impl Optimizer for Sgd {
    fn name(&self) -> &'static str {
        "sgd"
    }

    fn init_slots(&self, param: &Tensor) -> Slots {
        let mut slots = Slots::new();
        if self.momentum != 0. {
            slots.insert(MOMENTUM_BUFFER.to_string(), Tensor::zeros(param.raw_dim()));
        }
        slots
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
            momentum: mu,
            weight_decay: wd,
        } = *self;

        if mu == 0. {
            Zip::from(param)
                .and(grad)
                .par_for_each(|p, &g| *p -= lr * (g + wd * *p));
            return Ok(());
        }

        let mut velocity = take_slot(slots, name, MOMENTUM_BUFFER, param.shape())?;
        Zip::from(&mut *param)
            .and(grad)
            .and(&mut velocity)
            .par_for_each(|p, &g, v| {
                *v = mu * *v + (g + wd * *p);
                *p -= lr * *v;
            });
        slots.insert(MOMENTUM_BUFFER.to_string(), velocity);

        Ok(())
    }
}
