use std::{collections::BTreeMap, fmt::Debug};

use super::{Result, UpdateErr};
use crate::tensor::Tensor;

/// The optimizer state of a single parameter, keyed by slot name.
pub type Slots = BTreeMap<String, Tensor>;

/// Defines the strategy for updating parameters based on their gradients.
///
/// Implementations only hold hyperparameters, the per parameter state lives in `Slots` owned
/// by the session so it can be snapshotted and restored.
pub trait Optimizer: Debug + Send + Sync {
    /// The name of the update rule.
    fn name(&self) -> &'static str;

    /// Creates the initial optimizer state for `param`.
    fn init_slots(&self, param: &Tensor) -> Slots;

    /// Updates `param` in place using `grad`.
    ///
    /// # Arguments
    /// * `name` - The parameter's name, used for error reporting.
    /// * `param` - The parameter to update.
    /// * `grad` - The gradient of the loss with respect to `param`, same shape as it.
    /// * `slots` - The parameter's optimizer state.
    ///
    /// # Returns
    /// An error if a slot is missing or doesn't have the parameter's shape.
    fn update_param(
        &self,
        name: &str,
        param: &mut Tensor,
        grad: &Tensor,
        slots: &mut Slots,
    ) -> Result<()>;
}

/// Moves a slot out of `slots`, checking it has the given shape.
pub(super) fn take_slot(
    slots: &mut Slots,
    param: &str,
    slot: &'static str,
    shape: &[usize],
) -> Result<Tensor> {
    let value = slots.remove(slot).ok_or_else(|| UpdateErr::MissingSlot {
        param: param.to_string(),
        slot,
    })?;

    if value.shape() != shape {
        return Err(UpdateErr::SizeMismatch {
            param: format!("{param}::{slot}"),
            got: value.shape().to_vec(),
            expected: shape.to_vec(),
        });
    }

    Ok(value)
}

/// The largest step count an `f32` slot holds exactly.
const MAX_STEP: f32 = 16_777_216.;

/// Increments the step counter slot and returns its new value.
///
/// # Returns
/// An error if the stored counter isn't a whole number in `[0, 2^24)`.
pub(super) fn bump_step(slots: &mut Slots, param: &str) -> Result<i32> {
    let mut step = take_slot(slots, param, "step", &[])?;
    let t = step.sum() + 1.;

    if !(1. ..MAX_STEP).contains(&t) || t.fract() != 0. {
        return Err(UpdateErr::InvalidStep {
            param: param.to_string(),
            step: t - 1.,
        });
    }

    step.fill(t);
    slots.insert("step".to_string(), step);
    Ok(t as i32)
}
