mod constant;
mod error;
mod param_gen;
mod random;

use std::{cell::RefCell, rc::Rc};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::tensor::Tensor;

pub use constant::ConstParamGen;
pub use error::{RandErr, Result};
pub use param_gen::ParamGen;
pub use random::RandParamGen;

/// How the initial values of a parameter tensor are drawn.
///
/// The fan based schemes derive their scale from the `(fan_in, fan_out)` of the layer owning
/// the parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InitSpec {
    Const { value: f32 },
    Uniform { low: f32, high: f32 },
    Normal { mean: f32, std_dev: f32 },
    XavierUniform,
    LecunUniform,
    Kaiming,
    Xavier,
    Lecun,
}

impl InitSpec {
    /// Draws the initial value of a parameter.
    ///
    /// # Arguments
    /// * `rng` - The random number generator shared by the whole model.
    /// * `fan` - The `(fan_in, fan_out)` of the owning layer.
    /// * `shape` - The shape of the parameter.
    ///
    /// # Returns
    /// The tensor or an error if the distribution can't be built.
    pub fn tensor<R: Rng + 'static>(
        &self,
        rng: &Rc<RefCell<R>>,
        (fan_in, fan_out): (usize, usize),
        shape: &[usize],
    ) -> Result<Tensor> {
        let rng = Rc::clone(rng);
        let fan_sum = (fan_in + fan_out).max(1) as f32;
        let fan_in = fan_in.max(1) as f32;

        let mut param_gen: Box<dyn ParamGen> = match *self {
            InitSpec::Const { value } => Box::new(ConstParamGen(value)),
            InitSpec::Uniform { low, high } => Box::new(RandParamGen::uniform(rng, low, high)?),
            InitSpec::Normal { mean, std_dev } => {
                Box::new(RandParamGen::normal(rng, mean, std_dev)?)
            }
            InitSpec::XavierUniform => {
                Box::new(RandParamGen::symmetric(rng, (6. / fan_sum).sqrt())?)
            }
            InitSpec::LecunUniform => Box::new(RandParamGen::symmetric(rng, (3. / fan_in).sqrt())?),
            InitSpec::Kaiming => Box::new(RandParamGen::normal(rng, 0., (2. / fan_in).sqrt())?),
            InitSpec::Xavier => Box::new(RandParamGen::normal(rng, 0., (2. / fan_sum).sqrt())?),
            InitSpec::Lecun => Box::new(RandParamGen::normal(rng, 0., (1. / fan_in).sqrt())?),
        };

        Ok(param_gen.fill(shape))
    }
}
