use std::{cell::RefCell, rc::Rc};

use ndarray::IxDyn;
use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};

use super::{ParamGen, Result};
use crate::tensor::Tensor;

/// Fills parameters with samples of a probabilistic distribution.
///
/// The rng is shared so that every parameter of a model is drawn from a single seeded stream.
pub struct RandParamGen<R: Rng, D: Distribution<f32>> {
    rng: Rc<RefCell<R>>,
    distribution: D,
}

impl<R: Rng, D: Distribution<f32>> RandParamGen<R, D> {
    pub fn new(rng: Rc<RefCell<R>>, distribution: D) -> Self {
        Self { rng, distribution }
    }
}

impl<R: Rng> RandParamGen<R, Uniform<f32>> {
    /// Samples uniformly from `[low, high)`.
    ///
    /// # Returns
    /// An error if the range is empty or not finite.
    pub fn uniform(rng: Rc<RefCell<R>>, low: f32, high: f32) -> Result<Self> {
        Ok(Self::new(rng, Uniform::new(low, high)?))
    }

    /// Samples uniformly from `[-bound, bound)`.
    pub fn symmetric(rng: Rc<RefCell<R>>, bound: f32) -> Result<Self> {
        Self::uniform(rng, -bound, bound)
    }
}

impl<R: Rng> RandParamGen<R, Normal<f32>> {
    /// # Returns
    /// An error if `std_dev` is not finite.
    pub fn normal(rng: Rc<RefCell<R>>, mean: f32, std_dev: f32) -> Result<Self> {
        Ok(Self::new(rng, Normal::new(mean, std_dev)?))
    }
}

impl<R: Rng, D: Distribution<f32>> ParamGen for RandParamGen<R, D> {
    fn fill(&mut self, shape: &[usize]) -> Tensor {
        let mut rng = self.rng.borrow_mut();
        Tensor::from_shape_simple_fn(IxDyn(shape), || self.distribution.sample(&mut *rng))
    }
}
