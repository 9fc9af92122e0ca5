use ndarray::IxDyn;

use super::ParamGen;
use crate::tensor::Tensor;

/// Fills every parameter with the same value.
pub struct ConstParamGen(pub f32);

impl ParamGen for ConstParamGen {
    fn fill(&mut self, shape: &[usize]) -> Tensor {
        Tensor::from_elem(IxDyn(shape), self.0)
    }
}
