use crate::tensor::Tensor;

/// Draws the initial value of a parameter tensor.
pub trait ParamGen {
    /// Builds a tensor of the given shape, filled in row major order.
    fn fill(&mut self, shape: &[usize]) -> Tensor;
}
