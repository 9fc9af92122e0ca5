use std::collections::BTreeMap;

use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

/// The value type flowing through the whole session: a dynamically shaped `f32` array.
pub type Tensor = ArrayD<f32>;

/// Tensors keyed by their fully-qualified name.
pub type TensorMap = BTreeMap<String, Tensor>;

/// Creates a 0-dimensional tensor holding `value`.
pub fn scalar(value: f32) -> Tensor {
    ArrayD::from_elem(IxDyn(&[]), value)
}

/// Returns whether every element of `tensor` is finite.
pub fn is_finite(tensor: &Tensor) -> bool {
    tensor.iter().all(|v| v.is_finite())
}

/// The flat form of a tensor used in configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl RawTensor {
    /// Converts this raw tensor into a `Tensor`.
    ///
    /// # Returns
    /// `None` if the amount of elements doesn't match the shape.
    pub fn into_tensor(self) -> Option<Tensor> {
        ArrayD::from_shape_vec(IxDyn(&self.shape), self.data).ok()
    }
}

impl From<&Tensor> for RawTensor {
    fn from(value: &Tensor) -> Self {
        Self {
            shape: value.shape().to_vec(),
            data: value.iter().copied().collect(),
        }
    }
}
