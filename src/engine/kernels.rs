use ndarray::{ArrayD, Axis, Ix1, Ix2, IxDyn, Zip};
use rand::{Rng, rngs::StdRng};

use crate::{
    graph::Op,
    tensor::{Tensor, scalar},
};

/// Two operands whose shapes can't be combined.
#[derive(Debug, Clone, PartialEq)]
pub struct Incompatible {
    pub lhs: Vec<usize>,
    pub rhs: Vec<usize>,
}

type KernelResult<T> = Result<T, Incompatible>;

fn incompatible(lhs: &Tensor, rhs: &Tensor) -> Incompatible {
    Incompatible {
        lhs: lhs.shape().to_vec(),
        rhs: rhs.shape().to_vec(),
    }
}

/// Returns the shape `lhs` and `rhs` broadcast to, aligning trailing axes.
pub fn broadcast_shape(lhs: &[usize], rhs: &[usize]) -> Option<Vec<usize>> {
    let ndim = lhs.len().max(rhs.len());
    let dim = |shape: &[usize], i: usize| {
        let offset = ndim - shape.len();
        if i < offset { 1 } else { shape[i - offset] }
    };

    (0..ndim)
        .map(|i| match (dim(lhs, i), dim(rhs, i)) {
            (a, b) if a == b => Some(a),
            (1, b) => Some(b),
            (a, 1) => Some(a),
            _ => None,
        })
        .collect()
}

/// Sums `grad` over the axes `shape` was broadcast along, so it ends up with `shape`.
pub fn reduce_to_shape(mut grad: Tensor, shape: &[usize]) -> Tensor {
    while grad.ndim() > shape.len() {
        grad = grad.sum_axis(Axis(0));
    }

    for (axis, &dim) in shape.iter().enumerate() {
        if dim == 1 && grad.shape()[axis] != 1 {
            grad = grad.sum_axis(Axis(axis)).insert_axis(Axis(axis));
        }
    }

    grad
}

fn check_broadcast(lhs: &Tensor, rhs: &Tensor) -> KernelResult<()> {
    broadcast_shape(lhs.shape(), rhs.shape())
        .map(|_| ())
        .ok_or_else(|| incompatible(lhs, rhs))
}

fn matmul(lhs: &Tensor, rhs: &Tensor) -> KernelResult<Tensor> {
    let err = || incompatible(lhs, rhs);
    let rhs2 = rhs.view().into_dimensionality::<Ix2>().map_err(|_| err())?;

    if lhs.shape().last() != Some(&rhs2.nrows()) {
        return Err(err());
    }

    match lhs.ndim() {
        1 => {
            let lhs1 = lhs.view().into_dimensionality::<Ix1>().map_err(|_| err())?;
            Ok(lhs1.dot(&rhs2).into_dyn())
        }
        2 => {
            let lhs2 = lhs.view().into_dimensionality::<Ix2>().map_err(|_| err())?;
            Ok(lhs2.dot(&rhs2).into_dyn())
        }
        _ => Err(err()),
    }
}

fn matmul_grads(lhs: &Tensor, rhs: &Tensor, grad: &Tensor) -> KernelResult<[Tensor; 2]> {
    let err = || incompatible(lhs, rhs);
    let rhs2 = rhs.view().into_dimensionality::<Ix2>().map_err(|_| err())?;

    match lhs.ndim() {
        1 => {
            let lhs1 = lhs.view().into_dimensionality::<Ix1>().map_err(|_| err())?;
            let grad1 = grad.view().into_dimensionality::<Ix1>().map_err(|_| err())?;

            let d_lhs = rhs2.dot(&grad1);
            let d_rhs = lhs1
                .insert_axis(Axis(1))
                .dot(&grad1.insert_axis(Axis(0)));
            Ok([d_lhs.into_dyn(), d_rhs.into_dyn()])
        }
        2 => {
            let lhs2 = lhs.view().into_dimensionality::<Ix2>().map_err(|_| err())?;
            let grad2 = grad.view().into_dimensionality::<Ix2>().map_err(|_| err())?;

            let d_lhs = grad2.dot(&rhs2.t());
            let d_rhs = lhs2.t().dot(&grad2);
            Ok([d_lhs.into_dyn(), d_rhs.into_dyn()])
        }
        _ => Err(err()),
    }
}

fn mean(x: &Tensor) -> f32 {
    x.sum() / x.len() as f32
}

fn sigmoid(x: f32) -> f32 {
    1. / (1. + (-x).exp())
}

/// Applies `op` to `args`.
///
/// # Arguments
/// * `op` - The operation to apply.
/// * `args` - The operands, as many as `op.arity()`.
/// * `rng` - The source of randomness of a training call, `None` on inference.
///
/// # Returns
/// The result together with whatever the backward pass needs to remember (the dropout mask).
pub fn forward(
    op: Op,
    args: &[&Tensor],
    rng: Option<&mut StdRng>,
) -> KernelResult<(Tensor, Option<Tensor>)> {
    let out = match op {
        Op::MatMul => matmul(args[0], args[1])?,
        Op::Add => {
            check_broadcast(args[0], args[1])?;
            args[0] + args[1]
        }
        Op::Sub => {
            check_broadcast(args[0], args[1])?;
            args[0] - args[1]
        }
        Op::Mul => {
            check_broadcast(args[0], args[1])?;
            args[0] * args[1]
        }
        Op::Sigmoid => args[0].mapv(sigmoid),
        Op::Relu => args[0].mapv(|x| x.max(0.)),
        Op::Tanh => args[0].mapv(f32::tanh),
        Op::Dropout { ratio } => match rng {
            Some(rng) if ratio > 0. => {
                let keep = 1. - ratio;
                let mask = ArrayD::from_shape_simple_fn(IxDyn(args[0].shape()), || {
                    if rng.random::<f32>() < ratio { 0. } else { 1. / keep }
                });
                let out = args[0] * &mask;
                return Ok((out, Some(mask)));
            }
            _ => args[0].clone(),
        },
        Op::ReduceMean => scalar(mean(args[0])),
        Op::Mse => {
            check_broadcast(args[0], args[1])?;
            let diff = args[0] - args[1];
            scalar(mean(&diff.mapv(|d| d * d)))
        }
        Op::Identity => args[0].clone(),
    };

    Ok((out, None))
}

/// Backpropagates `grad` through `op`.
///
/// # Arguments
/// * `op` - The operation that produced `out`.
/// * `args` - The operands it was applied to.
/// * `out` - The forward result.
/// * `grad` - The gradient of the loss with respect to `out`.
/// * `mask` - The dropout mask recorded on the forward pass, if any.
///
/// # Returns
/// The gradient with respect to every operand, in operand order.
pub fn backward(
    op: Op,
    args: &[&Tensor],
    out: &Tensor,
    grad: &Tensor,
    mask: Option<&Tensor>,
) -> KernelResult<Vec<Tensor>> {
    let grads = match op {
        Op::MatMul => matmul_grads(args[0], args[1], grad)?.into(),
        Op::Add => vec![
            reduce_to_shape(grad.clone(), args[0].shape()),
            reduce_to_shape(grad.clone(), args[1].shape()),
        ],
        Op::Sub => vec![
            reduce_to_shape(grad.clone(), args[0].shape()),
            reduce_to_shape(grad.mapv(|g| -g), args[1].shape()),
        ],
        Op::Mul => vec![
            reduce_to_shape(grad * args[1], args[0].shape()),
            reduce_to_shape(grad * args[0], args[1].shape()),
        ],
        Op::Sigmoid => {
            let mut d = grad.clone();
            Zip::from(&mut d).and(out).for_each(|d, &y| *d *= y * (1. - y));
            vec![d]
        }
        Op::Relu => {
            let mut d = grad.clone();
            Zip::from(&mut d)
                .and(args[0])
                .for_each(|d, &x| *d = if x > 0. { *d } else { 0. });
            vec![d]
        }
        Op::Tanh => {
            let mut d = grad.clone();
            Zip::from(&mut d).and(out).for_each(|d, &y| *d *= 1. - y * y);
            vec![d]
        }
        Op::Dropout { .. } => match mask {
            Some(mask) => vec![grad * mask],
            None => vec![grad.clone()],
        },
        Op::ReduceMean => {
            let g = grad.sum() / args[0].len() as f32;
            vec![ArrayD::from_elem(IxDyn(args[0].shape()), g)]
        }
        Op::Mse => {
            let diff = args[0] - args[1];
            let scale = 2. * grad.sum() / diff.len() as f32;
            let d = diff.mapv(|d| d * scale);
            vec![
                reduce_to_shape(d.clone(), args[0].shape()),
                reduce_to_shape(d.mapv(|d| -d), args[1].shape()),
            ]
        }
        Op::Identity => vec![grad.clone()],
    };

    Ok(grads)
}
