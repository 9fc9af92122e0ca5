use std::{
    collections::HashMap,
    error::Error,
    fmt::{self, Display},
};

use crate::{
    desc::{Dim, ModelDescription},
    tensor::{Tensor, TensorMap},
};

/// The arguments of a single step call: positional ones bind to the declared inputs in
/// order, keyword ones bind by name.
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    positional: Vec<Tensor>,
    named: Vec<(String, Tensor)>,
}

impl Inputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keyword arguments only.
    pub fn named<I, S>(named: I) -> Self
    where
        I: IntoIterator<Item = (S, Tensor)>,
        S: Into<String>,
    {
        Self {
            positional: Vec::new(),
            named: named.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Appends a positional argument.
    pub fn arg(mut self, tensor: Tensor) -> Self {
        self.positional.push(tensor);
        self
    }

    /// Appends a keyword argument.
    pub fn kwarg(mut self, name: &str, tensor: Tensor) -> Self {
        self.named.push((name.to_string(), tensor));
        self
    }

    pub fn len(&self) -> usize {
        self.positional.len() + self.named.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<Tensor>> for Inputs {
    fn from(positional: Vec<Tensor>) -> Self {
        Self {
            positional,
            named: Vec::new(),
        }
    }
}

impl From<TensorMap> for Inputs {
    fn from(named: TensorMap) -> Self {
        Self::named(named)
    }
}

/// The ways a call's arguments can fail to match the model description.
#[derive(Debug, Clone, PartialEq)]
pub enum BindErr {
    TooManyPositional {
        got: usize,
        expected: usize,
    },
    Missing(String),
    Unknown(String),
    Duplicate(String),
    RankMismatch {
        name: String,
        got: usize,
        expected: usize,
    },
    DimMismatch {
        name: String,
        axis: usize,
        got: usize,
        expected: usize,
    },
    SymbolConflict {
        symbol: String,
        first: usize,
        second: usize,
    },
}

impl Display for BindErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindErr::TooManyPositional { got, expected } => write!(
                f,
                "got {got} positional arguments but only {expected} inputs are declared"
            ),
            BindErr::Missing(name) => write!(f, "input {name} is missing"),
            BindErr::Unknown(name) => write!(f, "no input named {name} is declared"),
            BindErr::Duplicate(name) => write!(f, "input {name} is bound more than once"),
            BindErr::RankMismatch {
                name,
                got,
                expected,
            } => write!(f, "input {name} has rank {got}, expected {expected}"),
            BindErr::DimMismatch {
                name,
                axis,
                got,
                expected,
            } => write!(
                f,
                "input {name} has size {got} on axis {axis}, expected {expected}"
            ),
            BindErr::SymbolConflict {
                symbol,
                first,
                second,
            } => write!(
                f,
                "dimension {symbol} is bound to both {first} and {second}"
            ),
        }
    }
}

impl Error for BindErr {}

/// Binds the arguments of a call to the declared inputs.
///
/// Positional arguments fill the declared inputs in order, keyword arguments fill the rest by
/// name. Every declared input must be bound exactly once and agree with its declared shape:
/// same rank, equal static dimensions, and each symbolic dimension bound to a single size
/// across the whole call.
///
/// # Arguments
/// * `desc` - The model description.
/// * `inputs` - The arguments of the call.
///
/// # Returns
/// The tensors keyed by input name or the first binding error found.
pub fn bind(desc: &ModelDescription, inputs: Inputs) -> Result<TensorMap, BindErr> {
    let Inputs { positional, named } = inputs;

    if positional.len() > desc.inputs.len() {
        return Err(BindErr::TooManyPositional {
            got: positional.len(),
            expected: desc.inputs.len(),
        });
    }

    let mut bound = TensorMap::new();
    for (spec, tensor) in desc.inputs.iter().zip(positional) {
        bound.insert(spec.name.clone(), tensor);
    }

    for (name, tensor) in named {
        if !desc.input_names().any(|input| input == name) {
            return Err(BindErr::Unknown(name));
        }

        if bound.contains_key(&name) {
            return Err(BindErr::Duplicate(name));
        }

        bound.insert(name, tensor);
    }

    let mut symbols: HashMap<&str, usize> = HashMap::new();
    for spec in &desc.inputs {
        let tensor = bound
            .get(&spec.name)
            .ok_or_else(|| BindErr::Missing(spec.name.clone()))?;

        if tensor.ndim() != spec.shape.len() {
            return Err(BindErr::RankMismatch {
                name: spec.name.clone(),
                got: tensor.ndim(),
                expected: spec.shape.len(),
            });
        }

        for (axis, (dim, &size)) in spec.shape.iter().zip(tensor.shape()).enumerate() {
            match dim {
                Dim::Static(expected) if *expected != size => {
                    return Err(BindErr::DimMismatch {
                        name: spec.name.clone(),
                        axis,
                        got: size,
                        expected: *expected,
                    });
                }
                Dim::Static(_) => {}
                Dim::Symbolic(symbol) => {
                    let first = *symbols.entry(symbol.as_str()).or_insert(size);
                    if first != size {
                        return Err(BindErr::SymbolConflict {
                            symbol: symbol.clone(),
                            first,
                            second: size,
                        });
                    }
                }
            }
        }
    }

    Ok(bound)
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn, arr1, arr2};

    use super::*;
    use crate::desc::{Dim, InputSpec, OutputSpec};

    fn desc() -> ModelDescription {
        ModelDescription::new(
            vec![
                InputSpec::new("x", [Dim::from("batch"), Dim::from(2)]),
                InputSpec::new("y", [Dim::from("batch"), Dim::from(1)]),
            ],
            vec![OutputSpec::loss("loss")],
        )
    }

    fn x(batch: usize) -> Tensor {
        ArrayD::zeros(IxDyn(&[batch, 2]))
    }

    fn y(batch: usize) -> Tensor {
        ArrayD::zeros(IxDyn(&[batch, 1]))
    }

    #[test]
    fn positional_and_keyword_arguments_mix() {
        let bound = bind(&desc(), Inputs::new().arg(x(3)).kwarg("y", y(3))).unwrap();

        assert_eq!(bound.len(), 2);
        assert_eq!(bound["x"].shape(), &[3, 2]);
        assert_eq!(bound["y"].shape(), &[3, 1]);
    }

    #[test]
    fn missing_input_is_reported() {
        assert_eq!(
            bind(&desc(), Inputs::new().arg(x(3))),
            Err(BindErr::Missing("y".into()))
        );
    }

    #[test]
    fn too_many_positional_arguments() {
        let inputs = Inputs::from(vec![x(1), y(1), y(1)]);
        assert_eq!(
            bind(&desc(), inputs),
            Err(BindErr::TooManyPositional {
                got: 3,
                expected: 2
            })
        );
    }

    #[test]
    fn keyword_repeating_a_positional_is_a_duplicate() {
        let inputs = Inputs::new().arg(x(1)).kwarg("x", x(1));
        assert_eq!(bind(&desc(), inputs), Err(BindErr::Duplicate("x".into())));
    }

    #[test]
    fn unknown_keyword_is_rejected() {
        let inputs = Inputs::named([("x", x(1)), ("z", y(1))]);
        assert_eq!(bind(&desc(), inputs), Err(BindErr::Unknown("z".into())));
    }

    #[test]
    fn static_dims_must_agree() {
        let inputs = Inputs::new().arg(ArrayD::zeros(IxDyn(&[1, 3]))).arg(y(1));
        assert_eq!(
            bind(&desc(), inputs),
            Err(BindErr::DimMismatch {
                name: "x".into(),
                axis: 1,
                got: 3,
                expected: 2
            })
        );
    }

    #[test]
    fn rank_must_agree() {
        let inputs = Inputs::new().arg(arr1(&[1., 2.]).into_dyn()).arg(y(1));
        assert!(matches!(
            bind(&desc(), inputs),
            Err(BindErr::RankMismatch { got: 1, expected: 2, .. })
        ));
    }

    #[test]
    fn symbolic_dims_bind_once_per_call() {
        let inputs = Inputs::new().arg(x(4)).arg(y(2));
        assert_eq!(
            bind(&desc(), inputs),
            Err(BindErr::SymbolConflict {
                symbol: "batch".into(),
                first: 4,
                second: 2
            })
        );
    }

    #[test]
    fn scalars_bind_to_empty_shapes() {
        let desc = ModelDescription::new(
            vec![InputSpec::new("lr_scale", Vec::<Dim>::new())],
            vec![OutputSpec::loss("loss")],
        );

        bind(&desc, Inputs::new().arg(crate::tensor::scalar(0.5))).unwrap();
        assert!(bind(&desc, Inputs::new().arg(arr2(&[[0.5]]).into_dyn())).is_err());
    }
}
