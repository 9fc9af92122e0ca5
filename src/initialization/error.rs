use std::{
    error::Error,
    fmt::{self, Display},
};

use rand_distr::{NormalError, uniform::Error as UniformError};

pub type Result<T> = std::result::Result<T, RandErr>;

/// An initialization scheme whose distribution can't be built.
#[derive(Debug)]
pub enum RandErr {
    Uniform(UniformError),
    Normal(NormalError),
}

impl From<UniformError> for RandErr {
    fn from(value: UniformError) -> Self {
        Self::Uniform(value)
    }
}

impl From<NormalError> for RandErr {
    fn from(value: NormalError) -> Self {
        Self::Normal(value)
    }
}

impl Display for RandErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RandErr::Uniform(e) => write!(f, "invalid uniform range: {e}"),
            RandErr::Normal(e) => write!(f, "invalid normal distribution: {e}"),
        }
    }
}

impl Error for RandErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RandErr::Uniform(e) => Some(e),
            RandErr::Normal(e) => Some(e),
        }
    }
}
