use std::{
    error::Error,
    fmt::{self, Display},
};

use comms::CollectiveErr;
use ndarray::ShapeError;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    Shape(ShapeError),
    Collective(CollectiveErr),
    /// Every worker's batch was empty, there are no statistics to normalize with.
    EmptyBatch,
    /// A training forward pass was issued while the previous one still awaits its backward pass.
    PendingBackward {
        call: u64,
    },
    /// A backward pass doesn't match the pending forward pass.
    UnpairedBackward {
        layer: &'static str,
        got: Option<u64>,
        expected: Option<u64>,
    },
    InvalidLabel {
        label: f32,
        classes: usize,
    },
    EmptyValidation,
    InvalidDistribution(String),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(f, "size mismatch in {what}, got {got} and expected {expected}"),
            MlErr::Shape(e) => write!(f, "invalid shape: {e}"),
            MlErr::Collective(e) => write!(f, "collective failed: {e}"),
            MlErr::EmptyBatch => write!(f, "the global batch is empty, can't normalize by zero"),
            MlErr::PendingBackward { call } => write!(
                f,
                "forward pass issued while call {call} still awaits its backward pass"
            ),
            MlErr::UnpairedBackward {
                layer,
                got,
                expected,
            } => write!(
                f,
                "backward pass of {layer} doesn't match a pending forward pass, got call {got:?} and expected {expected:?}"
            ),
            MlErr::InvalidLabel { label, classes } => {
                write!(f, "label {label} is not a class index below {classes}")
            }
            MlErr::EmptyValidation => write!(f, "the validation set is empty on every worker"),
            MlErr::InvalidDistribution(detail) => write!(f, "invalid distribution: {detail}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Shape(e) => Some(e),
            MlErr::Collective(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShapeError> for MlErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}

impl From<CollectiveErr> for MlErr {
    fn from(value: CollectiveErr) -> Self {
        Self::Collective(value)
    }
}
