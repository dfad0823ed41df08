use std::{error::Error, fmt, io};

use crate::msg::Op;

/// The result type of every collective operation.
pub type Result<T> = std::result::Result<T, CollectiveErr>;

/// Failures of a process group.
///
/// None of these are recoverable: a failed collective leaves the group out of step, callers are
/// expected to abort the run.
#[derive(Debug)]
pub enum CollectiveErr {
    Io(io::Error),
    /// A participant contributed a buffer of a different length than the hub.
    ShapeMismatch {
        op: Op,
        rank: usize,
        got: usize,
        expected: usize,
    },
    /// A participant entered a different operation in the same round.
    OpMismatch { rank: usize, got: Op, expected: Op },
    UnexpectedMessage { rank: usize, got: &'static str },
    InvalidRank { rank: usize, world_size: usize },
    WorldSizeMismatch { got: usize, expected: usize },
    DuplicateRank(usize),
    /// The source rank of a broadcast or scatter didn't provide the data, or another rank did.
    SourceMismatch { rank: usize, src: usize },
    /// The hub aborted the operation and notified this participant.
    Aborted(String),
}

impl fmt::Display for CollectiveErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectiveErr::Io(e) => write!(f, "io error: {e}"),
            CollectiveErr::ShapeMismatch {
                op,
                rank,
                got,
                expected,
            } => write!(
                f,
                "shape mismatch in {op} from rank {rank}: got {got} numbers, expected {expected}"
            ),
            CollectiveErr::OpMismatch {
                rank,
                got,
                expected,
            } => write!(f, "rank {rank} entered {got} while the group runs {expected}"),
            CollectiveErr::UnexpectedMessage { rank, got } => {
                write!(f, "unexpected message from rank {rank}: got {got}")
            }
            CollectiveErr::InvalidRank { rank, world_size } => {
                write!(f, "rank {rank} is out of range for a world of size {world_size}")
            }
            CollectiveErr::WorldSizeMismatch { got, expected } => {
                write!(f, "world size mismatch: got {got}, expected {expected}")
            }
            CollectiveErr::DuplicateRank(rank) => write!(f, "rank {rank} joined twice"),
            CollectiveErr::SourceMismatch { rank, src } => write!(
                f,
                "rank {rank} disagrees about the data source, which is rank {src}"
            ),
            CollectiveErr::Aborted(detail) => write!(f, "collective aborted by the hub: {detail}"),
        }
    }
}

impl Error for CollectiveErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CollectiveErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CollectiveErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
