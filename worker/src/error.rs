use std::{error::Error, fmt, io};

use comms::CollectiveErr;
use machine_learning::MlErr;

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Worker runtime failures.
#[derive(Debug)]
pub enum WorkerErr {
    Io(io::Error),
    Collective(CollectiveErr),
    Ml(MlErr),
    /// The training configuration couldn't be parsed.
    Json(serde_json::Error),
    /// A required environment variable is missing or invalid.
    Env {
        var: &'static str,
        reason: String,
    },
    InvalidConfig(String),
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Io(e) => write!(f, "io error: {e}"),
            WorkerErr::Collective(e) => write!(f, "collective failed: {e}"),
            WorkerErr::Ml(e) => write!(f, "training failed: {e}"),
            WorkerErr::Json(e) => write!(f, "invalid training config: {e}"),
            WorkerErr::Env { var, reason } => write!(f, "environment variable {var}: {reason}"),
            WorkerErr::InvalidConfig(detail) => write!(f, "invalid training config: {detail}"),
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Io(e) => Some(e),
            WorkerErr::Collective(e) => Some(e),
            WorkerErr::Ml(e) => Some(e),
            WorkerErr::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WorkerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<CollectiveErr> for WorkerErr {
    fn from(value: CollectiveErr) -> Self {
        Self::Collective(value)
    }
}

impl From<MlErr> for WorkerErr {
    fn from(value: MlErr) -> Self {
        Self::Ml(value)
    }
}

impl From<serde_json::Error> for WorkerErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<WorkerErr> for io::Error {
    fn from(value: WorkerErr) -> Self {
        match value {
            WorkerErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
