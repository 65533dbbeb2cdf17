use std::{error::Error, fmt, io};

use comms::FrameErr;

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Worker runtime failures.
#[derive(Debug)]
pub enum WorkerErr {
    Io(io::Error),
    Frame(FrameErr),
    ModelLengthMismatch {
        step: usize,
        got: usize,
        expected: usize,
    },
    Env {
        key: &'static str,
        value: String,
    },
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Io(e) => write!(f, "io error: {e}"),
            WorkerErr::Frame(e) => write!(f, "frame error: {e}"),
            WorkerErr::ModelLengthMismatch {
                step,
                got,
                expected,
            } => write!(
                f,
                "model length mismatch at step {step}: got {got}, expected {expected}"
            ),
            WorkerErr::Env { key, value } => write!(f, "invalid value {value:?} for {key}"),
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Io(e) => Some(e),
            WorkerErr::Frame(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WorkerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<FrameErr> for WorkerErr {
    fn from(value: FrameErr) -> Self {
        match value {
            FrameErr::Io(e) => Self::Io(e),
            other => Self::Frame(other),
        }
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<WorkerErr> for io::Error {
    fn from(value: WorkerErr) -> Self {
        match value {
            WorkerErr::Io(e) => e,
            WorkerErr::Frame(e) => e.into(),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
