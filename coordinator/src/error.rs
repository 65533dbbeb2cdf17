use std::{error::Error, fmt, io};

/// Why a contribution could not be deposited into a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContributionErr {
    /// The round is already closing or closed.
    RoundNotOpen { round: u64 },
    /// The worker wasn't part of the membership when the round opened.
    NotInvited { round: u64 },
    /// The worker already responded to this round.
    Duplicate { round: u64 },
    /// The vector's length doesn't match the model's dimensionality.
    DimensionMismatch { got: usize, expected: usize },
}

impl fmt::Display for ContributionErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContributionErr::RoundNotOpen { round } => write!(f, "round {round} is not open"),
            ContributionErr::NotInvited { round } => {
                write!(f, "worker is not expected in round {round}")
            }
            ContributionErr::Duplicate { round } => {
                write!(f, "worker already responded to round {round}")
            }
            ContributionErr::DimensionMismatch { got, expected } => {
                write!(f, "dimension mismatch: got {got}, expected {expected}")
            }
        }
    }
}

impl Error for ContributionErr {}

/// Failures while combining a round's contributions.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregationErr {
    /// There was nothing to aggregate.
    Empty,
    /// The combined vector holds a NaN or an infinity.
    NonFinite { index: usize, value: f32 },
}

impl fmt::Display for AggregationErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationErr::Empty => f.write_str("no contributions to aggregate"),
            AggregationErr::NonFinite { index, value } => {
                write!(f, "non finite value {value} at index {index}")
            }
        }
    }
}

impl Error for AggregationErr {}

/// Failures while loading the coordinator's configuration.
#[derive(Debug)]
pub enum ConfigErr {
    Io(io::Error),
    Json(serde_json::Error),
    Env { key: &'static str, value: String },
    Invalid(String),
}

impl fmt::Display for ConfigErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErr::Io(e) => write!(f, "io error: {e}"),
            ConfigErr::Json(e) => write!(f, "invalid config file: {e}"),
            ConfigErr::Env { key, value } => write!(f, "invalid value {value:?} for {key}"),
            ConfigErr::Invalid(detail) => write!(f, "invalid config: {detail}"),
        }
    }
}

impl Error for ConfigErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigErr::Io(e) => Some(e),
            ConfigErr::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ConfigErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for ConfigErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<ConfigErr> for io::Error {
    fn from(value: ConfigErr) -> Self {
        match value {
            ConfigErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidInput, other),
        }
    }
}
