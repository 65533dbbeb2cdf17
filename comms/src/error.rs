use std::{error::Error, fmt, io};

/// The comms crate's result type.
pub type Result<T> = std::result::Result<T, FrameErr>;

/// Failures while reading or writing a frame.
#[derive(Debug)]
pub enum FrameErr {
    /// The peer closed the connection before a full header arrived.
    PeerClosed,
    /// The declared length is not a positive multiple of 4. Its payload was drained.
    Malformed { len: u64 },
    /// The peer closed the connection in the middle of a payload.
    TruncatedPayload { expected: usize, got: usize },
    /// The declared length exceeds the receiver's limit, the stream can't be resynchronized.
    TooLarge { len: u64, max: usize },
    Io(io::Error),
}

impl FrameErr {
    /// Whether the connection that produced this error is still usable.
    ///
    /// # Returns
    /// `true` only for malformed frames, every other failure leaves the stream unusable.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FrameErr::Malformed { .. })
    }
}

impl fmt::Display for FrameErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameErr::PeerClosed => f.write_str("peer closed the connection"),
            FrameErr::Malformed { len } => {
                write!(f, "malformed frame: length {len} is not a positive multiple of 4")
            }
            FrameErr::TruncatedPayload { expected, got } => write!(
                f,
                "truncated payload: got {got} of {expected} bytes before the peer closed"
            ),
            FrameErr::TooLarge { len, max } => {
                write!(f, "frame of {len} bytes exceeds the limit of {max} bytes")
            }
            FrameErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for FrameErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            FrameErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for FrameErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<FrameErr> for io::Error {
    fn from(value: FrameErr) -> Self {
        match value {
            FrameErr::Io(e) => e,
            FrameErr::PeerClosed | FrameErr::TruncatedPayload { .. } => {
                io::Error::new(io::ErrorKind::UnexpectedEof, value)
            }
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
