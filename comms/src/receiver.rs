//! The implementation of the receiving end of the framing protocol.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{DEFAULT_MAX_FRAME_LEN, FLOAT_SIZE, FrameErr, LEN_TYPE_SIZE, LenType, Result};

const DRAIN_CHUNK: usize = 4096;

/// Where the receiver is within the current frame.
#[derive(Debug, Clone, Copy)]
enum Stage {
    Header,
    Payload { len: usize },
    Drain { declared: LenType, left: usize },
}

/// The receiving end handle of the communication.
///
/// Partially read headers and payloads are kept inside the receiver, so a
/// `recv` future can be dropped at any await point (a `select!` branch losing,
/// a timeout firing) and the next call resumes exactly where the last one
/// stopped.
pub struct FrameReceiver<R: AsyncRead + Unpin> {
    rx: R,
    max_len: usize,
    stage: Stage,
    header: [u8; LEN_TYPE_SIZE],
    payload: Vec<f32>,
    filled: usize,
}

impl<R: AsyncRead + Unpin> FrameReceiver<R> {
    /// Creates a new `FrameReceiver` instance.
    ///
    /// # Arguments
    /// * `rx` - The underlying reader.
    pub fn new(rx: R) -> Self {
        Self {
            rx,
            max_len: DEFAULT_MAX_FRAME_LEN,
            stage: Stage::Header,
            header: [0; LEN_TYPE_SIZE],
            payload: Vec::new(),
            filled: 0,
        }
    }

    /// Sets the largest payload, in bytes, this receiver will accept.
    ///
    /// # Arguments
    /// * `max_len` - The new limit.
    pub fn set_max_len(&mut self, max_len: usize) {
        self.max_len = max_len;
    }

    /// Waits to receive the next vector from the inner reader.
    ///
    /// # Returns
    /// The decoded vector, or a `FrameErr`. A `FrameErr::Malformed` leaves the
    /// receiver aligned on the next frame, every other error is terminal.
    ///
    /// # Cancel safety
    /// This method is cancel safe, no bytes are lost when the future is dropped.
    pub async fn recv(&mut self) -> Result<Vec<f32>> {
        loop {
            match self.stage {
                Stage::Header => {
                    if self.filled == LEN_TYPE_SIZE {
                        self.filled = 0;
                        let len = LenType::from_be_bytes(self.header);
                        self.stage = self.stage_for(len)?;
                        if let Stage::Drain { left: 0, .. } = self.stage {
                            self.stage = Stage::Header;
                            return Err(FrameErr::Malformed { len });
                        }
                        continue;
                    }

                    let n = self.rx.read(&mut self.header[self.filled..]).await?;
                    if n == 0 {
                        return Err(FrameErr::PeerClosed);
                    }
                    self.filled += n;
                }
                Stage::Payload { len } => {
                    if self.filled == len {
                        self.filled = 0;
                        self.stage = Stage::Header;
                        return Ok(std::mem::take(&mut self.payload));
                    }

                    let bytes: &mut [u8] = bytemuck::cast_slice_mut(self.payload.as_mut_slice());
                    let n = self.rx.read(&mut bytes[self.filled..]).await?;
                    if n == 0 {
                        return Err(FrameErr::TruncatedPayload {
                            expected: len,
                            got: self.filled,
                        });
                    }
                    self.filled += n;
                }
                Stage::Drain { declared, left } => {
                    let mut scratch = [0; DRAIN_CHUNK];
                    let want = left.min(DRAIN_CHUNK);
                    let n = self.rx.read(&mut scratch[..want]).await?;
                    if n == 0 {
                        let expected = declared as usize;
                        return Err(FrameErr::TruncatedPayload {
                            expected,
                            got: expected - left,
                        });
                    }

                    let left = left - n;
                    if left == 0 {
                        self.stage = Stage::Header;
                        return Err(FrameErr::Malformed { len: declared });
                    }
                    self.stage = Stage::Drain { declared, left };
                }
            }
        }
    }

    /// Validates a freshly read length header and decides what to read next.
    ///
    /// # Arguments
    /// * `len` - The declared payload length.
    ///
    /// # Returns
    /// The next stage, or `FrameErr::TooLarge` if the frame can't be consumed.
    fn stage_for(&mut self, len: LenType) -> Result<Stage> {
        if len > self.max_len as LenType {
            return Err(FrameErr::TooLarge {
                len,
                max: self.max_len,
            });
        }

        let len_usize = len as usize;
        if len_usize == 0 || len_usize % FLOAT_SIZE != 0 {
            return Ok(Stage::Drain {
                declared: len,
                left: len_usize,
            });
        }

        self.payload = vec![0.; len_usize / FLOAT_SIZE];
        Ok(Stage::Payload { len: len_usize })
    }
}
