//! Length-prefixed framing for the vectors exchanged between workers and the coordinator.
//!
//! Every frame on the wire, in both directions, is:
//!
//! ```text
//! [8 bytes]      length  - unsigned big-endian byte count of the payload
//! [length bytes] payload - sequence of 32-bit floats in native byte order
//! ```
mod codec;
mod error;
mod receiver;
mod sender;

use tokio::io::{AsyncRead, AsyncWrite};

pub use codec::{decode, encode};
pub use error::{FrameErr, Result};
pub use receiver::FrameReceiver;
pub use sender::FrameSender;

type LenType = u64;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();
const FLOAT_SIZE: usize = size_of::<f32>();

/// The largest payload a receiver accepts unless told otherwise.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Creates both `FrameReceiver` and `FrameSender` network channel parts.
///
/// Given a writer and reader creates and returns both ends of the communication.
///
/// # Arguments
/// * `rx` - An async readable.
/// * `tx` - An async writable.
///
/// # Returns
/// A communication stream in the form of a frame receiver and sender.
pub fn channel<R, W>(rx: R, tx: W) -> (FrameReceiver<R>, FrameSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (FrameReceiver::new(rx), FrameSender::new(tx))
}
