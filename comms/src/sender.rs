//! The implementation of the sending end of the framing protocol.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{LenType, Result};

/// The sending end handle of the communication.
pub struct FrameSender<W>
where
    W: AsyncWrite + Unpin,
{
    tx: W,
}

impl<W: AsyncWrite + Unpin> FrameSender<W> {
    /// Creates a new `FrameSender` instance.
    ///
    /// # Arguments
    /// * `tx` - The underlying writer.
    pub fn new(tx: W) -> Self {
        Self { tx }
    }

    /// Sends `vector` as a single frame through the inner writer.
    ///
    /// The payload is written straight from `vector`'s memory, no intermediate copy is made.
    ///
    /// # Arguments
    /// * `vector` - The floats to send.
    ///
    /// # Returns
    /// A result object that returns `FrameErr::Io` on failure.
    pub async fn send(&mut self, vector: &[f32]) -> Result<()> {
        let payload: &[u8] = bytemuck::cast_slice(vector);
        let header = (payload.len() as LenType).to_be_bytes();

        self.tx.write_all(&header).await?;
        self.tx.write_all(payload).await?;
        self.tx.flush().await?;
        Ok(())
    }

    /// Shuts down the write half, the peer will observe a closed connection.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.tx.shutdown().await?;
        Ok(())
    }
}
