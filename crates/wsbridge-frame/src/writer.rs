use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::codec::Frame;
use crate::error::Result;

/// Writes frame payloads verbatim to any `AsyncWrite` stream.
///
/// No framing is added: the bytes of each payload leave as-is and are flushed
/// before `send` returns.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write a complete frame.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send(frame.as_ref()).await
    }

    /// Write `payload` in full and flush.
    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.inner.write_all(payload).await?;
        self.inner.flush().await?;
        Ok(())
    }
}

impl<W> std::fmt::Debug for FrameWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameWriter").finish_non_exhaustive()
    }
}
