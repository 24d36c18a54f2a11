use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

use crate::codec::{Frame, FramingMode, ProcessCodec};
use crate::error::{FrameError, Result};

/// Reads complete frames from any `AsyncRead` stream.
///
/// Partial reads are buffered internally; callers only see complete frames.
pub struct FrameReader<R> {
    inner: FramedRead<R, ProcessCodec>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Create a frame reader decoding `inner` in `mode`.
    pub fn new(inner: R, mode: FramingMode) -> Self {
        Self {
            inner: FramedRead::with_capacity(inner, ProcessCodec::new(mode), mode.read_capacity()),
        }
    }

    /// Create a text-mode reader whose lines are capped at `max_line_length`
    /// bytes. Overlong lines are truncated rather than buffered without bound.
    pub fn lines(inner: R, max_line_length: usize) -> Self {
        let mode = FramingMode::Text;
        let codec = ProcessCodec::new(mode).with_max_line_length(max_line_length);
        Self {
            inner: FramedRead::with_capacity(inner, codec, mode.read_capacity()),
        }
    }

    /// Read the next complete frame.
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when the stream ends at a
    /// frame boundary.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        match self.inner.next().await {
            Some(result) => result,
            None => Err(FrameError::ConnectionClosed),
        }
    }

    /// Framing mode this reader decodes.
    pub fn mode(&self) -> FramingMode {
        self.inner.decoder().mode()
    }
}

impl<R> std::fmt::Debug for FrameReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameReader")
            .field("mode", &self.inner.decoder().mode())
            .finish()
    }
}
