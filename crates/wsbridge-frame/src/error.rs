/// Errors that can occur while decoding or writing frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A declared frame length reached the configured maximum.
    #[error("oversized frame ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended cleanly at a frame boundary.
    #[error("stream closed")]
    ConnectionClosed,

    /// The stream ended in the middle of a size-header frame.
    #[error("stream closed mid-frame ({buffered} bytes buffered)")]
    Truncated { buffered: usize },
}

impl FrameError {
    /// Whether this error is an end-of-stream rather than a failure.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            FrameError::ConnectionClosed | FrameError::Truncated { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
