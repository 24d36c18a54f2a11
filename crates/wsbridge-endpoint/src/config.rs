use std::time::Duration;

use wsbridge_frame::{FramingMode, DEFAULT_MAX_FRAME_SIZE};
use wsbridge_transport::PayloadType;

/// Fixed per-endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Binary rather than text message typing / stdout framing.
    pub binary: bool,
    /// Explicit length headers instead of delimiters. Takes priority over `binary`.
    pub size_header: bool,
    /// Exclusive upper bound on a declared frame length in size-header mode.
    pub max_frame_size: usize,
    /// Extra grace added to every termination step except the last.
    pub close_time: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            binary: false,
            size_header: false,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            close_time: Duration::ZERO,
        }
    }
}

impl EndpointConfig {
    /// Process stdout framing for this configuration.
    pub fn framing(&self) -> FramingMode {
        FramingMode::select(self.binary, self.size_header, self.max_frame_size)
    }

    /// Outbound message type on the connection side.
    pub fn message_type(&self) -> PayloadType {
        if self.binary {
            PayloadType::Binary
        } else {
            PayloadType::Text
        }
    }
}
