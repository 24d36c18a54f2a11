//! Bridge child process standard streams to WebSocket connections.
//!
//! Each accepted connection gets its own child process. Frames read from the
//! process's stdout become WebSocket messages, and inbound messages are
//! written to its stdin.
//!
//! # Crate Structure
//!
//! - [`transport`]: process launching, signal delivery, WebSocket halves
//! - [`frame`]: stdout framing (text, binary, size-header) and stdin writing
//! - [`endpoint`]: the two bridge endpoints, the shutdown ladder and the pump

/// Re-export transport types.
pub mod transport {
    pub use wsbridge_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use wsbridge_frame::*;
}

/// Re-export endpoint types.
pub mod endpoint {
    pub use wsbridge_endpoint::*;
}
