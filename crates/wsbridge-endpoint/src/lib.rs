//! Bridge endpoints.
//!
//! Two endpoints implement one [`Endpoint`] contract: [`ProcessEndpoint`]
//! speaks to a child's standard streams, [`WebSocketEndpoint`] to a message
//! connection. [`pipe_endpoints`] pumps frames between any two of them.

pub mod config;
pub mod endpoint;
pub mod pipe;
pub mod process;
pub mod termination;
pub mod websocket;

#[cfg(test)]
mod test_support;

pub use config::EndpointConfig;
pub use endpoint::{Endpoint, FrameReceiver, OUTPUT_CAPACITY};
pub use pipe::pipe_endpoints;
pub use process::ProcessEndpoint;
pub use termination::TerminationOutcome;
pub use websocket::WebSocketEndpoint;
