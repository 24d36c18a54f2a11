//! Resource adapters the bridge endpoints sit on top of.
//!
//! Two kinds of resources are provided here:
//! - [`LaunchedProcess`]: a spawned child with piped standard streams, signal
//!   delivery and an exit watch
//! - [`MessageReader`] / [`MessageWriter`]: the two independent halves of a
//!   message connection, implemented for `tokio-tungstenite` streams
//!
//! This is the lowest layer of wsbridge. Everything else builds on top of it.

pub mod connection;
pub mod error;
pub mod process;
pub mod websocket;

pub use connection::{InboundMessage, MessageReader, MessageType, MessageWriter, PayloadType};
pub use error::{Result, TransportError};
pub use process::{
    ExitNotifier, ExitWatch, LaunchedProcess, OsProcess, ProcessParts, ProcessSignals, Signal,
};
pub use websocket::{split, WsReader, WsWriter};
