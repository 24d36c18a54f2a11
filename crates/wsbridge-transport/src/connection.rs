use std::future::Future;

use bytes::Bytes;

use crate::error::Result;

/// WebSocket message types as seen by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Text,
    Binary,
    Ping,
    Pong,
    /// A raw protocol frame surfaced by the connection layer.
    Raw,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Binary => "binary",
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
            MessageType::Raw => "raw",
        }
    }
}

/// Data message types the bridge writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadType {
    Text,
    Binary,
}

impl From<PayloadType> for MessageType {
    fn from(kind: PayloadType) -> Self {
        match kind {
            PayloadType::Text => MessageType::Text,
            PayloadType::Binary => MessageType::Binary,
        }
    }
}

/// One complete inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub kind: MessageType,
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn new(kind: MessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }
}

/// Read half of a message connection.
///
/// Each call yields the next complete message. Peer close and transport
/// failures are both errors; no message is produced after either.
pub trait MessageReader: Send + Sync + 'static {
    fn next_message(&mut self) -> impl Future<Output = Result<InboundMessage>> + Send;
}

/// Write half of a message connection. Independent of the read half.
pub trait MessageWriter: Send + 'static {
    /// Write `payload` as one message of type `kind` and flush it.
    fn write_message(
        &mut self,
        kind: PayloadType,
        payload: &[u8],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Send a close message and shut the write half down.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}
