//! `tokio-tungstenite` implementation of the connection halves.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::connection::{InboundMessage, MessageReader, MessageType, MessageWriter, PayloadType};
use crate::error::{Result, TransportError};

/// Close code reported when the peer's close frame carried none.
const NO_STATUS_CODE: u16 = 1005;

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

/// Split an established WebSocket into independent writer and reader halves.
pub fn split<S>(ws: WebSocketStream<S>) -> (WsWriter<S>, WsReader<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (sink, stream) = ws.split();
    (WsWriter { sink }, WsReader { stream })
}

impl<S> MessageReader for WsReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn next_message(&mut self) -> Result<InboundMessage> {
        match self.stream.next().await {
            Some(Ok(message)) => from_message(message),
            Some(Err(err)) => Err(err.into()),
            None => Err(TransportError::Closed {
                code: NO_STATUS_CODE,
                reason: String::new(),
            }),
        }
    }
}

impl<S> MessageWriter for WsWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn write_message(&mut self, kind: PayloadType, payload: &[u8]) -> Result<()> {
        let message = match kind {
            PayloadType::Text => Message::Text(String::from_utf8(payload.to_vec())?),
            PayloadType::Binary => Message::Binary(payload.to_vec()),
        };
        self.sink.send(message).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.sink.close().await?;
        Ok(())
    }
}

fn from_message(message: Message) -> Result<InboundMessage> {
    let inbound = match message {
        Message::Text(text) => InboundMessage::new(MessageType::Text, text.into_bytes()),
        Message::Binary(data) => InboundMessage::new(MessageType::Binary, data),
        Message::Ping(data) => InboundMessage::new(MessageType::Ping, data),
        Message::Pong(data) => InboundMessage::new(MessageType::Pong, data),
        Message::Frame(frame) => InboundMessage::new(MessageType::Raw, frame.into_data()),
        Message::Close(frame) => {
            let (code, reason) = frame
                .map(|cf| (u16::from(cf.code), cf.reason.into_owned()))
                .unwrap_or((NO_STATUS_CODE, String::new()));
            return Err(TransportError::Closed { code, reason });
        }
    };
    Ok(inbound)
}
