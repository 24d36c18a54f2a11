use std::future::Future;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, trace, warn, Instrument};
use wsbridge_frame::{length_header, Frame};
use wsbridge_transport::{
    split, InboundMessage, MessageReader, MessageType, MessageWriter, PayloadType,
    TransportError, WsReader, WsWriter,
};

use crate::config::EndpointConfig;
use crate::endpoint::{output_channel, publish, Endpoint, FrameReceiver};

/// Bridge endpoint backed by a message connection.
///
/// Inbound messages are published as frames; `send` writes each frame as one
/// message of the configured type.
pub struct WebSocketEndpoint<R, W> {
    writer: Mutex<W>,
    pending: Option<(R, mpsc::Sender<Frame>)>,
    output: Option<FrameReceiver>,
    config: EndpointConfig,
    message_type: PayloadType,
    stop_reader: CancellationToken,
}

impl<S> WebSocketEndpoint<WsReader<S>, WsWriter<S>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap an established WebSocket.
    pub fn from_stream(ws: WebSocketStream<S>, config: EndpointConfig) -> Self {
        let (writer, reader) = split(ws);
        Self::new(reader, writer, config)
    }
}

impl<R: MessageReader, W: MessageWriter> WebSocketEndpoint<R, W> {
    pub fn new(reader: R, writer: W, config: EndpointConfig) -> Self {
        let (tx, rx) = output_channel();
        let message_type = config.message_type();
        Self {
            writer: Mutex::new(writer),
            pending: Some((reader, tx)),
            output: Some(rx),
            config,
            message_type,
            stop_reader: CancellationToken::new(),
        }
    }

    /// Send a close message to the peer.
    pub async fn close(&self) {
        if let Err(err) = self.writer.lock().await.close().await {
            trace!(error = %err, "cannot close connection");
        }
    }

    async fn write(&self, frame: Frame) -> bool {
        let mut writer = self.writer.lock().await;
        match writer.write_message(self.message_type, frame.as_ref()).await {
            Ok(()) => true,
            Err(err) => {
                trace!(
                    kind = MessageType::from(self.message_type).as_str(),
                    error = %err,
                    "cannot send"
                );
                false
            }
        }
    }
}

impl<R: MessageReader, W: MessageWriter> Endpoint for WebSocketEndpoint<R, W> {
    fn output(&mut self) -> Option<FrameReceiver> {
        self.output.take()
    }

    fn send(&self, frame: Frame) -> impl Future<Output = bool> + Send {
        self.write(frame)
    }

    fn start_reading(&mut self) {
        let Some((reader, tx)) = self.pending.take() else {
            warn!("websocket endpoint already reading");
            return;
        };

        let span = info_span!("websocket");
        tokio::spawn(
            read_messages(
                reader,
                tx,
                self.message_type,
                self.config.size_header,
                self.stop_reader.clone(),
            )
            .instrument(span),
        );
    }

    fn terminate(&self) -> impl Future<Output = ()> + Send {
        trace!("websocket endpoint terminated");
        self.stop_reader.cancel();
        std::future::ready(())
    }
}

impl<R, W> std::fmt::Debug for WebSocketEndpoint<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketEndpoint")
            .field("config", &self.config)
            .field("reading", &self.pending.is_none())
            .finish_non_exhaustive()
    }
}

async fn read_messages<R: MessageReader>(
    mut reader: R,
    tx: mpsc::Sender<Frame>,
    expected: PayloadType,
    size_header: bool,
    stop: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = stop.cancelled() => {
                debug!("websocket reader stopped");
                return;
            }
            next = reader.next_message() => next,
        };

        let message = match next {
            Ok(message) => message,
            Err(TransportError::Closed { code, reason }) => {
                debug!(code, %reason, "connection closed by peer");
                return;
            }
            Err(err) => {
                debug!(error = %err, "cannot receive");
                return;
            }
        };

        let expected_kind = MessageType::from(expected);
        if message.kind != expected_kind {
            debug!(
                received = message.kind.as_str(),
                expected = expected_kind.as_str(),
                "message type mismatch"
            );
        }

        for frame in decode_message(message, size_header) {
            if !publish(&tx, frame, &stop).await {
                debug!("websocket output no longer consumed");
                return;
            }
        }
    }
}

/// Frames published for one inbound message.
pub(crate) fn decode_message(message: InboundMessage, size_header: bool) -> Vec<Frame> {
    match message.kind {
        MessageType::Text | MessageType::Binary if size_header => {
            match length_header(message.payload.len()) {
                Ok(header) => vec![header, Frame::new(message.payload)],
                Err(err) => {
                    debug!(error = %err, "message too large for length header");
                    Vec::new()
                }
            }
        }
        MessageType::Text => {
            let mut line = Vec::with_capacity(message.payload.len() + 1);
            line.extend_from_slice(&message.payload);
            line.push(b'\n');
            vec![Frame::from(line)]
        }
        MessageType::Binary => vec![Frame::new(message.payload)],
        other => {
            debug!(kind = other.as_str(), "dropping control message");
            Vec::new()
        }
    }
}
